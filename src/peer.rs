use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Opaque peer identifier. The only key used for equality inside the registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Accepts any non-blank string, kept byte for byte.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub alias: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    #[serde(flatten)]
    pub identity: PeerIdentity,
    pub address: IpAddr,
    pub last_seen: u64, // unix seconds of the latest join/update
}

impl PeerRecord {
    pub fn id(&self) -> &PeerId {
        &self.identity.id
    }

    pub fn alias(&self) -> &str {
        &self.identity.alias
    }

    pub fn port(&self) -> u16 {
        self.identity.port
    }
}

/// Identity of the node running this process, used for announcing and
/// for ignoring our own announcements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPeer {
    pub id: PeerId,
    pub alias: String,
    pub port: u16,
}

impl LocalPeer {
    pub fn is_self(&self, id: &PeerId) -> bool {
        &self.id == id
    }
}
