use crate::error::DecodeError;
use crate::peer::{PeerId, PeerIdentity};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A validated discovery event, as consumed by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Peer is present with exactly these attributes.
    Join {
        identity: PeerIdentity,
        address: IpAddr,
    },
    Leave {
        id: PeerId,
    },
    /// Metadata change without a presence transition.
    Update {
        id: PeerId,
        alias: Option<String>,
        port: Option<u16>,
        address: Option<IpAddr>,
    },
}

impl Event {
    pub fn join(id: PeerId, alias: impl Into<String>, port: u16, address: IpAddr) -> Self {
        Event::Join {
            identity: PeerIdentity {
                id,
                alias: alias.into(),
                port,
            },
            address,
        }
    }

    pub fn leave(id: PeerId) -> Self {
        Event::Leave { id }
    }

    pub fn id(&self) -> &PeerId {
        match self {
            Event::Join { identity, .. } => &identity.id,
            Event::Leave { id } | Event::Update { id, .. } => id,
        }
    }
}

/// Adapter-neutral form of an incoming notification, before validation.
///
/// The multicast adapter deserializes datagrams straight into this; the
/// mDNS adapter fills it from service TXT properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAnnouncement {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub leaving: bool,
}

impl RawAnnouncement {
    pub fn into_event(self) -> Result<Event, DecodeError> {
        let id = self
            .id
            .as_deref()
            .and_then(PeerId::parse)
            .ok_or(DecodeError::MissingId)?;

        if self.leaving {
            return Ok(Event::leave(id));
        }

        let port = self.port.ok_or_else(|| DecodeError::MissingField {
            id: id.to_string(),
            field: "port",
        })?;
        let address = match self.address {
            Some(raw) => parse_address(&id, &raw)?,
            None => {
                return Err(DecodeError::MissingField {
                    id: id.to_string(),
                    field: "address",
                })
            }
        };
        let alias = self
            .alias
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| id.to_string());

        Ok(Event::join(id, alias, port, address))
    }
}

fn parse_address(id: &PeerId, raw: &str) -> Result<IpAddr, DecodeError> {
    // mDNS may hand out scoped v6 addresses such as `fe80::1%eth0`
    let unscoped = raw.split('%').next().unwrap_or(raw);
    unscoped
        .parse()
        .map_err(|_| DecodeError::InvalidAddress {
            id: id.to_string(),
            address: raw.to_string(),
        })
}
