use crate::peer::{LocalPeer, PeerId};
use crate::registry::{LivenessPolicy, RegistryConfig, DEFAULT_SUBSCRIBER_CAPACITY};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "peerlist", version, about = "Discover peers on the local network and list them")]
pub struct Config {
    /// Display name announced to other peers. Random if omitted.
    #[arg(long, global = true)]
    pub alias: Option<String>,
    /// Advertised service port.
    #[arg(long, global = true, default_value_t = 8000)]
    pub port: u16,
    /// Peer id. A fresh UUID if omitted.
    #[arg(long, global = true)]
    pub id: Option<String>,
    #[arg(long, global = true, value_enum, default_value_t = Backend::Mdns)]
    pub backend: Backend,
    /// Changes buffered per subscriber before it is marked behind.
    #[arg(long, global = true, default_value_t = DEFAULT_SUBSCRIBER_CAPACITY)]
    pub buffer: usize,
    /// Forget peers silent for this many seconds. 0 disables expiry.
    #[arg(long, global = true, default_value_t = 0)]
    pub liveness_secs: u64,
    #[arg(long, global = true, default_value_t = 2)]
    pub sweep_secs: u64,
    /// Used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
    /// Also write daily rolling logs into this directory.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Watch for peers and print the list and every change as JSON lines.
    Listen,
    /// Announce this node without tracking others.
    Announce,
    /// Announce and listen.
    Run,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// mDNS service discovery (`_peerlist._tcp.local.`).
    Mdns,
    /// JSON datagrams on a fixed multicast group.
    Multicast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub dir: Option<PathBuf>,
}

impl Config {
    pub fn local_peer(&self) -> anyhow::Result<LocalPeer> {
        let id = match &self.id {
            Some(raw) => {
                PeerId::parse(raw).ok_or_else(|| anyhow::anyhow!("--id must not be blank"))?
            }
            None => PeerId::parse(&uuid::Uuid::new_v4().to_string())
                .ok_or_else(|| anyhow::anyhow!("generated an empty id"))?,
        };
        let alias = self
            .alias
            .clone()
            .filter(|a| !a.trim().is_empty())
            .or_else(|| names::Generator::default().next())
            .unwrap_or_else(|| "Peer".to_string());
        Ok(LocalPeer {
            id,
            alias,
            port: self.port,
        })
    }

    pub fn registry(&self) -> RegistryConfig {
        let liveness = (self.liveness_secs > 0).then(|| LivenessPolicy {
            max_age: Duration::from_secs(self.liveness_secs),
            sweep_interval: Duration::from_secs(self.sweep_secs.max(1)),
        });
        RegistryConfig {
            capacity: self.buffer.max(1),
            liveness,
        }
    }

    pub fn logging(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            dir: self.log_dir.clone(),
        }
    }
}
