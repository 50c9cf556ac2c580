//! Discovery over plain UDP multicast.
//!
//! Every peer periodically sends a small JSON datagram `{"id","alias","port"}`
//! to a fixed group. The sender's source IP is taken as its address. A peer
//! that is shutting down sends one last datagram with `"leaving": true`.

use crate::error::{DecodeError, DiscoveryError};
use crate::event::{Event, RawAnnouncement};
use crate::peer::LocalPeer;
use crate::service::{foreign, EventSender};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

pub const GROUP: &str = "224.0.0.167";
pub const PORT: u16 = 53317;
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);
const MAX_DATAGRAM: usize = 1024;

pub fn decode(datagram: &[u8], from: IpAddr) -> Result<Event, DecodeError> {
    let mut raw: RawAnnouncement = serde_json::from_slice(datagram)?;
    // The observed source wins over anything the sender claims
    raw.address = Some(from.to_string());
    raw.into_event()
}

pub fn encode(local: &LocalPeer, leaving: bool) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&RawAnnouncement {
        id: Some(local.id.to_string()),
        alias: Some(local.alias.clone()),
        port: Some(local.port),
        address: None,
        leaving,
    })
}

pub async fn listen(
    local: LocalPeer,
    events: EventSender,
    shutdown: CancellationToken,
) -> Result<(), DiscoveryError> {
    let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, PORT)).await?;
    sock.join_multicast_v4(GROUP.parse::<Ipv4Addr>()?, Ipv4Addr::UNSPECIFIED)?;

    tracing::info!("Listening for multicast on {GROUP}:{PORT}...");

    let mut buf = [0; MAX_DATAGRAM];
    loop {
        let (n, addr) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            received = sock.recv_from(&mut buf) => received?,
        };
        if n == 0 {
            continue;
        }

        let inbound = decode(&buf[..n], addr.ip());
        if let Err(e) = &inbound {
            tracing::debug!(
                "Unknown message from {addr}: {} ({e})",
                String::from_utf8_lossy(&buf[..n])
            );
        }
        if let Some(inbound) = foreign(&local, inbound) {
            events.forward(inbound, &shutdown).await?;
        }
    }
}

/// Announce `local` every [`ANNOUNCE_INTERVAL`] until cancelled, then say goodbye once.
pub async fn announce(local: LocalPeer, shutdown: CancellationToken) -> Result<(), DiscoveryError> {
    let hello = encode(&local, false)?;
    let goodbye = encode(&local, true)?;

    let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    let target = (GROUP, PORT);

    tracing::info!("Announcing to {target:?} every {:?}...", ANNOUNCE_INTERVAL);
    loop {
        sock.send_to(&hello, target).await?;
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(ANNOUNCE_INTERVAL) => {}
        }
    }

    sock.send_to(&goodbye, target).await?;
    tracing::info!("Sent goodbye for {}", local.id);
    Ok(())
}
