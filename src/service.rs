use crate::error::{DecodeError, DiscoveryError};
use crate::event::Event;
use crate::peer::LocalPeer;
use crate::registry::{Outcome, PeerRegistry};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// What an adapter hands to the service: a decoded event or the reason it couldn't decode one.
pub type Inbound = Result<Event, DecodeError>;

pub const DEFAULT_INBOUND_BUFFER: usize = 256;

/// Producer side of the service. Clone one per adapter; all clones feed the
/// same ordered queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Inbound>,
}

impl EventSender {
    pub async fn send(&self, inbound: Inbound) -> Result<(), DiscoveryError> {
        self.tx
            .send(inbound)
            .await
            .map_err(|_| DiscoveryError::ChannelClosed)
    }

    pub async fn event(&self, event: Event) -> Result<(), DiscoveryError> {
        self.send(Ok(event)).await
    }

    /// Adapter-side send. A closed queue once `shutdown` has fired is the
    /// service stopping first, not a failure.
    pub async fn forward(
        &self,
        inbound: Inbound,
        shutdown: &CancellationToken,
    ) -> Result<(), DiscoveryError> {
        match self.send(inbound).await {
            Err(DiscoveryError::ChannelClosed) if shutdown.is_cancelled() => Ok(()),
            other => other,
        }
    }
}

/// Drops announcements about the local node. Decode errors always pass.
pub fn foreign(local: &LocalPeer, inbound: Inbound) -> Option<Inbound> {
    match &inbound {
        Ok(event) if local.is_self(event.id()) => None,
        _ => Some(inbound),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStats {
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
    pub noops: u64,
    pub expired: u64,
    pub decode_errors: u64,
}

impl ServiceStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Added => self.added += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Removed => self.removed += 1,
            Outcome::NoOp => self.noops += 1,
        }
    }
}

/// The single mutator of a [`PeerRegistry`]: drains the inbound queue in
/// order and, if the registry has a liveness policy, expires silent peers.
/// The registry is cleared when the service stops.
pub struct RegistryService {
    registry: PeerRegistry,
    inbound: mpsc::Receiver<Inbound>,
    shutdown: CancellationToken,
    stats: ServiceStats,
}

impl RegistryService {
    pub fn new(
        registry: PeerRegistry,
        buffer: usize,
        shutdown: CancellationToken,
    ) -> (Self, EventSender) {
        let (tx, inbound) = mpsc::channel(buffer.max(1));
        let service = Self {
            registry,
            inbound,
            shutdown,
            stats: ServiceStats::default(),
        };
        (service, EventSender { tx })
    }

    pub fn spawn(
        registry: PeerRegistry,
        buffer: usize,
        shutdown: CancellationToken,
    ) -> (EventSender, JoinHandle<ServiceStats>) {
        let (service, sender) = Self::new(registry, buffer, shutdown);
        (sender, tokio::spawn(service.run()))
    }

    pub async fn run(mut self) -> ServiceStats {
        let mut sweep = self.registry.config().liveness.map(|policy| {
            let mut ticker = interval(policy.sweep_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Registry service shutting down");
                    break;
                }
                inbound = self.inbound.recv() => match inbound {
                    Some(inbound) => self.handle(inbound),
                    None => {
                        tracing::info!("All event sources closed");
                        break;
                    }
                },
                _ = tick(&mut sweep) => self.expire_stale(),
            }
        }

        self.registry.clear();
        self.stats
    }

    fn handle(&mut self, inbound: Inbound) {
        match inbound {
            Ok(event) => {
                let outcome = self.registry.apply(event);
                self.stats.record(outcome);
            }
            Err(e) => {
                self.stats.decode_errors += 1;
                tracing::warn!("Rejected discovery notification: {}", e);
            }
        }
    }

    fn expire_stale(&mut self) {
        let Some(policy) = self.registry.config().liveness else {
            return;
        };
        for id in self.registry.stale(policy.max_age) {
            tracing::info!(peer = %id, "Peer expired after {:?} of silence", policy.max_age);
            if self.registry.apply(Event::leave(id)) == Outcome::Removed {
                self.stats.expired += 1;
            }
        }
    }
}

async fn tick(sweep: &mut Option<Interval>) {
    match sweep {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerId;

    fn local() -> LocalPeer {
        LocalPeer {
            id: PeerId::parse("me").unwrap(),
            alias: "Me".into(),
            port: 8000,
        }
    }

    fn join(s: &str) -> Event {
        Event::join(PeerId::parse(s).unwrap(), s, 8000, "10.0.0.1".parse().unwrap())
    }

    #[test]
    fn own_announcements_are_dropped() {
        let me = local();
        assert_eq!(foreign(&me, Ok(join("me"))), None);
        assert_eq!(foreign(&me, Ok(Event::leave(me.id.clone()))), None);
        assert_eq!(foreign(&me, Ok(join("other"))), Some(Ok(join("other"))));
    }

    #[test]
    fn decode_errors_are_still_forwarded() {
        let inbound: Inbound = Err(DecodeError::MissingId);
        assert_eq!(foreign(&local(), inbound.clone()), Some(inbound));
    }

    #[tokio::test]
    async fn closed_queue_is_only_an_error_before_shutdown() {
        let shutdown = CancellationToken::new();
        let (service, events) = RegistryService::new(PeerRegistry::new(), 1, shutdown.clone());
        drop(service);

        assert!(matches!(
            events.forward(Ok(join("p1")), &shutdown).await,
            Err(DiscoveryError::ChannelClosed)
        ));
        shutdown.cancel();
        assert!(events.forward(Ok(join("p1")), &shutdown).await.is_ok());
    }
}
