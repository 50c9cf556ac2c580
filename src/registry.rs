use crate::clock::{Clock, SystemClock};
use crate::event::Event;
use crate::observer::{Change, Notification, Snapshot, Subscription};
use crate::peer::{PeerId, PeerRecord};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::broadcast;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Added,
    Updated,
    Removed,
    NoOp,
}

/// Expire peers that have not re-announced within `max_age`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub max_age: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Per-subscriber buffer. Oldest changes are dropped past this.
    pub capacity: usize,
    pub liveness: Option<LivenessPolicy>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            liveness: None,
        }
    }
}

#[derive(Debug, Default)]
struct Peers {
    records: BTreeMap<PeerId, PeerRecord>,
    seq: u64,
}

/// The set of currently present peers.
///
/// Cheap to clone; all clones share state. Mutation happens only through
/// [`apply`](Self::apply) and [`clear`](Self::clear), each of which holds the
/// write lock across both the change and its notification.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    peers: Arc<RwLock<Peers>>,
    changes: broadcast::Sender<Notification>,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        // broadcast::channel panics on zero capacity
        let (changes, _) = broadcast::channel(config.capacity.max(1));
        Self {
            peers: Arc::new(RwLock::new(Peers::default())),
            changes,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn apply(&self, event: Event) -> Outcome {
        let mut peers = self.write();
        let now = self.clock.now();

        let (outcome, change) = match event {
            Event::Join { identity, address } => {
                let record = PeerRecord {
                    identity,
                    address,
                    last_seen: now,
                };
                let id = record.id().clone();
                match peers.records.insert(id, record.clone()) {
                    None => (Outcome::Added, Some(Change::Added(record))),
                    Some(_) => (Outcome::Updated, Some(Change::Updated(record))),
                }
            }
            Event::Leave { id } => match peers.records.remove(&id) {
                Some(_) => (Outcome::Removed, Some(Change::Removed(id))),
                None => (Outcome::NoOp, None),
            },
            Event::Update {
                id,
                alias,
                port,
                address,
            } => match peers.records.get(&id).cloned() {
                Some(mut record) => {
                    if let Some(alias) = alias {
                        record.identity.alias = alias;
                    }
                    if let Some(port) = port {
                        record.identity.port = port;
                    }
                    if let Some(address) = address {
                        record.address = address;
                    }
                    record.last_seen = now;
                    peers.records.insert(id, record.clone());
                    (Outcome::Updated, Some(Change::Updated(record)))
                }
                None => (Outcome::NoOp, None),
            },
        };

        match change {
            Some(change) => {
                tracing::debug!(peer = %change.id(), ?outcome, "Applied discovery event");
                self.publish(&mut peers, change);
            }
            None => tracing::trace!("Discovery event changed nothing"),
        }
        outcome
    }

    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.read().records.values().cloned().collect()
    }

    pub fn get(&self, id: &PeerId) -> Option<PeerRecord> {
        self.read().records.get(id).cloned()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.read().records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    /// Remove every peer. Subscribers receive one `Removed` per peer, in id order.
    pub fn clear(&self) {
        let mut peers = self.write();
        let removed = std::mem::take(&mut peers.records);
        if !removed.is_empty() {
            tracing::info!("Clearing {} peers", removed.len());
        }
        for id in removed.into_keys() {
            self.publish(&mut peers, Change::Removed(id));
        }
    }

    /// Subscribe to changes, starting from a snapshot taken atomically with registration.
    pub fn subscribe(&self) -> Subscription {
        let peers = self.read();
        let rx = self.changes.subscribe();
        let snapshot = Snapshot {
            seq: peers.seq,
            peers: peers.records.values().cloned().collect(),
        };
        Subscription::new(snapshot, rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    /// Ids whose `last_seen` is older than `max_age` by the registry clock.
    pub fn stale(&self, max_age: Duration) -> Vec<PeerId> {
        let cutoff = self.clock.now().saturating_sub(max_age.as_secs());
        self.read()
            .records
            .values()
            .filter(|r| r.last_seen < cutoff)
            .map(|r| r.id().clone())
            .collect()
    }

    fn publish(&self, peers: &mut Peers, change: Change) {
        peers.seq += 1;
        // No receivers is fine
        let _ = self.changes.send(Notification {
            seq: peers.seq,
            change,
        });
    }

    fn read(&self) -> RwLockReadGuard<'_, Peers> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Peers> {
        self.peers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::SubscriptionError;

    fn id(s: &str) -> PeerId {
        PeerId::parse(s).unwrap()
    }

    fn join(s: &str, alias: &str) -> Event {
        Event::join(id(s), alias, 8000, "10.0.0.1".parse().unwrap())
    }

    fn registry_at(now: u64) -> (PeerRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let registry = PeerRegistry::with_clock(RegistryConfig::default(), clock.clone());
        (registry, clock)
    }

    #[test]
    fn snapshot_is_ordered_by_id() {
        let registry = PeerRegistry::new();
        for s in ["p3", "p1", "p2", "P9"] {
            registry.apply(join(s, s));
        }
        let ids: Vec<_> = registry
            .snapshot()
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, ["P9", "p1", "p2", "p3"]);
    }

    #[test]
    fn update_overrides_only_given_fields() {
        let (registry, clock) = registry_at(100);
        registry.apply(join("p1", "A"));
        clock.advance(5);

        let outcome = registry.apply(Event::Update {
            id: id("p1"),
            alias: Some("B".into()),
            port: None,
            address: None,
        });
        assert_eq!(outcome, Outcome::Updated);

        let record = registry.get(&id("p1")).unwrap();
        assert_eq!(record.alias(), "B");
        assert_eq!(record.port(), 8000);
        assert_eq!(record.last_seen, 105);
    }

    #[test]
    fn join_replaces_rather_than_merges() {
        let registry = PeerRegistry::new();
        registry.apply(Event::join(id("p1"), "A", 8000, "10.0.0.1".parse().unwrap()));
        registry.apply(Event::join(id("p1"), "A", 9000, "10.0.0.2".parse().unwrap()));
        let record = registry.get(&id("p1")).unwrap();
        assert_eq!(record.port(), 9000);
        assert_eq!(record.address, "10.0.0.2".parse::<std::net::IpAddr>().unwrap());
    }

    #[test]
    fn noop_emits_nothing_and_keeps_seq() {
        let registry = PeerRegistry::new();
        let mut sub = registry.subscribe();
        assert_eq!(registry.apply(Event::leave(id("ghost"))), Outcome::NoOp);
        assert_eq!(sub.try_recv(), Ok(None));
        assert_eq!(registry.subscribe().snapshot().seq, 0);
    }

    #[test]
    fn clear_notifies_each_removal() {
        let registry = PeerRegistry::new();
        registry.apply(join("b", "B"));
        registry.apply(join("a", "A"));
        let mut sub = registry.subscribe();
        registry.clear();

        assert!(registry.is_empty());
        let first = sub.try_recv().unwrap().unwrap();
        let second = sub.try_recv().unwrap().unwrap();
        assert_eq!(first.change, Change::Removed(id("a")));
        assert_eq!(second.change, Change::Removed(id("b")));
        assert_eq!((first.seq, second.seq), (3, 4));
        assert_eq!(sub.try_recv(), Ok(None));
    }

    #[test]
    fn stale_uses_registry_clock() {
        let (registry, clock) = registry_at(1_000);
        registry.apply(join("old", "O"));
        clock.advance(30);
        registry.apply(join("new", "N"));
        clock.advance(15);

        assert_eq!(registry.stale(Duration::from_secs(20)), vec![id("old")]);
        assert!(registry.stale(Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped_and_lag_is_reported() {
        let registry = PeerRegistry::with_config(RegistryConfig {
            capacity: 0,
            liveness: None,
        });
        let mut sub = registry.subscribe();
        registry.apply(join("p1", "A"));
        registry.apply(join("p2", "B"));

        assert_eq!(sub.try_recv(), Err(SubscriptionError::Lagged { missed: 1 }));
        let snapshot = sub.resync(&registry).clone();
        assert_eq!(snapshot.peers.len(), 2);
        assert_eq!(snapshot.seq, 2);
        assert_eq!(sub.try_recv(), Ok(None));
    }
}
