use peerlist_lib::registry::RegistryConfig;
use peerlist_lib::service::RegistryService;
use peerlist_lib::{
    Change, DecodeError, Event, LivenessPolicy, ManualClock, PeerId, PeerRegistry,
    RawAnnouncement, ServiceStats, Subscription,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn id(s: &str) -> PeerId {
    PeerId::parse(s).unwrap()
}

fn join(s: &str) -> Event {
    Event::join(id(s), s.to_uppercase(), 8000, "10.0.0.1".parse().unwrap())
}

async fn next_change(sub: &mut Subscription) -> Change {
    tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("no change within 5s")
        .expect("subscription failed")
        .change
}

#[tokio::test]
async fn applies_in_order_and_counts_outcomes() {
    let registry = PeerRegistry::new();
    let mut sub = registry.subscribe();
    let (events, service) = RegistryService::spawn(registry.clone(), 16, CancellationToken::new());

    events.event(join("a")).await.unwrap();
    events.event(join("a")).await.unwrap();
    events.event(join("b")).await.unwrap();
    events.event(Event::leave(id("a"))).await.unwrap();
    events.event(Event::leave(id("a"))).await.unwrap();
    drop(events);

    let stats = service.await.unwrap();
    assert_eq!(
        stats,
        ServiceStats {
            added: 2,
            updated: 1,
            removed: 1,
            noops: 1,
            expired: 0,
            decode_errors: 0,
        }
    );

    assert!(matches!(next_change(&mut sub).await, Change::Added(r) if r.id() == &id("a")));
    assert!(matches!(next_change(&mut sub).await, Change::Updated(_)));
    assert!(matches!(next_change(&mut sub).await, Change::Added(r) if r.id() == &id("b")));
    assert_eq!(next_change(&mut sub).await, Change::Removed(id("a")));
    // Service stop clears what is left
    assert_eq!(next_change(&mut sub).await, Change::Removed(id("b")));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn decode_errors_are_counted_and_leave_state_alone() {
    let registry = PeerRegistry::new();
    let mut sub = registry.subscribe();
    let shutdown = CancellationToken::new();
    let (events, service) = RegistryService::spawn(registry.clone(), 16, shutdown.clone());

    events.event(join("a")).await.unwrap();
    let anonymous = RawAnnouncement {
        alias: Some("nobody".into()),
        port: Some(1),
        address: Some("10.0.0.2".into()),
        ..Default::default()
    };
    events.send(anonymous.into_event()).await.unwrap();
    events
        .send(Err(DecodeError::Malformed("hello".into())))
        .await
        .unwrap();
    events.event(join("b")).await.unwrap();

    next_change(&mut sub).await;
    next_change(&mut sub).await;
    assert_eq!(registry.len(), 2);

    shutdown.cancel();
    let stats = service.await.unwrap();
    assert_eq!(stats.decode_errors, 2);
    assert_eq!(stats.added, 2);
}

#[tokio::test]
async fn silent_peers_expire_through_leave() {
    let clock = Arc::new(ManualClock::new(1_000));
    let registry = PeerRegistry::with_clock(
        RegistryConfig {
            capacity: 16,
            liveness: Some(LivenessPolicy {
                max_age: Duration::from_secs(10),
                sweep_interval: Duration::from_millis(10),
            }),
        },
        clock.clone(),
    );
    let mut sub = registry.subscribe();
    let shutdown = CancellationToken::new();
    let (events, service) = RegistryService::spawn(registry.clone(), 16, shutdown.clone());

    events.event(join("quiet")).await.unwrap();
    assert!(matches!(next_change(&mut sub).await, Change::Added(_)));

    clock.advance(5);
    events.event(join("chatty")).await.unwrap();
    assert!(matches!(next_change(&mut sub).await, Change::Added(_)));

    clock.advance(7);
    assert_eq!(next_change(&mut sub).await, Change::Removed(id("quiet")));
    assert!(registry.contains(&id("chatty")));

    shutdown.cancel();
    let stats = service.await.unwrap();
    assert_eq!(stats.expired, 1);
}

#[tokio::test]
async fn closed_service_rejects_senders() {
    let shutdown = CancellationToken::new();
    let (events, service) = RegistryService::spawn(PeerRegistry::new(), 1, shutdown.clone());
    shutdown.cancel();
    service.await.unwrap();

    assert!(events.event(join("late")).await.is_err());
}
