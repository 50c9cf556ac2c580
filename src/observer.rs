use crate::error::SubscriptionError;
use crate::peer::{PeerId, PeerRecord};
use crate::registry::PeerRegistry;
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "peer")]
pub enum Change {
    Added(PeerRecord),
    Updated(PeerRecord),
    Removed(PeerId),
}

impl Change {
    pub fn id(&self) -> &PeerId {
        match self {
            Change::Added(r) | Change::Updated(r) => r.id(),
            Change::Removed(id) => id,
        }
    }
}

/// One registry change. `seq` increases by one per change, across all peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub seq: u64,
    #[serde(flatten)]
    pub change: Change,
}

/// Point-in-time copy of the registry, ordered by peer id.
/// `seq` is the sequence number of the last change it reflects (0 if none).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub seq: u64,
    pub peers: Vec<PeerRecord>,
}

/// Live feed of registry changes.
///
/// The snapshot is taken at the moment of registration: every change up to
/// `snapshot().seq` is already reflected in it, and every later change is
/// delivered through [`recv`](Self::recv).
#[derive(Debug)]
pub struct Subscription {
    snapshot: Snapshot,
    rx: broadcast::Receiver<Notification>,
}

impl Subscription {
    pub(crate) fn new(snapshot: Snapshot, rx: broadcast::Receiver<Notification>) -> Self {
        Self { snapshot, rx }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub async fn recv(&mut self) -> Result<Notification, SubscriptionError> {
        self.rx.recv().await.map_err(|e| match e {
            RecvError::Lagged(missed) => {
                tracing::warn!("Subscriber lagged by {} changes", missed);
                SubscriptionError::Lagged { missed }
            }
            RecvError::Closed => SubscriptionError::Closed,
        })
    }

    /// Non-blocking poll. `Ok(None)` means nothing is pending.
    pub fn try_recv(&mut self) -> Result<Option<Notification>, SubscriptionError> {
        match self.rx.try_recv() {
            Ok(n) => Ok(Some(n)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Lagged(missed)) => Err(SubscriptionError::Lagged { missed }),
            Err(TryRecvError::Closed) => Err(SubscriptionError::Closed),
        }
    }

    /// Re-register against `registry`, replacing both the snapshot and the feed.
    /// Anything still buffered on the old feed is discarded.
    pub fn resync(&mut self, registry: &PeerRegistry) -> &Snapshot {
        *self = registry.subscribe();
        &self.snapshot
    }

    pub fn unsubscribe(self) {}

    pub fn into_stream(self) -> impl Stream<Item = Result<Notification, SubscriptionError>> {
        futures::stream::unfold(self, |mut sub| async move {
            match sub.recv().await {
                Err(SubscriptionError::Closed) => None,
                item => Some((item, sub)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_json_shape() {
        let n = Notification {
            seq: 3,
            change: Change::Removed(PeerId::parse("p1").unwrap()),
        };
        assert_eq!(
            serde_json::to_value(&n).unwrap(),
            serde_json::json!({ "seq": 3, "kind": "Removed", "peer": "p1" })
        );
    }
}
