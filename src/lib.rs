pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod logging;
pub mod multicast;
pub mod observer;
pub mod peer;
pub mod registry;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DecodeError, DiscoveryError, SubscriptionError};
pub use event::{Event, RawAnnouncement};
pub use observer::{Change, Notification, Snapshot, Subscription};
pub use peer::{LocalPeer, PeerId, PeerIdentity, PeerRecord};
pub use registry::{LivenessPolicy, Outcome, PeerRegistry, RegistryConfig};
pub use service::{EventSender, RegistryService, ServiceStats};
