use thiserror::Error;

/// Raised by an event adapter when a raw notification cannot become an [`Event`](crate::event::Event).
/// Never reaches the registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("announcement has no peer id")]
    MissingId,
    #[error("announcement for {id} is missing `{field}`")]
    MissingField { id: String, field: &'static str },
    #[error("announcement for {id} has an invalid address `{address}`")]
    InvalidAddress { id: String, address: String },
    #[error("malformed announcement: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Malformed(e.to_string())
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The subscriber fell behind and `missed` changes were dropped.
    /// Resynchronize from a fresh snapshot.
    #[error("subscriber fell behind by {missed} changes, resync required")]
    Lagged { missed: u64 },
    #[error("registry closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("mdns: {0}")]
    Mdns(#[from] mdns_sd::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("local address lookup: {0}")]
    LocalIp(#[from] local_ip_address::Error),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid multicast group: {0}")]
    Group(#[from] std::net::AddrParseError),
    #[error("event channel closed")]
    ChannelClosed,
}
