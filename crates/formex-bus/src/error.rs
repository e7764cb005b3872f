use thiserror::Error;

/// Errors raised by a bus transport.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus could not be reached or the URL is unusable.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A message could not be handed to the bus.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The SUBSCRIBE command was rejected.
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    /// The transport is known to be down; nothing was attempted.
    #[error("Bus is not connected")]
    NotConnected,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
