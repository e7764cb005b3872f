use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Invalid relay URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: &'static str },

    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::InvalidUrl { .. } => "INVALID_URL",
            BridgeError::Transport(_) => "TRANSPORT_ERROR",
        }
    }
}
