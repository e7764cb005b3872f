pub mod config;
pub mod error;
pub mod event;

pub use config::{RelayConfig, WebhookAuthMode};
pub use error::{RelayError, Result};
pub use event::{ChangeEvent, EventKey};
