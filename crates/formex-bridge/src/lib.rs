pub mod bridge;
pub mod config;
pub mod error;

pub use bridge::{Bridge, BridgeHandle, BridgeStatus, RefreshHandler};
pub use config::BridgeConfig;
pub use error::BridgeError;
