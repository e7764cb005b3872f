pub mod client;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod redis_bus;
pub mod transport;

pub use client::BusClient;
pub use dispatch::{Dispatcher, MessageHandler};
pub use error::BusError;
pub use memory::MemoryBus;
pub use redis_bus::RedisConnector;
pub use transport::{BusConnector, Publisher, Subscription};
