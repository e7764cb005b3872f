pub mod app;
pub mod echo;
pub mod http;
pub mod ingest;
pub mod service;
pub mod ws;

pub use app::AppState;
pub use service::RelayService;
pub use ws::hub::Hub;
