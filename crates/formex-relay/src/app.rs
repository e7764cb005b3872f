use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post},
    Router,
};
use formex_bus::BusClient;
use formex_core::config::{RelayConfig, MAX_WEBHOOK_BYTES};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::echo::EchoFilter;
use crate::ws::hub::Hub;

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: RelayConfig,
    /// Live client set. Shared with the bus handler, hence its own Arc.
    pub hub: Arc<Hub>,
    pub bus: Arc<BusClient>,
    pub echoes: Arc<EchoFilter>,
    /// Cancelled by `RelayService::stop`; open WS connections close on it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: RelayConfig, bus: Arc<BusClient>) -> Self {
        Self {
            config,
            hub: Arc::new(Hub::new()),
            bus,
            echoes: Arc::new(EchoFilter::default()),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    // browsers only ever GET (health + WS upgrade); the webhook is server-to-server
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .route(
            "/webhook",
            post(crate::http::webhook::webhook_handler)
                .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BYTES)),
        )
        .with_state(state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
