pub mod api;
pub mod config;
pub mod emitter;
pub mod error;
pub mod executor;
pub mod guard;
pub mod keepalive;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod sse;
pub mod state;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use config::ServerConfig;
pub use state::AppState;

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api::api_routes(state).layer(cors)
}
