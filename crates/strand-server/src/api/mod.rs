pub mod status;
pub mod threads;

use axum::{Router, routing::get};

use crate::state::AppState;

pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest(
            "/api",
            threads::routes()
                .merge(status::routes())
                .with_state(state),
        )
}
