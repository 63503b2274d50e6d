use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use strand_server::{AppState, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strand_server=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let addr = config.addr.clone();
    match &config.checkpoint_db {
        Some(path) => tracing::info!(path = %path.display(), "using sqlite checkpoints"),
        None => tracing::info!("using in-memory checkpoints"),
    }
    let state = AppState::from_config(config)?;
    let app = strand_server::app_router(state);

    tracing::info!("Strand server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
