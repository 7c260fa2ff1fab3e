//! kvsync server binary.

use kvsync_server::config::Config;
use kvsync_server::store::{Backend, MemoryBackend, PgBackend};
use kvsync_server::AppState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kvsync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting kvsync server on {}:{}", config.host, config.port);

    let backend = match &config.database_url {
        Some(url) => {
            let pg = PgBackend::connect(url).await?;
            tracing::info!("Running database migrations...");
            pg.migrate().await?;
            Backend::Postgres(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            Backend::Memory(MemoryBackend::new())
        }
    };

    let addr = format!("{}:{}", config.host, config.port);
    let app = kvsync_server::app(AppState::new(backend, config));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
