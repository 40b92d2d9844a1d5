use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bangr::config::Config;
use bangr::services::sync::spawn_schedule;
use bangr::store::SqliteStore;
use bangr::upstream::SpotifyClient;
use bangr::{db, router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bangr=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load config
    let config = Config::from_env()?;
    tracing::info!("Starting bangr server");
    tracing::info!("Database: {}", config.database_url);
    tracing::info!("Listening on: {}", config.bind_address());

    // Connect to database and run migrations
    let pool = db::create_pool(&config.database_url).await?;
    let store = Arc::new(SqliteStore::new(pool));
    let provider = Arc::new(SpotifyClient::new(&config)?);

    let bind_address = config.bind_address();
    let sync_interval = config.sync_interval;
    let state = AppState::new(config, store, provider);

    let shutdown = CancellationToken::new();
    let schedule = match sync_interval {
        Some(every) => {
            tracing::info!("Playlist sync scheduled every {:?}", every);
            Some(spawn_schedule(state.sync.clone(), every, shutdown.child_token()))
        }
        None => {
            tracing::info!("Playlist sync schedule disabled");
            None
        }
    };

    let app = router(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("REST API: http://{}", bind_address);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(schedule) = schedule {
        let _ = schedule.await;
    }

    Ok(())
}
