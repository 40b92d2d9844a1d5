//! Manual one-shot playlist sync.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bangr::config::Config;
use bangr::db;
use bangr::services::{CredentialRefresher, SyncEngine};
use bangr::store::SqliteStore;
use bangr::upstream::SpotifyClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bangr=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let pool = db::create_pool(&config.database_url).await?;
    let store = Arc::new(SqliteStore::new(pool));
    let provider = Arc::new(SpotifyClient::new(&config)?);
    let refresher = Arc::new(CredentialRefresher::new(store.clone(), provider.clone()));
    let engine = SyncEngine::new(store, provider, refresher);

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current user");
            signal.cancel();
        }
    });

    let report = engine.run(&cancel).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.users_failed > 0 || report.cancelled {
        std::process::exit(1);
    }
    Ok(())
}
