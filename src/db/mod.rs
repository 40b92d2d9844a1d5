pub mod models;

use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePool, Sqlite};

pub type DbPool = SqlitePool;

pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
  if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
    tracing::info!("Creating database: {}", database_url);
    Sqlite::create_database(database_url).await?;
  }

  let pool = SqlitePool::connect(database_url).await?;
  migrate(&pool).await?;

  tracing::info!("Database ready");
  Ok(pool)
}

async fn migrate(pool: &DbPool) -> Result<(), sqlx::Error> {
  tracing::info!("Running migrations...");
  sqlx::migrate!("./migrations")
    .run(pool)
    .await?;
  Ok(())
}

/// Single-connection in-memory database, migrated
#[cfg(test)]
pub async fn memory_pool() -> DbPool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .idle_timeout(None)
    .max_lifetime(None)
    .connect("sqlite::memory:")
    .await
    .expect("in-memory sqlite");
  migrate(&pool).await.expect("migrations");
  pool
}
