//! Database connection management and migrations.

use crate::error::{DbError, Result};
use anyhow::Context as _;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr as _;

/// Connect to the SQLite database at `path`, creating it if needed, and run
/// migrations.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory: {}", parent.display()))?;
    }

    let url = format!("sqlite:{}?mode=rwc", path.display());
    let options = SqliteConnectOptions::from_str(&url)
        .map_err(DbError::SqliteConnect)?
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(options)
        .await
        .map_err(DbError::SqliteConnect)?;

    migrate(&pool).await?;
    Ok(pool)
}

/// In-memory database with migrations applied. A single connection keeps
/// every query on the same memory database.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .map_err(DbError::SqliteConnect)?;

    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|error| DbError::Migration(error.to_string()))?;
    Ok(())
}
