//! SQLite store access.
//!
//! The store is the synchronization boundary for the whole system:
//! every cross-worker invariant is enforced with conditional updates
//! executed through the pool held here.

pub mod migrate;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::{Error, Result};

/// Handle to the SQLite store
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the store at the given path and run migrations
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        migrate::Migrator::new(db.pool.clone()).migrate().await?;

        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory store with the schema applied. Test use only.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(Error::Database)?
            .foreign_keys(true);

        // A single connection keeps the in-memory database alive and shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        migrate::Migrator::new(db.pool.clone()).migrate().await?;
        Ok(db)
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Write a consistent snapshot of the store to `dest`.
    ///
    /// `VACUUM INTO` runs inside its own transaction, so the snapshot is
    /// usable to restore a fresh instance even while workers are active.
    pub async fn backup_to(&self, dest: &Path) -> Result<()> {
        let dest_str = dest
            .to_str()
            .ok_or_else(|| Error::storage("Backup path is not valid UTF-8"))?;

        if dest.exists() {
            return Err(Error::storage(format!(
                "Backup target already exists: {}",
                dest.display()
            )));
        }

        sqlx::query("VACUUM INTO ?1")
            .bind(dest_str)
            .execute(&self.pool)
            .await?;

        info!("Database backed up to {}", dest.display());
        Ok(())
    }

    /// Close the pool, waiting for in-flight operations
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
