//! Database migration system.
//!
//! Migrations are forward-only, embedded with `include_str!`, and
//! recorded in a `schema_version` table so startup can bring any older
//! store up to the current version.

use sqlx::{Row, SqlitePool};
use tracing::{error, info};

use crate::{Error, Result};

/// Record of an applied migration
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub applied_at: chrono::DateTime<chrono::Utc>,
}

/// Database migration manager
pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize migration tracking table
    async fn init_version_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    /// Get list of applied migrations
    async fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        let rows = sqlx::query("SELECT version, name, applied_at FROM schema_version ORDER BY version")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let migrations = rows
            .into_iter()
            .map(|row| AppliedMigration {
                version: row.get("version"),
                name: row.get("name"),
                applied_at: row.get("applied_at"),
            })
            .collect();

        Ok(migrations)
    }

    /// Record a migration as applied
    async fn record_migration(&self, version: i64, name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO schema_version (version, name, applied_at) VALUES (?1, ?2, ?3)")
            .bind(version)
            .bind(name)
            .bind(chrono::Utc::now())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(())
    }

    /// Current schema version (0 if no migrations applied)
    pub async fn current_version(&self) -> Result<i64> {
        self.init_version_table().await?;

        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(version.unwrap_or(0))
    }

    /// Run all pending migrations
    pub async fn migrate(&self) -> Result<()> {
        self.init_version_table().await?;

        let applied = self.applied_migrations().await?;

        let migrations = vec![(
            1_i64,
            "initial_schema",
            include_str!("../../migrations/001_initial_schema.sql"),
        )];

        for (version, name, sql) in migrations {
            if applied.iter().any(|m| m.version == version) {
                continue;
            }

            info!("Applying migration {} ({})...", version, name);

            sqlx::raw_sql(sql).execute(&self.pool).await.map_err(|e| {
                error!("Failed to execute migration {}: {}", version, e);
                Error::Database(e)
            })?;

            self.record_migration(version, name).await?;
            info!("Migration {} ({}) applied", version, name);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        let migrator = Migrator::new(db.pool().clone());

        // in_memory() already migrated once; a second pass is a no-op
        migrator.migrate().await.unwrap();

        assert_eq!(migrator.current_version().await.unwrap(), 1);
    }
}
