//! Database connection pool management and schema migration.

use anyhow::{Context, Result};
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tracing::info;

use crate::config::Config;
use crate::repository::Dialect;

const POSTGRES_MIGRATION: &str = include_str!("../migrations/postgres.sql");
const SQLITE_MIGRATION: &str = include_str!("../migrations/sqlite.sql");

/// Create a connection pool for the configured database.
pub async fn create_pool(config: &Config) -> Result<(AnyPool, Dialect)> {
    sqlx::any::install_default_drivers();
    let dialect = Dialect::from_url(&config.database_url)?;

    let pool = AnyPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    Ok((pool, dialect))
}

/// Statements of the domain schema for `dialect`.
pub fn migration_statements(dialect: Dialect) -> Vec<&'static str> {
    let script = match dialect {
        Dialect::Postgres => POSTGRES_MIGRATION,
        Dialect::Sqlite => SQLITE_MIGRATION,
    };
    script
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Create the domain tables. Statements are idempotent.
pub async fn migrate(pool: &AnyPool, dialect: Dialect) -> Result<()> {
    let statements = migration_statements(dialect);
    for statement in &statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("migration statement failed: {statement}"))?;
    }
    info!(?dialect, statements = statements.len(), "schema migrated");
    Ok(())
}

/// Check if the database connection is healthy.
pub async fn check_health(pool: &AnyPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_split_into_statements() {
        for dialect in [Dialect::Postgres, Dialect::Sqlite] {
            let statements = migration_statements(dialect);
            assert!(statements.iter().any(|s| s.contains("CREATE TABLE IF NOT EXISTS time_entry_tag")));
            assert!(statements.iter().all(|s| !s.ends_with(';')));
        }
    }
}
