//! Configuration loaded from environment variables.

use std::env;

use anyhow::{Context, Result, ensure};

use crate::query::{DEFAULT_MAX_RELATION_DEPTH, PaginationConfig, TransactionPolicy};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL; `postgres://` or `sqlite:`.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Allowed page sizes (default: 5,10,25,50,100).
    pub page_sizes: Vec<u64>,

    /// Page size used when a request asks for anything else (default: 10).
    pub default_page_size: u64,

    /// Refuse writes without a transaction (default: true).
    pub require_transactions: bool,

    /// Maximum depth of nested relation loading (default: 3).
    pub max_relation_depth: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url =
            var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let page_sizes = var("PAGE_SIZES")
            .unwrap_or_else(|| "5,10,25,50,100".to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .context("PAGE_SIZES must be a comma-separated list of integers")?;

        let default_page_size = var("DEFAULT_PAGE_SIZE")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .context("DEFAULT_PAGE_SIZE must be a valid integer")?;
        ensure!(default_page_size > 0, "DEFAULT_PAGE_SIZE must be positive");

        let require_transactions = var("REQUIRE_TRANSACTIONS")
            .map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);

        let max_relation_depth = var("MAX_RELATION_DEPTH")
            .map(|v| v.parse())
            .transpose()
            .context("MAX_RELATION_DEPTH must be a valid integer")?
            .unwrap_or(DEFAULT_MAX_RELATION_DEPTH);

        Ok(Self {
            database_url,
            database_max_connections,
            page_sizes,
            default_page_size,
            require_transactions,
            max_relation_depth,
        })
    }

    pub fn pagination(&self) -> PaginationConfig {
        PaginationConfig::new(self.page_sizes.clone(), self.default_page_size)
    }

    pub fn transaction_policy(&self) -> TransactionPolicy {
        if self.require_transactions {
            TransactionPolicy::Required
        } else {
            TransactionPolicy::BestEffort
        }
    }
}
