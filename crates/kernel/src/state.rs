//! Application state shared by the CLI and embedding callers.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::AnyPool;

use crate::config::Config;
use crate::db;
use crate::events::{EventSink, TracingEventSink};
use crate::query::{
    Entity, EntityService, FilterBuilder, PaginatedDataProvider, QueryService, StrategyRegistry,
};
use crate::repository::{Dialect, SqlRepository};
use crate::schema;

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    pool: AnyPool,
    dialect: Dialect,
    service: QueryService,
}

impl AppState {
    /// Connect to the configured database and assemble the query service.
    pub async fn new(config: &Config) -> Result<Self> {
        let (pool, dialect) = db::create_pool(config)
            .await
            .context("failed to create database pool")?;
        Self::with_pool(config, pool, dialect, Arc::new(TracingEventSink))
    }

    /// Assemble state over an existing pool.
    pub fn with_pool(
        config: &Config,
        pool: AnyPool,
        dialect: Dialect,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let schema = Arc::new(schema::time_tracking().context("invalid domain schema")?);
        let registry = StrategyRegistry::with_defaults();
        registry.warm(&schema);

        let repository = Arc::new(SqlRepository::new(pool.clone(), dialect));
        let service = QueryService::new(schema, repository)
            .with_registry(Arc::new(registry))
            .with_event_sink(events)
            .with_transaction_policy(config.transaction_policy())
            .with_max_relation_depth(config.max_relation_depth);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config: config.clone(),
                pool,
                dialect,
                service,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn pool(&self) -> &AnyPool {
        &self.inner.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    pub fn service(&self) -> &QueryService {
        &self.inner.service
    }

    /// Typed service for one domain entity.
    pub fn entities<E: Entity>(&self) -> EntityService<E> {
        EntityService::new(self.inner.service.clone())
    }

    /// Paginated provider for `E` using the configured page sizes.
    pub fn provider<E: Entity, B: FilterBuilder>(&self, builder: B) -> PaginatedDataProvider<B> {
        PaginatedDataProvider::new(
            self.inner.service.clone(),
            E::NAME,
            builder,
            self.inner.config.pagination(),
        )
    }

    /// Create the domain tables.
    pub async fn migrate(&self) -> Result<()> {
        db::migrate(&self.inner.pool, self.inner.dialect).await
    }
}
