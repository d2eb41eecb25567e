#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Every test gets its own [`TestApp`] over a fresh in-memory SQLite
//! database with the real domain schema, migrations and strategies. Two
//! tenants are seeded: [`ACME`] and [`GLOBEX`], each with one user.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value as JsonValue, json};

use tally_kernel::config::Config;
use tally_kernel::db;
use tally_kernel::events::MemoryEventSink;
use tally_kernel::query::{
    Entity, Filter, Query, QueryService, Record, RequestContext, SortField,
};
use tally_kernel::repository::Dialect;
use tally_kernel::state::AppState;
use tally_test_utils::{MEMORY_URL, TestRecord, memory_pool};

pub const ACME: i64 = 1;
pub const GLOBEX: i64 = 2;
/// User of [`ACME`].
pub const ALICE: i64 = 1;
/// User of [`GLOBEX`].
pub const BOB: i64 = 2;

pub fn test_config() -> Config {
    Config::from_lookup(|key| (key == "DATABASE_URL").then(|| MEMORY_URL.to_string())).unwrap()
}

/// Test application wrapper using the real kernel state.
pub struct TestApp {
    pub state: AppState,
    pub events: Arc<MemoryEventSink>,
}

impl TestApp {
    pub async fn new() -> Self {
        let pool = memory_pool().await.unwrap();
        db::migrate(&pool, Dialect::Sqlite).await.unwrap();

        let events = Arc::new(MemoryEventSink::new());
        let state =
            AppState::with_pool(&test_config(), pool, Dialect::Sqlite, events.clone()).unwrap();
        let app = Self { state, events };

        let system = RequestContext::system();
        for name in ["Acme", "Globex"] {
            app.service()
                .create_one(&system, "Tenant", TestRecord::new().with("name", name).build())
                .await
                .unwrap();
        }
        for (tenant, name) in [(ACME, "alice"), (GLOBEX, "bob")] {
            app.service()
                .create_one(
                    &RequestContext::for_tenant(tenant),
                    "User",
                    TestRecord::new()
                        .with("name", name)
                        .with("email", format!("{name}@example.com"))
                        .build(),
                )
                .await
                .unwrap();
        }
        app.events.drain().await;
        app
    }

    pub fn service(&self) -> &QueryService {
        self.state.service()
    }

    /// Create a record and return its id.
    pub async fn create(&self, ctx: &RequestContext, entity: &str, record: Record) -> i64 {
        let saved = self.service().create_one(ctx, entity, record).await.unwrap();
        saved["id"].as_i64().unwrap()
    }

    /// Every visible row of `entity`, ordered by id.
    pub async fn all(&self, ctx: &RequestContext, entity: &str) -> Vec<Record> {
        self.query(ctx, entity, Filter::new()).await
    }

    pub async fn query(&self, ctx: &RequestContext, entity: &str, filter: Filter) -> Vec<Record> {
        let query = Query {
            filter,
            sorting: vec![SortField::asc("id")],
            ..Query::default()
        };
        self.service().query(ctx, entity, &query).await.unwrap()
    }

    /// Count rows of `entity` bypassing tenant scoping.
    pub async fn count_all<E: Entity>(&self) -> u64 {
        self.service()
            .count(&RequestContext::system(), E::NAME, &Filter::new())
            .await
            .unwrap()
    }
}

pub fn alice() -> RequestContext {
    RequestContext::for_user(ACME, ALICE)
}

pub fn bob() -> RequestContext {
    RequestContext::for_user(GLOBEX, BOB)
}

/// Ids of a loaded relation array.
pub fn related_ids(record: &Record, relation: &str) -> Vec<i64> {
    let mut ids: Vec<i64> = record[relation]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    ids.sort_unstable();
    ids
}

pub fn id(value: i64) -> JsonValue {
    json!(value)
}
