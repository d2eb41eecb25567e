//! Tally test utilities.
//!
//! Helpers for integration testing: an in-memory database pool, record
//! fixture builders, and assertion utilities for query results.

use serde_json::{Map, Value as JsonValue, json};
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

/// In-memory SQLite URL understood by sqlx's `Any` driver.
pub const MEMORY_URL: &str = "sqlite::memory:";

/// A single-connection in-memory SQLite pool.
///
/// Every connection to `sqlite::memory:` opens a fresh database, so the pool
/// keeps exactly one connection alive for its whole lifetime.
pub async fn memory_pool() -> Result<AnyPool, sqlx::Error> {
    sqlx::any::install_default_drivers();
    AnyPoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect(MEMORY_URL)
        .await
}

/// Turn a JSON object literal into a record map.
pub fn record(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A record fixture builder.
#[derive(Debug, Clone, Default)]
pub struct TestRecord {
    fields: Map<String, JsonValue>,
}

impl TestRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field.
    pub fn with(mut self, name: &str, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Set a relation to the given primary keys.
    pub fn with_ids(self, relation: &str, ids: &[i64]) -> Self {
        self.with(relation, json!(ids))
    }

    pub fn build(self) -> Map<String, JsonValue> {
        self.fields
    }
}

/// A client record.
pub fn client(name: &str) -> TestRecord {
    TestRecord::new().with("name", name)
}

/// A project record, optionally attached to a client.
pub fn project(name: &str, client_id: Option<i64>) -> TestRecord {
    let record = TestRecord::new().with("name", name);
    match client_id {
        Some(id) => record.with("client", id),
        None => record,
    }
}

/// A tag record.
pub fn tag(name: &str) -> TestRecord {
    TestRecord::new().with("name", name)
}

/// A time entry record.
pub fn time_entry(description: &str, started_at: i64, duration: i64) -> TestRecord {
    TestRecord::new()
        .with("description", description)
        .with("started_at", started_at)
        .with("duration", duration)
}

/// Assertion helpers for query results.
pub mod assert {
    use serde_json::{Map, Value};

    /// Collect `field` from every record.
    pub fn values<'a>(records: &'a [Map<String, Value>], field: &str) -> Vec<&'a Value> {
        records.iter().filter_map(|r| r.get(field)).collect()
    }

    /// Assert that the records carry exactly these ids, in any order.
    pub fn ids_eq(records: &[Map<String, Value>], expected: &[i64]) {
        let mut actual: Vec<i64> = records
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .collect();
        actual.sort_unstable();
        let mut expected = expected.to_vec();
        expected.sort_unstable();
        assert_eq!(actual, expected, "record ids mismatch");
    }

    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{}'\nActual: {}",
            needle,
            haystack
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_produce_records() {
        let entry = time_entry("review", 100, 60).with_ids("tags", &[1, 2]).build();
        assert_eq!(entry["duration"], json!(60));
        assert_eq!(entry["tags"], json!([1, 2]));

        let project = project("Site", Some(3)).build();
        assert_eq!(project["client"], json!(3));
    }

    #[tokio::test]
    async fn memory_pool_keeps_one_database() -> Result<(), sqlx::Error> {
        let pool = memory_pool().await?;
        sqlx::query("CREATE TABLE t (id INTEGER)").execute(&pool).await?;
        sqlx::query("INSERT INTO t (id) VALUES (1)").execute(&pool).await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM t").fetch_one(&pool).await?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[test]
    fn assert_ids_ignores_order() {
        let records = vec![record(json!({"id": 2})), record(json!({"id": 1}))];
        assert::ids_eq(&records, &[1, 2]);
    }
}
