//! Domain events.
//!
//! Writes to entities with the `DomainEvents` capability produce a
//! [`DomainEvent`] carrying a snapshot of the written record. Events are
//! handed to an [`EventSink`] only after the write has committed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::QueryResult;
use crate::query::{Record, RequestContext};

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEventKind {
    Created,
    Updated,
    Deleted,
}

/// A committed change to one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub kind: DomainEventKind,
    pub entity: String,
    /// Primary-key value, or an object for composite keys.
    pub id: Value,
    /// The entity as written, including assigned relations.
    pub snapshot: Record,
    pub tenant_id: Option<i64>,
    pub user_id: Option<i64>,
    /// Unix seconds.
    pub occurred_at: i64,
}

impl DomainEvent {
    pub fn new(kind: DomainEventKind, entity: &str, snapshot: Record, ctx: &RequestContext) -> Self {
        Self {
            kind,
            entity: entity.to_string(),
            id: Value::Null,
            snapshot,
            tenant_id: ctx.tenant_id,
            user_id: ctx.user_id,
            occurred_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_id(mut self, id: Value) -> Self {
        self.id = id;
        self
    }
}

/// Receiver of committed domain events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> QueryResult<()>;
}

/// Logs every event at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: DomainEvent) -> QueryResult<()> {
        info!(
            kind = ?event.kind,
            entity = %event.entity,
            id = %event.id,
            tenant_id = ?event.tenant_id,
            "domain event"
        );
        Ok(())
    }
}

/// Keeps events in memory, for embedding callers that drain them.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every collected event.
    pub async fn drain(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut *self.events.lock().await)
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, event: DomainEvent) -> QueryResult<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}
