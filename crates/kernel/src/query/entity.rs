//! Typed facade over [`QueryService`].
//!
//! Domain structs implement [`Entity`] and round-trip through [`Record`]
//! with serde, so the typed service shares every rule of the untyped one.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use super::context::RequestContext;
use super::metadata::Record;
use super::query_builder::SelectOptions;
use super::service::{Lookup, QueryService};
use super::types::{AggregateQuery, AggregateResponse, Filter, Query};
use crate::error::{QueryError, QueryResult};

/// A domain struct stored as one entity of the schema.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Entity name in the schema.
    const NAME: &'static str;
}

/// Serialize an entity into a write payload. `None` fields are dropped so
/// that generated columns and untouched relations stay out of the write.
pub fn to_record<E: Serialize>(entity: &E) -> QueryResult<Record> {
    match serde_json::to_value(entity)? {
        JsonValue::Object(map) => Ok(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        other => Err(QueryError::InvalidRecord(format!(
            "expected an object, got {other}"
        ))),
    }
}

pub fn from_record<E: DeserializeOwned>(record: Record) -> QueryResult<E> {
    Ok(serde_json::from_value(JsonValue::Object(record))?)
}

fn from_records<E: DeserializeOwned>(records: Vec<Record>) -> QueryResult<Vec<E>> {
    records.into_iter().map(from_record).collect()
}

/// [`QueryService`] bound to one [`Entity`] type.
pub struct EntityService<E> {
    service: QueryService,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for EntityService<E> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> EntityService<E> {
    pub fn new(service: QueryService) -> Self {
        Self {
            service,
            _entity: PhantomData,
        }
    }

    pub fn untyped(&self) -> &QueryService {
        &self.service
    }

    pub async fn query(&self, ctx: &RequestContext, query: &Query) -> QueryResult<Vec<E>> {
        from_records(self.service.query(ctx, E::NAME, query).await?)
    }

    pub async fn query_with(
        &self,
        ctx: &RequestContext,
        query: &Query,
        opts: &SelectOptions,
    ) -> QueryResult<Vec<E>> {
        from_records(self.service.query_with(ctx, E::NAME, query, opts).await?)
    }

    pub async fn count(&self, ctx: &RequestContext, filter: &Filter) -> QueryResult<u64> {
        self.service.count(ctx, E::NAME, filter).await
    }

    pub async fn query_and_count(
        &self,
        ctx: &RequestContext,
        query: &Query,
    ) -> QueryResult<(Vec<E>, u64)> {
        let (records, total) = self.service.query_and_count(ctx, E::NAME, query).await?;
        Ok((from_records(records)?, total))
    }

    pub async fn query_one(&self, ctx: &RequestContext, filter: &Filter) -> QueryResult<Option<E>> {
        self.service
            .query_one(ctx, E::NAME, filter)
            .await?
            .map(from_record)
            .transpose()
    }

    pub async fn find_by_id(&self, ctx: &RequestContext, id: &JsonValue) -> QueryResult<Option<E>> {
        self.service
            .find_by_id(ctx, E::NAME, id)
            .await?
            .map(from_record)
            .transpose()
    }

    pub async fn get_by_id(&self, ctx: &RequestContext, id: &JsonValue) -> QueryResult<E> {
        from_record(self.service.get_by_id(ctx, E::NAME, id).await?)
    }

    pub async fn aggregate(
        &self,
        ctx: &RequestContext,
        filter: &Filter,
        aggregate: &AggregateQuery,
    ) -> QueryResult<Vec<AggregateResponse>> {
        self.service.aggregate(ctx, E::NAME, filter, aggregate).await
    }

    pub async fn create_one(&self, ctx: &RequestContext, entity: &E) -> QueryResult<E> {
        from_record(self.service.create_one(ctx, E::NAME, to_record(entity)?).await?)
    }

    pub async fn create_many(&self, ctx: &RequestContext, entities: &[E]) -> QueryResult<Vec<E>> {
        let inputs = entities.iter().map(to_record).collect::<QueryResult<_>>()?;
        from_records(self.service.create_many(ctx, E::NAME, inputs).await?)
    }

    pub async fn create_with_relations(
        &self,
        ctx: &RequestContext,
        entity: &E,
        uniqueness: Option<&Filter>,
    ) -> QueryResult<E> {
        let input = to_record(entity)?;
        from_record(
            self.service
                .create_with_relations(ctx, E::NAME, input, uniqueness)
                .await?,
        )
    }

    /// Partial update: `update` holds only the columns and relations to change.
    pub async fn update_one(
        &self,
        ctx: &RequestContext,
        id: &JsonValue,
        update: Record,
    ) -> QueryResult<E> {
        from_record(self.service.update_one(ctx, E::NAME, id, update).await?)
    }

    pub async fn update_with_relations(
        &self,
        ctx: &RequestContext,
        lookup: &Lookup,
        update: Record,
    ) -> QueryResult<E> {
        from_record(
            self.service
                .update_with_relations(ctx, E::NAME, lookup, update)
                .await?,
        )
    }

    pub async fn update_many(
        &self,
        ctx: &RequestContext,
        update: Record,
        filter: &Filter,
    ) -> QueryResult<u64> {
        self.service.update_many(ctx, E::NAME, update, filter).await
    }

    pub async fn delete_one(&self, ctx: &RequestContext, id: &JsonValue) -> QueryResult<E> {
        from_record(self.service.delete_one(ctx, E::NAME, id).await?)
    }

    pub async fn delete_many(&self, ctx: &RequestContext, filter: &Filter) -> QueryResult<u64> {
        self.service.delete_many(ctx, E::NAME, filter).await
    }

    pub async fn restore_one(&self, ctx: &RequestContext, id: &JsonValue) -> QueryResult<E> {
        from_record(self.service.restore_one(ctx, E::NAME, id).await?)
    }

    pub async fn restore_many(&self, ctx: &RequestContext, filter: &Filter) -> QueryResult<u64> {
        self.service.restore_many(ctx, E::NAME, filter).await
    }

    pub async fn add_relations(
        &self,
        ctx: &RequestContext,
        relation: &str,
        id: &JsonValue,
        related: Vec<JsonValue>,
    ) -> QueryResult<E> {
        from_record(
            self.service
                .add_relations(ctx, E::NAME, relation, id, related)
                .await?,
        )
    }

    pub async fn set_relations(
        &self,
        ctx: &RequestContext,
        relation: &str,
        id: &JsonValue,
        related: Vec<JsonValue>,
    ) -> QueryResult<E> {
        from_record(
            self.service
                .set_relations(ctx, E::NAME, relation, id, related)
                .await?,
        )
    }

    pub async fn remove_relations(
        &self,
        ctx: &RequestContext,
        relation: &str,
        id: &JsonValue,
        related: Vec<JsonValue>,
    ) -> QueryResult<E> {
        from_record(
            self.service
                .remove_relations(ctx, E::NAME, relation, id, related)
                .await?,
        )
    }
}
