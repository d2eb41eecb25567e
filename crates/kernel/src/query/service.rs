//! Query service: reads, writes with relation reconciliation, and bulk
//! mutations over a [`Repository`].
//!
//! Every call takes the [`RequestContext`] explicitly. Each write runs in
//! one session, a transaction when the repository provides one, and its
//! domain events are published only after commit.

use std::sync::Arc;

use sea_query::SelectStatement;
use serde_json::Value as JsonValue;
use tracing::debug;

use super::context::RequestContext;
use super::loader::RelationLoader;
use super::metadata::{EntityMetadata, Record, RelationKind, RelationMetadata, Schema};
use super::query_builder::{
    AggregateFunction, FilterQueryBuilder, SelectOptions, id_filter, ids_filter,
};
use super::reconcile::{Reconciler, assigned_value, owner_assignment};
use super::registry::{StrategyRegistry, WriteKind};
use super::types::{AggregateQuery, AggregateResponse, Filter, Paging, Query};
use crate::error::{QueryError, QueryResult};
use crate::events::{DomainEvent, DomainEventKind, EventSink, TracingEventSink};
use crate::repository::{ColumnSpec, Repository, Session};

/// Default depth for nested relation loading.
pub const DEFAULT_MAX_RELATION_DEPTH: usize = 3;

/// What to do when the repository cannot open transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionPolicy {
    /// Refuse to write without a transaction.
    #[default]
    Required,
    /// Write on a plain session.
    BestEffort,
}

/// How an update finds its row.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Id(JsonValue),
    /// Must match exactly one visible row.
    Filter(Filter),
}

/// Change applied by the relation maintenance calls.
enum RelationChange {
    Add(Vec<JsonValue>),
    Set(Vec<JsonValue>),
    Remove(Vec<JsonValue>),
}

/// Untyped query service over every entity in a [`Schema`].
#[derive(Clone)]
pub struct QueryService {
    schema: Arc<Schema>,
    repository: Arc<dyn Repository>,
    registry: Arc<StrategyRegistry>,
    events: Arc<dyn EventSink>,
    policy: TransactionPolicy,
    max_relation_depth: usize,
}

impl QueryService {
    /// A service with the default strategies, a tracing event sink and
    /// required transactions.
    pub fn new(schema: Arc<Schema>, repository: Arc<dyn Repository>) -> Self {
        Self {
            schema,
            repository,
            registry: Arc::new(StrategyRegistry::with_defaults()),
            events: Arc::new(TracingEventSink),
            policy: TransactionPolicy::default(),
            max_relation_depth: DEFAULT_MAX_RELATION_DEPTH,
        }
    }

    pub fn with_registry(mut self, registry: Arc<StrategyRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_transaction_policy(mut self, policy: TransactionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_relation_depth(mut self, depth: usize) -> Self {
        self.max_relation_depth = depth;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    fn meta(&self, entity: &str) -> QueryResult<&EntityMetadata> {
        self.schema.entity(entity)
    }

    fn builder<'s>(
        &'s self,
        meta: &'s EntityMetadata,
        ctx: &'s RequestContext,
    ) -> FilterQueryBuilder<'s> {
        FilterQueryBuilder::new(&self.schema, meta).scoped(&self.registry, ctx)
    }

    fn reconciler<'s>(&'s self, ctx: &'s RequestContext) -> Reconciler<'s> {
        Reconciler::new(&self.schema, &self.registry, ctx)
    }

    /// A session for one write.
    async fn write_session(&self) -> QueryResult<Box<dyn Session>> {
        if let Some(tx) = self.repository.begin().await? {
            return Ok(tx);
        }
        match self.policy {
            TransactionPolicy::Required => Err(QueryError::Configuration(
                "repository does not support transactions".to_string(),
            )),
            TransactionPolicy::BestEffort => {
                debug!("writing without a transaction");
                self.repository.session().await
            }
        }
    }

    async fn publish(&self, events: Vec<DomainEvent>) -> QueryResult<()> {
        for event in events {
            self.events.publish(event).await?;
        }
        Ok(())
    }

    async fn fetch(
        &self,
        session: &mut dyn Session,
        meta: &EntityMetadata,
        select: SelectStatement,
    ) -> QueryResult<Vec<Record>> {
        session
            .fetch_all(select.into(), &ColumnSpec::for_entity(meta))
            .await
    }

    // Reads

    pub async fn query(
        &self,
        ctx: &RequestContext,
        entity: &str,
        query: &Query,
    ) -> QueryResult<Vec<Record>> {
        self.query_with(ctx, entity, query, &SelectOptions::default())
            .await
    }

    /// [`Self::query`] with extra select options (soft-deleted rows, raw predicates).
    pub async fn query_with(
        &self,
        ctx: &RequestContext,
        entity: &str,
        query: &Query,
        opts: &SelectOptions,
    ) -> QueryResult<Vec<Record>> {
        let meta = self.meta(entity)?;
        let mut session = self.repository.session().await?;
        self.query_in(session.as_mut(), ctx, meta, query, opts)
            .await
    }

    async fn query_in(
        &self,
        session: &mut dyn Session,
        ctx: &RequestContext,
        meta: &EntityMetadata,
        query: &Query,
        opts: &SelectOptions,
    ) -> QueryResult<Vec<Record>> {
        let select = self.builder(meta, ctx).select(query, opts)?;
        let mut records = self.fetch(session, meta, select).await?;
        RelationLoader::new(&self.schema, &self.registry, ctx, self.max_relation_depth)
            .load(session, meta, &mut records, &query.relations)
            .await?;
        Ok(records)
    }

    pub async fn count(
        &self,
        ctx: &RequestContext,
        entity: &str,
        filter: &Filter,
    ) -> QueryResult<u64> {
        self.count_with(ctx, entity, filter, &SelectOptions::default())
            .await
    }

    pub async fn count_with(
        &self,
        ctx: &RequestContext,
        entity: &str,
        filter: &Filter,
        opts: &SelectOptions,
    ) -> QueryResult<u64> {
        let meta = self.meta(entity)?;
        let statement = self.builder(meta, ctx).count(filter, opts)?;
        let mut session = self.repository.session().await?;
        session.fetch_count(statement.into()).await
    }

    /// Page of records plus the total over the same unpaged filter.
    pub async fn query_and_count(
        &self,
        ctx: &RequestContext,
        entity: &str,
        query: &Query,
    ) -> QueryResult<(Vec<Record>, u64)> {
        self.query_and_count_with(ctx, entity, query, &SelectOptions::default())
            .await
    }

    pub async fn query_and_count_with(
        &self,
        ctx: &RequestContext,
        entity: &str,
        query: &Query,
        opts: &SelectOptions,
    ) -> QueryResult<(Vec<Record>, u64)> {
        let meta = self.meta(entity)?;
        let count = self.builder(meta, ctx).count(&query.filter, opts)?;
        let mut session = self.repository.session().await?;
        let records = self
            .query_in(session.as_mut(), ctx, meta, query, opts)
            .await?;
        let total = session.fetch_count(count.into()).await?;
        Ok((records, total))
    }

    /// The single record matching `filter`, if any.
    pub async fn query_one(
        &self,
        ctx: &RequestContext,
        entity: &str,
        filter: &Filter,
    ) -> QueryResult<Option<Record>> {
        let meta = self.meta(entity)?;
        let mut session = self.repository.session().await?;
        self.unique_in(session.as_mut(), ctx, meta, filter).await
    }

    async fn unique_in(
        &self,
        session: &mut dyn Session,
        ctx: &RequestContext,
        meta: &EntityMetadata,
        filter: &Filter,
    ) -> QueryResult<Option<Record>> {
        let query = Query {
            filter: filter.clone(),
            paging: Some(Paging {
                limit: Some(2),
                offset: None,
            }),
            ..Query::default()
        };
        let select = self.builder(meta, ctx).select(&query, &SelectOptions::default())?;
        let mut rows = self.fetch(session, meta, select).await?;
        if rows.len() > 1 {
            return Err(QueryError::MultipleFound {
                entity: meta.name.clone(),
                lookup: serde_json::to_string(filter)?,
            });
        }
        Ok(rows.pop())
    }

    pub async fn find_by_id(
        &self,
        ctx: &RequestContext,
        entity: &str,
        id: &JsonValue,
    ) -> QueryResult<Option<Record>> {
        let meta = self.meta(entity)?;
        let mut session = self.repository.session().await?;
        self.find_in(session.as_mut(), ctx, meta, id, &SelectOptions::default())
            .await
    }

    async fn find_in(
        &self,
        session: &mut dyn Session,
        ctx: &RequestContext,
        meta: &EntityMetadata,
        id: &JsonValue,
        opts: &SelectOptions,
    ) -> QueryResult<Option<Record>> {
        let select = self.builder(meta, ctx).select_by_id(id, opts)?;
        Ok(self.fetch(session, meta, select).await?.into_iter().next())
    }

    /// Like [`Self::find_by_id`] but a missing (or invisible) row is `NotFound`.
    pub async fn get_by_id(
        &self,
        ctx: &RequestContext,
        entity: &str,
        id: &JsonValue,
    ) -> QueryResult<Record> {
        self.find_by_id(ctx, entity, id)
            .await?
            .ok_or_else(|| QueryError::not_found(entity, format!("id {id}")))
    }

    pub async fn aggregate(
        &self,
        ctx: &RequestContext,
        entity: &str,
        filter: &Filter,
        aggregate: &AggregateQuery,
    ) -> QueryResult<Vec<AggregateResponse>> {
        let meta = self.meta(entity)?;
        let (select, columns) =
            self.builder(meta, ctx)
                .aggregate(filter, aggregate, &SelectOptions::default())?;
        let specs = columns
            .iter()
            .map(|c| ColumnSpec::new(c.alias.clone(), c.column_type))
            .collect::<Vec<_>>();
        let mut session = self.repository.session().await?;
        let rows = session.fetch_all(select.into(), &specs).await?;

        Ok(rows
            .into_iter()
            .map(|mut row| {
                let mut response = AggregateResponse::default();
                for column in &columns {
                    let value = row.remove(&column.alias).unwrap_or(JsonValue::Null);
                    let bucket = match column.function {
                        AggregateFunction::GroupBy => &mut response.group_by,
                        AggregateFunction::Count => &mut response.count,
                        AggregateFunction::Sum => &mut response.sum,
                        AggregateFunction::Avg => &mut response.avg,
                        AggregateFunction::Min => &mut response.min,
                        AggregateFunction::Max => &mut response.max,
                    };
                    bucket.insert(column.field.clone(), value);
                }
                response
            })
            .collect())
    }

    // Writes

    pub async fn create_one(
        &self,
        ctx: &RequestContext,
        entity: &str,
        input: Record,
    ) -> QueryResult<Record> {
        self.create_with_relations(ctx, entity, input, None).await
    }

    /// Create every record in one write session.
    pub async fn create_many(
        &self,
        ctx: &RequestContext,
        entity: &str,
        inputs: Vec<Record>,
    ) -> QueryResult<Vec<Record>> {
        let meta = self.meta(entity)?;
        let mut session = self.write_session().await?;
        let mut created = Vec::with_capacity(inputs.len());
        let mut events = Vec::new();
        for input in inputs {
            let (record, event) = self
                .create_in(session.as_mut(), ctx, meta, input, None)
                .await?;
            created.push(record);
            events.extend(event);
        }
        session.commit().await?;
        self.publish(events).await?;
        Ok(created)
    }

    /// Create a record together with the relations present in `input`.
    ///
    /// With a `uniqueness` filter, any visible match is `AlreadyExists`;
    /// otherwise an input carrying a primary key is checked by key.
    pub async fn create_with_relations(
        &self,
        ctx: &RequestContext,
        entity: &str,
        input: Record,
        uniqueness: Option<&Filter>,
    ) -> QueryResult<Record> {
        let meta = self.meta(entity)?;
        let mut session = self.write_session().await?;
        let (record, event) = self
            .create_in(session.as_mut(), ctx, meta, input, uniqueness)
            .await?;
        session.commit().await?;
        self.publish(event.into_iter().collect()).await?;
        Ok(record)
    }

    async fn create_in(
        &self,
        session: &mut dyn Session,
        ctx: &RequestContext,
        meta: &EntityMetadata,
        input: Record,
        uniqueness: Option<&Filter>,
    ) -> QueryResult<(Record, Option<DomainEvent>)> {
        let relations = split_input(meta, &input)?;

        let exists = if let Some(filter) = uniqueness {
            let count = self
                .builder(meta, ctx)
                .count(filter, &SelectOptions::default())?;
            session.fetch_count(count.into()).await? > 0
        } else if let Some(id) = meta.id_of(&input) {
            let select = FilterQueryBuilder::new(&self.schema, meta)
                .select_by_id(&id, &SelectOptions::with_deleted())?;
            !self.fetch(session, meta, select).await?.is_empty()
        } else {
            false
        };
        if exists {
            return Err(QueryError::AlreadyExists {
                entity: meta.name.clone(),
            });
        }

        let mut record = meta.regular_columns(&input);
        self.registry
            .apply_setters(WriteKind::Create, meta, &mut record, ctx)?;

        let reconciler = self.reconciler(ctx);
        let mut assigned = Vec::with_capacity(relations.len());
        for (relation, value) in relations {
            let items = reconciler
                .resolve(session, meta, relation, &value, &[])
                .await?;
            if let Some((column, value)) = owner_assignment(&self.schema, relation, &items)? {
                record.insert(column, value);
            }
            assigned.push((relation, items));
        }

        let insert = FilterQueryBuilder::new(&self.schema, meta).insert(&record)?;
        let mut saved = session
            .fetch_all(insert.into(), &ColumnSpec::for_entity(meta))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::Build(format!("insert into {} returned no row", meta.table)))?;

        for (relation, items) in assigned {
            reconciler
                .sync(session, meta, &saved, relation, &items, &[])
                .await?;
            saved.insert(relation.name.clone(), assigned_value(relation, &items));
        }
        debug!(entity = %meta.name, "created");

        let event = meta.emits_events().then(|| {
            DomainEvent::new(DomainEventKind::Created, &meta.name, saved.clone(), ctx)
                .with_id(meta.id_of(&saved).unwrap_or(JsonValue::Null))
        });
        Ok((saved, event))
    }

    pub async fn update_one(
        &self,
        ctx: &RequestContext,
        entity: &str,
        id: &JsonValue,
        update: Record,
    ) -> QueryResult<Record> {
        self.update_with_relations(ctx, entity, &Lookup::Id(id.clone()), update)
            .await
    }

    /// Update one record, reconciling the relations present in `input`.
    pub async fn update_with_relations(
        &self,
        ctx: &RequestContext,
        entity: &str,
        lookup: &Lookup,
        input: Record,
    ) -> QueryResult<Record> {
        let meta = self.meta(entity)?;
        let mut session = self.write_session().await?;
        let (record, event) = self
            .update_in(session.as_mut(), ctx, meta, lookup, input)
            .await?;
        session.commit().await?;
        self.publish(event.into_iter().collect()).await?;
        Ok(record)
    }

    async fn lookup_in(
        &self,
        session: &mut dyn Session,
        ctx: &RequestContext,
        meta: &EntityMetadata,
        lookup: &Lookup,
        opts: &SelectOptions,
    ) -> QueryResult<Record> {
        match lookup {
            Lookup::Id(id) => self
                .find_in(session, ctx, meta, id, opts)
                .await?
                .ok_or_else(|| QueryError::not_found(&meta.name, format!("id {id}"))),
            Lookup::Filter(filter) => {
                let found = self.unique_in(session, ctx, meta, filter).await?;
                match found {
                    Some(record) => Ok(record),
                    None => Err(QueryError::not_found(
                        &meta.name,
                        serde_json::to_string(filter)?,
                    )),
                }
            }
        }
    }

    async fn update_in(
        &self,
        session: &mut dyn Session,
        ctx: &RequestContext,
        meta: &EntityMetadata,
        lookup: &Lookup,
        input: Record,
    ) -> QueryResult<(Record, Option<DomainEvent>)> {
        if input.keys().any(|key| meta.is_primary_key(key)) {
            return Err(QueryError::IdImmutable {
                entity: meta.name.clone(),
            });
        }
        let relations = split_input(meta, &input)?;
        let existing = self
            .lookup_in(session, ctx, meta, lookup, &SelectOptions::default())
            .await?;
        let id = meta
            .id_of(&existing)
            .ok_or_else(|| QueryError::InvalidRecord(format!("{} row without id", meta.name)))?;

        let mut changes = meta.regular_columns(&input);
        self.registry
            .apply_setters(WriteKind::Update, meta, &mut changes, ctx)?;

        let reconciler = self.reconciler(ctx);
        let mut assigned = Vec::with_capacity(relations.len());
        for (relation, value) in relations {
            let current = reconciler.current(session, meta, &existing, relation).await?;
            let items = reconciler
                .resolve(session, meta, relation, &value, &current)
                .await?;
            if let Some((column, value)) = owner_assignment(&self.schema, relation, &items)? {
                changes.insert(column, value);
            }
            assigned.push((relation, items, current));
        }

        if !changes.is_empty() {
            let update = FilterQueryBuilder::new(&self.schema, meta)
                .update_by_ids(&changes, std::slice::from_ref(&id))?;
            session.execute(update.into()).await?;
        }

        let mut updated = existing;
        updated.extend(changes);
        for (relation, items, current) in assigned {
            reconciler
                .sync(session, meta, &updated, relation, &items, &current)
                .await?;
            updated.insert(relation.name.clone(), assigned_value(relation, &items));
        }
        debug!(entity = %meta.name, id = %id, "updated");

        let event = meta.emits_events().then(|| {
            DomainEvent::new(DomainEventKind::Updated, &meta.name, updated.clone(), ctx)
                .with_id(id.clone())
        });
        Ok((updated, event))
    }

    /// Update every matching row with column values only.
    ///
    /// Relation filters are resolved to ids first (two-phase).
    pub async fn update_many(
        &self,
        ctx: &RequestContext,
        entity: &str,
        update: Record,
        filter: &Filter,
    ) -> QueryResult<u64> {
        let meta = self.meta(entity)?;
        if update.keys().any(|key| meta.is_primary_key(key)) {
            return Err(QueryError::IdImmutable {
                entity: meta.name.clone(),
            });
        }
        if !split_input(meta, &update)?.is_empty() {
            return Err(QueryError::InvalidRecord(format!(
                "relations of {} cannot be updated in bulk",
                meta.name
            )));
        }
        let mut changes = update;
        self.registry
            .apply_setters(WriteKind::Update, meta, &mut changes, ctx)?;
        if changes.is_empty() {
            return Ok(0);
        }

        let builder = self.builder(meta, ctx);
        let mut session = self.write_session().await?;
        let affected = if FilterQueryBuilder::filter_has_relations(filter) {
            let ids = self
                .matching_ids(session.as_mut(), &builder, filter, &SelectOptions::default())
                .await?;
            if ids.is_empty() {
                0
            } else {
                session
                    .execute(builder.update_by_ids(&changes, &ids)?.into())
                    .await?
            }
        } else {
            session
                .execute(builder.update(&changes, filter)?.into())
                .await?
        };
        session.commit().await?;
        debug!(entity = %meta.name, affected, "bulk update");
        Ok(affected)
    }

    /// Phase one of a two-phase mutation: ids of the matching rows.
    async fn matching_ids(
        &self,
        session: &mut dyn Session,
        builder: &FilterQueryBuilder<'_>,
        filter: &Filter,
        opts: &SelectOptions,
    ) -> QueryResult<Vec<JsonValue>> {
        let meta = builder.metadata();
        let specs = meta
            .primary_key
            .iter()
            .map(|key| meta.column_meta(key).map(|c| ColumnSpec::new(key.clone(), c.column_type)))
            .collect::<QueryResult<Vec<_>>>()?;
        let rows = session
            .fetch_all(builder.select_ids(filter, opts)?.into(), &specs)
            .await?;
        Ok(rows.iter().filter_map(|row| meta.id_of(row)).collect())
    }

    /// Delete one record: soft when the entity supports it, hard otherwise.
    /// Returns the record as it was before deletion.
    pub async fn delete_one(
        &self,
        ctx: &RequestContext,
        entity: &str,
        id: &JsonValue,
    ) -> QueryResult<Record> {
        let meta = self.meta(entity)?;
        let mut session = self.write_session().await?;
        let existing = self
            .lookup_in(
                session.as_mut(),
                ctx,
                meta,
                &Lookup::Id(id.clone()),
                &SelectOptions::default(),
            )
            .await?;
        let builder = FilterQueryBuilder::new(&self.schema, meta);
        if meta.soft_delete_column.is_some() {
            let now = chrono::Utc::now().timestamp();
            session
                .execute(builder.soft_delete(&id_filter(meta, id)?, now)?.into())
                .await?;
        } else {
            let ids = std::slice::from_ref(id);
            self.reconciler(ctx)
                .detach_junctions(session.as_mut(), meta, ids)
                .await?;
            session.execute(builder.delete_by_ids(ids)?.into()).await?;
        }
        session.commit().await?;

        if meta.emits_events() {
            let event = DomainEvent::new(DomainEventKind::Deleted, &meta.name, existing.clone(), ctx)
                .with_id(id.clone());
            self.publish(vec![event]).await?;
        }
        Ok(existing)
    }

    /// Delete every matching row. Two-phase when the filter traverses
    /// relations or junction rows must be removed first.
    pub async fn delete_many(
        &self,
        ctx: &RequestContext,
        entity: &str,
        filter: &Filter,
    ) -> QueryResult<u64> {
        let meta = self.meta(entity)?;
        let builder = self.builder(meta, ctx);
        let soft = meta.soft_delete_column.is_some();
        let owns_junctions = meta
            .relations
            .iter()
            .any(|r| matches!(r.kind, RelationKind::ManyToMany { .. }));
        let now = chrono::Utc::now().timestamp();

        let mut session = self.write_session().await?;
        let affected = if FilterQueryBuilder::filter_has_relations(filter) || (!soft && owns_junctions)
        {
            let ids = self
                .matching_ids(session.as_mut(), &builder, filter, &SelectOptions::default())
                .await?;
            if ids.is_empty() {
                0
            } else if soft {
                let by_ids = ids_filter(meta, &ids)?;
                session
                    .execute(builder.soft_delete(&by_ids, now)?.into())
                    .await?
            } else {
                self.reconciler(ctx)
                    .detach_junctions(session.as_mut(), meta, &ids)
                    .await?;
                session.execute(builder.delete_by_ids(&ids)?.into()).await?
            }
        } else if soft {
            session
                .execute(builder.soft_delete(filter, now)?.into())
                .await?
        } else {
            session.execute(builder.delete(filter)?.into()).await?
        };
        session.commit().await?;
        debug!(entity = %meta.name, affected, soft, "bulk delete");
        Ok(affected)
    }

    /// Clear the soft-delete stamp of one record.
    pub async fn restore_one(
        &self,
        ctx: &RequestContext,
        entity: &str,
        id: &JsonValue,
    ) -> QueryResult<Record> {
        let meta = self.meta(entity)?;
        let column = restorable(meta)?;
        let mut session = self.write_session().await?;
        let mut existing = self
            .lookup_in(
                session.as_mut(),
                ctx,
                meta,
                &Lookup::Id(id.clone()),
                &SelectOptions::with_deleted(),
            )
            .await?;
        let restore = FilterQueryBuilder::new(&self.schema, meta).restore(&id_filter(meta, id)?)?;
        session.execute(restore.into()).await?;
        session.commit().await?;
        existing.insert(column.to_string(), JsonValue::Null);
        Ok(existing)
    }

    /// Clear the soft-delete stamp of every matching deleted row.
    pub async fn restore_many(
        &self,
        ctx: &RequestContext,
        entity: &str,
        filter: &Filter,
    ) -> QueryResult<u64> {
        let meta = self.meta(entity)?;
        restorable(meta)?;
        let builder = self.builder(meta, ctx);
        let mut session = self.write_session().await?;
        let affected = if FilterQueryBuilder::filter_has_relations(filter) {
            let ids = self
                .matching_ids(session.as_mut(), &builder, filter, &SelectOptions::with_deleted())
                .await?;
            if ids.is_empty() {
                0
            } else {
                let by_ids = ids_filter(meta, &ids)?;
                session.execute(builder.restore(&by_ids)?.into()).await?
            }
        } else {
            session.execute(builder.restore(filter)?.into()).await?
        };
        session.commit().await?;
        debug!(entity = %meta.name, affected, "bulk restore");
        Ok(affected)
    }

    // Relation maintenance

    /// Attach `related` to the relation, keeping what is already attached.
    pub async fn add_relations(
        &self,
        ctx: &RequestContext,
        entity: &str,
        relation: &str,
        id: &JsonValue,
        related: Vec<JsonValue>,
    ) -> QueryResult<Record> {
        self.relate(ctx, entity, relation, id, RelationChange::Add(related))
            .await
    }

    /// Replace the relation with exactly `related`.
    pub async fn set_relations(
        &self,
        ctx: &RequestContext,
        entity: &str,
        relation: &str,
        id: &JsonValue,
        related: Vec<JsonValue>,
    ) -> QueryResult<Record> {
        self.relate(ctx, entity, relation, id, RelationChange::Set(related))
            .await
    }

    /// Detach `related` from the relation.
    pub async fn remove_relations(
        &self,
        ctx: &RequestContext,
        entity: &str,
        relation: &str,
        id: &JsonValue,
        related: Vec<JsonValue>,
    ) -> QueryResult<Record> {
        self.relate(ctx, entity, relation, id, RelationChange::Remove(related))
            .await
    }

    async fn relate(
        &self,
        ctx: &RequestContext,
        entity: &str,
        relation_name: &str,
        id: &JsonValue,
        change: RelationChange,
    ) -> QueryResult<Record> {
        let meta = self.meta(entity)?;
        let relation = meta.relation_meta(relation_name)?;
        let target = self.schema.target_of(relation)?;
        let reconciler = self.reconciler(ctx);

        let mut session = self.write_session().await?;
        let existing = self
            .lookup_in(
                session.as_mut(),
                ctx,
                meta,
                &Lookup::Id(id.clone()),
                &SelectOptions::default(),
            )
            .await?;
        let current = reconciler
            .current(session.as_mut(), meta, &existing, relation)
            .await?;

        let value = match change {
            RelationChange::Add(related) if relation.is_to_many() => JsonValue::Array(
                current
                    .iter()
                    .cloned()
                    .map(JsonValue::Object)
                    .chain(related)
                    .collect(),
            ),
            RelationChange::Add(related) | RelationChange::Set(related) => JsonValue::Array(related),
            RelationChange::Remove(related) => {
                let removed = related
                    .iter()
                    .map(|item| target.identity_record(item))
                    .collect::<QueryResult<Vec<_>>>()?;
                JsonValue::Array(
                    current
                        .iter()
                        .filter(|row| !removed.iter().any(|r| target.same_identity(r, row)))
                        .cloned()
                        .map(JsonValue::Object)
                        .collect(),
                )
            }
        };
        let items = reconciler
            .resolve(session.as_mut(), meta, relation, &value, &current)
            .await?;

        let mut updated = existing;
        if let Some((column, value)) = owner_assignment(&self.schema, relation, &items)? {
            let mut changes = Record::new();
            changes.insert(column, value);
            let update = FilterQueryBuilder::new(&self.schema, meta)
                .update_by_ids(&changes, std::slice::from_ref(id))?;
            session.execute(update.into()).await?;
            updated.extend(changes);
        }
        reconciler
            .sync(session.as_mut(), meta, &updated, relation, &items, &current)
            .await?;
        updated.insert(relation.name.clone(), assigned_value(relation, &items));
        session.commit().await?;

        if meta.emits_events() {
            let event = DomainEvent::new(DomainEventKind::Updated, &meta.name, updated.clone(), ctx)
                .with_id(id.clone());
            self.publish(vec![event]).await?;
        }
        Ok(updated)
    }
}

/// Relation entries of a write payload. Keys that are neither a column nor a
/// relation are rejected.
fn split_input<'m>(
    meta: &'m EntityMetadata,
    input: &Record,
) -> QueryResult<Vec<(&'m RelationMetadata, JsonValue)>> {
    let mut relations = Vec::new();
    for (key, value) in input {
        if meta.find_column(key).is_some() {
            continue;
        }
        match meta.find_relation(key) {
            Some(relation) => relations.push((relation, value.clone())),
            None => {
                return Err(QueryError::UnknownField {
                    entity: meta.name.clone(),
                    field: key.clone(),
                });
            }
        }
    }
    Ok(relations)
}

fn restorable(meta: &EntityMetadata) -> QueryResult<&str> {
    meta.soft_delete_column.as_deref().ok_or_else(|| {
        QueryError::Configuration(format!("{} does not support soft delete", meta.name))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::metadata::ColumnType;
    use serde_json::json;

    fn project() -> EntityMetadata {
        EntityMetadata::new("Project", "project")
            .generated_id("id")
            .column("name", ColumnType::Text)
            .column("client_id", ColumnType::Integer)
            .relation(RelationMetadata::many_to_one("client", "Client", "client_id"))
    }

    #[test]
    fn split_input_separates_relations() {
        let input = json!({"name": "Site", "client": 3}).as_object().cloned().unwrap();
        let meta = project();
        let relations = split_input(&meta, &input).unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].0.name, "client");
        assert_eq!(relations[0].1, json!(3));

        let bogus = json!({"owner": 1}).as_object().cloned().unwrap();
        assert!(matches!(
            split_input(&meta, &bogus),
            Err(QueryError::UnknownField { field, .. }) if field == "owner"
        ));
    }

    #[test]
    fn restore_needs_soft_delete() {
        assert!(matches!(restorable(&project()), Err(QueryError::Configuration(_))));
        assert_eq!(restorable(&project().soft_delete("deleted_at")).unwrap(), "deleted_at");
    }
}
