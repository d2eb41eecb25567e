//! Batched relation loading.
//!
//! `Query.relations` are loaded with one query per relation per level: the
//! keys of every parent record are collected, the related rows are fetched
//! with a single `IN` filter (plus the relation's own filter and sorting),
//! and the rows are distributed back onto their parents. Paging in a
//! relation query applies per parent.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use sea_query::{Alias, Expr, Query as SqlQuery};
use serde_json::Value as JsonValue;

use super::context::RequestContext;
use super::metadata::{EntityMetadata, OneToOneSide, Record, RelationKind, RelationMetadata, Schema};
use super::query_builder::{FilterQueryBuilder, SelectOptions};
use super::registry::StrategyRegistry;
use super::types::{Filter, FilterValue, Paging, Query, RelationQuery};
use crate::error::{QueryError, QueryResult};
use crate::repository::{ColumnSpec, Session, column_value};

type LoadFuture<'f> = Pin<Box<dyn Future<Output = QueryResult<()>> + Send + 'f>>;

/// Loads relations into already-fetched records.
pub struct RelationLoader<'a> {
    schema: &'a Schema,
    registry: &'a StrategyRegistry,
    ctx: &'a RequestContext,
    max_depth: usize,
}

impl<'a> RelationLoader<'a> {
    pub fn new(
        schema: &'a Schema,
        registry: &'a StrategyRegistry,
        ctx: &'a RequestContext,
        max_depth: usize,
    ) -> Self {
        Self {
            schema,
            registry,
            ctx,
            max_depth,
        }
    }

    /// Load `relations` (and their nested relations) into `records`.
    pub async fn load(
        &self,
        session: &mut dyn Session,
        meta: &EntityMetadata,
        records: &mut [Record],
        relations: &[RelationQuery],
    ) -> QueryResult<()> {
        self.load_level(session, meta, records, relations, 1).await
    }

    fn load_level<'f>(
        &'f self,
        session: &'f mut dyn Session,
        meta: &'f EntityMetadata,
        records: &'f mut [Record],
        relations: &'f [RelationQuery],
        depth: usize,
    ) -> LoadFuture<'f> {
        Box::pin(async move {
            if relations.is_empty() || records.is_empty() {
                return Ok(());
            }
            if depth > self.max_depth {
                tracing::warn!(
                    entity = %meta.name,
                    depth,
                    max_depth = self.max_depth,
                    "relation depth limit reached, skipping nested relations"
                );
                return Ok(());
            }
            for relation_query in relations {
                let relation = meta.relation_meta(&relation_query.name)?;
                let target = self.schema.target_of(relation)?;
                let mut related = match &relation.kind {
                    RelationKind::ManyToOne { join_column }
                    | RelationKind::OneToOne {
                        side: OneToOneSide::Owner { join_column },
                    } => {
                        let keys = distinct_keys(records.iter().map(|r| r.get(join_column.as_str())));
                        let rows = self
                            .fetch_by(session, target, target.single_key()?, keys, &relation_query.query)
                            .await?;
                        Related::ByTargetKey {
                            join_column: join_column.clone(),
                            target_key: target.single_key()?.to_string(),
                            rows,
                        }
                    }
                    RelationKind::OneToMany { inverse_column }
                    | RelationKind::OneToOne {
                        side: OneToOneSide::Inverse {
                            column: inverse_column,
                        },
                    } => {
                        let parent_key = meta.single_key()?;
                        let keys = distinct_keys(records.iter().map(|r| r.get(parent_key)));
                        let rows = self
                            .fetch_by(session, target, inverse_column, keys, &relation_query.query)
                            .await?;
                        Related::ByInverseColumn {
                            inverse_column: inverse_column.clone(),
                            rows,
                        }
                    }
                    RelationKind::ManyToMany { .. } => {
                        self.fetch_many_to_many(session, meta, relation, target, records, &relation_query.query)
                            .await?
                    }
                };

                self.load_level(
                    session,
                    target,
                    related.rows_mut(),
                    &relation_query.query.relations,
                    depth + 1,
                )
                .await?;

                related.assign(meta, relation, records, relation_query.query.paging)?;
            }
            Ok(())
        })
    }

    /// Target rows whose `column` is one of `keys`, through the relation query.
    async fn fetch_by(
        &self,
        session: &mut dyn Session,
        target: &EntityMetadata,
        column: &str,
        keys: Vec<FilterValue>,
        query: &Query,
    ) -> QueryResult<Vec<Record>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::new()
            .field(column, "in", FilterValue::List(keys))
            .merge(query.filter.clone());
        let related_query = Query {
            filter,
            paging: None,
            sorting: query.sorting.clone(),
            relations: Vec::new(),
        };
        let select = FilterQueryBuilder::new(self.schema, target)
            .scoped(self.registry, self.ctx)
            .select(&related_query, &SelectOptions::default())?;
        session
            .fetch_all(select.into(), &ColumnSpec::for_entity(target))
            .await
    }

    async fn fetch_many_to_many(
        &self,
        session: &mut dyn Session,
        meta: &EntityMetadata,
        relation: &RelationMetadata,
        target: &EntityMetadata,
        records: &[Record],
        query: &Query,
    ) -> QueryResult<Related> {
        let RelationKind::ManyToMany {
            junction_table,
            source_column,
            target_column,
        } = &relation.kind
        else {
            return Err(QueryError::Configuration(format!(
                "{} is not a many-to-many relation",
                relation.name
            )));
        };
        let parent_key = meta.column_meta(meta.single_key()?)?;
        let target_key = target.column_meta(target.single_key()?)?;

        let mut parent_ids = Vec::new();
        for record in records {
            if let Some(id) = record.get(&parent_key.name).filter(|v| !v.is_null()) {
                parent_ids.push(column_value(&parent_key.name, parent_key.column_type, id)?);
            }
        }
        if parent_ids.is_empty() {
            return Ok(Related::Junction {
                links: HashMap::new(),
                target_key: target_key.name.clone(),
                rows: Vec::new(),
            });
        }

        let mut junction = SqlQuery::select();
        junction
            .column(Alias::new(source_column))
            .column(Alias::new(target_column))
            .from(Alias::new(junction_table))
            .and_where(Expr::col(Alias::new(source_column)).is_in(parent_ids));
        let link_rows = session
            .fetch_all(
                junction.into(),
                &[
                    ColumnSpec::new(source_column.clone(), parent_key.column_type),
                    ColumnSpec::new(target_column.clone(), target_key.column_type),
                ],
            )
            .await?;

        let keys = distinct_keys(link_rows.iter().map(|l| l.get(target_column.as_str())));
        let mut links: HashMap<String, HashSet<String>> = HashMap::new();
        for link in &link_rows {
            if let (Some(source), Some(linked)) =
                (link.get(source_column.as_str()), link.get(target_column.as_str()))
            {
                links.entry(key_of(source)).or_default().insert(key_of(linked));
            }
        }
        let rows = self
            .fetch_by(session, target, &target_key.name, keys, query)
            .await?;
        Ok(Related::Junction {
            links,
            target_key: target_key.name.clone(),
            rows,
        })
    }
}

/// Rows fetched for one relation, with how they map back to parents.
enum Related {
    ByTargetKey {
        join_column: String,
        target_key: String,
        rows: Vec<Record>,
    },
    ByInverseColumn {
        inverse_column: String,
        rows: Vec<Record>,
    },
    /// Parent key → linked target keys, from the junction table.
    Junction {
        links: HashMap<String, HashSet<String>>,
        target_key: String,
        rows: Vec<Record>,
    },
}

impl Related {
    fn rows_mut(&mut self) -> &mut [Record] {
        match self {
            Related::ByTargetKey { rows, .. }
            | Related::ByInverseColumn { rows, .. }
            | Related::Junction { rows, .. } => rows,
        }
    }

    fn assign(
        self,
        meta: &EntityMetadata,
        relation: &RelationMetadata,
        records: &mut [Record],
        paging: Option<Paging>,
    ) -> QueryResult<()> {
        let name = relation.name.clone();
        match self {
            Related::ByTargetKey {
                join_column,
                target_key,
                rows,
            } => {
                let by_key: HashMap<String, Record> = rows
                    .into_iter()
                    .filter_map(|row| Some((key_of(row.get(&target_key)?), row)))
                    .collect();
                for record in records {
                    let value = record
                        .get(&join_column)
                        .map(key_of)
                        .and_then(|key| by_key.get(&key))
                        .map_or(JsonValue::Null, |row| JsonValue::Object(row.clone()));
                    record.insert(name.clone(), value);
                }
            }
            Related::ByInverseColumn {
                inverse_column,
                rows,
            } => {
                let parent_key = meta.single_key()?;
                let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
                for row in rows {
                    if let Some(key) = row.get(&inverse_column).map(key_of) {
                        grouped.entry(key).or_default().push(row);
                    }
                }
                for record in records {
                    let items = record
                        .get(parent_key)
                        .map(key_of)
                        .and_then(|key| grouped.get(&key).cloned())
                        .unwrap_or_default();
                    record.insert(name.clone(), shape(relation, page(items, paging)));
                }
            }
            Related::Junction {
                links,
                target_key,
                rows,
            } => {
                let parent_key = meta.single_key()?;
                let empty = HashSet::new();
                for record in records {
                    let linked = record
                        .get(parent_key)
                        .and_then(|key| links.get(&key_of(key)))
                        .unwrap_or(&empty);
                    // Keep the target query's ordering.
                    let items = rows
                        .iter()
                        .filter(|row| row.get(&target_key).is_some_and(|k| linked.contains(&key_of(k))))
                        .cloned()
                        .collect();
                    record.insert(name.clone(), shape(relation, page(items, paging)));
                }
            }
        }
        Ok(())
    }
}

/// Hashable rendering of a key value.
fn key_of(value: &JsonValue) -> String {
    value.to_string()
}

fn distinct_keys<'v>(values: impl Iterator<Item = Option<&'v JsonValue>>) -> Vec<FilterValue> {
    let mut seen = HashSet::new();
    values
        .flatten()
        .filter(|v| !v.is_null() && seen.insert(key_of(v)))
        .filter_map(FilterValue::from_json)
        .collect()
}

fn page(items: Vec<Record>, paging: Option<Paging>) -> Vec<Record> {
    let Some(paging) = paging else {
        return items;
    };
    let offset = usize::try_from(paging.offset.unwrap_or(0)).unwrap_or(usize::MAX);
    let limit = paging
        .limit
        .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
    items.into_iter().skip(offset).take(limit).collect()
}

/// To-many relations become arrays, to-one relations the first row or null.
fn shape(relation: &RelationMetadata, items: Vec<Record>) -> JsonValue {
    if relation.is_to_many() {
        JsonValue::Array(items.into_iter().map(JsonValue::Object).collect())
    } else {
        items
            .into_iter()
            .next()
            .map_or(JsonValue::Null, JsonValue::Object)
    }
}
