//! Relation reconciliation for writes carrying nested relation payloads.
//!
//! Incoming relation items are split into rows already attached to the
//! record and candidates that must exist (and be visible to the caller).
//! Candidates are resolved with one scoped OR-of-identity query; a short
//! result fails the whole write. After the root row is saved, [`sync`]
//! makes the stored links match the reconciled value.
//!
//! [`sync`]: Reconciler::sync

use sea_query::{Alias, Expr, Query as SqlQuery};
use serde_json::Value as JsonValue;

use super::context::RequestContext;
use super::loader::RelationLoader;
use super::metadata::{EntityMetadata, OneToOneSide, Record, RelationKind, RelationMetadata, Schema};
use super::query_builder::{FilterQueryBuilder, SelectOptions, ids_filter};
use super::registry::StrategyRegistry;
use super::types::{Query, RelationQuery};
use crate::error::{QueryError, QueryResult};
use crate::repository::{ColumnSpec, Session, column_value};

pub(crate) struct Reconciler<'a> {
    schema: &'a Schema,
    registry: &'a StrategyRegistry,
    ctx: &'a RequestContext,
}

impl<'a> Reconciler<'a> {
    pub(crate) fn new(
        schema: &'a Schema,
        registry: &'a StrategyRegistry,
        ctx: &'a RequestContext,
    ) -> Self {
        Self {
            schema,
            registry,
            ctx,
        }
    }

    /// Related rows currently attached to `record`.
    pub(crate) async fn current(
        &self,
        session: &mut dyn Session,
        meta: &EntityMetadata,
        record: &Record,
        relation: &RelationMetadata,
    ) -> QueryResult<Vec<Record>> {
        let mut rows = [record.clone()];
        RelationLoader::new(self.schema, self.registry, self.ctx, 1)
            .load(session, meta, &mut rows, &[RelationQuery::new(&relation.name)])
            .await?;
        let [loaded] = rows;
        Ok(match loaded.get(&relation.name) {
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect(),
            Some(JsonValue::Object(item)) => vec![item.clone()],
            _ => Vec::new(),
        })
    }

    /// Resolve the incoming value of one relation against `current`.
    ///
    /// Returns resolved new rows followed by reused current rows.
    pub(crate) async fn resolve(
        &self,
        session: &mut dyn Session,
        meta: &EntityMetadata,
        relation: &RelationMetadata,
        value: &JsonValue,
        current: &[Record],
    ) -> QueryResult<Vec<Record>> {
        let target = self.schema.target_of(relation)?;
        let failure = || QueryError::RelationResolution {
            entity: meta.name.clone(),
            relation: relation.name.clone(),
        };

        let mut existing: Vec<Record> = Vec::new();
        let mut candidates: Vec<Record> = Vec::new();
        for item in normalize(target, value)? {
            match current.iter().find(|row| target.same_identity(row, &item)) {
                Some(row) => {
                    if !existing.iter().any(|e| target.same_identity(e, row)) {
                        existing.push(row.clone());
                    }
                }
                None => {
                    if !candidates.iter().any(|c| target.same_identity(c, &item)) {
                        candidates.push(item);
                    }
                }
            }
        }
        if candidates.is_empty() {
            return Ok(existing);
        }

        let ids = candidates
            .iter()
            .map(|c| target.id_of(c).ok_or_else(failure))
            .collect::<QueryResult<Vec<_>>>()?;
        let select = FilterQueryBuilder::new(self.schema, target)
            .scoped(self.registry, self.ctx)
            .select(
                &Query::filtered(ids_filter(target, &ids)?),
                &SelectOptions::default(),
            )?;
        let rows = session
            .fetch_all(select.into(), &ColumnSpec::for_entity(target))
            .await?;
        if rows.len() != candidates.len() {
            tracing::debug!(
                entity = %meta.name,
                relation = %relation.name,
                expected = candidates.len(),
                found = rows.len(),
                "relation resolution failed"
            );
            return Err(failure());
        }

        let mut resolved = Vec::with_capacity(rows.len() + existing.len());
        for candidate in &candidates {
            let row = rows
                .iter()
                .find(|row| target.same_identity(row, candidate))
                .ok_or_else(failure)?;
            resolved.push(row.clone());
        }
        resolved.extend(existing);
        Ok(resolved)
    }

    /// Make the stored links of a saved `root` match `items`.
    ///
    /// Owner-side to-one relations are stored on the root row itself and are
    /// written with it; see [`owner_assignment`].
    pub(crate) async fn sync(
        &self,
        session: &mut dyn Session,
        meta: &EntityMetadata,
        root: &Record,
        relation: &RelationMetadata,
        items: &[Record],
        current: &[Record],
    ) -> QueryResult<()> {
        let target = self.schema.target_of(relation)?;
        let root_key = meta.column_meta(meta.single_key()?)?;
        let root_id = root
            .get(&root_key.name)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| QueryError::InvalidRecord(format!("{} has no id", meta.name)))?;
        let kept = |row: &Record| items.iter().any(|item| target.same_identity(item, row));
        let attached = |row: &Record| current.iter().any(|c| target.same_identity(c, row));
        let ids_of = |rows: Vec<&Record>| rows.into_iter().filter_map(|r| target.id_of(r)).collect::<Vec<_>>();

        match &relation.kind {
            RelationKind::ManyToOne { .. }
            | RelationKind::OneToOne {
                side: OneToOneSide::Owner { .. },
            } => Ok(()),
            RelationKind::OneToMany { inverse_column }
            | RelationKind::OneToOne {
                side: OneToOneSide::Inverse {
                    column: inverse_column,
                },
            } => {
                let builder = FilterQueryBuilder::new(self.schema, target);
                let linked = ids_of(items.iter().collect());
                if !linked.is_empty() {
                    let mut values = Record::new();
                    values.insert(inverse_column.clone(), root_id.clone());
                    session
                        .execute(builder.update_by_ids(&values, &linked)?.into())
                        .await?;
                }
                let dropped = ids_of(current.iter().filter(|row| !kept(row)).collect());
                if !dropped.is_empty() {
                    let mut values = Record::new();
                    values.insert(inverse_column.clone(), JsonValue::Null);
                    session
                        .execute(builder.update_by_ids(&values, &dropped)?.into())
                        .await?;
                }
                Ok(())
            }
            RelationKind::ManyToMany {
                junction_table,
                source_column,
                target_column,
            } => {
                let target_key = target.column_meta(target.single_key()?)?;
                let source = column_value(&root_key.name, root_key.column_type, &root_id)?;

                let added = ids_of(items.iter().filter(|row| !attached(row)).collect());
                if !added.is_empty() {
                    let mut insert = SqlQuery::insert();
                    insert
                        .into_table(Alias::new(junction_table))
                        .columns([Alias::new(source_column), Alias::new(target_column)]);
                    for id in &added {
                        let linked = column_value(&target_key.name, target_key.column_type, id)?;
                        insert
                            .values([source.clone(), linked])
                            .map_err(|e| QueryError::Build(e.to_string()))?;
                    }
                    session.execute(insert.into()).await?;
                }

                let removed = ids_of(current.iter().filter(|row| !kept(row)).collect());
                if !removed.is_empty() {
                    let removed = removed
                        .iter()
                        .map(|id| column_value(&target_key.name, target_key.column_type, id))
                        .collect::<QueryResult<Vec<_>>>()?;
                    let mut delete = SqlQuery::delete();
                    delete
                        .from_table(Alias::new(junction_table))
                        .and_where(Expr::col(Alias::new(source_column)).eq(source))
                        .and_where(Expr::col(Alias::new(target_column)).is_in(removed));
                    session.execute(delete.into()).await?;
                }
                Ok(())
            }
        }
    }

    /// Remove every junction row of the given roots, before a hard delete.
    pub(crate) async fn detach_junctions(
        &self,
        session: &mut dyn Session,
        meta: &EntityMetadata,
        ids: &[JsonValue],
    ) -> QueryResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        for relation in &meta.relations {
            let RelationKind::ManyToMany {
                junction_table,
                source_column,
                ..
            } = &relation.kind
            else {
                continue;
            };
            let key = meta.column_meta(meta.single_key()?)?;
            let values = ids
                .iter()
                .map(|id| column_value(&key.name, key.column_type, id))
                .collect::<QueryResult<Vec<_>>>()?;
            let mut delete = SqlQuery::delete();
            delete
                .from_table(Alias::new(junction_table))
                .and_where(Expr::col(Alias::new(source_column)).is_in(values));
            session.execute(delete.into()).await?;
        }
        Ok(())
    }
}

/// Turn a relation payload into identity records: null is empty, a scalar is a
/// primary-key value, an object is a record.
fn normalize(target: &EntityMetadata, value: &JsonValue) -> QueryResult<Vec<Record>> {
    match value {
        JsonValue::Null => Ok(Vec::new()),
        JsonValue::Array(items) => items.iter().map(|i| target.identity_record(i)).collect(),
        item => Ok(vec![target.identity_record(item)?]),
    }
}

/// The record value of a reconciled relation: an array for to-many, the last
/// item (or null) for to-one.
pub(crate) fn assigned_value(relation: &RelationMetadata, items: &[Record]) -> JsonValue {
    if relation.is_to_many() {
        JsonValue::Array(items.iter().cloned().map(JsonValue::Object).collect())
    } else {
        items
            .last()
            .cloned()
            .map_or(JsonValue::Null, JsonValue::Object)
    }
}

/// Join column and value to store on the root row for owner-side to-one relations.
pub(crate) fn owner_assignment(
    schema: &Schema,
    relation: &RelationMetadata,
    items: &[Record],
) -> QueryResult<Option<(String, JsonValue)>> {
    let Some(join_column) = relation.owner_join_column() else {
        return Ok(None);
    };
    let target = schema.target_of(relation)?;
    let key = target.single_key()?;
    let value = items
        .last()
        .and_then(|row| row.get(key).cloned())
        .unwrap_or(JsonValue::Null);
    Ok(Some((join_column.to_string(), value)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::metadata::ColumnType;
    use serde_json::json;

    fn tag() -> EntityMetadata {
        EntityMetadata::new("Tag", "tag")
            .generated_id("id")
            .column("name", ColumnType::Text)
    }

    #[test]
    fn payloads_normalize_to_identity_records() {
        let items = normalize(&tag(), &json!([1, {"id": 2, "name": "x"}])).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].get("id"), Some(&json!(1)));
        assert!(normalize(&tag(), &JsonValue::Null).unwrap().is_empty());
        assert_eq!(normalize(&tag(), &json!(4)).unwrap().len(), 1);
        assert!(normalize(&tag(), &json!([null])).is_err());
    }

    #[test]
    fn to_one_takes_the_last_item() {
        let relation = RelationMetadata::many_to_one("client", "Client", "client_id");
        let items = vec![
            json!({"id": 1}).as_object().cloned().unwrap(),
            json!({"id": 2}).as_object().cloned().unwrap(),
        ];
        assert_eq!(assigned_value(&relation, &items), json!({"id": 2}));
        assert_eq!(assigned_value(&relation, &[]), JsonValue::Null);

        let to_many = RelationMetadata::one_to_many("projects", "Project", "client_id");
        assert_eq!(assigned_value(&to_many, &items), json!([{"id": 1}, {"id": 2}]));
    }

    #[test]
    fn owner_assignment_sets_join_column() {
        let schema = Schema::new().register(
            EntityMetadata::new("Client", "client")
                .generated_id("id")
                .column("name", ColumnType::Text),
        );
        let relation = RelationMetadata::many_to_one("client", "Client", "client_id");
        let items = vec![json!({"id": 9}).as_object().cloned().unwrap()];
        assert_eq!(
            owner_assignment(&schema, &relation, &items).unwrap(),
            Some(("client_id".to_string(), json!(9)))
        );
        assert_eq!(
            owner_assignment(&schema, &relation, &[]).unwrap(),
            Some(("client_id".to_string(), JsonValue::Null))
        );

        let inverse = RelationMetadata::one_to_many("projects", "Project", "client_id");
        assert_eq!(owner_assignment(&schema, &inverse, &items).unwrap(), None);
    }
}
