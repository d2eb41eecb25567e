//! Statement construction for one entity.
//!
//! Builds SELECT/COUNT/aggregate statements with relation joins, and the
//! INSERT/UPDATE/DELETE statements the query service executes. Filters are
//! turned into WHERE clauses by the [`WhereBuilder`]; scope filters from the
//! strategy registry are merged in for the root entity and added to the ON
//! clause of every joined target.

use sea_query::{
    Alias, Asterisk, Cond, Condition, DeleteStatement, Expr, Func, InsertStatement, JoinType,
    NullOrdering, Order, Query as SqlQuery, SelectStatement, SimpleExpr, UpdateStatement,
};
use serde_json::Value as JsonValue;

use super::aliases::RelationAliasMap;
use super::context::RequestContext;
use super::metadata::{ColumnType, EntityMetadata, OneToOneSide, Record, RelationKind, Schema};
use super::registry::StrategyRegistry;
use super::types::{
    AggregateQuery, FieldFilter, Filter, FilterValue, NullsOrder, Paging, Query, SortDirection,
};
use super::where_builder::WhereBuilder;
use crate::error::{QueryError, QueryResult};
use crate::repository::column_value;

/// Alias of the distinct-id subquery used for counting.
const IDS_ALIAS: &str = "ids";

/// Per-call options for read statements.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Include soft-deleted root rows.
    pub with_deleted: bool,
    /// Raw predicates ANDed onto the WHERE clause.
    pub conditions: Vec<SimpleExpr>,
}

impl SelectOptions {
    pub fn with_deleted() -> Self {
        Self {
            with_deleted: true,
            ..Self::default()
        }
    }
}

/// Which aggregate a result column carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    GroupBy,
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    fn prefix(self) -> &'static str {
        match self {
            AggregateFunction::GroupBy => "GROUP_BY",
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }
}

/// One selected column of an aggregate statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateColumn {
    pub alias: String,
    pub function: AggregateFunction,
    pub field: String,
    /// How the result value decodes.
    pub column_type: ColumnType,
}

/// Builds statements for a single entity.
pub struct FilterQueryBuilder<'a> {
    schema: &'a Schema,
    meta: &'a EntityMetadata,
    scope: Option<(&'a StrategyRegistry, &'a RequestContext)>,
    wheres: WhereBuilder<'a>,
}

impl<'a> FilterQueryBuilder<'a> {
    /// An unscoped builder. Scope filters are not applied.
    pub fn new(schema: &'a Schema, meta: &'a EntityMetadata) -> Self {
        Self {
            schema,
            meta,
            scope: None,
            wheres: WhereBuilder::new(schema),
        }
    }

    /// Apply the registry's scope filters for `ctx` to every statement.
    pub fn scoped(mut self, registry: &'a StrategyRegistry, ctx: &'a RequestContext) -> Self {
        self.scope = Some((registry, ctx));
        self
    }

    /// Alias of the root table; the table name itself.
    pub fn root_alias(&self) -> &str {
        &self.meta.table
    }

    pub fn metadata(&self) -> &EntityMetadata {
        self.meta
    }

    /// Whether the filter traverses any relation.
    pub fn filter_has_relations(filter: &Filter) -> bool {
        filter
            .and
            .iter()
            .chain(filter.or.iter())
            .any(Self::filter_has_relations)
            || filter
                .fields
                .values()
                .any(|f| matches!(f, FieldFilter::Relation(_)))
    }

    /// All entity columns, qualified by the root alias.
    pub fn columns(&self, select: &mut SelectStatement) {
        for column in &self.meta.columns {
            select.column((Alias::new(self.root_alias()), Alias::new(&column.name)));
        }
    }

    /// SELECT for a full query: joins, filter, visibility, sorting and paging.
    pub fn select(&self, query: &Query, opts: &SelectOptions) -> QueryResult<SelectStatement> {
        let (mut select, joined) = self.filtered(&query.filter, opts)?;
        if joined {
            select.distinct();
        }
        self.columns(&mut select);
        self.sort(&mut select, query)?;
        if let Some(paging) = query.paging {
            Self::page(&mut select, paging);
        }
        Ok(select)
    }

    /// SELECT of one row by primary key, through the same scoping as [`Self::select`].
    pub fn select_by_id(&self, id: &JsonValue, opts: &SelectOptions) -> QueryResult<SelectStatement> {
        self.select(&Query::filtered(id_filter(self.meta, id)?), opts)
    }

    /// SELECT DISTINCT of the primary-key columns of matching rows.
    pub fn select_ids(&self, filter: &Filter, opts: &SelectOptions) -> QueryResult<SelectStatement> {
        let (mut select, _) = self.filtered(filter, opts)?;
        select.distinct();
        for key in &self.meta.primary_key {
            select.column((Alias::new(self.root_alias()), Alias::new(key)));
        }
        Ok(select)
    }

    /// COUNT of matching rows. Joined filters count distinct ids.
    pub fn count(&self, filter: &Filter, opts: &SelectOptions) -> QueryResult<SelectStatement> {
        let (mut inner, joined) = self.filtered(filter, opts)?;
        if !joined {
            inner.expr(Expr::col(Asterisk).count());
            return Ok(inner);
        }
        inner.distinct();
        for key in &self.meta.primary_key {
            inner.column((Alias::new(self.root_alias()), Alias::new(key)));
        }
        let mut outer = SqlQuery::select();
        outer
            .expr(Expr::col(Asterisk).count())
            .from_subquery(inner, Alias::new(IDS_ALIAS));
        Ok(outer)
    }

    /// Grouped aggregates over matching rows.
    ///
    /// Relation filters are applied through `pk IN (distinct ids)` so joins
    /// never multiply the aggregated rows.
    pub fn aggregate(
        &self,
        filter: &Filter,
        aggregate: &AggregateQuery,
        opts: &SelectOptions,
    ) -> QueryResult<(SelectStatement, Vec<AggregateColumn>)> {
        if aggregate.is_empty() {
            return Err(QueryError::InvalidFilter(
                "aggregate query selects nothing".to_string(),
            ));
        }
        let root = self.root_alias().to_string();

        let mut select = if Self::filter_has_relations(filter) {
            let key = self.meta.single_key()?;
            let ids = self.select_ids(filter, opts)?;
            let mut select = SqlQuery::select();
            select
                .from(Alias::new(&self.meta.table))
                .and_where(Expr::col((Alias::new(&root), Alias::new(key))).in_subquery(ids));
            select
        } else {
            self.filtered(filter, opts)?.0
        };

        let mut columns = Vec::new();
        let groups = [
            (AggregateFunction::GroupBy, &aggregate.group_by),
            (AggregateFunction::Count, &aggregate.count),
            (AggregateFunction::Sum, &aggregate.sum),
            (AggregateFunction::Avg, &aggregate.avg),
            (AggregateFunction::Min, &aggregate.min),
            (AggregateFunction::Max, &aggregate.max),
        ];
        for (function, fields) in groups {
            for field in fields {
                let column = self.meta.column_meta(field)?;
                let col = Expr::col((Alias::new(&root), Alias::new(field)));
                let alias = format!("{}_{field}", function.prefix());
                let (expr, column_type): (SimpleExpr, ColumnType) = match function {
                    AggregateFunction::GroupBy => (col.into(), column.column_type),
                    AggregateFunction::Count => (col.count(), ColumnType::Integer),
                    AggregateFunction::Sum => (double(Func::sum(col)), ColumnType::Float),
                    AggregateFunction::Avg => (double(Func::avg(col)), ColumnType::Float),
                    AggregateFunction::Min => (Func::min(col).into(), column.column_type),
                    AggregateFunction::Max => (Func::max(col).into(), column.column_type),
                };
                select.expr_as(expr, Alias::new(&alias));
                if function == AggregateFunction::GroupBy {
                    select
                        .group_by_col((Alias::new(&root), Alias::new(field)))
                        .order_by((Alias::new(&root), Alias::new(field)), Order::Asc);
                }
                columns.push(AggregateColumn {
                    alias,
                    function,
                    field: field.clone(),
                    column_type,
                });
            }
        }
        Ok((select, columns))
    }

    /// INSERT of the storable columns of `values`, returning the stored row.
    pub fn insert(&self, values: &Record) -> QueryResult<InsertStatement> {
        let mut names = Vec::new();
        let mut exprs = Vec::new();
        for (key, value) in values {
            let column = self.meta.column_meta(key)?;
            if column.generated && value.is_null() {
                continue;
            }
            names.push(Alias::new(key));
            exprs.push(column_value(key, column.column_type, value)?);
        }

        let mut insert = SqlQuery::insert();
        insert.into_table(Alias::new(&self.meta.table));
        if names.is_empty() {
            insert.or_default_values();
        } else {
            insert
                .columns(names)
                .values(exprs)
                .map_err(|e| QueryError::Build(e.to_string()))?;
        }
        insert.returning(
            SqlQuery::returning().columns(self.meta.columns.iter().map(|c| Alias::new(&c.name))),
        );
        Ok(insert)
    }

    /// UPDATE matching rows. The filter must not traverse relations.
    pub fn update(&self, values: &Record, filter: &Filter) -> QueryResult<UpdateStatement> {
        if values.is_empty() {
            return Err(QueryError::InvalidRecord(format!(
                "no columns to update on {}",
                self.meta.name
            )));
        }
        let mut assignments = Vec::with_capacity(values.len());
        for (key, value) in values {
            let column = self.meta.column_meta(key)?;
            assignments.push((Alias::new(key), column_value(key, column.column_type, value)?));
        }

        let mut update = SqlQuery::update();
        update
            .table(Alias::new(&self.meta.table))
            .values(assignments)
            .cond_where(self.mutation_condition(filter, false)?);
        Ok(update)
    }

    pub fn update_by_ids(&self, values: &Record, ids: &[JsonValue]) -> QueryResult<UpdateStatement> {
        self.update(values, &ids_filter(self.meta, ids)?)
    }

    /// Hard DELETE of matching rows. The filter must not traverse relations.
    pub fn delete(&self, filter: &Filter) -> QueryResult<DeleteStatement> {
        let mut delete = SqlQuery::delete();
        delete
            .from_table(Alias::new(&self.meta.table))
            .cond_where(self.mutation_condition(filter, true)?);
        Ok(delete)
    }

    pub fn delete_by_ids(&self, ids: &[JsonValue]) -> QueryResult<DeleteStatement> {
        self.delete(&ids_filter(self.meta, ids)?)
    }

    /// Stamp the soft-delete column of matching live rows with `now`.
    pub fn soft_delete(&self, filter: &Filter, now: i64) -> QueryResult<UpdateStatement> {
        let column = self.soft_delete_column()?;
        let mut update = SqlQuery::update();
        update
            .table(Alias::new(&self.meta.table))
            .value(Alias::new(column), now)
            .cond_where(self.mutation_condition(filter, false)?);
        Ok(update)
    }

    /// Clear the soft-delete column of matching deleted rows.
    pub fn restore(&self, filter: &Filter) -> QueryResult<UpdateStatement> {
        let column = self.soft_delete_column()?;
        let mut update = SqlQuery::update();
        update
            .table(Alias::new(&self.meta.table))
            .value(Alias::new(column), SimpleExpr::Keyword(sea_query::Keyword::Null))
            .cond_where(
                self.mutation_condition(filter, true)?
                    .add(Expr::col((Alias::new(self.root_alias()), Alias::new(column))).is_not_null()),
            );
        Ok(update)
    }

    fn soft_delete_column(&self) -> QueryResult<&str> {
        self.meta.soft_delete_column.as_deref().ok_or_else(|| {
            QueryError::Configuration(format!("{} does not support soft delete", self.meta.name))
        })
    }

    /// The filter merged with the root scope filter.
    fn effective_filter(&self, filter: &Filter) -> QueryResult<Filter> {
        let Some((registry, ctx)) = self.scope else {
            return Ok(filter.clone());
        };
        Ok(match registry.scope_filter(self.meta, ctx)? {
            Some(scope) => filter.clone().merge(scope),
            None => filter.clone(),
        })
    }

    /// FROM, joins and WHERE shared by every read statement. Returns whether
    /// any relation was joined.
    fn filtered(&self, filter: &Filter, opts: &SelectOptions) -> QueryResult<(SelectStatement, bool)> {
        let root = self.root_alias();
        let filter = self.effective_filter(filter)?;
        let aliases = RelationAliasMap::from_filter(self.schema, self.meta, &filter, root)?;

        let mut select = SqlQuery::select();
        select.from(Alias::new(&self.meta.table));
        self.join(&mut select, self.meta, &aliases, root)?;
        self.wheres
            .build(&mut select, self.meta, &filter, &aliases, root)?;
        if let Some(visible) = self.live_rows(self.meta, root, opts.with_deleted) {
            select.and_where(visible);
        }
        for condition in &opts.conditions {
            select.and_where(condition.clone());
        }
        Ok((select, !aliases.is_empty()))
    }

    /// WHERE for UPDATE/DELETE: filter, scope and visibility on the bare table.
    fn mutation_condition(&self, filter: &Filter, with_deleted: bool) -> QueryResult<Condition> {
        let filter = self.effective_filter(filter)?;
        if Self::filter_has_relations(&filter) {
            return Err(QueryError::Build(format!(
                "relation filters on {} must be resolved to ids before mutating",
                self.meta.name
            )));
        }
        let root = self.root_alias();
        let mut condition =
            self.wheres
                .condition(self.meta, &filter, &RelationAliasMap::new(), root)?;
        if let Some(visible) = self.live_rows(self.meta, root, with_deleted) {
            condition = condition.add(visible);
        }
        Ok(condition)
    }

    /// `alias.deleted IS NULL` for soft-deletable entities.
    fn live_rows(&self, meta: &EntityMetadata, alias: &str, with_deleted: bool) -> Option<SimpleExpr> {
        if with_deleted {
            return None;
        }
        meta.soft_delete_column
            .as_ref()
            .map(|column| Expr::col((Alias::new(alias), Alias::new(column))).is_null())
    }

    /// Soft-delete exclusion and scope filter of a joined target, for its ON clause.
    fn target_visibility(&self, target: &EntityMetadata, alias: &str) -> QueryResult<Condition> {
        let mut condition = Cond::all();
        if let Some(visible) = self.live_rows(target, alias, false) {
            condition = condition.add(visible);
        }
        if let Some((registry, ctx)) = self.scope {
            if let Some(scope) = registry.scope_filter(target, ctx)? {
                let scoped = self
                    .wheres
                    .condition(target, &scope, &RelationAliasMap::new(), alias)?;
                if !scoped.is_empty() {
                    condition = condition.add(scoped);
                }
            }
        }
        Ok(condition)
    }

    /// LEFT JOIN every aliased relation, recursively.
    fn join(
        &self,
        select: &mut SelectStatement,
        meta: &EntityMetadata,
        aliases: &RelationAliasMap,
        parent: &str,
    ) -> QueryResult<()> {
        for (name, joined) in aliases.iter() {
            let relation = meta.relation_meta(name)?;
            let target = self.schema.target_of(relation)?;
            let parent_key = meta.single_key()?;
            let target_key = target.single_key()?;
            let alias = joined.alias.as_str();

            let link = match &relation.kind {
                RelationKind::ManyToOne { join_column }
                | RelationKind::OneToOne {
                    side: OneToOneSide::Owner { join_column },
                } => column_eq(alias, target_key, parent, join_column),
                RelationKind::OneToMany { inverse_column }
                | RelationKind::OneToOne {
                    side: OneToOneSide::Inverse {
                        column: inverse_column,
                    },
                } => column_eq(alias, inverse_column, parent, parent_key),
                RelationKind::ManyToMany {
                    junction_table,
                    source_column,
                    target_column,
                } => {
                    let junction = format!("{alias}__jt");
                    select.join_as(
                        JoinType::LeftJoin,
                        Alias::new(junction_table),
                        Alias::new(&junction),
                        column_eq(&junction, source_column, parent, parent_key),
                    );
                    column_eq(alias, target_key, &junction, target_column)
                }
            };

            let mut condition = Cond::all().add(link);
            let visible = self.target_visibility(target, alias)?;
            if !visible.is_empty() {
                condition = condition.add(visible);
            }
            select.join_as(
                JoinType::LeftJoin,
                Alias::new(&target.table),
                Alias::new(alias),
                condition,
            );
            self.join(select, target, &joined.relations, alias)?;
        }
        Ok(())
    }

    fn sort(&self, select: &mut SelectStatement, query: &Query) -> QueryResult<()> {
        for sort in &query.sorting {
            self.meta.column_meta(&sort.field)?;
            let column = (Alias::new(self.root_alias()), Alias::new(&sort.field));
            let order = match sort.direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            match sort.nulls {
                Some(NullsOrder::First) => {
                    select.order_by_with_nulls(column, order, NullOrdering::First);
                }
                Some(NullsOrder::Last) => {
                    select.order_by_with_nulls(column, order, NullOrdering::Last);
                }
                None => {
                    select.order_by(column, order);
                }
            }
        }
        Ok(())
    }

    fn page(select: &mut SelectStatement, paging: Paging) {
        match (paging.limit, paging.offset) {
            (Some(limit), offset) => {
                select.limit(limit);
                if let Some(offset) = offset.filter(|o| *o > 0) {
                    select.offset(offset);
                }
            }
            // SQLite rejects OFFSET without LIMIT.
            (None, Some(offset)) if offset > 0 => {
                select.limit(i64::MAX as u64).offset(offset);
            }
            (None, _) => {}
        }
    }
}

/// `left_alias.left_column = right_alias.right_column`
fn column_eq(left_alias: &str, left_column: &str, right_alias: &str, right_column: &str) -> SimpleExpr {
    Expr::col((Alias::new(left_alias), Alias::new(left_column)))
        .equals((Alias::new(right_alias), Alias::new(right_column)))
}

fn double(expr: impl Into<SimpleExpr>) -> SimpleExpr {
    Func::cast_as(expr, Alias::new("DOUBLE PRECISION")).into()
}

fn key_value(meta: &EntityMetadata, key: &str, value: &JsonValue) -> QueryResult<FilterValue> {
    match FilterValue::from_json(value) {
        Some(v @ (FilterValue::Integer(_) | FilterValue::String(_) | FilterValue::Float(_))) => Ok(v),
        _ => Err(QueryError::InvalidRecord(format!(
            "{value} is not a valid value for {}.{key}",
            meta.name
        ))),
    }
}

/// Primary-key equality filter for one id.
pub fn id_filter(meta: &EntityMetadata, id: &JsonValue) -> QueryResult<Filter> {
    let mut filter = Filter::new();
    for (key, value) in meta.id_pairs(id)? {
        filter = filter.field(&key, "eq", key_value(meta, &key, &value)?);
    }
    Ok(filter)
}

/// Filter matching any of `ids`: `pk IN (...)` for single keys, an OR of
/// key equalities for composite keys.
pub fn ids_filter(meta: &EntityMetadata, ids: &[JsonValue]) -> QueryResult<Filter> {
    if let [key] = meta.primary_key.as_slice() {
        let values = ids
            .iter()
            .map(|id| match id {
                JsonValue::Object(map) => map
                    .get(key)
                    .ok_or_else(|| QueryError::InvalidRecord(format!("id without `{key}`")))
                    .and_then(|v| key_value(meta, key, v)),
                scalar => key_value(meta, key, scalar),
            })
            .collect::<QueryResult<Vec<_>>>()?;
        return Ok(Filter::new().field(key, "in", FilterValue::List(values)));
    }
    if ids.is_empty() {
        // An empty OR would match everything.
        let key = meta.primary_key.first().ok_or_else(|| {
            QueryError::Configuration(format!("{} has no primary key", meta.name))
        })?;
        return Ok(Filter::new().field(key, "in", FilterValue::List(Vec::new())));
    }
    let any = ids
        .iter()
        .map(|id| id_filter(meta, id))
        .collect::<QueryResult<Vec<_>>>()?;
    Ok(Filter::any(any))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::metadata::{Capability, RelationMetadata};
    use crate::query::types::SortField;
    use sea_query::{PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new()
            .register(
                EntityMetadata::new("TimeEntry", "time_entry")
                    .generated_id("id")
                    .column("tenant_id", ColumnType::Integer)
                    .column("description", ColumnType::Text)
                    .column("duration", ColumnType::Integer)
                    .column("project_id", ColumnType::Integer)
                    .soft_delete("deleted_at")
                    .capability(Capability::TenantScoped {
                        column: "tenant_id".to_string(),
                    })
                    .relation(RelationMetadata::many_to_one("project", "Project", "project_id"))
                    .relation(RelationMetadata::many_to_many(
                        "tags",
                        "Tag",
                        "time_entry_tag",
                        "time_entry_id",
                        "tag_id",
                    )),
            )
            .register(
                EntityMetadata::new("Project", "project")
                    .generated_id("id")
                    .column("tenant_id", ColumnType::Integer)
                    .column("name", ColumnType::Text)
                    .soft_delete("deleted_at")
                    .capability(Capability::TenantScoped {
                        column: "tenant_id".to_string(),
                    }),
            )
            .register(
                EntityMetadata::new("Tag", "tag")
                    .generated_id("id")
                    .column("name", ColumnType::Text),
            )
            .register(
                EntityMetadata::new("Membership", "membership")
                    .key_column("user_id", ColumnType::Integer)
                    .key_column("role_id", ColumnType::Integer),
            )
    }

    fn project_filter() -> Filter {
        Filter::new().relation("project", Filter::new().field("name", "eq", "Website"))
    }

    #[test]
    fn plain_select_has_no_joins() {
        let schema = schema();
        let meta = schema.entity("TimeEntry").unwrap();
        let builder = FilterQueryBuilder::new(&schema, meta);
        let query = Query::filtered(Filter::new().field("duration", "gt", 60));
        let sql = builder
            .select(&query, &SelectOptions::default())
            .unwrap()
            .to_string(PostgresQueryBuilder);

        assert!(sql.starts_with(r#"SELECT "time_entry"."id""#), "{sql}");
        assert!(!sql.contains("DISTINCT"), "{sql}");
        assert!(sql.contains(r#""time_entry"."duration" > 60"#), "{sql}");
        assert!(sql.contains(r#""time_entry"."deleted_at" IS NULL"#), "{sql}");
    }

    #[test]
    fn relation_filters_join_once_with_visibility_in_on() {
        let schema = schema();
        let meta = schema.entity("TimeEntry").unwrap();
        let registry = StrategyRegistry::with_defaults();
        let ctx = RequestContext::for_user(7, 1);
        let builder = FilterQueryBuilder::new(&schema, meta).scoped(&registry, &ctx);
        let query = Query::filtered(Filter::any(vec![
            project_filter(),
            Filter::new().relation("project", Filter::new().field("name", "eq", "Api")),
        ]));
        let sql = builder
            .select(&query, &SelectOptions::default())
            .unwrap()
            .to_string(PostgresQueryBuilder);

        assert!(sql.starts_with("SELECT DISTINCT"), "{sql}");
        assert_eq!(sql.matches("LEFT JOIN").count(), 1, "{sql}");
        assert!(
            sql.contains(r#"LEFT JOIN "project" AS "time_entry__project" ON "time_entry__project"."id" = "time_entry"."project_id""#),
            "{sql}"
        );
        assert!(sql.contains(r#""time_entry__project"."deleted_at" IS NULL"#), "{sql}");
        assert!(sql.contains(r#""time_entry__project"."tenant_id" = 7"#), "{sql}");
        assert!(sql.contains(r#""time_entry"."tenant_id" = 7"#), "{sql}");
    }

    #[test]
    fn many_to_many_joins_through_junction() {
        let schema = schema();
        let meta = schema.entity("TimeEntry").unwrap();
        let builder = FilterQueryBuilder::new(&schema, meta);
        let filter = Filter::new().relation("tags", Filter::new().field("name", "eq", "billable"));
        let sql = builder
            .select_ids(&filter, &SelectOptions::default())
            .unwrap()
            .to_string(PostgresQueryBuilder);

        assert!(
            sql.contains(r#"LEFT JOIN "time_entry_tag" AS "time_entry__tags__jt" ON "time_entry__tags__jt"."time_entry_id" = "time_entry"."id""#),
            "{sql}"
        );
        assert!(
            sql.contains(r#"LEFT JOIN "tag" AS "time_entry__tags" ON "time_entry__tags"."id" = "time_entry__tags__jt"."tag_id""#),
            "{sql}"
        );
        assert!(sql.contains(r#""time_entry__tags"."name" = 'billable'"#), "{sql}");
    }

    #[test]
    fn count_uses_distinct_ids_only_when_joined() {
        let schema = schema();
        let meta = schema.entity("TimeEntry").unwrap();
        let builder = FilterQueryBuilder::new(&schema, meta);
        let opts = SelectOptions::default();

        let direct = builder
            .count(&Filter::new(), &opts)
            .unwrap()
            .to_string(PostgresQueryBuilder);
        assert!(direct.starts_with(r#"SELECT COUNT(*) FROM "time_entry""#), "{direct}");

        let joined = builder
            .count(&project_filter(), &opts)
            .unwrap()
            .to_string(PostgresQueryBuilder);
        assert!(joined.starts_with("SELECT COUNT(*) FROM (SELECT DISTINCT"), "{joined}");
        assert!(joined.ends_with(r#"AS "ids""#), "{joined}");
    }

    #[test]
    fn select_by_id_keeps_scope() {
        let schema = schema();
        let meta = schema.entity("TimeEntry").unwrap();
        let registry = StrategyRegistry::with_defaults();
        let ctx = RequestContext::for_tenant(2);
        let builder = FilterQueryBuilder::new(&schema, meta).scoped(&registry, &ctx);
        let sql = builder
            .select_by_id(&json!(5), &SelectOptions::with_deleted())
            .unwrap()
            .to_string(PostgresQueryBuilder);

        assert!(sql.contains(r#""time_entry"."id" = 5"#), "{sql}");
        assert!(sql.contains(r#""time_entry"."tenant_id" = 2"#), "{sql}");
        assert!(!sql.contains("IS NULL"), "{sql}");
    }

    #[test]
    fn sorting_and_paging() {
        let schema = schema();
        let meta = schema.entity("TimeEntry").unwrap();
        let builder = FilterQueryBuilder::new(&schema, meta);
        let mut query = Query::default();
        query.sorting = vec![
            SortField {
                nulls: Some(NullsOrder::Last),
                ..SortField::desc("duration")
            },
            SortField::asc("id"),
        ];
        query.paging = Some(Paging {
            limit: Some(5),
            offset: Some(10),
        });
        let sql = builder
            .select(&query, &SelectOptions::default())
            .unwrap()
            .to_string(PostgresQueryBuilder);
        assert!(
            sql.ends_with(r#"ORDER BY "time_entry"."duration" DESC NULLS LAST, "time_entry"."id" ASC LIMIT 5 OFFSET 10"#),
            "{sql}"
        );

        query.sorting = vec![SortField::asc("project.name")];
        assert!(matches!(
            builder.select(&query, &SelectOptions::default()),
            Err(QueryError::UnknownField { .. })
        ));
    }

    #[test]
    fn offset_without_limit_still_renders_a_limit() {
        let schema = schema();
        let meta = schema.entity("Tag").unwrap();
        let builder = FilterQueryBuilder::new(&schema, meta);
        let mut query = Query::default();
        query.paging = Some(Paging {
            limit: None,
            offset: Some(3),
        });
        let sql = builder
            .select(&query, &SelectOptions::default())
            .unwrap()
            .to_string(SqliteQueryBuilder);
        assert!(sql.ends_with(&format!("LIMIT {} OFFSET 3", i64::MAX)), "{sql}");
    }

    #[test]
    fn aggregate_groups_and_casts() {
        let schema = schema();
        let meta = schema.entity("TimeEntry").unwrap();
        let builder = FilterQueryBuilder::new(&schema, meta);
        let aggregate = AggregateQuery {
            count: vec!["id".to_string()],
            sum: vec!["duration".to_string()],
            group_by: vec!["project_id".to_string()],
            ..AggregateQuery::default()
        };
        let (select, columns) = builder
            .aggregate(&Filter::new(), &aggregate, &SelectOptions::default())
            .unwrap();
        let sql = select.to_string(PostgresQueryBuilder);

        assert!(sql.contains(r#""time_entry"."project_id" AS "GROUP_BY_project_id""#), "{sql}");
        assert!(sql.contains(r#"COUNT("time_entry"."id") AS "COUNT_id""#), "{sql}");
        assert!(
            sql.contains(r#"CAST(SUM("time_entry"."duration") AS DOUBLE PRECISION) AS "SUM_duration""#),
            "{sql}"
        );
        assert!(sql.contains(r#"GROUP BY "time_entry"."project_id""#), "{sql}");
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].function, AggregateFunction::GroupBy);
        assert_eq!(columns[2].column_type, ColumnType::Float);
    }

    #[test]
    fn aggregate_over_relation_filter_uses_id_subquery() {
        let schema = schema();
        let meta = schema.entity("TimeEntry").unwrap();
        let builder = FilterQueryBuilder::new(&schema, meta);
        let aggregate = AggregateQuery {
            max: vec!["duration".to_string()],
            ..AggregateQuery::default()
        };
        let (select, _) = builder
            .aggregate(&project_filter(), &aggregate, &SelectOptions::default())
            .unwrap();
        let sql = select.to_string(PostgresQueryBuilder);
        assert!(sql.contains(r#""time_entry"."id" IN (SELECT DISTINCT"#), "{sql}");
        assert!(
            sql.starts_with(r#"SELECT MAX("time_entry"."duration") AS "MAX_duration" FROM "time_entry" WHERE"#),
            "{sql}"
        );
    }

    #[test]
    fn mutations_reject_relation_filters() {
        let schema = schema();
        let meta = schema.entity("TimeEntry").unwrap();
        let builder = FilterQueryBuilder::new(&schema, meta);
        let values = json!({"duration": 30}).as_object().unwrap().clone();
        assert!(matches!(
            builder.update(&values, &project_filter()),
            Err(QueryError::Build(_))
        ));

        let sql = builder
            .update_by_ids(&values, &[json!(1), json!(2)])
            .unwrap()
            .to_string(PostgresQueryBuilder);
        assert!(sql.starts_with(r#"UPDATE "time_entry" SET "duration" = 30 WHERE"#), "{sql}");
        assert!(sql.contains(r#""time_entry"."id" IN (1, 2)"#), "{sql}");
        assert!(sql.contains(r#""time_entry"."deleted_at" IS NULL"#), "{sql}");
    }

    #[test]
    fn soft_delete_and_restore() {
        let schema = schema();
        let builder = FilterQueryBuilder::new(&schema, schema.entity("TimeEntry").unwrap());
        let filter = Filter::new().field("id", "eq", 3);

        let sql = builder.soft_delete(&filter, 1_700_000_000).unwrap().to_string(PostgresQueryBuilder);
        assert!(sql.contains(r#"SET "deleted_at" = 1700000000"#), "{sql}");
        assert!(sql.contains(r#""time_entry"."deleted_at" IS NULL"#), "{sql}");

        let sql = builder.restore(&filter).unwrap().to_string(PostgresQueryBuilder);
        assert!(sql.contains(r#"SET "deleted_at" = NULL"#), "{sql}");
        assert!(sql.contains(r#""time_entry"."deleted_at" IS NOT NULL"#), "{sql}");

        let tags = FilterQueryBuilder::new(&schema, schema.entity("Tag").unwrap());
        assert!(matches!(tags.restore(&filter), Err(QueryError::Configuration(_))));
    }

    #[test]
    fn insert_returns_every_column() {
        let schema = schema();
        let builder = FilterQueryBuilder::new(&schema, schema.entity("Tag").unwrap());
        let values = json!({"id": null, "name": "billable"}).as_object().unwrap().clone();
        let sql = builder.insert(&values).unwrap().to_string(SqliteQueryBuilder);
        assert_eq!(
            sql,
            r#"INSERT INTO "tag" ("name") VALUES ('billable') RETURNING "id", "name""#
        );
    }

    #[test]
    fn composite_ids_become_or_of_keys() {
        let schema = schema();
        let meta = schema.entity("Membership").unwrap();
        let filter = ids_filter(meta, &[json!({"user_id": 1, "role_id": 2})]).unwrap();
        assert_eq!(filter.or.len(), 1);
        assert!(ids_filter(meta, &[json!(1)]).is_err());
        assert!(id_filter(schema.entity("Tag").unwrap(), &json!(true)).is_err());
    }
}
