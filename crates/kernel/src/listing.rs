//! Filter builders for the domain list screens.

use sea_query::{Alias, Expr, SimpleExpr};
use serde::{Deserialize, Serialize};

use crate::error::QueryResult;
use crate::query::{Filter, FilterBuilder, FilterValue, Query, RelationQuery};

/// Client list parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientListFilter {
    /// Matches name or email.
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub with_projects: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ClientFilterBuilder;

impl FilterBuilder for ClientFilterBuilder {
    type Data = ClientListFilter;

    fn build(&self, data: &ClientListFilter) -> QueryResult<Filter> {
        let Some(search) = data.search.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Ok(Filter::new());
        };
        let search = search.trim();
        Ok(Filter::any(vec![
            Filter::new().field("name", "contains", search),
            Filter::new().field("email", "contains", search),
        ]))
    }

    fn build_relations(&self, data: &ClientListFilter) -> Vec<RelationQuery> {
        if data.with_projects {
            vec![RelationQuery::new("projects")]
        } else {
            Vec::new()
        }
    }
}

/// Time entry list parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeEntryListFilter {
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub client_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Entries carrying any of these tags.
    #[serde(default)]
    pub tag_ids: Vec<i64>,
    /// Unix seconds, inclusive.
    #[serde(default)]
    pub from: Option<i64>,
    /// Unix seconds, exclusive.
    #[serde(default)]
    pub to: Option<i64>,
    #[serde(default)]
    pub billable: Option<bool>,
    #[serde(default)]
    pub search: Option<String>,
    /// Entries whose end (`started_at + duration`) falls at or after this time.
    #[serde(default)]
    pub ends_after: Option<i64>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TimeEntryFilterBuilder;

impl FilterBuilder for TimeEntryFilterBuilder {
    type Data = TimeEntryListFilter;

    fn build(&self, data: &TimeEntryListFilter) -> QueryResult<Filter> {
        let mut filter = Filter::new();
        if let Some(project_id) = data.project_id {
            filter = filter.field("project_id", "eq", project_id);
        }
        if let Some(user_id) = data.user_id {
            filter = filter.field("user_id", "eq", user_id);
        }
        if let Some(from) = data.from {
            filter = filter.field("started_at", "gte", from);
        }
        if let Some(to) = data.to {
            filter = filter.field("started_at", "lt", to);
        }
        if let Some(billable) = data.billable {
            filter = filter.field("billable", "is", billable);
        }
        if let Some(search) = data.search.as_deref().filter(|s| !s.trim().is_empty()) {
            filter = filter.field("description", "contains", search.trim());
        }
        if let Some(client_id) = data.client_id {
            filter = filter.relation("project", Filter::new().field("client_id", "eq", client_id));
        }
        if !data.tag_ids.is_empty() {
            let ids = data.tag_ids.iter().copied().map(FilterValue::from).collect();
            filter = filter.relation("tags", Filter::new().field("id", "in", FilterValue::List(ids)));
        }
        Ok(filter)
    }

    fn build_relations(&self, _data: &TimeEntryListFilter) -> Vec<RelationQuery> {
        vec![
            RelationQuery {
                name: "project".to_string(),
                query: Query {
                    relations: vec![RelationQuery::new("client")],
                    ..Query::default()
                },
            },
            RelationQuery::new("tags"),
        ]
    }

    fn build_custom(&self, data: &TimeEntryListFilter, root_alias: &str) -> Vec<SimpleExpr> {
        let Some(ends_after) = data.ends_after else {
            return Vec::new();
        };
        let column = |name: &str| Expr::col((Alias::new(root_alias), Alias::new(name)));
        vec![Expr::expr(column("started_at").add(column("duration"))).gte(ends_after)]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::FieldFilter;
    use sea_query::{Query as SqlQuery, SqliteQueryBuilder};

    #[test]
    fn blank_search_matches_everything() {
        let filter = ClientFilterBuilder
            .build(&ClientListFilter {
                search: Some("  ".into()),
                with_projects: false,
            })
            .unwrap();
        assert!(filter.is_empty());
    }

    #[test]
    fn client_search_covers_name_and_email() {
        let filter = ClientFilterBuilder
            .build(&ClientListFilter {
                search: Some("acme".into()),
                with_projects: true,
            })
            .unwrap();
        assert_eq!(filter.or.len(), 2);
    }

    #[test]
    fn time_entry_filter_traverses_relations() {
        let data = TimeEntryListFilter {
            client_id: Some(3),
            tag_ids: vec![1, 2],
            from: Some(100),
            ..TimeEntryListFilter::default()
        };
        let filter = TimeEntryFilterBuilder.build(&data).unwrap();
        assert!(matches!(filter.fields.get("project"), Some(FieldFilter::Relation(_))));
        assert!(matches!(filter.fields.get("tags"), Some(FieldFilter::Relation(_))));
        assert!(matches!(filter.fields.get("started_at"), Some(FieldFilter::Comparison(_))));
    }

    #[test]
    fn ends_after_is_a_raw_predicate() {
        let data = TimeEntryListFilter {
            ends_after: Some(500),
            ..TimeEntryListFilter::default()
        };
        let conditions = TimeEntryFilterBuilder.build_custom(&data, "time_entry");
        assert_eq!(conditions.len(), 1);

        let mut select = SqlQuery::select();
        select.expr(Expr::val(1)).and_where(conditions[0].clone());
        let sql = select.to_string(SqliteQueryBuilder);
        assert!(sql.contains(r#""time_entry"."started_at" + "time_entry"."duration""#));
        assert!(sql.ends_with(">= 500"));
    }
}
