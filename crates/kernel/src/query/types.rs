//! Query engine types.
//!
//! Provides the declarative request contract:
//! - Filter: recursive and/or/field-comparison tree, relation keys nest
//! - Query: filter + paging + sorting + relations to load
//! - AggregateQuery: grouped count/sum/avg/min/max

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::metadata::Record;

/// Operator name → value for one field, e.g. `{"eq": 1}` or `{"in": [1, 2]}`.
///
/// Operator names stay strings so unknown operators are reported by the
/// comparison builder rather than rejected while parsing.
pub type FieldComparison = BTreeMap<String, FilterValue>;

/// Filter on a single key: either a comparison or a nested relation filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    Comparison(FieldComparison),
    Relation(Filter),
}

/// Recursive filter tree. An empty filter matches everything.
///
/// JSON shape: `{"and": [...], "or": [...], "<field>": {"<op>": value},
/// "<relation>": { ...nested filter... }}`. A field entry whose values contain
/// an object (or whose keys are `and`/`or`) is a nested relation filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Filter {
    pub and: Vec<Filter>,
    pub or: Vec<Filter>,
    pub fields: BTreeMap<String, FieldFilter>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All of the given filters must match.
    pub fn all(filters: Vec<Filter>) -> Self {
        Self {
            and: filters,
            ..Self::default()
        }
    }

    /// Any of the given filters must match.
    pub fn any(filters: Vec<Filter>) -> Self {
        Self {
            or: filters,
            ..Self::default()
        }
    }

    /// Add `operator: value` to the comparison on `field`.
    pub fn field(mut self, field: &str, operator: &str, value: impl Into<FilterValue>) -> Self {
        match self.fields.get_mut(field) {
            Some(FieldFilter::Comparison(cmp)) => {
                cmp.insert(operator.to_string(), value.into());
            }
            _ => {
                self.fields.insert(
                    field.to_string(),
                    FieldFilter::Comparison(FieldComparison::from([(
                        operator.to_string(),
                        value.into(),
                    )])),
                );
            }
        }
        self
    }

    /// Filter through the relation `name`.
    pub fn relation(mut self, name: &str, filter: Filter) -> Self {
        self.fields
            .insert(name.to_string(), FieldFilter::Relation(filter));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.and.is_empty() && self.or.is_empty() && self.fields.is_empty()
    }

    /// Combine two filters with AND, skipping empty sides.
    pub fn merge(self, other: Filter) -> Filter {
        match (self.is_empty(), other.is_empty()) {
            (_, true) => self,
            (true, false) => other,
            (false, false) => Filter::all(vec![self, other]),
        }
    }
}

impl TryFrom<Map<String, Value>> for Filter {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut filter = Filter::default();
        for (key, value) in map {
            match key.as_str() {
                "and" | "or" => {
                    let Value::Array(items) = value else {
                        return Err(format!("`{key}` must be an array of filters"));
                    };
                    let parsed = items
                        .into_iter()
                        .map(|item| match item {
                            Value::Object(obj) => Filter::try_from(obj),
                            _ => Err(format!("`{key}` entries must be objects")),
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    if key == "and" {
                        filter.and = parsed;
                    } else {
                        filter.or = parsed;
                    }
                }
                _ => {
                    let Value::Object(obj) = value else {
                        return Err(format!("filter for `{key}` must be an object"));
                    };
                    let nested = obj
                        .iter()
                        .any(|(k, v)| v.is_object() || k == "and" || k == "or");
                    let field = if nested {
                        FieldFilter::Relation(Filter::try_from(obj)?)
                    } else {
                        let mut cmp = FieldComparison::new();
                        for (op, v) in obj {
                            let value = FilterValue::from_json(&v).ok_or_else(|| {
                                format!("unsupported value for `{key}.{op}`")
                            })?;
                            cmp.insert(op, value);
                        }
                        FieldFilter::Comparison(cmp)
                    };
                    filter.fields.insert(key, field);
                }
            }
        }
        Ok(filter)
    }
}

impl From<Filter> for Map<String, Value> {
    fn from(filter: Filter) -> Self {
        let mut map = Map::new();
        if !filter.and.is_empty() {
            map.insert(
                "and".to_string(),
                Value::Array(filter.and.into_iter().map(|f| Value::Object(f.into())).collect()),
            );
        }
        if !filter.or.is_empty() {
            map.insert(
                "or".to_string(),
                Value::Array(filter.or.into_iter().map(|f| Value::Object(f.into())).collect()),
            );
        }
        for (key, field) in filter.fields {
            let value = match field {
                FieldFilter::Comparison(cmp) => Value::Object(
                    cmp.into_iter().map(|(op, v)| (op, v.to_json())).collect(),
                ),
                FieldFilter::Relation(nested) => Value::Object(nested.into()),
            };
            map.insert(key, value);
        }
        map
    }
}

/// Comparison value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// For `in`, `notIn`, `between`, `notBetween`.
    List(Vec<FilterValue>),
}

impl FilterValue {
    /// Convert from JSON; objects are not comparison values.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(FilterValue::Null),
            Value::Bool(b) => Some(FilterValue::Boolean(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(FilterValue::Integer)
                .or_else(|| n.as_f64().map(FilterValue::Float)),
            Value::String(s) => Some(FilterValue::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(FilterValue::from_json)
                .collect::<Option<Vec<_>>>()
                .map(FilterValue::List),
            Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::Null => Value::Null,
            FilterValue::Boolean(b) => Value::Bool(*b),
            FilterValue::Integer(i) => Value::from(*i),
            FilterValue::Float(f) => Value::from(*f),
            FilterValue::String(s) => Value::String(s.clone()),
            FilterValue::List(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
        }
    }

    /// Convert to string representation for pattern operators.
    pub fn as_string(&self) -> Option<String> {
        match self {
            FilterValue::String(s) => Some(s.clone()),
            FilterValue::Integer(i) => Some(i.to_string()),
            FilterValue::Float(f) => Some(f.to_string()),
            FilterValue::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Integer(i64::from(value))
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Boolean(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        FilterValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FilterValue::Null, Into::into)
    }
}

/// Page window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "ASC")]
    Asc,
    #[serde(alias = "DESC")]
    Desc,
}

/// NULL ordering preference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NullsOrder {
    First,
    Last,
}

/// Sort specification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortField {
    /// Field to sort by (a column of the queried entity).
    pub field: String,

    /// Sort direction.
    #[serde(default)]
    pub direction: SortDirection,

    /// NULL handling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nulls: Option<NullsOrder>,
}

impl SortField {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: SortDirection::Asc,
            nulls: None,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: SortDirection::Desc,
            nulls: None,
        }
    }
}

/// A relation to load alongside the results, with its own sub-query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationQuery {
    pub name: String,

    #[serde(default)]
    pub query: Query,
}

impl RelationQuery {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            query: Query::default(),
        }
    }
}

/// Complete declarative query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Query {
    #[serde(default, skip_serializing_if = "Filter::is_empty")]
    pub filter: Filter,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paging: Option<Paging>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sorting: Vec<SortField>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<RelationQuery>,
}

impl Query {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }
}

/// Aggregations to compute, per field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregateQuery {
    #[serde(default)]
    pub count: Vec<String>,
    #[serde(default)]
    pub sum: Vec<String>,
    #[serde(default)]
    pub avg: Vec<String>,
    #[serde(default)]
    pub min: Vec<String>,
    #[serde(default)]
    pub max: Vec<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
}

impl AggregateQuery {
    pub fn is_empty(&self) -> bool {
        self.count.is_empty()
            && self.sum.is_empty()
            && self.avg.is_empty()
            && self.min.is_empty()
            && self.max.is_empty()
            && self.group_by.is_empty()
    }
}

/// One aggregate row (one per group).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregateResponse {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub group_by: Record,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub count: Record,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub sum: Record,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub avg: Record,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub min: Record,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub max: Record,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_is_identity_filter() {
        let filter: Filter = serde_json::from_value(json!({})).unwrap();
        assert!(filter.is_empty());
    }

    #[test]
    fn comparison_and_relation_entries_are_classified() {
        let filter: Filter = serde_json::from_value(json!({
            "description": {"contains": "standup", "is": null},
            "project": {"client": {"id": {"eq": 4}}},
            "tags": {"or": [{"name": {"eq": "billable"}}]}
        }))
        .unwrap();

        assert!(matches!(
            filter.fields.get("description"),
            Some(FieldFilter::Comparison(cmp)) if cmp.get("is") == Some(&FilterValue::Null)
        ));
        let Some(FieldFilter::Relation(project)) = filter.fields.get("project") else {
            panic!("project should be a relation filter");
        };
        assert!(matches!(
            project.fields.get("client"),
            Some(FieldFilter::Relation(_))
        ));
        assert!(matches!(
            filter.fields.get("tags"),
            Some(FieldFilter::Relation(tags)) if tags.or.len() == 1
        ));
    }

    #[test]
    fn unknown_operators_survive_parsing() {
        let filter: Filter = serde_json::from_value(json!({"name": {"soundsLike": "x"}})).unwrap();
        assert!(matches!(
            filter.fields.get("name"),
            Some(FieldFilter::Comparison(cmp)) if cmp.contains_key("soundsLike")
        ));
    }

    #[test]
    fn malformed_filters_are_rejected() {
        assert!(serde_json::from_value::<Filter>(json!({"and": {"a": {"eq": 1}}})).is_err());
        assert!(serde_json::from_value::<Filter>(json!({"name": "x"})).is_err());
        assert!(serde_json::from_value::<Filter>(json!({"or": [1]})).is_err());
    }

    #[test]
    fn filter_serialization_keeps_shape() {
        let filter = Filter::any(vec![
            Filter::new().field("a", "eq", 1),
            Filter::new().relation("project", Filter::new().field("name", "like", "x%")),
        ]);
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(
            json,
            json!({"or": [{"a": {"eq": 1}}, {"project": {"name": {"like": "x%"}}}]})
        );
        let parsed: Filter = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, filter);
    }

    #[test]
    fn merge_skips_empty_sides() {
        let a = Filter::new().field("a", "eq", 1);
        assert_eq!(a.clone().merge(Filter::new()), a);
        assert_eq!(Filter::new().merge(a.clone()), a);
        assert_eq!(a.clone().merge(a.clone()).and.len(), 2);
    }

    #[test]
    fn query_defaults_and_sort_aliases() {
        let query: Query = serde_json::from_value(json!({
            "sorting": [{"field": "started_at", "direction": "DESC", "nulls": "last"}],
            "paging": {"limit": 5},
            "relations": [{"name": "tags"}]
        }))
        .unwrap();
        assert!(query.filter.is_empty());
        assert_eq!(query.sorting[0].direction, SortDirection::Desc);
        assert_eq!(query.sorting[0].nulls, Some(NullsOrder::Last));
        assert_eq!(query.paging.and_then(|p| p.limit), Some(5));
        assert!(query.relations[0].query.filter.is_empty());
    }

    #[test]
    fn filter_value_conversions() {
        assert_eq!(FilterValue::from(3).as_string(), Some("3".to_string()));
        assert_eq!(FilterValue::from(None::<i64>), FilterValue::Null);
        assert_eq!(
            FilterValue::from(vec![1, 2]),
            FilterValue::List(vec![FilterValue::Integer(1), FilterValue::Integer(2)])
        );
        assert_eq!(FilterValue::from_json(&json!({"a": 1})), None);
    }
}
