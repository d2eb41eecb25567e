//! Leaf translation: one field + one operator + one value → SQL expression.
//!
//! All user values become bound parameters. Placeholders are positional per
//! statement, so several comparisons on the same field never collide.

use std::str::FromStr;

use sea_query::{Alias, Cond, Expr, Func, LikeExpr, SimpleExpr, Value};

use super::types::FilterValue;
use crate::error::{QueryError, QueryResult};

/// Comparison operators understood by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Like,
    NotLike,
    ILike,
    NotILike,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Is,
    IsNot,
    Between,
    NotBetween,
    IsEmpty,
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "eq",
            ComparisonOperator::Neq => "neq",
            ComparisonOperator::Gt => "gt",
            ComparisonOperator::Gte => "gte",
            ComparisonOperator::Lt => "lt",
            ComparisonOperator::Lte => "lte",
            ComparisonOperator::In => "in",
            ComparisonOperator::NotIn => "notIn",
            ComparisonOperator::Like => "like",
            ComparisonOperator::NotLike => "notLike",
            ComparisonOperator::ILike => "iLike",
            ComparisonOperator::NotILike => "notILike",
            ComparisonOperator::Contains => "contains",
            ComparisonOperator::NotContains => "notContains",
            ComparisonOperator::StartsWith => "startsWith",
            ComparisonOperator::EndsWith => "endsWith",
            ComparisonOperator::Is => "is",
            ComparisonOperator::IsNot => "isNot",
            ComparisonOperator::Between => "between",
            ComparisonOperator::NotBetween => "notBetween",
            ComparisonOperator::IsEmpty => "isEmpty",
        }
    }
}

impl FromStr for ComparisonOperator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s {
            "eq" => ComparisonOperator::Eq,
            "neq" => ComparisonOperator::Neq,
            "gt" => ComparisonOperator::Gt,
            "gte" => ComparisonOperator::Gte,
            "lt" => ComparisonOperator::Lt,
            "lte" => ComparisonOperator::Lte,
            "in" => ComparisonOperator::In,
            "notIn" => ComparisonOperator::NotIn,
            "like" => ComparisonOperator::Like,
            "notLike" => ComparisonOperator::NotLike,
            "iLike" => ComparisonOperator::ILike,
            "notILike" => ComparisonOperator::NotILike,
            "contains" => ComparisonOperator::Contains,
            "notContains" => ComparisonOperator::NotContains,
            "startsWith" => ComparisonOperator::StartsWith,
            "endsWith" => ComparisonOperator::EndsWith,
            "is" => ComparisonOperator::Is,
            "isNot" => ComparisonOperator::IsNot,
            "between" => ComparisonOperator::Between,
            "notBetween" => ComparisonOperator::NotBetween,
            "isEmpty" => ComparisonOperator::IsEmpty,
            other => return Err(QueryError::UnsupportedFilterOperator(other.to_string())),
        };
        Ok(op)
    }
}

/// Maps `(alias.field, operator, value)` to a parameterized expression.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlComparisonBuilder;

impl SqlComparisonBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build one comparison. `alias` qualifies the column.
    pub fn build(
        &self,
        alias: &str,
        field: &str,
        operator: &str,
        value: &FilterValue,
    ) -> QueryResult<SimpleExpr> {
        let op: ComparisonOperator = operator.parse()?;
        let col = || Expr::col((Alias::new(alias), Alias::new(field)));
        let invalid = |reason: &str| QueryError::InvalidFilterValue {
            field: field.to_string(),
            operator: op.as_str().to_string(),
            reason: reason.to_string(),
        };
        let scalar = |value: &FilterValue| scalar_value(value).ok_or_else(|| invalid("expected a scalar"));
        let pattern = |value: &FilterValue| value.as_string().ok_or_else(|| invalid("expected a string"));

        let expr = match op {
            ComparisonOperator::Eq if *value == FilterValue::Null => col().is_null(),
            ComparisonOperator::Neq if *value == FilterValue::Null => col().is_not_null(),
            ComparisonOperator::Eq => col().eq(scalar(value)?),
            ComparisonOperator::Neq => col().ne(scalar(value)?),
            ComparisonOperator::Gt => col().gt(scalar(value)?),
            ComparisonOperator::Gte => col().gte(scalar(value)?),
            ComparisonOperator::Lt => col().lt(scalar(value)?),
            ComparisonOperator::Lte => col().lte(scalar(value)?),
            ComparisonOperator::In | ComparisonOperator::NotIn => {
                let FilterValue::List(items) = value else {
                    return Err(invalid("expected a list"));
                };
                let values = items.iter().map(scalar).collect::<QueryResult<Vec<_>>>()?;
                match (op, values.is_empty()) {
                    (ComparisonOperator::In, true) => always(false),
                    (ComparisonOperator::In, false) => col().is_in(values),
                    (_, true) => always(true),
                    (_, false) => col().is_not_in(values),
                }
            }
            ComparisonOperator::Like => col().like(pattern(value)?),
            ComparisonOperator::NotLike => col().not_like(pattern(value)?),
            ComparisonOperator::ILike => {
                Expr::expr(Func::lower(col())).like(pattern(value)?.to_lowercase())
            }
            ComparisonOperator::NotILike => {
                Expr::expr(Func::lower(col())).not_like(pattern(value)?.to_lowercase())
            }
            ComparisonOperator::Contains => col().like(escaped_like(&format!(
                "%{}%",
                escape_like_wildcards(&pattern(value)?)
            ))),
            ComparisonOperator::NotContains => col().not_like(escaped_like(&format!(
                "%{}%",
                escape_like_wildcards(&pattern(value)?)
            ))),
            ComparisonOperator::StartsWith => col().like(escaped_like(&format!(
                "{}%",
                escape_like_wildcards(&pattern(value)?)
            ))),
            ComparisonOperator::EndsWith => col().like(escaped_like(&format!(
                "%{}",
                escape_like_wildcards(&pattern(value)?)
            ))),
            ComparisonOperator::Is => match value {
                FilterValue::Null => col().is_null(),
                FilterValue::Boolean(b) => col().is(keyword(*b)),
                _ => return Err(invalid("expected null, true or false")),
            },
            ComparisonOperator::IsNot => match value {
                FilterValue::Null => col().is_not_null(),
                FilterValue::Boolean(b) => col().is_not(keyword(*b)),
                _ => return Err(invalid("expected null, true or false")),
            },
            ComparisonOperator::Between | ComparisonOperator::NotBetween => {
                let FilterValue::List(bounds) = value else {
                    return Err(invalid("expected [lower, upper]"));
                };
                let [lower, upper] = bounds.as_slice() else {
                    return Err(invalid("expected [lower, upper]"));
                };
                if op == ComparisonOperator::Between {
                    col().between(scalar(lower)?, scalar(upper)?)
                } else {
                    col().not_between(scalar(lower)?, scalar(upper)?)
                }
            }
            ComparisonOperator::IsEmpty => match value {
                FilterValue::Boolean(true) => Cond::any()
                    .add(col().is_null())
                    .add(col().eq(""))
                    .into(),
                FilterValue::Boolean(false) => Cond::all()
                    .add(col().is_not_null())
                    .add(col().ne(""))
                    .into(),
                _ => return Err(invalid("expected true or false")),
            },
        };
        Ok(expr)
    }
}

/// Convert a scalar filter value into a bindable SQL value.
pub(crate) fn scalar_value(value: &FilterValue) -> Option<Value> {
    match value {
        FilterValue::Boolean(b) => Some(Value::Bool(Some(*b))),
        FilterValue::Integer(i) => Some(Value::BigInt(Some(*i))),
        FilterValue::Float(f) => Some(Value::Double(Some(*f))),
        FilterValue::String(s) => Some(Value::String(Some(Box::new(s.clone())))),
        FilterValue::Null | FilterValue::List(_) => None,
    }
}

/// An expression that is constantly true or false.
pub(crate) fn always(truth: bool) -> SimpleExpr {
    if truth {
        Expr::cust("1 = 1")
    } else {
        Expr::cust("1 = 0")
    }
}

/// `TRUE`/`FALSE` written inline so `IS` sees a keyword.
fn keyword(truth: bool) -> SimpleExpr {
    SimpleExpr::Constant(Value::Bool(Some(truth)))
}

fn escaped_like(pattern: &str) -> LikeExpr {
    LikeExpr::new(pattern).escape('\\')
}

/// Escape SQL LIKE wildcard characters (`%`, `_`, `\`) in a value.
fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
