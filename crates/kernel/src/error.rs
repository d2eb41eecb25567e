//! Query engine error types.

use thiserror::Error;

/// Errors raised by the query builders and the query service.
///
/// Nothing in the engine swallows these; an HTTP layer is expected to map
/// them to statuses (see [`QueryError::is_client_error`]).
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unable to find {entity} with {lookup}")]
    NotFound { entity: String, lookup: String },

    #[error("found multiple {entity} records matching {lookup}")]
    MultipleFound { entity: String, lookup: String },

    #[error("{entity} already exists")]
    AlreadyExists { entity: String },

    #[error("unable to find all {relation} to add to {entity}")]
    RelationResolution { entity: String, relation: String },

    #[error("id cannot be specified when updating {entity}")]
    IdImmutable { entity: String },

    #[error("unsupported filter operator: {0}")]
    UnsupportedFilterOperator(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("unknown field `{field}` on {entity}")]
    UnknownField { entity: String, field: String },

    #[error("unknown relation `{relation}` on {entity}")]
    UnknownRelation { entity: String, relation: String },

    #[error("relation `{relation}` on {entity} is not joined for filtering")]
    RelationNotJoined { entity: String, relation: String },

    #[error("invalid value for `{operator}` on `{field}`: {reason}")]
    InvalidFilterValue {
        field: String,
        operator: String,
        reason: String,
    },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("request context has no {0}")]
    MissingContext(&'static str),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to build statement: {0}")]
    Build(String),
}

impl QueryError {
    pub(crate) fn not_found(entity: &str, lookup: impl std::fmt::Display) -> Self {
        QueryError::NotFound {
            entity: entity.to_string(),
            lookup: lookup.to_string(),
        }
    }

    /// Whether the error was caused by the request rather than the system.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            QueryError::Configuration(_)
                | QueryError::Database(_)
                | QueryError::Serialization(_)
                | QueryError::Build(_)
        )
    }
}

/// Result type alias using QueryError.
pub type QueryResult<T> = Result<T, QueryError>;
