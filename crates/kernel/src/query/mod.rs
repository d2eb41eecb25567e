//! Dynamic query engine.
//!
//! This module provides:
//! - Filter/Query: serializable filter trees, paging, sorting and relations
//! - SqlComparisonBuilder and WhereBuilder: filter trees to SQL conditions
//! - FilterQueryBuilder: SeaQuery statements with joins, scopes and soft delete
//! - QueryService / EntityService: reads and writes with relation reconciliation
//! - StrategyRegistry: setters and scope filters resolved per entity
//! - PaginatedDataProvider: pages of results with totals

pub mod aliases;
pub mod comparison;
pub mod context;
pub mod entity;
pub mod loader;
pub mod metadata;
pub mod provider;
pub mod query_builder;
mod reconcile;
pub mod registry;
pub mod service;
pub mod types;
pub mod where_builder;

pub use aliases::{AliasedRelation, RelationAliasMap};
pub use comparison::{ComparisonOperator, SqlComparisonBuilder};
pub use context::RequestContext;
pub use entity::{Entity, EntityService, from_record, to_record};
pub use loader::RelationLoader;
pub use metadata::{
    Capability, ColumnMetadata, ColumnType, EntityMetadata, OneToOneSide, Record,
    RelationKind, RelationMetadata, Schema,
};
pub use provider::{
    Assembler, EntityAssembler, FilterBuilder, IdentityAssembler, Page, PageMetadata,
    PaginatedDataProvider, PaginationConfig, PaginationQuery,
};
pub use query_builder::{
    AggregateColumn, AggregateFunction, FilterQueryBuilder, SelectOptions, id_filter, ids_filter,
};
pub use registry::{
    OwnerSetter, ScopeFilter, Setter, StrategyRegistry, TenantScopeFilter, TenantSetter,
    TimestampSetter, WriteKind,
};
pub use service::{DEFAULT_MAX_RELATION_DEPTH, Lookup, QueryService, TransactionPolicy};
pub use types::{
    AggregateQuery, AggregateResponse, FieldFilter, Filter, FilterValue, NullsOrder, Paging,
    Query, RelationQuery, SortDirection, SortField,
};
pub use where_builder::WhereBuilder;
