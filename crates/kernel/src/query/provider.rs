//! Paginated data provider: filter builder + pagination config + query
//! service, producing one page of assembled items and the total count.

use std::marker::PhantomData;

use sea_query::SimpleExpr;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::context::RequestContext;
use super::entity::{Entity, from_record};
use super::metadata::Record;
use super::query_builder::SelectOptions;
use super::service::QueryService;
use super::types::{Filter, Paging, Query, RelationQuery, SortField};
use crate::error::QueryResult;

/// Allowed page sizes and the fallback for anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationConfig {
    pub page_sizes: Vec<u64>,
    pub default_page_size: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_sizes: vec![5, 10, 25, 50, 100],
            default_page_size: 10,
        }
    }
}

impl PaginationConfig {
    pub fn new(page_sizes: Vec<u64>, default_page_size: u64) -> Self {
        Self {
            page_sizes,
            default_page_size,
        }
    }

    /// The requested limit if allowed, the default otherwise.
    pub fn clamp(&self, limit: Option<u64>) -> u64 {
        match limit {
            Some(limit) if self.page_sizes.contains(&limit) => limit,
            _ => self.default_page_size,
        }
    }
}

fn first_page() -> u64 {
    1
}

/// Pagination request from a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationQuery {
    /// 1-based.
    #[serde(default = "first_page")]
    pub page: u64,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortField>,
}

impl Default for PaginationQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: None,
            sort: Vec::new(),
        }
    }
}

impl PaginationQuery {
    pub fn page(page: u64, limit: u64) -> Self {
        Self {
            page,
            limit: Some(limit),
            sort: Vec::new(),
        }
    }
}

/// Page metadata. Only `total` is present for unpaged requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_next: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_prev: Option<bool>,
}

impl PageMetadata {
    pub fn unpaged(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn paged(total: u64, page: u64, limit: u64) -> Self {
        let total_pages = if limit > 0 { total.div_ceil(limit) } else { 1 };
        Self {
            total,
            page: Some(page),
            limit: Some(limit),
            total_pages: Some(total_pages),
            has_next: Some(page < total_pages),
            has_prev: Some(page > 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub metadata: PageMetadata,
}

/// Turns request data into the pieces of a query.
pub trait FilterBuilder: Send + Sync {
    type Data: Send + Sync;

    fn build(&self, data: &Self::Data) -> QueryResult<Filter>;

    fn build_relations(&self, _data: &Self::Data) -> Vec<RelationQuery> {
        Vec::new()
    }

    /// Raw predicates against the root table, aliased as `root_alias`.
    fn build_custom(&self, _data: &Self::Data, _root_alias: &str) -> Vec<SimpleExpr> {
        Vec::new()
    }
}

/// Maps a loaded record to the item type of a page.
pub trait Assembler: Send + Sync {
    type Output: Send;

    fn assemble(&self, record: Record) -> QueryResult<Self::Output>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityAssembler;

impl Assembler for IdentityAssembler {
    type Output = Record;

    fn assemble(&self, record: Record) -> QueryResult<Record> {
        Ok(record)
    }
}

/// Deserializes records into an [`Entity`].
pub struct EntityAssembler<E>(PhantomData<fn() -> E>);

impl<E> Default for EntityAssembler<E> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<E: Entity> Assembler for EntityAssembler<E> {
    type Output = E;

    fn assemble(&self, record: Record) -> QueryResult<E> {
        from_record(record)
    }
}

pub struct PaginatedDataProvider<B, A = IdentityAssembler> {
    service: QueryService,
    entity: String,
    builder: B,
    assembler: A,
    config: PaginationConfig,
}

impl<B: FilterBuilder> PaginatedDataProvider<B> {
    pub fn new(
        service: QueryService,
        entity: impl Into<String>,
        builder: B,
        config: PaginationConfig,
    ) -> Self {
        Self {
            service,
            entity: entity.into(),
            builder,
            assembler: IdentityAssembler,
            config,
        }
    }
}

/// Row offset of `page`, saturating at the largest offset a database binds.
///
/// Pages past that point come back empty instead of wrapping around.
fn page_offset(page: u64, limit: u64) -> u64 {
    page.checked_sub(1)
        .and_then(|p| p.checked_mul(limit))
        .map_or(MAX_OFFSET, |offset| offset.min(MAX_OFFSET))
}

const MAX_OFFSET: u64 = i64::MAX as u64;

impl<B: FilterBuilder, A: Assembler> PaginatedDataProvider<B, A> {
    pub fn with_assembler<A2: Assembler>(self, assembler: A2) -> PaginatedDataProvider<B, A2> {
        PaginatedDataProvider {
            service: self.service,
            entity: self.entity,
            builder: self.builder,
            assembler,
            config: self.config,
        }
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    /// One page of items plus the total over the same unpaged filter.
    ///
    /// Without `pagination` every matching row is returned.
    pub async fn get_data(
        &self,
        ctx: &RequestContext,
        data: &B::Data,
        pagination: Option<&PaginationQuery>,
        default_sort: &[SortField],
    ) -> QueryResult<Page<A::Output>> {
        let root_alias = self.service.schema().entity(&self.entity)?.table.clone();
        let opts = SelectOptions {
            conditions: self.builder.build_custom(data, &root_alias),
            ..SelectOptions::default()
        };

        let mut query = Query {
            filter: self.builder.build(data)?,
            relations: self.builder.build_relations(data),
            sorting: default_sort.to_vec(),
            ..Query::default()
        };
        let mut window = None;
        if let Some(request) = pagination {
            if !request.sort.is_empty() {
                query.sorting = request.sort.clone();
            }
            let limit = self.config.clamp(request.limit);
            let page = request.page.max(1);
            query.paging = Some(Paging {
                limit: Some(limit),
                offset: Some(page_offset(page, limit)),
            });
            window = Some((page, limit));
        }

        let (records, total) = self
            .service
            .query_and_count_with(ctx, &self.entity, &query, &opts)
            .await?;
        debug!(entity = %self.entity, total, returned = records.len(), "page loaded");

        let items = records
            .into_iter()
            .map(|record| self.assembler.assemble(record))
            .collect::<QueryResult<Vec<_>>>()?;
        let metadata = match window {
            Some((page, limit)) => PageMetadata::paged(total, page, limit),
            None => PageMetadata::unpaged(total),
        };
        Ok(Page { items, metadata })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clamp_falls_back_to_default() {
        let config = PaginationConfig::default();
        assert_eq!(config.clamp(Some(25)), 25);
        assert_eq!(config.clamp(Some(7)), 10);
        assert_eq!(config.clamp(Some(1000)), 10);
        assert_eq!(config.clamp(None), 10);
    }

    #[test]
    fn page_offset_saturates() {
        assert_eq!(page_offset(1, 10), 0);
        assert_eq!(page_offset(3, 10), 20);
        assert_eq!(page_offset(u64::MAX, 10), MAX_OFFSET);
        assert_eq!(page_offset(u64::MAX / 10, 10), MAX_OFFSET);
    }

    #[test]
    fn paged_metadata() {
        let meta = PageMetadata::paged(25, 2, 10);
        assert_eq!(meta.total_pages, Some(3));
        assert_eq!(meta.has_next, Some(true));
        assert_eq!(meta.has_prev, Some(true));

        let last = PageMetadata::paged(25, 3, 10);
        assert_eq!(last.has_next, Some(false));

        let empty = PageMetadata::paged(0, 1, 10);
        assert_eq!(empty.total_pages, Some(0));
        assert_eq!(empty.has_prev, Some(false));
    }

    #[test]
    fn unpaged_metadata_serializes_total_only() {
        assert_eq!(
            serde_json::to_value(PageMetadata::unpaged(4)).unwrap(),
            json!({"total": 4})
        );
    }

    #[test]
    fn pagination_query_defaults_to_first_page() {
        let request: PaginationQuery = serde_json::from_value(json!({"limit": 5})).unwrap();
        assert_eq!(request.page, 1);
        assert_eq!(request.limit, Some(5));
        assert!(request.sort.is_empty());
    }
}
