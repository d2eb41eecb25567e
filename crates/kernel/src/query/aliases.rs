//! Join aliases for relation-qualified filters.
//!
//! Built once per query from the filter tree. Each relation referenced by a
//! nested filter is joined exactly once per parent, under the stable alias
//! `parent__relation`.

use std::collections::BTreeMap;

use super::metadata::{EntityMetadata, Schema};
use super::types::{FieldFilter, Filter};
use crate::error::QueryResult;

/// One joined relation and the relations joined beneath it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasedRelation {
    pub alias: String,
    /// Target entity name.
    pub entity: String,
    pub relations: RelationAliasMap,
}

/// Relation name → join alias, nested per level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationAliasMap {
    entries: BTreeMap<String, AliasedRelation>,
}

impl RelationAliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every relation the filter traverses, starting at `root_alias`.
    pub fn from_filter(
        schema: &Schema,
        meta: &EntityMetadata,
        filter: &Filter,
        root_alias: &str,
    ) -> QueryResult<Self> {
        let mut map = Self::new();
        map.collect(schema, meta, filter, root_alias)?;
        Ok(map)
    }

    fn collect(
        &mut self,
        schema: &Schema,
        meta: &EntityMetadata,
        filter: &Filter,
        parent_alias: &str,
    ) -> QueryResult<()> {
        for sibling in filter.and.iter().chain(filter.or.iter()) {
            self.collect(schema, meta, sibling, parent_alias)?;
        }
        for (key, field) in &filter.fields {
            let FieldFilter::Relation(nested) = field else {
                continue;
            };
            let relation = meta.relation_meta(key)?;
            let target = schema.target_of(relation)?;
            let entry = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| AliasedRelation {
                    alias: format!("{parent_alias}__{key}"),
                    entity: target.name.clone(),
                    relations: RelationAliasMap::new(),
                });
            let alias = entry.alias.clone();
            entry.relations.collect(schema, target, nested, &alias)?;
        }
        Ok(())
    }

    pub fn get(&self, relation: &str) -> Option<&AliasedRelation> {
        self.entries.get(relation)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AliasedRelation)> {
        self.entries.iter()
    }
}
