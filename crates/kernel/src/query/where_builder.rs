//! Recursive WHERE construction from a filter tree.
//!
//! - `and` siblings are bracketed and AND-combined, the group ANDed in
//! - `or` siblings are bracketed and OR-combined, the group ANDed in
//! - every operator on one field is OR-combined into a single bracket
//! - relation keys recurse with the joined alias

use sea_query::{Cond, ConditionalStatement, Condition};

use super::aliases::RelationAliasMap;
use super::comparison::{SqlComparisonBuilder, always};
use super::metadata::{EntityMetadata, Schema};
use super::types::{FieldFilter, Filter};
use crate::error::{QueryError, QueryResult};

/// Walks a [`Filter`] and produces a sea-query [`Condition`].
#[derive(Debug, Clone, Copy)]
pub struct WhereBuilder<'a> {
    schema: &'a Schema,
    comparisons: SqlComparisonBuilder,
}

impl<'a> WhereBuilder<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            comparisons: SqlComparisonBuilder::new(),
        }
    }

    /// Apply the filter to any statement with a WHERE clause.
    pub fn build<S: ConditionalStatement>(
        &self,
        target: &mut S,
        meta: &EntityMetadata,
        filter: &Filter,
        aliases: &RelationAliasMap,
        alias: &str,
    ) -> QueryResult<()> {
        let condition = self.condition(meta, filter, aliases, alias)?;
        if !condition.is_empty() {
            target.cond_where(condition);
        }
        Ok(())
    }

    /// The filter as a condition. An empty filter yields an empty condition.
    pub fn condition(
        &self,
        meta: &EntityMetadata,
        filter: &Filter,
        aliases: &RelationAliasMap,
        alias: &str,
    ) -> QueryResult<Condition> {
        let mut condition = Cond::all();

        if !filter.and.is_empty() {
            let mut group = Cond::all();
            for sibling in &filter.and {
                group = group.add(self.bracket(meta, sibling, aliases, alias)?);
            }
            condition = condition.add(group);
        }

        if !filter.or.is_empty() {
            let mut group = Cond::any();
            for sibling in &filter.or {
                group = group.add(self.bracket(meta, sibling, aliases, alias)?);
            }
            condition = condition.add(group);
        }

        for (key, field) in &filter.fields {
            match field {
                FieldFilter::Relation(nested) => {
                    let relation = meta.relation_meta(key)?;
                    let target = self.schema.target_of(relation)?;
                    let joined = aliases.get(key).ok_or_else(|| QueryError::RelationNotJoined {
                        entity: meta.name.clone(),
                        relation: key.clone(),
                    })?;
                    let nested = self.condition(target, nested, &joined.relations, &joined.alias)?;
                    if !nested.is_empty() {
                        condition = condition.add(nested);
                    }
                }
                FieldFilter::Comparison(comparison) => {
                    if comparison.is_empty() {
                        continue;
                    }
                    meta.column_meta(key)?;
                    let mut any = Cond::any();
                    for (operator, value) in comparison {
                        any = any.add(self.comparisons.build(alias, key, operator, value)?);
                    }
                    condition = condition.add(any);
                }
            }
        }

        Ok(condition)
    }

    /// One sibling as its own group; empty siblings are always true.
    fn bracket(
        &self,
        meta: &EntityMetadata,
        filter: &Filter,
        aliases: &RelationAliasMap,
        alias: &str,
    ) -> QueryResult<Condition> {
        let condition = self.condition(meta, filter, aliases, alias)?;
        if condition.is_empty() {
            return Ok(Cond::all().add(always(true)));
        }
        Ok(condition)
    }
}
