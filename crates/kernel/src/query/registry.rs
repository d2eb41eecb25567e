//! Strategy registry for cross-cutting write/read concerns.
//!
//! Two kinds of strategies are registered once at startup:
//! - [`Setter`]: mutates an outgoing write payload (tenant stamping, owner, timestamps)
//! - [`ScopeFilter`]: contributes a filter to every query (tenant isolation)
//!
//! Strategies decide applicability from entity capabilities. The applicable
//! set per entity is resolved once and cached.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use super::context::RequestContext;
use super::metadata::{Capability, EntityMetadata, Record, Schema};
use super::types::Filter;
use crate::error::QueryResult;

/// Which write a setter is running for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
}

/// Mutates a record before it is written.
pub trait Setter: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, meta: &EntityMetadata) -> bool;

    fn execute(
        &self,
        kind: WriteKind,
        meta: &EntityMetadata,
        record: &mut Record,
        ctx: &RequestContext,
    ) -> QueryResult<()>;
}

/// Contributes a filter to every query of the entities it supports.
pub trait ScopeFilter: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, meta: &EntityMetadata) -> bool;

    /// `None` means no restriction for this caller.
    fn apply(&self, meta: &EntityMetadata, ctx: &RequestContext) -> QueryResult<Option<Filter>>;
}

/// Indices of the strategies that apply to one entity.
#[derive(Debug, Default)]
struct Resolved {
    setters: Vec<usize>,
    scopes: Vec<usize>,
}

/// Ordered strategy lists plus a per-entity resolution cache.
pub struct StrategyRegistry {
    setters: Vec<Arc<dyn Setter>>,
    scopes: Vec<Arc<dyn ScopeFilter>>,
    resolved: DashMap<String, Arc<Resolved>>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            setters: Vec::new(),
            scopes: Vec::new(),
            resolved: DashMap::new(),
        }
    }

    /// A registry with the built-in tenant, owner and timestamp strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_scope_filter(Arc::new(TenantScopeFilter));
        registry.register_setter(Arc::new(TenantSetter));
        registry.register_setter(Arc::new(OwnerSetter));
        registry.register_setter(Arc::new(TimestampSetter));
        registry
    }

    /// Register a setter. Setters run in registration order.
    pub fn register_setter(&mut self, setter: Arc<dyn Setter>) {
        self.setters.push(setter);
        self.resolved.clear();
    }

    pub fn register_scope_filter(&mut self, scope: Arc<dyn ScopeFilter>) {
        self.scopes.push(scope);
        self.resolved.clear();
    }

    fn resolve(&self, meta: &EntityMetadata) -> Arc<Resolved> {
        if let Some(resolved) = self.resolved.get(&meta.name) {
            return Arc::clone(resolved.value());
        }
        let resolved = Arc::new(Resolved {
            setters: self
                .setters
                .iter()
                .enumerate()
                .filter(|(_, s)| s.supports(meta))
                .map(|(i, _)| i)
                .collect(),
            scopes: self
                .scopes
                .iter()
                .enumerate()
                .filter(|(_, s)| s.supports(meta))
                .map(|(i, _)| i)
                .collect(),
        });
        tracing::debug!(
            entity = %meta.name,
            setters = resolved.setters.len(),
            scopes = resolved.scopes.len(),
            "resolved strategies"
        );
        self.resolved
            .insert(meta.name.clone(), Arc::clone(&resolved));
        resolved
    }

    /// Resolve every entity up front.
    pub fn warm(&self, schema: &Schema) {
        for meta in schema.entities() {
            self.resolve(meta);
        }
    }

    /// Names of the setters that apply to `meta`, in execution order.
    pub fn setter_names(&self, meta: &EntityMetadata) -> Vec<String> {
        self.resolve(meta)
            .setters
            .iter()
            .map(|&i| self.setters[i].name().to_string())
            .collect()
    }

    /// Run every applicable setter on `record`.
    pub fn apply_setters(
        &self,
        kind: WriteKind,
        meta: &EntityMetadata,
        record: &mut Record,
        ctx: &RequestContext,
    ) -> QueryResult<()> {
        for &i in &self.resolve(meta).setters {
            self.setters[i].execute(kind, meta, record, ctx)?;
        }
        Ok(())
    }

    /// Combined scope filter for `meta`, if any strategy restricts it.
    pub fn scope_filter(
        &self,
        meta: &EntityMetadata,
        ctx: &RequestContext,
    ) -> QueryResult<Option<Filter>> {
        let mut combined: Option<Filter> = None;
        for &i in &self.resolve(meta).scopes {
            if let Some(filter) = self.scopes[i].apply(meta, ctx)? {
                combined = Some(match combined {
                    Some(existing) => existing.merge(filter),
                    None => filter,
                });
            }
        }
        Ok(combined)
    }
}

fn tenant_column(meta: &EntityMetadata) -> Option<&str> {
    meta.capabilities.iter().find_map(|c| match c {
        Capability::TenantScoped { column } => Some(column.as_str()),
        _ => None,
    })
}

/// Restricts tenant-scoped entities to the caller's tenant.
pub struct TenantScopeFilter;

impl ScopeFilter for TenantScopeFilter {
    fn name(&self) -> &str {
        "tenant"
    }

    fn supports(&self, meta: &EntityMetadata) -> bool {
        tenant_column(meta).is_some()
    }

    fn apply(&self, meta: &EntityMetadata, ctx: &RequestContext) -> QueryResult<Option<Filter>> {
        if ctx.system {
            return Ok(None);
        }
        let Some(column) = tenant_column(meta) else {
            return Ok(None);
        };
        let tenant = ctx.require_tenant()?;
        Ok(Some(Filter::new().field(column, "eq", tenant)))
    }
}

/// Stamps the tenant on create and strips it from updates.
pub struct TenantSetter;

impl Setter for TenantSetter {
    fn name(&self) -> &str {
        "tenant"
    }

    fn supports(&self, meta: &EntityMetadata) -> bool {
        tenant_column(meta).is_some()
    }

    fn execute(
        &self,
        kind: WriteKind,
        meta: &EntityMetadata,
        record: &mut Record,
        ctx: &RequestContext,
    ) -> QueryResult<()> {
        let Some(column) = tenant_column(meta) else {
            return Ok(());
        };
        match kind {
            WriteKind::Create => {
                if ctx.system && ctx.tenant_id.is_none() {
                    return Ok(());
                }
                record.insert(column.to_string(), Value::from(ctx.require_tenant()?));
            }
            WriteKind::Update => {
                record.remove(column);
            }
        }
        Ok(())
    }
}

/// Fills the owning user on create when the payload leaves it empty.
pub struct OwnerSetter;

fn owner_column(meta: &EntityMetadata) -> Option<&str> {
    meta.capabilities.iter().find_map(|c| match c {
        Capability::Owned { column } => Some(column.as_str()),
        _ => None,
    })
}

impl Setter for OwnerSetter {
    fn name(&self) -> &str {
        "owner"
    }

    fn supports(&self, meta: &EntityMetadata) -> bool {
        owner_column(meta).is_some()
    }

    fn execute(
        &self,
        kind: WriteKind,
        meta: &EntityMetadata,
        record: &mut Record,
        ctx: &RequestContext,
    ) -> QueryResult<()> {
        if kind != WriteKind::Create {
            return Ok(());
        }
        let (Some(column), Some(user_id)) = (owner_column(meta), ctx.user_id) else {
            return Ok(());
        };
        let missing = record.get(column).is_none_or(Value::is_null);
        if missing {
            record.insert(column.to_string(), Value::from(user_id));
        }
        Ok(())
    }
}

/// Maintains unix-second created/changed stamps.
pub struct TimestampSetter;

impl Setter for TimestampSetter {
    fn name(&self) -> &str {
        "timestamps"
    }

    fn supports(&self, meta: &EntityMetadata) -> bool {
        meta.has_capability(|c| matches!(c, Capability::Timestamps { .. }))
    }

    fn execute(
        &self,
        kind: WriteKind,
        meta: &EntityMetadata,
        record: &mut Record,
        _ctx: &RequestContext,
    ) -> QueryResult<()> {
        let Some((created, changed)) = meta.capabilities.iter().find_map(|c| match c {
            Capability::Timestamps { created, changed } => Some((created, changed)),
            _ => None,
        }) else {
            return Ok(());
        };
        let now = chrono::Utc::now().timestamp();
        match kind {
            WriteKind::Create => {
                record.insert(created.clone(), Value::from(now));
            }
            WriteKind::Update => {
                record.remove(created);
            }
        }
        record.insert(changed.clone(), Value::from(now));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::query::metadata::ColumnType;
    use serde_json::json;

    fn scoped() -> EntityMetadata {
        EntityMetadata::new("Client", "client")
            .generated_id("id")
            .column("tenant_id", ColumnType::Integer)
            .column("name", ColumnType::Text)
            .column("created", ColumnType::Integer)
            .column("changed", ColumnType::Integer)
            .capability(Capability::TenantScoped {
                column: "tenant_id".to_string(),
            })
            .capability(Capability::Timestamps {
                created: "created".to_string(),
                changed: "changed".to_string(),
            })
    }

    fn global() -> EntityMetadata {
        EntityMetadata::new("Permission", "permission")
            .generated_id("id")
            .column("name", ColumnType::Text)
    }

    #[test]
    fn resolution_follows_capabilities() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.setter_names(&scoped()), vec!["tenant", "timestamps"]);
        assert!(registry.setter_names(&global()).is_empty());
    }

    #[test]
    fn tenant_scope_requires_tenant() {
        let registry = StrategyRegistry::with_defaults();
        let filter = registry
            .scope_filter(&scoped(), &RequestContext::for_tenant(4))
            .unwrap()
            .unwrap();
        assert_eq!(
            serde_json::to_value(&filter).unwrap(),
            json!({"tenant_id": {"eq": 4}})
        );

        assert!(matches!(
            registry.scope_filter(&scoped(), &RequestContext::default()),
            Err(QueryError::MissingContext("tenant"))
        ));
        assert!(registry
            .scope_filter(&scoped(), &RequestContext::system())
            .unwrap()
            .is_none());
        assert!(registry
            .scope_filter(&global(), &RequestContext::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn tenant_is_stamped_on_create_and_stripped_on_update() {
        let registry = StrategyRegistry::with_defaults();
        let ctx = RequestContext::for_tenant(7);

        let mut record = json!({"name": "Acme", "tenant_id": 99}).as_object().unwrap().clone();
        registry
            .apply_setters(WriteKind::Create, &scoped(), &mut record, &ctx)
            .unwrap();
        assert_eq!(record.get("tenant_id"), Some(&json!(7)));
        assert!(record.get("created").is_some());

        let mut update = json!({"tenant_id": 99}).as_object().unwrap().clone();
        registry
            .apply_setters(WriteKind::Update, &scoped(), &mut update, &ctx)
            .unwrap();
        assert!(!update.contains_key("tenant_id"));
        assert!(!update.contains_key("created"));
        assert!(update.contains_key("changed"));
    }

    #[test]
    fn owner_is_filled_only_when_missing() {
        let meta = global()
            .column("user_id", ColumnType::Integer)
            .capability(Capability::Owned {
                column: "user_id".to_string(),
            });
        let registry = StrategyRegistry::with_defaults();
        let ctx = RequestContext::for_user(1, 5);

        let mut record = Record::new();
        registry
            .apply_setters(WriteKind::Create, &meta, &mut record, &ctx)
            .unwrap();
        assert_eq!(record.get("user_id"), Some(&json!(5)));

        let mut record = json!({"user_id": 8}).as_object().unwrap().clone();
        registry
            .apply_setters(WriteKind::Create, &meta, &mut record, &ctx)
            .unwrap();
        assert_eq!(record.get("user_id"), Some(&json!(8)));
    }

    #[test]
    fn registering_invalidates_the_cache() {
        struct Marker;
        impl Setter for Marker {
            fn name(&self) -> &str {
                "marker"
            }
            fn supports(&self, _meta: &EntityMetadata) -> bool {
                true
            }
            fn execute(
                &self,
                _kind: WriteKind,
                _meta: &EntityMetadata,
                record: &mut Record,
                _ctx: &RequestContext,
            ) -> QueryResult<()> {
                record.insert("marked".to_string(), json!(true));
                Ok(())
            }
        }

        let mut registry = StrategyRegistry::new();
        assert!(registry.setter_names(&global()).is_empty());
        registry.register_setter(Arc::new(Marker));
        assert_eq!(registry.setter_names(&global()), vec!["marker"]);
    }
}
