//! Per-request caller identity, passed explicitly to every service call.

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// Who is asking. Scope filters and setters read from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub tenant_id: Option<i64>,
    pub user_id: Option<i64>,
    /// Bypass tenant scoping (migrations, operator tooling).
    #[serde(default)]
    pub system: bool,
}

impl RequestContext {
    /// A caller acting for `user_id` inside `tenant_id`.
    pub fn for_user(tenant_id: i64, user_id: i64) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            user_id: Some(user_id),
            system: false,
        }
    }

    /// A tenant-bound caller without a user (background jobs).
    pub fn for_tenant(tenant_id: i64) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Self::default()
        }
    }

    /// Unscoped access.
    pub fn system() -> Self {
        Self {
            system: true,
            ..Self::default()
        }
    }

    pub fn require_tenant(&self) -> QueryResult<i64> {
        self.tenant_id.ok_or(QueryError::MissingContext("tenant"))
    }
}
