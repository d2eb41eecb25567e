//! Role and permission models.

use serde::{Deserialize, Serialize};

use super::columns::{CHANGED, CREATED, ID, TENANT_ID};
use crate::query::{Capability, ColumnType, Entity, EntityMetadata, RelationMetadata};

/// Well-known permission names.
pub mod well_known {
    pub const MANAGE_CLIENTS: &str = "manage clients";
    pub const MANAGE_PROJECTS: &str = "manage projects";
    pub const LOG_TIME: &str = "log time";
    pub const VIEW_REPORTS: &str = "view reports";

    pub const ALL: [&str; 4] = [MANAGE_CLIENTS, MANAGE_PROJECTS, LOG_TIME, VIEW_REPORTS];
}

/// A global permission. Permissions are shared by every tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Entity for Permission {
    const NAME: &'static str = "Permission";
}

impl Permission {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn metadata() -> EntityMetadata {
        EntityMetadata::new(Self::NAME, "permission")
            .generated_id(ID)
            .column("name", ColumnType::Text)
            .column("description", ColumnType::Text)
    }
}

/// Tenant-defined role granting a set of permissions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub changed: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<Permission>>,
}

impl Entity for Role {
    const NAME: &'static str = "Role";
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn metadata() -> EntityMetadata {
        EntityMetadata::new(Self::NAME, "role")
            .generated_id(ID)
            .column(TENANT_ID, ColumnType::Integer)
            .column("name", ColumnType::Text)
            .column(CREATED, ColumnType::Integer)
            .column(CHANGED, ColumnType::Integer)
            .relation(RelationMetadata::many_to_many(
                "permissions",
                Permission::NAME,
                "role_permission",
                "role_id",
                "permission_id",
            ))
            .capability(Capability::TenantScoped {
                column: TENANT_ID.to_string(),
            })
            .capability(Capability::Timestamps {
                created: CREATED.to_string(),
                changed: CHANGED.to_string(),
            })
    }
}
