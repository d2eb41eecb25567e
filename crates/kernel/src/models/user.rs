//! User model.

use serde::{Deserialize, Serialize};

use super::columns::{CHANGED, CREATED, ID, TENANT_ID};
use super::{Role, default_true};
use crate::query::{Capability, ColumnType, Entity, EntityMetadata, RelationMetadata};

/// A person logging time within a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    pub name: String,
    pub email: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub changed: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<Role>>,
}

impl Entity for User {
    const NAME: &'static str = "User";
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: None,
            tenant_id: None,
            name: name.into(),
            email: email.into(),
            is_active: true,
            created: None,
            changed: None,
            roles: None,
        }
    }

    pub fn metadata() -> EntityMetadata {
        EntityMetadata::new(Self::NAME, "users")
            .generated_id(ID)
            .column(TENANT_ID, ColumnType::Integer)
            .column("name", ColumnType::Text)
            .column("email", ColumnType::Text)
            .column("is_active", ColumnType::Boolean)
            .column(CREATED, ColumnType::Integer)
            .column(CHANGED, ColumnType::Integer)
            .relation(RelationMetadata::many_to_many(
                "roles",
                Role::NAME,
                "user_role",
                "user_id",
                "role_id",
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
