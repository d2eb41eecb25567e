//! Client model.

use serde::{Deserialize, Serialize};

use super::columns::{CHANGED, CREATED, DELETED_AT, ID, TENANT_ID};
use super::Project;
use crate::query::{Capability, ColumnType, Entity, EntityMetadata, RelationMetadata};

/// A billed customer of the tenant. Soft deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Client {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub changed: Option<i64>,
    #[serde(default)]
    pub deleted_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<Project>>,
}

impl Entity for Client {
    const NAME: &'static str = "Client";
}

impl Client {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn metadata() -> EntityMetadata {
        EntityMetadata::new(Self::NAME, "client")
            .generated_id(ID)
            .column(TENANT_ID, ColumnType::Integer)
            .column("name", ColumnType::Text)
            .column("email", ColumnType::Text)
            .column(CREATED, ColumnType::Integer)
            .column(CHANGED, ColumnType::Integer)
            .soft_delete(DELETED_AT)
            .relation(RelationMetadata::one_to_many(
                "projects",
                Project::NAME,
                "client_id",
            ))
            .capability(Capability::TenantScoped {
                column: TENANT_ID.to_string(),
            })
            .capability(Capability::Timestamps {
                created: CREATED.to_string(),
                changed: CHANGED.to_string(),
            })
            .capability(Capability::DomainEvents)
    }
}
