//! Project model.

use serde::{Deserialize, Serialize};

use super::columns::{CHANGED, CREATED, DELETED_AT, ID, TENANT_ID};
use super::{Client, TimeEntry, default_true};
use crate::query::{Capability, ColumnType, Entity, EntityMetadata, RelationMetadata};

/// Work for a client that time is logged against. Soft deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    #[serde(default)]
    pub client_id: Option<i64>,
    pub name: String,
    #[serde(default = "default_true")]
    pub billable: bool,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub changed: Option<i64>,
    #[serde(default)]
    pub deleted_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<Box<Client>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_entries: Option<Vec<TimeEntry>>,
}

impl Entity for Project {
    const NAME: &'static str = "Project";
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            tenant_id: None,
            client_id: None,
            name: name.into(),
            billable: true,
            hourly_rate: None,
            created: None,
            changed: None,
            deleted_at: None,
            client: None,
            time_entries: None,
        }
    }

    pub fn metadata() -> EntityMetadata {
        EntityMetadata::new(Self::NAME, "project")
            .generated_id(ID)
            .column(TENANT_ID, ColumnType::Integer)
            .column("client_id", ColumnType::Integer)
            .column("name", ColumnType::Text)
            .column("billable", ColumnType::Boolean)
            .column("hourly_rate", ColumnType::Float)
            .column(CREATED, ColumnType::Integer)
            .column(CHANGED, ColumnType::Integer)
            .soft_delete(DELETED_AT)
            .relation(RelationMetadata::many_to_one("client", Client::NAME, "client_id"))
            .relation(RelationMetadata::one_to_many(
                "time_entries",
                TimeEntry::NAME,
                "project_id",
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
