//! Time entry model.

use serde::{Deserialize, Serialize};

use super::columns::{CHANGED, CREATED, ID, TENANT_ID};
use super::{Project, Tag, User, default_true};
use crate::query::{Capability, ColumnType, Entity, EntityMetadata, RelationMetadata};

/// A span of work logged by a user against a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    /// Owning user; stamped from the request context when empty.
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    /// Unix seconds.
    pub started_at: i64,
    /// Seconds.
    #[serde(default)]
    pub duration: i64,
    #[serde(default = "default_true")]
    pub billable: bool,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub changed: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Box<User>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Box<Project>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
}

impl Entity for TimeEntry {
    const NAME: &'static str = "TimeEntry";
}

impl TimeEntry {
    pub fn new(started_at: i64, duration: i64) -> Self {
        Self {
            id: None,
            tenant_id: None,
            user_id: None,
            project_id: None,
            description: None,
            started_at,
            duration,
            billable: true,
            created: None,
            changed: None,
            user: None,
            project: None,
            tags: None,
        }
    }

    pub fn metadata() -> EntityMetadata {
        EntityMetadata::new(Self::NAME, "time_entry")
            .generated_id(ID)
            .column(TENANT_ID, ColumnType::Integer)
            .column("user_id", ColumnType::Integer)
            .column("project_id", ColumnType::Integer)
            .column("description", ColumnType::Text)
            .column("started_at", ColumnType::Integer)
            .column("duration", ColumnType::Integer)
            .column("billable", ColumnType::Boolean)
            .column(CREATED, ColumnType::Integer)
            .column(CHANGED, ColumnType::Integer)
            .relation(RelationMetadata::many_to_one("user", User::NAME, "user_id"))
            .relation(RelationMetadata::many_to_one("project", Project::NAME, "project_id"))
            .relation(RelationMetadata::many_to_many(
                "tags",
                Tag::NAME,
                "time_entry_tag",
                "time_entry_id",
                "tag_id",
            ))
            .capability(Capability::TenantScoped {
                column: TENANT_ID.to_string(),
            })
            .capability(Capability::Owned {
                column: "user_id".to_string(),
            })
            .capability(Capability::Timestamps {
                created: CREATED.to_string(),
                changed: CHANGED.to_string(),
            })
            .capability(Capability::DomainEvents)
    }
}
