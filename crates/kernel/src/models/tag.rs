//! Tag model.

use serde::{Deserialize, Serialize};

use super::columns::{ID, TENANT_ID};
use super::TimeEntry;
use crate::query::{Capability, ColumnType, Entity, EntityMetadata, RelationMetadata};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_entries: Option<Vec<TimeEntry>>,
}

impl Entity for Tag {
    const NAME: &'static str = "Tag";
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn metadata() -> EntityMetadata {
        EntityMetadata::new(Self::NAME, "tag")
            .generated_id(ID)
            .column(TENANT_ID, ColumnType::Integer)
            .column("name", ColumnType::Text)
            .column("color", ColumnType::Text)
            .relation(RelationMetadata::many_to_many(
                "time_entries",
                TimeEntry::NAME,
                "time_entry_tag",
                "tag_id",
                "time_entry_id",
            ))
            .capability(Capability::TenantScoped {
                column: TENANT_ID.to_string(),
            })
    }
}
