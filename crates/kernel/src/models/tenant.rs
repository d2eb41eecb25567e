//! Tenant model.

use serde::{Deserialize, Serialize};

use super::columns::{CHANGED, CREATED, ID};
use crate::query::{Capability, ColumnType, Entity, EntityMetadata};

/// A customer account; every other domain row belongs to one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub changed: Option<i64>,
}

impl Entity for Tenant {
    const NAME: &'static str = "Tenant";
}

impl Tenant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn metadata() -> EntityMetadata {
        EntityMetadata::new(Self::NAME, "tenant")
            .generated_id(ID)
            .column("name", ColumnType::Text)
            .column(CREATED, ColumnType::Integer)
            .column(CHANGED, ColumnType::Integer)
            .capability(Capability::Timestamps {
                created: CREATED.to_string(),
                changed: CHANGED.to_string(),
            })
    }
}
