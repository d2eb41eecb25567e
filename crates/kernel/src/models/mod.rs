//! Time-tracking domain models.
//!
//! Each model is a serde struct implementing [`Entity`](crate::query::Entity)
//! plus the metadata that describes its table to the query engine.
//! Relation fields are `None` unless loaded or written.

pub mod client;
pub mod project;
pub mod role;
pub mod tag;
pub mod tenant;
pub mod time_entry;
pub mod user;

pub use client::Client;
pub use project::Project;
pub use role::{Permission, Role};
pub use tag::Tag;
pub use tenant::Tenant;
pub use time_entry::TimeEntry;
pub use user::User;

/// Column names shared by the domain tables.
pub mod columns {
    pub const ID: &str = "id";
    pub const TENANT_ID: &str = "tenant_id";
    pub const CREATED: &str = "created";
    pub const CHANGED: &str = "changed";
    pub const DELETED_AT: &str = "deleted_at";
}

pub(crate) fn default_true() -> bool {
    true
}
