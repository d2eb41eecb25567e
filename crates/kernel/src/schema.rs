//! The time-tracking schema.

use crate::error::QueryResult;
use crate::models::{Client, Permission, Project, Role, Tag, Tenant, TimeEntry, User};
use crate::query::Schema;

/// Every domain entity, validated.
pub fn time_tracking() -> QueryResult<Schema> {
    let schema = Schema::new()
        .register(Tenant::metadata())
        .register(User::metadata())
        .register(Role::metadata())
        .register(Permission::metadata())
        .register(Client::metadata())
        .register(Project::metadata())
        .register(Tag::metadata())
        .register(TimeEntry::metadata());
    schema.validate()?;
    Ok(schema)
}
