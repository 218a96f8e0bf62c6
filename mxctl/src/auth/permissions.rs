//! Role checks used by handlers.

use crate::{
    api::models::users::{CurrentUser, Role},
    errors::{Error, Result},
    types::{Operation, Permission, Resource},
};

/// Allow only the listed roles to perform `operation` on `resource`.
pub fn require_role(user: &CurrentUser, allowed: &[Role], resource: Resource, operation: Operation) -> Result<()> {
    if allowed.contains(&user.role) {
        return Ok(());
    }
    Err(Error::InsufficientPermissions {
        required: Permission::Allow(resource, operation),
        action: operation,
        resource: resource.to_string(),
    })
}

pub fn require_admin(user: &CurrentUser, resource: Resource, operation: Operation) -> Result<()> {
    require_role(user, &[Role::SuperAdmin, Role::DomainAdmin], resource, operation)
}

pub fn require_super_admin(user: &CurrentUser, resource: Resource, operation: Operation) -> Result<()> {
    require_role(user, &[Role::SuperAdmin], resource, operation)
}
