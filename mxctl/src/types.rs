//! Common type definitions and permission system types.
//!
//! - Type aliases for entity IDs ([`UserId`], [`DomainId`], [`MailboxId`])
//! - [`Resource`], [`Operation`] and [`Permission`], used to describe authorization failures

use std::fmt;

// Type aliases for IDs
pub type UserId = i64;
pub type DomainId = i64;
pub type MailboxId = i64;

// Operations that can be performed on resources
// *-All means unrestricted access, *-Own means restricted to own resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ReadAll,
    ReadOwn,
    UpdateAll,
    UpdateOwn,
    SystemAccess,
}

// Resources that can be operated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Dashboard,
    ApiTokens,
    Parameters,
    Information,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Dashboard => write!(f, "dashboard"),
            Resource::ApiTokens => write!(f, "API access"),
            Resource::Parameters => write!(f, "global parameters"),
            Resource::Information => write!(f, "instance information"),
        }
    }
}

// Permission types for authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    /// Simple permission: (Resource, Operation)
    Allow(Resource, Operation),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::ReadAll | Operation::ReadOwn => write!(f, "Read"),
            Operation::UpdateAll | Operation::UpdateOwn => write!(f, "Update"),
            Operation::SystemAccess => write!(f, "Access"),
        }
    }
}
