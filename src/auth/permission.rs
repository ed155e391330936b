//! Permission matrix: `(resource, role)` rows with one stored level per action.
//!
//! Stored levels stay numeric. At the decision point they become an
//! [`AccessLevel`] whose meaning depends on the [`Action`]:
//!
//! | stored | create   | read / update / delete |
//! |--------|----------|------------------------|
//! | 0      | `Denied` | `Denied`               |
//! | 1      | `Full`   | `Own`                  |
//! | 2      | invalid  | `Full`                 |
//!
//! Rows written by the earlier gym backend use the opposite order for read,
//! update and delete (1 reached every record, 2 only the caller's own) and
//! its bootstrap stored 1 everywhere. Such rows are not wire compatible:
//! swap 1 and 2 in `read_level`, `update_level` and `delete_level` before
//! serving them, or `Own` grants silently become `Full` and vice versa.

use anyhow::Context;
use axum::http::Method;
use serde::Serialize;
use std::{collections::BTreeSet, fmt, sync::Arc};
use thiserror::Error;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::store::{
    IdentityStore, NewPermission, Permission, PermissionFilter, PermissionLevels,
    PermissionStore, WriteOutcome,
};

/// Tables that exist in the store but are never governed.
const UNGOVERNED_TABLES: [&str; 2] = ["session_cache", "_sqlx_migrations"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Self; 4] = [Self::Create, Self::Read, Self::Update, Self::Delete];

    /// Fixed verb table; any other verb has no action.
    #[must_use]
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::POST => Some(Self::Create),
            Method::GET => Some(Self::Read),
            Method::PUT | Method::PATCH => Some(Self::Update),
            Method::DELETE => Some(Self::Delete),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Highest storable level for this action.
    #[must_use]
    pub const fn max_level(self) -> i16 {
        match self {
            Self::Create => 1,
            Self::Read | Self::Update | Self::Delete => 2,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Denied,
    /// Only records owned by the acting principal.
    Own,
    /// Any record of the resource.
    Full,
}

impl AccessLevel {
    /// Interpret a stored level for `action`. Values outside the action's
    /// range deny.
    #[must_use]
    pub fn from_stored(action: Action, stored: i16) -> Self {
        match (action, stored) {
            (_, 0) => Self::Denied,
            (Action::Create, 1) => Self::Full,
            (_, 1) => Self::Own,
            (Action::Read | Action::Update | Action::Delete, 2) => Self::Full,
            _ => {
                warn!(%action, stored, "Stored permission level out of range, denying");
                Self::Denied
            }
        }
    }

    #[must_use]
    pub fn is_granted(self) -> bool {
        self != Self::Denied
    }
}

/// Resolved permission attached to an authorized request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Grant {
    pub action: Action,
    pub level: AccessLevel,
    /// Raw column value the level was derived from.
    pub stored: i16,
}

impl Grant {
    #[must_use]
    pub fn new(action: Action, stored: i16) -> Self {
        Self {
            action,
            level: AccessLevel::from_stored(action, stored),
            stored,
        }
    }

    #[must_use]
    pub fn is_granted(&self) -> bool {
        self.level.is_granted()
    }

    /// Whether the grant reaches a record owned by `owner_id` when `actor_id`
    /// is acting.
    #[must_use]
    pub fn covers(&self, owner_id: i64, actor_id: i64) -> bool {
        match self.level {
            AccessLevel::Full => true,
            AccessLevel::Own => owner_id == actor_id,
            AccessLevel::Denied => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("role {0} does not exist")]
    UnknownRole(i64),
    #[error("resource is required")]
    MissingResource,
    #[error("resource {0:?} is not governed")]
    UnknownResource(String),
    #[error("{action} level {value} is out of range 0..={}", .action.max_level())]
    LevelOutOfRange { action: Action, value: i16 },
    #[error("permission for {resource:?} and role {role_id} already exists")]
    Duplicate { resource: String, role_id: i64 },
    #[error("permission {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Reject levels outside each action's range.
///
/// # Errors
/// [`PermissionError::LevelOutOfRange`] for the first offending action.
pub fn validate_levels(levels: &PermissionLevels) -> Result<(), PermissionError> {
    for action in Action::ALL {
        let value = levels.level(action);
        if !(0..=action.max_level()).contains(&value) {
            return Err(PermissionError::LevelOutOfRange { action, value });
        }
    }
    Ok(())
}

pub struct PermissionService {
    permissions: Arc<dyn PermissionStore>,
    identities: Arc<dyn IdentityStore>,
}

impl PermissionService {
    pub fn new(permissions: Arc<dyn PermissionStore>, identities: Arc<dyn IdentityStore>) -> Self {
        Self {
            permissions,
            identities,
        }
    }

    /// Validate and persist a new row.
    ///
    /// # Errors
    /// Validation failures, duplicates and store errors.
    #[instrument(skip(self, permission), fields(resource = %permission.resource, role_id = permission.role_id))]
    pub async fn create(&self, permission: NewPermission) -> Result<Permission, PermissionError> {
        validate_levels(&permission.levels)?;
        if permission.resource.trim().is_empty() {
            return Err(PermissionError::MissingResource);
        }
        if !self.is_governed(&permission.resource).await? {
            return Err(PermissionError::UnknownResource(permission.resource));
        }
        if self.identities.role(permission.role_id).await?.is_none() {
            return Err(PermissionError::UnknownRole(permission.role_id));
        }
        if self.exists(&permission.resource, permission.role_id).await? {
            return Err(PermissionError::Duplicate {
                resource: permission.resource,
                role_id: permission.role_id,
            });
        }

        let resource = permission.resource.clone();
        let role_id = permission.role_id;
        match self.permissions.insert_permission(permission).await? {
            WriteOutcome::Written(created) => {
                info!(id = created.id, "Permission created");
                Ok(created)
            }
            // Lost a race against a concurrent insert, or the role vanished.
            WriteOutcome::Conflict => Err(PermissionError::Duplicate { resource, role_id }),
            WriteOutcome::NotFound => Err(PermissionError::UnknownRole(role_id)),
        }
    }

    /// # Errors
    /// [`PermissionError::NotFound`] when no row has this id.
    pub async fn get(&self, id: i64) -> Result<Permission, PermissionError> {
        self.permissions
            .permission(id)
            .await?
            .ok_or(PermissionError::NotFound(id))
    }

    /// Replace the levels of an existing row.
    ///
    /// # Errors
    /// Out-of-range levels, unknown ids and store errors.
    pub async fn update(
        &self,
        id: i64,
        levels: PermissionLevels,
    ) -> Result<Permission, PermissionError> {
        validate_levels(&levels)?;
        self.permissions
            .update_permission(id, levels)
            .await?
            .ok_or(PermissionError::NotFound(id))
    }

    /// # Errors
    /// [`PermissionError::NotFound`] when no row has this id.
    pub async fn delete(&self, id: i64) -> Result<(), PermissionError> {
        if self.permissions.delete_permission(id).await? {
            Ok(())
        } else {
            Err(PermissionError::NotFound(id))
        }
    }

    /// # Errors
    /// Store errors.
    pub async fn list(&self, filter: &PermissionFilter) -> Result<Vec<Permission>, PermissionError> {
        Ok(self.permissions.list_permissions(filter).await?)
    }

    /// # Errors
    /// Store errors.
    pub async fn list_by_role(&self, role_id: i64) -> Result<Vec<Permission>, PermissionError> {
        self.list(&PermissionFilter::Role(role_id)).await
    }

    /// # Errors
    /// Store errors.
    pub async fn list_by_resource(
        &self,
        resource: &str,
    ) -> Result<Vec<Permission>, PermissionError> {
        self.list(&PermissionFilter::Resource(resource.to_string()))
            .await
    }

    /// # Errors
    /// Store errors.
    pub async fn exists(&self, resource: &str, role_id: i64) -> Result<bool, PermissionError> {
        Ok(self
            .permissions
            .find_permission(resource, role_id)
            .await?
            .is_some())
    }

    /// Level granted to `role_id` for `action` on `resource`. A missing row
    /// grants nothing.
    ///
    /// # Errors
    /// Store errors only; absence is not an error.
    pub async fn has_permission(
        &self,
        resource: &str,
        role_id: i64,
        action: Action,
    ) -> anyhow::Result<Grant> {
        let row = self
            .permissions
            .find_permission(resource, role_id)
            .await
            .context("failed to look up permission")?;
        let stored = row.map_or(0, |permission| permission.levels.level(action));
        Ok(Grant::new(action, stored))
    }

    /// Every governed resource name.
    ///
    /// # Errors
    /// Store errors.
    pub async fn list_resources(&self) -> anyhow::Result<BTreeSet<String>> {
        let tables = self
            .permissions
            .tables()
            .await
            .context("failed to list tables")?;
        Ok(tables
            .into_iter()
            .filter(|table| !UNGOVERNED_TABLES.contains(&table.as_str()))
            .collect())
    }

    /// # Errors
    /// Store errors.
    pub async fn is_governed(&self, resource: &str) -> anyhow::Result<bool> {
        Ok(self.list_resources().await?.contains(resource))
    }

    /// Ensure the system role holds a full-access row for every governed
    /// resource. Only missing rows are written, in one transaction.
    ///
    /// # Errors
    /// Store errors; nothing is written when the transaction fails.
    #[instrument(skip(self))]
    pub async fn bootstrap_system_permissions(&self, system_role_id: i64) -> anyhow::Result<u64> {
        let existing: BTreeSet<String> = self
            .permissions
            .list_permissions(&PermissionFilter::Role(system_role_id))
            .await?
            .into_iter()
            .map(|permission| permission.resource)
            .collect();

        let missing: Vec<NewPermission> = self
            .list_resources()
            .await?
            .into_iter()
            .filter(|resource| !existing.contains(resource))
            .map(|resource| NewPermission {
                resource,
                role_id: system_role_id,
                levels: PermissionLevels::full(),
            })
            .collect();

        if missing.is_empty() {
            return Ok(0);
        }

        let written = self
            .permissions
            .insert_permissions_atomic(&missing)
            .await
            .context("failed to bootstrap system permissions")?;
        info!(written, "System permissions bootstrapped");
        Ok(written)
    }
}
