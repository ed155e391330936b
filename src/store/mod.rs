//! Relational store boundary: identity records (principals, roles), the
//! permission matrix and the gym records in [`members`].
//!
//! The authorization core only issues identity-scoped and
//! `(resource, role)`-scoped queries through these traits.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::permission::Action;

#[cfg(test)]
pub(crate) mod memory;
pub mod members;
pub mod postgres;

pub use members::{
    EnrolledMember, Member, MemberProfile, MemberStore, Plan, Subscription, SubscriptionTerms,
};
pub use postgres::PgStore;

/// Durable identity of a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Principal {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub surname: String,
    pub role_id: i64,
}

/// Principal plus its password hash; never serialized.
#[derive(Clone)]
pub struct Credentials {
    pub principal: Principal,
    pub password_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Role {
    pub id: i64,
    pub name: String,
}

/// Stored per-action levels of one permission row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PermissionLevels {
    #[serde(default)]
    pub create: i16,
    #[serde(default)]
    pub read: i16,
    #[serde(default)]
    pub update: i16,
    #[serde(default)]
    pub delete: i16,
}

impl PermissionLevels {
    /// Highest level for every action.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            create: 1,
            read: 2,
            update: 2,
            delete: 2,
        }
    }

    #[must_use]
    pub const fn level(&self, action: Action) -> i16 {
        match action {
            Action::Create => self.create,
            Action::Read => self.read,
            Action::Update => self.update,
            Action::Delete => self.delete,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Permission {
    pub id: i64,
    pub resource: String,
    pub role_id: i64,
    #[serde(flatten)]
    pub levels: PermissionLevels,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPermission {
    pub resource: String,
    pub role_id: i64,
    pub levels: PermissionLevels,
}

pub struct NewPrincipal {
    pub email: String,
    pub name: String,
    pub surname: String,
    pub role_id: i64,
    pub password_hash: String,
}

/// Partial update; `None` keeps the stored value.
#[derive(Default)]
pub struct PrincipalUpdate {
    pub email: Option<String>,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub role_id: Option<i64>,
    pub password_hash: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PermissionFilter {
    #[default]
    All,
    Role(i64),
    Resource(String),
}

impl PermissionFilter {
    #[must_use]
    pub fn admits(&self, permission: &Permission) -> bool {
        match self {
            Self::All => true,
            Self::Role(role_id) => permission.role_id == *role_id,
            Self::Resource(resource) => permission.resource == *resource,
        }
    }
}

/// Outcome of an insert or update guarded by unique constraints.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    Written(T),
    NotFound,
    Conflict,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// Still referenced by another record.
    InUse,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn principal(&self, id: i64) -> Result<Option<Principal>>;

    async fn credentials_by_email(&self, email: &str) -> Result<Option<Credentials>>;

    /// Every principal whose role is not `excluded_role`.
    async fn list_principals(&self, excluded_role: i64) -> Result<Vec<Principal>>;

    async fn insert_principal(&self, principal: NewPrincipal) -> Result<WriteOutcome<Principal>>;

    async fn update_principal(
        &self,
        id: i64,
        update: PrincipalUpdate,
    ) -> Result<WriteOutcome<Principal>>;

    async fn delete_principal(&self, id: i64) -> Result<DeleteOutcome>;

    async fn role(&self, id: i64) -> Result<Option<Role>>;

    async fn role_by_name(&self, name: &str) -> Result<Option<Role>>;

    async fn list_roles(&self) -> Result<Vec<Role>>;

    async fn insert_role(&self, name: &str) -> Result<WriteOutcome<Role>>;

    async fn rename_role(&self, id: i64, name: &str) -> Result<WriteOutcome<Role>>;

    /// Permission rows of the role go with it.
    async fn delete_role(&self, id: i64) -> Result<DeleteOutcome>;

    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn insert_permission(&self, permission: NewPermission)
        -> Result<WriteOutcome<Permission>>;

    async fn permission(&self, id: i64) -> Result<Option<Permission>>;

    async fn update_permission(
        &self,
        id: i64,
        levels: PermissionLevels,
    ) -> Result<Option<Permission>>;

    async fn delete_permission(&self, id: i64) -> Result<bool>;

    async fn list_permissions(&self, filter: &PermissionFilter) -> Result<Vec<Permission>>;

    async fn find_permission(&self, resource: &str, role_id: i64) -> Result<Option<Permission>>;

    /// Insert all rows in one transaction, skipping rows whose
    /// `(resource, role_id)` already exists. Returns the rows written.
    async fn insert_permissions_atomic(&self, permissions: &[NewPermission]) -> Result<u64>;

    /// Names of every table in the relational store.
    async fn tables(&self) -> Result<Vec<String>>;
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23503"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    #[test]
    fn sqlstate_classification() {
        let unique = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&unique));
        assert!(!is_foreign_key_violation(&unique));

        let foreign = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23503"),
        }));
        assert!(is_foreign_key_violation(&foreign));

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn full_levels_grant_every_action() {
        let levels = PermissionLevels::full();
        assert_eq!(levels.level(Action::Create), 1);
        assert_eq!(levels.level(Action::Read), 2);
        assert_eq!(levels.level(Action::Update), 2);
        assert_eq!(levels.level(Action::Delete), 2);
    }

    #[test]
    fn filter_admits_matching_rows() {
        let permission = Permission {
            id: 1,
            resource: "members".to_string(),
            role_id: 3,
            levels: PermissionLevels::default(),
        };
        assert!(PermissionFilter::All.admits(&permission));
        assert!(PermissionFilter::Role(3).admits(&permission));
        assert!(!PermissionFilter::Role(4).admits(&permission));
        assert!(PermissionFilter::Resource("members".to_string()).admits(&permission));
        assert!(!PermissionFilter::Resource("users".to_string()).admits(&permission));
    }
}
