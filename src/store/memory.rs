//! In-process relational store for tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use super::{
    Credentials, DeleteOutcome, EnrolledMember, IdentityStore, Member, MemberProfile, MemberStore,
    NewPermission, NewPrincipal, Permission, PermissionFilter, PermissionLevels, PermissionStore,
    Principal, PrincipalUpdate, Role, Subscription, SubscriptionTerms, WriteOutcome,
};

const TABLES: [&str; 7] = [
    "members",
    "permissions",
    "roles",
    "session_cache",
    "subscriptions",
    "users",
    "_sqlx_migrations",
];

#[derive(Default)]
struct State {
    next_id: i64,
    roles: BTreeMap<i64, Role>,
    principals: BTreeMap<i64, Credentials>,
    permissions: BTreeMap<i64, Permission>,
    members: BTreeMap<i64, Member>,
    subscriptions: BTreeMap<i64, Subscription>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("relational store unavailable");
        }
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Make every subsequent call fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn add_role(&self, name: &str) -> Role {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let role = Role {
            id: state.next_id(),
            name: name.to_string(),
        };
        state.roles.insert(role.id, role.clone());
        role
    }

    pub fn add_principal(&self, email: &str, role_id: i64, password_hash: &str) -> Principal {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let principal = Principal {
            id: state.next_id(),
            email: email.to_string(),
            name: "Test".to_string(),
            surname: "User".to_string(),
            role_id,
        };
        state.principals.insert(
            principal.id,
            Credentials {
                principal: principal.clone(),
                password_hash: password_hash.to_string(),
            },
        );
        principal
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn principal(&self, id: i64) -> Result<Option<Principal>> {
        Ok(self
            .state()?
            .principals
            .get(&id)
            .map(|credentials| credentials.principal.clone()))
    }

    async fn credentials_by_email(&self, email: &str) -> Result<Option<Credentials>> {
        Ok(self
            .state()?
            .principals
            .values()
            .find(|credentials| credentials.principal.email == email)
            .cloned())
    }

    async fn list_principals(&self, excluded_role: i64) -> Result<Vec<Principal>> {
        Ok(self
            .state()?
            .principals
            .values()
            .map(|credentials| credentials.principal.clone())
            .filter(|principal| principal.role_id != excluded_role)
            .collect())
    }

    async fn insert_principal(&self, principal: NewPrincipal) -> Result<WriteOutcome<Principal>> {
        let mut state = self.state()?;
        if !state.roles.contains_key(&principal.role_id) {
            return Ok(WriteOutcome::NotFound);
        }
        if state
            .principals
            .values()
            .any(|existing| existing.principal.email == principal.email)
        {
            return Ok(WriteOutcome::Conflict);
        }
        let created = Principal {
            id: state.next_id(),
            email: principal.email,
            name: principal.name,
            surname: principal.surname,
            role_id: principal.role_id,
        };
        state.principals.insert(
            created.id,
            Credentials {
                principal: created.clone(),
                password_hash: principal.password_hash,
            },
        );
        Ok(WriteOutcome::Written(created))
    }

    async fn update_principal(
        &self,
        id: i64,
        update: PrincipalUpdate,
    ) -> Result<WriteOutcome<Principal>> {
        let mut state = self.state()?;
        if let Some(role_id) = update.role_id {
            if !state.roles.contains_key(&role_id) {
                return Ok(WriteOutcome::NotFound);
            }
        }
        if let Some(email) = &update.email {
            if state
                .principals
                .values()
                .any(|existing| existing.principal.id != id && existing.principal.email == *email)
            {
                return Ok(WriteOutcome::Conflict);
            }
        }
        let Some(credentials) = state.principals.get_mut(&id) else {
            return Ok(WriteOutcome::NotFound);
        };
        if let Some(email) = update.email {
            credentials.principal.email = email;
        }
        if let Some(name) = update.name {
            credentials.principal.name = name;
        }
        if let Some(surname) = update.surname {
            credentials.principal.surname = surname;
        }
        if let Some(role_id) = update.role_id {
            credentials.principal.role_id = role_id;
        }
        if let Some(password_hash) = update.password_hash {
            credentials.password_hash = password_hash;
        }
        Ok(WriteOutcome::Written(credentials.principal.clone()))
    }

    async fn delete_principal(&self, id: i64) -> Result<DeleteOutcome> {
        let mut state = self.state()?;
        if state.principals.remove(&id).is_none() {
            return Ok(DeleteOutcome::NotFound);
        }
        let orphan = |created_by: &mut Option<i64>| {
            if *created_by == Some(id) {
                *created_by = None;
            }
        };
        state
            .members
            .values_mut()
            .for_each(|member| orphan(&mut member.created_by));
        state
            .subscriptions
            .values_mut()
            .for_each(|subscription| orphan(&mut subscription.created_by));
        Ok(DeleteOutcome::Deleted)
    }

    async fn role(&self, id: i64) -> Result<Option<Role>> {
        Ok(self.state()?.roles.get(&id).cloned())
    }

    async fn role_by_name(&self, name: &str) -> Result<Option<Role>> {
        Ok(self
            .state()?
            .roles
            .values()
            .find(|role| role.name == name)
            .cloned())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        Ok(self.state()?.roles.values().cloned().collect())
    }

    async fn insert_role(&self, name: &str) -> Result<WriteOutcome<Role>> {
        let mut state = self.state()?;
        if state.roles.values().any(|role| role.name == name) {
            return Ok(WriteOutcome::Conflict);
        }
        let role = Role {
            id: state.next_id(),
            name: name.to_string(),
        };
        state.roles.insert(role.id, role.clone());
        Ok(WriteOutcome::Written(role))
    }

    async fn rename_role(&self, id: i64, name: &str) -> Result<WriteOutcome<Role>> {
        let mut state = self.state()?;
        if state
            .roles
            .values()
            .any(|role| role.id != id && role.name == name)
        {
            return Ok(WriteOutcome::Conflict);
        }
        let Some(role) = state.roles.get_mut(&id) else {
            return Ok(WriteOutcome::NotFound);
        };
        role.name = name.to_string();
        Ok(WriteOutcome::Written(role.clone()))
    }

    async fn delete_role(&self, id: i64) -> Result<DeleteOutcome> {
        let mut state = self.state()?;
        if !state.roles.contains_key(&id) {
            return Ok(DeleteOutcome::NotFound);
        }
        if state
            .principals
            .values()
            .any(|credentials| credentials.principal.role_id == id)
        {
            return Ok(DeleteOutcome::InUse);
        }
        state.roles.remove(&id);
        state.permissions.retain(|_, permission| permission.role_id != id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn ping(&self) -> Result<()> {
        self.state().map(|_| ())
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn insert_permission(
        &self,
        permission: NewPermission,
    ) -> Result<WriteOutcome<Permission>> {
        let mut state = self.state()?;
        if !state.roles.contains_key(&permission.role_id) {
            return Ok(WriteOutcome::NotFound);
        }
        if state.permissions.values().any(|existing| {
            existing.resource == permission.resource && existing.role_id == permission.role_id
        }) {
            return Ok(WriteOutcome::Conflict);
        }
        let created = Permission {
            id: state.next_id(),
            resource: permission.resource,
            role_id: permission.role_id,
            levels: permission.levels,
        };
        state.permissions.insert(created.id, created.clone());
        Ok(WriteOutcome::Written(created))
    }

    async fn permission(&self, id: i64) -> Result<Option<Permission>> {
        Ok(self.state()?.permissions.get(&id).cloned())
    }

    async fn update_permission(
        &self,
        id: i64,
        levels: PermissionLevels,
    ) -> Result<Option<Permission>> {
        let mut state = self.state()?;
        Ok(state.permissions.get_mut(&id).map(|permission| {
            permission.levels = levels;
            permission.clone()
        }))
    }

    async fn delete_permission(&self, id: i64) -> Result<bool> {
        Ok(self.state()?.permissions.remove(&id).is_some())
    }

    async fn list_permissions(&self, filter: &PermissionFilter) -> Result<Vec<Permission>> {
        Ok(self
            .state()?
            .permissions
            .values()
            .filter(|permission| filter.admits(permission))
            .cloned()
            .collect())
    }

    async fn find_permission(&self, resource: &str, role_id: i64) -> Result<Option<Permission>> {
        Ok(self
            .state()?
            .permissions
            .values()
            .find(|permission| permission.resource == resource && permission.role_id == role_id)
            .cloned())
    }

    async fn insert_permissions_atomic(&self, permissions: &[NewPermission]) -> Result<u64> {
        let mut state = self.state()?;
        let mut written = 0;
        for permission in permissions {
            let exists = state.permissions.values().any(|existing| {
                existing.resource == permission.resource && existing.role_id == permission.role_id
            });
            if exists {
                continue;
            }
            let id = state.next_id();
            state.permissions.insert(
                id,
                Permission {
                    id,
                    resource: permission.resource.clone(),
                    role_id: permission.role_id,
                    levels: permission.levels,
                },
            );
            written += 1;
        }
        Ok(written)
    }

    async fn tables(&self) -> Result<Vec<String>> {
        let _state = self.state()?;
        Ok(TABLES.iter().map(ToString::to_string).collect())
    }
}

fn owned_by(created_by: Option<i64>, owner: Option<i64>) -> bool {
    owner.map_or(true, |owner| created_by == Some(owner))
}

#[async_trait]
impl MemberStore for MemoryStore {
    async fn list_members(&self, owner: Option<i64>) -> Result<Vec<Member>> {
        Ok(self
            .state()?
            .members
            .values()
            .filter(|member| owned_by(member.created_by, owner))
            .cloned()
            .collect())
    }

    async fn member(&self, id: i64) -> Result<Option<Member>> {
        Ok(self.state()?.members.get(&id).cloned())
    }

    async fn insert_member(
        &self,
        profile: &MemberProfile,
        first: &SubscriptionTerms,
        created_by: i64,
    ) -> Result<EnrolledMember> {
        let mut state = self.state()?;
        let member = Member {
            id: state.next_id(),
            profile: profile.clone(),
            created_by: Some(created_by),
        };
        let subscription = Subscription {
            id: state.next_id(),
            member_id: member.id,
            terms: *first,
            created_by: Some(created_by),
        };
        state.members.insert(member.id, member.clone());
        state
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(EnrolledMember {
            member,
            subscription,
        })
    }

    async fn update_member(&self, id: i64, profile: &MemberProfile) -> Result<Option<Member>> {
        let mut state = self.state()?;
        Ok(state.members.get_mut(&id).map(|member| {
            member.profile = profile.clone();
            member.clone()
        }))
    }

    async fn delete_member(&self, id: i64) -> Result<bool> {
        let mut state = self.state()?;
        if state.members.remove(&id).is_none() {
            return Ok(false);
        }
        state
            .subscriptions
            .retain(|_, subscription| subscription.member_id != id);
        Ok(true)
    }

    async fn list_subscriptions(
        &self,
        member_id: i64,
        owner: Option<i64>,
    ) -> Result<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> = self
            .state()?
            .subscriptions
            .values()
            .filter(|subscription| {
                subscription.member_id == member_id && owned_by(subscription.created_by, owner)
            })
            .cloned()
            .collect();
        subscriptions.sort_by_key(|subscription| (subscription.terms.starts_on, subscription.id));
        Ok(subscriptions)
    }

    async fn subscription(&self, member_id: i64, id: i64) -> Result<Option<Subscription>> {
        Ok(self
            .state()?
            .subscriptions
            .get(&id)
            .filter(|subscription| subscription.member_id == member_id)
            .cloned())
    }

    async fn insert_subscription(
        &self,
        member_id: i64,
        terms: &SubscriptionTerms,
        created_by: i64,
    ) -> Result<Option<Subscription>> {
        let mut state = self.state()?;
        if !state.members.contains_key(&member_id) {
            return Ok(None);
        }
        let subscription = Subscription {
            id: state.next_id(),
            member_id,
            terms: *terms,
            created_by: Some(created_by),
        };
        state
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(Some(subscription))
    }

    async fn update_subscription(
        &self,
        member_id: i64,
        id: i64,
        terms: &SubscriptionTerms,
    ) -> Result<Option<Subscription>> {
        let mut state = self.state()?;
        Ok(state
            .subscriptions
            .get_mut(&id)
            .filter(|subscription| subscription.member_id == member_id)
            .map(|subscription| {
                subscription.terms = *terms;
                subscription.clone()
            }))
    }

    async fn delete_subscription(&self, member_id: i64, id: i64) -> Result<bool> {
        let mut state = self.state()?;
        let belongs = state
            .subscriptions
            .get(&id)
            .is_some_and(|subscription| subscription.member_id == member_id);
        if belongs {
            state.subscriptions.remove(&id);
        }
        Ok(belongs)
    }
}
