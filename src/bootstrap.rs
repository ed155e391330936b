//! Start-up provisioning of the system role, its optional user and its
//! full-access permission rows.

use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, instrument};

use crate::{
    auth::{password::hash_password_blocking, PermissionService},
    store::{IdentityStore, NewPrincipal, Role, WriteOutcome},
};

/// Service identity created at start-up when configured.
#[derive(Debug)]
pub struct SystemUser {
    pub email: String,
    pub password: SecretString,
}

/// Ensure the system role, the system user and the system permissions exist.
/// Safe to run on every start.
///
/// # Errors
/// Store failures.
#[instrument(skip(identities, permissions, system_user))]
pub async fn run(
    identities: &dyn IdentityStore,
    permissions: &PermissionService,
    system_role: &str,
    system_user: Option<SystemUser>,
) -> Result<Role> {
    let role = ensure_role(identities, system_role).await?;

    if let Some(user) = system_user {
        ensure_user(identities, &role, user).await?;
    }

    let written = permissions
        .bootstrap_system_permissions(role.id)
        .await
        .context("failed to bootstrap system permissions")?;
    info!(role_id = role.id, written, "System role ready");

    Ok(role)
}

async fn ensure_role(identities: &dyn IdentityStore, name: &str) -> Result<Role> {
    if let Some(role) = identities.role_by_name(name).await? {
        return Ok(role);
    }
    match identities.insert_role(name).await? {
        WriteOutcome::Written(role) => {
            info!(role_id = role.id, "Created system role {name}");
            Ok(role)
        }
        // Another instance created it first.
        WriteOutcome::Conflict | WriteOutcome::NotFound => identities
            .role_by_name(name)
            .await?
            .ok_or_else(|| anyhow!("system role {name} could not be created")),
    }
}

async fn ensure_user(identities: &dyn IdentityStore, role: &Role, user: SystemUser) -> Result<()> {
    if identities.credentials_by_email(&user.email).await?.is_some() {
        return Ok(());
    }
    let password_hash = hash_password_blocking(user.password.expose_secret().to_string()).await?;
    match identities
        .insert_principal(NewPrincipal {
            email: user.email,
            name: "System".to_string(),
            surname: "User".to_string(),
            role_id: role.id,
            password_hash,
        })
        .await?
    {
        WriteOutcome::Written(principal) => info!(id = principal.id, "Created system user"),
        WriteOutcome::Conflict => {}
        WriteOutcome::NotFound => return Err(anyhow!("system role vanished during bootstrap")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::password::verify_password, store::memory::MemoryStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn bootstrap_is_idempotent() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let permissions = PermissionService::new(store.clone(), store.clone());

        let user = || SystemUser {
            email: "system@palestra.dev".to_string(),
            password: SecretString::from("s3cret".to_string()),
        };

        let first = run(store.as_ref(), &permissions, "system", Some(user())).await?;
        let second = run(store.as_ref(), &permissions, "system", Some(user())).await?;
        assert_eq!(first, second);

        assert_eq!(store.list_roles().await?.len(), 1);
        let rows = permissions.list_by_role(first.id).await?;
        assert_eq!(rows.len(), permissions.list_resources().await?.len());

        let credentials = store
            .credentials_by_email("system@palestra.dev")
            .await?
            .ok_or_else(|| anyhow!("system user missing"))?;
        assert_eq!(credentials.principal.role_id, first.id);
        assert!(verify_password("s3cret", &credentials.password_hash));
        Ok(())
    }

    #[tokio::test]
    async fn existing_role_is_reused() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let existing = store.add_role("system");
        let permissions = PermissionService::new(store.clone(), store.clone());
        let role = run(store.as_ref(), &permissions, "system", None).await?;
        assert_eq!(role, existing);
        Ok(())
    }
}
