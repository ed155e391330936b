//! User administration.
//!
//! Flow Overview:
//! 1) Stage B admits the request with a grant on `users`.
//! 2) An `Own` grant narrows every operation to the caller's own record;
//!    a `Full` grant reaches every user outside the system role.
//! 3) Deleting a user revokes all of their sessions.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

use super::{internal_error, normalize_email, reject, respond, valid_email};
use crate::{
    api::AppState,
    auth::{password::hash_password_blocking, AccessLevel, AuthError, Authorized},
    store::{DeleteOutcome, NewPrincipal, Principal, PrincipalUpdate, WriteOutcome},
};

const RESOURCE: &str = "users";

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub surname: String,
    pub role_id: i64,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub role_id: Option<i64>,
}

fn denied(authorized: &Authorized) -> Response {
    AuthError::PermissionDenied {
        resource: RESOURCE.to_string(),
        action: authorized.grant.action,
    }
    .into_response()
}

fn user_not_found(id: i64) -> Response {
    reject(StatusCode::NOT_FOUND, format!("user {id} not found"))
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Target user as seen by the caller. System users are only visible to
/// themselves.
async fn visible_user(state: &AppState, authorized: &Authorized, id: i64) -> Result<Principal, Response> {
    if !authorized.covers(id) {
        return Err(denied(authorized));
    }
    match state.identities.principal(id).await {
        Ok(Some(principal))
            if principal.role_id == state.system_role_id && id != authorized.principal().id =>
        {
            Err(user_not_found(id))
        }
        Ok(Some(principal)) => Ok(principal),
        Ok(None) => Err(user_not_found(id)),
        Err(err) => Err(internal_error("Failed to fetch user", err)),
    }
}

/// Roles a user may be assigned: existing, and not the system role.
async fn assignable_role(state: &AppState, role_id: i64) -> Result<(), Response> {
    let unknown = || reject(StatusCode::BAD_REQUEST, format!("role {role_id} does not exist"));
    if role_id == state.system_role_id {
        return Err(unknown());
    }
    match state.identities.role(role_id).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(unknown()),
        Err(err) => Err(internal_error("Failed to fetch role", err)),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/protected/users",
    responses(
        (status = 200, description = "Users visible to the caller", body = [Principal]),
        (status = 401, description = "Not logged in"),
        (status = 403, description = "Forbidden"),
    ),
    tag = "users"
)]
pub async fn list_users(
    authorized: Authorized,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    if authorized.grant.level == AccessLevel::Own {
        let own = vec![authorized.principal().clone()];
        return respond(StatusCode::OK, "Users", own);
    }
    match state.identities.list_principals(state.system_role_id).await {
        Ok(users) => respond(StatusCode::OK, "Users", users),
        Err(err) => internal_error("Failed to list users", err),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/protected/users/{id}",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = Principal),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found"),
    ),
    tag = "users"
)]
pub async fn get_user(
    authorized: Authorized,
    Path(id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    match visible_user(&state, &authorized, id).await {
        Ok(user) => respond(StatusCode::OK, "User", user),
        Err(response) => response,
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/protected/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = Principal),
        (status = 400, description = "Invalid input or unknown role"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Email already registered"),
    ),
    tag = "users"
)]
pub async fn create_user(
    authorized: Authorized,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<CreateUserRequest>,
) -> Response {
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return reject(StatusCode::BAD_REQUEST, "a valid email is required");
    }
    if request.password.is_empty() {
        return reject(StatusCode::BAD_REQUEST, "password is required");
    }
    let (Some(name), Some(surname)) = (non_empty(&request.name), non_empty(&request.surname))
    else {
        return reject(StatusCode::BAD_REQUEST, "name and surname are required");
    };
    if let Err(response) = assignable_role(&state, request.role_id).await {
        return response;
    }

    let password_hash = match hash_password_blocking(request.password).await {
        Ok(hash) => hash,
        Err(err) => return internal_error("Failed to hash password", err),
    };

    let new_user = NewPrincipal {
        email,
        name,
        surname,
        role_id: request.role_id,
        password_hash,
    };
    match state.identities.insert_principal(new_user).await {
        Ok(WriteOutcome::Written(user)) => {
            info!(id = user.id, actor = authorized.principal().id, "User created");
            respond(StatusCode::CREATED, "User created", user)
        }
        Ok(WriteOutcome::Conflict) => reject(StatusCode::CONFLICT, "email already registered"),
        Ok(WriteOutcome::NotFound) => reject(
            StatusCode::BAD_REQUEST,
            format!("role {} does not exist", request.role_id),
        ),
        Err(err) => internal_error("Failed to create user", err),
    }
}

#[utoipa::path(
    put,
    path = "/api/v1/protected/users/{id}",
    params(("id" = i64, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = Principal),
        (status = 400, description = "Invalid input or unknown role"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Email already registered"),
    ),
    tag = "users"
)]
pub async fn update_user(
    authorized: Authorized,
    Path(id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<UpdateUserRequest>,
) -> Response {
    if let Err(response) = visible_user(&state, &authorized, id).await {
        return response;
    }

    let mut update = PrincipalUpdate::default();

    if let Some(role_id) = request.role_id {
        // Self-only updates cannot escalate.
        if authorized.grant.level != AccessLevel::Full {
            return denied(&authorized);
        }
        if let Err(response) = assignable_role(&state, role_id).await {
            return response;
        }
        update.role_id = Some(role_id);
    }
    if let Some(email) = request.email {
        let email = normalize_email(&email);
        if !valid_email(&email) {
            return reject(StatusCode::BAD_REQUEST, "a valid email is required");
        }
        update.email = Some(email);
    }
    if let Some(name) = request.name {
        let Some(name) = non_empty(&name) else {
            return reject(StatusCode::BAD_REQUEST, "name cannot be empty");
        };
        update.name = Some(name);
    }
    if let Some(surname) = request.surname {
        let Some(surname) = non_empty(&surname) else {
            return reject(StatusCode::BAD_REQUEST, "surname cannot be empty");
        };
        update.surname = Some(surname);
    }
    if let Some(password) = request.password {
        if password.is_empty() {
            return reject(StatusCode::BAD_REQUEST, "password cannot be empty");
        }
        match hash_password_blocking(password).await {
            Ok(hash) => update.password_hash = Some(hash),
            Err(err) => return internal_error("Failed to hash password", err),
        }
    }

    match state.identities.update_principal(id, update).await {
        Ok(WriteOutcome::Written(user)) => {
            info!(id, actor = authorized.principal().id, "User updated");
            respond(StatusCode::OK, "User updated", user)
        }
        Ok(WriteOutcome::NotFound) => user_not_found(id),
        Ok(WriteOutcome::Conflict) => reject(StatusCode::CONFLICT, "email already registered"),
        Err(err) => internal_error("Failed to update user", err),
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/protected/users/{id}",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "User deleted and their sessions revoked"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found"),
    ),
    tag = "users"
)]
pub async fn delete_user(
    authorized: Authorized,
    Path(id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    if let Err(response) = visible_user(&state, &authorized, id).await {
        return response;
    }

    match state.identities.delete_principal(id).await {
        Ok(DeleteOutcome::Deleted) => {}
        Ok(DeleteOutcome::NotFound) => return user_not_found(id),
        Ok(DeleteOutcome::InUse) => {
            return reject(StatusCode::CONFLICT, format!("user {id} is still referenced"))
        }
        Err(err) => return internal_error("Failed to delete user", err),
    }

    // Stage A already rejects sessions of a vanished principal.
    match state.sessions.revoke_all_sessions(id).await {
        Ok(revoked) => info!(id, revoked, actor = authorized.principal().id, "User deleted"),
        Err(err) => error!(id, "User deleted but sessions not revoked: {err}"),
    }
    respond(StatusCode::OK, "User deleted", ())
}
