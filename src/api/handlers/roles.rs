//! Role administration.
//!
//! Roles have no owner, so every operation needs a full grant on `roles`.
//! The system role is invisible here: it is never listed and any lookup of it
//! answers 404.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::Response,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use super::{internal_error, reject, require_full, respond};
use crate::{
    api::AppState,
    auth::Authorized,
    store::{DeleteOutcome, Role, WriteOutcome},
};

const RESOURCE: &str = "roles";

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RoleRequest {
    pub name: String,
}

fn role_not_found(id: i64) -> Response {
    reject(StatusCode::NOT_FOUND, format!("role {id} not found"))
}

fn validated_name(request: &RoleRequest) -> Result<String, Response> {
    let name = request.name.trim();
    if name.is_empty() {
        Err(reject(StatusCode::BAD_REQUEST, "role name is required"))
    } else {
        Ok(name.to_string())
    }
}

/// Visible, existing role; the system role answers 404.
async fn visible_role(state: &AppState, id: i64) -> Result<Role, Response> {
    if id == state.system_role_id {
        return Err(role_not_found(id));
    }
    match state.identities.role(id).await {
        Ok(Some(role)) => Ok(role),
        Ok(None) => Err(role_not_found(id)),
        Err(err) => Err(internal_error("Failed to fetch role", err)),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/protected/roles",
    responses(
        (status = 200, description = "Every role except the system role", body = [Role]),
        (status = 401, description = "Not logged in"),
        (status = 403, description = "Forbidden"),
    ),
    tag = "roles"
)]
pub async fn list_roles(
    authorized: Authorized,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    if let Err(response) = require_full(&authorized, RESOURCE) {
        return response;
    }
    match state.identities.list_roles().await {
        Ok(roles) => {
            let roles: Vec<Role> = roles
                .into_iter()
                .filter(|role| role.id != state.system_role_id)
                .collect();
            respond(StatusCode::OK, "Roles", roles)
        }
        Err(err) => internal_error("Failed to list roles", err),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/protected/roles/{id}",
    params(("id" = i64, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role", body = Role),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Role not found"),
    ),
    tag = "roles"
)]
pub async fn get_role(
    authorized: Authorized,
    Path(id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    if let Err(response) = require_full(&authorized, RESOURCE) {
        return response;
    }
    match visible_role(&state, id).await {
        Ok(role) => respond(StatusCode::OK, "Role", role),
        Err(response) => response,
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/protected/roles",
    request_body = RoleRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 400, description = "Missing name"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Role name taken"),
    ),
    tag = "roles"
)]
pub async fn create_role(
    authorized: Authorized,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<RoleRequest>,
) -> Response {
    if let Err(response) = require_full(&authorized, RESOURCE) {
        return response;
    }
    let name = match validated_name(&request) {
        Ok(name) => name,
        Err(response) => return response,
    };
    match state.identities.insert_role(&name).await {
        Ok(WriteOutcome::Written(role)) => {
            info!(role_id = role.id, actor = authorized.principal().id, "Role created");
            respond(StatusCode::CREATED, "Role created", role)
        }
        Ok(WriteOutcome::Conflict | WriteOutcome::NotFound) => {
            reject(StatusCode::CONFLICT, format!("role {name:?} already exists"))
        }
        Err(err) => internal_error("Failed to create role", err),
    }
}

#[utoipa::path(
    put,
    path = "/api/v1/protected/roles/{id}",
    params(("id" = i64, Path, description = "Role id")),
    request_body = RoleRequest,
    responses(
        (status = 200, description = "Role renamed", body = Role),
        (status = 400, description = "Missing name"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Role name taken"),
    ),
    tag = "roles"
)]
pub async fn update_role(
    authorized: Authorized,
    Path(id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<RoleRequest>,
) -> Response {
    if let Err(response) = require_full(&authorized, RESOURCE) {
        return response;
    }
    let name = match validated_name(&request) {
        Ok(name) => name,
        Err(response) => return response,
    };
    if id == state.system_role_id {
        return role_not_found(id);
    }
    match state.identities.rename_role(id, &name).await {
        Ok(WriteOutcome::Written(role)) => respond(StatusCode::OK, "Role updated", role),
        Ok(WriteOutcome::NotFound) => role_not_found(id),
        Ok(WriteOutcome::Conflict) => {
            reject(StatusCode::CONFLICT, format!("role {name:?} already exists"))
        }
        Err(err) => internal_error("Failed to update role", err),
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/protected/roles/{id}",
    params(("id" = i64, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role and its permissions deleted"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Role still assigned to users"),
    ),
    tag = "roles"
)]
pub async fn delete_role(
    authorized: Authorized,
    Path(id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    if let Err(response) = require_full(&authorized, RESOURCE) {
        return response;
    }
    if id == state.system_role_id {
        return role_not_found(id);
    }
    match state.identities.delete_role(id).await {
        Ok(DeleteOutcome::Deleted) => {
            info!(role_id = id, actor = authorized.principal().id, "Role deleted");
            respond(StatusCode::OK, "Role deleted", ())
        }
        Ok(DeleteOutcome::NotFound) => role_not_found(id),
        Ok(DeleteOutcome::InUse) => reject(
            StatusCode::CONFLICT,
            format!("role {id} is still assigned to users"),
        ),
        Err(err) => internal_error("Failed to delete role", err),
    }
}
