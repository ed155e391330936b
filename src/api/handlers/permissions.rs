//! Permission matrix administration.
//!
//! Rows have no owner, so every operation needs a full grant on
//! `permissions`. Rows of the system role are managed by bootstrap only and
//! are invisible here.

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use super::{internal_error, reject, require_full, respond};
use crate::{
    api::AppState,
    auth::{Authorized, PermissionError},
    store::{NewPermission, Permission, PermissionFilter, PermissionLevels},
};

const RESOURCE: &str = "permissions";

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct PermissionQuery {
    /// Only rows of this role.
    pub role_id: Option<i64>,
    /// Only rows governing this resource.
    pub resource: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePermissionRequest {
    pub resource: String,
    pub role_id: i64,
    #[serde(flatten)]
    pub levels: PermissionLevels,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RolePermissionRequest {
    pub resource: String,
    #[serde(flatten)]
    pub levels: PermissionLevels,
}

fn not_found(id: i64) -> Response {
    PermissionError::NotFound(id).into_response()
}

/// Existing row not belonging to the system role.
async fn visible_permission(state: &AppState, id: i64) -> Result<Permission, Response> {
    match state.permissions.get(id).await {
        Ok(permission) if permission.role_id == state.system_role_id => Err(not_found(id)),
        Ok(permission) => Ok(permission),
        Err(err) => Err(err.into_response()),
    }
}

async fn visible_role(state: &AppState, role_id: i64) -> Result<(), Response> {
    let missing = || reject(StatusCode::NOT_FOUND, format!("role {role_id} not found"));
    if role_id == state.system_role_id {
        return Err(missing());
    }
    match state.identities.role(role_id).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(missing()),
        Err(err) => Err(internal_error("Failed to fetch role", err)),
    }
}

async fn create_row(state: &AppState, authorized: &Authorized, permission: NewPermission) -> Response {
    if permission.role_id == state.system_role_id {
        return PermissionError::UnknownRole(permission.role_id).into_response();
    }
    match state.permissions.create(permission).await {
        Ok(created) => {
            info!(
                id = created.id,
                actor = authorized.principal().id,
                "Permission granted"
            );
            respond(StatusCode::CREATED, "Permission created", created)
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/protected/permissions",
    params(PermissionQuery),
    responses(
        (status = 200, description = "Permission rows", body = [Permission]),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Role not found"),
    ),
    tag = "permissions"
)]
pub async fn list_permissions(
    authorized: Authorized,
    Query(query): Query<PermissionQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    if let Err(response) = require_full(&authorized, RESOURCE) {
        return response;
    }

    let filter = match (query.role_id, query.resource.as_deref()) {
        (Some(role_id), _) => {
            if let Err(response) = visible_role(&state, role_id).await {
                return response;
            }
            PermissionFilter::Role(role_id)
        }
        (None, Some(resource)) => PermissionFilter::Resource(resource.to_string()),
        (None, None) => PermissionFilter::All,
    };

    match state.permissions.list(&filter).await {
        Ok(rows) => {
            let rows: Vec<Permission> = rows
                .into_iter()
                .filter(|row| row.role_id != state.system_role_id)
                .filter(|row| query.resource.as_ref().map_or(true, |r| *r == row.resource))
                .collect();
            respond(StatusCode::OK, "Permissions", rows)
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/protected/permissions/{id}",
    params(("id" = i64, Path, description = "Permission id")),
    responses(
        (status = 200, description = "Permission row", body = Permission),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Permission not found"),
    ),
    tag = "permissions"
)]
pub async fn get_permission(
    authorized: Authorized,
    Path(id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    if let Err(response) = require_full(&authorized, RESOURCE) {
        return response;
    }
    match visible_permission(&state, id).await {
        Ok(permission) => respond(StatusCode::OK, "Permission", permission),
        Err(response) => response,
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/protected/permissions",
    request_body = CreatePermissionRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 400, description = "Unknown role or resource, or level out of range"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Row for this resource and role exists"),
    ),
    tag = "permissions"
)]
pub async fn create_permission(
    authorized: Authorized,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<CreatePermissionRequest>,
) -> Response {
    if let Err(response) = require_full(&authorized, RESOURCE) {
        return response;
    }
    let permission = NewPermission {
        resource: request.resource.trim().to_string(),
        role_id: request.role_id,
        levels: request.levels,
    };
    create_row(&state, &authorized, permission).await
}

#[utoipa::path(
    put,
    path = "/api/v1/protected/permissions/{id}",
    params(("id" = i64, Path, description = "Permission id")),
    request_body = PermissionLevels,
    responses(
        (status = 200, description = "Levels replaced", body = Permission),
        (status = 400, description = "Level out of range"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Permission not found"),
    ),
    tag = "permissions"
)]
pub async fn update_permission(
    authorized: Authorized,
    Path(id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
    Json(levels): Json<PermissionLevels>,
) -> Response {
    if let Err(response) = require_full(&authorized, RESOURCE) {
        return response;
    }
    if let Err(response) = visible_permission(&state, id).await {
        return response;
    }
    match state.permissions.update(id, levels).await {
        Ok(updated) => respond(StatusCode::OK, "Permission updated", updated),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/protected/permissions/{id}",
    params(("id" = i64, Path, description = "Permission id")),
    responses(
        (status = 200, description = "Permission deleted"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Permission not found"),
    ),
    tag = "permissions"
)]
pub async fn delete_permission(
    authorized: Authorized,
    Path(id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    if let Err(response) = require_full(&authorized, RESOURCE) {
        return response;
    }
    if let Err(response) = visible_permission(&state, id).await {
        return response;
    }
    match state.permissions.delete(id).await {
        Ok(()) => {
            info!(id, actor = authorized.principal().id, "Permission revoked");
            respond(StatusCode::OK, "Permission deleted", ())
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/protected/roles/{id}/permissions",
    params(("id" = i64, Path, description = "Role id")),
    responses(
        (status = 200, description = "Permission rows of the role", body = [Permission]),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Role not found"),
    ),
    tag = "permissions"
)]
pub async fn list_role_permissions(
    authorized: Authorized,
    Path(role_id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    if let Err(response) = require_full(&authorized, RESOURCE) {
        return response;
    }
    if let Err(response) = visible_role(&state, role_id).await {
        return response;
    }
    match state.permissions.list_by_role(role_id).await {
        Ok(rows) => respond(StatusCode::OK, "Permissions", rows),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/protected/roles/{id}/permissions",
    params(("id" = i64, Path, description = "Role id")),
    request_body = RolePermissionRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 400, description = "Unknown resource or level out of range"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Row for this resource and role exists"),
    ),
    tag = "permissions"
)]
pub async fn create_role_permission(
    authorized: Authorized,
    Path(role_id): Path<i64>,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<RolePermissionRequest>,
) -> Response {
    if let Err(response) = require_full(&authorized, RESOURCE) {
        return response;
    }
    if let Err(response) = visible_role(&state, role_id).await {
        return response;
    }
    let permission = NewPermission {
        resource: request.resource.trim().to_string(),
        role_id,
        levels: request.levels,
    };
    create_row(&state, &authorized, permission).await
}
