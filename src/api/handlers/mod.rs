pub mod auth;
pub mod health;
pub mod members;
pub mod permissions;
pub mod roles;
pub mod users;

// common functions for the handlers
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::fmt::Display;
use tracing::error;

use crate::auth::{AccessLevel, AuthError, Authorized, PermissionError};

pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Successful response envelope.
pub(crate) fn respond<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
    (
        status,
        Json(json!({ "success": true, "message": message, "data": data })),
    )
        .into_response()
}

/// Failed response envelope.
pub(crate) fn reject(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "message": message.into() })),
    )
        .into_response()
}

pub(crate) fn internal_error(context: &str, err: impl Display) -> Response {
    error!("{context}: {err:#}");
    reject(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

/// Records without an owner are only reachable with a full grant.
pub(crate) fn require_full(authorized: &Authorized, resource: &str) -> Result<(), Response> {
    if authorized.grant.level == AccessLevel::Full {
        Ok(())
    } else {
        Err(AuthError::PermissionDenied {
            resource: resource.to_string(),
            action: authorized.grant.action,
        }
        .into_response())
    }
}

impl IntoResponse for PermissionError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::UnknownRole(_)
            | Self::MissingResource
            | Self::UnknownResource(_)
            | Self::LevelOutOfRange { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Duplicate { .. } => StatusCode::CONFLICT,
            Self::Store(err) => return internal_error("Permission store failure", err),
        };
        reject(status, self.to_string())
    }
}
