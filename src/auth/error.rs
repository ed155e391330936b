//! Denial taxonomy for the authentication and authorization stages.
//!
//! Every variant is logged with its reason, but callers only ever see one of
//! three uniform bodies (401, 403, 500).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::{future::Future, time::Duration};
use thiserror::Error;

use super::permission::Action;

const UNAUTHORIZED_MESSAGE: &str = "Unauthorized, please login first";
const FORBIDDEN_MESSAGE: &str = "Forbidden, you don't have permission to access this resource";
const INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session credential missing")]
    MissingCredential,
    #[error("session credential malformed")]
    MalformedCredential,
    #[error("session not found")]
    SessionNotFound,
    #[error("ambiguous session: {matches} store entries match the token")]
    AmbiguousSession { matches: usize },
    #[error("session record does not match its key")]
    InconsistentRecord,
    #[error("session expired")]
    SessionExpired,
    #[error("client address or agent differs from the session binding")]
    BindingMismatch,
    #[error("principal {0} not found")]
    PrincipalNotFound(i64),
    #[error("role unresolved")]
    RoleUnresolved,
    #[error("request cannot be classified")]
    Unclassifiable,
    #[error("resource {0:?} is not governed")]
    UngovernedResource(String),
    #[error("no {action} permission on {resource}")]
    PermissionDenied { resource: String, action: Action },
    #[error("store unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),
    #[error("store call timed out after {0:?}")]
    StoreTimeout(Duration),
    #[error("token generation failed: {0:#}")]
    TokenGeneration(anyhow::Error),
    #[error("freshly generated token already present in the session store")]
    TokenCollision,
    #[error("corrupt session record: {0}")]
    CorruptRecord(#[from] serde_json::Error),
    #[error("request context missing, authentication layer not applied")]
    MissingContext,
}

impl AuthError {
    /// Status returned to the caller.
    ///
    /// Authentication failures are 401, authorization failures and store
    /// outages are 403 (fail closed), broken invariants are 500.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingCredential
            | Self::MalformedCredential
            | Self::SessionNotFound
            | Self::AmbiguousSession { .. }
            | Self::InconsistentRecord
            | Self::SessionExpired
            | Self::BindingMismatch
            | Self::PrincipalNotFound(_) => StatusCode::UNAUTHORIZED,
            Self::RoleUnresolved
            | Self::Unclassifiable
            | Self::UngovernedResource(_)
            | Self::PermissionDenied { .. }
            | Self::StoreUnavailable(_)
            | Self::StoreTimeout(_) => StatusCode::FORBIDDEN,
            Self::TokenGeneration(_)
            | Self::TokenCollision
            | Self::CorruptRecord(_)
            | Self::MissingContext => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Store outages are denials too, but operators need to tell them apart
    /// from a genuine lack of permission.
    #[must_use]
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::StoreTimeout(_))
    }

    /// Invariant violations that are not an expected denial.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.status() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match status {
            StatusCode::UNAUTHORIZED => UNAUTHORIZED_MESSAGE,
            StatusCode::FORBIDDEN => FORBIDDEN_MESSAGE,
            _ => INTERNAL_MESSAGE,
        };
        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}

/// Run an external store call with an upper bound on its duration.
///
/// Errors and timeouts both come back as denials; nothing is retried.
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, AuthError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(AuthError::StoreUnavailable(err)),
        Err(_) => Err(AuthError::StoreTimeout(limit)),
    }
}
