//! Login, refresh and logout endpoints.
//!
//! Flow Overview:
//! 1) `login` verifies the password and issues a refresh and an access session,
//!    delivered as cookies and in the body.
//! 2) `refresh` exchanges the refresh token for a new access session.
//! 3) `logout` / `logout_all` revoke sessions and clear the cookies.

use axum::{
    extract::{ConnectInfo, Extension},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::{internal_error, normalize_email, reject, respond, valid_email};
use crate::{
    api::AppState,
    auth::{
        cookie::{
            clear_session_cookie, extract_access_token, extract_cookie, marker_cookie,
            session_cookie, REFRESH_COOKIE_NAME,
        },
        password::verify_password_blocking,
        session::now_unix,
        AuthError, RequestContext, Session, SessionKind,
    },
    store::{Principal, Role},
};

const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    pub access_expires_in: u64,
    pub refresh_token: String,
    pub refresh_expires_in: u64,
    pub principal: Principal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub access_token: String,
    pub access_expires_in: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub principal: Principal,
    pub role: Role,
    pub expires_at: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutAllResponse {
    pub revoked: u64,
}

fn peer(connect_info: Option<ConnectInfo<SocketAddr>>) -> Option<SocketAddr> {
    connect_info.map(|ConnectInfo(addr)| addr)
}

fn session_cookies(state: &AppState, sessions: &[&Session]) -> Result<HeaderMap, Response> {
    let secure = state.cookie_secure;
    let now = now_unix();
    let mut headers = HeaderMap::new();
    for session in sessions {
        let ttl = std::time::Duration::from_secs(session.remaining_seconds(now));
        let cookie = session_cookie(session.kind, &session.token, ttl, secure)
            .map_err(|err| internal_error("Failed to build session cookie", err))?;
        headers.append(SET_COOKIE, cookie);
        if session.kind == SessionKind::Refresh {
            let marker = marker_cookie(Some(ttl), secure)
                .map_err(|err| internal_error("Failed to build marker cookie", err))?;
            headers.append(SET_COOKIE, marker);
        }
    }
    Ok(headers)
}

fn cleared_cookies(secure: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let cookies: [Result<HeaderValue, _>; 3] = [
        clear_session_cookie(SessionKind::Access, secure),
        clear_session_cookie(SessionKind::Refresh, secure),
        marker_cookie(None, secure),
    ];
    for cookie in cookies {
        match cookie {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(err) => error!("Failed to build clearing cookie: {err}"),
        }
    }
    headers
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; session cookies set", body = LoginResponse),
        (status = 400, description = "Malformed request"),
        (status = 401, description = "Invalid email or password"),
    ),
    tag = "auth"
)]
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Response {
    let email = normalize_email(&request.email);
    if !valid_email(&email) || request.password.is_empty() {
        return reject(StatusCode::BAD_REQUEST, "Email and password are required");
    }

    let credentials = match state.identities.credentials_by_email(&email).await {
        Ok(Some(credentials)) => credentials,
        Ok(None) => {
            info!("Login for unknown email");
            return reject(StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS);
        }
        Err(err) => return internal_error("Failed to lookup credentials", err),
    };

    if !verify_password_blocking(request.password, credentials.password_hash).await {
        warn!(subject_id = credentials.principal.id, "Login with wrong password");
        return reject(StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS);
    }

    let client = state.authorizer.client_fingerprint(&headers, peer(connect_info));
    let subject_id = credentials.principal.id;

    let refresh = match state
        .sessions
        .issue_session(subject_id, SessionKind::Refresh, &client)
        .await
    {
        Ok(session) => session,
        Err(err) => return issuance_failure(err),
    };
    let access = match state
        .sessions
        .issue_session(subject_id, SessionKind::Access, &client)
        .await
    {
        Ok(session) => session,
        Err(err) => {
            discard_sessions(&state, &[&refresh]).await;
            return issuance_failure(err);
        }
    };

    let cookies = match session_cookies(&state, &[&access, &refresh]) {
        Ok(cookies) => cookies,
        Err(response) => {
            discard_sessions(&state, &[&access, &refresh]).await;
            return response;
        }
    };

    let now = now_unix();
    let body = LoginResponse {
        access_expires_in: access.remaining_seconds(now),
        refresh_expires_in: refresh.remaining_seconds(now),
        access_token: access.token,
        refresh_token: refresh.token,
        principal: credentials.principal,
    };
    (cookies, respond(StatusCode::OK, "Logged in", body)).into_response()
}

/// Revoke sessions issued by a login that did not complete.
async fn discard_sessions(state: &AppState, sessions: &[&Session]) {
    for session in sessions {
        if let Err(err) = state
            .sessions
            .revoke_session(&session.token, session.subject_id)
            .await
        {
            error!(
                subject_id = session.subject_id,
                "Failed to revoke session of an abandoned login: {err}"
            );
        }
    }
}

fn issuance_failure(err: AuthError) -> Response {
    error!("Failed to issue session: {err}");
    err.into_response()
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    request_body(content = RefreshRequest, description = "Optional when the refresh cookie is sent"),
    responses(
        (status = 200, description = "New access session issued", body = RefreshResponse),
        (status = 401, description = "Refresh session invalid"),
    ),
    tag = "auth"
)]
pub async fn refresh(
    Extension(state): Extension<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Response {
    let token = body
        .and_then(|Json(request)| request.refresh_token)
        .or_else(|| extract_cookie(&headers, REFRESH_COOKIE_NAME));
    let Some(token) = token else {
        return AuthError::MissingCredential.into_response();
    };

    let client = state.authorizer.client_fingerprint(&headers, peer(connect_info));
    let previous = extract_access_token(&headers);

    match state
        .sessions
        .refresh_session(&token, previous.as_deref(), &client)
        .await
    {
        Ok(access) => {
            let cookies = match session_cookies(&state, &[&access]) {
                Ok(cookies) => cookies,
                Err(response) => return response,
            };
            let body = RefreshResponse {
                access_expires_in: access.remaining_seconds(now_unix()),
                access_token: access.token,
            };
            (cookies, respond(StatusCode::OK, "Session refreshed", body)).into_response()
        }
        Err(err) => {
            if err.is_store_failure() {
                error!("Store failure during refresh: {err}");
            } else {
                warn!("Refresh denied: {err}");
            }
            err.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    responses(
        (status = 200, description = "Sessions revoked and cookies cleared"),
        (status = 401, description = "Not logged in"),
    ),
    tag = "auth"
)]
pub async fn logout(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    headers: HeaderMap,
) -> Response {
    let subject_id = context.principal.id;
    let mut tokens = vec![context.session.token];
    if let Some(refresh) = extract_cookie(&headers, REFRESH_COOKIE_NAME) {
        tokens.push(refresh);
    }

    for token in &tokens {
        if let Err(err) = state.sessions.revoke_session(token, subject_id).await {
            error!("Failed to revoke session: {err}");
            return err.into_response();
        }
    }

    info!(subject_id, "Logged out");
    (
        cleared_cookies(state.cookie_secure),
        respond(StatusCode::OK, "Logged out", ()),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout-all",
    responses(
        (status = 200, description = "Every session of the caller revoked", body = LogoutAllResponse),
        (status = 401, description = "Not logged in"),
    ),
    tag = "auth"
)]
pub async fn logout_all(
    Extension(state): Extension<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
) -> Response {
    match state.sessions.revoke_all_sessions(context.principal.id).await {
        Ok(revoked) => (
            cleared_cookies(state.cookie_secure),
            respond(StatusCode::OK, "Logged out everywhere", LogoutAllResponse { revoked }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to revoke sessions: {err}");
            err.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 401, description = "Not logged in"),
    ),
    tag = "auth"
)]
pub async fn session(Extension(context): Extension<RequestContext>) -> Response {
    let body = SessionResponse {
        expires_at: context.session.expires_at,
        principal: context.principal,
        role: context.role,
    };
    respond(StatusCode::OK, "Session is active", body)
}
