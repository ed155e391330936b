//! Two-stage request admission.
//!
//! Flow Overview:
//! 1) Stage A ([`authenticate`]) reads the access credential, resolves the
//!    session, checks its client binding and loads the principal and role.
//!    The result is stored as a typed [`RequestContext`] extension.
//! 2) Stage B ([`authorize`]) classifies the request into an action and a
//!    governed resource and consults the permission matrix. The resolved
//!    [`Grant`] is added to the context.
//!
//! Any failure ends the request with a uniform denial; the handler never runs.

use axum::{
    extract::{ConnectInfo, FromRequestParts, OriginalUri, Request, State},
    http::{request::Parts, HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, error, warn};

use super::{
    classifier::resource_from_path,
    cookie::extract_access_token,
    error::{bounded, AuthError},
    permission::{Action, Grant, PermissionService},
    session::{ClientFingerprint, Session, SessionManager},
};
use crate::store::{IdentityStore, Principal, Role};

/// Per-request identity, attached by Stage A and completed by Stage B.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub session: Session,
    pub principal: Principal,
    pub role: Role,
    pub grant: Option<Grant>,
}

/// Where Stage B takes the governed resource name from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceSource {
    /// Fixed at route registration.
    Tagged(&'static str),
    /// Last alphabetic segment of the request path.
    Path,
}

pub struct Authorizer {
    sessions: Arc<SessionManager>,
    identities: Arc<dyn IdentityStore>,
    permissions: Arc<PermissionService>,
    trust_proxy_headers: bool,
}

impl Authorizer {
    pub fn new(
        sessions: Arc<SessionManager>,
        identities: Arc<dyn IdentityStore>,
        permissions: Arc<PermissionService>,
    ) -> Self {
        Self {
            sessions,
            identities,
            permissions,
            trust_proxy_headers: false,
        }
    }

    #[must_use]
    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Binding fingerprint of the client sending `headers`.
    #[must_use]
    pub fn client_fingerprint(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientFingerprint {
        client_fingerprint(headers, peer, self.trust_proxy_headers)
    }

    /// Stage A.
    ///
    /// # Errors
    /// Every failed step is a denial, see [`AuthError`].
    pub async fn authenticate_request(
        &self,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> Result<RequestContext, AuthError> {
        let token = extract_access_token(headers).ok_or(AuthError::MissingCredential)?;
        let client = self.client_fingerprint(headers, peer);
        let session = self.sessions.authenticate(&token, &client).await?;

        let timeout = self.sessions.config().store_timeout();
        let principal = bounded(timeout, self.identities.principal(session.subject_id))
            .await?
            .ok_or(AuthError::PrincipalNotFound(session.subject_id))?;
        let role = bounded(timeout, self.identities.role(principal.role_id))
            .await?
            .ok_or(AuthError::RoleUnresolved)?;

        Ok(RequestContext {
            session,
            principal,
            role,
            grant: None,
        })
    }

    /// Stage B.
    ///
    /// # Errors
    /// Unset roles, unclassifiable requests, ungoverned resources and
    /// level-0 lookups are denials.
    pub async fn authorize_request(
        &self,
        context: &RequestContext,
        method: &Method,
        path: &str,
        source: ResourceSource,
    ) -> Result<Grant, AuthError> {
        if context.role.id <= 0 {
            return Err(AuthError::RoleUnresolved);
        }

        let action = Action::from_method(method).ok_or(AuthError::Unclassifiable)?;
        let resource = match source {
            ResourceSource::Tagged(resource) => resource.to_string(),
            ResourceSource::Path => resource_from_path(path).ok_or(AuthError::Unclassifiable)?,
        };

        let timeout = self.sessions.config().store_timeout();
        let governed = bounded(timeout, self.permissions.list_resources()).await?;
        if !governed.contains(&resource) {
            return Err(AuthError::UngovernedResource(resource));
        }

        let grant = bounded(
            timeout,
            self.permissions
                .has_permission(&resource, context.role.id, action),
        )
        .await?;
        if !grant.is_granted() {
            return Err(AuthError::PermissionDenied { resource, action });
        }

        debug!(%resource, %action, level = ?grant.level, "Request authorized");
        Ok(grant)
    }
}

/// Stage B configuration for one route group.
#[derive(Clone)]
pub struct Gate {
    authorizer: Arc<Authorizer>,
    resource: ResourceSource,
}

impl Gate {
    #[must_use]
    pub fn new(authorizer: Arc<Authorizer>, resource: ResourceSource) -> Self {
        Self {
            authorizer,
            resource,
        }
    }
}

/// Stage A layer.
pub async fn authenticate(
    State(authorizer): State<Arc<Authorizer>>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    match authorizer.authenticate_request(request.headers(), peer).await {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(err) => deny(err, "authentication"),
    }
}

/// Stage B layer; must run inside [`authenticate`].
pub async fn authorize(State(gate): State<Gate>, mut request: Request, next: Next) -> Response {
    let Some(mut context) = request.extensions().get::<RequestContext>().cloned() else {
        return deny(AuthError::MissingContext, "authorization");
    };

    // Nested routers see a stripped URI.
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map_or_else(|| request.uri().path().to_string(), |uri| uri.path().to_string());

    match gate
        .authorizer
        .authorize_request(&context, request.method(), &path, gate.resource)
        .await
    {
        Ok(grant) => {
            context.grant = Some(grant);
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(err) => deny(err, "authorization"),
    }
}

fn deny(err: AuthError, stage: &'static str) -> Response {
    if err.is_store_failure() {
        error!(stage, "Store failure, denying request: {err}");
    } else if err.is_fatal() {
        error!(stage, "Request aborted: {err}");
    } else {
        warn!(stage, "Request denied: {err}");
    }
    err.into_response()
}

/// Client address and agent, preferring proxy headers only when trusted.
#[must_use]
pub fn client_fingerprint(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> ClientFingerprint {
    let forwarded = if trust_proxy_headers {
        extract_client_ip(headers)
    } else {
        None
    };
    let address = forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_default();
    let agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    ClientFingerprint::new(address, agent)
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Context of a request admitted by both stages.
#[derive(Clone, Debug)]
pub struct Authorized {
    pub context: RequestContext,
    pub grant: Grant,
}

impl Authorized {
    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.context.principal
    }

    /// Whether the grant reaches a record owned by `owner_id`.
    #[must_use]
    pub fn covers(&self, owner_id: i64) -> bool {
        self.grant.covers(owner_id, self.context.principal.id)
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Authorized
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let context = parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or(AuthError::MissingContext)?;
        let grant = context.grant.ok_or(AuthError::MissingContext)?;
        Ok(Self { context, grant })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{
            cache::MemorySessionStore,
            permission::AccessLevel,
            session::{SessionConfig, SessionKind},
        },
        store::{memory::MemoryStore, NewPermission, PermissionLevels},
    };
    use anyhow::Result;
    use axum::http::HeaderValue;

    struct Fixture {
        store: Arc<MemoryStore>,
        authorizer: Authorizer,
        permissions: Arc<PermissionService>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let sessions = Arc::new(SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            SessionConfig::new(),
        ));
        let permissions = Arc::new(PermissionService::new(store.clone(), store.clone()));
        let authorizer = Authorizer::new(sessions, store.clone(), permissions.clone())
            .with_trust_proxy_headers(true);
        Fixture {
            store,
            authorizer,
            permissions,
        }
    }

    fn request_headers(token: &str, address: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(address));
        headers.insert("user-agent", HeaderValue::from_static("X"));
        if let Ok(value) = HeaderValue::from_str(&format!("session_token={token}")) {
            headers.insert("cookie", value);
        }
        headers
    }

    async fn logged_in(fixture: &Fixture, role_name: &str) -> Result<(Session, Principal)> {
        let role = fixture.store.add_role(role_name);
        let principal = fixture.store.add_principal("staff@palestra.dev", role.id, "hash");
        let session = fixture
            .authorizer
            .sessions()
            .issue_session(
                principal.id,
                SessionKind::Access,
                &ClientFingerprint::new("1.2.3.4", "X"),
            )
            .await?;
        Ok((session, principal))
    }

    #[tokio::test]
    async fn stage_a_requires_a_credential() {
        let fixture = fixture();
        let result = fixture
            .authorizer
            .authenticate_request(&HeaderMap::new(), None)
            .await;
        assert!(matches!(result, Err(AuthError::MissingCredential)));
    }

    #[tokio::test]
    async fn stage_a_resolves_principal_and_role() -> Result<()> {
        let fixture = fixture();
        let (session, principal) = logged_in(&fixture, "staff").await?;

        let context = fixture
            .authorizer
            .authenticate_request(&request_headers(&session.token, "1.2.3.4"), None)
            .await?;
        assert_eq!(context.principal, principal);
        assert_eq!(context.role.name, "staff");
        assert!(context.grant.is_none());

        let moved = fixture
            .authorizer
            .authenticate_request(&request_headers(&session.token, "9.9.9.9"), None)
            .await;
        assert!(matches!(moved, Err(AuthError::BindingMismatch)));
        Ok(())
    }

    #[tokio::test]
    async fn stage_a_denies_when_principal_vanished() -> Result<()> {
        let fixture = fixture();
        let session = fixture
            .authorizer
            .sessions()
            .issue_session(404, SessionKind::Access, &ClientFingerprint::new("1.2.3.4", "X"))
            .await?;
        let result = fixture
            .authorizer
            .authenticate_request(&request_headers(&session.token, "1.2.3.4"), None)
            .await;
        assert!(matches!(result, Err(AuthError::PrincipalNotFound(404))));
        Ok(())
    }

    #[tokio::test]
    async fn stage_b_decisions() -> Result<()> {
        let fixture = fixture();
        let (session, _) = logged_in(&fixture, "staff").await?;
        let context = fixture
            .authorizer
            .authenticate_request(&request_headers(&session.token, "1.2.3.4"), None)
            .await?;

        let denied = fixture
            .authorizer
            .authorize_request(&context, &Method::GET, "/api/v1/protected/members", ResourceSource::Path)
            .await;
        assert!(matches!(denied, Err(AuthError::PermissionDenied { .. })));

        fixture
            .permissions
            .create(NewPermission {
                resource: "members".to_string(),
                role_id: context.role.id,
                levels: PermissionLevels {
                    create: 0,
                    read: 2,
                    update: 1,
                    delete: 0,
                },
            })
            .await?;

        let grant = fixture
            .authorizer
            .authorize_request(&context, &Method::GET, "/api/v1/protected/members", ResourceSource::Path)
            .await?;
        assert_eq!(grant.level, AccessLevel::Full);
        assert_eq!(grant.stored, 2);

        let grant = fixture
            .authorizer
            .authorize_request(&context, &Method::PATCH, "/ignored", ResourceSource::Tagged("members"))
            .await?;
        assert_eq!(grant.level, AccessLevel::Own);

        let unclassified = fixture
            .authorizer
            .authorize_request(&context, &Method::OPTIONS, "/api/v1/protected/members", ResourceSource::Path)
            .await;
        assert!(matches!(unclassified, Err(AuthError::Unclassifiable)));

        let no_resource = fixture
            .authorizer
            .authorize_request(&context, &Method::GET, "/api/v1/protected/42", ResourceSource::Path)
            .await;
        assert!(matches!(no_resource, Err(AuthError::Unclassifiable)));

        let ungoverned = fixture
            .authorizer
            .authorize_request(&context, &Method::GET, "/api/v1/protected/lockers", ResourceSource::Path)
            .await;
        assert!(matches!(ungoverned, Err(AuthError::UngovernedResource(_))));
        Ok(())
    }

    #[tokio::test]
    async fn stage_b_denies_unset_roles() -> Result<()> {
        let fixture = fixture();
        let (session, _) = logged_in(&fixture, "staff").await?;
        let mut context = fixture
            .authorizer
            .authenticate_request(&request_headers(&session.token, "1.2.3.4"), None)
            .await?;
        context.role.id = 0;
        let result = fixture
            .authorizer
            .authorize_request(&context, &Method::GET, "/", ResourceSource::Tagged("members"))
            .await;
        assert!(matches!(result, Err(AuthError::RoleUnresolved)));
        Ok(())
    }

    #[tokio::test]
    async fn stage_b_fails_closed_on_store_outage() -> Result<()> {
        let fixture = fixture();
        let (session, _) = logged_in(&fixture, "staff").await?;
        let context = fixture
            .authorizer
            .authenticate_request(&request_headers(&session.token, "1.2.3.4"), None)
            .await?;

        fixture.store.set_unavailable(true);
        let result = fixture
            .authorizer
            .authorize_request(&context, &Method::GET, "/", ResourceSource::Tagged("members"))
            .await;
        let Err(err) = result else {
            anyhow::bail!("store outage must deny");
        };
        assert!(err.is_store_failure());
        Ok(())
    }

    #[test]
    fn proxy_headers_only_count_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 10.0.0.1"));
        headers.insert("user-agent", HeaderValue::from_static("X"));
        let peer = Some(SocketAddr::from(([10, 0, 0, 9], 4242)));

        let trusted = client_fingerprint(&headers, peer, true);
        assert_eq!(trusted.address, "1.2.3.4");
        assert_eq!(trusted.agent, "X");

        let untrusted = client_fingerprint(&headers, peer, false);
        assert_eq!(untrusted.address, "10.0.0.9");

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("5.6.7.8"));
        assert_eq!(client_fingerprint(&headers, None, true).address, "5.6.7.8");
    }
}
