use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware::from_fn_with_state,
    routing::{get, post},
    Extension, Router,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{
        cache::{MemorySessionStore, PgSessionStore, SessionStore},
        middleware::{authenticate, authorize},
        Authorizer, Gate, PermissionService, ResourceSource, SessionConfig, SessionManager,
    },
    bootstrap::{self, SystemUser},
    store::{postgres::apply_schema, IdentityStore, MemberStore, PgStore},
};

pub(crate) mod handlers;
mod openapi;

pub use openapi::openapi;


const REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// Where session records live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionBackend {
    Postgres,
    /// Single instance only; sessions are lost on restart.
    Memory,
}

/// Shared state of every handler.
pub struct AppState {
    pub authorizer: Arc<Authorizer>,
    pub sessions: Arc<SessionManager>,
    pub identities: Arc<dyn IdentityStore>,
    pub permissions: Arc<PermissionService>,
    pub members: Arc<dyn MemberStore>,
    pub system_role_id: i64,
    pub cookie_secure: bool,
}

#[derive(Debug)]
pub struct ServerOptions {
    pub session_backend: SessionBackend,
    pub cookie_secure: bool,
    pub trust_proxy_headers: bool,
    pub resource_from_path: bool,
    pub system_role: String,
    pub system_user: Option<SystemUser>,
}

/// Build the application router.
///
/// Governed groups get Stage B with their own resource tag, then the whole
/// protected tree gets Stage A, so Stage A runs first.
pub fn router(state: Arc<AppState>, resource_from_path: bool) -> Router {
    let authorizer = state.authorizer.clone();
    let gate = |resource: &'static str| {
        let source = if resource_from_path {
            ResourceSource::Path
        } else {
            ResourceSource::Tagged(resource)
        };
        from_fn_with_state(Gate::new(authorizer.clone(), source), authorize)
    };

    let roles = Router::new()
        .route(
            "/roles",
            get(handlers::roles::list_roles).post(handlers::roles::create_role),
        )
        .route(
            "/roles/:id",
            get(handlers::roles::get_role)
                .put(handlers::roles::update_role)
                .patch(handlers::roles::update_role)
                .delete(handlers::roles::delete_role),
        )
        .route_layer(gate("roles"));

    let permissions = Router::new()
        .route(
            "/permissions",
            get(handlers::permissions::list_permissions)
                .post(handlers::permissions::create_permission),
        )
        .route(
            "/permissions/:id",
            get(handlers::permissions::get_permission)
                .put(handlers::permissions::update_permission)
                .patch(handlers::permissions::update_permission)
                .delete(handlers::permissions::delete_permission),
        )
        .route(
            "/roles/:id/permissions",
            get(handlers::permissions::list_role_permissions)
                .post(handlers::permissions::create_role_permission),
        )
        .route_layer(gate("permissions"));

    let users = Router::new()
        .route(
            "/users",
            get(handlers::users::list_users).post(handlers::users::create_user),
        )
        .route(
            "/users/:id",
            get(handlers::users::get_user)
                .put(handlers::users::update_user)
                .patch(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )
        .route_layer(gate("users"));

    let members = Router::new()
        .route(
            "/members",
            get(handlers::members::list_members).post(handlers::members::create_member),
        )
        .route(
            "/members/:id",
            get(handlers::members::get_member)
                .put(handlers::members::update_member)
                .patch(handlers::members::update_member)
                .delete(handlers::members::delete_member),
        )
        .route_layer(gate("members"));

    let subscriptions = Router::new()
        .route(
            "/members/:id/subscriptions",
            get(handlers::members::list_subscriptions)
                .post(handlers::members::create_subscription),
        )
        .route(
            "/members/:id/subscriptions/:sub_id",
            get(handlers::members::get_subscription)
                .put(handlers::members::update_subscription)
                .patch(handlers::members::update_subscription)
                .delete(handlers::members::delete_subscription),
        )
        .route_layer(gate("subscriptions"));

    let protected = Router::new()
        .merge(roles)
        .merge(permissions)
        .merge(users)
        .merge(members)
        .merge(subscriptions)
        .route_layer(from_fn_with_state(authorizer.clone(), authenticate));

    let session_routes = Router::new()
        .route("/logout", post(handlers::auth::logout))
        .route("/logout-all", post(handlers::auth::logout_all))
        .route("/session", get(handlers::auth::session))
        .route_layer(from_fn_with_state(authorizer, authenticate));

    let auth = Router::new()
        .route("/login", post(handlers::auth::login))
        .route("/refresh", post(handlers::auth::refresh))
        .merge(session_routes);

    Router::new()
        .route(
            "/health",
            get(handlers::health::health).head(handlers::health::health),
        )
        .nest("/api/v1/auth", auth)
        .nest("/api/v1/protected", protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(Extension(state))
}

/// Start the server
/// # Errors
/// Return error if the database is unreachable, bootstrap fails or the
/// listener cannot bind
pub async fn new(
    port: u16,
    dsn: SecretString,
    session_config: SessionConfig,
    options: ServerOptions,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    apply_schema(&pool)
        .await
        .context("Failed to apply database schema")?;

    let store = Arc::new(PgStore::new(pool.clone()));
    let identities: Arc<dyn IdentityStore> = store.clone();
    let members: Arc<dyn MemberStore> = store.clone();
    let permissions = Arc::new(PermissionService::new(store.clone(), store));

    let system_role = bootstrap::run(
        identities.as_ref(),
        &permissions,
        &options.system_role,
        options.system_user,
    )
    .await
    .context("Failed to bootstrap the system role")?;

    let session_store: Arc<dyn SessionStore> = match options.session_backend {
        SessionBackend::Postgres => {
            let store = PgSessionStore::new(pool);
            store.spawn_reaper(REAPER_INTERVAL);
            Arc::new(store)
        }
        SessionBackend::Memory => Arc::new(MemorySessionStore::new()),
    };
    let sessions = Arc::new(SessionManager::new(session_store, session_config));

    let authorizer = Arc::new(
        Authorizer::new(sessions.clone(), identities.clone(), permissions.clone())
            .with_trust_proxy_headers(options.trust_proxy_headers),
    );

    let state = Arc::new(AppState {
        authorizer,
        sessions,
        identities,
        permissions,
        members,
        system_role_id: system_role.id,
        cookie_secure: options.cookie_secure,
    });

    let app = router(state, options.resource_from_path).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
