//! Session and authorization resolution.
//!
//! Components, leaves first:
//! - [`cache`]: key/value session store with per-entry TTL.
//! - [`token`]: random opaque tokens.
//! - [`session`]: issue, resolve, refresh and revoke sessions.
//! - [`permission`]: the `(resource, role)` permission matrix.
//! - [`classifier`]: verb and path to `(action, resource)`.
//! - [`middleware`]: the two admission stages in front of governed routes.

pub mod cache;
pub mod classifier;
pub mod cookie;
pub mod error;
pub mod middleware;
pub mod password;
pub mod permission;
pub mod session;
pub mod token;

pub use error::AuthError;
pub use middleware::{Authorized, Authorizer, Gate, RequestContext, ResourceSource};
pub use permission::{AccessLevel, Action, Grant, PermissionError, PermissionService};
pub use session::{ClientFingerprint, RefreshPolicy, Session, SessionConfig, SessionKind, SessionManager};
