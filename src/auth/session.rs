//! Session issuance, resolution, refresh and revocation.
//!
//! Flow Overview:
//! - Login issues a refresh session and an access session for the subject.
//! - Each protected request resolves the access token with a token-only key
//!   pattern, demands exactly one match, compares the recorded expiry and then
//!   the client binding.
//! - Refresh resolves the refresh token the same way and issues a new access
//!   session; the previous access session is revoked or left to expire.
//!
//! Store keys are `session:{kind}:{subject}:{token}` so a subject's sessions
//! can be enumerated without knowing their tokens.

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, error, info, instrument};

use super::{
    cache::{KeyPattern, SessionStore},
    error::{bounded, AuthError},
    token::{generate_token, is_well_formed},
};

const KEY_PREFIX: &str = "session";
const DEFAULT_ACCESS_TTL_SECONDS: u64 = 30 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_STORE_TIMEOUT_MILLIS: u64 = 2_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Presented on every protected request.
    Access,
    /// Only exchanged for a new access session.
    Refresh,
}

impl SessionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }

    #[must_use]
    pub const fn token_bytes(self) -> usize {
        match self {
            Self::Access => 32,
            Self::Refresh => 64,
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client characteristics a session is bound to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientFingerprint {
    pub address: String,
    pub agent: String,
}

impl ClientFingerprint {
    #[must_use]
    pub fn new(address: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            agent: agent.into(),
        }
    }
}

/// One active login instance, stored as JSON under its key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub kind: SessionKind,
    pub subject_id: i64,
    pub client_address: String,
    pub client_agent: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl Session {
    #[must_use]
    pub fn key(&self) -> String {
        session_key(self.kind, self.subject_id, &self.token)
    }

    #[must_use]
    pub fn is_expired_at(&self, now_unix: i64) -> bool {
        now_unix >= self.expires_at
    }

    /// Seconds left before expiry, zero once expired.
    #[must_use]
    pub fn remaining_seconds(&self, now_unix: i64) -> u64 {
        u64::try_from(self.expires_at.saturating_sub(now_unix)).unwrap_or(0)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"***")
            .field("kind", &self.kind)
            .field("subject_id", &self.subject_id)
            .field("client_address", &self.client_address)
            .field("client_agent", &self.client_agent)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// What happens to the access session presented alongside a refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshPolicy {
    RevokePrevious,
    LeaveToExpire,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    access_ttl: Duration,
    refresh_ttl: Duration,
    store_timeout: Duration,
    refresh_policy: RefreshPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::from_secs(DEFAULT_ACCESS_TTL_SECONDS),
            refresh_ttl: Duration::from_secs(DEFAULT_REFRESH_TTL_SECONDS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MILLIS),
            refresh_policy: RefreshPolicy::RevokePrevious,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh_policy = policy;
        self
    }

    #[must_use]
    pub fn ttl(&self, kind: SessionKind) -> Duration {
        match kind {
            SessionKind::Access => self.access_ttl,
            SessionKind::Refresh => self.refresh_ttl,
        }
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn refresh_policy(&self) -> RefreshPolicy {
        self.refresh_policy
    }
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create and store a new session for `subject_id`.
    ///
    /// # Errors
    /// Fails when the entropy source fails, the store is unreachable, or the
    /// new token is already present in the store.
    #[instrument(skip(self, client), fields(kind = %kind))]
    pub async fn issue_session(
        &self,
        subject_id: i64,
        kind: SessionKind,
        client: &ClientFingerprint,
    ) -> Result<Session, AuthError> {
        let token = generate_token(kind.token_bytes()).map_err(AuthError::TokenGeneration)?;

        let existing = self.keys(&token_pattern(kind, &token)).await?;
        if !existing.is_empty() {
            error!("Generated session token collides with {} stored entries", existing.len());
            return Err(AuthError::TokenCollision);
        }

        let ttl = self.config.ttl(kind);
        let issued_at = now_unix();
        let session = Session {
            token,
            kind,
            subject_id,
            client_address: client.address.clone(),
            client_agent: client.agent.clone(),
            issued_at,
            expires_at: issued_at.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
        };

        let value = serde_json::to_string(&session)?;
        let key = session.key();
        bounded(self.config.store_timeout, self.store.set(&key, &value, ttl)).await?;

        info!(subject_id, "Session issued");
        Ok(session)
    }

    /// Look up the session for `token`.
    ///
    /// Exactly one store entry must match the token across all subjects;
    /// zero or several matches deny.
    ///
    /// # Errors
    /// Any lookup failure, including store outages, is a denial.
    #[instrument(skip(self, token), fields(kind = %kind))]
    pub async fn resolve_session(&self, token: &str, kind: SessionKind) -> Result<Session, AuthError> {
        if !is_well_formed(token) {
            return Err(AuthError::MalformedCredential);
        }

        let keys = self.keys(&token_pattern(kind, token)).await?;
        let key = match keys.as_slice() {
            [] => return Err(AuthError::SessionNotFound),
            [key] => key,
            many => {
                error!("{} session entries match one token", many.len());
                return Err(AuthError::AmbiguousSession {
                    matches: many.len(),
                });
            }
        };

        let Some(raw) = bounded(self.config.store_timeout, self.store.get(key)).await? else {
            // Evicted between enumeration and read.
            return Err(AuthError::SessionNotFound);
        };
        let session: Session = serde_json::from_str(&raw)?;

        if session.token != token || session.kind != kind || session.key() != *key {
            error!("Session record does not match its store key");
            return Err(AuthError::InconsistentRecord);
        }

        // Store eviction is not instantaneous; the record's expiry wins.
        if session.is_expired_at(now_unix()) {
            debug!(subject_id = session.subject_id, "Session past its expiry");
            return Err(AuthError::SessionExpired);
        }

        Ok(session)
    }

    /// Whether the client presenting the session is the one it was issued to.
    #[must_use]
    pub fn validate_binding(&self, session: &Session, client: &ClientFingerprint) -> bool {
        session.client_address == client.address && session.client_agent == client.agent
    }

    /// Resolve an access token and check its binding.
    ///
    /// # Errors
    /// See [`SessionManager::resolve_session`]; a binding mismatch also denies.
    pub async fn authenticate(
        &self,
        token: &str,
        client: &ClientFingerprint,
    ) -> Result<Session, AuthError> {
        let session = self.resolve_session(token, SessionKind::Access).await?;
        if !self.validate_binding(&session, client) {
            return Err(AuthError::BindingMismatch);
        }
        Ok(session)
    }

    /// Delete the entry for `token` belonging to `subject_id`, whatever its kind.
    ///
    /// # Errors
    /// Store outages.
    pub async fn revoke_session(&self, token: &str, subject_id: i64) -> Result<u64, AuthError> {
        if !is_well_formed(token) {
            return Ok(0);
        }
        let pattern = KeyPattern::new()
            .literal(KEY_PREFIX)
            .any()
            .literal(subject_id.to_string())
            .literal(token);
        self.delete_matching(&pattern).await
    }

    /// Delete every entry of `subject_id`, access and refresh alike.
    ///
    /// # Errors
    /// Store outages.
    #[instrument(skip(self))]
    pub async fn revoke_all_sessions(&self, subject_id: i64) -> Result<u64, AuthError> {
        let pattern = KeyPattern::new()
            .literal(KEY_PREFIX)
            .any()
            .literal(subject_id.to_string())
            .any();
        let removed = self.delete_matching(&pattern).await?;
        info!(subject_id, removed, "Revoked all sessions");
        Ok(removed)
    }

    /// Exchange a refresh token for a new access session bound to the same
    /// subject. `previous_access` is revoked under [`RefreshPolicy::RevokePrevious`].
    ///
    /// # Errors
    /// The refresh session must resolve and its binding must match.
    #[instrument(skip_all)]
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        previous_access: Option<&str>,
        client: &ClientFingerprint,
    ) -> Result<Session, AuthError> {
        let refresh = self.resolve_session(refresh_token, SessionKind::Refresh).await?;
        if !self.validate_binding(&refresh, client) {
            return Err(AuthError::BindingMismatch);
        }

        let access = self
            .issue_session(refresh.subject_id, SessionKind::Access, client)
            .await?;

        if self.config.refresh_policy == RefreshPolicy::RevokePrevious {
            if let Some(previous) = previous_access {
                let pattern = session_key_pattern(SessionKind::Access, refresh.subject_id, previous);
                self.delete_matching(&pattern).await?;
            }
        }

        Ok(access)
    }

    /// Liveness of the underlying store.
    ///
    /// # Errors
    /// Store outages or timeouts.
    pub async fn ping(&self) -> Result<(), AuthError> {
        bounded(self.config.store_timeout, self.store.ping()).await
    }

    async fn keys(&self, pattern: &KeyPattern) -> Result<Vec<String>, AuthError> {
        bounded(self.config.store_timeout, self.store.keys(pattern)).await
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<u64, AuthError> {
        let keys = self.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        bounded(self.config.store_timeout, self.store.delete(&keys)).await
    }
}

#[must_use]
pub fn session_key(kind: SessionKind, subject_id: i64, token: &str) -> String {
    format!("{KEY_PREFIX}:{kind}:{subject_id}:{token}")
}

fn session_key_pattern(kind: SessionKind, subject_id: i64, token: &str) -> KeyPattern {
    KeyPattern::new()
        .literal(KEY_PREFIX)
        .literal(kind.as_str())
        .literal(subject_id.to_string())
        .literal(token)
}

fn token_pattern(kind: SessionKind, token: &str) -> KeyPattern {
    KeyPattern::new()
        .literal(KEY_PREFIX)
        .literal(kind.as_str())
        .any()
        .literal(token)
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}
