//! Session store adapter: a key/value cache with per-entry TTL and
//! segment-wise key enumeration.
//!
//! Two backends ship with the crate:
//! - [`PgSessionStore`] keeps entries in the `session_cache` table and relies
//!   on a reaper task to evict expired rows.
//! - [`MemorySessionStore`] keeps entries in process, for single-instance
//!   deployments and tests.
//!
//! Neither backend guarantees eviction at the exact expiry instant, so callers
//! must still compare the record's own expiry.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::{
    collections::HashMap,
    fmt,
    time::{Duration, Instant},
};
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{debug, error, Instrument};

const SEPARATOR: char = ':';

/// Longest retention either backend honors; larger TTLs are clamped.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.min(MAX_TTL)
}

/// `None` when the clock cannot represent the deadline; such entries never lapse.
fn deadline(now: Instant, ttl: Duration) -> Option<Instant> {
    now.checked_add(clamp_ttl(ttl))
}

/// Key pattern made of `:`-separated segments, each either a literal or a
/// wildcard matching exactly one segment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyPattern {
    segments: Vec<Option<String>>,
}

impl KeyPattern {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn literal(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(Some(segment.into()));
        self
    }

    #[must_use]
    pub fn any(mut self) -> Self {
        self.segments.push(None);
        self
    }

    /// Segment-wise match; the segment count must be identical.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        let mut parts = key.split(SEPARATOR);
        for segment in &self.segments {
            match (segment, parts.next()) {
                (_, None) => return false,
                (Some(expected), Some(part)) if expected != part => return false,
                _ => {}
            }
        }
        parts.next().is_none()
    }

    /// SQL `LIKE` form (escape character `\`). `%` may span separators, so
    /// results still go through [`KeyPattern::matches`].
    #[must_use]
    pub fn to_like(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Some(literal) => escape_like(literal),
                None => "%".to_string(),
            })
            .collect::<Vec<_>>()
            .join(":")
    }
}

// Patterns embed raw tokens; keep them out of logs.
impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} segments>", self.segments.len())
    }
}

fn escape_like(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace `key`; the entry is evicted after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Value for `key`, `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Every live key matching `pattern`.
    async fn keys(&self, pattern: &KeyPattern) -> Result<Vec<String>>;

    /// Delete the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Liveness check used by `/health`.
    async fn ping(&self) -> Result<()>;
}

struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: deadline(now, ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn keys(&self, pattern: &KeyPattern) -> Result<Vec<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && pattern.matches(key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let removed = keys
            .iter()
            .filter(|key| entries.remove(key.as_str()).is_some())
            .count();
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Session store backed by the `session_cache` table.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Periodically delete expired rows. Reads already ignore them; this only
    /// keeps the table small.
    pub fn spawn_reaper(&self, every: Duration) -> JoinHandle<()> {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match purge_expired(&pool).await {
                    Ok(0) => {}
                    Ok(count) => debug!("Evicted {count} expired session entries"),
                    Err(err) => error!("Failed to evict expired session entries: {err:#}"),
                }
            }
        })
    }
}

pub(crate) async fn purge_expired(pool: &PgPool) -> Result<u64> {
    let query = "DELETE FROM session_cache WHERE expires_at <= NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to purge expired session entries")?;
    Ok(result.rows_affected())
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let query = r"
            INSERT INTO session_cache (key, value, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 millisecond'))
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let ttl_millis = i64::try_from(clamp_ttl(ttl).as_millis()).unwrap_or(i64::MAX);
        sqlx::query(query)
            .bind(key)
            .bind(value)
            .bind(ttl_millis)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to store session entry")?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let query = "SELECT value FROM session_cache WHERE key = $1 AND expires_at > NOW()";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to read session entry")?;
        Ok(row.map(|row| row.get("value")))
    }

    async fn keys(&self, pattern: &KeyPattern) -> Result<Vec<String>> {
        let query = r"
            SELECT key FROM session_cache
            WHERE key LIKE $1 ESCAPE '\'
              AND expires_at > NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(pattern.to_like())
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to enumerate session keys")?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("key"))
            .filter(|key| pattern.matches(key))
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let query = "DELETE FROM session_cache WHERE key = ANY($1)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(keys)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session entries")?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("session store ping failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_pattern(token: &str) -> KeyPattern {
        KeyPattern::new()
            .literal("session")
            .literal("access")
            .any()
            .literal(token)
    }

    #[test]
    fn pattern_matches_segment_wise() {
        let pattern = token_pattern("abc");
        assert!(pattern.matches("session:access:7:abc"));
        assert!(!pattern.matches("session:access:7:abcd"));
        assert!(!pattern.matches("session:refresh:7:abc"));
        assert!(!pattern.matches("session:access:7:8:abc"));
        assert!(!pattern.matches("session:access:abc"));
    }

    #[test]
    fn subject_pattern_does_not_match_prefixed_ids() {
        let pattern = KeyPattern::new()
            .literal("session")
            .any()
            .literal("7")
            .any();
        assert!(pattern.matches("session:access:7:tok"));
        assert!(pattern.matches("session:refresh:7:tok"));
        assert!(!pattern.matches("session:access:17:tok"));
    }

    #[test]
    fn to_like_escapes_wildcards() {
        let pattern = token_pattern("a_b%c");
        assert_eq!(pattern.to_like(), r"session:access:%:a\_b\%c");
    }

    #[test]
    fn display_hides_literals() {
        let pattern = token_pattern("secret-token");
        assert!(!pattern.to_string().contains("secret-token"));
    }

    #[tokio::test]
    async fn memory_store_round_trip() -> Result<()> {
        let store = MemorySessionStore::new();
        store
            .set("session:access:7:abc", "{}", Duration::from_secs(60))
            .await?;
        assert_eq!(
            store.get("session:access:7:abc").await?.as_deref(),
            Some("{}")
        );
        assert_eq!(store.keys(&token_pattern("abc")).await?.len(), 1);
        assert_eq!(
            store
                .delete(&["session:access:7:abc".to_string()])
                .await?,
            1
        );
        assert_eq!(store.get("session:access:7:abc").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn memory_store_hides_expired_entries() -> Result<()> {
        let store = MemorySessionStore::new();
        store
            .set("session:access:7:abc", "{}", Duration::from_millis(1))
            .await?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.get("session:access:7:abc").await?, None);
        assert!(store.keys(&token_pattern("abc")).await?.is_empty());
        Ok(())
    }

    #[test]
    fn oversized_ttl_is_clamped() {
        let now = Instant::now();
        assert_eq!(deadline(now, Duration::MAX), now.checked_add(MAX_TTL));
        assert_eq!(
            deadline(now, Duration::from_secs(5)),
            Some(now + Duration::from_secs(5))
        );
        let entry = CacheEntry {
            value: String::new(),
            expires_at: None,
        };
        assert!(entry.is_live(now + Duration::from_secs(3600)));
        assert!(i64::try_from(clamp_ttl(Duration::MAX).as_millis()).is_ok());
    }

    #[tokio::test]
    async fn memory_store_accepts_unbounded_ttl() -> Result<()> {
        let store = MemorySessionStore::new();
        store
            .set("session:refresh:7:abc", "{}", Duration::MAX)
            .await?;
        assert_eq!(
            store.get("session:refresh:7:abc").await?.as_deref(),
            Some("{}")
        );
        Ok(())
    }
}
