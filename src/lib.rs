//! # Palestra (Gym Membership Administration)
//!
//! `palestra` is the administration backend of a gym: members, subscriptions,
//! staff users and their roles. Most of the API is plain CRUD; the part with
//! real weight is how a request is admitted.
//!
//! ## Sessions
//!
//! A login issues two opaque tokens, each backed by a record in the session
//! store with its own TTL:
//!
//! - **Access session** (`session_token` cookie): short lived, presented on
//!   every protected request.
//! - **Refresh session** (`refresh_token` cookie): long lived, only accepted by
//!   `/api/v1/auth/refresh` to mint a new access session.
//!
//! Records are bound to the client address and user agent seen at issuance and
//! are rejected when either changes.
//!
//! ## Authorization
//!
//! Every governed route runs two stages: *authenticate* (token → session →
//! principal → role) and *authorize* (verb → action, route → resource, then a
//! lookup in the permission matrix). Any failure denies the request; store
//! errors and timeouts deny too.

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod cli;
pub mod store;
#[cfg(test)]
mod test_support;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }
}
