//! Path-based request classification.
//!
//! Used when governed routes are not tagged with their resource: the resource
//! is the last purely alphabetic path segment below [`PROTECTED_PREFIX`].

use axum::http::Method;

use super::permission::Action;

pub const PROTECTED_PREFIX: &str = "/api/v1/protected";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    pub action: Option<Action>,
    pub resource: Option<String>,
}

impl Classification {
    /// Both halves, or `None` when either is missing.
    #[must_use]
    pub fn into_parts(self) -> Option<(Action, String)> {
        Some((self.action?, self.resource?))
    }
}

#[must_use]
pub fn classify(method: &Method, path: &str) -> Classification {
    Classification {
        action: Action::from_method(method),
        resource: resource_from_path(path),
    }
}

/// Last alphabetic segment after the protected prefix.
#[must_use]
pub fn resource_from_path(path: &str) -> Option<String> {
    let rest = path.strip_prefix(PROTECTED_PREFIX)?;
    // "/api/v1/protectedfoo" is not under the prefix.
    if !(rest.is_empty() || rest.starts_with('/')) {
        return None;
    }
    rest.split('/')
        .rev()
        .find(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_alphabetic()))
        .map(str::to_string)
}
