//! Credential carrier: session cookies and bearer headers.

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};
use std::time::Duration;

use super::session::SessionKind;

pub const ACCESS_COOKIE_NAME: &str = "session_token";
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";
/// Readable by scripts; carries no credential.
pub const MARKER_COOKIE_NAME: &str = "logged_in";

const ACCESS_COOKIE_PATH: &str = "/api/v1";
const REFRESH_COOKIE_PATH: &str = "/api/v1/auth";

#[must_use]
pub const fn cookie_name(kind: SessionKind) -> &'static str {
    match kind {
        SessionKind::Access => ACCESS_COOKIE_NAME,
        SessionKind::Refresh => REFRESH_COOKIE_NAME,
    }
}

const fn cookie_path(kind: SessionKind) -> &'static str {
    match kind {
        SessionKind::Access => ACCESS_COOKIE_PATH,
        SessionKind::Refresh => REFRESH_COOKIE_PATH,
    }
}

/// `HttpOnly` cookie carrying a session token for `ttl`.
///
/// # Errors
/// Fails if the token contains characters not allowed in a header.
pub fn session_cookie(
    kind: SessionKind,
    token: &str,
    ttl: Duration,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{}={token}; Path={}; HttpOnly; SameSite=Lax; Max-Age={}",
        cookie_name(kind),
        cookie_path(kind),
        ttl.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Expire the session cookie of `kind`.
///
/// # Errors
/// Never in practice; the value is static apart from the flags.
pub fn clear_session_cookie(
    kind: SessionKind,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{}=; Path={}; HttpOnly; SameSite=Lax; Max-Age=0",
        cookie_name(kind),
        cookie_path(kind)
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Marker telling a browser front-end a login exists.
///
/// # Errors
/// Never in practice.
pub fn marker_cookie(ttl: Option<Duration>, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = match ttl {
        Some(ttl) => format!(
            "{MARKER_COOKIE_NAME}=true; Path=/; SameSite=Lax; Max-Age={}",
            ttl.as_secs()
        ),
        None => format!("{MARKER_COOKIE_NAME}=; Path=/; SameSite=Lax; Max-Age=0"),
    };
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Value of the cookie called `name`, if sent.
#[must_use]
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, '=');
            Some((parts.next()?.trim(), parts.next()?.trim()))
        })
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Access token from the `Authorization` header, else from its cookie.
#[must_use]
pub fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    extract_bearer_token(headers).or_else(|| extract_cookie(headers, ACCESS_COOKIE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn access_cookie_attributes() -> Result<(), InvalidHeaderValue> {
        let cookie = session_cookie(SessionKind::Access, "abc", Duration::from_secs(1800), true)?;
        let cookie = cookie.to_str().unwrap_or_default();
        assert!(cookie.starts_with("session_token=abc;"));
        assert!(cookie.contains("Path=/api/v1;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=1800"));
        assert!(cookie.ends_with("; Secure"));
        Ok(())
    }

    #[test]
    fn refresh_cookie_is_scoped_to_auth_routes() -> Result<(), InvalidHeaderValue> {
        let cookie = session_cookie(SessionKind::Refresh, "xyz", Duration::from_secs(60), false)?;
        let cookie = cookie.to_str().unwrap_or_default();
        assert!(cookie.starts_with("refresh_token=xyz;"));
        assert!(cookie.contains("Path=/api/v1/auth;"));
        assert!(!cookie.contains("Secure"));
        Ok(())
    }

    #[test]
    fn cleared_cookies_expire_immediately() -> Result<(), InvalidHeaderValue> {
        let cookie = clear_session_cookie(SessionKind::Access, false)?;
        assert!(cookie.to_str().unwrap_or_default().contains("Max-Age=0"));
        let marker = marker_cookie(None, false)?;
        assert!(marker.to_str().unwrap_or_default().contains("Max-Age=0"));
        Ok(())
    }

    #[test]
    fn marker_cookie_is_script_readable() -> Result<(), InvalidHeaderValue> {
        let marker = marker_cookie(Some(Duration::from_secs(60)), false)?;
        let marker = marker.to_str().unwrap_or_default();
        assert!(marker.starts_with("logged_in=true;"));
        assert!(!marker.contains("HttpOnly"));
        Ok(())
    }

    #[test]
    fn extract_cookie_finds_named_value() {
        let headers = headers(&[("cookie", "a=1; session_token=tok; b=2")]);
        assert_eq!(extract_cookie(&headers, "session_token").as_deref(), Some("tok"));
        assert_eq!(extract_cookie(&headers, "missing"), None);
    }

    #[test]
    fn extract_cookie_scans_every_header() {
        let headers = headers(&[("cookie", "a=1"), ("cookie", "refresh_token=r")]);
        assert_eq!(extract_cookie(&headers, "refresh_token").as_deref(), Some("r"));
    }

    #[test]
    fn empty_cookie_values_are_absent() {
        let headers = headers(&[("cookie", "session_token=")]);
        assert_eq!(extract_cookie(&headers, "session_token"), None);
    }

    #[test]
    fn bearer_wins_over_cookie() {
        let headers = headers(&[
            ("authorization", "Bearer from-header"),
            ("cookie", "session_token=from-cookie"),
        ]);
        assert_eq!(extract_access_token(&headers).as_deref(), Some("from-header"));

        let headers = headers_only_cookie();
        assert_eq!(extract_access_token(&headers).as_deref(), Some("from-cookie"));
    }

    fn headers_only_cookie() -> HeaderMap {
        headers(&[("cookie", "session_token=from-cookie")])
    }

    #[test]
    fn malformed_bearer_is_ignored() {
        assert_eq!(extract_bearer_token(&headers(&[("authorization", "Basic abc")])), None);
        assert_eq!(extract_bearer_token(&headers(&[("authorization", "Bearer  ")])), None);
    }
}
