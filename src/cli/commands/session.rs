use anyhow::{anyhow, Result};
use clap::{builder::PossibleValuesParser, Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;

use crate::{
    api::SessionBackend,
    auth::{RefreshPolicy, SessionConfig},
};

pub const ARG_SESSION_STORE: &str = "session-store";
pub const ARG_ACCESS_TTL: &str = "access-ttl-seconds";
pub const ARG_REFRESH_TTL: &str = "refresh-ttl-seconds";
pub const ARG_STORE_TIMEOUT: &str = "store-timeout-ms";
pub const ARG_REFRESH_POLICY: &str = "refresh-policy";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_TRUST_PROXY_HEADERS: &str = "trust-proxy-headers";
pub const ARG_RESOURCE_FROM_PATH: &str = "resource-from-path";

#[derive(Debug, Clone)]
pub struct Options {
    pub backend: SessionBackend,
    pub access_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
    pub store_timeout_ms: u64,
    pub refresh_policy: RefreshPolicy,
    pub cookie_secure: bool,
    pub trust_proxy_headers: bool,
    pub resource_from_path: bool,
}

impl Options {
    /// Parse session and admission arguments from matches.
    ///
    /// # Errors
    /// Returns an error for unknown backends or policies and zero durations.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let backend = match matches.get_one::<String>(ARG_SESSION_STORE).map(String::as_str) {
            Some("postgres") | None => SessionBackend::Postgres,
            Some("memory") => SessionBackend::Memory,
            Some(other) => return Err(anyhow!("unknown session store: {other}")),
        };
        let refresh_policy = match matches.get_one::<String>(ARG_REFRESH_POLICY).map(String::as_str) {
            Some("revoke") | None => RefreshPolicy::RevokePrevious,
            Some("expire") => RefreshPolicy::LeaveToExpire,
            Some(other) => return Err(anyhow!("unknown refresh policy: {other}")),
        };

        let positive = |id: &str, default: u64| -> Result<u64> {
            let value = matches.get_one::<u64>(id).copied().unwrap_or(default);
            if value == 0 {
                Err(anyhow!("--{id} must be greater than zero"))
            } else {
                Ok(value)
            }
        };

        Ok(Self {
            backend,
            access_ttl_seconds: positive(ARG_ACCESS_TTL, 1800)?,
            refresh_ttl_seconds: positive(ARG_REFRESH_TTL, 604_800)?,
            store_timeout_ms: positive(ARG_STORE_TIMEOUT, 2000)?,
            refresh_policy,
            cookie_secure: matches.get_flag(ARG_COOKIE_SECURE),
            trust_proxy_headers: matches.get_flag(ARG_TRUST_PROXY_HEADERS),
            resource_from_path: matches.get_flag(ARG_RESOURCE_FROM_PATH),
        })
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new()
            .with_access_ttl(Duration::from_secs(self.access_ttl_seconds))
            .with_refresh_ttl(Duration::from_secs(self.refresh_ttl_seconds))
            .with_store_timeout(Duration::from_millis(self.store_timeout_ms))
            .with_refresh_policy(self.refresh_policy)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    with_admission_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_STORE)
                .long(ARG_SESSION_STORE)
                .help("Where session records are kept")
                .env("PALESTRA_SESSION_STORE")
                .default_value("postgres")
                .value_parser(PossibleValuesParser::new(["postgres", "memory"])),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access session TTL in seconds")
                .env("PALESTRA_ACCESS_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long(ARG_REFRESH_TTL)
                .help("Refresh session TTL in seconds")
                .env("PALESTRA_REFRESH_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT)
                .long(ARG_STORE_TIMEOUT)
                .help("Upper bound for every session or permission store call, in milliseconds")
                .env("PALESTRA_STORE_TIMEOUT_MS")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_POLICY)
                .long(ARG_REFRESH_POLICY)
                .help("What happens to the access session presented on refresh")
                .env("PALESTRA_REFRESH_POLICY")
                .default_value("revoke")
                .value_parser(PossibleValuesParser::new(["revoke", "expire"])),
        )
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Mark session cookies Secure")
                .env("PALESTRA_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
}

fn with_admission_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TRUST_PROXY_HEADERS)
                .long(ARG_TRUST_PROXY_HEADERS)
                .help("Take the client address from X-Forwarded-For / X-Real-IP")
                .env("PALESTRA_TRUST_PROXY_HEADERS")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_RESOURCE_FROM_PATH)
                .long(ARG_RESOURCE_FROM_PATH)
                .help("Derive the governed resource from the request path instead of the route tag")
                .env("PALESTRA_RESOURCE_FROM_PATH")
                .action(ArgAction::SetTrue),
        )
}
