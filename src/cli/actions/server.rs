use crate::{
    api::{self, ServerOptions},
    bootstrap::SystemUser,
    cli::commands::session,
};
use anyhow::Result;
use secrecy::SecretString;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub session: session::Options,
    pub system_role: String,
    pub system_user: Option<SystemUser>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, bootstrap fails or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!(
        port = args.port,
        session_store = ?args.session.backend,
        refresh_policy = ?args.session.refresh_policy,
        "Starting server"
    );

    let session_config = args.session.session_config();

    let options = ServerOptions {
        session_backend: args.session.backend,
        cookie_secure: args.session.cookie_secure,
        trust_proxy_headers: args.session.trust_proxy_headers,
        resource_from_path: args.session.resource_from_path,
        system_role: args.system_role,
        system_user: args.system_user,
    };

    api::new(args.port, args.dsn, session_config, options).await
}
