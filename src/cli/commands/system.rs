use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::{api::handlers::normalize_email, bootstrap::SystemUser};

pub const ARG_SYSTEM_ROLE: &str = "system-role";
pub const ARG_SYSTEM_USER_EMAIL: &str = "system-user-email";
pub const ARG_SYSTEM_USER_PASSWORD: &str = "system-user-password";

#[derive(Debug)]
pub struct Options {
    pub role: String,
    pub user: Option<SystemUser>,
}

impl Options {
    /// Parse the system identity arguments.
    ///
    /// # Errors
    /// Returns an error if the role name is blank.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let role = matches
            .get_one::<String>(ARG_SYSTEM_ROLE)
            .map(|role| role.trim().to_string())
            .filter(|role| !role.is_empty())
            .ok_or_else(|| anyhow::anyhow!("--{ARG_SYSTEM_ROLE} cannot be empty"))?;

        // clap enforces that both or neither are present.
        let user = matches
            .get_one::<String>(ARG_SYSTEM_USER_EMAIL)
            .zip(matches.get_one::<String>(ARG_SYSTEM_USER_PASSWORD))
            .map(|(email, password)| SystemUser {
                email: normalize_email(email),
                password: SecretString::from(password.clone()),
            });

        Ok(Self { role, user })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SYSTEM_ROLE)
                .long(ARG_SYSTEM_ROLE)
                .help("Name of the role holding full access to every governed resource")
                .env("PALESTRA_SYSTEM_ROLE")
                .default_value("system"),
        )
        .arg(
            Arg::new(ARG_SYSTEM_USER_EMAIL)
                .long(ARG_SYSTEM_USER_EMAIL)
                .help("Email of the system user created at start-up")
                .env("PALESTRA_SYSTEM_USER_EMAIL")
                .requires(ARG_SYSTEM_USER_PASSWORD),
        )
        .arg(
            Arg::new(ARG_SYSTEM_USER_PASSWORD)
                .long(ARG_SYSTEM_USER_PASSWORD)
                .help("Password of the system user created at start-up")
                .env("PALESTRA_SYSTEM_USER_PASSWORD")
                .hide_env_values(true)
                .requires(ARG_SYSTEM_USER_EMAIL),
        )
}
