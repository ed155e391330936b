use anyhow::{anyhow, Result};
use clap::{
    builder::{PossibleValuesParser, ValueParser},
    Arg, ArgAction, ArgMatches, Command,
};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";

/// How log lines are rendered on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// `None` leaves the subscriber at its ERROR floor.
    pub level: Option<Level>,
    pub format: LogFormat,
}

impl Options {
    /// Parse logging arguments from matches.
    ///
    /// # Errors
    /// Returns an error for an unknown log format.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let format = match matches.get_one::<String>(ARG_LOG_FORMAT).map(String::as_str) {
            Some("text") | None => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(anyhow!("unknown log format: {other}")),
        };

        Ok(Self {
            level: level_for(matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0)),
            format,
        })
    }
}

/// Each `-v` raises the floor by one step above ERROR.
#[must_use]
pub const fn level_for(verbosity: u8) -> Option<Level> {
    match verbosity {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

/// Accepts either a step count or a level name in `PALESTRA_LOG_LEVEL`.
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(steps) = level.parse::<u8>() {
            return if steps <= 4 {
                Ok(steps)
            } else {
                Err(format!("verbosity must be between 0 and 4, got {steps}"))
            };
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            other => Err(format!("unknown log level: {other}")),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Raise log verbosity: -v warn, -vv info, -vvv debug, -vvvv trace (default: error)")
                .env("PALESTRA_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .long(ARG_LOG_FORMAT)
                .help("Log line format, json emits one object per event")
                .env("PALESTRA_LOG_FORMAT")
                .default_value("text")
                .value_parser(PossibleValuesParser::new(["text", "json"])),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for(0), None);
        assert_eq!(level_for(1), Some(Level::WARN));
        assert_eq!(level_for(2), Some(Level::INFO));
        assert_eq!(level_for(3), Some(Level::DEBUG));
        assert_eq!(level_for(9), Some(Level::TRACE));
    }

    #[test]
    fn level_names_and_counts_are_accepted() {
        let cases = [
            ("DEBUG", Some(3)),
            ("4", Some(4)),
            ("5", None),
            ("loud", None),
        ];
        for (value, expected) in cases {
            temp_env::with_vars([("PALESTRA_LOG_LEVEL", Some(value))], || {
                let parsed = with_args(Command::new("palestra"))
                    .try_get_matches_from(["palestra"])
                    .ok()
                    .and_then(|matches| matches.get_one::<u8>(ARG_VERBOSITY).copied());
                assert_eq!(parsed, expected, "PALESTRA_LOG_LEVEL={value}");
            });
        }
    }

    #[test]
    fn json_format_is_selected_from_flag_and_env() -> Result<()> {
        temp_env::with_vars(
            [
                ("PALESTRA_LOG_FORMAT", None::<&str>),
                ("PALESTRA_LOG_LEVEL", None),
            ],
            || -> Result<()> {
                let matches = with_args(Command::new("palestra"))
                    .try_get_matches_from(["palestra", "--log-format", "json", "-vv"])?;
                let options = Options::parse(&matches)?;
                assert_eq!(options.format, LogFormat::Json);
                assert_eq!(options.level, Some(Level::INFO));
                Ok(())
            },
        )?;

        temp_env::with_vars(
            [
                ("PALESTRA_LOG_FORMAT", Some("json")),
                ("PALESTRA_LOG_LEVEL", None),
            ],
            || -> Result<()> {
                let matches = with_args(Command::new("palestra")).try_get_matches_from(["palestra"])?;
                let options = Options::parse(&matches)?;
                assert_eq!(options.format, LogFormat::Json);
                assert_eq!(options.level, None);
                Ok(())
            },
        )
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let result =
            with_args(Command::new("palestra")).try_get_matches_from(["palestra", "--log-format", "xml"]);
        assert!(result.is_err());
    }
}
