//! Logging setup for the controller process.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingSection;

/// Logging options as given on the command line, merged over the
/// `[logging]` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub quiet: bool,
    /// Number of `-v` flags.
    pub verbosity: u8,
    pub level: String,
    pub filter: Option<String>,
    pub json: bool,
    pub timestamps: bool,
}

impl LogSettings {
    pub fn from_config(section: &LoggingSection) -> Self {
        Self {
            quiet: false,
            verbosity: 0,
            level: section.level.clone(),
            filter: section.filter.clone(),
            json: section.json,
            timestamps: section.timestamps,
        }
    }

    /// Build the filter with the following precedence:
    /// 1. `quiet` shows errors only
    /// 2. otherwise `RUST_LOG` if set, else the level raised by verbosity
    /// 3. extra directives from `filter` are added on top
    pub fn env_filter(&self) -> EnvFilter {
        if self.quiet {
            return EnvFilter::new("error");
        }

        let base_level = match self.verbosity {
            0 => self.level.as_str(),
            1 => "debug",
            _ => "trace",
        };
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_level));

        if let Some(custom) = &self.filter {
            for directive in custom.split(',').filter(|d| !d.trim().is_empty()) {
                if let Ok(d) = directive.trim().parse() {
                    filter = filter.add_directive(d);
                }
            }
        }
        filter
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to install log subscriber: {0}")]
pub struct LoggingError(String);

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(settings: &LogSettings) -> Result<(), LoggingError> {
    let filter = settings.env_filter();
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (settings.json, settings.timestamps) {
        (true, _) => builder.json().try_init(),
        (false, true) => builder.try_init(),
        (false, false) => builder.without_time().try_init(),
    }
    .map_err(|err| LoggingError(err.to_string()))
}
