//! Command-line interface of the strata inspection tool.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use strata_controller::LogSettings;
use strata_primitives::ServiceScope;
use strata_version::Version;

/// Strata - inspect controller configuration and topology offline
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Controller configuration file
    #[arg(long, short, global = true, value_name = "PATH", default_value = "strata.toml")]
    pub(crate) config: PathBuf,

    /// Logging configuration
    #[command(flatten)]
    pub(crate) logs: LogArgs,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Logging configuration
#[derive(Debug, Args, Clone, Default)]
#[command(next_help_heading = "Logging")]
pub(crate) struct LogArgs {
    /// Silence all output
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Verbose mode (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbosity: u8,

    /// Log filter directive (e.g., "strata_dispatch=debug")
    #[arg(long = "log.filter", global = true, value_name = "DIRECTIVE")]
    pub(crate) filter: Option<String>,

    /// Use JSON format for log output
    #[arg(long = "log.json", global = true)]
    pub(crate) json: bool,
}

impl LogArgs {
    /// Merge the flags over the `[logging]` section of the config file.
    pub(crate) fn apply(&self, mut settings: LogSettings) -> LogSettings {
        settings.quiet = self.quiet;
        settings.verbosity = self.verbosity;
        if self.filter.is_some() {
            settings.filter = self.filter.clone();
        }
        settings.json |= self.json;
        settings
    }
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Compare plugin versions and check them against support ranges
    #[command(subcommand)]
    Version(VersionCommand),

    /// Inspect a stored topology
    #[command(subcommand)]
    Topology(TopologyCommand),

    /// Manage the controller configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub(crate) enum VersionCommand {
    /// Print how two versions order
    Compare { a: Version, b: Version },

    /// Check a version against the configured range of a service
    Check {
        version: Version,
        /// Service whose range applies; the default range otherwise
        #[arg(long)]
        service: Option<String>,
    },
}

/// Topology file selection shared by the topology commands.
#[derive(Debug, Args, Clone)]
pub(crate) struct TopologyFile {
    /// Topology file; defaults to `storage.topology_path` of the config
    #[arg(long, value_name = "PATH")]
    pub(crate) file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum TopologyCommand {
    /// Replay a stored topology through the topology checks
    Validate(TopologyFile),

    /// Print the network tree with node and group counts
    Show(TopologyFile),

    /// List the nodes a dispatch would address
    Expand {
        #[command(flatten)]
        file: TopologyFile,
        /// One of network, network-with-subnetworks, node-group, node
        #[arg(long)]
        scope: ServiceScope,
        #[arg(long, required = true, num_args = 1..)]
        targets: Vec<String>,
        #[arg(long)]
        service: String,
    },
}

#[derive(Debug, Subcommand)]
pub(crate) enum ConfigCommand {
    /// Write the default configuration if the file doesn't exist and print it
    Init,

    /// Print the effective configuration of a service on a node
    Resolve {
        #[command(flatten)]
        file: TopologyFile,
        #[arg(long)]
        node: String,
        #[arg(long)]
        service: String,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_expand() {
        let cli = Cli::try_parse_from([
            "strata",
            "-v",
            "topology",
            "expand",
            "--scope",
            "node-group",
            "--targets",
            "g1",
            "g2",
            "--service",
            "fw",
        ])
        .unwrap();
        assert_eq!(cli.logs.verbosity, 1);
        match cli.command {
            Commands::Topology(TopologyCommand::Expand { scope, targets, .. }) => {
                assert_eq!(scope, ServiceScope::NodeGroup);
                assert_eq!(targets, ["g1", "g2"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_version() {
        let cli = Cli::try_parse_from(["strata", "version", "compare", "v1.2", "v1.2.0-1"]).unwrap();
        assert!(matches!(cli.command, Commands::Version(VersionCommand::Compare { .. })));
        assert!(Cli::try_parse_from(["strata", "version", "compare", "1.2", "v1.3"]).is_err());
    }
}
