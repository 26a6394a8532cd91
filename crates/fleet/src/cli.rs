//! Command-line interface handling for the fleet master.
//!
//! Every option here overrides the matching setting of the configuration file.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the bind address
    pub bind_address: Option<String>,
    /// Optional override for the master's node name
    pub node_name: Option<String>,
    /// Optional override for the group storage directory
    pub storage_dir: Option<PathBuf>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Run without reading commands from stdin
    pub no_console: bool,
}

impl CliArgs {
    fn command() -> Command {
        Command::new("fleet")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Master node of a game-server fleet")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("fleet.toml"),
            )
            .arg(
                Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("ADDRESS")
                    .help("Address nodes connect to (e.g., 0.0.0.0:7000)"),
            )
            .arg(
                Arg::new("name")
                    .short('n')
                    .long("name")
                    .value_name("NAME")
                    .help("Node name of the master"),
            )
            .arg(
                Arg::new("storage")
                    .short('s')
                    .long("storage")
                    .value_name("DIR")
                    .help("Directory holding the group documents"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("no-console")
                    .long("no-console")
                    .help("Do not read commands from stdin")
                    .action(ArgAction::SetTrue),
            )
    }

    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("fleet.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            node_name: matches.get_one::<String>("name").cloned(),
            storage_dir: matches.get_one::<String>("storage").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            no_console: matches.get_flag("no-console"),
        }
    }
}
