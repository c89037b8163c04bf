//! CLI argument definitions for metricast-worker.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Metricast composite data worker.
///
/// Serves one RPC method per configured composite, synthesizing
/// higher-level measurements out of raw samples held by the upstream
/// cache service.
#[derive(Parser, Debug)]
#[command(name = "metricast-worker")]
#[command(version, about, long_about = None)]
pub struct WorkerCli {
    /// Path to metricast.toml configuration file.
    #[arg(short, long, default_value = "metricast.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration and composite definitions, then exit.
    #[arg(long)]
    pub validate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_path() {
        let cli = WorkerCli::try_parse_from(["metricast-worker"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("metricast.toml"));
        assert!(!cli.validate);
    }

    #[test]
    fn overrides_are_parsed() {
        let cli = WorkerCli::try_parse_from([
            "metricast-worker",
            "-c",
            "/etc/metricast/metricast.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--validate",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/metricast/metricast.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert!(cli.validate);
    }
}
