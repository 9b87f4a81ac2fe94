//! CLI argument definitions for irongate-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use irongate_core::config::IronGateConfig;

/// Irongate packet gateway daemon.
///
/// Assembles the hook dispatcher, NAT engine and QoS engine, loads rule
/// files and runs the NAT aging task until shutdown.
#[derive(Parser, Debug)]
#[command(name = "irongate-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to irongate.toml configuration file.
    #[arg(short, long, default_value = "/etc/irongate/irongate.toml")]
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

    /// Validate configuration and rule files, then exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Apply command-line overrides on top of file and environment values.
    pub fn apply_overrides(&self, config: &mut IronGateConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
    }
}
