// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `validate`: Validate the configuration file
//! - `version`: Show version information
//! - `simulate`: Drive the publishing engine with a synthetic workload

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use uasub_config::{LogLevel, LoggingConfig};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// uasub - OPC UA subscription publishing engine
#[derive(Parser, Debug)]
#[command(
    name = "uasub",
    author = "Sylvex <contact@sylvex.io>",
    version = uasub_server::VERSION,
    about = "Server-side OPC UA subscription publishing engine",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "uasub.yaml",
        env = "UASUB_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Enable quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Validate the configuration file
    ///
    /// Loads the configuration, applies environment overrides, checks every
    /// limit and prints a summary.
    Validate(ValidateArgs),

    /// Show component versions
    Version,

    /// Run the engine against a synthetic client
    ///
    /// Creates subscriptions and monitored items, feeds sampled values and
    /// keeps publish requests outstanding until the duration elapses or the
    /// process is interrupted. Prints a JSON summary at the end.
    Simulate(SimulateArgs),
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `validate` command.
#[derive(Args, Debug, Default, Clone)]
pub struct ValidateArgs {
    /// Show parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `simulate` command. Unset values come from the
/// `simulation` block of the configuration.
#[derive(Args, Debug, Default, Clone)]
pub struct SimulateArgs {
    /// Run duration (e.g. `30s`, `2m`)
    #[arg(short, long)]
    pub duration: Option<humantime::Duration>,

    /// Number of subscriptions
    #[arg(short, long)]
    pub subscriptions: Option<usize>,

    /// Monitored items per subscription
    #[arg(short, long)]
    pub items: Option<usize>,

    /// Value changes per second for each item
    #[arg(short, long)]
    pub rate: Option<f64>,

    /// Requested publishing interval in milliseconds
    #[arg(long)]
    pub publishing_interval: Option<f64>,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

impl From<LogFormat> for uasub_config::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Text => uasub_config::LogFormat::Text,
            LogFormat::Json => uasub_config::LogFormat::Json,
            LogFormat::Compact => uasub_config::LogFormat::Compact,
        }
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose logging is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose && !self.quiet
    }

    /// Resolves the log level from flags, then the configured level.
    pub fn effective_log_level(&self, configured: LogLevel) -> String {
        if self.quiet {
            "warn".to_string()
        } else if self.verbose {
            "debug".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| configured.as_str().to_string())
        }
    }

    /// Resolves the log format from flags, then the configured format.
    pub fn effective_log_format(&self, logging: &LoggingConfig) -> uasub_config::LogFormat {
        self.log_format.map(Into::into).unwrap_or(logging.format)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["uasub", "validate", "--show-config"]);
        if let Commands::Validate(args) = cli.command {
            assert!(args.show_config);
            assert_eq!(args.format, OutputFormat::Text);
        } else {
            panic!("Expected Validate command");
        }
    }

    #[test]
    fn test_config_path() {
        let cli = Cli::parse_from(["uasub", "-c", "/etc/uasub/config.yaml", "version"]);
        assert_eq!(cli.config, PathBuf::from("/etc/uasub/config.yaml"));
        assert!(matches!(cli.command, Commands::Version));
    }

    #[test]
    fn test_simulate_arguments() {
        let cli = Cli::parse_from([
            "uasub",
            "simulate",
            "--duration",
            "1m 30s",
            "-s",
            "3",
            "--items",
            "8",
        ]);
        let Commands::Simulate(args) = cli.command else {
            panic!("Expected Simulate command");
        };
        let duration: Duration = args.duration.unwrap().into();
        assert_eq!(duration, Duration::from_secs(90));
        assert_eq!(args.subscriptions, Some(3));
        assert_eq!(args.items, Some(8));
        assert_eq!(args.rate, None);
    }

    #[test]
    fn test_log_level_precedence() {
        let cli = Cli::parse_from(["uasub", "version"]);
        assert_eq!(cli.effective_log_level(LogLevel::Error), "error");

        let cli = Cli::parse_from(["uasub", "-l", "trace", "version"]);
        assert_eq!(cli.effective_log_level(LogLevel::Error), "trace");

        let cli = Cli::parse_from(["uasub", "-q", "-l", "trace", "version"]);
        assert_eq!(cli.effective_log_level(LogLevel::Error), "warn");

        let cli = Cli::parse_from(["uasub", "-v", "version"]);
        assert!(cli.is_verbose());
        assert_eq!(cli.effective_log_level(LogLevel::Info), "debug");
    }

    #[test]
    fn test_log_format_precedence() {
        let logging = LoggingConfig {
            format: uasub_config::LogFormat::Json,
            ..Default::default()
        };
        let cli = Cli::parse_from(["uasub", "version"]);
        assert_eq!(cli.effective_log_format(&logging), uasub_config::LogFormat::Json);

        let cli = Cli::parse_from(["uasub", "--log-format", "compact", "version"]);
        assert_eq!(cli.effective_log_format(&logging), uasub_config::LogFormat::Compact);
    }
}
