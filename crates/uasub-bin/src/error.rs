// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the `uasub` binary.
//!
//! Every variant maps to a process exit code:
//!
//! | code | cause                                   |
//! |------|-----------------------------------------|
//! | 1    | configuration (flags or file)           |
//! | 2    | startup (logging, signal handlers)      |
//! | 3    | simulation task failure                 |
//! | 4    | I/O or output rendering                 |
//! | 5    | engine service error                    |

use thiserror::Error;

/// Result type alias for binary operations.
pub type BinResult<T> = Result<T, BinError>;

/// Errors surfaced by the `uasub` commands.
#[derive(Debug, Error)]
pub enum BinError {
    /// Invalid flag or configuration value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Startup failed before the command could run.
    #[error("Startup error: {0}")]
    Initialization(String),

    /// A simulation task failed.
    #[error("Simulation error: {0}")]
    Simulation(String),

    /// I/O or output rendering failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// Loading the configuration file failed.
    #[error(transparent)]
    Config(#[from] uasub_config::ConfigError),

    /// The engine rejected a service call.
    #[error("Engine error: {0}")]
    Engine(#[from] uasub_core::UaError),

    /// Another error with a description of what was being attempted.
    #[error("{context}: {source}")]
    WithContext {
        /// What was being attempted.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<BinError>,
    },
}

impl BinError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a startup error.
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    /// Creates a simulation error.
    pub fn simulation(msg: impl Into<String>) -> Self {
        Self::Simulation(msg.into())
    }

    /// Wraps the error with what was being attempted.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Process exit code, see the module table.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Config(_) => 1,
            Self::Initialization(_) => 2,
            Self::Simulation(_) => 3,
            Self::Io(_) => 4,
            Self::Engine(_) => 5,
            Self::WithContext { source, .. } => source.exit_code(),
        }
    }
}

impl From<std::io::Error> for BinError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BinError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("failed to render output: {err}"))
    }
}

impl From<anyhow::Error> for BinError {
    fn from(err: anyhow::Error) -> Self {
        Self::Simulation(format!("{err:#}"))
    }
}

/// Prints the error chain to stderr and exits with the mapped code.
pub fn report_error_and_exit(error: BinError) -> ! {
    eprintln!("Error: {error}");
    let mut source = std::error::Error::source(&error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {cause}");
        source = cause.source();
    }
    std::process::exit(error.exit_code())
}

// =============================================================================
// Tests
// =============================================================================
