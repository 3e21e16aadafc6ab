// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.
//!
//! - `validate`: Validate the configuration file
//! - `version`: Show version information
//! - `simulate`: Run a synthetic workload

mod simulate;
mod validate;
mod version;

pub use simulate::simulate;
pub use validate::validate;
pub use version::version;

use uasub_config::{ConfigLoader, ServerConfig};

use crate::cli::{Cli, Commands};
use crate::error::{BinError, BinResult};
use crate::logging::init_logging;

/// Executes the command selected on the command line.
pub async fn execute(cli: Cli) -> BinResult<()> {
    match cli.command.clone() {
        Commands::Validate(args) => validate::validate(&cli, args),
        Commands::Version => version::version(&cli),
        Commands::Simulate(args) => simulate::simulate(&cli, args).await,
    }
}

/// Loads the configuration named on the command line.
pub(crate) fn load(cli: &Cli) -> BinResult<ServerConfig> {
    ConfigLoader::new()
        .load(&cli.config)
        .map_err(|e| BinError::from(e).with_context(format!("loading {}", cli.config.display())))
}

/// Installs the global subscriber from flags and the loaded configuration.
pub(crate) fn init_logging_from(cli: &Cli, config: &ServerConfig) -> BinResult<()> {
    init_logging(
        &cli.effective_log_level(config.logging.level),
        cli.effective_log_format(&config.logging),
    )
}

// =============================================================================
// Tests
// =============================================================================
