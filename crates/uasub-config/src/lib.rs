// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uasub-config
//!
//! Configuration for the uasub subscription publishing engine.
//!
//! ## Features
//!
//! - **Schema Definition**: engine limits, logging and simulation settings
//! - **Multi-Format Support**: YAML, TOML and JSON configuration files
//! - **Environment Overrides**: `${VAR:default}` placeholders and `UASUB_*` variables
//!
//! ## Quick Start
//!
//! ```no_run
//! use uasub_config::load_config;
//!
//! let config = load_config("uasub.yaml").unwrap();
//! println!("Server: {}", config.server.name);
//! println!("Max subscriptions: {}", config.limits.max_subscriptions);
//! ```
//!
//! ## Configuration Schema
//!
//! - `server` - server label
//! - `limits` - subscription engine limits
//! - `logging` - log level and format
//! - `simulation` - workload of the `simulate` command

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod schema;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    load_config, load_config_str, resolve_env_placeholders, ConfigFormat, ConfigLoader,
    ConfigLoaderBuilder, DEFAULT_ENV_PREFIX,
};
pub use schema::{
    LogFormat, LogLevel, LoggingConfig, ServerConfig, ServerSection, SimulationConfig,
    DEFAULT_SERVER_NAME,
};
pub use uasub_server::SubscriptionLimits;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
