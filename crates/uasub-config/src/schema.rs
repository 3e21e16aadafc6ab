// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema.
//!
//! ```yaml
//! server:
//!   name: plant-a
//! limits:
//!   min_publishing_interval_ms: 50
//!   max_subscriptions_per_session: 20
//! logging:
//!   level: debug
//!   format: json
//! simulation:
//!   subscriptions: 4
//!   items_per_subscription: 10
//!   change_rate_hz: 20
//!   duration: 30s
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uasub_server::SubscriptionLimits;

use crate::error::{ConfigError, ConfigResult};

/// Default server label.
pub const DEFAULT_SERVER_NAME: &str = "uasub";

// =============================================================================
// ServerConfig
// =============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Server identity.
    #[serde(default)]
    pub server: ServerSection,

    /// Subscription engine limits.
    #[serde(default)]
    pub limits: SubscriptionLimits,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Parameters of the `simulate` command.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl ServerConfig {
    /// Validates the whole configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.server.validate()?;
        self.limits.validate()?;
        self.logging.validate()?;
        self.simulation.validate()?;
        Ok(())
    }
}

/// Server identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Label used in logs.
    #[serde(default = "default_server_name")]
    pub name: String,
}

fn default_server_name() -> String {
    DEFAULT_SERVER_NAME.to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: default_server_name(),
        }
    }
}

impl ServerSection {
    /// Validates the server section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::validation("server.name", "must not be empty"));
        }
        Ok(())
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Validates the logging configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parses a level name, accepting `warning` as an alias.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-field text.
    #[default]
    Text,
    /// Single-line compact text.
    Compact,
    /// JSON lines.
    Json,
}

impl LogFormat {
    /// Returns the format name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }

    /// Parses a format name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "text" | "pretty" => Some(LogFormat::Text),
            "compact" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

// =============================================================================
// Simulation
// =============================================================================

/// Workload driven by the `simulate` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Subscriptions created by the synthetic client.
    #[serde(default = "default_sim_subscriptions")]
    pub subscriptions: usize,

    /// Monitored items per subscription.
    #[serde(default = "default_sim_items")]
    pub items_per_subscription: usize,

    /// Value changes per second for each item.
    #[serde(default = "default_sim_change_rate")]
    pub change_rate_hz: f64,

    /// Requested publishing interval (ms).
    #[serde(default = "default_sim_publishing_interval")]
    pub publishing_interval_ms: f64,

    /// Publish requests the client keeps outstanding.
    #[serde(default = "default_sim_outstanding")]
    pub outstanding_publish_requests: usize,

    /// How long the run lasts.
    #[serde(default = "default_sim_duration", with = "humantime_serde")]
    pub duration: Duration,
}

fn default_sim_subscriptions() -> usize {
    2
}

fn default_sim_items() -> usize {
    10
}

fn default_sim_change_rate() -> f64 {
    10.0
}

fn default_sim_publishing_interval() -> f64 {
    250.0
}

fn default_sim_outstanding() -> usize {
    3
}

fn default_sim_duration() -> Duration {
    Duration::from_secs(10)
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            subscriptions: default_sim_subscriptions(),
            items_per_subscription: default_sim_items(),
            change_rate_hz: default_sim_change_rate(),
            publishing_interval_ms: default_sim_publishing_interval(),
            outstanding_publish_requests: default_sim_outstanding(),
            duration: default_sim_duration(),
        }
    }
}

impl SimulationConfig {
    /// Validates the simulation block.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.subscriptions == 0 {
            return Err(ConfigError::validation(
                "simulation.subscriptions",
                "must be greater than 0",
            ));
        }
        if !self.change_rate_hz.is_finite() || self.change_rate_hz <= 0.0 {
            return Err(ConfigError::validation(
                "simulation.change_rate_hz",
                "must be a positive finite number",
            ));
        }
        if !self.publishing_interval_ms.is_finite() || self.publishing_interval_ms <= 0.0 {
            return Err(ConfigError::validation(
                "simulation.publishing_interval_ms",
                "must be a positive finite number",
            ));
        }
        if self.outstanding_publish_requests == 0 {
            return Err(ConfigError::validation(
                "simulation.outstanding_publish_requests",
                "must be greater than 0",
            ));
        }
        if self.duration.is_zero() {
            return Err(ConfigError::validation(
                "simulation.duration",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Delay between two value changes of one item.
    pub fn change_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.change_rate_hz)
    }
}

// =============================================================================
// Tests
// =============================================================================
