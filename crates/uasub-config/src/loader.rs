// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading.
//!
//! # Loading Pipeline
//!
//! 1. Read the file
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders
//! 3. Parse by extension (YAML, TOML or JSON)
//! 4. Apply environment variable overrides
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! UASUB_SERVER_NAME=plant-a
//! UASUB_LOG_LEVEL=debug
//! UASUB_LOG_FORMAT=json
//! UASUB_LIMITS_MAX_SUBSCRIPTIONS=500
//! UASUB_LIMITS_MIN_PUBLISHING_INTERVAL_MS=50
//! ```

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{LogFormat, LogLevel, ServerConfig};

/// Default prefix of override environment variables.
pub const DEFAULT_ENV_PREFIX: &str = "UASUB";

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads [`ServerConfig`] from files or strings.
///
/// # Examples
///
/// ```no_run
/// use uasub_config::loader::ConfigLoader;
///
/// let loader = ConfigLoader::new();
/// let config = loader.load("uasub.yaml").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Environment variable prefix.
    env_prefix: String,

    /// Whether placeholders and overrides are read from the environment.
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a loader with default settings.
    pub fn new() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
        }
    }

    /// Creates a builder for configuring the loader.
    pub fn builder() -> ConfigLoaderBuilder {
        ConfigLoaderBuilder::new()
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads configuration from a file. The format follows the extension:
    /// `.yaml`/`.yml`, `.toml` or `.json`.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<ServerConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let content = self.read_file(path)?;
        let format = ConfigFormat::from_path(path)?;
        let mut config = self.parse_content(&content, format, path)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;

        info!(server = %config.server.name, "Configuration loaded");
        debug!(
            max_subscriptions = config.limits.max_subscriptions,
            max_monitored_items = config.limits.max_monitored_items,
            min_publishing_interval_ms = config.limits.min_publishing_interval_ms,
            "Effective subscription limits"
        );

        Ok(config)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<ServerConfig> {
        let content = if self.resolve_env_vars {
            resolve_env_placeholders(content)
        } else {
            content.to_string()
        };
        let mut config = parse_str(&content, format)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
    }

    fn parse_content(
        &self,
        content: &str,
        format: ConfigFormat,
        path: &Path,
    ) -> ConfigResult<ServerConfig> {
        let content = if self.resolve_env_vars {
            resolve_env_placeholders(content)
        } else {
            content.to_string()
        };

        parse_str(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })
    }

    /// Applies `{PREFIX}_*` environment variable overrides.
    fn apply_env_overrides(&self, config: &mut ServerConfig) -> ConfigResult<()> {
        if let Some(value) = self.var("SERVER_NAME") {
            config.server.name = value;
        }

        if let Some(value) = self.var("LOG_LEVEL") {
            config.logging.level = LogLevel::parse(&value).ok_or_else(|| {
                ConfigError::invalid_env_var(self.name("LOG_LEVEL"), "expected trace, debug, info, warn or error")
            })?;
        }
        if let Some(value) = self.var("LOG_FORMAT") {
            config.logging.format = LogFormat::parse(&value).ok_or_else(|| {
                ConfigError::invalid_env_var(self.name("LOG_FORMAT"), "expected text, compact or json")
            })?;
        }

        let limits = &mut config.limits;
        self.override_number("LIMITS_MIN_PUBLISHING_INTERVAL_MS", &mut limits.min_publishing_interval_ms)?;
        self.override_number("LIMITS_MAX_PUBLISHING_INTERVAL_MS", &mut limits.max_publishing_interval_ms)?;
        self.override_number(
            "LIMITS_DEFAULT_PUBLISHING_INTERVAL_MS",
            &mut limits.default_publishing_interval_ms,
        )?;
        self.override_number("LIMITS_MIN_SUBSCRIPTION_LIFETIME_MS", &mut limits.min_subscription_lifetime_ms)?;
        self.override_number("LIMITS_MAX_SUBSCRIPTION_LIFETIME_MS", &mut limits.max_subscription_lifetime_ms)?;
        self.override_number(
            "LIMITS_MAX_NOTIFICATIONS_PER_PUBLISH",
            &mut limits.max_notifications_per_publish,
        )?;
        self.override_number(
            "LIMITS_MAX_SUBSCRIPTIONS_PER_SESSION",
            &mut limits.max_subscriptions_per_session,
        )?;
        self.override_number("LIMITS_MAX_SUBSCRIPTIONS", &mut limits.max_subscriptions)?;
        self.override_number(
            "LIMITS_MAX_MONITORED_ITEMS_PER_SESSION",
            &mut limits.max_monitored_items_per_session,
        )?;
        self.override_number("LIMITS_MAX_MONITORED_ITEMS", &mut limits.max_monitored_items)?;
        self.override_number(
            "LIMITS_MAX_PENDING_PUBLISH_REQUESTS",
            &mut limits.max_pending_publish_requests,
        )?;
        self.override_number(
            "LIMITS_MAX_PENDING_TRANSFER_NOTIFICATIONS",
            &mut limits.max_pending_transfer_notifications,
        )?;
        self.override_number(
            "LIMITS_MAX_MONITORED_ITEM_QUEUE_SIZE",
            &mut limits.max_monitored_item_queue_size,
        )?;

        Ok(())
    }

    fn name(&self, suffix: &str) -> String {
        format!("{}_{}", self.env_prefix, suffix)
    }

    fn var(&self, suffix: &str) -> Option<String> {
        env::var(self.name(suffix)).ok()
    }

    fn override_number<T: FromStr>(&self, suffix: &str, target: &mut T) -> ConfigResult<()> {
        if let Some(value) = self.var(suffix) {
            *target = value.trim().parse().map_err(|_| {
                ConfigError::invalid_env_var(self.name(suffix), format!("expected a number, got '{value}'"))
            })?;
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigLoaderBuilder
// =============================================================================

/// Builder for [`ConfigLoader`].
#[derive(Debug, Default)]
pub struct ConfigLoaderBuilder {
    env_prefix: Option<String>,
    resolve_env_vars: Option<bool>,
}

impl ConfigLoaderBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the environment prefix.
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn resolve_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = Some(enabled);
        self
    }

    /// Builds the loader.
    pub fn build(self) -> ConfigLoader {
        let mut loader = ConfigLoader::new();
        if let Some(prefix) = self.env_prefix {
            loader.env_prefix = prefix;
        }
        if let Some(resolve_env_vars) = self.resolve_env_vars {
            loader.resolve_env_vars = resolve_env_vars;
        }
        loader
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_str(content: &str, format: ConfigFormat) -> ConfigResult<ServerConfig> {
    match format {
        ConfigFormat::Yaml => yaml_parse(content),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// YAML goes through the `config` crate.
fn yaml_parse<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .map_err(|e| ConfigError::serialization(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

/// Replaces `${VAR}` and `${VAR:default}` with environment values.
///
/// Unknown variables without a default are left in place. An unterminated
/// `${` is copied through unchanged.
pub fn resolve_env_placeholders(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return result;
        };

        let body = &after[..end];
        let (name, default) = match body.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (body, None),
        };

        match (env::var(name), default) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(default)) => result.push_str(default),
            (Err(_), None) => {
                warn!(variable = name, "Environment variable not found");
                result.push_str(&rest[start..start + 2 + end + 1]);
            }
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<ServerConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with the specified format.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<ServerConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

// =============================================================================
// Tests
// =============================================================================
