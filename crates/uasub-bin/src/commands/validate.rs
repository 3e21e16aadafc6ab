// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use uasub_config::ServerConfig;

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::BinResult;

/// Loads and validates the configuration, then prints a summary.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config = super::load(cli)?;
    let warnings = collect_warnings(&config);

    match args.format {
        OutputFormat::Text => {
            let limits = &config.limits;
            println!("✓ Configuration is valid: {}", cli.config.display());
            println!();
            println!("Summary:");
            println!("  Server: {}", config.server.name);
            println!(
                "  Publishing interval: {} ms .. {} ms (default {} ms)",
                limits.min_publishing_interval_ms,
                limits.max_publishing_interval_ms,
                limits.default_publishing_interval_ms
            );
            println!(
                "  Lifetime: {} ms .. {} ms",
                limits.min_subscription_lifetime_ms, limits.max_subscription_lifetime_ms
            );
            println!(
                "  Subscriptions: {} per session, {} total",
                limits.max_subscriptions_per_session, limits.max_subscriptions
            );
            println!(
                "  Monitored items: {} per session, {} total",
                limits.max_monitored_items_per_session, limits.max_monitored_items
            );
            println!("  Pending publish requests: {}", limits.max_pending_publish_requests);
            println!(
                "  Logging: {} ({})",
                config.logging.level.as_str(),
                config.logging.format.as_str()
            );

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "valid": true,
                "config_path": cli.config.display().to_string(),
                "server": config.server.name,
                "warnings": warnings,
                "config": if args.show_config { Some(&config) } else { None },
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Settings that are valid but likely unintended.
pub(crate) fn collect_warnings(config: &ServerConfig) -> Vec<String> {
    let limits = &config.limits;
    let mut warnings = Vec::new();

    if limits.min_subscription_lifetime_ms < 3.0 * limits.min_publishing_interval_ms {
        warnings.push(
            "min_subscription_lifetime_ms is below three minimum publishing intervals".to_string(),
        );
    }
    if limits.max_pending_publish_requests < limits.max_subscriptions_per_session {
        warnings.push(format!(
            "max_pending_publish_requests ({}) is below max_subscriptions_per_session ({}); \
             late subscriptions may starve",
            limits.max_pending_publish_requests, limits.max_subscriptions_per_session
        ));
    }
    let simulated_items = config.simulation.subscriptions * config.simulation.items_per_subscription;
    if simulated_items > limits.max_monitored_items_per_session {
        warnings.push(format!(
            "simulation needs {simulated_items} monitored items but a session may hold {}",
            limits.max_monitored_items_per_session
        ));
    }

    warnings
}
