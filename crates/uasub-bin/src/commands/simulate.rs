// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `simulate` command.

use uasub_config::ServerConfig;

use crate::cli::{Cli, SimulateArgs};
use crate::error::{BinError, BinResult};
use crate::runtime::SimulationRuntime;
use crate::shutdown::ShutdownCoordinator;

/// Runs the synthetic workload and prints a JSON report.
pub async fn simulate(cli: &Cli, args: SimulateArgs) -> BinResult<()> {
    let mut config = super::load(cli)?;
    super::init_logging_from(cli, &config)?;
    apply_overrides(&mut config, &args)?;

    let coordinator = ShutdownCoordinator::new();
    let signals = coordinator.clone();
    let listener = tokio::spawn(async move { signals.wait_for_os_signal().await });

    let report = SimulationRuntime::new(config)
        .run(coordinator.shutdown_signal().wait())
        .await;
    listener.abort();

    println!("{}", serde_json::to_string_pretty(&report?)?);
    Ok(())
}

/// Applies command line overrides to the `simulation` block.
pub(crate) fn apply_overrides(config: &mut ServerConfig, args: &SimulateArgs) -> BinResult<()> {
    let simulation = &mut config.simulation;
    if let Some(duration) = &args.duration {
        simulation.duration = **duration;
    }
    if let Some(subscriptions) = args.subscriptions {
        simulation.subscriptions = subscriptions;
    }
    if let Some(items) = args.items {
        simulation.items_per_subscription = items;
    }
    if let Some(rate) = args.rate {
        simulation.change_rate_hz = rate;
    }
    if let Some(interval) = args.publishing_interval {
        simulation.publishing_interval_ms = interval;
    }

    simulation
        .validate()
        .map_err(|e| BinError::from(e).with_context("invalid simulate arguments"))
}
