// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use uasub_server::limits::MAX_NOTIFICATIONS_PER_PUBLISH_CEILING;
use uasub_server::revise::DEFAULT_MAX_KEEP_ALIVE_COUNT;
use uasub_server::MAX_CACHED_MESSAGES;

use crate::cli::Cli;
use crate::error::BinResult;

/// Prints component versions and the engine's fixed protocol constants.
pub fn version(cli: &Cli) -> BinResult<()> {
    let components = [
        ("uasub", crate::VERSION),
        ("uasub-core", uasub_core::VERSION),
        ("uasub-server", uasub_server::VERSION),
        ("uasub-config", uasub_config::VERSION),
    ];

    println!("uasub {}", crate::VERSION);
    if cli.quiet {
        return Ok(());
    }

    println!();
    for (name, version) in components {
        println!("  {name:<14} {version}");
    }
    println!();
    println!("Engine constants:");
    println!("  retransmission queue      {MAX_CACHED_MESSAGES} messages per subscription");
    println!("  notifications per publish {MAX_NOTIFICATIONS_PER_PUBLISH_CEILING} max");
    println!("  minimum keep-alive count  {DEFAULT_MAX_KEEP_ALIVE_COUNT}");
    println!();
    println!(
        "Built for {}-{}. PolyForm Noncommercial License 1.0.0.",
        std::env::consts::ARCH,
        std::env::consts::OS
    );

    Ok(())
}
