// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! uasub - OPC UA subscription publishing engine
//!
//! Main binary entry point.

use uasub_bin::cli::Cli;
use uasub_bin::error::report_error_and_exit;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    if let Err(error) = uasub_bin::commands::execute(cli).await {
        report_error_and_exit(error);
    }
}
