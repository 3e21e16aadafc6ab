// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uasub-bin
//!
//! Command line front end for the uasub publishing engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                  main.rs                    │
//! └──────────────────────┬──────────────────────┘
//!                        │
//!                 ┌──────▼──────┐
//!                 │   cli.rs    │
//!                 └──────┬──────┘
//!                        │
//!          ┌─────────────┼─────────────┐
//!          ▼             ▼             ▼
//!    ┌──────────┐  ┌──────────┐  ┌──────────┐
//!    │ commands │  │ runtime  │  │ logging  │
//!    └──────────┘  └────┬─────┘  └──────────┘
//!                       │
//!                ┌──────▼──────┐
//!                │  shutdown   │
//!                └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Validate configuration
//! uasub -c /etc/uasub/uasub.yaml validate
//!
//! # Show version
//! uasub version
//!
//! # Run a 30 second synthetic workload
//! uasub simulate --duration 30s --subscriptions 4 --items 50
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::{SimulationReport, SimulationRuntime};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
