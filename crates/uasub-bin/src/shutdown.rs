// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Stopping a run on SIGTERM / SIGINT (Ctrl+C elsewhere).
//!
//! ```text
//!   OS signal ──▶ wait_for_os_signal ──▶ initiate_shutdown ──▶ every ShutdownSignal
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::info;

use crate::error::{BinError, BinResult};

// =============================================================================
// ShutdownCoordinator
// =============================================================================

/// Fans a single stop request out to any number of waiters.
///
/// ```ignore
/// let coordinator = ShutdownCoordinator::new();
/// let signals = coordinator.clone();
/// tokio::spawn(async move { signals.wait_for_os_signal().await });
/// runtime.run(coordinator.shutdown_signal().wait()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    notify: broadcast::Sender<()>,
    initiated: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator that has not fired yet.
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1);
        Self {
            notify,
            initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a waiter. Waiters created after the stop resolve at once.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.notify.subscribe(),
            initiated: Arc::clone(&self.initiated),
        }
    }

    /// Fires the stop. Only the first call has an effect.
    pub fn initiate_shutdown(&self) {
        if !self.initiated.swap(true, Ordering::SeqCst) {
            info!("Stopping");
            let _ = self.notify.send(());
        }
    }

    /// Whether the stop has fired.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Waits for a termination signal from the OS and fires the stop.
    pub async fn wait_for_os_signal(&self) -> BinResult<()> {
        if self.is_shutdown_initiated() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let install = |kind: SignalKind, name: &str| {
                signal(kind).map_err(|e| BinError::init(format!("cannot install {name} handler: {e}")))
            };
            let mut terminate = install(SignalKind::terminate(), "SIGTERM")?;
            let mut interrupt = install(SignalKind::interrupt(), "SIGINT")?;

            tokio::select! {
                _ = terminate.recv() => info!(signal = "SIGTERM", "Signal received"),
                _ = interrupt.recv() => info!(signal = "SIGINT", "Signal received"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c()
                .await
                .map_err(|e| BinError::init(format!("cannot install Ctrl+C handler: {e}")))?;
            info!(signal = "ctrl_c", "Signal received");
        }

        self.initiate_shutdown();
        Ok(())
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ShutdownSignal
// =============================================================================

/// Resolves once the coordinator fires.
#[derive(Debug)]
pub struct ShutdownSignal {
    receiver: broadcast::Receiver<()>,
    initiated: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Waits for the stop.
    pub async fn wait(mut self) {
        if self.initiated.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.receiver.recv().await;
    }
}

// =============================================================================
// Tests
// =============================================================================
