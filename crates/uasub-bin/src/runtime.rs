// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-process simulation runtime.
//!
//! Wires one session's [`SubscriptionManager`] to a synthetic sampling
//! feeder and a synthetic client:
//!
//! ```text
//!   feeder ──notify_data_change──▶ SubscriptionManager ◀──publish── client × N
//!     (interval = 1 / rate)              │                   (acks last data
//!                                        ▼                    message)
//!                                 publishing timers
//! ```
//!
//! The run stops when the configured duration elapses or the stop future
//! resolves, whichever comes first.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use uasub_config::{ServerConfig, SimulationConfig};
use uasub_core::{
    CreateSubscriptionRequest, DataValue, MonitoredItemCreateRequest, MonitoredItemId,
    PublishRequest, PublishResponse, SessionId, StatusCode, SubscriptionAcknowledgement,
    SubscriptionId,
};
use uasub_server::{SubscriptionDiagnostics, SubscriptionManager, SubscriptionManagerStats, SubscriptionRegistry};

use crate::error::BinResult;

/// Queue size requested for every simulated monitored item.
const SIMULATED_QUEUE_SIZE: u32 = 4;

/// Back-off after the server rejects a publish request for load.
const REJECTED_PUBLISH_BACKOFF: Duration = Duration::from_millis(10);

// =============================================================================
// Counters
// =============================================================================

#[derive(Debug, Default)]
struct SimulationCounters {
    values_fed: AtomicU64,
    rejected_values: AtomicU64,
    publish_responses: AtomicU64,
    data_messages: AtomicU64,
    keep_alive_messages: AtomicU64,
    status_change_messages: AtomicU64,
    notifications: AtomicU64,
    faults: AtomicU64,
    failed_acknowledgements: AtomicU64,
}

impl SimulationCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_response(&self, response: &PublishResponse) {
        Self::bump(&self.publish_responses);
        let message = &response.notification_message;
        if message.is_keep_alive() {
            Self::bump(&self.keep_alive_messages);
        } else if message.status_change_status().is_some() {
            Self::bump(&self.status_change_messages);
        } else {
            Self::bump(&self.data_messages);
            self.notifications
                .fetch_add(message.notification_count() as u64, Ordering::Relaxed);
        }
        let failed = response.results.iter().filter(|status| status.is_bad()).count();
        self.failed_acknowledgements
            .fetch_add(failed as u64, Ordering::Relaxed);
    }
}

// =============================================================================
// SimulationReport
// =============================================================================

/// Summary printed at the end of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Configured server label.
    pub server: String,
    /// Wall time the workload ran.
    pub elapsed_ms: u64,
    /// `true` if the run was stopped before its duration elapsed.
    pub interrupted: bool,
    /// Subscriptions created.
    pub subscriptions: usize,
    /// Monitored items created.
    pub monitored_items: usize,
    /// Sampled values accepted by the engine.
    pub values_fed: u64,
    /// Sampled values the engine refused.
    pub rejected_values: u64,
    /// Publish responses received by the client.
    pub publish_responses: u64,
    /// Responses carrying notifications.
    pub data_messages: u64,
    /// Keep-alive responses.
    pub keep_alive_messages: u64,
    /// Status change responses.
    pub status_change_messages: u64,
    /// Notifications across all data messages.
    pub notifications: u64,
    /// Publish requests answered with a fault.
    pub faults: u64,
    /// Acknowledgements the engine rejected.
    pub failed_acknowledgements: u64,
    /// Session statistics taken before the session was closed.
    pub session: SubscriptionManagerStats,
    /// Per-subscription diagnostics taken before the session was closed.
    pub subscription_diagnostics: Vec<SubscriptionDiagnostics>,
}

// =============================================================================
// SimulationRuntime
// =============================================================================

/// Runs a synthetic workload against the publishing engine.
#[derive(Debug, Clone)]
pub struct SimulationRuntime {
    config: ServerConfig,
}

impl SimulationRuntime {
    /// Creates a runtime for the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Workload parameters in effect.
    pub fn workload(&self) -> &SimulationConfig {
        &self.config.simulation
    }

    /// Runs until the configured duration elapses or `stop` resolves.
    pub async fn run<F>(self, stop: F) -> BinResult<SimulationReport>
    where
        F: Future<Output = ()>,
    {
        let workload = self.config.simulation.clone();
        let limits = Arc::new(self.config.limits.clone());
        let registry = Arc::new(SubscriptionRegistry::new(
            limits.max_subscriptions,
            limits.max_monitored_items,
        ));
        let manager = SubscriptionManager::new(SessionId::new(1), limits, registry);

        info!(
            server = %self.config.server.name,
            subscriptions = workload.subscriptions,
            items_per_subscription = workload.items_per_subscription,
            change_rate_hz = workload.change_rate_hz,
            duration_ms = workload.duration.as_millis() as u64,
            "Starting simulation"
        );

        let targets = create_workload(&manager, &workload)?;
        let counters = Arc::new(SimulationCounters::default());
        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();

        tasks.spawn(feed(
            Arc::clone(&manager),
            targets.clone(),
            workload.change_period(),
            Arc::clone(&counters),
            token.clone(),
        ));
        let stride = workload.outstanding_publish_requests as u32;
        for worker in 0..stride {
            tasks.spawn(client(
                Arc::clone(&manager),
                worker + 1,
                stride,
                Arc::clone(&counters),
                token.clone(),
            ));
        }

        let started = Instant::now();
        let interrupted = tokio::select! {
            _ = tokio::time::sleep(workload.duration) => false,
            _ = stop => true,
        };
        if interrupted {
            info!("Simulation interrupted");
        }

        token.cancel();
        while let Some(joined) = tasks.join_next().await {
            joined.context("simulation task failed")?;
        }
        let elapsed = started.elapsed();

        let session = manager.stats();
        let subscription_diagnostics = manager.diagnostics();
        manager.close_session(true);

        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let report = SimulationReport {
            server: self.config.server.name.clone(),
            elapsed_ms: elapsed.as_millis() as u64,
            interrupted,
            subscriptions: targets.len(),
            monitored_items: targets.iter().map(|(_, items)| items.len()).sum(),
            values_fed: load(&counters.values_fed),
            rejected_values: load(&counters.rejected_values),
            publish_responses: load(&counters.publish_responses),
            data_messages: load(&counters.data_messages),
            keep_alive_messages: load(&counters.keep_alive_messages),
            status_change_messages: load(&counters.status_change_messages),
            notifications: load(&counters.notifications),
            faults: load(&counters.faults),
            failed_acknowledgements: load(&counters.failed_acknowledgements),
            session,
            subscription_diagnostics,
        };

        info!(
            elapsed_ms = report.elapsed_ms,
            data_messages = report.data_messages,
            keep_alive_messages = report.keep_alive_messages,
            faults = report.faults,
            "Simulation finished"
        );
        Ok(report)
    }
}

type Targets = Vec<(SubscriptionId, Vec<MonitoredItemId>)>;

fn create_workload(manager: &SubscriptionManager, workload: &SimulationConfig) -> BinResult<Targets> {
    let mut targets = Vec::with_capacity(workload.subscriptions);

    for _ in 0..workload.subscriptions {
        let created = manager.create_subscription(&CreateSubscriptionRequest {
            requested_publishing_interval: workload.publishing_interval_ms,
            ..Default::default()
        })?;
        debug!(
            subscription_id = created.subscription_id.0,
            revised_publishing_interval = created.revised_publishing_interval,
            revised_lifetime_count = created.revised_lifetime_count,
            revised_max_keep_alive_count = created.revised_max_keep_alive_count,
            "Simulated subscription created"
        );

        let requests: Vec<_> = (1..=workload.items_per_subscription as u32)
            .map(|handle| MonitoredItemCreateRequest::reporting(handle).with_queue_size(SIMULATED_QUEUE_SIZE))
            .collect();
        let items = if requests.is_empty() {
            Vec::new()
        } else {
            manager
                .create_monitored_items(created.subscription_id, &requests)?
                .into_iter()
                .filter(|result| result.status_code.is_good())
                .map(|result| result.monitored_item_id)
                .collect()
        };
        targets.push((created.subscription_id, items));
    }

    Ok(targets)
}

async fn feed(
    manager: Arc<SubscriptionManager>,
    targets: Targets,
    period: Duration,
    counters: Arc<SimulationCounters>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut step: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        step += 1;

        for (subscription_id, items) in &targets {
            for (index, item_id) in items.iter().enumerate() {
                let value = (step as f64 * 0.1 + index as f64).sin();
                match manager.notify_data_change(*subscription_id, *item_id, DataValue::new(value)) {
                    Ok(()) => SimulationCounters::bump(&counters.values_fed),
                    Err(e) => {
                        SimulationCounters::bump(&counters.rejected_values);
                        debug!(subscription_id = subscription_id.0, error = %e, "Value rejected");
                    }
                }
            }
        }
    }
}

async fn client(
    manager: Arc<SubscriptionManager>,
    first_handle: u32,
    stride: u32,
    counters: Arc<SimulationCounters>,
    token: CancellationToken,
) {
    let mut handle = first_handle;
    let mut acks: Vec<SubscriptionAcknowledgement> = Vec::new();

    loop {
        let future = manager.publish(PublishRequest::new(handle, std::mem::take(&mut acks)));
        handle = handle.wrapping_add(stride);

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = future => result,
        };

        match result {
            Ok(response) => {
                counters.record_response(&response);
                let message = &response.notification_message;
                if !message.is_keep_alive() && message.status_change_status().is_none() {
                    acks.push(SubscriptionAcknowledgement::new(
                        response.subscription_id,
                        message.sequence_number,
                    ));
                }
            }
            Err(fault) => {
                SimulationCounters::bump(&counters.faults);
                let status = fault.status();
                if status == StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS {
                    tokio::time::sleep(REJECTED_PUBLISH_BACKOFF).await;
                    continue;
                }
                warn!(status = %status, "Publish failed, client stopping");
                break;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(duration: Duration) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.simulation = SimulationConfig {
            subscriptions: 2,
            items_per_subscription: 3,
            change_rate_hz: 10.0,
            publishing_interval_ms: 100.0,
            outstanding_publish_requests: 2,
            duration,
        };
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_publishes_data() {
        let runtime = SimulationRuntime::new(config(Duration::from_secs(2)));
        let report = runtime.run(std::future::pending()).await.unwrap();

        assert!(!report.interrupted);
        assert!((2_000..2_100).contains(&report.elapsed_ms));
        assert_eq!(report.subscriptions, 2);
        assert_eq!(report.monitored_items, 6);
        assert!(report.values_fed > 0);
        assert!(report.data_messages > 0);
        assert!(report.notifications >= report.data_messages);
        assert_eq!(report.faults, 0);
        assert_eq!(report.failed_acknowledgements, 0);
        assert_eq!(report.session.subscriptions, 2);
        assert_eq!(report.subscription_diagnostics.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_future_interrupts_run() {
        let runtime = SimulationRuntime::new(config(Duration::from_secs(3_600)));
        let report = runtime
            .run(tokio::time::sleep(Duration::from_millis(500)))
            .await
            .unwrap();

        assert!(report.interrupted);
        assert!((500..600).contains(&report.elapsed_ms));
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_over_limit_fail_the_run() {
        let mut config = config(Duration::from_secs(1));
        config.limits.max_monitored_items_per_session = 4;
        config.limits.max_monitored_items = 4;

        let err = SimulationRuntime::new(config)
            .run(std::future::pending())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }
}
