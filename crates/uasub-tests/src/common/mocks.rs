// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Recording implementations of the engine's collaborator traits.

use std::sync::Arc;

use parking_lot::Mutex;

use uasub_core::{MonitoredItemId, SubscriptionId};
use uasub_server::{ItemLifecycle, Subscription, SubscriptionListener};

// =============================================================================
// RecordingLifecycle
// =============================================================================

/// Records every removal reported to the sampling side.
#[derive(Debug, Default)]
pub struct RecordingLifecycle {
    calls: Mutex<Vec<(SubscriptionId, Vec<MonitoredItemId>)>>,
}

impl RecordingLifecycle {
    /// Creates a shared recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the recorded calls in order.
    pub fn calls(&self) -> Vec<(SubscriptionId, Vec<MonitoredItemId>)> {
        self.calls.lock().clone()
    }

    /// Returns every removed item across all calls.
    pub fn removed_items(&self) -> Vec<MonitoredItemId> {
        self.calls
            .lock()
            .iter()
            .flat_map(|(_, items)| items.iter().copied())
            .collect()
    }
}

impl ItemLifecycle for RecordingLifecycle {
    fn on_items_removed(&self, subscription_id: SubscriptionId, items: &[MonitoredItemId]) {
        self.calls.lock().push((subscription_id, items.to_vec()));
    }
}

// =============================================================================
// RecordingListener
// =============================================================================

/// Records the subscriptions that entered `Closing`.
#[derive(Debug, Default)]
pub struct RecordingListener {
    closed: Mutex<Vec<SubscriptionId>>,
}

impl RecordingListener {
    /// Creates a shared listener.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the ids reported so far.
    pub fn closed(&self) -> Vec<SubscriptionId> {
        self.closed.lock().clone()
    }
}

impl SubscriptionListener for RecordingListener {
    fn on_closing(&self, subscription: &Arc<Subscription>) {
        self.closed.lock().push(subscription.id());
    }
}
