// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Monitored items owned by a subscription.
//!
//! The sampling engine pushes values in; the publishing engine drains them
//! through [`NotificationSource`]. Queue overflow follows `discard_oldest`.

use std::collections::{BTreeSet, VecDeque};

use uasub_core::{
    DataValue, EventFieldList, MonitoredItemId, MonitoredItemNotification, MonitoringMode,
    Notification, Variant,
};

use crate::gather::{Drained, NotificationSource};

/// A monitored item with its notification queue.
#[derive(Debug, Clone)]
pub struct MonitoredItem {
    id: MonitoredItemId,
    client_handle: u32,
    monitoring_mode: MonitoringMode,
    queue_size: usize,
    discard_oldest: bool,
    queue: VecDeque<Notification>,
    triggered: bool,
    links: BTreeSet<MonitoredItemId>,
    last_value: Option<DataValue>,
    overflow_count: u64,
}

impl MonitoredItem {
    /// Creates an item. `queue_size` must already be revised.
    pub fn new(
        id: MonitoredItemId,
        client_handle: u32,
        monitoring_mode: MonitoringMode,
        queue_size: u32,
        discard_oldest: bool,
    ) -> Self {
        let queue_size = (queue_size as usize).max(1);
        Self {
            id,
            client_handle,
            monitoring_mode,
            queue_size,
            discard_oldest,
            queue: VecDeque::with_capacity(queue_size.min(16)),
            triggered: false,
            links: BTreeSet::new(),
            last_value: None,
            overflow_count: 0,
        }
    }

    /// Returns the item id.
    pub fn id(&self) -> MonitoredItemId {
        self.id
    }

    /// Returns the monitoring mode.
    pub fn monitoring_mode(&self) -> MonitoringMode {
        self.monitoring_mode
    }

    /// Changes the monitoring mode. Disabling drops queued notifications.
    pub fn set_monitoring_mode(&mut self, mode: MonitoringMode) {
        self.monitoring_mode = mode;
        if mode == MonitoringMode::Disabled {
            self.queue.clear();
            self.triggered = false;
        }
    }

    /// Number of queued notifications.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of notifications lost to queue overflow.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Enqueues a sampled data value.
    pub fn push_data_change(&mut self, value: DataValue) {
        if self.monitoring_mode == MonitoringMode::Disabled {
            return;
        }
        self.last_value = Some(value.clone());
        self.push(Notification::DataChange(MonitoredItemNotification {
            client_handle: self.client_handle,
            value,
        }));
    }

    /// Enqueues an event.
    pub fn push_event(&mut self, event_fields: Vec<Variant>) {
        if self.monitoring_mode == MonitoringMode::Disabled {
            return;
        }
        self.push(Notification::Event(EventFieldList {
            client_handle: self.client_handle,
            event_fields,
        }));
    }

    /// Re-queues the last sampled value, if any.
    pub fn resend_last_value(&mut self) {
        if let Some(value) = self.last_value.clone() {
            self.push_data_change(value);
        }
    }

    /// Adds a triggering link. Returns `false` if it already existed.
    pub fn add_link(&mut self, target: MonitoredItemId) -> bool {
        self.links.insert(target)
    }

    /// Removes a triggering link. Returns `false` if it did not exist.
    pub fn remove_link(&mut self, target: MonitoredItemId) -> bool {
        self.links.remove(&target)
    }

    /// Removes a link to an item that no longer exists.
    pub fn forget_link(&mut self, target: MonitoredItemId) {
        self.links.remove(&target);
    }

    fn push(&mut self, notification: Notification) {
        if self.queue.len() >= self.queue_size {
            self.overflow_count += 1;
            if self.discard_oldest {
                self.queue.pop_front();
            } else {
                self.queue.pop_back();
            }
        }
        self.queue.push_back(notification);
    }
}

impl NotificationSource for MonitoredItem {
    fn has_pending_notifications(&self) -> bool {
        if self.queue.is_empty() {
            return false;
        }
        match self.monitoring_mode {
            MonitoringMode::Reporting => true,
            MonitoringMode::Sampling => self.triggered,
            MonitoringMode::Disabled => false,
        }
    }

    fn is_triggered(&self) -> bool {
        self.triggered
    }

    fn drain_up_to(&mut self, max: usize) -> Drained {
        let count = self.queue.len().min(max);
        let notifications: Vec<Notification> = self.queue.drain(..count).collect();
        let exhausted = self.queue.is_empty();
        if exhausted {
            self.triggered = false;
        }
        Drained {
            notifications,
            exhausted,
        }
    }

    fn triggered_links(&self) -> Vec<MonitoredItemId> {
        self.links.iter().copied().collect()
    }

    fn set_triggered(&mut self) {
        if self.monitoring_mode != MonitoringMode::Disabled {
            self.triggered = true;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
