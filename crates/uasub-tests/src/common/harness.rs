// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! A server-wide registry with sessions driven the way a client would.
//!
//! ```text
//!   TestServer (limits + registry)
//!       ├── TestSession 1 ──▶ SubscriptionManager
//!       └── TestSession 2 ──▶ SubscriptionManager
//! ```
//!
//! Helpers panic on unexpected service errors; the suites assert on the
//! paths they care about through the manager directly.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use uasub_core::{
    CreateSubscriptionRequest, DataValue, MonitoredItemId, PublishRequest, PublishResponse,
    SessionId, StatusCode, SubscriptionAcknowledgement, SubscriptionId,
};
use uasub_server::{
    ItemLifecycle, PublishFuture, SubscriptionLimits, SubscriptionManager, SubscriptionRegistry,
};

use super::fixtures::{LimitsFixtures, RequestFixtures};

// =============================================================================
// TestServer
// =============================================================================

/// Shared limits and registry for a group of sessions.
pub struct TestServer {
    limits: Arc<SubscriptionLimits>,
    registry: Arc<SubscriptionRegistry>,
}

impl TestServer {
    /// Creates a server with the given limits.
    pub fn new(limits: SubscriptionLimits) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new(
            limits.max_subscriptions,
            limits.max_monitored_items,
        ));
        Self {
            limits: Arc::new(limits),
            registry,
        }
    }

    /// Creates a server with [`LimitsFixtures::fast`].
    pub fn fast() -> Self {
        Self::new(LimitsFixtures::fast())
    }

    /// Returns the server limits.
    pub fn limits(&self) -> &Arc<SubscriptionLimits> {
        &self.limits
    }

    /// Returns the registry.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Opens a session.
    pub fn open_session(&self, id: u32) -> TestSession {
        TestSession::new(SubscriptionManager::new(
            SessionId::new(id),
            Arc::clone(&self.limits),
            Arc::clone(&self.registry),
        ))
    }

    /// Opens a session that reports removed items to `lifecycle`.
    pub fn open_session_with_lifecycle(&self, id: u32, lifecycle: Arc<dyn ItemLifecycle>) -> TestSession {
        TestSession::new(SubscriptionManager::with_item_lifecycle(
            SessionId::new(id),
            Arc::clone(&self.limits),
            Arc::clone(&self.registry),
            lifecycle,
        ))
    }
}

// =============================================================================
// TestSession
// =============================================================================

/// A session's manager plus client-side request bookkeeping.
pub struct TestSession {
    manager: Arc<SubscriptionManager>,
    next_handle: AtomicU32,
}

impl TestSession {
    fn new(manager: Arc<SubscriptionManager>) -> Self {
        Self {
            manager,
            next_handle: AtomicU32::new(1),
        }
    }

    /// Returns the manager.
    pub fn manager(&self) -> &Arc<SubscriptionManager> {
        &self.manager
    }

    /// Consumes the session, returning the manager.
    pub fn into_manager(self) -> Arc<SubscriptionManager> {
        self.manager
    }

    /// Creates a subscription.
    pub fn create(&self, request: CreateSubscriptionRequest) -> SubscriptionId {
        self.manager
            .create_subscription(&request)
            .expect("create_subscription failed")
            .subscription_id
    }

    /// Creates a subscription with [`RequestFixtures::fast_subscription`].
    pub fn create_fast(&self) -> SubscriptionId {
        self.create(RequestFixtures::fast_subscription())
    }

    /// Adds `count` reporting items and returns their ids.
    pub fn add_items(&self, subscription_id: SubscriptionId, count: usize, queue_size: u32) -> Vec<MonitoredItemId> {
        self.manager
            .create_monitored_items(subscription_id, &RequestFixtures::items(count, queue_size))
            .expect("create_monitored_items failed")
            .into_iter()
            .map(|result| result.monitored_item_id)
            .collect()
    }

    /// Pushes `count` values (0, 1, 2, ...) into an item.
    pub fn push(&self, subscription_id: SubscriptionId, item: MonitoredItemId, count: usize) {
        for value in 0..count {
            self.manager
                .notify_data_change(subscription_id, item, DataValue::new(value as i32))
                .expect("notify_data_change failed");
        }
    }

    /// Sends a publish request.
    pub fn publish(&self, acks: Vec<SubscriptionAcknowledgement>) -> PublishFuture {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.manager.publish(PublishRequest::new(handle, acks))
    }

    /// Sends a publish request and waits for a response.
    pub async fn next_response(&self, acks: Vec<SubscriptionAcknowledgement>) -> PublishResponse {
        match self.publish(acks).await {
            Ok(response) => response,
            Err(fault) => panic!("expected a publish response, got fault {:?}", fault.status()),
        }
    }

    /// Sends a publish request and waits for a service fault.
    pub async fn next_fault(&self) -> StatusCode {
        match self.publish(Vec::new()).await {
            Err(fault) => fault.status(),
            Ok(response) => panic!("expected a fault, got {response:?}"),
        }
    }
}

impl Deref for TestSession {
    type Target = SubscriptionManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}
