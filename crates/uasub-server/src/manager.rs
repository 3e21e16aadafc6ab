// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-session subscription manager.
//!
//! One [`SubscriptionManager`] exists per session. It owns the session's
//! [`PublishQueue`], routes every subscription service call to the right
//! [`Subscription`], keeps the session's monitored item accounting and
//! implements session teardown and subscription transfer.
//!
//! ```text
//!   Publish ──▶ acks ──▶ PendingPublish ──┬─ pending transfer ──▶ answer now
//!                                         ├─ session closed ────▶ Bad_SessionClosed
//!                                         ├─ nothing to serve ──▶ Bad_NoSubscription
//!                                         └─ PublishQueue ──────▶ dispatch
//! ```
//!
//! The manager never holds its subscription map lock while calling into a
//! subscription that may call back into the queue or the manager.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use uasub_core::{
    CreateSubscriptionRequest, CreateSubscriptionResponse, DataValue, MonitoredItemCreateRequest,
    MonitoredItemCreateResult, MonitoredItemError, MonitoredItemId, MonitoringMode,
    ModifySubscriptionRequest, ModifySubscriptionResponse, NotificationMessage, PublishRequest,
    PublishResponse, ResponseHeader, SessionError, SessionId, SetTriggeringRequest,
    SetTriggeringResponse, StatusCode, SubscriptionError, SubscriptionId, TransferResult, UaError,
    UaResult, Variant,
};

use crate::limits::SubscriptionLimits;
use crate::queue::{self, PendingPublish, PublishFuture, PublishQueue};
use crate::registry::SubscriptionRegistry;
use crate::revise::{RequestedParameters, revise};
use crate::subscription::{
    Subscription, SubscriptionDiagnostics, SubscriptionListener, SubscriptionParams,
};

// =============================================================================
// ItemLifecycle
// =============================================================================

/// External collaborator told when monitored items go away.
///
/// Typically the sampling engine, which stops sampling the removed items.
pub trait ItemLifecycle: Send + Sync {
    /// Called with the items removed from a subscription.
    fn on_items_removed(&self, subscription_id: SubscriptionId, items: &[MonitoredItemId]);
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct ManagerCounters {
    publish_requests: AtomicU64,
    rejected_publish_requests: AtomicU64,
    subscriptions_created: AtomicU64,
    subscriptions_deleted: AtomicU64,
    subscriptions_expired: AtomicU64,
    transfers_in: AtomicU64,
    transfers_out: AtomicU64,
    dropped_transfer_notifications: AtomicU64,
}

impl ManagerCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of a manager's activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionManagerStats {
    /// Owned subscriptions.
    pub subscriptions: usize,
    /// Monitored items across owned subscriptions.
    pub monitored_items: usize,
    /// Parked publish requests.
    pub parked_requests: usize,
    /// Subscriptions on the wait list.
    pub waiting_subscriptions: usize,
    /// Transfer status changes not yet delivered.
    pub pending_transfer_notifications: usize,
    /// Publish requests received.
    pub publish_requests: u64,
    /// Publish requests failed on arrival.
    pub rejected_publish_requests: u64,
    /// Subscriptions created here.
    pub subscriptions_created: u64,
    /// Subscriptions deleted here, by request or session close.
    pub subscriptions_deleted: u64,
    /// Subscriptions whose lifetime expired.
    pub subscriptions_expired: u64,
    /// Subscriptions transferred in.
    pub transfers_in: u64,
    /// Subscriptions transferred out.
    pub transfers_out: u64,
    /// Transfer status changes dropped because the list was full.
    pub dropped_transfer_notifications: u64,
}

// =============================================================================
// Closing hook
// =============================================================================

/// Listener installed on every subscription owned by a manager.
struct ClosingHook {
    manager: Weak<SubscriptionManager>,
    registry: Arc<SubscriptionRegistry>,
}

impl SubscriptionListener for ClosingHook {
    fn on_closing(&self, subscription: &Arc<Subscription>) {
        self.registry.remove(subscription.id());
        match self.manager.upgrade() {
            Some(manager) => manager.on_subscription_expired(subscription),
            None => {
                self.registry.release_items(subscription.monitored_item_count());
                subscription.delete();
                tracing::info!(
                    subscription_id = subscription.id().0,
                    "Orphaned subscription expired"
                );
            }
        }
    }
}

#[derive(Debug, Clone)]
struct PendingTransfer {
    subscription_id: SubscriptionId,
    message: NotificationMessage,
}

// =============================================================================
// SubscriptionManager
// =============================================================================

/// Subscription services of one session.
pub struct SubscriptionManager {
    session_id: SessionId,
    limits: Arc<SubscriptionLimits>,
    registry: Arc<SubscriptionRegistry>,
    queue: Arc<PublishQueue>,
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<Subscription>>>,
    item_count: AtomicUsize,
    transferred: Mutex<VecDeque<PendingTransfer>>,
    closed: AtomicBool,
    lifecycle: Option<Arc<dyn ItemLifecycle>>,
    weak_self: Weak<SubscriptionManager>,
    counters: ManagerCounters,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("session_id", &self.session_id)
            .field("subscriptions", &self.subscriptions.read().len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    /// Creates the manager of a session.
    pub fn new(
        session_id: SessionId,
        limits: Arc<SubscriptionLimits>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Arc<Self> {
        Self::build(session_id, limits, registry, None)
    }

    /// Creates the manager of a session with an item lifecycle collaborator.
    pub fn with_item_lifecycle(
        session_id: SessionId,
        limits: Arc<SubscriptionLimits>,
        registry: Arc<SubscriptionRegistry>,
        lifecycle: Arc<dyn ItemLifecycle>,
    ) -> Arc<Self> {
        Self::build(session_id, limits, registry, Some(lifecycle))
    }

    fn build(
        session_id: SessionId,
        limits: Arc<SubscriptionLimits>,
        registry: Arc<SubscriptionRegistry>,
        lifecycle: Option<Arc<dyn ItemLifecycle>>,
    ) -> Arc<Self> {
        let queue = Arc::new(PublishQueue::new(session_id, limits.max_pending_publish_requests));
        Arc::new_cyclic(|weak_self| Self {
            session_id,
            limits,
            registry,
            queue,
            subscriptions: RwLock::new(HashMap::new()),
            item_count: AtomicUsize::new(0),
            transferred: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            lifecycle,
            weak_self: weak_self.clone(),
            counters: ManagerCounters::default(),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the session id.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns the session's publish queue.
    pub fn queue(&self) -> &Arc<PublishQueue> {
        &self.queue
    }

    /// Returns the limits in effect.
    pub fn limits(&self) -> &SubscriptionLimits {
        &self.limits
    }

    /// Returns `true` once the session was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns an owned subscription.
    pub fn subscription(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.subscriptions.read().get(&id).cloned()
    }

    /// Ids of owned subscriptions, ascending.
    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self.subscriptions.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of owned subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Monitored items across owned subscriptions.
    pub fn monitored_item_count(&self) -> usize {
        self.item_count.load(Ordering::Acquire)
    }

    /// Diagnostics of every owned subscription, by id.
    pub fn diagnostics(&self) -> Vec<SubscriptionDiagnostics> {
        let mut all: Vec<_> = self
            .snapshot()
            .iter()
            .map(|subscription| subscription.diagnostics())
            .collect();
        all.sort_by_key(|d| d.subscription_id);
        all
    }

    /// Returns a statistics snapshot.
    pub fn stats(&self) -> SubscriptionManagerStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SubscriptionManagerStats {
            subscriptions: self.subscription_count(),
            monitored_items: self.monitored_item_count(),
            parked_requests: self.queue.request_count(),
            waiting_subscriptions: self.queue.waiting_count(),
            pending_transfer_notifications: self.transferred.lock().len(),
            publish_requests: load(&self.counters.publish_requests),
            rejected_publish_requests: load(&self.counters.rejected_publish_requests),
            subscriptions_created: load(&self.counters.subscriptions_created),
            subscriptions_deleted: load(&self.counters.subscriptions_deleted),
            subscriptions_expired: load(&self.counters.subscriptions_expired),
            transfers_in: load(&self.counters.transfers_in),
            transfers_out: load(&self.counters.transfers_out),
            dropped_transfer_notifications: load(&self.counters.dropped_transfer_notifications),
        }
    }

    fn snapshot(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions.read().values().cloned().collect()
    }

    fn lookup(&self, id: SubscriptionId) -> UaResult<Arc<Subscription>> {
        self.subscription(id)
            .ok_or_else(|| UaError::subscription_id_invalid(id))
    }

    fn ensure_open(&self) -> UaResult<()> {
        if self.is_closed() {
            return Err(SessionError::closed(self.session_id).into());
        }
        Ok(())
    }

    fn hook(&self) -> Arc<dyn SubscriptionListener> {
        Arc::new(ClosingHook {
            manager: self.weak_self.clone(),
            registry: Arc::clone(&self.registry),
        })
    }

    /// `true` when a publish request could never be answered.
    fn is_idle(&self) -> bool {
        self.subscriptions.read().is_empty() && self.queue.is_wait_list_empty()
    }

    fn drain_if_idle(&self) {
        if self.is_idle() {
            self.queue.fail_all(StatusCode::BAD_NO_SUBSCRIPTION);
        }
    }

    // =========================================================================
    // CreateSubscription / ModifySubscription / SetPublishingMode
    // =========================================================================

    /// Creates a subscription and starts its publishing timer.
    ///
    /// Must be called within a Tokio runtime.
    pub fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> UaResult<CreateSubscriptionResponse> {
        self.ensure_open()?;

        let revised = revise(
            &self.limits,
            RequestedParameters {
                publishing_interval: request.requested_publishing_interval,
                lifetime_count: request.requested_lifetime_count,
                max_keep_alive_count: request.requested_max_keep_alive_count,
                max_notifications_per_publish: request.max_notifications_per_publish,
            },
        );
        let params = SubscriptionParams::new(revised, request.priority, request.publishing_enabled);

        let subscription = {
            let mut subscriptions = self.subscriptions.write();
            let max = self.limits.max_subscriptions_per_session;
            if subscriptions.len() >= max {
                return Err(SubscriptionError::too_many_in_session(subscriptions.len(), max).into());
            }
            self.registry.reserve_subscription()?;

            let id = self.registry.allocate_id();
            let subscription = Subscription::new(id, self.session_id, params, Arc::clone(&self.queue));
            subscription.set_listener(self.hook());
            self.registry
                .insert(Arc::clone(&subscription), self.weak_self.clone(), self.session_id);
            subscriptions.insert(id, Arc::clone(&subscription));
            subscription
        };
        subscription.start_timer();
        ManagerCounters::bump(&self.counters.subscriptions_created);

        tracing::info!(
            session_id = self.session_id.0,
            subscription_id = subscription.id().0,
            publishing_interval = revised.publishing_interval,
            lifetime_count = revised.lifetime_count,
            max_keep_alive_count = revised.max_keep_alive_count,
            "Subscription created"
        );

        Ok(CreateSubscriptionResponse {
            subscription_id: subscription.id(),
            revised_publishing_interval: revised.publishing_interval,
            revised_lifetime_count: revised.lifetime_count,
            revised_max_keep_alive_count: revised.max_keep_alive_count,
        })
    }

    /// Revises and applies new parameters to a subscription.
    pub fn modify_subscription(
        &self,
        request: &ModifySubscriptionRequest,
    ) -> UaResult<ModifySubscriptionResponse> {
        let subscription = self.lookup(request.subscription_id)?;
        let revised = revise(
            &self.limits,
            RequestedParameters {
                publishing_interval: request.requested_publishing_interval,
                lifetime_count: request.requested_lifetime_count,
                max_keep_alive_count: request.requested_max_keep_alive_count,
                max_notifications_per_publish: request.max_notifications_per_publish,
            },
        );
        let params = subscription.modify(revised, request.priority)?;

        Ok(ModifySubscriptionResponse {
            revised_publishing_interval: params.publishing_interval,
            revised_lifetime_count: params.lifetime_count,
            revised_max_keep_alive_count: params.max_keep_alive_count,
        })
    }

    /// Enables or disables publishing on several subscriptions.
    pub fn set_publishing_mode(
        &self,
        enabled: bool,
        ids: &[SubscriptionId],
    ) -> UaResult<Vec<StatusCode>> {
        if ids.is_empty() {
            return Err(UaError::nothing_to_do());
        }
        Ok(ids
            .iter()
            .map(|id| {
                self.lookup(*id)
                    .and_then(|subscription| subscription.set_publishing_mode(enabled))
                    .map_or_else(|e| e.status_code(), |()| StatusCode::GOOD)
            })
            .collect())
    }

    // =========================================================================
    // DeleteSubscriptions / close
    // =========================================================================

    /// Deletes subscriptions. Unknown ids yield `Bad_SubscriptionIdInvalid`.
    pub fn delete_subscriptions(&self, ids: &[SubscriptionId]) -> UaResult<Vec<StatusCode>> {
        if ids.is_empty() {
            return Err(UaError::nothing_to_do());
        }

        let results = ids
            .iter()
            .map(|id| {
                let removed = self.subscriptions.write().remove(id);
                match removed {
                    Some(subscription) => {
                        self.teardown(&subscription);
                        StatusCode::GOOD
                    }
                    None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                }
            })
            .collect();

        self.drain_if_idle();
        Ok(results)
    }

    /// Forcibly tears down a subscription that was already removed from the map.
    fn teardown(&self, subscription: &Arc<Subscription>) {
        let items = subscription.delete();
        self.registry.remove(subscription.id());
        self.release_items(items.len());
        self.notify_items_removed(subscription.id(), &items);
        ManagerCounters::bump(&self.counters.subscriptions_deleted);

        tracing::info!(
            session_id = self.session_id.0,
            subscription_id = subscription.id().0,
            monitored_items = items.len(),
            "Subscription deleted"
        );
    }

    /// Closes the session.
    ///
    /// With `delete_subscriptions` every owned subscription is torn down;
    /// otherwise they stay registered and can be transferred to another
    /// session until their lifetime expires. Parked requests are failed with
    /// `Bad_SessionClosed` either way.
    pub fn close_session(&self, delete_subscriptions: bool) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if delete_subscriptions {
            let owned: Vec<_> = self.subscriptions.write().drain().map(|(_, s)| s).collect();
            for subscription in &owned {
                self.teardown(subscription);
            }
        }

        let failed = self.queue.fail_all(StatusCode::BAD_SESSION_CLOSED);
        self.transferred.lock().clear();

        // Expired subscriptions still waiting for their final publish hold the
        // queue alive; nobody will publish on this session again.
        let mut stale = 0usize;
        for subscription in self.queue.drain_waiting() {
            if self.subscription(subscription.id()).is_none() {
                subscription.delete();
                stale += 1;
            }
        }

        tracing::info!(
            session_id = self.session_id.0,
            delete_subscriptions,
            failed_requests = failed,
            expired_subscriptions = stale,
            remaining_subscriptions = self.subscription_count(),
            "Session closed"
        );
    }

    /// Called by the closing hook once a subscription's lifetime expired.
    fn on_subscription_expired(&self, subscription: &Arc<Subscription>) {
        let removed = self.subscriptions.write().remove(&subscription.id());
        if removed.is_none() {
            return;
        }

        let items = subscription.monitored_item_ids();
        self.release_items(items.len());
        self.notify_items_removed(subscription.id(), &items);
        ManagerCounters::bump(&self.counters.subscriptions_expired);

        if self.is_closed() {
            // Nobody will publish again; drop it from the wait list now.
            subscription.delete();
        }

        tracing::info!(
            session_id = self.session_id.0,
            subscription_id = subscription.id().0,
            "Subscription expired and removed"
        );
        self.drain_if_idle();
    }

    // =========================================================================
    // Publish / Republish
    // =========================================================================

    /// Accepts a publish request.
    ///
    /// The returned future resolves when a subscription answers the request,
    /// which may be much later.
    pub fn publish(&self, request: PublishRequest) -> PublishFuture {
        ManagerCounters::bump(&self.counters.publish_requests);

        let ack_results: Vec<StatusCode> = request
            .subscription_acknowledgements
            .iter()
            .map(|ack| match self.subscription(ack.subscription_id) {
                Some(subscription) => subscription.acknowledge(ack.sequence_number),
                None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
            })
            .collect();
        let (pending, future) = PendingPublish::new(request, ack_results);

        let transfer = self.transferred.lock().pop_front();
        if let Some(transfer) = transfer {
            Self::answer_transfer(pending, transfer);
            return future;
        }

        if self.is_closed() {
            ManagerCounters::bump(&self.counters.rejected_publish_requests);
            pending.fail(StatusCode::BAD_SESSION_CLOSED);
            return future;
        }

        if self.is_idle() {
            ManagerCounters::bump(&self.counters.rejected_publish_requests);
            pending.fail(StatusCode::BAD_NO_SUBSCRIPTION);
            return future;
        }

        queue::dispatch(self.queue.enqueue_request(pending));
        self.drain_if_idle();
        future
    }

    fn answer_transfer(pending: PendingPublish, transfer: PendingTransfer) {
        let response = PublishResponse {
            response_header: ResponseHeader::good(pending.request_header()),
            subscription_id: transfer.subscription_id,
            available_sequence_numbers: Vec::new(),
            more_notifications: false,
            notification_message: transfer.message,
            results: pending.ack_results().to_vec(),
        };
        pending.complete(response);
    }

    /// Returns a cached notification message.
    pub fn republish(
        &self,
        subscription_id: SubscriptionId,
        sequence_number: u32,
    ) -> UaResult<NotificationMessage> {
        self.lookup(subscription_id)?.republish(sequence_number)
    }

    // =========================================================================
    // Monitored items
    // =========================================================================

    /// Creates monitored items, all or nothing with respect to the caps.
    pub fn create_monitored_items(
        &self,
        subscription_id: SubscriptionId,
        requests: &[MonitoredItemCreateRequest],
    ) -> UaResult<Vec<MonitoredItemCreateResult>> {
        if requests.is_empty() {
            return Err(UaError::nothing_to_do());
        }
        let subscription = self.lookup(subscription_id)?;
        let count = requests.len();

        self.reserve_items(count)?;
        if let Err(e) = self.registry.reserve_items(count) {
            self.item_count.fetch_sub(count, Ordering::AcqRel);
            return Err(e);
        }

        let revised: Vec<MonitoredItemCreateRequest> = requests
            .iter()
            .map(|request| MonitoredItemCreateRequest {
                queue_size: self.limits.revise_queue_size(request.queue_size),
                ..request.clone()
            })
            .collect();

        match subscription.create_monitored_items(&revised) {
            Ok(results) => {
                tracing::debug!(
                    session_id = self.session_id.0,
                    subscription_id = subscription_id.0,
                    count,
                    "Monitored items created"
                );
                Ok(results)
            }
            Err(e) => {
                self.release_items(count);
                Err(e)
            }
        }
    }

    /// Deletes monitored items.
    pub fn delete_monitored_items(
        &self,
        subscription_id: SubscriptionId,
        ids: &[MonitoredItemId],
    ) -> UaResult<Vec<StatusCode>> {
        if ids.is_empty() {
            return Err(UaError::nothing_to_do());
        }
        let subscription = self.lookup(subscription_id)?;
        let (results, removed) = subscription.delete_monitored_items(ids);
        self.release_items(removed.len());
        self.notify_items_removed(subscription_id, &removed);
        Ok(results)
    }

    /// Changes the monitoring mode of items.
    pub fn set_monitoring_mode(
        &self,
        subscription_id: SubscriptionId,
        mode: MonitoringMode,
        ids: &[MonitoredItemId],
    ) -> UaResult<Vec<StatusCode>> {
        if ids.is_empty() {
            return Err(UaError::nothing_to_do());
        }
        Ok(self.lookup(subscription_id)?.set_monitoring_mode(mode, ids))
    }

    /// Adds and removes triggering links.
    pub fn set_triggering(&self, request: &SetTriggeringRequest) -> UaResult<SetTriggeringResponse> {
        if request.links_to_add.is_empty() && request.links_to_remove.is_empty() {
            return Err(UaError::nothing_to_do());
        }
        self.lookup(request.subscription_id)?.set_triggering(
            request.triggering_item_id,
            &request.links_to_add,
            &request.links_to_remove,
        )
    }

    /// Routes a sampled value into a monitored item.
    pub fn notify_data_change(
        &self,
        subscription_id: SubscriptionId,
        item_id: MonitoredItemId,
        value: DataValue,
    ) -> UaResult<()> {
        self.lookup(subscription_id)?.notify_data_change(item_id, value)
    }

    /// Routes an event into a monitored item.
    pub fn notify_event(
        &self,
        subscription_id: SubscriptionId,
        item_id: MonitoredItemId,
        event_fields: Vec<Variant>,
    ) -> UaResult<()> {
        self.lookup(subscription_id)?.notify_event(item_id, event_fields)
    }

    fn reserve_items(&self, count: usize) -> UaResult<()> {
        let max = self.limits.max_monitored_items_per_session;
        self.item_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                n.checked_add(count).filter(|total| *total <= max)
            })
            .map(|_| ())
            .map_err(|current| MonitoredItemError::too_many("session", current + count, max).into())
    }

    /// Releases session and server item slots.
    fn release_items(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.release_session_items(count);
        self.registry.release_items(count);
    }

    fn release_session_items(&self, count: usize) {
        let _ = self
            .item_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(count))
            });
    }

    fn notify_items_removed(&self, subscription_id: SubscriptionId, items: &[MonitoredItemId]) {
        if items.is_empty() {
            return;
        }
        if let Some(lifecycle) = &self.lifecycle {
            lifecycle.on_items_removed(subscription_id, items);
        }
    }

    // =========================================================================
    // TransferSubscriptions
    // =========================================================================

    /// Moves subscriptions from their current sessions into this one.
    pub fn transfer_subscriptions(
        &self,
        ids: &[SubscriptionId],
        send_initial_values: bool,
    ) -> UaResult<Vec<TransferResult>> {
        if ids.is_empty() {
            return Err(UaError::nothing_to_do());
        }
        self.ensure_open()?;

        Ok(ids
            .iter()
            .map(|id| match self.transfer_in(*id, send_initial_values) {
                Ok(available_sequence_numbers) => TransferResult {
                    status_code: StatusCode::GOOD,
                    available_sequence_numbers,
                },
                Err(e) => {
                    e.log("transfer_subscriptions");
                    TransferResult {
                        status_code: e.status_code(),
                        available_sequence_numbers: Vec::new(),
                    }
                }
            })
            .collect())
    }

    fn transfer_in(&self, id: SubscriptionId, send_initial_values: bool) -> UaResult<Vec<u32>> {
        let entry = self
            .registry
            .get(id)
            .ok_or_else(|| UaError::subscription_id_invalid(id))?;
        let subscription = entry.subscription;

        if entry.session_id == self.session_id && self.subscription(id).is_some() {
            return Ok(subscription.available_sequence_numbers());
        }

        let max = self.limits.max_subscriptions_per_session;
        let owned = self.subscription_count();
        if owned >= max {
            return Err(SubscriptionError::too_many_in_session(owned, max).into());
        }
        let items = subscription.monitored_item_count();
        self.reserve_items(items)?;

        let available = match subscription.rebind(self.session_id, Arc::clone(&self.queue), send_initial_values) {
            Ok(available) => available,
            Err(e) => {
                self.release_session_items(items);
                return Err(e);
            }
        };

        if let Some(previous) = entry.owner.upgrade() {
            previous.detach_for_transfer(&subscription);
        }

        subscription.set_listener(self.hook());
        self.subscriptions.write().insert(id, Arc::clone(&subscription));
        self.registry.set_owner(id, self.weak_self.clone(), self.session_id);
        ManagerCounters::bump(&self.counters.transfers_in);

        tracing::info!(
            session_id = self.session_id.0,
            subscription_id = id.0,
            from_session = entry.session_id.0,
            "Subscription transferred in"
        );
        Ok(available)
    }

    /// Gives up a subscription that another session took over.
    fn detach_for_transfer(&self, subscription: &Arc<Subscription>) {
        let removed = self.subscriptions.write().remove(&subscription.id());
        if removed.is_none() {
            return;
        }
        self.release_session_items(subscription.monitored_item_count());
        ManagerCounters::bump(&self.counters.transfers_out);

        let message = NotificationMessage::status_change(
            subscription.issue_sequence_number(),
            StatusCode::GOOD_SUBSCRIPTION_TRANSFERRED,
        );
        let transfer = PendingTransfer {
            subscription_id: subscription.id(),
            message,
        };

        match self.queue.dequeue_request() {
            Some(pending) => Self::answer_transfer(pending, transfer),
            None => self.push_transfer(transfer),
        }
        self.drain_if_idle();
    }

    fn push_transfer(&self, transfer: PendingTransfer) {
        let max = self.limits.max_pending_transfer_notifications;
        let dropped = {
            let mut transferred = self.transferred.lock();
            transferred.push_back(transfer);
            if transferred.len() > max {
                transferred.pop_front()
            } else {
                None
            }
        };

        if let Some(dropped) = dropped {
            ManagerCounters::bump(&self.counters.dropped_transfer_notifications);
            tracing::warn!(
                session_id = self.session_id.0,
                subscription_id = dropped.subscription_id.0,
                max,
                "Pending transfer notifications full, dropping oldest"
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uasub_core::{PublishResult, SubscriptionAcknowledgement};

    use crate::state::State;

    fn limits() -> Arc<SubscriptionLimits> {
        Arc::new(SubscriptionLimits {
            min_subscription_lifetime_ms: 100.0,
            ..SubscriptionLimits::default()
        })
    }

    fn manager(session: u32, registry: &Arc<SubscriptionRegistry>) -> Arc<SubscriptionManager> {
        SubscriptionManager::new(SessionId::new(session), limits(), Arc::clone(registry))
    }

    fn registry() -> Arc<SubscriptionRegistry> {
        Arc::new(SubscriptionRegistry::new(1_000, 100_000))
    }

    fn fast(lifetime: u32, keep_alive: u32) -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            requested_publishing_interval: 100.0,
            requested_lifetime_count: lifetime,
            requested_max_keep_alive_count: keep_alive,
            ..CreateSubscriptionRequest::default()
        }
    }

    fn fault(result: PublishResult) -> StatusCode {
        match result {
            Err(fault) => fault.status(),
            Ok(response) => panic!("expected a fault, got {response:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_revises_minimum_defaults() {
        let registry = registry();
        let manager = SubscriptionManager::new(
            SessionId::new(1),
            Arc::new(SubscriptionLimits::default()),
            Arc::clone(&registry),
        );
        let response = manager
            .create_subscription(&CreateSubscriptionRequest {
                requested_publishing_interval: 1000.0,
                requested_lifetime_count: 0,
                requested_max_keep_alive_count: 0,
                ..CreateSubscriptionRequest::default()
            })
            .unwrap();

        assert_eq!(response.revised_publishing_interval, 1000.0);
        assert_eq!(response.revised_max_keep_alive_count, 3);
        assert_eq!(response.revised_lifetime_count, 9);
        assert_eq!(registry.len(), 1);
        assert!(manager.subscription(response.subscription_id).unwrap().has_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_subscription_cap() {
        let registry = registry();
        let manager = SubscriptionManager::new(
            SessionId::new(1),
            Arc::new(SubscriptionLimits {
                max_subscriptions_per_session: 1,
                ..SubscriptionLimits::default()
            }),
            Arc::clone(&registry),
        );
        manager.create_subscription(&fast(30, 10)).unwrap();
        let err = manager.create_subscription(&fast(30, 10)).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_TOO_MANY_SUBSCRIPTIONS);
        assert_eq!(registry.subscription_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_is_idempotent() {
        let registry = registry();
        let manager = manager(1, &registry);
        let id = manager.create_subscription(&fast(30, 10)).unwrap().subscription_id;

        assert_eq!(manager.delete_subscriptions(&[id]).unwrap(), vec![StatusCode::GOOD]);
        assert_eq!(
            manager.delete_subscriptions(&[id]).unwrap(),
            vec![StatusCode::BAD_SUBSCRIPTION_ID_INVALID]
        );
        assert!(registry.is_empty());
        assert_eq!(
            manager.delete_subscriptions(&[]).unwrap_err().status_code(),
            StatusCode::BAD_NOTHING_TO_DO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleting_last_subscription_fails_parked_requests() {
        let registry = registry();
        let manager = manager(1, &registry);
        let id = manager.create_subscription(&fast(30, 10)).unwrap().subscription_id;

        let future = manager.publish(PublishRequest::new(1, Vec::new()));
        assert_eq!(manager.queue().request_count(), 1);

        manager.delete_subscriptions(&[id]).unwrap();
        assert_eq!(fault(future.await), StatusCode::BAD_NO_SUBSCRIPTION);
    }

    #[tokio::test]
    async fn test_publish_without_subscriptions() {
        let registry = registry();
        let manager = manager(1, &registry);
        let result = manager
            .publish(PublishRequest::new(
                1,
                vec![SubscriptionAcknowledgement::new(SubscriptionId::new(9), 1)],
            ))
            .await;
        assert_eq!(fault(result), StatusCode::BAD_NO_SUBSCRIPTION);
        assert_eq!(manager.stats().rejected_publish_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_publish_gets_keep_alive_and_ack_results() {
        let registry = registry();
        let manager = manager(1, &registry);
        let id = manager.create_subscription(&fast(30, 10)).unwrap().subscription_id;

        let response = manager
            .publish(PublishRequest::new(
                1,
                vec![
                    SubscriptionAcknowledgement::new(id, 5),
                    SubscriptionAcknowledgement::new(SubscriptionId::new(999), 1),
                ],
            ))
            .await
            .unwrap();

        assert!(response.notification_message.is_keep_alive());
        assert_eq!(response.notification_message.sequence_number, 1);
        assert_eq!(response.subscription_id, id);
        assert_eq!(
            response.results,
            vec![
                StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN,
                StatusCode::BAD_SUBSCRIPTION_ID_INVALID
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_change_round_trip() {
        let registry = registry();
        let manager = manager(1, &registry);
        let id = manager.create_subscription(&fast(30, 10)).unwrap().subscription_id;
        let items = manager
            .create_monitored_items(id, &[MonitoredItemCreateRequest::reporting(42).with_queue_size(5)])
            .unwrap();
        assert_eq!(items[0].revised_queue_size, 5);
        let item = items[0].monitored_item_id;

        manager.notify_data_change(id, item, DataValue::new(7)).unwrap();
        let response = manager.publish(PublishRequest::new(1, Vec::new())).await.unwrap();
        assert_eq!(response.notification_message.notification_count(), 1);
        assert_eq!(response.available_sequence_numbers, vec![1]);

        let seq = response.notification_message.sequence_number;
        assert!(manager.republish(id, seq).is_ok());
        assert_eq!(
            manager.republish(SubscriptionId::new(999), seq).unwrap_err().status_code(),
            StatusCode::BAD_SUBSCRIPTION_ID_INVALID
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifetime_expiry_removes_subscription_and_times_out_next_request() {
        let registry = registry();
        let manager = manager(1, &registry);
        let id = manager.create_subscription(&fast(3, 1)).unwrap().subscription_id;
        let subscription = manager.subscription(id).unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(subscription.state(), State::Closing);
        assert!(registry.get(id).is_none());
        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(manager.stats().subscriptions_expired, 1);

        let response = manager.publish(PublishRequest::new(1, Vec::new())).await.unwrap();
        assert_eq!(
            response.notification_message.status_change_status(),
            Some(StatusCode::BAD_TIMEOUT)
        );
        assert_eq!(subscription.state(), State::Closed);

        let result = manager.publish(PublishRequest::new(2, Vec::new())).await;
        assert_eq!(fault(result), StatusCode::BAD_NO_SUBSCRIPTION);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_session_fails_parked_requests() {
        let registry = registry();
        let manager = manager(1, &registry);
        manager.create_subscription(&fast(30, 10)).unwrap();
        let future = manager.publish(PublishRequest::new(1, Vec::new()));

        manager.close_session(true);
        assert_eq!(fault(future.await), StatusCode::BAD_SESSION_CLOSED);
        assert!(registry.is_empty());
        assert_eq!(manager.subscription_count(), 0);

        let result = manager.publish(PublishRequest::new(2, Vec::new())).await;
        assert_eq!(fault(result), StatusCode::BAD_SESSION_CLOSED);
        assert!(manager.create_subscription(&fast(30, 10)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_notifies_previous_session() {
        let registry = registry();
        let source = manager(1, &registry);
        let target = manager(2, &registry);
        let id = source.create_subscription(&fast(30, 10)).unwrap().subscription_id;
        let parked = source.publish(PublishRequest::new(1, Vec::new()));

        let results = target.transfer_subscriptions(&[id], false).unwrap();
        assert_eq!(results[0].status_code, StatusCode::GOOD);
        assert_eq!(source.subscription_count(), 0);
        assert_eq!(target.subscription_count(), 1);
        assert_eq!(registry.get(id).unwrap().session_id, SessionId::new(2));

        let response = parked.await.unwrap();
        assert_eq!(response.subscription_id, id);
        assert_eq!(
            response.notification_message.status_change_status(),
            Some(StatusCode::GOOD_SUBSCRIPTION_TRANSFERRED)
        );
        assert_eq!(
            target.subscription(id).unwrap().session_id(),
            SessionId::new(2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_transfer_notifications_are_bounded() {
        let registry = registry();
        let source = SubscriptionManager::new(
            SessionId::new(1),
            Arc::new(SubscriptionLimits {
                max_pending_transfer_notifications: 2,
                ..SubscriptionLimits::default()
            }),
            Arc::clone(&registry),
        );
        let target = manager(2, &registry);
        let ids: Vec<_> = (0..3)
            .map(|_| source.create_subscription(&fast(30, 10)).unwrap().subscription_id)
            .collect();

        target.transfer_subscriptions(&ids, false).unwrap();
        let stats = source.stats();
        assert_eq!(stats.pending_transfer_notifications, 2);
        assert_eq!(stats.dropped_transfer_notifications, 1);

        for expected in &ids[1..] {
            let response = source.publish(PublishRequest::new(1, Vec::new())).await.unwrap();
            assert_eq!(response.subscription_id, *expected);
        }
        let result = source.publish(PublishRequest::new(2, Vec::new())).await;
        assert_eq!(fault(result), StatusCode::BAD_NO_SUBSCRIPTION);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_unknown_subscription() {
        let registry = registry();
        let target = manager(2, &registry);
        let results = target
            .transfer_subscriptions(&[SubscriptionId::new(77)], true)
            .unwrap();
        assert_eq!(results[0].status_code, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_session_keeps_subscriptions_for_transfer() {
        let registry = registry();
        let source = manager(1, &registry);
        let id = source.create_subscription(&fast(30, 10)).unwrap().subscription_id;
        source.close_session(false);
        drop(source);

        assert_eq!(registry.orphaned(), vec![id]);
        let target = manager(2, &registry);
        let results = target.transfer_subscriptions(&[id], true).unwrap();
        assert_eq!(results[0].status_code, StatusCode::GOOD);
        assert!(registry.orphaned().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitored_item_caps_are_all_or_nothing() {
        let registry = registry();
        let manager = SubscriptionManager::new(
            SessionId::new(1),
            Arc::new(SubscriptionLimits {
                max_monitored_items_per_session: 3,
                ..SubscriptionLimits::default()
            }),
            Arc::clone(&registry),
        );
        let id = manager.create_subscription(&fast(30, 10)).unwrap().subscription_id;
        let two = [
            MonitoredItemCreateRequest::reporting(1),
            MonitoredItemCreateRequest::reporting(2),
        ];

        manager.create_monitored_items(id, &two).unwrap();
        let err = manager.create_monitored_items(id, &two).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_TOO_MANY_MONITORED_ITEMS);
        assert_eq!(manager.monitored_item_count(), 2);
        assert_eq!(registry.monitored_item_count(), 2);
        assert_eq!(manager.subscription(id).unwrap().monitored_item_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_lifecycle_is_told_about_removed_items() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<(SubscriptionId, Vec<MonitoredItemId>)>>);
        impl ItemLifecycle for Recorder {
            fn on_items_removed(&self, subscription_id: SubscriptionId, items: &[MonitoredItemId]) {
                self.0.lock().push((subscription_id, items.to_vec()));
            }
        }

        let registry = registry();
        let recorder = Arc::new(Recorder::default());
        let manager = SubscriptionManager::with_item_lifecycle(
            SessionId::new(1),
            limits(),
            Arc::clone(&registry),
            recorder.clone(),
        );
        let id = manager.create_subscription(&fast(30, 10)).unwrap().subscription_id;
        let created = manager
            .create_monitored_items(
                id,
                &[
                    MonitoredItemCreateRequest::reporting(1),
                    MonitoredItemCreateRequest::reporting(2),
                ],
            )
            .unwrap();
        let first = created[0].monitored_item_id;
        let second = created[1].monitored_item_id;

        manager.delete_monitored_items(id, &[first]).unwrap();
        manager.delete_subscriptions(&[id]).unwrap();

        let calls = recorder.0.lock().clone();
        assert_eq!(calls, vec![(id, vec![first]), (id, vec![second])]);
        assert_eq!(registry.monitored_item_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_publishing_mode_per_id_results() {
        let registry = registry();
        let manager = manager(1, &registry);
        let id = manager.create_subscription(&fast(30, 10)).unwrap().subscription_id;
        let results = manager
            .set_publishing_mode(false, &[id, SubscriptionId::new(404)])
            .unwrap();
        assert_eq!(
            results,
            vec![StatusCode::GOOD, StatusCode::BAD_SUBSCRIPTION_ID_INVALID]
        );
        assert!(!manager.subscription(id).unwrap().params().publishing_enabled);
    }
}
