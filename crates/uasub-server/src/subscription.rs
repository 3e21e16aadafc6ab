// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server-side subscription.
//!
//! A [`Subscription`] owns its monitored items, its republish cache, its
//! sequence number generator and its keep-alive/lifetime counters. Two
//! events drive it, both serialized by one mutex per subscription:
//!
//! - [`Subscription::on_publish`]: a client publish request was routed here
//! - [`Subscription::on_publishing_timer`]: the publishing interval elapsed
//!
//! Both look up the state table in [`crate::state`] and execute the
//! resulting actions.
//!
//! # Locking
//!
//! ```text
//! subscription.inner ──▶ queue.inner        (allowed)
//! queue.inner        ──▶ subscription.inner (never)
//! ```
//!
//! Requests that meet another waiting subscription are returned as
//! [`Handoff`]s and delivered after the lock is released. State listeners
//! are invoked after the lock is released as well.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use uasub_core::{
    DataValue, MonitoredItemCreateRequest, MonitoredItemCreateResult, MonitoredItemError, MonitoredItemId, MonitoringMode,
    NotificationMessage, PublishResponse, ResponseHeader, SessionId, SetTriggeringResponse,
    StatusCode, SubscriptionError, SubscriptionId, UaResult, Variant,
};

use crate::cache::MessageCache;
use crate::gather::{self, partition};
use crate::item::MonitoredItem;
use crate::queue::{Handoff, PendingPublish, PublishQueue};
use crate::revise::RevisedParameters;
use crate::state::{self, Action, Conditions, Counters, State, Transition};
use crate::timer::{PublishingTimer, TimerTick};

// =============================================================================
// SubscriptionParams
// =============================================================================

/// Revised parameters of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionParams {
    /// Publishing interval (ms).
    pub publishing_interval: f64,
    /// Lifetime count.
    pub lifetime_count: u32,
    /// Keep-alive count.
    pub max_keep_alive_count: u32,
    /// Max notifications per publish.
    pub max_notifications_per_publish: u32,
    /// Relative priority.
    pub priority: u8,
    /// Publishing enabled.
    pub publishing_enabled: bool,
}

impl SubscriptionParams {
    /// Builds parameters from a revision result.
    pub fn new(revised: RevisedParameters, priority: u8, publishing_enabled: bool) -> Self {
        Self {
            publishing_interval: revised.publishing_interval,
            lifetime_count: revised.lifetime_count,
            max_keep_alive_count: revised.max_keep_alive_count,
            max_notifications_per_publish: revised.max_notifications_per_publish,
            priority,
            publishing_enabled,
        }
    }

    /// Publishing interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.publishing_interval / 1000.0)
    }
}

// =============================================================================
// Listener
// =============================================================================

/// Observer of subscription lifecycle events.
pub trait SubscriptionListener: Send + Sync {
    /// Called once, outside the subscription lock, when the lifetime expired
    /// and the subscription entered `Closing`.
    fn on_closing(&self, subscription: &Arc<Subscription>);
}

// =============================================================================
// Diagnostics
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct Stats {
    publish_requests: u64,
    data_messages: u64,
    keep_alive_messages: u64,
    notifications: u64,
    republish_requests: u64,
    republish_misses: u64,
    evicted_messages: u64,
    transfers: u64,
}

/// Point-in-time snapshot of a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionDiagnostics {
    /// Subscription id.
    pub subscription_id: SubscriptionId,
    /// Owning session.
    pub session_id: SessionId,
    /// Current state.
    pub state: State,
    /// Current parameters.
    pub params: SubscriptionParams,
    /// Current keep-alive counter.
    pub keep_alive_counter: u32,
    /// Current lifetime counter.
    pub lifetime_counter: u32,
    /// Next sequence number to be issued.
    pub next_sequence_number: u32,
    /// Messages held for republish.
    pub unacknowledged_messages: usize,
    /// Owned monitored items.
    pub monitored_item_count: usize,
    /// Publish requests routed to this subscription.
    pub publish_request_count: u64,
    /// Data messages sent.
    pub data_message_count: u64,
    /// Keep-alives sent.
    pub keep_alive_count: u64,
    /// Data change and event notifications sent.
    pub notification_count: u64,
    /// Republish requests served or missed.
    pub republish_request_count: u64,
    /// Republish requests that missed the cache.
    pub republish_miss_count: u64,
    /// Messages evicted from the cache before acknowledgement.
    pub evicted_message_count: u64,
    /// Times this subscription moved between sessions.
    pub transfer_count: u64,
}

// =============================================================================
// Subscription
// =============================================================================

/// A server-side subscription.
pub struct Subscription {
    id: SubscriptionId,
    inner: Mutex<Inner>,
    timer: Mutex<Option<PublishingTimer>>,
    listener: Mutex<Option<Arc<dyn SubscriptionListener>>>,
}

struct Inner {
    session_id: SessionId,
    state: State,
    params: SubscriptionParams,
    counters: Counters,
    next_sequence_number: u32,
    cache: MessageCache,
    items: BTreeMap<MonitoredItemId, MonitoredItem>,
    cursor: Option<MonitoredItemId>,
    next_item_id: u32,
    queue: Arc<PublishQueue>,
    stats: Stats,
}

#[derive(Default)]
struct Effects {
    handoff: Option<Handoff>,
    closing: bool,
}

enum Outcome {
    Done,
    RequestVanished,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Subscription {
    /// Creates a subscription in the `Normal` state. The timer is not started.
    pub fn new(
        id: SubscriptionId,
        session_id: SessionId,
        params: SubscriptionParams,
        queue: Arc<PublishQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            inner: Mutex::new(Inner {
                session_id,
                state: State::Normal,
                counters: Counters::new(params.max_keep_alive_count, params.lifetime_count),
                params,
                next_sequence_number: 1,
                cache: MessageCache::new(),
                items: BTreeMap::new(),
                cursor: None,
                next_item_id: 1,
                queue,
                stats: Stats::default(),
            }),
            timer: Mutex::new(None),
            listener: Mutex::new(None),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns the owning session.
    pub fn session_id(&self) -> SessionId {
        self.inner.lock().session_id
    }

    /// Returns the current state.
    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    /// Returns the current counters.
    pub fn counters(&self) -> Counters {
        self.inner.lock().counters
    }

    /// Returns the current parameters.
    pub fn params(&self) -> SubscriptionParams {
        self.inner.lock().params
    }

    /// Returns the number of owned monitored items.
    pub fn monitored_item_count(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Returns the ids of the owned monitored items.
    pub fn monitored_item_ids(&self) -> Vec<MonitoredItemId> {
        self.inner.lock().items.keys().copied().collect()
    }

    /// Sequence numbers available for republish.
    pub fn available_sequence_numbers(&self) -> Vec<u32> {
        self.inner.lock().cache.sequence_numbers()
    }

    /// Returns a diagnostics snapshot.
    pub fn diagnostics(&self) -> SubscriptionDiagnostics {
        let inner = self.inner.lock();
        SubscriptionDiagnostics {
            subscription_id: self.id,
            session_id: inner.session_id,
            state: inner.state,
            params: inner.params,
            keep_alive_counter: inner.counters.keep_alive,
            lifetime_counter: inner.counters.lifetime,
            next_sequence_number: inner.next_sequence_number,
            unacknowledged_messages: inner.cache.len(),
            monitored_item_count: inner.items.len(),
            publish_request_count: inner.stats.publish_requests,
            data_message_count: inner.stats.data_messages,
            keep_alive_count: inner.stats.keep_alive_messages,
            notification_count: inner.stats.notifications,
            republish_request_count: inner.stats.republish_requests,
            republish_miss_count: inner.stats.republish_misses,
            evicted_message_count: inner.stats.evicted_messages,
            transfer_count: inner.stats.transfers,
        }
    }

    // =========================================================================
    // Timer and listener
    // =========================================================================

    /// Starts the publishing timer. Must be called within a Tokio runtime.
    pub fn start_timer(self: &Arc<Self>) {
        let interval = self.params().interval();
        let timer = PublishingTimer::start(self, interval);
        if let Some(previous) = self.timer.lock().replace(timer) {
            previous.cancel();
        }
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.cancel();
        }
    }

    /// Returns `true` while a publishing timer is attached.
    pub fn has_timer(&self) -> bool {
        self.timer.lock().as_ref().is_some_and(|t| !t.is_cancelled())
    }

    /// Installs the lifecycle listener, replacing any previous one.
    pub fn set_listener(&self, listener: Arc<dyn SubscriptionListener>) {
        *self.listener.lock() = Some(listener);
    }

    fn notify_closing(self: &Arc<Self>) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.on_closing(self);
        }
    }

    // =========================================================================
    // Event A: publish request
    // =========================================================================

    /// Handles a publish request routed to this subscription.
    ///
    /// Returns a handoff when the request was parked and immediately met
    /// another waiting subscription; deliver it with [`crate::queue::dispatch`].
    pub fn on_publish(self: &Arc<Self>, pending: PendingPublish) -> Option<Handoff> {
        let mut fx = Effects::default();
        {
            let mut inner = self.inner.lock();
            inner.stats.publish_requests += 1;
            let conditions = inner.conditions();
            let transition = state::on_publish(inner.state, &conditions);
            self.execute(&mut inner, transition, Some(pending), &mut fx);
        }
        if fx.closing {
            self.notify_closing();
        }
        fx.handoff
    }

    // =========================================================================
    // Event B: publishing timer
    // =========================================================================

    /// Handles one publishing timer tick.
    pub fn on_publishing_timer(self: &Arc<Self>) -> TimerTick {
        let mut fx = Effects::default();
        let tick = {
            let mut inner = self.inner.lock();
            let conditions = inner.conditions();
            let transition = state::on_publishing_timer(inner.state, &conditions);

            if let Outcome::RequestVanished = self.execute(&mut inner, transition, None, &mut fx) {
                let conditions = Conditions {
                    request_queued: false,
                    ..inner.conditions()
                };
                let retry = state::dispatch_timer(inner.state, &conditions);
                self.execute(&mut inner, retry, None, &mut fx);
            }

            TimerTick {
                interval: inner.params.interval(),
                active: !inner.state.is_terminal(),
            }
        };

        if fx.closing {
            self.notify_closing();
        }
        crate::queue::dispatch(fx.handoff);
        tick
    }

    // =========================================================================
    // Action execution
    // =========================================================================

    fn execute(
        self: &Arc<Self>,
        inner: &mut Inner,
        transition: Transition,
        mut request: Option<PendingPublish>,
        fx: &mut Effects,
    ) -> Outcome {
        let previous = inner.state;
        inner.set_state(self.id, transition.next);
        if transition.next == State::Closing && previous != State::Closing {
            fx.closing = true;
            tracing::info!(
                subscription_id = self.id.0,
                session_id = inner.session_id.0,
                "Subscription lifetime expired"
            );
        }

        for action in transition.actions {
            match action {
                Action::ParkRequest => {
                    if let Some(pending) = request.take() {
                        fx.handoff = inner.queue.enqueue_request(pending);
                    }
                }
                Action::DequeueRequest => match inner.queue.dequeue_request() {
                    Some(pending) => request = Some(pending),
                    None => {
                        inner.state = previous;
                        return Outcome::RequestVanished;
                    }
                },
                Action::ResetLifetimeCounter => {
                    let count = inner.params.lifetime_count;
                    inner.counters.reset_lifetime(count);
                }
                Action::ResetKeepAliveCounter => {
                    let count = inner.params.max_keep_alive_count;
                    inner.counters.reset_keep_alive(count);
                }
                Action::DecrementLifetimeCounter => inner.counters.decrement_lifetime(),
                Action::DecrementKeepAliveCounter => inner.counters.decrement_keep_alive(),
                Action::SendNotifications => {
                    if let Some(pending) = request.take() {
                        self.send_notifications(inner, pending);
                    }
                }
                Action::SendKeepAlive => {
                    if let Some(pending) = request.take() {
                        inner.send_keep_alive(self.id, pending);
                    }
                }
                Action::SendStatusChange(status) => {
                    if let Some(pending) = request.take() {
                        inner.send_status_change(self.id, pending, status);
                    }
                }
                Action::RegisterWaiting => {
                    let priority = inner.params.priority;
                    if let Some(pending) = inner.queue.register_waiting(self, priority) {
                        let conditions = inner.conditions();
                        let answer = state::on_publish(inner.state, &conditions);
                        self.execute(inner, answer, Some(pending), fx);
                    }
                }
                Action::CancelTimer => self.cancel_timer(),
            }
        }

        if let Some(pending) = request {
            fx.handoff = inner.queue.enqueue_request(pending);
        }
        Outcome::Done
    }

    /// Gathers and sends notifications, continuing with further requests
    /// while notifications remain.
    fn send_notifications(self: &Arc<Self>, inner: &mut Inner, mut pending: PendingPublish) {
        loop {
            let budget = inner.params.max_notifications_per_publish as usize;
            let gathered = gather::gather(&mut inner.items, &mut inner.cursor, budget);
            let more = gathered.more_notifications;
            inner.counters.more_notifications = more;

            if gathered.notifications.is_empty() {
                // Items emptied between the availability check and the drain.
                // Counted with the other keep-alives.
                tracing::trace!(
                    subscription_id = self.id.0,
                    "Gather found nothing, answering with keep-alive"
                );
                inner.send_keep_alive(self.id, pending);
            } else {
                let count = gathered.notifications.len();
                let sequence_number = inner.issue_sequence_number();
                let message = NotificationMessage::new(sequence_number, partition(gathered.notifications));
                if let Some(evicted) = inner.cache.insert(message.clone()) {
                    inner.stats.evicted_messages += 1;
                    tracing::debug!(
                        subscription_id = self.id.0,
                        evicted_sequence_number = evicted,
                        "Republish cache full, evicted oldest message"
                    );
                }
                inner.stats.data_messages += 1;
                inner.stats.notifications += count as u64;
                tracing::trace!(
                    subscription_id = self.id.0,
                    sequence_number,
                    notifications = count,
                    more_notifications = more,
                    "Sending notifications"
                );
                inner.respond(self.id, pending, message, more);
            }

            if !more {
                break;
            }

            let priority = inner.params.priority;
            let next = match inner.queue.dequeue_request() {
                Some(next) => next,
                None => match inner.queue.register_waiting(self, priority) {
                    Some(next) => next,
                    None => break,
                },
            };
            let lifetime = inner.params.lifetime_count;
            let keep_alive = inner.params.max_keep_alive_count;
            inner.counters.reset_lifetime(lifetime);
            inner.counters.reset_keep_alive(keep_alive);
            pending = next;
        }
    }

    // =========================================================================
    // Acknowledge / Republish
    // =========================================================================

    /// Removes an acknowledged message from the republish cache.
    pub fn acknowledge(&self, sequence_number: u32) -> StatusCode {
        if self.inner.lock().cache.remove(sequence_number) {
            StatusCode::GOOD
        } else {
            StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN
        }
    }

    /// Returns a cached message. Counts as client activity.
    pub fn republish(&self, sequence_number: u32) -> UaResult<NotificationMessage> {
        let mut inner = self.inner.lock();
        let lifetime = inner.params.lifetime_count;
        inner.counters.reset_lifetime(lifetime);
        inner.stats.republish_requests += 1;

        match inner.cache.get(sequence_number) {
            Some(message) => Ok(message.clone()),
            None => {
                inner.stats.republish_misses += 1;
                Err(SubscriptionError::message_not_available(self.id, sequence_number).into())
            }
        }
    }

    /// Consumes the next sequence number without sending a message.
    pub fn issue_sequence_number(&self) -> u32 {
        self.inner.lock().issue_sequence_number()
    }

    // =========================================================================
    // Modify / SetPublishingMode
    // =========================================================================

    /// Applies revised parameters and resets both counters.
    pub fn modify(&self, revised: RevisedParameters, priority: u8) -> UaResult<SubscriptionParams> {
        let mut inner = self.inner.lock();
        inner.ensure_active(self.id)?;

        let enabled = inner.params.publishing_enabled;
        inner.params = SubscriptionParams::new(revised, priority, enabled);
        let (lifetime, keep_alive) = (inner.params.lifetime_count, inner.params.max_keep_alive_count);
        inner.counters.reset_lifetime(lifetime);
        inner.counters.reset_keep_alive(keep_alive);

        tracing::debug!(
            subscription_id = self.id.0,
            publishing_interval = inner.params.publishing_interval,
            lifetime_count = lifetime,
            max_keep_alive_count = keep_alive,
            "Subscription modified"
        );
        Ok(inner.params)
    }

    /// Enables or disables publishing and resets the lifetime counter.
    pub fn set_publishing_mode(&self, enabled: bool) -> UaResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active(self.id)?;
        inner.params.publishing_enabled = enabled;
        let lifetime = inner.params.lifetime_count;
        inner.counters.reset_lifetime(lifetime);
        tracing::debug!(subscription_id = self.id.0, enabled, "Publishing mode changed");
        Ok(())
    }

    // =========================================================================
    // Monitored items
    // =========================================================================

    /// Creates monitored items. Queue sizes must already be revised.
    pub fn create_monitored_items(
        &self,
        requests: &[MonitoredItemCreateRequest],
    ) -> UaResult<Vec<MonitoredItemCreateResult>> {
        let mut inner = self.inner.lock();
        inner.ensure_active(self.id)?;

        let results = requests
            .iter()
            .map(|request| {
                let id = inner.allocate_item_id();
                let queue_size = request.queue_size.max(1);
                inner.items.insert(
                    id,
                    MonitoredItem::new(
                        id,
                        request.client_handle,
                        request.monitoring_mode,
                        queue_size,
                        request.discard_oldest,
                    ),
                );
                MonitoredItemCreateResult {
                    status_code: StatusCode::GOOD,
                    monitored_item_id: id,
                    revised_queue_size: queue_size,
                }
            })
            .collect();
        Ok(results)
    }

    /// Deletes monitored items. Returns one result per id and the ids removed.
    pub fn delete_monitored_items(
        &self,
        ids: &[MonitoredItemId],
    ) -> (Vec<StatusCode>, Vec<MonitoredItemId>) {
        let mut inner = self.inner.lock();
        let mut removed = Vec::new();
        let results = ids
            .iter()
            .map(|id| match inner.items.remove(id) {
                Some(_) => {
                    removed.push(*id);
                    StatusCode::GOOD
                }
                None => StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
            })
            .collect();

        for item in inner.items.values_mut() {
            for id in &removed {
                item.forget_link(*id);
            }
        }
        (results, removed)
    }

    /// Changes the monitoring mode of items.
    pub fn set_monitoring_mode(&self, mode: MonitoringMode, ids: &[MonitoredItemId]) -> Vec<StatusCode> {
        let mut inner = self.inner.lock();
        ids.iter()
            .map(|id| match inner.items.get_mut(id) {
                Some(item) => {
                    item.set_monitoring_mode(mode);
                    StatusCode::GOOD
                }
                None => StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
            })
            .collect()
    }

    /// Adds and removes triggering links of `trigger`.
    pub fn set_triggering(
        &self,
        trigger: MonitoredItemId,
        links_to_add: &[MonitoredItemId],
        links_to_remove: &[MonitoredItemId],
    ) -> UaResult<SetTriggeringResponse> {
        let mut inner = self.inner.lock();
        if !inner.items.contains_key(&trigger) {
            return Err(MonitoredItemError::id_invalid(self.id, trigger).into());
        }

        let remove_results = links_to_remove
            .iter()
            .map(|target| {
                let removed = inner
                    .items
                    .get_mut(&trigger)
                    .is_some_and(|item| item.remove_link(*target));
                if removed {
                    StatusCode::GOOD
                } else {
                    StatusCode::BAD_MONITORED_ITEM_ID_INVALID
                }
            })
            .collect();

        let add_results = links_to_add
            .iter()
            .map(|target| {
                if !inner.items.contains_key(target) {
                    return StatusCode::BAD_MONITORED_ITEM_ID_INVALID;
                }
                if let Some(item) = inner.items.get_mut(&trigger) {
                    item.add_link(*target);
                }
                StatusCode::GOOD
            })
            .collect();

        Ok(SetTriggeringResponse {
            add_results,
            remove_results,
        })
    }

    /// Queues a sampled value on an item.
    pub fn notify_data_change(&self, item_id: MonitoredItemId, value: DataValue) -> UaResult<()> {
        let mut inner = self.inner.lock();
        match inner.items.get_mut(&item_id) {
            Some(item) => {
                item.push_data_change(value);
                Ok(())
            }
            None => Err(MonitoredItemError::id_invalid(self.id, item_id).into()),
        }
    }

    /// Queues an event on an item.
    pub fn notify_event(&self, item_id: MonitoredItemId, event_fields: Vec<Variant>) -> UaResult<()> {
        let mut inner = self.inner.lock();
        match inner.items.get_mut(&item_id) {
            Some(item) => {
                item.push_event(event_fields);
                Ok(())
            }
            None => Err(MonitoredItemError::id_invalid(self.id, item_id).into()),
        }
    }

    // =========================================================================
    // Teardown and transfer
    // =========================================================================

    /// Tears the subscription down regardless of its state.
    ///
    /// Returns the ids of the monitored items that were dropped.
    pub fn delete(self: &Arc<Self>) -> Vec<MonitoredItemId> {
        let removed = {
            let mut inner = self.inner.lock();
            inner.set_state(self.id, State::Closed);
            inner.queue.remove_waiting(self.id);
            inner.cache.clear();
            inner.cursor = None;
            let ids: Vec<MonitoredItemId> = inner.items.keys().copied().collect();
            inner.items.clear();
            ids
        };
        self.cancel_timer();
        *self.listener.lock() = None;
        removed
    }

    /// Moves the subscription to another session's queue.
    ///
    /// Returns the sequence numbers available for republish.
    pub fn rebind(
        self: &Arc<Self>,
        session_id: SessionId,
        queue: Arc<PublishQueue>,
        send_initial_values: bool,
    ) -> UaResult<Vec<u32>> {
        let mut inner = self.inner.lock();
        inner.ensure_active(self.id)?;

        inner.queue.remove_waiting(self.id);
        let previous_session = inner.session_id;
        inner.queue = queue;
        inner.session_id = session_id;
        let lifetime = inner.params.lifetime_count;
        inner.counters.reset_lifetime(lifetime);
        inner.stats.transfers += 1;

        if send_initial_values {
            for item in inner.items.values_mut() {
                item.resend_last_value();
            }
        }

        tracing::info!(
            subscription_id = self.id.0,
            from_session = previous_session.0,
            to_session = session_id.0,
            send_initial_values,
            "Subscription transferred"
        );
        Ok(inner.cache.sequence_numbers())
    }
}

// =============================================================================
// Inner helpers
// =============================================================================

impl Inner {
    fn conditions(&self) -> Conditions {
        Conditions {
            publishing_enabled: self.params.publishing_enabled,
            notifications_available: gather::notifications_available(&self.items),
            more_notifications: self.counters.more_notifications,
            request_queued: self.queue.has_queued_requests(),
            message_sent: self.counters.message_sent,
            keep_alive_counter: self.counters.keep_alive,
            lifetime_counter: self.counters.lifetime,
        }
    }

    fn set_state(&mut self, id: SubscriptionId, next: State) {
        if self.state != next {
            tracing::debug!(
                subscription_id = id.0,
                from = %self.state,
                to = %next,
                "Subscription state changed"
            );
            self.state = next;
        }
    }

    fn ensure_active(&self, id: SubscriptionId) -> UaResult<()> {
        if self.state.is_terminal() {
            return Err(SubscriptionError::invalid_state(id, self.state.as_str()).into());
        }
        Ok(())
    }

    fn issue_sequence_number(&mut self) -> u32 {
        let sequence_number = self.next_sequence_number;
        self.next_sequence_number = if sequence_number == u32::MAX {
            1
        } else {
            sequence_number + 1
        };
        sequence_number
    }

    fn allocate_item_id(&mut self) -> MonitoredItemId {
        loop {
            let id = MonitoredItemId::new(self.next_item_id);
            self.next_item_id = self.next_item_id.checked_add(1).unwrap_or(1);
            if !self.items.contains_key(&id) {
                return id;
            }
        }
    }

    fn respond(
        &mut self,
        id: SubscriptionId,
        pending: PendingPublish,
        message: NotificationMessage,
        more_notifications: bool,
    ) {
        let response = PublishResponse {
            response_header: ResponseHeader::good(pending.request_header()),
            subscription_id: id,
            available_sequence_numbers: self.cache.sequence_numbers(),
            more_notifications,
            notification_message: message,
            results: pending.ack_results().to_vec(),
        };
        self.counters.message_sent = true;
        pending.complete(response);
    }

    fn send_keep_alive(&mut self, id: SubscriptionId, pending: PendingPublish) {
        let message = NotificationMessage::keep_alive(self.next_sequence_number);
        self.stats.keep_alive_messages += 1;
        tracing::trace!(
            subscription_id = id.0,
            sequence_number = message.sequence_number,
            "Sending keep-alive"
        );
        self.respond(id, pending, message, false);
    }

    fn send_status_change(&mut self, id: SubscriptionId, pending: PendingPublish, status: StatusCode) {
        let message = NotificationMessage::status_change(self.issue_sequence_number(), status);
        tracing::debug!(
            subscription_id = id.0,
            sequence_number = message.sequence_number,
            status = %status,
            "Sending status change"
        );
        self.respond(id, pending, message, false);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MAX_CACHED_MESSAGES;
    use crate::limits::SubscriptionLimits;
    use crate::queue::PublishFuture;
    use crate::revise::{RequestedParameters, revise};
    use uasub_core::{NotificationData, PublishRequest, PublishResult};

    struct Harness {
        queue: Arc<PublishQueue>,
        subscription: Arc<Subscription>,
        next_handle: u32,
    }

    impl Harness {
        fn new(keep_alive: u32, lifetime: u32, max_notifications: u32) -> Self {
            let queue = Arc::new(PublishQueue::new(SessionId::new(1), 100));
            let params = SubscriptionParams {
                publishing_interval: 100.0,
                lifetime_count: lifetime,
                max_keep_alive_count: keep_alive,
                max_notifications_per_publish: if max_notifications == 0 {
                    65_535
                } else {
                    max_notifications
                },
                priority: 0,
                publishing_enabled: true,
            };
            let subscription = Subscription::new(
                SubscriptionId::new(1),
                SessionId::new(1),
                params,
                Arc::clone(&queue),
            );
            Self {
                queue,
                subscription,
                next_handle: 1,
            }
        }

        fn add_items(&self, count: usize) -> Vec<MonitoredItemId> {
            let requests: Vec<_> = (0..count)
                .map(|i| MonitoredItemCreateRequest::reporting(i as u32 + 100).with_queue_size(10_000))
                .collect();
            self.subscription
                .create_monitored_items(&requests)
                .unwrap()
                .into_iter()
                .map(|r| r.monitored_item_id)
                .collect()
        }

        fn push(&self, item: MonitoredItemId, count: usize) {
            for v in 0..count {
                self.subscription
                    .notify_data_change(item, DataValue::new(v as i32))
                    .unwrap();
            }
        }

        /// Routes a request the way the manager does.
        fn publish(&mut self) -> PublishFuture {
            let (pending, future) = PendingPublish::new(
                PublishRequest::new(self.next_handle, Vec::new()),
                Vec::new(),
            );
            self.next_handle += 1;
            crate::queue::dispatch(self.queue.enqueue_request(pending));
            future
        }

        fn tick(&self) -> TimerTick {
            self.subscription.on_publishing_timer()
        }
    }

    fn response(future: &mut PublishFuture) -> PublishResponse {
        match future.try_result() {
            Some(Ok(response)) => response,
            other => panic!("expected a publish response, got {other:?}"),
        }
    }

    fn pending(future: &mut PublishFuture) -> bool {
        future.try_result().is_none()
    }

    #[tokio::test]
    async fn test_first_tick_answers_parked_request_with_keep_alive() {
        let mut h = Harness::new(3, 9, 0);
        let mut future = h.publish();
        assert!(pending(&mut future));

        h.tick();
        let response = response(&mut future);
        assert!(response.notification_message.is_keep_alive());
        assert_eq!(response.notification_message.sequence_number, 1);
        assert!(!response.more_notifications);
        assert_eq!(h.subscription.state(), State::Normal);

        // The keep-alive did not consume a sequence number.
        assert_eq!(h.subscription.issue_sequence_number(), 1);
    }

    #[tokio::test]
    async fn test_tick_without_request_goes_late_and_next_request_is_answered() {
        let mut h = Harness::new(3, 9, 0);
        let items = h.add_items(1);

        h.tick();
        assert_eq!(h.subscription.state(), State::Late);
        assert!(h.queue.is_waiting(h.subscription.id()));

        h.push(items[0], 2);
        let mut future = h.publish();
        let response = response(&mut future);
        assert_eq!(response.notification_message.notification_count(), 2);
        assert_eq!(response.notification_message.sequence_number, 1);
        assert_eq!(response.available_sequence_numbers, vec![1]);
        assert_eq!(h.subscription.state(), State::Normal);
    }

    #[tokio::test]
    async fn test_late_without_data_sends_keep_alive_and_enters_keep_alive() {
        let mut h = Harness::new(3, 9, 0);
        h.tick();
        let mut future = h.publish();
        assert!(response(&mut future).notification_message.is_keep_alive());
        assert_eq!(h.subscription.state(), State::KeepAlive);
    }

    #[tokio::test]
    async fn test_keep_alive_cadence() {
        let mut h = Harness::new(3, 9, 0);
        let items = h.add_items(1);
        h.push(items[0], 1);

        let mut first = h.publish();
        h.tick();
        assert_eq!(response(&mut first).notification_message.notification_count(), 1);

        // Nothing new: Normal -> KeepAlive with counter at max - 1.
        h.tick();
        assert_eq!(h.subscription.state(), State::KeepAlive);
        assert_eq!(h.subscription.counters().keep_alive, 2);

        let mut keep_alive = h.publish();
        assert!(pending(&mut keep_alive));
        h.tick();
        assert!(pending(&mut keep_alive));
        h.tick();
        let response = response(&mut keep_alive);
        assert!(response.notification_message.is_keep_alive());
        assert_eq!(response.notification_message.sequence_number, 2);
        assert_eq!(h.subscription.state(), State::KeepAlive);
    }

    #[tokio::test]
    async fn test_keep_alive_state_with_new_data_returns_to_normal() {
        let mut h = Harness::new(5, 15, 0);
        let items = h.add_items(1);
        h.push(items[0], 1);
        let mut first = h.publish();
        h.tick();
        response(&mut first);
        h.tick();
        assert_eq!(h.subscription.state(), State::KeepAlive);

        let mut second = h.publish();
        h.push(items[0], 1);
        h.tick();
        assert_eq!(response(&mut second).notification_message.notification_count(), 1);
        assert_eq!(h.subscription.state(), State::Normal);
    }

    #[tokio::test]
    async fn test_more_notifications_consume_parked_requests_then_wait() {
        let mut h = Harness::new(3, 9, 2_000);
        let items = h.add_items(5);
        let mut first = h.publish();
        let mut second = h.publish();
        for item in &items {
            h.push(*item, 1_000);
        }

        h.tick();

        let r1 = response(&mut first);
        assert_eq!(r1.notification_message.notification_count(), 2_000);
        assert!(r1.more_notifications);
        let r2 = response(&mut second);
        assert_eq!(r2.notification_message.notification_count(), 2_000);
        assert!(r2.more_notifications);
        assert_eq!(r2.notification_message.sequence_number, 2);
        assert!(h.queue.is_waiting(h.subscription.id()));

        let mut third = h.publish();
        let r3 = response(&mut third);
        assert_eq!(r3.notification_message.notification_count(), 1_000);
        assert!(!r3.more_notifications);
        assert_eq!(r3.available_sequence_numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_publishing_disabled_only_keep_alives() {
        let mut h = Harness::new(1, 3, 0);
        let items = h.add_items(1);
        h.subscription.set_publishing_mode(false).unwrap();
        h.push(items[0], 5);

        for _ in 0..6 {
            let mut future = h.publish();
            h.tick();
            h.tick();
            if let Some(Ok(response)) = future.try_result() {
                assert!(response.notification_message.is_keep_alive());
            }
            h.subscription.set_publishing_mode(false).unwrap();
        }
        assert_eq!(h.subscription.diagnostics().data_message_count, 0);
    }

    #[tokio::test]
    async fn test_lifetime_expiry_answers_parked_request_with_timeout() {
        let mut h = Harness::new(1, 3, 0);
        h.tick();
        h.tick();
        assert_eq!(h.subscription.state(), State::Late);
        assert_eq!(h.subscription.counters().lifetime, 1);

        // A request parked while the subscription is off the wait list.
        h.queue.remove_waiting(h.subscription.id());
        let mut future = h.publish();
        assert!(pending(&mut future));

        let tick = h.tick();
        assert!(!tick.active);
        let response = response(&mut future);
        assert_eq!(
            response.notification_message.status_change_status(),
            Some(StatusCode::BAD_TIMEOUT)
        );
        assert_eq!(h.subscription.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_lifetime_expiry_without_request_waits_in_closing() {
        let mut h = Harness::new(1, 3, 0);
        for _ in 0..3 {
            h.tick();
        }
        assert_eq!(h.subscription.state(), State::Closing);
        assert!(h.queue.is_waiting(h.subscription.id()));

        let mut future = h.publish();
        let response = response(&mut future);
        assert_eq!(
            response.notification_message.status_change_status(),
            Some(StatusCode::BAD_TIMEOUT)
        );
        assert_eq!(h.subscription.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_closing_listener_called_once() {
        struct Counter(Mutex<u32>);
        impl SubscriptionListener for Counter {
            fn on_closing(&self, _subscription: &Arc<Subscription>) {
                *self.0.lock() += 1;
            }
        }

        let h = Harness::new(1, 3, 0);
        let counter = Arc::new(Counter(Mutex::new(0)));
        h.subscription.set_listener(counter.clone());
        for _ in 0..6 {
            h.tick();
        }
        assert_eq!(*counter.0.lock(), 1);
    }

    #[tokio::test]
    async fn test_acknowledge_and_republish() {
        let mut h = Harness::new(3, 9, 0);
        let items = h.add_items(1);
        h.push(items[0], 1);
        let mut future = h.publish();
        h.tick();
        let seq = response(&mut future).notification_message.sequence_number;

        let message = h.subscription.republish(seq).unwrap();
        assert_eq!(message.sequence_number, seq);

        assert_eq!(h.subscription.acknowledge(seq), StatusCode::GOOD);
        assert_eq!(
            h.subscription.acknowledge(seq),
            StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN
        );
        let err = h.subscription.republish(seq).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_MESSAGE_NOT_AVAILABLE);
    }

    #[tokio::test]
    async fn test_republish_after_eviction_is_not_available() {
        let mut h = Harness::new(3, 9, 1);
        let items = h.add_items(1);
        h.push(items[0], MAX_CACHED_MESSAGES + 1);

        let mut first = h.publish();
        h.tick();
        assert_eq!(response(&mut first).notification_message.sequence_number, 1);
        for _ in 0..MAX_CACHED_MESSAGES {
            let mut future = h.publish();
            assert!(!response(&mut future).notification_message.is_keep_alive());
        }

        let err = h.subscription.republish(1).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_MESSAGE_NOT_AVAILABLE);
        assert!(h.subscription.republish(2).is_ok());
        assert_eq!(h.subscription.diagnostics().evicted_message_count, 1);
        assert_eq!(h.subscription.available_sequence_numbers().len(), MAX_CACHED_MESSAGES);
    }

    #[tokio::test]
    async fn test_republish_resets_lifetime() {
        let h = Harness::new(1, 3, 0);
        h.tick();
        assert_eq!(h.subscription.counters().lifetime, 2);
        let _ = h.subscription.republish(99);
        assert_eq!(h.subscription.counters().lifetime, 3);
    }

    #[tokio::test]
    async fn test_sequence_numbers_strictly_increase() {
        let mut h = Harness::new(3, 9, 1);
        let items = h.add_items(1);
        h.push(items[0], 10);

        let mut last = 0;
        for _ in 0..10 {
            let mut future = h.publish();
            h.tick();
            if let Some(Ok(response)) = future.try_result() {
                let seq = response.notification_message.sequence_number;
                if !response.notification_message.is_keep_alive() {
                    assert!(seq > last);
                    last = seq;
                }
            }
        }
        assert_eq!(last, 10);
    }

    #[tokio::test]
    async fn test_sequence_number_wraps_to_one() {
        let h = Harness::new(3, 9, 0);
        h.subscription.inner.lock().next_sequence_number = u32::MAX;
        assert_eq!(h.subscription.issue_sequence_number(), u32::MAX);
        assert_eq!(h.subscription.issue_sequence_number(), 1);
    }

    #[tokio::test]
    async fn test_modify_resets_counters() {
        let h = Harness::new(3, 9, 0);
        h.tick();
        let revised = revise(
            &SubscriptionLimits::default(),
            RequestedParameters {
                publishing_interval: 500.0,
                lifetime_count: 30,
                max_keep_alive_count: 10,
                max_notifications_per_publish: 0,
            },
        );
        let params = h.subscription.modify(revised, 7).unwrap();
        assert_eq!(params.publishing_interval, 500.0);
        assert_eq!(params.priority, 7);
        assert_eq!(h.subscription.counters().lifetime, 30);
        assert_eq!(h.subscription.counters().keep_alive, 10);
    }

    #[tokio::test]
    async fn test_delete_forces_closed() {
        let h = Harness::new(3, 9, 0);
        let items = h.add_items(3);
        h.tick();
        assert!(h.queue.is_waiting(h.subscription.id()));

        let removed = h.subscription.delete();
        assert_eq!(removed, items);
        assert_eq!(h.subscription.state(), State::Closed);
        assert!(h.queue.is_wait_list_empty());
        let err = h.subscription.set_publishing_mode(true).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_INVALID_STATE);
        assert!(!h.subscription.has_timer());
    }

    #[tokio::test]
    async fn test_set_triggering_results() {
        let h = Harness::new(3, 9, 0);
        let items = h.add_items(2);
        let missing = MonitoredItemId::new(999);

        let response = h
            .subscription
            .set_triggering(items[0], &[items[1], missing], &[missing])
            .unwrap();
        assert_eq!(
            response.add_results,
            vec![StatusCode::GOOD, StatusCode::BAD_MONITORED_ITEM_ID_INVALID]
        );
        assert_eq!(response.remove_results, vec![StatusCode::BAD_MONITORED_ITEM_ID_INVALID]);

        let err = h.subscription.set_triggering(missing, &[], &[]).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_MONITORED_ITEM_ID_INVALID);
    }

    #[tokio::test]
    async fn test_triggered_sampling_item_is_reported() {
        let mut h = Harness::new(3, 9, 0);
        let items = h.add_items(2);
        h.subscription
            .set_monitoring_mode(MonitoringMode::Sampling, &[items[1]]);
        h.subscription.set_triggering(items[0], &[items[1]], &[]).unwrap();
        h.push(items[1], 1);

        // Sampling item alone does not make notifications available.
        let mut first = h.publish();
        h.tick();
        assert!(response(&mut first).notification_message.is_keep_alive());

        h.push(items[0], 1);
        let mut second = h.publish();
        h.tick();
        h.tick();
        let result: PublishResult = second.try_result().expect("answered");
        let message = result.unwrap().notification_message;
        let handles: Vec<u32> = message
            .notification_data
            .iter()
            .flat_map(|ext| match &ext.body {
                NotificationData::DataChange(dc) => {
                    dc.monitored_items.iter().map(|n| n.client_handle).collect()
                }
                _ => Vec::new(),
            })
            .collect();
        assert_eq!(handles, vec![100, 101]);
    }

    #[tokio::test]
    async fn test_delete_monitored_items_reports_unknown_ids() {
        let h = Harness::new(3, 9, 0);
        let items = h.add_items(2);
        let (results, removed) = h
            .subscription
            .delete_monitored_items(&[items[0], MonitoredItemId::new(77)]);
        assert_eq!(
            results,
            vec![StatusCode::GOOD, StatusCode::BAD_MONITORED_ITEM_ID_INVALID]
        );
        assert_eq!(removed, vec![items[0]]);
        assert_eq!(h.subscription.monitored_item_count(), 1);
    }

    #[tokio::test]
    async fn test_rebind_moves_to_new_queue() {
        let h = Harness::new(3, 9, 0);
        let items = h.add_items(1);
        h.push(items[0], 1);
        h.tick();
        assert!(h.queue.is_waiting(h.subscription.id()));

        let target = Arc::new(PublishQueue::new(SessionId::new(2), 10));
        h.subscription
            .rebind(SessionId::new(2), Arc::clone(&target), true)
            .unwrap();
        assert!(h.queue.is_wait_list_empty());
        assert_eq!(h.subscription.session_id(), SessionId::new(2));

        // Late re-registers on the new queue at the next tick.
        h.tick();
        assert!(target.is_waiting(h.subscription.id()));
        assert_eq!(h.subscription.diagnostics().transfer_count, 1);
    }
}
