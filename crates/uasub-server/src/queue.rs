// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-session publish request queue and subscription wait list.
//!
//! Client publish requests and subscriptions with something to send meet
//! here. At any time at most one side is non-empty in steady state: either
//! requests are parked waiting for a subscription, or subscriptions are
//! waiting for a request.
//!
//! ```text
//!   Publish ──▶ enqueue_request ──┬─ wait list empty ──▶ park (FIFO)
//!                                 └─ waiting sub ──────▶ Handoff
//!
//!   timer ───▶ dequeue_request / register_waiting
//! ```
//!
//! The queue never calls into a subscription. A request that meets a waiting
//! subscription is returned as a [`Handoff`] and the caller delivers it with
//! [`dispatch`] after all queue locks are released.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use uasub_core::{
    PublishRequest, PublishResponse, PublishResult, RequestHeader, ServiceFault, SessionId,
    StatusCode, SubscriptionId,
};

use crate::subscription::Subscription;

// =============================================================================
// PendingPublish
// =============================================================================

/// A publish request waiting to be answered.
///
/// Consumed by value when completed, so it can be answered only once.
#[derive(Debug)]
pub struct PendingPublish {
    request: PublishRequest,
    ack_results: Vec<StatusCode>,
    responder: oneshot::Sender<PublishResult>,
    received_at: Instant,
}

impl PendingPublish {
    /// Wraps a request and returns the future its caller awaits.
    pub fn new(request: PublishRequest, ack_results: Vec<StatusCode>) -> (Self, PublishFuture) {
        let (tx, rx) = oneshot::channel();
        let future = PublishFuture {
            header: request.request_header.clone(),
            rx,
        };
        let pending = Self {
            request,
            ack_results,
            responder: tx,
            received_at: Instant::now(),
        };
        (pending, future)
    }

    /// Returns the request header.
    pub fn request_header(&self) -> &RequestHeader {
        &self.request.request_header
    }

    /// Returns the acknowledgement results computed on arrival.
    pub fn ack_results(&self) -> &[StatusCode] {
        &self.ack_results
    }

    /// Returns when the request arrived.
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Returns `true` if the caller stopped waiting for the answer.
    pub fn is_abandoned(&self) -> bool {
        self.responder.is_closed()
    }

    /// Answers the request.
    pub fn complete(self, response: PublishResponse) {
        if self.responder.send(Ok(response)).is_err() {
            tracing::debug!(
                request_handle = self.request.request_header.request_handle,
                "Publish response dropped, caller went away"
            );
        }
    }

    /// Fails the request with a service fault.
    pub fn fail(self, status: StatusCode) {
        let fault = ServiceFault::new(&self.request.request_header, status);
        if self.responder.send(Err(fault)).is_err() {
            tracing::debug!(
                request_handle = self.request.request_header.request_handle,
                status = %status,
                "Publish fault dropped, caller went away"
            );
        }
    }
}

// =============================================================================
// PublishFuture
// =============================================================================

/// Resolves when a publish request is answered.
#[derive(Debug)]
pub struct PublishFuture {
    header: RequestHeader,
    rx: oneshot::Receiver<PublishResult>,
}

impl PublishFuture {
    /// Returns the result if it is already available.
    pub fn try_result(&mut self) -> Option<PublishResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(self.dropped())),
        }
    }

    fn dropped(&self) -> ServiceFault {
        ServiceFault::new(&self.header, StatusCode::BAD_INTERNAL_ERROR)
    }
}

impl Future for PublishFuture {
    type Output = PublishResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(self.dropped())),
            Poll::Pending => Poll::Pending,
        }
    }
}

// =============================================================================
// Handoff
// =============================================================================

/// A request that must be delivered to a waiting subscription.
#[derive(Debug)]
pub struct Handoff {
    /// The subscription that was waiting.
    pub subscription: Arc<Subscription>,
    /// The request to deliver.
    pub request: PendingPublish,
}

/// Delivers handoffs until none is left.
///
/// Delivering a request can park it again, which can in turn meet another
/// waiting subscription. Every hop removes one subscription from the wait
/// list, so the loop terminates.
pub fn dispatch(mut handoff: Option<Handoff>) {
    while let Some(Handoff {
        subscription,
        request,
    }) = handoff
    {
        handoff = subscription.on_publish(request);
    }
}

// =============================================================================
// PublishQueue
// =============================================================================

#[derive(Debug)]
struct Waiting {
    subscription: Arc<Subscription>,
    priority: u8,
    since: Instant,
}

#[derive(Debug, Default)]
struct QueueInner {
    requests: VecDeque<PendingPublish>,
    waiting: Vec<Waiting>,
}

impl QueueInner {
    fn pop_request(&mut self) -> Option<PendingPublish> {
        while let Some(pending) = self.requests.pop_front() {
            if pending.is_abandoned() {
                tracing::debug!(
                    request_handle = pending.request_header().request_handle,
                    "Skipping abandoned publish request"
                );
                continue;
            }
            return Some(pending);
        }
        None
    }

    /// Highest priority first, then longest waiting.
    fn take_waiting(&mut self) -> Option<Arc<Subscription>> {
        let index = self
            .waiting
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.since.cmp(&a.since))
                    .then_with(|| ib.cmp(ia))
            })
            .map(|(i, _)| i)?;
        Some(self.waiting.remove(index).subscription)
    }
}

/// Publish request queue of one session.
#[derive(Debug)]
pub struct PublishQueue {
    session_id: SessionId,
    max_requests: usize,
    inner: Mutex<QueueInner>,
}

impl PublishQueue {
    /// Creates a queue that parks at most `max_requests` requests.
    pub fn new(session_id: SessionId, max_requests: usize) -> Self {
        Self {
            session_id,
            max_requests: max_requests.max(1),
            inner: Mutex::new(QueueInner::default()),
        }
    }

    /// Returns the owning session.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Accepts a request.
    ///
    /// If a subscription is waiting the request is paired with it and
    /// returned for delivery. Otherwise it is parked; when the queue is full
    /// the oldest parked request is failed with `Bad_TooManyPublishRequests`.
    pub fn enqueue_request(&self, pending: PendingPublish) -> Option<Handoff> {
        let overflow = {
            let mut inner = self.inner.lock();
            if let Some(subscription) = inner.take_waiting() {
                return Some(Handoff {
                    subscription,
                    request: pending,
                });
            }
            inner.requests.push_back(pending);
            if inner.requests.len() > self.max_requests {
                inner.requests.pop_front()
            } else {
                None
            }
        };

        if let Some(oldest) = overflow {
            tracing::warn!(
                session_id = self.session_id.0,
                max = self.max_requests,
                request_handle = oldest.request_header().request_handle,
                waited_ms = oldest.received_at().elapsed().as_millis() as u64,
                "Publish request queue full, failing oldest request"
            );
            oldest.fail(StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS);
        }
        None
    }

    /// Takes the oldest parked request.
    pub fn dequeue_request(&self) -> Option<PendingPublish> {
        self.inner.lock().pop_request()
    }

    /// Puts a subscription on the wait list.
    ///
    /// If a request is already parked it is returned instead and the
    /// subscription is not registered; the caller must answer it. Registering
    /// an already waiting subscription is a no-op.
    pub fn register_waiting(
        &self,
        subscription: &Arc<Subscription>,
        priority: u8,
    ) -> Option<PendingPublish> {
        let mut inner = self.inner.lock();
        if let Some(pending) = inner.pop_request() {
            inner.waiting.retain(|w| w.subscription.id() != subscription.id());
            return Some(pending);
        }
        if !inner
            .waiting
            .iter()
            .any(|w| w.subscription.id() == subscription.id())
        {
            inner.waiting.push(Waiting {
                subscription: Arc::clone(subscription),
                priority,
                since: Instant::now(),
            });
        }
        None
    }

    /// Removes a subscription from the wait list.
    pub fn remove_waiting(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.waiting.len();
        inner.waiting.retain(|w| w.subscription.id() != id);
        inner.waiting.len() != before
    }

    /// Returns `true` if a subscription is on the wait list.
    pub fn is_waiting(&self, id: SubscriptionId) -> bool {
        self.inner
            .lock()
            .waiting
            .iter()
            .any(|w| w.subscription.id() == id)
    }

    /// Returns `true` if at least one request is parked.
    pub fn has_queued_requests(&self) -> bool {
        !self.inner.lock().requests.is_empty()
    }

    /// Returns `true` if no subscription is waiting.
    pub fn is_wait_list_empty(&self) -> bool {
        self.inner.lock().waiting.is_empty()
    }

    /// Number of parked requests.
    pub fn request_count(&self) -> usize {
        self.inner.lock().requests.len()
    }

    /// Number of waiting subscriptions.
    pub fn waiting_count(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// Takes every parked request.
    pub fn drain_requests(&self) -> Vec<PendingPublish> {
        self.inner.lock().requests.drain(..).collect()
    }

    /// Fails every parked request with `status`. Returns how many were failed.
    pub fn fail_all(&self, status: StatusCode) -> usize {
        let drained = self.drain_requests();
        let count = drained.len();
        for pending in drained {
            pending.fail(status);
        }
        if count > 0 {
            tracing::debug!(
                session_id = self.session_id.0,
                count,
                status = %status,
                "Failed parked publish requests"
            );
        }
        count
    }

    /// Empties the wait list and returns the subscriptions that were on it.
    pub fn drain_waiting(&self) -> Vec<Arc<Subscription>> {
        self.inner
            .lock()
            .waiting
            .drain(..)
            .map(|w| w.subscription)
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
