// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Self-rearming publishing timer.
//!
//! Each tick reschedules the next one for the current publishing interval
//! minus the time spent handling the tick, so handling time does not
//! accumulate as drift. The task only holds a weak reference to its
//! subscription and stops when the subscription is gone, the timer is
//! cancelled, or the subscription reports that it no longer needs ticks.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::subscription::Subscription;

/// What the subscription reports back after handling a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTick {
    /// Interval until the next tick.
    pub interval: Duration,
    /// `false` once the subscription is closing or closed.
    pub active: bool,
}

/// Handle to a running publishing timer. Dropping it stops the timer.
#[derive(Debug)]
pub struct PublishingTimer {
    token: CancellationToken,
}

impl PublishingTimer {
    /// Spawns the timer task on the current Tokio runtime.
    pub fn start(subscription: &Arc<Subscription>, first_delay: Duration) -> Self {
        let token = CancellationToken::new();
        let weak = Arc::downgrade(subscription);
        let subscription_id = subscription.id();

        tokio::spawn(run(weak, token.clone(), first_delay));
        tracing::trace!(
            subscription_id = subscription_id.0,
            interval_ms = first_delay.as_millis() as u64,
            "Publishing timer started"
        );

        Self { token }
    }

    /// Stops the timer.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once the timer has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for PublishingTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(subscription: Weak<Subscription>, token: CancellationToken, first_delay: Duration) {
    let mut delay = first_delay;
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(subscription) = subscription.upgrade() else {
            break;
        };
        let started = Instant::now();
        let tick = subscription.on_publishing_timer();
        if !tick.active {
            break;
        }
        delay = tick.interval.saturating_sub(started.elapsed());
    }
}
