// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription state table.
//!
//! The two events that drive a subscription are expressed as pure functions
//! from the current [`State`] and a snapshot of [`Conditions`] to a
//! [`Transition`]: the next state plus the ordered [`Action`]s the
//! subscription must carry out. Nothing here touches timers, queues or
//! locks, so every row of the table can be tested directly.
//!
//! ```text
//!                 publish / timer
//!      ┌────────┐ ───────────────▶ ┌──────┐
//!      │ Normal │                  │ Late │
//!      └────────┘ ◀─────────────── └──────┘
//!         │  ▲        publish         │
//!   timer │  │ timer/publish          │ publish
//!         ▼  │                        ▼
//!      ┌───────────┐ ◀────────────────┘
//!      │ KeepAlive │
//!      └───────────┘
//!
//!   any state ── lifetime expired ──▶ Closing ── publish ──▶ Closed
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use uasub_core::StatusCode;

// =============================================================================
// State
// =============================================================================

/// Subscription state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Terminal state after deletion or after the timeout status was sent.
    Closed,
    /// Publishing on schedule.
    Normal,
    /// Nothing to send; counting down to the next keep-alive.
    KeepAlive,
    /// Something is due but no publish request was available.
    Late,
    /// Lifetime expired; waiting to deliver the timeout status.
    Closing,
}

impl State {
    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Normal => "normal",
            Self::KeepAlive => "keep_alive",
            Self::Late => "late",
            Self::Closing => "closing",
        }
    }

    /// Returns `true` for `Closing` and `Closed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Counters
// =============================================================================

/// Keep-alive and lifetime bookkeeping of a subscription.
///
/// Every mutation bumps `version`, which lets callers detect that a
/// snapshot is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Publishing intervals left before a keep-alive is due.
    pub keep_alive: u32,
    /// Publishing intervals left before the subscription expires.
    pub lifetime: u32,
    /// Whether any message has been sent since creation.
    pub message_sent: bool,
    /// Whether the last gather left notifications behind.
    pub more_notifications: bool,
    /// Mutation counter.
    pub version: u64,
}

impl Counters {
    /// Creates counters for freshly revised parameters.
    pub fn new(max_keep_alive_count: u32, lifetime_count: u32) -> Self {
        Self {
            keep_alive: max_keep_alive_count,
            lifetime: lifetime_count,
            message_sent: false,
            more_notifications: false,
            version: 0,
        }
    }

    /// Resets the keep-alive counter.
    pub fn reset_keep_alive(&mut self, max_keep_alive_count: u32) {
        self.keep_alive = max_keep_alive_count;
        self.version += 1;
    }

    /// Resets the lifetime counter.
    pub fn reset_lifetime(&mut self, lifetime_count: u32) {
        self.lifetime = lifetime_count;
        self.version += 1;
    }

    /// Decrements the keep-alive counter, stopping at 1.
    pub fn decrement_keep_alive(&mut self) {
        if self.keep_alive > 1 {
            self.keep_alive -= 1;
        }
        self.version += 1;
    }

    /// Decrements the lifetime counter, stopping at 0.
    pub fn decrement_lifetime(&mut self) {
        self.lifetime = self.lifetime.saturating_sub(1);
        self.version += 1;
    }
}

// =============================================================================
// Conditions / Actions / Transition
// =============================================================================

/// Snapshot of everything the table branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Conditions {
    /// Publishing is enabled.
    pub publishing_enabled: bool,
    /// At least one monitored item has something to report.
    pub notifications_available: bool,
    /// The previous gather hit its budget.
    pub more_notifications: bool,
    /// The session has a parked publish request.
    pub request_queued: bool,
    /// A message has been sent since creation.
    pub message_sent: bool,
    /// Current keep-alive counter.
    pub keep_alive_counter: u32,
    /// Current lifetime counter, before this tick's decrement.
    pub lifetime_counter: u32,
}

impl Conditions {
    fn data_ready(&self) -> bool {
        self.publishing_enabled && self.notifications_available
    }
}

/// A step the subscription performs while handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Put the request in hand back into the publish queue.
    ParkRequest,
    /// Take a request from the publish queue; following sends answer it.
    DequeueRequest,
    /// Reset the lifetime counter.
    ResetLifetimeCounter,
    /// Reset the keep-alive counter.
    ResetKeepAliveCounter,
    /// Decrement the lifetime counter.
    DecrementLifetimeCounter,
    /// Decrement the keep-alive counter.
    DecrementKeepAliveCounter,
    /// Gather notifications and answer the request in hand.
    SendNotifications,
    /// Answer the request in hand with a keep-alive.
    SendKeepAlive,
    /// Answer the request in hand with a status change.
    SendStatusChange(StatusCode),
    /// Join the publish queue's wait list.
    RegisterWaiting,
    /// Stop the publishing timer.
    CancelTimer,
}

/// Result of a table lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State to enter before the actions run.
    pub next: State,
    /// Actions in execution order.
    pub actions: Vec<Action>,
}

impl Transition {
    fn new(next: State, actions: Vec<Action>) -> Self {
        Self { next, actions }
    }

    fn stay(state: State) -> Self {
        Self::new(state, Vec::new())
    }
}

// =============================================================================
// Event A: publish request arrived
// =============================================================================

/// Dispatches a publish request that was routed to the subscription.
pub fn on_publish(state: State, c: &Conditions) -> Transition {
    use Action::*;

    match state {
        State::Normal => {
            if c.publishing_enabled && c.more_notifications {
                Transition::new(
                    State::Normal,
                    vec![ResetLifetimeCounter, ResetKeepAliveCounter, SendNotifications],
                )
            } else {
                Transition::new(State::Normal, vec![ParkRequest])
            }
        }
        State::Late => {
            if c.publishing_enabled && (c.notifications_available || c.more_notifications) {
                Transition::new(
                    State::Normal,
                    vec![ResetLifetimeCounter, ResetKeepAliveCounter, SendNotifications],
                )
            } else {
                Transition::new(
                    State::KeepAlive,
                    vec![ResetLifetimeCounter, ResetKeepAliveCounter, SendKeepAlive],
                )
            }
        }
        State::KeepAlive => Transition::new(State::KeepAlive, vec![ParkRequest]),
        State::Closing => Transition::new(
            State::Closed,
            vec![SendStatusChange(StatusCode::BAD_TIMEOUT)],
        ),
        State::Closed => Transition::new(State::Closed, vec![ParkRequest]),
    }
}

// =============================================================================
// Event B: publishing timer elapsed
// =============================================================================

/// Dispatches a publishing timer tick.
///
/// The lifetime counter is always decremented first; if it drops below 1 the
/// subscription moves to `Closing` regardless of its state.
pub fn on_publishing_timer(state: State, c: &Conditions) -> Transition {
    use Action::*;

    if state.is_terminal() {
        return Transition::stay(state);
    }

    if c.lifetime_counter <= 1 {
        return Transition::new(
            State::Closing,
            vec![DecrementLifetimeCounter, CancelTimer, RegisterWaiting],
        );
    }

    let mut transition = dispatch_timer(state, c);
    transition.actions.insert(0, DecrementLifetimeCounter);
    transition
}

/// The per-state part of the timer table, without the lifetime step.
///
/// Used on its own to re-dispatch when a queued request disappeared between
/// the snapshot and the dequeue.
pub fn dispatch_timer(state: State, c: &Conditions) -> Transition {
    use Action::*;

    let data_ready = c.data_ready();

    match state {
        State::Normal => {
            if c.request_queued && data_ready {
                Transition::new(
                    State::Normal,
                    vec![
                        DequeueRequest,
                        ResetLifetimeCounter,
                        ResetKeepAliveCounter,
                        SendNotifications,
                    ],
                )
            } else if c.request_queued && !c.message_sent {
                Transition::new(
                    State::Normal,
                    vec![
                        DequeueRequest,
                        ResetLifetimeCounter,
                        ResetKeepAliveCounter,
                        SendKeepAlive,
                    ],
                )
            } else if !c.request_queued && (!c.message_sent || data_ready) {
                Transition::new(State::Late, vec![RegisterWaiting])
            } else {
                Transition::new(
                    State::KeepAlive,
                    vec![ResetKeepAliveCounter, DecrementKeepAliveCounter],
                )
            }
        }
        State::Late => Transition::new(State::Late, vec![RegisterWaiting]),
        State::KeepAlive => {
            if data_ready && c.request_queued {
                Transition::new(
                    State::Normal,
                    vec![
                        DequeueRequest,
                        ResetLifetimeCounter,
                        ResetKeepAliveCounter,
                        SendNotifications,
                    ],
                )
            } else if !data_ready && c.request_queued && c.keep_alive_counter <= 1 {
                Transition::new(
                    State::KeepAlive,
                    vec![
                        DequeueRequest,
                        ResetLifetimeCounter,
                        ResetKeepAliveCounter,
                        SendKeepAlive,
                    ],
                )
            } else if !data_ready && c.keep_alive_counter > 1 {
                Transition::new(State::KeepAlive, vec![DecrementKeepAliveCounter])
            } else if !c.request_queued {
                Transition::new(State::Late, vec![RegisterWaiting])
            } else {
                unreachable!("keep-alive timer table is exhaustive: {c:?}")
            }
        }
        State::Closing | State::Closed => Transition::stay(state),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use Action::*;

    fn conditions() -> Conditions {
        Conditions {
            publishing_enabled: true,
            notifications_available: false,
            more_notifications: false,
            request_queued: false,
            message_sent: false,
            keep_alive_counter: 3,
            lifetime_counter: 10,
        }
    }

    // -------------------------------------------------------------------------
    // on_publish
    // -------------------------------------------------------------------------

    #[test]
    fn test_publish_normal_without_more_parks() {
        let t = on_publish(State::Normal, &conditions());
        assert_eq!(t.next, State::Normal);
        assert_eq!(t.actions, vec![ParkRequest]);
    }

    #[test]
    fn test_publish_normal_disabled_parks_even_with_more() {
        let c = Conditions {
            publishing_enabled: false,
            more_notifications: true,
            ..conditions()
        };
        assert_eq!(on_publish(State::Normal, &c).actions, vec![ParkRequest]);
    }

    #[test]
    fn test_publish_normal_with_more_sends() {
        let c = Conditions {
            more_notifications: true,
            ..conditions()
        };
        let t = on_publish(State::Normal, &c);
        assert_eq!(t.next, State::Normal);
        assert_eq!(
            t.actions,
            vec![ResetLifetimeCounter, ResetKeepAliveCounter, SendNotifications]
        );
    }

    #[test]
    fn test_publish_late_with_data_returns_to_normal() {
        let c = Conditions {
            notifications_available: true,
            ..conditions()
        };
        let t = on_publish(State::Late, &c);
        assert_eq!(t.next, State::Normal);
        assert!(t.actions.contains(&SendNotifications));
    }

    #[test]
    fn test_publish_late_with_more_only_returns_to_normal() {
        let c = Conditions {
            more_notifications: true,
            ..conditions()
        };
        assert_eq!(on_publish(State::Late, &c).next, State::Normal);
    }

    #[test]
    fn test_publish_late_without_data_sends_keep_alive() {
        let t = on_publish(State::Late, &conditions());
        assert_eq!(t.next, State::KeepAlive);
        assert_eq!(
            t.actions,
            vec![ResetLifetimeCounter, ResetKeepAliveCounter, SendKeepAlive]
        );
    }

    #[test]
    fn test_publish_late_disabled_sends_keep_alive() {
        let c = Conditions {
            publishing_enabled: false,
            notifications_available: true,
            ..conditions()
        };
        let t = on_publish(State::Late, &c);
        assert_eq!(t.next, State::KeepAlive);
        assert!(t.actions.contains(&SendKeepAlive));
    }

    #[test]
    fn test_publish_keep_alive_parks() {
        let c = Conditions {
            notifications_available: true,
            more_notifications: true,
            ..conditions()
        };
        let t = on_publish(State::KeepAlive, &c);
        assert_eq!(t.next, State::KeepAlive);
        assert_eq!(t.actions, vec![ParkRequest]);
    }

    #[test]
    fn test_publish_closing_sends_timeout() {
        let t = on_publish(State::Closing, &conditions());
        assert_eq!(t.next, State::Closed);
        assert_eq!(t.actions, vec![SendStatusChange(StatusCode::BAD_TIMEOUT)]);
    }

    #[test]
    fn test_publish_closed_parks() {
        let t = on_publish(State::Closed, &conditions());
        assert_eq!(t.next, State::Closed);
        assert_eq!(t.actions, vec![ParkRequest]);
    }

    // -------------------------------------------------------------------------
    // on_publishing_timer: lifetime
    // -------------------------------------------------------------------------

    #[test]
    fn test_timer_lifetime_expiry_moves_to_closing() {
        for state in [State::Normal, State::Late, State::KeepAlive] {
            let c = Conditions {
                lifetime_counter: 1,
                request_queued: true,
                notifications_available: true,
                ..conditions()
            };
            let t = on_publishing_timer(state, &c);
            assert_eq!(t.next, State::Closing);
            assert_eq!(
                t.actions,
                vec![DecrementLifetimeCounter, CancelTimer, RegisterWaiting]
            );
        }
    }

    #[test]
    fn test_timer_terminal_states_are_noops() {
        for state in [State::Closing, State::Closed] {
            let t = on_publishing_timer(state, &conditions());
            assert_eq!(t.next, state);
            assert!(t.actions.is_empty());
        }
    }

    #[test]
    fn test_timer_always_decrements_lifetime_first() {
        let t = on_publishing_timer(State::Late, &conditions());
        assert_eq!(t.actions.first(), Some(&DecrementLifetimeCounter));
    }

    // -------------------------------------------------------------------------
    // on_publishing_timer: Normal
    // -------------------------------------------------------------------------

    #[test]
    fn test_timer_normal_request_and_data_sends() {
        let c = Conditions {
            request_queued: true,
            notifications_available: true,
            ..conditions()
        };
        let t = on_publishing_timer(State::Normal, &c);
        assert_eq!(t.next, State::Normal);
        assert_eq!(
            t.actions,
            vec![
                DecrementLifetimeCounter,
                DequeueRequest,
                ResetLifetimeCounter,
                ResetKeepAliveCounter,
                SendNotifications
            ]
        );
    }

    #[test]
    fn test_timer_normal_first_tick_sends_keep_alive() {
        let c = Conditions {
            request_queued: true,
            ..conditions()
        };
        let t = on_publishing_timer(State::Normal, &c);
        assert_eq!(t.next, State::Normal);
        assert!(t.actions.contains(&SendKeepAlive));
        assert!(t.actions.contains(&DequeueRequest));
    }

    #[test]
    fn test_timer_normal_disabled_with_data_first_tick_sends_keep_alive() {
        let c = Conditions {
            publishing_enabled: false,
            notifications_available: true,
            request_queued: true,
            ..conditions()
        };
        let t = on_publishing_timer(State::Normal, &c);
        assert!(t.actions.contains(&SendKeepAlive));
        assert!(!t.actions.contains(&SendNotifications));
    }

    #[test]
    fn test_timer_normal_no_request_goes_late() {
        let t = on_publishing_timer(State::Normal, &conditions());
        assert_eq!(t.next, State::Late);
        assert_eq!(t.actions, vec![DecrementLifetimeCounter, RegisterWaiting]);

        let c = Conditions {
            message_sent: true,
            notifications_available: true,
            ..conditions()
        };
        assert_eq!(on_publishing_timer(State::Normal, &c).next, State::Late);
    }

    #[test]
    fn test_timer_normal_sent_and_idle_goes_keep_alive() {
        let c = Conditions {
            message_sent: true,
            ..conditions()
        };
        let t = on_publishing_timer(State::Normal, &c);
        assert_eq!(t.next, State::KeepAlive);
        assert_eq!(
            t.actions,
            vec![
                DecrementLifetimeCounter,
                ResetKeepAliveCounter,
                DecrementKeepAliveCounter
            ]
        );

        let queued = Conditions {
            request_queued: true,
            ..c
        };
        assert_eq!(on_publishing_timer(State::Normal, &queued).next, State::KeepAlive);
    }

    // -------------------------------------------------------------------------
    // on_publishing_timer: Late / KeepAlive
    // -------------------------------------------------------------------------

    #[test]
    fn test_timer_late_reregisters() {
        let t = on_publishing_timer(State::Late, &conditions());
        assert_eq!(t.next, State::Late);
        assert_eq!(t.actions, vec![DecrementLifetimeCounter, RegisterWaiting]);
    }

    #[test]
    fn test_timer_keep_alive_data_and_request_sends() {
        let c = Conditions {
            notifications_available: true,
            request_queued: true,
            ..conditions()
        };
        let t = on_publishing_timer(State::KeepAlive, &c);
        assert_eq!(t.next, State::Normal);
        assert!(t.actions.contains(&SendNotifications));
    }

    #[test]
    fn test_timer_keep_alive_counter_expired_sends_keep_alive() {
        let c = Conditions {
            request_queued: true,
            keep_alive_counter: 1,
            ..conditions()
        };
        let t = on_publishing_timer(State::KeepAlive, &c);
        assert_eq!(t.next, State::KeepAlive);
        assert_eq!(
            t.actions,
            vec![
                DecrementLifetimeCounter,
                DequeueRequest,
                ResetLifetimeCounter,
                ResetKeepAliveCounter,
                SendKeepAlive
            ]
        );
    }

    #[test]
    fn test_timer_keep_alive_counts_down() {
        for queued in [true, false] {
            let c = Conditions {
                request_queued: queued,
                keep_alive_counter: 2,
                ..conditions()
            };
            let t = on_publishing_timer(State::KeepAlive, &c);
            assert_eq!(t.next, State::KeepAlive);
            assert_eq!(
                t.actions,
                vec![DecrementLifetimeCounter, DecrementKeepAliveCounter]
            );
        }
    }

    #[test]
    fn test_timer_keep_alive_without_request_goes_late() {
        let expired = Conditions {
            keep_alive_counter: 1,
            ..conditions()
        };
        assert_eq!(on_publishing_timer(State::KeepAlive, &expired).next, State::Late);

        let data = Conditions {
            keep_alive_counter: 3,
            notifications_available: true,
            ..conditions()
        };
        let t = on_publishing_timer(State::KeepAlive, &data);
        assert_eq!(t.next, State::Late);
        assert_eq!(t.actions, vec![DecrementLifetimeCounter, RegisterWaiting]);
    }

    #[test]
    fn test_dispatch_timer_exhaustive_for_keep_alive() {
        for enabled in [true, false] {
            for available in [true, false] {
                for queued in [true, false] {
                    for counter in [1, 2, 5] {
                        let c = Conditions {
                            publishing_enabled: enabled,
                            notifications_available: available,
                            request_queued: queued,
                            keep_alive_counter: counter,
                            ..conditions()
                        };
                        let _ = dispatch_timer(State::KeepAlive, &c);
                        let _ = dispatch_timer(State::Normal, &c);
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Counters
    // -------------------------------------------------------------------------

    #[test]
    fn test_counters_versioned() {
        let mut counters = Counters::new(3, 9);
        counters.decrement_lifetime();
        counters.decrement_keep_alive();
        assert_eq!(counters.lifetime, 8);
        assert_eq!(counters.keep_alive, 2);
        assert_eq!(counters.version, 2);

        counters.reset_keep_alive(3);
        assert_eq!(counters.keep_alive, 3);
        assert_eq!(counters.version, 3);
    }

    #[test]
    fn test_keep_alive_counter_saturates_at_one() {
        let mut counters = Counters::new(1, 9);
        counters.decrement_keep_alive();
        assert_eq!(counters.keep_alive, 1);
    }
}
