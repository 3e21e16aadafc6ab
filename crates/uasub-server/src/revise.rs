// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server-side revision of requested subscription parameters.
//!
//! Runs on CreateSubscription and ModifySubscription. Requests are never
//! rejected for their timing values; they are revised into range:
//!
//! 1. publishing interval: unusable values take the default, then clamp
//! 2. keep-alive count: 0 becomes 3, then shrink so that the keep-alive
//!    period fits the max lifetime and the max publishing interval
//! 3. lifetime count: shrink to the max lifetime, raise to 3x keep-alive,
//!    raise again to the min lifetime
//! 4. max notifications: 0 or above the ceiling becomes the ceiling

use serde::{Deserialize, Serialize};

use crate::limits::{MAX_NOTIFICATIONS_PER_PUBLISH_CEILING, SubscriptionLimits};

/// Keep-alive count used when the client asks for 0.
pub const DEFAULT_MAX_KEEP_ALIVE_COUNT: u32 = 3;

/// Requested timing parameters of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RequestedParameters {
    /// Publishing interval (ms).
    pub publishing_interval: f64,
    /// Lifetime count.
    pub lifetime_count: u32,
    /// Keep-alive count.
    pub max_keep_alive_count: u32,
    /// Max notifications per publish.
    pub max_notifications_per_publish: u32,
}

/// Parameters after revision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RevisedParameters {
    /// Publishing interval (ms), always within the configured bounds.
    pub publishing_interval: f64,
    /// Lifetime count, always at least three times the keep-alive count.
    pub lifetime_count: u32,
    /// Keep-alive count, always at least 1.
    pub max_keep_alive_count: u32,
    /// Max notifications per publish, always within `1..=ceiling`.
    pub max_notifications_per_publish: u32,
}

/// Revises requested parameters against the server limits.
pub fn revise(limits: &SubscriptionLimits, requested: RequestedParameters) -> RevisedParameters {
    let publishing_interval = revise_publishing_interval(limits, requested.publishing_interval);
    let max_keep_alive_count =
        revise_max_keep_alive_count(limits, publishing_interval, requested.max_keep_alive_count);
    let lifetime_count = revise_lifetime_count(
        limits,
        publishing_interval,
        max_keep_alive_count,
        requested.lifetime_count,
    );
    let max_notifications_per_publish =
        revise_max_notifications(limits, requested.max_notifications_per_publish);

    RevisedParameters {
        publishing_interval,
        lifetime_count,
        max_keep_alive_count,
        max_notifications_per_publish,
    }
}

fn revise_publishing_interval(limits: &SubscriptionLimits, requested: f64) -> f64 {
    let interval = if requested.is_nan() || requested <= 0.0 {
        limits.default_publishing_interval_ms
    } else {
        requested
    };
    interval.clamp(limits.min_publishing_interval_ms, limits.max_publishing_interval_ms)
}

fn revise_max_keep_alive_count(limits: &SubscriptionLimits, interval: f64, requested: u32) -> u32 {
    let mut count = if requested == 0 {
        DEFAULT_MAX_KEEP_ALIVE_COUNT
    } else {
        requested
    };

    if count as f64 * interval > limits.max_subscription_lifetime_ms {
        count = count_within(limits.max_subscription_lifetime_ms, interval);
    }
    if count as f64 * interval > limits.max_publishing_interval_ms {
        count = count_within(limits.max_publishing_interval_ms, interval);
    }

    count.max(1)
}

fn revise_lifetime_count(
    limits: &SubscriptionLimits,
    interval: f64,
    keep_alive_count: u32,
    requested: u32,
) -> u32 {
    let mut count = requested;

    if count as f64 * interval > limits.max_subscription_lifetime_ms {
        count = count_within(limits.max_subscription_lifetime_ms, interval);
    }

    let lifetime_interval = if keep_alive_count < u32::MAX / 3 {
        count = count.max(keep_alive_count * 3);
        count as f64 * interval
    } else {
        count = u32::MAX;
        f64::MAX
    };

    let min_lifetime = limits.min_subscription_lifetime_ms;
    if min_lifetime > interval && min_lifetime > lifetime_interval {
        count = count_within(min_lifetime, interval);
    }

    count
}

fn revise_max_notifications(limits: &SubscriptionLimits, requested: u32) -> u32 {
    let ceiling = limits
        .max_notifications_per_publish
        .min(MAX_NOTIFICATIONS_PER_PUBLISH_CEILING);
    if requested == 0 || requested > ceiling {
        ceiling
    } else {
        requested
    }
}

/// Number of whole intervals in `span`, rounded up on remainder.
fn count_within(span: f64, interval: f64) -> u32 {
    let whole = (span / interval).floor();
    let mut count = whole as u32;
    if count < u32::MAX && span % interval != 0.0 {
        count += 1;
    }
    count
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn request(interval: f64, lifetime: u32, keep_alive: u32) -> RequestedParameters {
        RequestedParameters {
            publishing_interval: interval,
            lifetime_count: lifetime,
            max_keep_alive_count: keep_alive,
            max_notifications_per_publish: 0,
        }
    }

    #[test]
    fn test_zero_counts_take_minimum_defaults() {
        let revised = revise(&SubscriptionLimits::default(), request(1000.0, 0, 0));
        assert_eq!(revised.publishing_interval, 1000.0);
        assert_eq!(revised.max_keep_alive_count, 3);
        assert_eq!(revised.lifetime_count, 9);
    }

    #[test]
    fn test_unusable_interval_uses_default() {
        let limits = SubscriptionLimits::default();
        for bad in [f64::NAN, -5.0, 0.0, f64::NEG_INFINITY] {
            let revised = revise(&limits, request(bad, 30, 10));
            assert_eq!(revised.publishing_interval, limits.default_publishing_interval_ms);
        }
        let revised = revise(&limits, request(f64::INFINITY, 30, 10));
        assert_eq!(revised.publishing_interval, limits.max_publishing_interval_ms);
    }

    #[test]
    fn test_interval_clamped() {
        let limits = SubscriptionLimits::default();
        assert_eq!(revise(&limits, request(1.0, 30, 10)).publishing_interval, 10.0);
        assert_eq!(
            revise(&limits, request(1e9, 30, 10)).publishing_interval,
            limits.max_publishing_interval_ms
        );
    }

    #[test]
    fn test_keep_alive_shrunk_to_max_publishing_interval() {
        let limits = SubscriptionLimits::default();
        // 1000 keep-alives at 1s would exceed the 60s max publishing interval.
        let revised = revise(&limits, request(1000.0, 5000, 1000));
        assert_eq!(revised.max_keep_alive_count, 60);
    }

    #[test]
    fn test_keep_alive_rounds_up_on_remainder() {
        let limits = SubscriptionLimits::default();
        let revised = revise(&limits, request(7000.0, 100, 100));
        // 60000 / 7000 = 8.57 -> 9
        assert_eq!(revised.max_keep_alive_count, 9);
    }

    #[test]
    fn test_lifetime_shrunk_to_max_lifetime() {
        let limits = SubscriptionLimits {
            max_subscription_lifetime_ms: 100_000.0,
            ..Default::default()
        };
        let revised = revise(&limits, request(1000.0, 10_000, 10));
        assert_eq!(revised.lifetime_count, 100);
    }

    #[test]
    fn test_lifetime_raised_to_three_keep_alives() {
        let revised = revise(&SubscriptionLimits::default(), request(1000.0, 5, 10));
        assert_eq!(revised.lifetime_count, 30);
    }

    #[test]
    fn test_lifetime_raised_to_min_lifetime() {
        let limits = SubscriptionLimits {
            min_subscription_lifetime_ms: 20_000.0,
            ..Default::default()
        };
        let revised = revise(&limits, request(100.0, 3, 1));
        assert_eq!(revised.lifetime_count, 200);
    }

    #[test]
    fn test_max_notifications_ceiling() {
        let limits = SubscriptionLimits::default();
        let mut req = request(1000.0, 30, 10);
        req.max_notifications_per_publish = 0;
        assert_eq!(revise(&limits, req).max_notifications_per_publish, 65_535);
        req.max_notifications_per_publish = 100_000;
        assert_eq!(revise(&limits, req).max_notifications_per_publish, 65_535);
        req.max_notifications_per_publish = 2_000;
        assert_eq!(revise(&limits, req).max_notifications_per_publish, 2_000);
    }

    proptest! {
        #[test]
        fn prop_revised_values_respect_invariants(
            interval in prop_oneof![
                Just(f64::NAN),
                Just(0.0),
                -1e6f64..1e9f64,
            ],
            lifetime in any::<u32>(),
            keep_alive in any::<u32>(),
            max_notifications in any::<u32>(),
        ) {
            let limits = SubscriptionLimits::default();
            let revised = revise(&limits, RequestedParameters {
                publishing_interval: interval,
                lifetime_count: lifetime,
                max_keep_alive_count: keep_alive,
                max_notifications_per_publish: max_notifications,
            });

            prop_assert!(revised.publishing_interval >= limits.min_publishing_interval_ms);
            prop_assert!(revised.publishing_interval <= limits.max_publishing_interval_ms);
            prop_assert!(revised.max_keep_alive_count >= 1);
            prop_assert!(revised.lifetime_count as u64 >= 3 * revised.max_keep_alive_count as u64);
            prop_assert!(revised.max_notifications_per_publish >= 1);
            prop_assert!(revised.max_notifications_per_publish <= MAX_NOTIFICATIONS_PER_PUBLISH_CEILING);
        }

        #[test]
        fn prop_revision_is_idempotent(
            interval in 1.0f64..100_000.0,
            lifetime in 0u32..100_000,
            keep_alive in 0u32..10_000,
        ) {
            let limits = SubscriptionLimits::default();
            let first = revise(&limits, request(interval, lifetime, keep_alive));
            let second = revise(&limits, request(
                first.publishing_interval,
                first.lifetime_count,
                first.max_keep_alive_count,
            ));
            prop_assert_eq!(first.publishing_interval, second.publishing_interval);
            prop_assert_eq!(first.max_keep_alive_count, second.max_keep_alive_count);
            prop_assert_eq!(first.lifetime_count, second.lifetime_count);
        }
    }
}
