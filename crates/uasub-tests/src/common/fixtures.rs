// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Pre-built limits, requests and configuration documents.

use uasub_core::{CreateSubscriptionRequest, MonitoredItemCreateRequest};
use uasub_server::SubscriptionLimits;

// =============================================================================
// Limits
// =============================================================================

/// Limit sets used across the integration suites.
pub struct LimitsFixtures;

impl LimitsFixtures {
    /// Server defaults.
    pub fn standard() -> SubscriptionLimits {
        SubscriptionLimits::default()
    }

    /// Defaults with a 100 ms minimum lifetime, so expiry is reachable in a
    /// handful of 100 ms cycles.
    pub fn fast() -> SubscriptionLimits {
        SubscriptionLimits {
            min_subscription_lifetime_ms: 100.0,
            ..SubscriptionLimits::default()
        }
    }

    /// [`LimitsFixtures::fast`] with deeper monitored item queues.
    pub fn deep_queues(max_queue_size: u32) -> SubscriptionLimits {
        SubscriptionLimits {
            max_monitored_item_queue_size: max_queue_size,
            ..Self::fast()
        }
    }

    /// [`LimitsFixtures::fast`] with a per-session monitored item cap.
    pub fn item_cap(max_per_session: usize) -> SubscriptionLimits {
        SubscriptionLimits {
            max_monitored_items_per_session: max_per_session,
            ..Self::fast()
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Request builders.
pub struct RequestFixtures;

impl RequestFixtures {
    /// A subscription request with the given interval and counts.
    pub fn subscription(interval_ms: f64, lifetime: u32, keep_alive: u32) -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            requested_publishing_interval: interval_ms,
            requested_lifetime_count: lifetime,
            requested_max_keep_alive_count: keep_alive,
            ..CreateSubscriptionRequest::default()
        }
    }

    /// 100 ms interval, lifetime 30, keep-alive 10.
    pub fn fast_subscription() -> CreateSubscriptionRequest {
        Self::subscription(100.0, 30, 10)
    }

    /// [`RequestFixtures::fast_subscription`] with a notification cap.
    pub fn bounded(max_notifications_per_publish: u32) -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            max_notifications_per_publish,
            ..Self::fast_subscription()
        }
    }

    /// `count` reporting items with client handles starting at 1.
    pub fn items(count: usize, queue_size: u32) -> Vec<MonitoredItemCreateRequest> {
        (1..=count as u32)
            .map(|handle| MonitoredItemCreateRequest::reporting(handle).with_queue_size(queue_size))
            .collect()
    }
}

// =============================================================================
// Configuration documents
// =============================================================================

/// Configuration file contents.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// A YAML document with fast limits.
    pub fn yaml() -> &'static str {
        r#"
server:
  name: integration
limits:
  min_subscription_lifetime_ms: 100
  max_subscriptions_per_session: 4
  max_monitored_items_per_session: 8
  max_pending_publish_requests: 5
logging:
  level: debug
  format: compact
simulation:
  subscriptions: 2
  items_per_subscription: 3
  duration: 2s
"#
    }

    /// The same limits in TOML.
    pub fn toml() -> &'static str {
        r#"
[server]
name = "integration"

[limits]
min_subscription_lifetime_ms = 100.0
max_subscriptions_per_session = 4
max_monitored_items_per_session = 8
max_pending_publish_requests = 5

[logging]
level = "debug"
format = "compact"
"#
    }

    /// A YAML document whose limits do not validate.
    pub fn invalid_limits_yaml() -> &'static str {
        r#"
limits:
  min_publishing_interval_ms: 500
  max_publishing_interval_ms: 100
"#
    }
}
