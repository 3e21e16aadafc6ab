// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server limits applied to subscriptions and monitored items.

use serde::{Deserialize, Serialize};

use uasub_core::{ConfigurationError, UaResult};

/// Hard ceiling for `maxNotificationsPerPublish`.
pub const MAX_NOTIFICATIONS_PER_PUBLISH_CEILING: u32 = 65_535;

/// Default minimum publishing interval in milliseconds.
pub const DEFAULT_MIN_PUBLISHING_INTERVAL_MS: f64 = 10.0;

/// Default maximum publishing interval in milliseconds.
pub const DEFAULT_MAX_PUBLISHING_INTERVAL_MS: f64 = 60_000.0;

/// Default publishing interval used when the client asks for an unusable one.
pub const DEFAULT_PUBLISHING_INTERVAL_MS: f64 = 1_000.0;

/// Default minimum subscription lifetime in milliseconds.
pub const DEFAULT_MIN_SUBSCRIPTION_LIFETIME_MS: f64 = 5_000.0;

/// Default maximum subscription lifetime in milliseconds (one hour).
pub const DEFAULT_MAX_SUBSCRIPTION_LIFETIME_MS: f64 = 3_600_000.0;

// =============================================================================
// SubscriptionLimits
// =============================================================================

/// Limits used when revising subscription parameters and admitting new
/// subscriptions, monitored items and publish requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionLimits {
    /// Lower bound of the revised publishing interval (ms).
    #[serde(default = "default_min_publishing_interval")]
    pub min_publishing_interval_ms: f64,

    /// Upper bound of the revised publishing interval (ms).
    #[serde(default = "default_max_publishing_interval")]
    pub max_publishing_interval_ms: f64,

    /// Interval used for NaN, negative or zero requests (ms).
    #[serde(default = "default_publishing_interval")]
    pub default_publishing_interval_ms: f64,

    /// Minimum subscription lifetime (ms).
    #[serde(default = "default_min_subscription_lifetime")]
    pub min_subscription_lifetime_ms: f64,

    /// Maximum subscription lifetime (ms).
    #[serde(default = "default_max_subscription_lifetime")]
    pub max_subscription_lifetime_ms: f64,

    /// Upper bound of `maxNotificationsPerPublish`.
    #[serde(default = "default_max_notifications_per_publish")]
    pub max_notifications_per_publish: u32,

    /// Subscriptions allowed per session.
    #[serde(default = "default_max_subscriptions_per_session")]
    pub max_subscriptions_per_session: usize,

    /// Subscriptions allowed across the server.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions: usize,

    /// Monitored items allowed per session.
    #[serde(default = "default_max_monitored_items_per_session")]
    pub max_monitored_items_per_session: usize,

    /// Monitored items allowed across the server.
    #[serde(default = "default_max_monitored_items")]
    pub max_monitored_items: usize,

    /// Publish requests a session may have parked at once.
    #[serde(default = "default_max_pending_publish_requests")]
    pub max_pending_publish_requests: usize,

    /// Pending transfer status changes kept per session.
    #[serde(default = "default_max_pending_transfer_notifications")]
    pub max_pending_transfer_notifications: usize,

    /// Largest queue a monitored item may request.
    #[serde(default = "default_max_monitored_item_queue_size")]
    pub max_monitored_item_queue_size: u32,
}

fn default_min_publishing_interval() -> f64 {
    DEFAULT_MIN_PUBLISHING_INTERVAL_MS
}

fn default_max_publishing_interval() -> f64 {
    DEFAULT_MAX_PUBLISHING_INTERVAL_MS
}

fn default_publishing_interval() -> f64 {
    DEFAULT_PUBLISHING_INTERVAL_MS
}

fn default_min_subscription_lifetime() -> f64 {
    DEFAULT_MIN_SUBSCRIPTION_LIFETIME_MS
}

fn default_max_subscription_lifetime() -> f64 {
    DEFAULT_MAX_SUBSCRIPTION_LIFETIME_MS
}

fn default_max_notifications_per_publish() -> u32 {
    MAX_NOTIFICATIONS_PER_PUBLISH_CEILING
}

fn default_max_subscriptions_per_session() -> usize {
    100
}

fn default_max_subscriptions() -> usize {
    1_000
}

fn default_max_monitored_items_per_session() -> usize {
    10_000
}

fn default_max_monitored_items() -> usize {
    100_000
}

fn default_max_pending_publish_requests() -> usize {
    100
}

fn default_max_pending_transfer_notifications() -> usize {
    32
}

fn default_max_monitored_item_queue_size() -> u32 {
    1_000
}

impl Default for SubscriptionLimits {
    fn default() -> Self {
        Self {
            min_publishing_interval_ms: default_min_publishing_interval(),
            max_publishing_interval_ms: default_max_publishing_interval(),
            default_publishing_interval_ms: default_publishing_interval(),
            min_subscription_lifetime_ms: default_min_subscription_lifetime(),
            max_subscription_lifetime_ms: default_max_subscription_lifetime(),
            max_notifications_per_publish: default_max_notifications_per_publish(),
            max_subscriptions_per_session: default_max_subscriptions_per_session(),
            max_subscriptions: default_max_subscriptions(),
            max_monitored_items_per_session: default_max_monitored_items_per_session(),
            max_monitored_items: default_max_monitored_items(),
            max_pending_publish_requests: default_max_pending_publish_requests(),
            max_pending_transfer_notifications: default_max_pending_transfer_notifications(),
            max_monitored_item_queue_size: default_max_monitored_item_queue_size(),
        }
    }
}

impl SubscriptionLimits {
    /// Validates the limits.
    pub fn validate(&self) -> UaResult<()> {
        let intervals = [
            ("min_publishing_interval_ms", self.min_publishing_interval_ms),
            ("max_publishing_interval_ms", self.max_publishing_interval_ms),
            ("default_publishing_interval_ms", self.default_publishing_interval_ms),
            ("max_subscription_lifetime_ms", self.max_subscription_lifetime_ms),
        ];
        for (field, value) in intervals {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(field, format!("must be a positive finite number, got {value}")));
            }
        }

        if !self.min_subscription_lifetime_ms.is_finite() || self.min_subscription_lifetime_ms < 0.0 {
            return Err(invalid(
                "min_subscription_lifetime_ms",
                "must be a non-negative finite number",
            ));
        }

        if self.min_publishing_interval_ms > self.max_publishing_interval_ms {
            return Err(invalid(
                "min_publishing_interval_ms",
                "must not exceed max_publishing_interval_ms",
            ));
        }

        if self.default_publishing_interval_ms < self.min_publishing_interval_ms
            || self.default_publishing_interval_ms > self.max_publishing_interval_ms
        {
            return Err(invalid(
                "default_publishing_interval_ms",
                "must lie within [min_publishing_interval_ms, max_publishing_interval_ms]",
            ));
        }

        if self.min_subscription_lifetime_ms > self.max_subscription_lifetime_ms {
            return Err(invalid(
                "min_subscription_lifetime_ms",
                "must not exceed max_subscription_lifetime_ms",
            ));
        }

        if self.max_publishing_interval_ms > self.max_subscription_lifetime_ms {
            return Err(invalid(
                "max_publishing_interval_ms",
                "must not exceed max_subscription_lifetime_ms",
            ));
        }

        if self.max_notifications_per_publish == 0
            || self.max_notifications_per_publish > MAX_NOTIFICATIONS_PER_PUBLISH_CEILING
        {
            return Err(invalid(
                "max_notifications_per_publish",
                format!("must be between 1 and {MAX_NOTIFICATIONS_PER_PUBLISH_CEILING}"),
            ));
        }

        let counts = [
            ("max_subscriptions_per_session", self.max_subscriptions_per_session),
            ("max_subscriptions", self.max_subscriptions),
            ("max_monitored_items_per_session", self.max_monitored_items_per_session),
            ("max_monitored_items", self.max_monitored_items),
            ("max_pending_publish_requests", self.max_pending_publish_requests),
            ("max_pending_transfer_notifications", self.max_pending_transfer_notifications),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        if self.max_subscriptions_per_session > self.max_subscriptions {
            return Err(invalid(
                "max_subscriptions_per_session",
                "must not exceed max_subscriptions",
            ));
        }

        if self.max_monitored_items_per_session > self.max_monitored_items {
            return Err(invalid(
                "max_monitored_items_per_session",
                "must not exceed max_monitored_items",
            ));
        }

        if self.max_monitored_item_queue_size == 0 {
            return Err(invalid("max_monitored_item_queue_size", "must be greater than 0"));
        }

        Ok(())
    }

    /// Revises a requested monitored item queue size.
    pub fn revise_queue_size(&self, requested: u32) -> u32 {
        requested.clamp(1, self.max_monitored_item_queue_size)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> uasub_core::UaError {
    ConfigurationError::invalid_limit(field, reason).into()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SubscriptionLimits::default().validate().is_ok());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let limits = SubscriptionLimits {
            min_publishing_interval_ms: 5_000.0,
            max_publishing_interval_ms: 1_000.0,
            default_publishing_interval_ms: 1_000.0,
            ..Default::default()
        };
        let err = limits.validate().unwrap_err();
        assert!(err.to_string().contains("min_publishing_interval_ms"));
    }

    #[test]
    fn test_notification_ceiling_enforced() {
        let limits = SubscriptionLimits {
            max_notifications_per_publish: 70_000,
            ..Default::default()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_session_cap_above_server_cap_rejected() {
        let limits = SubscriptionLimits {
            max_subscriptions_per_session: 10,
            max_subscriptions: 5,
            ..Default::default()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_revise_queue_size() {
        let limits = SubscriptionLimits::default();
        assert_eq!(limits.revise_queue_size(0), 1);
        assert_eq!(limits.revise_queue_size(10), 10);
        assert_eq!(limits.revise_queue_size(50_000), 1_000);
    }
}
