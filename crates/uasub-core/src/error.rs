// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the subscription service set.
//!
//! Every error maps onto the OPC UA [`StatusCode`] that goes on the wire, so
//! the service layer never has to guess how to report a failure.
//!
//! # Error Categories
//!
//! ```text
//! UaError
//! ├── Subscription  - Unknown ids, limits, lifetime, republish misses
//! ├── MonitoredItem - Unknown item ids, item limits
//! ├── Session       - Closed sessions, publish backpressure, empty batches
//! └── Configuration - Invalid engine limits
//! ```
//!
//! # Examples
//!
//! ```
//! use uasub_core::error::{UaError, SubscriptionError};
//! use uasub_core::{StatusCode, SubscriptionId};
//!
//! let error = UaError::from(SubscriptionError::id_invalid(SubscriptionId::new(4)));
//! assert_eq!(error.status_code(), StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
//! assert_eq!(error.error_code().to_string(), "UA-0101");
//! ```

use std::fmt;

use thiserror::Error;
use tracing::Level;

use crate::status::StatusCode;
use crate::types::{MonitoredItemId, SessionId, SubscriptionId};

// =============================================================================
// UaError - Main Error Type
// =============================================================================

/// The main error type for subscription service operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UaError {
    /// Subscription errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Monitored item errors.
    #[error("{0}")]
    MonitoredItem(#[from] MonitoredItemError),

    /// Session-level errors.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),
}

impl UaError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates an unknown-subscription error.
    pub fn subscription_id_invalid(id: SubscriptionId) -> Self {
        Self::Subscription(SubscriptionError::id_invalid(id))
    }

    /// Creates an unknown-monitored-item error.
    pub fn monitored_item_id_invalid(subscription_id: SubscriptionId, item_id: MonitoredItemId) -> Self {
        Self::MonitoredItem(MonitoredItemError::id_invalid(subscription_id, item_id))
    }

    /// Creates an empty-batch error.
    pub fn nothing_to_do() -> Self {
        Self::Session(SessionError::NothingToDo)
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Returns the OPC UA status code reported to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Subscription(e) => e.status_code(),
            Self::MonitoredItem(e) => e.status_code(),
            Self::Session(e) => e.status_code(),
            Self::Configuration(_) => StatusCode::BAD_INTERNAL_ERROR,
        }
    }

    /// Returns `true` if the client can reasonably retry the same call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Subscription(e) => e.is_retryable(),
            Self::MonitoredItem(e) => e.is_retryable(),
            Self::Session(e) => e.is_retryable(),
            Self::Configuration(_) => false,
        }
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Subscription(e) => e.severity(),
            Self::MonitoredItem(e) => e.severity(),
            Self::Session(e) => e.severity(),
            Self::Configuration(_) => ErrorSeverity::Critical,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Subscription(_) => "subscription",
            Self::MonitoredItem(_) => "monitored_item",
            Self::Session(_) => "session",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Returns a unique error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Subscription(e) => e.error_code(),
            Self::MonitoredItem(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::Configuration(e) => e.error_code(),
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error at its severity level.
    pub fn log(&self, context: &str) {
        let code = self.error_code();
        let status = self.status_code();

        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                error_code = %code,
                status = %status,
                category = self.category(),
                context = context,
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                status = %status,
                category = self.category(),
                context = context,
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                status = %status,
                category = self.category(),
                context = context,
                "{self}"
            ),
        }
    }
}

impl From<&UaError> for StatusCode {
    fn from(error: &UaError) -> Self {
        error.status_code()
    }
}

impl From<UaError> for StatusCode {
    fn from(error: UaError) -> Self {
        error.status_code()
    }
}

/// Result alias for subscription service operations.
pub type UaResult<T> = Result<T, UaError>;

// =============================================================================
// SubscriptionError
// =============================================================================

/// Errors concerning a subscription.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubscriptionError {
    /// The id does not name a subscription of this session.
    #[error("Subscription id is not valid: {subscription_id}")]
    IdInvalid {
        /// The requested id.
        subscription_id: SubscriptionId,
    },

    /// A subscription limit was reached.
    #[error("Too many subscriptions in {scope}: {count} (max: {max})")]
    TooManySubscriptions {
        /// `"session"` or `"server"`.
        scope: &'static str,
        /// Current count.
        count: usize,
        /// Configured limit.
        max: usize,
    },

    /// The subscription is closing or closed.
    #[error("Subscription {subscription_id} is in state {state} and cannot accept the operation")]
    InvalidState {
        /// Subscription id.
        subscription_id: SubscriptionId,
        /// Current state name.
        state: &'static str,
    },

    /// The requested message is not in the republish cache.
    #[error("Message {sequence_number} is not available for {subscription_id}")]
    MessageNotAvailable {
        /// Subscription id.
        subscription_id: SubscriptionId,
        /// Requested sequence number.
        sequence_number: u32,
    },

    /// An acknowledgement referenced an unknown sequence number.
    #[error("Sequence number {sequence_number} is unknown to {subscription_id}")]
    SequenceNumberUnknown {
        /// Subscription id.
        subscription_id: SubscriptionId,
        /// Acknowledged sequence number.
        sequence_number: u32,
    },

    /// The session has no subscriptions to publish for.
    #[error("Session has no subscriptions")]
    NoSubscription,

    /// The subscription lifetime elapsed without client activity.
    #[error("Subscription {subscription_id} lifetime expired")]
    LifetimeExpired {
        /// Subscription id.
        subscription_id: SubscriptionId,
    },
}

impl SubscriptionError {
    /// Creates an unknown-subscription error.
    pub fn id_invalid(subscription_id: SubscriptionId) -> Self {
        Self::IdInvalid { subscription_id }
    }

    /// Creates a per-session limit error.
    pub fn too_many_in_session(count: usize, max: usize) -> Self {
        Self::TooManySubscriptions {
            scope: "session",
            count,
            max,
        }
    }

    /// Creates a server-wide limit error.
    pub fn too_many_in_server(count: usize, max: usize) -> Self {
        Self::TooManySubscriptions {
            scope: "server",
            count,
            max,
        }
    }

    /// Creates an invalid-state error.
    pub fn invalid_state(subscription_id: SubscriptionId, state: &'static str) -> Self {
        Self::InvalidState {
            subscription_id,
            state,
        }
    }

    /// Creates a republish-miss error.
    pub fn message_not_available(subscription_id: SubscriptionId, sequence_number: u32) -> Self {
        Self::MessageNotAvailable {
            subscription_id,
            sequence_number,
        }
    }

    /// Creates an unknown-sequence-number error.
    pub fn sequence_number_unknown(subscription_id: SubscriptionId, sequence_number: u32) -> Self {
        Self::SequenceNumberUnknown {
            subscription_id,
            sequence_number,
        }
    }

    /// Returns the OPC UA status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::IdInvalid { .. } => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
            Self::TooManySubscriptions { .. } => StatusCode::BAD_TOO_MANY_SUBSCRIPTIONS,
            Self::InvalidState { .. } => StatusCode::BAD_INVALID_STATE,
            Self::MessageNotAvailable { .. } => StatusCode::BAD_MESSAGE_NOT_AVAILABLE,
            Self::SequenceNumberUnknown { .. } => StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN,
            Self::NoSubscription => StatusCode::BAD_NO_SUBSCRIPTION,
            Self::LifetimeExpired { .. } => StatusCode::BAD_TIMEOUT,
        }
    }

    /// Returns `true` if retrying may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TooManySubscriptions { .. })
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::IdInvalid { .. } | Self::SequenceNumberUnknown { .. } => ErrorSeverity::Info,
            Self::MessageNotAvailable { .. } | Self::NoSubscription => ErrorSeverity::Info,
            Self::InvalidState { .. } | Self::LifetimeExpired { .. } => ErrorSeverity::Warning,
            Self::TooManySubscriptions { .. } => ErrorSeverity::Warning,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::IdInvalid { .. } => ErrorCode::new(1, 1),
            Self::TooManySubscriptions { .. } => ErrorCode::new(1, 2),
            Self::InvalidState { .. } => ErrorCode::new(1, 3),
            Self::MessageNotAvailable { .. } => ErrorCode::new(1, 4),
            Self::SequenceNumberUnknown { .. } => ErrorCode::new(1, 5),
            Self::NoSubscription => ErrorCode::new(1, 6),
            Self::LifetimeExpired { .. } => ErrorCode::new(1, 7),
        }
    }
}

// =============================================================================
// MonitoredItemError
// =============================================================================

/// Errors concerning monitored items.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MonitoredItemError {
    /// The id does not name an item of the subscription.
    #[error("Monitored item {item_id} not found in {subscription_id}")]
    IdInvalid {
        /// Owning subscription.
        subscription_id: SubscriptionId,
        /// Requested item id.
        item_id: MonitoredItemId,
    },

    /// A monitored item limit was reached.
    #[error("Too many monitored items in {scope}: {count} (max: {max})")]
    TooManyMonitoredItems {
        /// `"session"` or `"server"`.
        scope: &'static str,
        /// Count after the requested creation.
        count: usize,
        /// Configured limit.
        max: usize,
    },
}

impl MonitoredItemError {
    /// Creates an unknown-item error.
    pub fn id_invalid(subscription_id: SubscriptionId, item_id: MonitoredItemId) -> Self {
        Self::IdInvalid {
            subscription_id,
            item_id,
        }
    }

    /// Creates a limit error.
    pub fn too_many(scope: &'static str, count: usize, max: usize) -> Self {
        Self::TooManyMonitoredItems { scope, count, max }
    }

    /// Returns the OPC UA status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::IdInvalid { .. } => StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
            Self::TooManyMonitoredItems { .. } => StatusCode::BAD_TOO_MANY_MONITORED_ITEMS,
        }
    }

    /// Returns `true` if retrying may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TooManyMonitoredItems { .. })
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::IdInvalid { .. } => ErrorSeverity::Info,
            Self::TooManyMonitoredItems { .. } => ErrorSeverity::Warning,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::IdInvalid { .. } => ErrorCode::new(2, 1),
            Self::TooManyMonitoredItems { .. } => ErrorCode::new(2, 2),
        }
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Session-level errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// The session has been closed.
    #[error("Session {session_id} is closed")]
    Closed {
        /// Session id.
        session_id: SessionId,
    },

    /// The publish request queue overflowed.
    #[error("Too many publish requests queued (max: {max})")]
    TooManyPublishRequests {
        /// Configured limit.
        max: usize,
    },

    /// The request contained no operations.
    #[error("Nothing to do")]
    NothingToDo,
}

impl SessionError {
    /// Creates a session-closed error.
    pub fn closed(session_id: SessionId) -> Self {
        Self::Closed { session_id }
    }

    /// Returns the OPC UA status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Closed { .. } => StatusCode::BAD_SESSION_CLOSED,
            Self::TooManyPublishRequests { .. } => StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS,
            Self::NothingToDo => StatusCode::BAD_NOTHING_TO_DO,
        }
    }

    /// Returns `true` if retrying may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TooManyPublishRequests { .. })
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Closed { .. } => ErrorSeverity::Info,
            Self::TooManyPublishRequests { .. } => ErrorSeverity::Warning,
            Self::NothingToDo => ErrorSeverity::Info,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Closed { .. } => ErrorCode::new(3, 1),
            Self::TooManyPublishRequests { .. } => ErrorCode::new(3, 2),
            Self::NothingToDo => ErrorCode::new(3, 3),
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Invalid engine limits.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// A limit has an unusable value.
    #[error("Invalid limit '{field}': {reason}")]
    InvalidLimit {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigurationError {
    /// Creates an invalid-limit error.
    pub fn invalid_limit(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidLimit {
            field,
            reason: reason.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidLimit { .. } => ErrorCode::new(4, 1),
        }
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Expected protocol outcome, no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::DEBUG,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code for categorization.
///
/// Format: `UA-XXYY` where XX is category and YY is specific error.
///
/// Categories:
/// - 1: Subscription
/// - 2: MonitoredItem
/// - 3: Session
/// - 4: Configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category.
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }

    /// Returns the full error code as a u16.
    pub fn as_u16(&self) -> u16 {
        ((self.category as u16) << 8) | (self.code as u16)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Tests
// =============================================================================
