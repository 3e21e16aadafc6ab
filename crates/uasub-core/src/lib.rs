// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uasub-core
//!
//! Shared vocabulary of the uasub publishing engine.
//!
//! ## Modules
//!
//! - [`status`]: OPC UA status codes produced by the subscription service set
//! - [`types`]: Session, subscription and monitored item ids; values
//! - [`messages`]: Notification messages and service request/response records
//! - [`error`]: Error hierarchy mapped onto status codes
//!
//! ## Example
//!
//! ```
//! use uasub_core::{NotificationMessage, StatusCode};
//!
//! let msg = NotificationMessage::status_change(4, StatusCode::BAD_TIMEOUT);
//! assert_eq!(msg.status_change_status(), Some(StatusCode::BAD_TIMEOUT));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod error;
pub mod messages;
pub mod status;
pub mod types;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{
    ConfigurationError, ErrorCode, ErrorSeverity, MonitoredItemError, SessionError,
    SubscriptionError, UaError, UaResult,
};
pub use messages::{
    CreateSubscriptionRequest, CreateSubscriptionResponse, DataChangeNotification,
    EventFieldList, EventNotificationList, ExtensionObject, ModifySubscriptionRequest,
    ModifySubscriptionResponse, MonitoredItemCreateRequest, MonitoredItemCreateResult,
    MonitoredItemNotification, Notification, NotificationData, NotificationMessage,
    PublishRequest, PublishResponse, PublishResult, RequestHeader, ResponseHeader,
    ServiceFault, SetTriggeringRequest, SetTriggeringResponse, StatusChangeNotification,
    SubscriptionAcknowledgement, TransferResult,
};
pub use status::StatusCode;
pub use types::{DataValue, MonitoredItemId, MonitoringMode, SessionId, SubscriptionId, Variant};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
