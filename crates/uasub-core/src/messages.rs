// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription service set messages.
//!
//! Field names follow the OPC UA Part 4 service definitions so that a codec
//! layer can map them one to one.
//!
//! # Notification payloads
//!
//! ```text
//! NotificationMessage
//! ├── sequence_number
//! ├── publish_time
//! └── notification_data: [ExtensionObject]
//!         ├── DataChangeNotification    (type id 811)
//!         ├── EventNotificationList     (type id 916)
//!         └── StatusChangeNotification  (type id 820)
//! ```
//!
//! A message with no notification data is a keep-alive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::StatusCode;
use crate::types::{DataValue, MonitoredItemId, MonitoringMode, SubscriptionId, Variant};

// =============================================================================
// Headers
// =============================================================================

/// Common request header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Client-assigned handle echoed in the response.
    pub request_handle: u32,
    /// When the client sent the request.
    pub timestamp: DateTime<Utc>,
    /// Client hint for how long it will wait, in milliseconds. Zero means no hint.
    pub timeout_hint: u32,
}

impl RequestHeader {
    /// Creates a header stamped with the current time.
    pub fn new(request_handle: u32) -> Self {
        Self {
            request_handle,
            timestamp: Utc::now(),
            timeout_hint: 0,
        }
    }
}

/// Common response header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Handle copied from the request.
    pub request_handle: u32,
    /// When the server produced the response.
    pub timestamp: DateTime<Utc>,
    /// Overall result of the service call.
    pub service_result: StatusCode,
}

impl ResponseHeader {
    /// Creates a successful response header for a request.
    pub fn good(request: &RequestHeader) -> Self {
        Self::with_result(request, StatusCode::GOOD)
    }

    /// Creates a response header with the given service result.
    pub fn with_result(request: &RequestHeader, service_result: StatusCode) -> Self {
        Self {
            request_handle: request.request_handle,
            timestamp: Utc::now(),
            service_result,
        }
    }
}

/// Response sent in place of the normal response when a service fails as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceFault {
    /// Header whose `service_result` carries the failure.
    pub response_header: ResponseHeader,
}

impl ServiceFault {
    /// Creates a fault answering `request` with `status`.
    pub fn new(request: &RequestHeader, status: StatusCode) -> Self {
        Self {
            response_header: ResponseHeader::with_result(request, status),
        }
    }

    /// Returns the service result.
    pub fn status(&self) -> StatusCode {
        self.response_header.service_result
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// A data change for one monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemNotification {
    /// Client handle of the monitored item.
    pub client_handle: u32,
    /// The reported value.
    pub value: DataValue,
}

/// The selected fields of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFieldList {
    /// Client handle of the monitored item.
    pub client_handle: u32,
    /// Event field values in select-clause order.
    pub event_fields: Vec<Variant>,
}

/// A single queued notification drained from a monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    /// Data change notification.
    DataChange(MonitoredItemNotification),
    /// Event notification.
    Event(EventFieldList),
}

/// Batch of data changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataChangeNotification {
    /// Reported items.
    pub monitored_items: Vec<MonitoredItemNotification>,
}

/// Batch of events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventNotificationList {
    /// Reported events.
    pub events: Vec<EventFieldList>,
}

/// Change of the subscription's own status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeNotification {
    /// New status of the subscription.
    pub status: StatusCode,
}

/// Notification payload carried by a [`NotificationMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotificationData {
    /// Data changes.
    DataChange(DataChangeNotification),
    /// Events.
    Event(EventNotificationList),
    /// Subscription status change.
    StatusChange(StatusChangeNotification),
}

impl NotificationData {
    /// Binary encoding node id of the payload type (namespace 0).
    pub fn binary_encoding_id(&self) -> u32 {
        match self {
            Self::DataChange(_) => DATA_CHANGE_NOTIFICATION_ENCODING_ID,
            Self::Event(_) => EVENT_NOTIFICATION_LIST_ENCODING_ID,
            Self::StatusChange(_) => STATUS_CHANGE_NOTIFICATION_ENCODING_ID,
        }
    }
}

/// `DataChangeNotification_Encoding_DefaultBinary`.
pub const DATA_CHANGE_NOTIFICATION_ENCODING_ID: u32 = 811;
/// `EventNotificationList_Encoding_DefaultBinary`.
pub const EVENT_NOTIFICATION_LIST_ENCODING_ID: u32 = 916;
/// `StatusChangeNotification_Encoding_DefaultBinary`.
pub const STATUS_CHANGE_NOTIFICATION_ENCODING_ID: u32 = 820;

/// Encoding envelope around a notification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionObject {
    /// Encoding node id of the body.
    pub type_id: u32,
    /// The payload.
    pub body: NotificationData,
}

impl From<NotificationData> for ExtensionObject {
    fn from(body: NotificationData) -> Self {
        Self {
            type_id: body.binary_encoding_id(),
            body,
        }
    }
}

/// A sequence-numbered message sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// Sequence number, never 0.
    pub sequence_number: u32,
    /// When the message was built.
    pub publish_time: DateTime<Utc>,
    /// Payloads. Empty for keep-alives.
    pub notification_data: Vec<ExtensionObject>,
}

impl NotificationMessage {
    /// Creates a message with the given payloads.
    pub fn new(sequence_number: u32, notification_data: Vec<NotificationData>) -> Self {
        Self {
            sequence_number,
            publish_time: Utc::now(),
            notification_data: notification_data.into_iter().map(ExtensionObject::from).collect(),
        }
    }

    /// Creates a keep-alive message.
    pub fn keep_alive(sequence_number: u32) -> Self {
        Self::new(sequence_number, Vec::new())
    }

    /// Creates a message carrying a single status change.
    pub fn status_change(sequence_number: u32, status: StatusCode) -> Self {
        Self::new(
            sequence_number,
            vec![NotificationData::StatusChange(StatusChangeNotification { status })],
        )
    }

    /// Returns `true` if the message carries no payload.
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data.is_empty()
    }

    /// Total number of data change and event notifications carried.
    pub fn notification_count(&self) -> usize {
        self.notification_data
            .iter()
            .map(|ext| match &ext.body {
                NotificationData::DataChange(dc) => dc.monitored_items.len(),
                NotificationData::Event(ev) => ev.events.len(),
                NotificationData::StatusChange(_) => 0,
            })
            .sum()
    }

    /// Returns the status carried by a status change payload, if any.
    pub fn status_change_status(&self) -> Option<StatusCode> {
        self.notification_data.iter().find_map(|ext| match &ext.body {
            NotificationData::StatusChange(sc) => Some(sc.status),
            _ => None,
        })
    }
}

// =============================================================================
// CreateSubscription / ModifySubscription
// =============================================================================

/// CreateSubscription request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// Requested publishing interval in milliseconds.
    pub requested_publishing_interval: f64,
    /// Requested lifetime count.
    pub requested_lifetime_count: u32,
    /// Requested keep-alive count.
    pub requested_max_keep_alive_count: u32,
    /// Maximum notifications per publish. Zero means no limit.
    pub max_notifications_per_publish: u32,
    /// Whether publishing starts enabled.
    pub publishing_enabled: bool,
    /// Relative priority.
    pub priority: u8,
}

impl Default for CreateSubscriptionRequest {
    fn default() -> Self {
        Self {
            requested_publishing_interval: 1000.0,
            requested_lifetime_count: 60,
            requested_max_keep_alive_count: 10,
            max_notifications_per_publish: 0,
            publishing_enabled: true,
            priority: 0,
        }
    }
}

/// CreateSubscription response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSubscriptionResponse {
    /// Server-assigned subscription id.
    pub subscription_id: SubscriptionId,
    /// Revised publishing interval in milliseconds.
    pub revised_publishing_interval: f64,
    /// Revised lifetime count.
    pub revised_lifetime_count: u32,
    /// Revised keep-alive count.
    pub revised_max_keep_alive_count: u32,
}

/// ModifySubscription request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifySubscriptionRequest {
    /// Target subscription.
    pub subscription_id: SubscriptionId,
    /// Requested publishing interval in milliseconds.
    pub requested_publishing_interval: f64,
    /// Requested lifetime count.
    pub requested_lifetime_count: u32,
    /// Requested keep-alive count.
    pub requested_max_keep_alive_count: u32,
    /// Maximum notifications per publish. Zero means no limit.
    pub max_notifications_per_publish: u32,
    /// Relative priority.
    pub priority: u8,
}

/// ModifySubscription response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifySubscriptionResponse {
    /// Revised publishing interval in milliseconds.
    pub revised_publishing_interval: f64,
    /// Revised lifetime count.
    pub revised_lifetime_count: u32,
    /// Revised keep-alive count.
    pub revised_max_keep_alive_count: u32,
}

// =============================================================================
// Publish / Republish
// =============================================================================

/// Acknowledges receipt of a notification message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionAcknowledgement {
    /// Subscription the message belongs to.
    pub subscription_id: SubscriptionId,
    /// Sequence number being acknowledged.
    pub sequence_number: u32,
}

impl SubscriptionAcknowledgement {
    /// Creates an acknowledgement.
    pub fn new(subscription_id: SubscriptionId, sequence_number: u32) -> Self {
        Self {
            subscription_id,
            sequence_number,
        }
    }
}

/// Publish request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Acknowledgements for previously received messages.
    pub subscription_acknowledgements: Vec<SubscriptionAcknowledgement>,
}

impl PublishRequest {
    /// Creates a request with the given handle and acknowledgements.
    pub fn new(request_handle: u32, acks: Vec<SubscriptionAcknowledgement>) -> Self {
        Self {
            request_header: RequestHeader::new(request_handle),
            subscription_acknowledgements: acks,
        }
    }
}

/// Publish response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// Subscription the message belongs to.
    pub subscription_id: SubscriptionId,
    /// Sequence numbers still available for republish.
    pub available_sequence_numbers: Vec<u32>,
    /// Whether more notifications are waiting to be sent.
    pub more_notifications: bool,
    /// The message.
    pub notification_message: NotificationMessage,
    /// One result per acknowledgement in the request.
    pub results: Vec<StatusCode>,
}

/// Outcome of a Publish call.
pub type PublishResult = Result<PublishResponse, ServiceFault>;

// =============================================================================
// SetTriggering
// =============================================================================

/// SetTriggering request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTriggeringRequest {
    /// Owning subscription.
    pub subscription_id: SubscriptionId,
    /// The trigger item.
    pub triggering_item_id: MonitoredItemId,
    /// Items to link to the trigger.
    pub links_to_add: Vec<MonitoredItemId>,
    /// Items to unlink from the trigger.
    pub links_to_remove: Vec<MonitoredItemId>,
}

/// SetTriggering response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SetTriggeringResponse {
    /// One result per link to add.
    pub add_results: Vec<StatusCode>,
    /// One result per link to remove.
    pub remove_results: Vec<StatusCode>,
}

// =============================================================================
// Monitored items
// =============================================================================

/// Parameters for creating one monitored item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredItemCreateRequest {
    /// Client handle reported with every notification.
    pub client_handle: u32,
    /// Initial monitoring mode.
    pub monitoring_mode: MonitoringMode,
    /// Requested queue size. Zero is treated as one.
    pub queue_size: u32,
    /// Discard the oldest entry on overflow instead of the newest.
    pub discard_oldest: bool,
}

impl MonitoredItemCreateRequest {
    /// Creates a reporting item with a queue of one.
    pub fn reporting(client_handle: u32) -> Self {
        Self {
            client_handle,
            monitoring_mode: MonitoringMode::Reporting,
            queue_size: 1,
            discard_oldest: true,
        }
    }

    /// Sets the queue size.
    pub fn with_queue_size(mut self, queue_size: u32) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Sets the monitoring mode.
    pub fn with_mode(mut self, mode: MonitoringMode) -> Self {
        self.monitoring_mode = mode;
        self
    }
}

/// Result of creating one monitored item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredItemCreateResult {
    /// Per-item result.
    pub status_code: StatusCode,
    /// Server-assigned id. Zero when creation failed.
    pub monitored_item_id: MonitoredItemId,
    /// Queue size actually used.
    pub revised_queue_size: u32,
}

// =============================================================================
// TransferSubscriptions
// =============================================================================

/// Result of transferring one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Per-subscription result.
    pub status_code: StatusCode,
    /// Sequence numbers available for republish on the transferred subscription.
    pub available_sequence_numbers: Vec<u32>,
}

// =============================================================================
// Tests
// =============================================================================
