// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uasub-server
//!
//! Server-side OPC UA subscription publishing engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  SubscriptionRegistry (server)               │
//! └──────────────────────────────────────────────────────────────┘
//!        │                                      │
//! ┌──────────────────────┐              ┌──────────────────────┐
//! │ SubscriptionManager  │   transfer   │ SubscriptionManager  │
//! │     (session 1)      │ ───────────▶ │     (session 2)      │
//! └──────────────────────┘              └──────────────────────┘
//!        │                                      │
//!        ▼                                      ▼
//!   PublishQueue ◀──── Subscription ────▶ MessageCache
//!                        │    ▲
//!              gather    │    │ tick
//!                        ▼    │
//!                 MonitoredItem  PublishingTimer
//! ```
//!
//! ## Modules
//!
//! - [`state`]: Pure subscription state table
//! - [`subscription`]: Per-subscription state machine and gather/send
//! - [`queue`]: Per-session publish request queue and wait list
//! - [`cache`]: Republish cache of sent messages
//! - [`gather`]: Round-robin notification gathering
//! - [`item`]: Monitored items feeding the engine
//! - [`timer`]: Self-rearming publishing timer
//! - [`revise`]: Revision of requested subscription parameters
//! - [`limits`]: Server limits
//! - [`manager`]: Per-session subscription services
//! - [`registry`]: Server-wide id allocation, ownership and caps
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uasub_core::{CreateSubscriptionRequest, PublishRequest, SessionId};
//! use uasub_server::{SubscriptionLimits, SubscriptionManager, SubscriptionRegistry};
//!
//! # async fn example() -> uasub_core::UaResult<()> {
//! let limits = Arc::new(SubscriptionLimits::default());
//! let registry = Arc::new(SubscriptionRegistry::new(
//!     limits.max_subscriptions,
//!     limits.max_monitored_items,
//! ));
//! let session = SubscriptionManager::new(SessionId::new(1), limits, registry);
//!
//! session.create_subscription(&CreateSubscriptionRequest::default())?;
//! let response = session.publish(PublishRequest::new(1, Vec::new())).await;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cache;
pub mod gather;
pub mod item;
pub mod limits;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod revise;
pub mod state;
pub mod subscription;
pub mod timer;

// =============================================================================
// Re-exports
// =============================================================================

pub use cache::{MAX_CACHED_MESSAGES, MessageCache};
pub use gather::{Drained, NotificationSource};
pub use item::MonitoredItem;
pub use limits::SubscriptionLimits;
pub use manager::{ItemLifecycle, SubscriptionManager, SubscriptionManagerStats};
pub use queue::{Handoff, PendingPublish, PublishFuture, PublishQueue};
pub use registry::{RegistryEntry, SubscriptionRegistry};
pub use revise::{RequestedParameters, RevisedParameters, revise};
pub use state::{Counters, State};
pub use subscription::{
    Subscription, SubscriptionDiagnostics, SubscriptionListener, SubscriptionParams,
};
pub use timer::{PublishingTimer, TimerTick};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
