// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server-wide subscription registry.
//!
//! Allocates subscription ids, tracks which session currently owns each
//! subscription and enforces the server-wide subscription and monitored
//! item caps. Session managers hold only a weak handle back to themselves
//! here, so a registry entry never keeps a session alive.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use uasub_core::{MonitoredItemError, SessionId, SubscriptionError, SubscriptionId, UaResult};

use crate::manager::SubscriptionManager;
use crate::subscription::Subscription;

/// A registered subscription and its current owner.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// The subscription.
    pub subscription: Arc<Subscription>,
    /// Manager of the owning session.
    pub owner: Weak<SubscriptionManager>,
    /// Owning session.
    pub session_id: SessionId,
}

/// Server-wide subscription table.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    entries: DashMap<SubscriptionId, RegistryEntry>,
    next_id: AtomicU32,
    subscription_count: AtomicUsize,
    item_count: AtomicUsize,
    max_subscriptions: usize,
    max_monitored_items: usize,
}

impl SubscriptionRegistry {
    /// Creates an empty registry with the given server-wide caps.
    pub fn new(max_subscriptions: usize, max_monitored_items: usize) -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU32::new(1),
            subscription_count: AtomicUsize::new(0),
            item_count: AtomicUsize::new(0),
            max_subscriptions,
            max_monitored_items,
        }
    }

    /// Allocates an id that is not currently in use. Never returns 0.
    pub fn allocate_id(&self) -> SubscriptionId {
        loop {
            let raw = self.next_id.fetch_add(1, Ordering::Relaxed);
            if raw == 0 {
                continue;
            }
            let id = SubscriptionId::new(raw);
            if !self.entries.contains_key(&id) {
                return id;
            }
        }
    }

    // =========================================================================
    // Capacity
    // =========================================================================

    /// Reserves a server-wide subscription slot.
    pub fn reserve_subscription(&self) -> UaResult<()> {
        let max = self.max_subscriptions;
        self.subscription_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|count| SubscriptionError::too_many_in_server(count, max).into())
    }

    /// Releases a slot taken with [`Self::reserve_subscription`].
    pub fn release_subscription(&self) {
        let _ = self
            .subscription_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Reserves `count` server-wide monitored item slots, all or nothing.
    pub fn reserve_items(&self, count: usize) -> UaResult<()> {
        let max = self.max_monitored_items;
        self.item_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                n.checked_add(count).filter(|total| *total <= max)
            })
            .map(|_| ())
            .map_err(|current| MonitoredItemError::too_many("server", current + count, max).into())
    }

    /// Releases `count` monitored item slots.
    pub fn release_items(&self, count: usize) {
        let _ = self
            .item_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(count))
            });
    }

    /// Registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscription_count.load(Ordering::Acquire)
    }

    /// Monitored items across all subscriptions.
    pub fn monitored_item_count(&self) -> usize {
        self.item_count.load(Ordering::Acquire)
    }

    // =========================================================================
    // Entries
    // =========================================================================

    /// Adds a subscription.
    pub fn insert(
        &self,
        subscription: Arc<Subscription>,
        owner: Weak<SubscriptionManager>,
        session_id: SessionId,
    ) {
        self.entries.insert(
            subscription.id(),
            RegistryEntry {
                subscription,
                owner,
                session_id,
            },
        );
    }

    /// Returns a copy of an entry.
    pub fn get(&self, id: SubscriptionId) -> Option<RegistryEntry> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    /// Records a new owner after a transfer.
    pub fn set_owner(&self, id: SubscriptionId, owner: Weak<SubscriptionManager>, session_id: SessionId) {
        if let Some(mut entry) = self.entries.get_mut(&id) {
            entry.owner = owner;
            entry.session_id = session_id;
        }
    }

    /// Removes an entry and releases its subscription slot.
    pub fn remove(&self, id: SubscriptionId) -> Option<RegistryEntry> {
        let removed = self.entries.remove(&id).map(|(_, entry)| entry);
        if removed.is_some() {
            self.release_subscription();
        }
        removed
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of subscriptions whose owning session no longer exists.
    pub fn orphaned(&self) -> Vec<SubscriptionId> {
        self.entries
            .iter()
            .filter(|entry| entry.owner.strong_count() == 0)
            .map(|entry| *entry.key())
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
