// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bounded store of sent notification messages.
//!
//! Messages are kept in the order they were sent until the client
//! acknowledges them or the cache overflows, in which case the oldest entry
//! is evicted. Insertion order is kept explicitly so that ordering survives
//! sequence number wrap-around.

use std::collections::VecDeque;

use uasub_core::NotificationMessage;

/// Number of unacknowledged messages kept per subscription.
pub const MAX_CACHED_MESSAGES: usize = 1024;

/// Republish cache of one subscription.
#[derive(Debug, Clone)]
pub struct MessageCache {
    messages: VecDeque<NotificationMessage>,
    capacity: usize,
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCache {
    /// Creates a cache with the standard capacity.
    pub fn new() -> Self {
        Self::with_capacity(MAX_CACHED_MESSAGES)
    }

    /// Creates a cache holding at most `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Stores a sent message, evicting the oldest one if full.
    ///
    /// Returns the sequence number of the evicted message, if any.
    pub fn insert(&mut self, message: NotificationMessage) -> Option<u32> {
        let evicted = if self.messages.len() >= self.capacity {
            self.messages.pop_front().map(|m| m.sequence_number)
        } else {
            None
        };
        self.messages.push_back(message);
        evicted
    }

    /// Removes an acknowledged message. Returns `false` if it was not cached.
    pub fn remove(&mut self, sequence_number: u32) -> bool {
        match self.position(sequence_number) {
            Some(index) => {
                self.messages.remove(index);
                true
            }
            None => false,
        }
    }

    /// Returns the cached message with the given sequence number.
    pub fn get(&self, sequence_number: u32) -> Option<&NotificationMessage> {
        self.position(sequence_number).map(|i| &self.messages[i])
    }

    /// Sequence numbers currently available for republish, oldest first.
    pub fn sequence_numbers(&self) -> Vec<u32> {
        self.messages.iter().map(|m| m.sequence_number).collect()
    }

    /// Number of cached messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Maximum number of cached messages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops every cached message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn position(&self, sequence_number: u32) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.sequence_number == sequence_number)
    }
}

// =============================================================================
// Tests
// =============================================================================
