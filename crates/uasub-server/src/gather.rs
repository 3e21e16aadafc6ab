// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Round-robin gathering of notifications from monitored items.
//!
//! Items are visited in id order starting from the cursor left by the
//! previous gather. An item is only moved past once it has been fully
//! drained, so an item that keeps landing at the end of an overflowing round
//! is first in line next time.

use std::collections::BTreeMap;
use std::ops::Bound;

use uasub_core::{
    DataChangeNotification, EventNotificationList, MonitoredItemId, Notification, NotificationData,
};

// =============================================================================
// NotificationSource
// =============================================================================

/// Notifications drained from one source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Drained {
    /// Drained notifications, oldest first.
    pub notifications: Vec<Notification>,
    /// `true` if nothing is left in the source.
    pub exhausted: bool,
}

/// A monitored item as seen by the publishing engine.
pub trait NotificationSource {
    /// Returns `true` if the source has notifications it would report now.
    fn has_pending_notifications(&self) -> bool;

    /// Returns `true` if a trigger asked this source to report.
    fn is_triggered(&self) -> bool;

    /// Removes up to `max` notifications.
    fn drain_up_to(&mut self, max: usize) -> Drained;

    /// Items this source triggers when it reports.
    fn triggered_links(&self) -> Vec<MonitoredItemId> {
        Vec::new()
    }

    /// Marks the source as triggered.
    fn set_triggered(&mut self) {}
}

fn is_candidate<S: NotificationSource>(source: &S) -> bool {
    source.has_pending_notifications() || source.is_triggered()
}

/// Returns `true` if any source has something to report.
pub fn notifications_available<S: NotificationSource>(items: &BTreeMap<MonitoredItemId, S>) -> bool {
    items.values().any(is_candidate)
}

// =============================================================================
// gather
// =============================================================================

/// Output of one gather round.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Gathered {
    /// Collected notifications in visiting order.
    pub notifications: Vec<Notification>,
    /// `true` if some source still has something to report.
    pub more_notifications: bool,
}

/// Drains at most `budget` notifications from `items`, resuming at `cursor`.
///
/// On return `cursor` names the item to start from next time, or `None` if
/// the round reached the end of the item set.
pub fn gather<S: NotificationSource>(
    items: &mut BTreeMap<MonitoredItemId, S>,
    cursor: &mut Option<MonitoredItemId>,
    budget: usize,
) -> Gathered {
    let links: Vec<MonitoredItemId> = items
        .values()
        .filter(|item| item.has_pending_notifications())
        .flat_map(|item| item.triggered_links())
        .collect();
    for id in links {
        if let Some(item) = items.get_mut(&id) {
            item.set_triggered();
        }
    }

    let order = visiting_order(items, *cursor);
    let mut notifications = Vec::new();
    *cursor = None;

    for id in order {
        let remaining = budget.saturating_sub(notifications.len());
        if remaining == 0 {
            *cursor = Some(id);
            break;
        }

        let Some(item) = items.get_mut(&id) else {
            continue;
        };
        if !is_candidate(item) {
            continue;
        }

        let drained = item.drain_up_to(remaining);
        notifications.extend(drained.notifications);
        if !drained.exhausted {
            *cursor = Some(id);
            break;
        }
    }

    Gathered {
        notifications,
        more_notifications: notifications_available(items),
    }
}

fn visiting_order<S>(
    items: &BTreeMap<MonitoredItemId, S>,
    cursor: Option<MonitoredItemId>,
) -> Vec<MonitoredItemId> {
    match cursor {
        None => items.keys().copied().collect(),
        Some(start) => items
            .range(start..)
            .chain(items.range((Bound::Unbounded, Bound::Excluded(start))))
            .map(|(id, _)| *id)
            .collect(),
    }
}

/// Splits gathered notifications into data change and event payloads.
pub fn partition(notifications: Vec<Notification>) -> Vec<NotificationData> {
    let mut data_changes = DataChangeNotification::default();
    let mut events = EventNotificationList::default();

    for notification in notifications {
        match notification {
            Notification::DataChange(n) => data_changes.monitored_items.push(n),
            Notification::Event(e) => events.events.push(e),
        }
    }

    let mut payloads = Vec::with_capacity(2);
    if !data_changes.monitored_items.is_empty() {
        payloads.push(NotificationData::DataChange(data_changes));
    }
    if !events.events.is_empty() {
        payloads.push(NotificationData::Event(events));
    }
    payloads
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uasub_core::{DataValue, EventFieldList, MonitoredItemNotification};

    #[derive(Debug, Default)]
    struct FakeSource {
        handle: u32,
        pending: usize,
        triggered: bool,
        links: Vec<MonitoredItemId>,
        sampling_only: bool,
    }

    impl FakeSource {
        fn with_pending(handle: u32, pending: usize) -> Self {
            Self {
                handle,
                pending,
                ..Default::default()
            }
        }
    }

    impl NotificationSource for FakeSource {
        fn has_pending_notifications(&self) -> bool {
            self.pending > 0 && (!self.sampling_only || self.triggered)
        }

        fn is_triggered(&self) -> bool {
            self.triggered
        }

        fn drain_up_to(&mut self, max: usize) -> Drained {
            let n = self.pending.min(max);
            self.pending -= n;
            if self.pending == 0 {
                self.triggered = false;
            }
            Drained {
                notifications: (0..n)
                    .map(|_| {
                        Notification::DataChange(MonitoredItemNotification {
                            client_handle: self.handle,
                            value: DataValue::new(1),
                        })
                    })
                    .collect(),
                exhausted: self.pending == 0,
            }
        }

        fn triggered_links(&self) -> Vec<MonitoredItemId> {
            self.links.clone()
        }

        fn set_triggered(&mut self) {
            self.triggered = true;
        }
    }

    fn handles(notifications: &[Notification]) -> Vec<u32> {
        notifications
            .iter()
            .map(|n| match n {
                Notification::DataChange(d) => d.client_handle,
                Notification::Event(e) => e.client_handle,
            })
            .collect()
    }

    fn items(pending: &[usize]) -> BTreeMap<MonitoredItemId, FakeSource> {
        pending
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let id = i as u32 + 1;
                (MonitoredItemId::new(id), FakeSource::with_pending(id, *p))
            })
            .collect()
    }

    #[test]
    fn test_gathers_everything_within_budget() {
        let mut items = items(&[2, 0, 3]);
        let mut cursor = None;

        let gathered = gather(&mut items, &mut cursor, 10);
        assert_eq!(handles(&gathered.notifications), vec![1, 1, 3, 3, 3]);
        assert!(!gathered.more_notifications);
        assert_eq!(cursor, None);
    }

    #[test]
    fn test_budget_stops_mid_item_and_resumes_there() {
        let mut items = items(&[3, 3]);
        let mut cursor = None;

        let first = gather(&mut items, &mut cursor, 4);
        assert_eq!(handles(&first.notifications), vec![1, 1, 1, 2]);
        assert!(first.more_notifications);
        assert_eq!(cursor, Some(MonitoredItemId::new(2)));

        let second = gather(&mut items, &mut cursor, 4);
        assert_eq!(handles(&second.notifications), vec![2, 2]);
        assert!(!second.more_notifications);
    }

    #[test]
    fn test_round_robin_prevents_starvation() {
        // Item 1 refills every round; item 3 must still get its turn.
        let mut items = items(&[5, 0, 2]);
        let mut cursor = None;

        let first = gather(&mut items, &mut cursor, 5);
        assert_eq!(handles(&first.notifications), vec![1, 1, 1, 1, 1]);
        assert_eq!(cursor, Some(MonitoredItemId::new(2)));

        items.get_mut(&MonitoredItemId::new(1)).unwrap().pending = 5;
        let second = gather(&mut items, &mut cursor, 5);
        assert_eq!(handles(&second.notifications), vec![3, 3, 1, 1, 1]);
    }

    #[test]
    fn test_cursor_on_removed_item_resumes_at_next() {
        let mut items = items(&[1, 1, 1]);
        let mut cursor = Some(MonitoredItemId::new(2));
        items.remove(&MonitoredItemId::new(2));

        let gathered = gather(&mut items, &mut cursor, 10);
        assert_eq!(handles(&gathered.notifications), vec![3, 1]);
    }

    #[test]
    fn test_trigger_reports_sampling_item() {
        let mut items = items(&[1, 2]);
        items.get_mut(&MonitoredItemId::new(2)).unwrap().sampling_only = true;
        let mut cursor = None;

        // Without a link the sampling item stays silent.
        let gathered = gather(&mut items, &mut cursor, 10);
        assert_eq!(handles(&gathered.notifications), vec![1]);
        assert!(!gathered.more_notifications);

        let trigger = items.get_mut(&MonitoredItemId::new(1)).unwrap();
        trigger.pending = 1;
        trigger.links = vec![MonitoredItemId::new(2)];

        let gathered = gather(&mut items, &mut cursor, 10);
        assert_eq!(handles(&gathered.notifications), vec![1, 2, 2]);
        assert!(!items[&MonitoredItemId::new(2)].triggered);
    }

    #[test]
    fn test_partition_builds_one_payload_per_kind() {
        let notifications = vec![
            Notification::DataChange(MonitoredItemNotification {
                client_handle: 1,
                value: DataValue::new(1),
            }),
            Notification::Event(EventFieldList {
                client_handle: 2,
                event_fields: vec![],
            }),
            Notification::DataChange(MonitoredItemNotification {
                client_handle: 3,
                value: DataValue::new(2),
            }),
        ];

        let payloads = partition(notifications);
        assert_eq!(payloads.len(), 2);
        match &payloads[0] {
            NotificationData::DataChange(dc) => assert_eq!(dc.monitored_items.len(), 2),
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(matches!(payloads[1], NotificationData::Event(_)));
        assert!(partition(Vec::new()).is_empty());
    }
}
