//! Intake queues for filesystem change notifications.
//!
//! Watcher threads append; the reconciliation thread drains and turns each
//! notification into scan-again flags on the deepest matching node. Two
//! queues: the fast event path, and a retry path for entries that hit a
//! transient filesystem error and must be looked at again shortly.

use std::collections::VecDeque;

use super::node::NodeId;

/// One filesystem notification. `timestamp` is in deciseconds; 0 means
/// "handle immediately", anything else is the earliest due time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Anchor node the path is relative to; None anchors at the sync root.
    pub node: Option<NodeId>,
    /// `/`-separated path relative to the anchor. May be empty.
    pub path: String,
    pub timestamp: i64,
}

impl Notification {
    fn same_target(&self, other: &Notification) -> bool {
        self.node == other.node && self.path == other.path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyQueue {
    Events,
    Retry,
}

#[derive(Debug, Default)]
pub struct ScanQueue {
    events: VecDeque<Notification>,
    retry: VecDeque<Notification>,
    /// Deciseconds watermark; scans are deferred until it has passed.
    pub quiet_until: i64,
}

impl ScanQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a notification, collapsing it into the previous one when both
    /// name the same target. A merged timestamp is the max of the two, or 0
    /// when either side demanded immediate handling.
    pub fn push(&mut self, queue: NotifyQueue, notification: Notification) {
        let q = self.queue_mut(queue);
        if let Some(last) = q.back_mut()
            && last.same_target(&notification)
        {
            last.timestamp = if last.timestamp == 0 || notification.timestamp == 0 {
                0
            } else {
                last.timestamp.max(notification.timestamp)
            };
            return;
        }
        q.push_back(notification);
    }

    /// Pops the next notification that is due at `now`.
    pub fn pop_due(&mut self, queue: NotifyQueue, now: i64) -> Option<Notification> {
        let q = self.queue_mut(queue);
        if q.front().is_some_and(|n| n.timestamp <= now) {
            q.pop_front()
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.retry.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len() + self.retry.len()
    }

    /// Pushes the quiet-time watermark out to `now + delay`.
    pub fn extend_quiet_time(&mut self, now: i64, delay: i64) {
        self.quiet_until = self.quiet_until.max(now + delay);
    }

    fn queue_mut(&mut self, queue: NotifyQueue) -> &mut VecDeque<Notification> {
        match queue {
            NotifyQueue::Events => &mut self.events,
            NotifyQueue::Retry => &mut self.retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(path: &str, timestamp: i64) -> Notification {
        Notification {
            node: None,
            path: path.to_string(),
            timestamp,
        }
    }

    #[test]
    fn consecutive_identical_notifications_collapse() {
        let mut queue = ScanQueue::new();
        queue.push(NotifyQueue::Events, note("A/x", 10));
        queue.push(NotifyQueue::Events, note("A/x", 30));
        queue.push(NotifyQueue::Events, note("A/y", 20));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_due(NotifyQueue::Events, 100), Some(note("A/x", 30)));
    }

    #[test]
    fn immediate_wins_when_merging() {
        let mut queue = ScanQueue::new();
        queue.push(NotifyQueue::Events, note("A/x", 10));
        queue.push(NotifyQueue::Events, note("A/x", 0));
        assert_eq!(queue.pop_due(NotifyQueue::Events, 0), Some(note("A/x", 0)));
    }

    #[test]
    fn pop_due_respects_timestamps() {
        let mut queue = ScanQueue::new();
        queue.push(NotifyQueue::Retry, note("A/x", 50));
        assert_eq!(queue.pop_due(NotifyQueue::Retry, 49), None);
        assert_eq!(queue.pop_due(NotifyQueue::Retry, 50), Some(note("A/x", 50)));
    }

    #[test]
    fn quiet_time_never_moves_backwards() {
        let mut queue = ScanQueue::new();
        queue.extend_quiet_time(100, 150);
        queue.extend_quiet_time(90, 5);
        assert_eq!(queue.quiet_until, 250);
    }
}
