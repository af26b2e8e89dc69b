use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::types::AgentId;

/// Min-heap of `(deadline, id)`.
///
/// Entries are never removed or updated in place. Refreshing a deadline pushes
/// a second entry and leaves the old one behind; whoever pops must compare the
/// popped deadline against the authoritative one.
#[derive(Debug, Default)]
pub struct ExpiryQueue {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, AgentId)>>,
}

impl ExpiryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, deadline: DateTime<Utc>, id: AgentId) {
        self.heap.push(Reverse((deadline, id)));
    }

    pub fn peek_deadline(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Pop the earliest entry if its deadline is at or before `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, AgentId)> {
        match self.peek_deadline() {
            Some(deadline) if deadline <= now => self.heap.pop().map(|Reverse(entry)| entry),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_pops_in_deadline_order() {
        let mut queue = ExpiryQueue::new();
        queue.push(t0() + Duration::seconds(30), 3);
        queue.push(t0() + Duration::seconds(10), 1);
        queue.push(t0() + Duration::seconds(20), 2);

        let now = t0() + Duration::seconds(60);
        let order: Vec<AgentId> = std::iter::from_fn(|| queue.pop_due(now).map(|(_, id)| id)).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stops_at_first_future_deadline() {
        let mut queue = ExpiryQueue::new();
        queue.push(t0(), 1);
        queue.push(t0() + Duration::minutes(5), 2);

        assert_eq!(queue.pop_due(t0() + Duration::minutes(1)), Some((t0(), 1)));
        assert_eq!(queue.pop_due(t0() + Duration::minutes(1)), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_refresh_leaves_stale_entry() {
        let mut queue = ExpiryQueue::new();
        queue.push(t0(), 7);
        queue.push(t0() + Duration::minutes(60), 7);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek_deadline(), Some(t0()));
    }
}
