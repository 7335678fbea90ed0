/*
Time-queue for the hierarchy engine.

Nothing in the memory system ever blocks.  A request that needs time to be served is turned into
an entry of a DeadlineQueue keyed by the cycle at which it completes; the owning hierarchy drains
the queue once per tick and runs the continuation of every entry whose deadline has passed.

Deadlines are unique within one queue: scheduling onto an occupied cycle pushes the entry to the
next free cycle.  This gives a total order over completions and makes replay deterministic for a
given input sequence.
*/

use std::collections::BTreeMap;

use serde::Serialize;

pub type Cycle = u64;

// Result of scheduling an entry into a deadline queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ticket {
    issued_at: Cycle,
    ready_at: Cycle,
}

impl Ticket {
    fn new(issued_at: Cycle, ready_at: Cycle) -> Self {
        Self {
            issued_at,
            ready_at,
        }
    }

    // Cycle at which the entry was scheduled.
    pub fn issued_at(&self) -> Cycle {
        self.issued_at
    }

    // Cycle at which the entry completes, after collision bumping.
    pub fn ready_at(&self) -> Cycle {
        self.ready_at
    }

    // Whether the ticket is ready at the provided cycle.
    pub fn is_ready(&self, now: Cycle) -> bool {
        now >= self.ready_at
    }

    // Number of cycles until the ticket is ready.  Returns zero if already ready.
    pub fn remaining_cycles(&self, now: Cycle) -> Cycle {
        self.ready_at.saturating_sub(now)
    }
}

#[derive(Debug)]
pub struct DeadlineQueue<T> {
    entries: BTreeMap<Cycle, (Ticket, T)>,
}

impl<T> Default for DeadlineQueue<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> DeadlineQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    // Schedule `payload` to complete `delay` cycles after `now`.  The returned ticket carries the
    // deadline actually used, which is later than requested when the cycle was already taken.
    pub fn schedule(&mut self, now: Cycle, delay: Cycle, payload: T) -> Ticket {
        let mut ready_at = now.saturating_add(delay);
        while self.entries.contains_key(&ready_at) {
            ready_at = ready_at
                .checked_add(1)
                .expect("deadline queue ran out of cycles");
        }
        let ticket = Ticket::new(now, ready_at);
        self.entries.insert(ready_at, (ticket, payload));
        ticket
    }

    // Remove every entry whose deadline is at or before `now`, in deadline order.
    pub fn drain_ready(&mut self, now: Cycle) -> Vec<(Ticket, T)> {
        let pending = match now.checked_add(1) {
            Some(split) => self.entries.split_off(&split),
            None => BTreeMap::new(),
        };
        let ready = std::mem::replace(&mut self.entries, pending);
        ready.into_values().collect()
    }

    pub fn next_deadline(&self) -> Option<Cycle> {
        self.entries.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Ticket, T)> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::DeadlineQueue;

    #[test]
    fn collisions_bump_to_next_free_cycle() {
        let mut queue = DeadlineQueue::new();
        let a = queue.schedule(0, 4, 'a');
        let b = queue.schedule(0, 4, 'b');
        let c = queue.schedule(1, 3, 'c');
        assert_eq!(a.ready_at(), 4);
        assert_eq!(b.ready_at(), 5);
        assert_eq!(c.ready_at(), 6);
        assert_eq!(c.issued_at(), 1);
    }

    #[test]
    fn drain_ready_returns_due_entries_in_order() {
        let mut queue = DeadlineQueue::new();
        queue.schedule(0, 3, 3);
        queue.schedule(0, 1, 1);
        queue.schedule(0, 9, 9);
        let ready: Vec<_> = queue.drain_ready(3).into_iter().map(|(_, v)| v).collect();
        assert_eq!(ready, vec![1, 3]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_deadline(), Some(9));
    }

    #[test]
    fn drain_on_empty_queue_is_noop() {
        let mut queue: DeadlineQueue<u32> = DeadlineQueue::new();
        assert!(queue.drain_ready(100).is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn ticket_readiness() {
        let mut queue = DeadlineQueue::new();
        let ticket = queue.schedule(10, 5, ());
        assert!(!ticket.is_ready(14));
        assert!(ticket.is_ready(15));
        assert_eq!(ticket.remaining_cycles(12), 3);
        assert_eq!(ticket.remaining_cycles(20), 0);
    }

    #[test]
    fn drain_at_max_cycle_takes_everything() {
        let mut queue = DeadlineQueue::new();
        queue.schedule(u64::MAX - 1, 0, 'x');
        let ready = queue.drain_ready(u64::MAX);
        assert_eq!(ready.len(), 1);
    }
}
