use smallvec::SmallVec;

use super::request::{CoreTag, Request, RequestKey, TransactionKind};

/// Position of a line in a tag store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSlot {
    pub set: usize,
    pub way: usize,
}

/// Identity of one allocation, unique for the lifetime of its tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MshrId(u64);

#[derive(Debug)]
pub struct MshrEntry {
    id: MshrId,
    key: RequestKey,
    slot: LineSlot,
    tag: u64,
    is_translation: bool,
    origin: CoreTag,
    core_agnostic: bool,
    // first element is the request that allocated the entry
    pub(crate) requests: SmallVec<[Request; 2]>,
}

impl MshrEntry {
    pub fn id(&self) -> MshrId {
        self.id
    }

    pub fn slot(&self) -> LineSlot {
        self.slot
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn is_translation(&self) -> bool {
        self.is_translation
    }

    pub fn pending_kind(&self) -> TransactionKind {
        self.key.kind
    }

    pub fn is_core_agnostic(&self) -> bool {
        self.core_agnostic
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn into_requests(self) -> SmallVec<[Request; 2]> {
        self.requests
    }
}

/// Bounded table of in-flight misses for one cache.
#[derive(Debug)]
pub struct MissTracker {
    capacity: usize,
    next_id: u64,
    entries: Vec<MshrEntry>,
}

impl MissTracker {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "mshr capacity must be > 0");
        Self {
            capacity,
            next_id: 0,
            entries: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn position(&self, key: &RequestKey) -> Option<usize> {
        self.entries.iter().position(|entry| entry.key.matches(key))
    }

    pub fn position_for_slot(&self, slot: LineSlot) -> Option<usize> {
        self.entries.iter().position(|entry| entry.slot == slot)
    }

    pub fn entry(&self, idx: usize) -> &MshrEntry {
        &self.entries[idx]
    }

    pub fn allocate(
        &mut self,
        key: RequestKey,
        slot: LineSlot,
        tag: u64,
        request: Request,
    ) -> Result<MshrId, ()> {
        if self.is_full() {
            return Err(());
        }
        let id = MshrId(self.next_id);
        self.next_id += 1;
        let mut requests = SmallVec::new();
        let origin = request.core;
        let is_translation = request.kind.is_translation();
        requests.push(request);
        self.entries.push(MshrEntry {
            id,
            key,
            slot,
            tag,
            is_translation,
            origin,
            core_agnostic: origin == CoreTag::Agnostic,
            requests,
        });
        Ok(id)
    }

    /// Attach `request` to an existing entry.  The entry turns core-agnostic as soon as a
    /// request from a different core joins it.
    pub fn merge(&mut self, idx: usize, request: Request) {
        let entry = &mut self.entries[idx];
        let same_core = match (entry.origin, request.core) {
            (CoreTag::Core(a), CoreTag::Core(b)) => a == b,
            _ => false,
        };
        if !same_core {
            entry.core_agnostic = true;
        }
        entry.requests.push(request);
    }

    pub fn remove_matching(&mut self, key: &RequestKey) -> Option<MshrEntry> {
        let idx = self.position(key)?;
        Some(self.entries.remove(idx))
    }

    /// Remove exactly the entry `id` names; `None` once it has been released.
    pub fn remove(&mut self, id: MshrId) -> Option<MshrEntry> {
        let idx = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MshrEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{LineSlot, MissTracker};
    use crate::memsys::request::{Request, TransactionKind};

    fn read(addr: u64, core: usize) -> Request {
        Request::new(addr, TransactionKind::DataRead, 0, false, core)
    }

    const SLOT: LineSlot = LineSlot { set: 0, way: 0 };

    #[test]
    fn new_tracker_is_empty() {
        let tracker = MissTracker::new(4);
        assert!(tracker.is_empty());
        assert!(!tracker.is_full());
        assert!(tracker.position(&read(0x40, 0).key(false)).is_none());
    }

    #[test]
    fn allocate_until_full() {
        let mut tracker = MissTracker::new(2);
        let a = read(0x40, 0);
        let b = read(0x80, 0);
        let c = read(0xc0, 0);
        assert!(tracker.allocate(a.key(false), SLOT, 1, a).is_ok());
        assert!(tracker.allocate(b.key(false), LineSlot { set: 0, way: 1 }, 2, b).is_ok());
        assert!(tracker.is_full());
        assert!(tracker.allocate(c.key(false), SLOT, 3, c).is_err());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn merge_from_same_core_stays_core_specific() {
        let mut tracker = MissTracker::new(1);
        let a = read(0x40, 0);
        tracker.allocate(a.key(false), SLOT, 1, a.clone()).unwrap();
        let idx = tracker.position(&a.key(false)).unwrap();
        tracker.merge(idx, a.clone());
        assert!(!tracker.entry(idx).is_core_agnostic());
        assert_eq!(tracker.entry(idx).requests().len(), 2);
    }

    #[test]
    fn merge_from_other_core_turns_agnostic() {
        let mut tracker = MissTracker::new(1);
        let a = read(0x40, 0);
        let b = read(0x40, 1);
        tracker.allocate(a.key(true), SLOT, 1, a).unwrap();
        let idx = tracker.position(&b.key(true)).expect("shared key matches any core");
        tracker.merge(idx, b);
        assert!(tracker.entry(idx).is_core_agnostic());
    }

    #[test]
    fn remove_frees_capacity() {
        let mut tracker = MissTracker::new(1);
        let a = read(0x40, 0);
        tracker.allocate(a.key(false), SLOT, 1, a.clone()).unwrap();
        assert!(tracker.is_full());
        let entry = tracker.remove_matching(&a.key(false)).unwrap();
        assert_eq!(entry.requests().len(), 1);
        assert_eq!(entry.slot(), SLOT);
        assert!(!tracker.is_full());
        assert!(tracker.remove_matching(&a.key(false)).is_none());
    }

    #[test]
    fn remove_by_id_ignores_later_entry_with_same_key() {
        let mut tracker = MissTracker::new(2);
        let a = read(0x40, 0);
        let first = tracker.allocate(a.key(false), SLOT, 1, a.clone()).unwrap();
        assert!(tracker.remove(first).is_some());
        let second = tracker.allocate(a.key(false), SLOT, 1, a.clone()).unwrap();
        assert_ne!(first, second);
        assert!(tracker.remove(first).is_none());
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.remove(second).map(|entry| entry.id()), Some(second));
    }

    #[test]
    fn find_by_slot() {
        let mut tracker = MissTracker::new(2);
        let a = read(0x40, 0);
        let slot = LineSlot { set: 3, way: 1 };
        tracker.allocate(a.key(false), slot, 7, a).unwrap();
        assert_eq!(tracker.position_for_slot(slot), Some(0));
        assert_eq!(tracker.position_for_slot(SLOT), None);
        assert_eq!(tracker.entry(0).tag(), 7);
        assert_eq!(tracker.entry(0).pending_kind(), TransactionKind::DataRead);
    }

    #[test]
    fn fill_and_drain_repeatedly() {
        let mut tracker = MissTracker::new(4);
        for round in 0..100 {
            for line in 0..4u64 {
                let req = read(line << 6, 0);
                let slot = LineSlot { set: line as usize, way: 0 };
                assert!(tracker.allocate(req.key(false), slot, line, req).is_ok(), "round {round}");
            }
            for line in 0..4u64 {
                let req = read(line << 6, 0);
                assert!(tracker.remove_matching(&req.key(false)).is_some(), "round {round}");
            }
        }
    }
}
