use serde::Serialize;

use super::coherence::{CoherenceAction, CoherenceState, Protocol};
use super::config::CacheConfig;
use super::layout::AddressLayout;
use super::mshr::{LineSlot, MissTracker};
use super::policy::LruPolicy;
use super::request::{Addr, TransactionKind};
use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheLine {
    pub valid: bool,
    pub dirty: bool,
    /// Held while a miss tracker entry points at this slot.
    pub lock: bool,
    pub is_translation: bool,
    pub is_large: bool,
    pub tag: u64,
    pub thread: u64,
    /// Shared-table address of the translation held by a virtually addressed TLB line.
    pub co_tag: Option<Addr>,
    pub state: CoherenceState,
}

impl CacheLine {
    /// Valid copy of `(tag, thread, class)`, locked or not.
    pub fn holds(&self, tag: u64, thread: u64, is_translation: bool) -> bool {
        self.valid && self.tag == tag && self.thread == thread && self.is_translation == is_translation
    }
}

/// Contents written into a slot on a fill.
#[derive(Debug, Clone, Copy)]
pub struct LineFill {
    pub tag: u64,
    pub thread: u64,
    pub is_translation: bool,
    pub is_large: bool,
    pub dirty: bool,
    pub lock: bool,
    pub co_tag: Option<Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineSnapshot {
    pub set: usize,
    pub way: usize,
    pub addr: Addr,
    pub thread: u64,
    pub is_translation: bool,
    pub is_large: bool,
    pub dirty: bool,
    pub locked: bool,
    pub co_tag: Option<Addr>,
    pub state: CoherenceState,
}

/// Sets x ways of lines, stored flat.
#[derive(Debug, Clone)]
pub struct TagStore {
    ways: usize,
    lines: Vec<CacheLine>,
}

impl TagStore {
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            ways,
            lines: vec![CacheLine::default(); sets * ways],
        }
    }

    pub fn ways(&self) -> usize {
        self.ways
    }

    pub fn sets(&self) -> usize {
        self.lines.len() / self.ways
    }

    pub fn line(&self, slot: LineSlot) -> &CacheLine {
        &self.lines[slot.set * self.ways + slot.way]
    }

    pub fn line_mut(&mut self, slot: LineSlot) -> &mut CacheLine {
        &mut self.lines[slot.set * self.ways + slot.way]
    }

    pub fn set(&self, set: usize) -> &[CacheLine] {
        &self.lines[set * self.ways..(set + 1) * self.ways]
    }

    pub fn find(&self, set: usize, tag: u64, thread: u64, is_translation: bool) -> Option<LineSlot> {
        self.set(set)
            .iter()
            .position(|line| line.holds(tag, thread, is_translation))
            .map(|way| LineSlot { set, way })
    }

    pub fn slots(&self) -> impl Iterator<Item = (LineSlot, &CacheLine)> {
        let ways = self.ways;
        self.lines.iter().enumerate().map(move |(idx, line)| {
            (
                LineSlot {
                    set: idx / ways,
                    way: idx % ways,
                },
                line,
            )
        })
    }
}

/// One level of a hierarchy.  Links to other levels live in the topology; a cache only knows its
/// own lines, recency, in-flight misses and access latency.
#[derive(Debug)]
pub struct Cache {
    name: String,
    layout: AddressLayout,
    latency: Cycle,
    tags: TagStore,
    lru: LruPolicy,
    mshr: MissTracker,
}

impl Cache {
    pub fn new(name: impl Into<String>, config: &CacheConfig) -> Self {
        config.ensure_valid();
        let layout = AddressLayout::new(config.line_size, config.sets);
        let sets = layout.num_sets();
        Self {
            name: name.into(),
            layout,
            latency: config.latency,
            tags: TagStore::new(sets, config.ways),
            lru: LruPolicy::new(sets, config.ways),
            mshr: MissTracker::new(config.mshr_entries),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &AddressLayout {
        &self.layout
    }

    pub fn latency(&self) -> Cycle {
        self.latency
    }

    pub fn tags(&self) -> &TagStore {
        &self.tags
    }

    pub fn line(&self, slot: LineSlot) -> &CacheLine {
        self.tags.line(slot)
    }

    pub fn line_mut(&mut self, slot: LineSlot) -> &mut CacheLine {
        self.tags.line_mut(slot)
    }

    pub fn mshr(&self) -> &MissTracker {
        &self.mshr
    }

    pub fn mshr_mut(&mut self) -> &mut MissTracker {
        &mut self.mshr
    }

    /// Slot holding a valid copy of `addr`, ignoring the lock.
    pub fn find(&self, addr: Addr, thread: u64, is_translation: bool) -> Option<LineSlot> {
        self.tags.find(
            self.layout.index(addr),
            self.layout.tag(addr),
            thread,
            is_translation,
        )
    }

    /// Valid translation lines whose shared-table address falls in the same `granule`-sized block
    /// as `co_tag`.
    pub fn find_by_co_tag(&self, co_tag: Addr, granule: u64, thread: u64) -> Vec<LineSlot> {
        let block = co_tag / granule;
        self.tags
            .slots()
            .filter(|(_, line)| {
                line.valid
                    && line.is_translation
                    && line.thread == thread
                    && line.co_tag.map(|c| c / granule) == Some(block)
            })
            .map(|(slot, _)| slot)
            .collect()
    }

    /// Way to fill in `set`: the first invalid unlocked way, else the least recently used unlocked
    /// one.  `None` when every way is waiting on a miss.
    pub fn victim(&self, set: usize) -> Option<usize> {
        let lines = self.tags.set(set);
        lines
            .iter()
            .position(|line| !line.valid && !line.lock)
            .or_else(|| self.lru.victim(set, |way| !lines[way].lock))
    }

    pub fn touch(&mut self, slot: LineSlot) {
        self.lru.touch(slot.set, slot.way);
    }

    pub fn line_addr(&self, slot: LineSlot) -> Addr {
        self.layout.line_addr(self.tags.line(slot).tag, slot.set)
    }

    /// Run the protocol on the line in `slot` and store the next state.
    pub fn transition(&mut self, slot: LineSlot, protocol: Protocol, kind: TransactionKind) -> CoherenceAction {
        let line = self.tags.line_mut(slot);
        let (next, action) = protocol.transition(line.state, kind);
        line.state = next;
        action
    }

    pub fn install(&mut self, slot: LineSlot, fill: LineFill) {
        let line = self.tags.line_mut(slot);
        debug_assert!(!line.lock, "filling a locked slot");
        *line = CacheLine {
            valid: true,
            dirty: fill.dirty,
            lock: fill.lock,
            is_translation: fill.is_translation,
            is_large: fill.is_large,
            tag: fill.tag,
            thread: fill.thread,
            co_tag: fill.co_tag,
            state: CoherenceState::Invalid,
        };
        self.lru.touch(slot.set, slot.way);
    }

    /// Drop the line, leaving the lock to whoever owns it.
    pub fn invalidate(&mut self, slot: LineSlot) {
        let line = self.tags.line_mut(slot);
        line.valid = false;
        line.dirty = false;
        line.state = CoherenceState::Invalid;
    }

    pub fn locked_lines(&self) -> usize {
        self.tags.slots().filter(|(_, line)| line.lock).count()
    }

    pub fn resident_lines(&self) -> Vec<LineSnapshot> {
        self.tags
            .slots()
            .filter(|(_, line)| line.valid)
            .map(|(slot, line)| LineSnapshot {
                set: slot.set,
                way: slot.way,
                addr: self.layout.line_addr(line.tag, slot.set),
                thread: line.thread,
                is_translation: line.is_translation,
                is_large: line.is_large,
                dirty: line.dirty,
                locked: line.lock,
                co_tag: line.co_tag,
                state: line.state,
            })
            .collect()
    }
}
