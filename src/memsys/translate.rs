use std::collections::{BTreeMap, BTreeSet};

use super::config::SharedTableConfig;
use super::request::{Addr, TransactionKind};

/// Crossing between a core's virtually addressed TLBs and the physically addressed shared table.
pub trait AddressTranslator {
    /// Shared-table address holding the translation of `va`.  With `insert`, remember the crossing
    /// so a completion on the physical side can find the virtual requests waiting on it.
    fn shared_table_address(
        &mut self,
        va: Addr,
        kind: TransactionKind,
        thread: u64,
        is_large: bool,
        insert: bool,
    ) -> Addr;

    /// Virtual addresses recorded against `pa` that a TLB of the requested size class should wake.
    /// Returned entries are forgotten.
    fn reverse_lookup(
        &mut self,
        pa: Addr,
        kind: TransactionKind,
        thread: u64,
        is_large: bool,
        want_small: bool,
    ) -> Vec<Addr>;
}

/// Which cores cache a translation, keyed by shared-table address.
pub trait PresenceTracker {
    fn add(&mut self, pa: Addr, thread: u64, is_large: bool, core: usize);
    fn remove(&mut self, pa: Addr, thread: u64, is_large: bool, core: usize);
    fn cores(&self, pa: Addr, thread: u64, is_large: bool) -> Vec<usize>;
    /// Forget the key entirely, returning the cores it listed.
    fn clear(&mut self, pa: Addr, thread: u64, is_large: bool) -> Vec<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Crossing {
    va: Addr,
    kind: TransactionKind,
    thread: u64,
    is_large: bool,
}

#[derive(Debug, Clone)]
pub struct SharedTableTranslator {
    table: SharedTableConfig,
    crossings: BTreeMap<Addr, BTreeSet<Crossing>>,
}

impl SharedTableTranslator {
    pub fn new(table: SharedTableConfig) -> Self {
        table.ensure_valid();
        Self {
            table,
            crossings: BTreeMap::new(),
        }
    }

    pub fn address_of(&self, va: Addr, is_large: bool) -> Addr {
        let (base, entries, page_bits) = if is_large {
            (self.table.large_base(), self.table.large_entries, self.table.large_page_bits)
        } else {
            (self.table.small_base, self.table.small_entries, self.table.small_page_bits)
        };
        let slot = (va >> page_bits) & (entries - 1);
        base + slot * self.table.entry_size
    }

    pub fn pending(&self) -> usize {
        self.crossings.values().map(BTreeSet::len).sum()
    }
}

impl AddressTranslator for SharedTableTranslator {
    fn shared_table_address(
        &mut self,
        va: Addr,
        kind: TransactionKind,
        thread: u64,
        is_large: bool,
        insert: bool,
    ) -> Addr {
        let pa = self.address_of(va, is_large);
        if insert {
            self.crossings.entry(pa).or_default().insert(Crossing {
                va,
                kind,
                thread,
                is_large,
            });
        }
        pa
    }

    fn reverse_lookup(
        &mut self,
        pa: Addr,
        kind: TransactionKind,
        thread: u64,
        is_large: bool,
        want_small: bool,
    ) -> Vec<Addr> {
        // a small-page TLB only ever waits on small-page crossings and vice versa
        if want_small == is_large {
            return Vec::new();
        }
        let Some(waiting) = self.crossings.get_mut(&pa) else {
            return Vec::new();
        };
        let matched: Vec<Crossing> = waiting
            .iter()
            .filter(|c| c.kind == kind && c.thread == thread && c.is_large == is_large)
            .copied()
            .collect();
        for crossing in &matched {
            waiting.remove(crossing);
        }
        if waiting.is_empty() {
            self.crossings.remove(&pa);
        }
        matched.into_iter().map(|c| c.va).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PresenceMap {
    entries: BTreeMap<(Addr, u64, bool), BTreeSet<usize>>,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PresenceTracker for PresenceMap {
    fn add(&mut self, pa: Addr, thread: u64, is_large: bool, core: usize) {
        self.entries
            .entry((pa, thread, is_large))
            .or_default()
            .insert(core);
    }

    fn remove(&mut self, pa: Addr, thread: u64, is_large: bool, core: usize) {
        let key = (pa, thread, is_large);
        if let Some(cores) = self.entries.get_mut(&key) {
            cores.remove(&core);
            if cores.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    fn cores(&self, pa: Addr, thread: u64, is_large: bool) -> Vec<usize> {
        self.entries
            .get(&(pa, thread, is_large))
            .map(|cores| cores.iter().copied().collect())
            .unwrap_or_default()
    }

    fn clear(&mut self, pa: Addr, thread: u64, is_large: bool) -> Vec<usize> {
        self.entries
            .remove(&(pa, thread, is_large))
            .map(|cores| cores.into_iter().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READ: TransactionKind = TransactionKind::TranslationRead;

    #[test]
    fn pages_share_table_lines_modulo_entries() {
        let table = SharedTableConfig {
            small_entries: 4,
            ..SharedTableConfig::default()
        };
        let translator = SharedTableTranslator::new(table);
        let a = translator.address_of(0x1000, false);
        assert_eq!(a, table.small_base + 64);
        assert_eq!(translator.address_of(0x1fff, false), a);
        assert_eq!(translator.address_of(0x5000, false), a);
        assert_ne!(translator.address_of(0x2000, false), a);
        assert_eq!(translator.address_of(0x0, true), table.large_base());
    }

    #[test]
    fn reverse_lookup_consumes_all_matching_crossings() {
        let table = SharedTableConfig {
            small_entries: 4,
            ..SharedTableConfig::default()
        };
        let mut translator = SharedTableTranslator::new(table);
        let pa = translator.shared_table_address(0x1000, READ, 0, false, true);
        assert_eq!(translator.shared_table_address(0x5000, READ, 0, false, true), pa);
        translator.shared_table_address(0x9000, READ, 1, false, true);
        assert_eq!(translator.pending(), 3);

        assert!(translator.reverse_lookup(pa, READ, 0, false, false).is_empty());
        let woken = translator.reverse_lookup(pa, READ, 0, false, true);
        assert_eq!(woken, vec![0x1000, 0x5000]);
        assert!(translator.reverse_lookup(pa, READ, 0, false, true).is_empty());
        assert_eq!(translator.reverse_lookup(pa, READ, 1, false, true), vec![0x9000]);
        assert_eq!(translator.pending(), 0);
    }

    #[test]
    fn lookup_without_insert_records_nothing() {
        let mut translator = SharedTableTranslator::new(SharedTableConfig::default());
        let pa = translator.shared_table_address(0x1000, READ, 0, false, false);
        assert!(translator.reverse_lookup(pa, READ, 0, false, true).is_empty());
    }

    #[test]
    fn presence_tracks_cores_per_key() {
        let mut presence = PresenceMap::new();
        presence.add(0x40, 0, false, 1);
        presence.add(0x40, 0, false, 0);
        presence.add(0x40, 0, true, 2);
        assert_eq!(presence.cores(0x40, 0, false), vec![0, 1]);
        presence.remove(0x40, 0, false, 1);
        assert_eq!(presence.cores(0x40, 0, false), vec![0]);
        presence.remove(0x40, 0, false, 0);
        assert!(presence.cores(0x40, 0, false).is_empty());
        assert_eq!(presence.len(), 1);
        assert_eq!(presence.clear(0x40, 0, true), vec![2]);
        assert!(presence.is_empty());
        assert!(presence.clear(0x40, 0, true).is_empty());
    }
}
