use log::{debug, info};
use serde::Serialize;

use super::coherence::{CoherenceAction, CoherenceState};
use super::lookup::Ctx;
use super::mshr::LineSlot;
use super::request::{Addr, Request, TransactionKind};
use super::system::MemorySystem;
use super::topology::{CacheId, CacheType, HierId, HierarchyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SnoopOp {
    /// Apply this directory transaction to every private copy.
    Directory(TransactionKind),
    /// Downgrade the origin's exclusive copies to Shared.
    Correction,
}

/// Coherence message queued in a sibling hierarchy's inbox.  `addr` is physical: a data line
/// address or a shared-table address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Snoop {
    pub origin: usize,
    pub addr: Addr,
    pub thread: u64,
    pub is_large: bool,
    pub is_translation: bool,
    pub op: SnoopOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ShootdownOutcome {
    Invalidated { cores: Vec<usize> },
    NothingToInvalidate,
}

impl MemorySystem {
    /// Carry out the action the protocol returned for the line in `slot`.
    pub(crate) fn dispatch(&mut self, id: CacheId, slot: LineSlot, action: CoherenceAction, request: &Request, ctx: Ctx) {
        if action.is_memory_writeback() {
            let line = *self.caches[id].line(slot);
            let addr = self.caches[id].line_addr(slot);
            self.writeback_line(id, addr, &line, ctx);
        } else if let Some(kind) = action.directory_kind() {
            if request.kind.is_directory() {
                return;
            }
            let line = self.caches[id].line(slot);
            let addr = if self.topology.is_physically_addressed(id) {
                self.caches[id].line_addr(slot)
            } else {
                match line.co_tag {
                    Some(pa) => pa,
                    None => return,
                }
            };
            self.broadcast(Snoop {
                origin: ctx.core,
                addr,
                thread: request.thread,
                is_large: request.is_large,
                is_translation: action.is_translation(),
                op: SnoopOp::Directory(kind),
            });
        }
    }

    fn target_hierarchies(&self, core: usize, is_translation: bool) -> Vec<HierId> {
        let mut targets = vec![self.topology.hierarchy_of(core, HierarchyKind::Data)];
        if is_translation {
            targets.push(self.topology.hierarchy_of(core, HierarchyKind::Translation));
        }
        targets
    }

    fn deliver(&mut self, hier: HierId, snoop: Snoop) {
        let inbox = &mut self.hierarchies[hier].inbox;
        if !inbox.contains(&snoop) {
            inbox.push(snoop);
        }
    }

    fn broadcast(&mut self, snoop: Snoop) {
        for core in (0..self.num_cores()).filter(|&core| core != snoop.origin) {
            for hier in self.target_hierarchies(core, snoop.is_translation) {
                self.deliver(hier, snoop);
            }
        }
    }

    /// Private lines of `id` a snoop applies to.  Virtually addressed TLBs are searched by co-tag.
    fn snoop_targets(&self, id: CacheId, snoop: &Snoop) -> Vec<LineSlot> {
        let node = self.topology.node(id);
        if node.cache_type == CacheType::TranslationOnly {
            if !snoop.is_translation || node.is_large != snoop.is_large {
                return Vec::new();
            }
            return self.caches[id].find_by_co_tag(snoop.addr, self.config.shared_table.entry_size, snoop.thread);
        }
        self.caches[id]
            .find(snoop.addr, snoop.thread, snoop.is_translation)
            .into_iter()
            .collect()
    }

    /// Drain the inbox.  Whatever the inbox held, at most one correction leaves per tick.
    pub(crate) fn apply_snoops(&mut self, hier: HierId) {
        let inbox = std::mem::take(&mut self.hierarchies[hier].inbox);
        let mut corrected = false;
        for snoop in inbox {
            let needs_correction = self.apply_snoop(hier, snoop);
            if needs_correction && !corrected {
                self.send_correction(hier, snoop);
                corrected = true;
            }
        }
    }

    fn send_correction(&mut self, hier: HierId, snoop: Snoop) {
        let correction = Snoop {
            origin: self.topology.hierarchy(hier).core,
            op: SnoopOp::Correction,
            ..snoop
        };
        for target in self.target_hierarchies(snoop.origin, snoop.is_translation) {
            self.deliver(target, correction);
        }
    }

    /// Returns whether a read snoop found a live copy, so the reader must be corrected.
    fn apply_snoop(&mut self, hier: HierId, snoop: Snoop) -> bool {
        let core = self.topology.hierarchy(hier).core;
        let ctx = Ctx { core, latency: 0 };
        let mut needs_correction = false;

        for id in self.topology.snoopable_caches(hier) {
            for slot in self.snoop_targets(id, &snoop) {
                match snoop.op {
                    SnoopOp::Correction => {
                        let line = self.caches[id].line_mut(slot);
                        if line.state == CoherenceState::Exclusive {
                            line.state = CoherenceState::Shared;
                            debug!("{}: corrected {:#x} to Shared", self.caches[id].name(), snoop.addr);
                        }
                    }
                    SnoopOp::Directory(kind) => {
                        let before = self.caches[id].line(slot).state;
                        let action = self.caches[id].transition(slot, self.protocol, kind);
                        let line = *self.caches[id].line(slot);
                        debug!(
                            "{}: snoop {:?} {:#x} from core {}: {:?} -> {:?}",
                            self.caches[id].name(),
                            kind,
                            snoop.addr,
                            snoop.origin,
                            before,
                            line.state
                        );
                        if action.is_memory_writeback() {
                            let addr = self.caches[id].line_addr(slot);
                            self.writeback_line(id, addr, &line, ctx);
                        }
                        let is_write = matches!(
                            kind,
                            TransactionKind::DirectoryDataWrite | TransactionKind::DirectoryTranslationWrite
                        );
                        if is_write && line.state == CoherenceState::Invalid {
                            self.caches[id].invalidate(slot);
                            self.forget_translation(id, &line);
                        } else if !is_write && before != CoherenceState::Invalid {
                            needs_correction = true;
                        }
                    }
                }
            }
        }
        needs_correction
    }

    /// Drop a translation from every private TLB of one core.
    pub fn tlb_invalidate(&mut self, core: usize, va: Addr, thread: u64, is_large: bool) -> usize {
        let mut dropped = 0;
        for tlb in self.topology.private_tlbs(core) {
            if self.topology.node(tlb).is_large != is_large {
                continue;
            }
            if let Some(slot) = self.caches[tlb].find(va, thread, true) {
                let line = *self.caches[tlb].line(slot);
                self.caches[tlb].invalidate(slot);
                self.forget_translation(tlb, &line);
                dropped += 1;
            }
        }
        debug!("core {core}: local invalidate of {va:#x} dropped {dropped} entries");
        dropped
    }

    /// Invalidate the translation of `va` in every core the presence map lists for it.
    pub fn shootdown(&mut self, issuer: usize, va: Addr, thread: u64, is_large: bool) -> ShootdownOutcome {
        let pa = self.translators[issuer].shared_table_address(
            va,
            TransactionKind::TranslationWrite,
            thread,
            is_large,
            false,
        );
        let cores = self.presence.clear(pa, thread, is_large);
        if cores.is_empty() {
            info!("core {issuer}: shootdown of {va:#x}: nothing to invalidate");
            return ShootdownOutcome::NothingToInvalidate;
        }
        let granule = self.config.shared_table.entry_size;
        for &core in &cores {
            for tlb in self.topology.private_tlbs(core) {
                if self.topology.node(tlb).is_large != is_large {
                    continue;
                }
                for slot in self.caches[tlb].find_by_co_tag(pa, granule, thread) {
                    self.caches[tlb].invalidate(slot);
                }
            }
        }
        info!("core {issuer}: shootdown of {va:#x} ({pa:#x}) hit cores {cores:?}");
        ShootdownOutcome::Invalidated { cores }
    }

    /// Drop a line from a core's data levels and the shared last level, together with every copy
    /// above them.  Returns the number of lines dropped at those levels.
    pub fn clflush(&mut self, core: usize, addr: Addr, thread: u64, is_translation: bool) -> usize {
        let mut levels = self.topology.private_data_caches(core);
        levels.push(self.topology.data_cache(core, self.topology.data_levels()));
        let mut dropped = 0;
        let mut dirty = false;
        for id in levels {
            let Some(slot) = self.caches[id].find(addr, thread, is_translation) else {
                continue;
            };
            if self.caches[id].line(slot).lock {
                debug!("{}: flush skips in-flight line {:#x}", self.caches[id].name(), addr);
                continue;
            }
            dirty |= self.drop_line(id, slot);
            dropped += 1;
        }
        debug!("core {core}: flush {addr:#x} dropped {dropped} lines (dirty: {dirty})");
        dropped
    }
}
