use log::debug;

use super::cache::{CacheLine, LineFill};
use super::mshr::LineSlot;
use super::request::{Addr, Continuation, CoreTag, LookupStatus, Request, TransactionKind};
use super::system::MemorySystem;
use super::topology::{CacheId, CacheType};
use crate::timeq::Cycle;

/// Who a lookup is performed for and how much latency the levels above already spent.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ctx {
    pub core: usize,
    pub latency: Cycle,
}

impl MemorySystem {
    pub(crate) fn access(&mut self, id: CacheId, request: Request, ctx: Ctx) -> LookupStatus {
        if request.kind.is_writeback() {
            return self.writeback_access(id, request, ctx);
        }
        let found = self.caches[id].find(request.addr, request.thread, request.kind.is_translation());
        let status = match found {
            Some(slot) if !self.caches[id].line(slot).lock => self.hit(id, slot, request.clone(), ctx),
            _ => self.miss(id, found, request.clone(), ctx),
        };
        debug!(
            "{}: {:?} {:#x} thread {} -> {:?}",
            self.caches[id].name(),
            request.kind,
            request.addr,
            request.thread,
            status
        );
        status
    }

    fn hit(&mut self, id: CacheId, slot: LineSlot, request: Request, ctx: Ctx) -> LookupStatus {
        let cache = &mut self.caches[id];
        if request.kind.is_write() {
            cache.line_mut(slot).dirty = true;
        }
        cache.touch(slot);
        let action = cache.transition(slot, self.protocol, request.kind);
        let delay = ctx.latency + cache.latency();
        self.schedule_hit(id, ctx.core, delay, request.clone());
        self.dispatch(id, slot, action, &request, ctx);
        LookupStatus::Hit
    }

    /// `locked` is the slot already holding the line while a miss on it is in flight.
    fn miss(&mut self, id: CacheId, locked: Option<LineSlot>, request: Request, ctx: Ctx) -> LookupStatus {
        let shared = self.topology.is_shared(id);
        let key = request.key(shared);
        let pending = {
            let mshr = self.caches[id].mshr();
            mshr.position(&key)
                .or_else(|| locked.and_then(|slot| mshr.position_for_slot(slot)))
        };
        if let Some(idx) = pending {
            return self.merge(id, idx, request, ctx);
        }
        if let Some(slot) = locked {
            panic!(
                "{}: line {:#x} is locked with no miss in flight",
                self.caches[id].name(),
                self.caches[id].line_addr(slot)
            );
        }

        let set = self.caches[id].layout().index(request.addr);
        if self.caches[id].mshr().is_full() || self.caches[id].victim(set).is_none() {
            return LookupStatus::Retry;
        }

        // Go down first: a refusal further down must leave this level untouched.
        let is_translation = request.kind.is_translation();
        let latency = ctx.latency + self.caches[id].latency();
        let lower = self.topology.lower_cache(id, is_translation, request.is_large);
        if let Some(lower) = lower {
            let status = self.forward(id, lower, &request, Ctx { core: ctx.core, latency });
            if status == LookupStatus::Retry {
                return LookupStatus::Retry;
            }
        }

        let Some(way) = self.caches[id].victim(set) else {
            panic!("{}: set {set} lost its victim while the miss went down", self.caches[id].name());
        };
        let slot = LineSlot { set, way };
        self.evict(id, slot, ctx);

        let co_tag = self.co_tag_for(id, &request);
        let tag = self.caches[id].layout().tag(request.addr);
        self.caches[id].install(
            slot,
            LineFill {
                tag,
                thread: request.thread,
                is_translation,
                is_large: request.is_large,
                dirty: request.kind.is_write(),
                lock: true,
                co_tag,
            },
        );
        let Ok(entry) = self.caches[id].mshr_mut().allocate(key, slot, tag, request.clone()) else {
            panic!("{}: miss tracker overflow", self.caches[id].name());
        };
        self.note_translation(id, &request, co_tag);

        if lower.is_none() {
            self.schedule_memory(id, ctx.core, latency, entry, request.clone());
        }

        let action = self.caches[id].transition(slot, self.protocol, request.kind);
        self.dispatch(id, slot, action, &request, ctx);
        LookupStatus::Miss
    }

    fn merge(&mut self, id: CacheId, idx: usize, request: Request, ctx: Ctx) -> LookupStatus {
        let cache = &mut self.caches[id];
        let (slot, tag, is_translation) = {
            let entry = cache.mshr().entry(idx);
            (entry.slot(), entry.tag(), entry.is_translation())
        };
        let line = cache.line(slot);
        assert!(
            line.tag == tag && line.is_translation == is_translation,
            "{}: miss tracker entry points at a reused slot",
            cache.name()
        );
        if request.kind.is_write() {
            cache.line_mut(slot).dirty = true;
        }
        cache.mshr_mut().merge(idx, request.clone());
        let action = cache.transition(slot, self.protocol, request.kind);
        self.dispatch(id, slot, action, &request, ctx);
        LookupStatus::MshrHit
    }

    /// Pass a miss to the next level, crossing into the shared-table address space when it leaves
    /// a private TLB for the data hierarchy.
    fn forward(&mut self, from: CacheId, lower: CacheId, request: &Request, ctx: Ctx) -> LookupStatus {
        let mut down = request.clone();
        down.continuation = Continuation::Silent;
        let crossing = self.leaves_private_tlb(from, lower);
        let owner = self.topology.node(from).owner.unwrap_or(ctx.core);
        if crossing {
            down.addr = self.translators[owner].shared_table_address(
                request.addr,
                request.kind,
                request.thread,
                request.is_large,
                false,
            );
        }
        let status = self.access(lower, down, ctx);
        if crossing && status.accepted() && !request.kind.is_writeback() {
            self.translators[owner].shared_table_address(
                request.addr,
                request.kind,
                request.thread,
                request.is_large,
                true,
            );
        }
        status
    }

    fn leaves_private_tlb(&self, from: CacheId, lower: CacheId) -> bool {
        self.topology.node(from).cache_type == CacheType::TranslationOnly
            && self.topology.node(lower).cache_type == CacheType::Data
    }

    fn is_private_tlb(&self, id: CacheId) -> bool {
        let node = self.topology.node(id);
        node.cache_type == CacheType::TranslationOnly && node.owner.is_some()
    }

    fn co_tag_for(&mut self, id: CacheId, request: &Request) -> Option<Addr> {
        if !self.is_private_tlb(id) || !request.kind.is_translation() {
            return None;
        }
        let owner = self.topology.node(id).owner?;
        Some(self.translators[owner].shared_table_address(
            request.addr,
            request.kind,
            request.thread,
            request.is_large,
            false,
        ))
    }

    fn note_translation(&mut self, id: CacheId, request: &Request, co_tag: Option<Addr>) {
        if let (Some(pa), Some(core)) = (co_tag, self.topology.node(id).owner) {
            self.presence.add(pa, request.thread, request.is_large, core);
        }
    }

    /// A writeback never allocates a miss: it either finds its line, or takes a victim and installs
    /// a dirty copy, or passes further down when every way is in flight.
    fn writeback_access(&mut self, id: CacheId, request: Request, ctx: Ctx) -> LookupStatus {
        let is_translation = request.kind.is_translation();
        if let Some(slot) = self.caches[id].find(request.addr, request.thread, is_translation) {
            let cache = &mut self.caches[id];
            cache.line_mut(slot).dirty = true;
            cache.transition(slot, self.protocol, request.kind);
            return if cache.line(slot).lock {
                LookupStatus::MshrHitAndLocked
            } else {
                LookupStatus::Hit
            };
        }

        let set = self.caches[id].layout().index(request.addr);
        let Some(way) = self.caches[id].victim(set) else {
            return match self.topology.lower_cache(id, is_translation, request.is_large) {
                Some(lower) => self.forward(id, lower, &request, ctx),
                None => {
                    debug!("{}: writeback {:#x} absorbed by memory", self.caches[id].name(), request.addr);
                    LookupStatus::Miss
                }
            };
        };
        let slot = LineSlot { set, way };
        self.evict(id, slot, ctx);
        let co_tag = self.co_tag_for(id, &request);
        let tag = self.caches[id].layout().tag(request.addr);
        self.caches[id].install(
            slot,
            LineFill {
                tag,
                thread: request.thread,
                is_translation,
                is_large: request.is_large,
                dirty: true,
                lock: false,
                co_tag,
            },
        );
        self.note_translation(id, &request, co_tag);
        self.caches[id].transition(slot, self.protocol, request.kind);
        LookupStatus::Miss
    }

    /// Remove the line in `slot`, invalidating copies above it first when the hierarchy is
    /// inclusive and writing it back when it is dirty or a translation.
    pub(crate) fn evict(&mut self, id: CacheId, slot: LineSlot, ctx: Ctx) {
        let line = *self.caches[id].line(slot);
        if !line.valid {
            return;
        }
        let addr = self.caches[id].line_addr(slot);
        debug!("{}: evict {:#x} ({:?})", self.caches[id].name(), addr, line.state);

        let mut dirty = line.dirty;
        if self.config.inclusive {
            dirty |= self.invalidate_above(id, addr, &line);
        }
        if dirty || line.is_translation {
            let status = self.writeback_line(id, addr, &line, ctx);
            if self.config.inclusive {
                if let Some(status) = status {
                    assert!(
                        matches!(status, LookupStatus::Hit | LookupStatus::MshrHitAndLocked),
                        "{}: writeback of {:#x} missed below an inclusive level ({:?})",
                        self.caches[id].name(),
                        addr,
                        status
                    );
                }
            }
        }
        self.caches[id].invalidate(slot);
        self.forget_translation(id, &line);
    }

    /// Write `line`, resident at `addr` in `id`, back to the next level.  `None` when it went to
    /// memory.  Leaving a private TLB the line travels under its shared-table address.
    pub(crate) fn writeback_line(&mut self, id: CacheId, addr: Addr, line: &CacheLine, ctx: Ctx) -> Option<LookupStatus> {
        let Some(lower) = self.topology.lower_cache(id, line.is_translation, line.is_large) else {
            debug!("{}: writeback {:#x} to memory", self.caches[id].name(), addr);
            return None;
        };
        let target = if self.leaves_private_tlb(id, lower) {
            match line.co_tag {
                Some(pa) => pa,
                None => panic!("{}: translation line {:#x} has no co-tag", self.caches[id].name(), addr),
            }
        } else {
            addr
        };
        let writeback = Request::silent(
            target,
            TransactionKind::writeback(line.is_translation),
            line.thread,
            line.is_large,
            CoreTag::Core(ctx.core),
        );
        debug!(
            "{}: writeback {:#x} -> {} {:#x}",
            self.caches[id].name(),
            addr,
            self.caches[lower].name(),
            target
        );
        Some(self.access(lower, writeback, Ctx { core: ctx.core, latency: 0 }))
    }

    /// Drop every copy of `line` held above `id`.  Returns whether any of them was dirty.
    pub(crate) fn invalidate_above(&mut self, id: CacheId, addr: Addr, line: &CacheLine) -> bool {
        let mut dirty = false;
        for upper in self.topology.higher_caches(id, line.is_translation) {
            let node = self.topology.node(upper);
            if node.cache_type == CacheType::TranslationOnly && node.is_large != line.is_large {
                continue;
            }
            let slots = if self.crosses_into_virtual(id, upper) {
                let granule = self.caches[id].layout().line_size();
                self.caches[upper].find_by_co_tag(addr, granule, line.thread)
            } else {
                self.caches[upper]
                    .find(addr, line.thread, line.is_translation)
                    .into_iter()
                    .collect()
            };
            for slot in slots {
                dirty |= self.drop_line(upper, slot);
            }
        }
        dirty
    }

    /// Invalidate one line and everything above it.  Returns whether any dropped copy was dirty.
    pub(crate) fn drop_line(&mut self, id: CacheId, slot: LineSlot) -> bool {
        let line = *self.caches[id].line(slot);
        let addr = self.caches[id].line_addr(slot);
        let dirty = self.invalidate_above(id, addr, &line) | line.dirty;
        debug!("{}: back-invalidate {:#x}", self.caches[id].name(), addr);
        self.caches[id].invalidate(slot);
        self.forget_translation(id, &line);
        dirty
    }

    /// After a private TLB lost `line`, drop the core from the presence map unless another of its
    /// private TLBs still holds the translation.
    pub(crate) fn forget_translation(&mut self, id: CacheId, line: &CacheLine) {
        let (Some(pa), Some(core)) = (line.co_tag, self.topology.node(id).owner) else {
            return;
        };
        if !self.is_private_tlb(id) || self.core_caches_translation(core, pa, line.thread, line.is_large) {
            return;
        }
        debug!("core {core}: translation {pa:#x} no longer cached");
        self.presence.remove(pa, line.thread, line.is_large, core);
    }

    pub(crate) fn core_caches_translation(&self, core: usize, pa: Addr, thread: u64, is_large: bool) -> bool {
        let granule = self.config.shared_table.entry_size;
        self.topology
            .private_tlbs(core)
            .into_iter()
            .filter(|&tlb| self.topology.node(tlb).is_large == is_large)
            .any(|tlb| !self.caches[tlb].find_by_co_tag(pa, granule, thread).is_empty())
    }
}
