use std::collections::VecDeque;

use log::{debug, info};
use smallvec::{smallvec, SmallVec};

use super::cache::{Cache, LineSnapshot};
use super::coherence::Protocol;
use super::config::SystemConfig;
use super::lookup::Ctx;
use super::mshr::{MshrEntry, MshrId};
use super::request::{Addr, Completion, Continuation, LookupStatus, Request};
use super::snoop::Snoop;
use super::topology::{CacheId, CacheType, HierId, HierarchyKind, Topology};
use super::translate::{AddressTranslator, PresenceMap, PresenceTracker, SharedTableTranslator};
use crate::timeq::{Cycle, DeadlineQueue, Ticket};

/// What a deadline completes at the cache that scheduled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wakeup {
    /// The line was already there; nothing is outstanding in the miss tracker.
    Hit,
    /// Memory answered the miss that allocated this entry.
    Fill(MshrId),
}

#[derive(Debug, Clone)]
pub(crate) struct Scheduled {
    pub cache: CacheId,
    pub wakeup: Wakeup,
    pub request: Request,
}

/// Per-hierarchy scheduler state: its own clock, the two completion queues and the inbox of
/// snoops sent by sibling hierarchies.
#[derive(Debug, Default)]
pub(crate) struct Hierarchy {
    pub clock: Cycle,
    pub hit_list: DeadlineQueue<Scheduled>,
    pub wait_list: DeadlineQueue<Scheduled>,
    pub inbox: Vec<Snoop>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Finish {
    pub ticket: Ticket,
    pub now: Cycle,
}

pub struct MemorySystem {
    pub(crate) config: SystemConfig,
    pub(crate) protocol: Protocol,
    pub(crate) topology: Topology,
    pub(crate) caches: Vec<Cache>,
    pub(crate) hierarchies: Vec<Hierarchy>,
    pub(crate) translators: Vec<Box<dyn AddressTranslator>>,
    pub(crate) presence: Box<dyn PresenceTracker>,
    completions: Vec<VecDeque<Completion>>,
}

impl MemorySystem {
    pub fn new(config: SystemConfig) -> Self {
        let translators = (0..config.num_cores)
            .map(|_| Box::new(SharedTableTranslator::new(config.shared_table)) as Box<dyn AddressTranslator>)
            .collect();
        Self::with_collaborators(config, translators, Box::new(PresenceMap::new()))
    }

    /// Build with caller-supplied address translators (one per core) and presence tracker.
    pub fn with_collaborators(
        config: SystemConfig,
        translators: Vec<Box<dyn AddressTranslator>>,
        presence: Box<dyn PresenceTracker>,
    ) -> Self {
        config.ensure_valid();
        assert_eq!(
            translators.len(),
            config.num_cores,
            "one address translator per core is required"
        );
        let topology = Topology::build(config.num_cores, config.data.len(), config.tlb.len());
        let caches = (0..topology.len())
            .map(|id| {
                let node = topology.node(id);
                let level = match node.cache_type {
                    CacheType::Data => &config.data[node.level - 1],
                    CacheType::TranslationOnly => config.tlb[node.level - 1].side(node.is_large),
                };
                Cache::new(topology.name(id), level)
            })
            .collect();
        let hierarchies = topology
            .hierarchies()
            .iter()
            .map(|_| Hierarchy::default())
            .collect();
        info!(
            "memory system: {} cores, {} data levels, {} translation levels, {} caches",
            config.num_cores,
            config.data.len(),
            config.tlb.len(),
            topology.len()
        );
        Self {
            protocol: config.protocol,
            completions: vec![VecDeque::new(); config.num_cores],
            config,
            topology,
            caches,
            hierarchies,
            translators,
            presence,
        }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn cache(&self, id: CacheId) -> &Cache {
        &self.caches[id]
    }

    pub fn presence(&self) -> &dyn PresenceTracker {
        self.presence.as_ref()
    }

    pub fn num_cores(&self) -> usize {
        self.topology.num_cores()
    }

    pub fn clock(&self, hier: HierId) -> Cycle {
        self.hierarchies[hier].clock
    }

    /// Send `request` into the hierarchy its kind belongs to: translation kinds start at the
    /// core's first-level TLB of the request's page size, everything else at the data L1.
    pub fn issue(&mut self, core: usize, request: Request) -> LookupStatus {
        let kind = if request.kind.is_translation() {
            HierarchyKind::Translation
        } else {
            HierarchyKind::Data
        };
        self.issue_to(kind, core, request)
    }

    pub fn issue_to(&mut self, kind: HierarchyKind, core: usize, request: Request) -> LookupStatus {
        let entry = self.topology.entry_cache(core, kind, request.is_large);
        self.access(entry, request, Ctx { core, latency: 0 })
    }

    /// Look `request` up directly at one cache.
    pub fn lookup(&mut self, id: CacheId, request: Request) -> LookupStatus {
        let core = self
            .topology
            .node(id)
            .owner
            .or(request.core.id())
            .unwrap_or(0);
        self.access(id, request, Ctx { core, latency: 0 })
    }

    /// Side-effect free presence check.
    pub fn lookup_cache(&self, id: CacheId, addr: Addr, thread: u64, is_translation: bool) -> bool {
        self.caches[id].find(addr, thread, is_translation).is_some()
    }

    pub fn pop_completion(&mut self, core: usize) -> Option<Completion> {
        self.completions[core].pop_front()
    }

    /// Nothing scheduled, nothing in flight and no snoop waiting anywhere.
    pub fn is_done(&self) -> bool {
        self.hierarchies
            .iter()
            .all(|h| h.hit_list.is_empty() && h.wait_list.is_empty() && h.inbox.is_empty())
            && self.caches.iter().all(|cache| cache.mshr().is_empty())
    }

    pub fn resident_lines(&self, id: CacheId) -> Vec<LineSnapshot> {
        self.caches[id].resident_lines()
    }

    pub fn tick(&mut self) {
        for core in 0..self.num_cores() {
            self.tick_core(core);
        }
    }

    /// Advance both hierarchies of one core by a cycle, translation first.
    pub fn tick_core(&mut self, core: usize) {
        self.tick_hierarchy(self.topology.hierarchy_of(core, HierarchyKind::Translation));
        self.tick_hierarchy(self.topology.hierarchy_of(core, HierarchyKind::Data));
    }

    pub fn tick_hierarchy(&mut self, hier: HierId) {
        self.apply_snoops(hier);

        let now = self.hierarchies[hier].clock;
        let mut due = self.hierarchies[hier].hit_list.drain_ready(now);
        due.extend(self.hierarchies[hier].wait_list.drain_ready(now));
        for (ticket, item) in due {
            self.wake(item, Finish { ticket, now });
        }

        self.hierarchies[hier].clock += 1;
    }

    pub(crate) fn schedule_hit(&mut self, id: CacheId, core: usize, delay: Cycle, request: Request) -> Ticket {
        let hier = self.topology.scheduling_hierarchy(id, core);
        let h = &mut self.hierarchies[hier];
        let item = Scheduled {
            cache: id,
            wakeup: Wakeup::Hit,
            request,
        };
        h.hit_list.schedule(h.clock, delay, item)
    }

    pub(crate) fn schedule_memory(
        &mut self,
        id: CacheId,
        core: usize,
        delay: Cycle,
        entry: MshrId,
        request: Request,
    ) -> Ticket {
        let hier = self.topology.scheduling_hierarchy(id, core);
        let h = &mut self.hierarchies[hier];
        let item = Scheduled {
            cache: id,
            wakeup: Wakeup::Fill(entry),
            request,
        };
        h.wait_list.schedule(h.clock, delay + self.config.memory_latency, item)
    }

    /// Physical side of a cache pair whose upper half is a virtually addressed TLB.
    pub(crate) fn crosses_into_virtual(&self, lower: CacheId, upper: CacheId) -> bool {
        self.topology.is_physically_addressed(lower) && !self.topology.is_physically_addressed(upper)
    }

    /// A deadline came due.  A hit only carries its request upward; a fill releases exactly the
    /// entry that scheduled it, whatever else has since been allocated under the same key.
    fn wake(&mut self, item: Scheduled, fin: Finish) {
        let requests: SmallVec<[Request; 2]> = match item.wakeup {
            Wakeup::Hit => smallvec![item.request],
            Wakeup::Fill(entry) => match self.caches[item.cache].mshr_mut().remove(entry) {
                Some(entry) => self.unlock(item.cache, entry, item.request.addr),
                None => panic!(
                    "{}: fill for {:#x} found its miss entry gone",
                    self.caches[item.cache].name(),
                    item.request.addr
                ),
            },
        };
        for waiting in requests {
            self.carry_up(item.cache, waiting, fin);
        }
    }

    fn unlock(&mut self, id: CacheId, entry: MshrEntry, addr: Addr) -> SmallVec<[Request; 2]> {
        let cache = &mut self.caches[id];
        let line = cache.line_mut(entry.slot());
        if line.tag == entry.tag() && line.is_translation == entry.is_translation() {
            line.lock = false;
        }
        debug!(
            "{}: release {:#x} ({} waiting)",
            cache.name(),
            addr,
            entry.requests().len()
        );
        entry.into_requests()
    }

    /// Release the miss `request` was waiting on at `id`, if there is one, and carry the release
    /// further up.
    fn release(&mut self, id: CacheId, request: &Request, fin: Finish) -> bool {
        let shared = self.topology.is_shared(id);
        let Some(entry) = self.caches[id].mshr_mut().remove_matching(&request.key(shared)) else {
            return false;
        };
        for waiting in self.unlock(id, entry, request.addr) {
            self.carry_up(id, waiting, fin);
        }
        true
    }

    /// Hand a released request to the levels above `id`.  A release that nobody above claims
    /// finishes the request here.
    fn carry_up(&mut self, id: CacheId, waiting: Request, fin: Finish) {
        let mut handled = false;
        for upper in self.topology.higher_caches(id, waiting.kind.is_translation()) {
            if self.crosses_into_virtual(id, upper) {
                let node = self.topology.node(upper);
                let Some(owner) = node.owner else { continue };
                let want_small = !node.is_large;
                let vas = self.translators[owner].reverse_lookup(
                    waiting.addr,
                    waiting.kind,
                    waiting.thread,
                    waiting.is_large,
                    want_small,
                );
                for va in vas {
                    handled |= self.release(upper, &waiting.with_addr(va), fin);
                }
            } else {
                handled |= self.release(upper, &waiting, fin);
            }
        }
        if !handled {
            self.finish(waiting, fin);
        }
    }

    fn finish(&mut self, request: Request, fin: Finish) {
        match request.continuation {
            Continuation::Retire { core } => {
                debug!("core {core}: {:?} {:#x} complete at {}", request.kind, request.addr, fin.now);
                self.completions[core].push_back(Completion {
                    request,
                    ticket: fin.ticket,
                    completed_at: fin.now,
                });
            }
            Continuation::Silent => {
                debug!("{:?} {:#x} released silently", request.kind, request.addr);
            }
        }
    }
}
