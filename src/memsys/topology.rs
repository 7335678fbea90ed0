use serde::{Deserialize, Serialize};

pub type CacheId = usize;
pub type HierId = usize;

/// `Data` caches hold data lines and the shared-table lines translations are fetched from;
/// `TranslationOnly` caches are TLBs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheType {
    Data,
    TranslationOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyKind {
    Data,
    Translation,
}

#[derive(Debug, Clone)]
pub struct CacheNode {
    /// 1-based level inside its hierarchy.
    pub level: usize,
    pub cache_type: CacheType,
    /// Large-page half of a TLB level.
    pub is_large: bool,
    /// `None` for the structures every core shares.
    pub owner: Option<usize>,
    pub higher: Vec<CacheId>,
}

#[derive(Debug, Clone)]
pub struct HierarchyLayout {
    pub kind: HierarchyKind,
    pub core: usize,
    /// Top to bottom.  Translation hierarchies list (small, large) per level.
    pub caches: Vec<CacheId>,
}

/// Index tables replacing pointer links between caches.  Every core owns a data hierarchy and a
/// translation hierarchy; the last data level and the last TLB pair are shared by all cores.
#[derive(Debug, Clone)]
pub struct Topology {
    num_cores: usize,
    data_levels: usize,
    tlb_levels: usize,
    nodes: Vec<CacheNode>,
    hierarchies: Vec<HierarchyLayout>,
    // [core][level - 1]
    data: Vec<Vec<CacheId>>,
    // [core][level - 1][is_large]
    tlb: Vec<Vec<[CacheId; 2]>>,
}

impl Topology {
    pub fn build(num_cores: usize, data_levels: usize, tlb_levels: usize) -> Self {
        assert!(num_cores > 0, "at least one core is required");
        assert!(data_levels >= 2, "data hierarchy needs at least two levels");
        assert!(tlb_levels >= 2, "translation hierarchy needs at least two levels");

        let mut nodes = Vec::new();
        let mut alloc = |level, cache_type, is_large, owner| {
            nodes.push(CacheNode {
                level,
                cache_type,
                is_large,
                owner,
                higher: Vec::new(),
            });
            nodes.len() - 1
        };

        let llc = alloc(data_levels, CacheType::Data, false, None);
        let last_tlb = [
            alloc(tlb_levels, CacheType::TranslationOnly, false, None),
            alloc(tlb_levels, CacheType::TranslationOnly, true, None),
        ];

        let mut data = Vec::with_capacity(num_cores);
        let mut tlb = Vec::with_capacity(num_cores);
        for core in 0..num_cores {
            let mut levels: Vec<CacheId> = (1..data_levels)
                .map(|level| alloc(level, CacheType::Data, false, Some(core)))
                .collect();
            levels.push(llc);
            data.push(levels);

            let mut pairs: Vec<[CacheId; 2]> = (1..tlb_levels)
                .map(|level| {
                    [
                        alloc(level, CacheType::TranslationOnly, false, Some(core)),
                        alloc(level, CacheType::TranslationOnly, true, Some(core)),
                    ]
                })
                .collect();
            pairs.push(last_tlb);
            tlb.push(pairs);
        }

        let mut topology = Self {
            num_cores,
            data_levels,
            tlb_levels,
            nodes,
            hierarchies: Vec::with_capacity(2 * num_cores),
            data,
            tlb,
        };
        topology.link();
        topology
    }

    fn link(&mut self) {
        let n = self.data_levels;
        let m = self.tlb_levels;
        for core in 0..self.num_cores {
            for k in 1..n - 1 {
                let upper = self.data[core][k - 1];
                self.nodes[self.data[core][k]].higher.push(upper);
            }
            let penultimate = self.data[core][n - 2];
            let tlb_penultimate = self.tlb[core][m - 2];
            self.nodes[penultimate].higher.extend(tlb_penultimate);
            let llc = self.data[core][n - 1];
            self.nodes[llc].higher.push(penultimate);

            for level in 1..m - 1 {
                let upper = self.tlb[core][level - 1];
                for id in self.tlb[core][level] {
                    self.nodes[id].higher.extend(upper);
                }
            }

            self.hierarchies.push(HierarchyLayout {
                kind: HierarchyKind::Data,
                core,
                caches: self.data[core].clone(),
            });
            self.hierarchies.push(HierarchyLayout {
                kind: HierarchyKind::Translation,
                core,
                caches: self.tlb[core].iter().flatten().copied().collect(),
            });
        }
        let llc = self.data[0][n - 1];
        for id in self.tlb[0][m - 1] {
            self.nodes[id].higher.push(llc);
        }
    }

    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    pub fn data_levels(&self) -> usize {
        self.data_levels
    }

    pub fn tlb_levels(&self) -> usize {
        self.tlb_levels
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: CacheId) -> &CacheNode {
        &self.nodes[id]
    }

    pub fn hierarchies(&self) -> &[HierarchyLayout] {
        &self.hierarchies
    }

    pub fn hierarchy(&self, id: HierId) -> &HierarchyLayout {
        &self.hierarchies[id]
    }

    pub fn hierarchy_of(&self, core: usize, kind: HierarchyKind) -> HierId {
        assert!(core < self.num_cores, "core {core} out of range");
        match kind {
            HierarchyKind::Data => 2 * core,
            HierarchyKind::Translation => 2 * core + 1,
        }
    }

    pub fn data_cache(&self, core: usize, level: usize) -> CacheId {
        self.data[core][level - 1]
    }

    pub fn tlb(&self, core: usize, level: usize, is_large: bool) -> CacheId {
        self.tlb[core][level - 1][is_large as usize]
    }

    /// First cache a request of `kind` meets in a core's hierarchy.
    pub fn entry_cache(&self, core: usize, kind: HierarchyKind, is_large: bool) -> CacheId {
        match kind {
            HierarchyKind::Data => self.data_cache(core, 1),
            HierarchyKind::Translation => self.tlb(core, 1, is_large),
        }
    }

    pub fn is_shared(&self, id: CacheId) -> bool {
        self.nodes[id].owner.is_none()
    }

    pub fn is_penultimate_tlb(&self, id: CacheId) -> bool {
        let node = &self.nodes[id];
        node.cache_type == CacheType::TranslationOnly && node.level + 1 == self.tlb_levels
    }

    /// Private TLBs are indexed by virtual address; everything else sees shared-table or data
    /// addresses.
    pub fn is_physically_addressed(&self, id: CacheId) -> bool {
        let node = &self.nodes[id];
        node.cache_type == CacheType::Data || node.owner.is_none()
    }

    /// Next cache a request of the given class continues to, `None` meaning memory.  Panics
    /// when the class cannot legally reach this cache.
    pub fn lower_cache(&self, id: CacheId, is_translation: bool, is_large: bool) -> Option<CacheId> {
        let node = &self.nodes[id];
        match node.cache_type {
            CacheType::Data => {
                if node.level < self.data_levels {
                    let owner = node.owner.expect("private data level has an owner");
                    Some(self.data[owner][node.level])
                } else if is_translation {
                    Some(self.tlb[0][self.tlb_levels - 1][is_large as usize])
                } else {
                    None
                }
            }
            CacheType::TranslationOnly => {
                assert!(
                    is_translation,
                    "data transaction routed to translation-only cache {id} (level {})",
                    node.level
                );
                if node.level == self.tlb_levels {
                    None
                } else {
                    let owner = node.owner.expect("private TLB level has an owner");
                    if self.is_penultimate_tlb(id) {
                        Some(self.data[owner][self.data_levels - 2])
                    } else {
                        Some(self.tlb[owner][node.level][is_large as usize])
                    }
                }
            }
        }
    }

    /// Caches directly above `id` that can hold a line of the given class.
    pub fn higher_caches(&self, id: CacheId, is_translation: bool) -> Vec<CacheId> {
        self.nodes[id]
            .higher
            .iter()
            .copied()
            .filter(|&upper| is_translation || self.nodes[upper].cache_type == CacheType::Data)
            .collect()
    }

    /// Hierarchy whose queues hold completions scheduled at `id` on behalf of `core`.
    pub fn scheduling_hierarchy(&self, id: CacheId, core: usize) -> HierId {
        let node = &self.nodes[id];
        let kind = match node.cache_type {
            CacheType::Data => HierarchyKind::Data,
            CacheType::TranslationOnly => HierarchyKind::Translation,
        };
        self.hierarchy_of(node.owner.unwrap_or(core), kind)
    }

    /// Levels of a hierarchy that receive snoops: everything except the shared bottom.
    pub fn snoopable_caches(&self, hier: HierId) -> Vec<CacheId> {
        self.hierarchies[hier]
            .caches
            .iter()
            .copied()
            .filter(|&id| !self.is_shared(id))
            .collect()
    }

    /// Private TLBs of one core, top level first.
    pub fn private_tlbs(&self, core: usize) -> Vec<CacheId> {
        self.tlb[core][..self.tlb_levels - 1]
            .iter()
            .flatten()
            .copied()
            .collect()
    }

    /// Private data levels of one core, top level first.
    pub fn private_data_caches(&self, core: usize) -> Vec<CacheId> {
        self.data[core][..self.data_levels - 1].to_vec()
    }

    pub fn name(&self, id: CacheId) -> String {
        let node = &self.nodes[id];
        let owner = node
            .owner
            .map(|core| format!("core{core}"))
            .unwrap_or_else(|| "shared".to_string());
        match node.cache_type {
            CacheType::Data => format!("{owner}.L{}D", node.level),
            CacheType::TranslationOnly => format!(
                "{owner}.L{}TLB.{}",
                node.level,
                if node.is_large { "large" } else { "small" }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_levels_are_allocated_once() {
        let topo = Topology::build(2, 3, 3);
        assert_eq!(topo.data_cache(0, 3), topo.data_cache(1, 3));
        assert_eq!(topo.tlb(0, 3, true), topo.tlb(1, 3, true));
        assert_ne!(topo.data_cache(0, 2), topo.data_cache(1, 2));
        // 3 shared + per core (2 data + 4 tlb)
        assert_eq!(topo.len(), 3 + 2 * 6);
        assert!(topo.is_shared(topo.data_cache(1, 3)));
    }

    #[test]
    fn lower_links_follow_the_boundaries() {
        let topo = Topology::build(2, 3, 3);
        let l1d = topo.data_cache(1, 1);
        let l2d = topo.data_cache(1, 2);
        let llc = topo.data_cache(1, 3);
        assert_eq!(topo.lower_cache(l1d, false, false), Some(l2d));
        assert_eq!(topo.lower_cache(llc, false, false), None);
        assert_eq!(topo.lower_cache(llc, true, false), Some(topo.tlb(0, 3, false)));
        assert_eq!(topo.lower_cache(llc, true, true), Some(topo.tlb(0, 3, true)));
        assert_eq!(topo.lower_cache(topo.tlb(1, 1, true), true, true), Some(topo.tlb(1, 2, true)));
        assert_eq!(topo.lower_cache(topo.tlb(1, 2, false), true, false), Some(l2d));
        assert_eq!(topo.lower_cache(topo.tlb(1, 3, false), true, false), None);
        assert!(topo.is_penultimate_tlb(topo.tlb(1, 2, true)));
        assert!(!topo.is_penultimate_tlb(topo.tlb(1, 1, true)));
    }

    #[test]
    #[should_panic(expected = "translation-only")]
    fn data_request_at_tlb_is_fatal() {
        let topo = Topology::build(1, 2, 2);
        topo.lower_cache(topo.tlb(0, 1, false), false, false);
    }

    #[test]
    fn higher_links_cross_into_translation_hierarchy() {
        let topo = Topology::build(2, 3, 3);
        let l2d = topo.data_cache(0, 2);
        let uppers = topo.higher_caches(l2d, true);
        assert!(uppers.contains(&topo.data_cache(0, 1)));
        assert!(uppers.contains(&topo.tlb(0, 2, false)));
        assert!(uppers.contains(&topo.tlb(0, 2, true)));
        assert_eq!(topo.higher_caches(l2d, false), vec![topo.data_cache(0, 1)]);

        let llc = topo.data_cache(0, 3);
        assert_eq!(
            topo.higher_caches(llc, false),
            vec![topo.data_cache(0, 2), topo.data_cache(1, 2)]
        );
        assert_eq!(topo.higher_caches(topo.tlb(0, 3, false), true), vec![llc]);
        assert_eq!(topo.higher_caches(topo.tlb(1, 2, false), true).len(), 2);
        assert!(topo.higher_caches(topo.tlb(1, 1, false), true).is_empty());
    }

    #[test]
    fn two_level_data_hierarchy_puts_l1_under_the_tlbs() {
        let topo = Topology::build(1, 2, 2);
        assert_eq!(
            topo.lower_cache(topo.tlb(0, 1, false), true, false),
            Some(topo.data_cache(0, 1))
        );
        assert_eq!(topo.higher_caches(topo.data_cache(0, 1), true).len(), 2);
    }

    #[test]
    fn hierarchies_and_scheduling() {
        let topo = Topology::build(2, 3, 3);
        let h = topo.hierarchy_of(1, HierarchyKind::Translation);
        assert_eq!(topo.hierarchy(h).core, 1);
        assert_eq!(topo.hierarchy(h).caches.len(), 6);
        assert_eq!(topo.snoopable_caches(h).len(), 4);
        let llc = topo.data_cache(0, 3);
        assert_eq!(topo.scheduling_hierarchy(llc, 1), topo.hierarchy_of(1, HierarchyKind::Data));
        assert_eq!(
            topo.scheduling_hierarchy(topo.tlb(0, 1, false), 1),
            topo.hierarchy_of(0, HierarchyKind::Translation)
        );
        assert_eq!(topo.name(topo.tlb(1, 2, true)), "core1.L2TLB.large");
        assert_eq!(topo.name(llc), "shared.L3D");
    }
}
