/// Least-recently-used ranking of the ways in every set.
#[derive(Debug, Clone)]
pub struct LruPolicy {
    ways: usize,
    // most recently used first
    order: Vec<Vec<usize>>,
}

impl LruPolicy {
    pub fn new(sets: usize, ways: usize) -> Self {
        assert!(sets > 0, "sets must be > 0");
        assert!(ways > 0, "ways must be > 0");
        Self {
            ways,
            order: (0..sets).map(|_| (0..ways).collect()).collect(),
        }
    }

    pub fn touch(&mut self, set: usize, way: usize) {
        assert!(way < self.ways, "way {way} out of range");
        let order = &mut self.order[set];
        if let Some(pos) = order.iter().position(|&idx| idx == way) {
            order.remove(pos);
        }
        order.insert(0, way);
    }

    /// Least recently used way among those `evictable` accepts.
    pub fn victim(&self, set: usize, evictable: impl Fn(usize) -> bool) -> Option<usize> {
        self.order[set].iter().rev().copied().find(|&way| evictable(way))
    }

    /// Recency position of `way`, 0 being most recent.
    pub fn position(&self, set: usize, way: usize) -> usize {
        self.order[set]
            .iter()
            .position(|&idx| idx == way)
            .expect("every way is ranked")
    }
}

#[cfg(test)]
mod tests {
    use super::LruPolicy;

    #[test]
    fn untouched_set_evicts_highest_way_last() {
        let lru = LruPolicy::new(1, 4);
        assert_eq!(lru.victim(0, |_| true), Some(3));
    }

    #[test]
    fn touch_moves_way_to_front() {
        let mut lru = LruPolicy::new(2, 3);
        lru.touch(1, 2);
        lru.touch(1, 0);
        assert_eq!(lru.position(1, 0), 0);
        assert_eq!(lru.position(1, 2), 1);
        assert_eq!(lru.victim(1, |_| true), Some(1));
        // other sets are untouched
        assert_eq!(lru.victim(0, |_| true), Some(2));
    }

    #[test]
    fn victim_skips_rejected_ways() {
        let mut lru = LruPolicy::new(1, 2);
        lru.touch(0, 0);
        lru.touch(0, 1);
        assert_eq!(lru.victim(0, |way| way != 0), Some(1));
        assert_eq!(lru.victim(0, |_| false), None);
    }

    #[test]
    fn single_way_always_victim() {
        let mut lru = LruPolicy::new(1, 1);
        lru.touch(0, 0);
        assert_eq!(lru.victim(0, |_| true), Some(0));
    }
}
