use super::request::Addr;

/// Splits a flat address into offset, set index and tag for one cache geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressLayout {
    offset_bits: u32,
    index_bits: u32,
}

impl AddressLayout {
    pub fn new(line_size: u64, num_sets: u64) -> Self {
        assert!(
            line_size.is_power_of_two(),
            "line size must be a power of two, got {line_size}"
        );
        assert!(
            num_sets.is_power_of_two(),
            "set count must be a power of two, got {num_sets}"
        );
        Self {
            offset_bits: line_size.trailing_zeros(),
            index_bits: num_sets.trailing_zeros(),
        }
    }

    pub fn line_size(&self) -> u64 {
        1 << self.offset_bits
    }

    pub fn num_sets(&self) -> usize {
        1 << self.index_bits
    }

    pub fn offset(&self, addr: Addr) -> u64 {
        addr & (self.line_size() - 1)
    }

    pub fn index(&self, addr: Addr) -> usize {
        ((addr >> self.offset_bits) & (self.num_sets() as u64 - 1)) as usize
    }

    pub fn tag(&self, addr: Addr) -> u64 {
        addr.checked_shr(self.offset_bits + self.index_bits)
            .unwrap_or(0)
    }

    /// Address of the first byte of the line holding `tag` in set `index`.
    pub fn line_addr(&self, tag: u64, index: usize) -> Addr {
        let tag_part = tag
            .checked_shl(self.offset_bits + self.index_bits)
            .unwrap_or(0);
        tag_part | ((index as u64) << self.offset_bits)
    }

    pub fn compose(&self, tag: u64, index: usize, offset: u64) -> Addr {
        self.line_addr(tag, index) | offset
    }
}

#[cfg(test)]
mod tests {
    use super::AddressLayout;

    #[test]
    fn decomposition_round_trips() {
        let geometries = [(64, 1), (64, 2), (64, 512), (4096, 16), (1 << 21, 8), (1, 1)];
        let addrs = [
            0u64,
            0x3f,
            0x40,
            0xFFFF_FFFF_FFC0,
            0x7FFF_FFFF_FFC0,
            0xdead_beef,
            0x1234_5678_9abc_def0,
            u64::MAX,
        ];
        for (line_size, sets) in geometries {
            let layout = AddressLayout::new(line_size, sets);
            for addr in addrs {
                let rebuilt =
                    layout.compose(layout.tag(addr), layout.index(addr), layout.offset(addr));
                assert_eq!(rebuilt, addr, "line {line_size} sets {sets} addr {addr:#x}");
            }
        }
    }

    #[test]
    fn single_set_has_zero_index() {
        let layout = AddressLayout::new(64, 1);
        assert_eq!(layout.index(0xFFFF_FFFF_FFC0), 0);
        assert_eq!(layout.tag(0xFFFF_FFFF_FFC0), 0xFFFF_FFFF_FFC0 >> 6);
        assert_eq!(layout.line_addr(layout.tag(0x1234), 0), 0x1200);
    }

    #[test]
    fn index_and_offset_fields() {
        let layout = AddressLayout::new(64, 4);
        let addr = (0xab << 8) | (2 << 6) | 0x11;
        assert_eq!(layout.offset(addr), 0x11);
        assert_eq!(layout.index(addr), 2);
        assert_eq!(layout.tag(addr), 0xab);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_non_power_of_two_sets() {
        AddressLayout::new(64, 3);
    }
}
