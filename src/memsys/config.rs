use serde::Deserialize;

use super::coherence::Protocol;
use super::request::Addr;
use crate::sim::config::Config;
use crate::timeq::Cycle;

/// Geometry and timing of one cache level.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub sets: u64,
    pub ways: usize,
    pub line_size: u64,
    pub latency: Cycle,
    pub mshr_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sets: 64,
            ways: 8,
            line_size: 64,
            latency: 4,
            mshr_entries: 8,
        }
    }
}

impl CacheConfig {
    pub const fn new(sets: u64, ways: usize, line_size: u64, latency: Cycle, mshr_entries: usize) -> Self {
        Self {
            sets,
            ways,
            line_size,
            latency,
            mshr_entries,
        }
    }

    pub fn ensure_valid(&self) {
        assert!(self.sets.is_power_of_two(), "sets must be a power of two");
        assert!(self.line_size.is_power_of_two(), "line_size must be a power of two");
        assert!(self.ways > 0, "ways must be > 0");
        assert!(self.mshr_entries > 0, "mshr_entries must be > 0");
    }
}

/// One translation level: a small-page and a large-page TLB side by side.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TlbLevelConfig {
    pub small: CacheConfig,
    pub large: CacheConfig,
}

impl TlbLevelConfig {
    pub fn side(&self, is_large: bool) -> &CacheConfig {
        if is_large {
            &self.large
        } else {
            &self.small
        }
    }
}

/// Placement of the physically addressed translation table every core's last TLB level caches.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct SharedTableConfig {
    pub small_base: Addr,
    pub small_entries: u64,
    pub large_entries: u64,
    pub entry_size: u64,
    pub small_page_bits: u32,
    pub large_page_bits: u32,
}

impl Default for SharedTableConfig {
    fn default() -> Self {
        Self {
            small_base: 0xF000_0000_0000,
            small_entries: 1 << 20,
            large_entries: 1 << 12,
            entry_size: 64,
            small_page_bits: 12,
            large_page_bits: 21,
        }
    }
}

impl SharedTableConfig {
    pub fn large_base(&self) -> Addr {
        self.small_base + self.small_entries * self.entry_size
    }

    pub fn ensure_valid(&self) {
        assert!(self.small_entries.is_power_of_two(), "small_entries must be a power of two");
        assert!(self.large_entries.is_power_of_two(), "large_entries must be a power of two");
        assert!(self.entry_size > 0, "entry_size must be > 0");
        assert!(
            self.small_page_bits < self.large_page_bits,
            "large pages must be larger than small pages"
        );
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SystemConfig {
    pub num_cores: usize,
    pub protocol: Protocol,
    pub inclusive: bool,
    pub memory_latency: Cycle,
    /// Data levels, top to bottom.  The last one is shared by every core.
    pub data: Vec<CacheConfig>,
    /// Translation levels, top to bottom.  The last one is shared by every core.
    pub tlb: Vec<TlbLevelConfig>,
    pub shared_table: SharedTableConfig,
}

impl Config for SystemConfig {}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            num_cores: 2,
            protocol: Protocol::Moesi,
            inclusive: true,
            memory_latency: 100,
            data: vec![
                CacheConfig::new(64, 8, 64, 4, 8),
                CacheConfig::new(512, 8, 64, 12, 16),
                CacheConfig::new(2048, 16, 64, 40, 32),
            ],
            tlb: vec![
                TlbLevelConfig {
                    small: CacheConfig::new(16, 4, 1 << 12, 1, 2),
                    large: CacheConfig::new(8, 4, 1 << 21, 1, 2),
                },
                TlbLevelConfig {
                    small: CacheConfig::new(128, 12, 1 << 12, 7, 8),
                    large: CacheConfig::new(32, 8, 1 << 21, 7, 8),
                },
                TlbLevelConfig {
                    small: CacheConfig::new(1024, 16, 64, 30, 32),
                    large: CacheConfig::new(256, 16, 64, 30, 32),
                },
            ],
            shared_table: SharedTableConfig::default(),
        }
    }
}

impl SystemConfig {
    pub fn ensure_valid(&self) {
        assert!(self.num_cores > 0, "num_cores must be > 0");
        assert!(self.data.len() >= 2, "at least two data levels are required");
        assert!(self.tlb.len() >= 2, "at least two translation levels are required");
        for level in &self.data {
            level.ensure_valid();
        }
        for level in &self.tlb {
            level.small.ensure_valid();
            level.large.ensure_valid();
        }
        self.shared_table.ensure_valid();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SystemConfig::default();
        config.ensure_valid();
        assert_eq!(config.data.len(), 3);
        assert_eq!(config.tlb[1].side(true).line_size, 1 << 21);
    }

    #[test]
    fn partial_section_keeps_defaults() {
        let value: toml::Value = toml::from_str(
            r#"
            num_cores = 4
            protocol = "none"
            [[data]]
            sets = 1
            ways = 2
            [[data]]
            sets = 4
            ways = 4
            latency = 10
            "#,
        )
        .unwrap();
        let config = SystemConfig::from_section(Some(&value));
        assert_eq!(config.num_cores, 4);
        assert_eq!(config.protocol, Protocol::None);
        assert_eq!(config.data[0].line_size, 64);
        assert_eq!(config.data[1].latency, 10);
        assert_eq!(config.tlb.len(), 3);
        config.ensure_valid();
    }

    #[test]
    fn missing_section_falls_back_to_default() {
        assert_eq!(SystemConfig::from_section(None), SystemConfig::default());
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_odd_geometry() {
        CacheConfig::new(3, 2, 64, 1, 1).ensure_valid();
    }

    #[test]
    fn large_table_follows_small_table() {
        let table = SharedTableConfig::default();
        assert_eq!(table.large_base(), table.small_base + (1 << 20) * 64);
    }
}
