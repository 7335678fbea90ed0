use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::*;

use crate::memsys::{Addr, HierarchyKind, TransactionKind};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScriptAction {
    #[default]
    Access,
    Shootdown,
    TlbInvalidate,
    Flush,
}

/// One `[[sim.script]]` entry, replayed once the driver reaches `cycle`.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ScriptedAccess {
    pub cycle: u64,
    pub core: usize,
    pub addr: Addr,
    #[serde(default = "default_kind")]
    pub kind: TransactionKind,
    #[serde(default)]
    pub thread: u64,
    #[serde(default)]
    pub large: bool,
    #[serde(default)]
    pub action: ScriptAction,
    /// Override the hierarchy the access enters; defaults to the one its kind belongs to.
    #[serde(default)]
    pub hierarchy: Option<HierarchyKind>,
}

fn default_kind() -> TransactionKind {
    TransactionKind::DataRead
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub log_level: u64,
    pub timeout: u64,
    pub dump_contents: bool,
    pub script: Vec<ScriptedAccess>,
}

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: 0,
            timeout: 100000,
            dump_contents: false,
            script: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_entries_fill_defaults() {
        let value: Value = toml::from_str(
            r#"
            timeout = 500
            [[script]]
            cycle = 0
            core = 1
            addr = 0x1000
            kind = "translation_write"
            [[script]]
            cycle = 3
            core = 0
            addr = 0x40
            action = "flush"
            hierarchy = "data"
            "#,
        )
        .unwrap();
        let config = SimConfig::from_section(Some(&value));
        assert_eq!(config.timeout, 500);
        assert!(!config.dump_contents);
        assert_eq!(config.script.len(), 2);
        assert_eq!(config.script[0].kind, TransactionKind::TranslationWrite);
        assert_eq!(config.script[0].action, ScriptAction::Access);
        assert_eq!(config.script[1].kind, TransactionKind::DataRead);
        assert_eq!(config.script[1].action, ScriptAction::Flush);
        assert_eq!(config.script[1].hierarchy, Some(HierarchyKind::Data));
    }
}
