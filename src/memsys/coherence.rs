use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::request::TransactionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CoherenceState {
    Modified,
    Owner,
    Exclusive,
    Shared,
    #[default]
    Invalid,
}

impl CoherenceState {
    pub const ALL: [CoherenceState; 5] = [
        Self::Modified,
        Self::Owner,
        Self::Exclusive,
        Self::Shared,
        Self::Invalid,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoherenceAction {
    None,
    BroadcastDataRead,
    BroadcastDataWrite,
    BroadcastTranslationRead,
    BroadcastTranslationWrite,
    MemoryDataWriteback,
    MemoryTranslationWriteback,
    /// Force the requester's copy to Shared after a read snoop found another valid copy.
    StateCorrection,
}

impl CoherenceAction {
    pub fn is_broadcast(self) -> bool {
        matches!(
            self,
            Self::BroadcastDataRead
                | Self::BroadcastDataWrite
                | Self::BroadcastTranslationRead
                | Self::BroadcastTranslationWrite
        )
    }

    pub fn is_memory_writeback(self) -> bool {
        matches!(self, Self::MemoryDataWriteback | Self::MemoryTranslationWriteback)
    }

    pub fn is_translation(self) -> bool {
        matches!(
            self,
            Self::BroadcastTranslationRead
                | Self::BroadcastTranslationWrite
                | Self::MemoryTranslationWriteback
        )
    }

    /// Transaction a peer applies when it receives this broadcast.
    pub fn directory_kind(self) -> Option<TransactionKind> {
        match self {
            Self::BroadcastDataRead => Some(TransactionKind::DirectoryDataRead),
            Self::BroadcastDataWrite => Some(TransactionKind::DirectoryDataWrite),
            Self::BroadcastTranslationRead => Some(TransactionKind::DirectoryTranslationRead),
            Self::BroadcastTranslationWrite => Some(TransactionKind::DirectoryTranslationWrite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Lines keep whatever state they have and no action is ever produced.
    None,
    #[default]
    Moesi,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(Self::None),
            "moesi" => Ok(Self::Moesi),
            _ => Err(format!(
                "unsupported coherence protocol '{}', expected one of: none, moesi",
                value
            )),
        }
    }
}

impl Protocol {
    pub fn transition(
        self,
        state: CoherenceState,
        kind: TransactionKind,
    ) -> (CoherenceState, CoherenceAction) {
        match self {
            Protocol::None => (state, CoherenceAction::None),
            Protocol::Moesi => moesi(state, kind),
        }
    }
}

fn moesi(state: CoherenceState, kind: TransactionKind) -> (CoherenceState, CoherenceAction) {
    use CoherenceAction as A;
    use CoherenceState::*;
    use TransactionKind as K;

    // Local writes take the line to Modified from every state and announce it.
    let local_write = |kind: K| match kind {
        K::DataWrite => Some((Modified, A::BroadcastDataWrite)),
        K::TranslationWrite => Some((Modified, A::BroadcastTranslationWrite)),
        _ => None,
    };

    match state {
        Modified => match kind {
            K::DirectoryDataRead => (Owner, A::MemoryDataWriteback),
            K::DirectoryTranslationRead => (Owner, A::MemoryTranslationWriteback),
            K::DirectoryDataWrite => (Invalid, A::MemoryDataWriteback),
            K::DirectoryTranslationWrite => (Invalid, A::MemoryTranslationWriteback),
            _ => (Modified, A::None),
        },
        Owner => match kind {
            K::DirectoryDataWrite => (Invalid, A::MemoryDataWriteback),
            K::DirectoryTranslationWrite => (Invalid, A::MemoryTranslationWriteback),
            // no cache-to-cache transfer: an owner answering a read keeps its state
            _ => local_write(kind).unwrap_or((Owner, A::None)),
        },
        Exclusive => match kind {
            K::DirectoryDataRead | K::DirectoryTranslationRead => (Shared, A::None),
            K::DirectoryDataWrite | K::DirectoryTranslationWrite => (Invalid, A::None),
            K::DataWriteback | K::TranslationWriteback => (Modified, A::None),
            _ => local_write(kind).unwrap_or((Exclusive, A::None)),
        },
        Shared => match kind {
            K::DirectoryDataWrite | K::DirectoryTranslationWrite => (Invalid, A::None),
            _ => local_write(kind).unwrap_or((Shared, A::None)),
        },
        Invalid => match kind {
            K::DataRead => (Exclusive, A::BroadcastDataRead),
            K::TranslationRead => (Exclusive, A::BroadcastTranslationRead),
            K::DataWriteback | K::TranslationWriteback => (Modified, A::None),
            _ => local_write(kind).unwrap_or((Invalid, A::None)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CoherenceState::*;
    use TransactionKind as K;

    #[test]
    fn transition_is_total() {
        for state in CoherenceState::ALL {
            for kind in TransactionKind::ALL {
                let (next, action) = Protocol::Moesi.transition(state, kind);
                assert!(CoherenceState::ALL.contains(&next));
                assert_ne!(action, CoherenceAction::StateCorrection, "{state:?} {kind:?}");
            }
        }
    }

    #[test]
    fn reachable_states_from_invalid() {
        let kinds = [
            K::DataRead,
            K::DataWrite,
            K::DirectoryDataRead,
            K::DirectoryDataWrite,
            K::DataWriteback,
        ];
        let mut seen = vec![Invalid];
        let mut frontier = vec![Invalid];
        while let Some(state) = frontier.pop() {
            for kind in kinds {
                let (next, _) = Protocol::Moesi.transition(state, kind);
                if !seen.contains(&next) {
                    seen.push(next);
                    frontier.push(next);
                }
            }
        }
        for state in CoherenceState::ALL {
            assert!(seen.contains(&state), "{state:?} unreachable");
        }
    }

    #[test]
    fn modified_answers_directory_read_as_owner() {
        assert_eq!(
            Protocol::Moesi.transition(Modified, K::DirectoryTranslationRead),
            (Owner, CoherenceAction::MemoryTranslationWriteback)
        );
        assert_eq!(
            Protocol::Moesi.transition(Modified, K::DirectoryDataWrite),
            (Invalid, CoherenceAction::MemoryDataWriteback)
        );
    }

    #[test]
    fn misses_broadcast() {
        assert_eq!(
            Protocol::Moesi.transition(Invalid, K::TranslationWrite),
            (Modified, CoherenceAction::BroadcastTranslationWrite)
        );
        assert_eq!(
            Protocol::Moesi.transition(Invalid, K::DataRead),
            (Exclusive, CoherenceAction::BroadcastDataRead)
        );
    }

    #[test]
    fn shared_invalidated_by_any_directory_write() {
        for kind in [K::DirectoryDataWrite, K::DirectoryTranslationWrite] {
            assert_eq!(
                Protocol::Moesi.transition(Shared, kind),
                (Invalid, CoherenceAction::None)
            );
        }
    }

    #[test]
    fn exclusive_downgrades_on_read_snoop() {
        assert_eq!(
            Protocol::Moesi.transition(Exclusive, K::DirectoryDataRead),
            (Shared, CoherenceAction::None)
        );
        assert_eq!(
            Protocol::Moesi.transition(Exclusive, K::DataRead),
            (Exclusive, CoherenceAction::None)
        );
    }

    #[test]
    fn no_coherence_never_acts() {
        for state in CoherenceState::ALL {
            for kind in TransactionKind::ALL {
                assert_eq!(
                    Protocol::None.transition(state, kind),
                    (state, CoherenceAction::None)
                );
            }
        }
    }

    #[test]
    fn protocol_from_str() {
        assert_eq!("moesi".parse::<Protocol>(), Ok(Protocol::Moesi));
        assert_eq!("none".parse::<Protocol>(), Ok(Protocol::None));
        assert!("mesi".parse::<Protocol>().is_err());
    }
}
