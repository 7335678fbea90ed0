use serde::{Deserialize, Serialize};

use crate::timeq::{Cycle, Ticket};

pub type Addr = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    DataRead,
    DataWrite,
    TranslationRead,
    TranslationWrite,
    DataWriteback,
    TranslationWriteback,
    DirectoryDataRead,
    DirectoryDataWrite,
    DirectoryTranslationRead,
    DirectoryTranslationWrite,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 10] = [
        Self::DataRead,
        Self::DataWrite,
        Self::TranslationRead,
        Self::TranslationWrite,
        Self::DataWriteback,
        Self::TranslationWriteback,
        Self::DirectoryDataRead,
        Self::DirectoryDataWrite,
        Self::DirectoryTranslationRead,
        Self::DirectoryTranslationWrite,
    ];

    pub fn is_translation(self) -> bool {
        matches!(
            self,
            Self::TranslationRead
                | Self::TranslationWrite
                | Self::TranslationWriteback
                | Self::DirectoryTranslationRead
                | Self::DirectoryTranslationWrite
        )
    }

    /// Local writes and writebacks; both leave the line dirty.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::DataWrite | Self::TranslationWrite | Self::DataWriteback | Self::TranslationWriteback
        )
    }

    pub fn is_writeback(self) -> bool {
        matches!(self, Self::DataWriteback | Self::TranslationWriteback)
    }

    pub fn is_directory(self) -> bool {
        matches!(
            self,
            Self::DirectoryDataRead
                | Self::DirectoryDataWrite
                | Self::DirectoryTranslationRead
                | Self::DirectoryTranslationWrite
        )
    }

    pub fn writeback(is_translation: bool) -> Self {
        if is_translation {
            Self::TranslationWriteback
        } else {
            Self::DataWriteback
        }
    }
}

/// Identity of the core a request belongs to.  Requests absorbed by a structure shared between
/// cores are tracked under `Agnostic`, which compares equal to every core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoreTag {
    Core(usize),
    Agnostic,
}

impl CoreTag {
    pub fn matches(self, other: CoreTag) -> bool {
        match (self, other) {
            (CoreTag::Core(a), CoreTag::Core(b)) => a == b,
            _ => true,
        }
    }

    pub fn id(self) -> Option<usize> {
        match self {
            CoreTag::Core(id) => Some(id),
            CoreTag::Agnostic => None,
        }
    }
}

/// What happens once the request has been released at the top of the path it travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Continuation {
    /// Push a `Completion` onto the core's completion queue.
    Retire { core: usize },
    /// Release locks only.
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Request {
    pub id: u64,
    pub addr: Addr,
    pub kind: TransactionKind,
    pub thread: u64,
    pub is_large: bool,
    pub core: CoreTag,
    pub continuation: Continuation,
}

impl Request {
    pub fn new(addr: Addr, kind: TransactionKind, thread: u64, is_large: bool, core: usize) -> Self {
        Self {
            id: 0,
            addr,
            kind,
            thread,
            is_large,
            core: CoreTag::Core(core),
            continuation: Continuation::Retire { core },
        }
    }

    pub fn silent(addr: Addr, kind: TransactionKind, thread: u64, is_large: bool, core: CoreTag) -> Self {
        Self {
            id: 0,
            addr,
            kind,
            thread,
            is_large,
            core,
            continuation: Continuation::Silent,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn with_addr(&self, addr: Addr) -> Self {
        Self {
            addr,
            ..self.clone()
        }
    }

    /// Key under which the request is tracked by a miss tracker.  Shared structures track every
    /// request core-agnostically.
    pub fn key(&self, shared: bool) -> RequestKey {
        RequestKey {
            addr: self.addr,
            kind: self.kind,
            thread: self.thread,
            is_large: self.is_large,
            core: if shared { CoreTag::Agnostic } else { self.core },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestKey {
    pub addr: Addr,
    pub kind: TransactionKind,
    pub thread: u64,
    pub is_large: bool,
    pub core: CoreTag,
}

impl RequestKey {
    pub fn matches(&self, other: &RequestKey) -> bool {
        self.addr == other.addr
            && self.kind == other.kind
            && self.thread == other.thread
            && self.is_large == other.is_large
            && self.core.matches(other.core)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LookupStatus {
    Hit,
    Miss,
    MshrHit,
    MshrHitAndLocked,
    /// The miss tracker is full (or every way of the set is in flight); nothing was changed.
    Retry,
}

impl LookupStatus {
    pub fn accepted(self) -> bool {
        self != LookupStatus::Retry
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub request: Request,
    pub ticket: Ticket,
    pub completed_at: Cycle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agnostic_core_matches_any_core() {
        let a = Request::new(0x40, TransactionKind::DataRead, 1, false, 0);
        let b = Request::new(0x40, TransactionKind::DataRead, 1, false, 3);
        assert!(!a.key(false).matches(&b.key(false)));
        assert!(a.key(true).matches(&b.key(false)));
        assert!(a.key(false).matches(&b.key(true)));
    }

    #[test]
    fn key_compares_thread_kind_and_size() {
        let base = Request::new(0x40, TransactionKind::TranslationRead, 1, false, 0);
        let mut other = base.clone();
        other.thread = 2;
        assert!(!base.key(true).matches(&other.key(true)));
        let mut other = base.clone();
        other.is_large = true;
        assert!(!base.key(true).matches(&other.key(true)));
        let mut other = base.clone();
        other.kind = TransactionKind::TranslationWrite;
        assert!(!base.key(true).matches(&other.key(true)));
    }

    #[test]
    fn kind_classes() {
        assert!(TransactionKind::DirectoryTranslationWrite.is_translation());
        assert!(!TransactionKind::DirectoryTranslationWrite.is_write());
        assert!(TransactionKind::DataWriteback.is_write());
        assert!(TransactionKind::DataWriteback.is_writeback());
        assert_eq!(TransactionKind::writeback(true), TransactionKind::TranslationWriteback);
        assert_eq!(TransactionKind::writeback(false), TransactionKind::DataWriteback);
    }
}
