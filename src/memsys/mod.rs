pub mod cache;
pub mod coherence;
pub mod config;
pub mod layout;
mod lookup;
pub mod mshr;
pub mod policy;
pub mod request;
mod snoop;
mod system;
pub mod topology;
pub mod translate;


pub use cache::{Cache, CacheLine, LineSnapshot};
pub use coherence::{CoherenceAction, CoherenceState, Protocol};
pub use config::{CacheConfig, SharedTableConfig, SystemConfig, TlbLevelConfig};
pub use request::{Addr, Completion, Continuation, CoreTag, LookupStatus, Request, TransactionKind};
pub use snoop::ShootdownOutcome;
pub use system::MemorySystem;
pub use topology::{CacheId, CacheType, HierId, HierarchyKind, Topology};
pub use translate::{AddressTranslator, PresenceMap, PresenceTracker, SharedTableTranslator};
