pub mod entry;
pub mod eviction;
pub mod lru;
pub mod slru;

pub use entry::{Entry, EntrySnapshot, SegmentKey, SegmentMeta};
pub use eviction::{Candidate, EvictionCandidates, FinalizeEviction, Migration, ReserveStat};
pub use lru::LruQueue;
pub use slru::{PolicyStats, SlruHandle, SlruHandlePtr, SlruPolicy, Tier};
