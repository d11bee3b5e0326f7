pub use crate::ds::{Arena, EntryId, RecencyList};
pub use crate::error::{LimitExceeded, LogicError};
pub use crate::lock::{CacheGuard, CacheLock};
pub use crate::policy::{
    EntrySnapshot, EvictionCandidates, FinalizeEviction, LruQueue, PolicyStats, ReserveStat,
    SegmentKey, SegmentMeta, SlruHandle, SlruHandlePtr, SlruPolicy, Tier,
};
