//! Queue entries and the host-supplied segment-metadata contract.
//!
//! An [`Entry`] records one cached file segment's position in a priority
//! queue: its identity `(key, offset)`, its current byte size, a hit counter,
//! and a shared handle to the host's key metadata. The engine never looks
//! inside the metadata; it only asks the two questions of the
//! [`SegmentMeta`] contract.

use std::fmt;
use std::sync::Arc;

use crate::policy::slru::{SlruHandlePtr, Tier};

/// Identity of a cached file (hash of its path, assigned by the host).
///
/// Together with a byte offset it identifies one cached segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentKey(u128);

impl SegmentKey {
    /// Wraps a host-computed key hash.
    pub fn new(raw: u128) -> Self {
        Self(raw)
    }

    /// Returns the raw key hash.
    pub fn raw(self) -> u128 {
        self.0
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Contract the host's key-metadata registry implements for the engine.
///
/// The engine holds the metadata by shared ownership and consults it in two
/// places only: `key()` when an entry is admitted, and `is_releasable()`
/// during candidate collection (a pinned segment — one with active readers —
/// reports `false` and is skipped, without aborting the walk).
pub trait SegmentMeta {
    /// The key this metadata describes.
    fn key(&self) -> SegmentKey;

    /// Whether the described segment may currently be evicted.
    fn is_releasable(&self) -> bool;
}

/// One cached segment's record in a priority queue.
///
/// Identity is `(key, offset)`. `size` changes only through explicit resize,
/// `hits` only through touches; both mutations go through the owning queue so
/// running totals stay consistent.
#[derive(Debug)]
pub struct Entry<M> {
    key: SegmentKey,
    offset: u64,
    size: u64,
    hits: u64,
    meta: Arc<M>,
    handle: SlruHandlePtr,
}

impl<M: SegmentMeta> Entry<M> {
    pub(crate) fn new(offset: u64, size: u64, meta: Arc<M>, handle: SlruHandlePtr) -> Self {
        Self {
            key: meta.key(),
            offset,
            size,
            hits: 0,
            meta,
            handle,
        }
    }

    /// The key of the cached file this segment belongs to.
    pub fn key(&self) -> SegmentKey {
        self.key
    }

    /// Byte offset of the segment within its file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Current size of the segment in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of touches recorded for this entry.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// The host's metadata for this segment.
    pub fn meta(&self) -> &Arc<M> {
        &self.meta
    }

    pub(crate) fn handle(&self) -> &SlruHandlePtr {
        &self.handle
    }

    pub(crate) fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub(crate) fn record_hit(&mut self) -> u64 {
        self.hits += 1;
        self.hits
    }

    pub(crate) fn snapshot(&self, tier: Tier) -> EntrySnapshot {
        EntrySnapshot {
            key: self.key,
            offset: self.offset,
            size: self.size,
            hits: self.hits,
            tier,
        }
    }
}

/// Plain value copy of an entry, as returned by `dump`.
///
/// Never a reference into queue internals; queues reorder under the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub key: SegmentKey,
    pub offset: u64,
    pub size: u64,
    pub hits: u64,
    pub tier: Tier,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::slru::SlruHandle;

    struct Meta {
        key: SegmentKey,
    }

    impl SegmentMeta for Meta {
        fn key(&self) -> SegmentKey {
            self.key
        }

        fn is_releasable(&self) -> bool {
            true
        }
    }

    #[test]
    fn entry_takes_key_from_meta() {
        let meta = Arc::new(Meta {
            key: SegmentKey::new(7),
        });
        let handle = SlruHandle::new(Tier::Probationary);
        let entry = Entry::new(100, 30, meta, handle);

        assert_eq!(entry.key(), SegmentKey::new(7));
        assert_eq!(entry.offset(), 100);
        assert_eq!(entry.size(), 30);
        assert_eq!(entry.hits(), 0);
    }

    #[test]
    fn record_hit_counts_up() {
        let meta = Arc::new(Meta {
            key: SegmentKey::new(1),
        });
        let handle = SlruHandle::new(Tier::Probationary);
        let mut entry = Entry::new(0, 10, meta, handle);

        assert_eq!(entry.record_hit(), 1);
        assert_eq!(entry.record_hit(), 2);
        assert_eq!(entry.hits(), 2);
    }

    #[test]
    fn snapshot_copies_fields() {
        let meta = Arc::new(Meta {
            key: SegmentKey::new(9),
        });
        let handle = SlruHandle::new(Tier::Probationary);
        let entry = Entry::new(4096, 512, meta, handle);

        let snap = entry.snapshot(Tier::Protected);
        assert_eq!(snap.key, SegmentKey::new(9));
        assert_eq!(snap.offset, 4096);
        assert_eq!(snap.size, 512);
        assert_eq!(snap.hits, 0);
        assert_eq!(snap.tier, Tier::Protected);
    }

    #[test]
    fn segment_key_display_is_hex() {
        let key = SegmentKey::new(0xdead_beef);
        assert_eq!(key.to_string(), format!("{:032x}", 0xdead_beefu128));
    }
}
