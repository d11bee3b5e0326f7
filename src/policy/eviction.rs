//! Eviction-plan value objects.
//!
//! Candidate collection never mutates queue state. It fills three values the
//! caller later acts on under the same lock:
//!
//! - [`ReserveStat`]: byte/count accounting of what the walk saw,
//! - [`EvictionCandidates`]: the entries chosen for eviction, grouped by
//!   segment key so the host can batch its storage-layer deletes,
//! - [`FinalizeEviction`]: the deferred tier migrations (protected tail →
//!   probationary) the plan committed to.
//!
//! The protocol is: `candidates.evict(policy, lock)` first, then
//! `finalize.apply(policy, lock)`, both under the lock the plan was built
//! under. Re-entering the policy between the two steps is outside the
//! contract. The finalize step is an inspectable list of migration records
//! rather than a closure, so tests can assert on a plan before running it.

use rustc_hash::FxHashMap;

use crate::error::LogicError;
use crate::lock::CacheLock;
use crate::policy::entry::{Entry, SegmentKey, SegmentMeta};
use crate::policy::slru::{SlruHandlePtr, SlruPolicy, Tier};

// ---------------------------------------------------------------------------
// ReserveStat
// ---------------------------------------------------------------------------

/// Accounting of a candidate-collection walk.
///
/// Releasable figures cover the entries placed into the candidate set;
/// non-releasable figures cover pinned entries that were walked over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReserveStat {
    releasable_bytes: u64,
    releasable_count: u64,
    non_releasable_bytes: u64,
    non_releasable_count: u64,
}

impl ReserveStat {
    /// Bytes freed if every collected candidate is evicted.
    pub fn releasable_bytes(&self) -> u64 {
        self.releasable_bytes
    }

    /// Number of collected candidates.
    pub fn releasable_count(&self) -> u64 {
        self.releasable_count
    }

    /// Bytes held by pinned entries the walk skipped.
    pub fn non_releasable_bytes(&self) -> u64 {
        self.non_releasable_bytes
    }

    /// Number of pinned entries the walk skipped.
    pub fn non_releasable_count(&self) -> u64 {
        self.non_releasable_count
    }

    pub(crate) fn record_releasable(&mut self, size: u64) {
        self.releasable_bytes += size;
        self.releasable_count += 1;
    }

    pub(crate) fn record_non_releasable(&mut self, size: u64) {
        self.non_releasable_bytes += size;
        self.non_releasable_count += 1;
    }
}

// ---------------------------------------------------------------------------
// EvictionCandidates
// ---------------------------------------------------------------------------

/// One entry chosen for eviction.
#[derive(Debug, Clone)]
pub struct Candidate {
    handle: SlruHandlePtr,
    offset: u64,
    size: u64,
}

impl Candidate {
    /// Byte offset of the candidate segment within its file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the candidate segment at collection time.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The candidate's priority handle.
    pub fn handle(&self) -> &SlruHandlePtr {
        &self.handle
    }
}

/// Entries chosen for eviction, grouped by segment key.
#[derive(Debug, Default)]
pub struct EvictionCandidates {
    by_key: FxHashMap<SegmentKey, Vec<Candidate>>,
    count: usize,
    total_bytes: u64,
}

impl EvictionCandidates {
    /// Number of candidate entries across all keys.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` if no candidates were collected.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Sum of candidate sizes in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Iterates `(key, candidates)` groups in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&SegmentKey, &[Candidate])> {
        self.by_key.iter().map(|(key, group)| (key, group.as_slice()))
    }

    /// Removes every candidate from the policy and invalidates its handle.
    ///
    /// Must run under the same lock the candidates were collected under,
    /// before the plan's finalize step. The host's storage-layer deletion is
    /// keyed off the `(key, offset)` groups and is not this crate's concern.
    pub fn evict<M: SegmentMeta>(
        &self,
        policy: &mut SlruPolicy<M>,
        lock: &CacheLock<'_>,
    ) -> Result<(), LogicError> {
        policy.evict_candidates(self, lock)
    }

    pub(crate) fn push<M: SegmentMeta>(&mut self, entry: &Entry<M>) {
        self.by_key.entry(entry.key()).or_default().push(Candidate {
            handle: entry.handle().clone(),
            offset: entry.offset(),
            size: entry.size(),
        });
        self.count += 1;
        self.total_bytes += entry.size();
    }

    pub(crate) fn handles(&self) -> impl Iterator<Item = &SlruHandlePtr> {
        self.by_key
            .values()
            .flat_map(|group| group.iter().map(|candidate| &candidate.handle))
    }
}

// ---------------------------------------------------------------------------
// FinalizeEviction
// ---------------------------------------------------------------------------

/// One deferred queue-to-queue move.
#[derive(Debug, Clone)]
pub struct Migration {
    handle: SlruHandlePtr,
    target: Tier,
}

impl Migration {
    /// The handle to be migrated.
    pub fn handle(&self) -> &SlruHandlePtr {
        &self.handle
    }

    /// The tier the entry moves to.
    pub fn target(&self) -> Tier {
        self.target
    }
}

/// Deferred finalize action of an eviction plan.
///
/// Filled by `collect_candidates_for_eviction` when a protected-tier
/// reservation forces downgrades; empty otherwise. Applying an empty plan is
/// a no-op, so callers can apply unconditionally.
#[derive(Debug, Default)]
pub struct FinalizeEviction {
    migrations: Vec<Migration>,
}

impl FinalizeEviction {
    /// Number of staged migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Returns `true` if no migrations are staged.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// The staged migration records, in application order.
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Performs the staged migrations, retargeting each handle in place.
    ///
    /// Must run under the same lock the plan was built under, after the
    /// plan's evictions have been committed.
    pub fn apply<M: SegmentMeta>(
        self,
        policy: &mut SlruPolicy<M>,
        lock: &CacheLock<'_>,
    ) -> Result<(), LogicError> {
        for migration in &self.migrations {
            policy.migrate(&migration.handle, migration.target, lock)?;
        }
        Ok(())
    }

    pub(crate) fn push(&mut self, handle: SlruHandlePtr, target: Tier) {
        self.migrations.push(Migration { handle, target });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_stat_accumulates() {
        let mut stat = ReserveStat::default();
        stat.record_releasable(30);
        stat.record_releasable(10);
        stat.record_non_releasable(5);

        assert_eq!(stat.releasable_bytes(), 40);
        assert_eq!(stat.releasable_count(), 2);
        assert_eq!(stat.non_releasable_bytes(), 5);
        assert_eq!(stat.non_releasable_count(), 1);
    }

    #[test]
    fn empty_candidates_and_plan() {
        let candidates = EvictionCandidates::default();
        assert!(candidates.is_empty());
        assert_eq!(candidates.len(), 0);
        assert_eq!(candidates.total_bytes(), 0);
        assert_eq!(candidates.iter().count(), 0);

        let plan = FinalizeEviction::default();
        assert!(plan.is_empty());
        assert_eq!(plan.migrations().len(), 0);
    }
}
