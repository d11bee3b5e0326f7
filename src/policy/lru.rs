//! Byte- and count-budgeted LRU queue.
//!
//! One tier of the segmented policy: an ordered sequence of [`Entry`]s from
//! least to most recently used, with a byte budget and an element budget.
//! The queue never evicts on its own; it reports whether things fit
//! (`can_fit`), picks eviction candidates for the caller
//! (`collect_candidates`), and applies the mutations the caller commits to.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │  LruQueue<M>                                                 │
//!   │                                                              │
//!   │  list: RecencyList<Entry<M>>        budgets                  │
//!   │                                                              │
//!   │   front (LRU)          back (MRU)   max_bytes     = 50       │
//!   │    [A:30] ◄──► [B:10] ◄──► [C:5]    max_elements  = 16       │
//!   │     evict           admit/touch     current_bytes = 45       │
//!   │     first           land here       elements      = 3        │
//!   └──────────────────────────────────────────────────────────────┘
//!
//!   collect_candidates(want_bytes):
//!     needed = want_bytes - free space          (saturating)
//!     walk LRU → MRU, skipping the reservee and pinned entries,
//!     until collected releasable bytes ≥ needed
//! ```
//!
//! ## Operations
//!
//! | Operation            | Effect                                          |
//! |----------------------|-------------------------------------------------|
//! | `add`                | Append at MRU; errors if budgets were violated  |
//! | `remove`             | Unlink, fix totals                              |
//! | `touch`              | Move to MRU, `hits += 1`                        |
//! | `update_size`        | Signed resize of entry + running total          |
//! | `can_fit`            | Budget pre-check for the caller                 |
//! | `collect_candidates` | Stage an eviction prefix, mutate nothing        |
//! | `move_entry`         | Atomic migration into another queue             |
//! | `dump` / `shuffle`   | Testing and debugging helpers                   |
//!
//! Invariants between operations: `current_bytes` equals the sum of entry
//! sizes, `current_bytes ≤ max_bytes`, `elements ≤ max_elements`. A
//! transient overshoot is legal only inside a single policy call under the
//! cache lock (`move_entry` intentionally skips enforcement for that
//! reason).

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::trace;

use crate::ds::{EntryId, RecencyList};
use crate::error::{LimitExceeded, LogicError};
use crate::lock::CacheLock;
use crate::policy::entry::{Entry, EntrySnapshot, SegmentMeta};
use crate::policy::eviction::{EvictionCandidates, ReserveStat};
use crate::policy::slru::Tier;

/// One LRU tier with byte and element budgets.
#[derive(Debug)]
pub struct LruQueue<M> {
    list: RecencyList<Entry<M>>,
    max_bytes: u64,
    max_elements: u64,
    current_bytes: u64,
}

impl<M: SegmentMeta> LruQueue<M> {
    /// Creates an empty queue with the given budgets.
    ///
    /// A zero budget is honored as zero: nothing fits.
    pub fn new(max_bytes: u64, max_elements: u64) -> Self {
        Self {
            list: RecencyList::new(),
            max_bytes,
            max_elements,
            current_bytes: 0,
        }
    }

    /// Configured byte budget.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Configured element budget.
    pub fn max_elements(&self) -> u64 {
        self.max_elements
    }

    /// Current total of entry sizes in bytes.
    pub fn size(&self, _lock: &CacheLock<'_>) -> u64 {
        self.current_bytes
    }

    /// Current number of entries.
    pub fn elements_count(&self, _lock: &CacheLock<'_>) -> u64 {
        self.list.len() as u64
    }

    /// Returns the entry for a live id.
    pub fn get(&self, id: EntryId) -> Option<&Entry<M>> {
        self.list.get(id)
    }

    /// Whether `extra_bytes` more bytes and `extra_elements` more entries
    /// would still respect both budgets.
    ///
    /// Callers growing an existing entry in place pass `extra_elements = 0`.
    pub fn can_fit(&self, extra_bytes: u64, extra_elements: u64, _lock: &CacheLock<'_>) -> bool {
        self.current_bytes.saturating_add(extra_bytes) <= self.max_bytes
            && (self.list.len() as u64).saturating_add(extra_elements) <= self.max_elements
    }

    /// Appends `entry` at the MRU end.
    ///
    /// Admission pressure is the caller's job (collect candidates first);
    /// the queue only verifies the result and refuses budget violations.
    pub fn add(&mut self, entry: Entry<M>, lock: &CacheLock<'_>) -> Result<EntryId, LimitExceeded> {
        if !self.can_fit(entry.size(), 1, lock) {
            return Err(LimitExceeded);
        }
        self.current_bytes += entry.size();
        Ok(self.list.push_back(entry))
    }

    /// Unlinks the entry at `id` and returns it.
    pub fn remove(&mut self, id: EntryId, _lock: &CacheLock<'_>) -> Result<Entry<M>, LogicError> {
        let entry = self
            .list
            .remove(id)
            .ok_or_else(|| LogicError::stale_entry("remove"))?;
        self.current_bytes = self
            .current_bytes
            .checked_sub(entry.size())
            .ok_or_else(|| LogicError::new("queue byte total went negative on remove"))?;
        Ok(entry)
    }

    /// Moves the entry at `id` to the MRU end and counts the hit.
    ///
    /// Returns the entry's new hit count.
    pub fn touch(&mut self, id: EntryId, _lock: &CacheLock<'_>) -> Result<u64, LogicError> {
        if !self.list.move_to_back(id) {
            return Err(LogicError::stale_entry("touch"));
        }
        let entry = self
            .list
            .get_mut(id)
            .ok_or_else(|| LogicError::stale_entry("touch"))?;
        Ok(entry.record_hit())
    }

    /// Adjusts the entry's size and the queue's byte total by `delta`.
    ///
    /// Does not evict and does not enforce the byte budget; the caller is
    /// expected to have reserved growth through candidate collection.
    pub fn update_size(
        &mut self,
        id: EntryId,
        delta: i64,
        _lock: &CacheLock<'_>,
    ) -> Result<(), LogicError> {
        let entry_size = self
            .list
            .get(id)
            .ok_or_else(|| LogicError::stale_entry("update_size"))?
            .size();

        let new_size = checked_apply(entry_size, delta)
            .ok_or_else(|| LogicError::new("entry size went negative on resize"))?;
        let new_total = checked_apply(self.current_bytes, delta)
            .ok_or_else(|| LogicError::new("queue byte total went negative on resize"))?;

        if let Some(entry) = self.list.get_mut(id) {
            entry.set_size(new_size);
        }
        self.current_bytes = new_total;
        Ok(())
    }

    /// Walks LRU → MRU staging eviction candidates until their removal would
    /// leave room for `want_bytes` more bytes.
    ///
    /// Free budget counts toward the goal, so a queue that can already
    /// absorb `want_bytes` succeeds with an empty plan. The reservee's id
    /// (`skip`) is never collected. Pinned entries are recorded in `stat`
    /// and walked over without aborting. Nothing is mutated; returns whether
    /// the goal was reached.
    pub fn collect_candidates(
        &self,
        want_bytes: u64,
        stat: &mut ReserveStat,
        out: &mut EvictionCandidates,
        skip: Option<EntryId>,
        _lock: &CacheLock<'_>,
    ) -> bool {
        let free = self.max_bytes.saturating_sub(self.current_bytes);
        let mut needed = match want_bytes.checked_sub(free) {
            None | Some(0) => return true,
            Some(needed) => needed,
        };

        for (id, entry) in self.list.iter() {
            if Some(id) == skip {
                continue;
            }
            if !entry.meta().is_releasable() {
                stat.record_non_releasable(entry.size());
                continue;
            }

            stat.record_releasable(entry.size());
            out.push(entry);
            trace!(
                key = %entry.key(),
                offset = entry.offset(),
                size = entry.size(),
                "staged eviction candidate"
            );

            if entry.size() >= needed {
                return true;
            }
            needed -= entry.size();
        }
        false
    }

    /// Atomically migrates the entry at `id` to the MRU end of `other`.
    ///
    /// Both queues' totals are adjusted; `other`'s budgets are not enforced
    /// because migrations run inside an already-validated plan.
    pub fn move_entry(
        &mut self,
        id: EntryId,
        other: &mut LruQueue<M>,
        lock: &CacheLock<'_>,
    ) -> Result<EntryId, LogicError> {
        let entry = self.remove(id, lock)?;
        other.current_bytes += entry.size();
        Ok(other.list.push_back(entry))
    }

    /// Copies out every entry, LRU first, tagged with `tier`.
    pub fn dump(&self, tier: Tier, _lock: &CacheLock<'_>) -> Vec<EntrySnapshot> {
        self.list
            .iter()
            .map(|(_, entry)| entry.snapshot(tier))
            .collect()
    }

    /// Randomizes the queue order. Totals and entries are untouched.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R, _lock: &CacheLock<'_>) {
        let mut ids: Vec<EntryId> = self.list.iter().map(|(id, _)| id).collect();
        ids.shuffle(rng);
        self.list.reorder(&ids);
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        self.list.debug_validate_invariants();
        let total: u64 = self.list.iter().map(|(_, entry)| entry.size()).sum();
        assert_eq!(total, self.current_bytes);
    }
}

/// Applies a signed delta to an unsigned total, `None` on underflow or
/// overflow.
fn checked_apply(base: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    }
}
