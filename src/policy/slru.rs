//! Segmented LRU (SLRU) priority policy for a file-segment cache.
//!
//! Composes two [`LruQueue`]s — probationary (cold) and protected (hot) —
//! and orchestrates admission, promotion, demotion and eviction between
//! them. New segments always enter probationary; a touch promotes to
//! protected, demoting the protected tail back to probationary when room
//! must be made, which in turn may evict from probationary. Every operation
//! runs under the host's single cache lock, witnessed by a
//! [`CacheLock`](crate::lock::CacheLock) parameter.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │  SlruPolicy<M>                                                         │
//! │                                                                        │
//! │   PROBATIONARY (cold)                    PROTECTED (hot)               │
//! │   ┌──────────────────────────┐           ┌──────────────────────────┐  │
//! │   │ LRU                 MRU  │  touch    │ LRU                 MRU  │  │
//! │   │  ▼                   ▼   │ ────────► │  ▼                   ▼   │  │
//! │   │ [evict] ◄──► [admitted]  │           │ [demote] ◄──► [touched]  │  │
//! │   └──────────────────────────┘  ◄──────── └─────────────────────────┘  │
//! │         ▲          ▲              demote                               │
//! │     eviction    add() lands                                            │
//! │     pressure    here, always                                           │
//! │                                                                        │
//! │   budgets: protected gets floor(total · ratio), probationary the rest  │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Promotion flow (`SlruHandle::touch` on a probationary entry)
//!
//! ```text
//!   entry too big for protected? ──► touch within probationary
//!   protected cannot release enough? ──► touch within probationary
//!   downgrades need probationary room that cannot be freed?
//!                                  ──► touch within probationary
//!   otherwise, commit:
//!     1. evict the probationary shortfall
//!     2. unlink the promotee from probationary
//!     3. migrate each downgrade candidate to probationary (handles
//!        retargeted in place)
//!     4. re-add the promotee at the protected MRU, retag its handle
//! ```
//!
//! The commit sequence keeps both tiers inside their budgets after each
//! step; shortfall arithmetic is done in bytes with saturating subtraction.
//!
//! ## Handles
//!
//! [`SlruHandle`] is the opaque, stable per-entry reference shared between
//! the host and the policy. It survives cross-tier migration: the policy
//! rewrites its tier tag and inner entry id in place. After `remove` or
//! `invalidate` any further use is a [`LogicError`].
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use priokit::lock::CacheGuard;
//! use priokit::policy::entry::{SegmentKey, SegmentMeta};
//! use priokit::policy::eviction::{EvictionCandidates, FinalizeEviction, ReserveStat};
//! use priokit::policy::slru::{SlruPolicy, Tier};
//!
//! struct Meta(SegmentKey);
//! impl SegmentMeta for Meta {
//!     fn key(&self) -> SegmentKey { self.0 }
//!     fn is_releasable(&self) -> bool { true }
//! }
//!
//! let guard = CacheGuard::new();
//! let lock = guard.lock();
//! let mut policy: SlruPolicy<Meta> = SlruPolicy::new(100, 16, 0.5);
//!
//! // Admission lands in the probationary tier.
//! let meta = Arc::new(Meta(SegmentKey::new(1)));
//! let handle = policy.add(meta, 0, 30, &lock).unwrap();
//! assert_eq!(handle.tier(), Tier::Probationary);
//!
//! // A touch promotes to protected (room permitting).
//! let hits = handle.touch(&mut policy, &lock).unwrap();
//! assert_eq!(hits, 1);
//! assert_eq!(handle.tier(), Tier::Protected);
//!
//! // Reserving space goes through an eviction plan.
//! let mut stat = ReserveStat::default();
//! let mut out = EvictionCandidates::default();
//! let mut finalize = FinalizeEviction::default();
//! let fits = policy
//!     .collect_candidates_for_eviction(20, &mut stat, &mut out, None, &mut finalize, &lock)
//!     .unwrap();
//! assert!(fits);
//! out.evict(&mut policy, &lock).unwrap();
//! finalize.apply(&mut policy, &lock).unwrap();
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::ds::EntryId;
use crate::error::{LimitExceeded, LogicError};
use crate::lock::CacheLock;
use crate::policy::entry::{Entry, EntrySnapshot, SegmentMeta};
use crate::policy::eviction::{EvictionCandidates, FinalizeEviction, ReserveStat};
use crate::policy::lru::LruQueue;

/// The two SLRU tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Cold tier: new and demoted entries, evicted from first.
    Probationary,
    /// Hot tier: entries that earned a promotion by being touched.
    Protected,
}

// ---------------------------------------------------------------------------
// SlruHandle
// ---------------------------------------------------------------------------

/// Shared pointer to a priority handle.
pub type SlruHandlePtr = Arc<SlruHandle>;

#[derive(Debug, Clone, Copy)]
struct HandleState {
    tier: Tier,
    id: Option<EntryId>,
}

/// Opaque, stable reference to one entry in the policy.
///
/// Created by [`SlruPolicy::add`]; shared between host and policy. The
/// policy rewrites the inner state in place when the entry migrates tiers,
/// so the host's reference stays usable across promotions and demotions.
///
/// Every method that reaches into the policy takes the policy and the cache
/// lock witness as arguments; the handle itself carries no policy
/// back-reference. The tiny internal mutex only satisfies shared ownership —
/// it is locked exclusively while the cache lock is held, so it introduces
/// no interleaving of its own.
#[derive(Debug)]
pub struct SlruHandle {
    state: Mutex<HandleState>,
}

impl SlruHandle {
    pub(crate) fn new(tier: Tier) -> SlruHandlePtr {
        Arc::new(Self {
            state: Mutex::new(HandleState { tier, id: None }),
        })
    }

    /// The tier currently (or last) holding this handle's entry.
    pub fn tier(&self) -> Tier {
        self.state.lock().tier
    }

    /// Whether the handle still names a live entry.
    pub fn is_valid(&self) -> bool {
        self.state.lock().id.is_some()
    }

    /// Copies out the referenced entry.
    pub fn snapshot<M: SegmentMeta>(
        &self,
        policy: &SlruPolicy<M>,
        lock: &CacheLock<'_>,
    ) -> Result<EntrySnapshot, LogicError> {
        policy.entry_snapshot(self, lock)
    }

    /// Bumps the entry's priority; promotes probationary entries to the
    /// protected tier when room can be made. Returns the new hit count.
    pub fn touch<M: SegmentMeta>(
        &self,
        policy: &mut SlruPolicy<M>,
        lock: &CacheLock<'_>,
    ) -> Result<u64, LogicError> {
        policy.touch_entry(self, lock)
    }

    /// Adjusts the entry's size by a signed byte delta.
    pub fn update_size<M: SegmentMeta>(
        &self,
        policy: &mut SlruPolicy<M>,
        delta: i64,
        lock: &CacheLock<'_>,
    ) -> Result<(), LogicError> {
        policy.update_entry_size(self, delta, lock)
    }

    /// Removes the entry from its tier and clears the handle.
    pub fn remove<M: SegmentMeta>(
        &self,
        policy: &mut SlruPolicy<M>,
        lock: &CacheLock<'_>,
    ) -> Result<(), LogicError> {
        policy.detach_entry(self, "remove", lock)
    }

    /// Host-initiated detach (e.g. a failed download): same queue effects as
    /// [`remove`](Self::remove), kept separate for intent and telemetry.
    pub fn invalidate<M: SegmentMeta>(
        &self,
        policy: &mut SlruPolicy<M>,
        lock: &CacheLock<'_>,
    ) -> Result<(), LogicError> {
        policy.detach_entry(self, "invalidate", lock)
    }

    pub(crate) fn location(&self) -> Result<(Tier, EntryId), LogicError> {
        let state = self.state.lock();
        match state.id {
            Some(id) => Ok((state.tier, id)),
            None => Err(LogicError::invalid_handle()),
        }
    }

    pub(crate) fn retarget(&self, tier: Tier, id: EntryId) {
        let mut state = self.state.lock();
        state.tier = tier;
        state.id = Some(id);
    }

    pub(crate) fn clear(&self) {
        self.state.lock().id = None;
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Operation counters using atomics for thread-safe snapshots.
///
/// Side channel only; never consulted by policy decisions.
#[derive(Debug, Default)]
struct PolicyCounters {
    touches: AtomicU64,
    promotions: AtomicU64,
    demotions: AtomicU64,
    evictions: AtomicU64,
    degraded_promotions: AtomicU64,
}

impl PolicyCounters {
    fn snapshot(&self) -> PolicyStats {
        PolicyStats {
            touches: self.touches.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            degraded_promotions: self.degraded_promotions.load(Ordering::Relaxed),
        }
    }

    fn inc_touch(&self) {
        self.touches.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_demotion(&self) {
        self.demotions.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_degraded_promotion(&self) {
        self.degraded_promotions.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of the policy's operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyStats {
    /// Successful touches, all paths.
    pub touches: u64,
    /// Probationary → protected promotions committed.
    pub promotions: u64,
    /// Protected → probationary migrations committed.
    pub demotions: u64,
    /// Entries evicted through the policy (plans and internal shortfalls).
    pub evictions: u64,
    /// Promotions that fell back to an in-tier touch.
    pub degraded_promotions: u64,
}

// ---------------------------------------------------------------------------
// SlruPolicy
// ---------------------------------------------------------------------------

/// Two-tier segmented LRU priority policy.
#[derive(Debug)]
pub struct SlruPolicy<M> {
    protected: LruQueue<M>,
    probationary: LruQueue<M>,
    counters: PolicyCounters,
}

fn scaled(total: u64, ratio: f64) -> u64 {
    (total as f64 * ratio.clamp(0.0, 1.0)) as u64
}

impl<M: SegmentMeta> SlruPolicy<M> {
    /// Creates a policy with `max_bytes`/`max_elements` split across the two
    /// tiers by `size_ratio` (the protected share, clamped to `[0, 1]`;
    /// `0.5` is a sensible default).
    pub fn new(max_bytes: u64, max_elements: u64, size_ratio: f64) -> Self {
        let protected = LruQueue::new(scaled(max_bytes, size_ratio), scaled(max_elements, size_ratio));
        let probationary = LruQueue::new(
            scaled(max_bytes, 1.0 - size_ratio.clamp(0.0, 1.0)),
            scaled(max_elements, 1.0 - size_ratio.clamp(0.0, 1.0)),
        );
        debug!(
            probationary_bytes = probationary.max_bytes(),
            protected_bytes = protected.max_bytes(),
            probationary_elements = probationary.max_elements(),
            protected_elements = protected.max_elements(),
            "sized segmented priority tiers"
        );
        Self {
            protected,
            probationary,
            counters: PolicyCounters::default(),
        }
    }

    /// The queue of one tier.
    pub fn queue(&self, tier: Tier) -> &LruQueue<M> {
        match tier {
            Tier::Probationary => &self.probationary,
            Tier::Protected => &self.protected,
        }
    }

    fn queue_mut(&mut self, tier: Tier) -> &mut LruQueue<M> {
        match tier {
            Tier::Probationary => &mut self.probationary,
            Tier::Protected => &mut self.protected,
        }
    }

    /// Configured byte budget, summed over both tiers.
    pub fn max_bytes(&self) -> u64 {
        self.protected.max_bytes() + self.probationary.max_bytes()
    }

    /// Configured element budget, summed over both tiers.
    pub fn max_elements(&self) -> u64 {
        self.protected.max_elements() + self.probationary.max_elements()
    }

    /// Total bytes across both tiers.
    pub fn size(&self, lock: &CacheLock<'_>) -> u64 {
        self.protected.size(lock) + self.probationary.size(lock)
    }

    /// Total entries across both tiers.
    pub fn elements_count(&self, lock: &CacheLock<'_>) -> u64 {
        self.protected.elements_count(lock) + self.probationary.elements_count(lock)
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> PolicyStats {
        self.counters.snapshot()
    }

    /// Admits a new segment. New entries always enter the probationary tier
    /// regardless of size; admission pressure is handled by the caller
    /// collecting eviction candidates first.
    pub fn add(
        &mut self,
        meta: Arc<M>,
        offset: u64,
        size: u64,
        lock: &CacheLock<'_>,
    ) -> Result<SlruHandlePtr, LimitExceeded> {
        let handle = SlruHandle::new(Tier::Probationary);
        let entry = Entry::new(offset, size, meta, handle.clone());
        let key = entry.key();
        let id = self.probationary.add(entry, lock)?;
        handle.retarget(Tier::Probationary, id);
        trace!(%key, offset, size, "admitted segment to probationary tier");
        Ok(handle)
    }

    /// Decides where to free `size` bytes for a reservation and stages the
    /// plan.
    ///
    /// With no reservee, or a probationary reservee, candidates come from
    /// the probationary tier. A protected reservee grows in place when the
    /// protected tier can absorb it; otherwise the protected tail is staged
    /// for demotion (into `finalize`) and, if the demoted bytes do not fit,
    /// probationary evictions are staged into `out`. Returns whether the
    /// reservation is viable; nothing is mutated either way.
    pub fn collect_candidates_for_eviction(
        &self,
        size: u64,
        stat: &mut ReserveStat,
        out: &mut EvictionCandidates,
        reservee: Option<&SlruHandlePtr>,
        finalize: &mut FinalizeEviction,
        lock: &CacheLock<'_>,
    ) -> Result<bool, LogicError> {
        // First-time reservation: the segment will land in probationary.
        let (tier, reservee_id) = match reservee {
            None => {
                return Ok(self
                    .probationary
                    .collect_candidates(size, stat, out, None, lock))
            },
            Some(handle) => handle.location()?,
        };

        if tier == Tier::Probationary {
            return Ok(self
                .probationary
                .collect_candidates(size, stat, out, Some(reservee_id), lock));
        }

        // Reservee is protected. In-place growth: no new element.
        if self.protected.can_fit(size, 0, lock) {
            return Ok(true);
        }

        // Stage a downgrade set out of the protected tail. Not an eviction
        // set: these entries fall back to probationary, they do not leave.
        let mut downgrade = EvictionCandidates::default();
        let mut downgrade_stat = ReserveStat::default();
        if !self
            .protected
            .collect_candidates(size, &mut downgrade_stat, &mut downgrade, Some(reservee_id), lock)
        {
            return Ok(false);
        }

        let downgrade_bytes = downgrade_stat.releasable_bytes();
        let downgrade_count = downgrade_stat.releasable_count();

        if !self.probationary.can_fit(downgrade_bytes, downgrade_count, lock)
            && !self
                .probationary
                .collect_candidates(downgrade_bytes, stat, out, None, lock)
        {
            return Ok(false);
        }

        for handle in downgrade.handles() {
            finalize.push(handle.clone(), Tier::Probationary);
        }
        trace!(
            size,
            downgrade_bytes,
            evictions = out.len(),
            "staged protected-growth eviction plan"
        );
        Ok(true)
    }

    /// Dumps both tiers, probationary first, each LRU first.
    pub fn dump(&self, lock: &CacheLock<'_>) -> Vec<EntrySnapshot> {
        let mut snapshots = self.probationary.dump(Tier::Probationary, lock);
        snapshots.extend(self.protected.dump(Tier::Protected, lock));
        snapshots
    }

    /// Randomizes each tier's order independently. Totals are untouched.
    pub fn shuffle(&mut self, lock: &CacheLock<'_>) {
        let mut rng = rand::thread_rng();
        self.protected.shuffle(&mut rng, lock);
        self.probationary.shuffle(&mut rng, lock);
    }

    // -- handle-driven operations ------------------------------------------

    pub(crate) fn touch_entry(
        &mut self,
        handle: &SlruHandle,
        lock: &CacheLock<'_>,
    ) -> Result<u64, LogicError> {
        let hits = self.increase_priority(handle, lock)?;
        self.counters.inc_touch();
        Ok(hits)
    }

    pub(crate) fn entry_snapshot(
        &self,
        handle: &SlruHandle,
        _lock: &CacheLock<'_>,
    ) -> Result<EntrySnapshot, LogicError> {
        let (tier, id) = handle.location()?;
        let entry = self
            .queue(tier)
            .get(id)
            .ok_or_else(|| LogicError::stale_entry("snapshot"))?;
        Ok(entry.snapshot(tier))
    }

    pub(crate) fn update_entry_size(
        &mut self,
        handle: &SlruHandle,
        delta: i64,
        lock: &CacheLock<'_>,
    ) -> Result<(), LogicError> {
        let (tier, id) = handle.location()?;
        self.queue_mut(tier).update_size(id, delta, lock)
    }

    pub(crate) fn detach_entry(
        &mut self,
        handle: &SlruHandle,
        reason: &str,
        lock: &CacheLock<'_>,
    ) -> Result<(), LogicError> {
        let (tier, id) = handle.location()?;
        let entry = self.queue_mut(tier).remove(id, lock)?;
        handle.clear();
        trace!(key = %entry.key(), offset = entry.offset(), reason, "detached entry");
        Ok(())
    }

    pub(crate) fn evict_candidates(
        &mut self,
        candidates: &EvictionCandidates,
        lock: &CacheLock<'_>,
    ) -> Result<(), LogicError> {
        for handle in candidates.handles() {
            let (tier, id) = handle.location()?;
            let entry = self.queue_mut(tier).remove(id, lock)?;
            handle.clear();
            self.counters.inc_eviction();
            trace!(key = %entry.key(), offset = entry.offset(), size = entry.size(), "evicted entry");
        }
        Ok(())
    }

    pub(crate) fn migrate(
        &mut self,
        handle: &SlruHandle,
        target: Tier,
        lock: &CacheLock<'_>,
    ) -> Result<(), LogicError> {
        let (tier, id) = handle.location()?;
        if tier == target {
            return Err(LogicError::new(
                "migration target is the queue the entry already occupies",
            ));
        }
        let new_id = match target {
            Tier::Probationary => self.protected.move_entry(id, &mut self.probationary, lock)?,
            Tier::Protected => self.probationary.move_entry(id, &mut self.protected, lock)?,
        };
        handle.retarget(target, new_id);
        match target {
            Tier::Probationary => self.counters.inc_demotion(),
            Tier::Protected => self.counters.inc_promotion(),
        }
        Ok(())
    }

    // -- promotion ----------------------------------------------------------

    /// Promotes a probationary entry to protected, or touches in place when
    /// the entry is already protected or promotion is infeasible.
    fn increase_priority(
        &mut self,
        handle: &SlruHandle,
        lock: &CacheLock<'_>,
    ) -> Result<u64, LogicError> {
        let (tier, id) = handle.location()?;
        if tier == Tier::Protected {
            return self.protected.touch(id, lock);
        }

        let size = self
            .probationary
            .get(id)
            .ok_or_else(|| LogicError::stale_entry("touch"))?
            .size();

        // An entry bigger than the whole protected tier can never live
        // there; only possible when the tier budget is below the segment
        // size, which no realistic configuration does.
        if size > self.protected.max_bytes() {
            trace!(size, "entry exceeds protected tier budget, touching in place");
            return self.degraded_touch(id, lock);
        }

        // Stage the protected tail for demotion until the promotee fits.
        let mut downgrade = EvictionCandidates::default();
        let mut downgrade_stat = ReserveStat::default();
        if !self
            .protected
            .collect_candidates(size, &mut downgrade_stat, &mut downgrade, None, lock)
        {
            trace!(size, "protected tier cannot release enough, touching in place");
            return self.degraded_touch(id, lock);
        }

        // Byte accounting: demoted bytes arrive in probationary, the
        // promotee's bytes leave it.
        let downgrade_bytes = downgrade_stat.releasable_bytes();
        let shortfall = downgrade_bytes.saturating_sub(size);

        let mut evictions = EvictionCandidates::default();
        if shortfall > 0 {
            let mut eviction_stat = ReserveStat::default();
            if !self.probationary.collect_candidates(
                shortfall,
                &mut eviction_stat,
                &mut evictions,
                Some(id),
                lock,
            ) {
                trace!(shortfall, "probationary tier cannot absorb downgrades, touching in place");
                return self.degraded_touch(id, lock);
            }
        }

        // Element budgets are not part of the byte-driven collection above;
        // verify them before the first mutation so the commit cannot strand
        // the queues half-way.
        let downgrade_count = downgrade_stat.releasable_count();
        let evicted_count = evictions.len() as u64;
        let probationary_after = (self.probationary.elements_count(lock) + downgrade_count)
            .saturating_sub(1 + evicted_count);
        let protected_after =
            (self.protected.elements_count(lock) + 1).saturating_sub(downgrade_count);
        if probationary_after > self.probationary.max_elements()
            || protected_after > self.protected.max_elements()
        {
            trace!("element budgets block promotion, touching in place");
            return self.degraded_touch(id, lock);
        }

        // Commit. Each step keeps the combined totals inside the budgets
        // once it completes; after the first mutation the sequence must run
        // to the end.
        self.evict_candidates(&evictions, lock)?;

        let mut entry = self.probationary.remove(id, lock)?;

        for downgrade_handle in downgrade.handles() {
            let (candidate_tier, candidate_id) = downgrade_handle.location()?;
            if candidate_tier != Tier::Protected {
                return Err(LogicError::new(
                    "downgrade candidate is no longer in the protected tier",
                ));
            }
            let new_id = self
                .protected
                .move_entry(candidate_id, &mut self.probationary, lock)?;
            downgrade_handle.retarget(Tier::Probationary, new_id);
            self.counters.inc_demotion();
        }

        let hits = entry.record_hit();
        let key = entry.key();
        let offset = entry.offset();
        let promoted_handle = entry.handle().clone();
        let new_id = self
            .protected
            .add(entry, lock)
            .map_err(|_| LogicError::new("protected tier rejected a promoted entry after downgrade"))?;
        promoted_handle.retarget(Tier::Protected, new_id);
        self.counters.inc_promotion();
        trace!(%key, offset, size, demoted = downgrade_count, "promoted entry to protected tier");
        Ok(hits)
    }

    fn degraded_touch(&mut self, id: EntryId, lock: &CacheLock<'_>) -> Result<u64, LogicError> {
        self.counters.inc_degraded_promotion();
        self.probationary.touch(id, lock)
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        self.protected.debug_validate_invariants();
        self.probationary.debug_validate_invariants();
    }
}
