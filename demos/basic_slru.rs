//! Walkthrough of the SLRU priority engine: admit, promote, reserve, evict.
//!
//! Run with `cargo run --example basic_slru`.

use std::sync::Arc;

use priokit::lock::CacheGuard;
use priokit::policy::{
    EvictionCandidates, FinalizeEviction, ReserveStat, SegmentKey, SegmentMeta, SlruPolicy, Tier,
};

struct Meta(SegmentKey);

impl SegmentMeta for Meta {
    fn key(&self) -> SegmentKey {
        self.0
    }

    fn is_releasable(&self) -> bool {
        true
    }
}

fn main() {
    // 100-byte cache, half of it protected.
    let guard = CacheGuard::new();
    let lock = guard.lock();
    let mut policy: SlruPolicy<Meta> = SlruPolicy::new(100, 16, 0.5);

    // New segments always land in the probationary tier.
    let a = policy.add(Arc::new(Meta(SegmentKey::new(1))), 0, 30, &lock).unwrap();
    let b = policy.add(Arc::new(Meta(SegmentKey::new(1))), 30, 15, &lock).unwrap();
    println!("admitted a ({:?}) and b ({:?})", a.tier(), b.tier());

    // A touch earns a promotion when the protected tier has room.
    let hits = b.touch(&mut policy, &lock).unwrap();
    println!("touched b: hits={}, tier={:?}", hits, b.tier());
    assert_eq!(b.tier(), Tier::Protected);

    // Reserving space for a new 40-byte segment stages an eviction plan.
    let mut stat = ReserveStat::default();
    let mut out = EvictionCandidates::default();
    let mut finalize = FinalizeEviction::default();
    let viable = policy
        .collect_candidates_for_eviction(40, &mut stat, &mut out, None, &mut finalize, &lock)
        .unwrap();
    println!(
        "reservation viable={}, staged {} candidates ({} bytes releasable)",
        viable,
        out.len(),
        stat.releasable_bytes()
    );

    // Commit: evictions first, then the deferred migrations.
    out.evict(&mut policy, &lock).unwrap();
    finalize.apply(&mut policy, &lock).unwrap();
    println!("after eviction: a valid={}", a.is_valid());

    let c = policy.add(Arc::new(Meta(SegmentKey::new(2))), 0, 40, &lock).unwrap();
    println!("admitted c ({:?})", c.tier());

    for snap in policy.dump(&lock) {
        println!(
            "  {:?} key={} offset={} size={} hits={}",
            snap.tier, snap.key, snap.offset, snap.size, snap.hits
        );
    }
    println!("stats: {:?}", policy.stats());
}
