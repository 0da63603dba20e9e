//! Chain-comparison predicates and the classification counter.

use serde::Serialize;

use std::sync::atomic::{AtomicU32, Ordering};

use iso_model::SpliceCategory;

/// Position of `sub` as a contiguous run inside `full`, if any.
pub fn subchain_offset(sub: &[(u64, u64)], full: &[(u64, u64)]) -> Option<usize> {
    if sub.is_empty() || sub.len() > full.len() {
        return None;
    }

    full.windows(sub.len()).position(|window| window == sub)
}

/// Whether `outer` fully contains `inner`.
#[inline(always)]
pub fn contains_interval(outer: (u64, u64), inner: (u64, u64)) -> bool {
    outer.0 <= inner.0 && inner.1 <= outer.1
}

/// Whether a position falls inside any of the sorted intervals.
pub fn within_any(pos: u64, intervals: &[(u64, u64)]) -> bool {
    intervals.iter().any(|&(start, end)| start <= pos && pos < end)
}

/// Whether any known site lies within `window` of `pos`.
pub fn near_any(pos: u64, sites: &[u64], window: u64) -> bool {
    sites
        .iter()
        .any(|&site| pos.abs_diff(site) <= window)
}

/// Lock-free per-category tally, filled from the worker threads.
#[derive(Debug, Default)]
pub struct ParallelCounter {
    counts: [AtomicU32; 5],
    pub genes: AtomicU32,
}

impl ParallelCounter {
    pub fn bump(&self, category: SpliceCategory) {
        self.counts[category.as_index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ClassifySummary {
        let get = |c: SpliceCategory| self.counts[c.as_index()].load(Ordering::Relaxed);

        ClassifySummary {
            genes: self.genes.load(Ordering::Relaxed),
            fsm: get(SpliceCategory::Fsm),
            ism: get(SpliceCategory::Ism),
            nic: get(SpliceCategory::Nic),
            nnc: get(SpliceCategory::Nnc),
            novel: get(SpliceCategory::Novel),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassifySummary {
    pub genes: u32,
    pub fsm: u32,
    pub ism: u32,
    pub nic: u32,
    pub nnc: u32,
    pub novel: u32,
}

impl ClassifySummary {
    pub fn transcripts(&self) -> u32 {
        self.fsm + self.ism + self.nic + self.nnc + self.novel
    }
}
