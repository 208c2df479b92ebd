//! Join engine observability counters.
//!
//! Process-local totals, readable with [`engine_metrics_snapshot`]. Counters
//! are shared by every thread in the process, so tests should compare
//! snapshots with `>=` rather than exact values.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineMetricsSnapshot {
    /// Join and update invocations that reached execution.
    pub tabjoin_joins_total: u64,
    /// Indexes built on the fly.
    pub tabjoin_index_builds_total: u64,
    /// Cached table key indexes reused, on either side.
    pub tabjoin_index_reuse_total: u64,
    /// (probe, build) match pairs produced.
    pub tabjoin_match_pairs_total: u64,
    /// Invocations rejected by the cartesian guard.
    pub tabjoin_cartesian_rejections_total: u64,
    /// Cells written by update-on-join commits.
    pub tabjoin_cells_updated_total: u64,
}

static JOINS_TOTAL: AtomicU64 = AtomicU64::new(0);
static INDEX_BUILDS_TOTAL: AtomicU64 = AtomicU64::new(0);
static INDEX_REUSE_TOTAL: AtomicU64 = AtomicU64::new(0);
static MATCH_PAIRS_TOTAL: AtomicU64 = AtomicU64::new(0);
static CARTESIAN_REJECTIONS_TOTAL: AtomicU64 = AtomicU64::new(0);
static CELLS_UPDATED_TOTAL: AtomicU64 = AtomicU64::new(0);

fn to_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

pub(crate) fn record_join() {
    JOINS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_index_build() {
    INDEX_BUILDS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_index_reuse() {
    INDEX_REUSE_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_match_pairs(pairs: usize) {
    MATCH_PAIRS_TOTAL.fetch_add(to_u64(pairs), Ordering::Relaxed);
}

pub(crate) fn record_cartesian_rejection() {
    CARTESIAN_REJECTIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_cells_updated(cells: usize) {
    CELLS_UPDATED_TOTAL.fetch_add(to_u64(cells), Ordering::Relaxed);
}

/// Return a snapshot of the engine counters.
#[must_use]
pub fn engine_metrics_snapshot() -> EngineMetricsSnapshot {
    EngineMetricsSnapshot {
        tabjoin_joins_total: JOINS_TOTAL.load(Ordering::Relaxed),
        tabjoin_index_builds_total: INDEX_BUILDS_TOTAL.load(Ordering::Relaxed),
        tabjoin_index_reuse_total: INDEX_REUSE_TOTAL.load(Ordering::Relaxed),
        tabjoin_match_pairs_total: MATCH_PAIRS_TOTAL.load(Ordering::Relaxed),
        tabjoin_cartesian_rejections_total: CARTESIAN_REJECTIONS_TOTAL.load(Ordering::Relaxed),
        tabjoin_cells_updated_total: CELLS_UPDATED_TOTAL.load(Ordering::Relaxed),
    }
}

/// Reset all engine counters.
pub fn reset_engine_metrics() {
    JOINS_TOTAL.store(0, Ordering::Relaxed);
    INDEX_BUILDS_TOTAL.store(0, Ordering::Relaxed);
    INDEX_REUSE_TOTAL.store(0, Ordering::Relaxed);
    MATCH_PAIRS_TOTAL.store(0, Ordering::Relaxed);
    CARTESIAN_REJECTIONS_TOTAL.store(0, Ordering::Relaxed);
    CELLS_UPDATED_TOTAL.store(0, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let before = engine_metrics_snapshot();
        record_join();
        record_match_pairs(7);
        record_cells_updated(3);
        let after = engine_metrics_snapshot();
        assert!(after.tabjoin_joins_total > before.tabjoin_joins_total);
        assert!(after.tabjoin_match_pairs_total >= before.tabjoin_match_pairs_total + 7);
        assert!(after.tabjoin_cells_updated_total >= before.tabjoin_cells_updated_total + 3);
    }
}
