//! Join execution: probe an index and produce the match map.
//!
//! Match lists are collected as borrowed slices first, narrowed by `mult`,
//! counted against the cartesian guard, and only then copied into the
//! compact [`MatchMap`].

use hashbrown::HashMap;
use tabjoin_error::{JoinError, Result};
use tabjoin_store::{KeyIndex, Table};
use tabjoin_types::{KeyTuple, KeyValue};
use tracing::{debug, warn};

use crate::derived;
use crate::metrics;
use crate::options::{JoinMode, Mult};
use crate::plan::{IndexChoice, JoinPlan};

/// For every probe row, the ordered build rows it matches.
///
/// Stored as offsets into one flat row list. An empty slice is the no-match
/// sentinel; probe rows are never omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchMap {
    offsets: Vec<usize>,
    rows: Vec<usize>,
    build_len: usize,
    /// Build rows hit by any probe row before `mult` narrowing. Kept for
    /// full joins only.
    build_hit: Option<Vec<bool>>,
}

impl MatchMap {
    /// Match map from explicit per-probe-row lists.
    #[must_use]
    pub fn from_lists(lists: &[Vec<usize>], build_len: usize) -> Self {
        let slices: Vec<&[usize]> = lists.iter().map(Vec::as_slice).collect();
        Self::from_slices(&slices, build_len, None)
    }

    fn from_slices(lists: &[&[usize]], build_len: usize, build_hit: Option<Vec<bool>>) -> Self {
        let total = lists.iter().map(|l| l.len()).sum();
        let mut offsets = Vec::with_capacity(lists.len() + 1);
        let mut rows = Vec::with_capacity(total);
        offsets.push(0);
        for list in lists {
            rows.extend_from_slice(list);
            offsets.push(rows.len());
        }
        Self {
            offsets,
            rows,
            build_len,
            build_hit,
        }
    }

    pub(crate) fn from_parts(offsets: Vec<usize>, rows: Vec<usize>, build_len: usize) -> Self {
        Self {
            offsets,
            rows,
            build_len,
            build_hit: None,
        }
    }

    /// Number of probe rows covered.
    #[must_use]
    pub fn probe_len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Number of build rows the map was computed against.
    #[must_use]
    pub const fn build_len(&self) -> usize {
        self.build_len
    }

    /// Build rows matched by `probe_row`.
    ///
    /// # Panics
    ///
    /// Panics if `probe_row >= self.probe_len()`.
    #[must_use]
    pub fn matches(&self, probe_row: usize) -> &[usize] {
        &self.rows[self.offsets[probe_row]..self.offsets[probe_row + 1]]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize])> {
        (0..self.probe_len()).map(|p| (p, self.matches(p)))
    }

    /// Total (probe, build) pairs.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.rows.len()
    }

    /// Probe rows with at least one match.
    #[must_use]
    pub fn matched_probe_rows(&self) -> usize {
        self.offsets.windows(2).filter(|w| w[1] > w[0]).count()
    }

    /// Build rows no probe row matched, ascending.
    #[must_use]
    pub fn unmatched_build_rows(&self) -> Vec<usize> {
        let hit = self.build_hit.clone().unwrap_or_else(|| {
            let mut hit = vec![false; self.build_len];
            for &b in &self.rows {
                hit[b] = true;
            }
            hit
        });
        hit.iter()
            .enumerate()
            .filter(|(_, h)| !**h)
            .map(|(b, _)| b)
            .collect()
    }

    /// Fail unless the map was computed for tables of these sizes.
    pub fn check_fits(&self, probe: &Table, build: &Table) -> Result<()> {
        if self.probe_len() != probe.len() {
            return Err(JoinError::StaleMatchMap {
                expected: self.probe_len(),
                actual: probe.len(),
            });
        }
        if self.build_len != build.len() {
            return Err(JoinError::StaleMatchMap {
                expected: self.build_len,
                actual: build.len(),
            });
        }
        Ok(())
    }
}

/// Run a plan and return its match map.
pub fn execute(plan: &JoinPlan<'_>) -> Result<MatchMap> {
    let probe = plan.probe();
    let build = plan.build();
    let _span = tracing::debug_span!(
        "join_execute",
        mode = plan.mode().as_str(),
        index = plan.index().as_str(),
        probe_rows = probe.len(),
        build_rows = build.len()
    )
    .entered();
    metrics::record_join();

    let map = match plan.index() {
        IndexChoice::None => derived::cross_matches(plan)?,
        IndexChoice::ReuseBuild(index) => {
            metrics::record_index_reuse();
            debug!(side = "build", key = ?index.columns(), "reusing cached key index");
            let lists = probe_forward(plan, index);
            assemble(plan, &lists)?
        }
        IndexChoice::ReverseProbe(index) => {
            metrics::record_index_reuse();
            debug!(side = "probe", key = ?index.columns(), "reusing cached key index");
            // Guard on counts first: the pairs are only listed once admitted.
            let counts = reversed_counts(plan, index);
            let mult = plan.options().mult;
            let narrowed = counts.iter().map(|&n| mult.narrowed_len(n));
            check_cartesian(plan, expansion_rows(plan.mode(), narrowed))?;
            let (buckets, build_hit) = probe_reversed(plan, index, &counts);
            let lists: Vec<&[usize]> = buckets.iter().map(Vec::as_slice).collect();
            MatchMap::from_slices(&lists, build.len(), build_hit)
        }
        IndexChoice::Fresh => {
            let columns = plan.keys().build_columns();
            let index = KeyIndex::build(build, &columns, &plan.options().build_options())?;
            metrics::record_index_build();
            let lists = probe_forward(plan, &index);
            assemble(plan, &lists)?
        }
    };

    metrics::record_match_pairs(map.pair_count());
    debug!(
        pairs = map.pair_count(),
        matched_probe_rows = map.matched_probe_rows(),
        "join executed"
    );
    Ok(map)
}

fn key_of(table: &Table, positions: &[usize], row: usize) -> KeyTuple {
    positions
        .iter()
        .map(|&pos| table.column_at(pos).key_at(row))
        .collect()
}

fn skips_key(plan: &JoinPlan<'_>, key: &KeyTuple) -> bool {
    !plan.options().null_keys_match && key.iter().any(KeyValue::is_null)
}

/// Look every probe row up in an index over the build table.
fn probe_forward<'i>(plan: &JoinPlan<'_>, index: &'i KeyIndex) -> Vec<&'i [usize]> {
    let probe = plan.probe();
    (0..probe.len())
        .map(|row| {
            let key = key_of(probe, plan.probe_key_positions(), row);
            if skips_key(plan, &key) {
                &[][..]
            } else {
                index.lookup(&key)
            }
        })
        .collect()
}

/// Per probe row, the number of build rows it matches, computed from an
/// index over the probe table without listing the pairs.
fn reversed_counts(plan: &JoinPlan<'_>, index: &KeyIndex) -> Vec<usize> {
    let build = plan.build();
    let mut per_key: HashMap<KeyTuple, usize> = HashMap::new();
    for row in 0..build.len() {
        let key = key_of(build, plan.build_key_positions(), row);
        if !skips_key(plan, &key) {
            *per_key.entry(key).or_insert(0) += 1;
        }
    }
    let mut counts = vec![0; plan.probe().len()];
    for (key, n) in &per_key {
        for &p in index.lookup(key) {
            counts[p] += n;
        }
    }
    counts
}

/// Look every build row up in an index over the probe table and bucket it
/// under the probe rows it hits, already narrowed by `mult`. Build rows are
/// visited in ascending order, so each bucket lists its matches in build
/// order. `counts` comes from [`reversed_counts`] and sizes the buckets.
fn probe_reversed(
    plan: &JoinPlan<'_>,
    index: &KeyIndex,
    counts: &[usize],
) -> (Vec<Vec<usize>>, Option<Vec<bool>>) {
    let build = plan.build();
    let mult = plan.options().mult;
    let mut buckets: Vec<Vec<usize>> = counts
        .iter()
        .map(|&n| Vec::with_capacity(mult.narrowed_len(n)))
        .collect();
    let mut build_hit = (plan.mode() == JoinMode::Full).then(|| vec![false; build.len()]);
    for row in 0..build.len() {
        let key = key_of(build, plan.build_key_positions(), row);
        if skips_key(plan, &key) {
            continue;
        }
        let hits = index.lookup(&key);
        if let Some(hit) = build_hit.as_mut() {
            hit[row] = !hits.is_empty();
        }
        for &p in hits {
            let bucket = &mut buckets[p];
            match mult {
                Mult::All => bucket.push(row),
                Mult::First if bucket.is_empty() => bucket.push(row),
                Mult::First => {}
                Mult::Last => {
                    bucket.clear();
                    bucket.push(row);
                }
            }
        }
    }
    (buckets, build_hit)
}

fn assemble(plan: &JoinPlan<'_>, lists: &[&[usize]]) -> Result<MatchMap> {
    let build_len = plan.build().len();
    let build_hit = (plan.mode() == JoinMode::Full).then(|| {
        let mut hit = vec![false; build_len];
        for &b in lists.iter().flat_map(|l| l.iter()) {
            hit[b] = true;
        }
        hit
    });
    let mult = plan.options().mult;
    let narrowed: Vec<&[usize]> = lists.iter().map(|l| mult.apply(l)).collect();
    check_cartesian(plan, expansion_rows(plan.mode(), narrowed.iter().map(|l| l.len())))?;
    Ok(MatchMap::from_slices(&narrowed, build_len, build_hit))
}

/// Output rows implied by per-probe-row match counts in `mode`.
fn expansion_rows(mode: JoinMode, counts: impl Iterator<Item = usize>) -> usize {
    match mode {
        JoinMode::Plain | JoinMode::Full => counts.map(|n| n.max(1)).sum(),
        _ => counts.sum(),
    }
}

/// Fail when `rows` exceeds `probe_rows + build_rows` in a guarded mode.
pub(crate) fn check_cartesian(plan: &JoinPlan<'_>, rows: usize) -> Result<()> {
    let options = plan.options();
    let mode = plan.mode();
    if !mode.is_guarded() || options.allow_cartesian {
        return Ok(());
    }
    if mode != JoinMode::Cross && options.mult != Mult::All {
        return Ok(());
    }
    let probe_rows = plan.probe().len();
    let build_rows = plan.build().len();
    if rows > probe_rows.saturating_add(build_rows) {
        metrics::record_cartesian_rejection();
        warn!(
            mode = mode.as_str(),
            rows, probe_rows, build_rows, "cartesian guard rejected join"
        );
        return Err(JoinError::CartesianLimitExceeded {
            rows,
            probe_rows,
            build_rows,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspec::KeySpec;
    use crate::options::JoinOptions;
    use crate::plan::plan;
    use tabjoin_store::{Column, IndexKind};

    fn table(ids: &[Option<i64>]) -> Table {
        Table::from_columns([("id", Column::integer(ids.iter().copied()))]).unwrap()
    }

    fn run(probe: &Table, build: &Table, mode: JoinMode, options: JoinOptions) -> Result<MatchMap> {
        let plan = plan(probe, build, &KeySpec::same(["id"]), mode, &[], &options)?;
        execute(&plan)
    }

    #[test]
    fn matches_keep_build_order() {
        let probe = table(&[Some(1), Some(2), Some(3)]);
        let build = table(&[Some(2), Some(1), Some(2)]);
        let map = run(&probe, &build, JoinMode::Plain, JoinOptions::strict()).unwrap();
        assert_eq!(map.matches(0), &[1]);
        assert_eq!(map.matches(1), &[0, 2]);
        assert!(map.matches(2).is_empty());
        assert_eq!(map.pair_count(), 3);
        assert_eq!(map.matched_probe_rows(), 2);
    }

    #[test]
    fn null_keys_match_only_when_enabled() {
        let probe = table(&[None, Some(1)]);
        let build = table(&[None, Some(1)]);
        let map = run(&probe, &build, JoinMode::Plain, JoinOptions::strict()).unwrap();
        assert!(map.matches(0).is_empty());
        let opts = JoinOptions::strict().with_null_keys_match(true);
        let map = run(&probe, &build, JoinMode::Plain, opts).unwrap();
        assert_eq!(map.matches(0), &[0]);
    }

    #[test]
    fn mult_first_and_last() {
        let probe = table(&[Some(7)]);
        let build = table(&[Some(7), Some(7), Some(7)]);
        let first = run(
            &probe,
            &build,
            JoinMode::Plain,
            JoinOptions::strict().with_mult(Mult::First),
        )
        .unwrap();
        assert_eq!(first.matches(0), &[0]);
        let last = run(
            &probe,
            &build,
            JoinMode::Plain,
            JoinOptions::strict().with_mult(Mult::Last),
        )
        .unwrap();
        assert_eq!(last.matches(0), &[2]);
    }

    #[test]
    fn guard_counts_plain_expansion() {
        // 2 probe rows x 3 build rows on one key = 6 > 2 + 3.
        let probe = table(&[Some(1), Some(1)]);
        let build = table(&[Some(1), Some(1), Some(1)]);
        let err = run(&probe, &build, JoinMode::Plain, JoinOptions::strict()).unwrap_err();
        assert_eq!(
            err,
            JoinError::CartesianLimitExceeded {
                rows: 6,
                probe_rows: 2,
                build_rows: 3,
            }
        );
        let ok = run(
            &probe,
            &build,
            JoinMode::Plain,
            JoinOptions::strict().with_cartesian(true),
        )
        .unwrap();
        assert_eq!(ok.pair_count(), 6);
    }

    #[test]
    fn guard_skips_semi_anti_and_narrowed_mult() {
        let probe = table(&[Some(1), Some(1)]);
        let build = table(&[Some(1), Some(1), Some(1)]);
        assert!(run(&probe, &build, JoinMode::Semi, JoinOptions::strict()).is_ok());
        assert!(run(&probe, &build, JoinMode::Anti, JoinOptions::strict()).is_ok());
        assert!(
            run(
                &probe,
                &build,
                JoinMode::Plain,
                JoinOptions::strict().with_mult(Mult::First)
            )
            .is_ok()
        );
    }

    #[test]
    fn reversed_probing_matches_forward() {
        let build = table(&[Some(3), Some(1), Some(3), None, Some(2)]);
        let mut keyed = table(&[Some(3), Some(2), Some(9), Some(3)]);
        keyed.set_key(&["id"]).unwrap();
        let mut unkeyed = keyed.clone();
        unkeyed.clear_key();

        let keys = KeySpec::same(["id"]);
        let opts = JoinOptions::strict();
        let reversed = plan(&keyed, &build, &keys, JoinMode::Plain, &[], &opts).unwrap();
        assert_eq!(reversed.index().as_str(), "reverse_probe");
        let reversed = execute(&reversed).unwrap();

        let direct = plan(&unkeyed, &build, &keys, JoinMode::Plain, &[], &opts).unwrap();
        assert_eq!(direct.index().as_str(), "fresh");
        let direct = execute(&direct).unwrap();

        assert_eq!(reversed, direct);
        // Keyed probe order is 2, 3, 3, 9.
        assert_eq!(reversed.matches(0), &[4]);
        assert_eq!(reversed.matches(1), &[0, 2]);
        assert!(reversed.matches(3).is_empty());
    }

    #[test]
    fn keyed_probe_is_guarded_before_listing_pairs() {
        // 20k x 20k rows on one key: 400M pairs, rejected from counts alone.
        let rows = 20_000;
        let mut probe = table(&vec![Some(1); rows]);
        probe.set_key(&["id"]).unwrap();
        let build = table(&vec![Some(1); rows]);
        let keys = KeySpec::same(["id"]);
        let opts = JoinOptions::strict();
        let plan = plan(&probe, &build, &keys, JoinMode::Inner, &[], &opts).unwrap();
        assert_eq!(plan.index().as_str(), "reverse_probe");
        let IndexChoice::ReverseProbe(index) = plan.index() else {
            unreachable!()
        };
        let counts = reversed_counts(&plan, index);
        assert!(counts.iter().all(|&n| n == rows));
        assert_eq!(
            execute(&plan).unwrap_err(),
            JoinError::CartesianLimitExceeded {
                rows: rows * rows,
                probe_rows: rows,
                build_rows: rows,
            }
        );
    }

    #[test]
    fn keyed_probe_narrows_and_tracks_unmatched_build_rows() {
        let build = table(&[Some(3), Some(1), Some(3), Some(8), Some(3)]);
        let mut keyed = table(&[Some(3), Some(1), Some(4)]);
        keyed.set_key(&["id"]).unwrap();
        let mut unkeyed = keyed.clone();
        unkeyed.clear_key();
        let keys = KeySpec::same(["id"]);
        for (mode, mult) in [
            (JoinMode::Plain, Mult::First),
            (JoinMode::Plain, Mult::Last),
            (JoinMode::Full, Mult::All),
            (JoinMode::Full, Mult::Last),
        ] {
            let opts = JoinOptions::strict().with_mult(mult);
            let reversed = plan(&keyed, &build, &keys, mode, &[], &opts).unwrap();
            assert_eq!(reversed.index().as_str(), "reverse_probe");
            let direct = plan(&unkeyed, &build, &keys, mode, &[], &opts).unwrap();
            let reversed = execute(&reversed).unwrap();
            let direct = execute(&direct).unwrap();
            assert_eq!(reversed, direct, "{} {}", mode.as_str(), mult.as_str());
        }
    }

    #[test]
    fn sorted_fresh_index_agrees_with_hash() {
        let probe = table(&[Some(5), Some(1), None, Some(4)]);
        let build = table(&[Some(1), Some(5), Some(5), Some(4)]);
        let hash = run(&probe, &build, JoinMode::Inner, JoinOptions::strict()).unwrap();
        let sorted = run(
            &probe,
            &build,
            JoinMode::Inner,
            JoinOptions::strict().with_index_kind(IndexKind::Sorted),
        )
        .unwrap();
        assert_eq!(hash, sorted);
    }

    #[test]
    fn unmatched_build_rows_ignore_mult() {
        let probe = table(&[Some(1)]);
        let build = table(&[Some(1), Some(1), Some(2)]);
        let map = run(
            &probe,
            &build,
            JoinMode::Full,
            JoinOptions::strict().with_mult(Mult::First),
        )
        .unwrap();
        assert_eq!(map.matches(0), &[0]);
        assert_eq!(map.unmatched_build_rows(), vec![2]);
    }

    #[test]
    fn stale_map_detected() {
        let probe = table(&[Some(1)]);
        let build = table(&[Some(1)]);
        let map = run(&probe, &build, JoinMode::Plain, JoinOptions::strict()).unwrap();
        let grown = table(&[Some(1), Some(2)]);
        assert_eq!(
            map.check_fits(&grown, &build).unwrap_err(),
            JoinError::StaleMatchMap {
                expected: 1,
                actual: 2
            }
        );
    }
}
