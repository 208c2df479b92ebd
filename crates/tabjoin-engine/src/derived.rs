//! Joins derived from the equi-join match map: full and cross.

use tabjoin_error::Result;
use tabjoin_store::Table;

use crate::exec::{MatchMap, check_cartesian};
use crate::expr::Assignment;
use crate::keyspec::KeySpec;
use crate::materialize::RowPairs;
use crate::options::{JoinMode, JoinOptions};
use crate::plan::JoinPlan;

/// Every probe row matched with every build row, in build order.
pub(crate) fn cross_matches(plan: &JoinPlan<'_>) -> Result<MatchMap> {
    let probe_rows = plan.probe().len();
    let build_rows = plan.build().len();
    check_cartesian(plan, probe_rows.saturating_mul(build_rows))?;
    let offsets = (0..=probe_rows).map(|p| p * build_rows).collect();
    let rows = (0..probe_rows).flat_map(|_| 0..build_rows).collect();
    Ok(MatchMap::from_parts(offsets, rows, build_rows))
}

/// Append the build rows no probe row matched, null on the probe side.
pub(crate) fn append_unmatched_build(pairs: &mut RowPairs, matches: &MatchMap) {
    for b in matches.unmatched_build_rows() {
        pairs.push(Some(b), None);
    }
}

/// Matched pairs, then unmatched probe rows in place, then unmatched build
/// rows. Key columns coalesce both sides into their common type.
pub fn full_join(
    probe: &Table,
    build: &Table,
    keys: &KeySpec,
    outputs: &[Assignment],
    options: &JoinOptions,
) -> Result<Table> {
    crate::join(probe, build, keys, JoinMode::Full, outputs, options)
}

/// Every probe row paired with every build row, subject to the cartesian
/// guard.
pub fn cross_join(
    probe: &Table,
    build: &Table,
    outputs: &[Assignment],
    options: &JoinOptions,
) -> Result<Table> {
    crate::join(
        probe,
        build,
        &KeySpec::default(),
        JoinMode::Cross,
        outputs,
        options,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabjoin_error::JoinError;
    use tabjoin_store::Column;
    use tabjoin_types::{ColumnType, Value};

    fn keyed(name: &str, ids: &[i64], tag: &str) -> Table {
        Table::from_columns([
            ("id", Column::integer(ids.iter().copied())),
            (name, Column::text(ids.iter().map(|_| tag))),
        ])
        .unwrap()
    }

    #[test]
    fn full_join_keeps_both_unmatched_sides() {
        let probe = keyed("p", &[1, 2], "pv");
        let build = Table::from_columns([
            ("id", Column::real([2.0_f64, 3.5])),
            ("b", Column::text(["b2", "b3"])),
        ])
        .unwrap();
        let out = full_join(
            &probe,
            &build,
            &KeySpec::same(["id"]),
            &[],
            &JoinOptions::strict(),
        )
        .unwrap();
        assert_eq!(out.len(), 3);
        let id = out.column("id").unwrap();
        assert_eq!(id.column_type(), ColumnType::Real);
        assert_eq!(id.get(0), Value::Real(1.0));
        assert_eq!(id.get(1), Value::Real(2.0));
        assert_eq!(id.get(2), Value::Real(3.5));
        assert_eq!(out.column("b").unwrap().get(0), Value::Null);
        assert_eq!(out.column("b").unwrap().get(1), Value::text("b2"));
        assert_eq!(out.column("p").unwrap().get(2), Value::Null);
    }

    #[test]
    fn cross_join_pairs_everything() {
        let probe = keyed("p", &[1, 2], "pv");
        let build = keyed("b", &[7, 8], "bv");
        let out = cross_join(&probe, &build, &[], &JoinOptions::strict()).unwrap();
        assert_eq!(out.len(), 4);
        let names: Vec<&str> = out.names().collect();
        assert_eq!(names, vec!["id", "b", "i.id", "p"]);
        assert_eq!(out.column("id").unwrap().get(1), Value::Integer(8));
        assert_eq!(out.column("i.id").unwrap().get(3), Value::Integer(2));
    }

    #[test]
    fn cross_join_is_guarded() {
        let probe = keyed("p", &[1, 2, 3, 4], "pv");
        let build = keyed("b", &[1, 2, 3, 4], "bv");
        let err = cross_join(&probe, &build, &[], &JoinOptions::strict()).unwrap_err();
        assert_eq!(
            err,
            JoinError::CartesianLimitExceeded {
                rows: 16,
                probe_rows: 4,
                build_rows: 4,
            }
        );
        let ok = cross_join(
            &probe,
            &build,
            &[],
            &JoinOptions::strict().with_cartesian(true),
        )
        .unwrap();
        assert_eq!(ok.len(), 16);
    }
}
