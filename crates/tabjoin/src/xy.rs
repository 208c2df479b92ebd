//! Joins phrased over an `x` table and a `y` table.
//!
//! Every helper takes key pairs as `(x column, y column)`. In output and
//! assignment expressions `x.` names a column of `x` and `i.` a column of
//! `y`, whichever of the two ends up probing.

use tabjoin_engine::{Assignment, JoinMode, JoinOptions, KeySpec, UpdateSummary};
use tabjoin_error::Result;
use tabjoin_store::Table;
use tracing::debug;

/// Keys with `y` probing `x`.
fn y_probes(on: &[(&str, &str)]) -> KeySpec {
    KeySpec::new(on.iter().map(|&(x, y)| (y, x)))
}

/// Keys with `x` probing `y`.
fn x_probes(on: &[(&str, &str)]) -> KeySpec {
    KeySpec::new(on.iter().copied())
}

/// Expressions written with `x.` for the probing `x` table.
fn flipped(outputs: &[Assignment]) -> Vec<Assignment> {
    outputs.iter().cloned().map(Assignment::swap_sides).collect()
}

/// Every row of `y`, with the matching rows of `x` or nulls.
///
/// Columns: all of `x` (key columns carry the `y` value), then the non-key
/// columns of `y`, prefixed `i.` where `x` has the same name.
pub fn right_join(
    x: &Table,
    y: &Table,
    on: &[(&str, &str)],
    options: &JoinOptions,
) -> Result<Table> {
    tabjoin_engine::join(y, x, &y_probes(on), JoinMode::Plain, &[], options)
}

/// Like [`right_join`], dropping rows of `y` without a match.
pub fn inner_join(
    x: &Table,
    y: &Table,
    on: &[(&str, &str)],
    options: &JoinOptions,
) -> Result<Table> {
    tabjoin_engine::join(y, x, &y_probes(on), JoinMode::Inner, &[], options)
}

/// Every row of `x`, with the matching rows of `y` or nulls.
///
/// Columns: all of `y` first, then the non-key columns of `x`, prefixed `i.`
/// where `y` has the same name.
pub fn left_join(
    x: &Table,
    y: &Table,
    on: &[(&str, &str)],
    options: &JoinOptions,
) -> Result<Table> {
    tabjoin_engine::join(x, y, &x_probes(on), JoinMode::Plain, &[], options)
}

/// Rows of `x` with no match in `y`, in `x` order.
pub fn anti_join(
    x: &Table,
    y: &Table,
    on: &[(&str, &str)],
    options: &JoinOptions,
) -> Result<Table> {
    tabjoin_engine::join(x, y, &x_probes(on), JoinMode::Anti, &[], options)
}

/// Rows of `x` with at least one match in `y`, each once, in `x` order.
pub fn semi_join(
    x: &Table,
    y: &Table,
    on: &[(&str, &str)],
    options: &JoinOptions,
) -> Result<Table> {
    tabjoin_engine::join(x, y, &x_probes(on), JoinMode::Semi, &[], options)
}

/// Rows of both tables: matched pairs and unmatched `y` rows in `y` order,
/// then the `x` rows nothing matched.
pub fn full_join(
    x: &Table,
    y: &Table,
    on: &[(&str, &str)],
    options: &JoinOptions,
) -> Result<Table> {
    tabjoin_engine::full_join(y, x, &y_probes(on), &[], options)
}

/// Every row of `y` paired with every row of `x`.
pub fn cross_join(x: &Table, y: &Table, options: &JoinOptions) -> Result<Table> {
    tabjoin_engine::cross_join(y, x, &[], options)
}

/// One output row per row of `y`, with `outputs` reduced over its matching
/// rows of `x`.
pub fn each_group(
    x: &Table,
    y: &Table,
    on: &[(&str, &str)],
    outputs: &[Assignment],
    options: &JoinOptions,
) -> Result<Table> {
    tabjoin_engine::join(y, x, &y_probes(on), JoinMode::EachGroup, outputs, options)
}

/// Assign into `x` from its matching rows of `y`.
///
/// Rows of `x` without a match keep their values. On error `x` is
/// unchanged.
pub fn update_join(
    x: &mut Table,
    y: &Table,
    on: &[(&str, &str)],
    assignments: &[Assignment],
    options: &JoinOptions,
) -> Result<UpdateSummary> {
    debug!(
        targets = x.len(),
        sources = y.len(),
        columns = assignments.len(),
        "update join"
    );
    tabjoin_engine::update_join(x, y, &x_probes(on), &flipped(assignments), options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabjoin_engine::ColumnExpr;
    use tabjoin_error::JoinError;
    use tabjoin_store::Column;
    use tabjoin_types::Value;

    fn x() -> Table {
        Table::from_columns([
            ("id", Column::integer([1_i64, 2, 3])),
            ("v", Column::text(["a", "b", "c"])),
        ])
        .unwrap()
    }

    fn y() -> Table {
        Table::from_columns([
            ("key", Column::integer([3_i64, 9, 1])),
            ("v", Column::integer([30_i64, 90, 10])),
        ])
        .unwrap()
    }

    const ON: &[(&str, &str)] = &[("id", "key")];

    fn texts(t: &Table, name: &str) -> Vec<Value> {
        let c = t.column(name).unwrap();
        (0..c.len()).map(|r| c.get(r)).collect()
    }

    #[test]
    fn right_join_follows_y() {
        let out = right_join(&x(), &y(), ON, &JoinOptions::strict()).unwrap();
        assert_eq!(out.names().collect::<Vec<_>>(), ["id", "v", "i.v"]);
        assert_eq!(
            texts(&out, "id"),
            [Value::Integer(3), Value::Integer(9), Value::Integer(1)]
        );
        assert_eq!(
            texts(&out, "v"),
            [Value::text("c"), Value::Null, Value::text("a")]
        );
    }

    #[test]
    fn inner_join_drops_unmatched_y_rows() {
        let out = inner_join(&x(), &y(), ON, &JoinOptions::strict()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(texts(&out, "id"), [Value::Integer(3), Value::Integer(1)]);
    }

    #[test]
    fn left_join_follows_x() {
        let out = left_join(&x(), &y(), ON, &JoinOptions::strict()).unwrap();
        assert_eq!(out.names().collect::<Vec<_>>(), ["key", "v", "i.v"]);
        assert_eq!(
            texts(&out, "key"),
            [Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
        assert_eq!(
            texts(&out, "v"),
            [Value::Integer(10), Value::Null, Value::Integer(30)]
        );
    }

    #[test]
    fn anti_and_semi_split_x() {
        let options = JoinOptions::strict();
        let anti = anti_join(&x(), &y(), ON, &options).unwrap();
        let semi = semi_join(&x(), &y(), ON, &options).unwrap();
        assert_eq!(texts(&anti, "id"), [Value::Integer(2)]);
        assert_eq!(texts(&semi, "id"), [Value::Integer(1), Value::Integer(3)]);
    }

    #[test]
    fn full_join_appends_unmatched_x_rows() {
        let out = full_join(&x(), &y(), ON, &JoinOptions::strict()).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(
            texts(&out, "id"),
            [
                Value::Integer(3),
                Value::Integer(9),
                Value::Integer(1),
                Value::Integer(2)
            ]
        );
    }

    #[test]
    fn update_join_reads_y_through_i_prefix() {
        let mut target = Table::from_columns([
            ("id", Column::integer([1_i64, 2, 3])),
            ("n", Column::integer([0_i64, 0, 0])),
        ])
        .unwrap();
        let summary = update_join(
            &mut target,
            &y(),
            ON,
            &[Assignment::new("n", ColumnExpr::col("i.v"))],
            &JoinOptions::strict(),
        )
        .unwrap();
        assert_eq!(summary.rows_matched, 2);
        assert_eq!(
            texts(&target, "n"),
            [Value::Integer(10), Value::Integer(0), Value::Integer(30)]
        );
    }

    #[test]
    fn each_group_requires_outputs() {
        let err = each_group(&x(), &y(), ON, &[], &JoinOptions::strict()).unwrap_err();
        assert!(matches!(err, JoinError::InvalidExpression { .. }));
    }
}
