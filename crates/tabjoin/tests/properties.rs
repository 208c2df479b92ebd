//! Property checks over randomly keyed tables.

use proptest::prelude::*;
use tabjoin::{
    Assignment, Column, ColumnExpr, IndexKind, JoinOptions, Table, Value, anti_join, inner_join,
    right_join, semi_join, update_join,
};

const ON: &[(&str, &str)] = &[("k", "k")];

fn keyed(keys: &[Option<i64>], payload: &str) -> Table {
    Table::from_columns([
        ("k", Column::integer(keys.iter().copied())),
        (payload, Column::integer(0..keys.len() as i64)),
    ])
    .expect("table")
}

fn column(table: &Table, name: &str) -> Vec<Value> {
    let c = table.column(name).expect("column");
    (0..c.len()).map(|r| c.get(r)).collect()
}

fn keys() -> impl Strategy<Value = Vec<Option<i64>>> {
    prop::collection::vec(prop::option::weighted(0.9, 0_i64..8), 0..24)
}

fn relaxed() -> JoinOptions {
    JoinOptions::strict().with_cartesian(true)
}

proptest! {
    #[test]
    fn anti_and_semi_partition_x(xk in keys(), yk in keys()) {
        let x = keyed(&xk, "row");
        let y = keyed(&yk, "other");
        let anti = anti_join(&x, &y, ON, &relaxed()).expect("anti");
        let semi = semi_join(&x, &y, ON, &relaxed()).expect("semi");
        prop_assert_eq!(anti.len() + semi.len(), x.len());

        let mut rows: Vec<Value> = column(&anti, "row");
        rows.extend(column(&semi, "row"));
        rows.sort_by_key(|v| v.as_i64());
        prop_assert_eq!(rows, column(&x, "row"));
    }

    #[test]
    fn right_join_covers_every_y_row(xk in keys(), yk in keys()) {
        let x = keyed(&xk, "row");
        let y = keyed(&yk, "other");
        let out = right_join(&x, &y, ON, &relaxed()).expect("right");
        let expected: usize = yk
            .iter()
            .map(|k| match k {
                Some(k) => xk.iter().filter(|x| **x == Some(*k)).count().max(1),
                None => 1,
            })
            .sum();
        prop_assert!(out.len() >= y.len());
        prop_assert_eq!(out.len(), expected);

        // Probe rows appear in their original order.
        let others = column(&out, "other");
        prop_assert!(others.windows(2).all(|w| w[0].as_i64() <= w[1].as_i64()));
    }

    #[test]
    fn inner_join_has_no_null_keys(xk in keys(), yk in keys()) {
        let x = keyed(&xk, "row");
        let y = keyed(&yk, "other");
        let out = inner_join(&x, &y, ON, &relaxed()).expect("inner");
        prop_assert!(column(&out, "k").iter().all(|v| !v.is_null()));
    }

    #[test]
    fn index_kind_does_not_change_results(xk in keys(), yk in keys()) {
        let x = keyed(&xk, "row");
        let y = keyed(&yk, "other");
        let hash = right_join(&x, &y, ON, &relaxed()).expect("hash");
        let sorted = right_join(&x, &y, ON, &relaxed().with_index_kind(IndexKind::Sorted))
            .expect("sorted");
        prop_assert_eq!(column(&hash, "row"), column(&sorted, "row"));
        prop_assert_eq!(column(&hash, "other"), column(&sorted, "other"));
    }

    #[test]
    fn self_assignment_leaves_target_unchanged(xk in keys(), yk in keys()) {
        let mut x = keyed(&xk, "row");
        let y = keyed(&yk, "other");
        let before = column(&x, "row");
        let summary = update_join(
            &mut x,
            &y,
            ON,
            &[Assignment::new("row", ColumnExpr::col("x.row"))],
            &relaxed(),
        )
        .expect("update");
        prop_assert_eq!(column(&x, "row"), before);
        let keys: Vec<Value> = xk.iter().map(|k| k.map_or(Value::Null, Value::Integer)).collect();
        prop_assert_eq!(column(&x, "k"), keys);
        prop_assert!(summary.rows_matched <= x.len());
    }
}
