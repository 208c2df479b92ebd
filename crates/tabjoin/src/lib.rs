//! In-memory columnar joins and update-by-reference.
//!
//! Two entry points:
//! - [`Join`], a builder over a probe and a build table that exposes every
//!   mode and option of the engine.
//! - Helpers over an `x` and a `y` table ([`right_join`], [`inner_join`],
//!   [`left_join`], [`anti_join`], [`semi_join`], [`full_join`],
//!   [`cross_join`], [`each_group`], [`update_join`]). Key pairs are given as
//!   `(x column, y column)`, and column references use `x.` for the `x`
//!   table and `i.` for `y`.
//!
//! ```
//! use tabjoin::{Column, JoinOptions, Table, inner_join};
//!
//! let x = Table::from_columns([
//!     ("id", Column::integer([1_i64, 2, 3])),
//!     ("price", Column::real([9.5_f64, 3.0, 4.25])),
//! ])?;
//! let y = Table::from_columns([
//!     ("id", Column::integer([3_i64, 1])),
//!     ("qty", Column::integer([2_i64, 5])),
//! ])?;
//! let out = inner_join(&x, &y, &[("id", "id")], &JoinOptions::strict())?;
//! assert_eq!(out.len(), 2);
//! # Ok::<(), tabjoin::JoinError>(())
//! ```

mod builder;
mod xy;

pub use builder::Join;
pub use xy::{
    anti_join, cross_join, each_group, full_join, inner_join, left_join, right_join, semi_join,
    update_join,
};

pub use tabjoin_engine::{
    Assignment, Case, ColumnExpr, ColumnRef, EngineMetricsSnapshot, IndexChoice, JoinMode,
    JoinOptions, JoinPlan, KeyPair, KeySpec, MatchMap, Mult, Operand, Reducer, ReducerOutput,
    ReducerRegistry, StagedUpdate, UpdateSummary, engine_metrics_snapshot, reset_engine_metrics,
};
pub use tabjoin_error::{JoinError, Result, Side};
pub use tabjoin_store::{
    BuildOptions, Column, IndexKind, KeyIndex, Table, TableWriter, TypeCoercion,
};
pub use tabjoin_types::{ColumnType, KeyValue, Value};
