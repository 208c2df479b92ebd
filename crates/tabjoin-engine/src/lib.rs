//! Join planning, execution and materialization over [`tabjoin_store`]
//! tables.
//!
//! A join runs in three steps:
//! 1. [`plan`] validates the key spec, picks an index (a cached key index on
//!    either side, or a fresh one) and resolves every output expression.
//! 2. [`execute`] probes the index and returns a [`MatchMap`], enforcing the
//!    cartesian guard.
//! 3. [`materialize`] builds a new table, or [`stage_update`] computes the
//!    columns of an update-on-join that [`StagedUpdate::commit`] installs
//!    through the target's writer.
//!
//! [`join`] and [`update_join`] run all three.

pub mod derived;
pub mod exec;
pub mod expr;
pub mod keyspec;
pub mod materialize;
pub mod metrics;
pub mod options;
pub mod plan;
pub mod reduce;

pub use derived::{cross_join, full_join};
pub use exec::{MatchMap, execute};
pub use expr::{Assignment, Case, ColumnExpr, ColumnRef, Operand};
pub use keyspec::{KeyPair, KeySpec};
pub use materialize::{RowPairs, StagedUpdate, UpdateSummary, materialize, stage_update};
pub use metrics::{EngineMetricsSnapshot, engine_metrics_snapshot, reset_engine_metrics};
pub use options::{JoinMode, JoinOptions, Mult};
pub use plan::{IndexChoice, JoinPlan, plan};
pub use reduce::{Reducer, ReducerOutput, ReducerRegistry};

use tabjoin_error::Result;
use tabjoin_store::Table;

/// Plan, execute and materialize a read-mode join.
pub fn join(
    probe: &Table,
    build: &Table,
    keys: &KeySpec,
    mode: JoinMode,
    outputs: &[Assignment],
    options: &JoinOptions,
) -> Result<Table> {
    let plan = plan(probe, build, keys, mode, outputs, options)?;
    let matches = execute(&plan)?;
    materialize(&plan, &matches)
}

/// Assign into `target` from the matching rows of `source`.
///
/// On error `target` is unchanged.
pub fn update_join(
    target: &mut Table,
    source: &Table,
    keys: &KeySpec,
    assignments: &[Assignment],
    options: &JoinOptions,
) -> Result<UpdateSummary> {
    let staged = {
        let plan = plan(target, source, keys, JoinMode::Update, assignments, options)?;
        let matches = execute(&plan)?;
        stage_update(&plan, &matches)?
    };
    staged.commit(&mut target.writer())
}
