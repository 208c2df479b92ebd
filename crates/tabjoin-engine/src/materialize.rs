//! Turning a match map into output.
//!
//! The read path gathers every output column through a list of
//! (build row, probe row) pairs into a new [`Table`]. The update path
//! computes every assigned column in full before anything is written, then
//! installs all of them through one [`TableWriter`] call.

use tabjoin_error::{JoinError, Result};
use tabjoin_store::{Column, Table, TableWriter};
use tabjoin_types::{ColumnType, Value};
use tracing::{debug, info};

use crate::derived;
use crate::exec::MatchMap;
use crate::metrics;
use crate::options::JoinMode;
use crate::plan::{JoinPlan, ResolvedExpr, ResolvedOperand, ResolvedOutput, Source};
use crate::reduce::reduce;

/// Output rows as (build row, probe row) pairs; `None` is a null-filled
/// side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowPairs {
    pub build: Vec<Option<usize>>,
    pub probe: Vec<Option<usize>>,
}

impl RowPairs {
    pub(crate) fn push(&mut self, build: Option<usize>, probe: Option<usize>) {
        self.build.push(build);
        self.probe.push(probe);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.probe.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.probe.is_empty()
    }
}

/// Output row pairs of a read-mode join.
#[must_use]
pub fn row_pairs(mode: JoinMode, matches: &MatchMap) -> RowPairs {
    let mut pairs = RowPairs::default();
    for (p, rows) in matches.iter() {
        match mode {
            JoinMode::Plain | JoinMode::Full => {
                if rows.is_empty() {
                    pairs.push(None, Some(p));
                }
                for &b in rows {
                    pairs.push(Some(b), Some(p));
                }
            }
            JoinMode::Inner | JoinMode::Cross | JoinMode::Update => {
                for &b in rows {
                    pairs.push(Some(b), Some(p));
                }
            }
            JoinMode::Semi if !rows.is_empty() => pairs.push(None, Some(p)),
            JoinMode::Anti if rows.is_empty() => pairs.push(None, Some(p)),
            JoinMode::EachGroup => pairs.push(None, Some(p)),
            JoinMode::Semi | JoinMode::Anti => {}
        }
    }
    if mode == JoinMode::Full {
        derived::append_unmatched_build(&mut pairs, matches);
    }
    pairs
}

fn source_value(
    plan: &JoinPlan<'_>,
    source: Source,
    build: Option<usize>,
    probe: Option<usize>,
) -> Value {
    match source {
        Source::Build(pos) => build.map_or(Value::Null, |b| plan.build().column_at(pos).get(b)),
        Source::Probe(pos) => probe.map_or(Value::Null, |p| plan.probe().column_at(pos).get(p)),
        Source::Key { pair, output_type } => {
            let value = match (probe, build) {
                (Some(p), _) => plan.probe().column_at(plan.probe_key_positions()[pair]).get(p),
                (None, Some(b)) => plan.build().column_at(plan.build_key_positions()[pair]).get(b),
                (None, None) => Value::Null,
            };
            // Key types are checked at plan time; the common type always
            // admits both sides.
            value.widen_to(output_type).unwrap_or_default()
        }
    }
}

fn operand_value(
    plan: &JoinPlan<'_>,
    operand: &ResolvedOperand,
    build: Option<usize>,
    probe: Option<usize>,
) -> Value {
    match operand {
        ResolvedOperand::Literal(v) => v.clone(),
        ResolvedOperand::Source(s) => source_value(plan, *s, build, probe),
    }
}

fn fit(name: &str, value: Value, ty: ColumnType) -> Result<Value> {
    value
        .widen_to(ty)
        .ok_or_else(|| JoinError::type_mismatch(name, ty, value.type_label()))
}

/// Value of a row-wise output for one pair.
fn eval_row(
    plan: &JoinPlan<'_>,
    output: &ResolvedOutput,
    build: Option<usize>,
    probe: Option<usize>,
) -> Result<Value> {
    let args = |inputs: &[Source]| -> Vec<Value> {
        inputs
            .iter()
            .map(|s| source_value(plan, *s, build, probe))
            .collect()
    };
    let raw = match &output.expr {
        ResolvedExpr::Source(s) => source_value(plan, *s, build, probe),
        ResolvedExpr::Literal(v) => v.clone(),
        ResolvedExpr::Scalar { inputs, func } => func(&args(inputs)),
        ResolvedExpr::Case {
            inputs,
            branches,
            default,
        } => {
            let values = args(inputs);
            let chosen = branches
                .iter()
                .find(|(predicate, _)| predicate(&values))
                .map_or(default, |(_, operand)| operand);
            operand_value(plan, chosen, build, probe)
        }
        ResolvedExpr::Reduce { .. } => {
            return Err(JoinError::invalid_expression(
                output.name.as_str(),
                "reducers have no row-wise value",
            ));
        }
    };
    fit(&output.name, raw, output.output_type)
}

fn evaluate(
    plan: &JoinPlan<'_>,
    matches: &MatchMap,
    output: &ResolvedOutput,
    pairs: &RowPairs,
) -> Result<Column> {
    let name = output.name.as_str();
    match &output.expr {
        ResolvedExpr::Source(Source::Build(pos)) => {
            Ok(plan.build().column_at(*pos).gather(&pairs.build))
        }
        ResolvedExpr::Source(Source::Probe(pos)) => {
            Ok(plan.probe().column_at(*pos).gather(&pairs.probe))
        }
        ResolvedExpr::Source(Source::Key { pair, output_type }) => {
            let column = plan.probe().column_at(plan.probe_key_positions()[*pair]);
            if column.column_type() == *output_type && pairs.probe.iter().all(Option::is_some) {
                return Ok(column.gather(&pairs.probe));
            }
            row_wise(plan, output, pairs)
        }
        ResolvedExpr::Literal(value) => {
            Column::from_values(name, output.output_type, &vec![value.clone(); pairs.len()])
        }
        ResolvedExpr::Reduce { column, reducer } => {
            let source = plan.build().column_at(*column);
            let values = pairs
                .probe
                .iter()
                .map(|p| {
                    let rows = p.map_or(&[][..], |p| matches.matches(p));
                    reduce(name, source, rows, reducer, output.output_type)
                })
                .collect::<Result<Vec<_>>>()?;
            Column::from_values(name, output.output_type, &values)
        }
        ResolvedExpr::Scalar { .. } | ResolvedExpr::Case { .. } => row_wise(plan, output, pairs),
    }
}

fn row_wise(plan: &JoinPlan<'_>, output: &ResolvedOutput, pairs: &RowPairs) -> Result<Column> {
    let values = pairs
        .build
        .iter()
        .zip(&pairs.probe)
        .map(|(b, p)| eval_row(plan, output, *b, *p))
        .collect::<Result<Vec<_>>>()?;
    Column::from_values(&output.name, output.output_type, &values)
}

/// Materialize a read-mode join into a new table.
pub fn materialize(plan: &JoinPlan<'_>, matches: &MatchMap) -> Result<Table> {
    let _span = tracing::debug_span!("join_materialize", mode = plan.mode().as_str()).entered();
    matches.check_fits(plan.probe(), plan.build())?;
    if plan.mode() == JoinMode::Update {
        return Err(JoinError::invalid_expression(
            "update",
            "update plans are applied through stage_update",
        ));
    }
    let pairs = row_pairs(plan.mode(), matches);
    let columns = plan
        .outputs()
        .iter()
        .map(|out| Ok((out.name.clone(), evaluate(plan, matches, out, &pairs)?)))
        .collect::<Result<Vec<_>>>()?;
    let table = Table::from_columns(columns)?;
    debug!(rows = table.len(), columns = table.width(), "join materialized");
    Ok(table)
}

/// Outcome of an update-on-join.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Target rows with at least one match.
    pub rows_matched: usize,
    /// Individual assignments, one per (match, assigned column).
    pub cells_assigned: usize,
    /// Assigned columns, in first-assignment order.
    pub columns: Vec<String>,
}

/// Fully computed update columns, not yet installed.
#[derive(Debug, Clone)]
pub struct StagedUpdate {
    target_rows: usize,
    columns: Vec<(String, Column)>,
    summary: UpdateSummary,
}

/// Whether a target column of type `target` takes values of type `source`.
fn update_compatible(target: ColumnType, source: ColumnType) -> bool {
    target == source || (target.is_textual() && source.is_textual())
}

/// Compute every assigned column of an update plan.
///
/// Target rows without matches keep their values. With several matches the
/// assignment runs once per match in match order, so the last one wins.
/// Assigning to a missing column creates it, null-filled, with the
/// expression's type.
pub fn stage_update(plan: &JoinPlan<'_>, matches: &MatchMap) -> Result<StagedUpdate> {
    let _span = tracing::debug_span!("update_stage", assignments = plan.outputs().len()).entered();
    if plan.mode() != JoinMode::Update {
        return Err(JoinError::invalid_expression(
            plan.mode().as_str(),
            "only update plans can be staged",
        ));
    }
    matches.check_fits(plan.probe(), plan.build())?;

    let target = plan.probe();
    let rows = target.len();
    let mut staged: Vec<(String, Column)> = Vec::new();
    let mut cells = 0_usize;

    for output in plan.outputs() {
        let name = output.name.as_str();
        let slot = staged.iter().position(|(n, _)| n == name);
        let mut column = match slot {
            Some(i) => staged[i].1.clone(),
            None => match target.column(name) {
                Ok(existing) => existing.clone(),
                Err(_) => Column::nulls(output.output_type, rows),
            },
        };
        if !update_compatible(column.column_type(), output.output_type) {
            return Err(JoinError::type_mismatch(
                name,
                column.column_type(),
                output.output_type,
            ));
        }
        for (p, builds) in matches.iter() {
            for &b in builds {
                let value = eval_row(plan, output, Some(b), Some(p))?;
                column.set(name, p, &value)?;
                cells += 1;
            }
        }
        match slot {
            Some(i) => staged[i].1 = column,
            None => staged.push((name.to_owned(), column)),
        }
    }

    // Existing columns no match wrote to stay as they are.
    staged.retain(|(name, column)| {
        target
            .column(name)
            .map_or(true, |existing| !column.shares_storage_with(existing))
    });

    let summary = UpdateSummary {
        rows_matched: matches.matched_probe_rows(),
        cells_assigned: cells,
        columns: plan.outputs().iter().fold(Vec::new(), |mut acc, o| {
            if !acc.contains(&o.name) {
                acc.push(o.name.clone());
            }
            acc
        }),
    };
    debug!(
        rows_matched = summary.rows_matched,
        cells = summary.cells_assigned,
        "update staged"
    );
    Ok(StagedUpdate {
        target_rows: rows,
        columns: staged,
        summary,
    })
}

impl StagedUpdate {
    #[must_use]
    pub const fn summary(&self) -> &UpdateSummary {
        &self.summary
    }

    /// Install the staged columns. Fails without writing anything if the
    /// target no longer has the row count the update was computed for.
    pub fn commit(self, writer: &mut TableWriter<'_>) -> Result<UpdateSummary> {
        if writer.len() != self.target_rows {
            return Err(JoinError::StaleMatchMap {
                expected: self.target_rows,
                actual: writer.len(),
            });
        }
        writer.apply_columns(self.columns)?;
        metrics::record_cells_updated(self.summary.cells_assigned);
        info!(
            rows_matched = self.summary.rows_matched,
            cells = self.summary.cells_assigned,
            columns = ?self.summary.columns,
            "update-on-join committed"
        );
        Ok(self.summary)
    }
}
