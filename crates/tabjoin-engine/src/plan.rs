//! Join planning: key validation, index choice and static resolution of
//! every output expression.
//!
//! Nothing here touches rows. A [`JoinPlan`] borrows both tables and holds
//! column positions, so executing it never looks a name up again.

use std::sync::Arc;

use tabjoin_error::{JoinError, Result, Side};
use tabjoin_store::{KeyIndex, Table};
use tabjoin_types::{ColumnType, Value, check_key_pair, common_key_type};
use tracing::debug;

use crate::expr::{Assignment, ColumnExpr, ColumnRef, Operand, Predicate, ScalarFn};
use crate::keyspec::KeySpec;
use crate::options::{JoinMode, JoinOptions};
use crate::reduce::Reducer;

/// Where match lists come from.
#[derive(Debug, Clone)]
pub enum IndexChoice {
    /// The build table's cached key index; the build key columns are a
    /// prefix of its key.
    ReuseBuild(Arc<KeyIndex>),
    /// The probe table's cached key index, probed with build rows.
    ReverseProbe(Arc<KeyIndex>),
    /// A fresh index over the build key columns.
    Fresh,
    /// No index (cross joins).
    None,
}

impl IndexChoice {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReuseBuild(_) => "reuse_build",
            Self::ReverseProbe(_) => "reverse_probe",
            Self::Fresh => "fresh",
            Self::None => "none",
        }
    }
}

/// A resolved column source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Build column at this position.
    Build(usize),
    /// Probe column at this position.
    Probe(usize),
    /// Value of key pair `pair`: the probe value, or the build value on
    /// rows without a probe side.
    Key { pair: usize, output_type: ColumnType },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedOperand {
    Literal(Value),
    Source(Source),
}

#[derive(Clone)]
pub enum ResolvedExpr {
    Source(Source),
    /// Reduce build column at this position over each probe row's matches.
    Reduce { column: usize, reducer: Reducer },
    Literal(Value),
    Scalar { inputs: Vec<Source>, func: ScalarFn },
    Case {
        inputs: Vec<Source>,
        branches: Vec<(Predicate, ResolvedOperand)>,
        default: ResolvedOperand,
    },
}

impl std::fmt::Debug for ResolvedExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source(s) => f.debug_tuple("Source").field(s).finish(),
            Self::Reduce { column, reducer } => f
                .debug_struct("Reduce")
                .field("column", column)
                .field("reducer", &reducer.name())
                .finish(),
            Self::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Self::Scalar { inputs, .. } => f
                .debug_struct("Scalar")
                .field("inputs", inputs)
                .finish_non_exhaustive(),
            Self::Case {
                inputs,
                branches,
                default,
            } => f
                .debug_struct("Case")
                .field("inputs", inputs)
                .field("branches", &branches.len())
                .field("default", default)
                .finish(),
        }
    }
}

/// One output column (read joins) or assignment target (updates).
#[derive(Debug, Clone)]
pub struct ResolvedOutput {
    pub name: String,
    pub expr: ResolvedExpr,
    pub output_type: ColumnType,
}

/// A validated join, ready to execute.
#[derive(Debug)]
pub struct JoinPlan<'a> {
    probe: &'a Table,
    build: &'a Table,
    keys: KeySpec,
    probe_keys: Vec<usize>,
    build_keys: Vec<usize>,
    mode: JoinMode,
    options: JoinOptions,
    index: IndexChoice,
    outputs: Vec<ResolvedOutput>,
}

impl<'a> JoinPlan<'a> {
    #[must_use]
    pub const fn probe(&self) -> &'a Table {
        self.probe
    }

    #[must_use]
    pub const fn build(&self) -> &'a Table {
        self.build
    }

    #[must_use]
    pub const fn keys(&self) -> &KeySpec {
        &self.keys
    }

    /// Positions of the probe key columns, in key-pair order.
    #[must_use]
    pub fn probe_key_positions(&self) -> &[usize] {
        &self.probe_keys
    }

    /// Positions of the build key columns, in key-pair order.
    #[must_use]
    pub fn build_key_positions(&self) -> &[usize] {
        &self.build_keys
    }

    #[must_use]
    pub const fn mode(&self) -> JoinMode {
        self.mode
    }

    #[must_use]
    pub const fn options(&self) -> &JoinOptions {
        &self.options
    }

    #[must_use]
    pub const fn index(&self) -> &IndexChoice {
        &self.index
    }

    #[must_use]
    pub fn outputs(&self) -> &[ResolvedOutput] {
        &self.outputs
    }
}

/// Plan a join of `probe` against `build`.
///
/// An empty `outputs` list selects the default projection of the mode:
/// build columns followed by the non-key probe columns for row-expanding
/// modes, the probe columns for semi and anti joins. Each-group joins and
/// updates need an explicit list.
pub fn plan<'a>(
    probe: &'a Table,
    build: &'a Table,
    keys: &KeySpec,
    mode: JoinMode,
    outputs: &[Assignment],
    options: &JoinOptions,
) -> Result<JoinPlan<'a>> {
    let _span = tracing::debug_span!(
        "join_plan",
        mode = mode.as_str(),
        keys = keys.len(),
        probe_rows = probe.len(),
        build_rows = build.len()
    )
    .entered();

    if mode == JoinMode::Cross {
        if !keys.is_empty() {
            return Err(JoinError::invalid_expression(
                "on",
                "cross joins take no key columns",
            ));
        }
    } else if keys.is_empty() {
        return Err(JoinError::EmptyKeySpec);
    }

    let mut probe_keys = Vec::with_capacity(keys.len());
    let mut build_keys = Vec::with_capacity(keys.len());
    let mut key_types = Vec::with_capacity(keys.len());
    for pair in keys.pairs() {
        let p = probe
            .position(&pair.probe)
            .ok_or_else(|| JoinError::unknown_column(pair.probe.as_str(), Side::Probe))?;
        let b = build
            .position(&pair.build)
            .ok_or_else(|| JoinError::unknown_column(pair.build.as_str(), Side::Build))?;
        let probe_type = probe.column_at(p).column_type();
        let build_type = build.column_at(b).column_type();
        check_key_pair(&pair.probe, probe_type, &pair.build, build_type)?;
        probe_keys.push(p);
        build_keys.push(b);
        key_types.push((probe_type, build_type));
    }

    let resolver = Resolver {
        probe,
        build,
        keys,
        key_types: &key_types,
        mode,
    };
    let outputs = if outputs.is_empty() {
        resolver.default_outputs()?
    } else {
        outputs
            .iter()
            .map(|a| resolver.resolve(a))
            .collect::<Result<Vec<_>>>()?
    };

    let index = if mode == JoinMode::Cross {
        IndexChoice::None
    } else {
        choose_index(probe, build, keys)
    };

    debug!(
        mode = mode.as_str(),
        on = ?keys.pairs().iter().map(ToString::to_string).collect::<Vec<_>>(),
        index = index.as_str(),
        outputs = outputs.len(),
        "join planned"
    );

    Ok(JoinPlan {
        probe,
        build,
        keys: keys.clone(),
        probe_keys,
        build_keys,
        mode,
        options: *options,
        index,
        outputs,
    })
}

fn is_prefix(columns: &[&str], key: &[String]) -> bool {
    columns.len() <= key.len() && columns.iter().zip(key).all(|(c, k)| *c == k.as_str())
}

fn choose_index(probe: &Table, build: &Table, keys: &KeySpec) -> IndexChoice {
    if let (Some(key), Some(index)) = (build.key(), build.key_index()) {
        if is_prefix(&keys.build_columns(), key) {
            return IndexChoice::ReuseBuild(Arc::clone(index));
        }
    }
    if let (Some(key), Some(index)) = (probe.key(), probe.key_index()) {
        if is_prefix(&keys.probe_columns(), key) {
            return IndexChoice::ReverseProbe(Arc::clone(index));
        }
    }
    IndexChoice::Fresh
}

/// Whether values of type `from` may be produced into a `to` column.
fn assignable(from: ColumnType, to: ColumnType) -> bool {
    from == to
        || (from.is_textual() && to.is_textual())
        || matches!(
            (from, to),
            (ColumnType::Logical, ColumnType::Integer | ColumnType::Real)
                | (ColumnType::Integer, ColumnType::Real)
        )
}

struct Resolver<'r> {
    probe: &'r Table,
    build: &'r Table,
    keys: &'r KeySpec,
    key_types: &'r [(ColumnType, ColumnType)],
    mode: JoinMode,
}

impl Resolver<'_> {
    fn key_type(&self, pair: usize) -> ColumnType {
        let (probe, build) = self.key_types[pair];
        if self.mode == JoinMode::Full {
            common_key_type(probe, build)
        } else {
            probe
        }
    }

    /// Key pair an unqualified `name` denotes, if any.
    fn key_pair_for(&self, name: &str) -> Option<usize> {
        self.keys.pairs().iter().position(|pair| {
            (pair.build == name && (pair.probe == name || !self.probe.contains(name)))
                || (pair.probe == name && (pair.build == name || !self.build.contains(name)))
        })
    }

    fn source_type(&self, source: Source) -> ColumnType {
        match source {
            Source::Build(pos) => self.build.column_at(pos).column_type(),
            Source::Probe(pos) => self.probe.column_at(pos).column_type(),
            Source::Key { output_type, .. } => output_type,
        }
    }

    fn resolve_ref(&self, output: &str, reference: &ColumnRef) -> Result<Source> {
        let name = reference.name.as_str();
        let source = match reference.side {
            Some(Side::Build) => self
                .build
                .position(name)
                .map(Source::Build)
                .ok_or_else(|| JoinError::unknown_column(name, Side::Build))?,
            Some(Side::Probe) => self
                .probe
                .position(name)
                .map(Source::Probe)
                .ok_or_else(|| JoinError::unknown_column(name, Side::Probe))?,
            _ => {
                if let Some(pair) = self.key_pair_for(name) {
                    Source::Key {
                        pair,
                        output_type: self.key_type(pair),
                    }
                } else {
                    match (self.build.position(name), self.probe.position(name)) {
                        (Some(_), Some(_)) => {
                            return Err(JoinError::AmbiguousColumn {
                                name: name.to_owned(),
                            });
                        }
                        (Some(b), None) => Source::Build(b),
                        (None, Some(p)) => Source::Probe(p),
                        (None, None) => return Err(JoinError::unknown_column(name, Side::Probe)),
                    }
                }
            }
        };
        if matches!(source, Source::Build(_)) && !self.mode.exposes_build_rows() {
            let detail = if self.mode == JoinMode::EachGroup {
                format!("`{reference}` is a build column; wrap it in a reducer")
            } else {
                format!(
                    "`{reference}` is a build column, which {} joins do not output",
                    self.mode.as_str()
                )
            };
            return Err(JoinError::invalid_expression(output, detail));
        }
        Ok(source)
    }

    fn resolve_operand(
        &self,
        output: &str,
        operand: &Operand,
        to: ColumnType,
    ) -> Result<ResolvedOperand> {
        match operand {
            Operand::Literal(value) => value
                .widen_to(to)
                .map(ResolvedOperand::Literal)
                .ok_or_else(|| JoinError::type_mismatch(output, to, value.type_label())),
            Operand::Column(reference) => {
                let source = self.resolve_ref(output, reference)?;
                let from = self.source_type(source);
                if !assignable(from, to) {
                    return Err(JoinError::type_mismatch(output, to, from));
                }
                Ok(ResolvedOperand::Source(source))
            }
        }
    }

    fn resolve(&self, assignment: &Assignment) -> Result<ResolvedOutput> {
        let name = assignment.name.as_str();
        let (expr, output_type) = match &assignment.expr {
            ColumnExpr::Column(reference) => {
                let source = self.resolve_ref(name, reference)?;
                (ResolvedExpr::Source(source), self.source_type(source))
            }
            ColumnExpr::Reduce { column, reducer } => {
                if self.mode != JoinMode::EachGroup {
                    return Err(JoinError::invalid_expression(
                        name,
                        format!(
                            "reducer `{}` is only valid in each-group joins",
                            reducer.name()
                        ),
                    ));
                }
                if column.side == Some(Side::Probe) {
                    return Err(JoinError::invalid_expression(
                        name,
                        format!("reducers run over build matches; `{column}` is a probe column"),
                    ));
                }
                let pos = self
                    .build
                    .position(&column.name)
                    .ok_or_else(|| JoinError::unknown_column(column.name.as_str(), Side::Build))?;
                let input = self.build.column_at(pos).column_type();
                let output_type = reducer.output_type(&column.name, input)?;
                (
                    ResolvedExpr::Reduce {
                        column: pos,
                        reducer: reducer.clone(),
                    },
                    output_type,
                )
            }
            ColumnExpr::Literal { value, output_type } => {
                if !value.fits(*output_type) {
                    return Err(JoinError::type_mismatch(
                        name,
                        *output_type,
                        value.type_label(),
                    ));
                }
                (ResolvedExpr::Literal(value.clone()), *output_type)
            }
            ColumnExpr::Scalar {
                inputs,
                func,
                output_type,
            } => {
                let inputs = inputs
                    .iter()
                    .map(|r| self.resolve_ref(name, r))
                    .collect::<Result<Vec<_>>>()?;
                (
                    ResolvedExpr::Scalar {
                        inputs,
                        func: Arc::clone(func),
                    },
                    *output_type,
                )
            }
            ColumnExpr::Case(case) => {
                let inputs = case
                    .inputs
                    .iter()
                    .map(|r| self.resolve_ref(name, r))
                    .collect::<Result<Vec<_>>>()?;
                let branches = case
                    .branches
                    .iter()
                    .map(|b| {
                        Ok((
                            Arc::clone(&b.predicate),
                            self.resolve_operand(name, &b.value, case.output_type)?,
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let default = self.resolve_operand(name, &case.default, case.output_type)?;
                (
                    ResolvedExpr::Case {
                        inputs,
                        branches,
                        default,
                    },
                    case.output_type,
                )
            }
        };
        Ok(ResolvedOutput {
            name: name.to_owned(),
            expr,
            output_type,
        })
    }

    fn default_outputs(&self) -> Result<Vec<ResolvedOutput>> {
        let column = |name: String, source: Source| ResolvedOutput {
            name,
            output_type: self.source_type(source),
            expr: ResolvedExpr::Source(source),
        };
        match self.mode {
            JoinMode::Semi | JoinMode::Anti => Ok(self
                .probe
                .names()
                .enumerate()
                .map(|(pos, name)| column(name.to_owned(), Source::Probe(pos)))
                .collect()),
            JoinMode::EachGroup | JoinMode::Update => Err(JoinError::invalid_expression(
                self.mode.as_str(),
                "this mode needs an explicit output list",
            )),
            JoinMode::Plain | JoinMode::Inner | JoinMode::Full | JoinMode::Cross => {
                let mut outputs = Vec::with_capacity(self.build.width() + self.probe.width());
                for (pos, name) in self.build.names().enumerate() {
                    let source = match self.keys.pairs().iter().position(|p| p.build == name) {
                        Some(pair) => Source::Key {
                            pair,
                            output_type: self.key_type(pair),
                        },
                        None => Source::Build(pos),
                    };
                    outputs.push(column(name.to_owned(), source));
                }
                for (pos, name) in self.probe.names().enumerate() {
                    if self.keys.is_probe_key(name) {
                        continue;
                    }
                    let out = if self.build.contains(name) {
                        format!("i.{name}")
                    } else {
                        name.to_owned()
                    };
                    outputs.push(column(out, Source::Probe(pos)));
                }
                Ok(outputs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::ReducerRegistry;
    use tabjoin_store::Column;

    fn probe() -> Table {
        Table::from_columns([
            ("id", Column::integer([1_i64, 2, 3])),
            ("v", Column::text(["a", "b", "c"])),
            ("w", Column::real([0.5_f64, 1.5, 2.5])),
        ])
        .unwrap()
    }

    fn build() -> Table {
        Table::from_columns([
            ("id", Column::real([1.0_f64, 2.0])),
            ("v", Column::text(["p", "q"])),
            ("n", Column::integer([10_i64, 20])),
        ])
        .unwrap()
    }

    fn opts() -> JoinOptions {
        JoinOptions::strict()
    }

    #[test]
    fn empty_key_spec_is_rejected() {
        let (p, b) = (probe(), build());
        let err = plan(&p, &b, &KeySpec::default(), JoinMode::Plain, &[], &opts()).unwrap_err();
        assert_eq!(err, JoinError::EmptyKeySpec);
    }

    #[test]
    fn missing_key_column_names_its_side() {
        let (p, b) = (probe(), build());
        let keys = KeySpec::new([("id", "nope")]);
        let err = plan(&p, &b, &keys, JoinMode::Plain, &[], &opts()).unwrap_err();
        assert_eq!(err, JoinError::unknown_column("nope", Side::Build));
    }

    #[test]
    fn incompatible_key_types_rejected() {
        let (p, b) = (probe(), build());
        let keys = KeySpec::new([("v", "n")]);
        let err = plan(&p, &b, &keys, JoinMode::Plain, &[], &opts()).unwrap_err();
        assert_eq!(err.kind(), "incompatible_key_types");
    }

    #[test]
    fn default_projection_prefixes_colliding_probe_columns() {
        let (p, b) = (probe(), build());
        let plan = plan(&p, &b, &KeySpec::same(["id"]), JoinMode::Plain, &[], &opts()).unwrap();
        let names: Vec<&str> = plan.outputs().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["id", "v", "n", "i.v", "w"]);
        // Key carries probe values and type.
        assert!(matches!(
            plan.outputs()[0].expr,
            ResolvedExpr::Source(Source::Key { pair: 0, .. })
        ));
        assert_eq!(plan.outputs()[0].output_type, ColumnType::Integer);
    }

    #[test]
    fn full_join_key_type_is_common_type() {
        let (p, b) = (probe(), build());
        let plan = plan(&p, &b, &KeySpec::same(["id"]), JoinMode::Full, &[], &opts()).unwrap();
        assert_eq!(plan.outputs()[0].output_type, ColumnType::Real);
    }

    #[test]
    fn unqualified_shared_name_is_ambiguous() {
        let (p, b) = (probe(), build());
        let err = plan(
            &p,
            &b,
            &KeySpec::same(["id"]),
            JoinMode::Plain,
            &["v".into()],
            &opts(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            JoinError::AmbiguousColumn {
                name: "v".to_owned()
            }
        );
        // Qualified references and the shared key are fine.
        let ok = plan(
            &p,
            &b,
            &KeySpec::same(["id"]),
            JoinMode::Plain,
            &["x.v".into(), "i.v".into(), "id".into(), "n".into()],
            &opts(),
        )
        .unwrap();
        assert_eq!(ok.outputs().len(), 4);
    }

    #[test]
    fn semi_join_rejects_build_columns() {
        let (p, b) = (probe(), build());
        let err = plan(
            &p,
            &b,
            &KeySpec::same(["id"]),
            JoinMode::Semi,
            &["x.n".into()],
            &opts(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_expression");
    }

    #[test]
    fn reducers_only_in_each_group() {
        let (p, b) = (probe(), build());
        let sum = ReducerRegistry::with_builtins().resolve("sum").unwrap();
        let outputs = [ColumnExpr::reduce("n", sum).named("total")];
        let err = plan(&p, &b, &KeySpec::same(["id"]), JoinMode::Plain, &outputs, &opts())
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_expression");
        let ok = plan(
            &p,
            &b,
            &KeySpec::same(["id"]),
            JoinMode::EachGroup,
            &outputs,
            &opts(),
        )
        .unwrap();
        assert_eq!(ok.outputs()[0].output_type, ColumnType::Integer);
    }

    #[test]
    fn cached_build_key_is_reused_by_prefix() {
        let p = probe();
        let mut b = Table::from_columns([
            ("id", Column::integer([2_i64, 1])),
            ("day", Column::integer([1_i64, 1])),
        ])
        .unwrap();
        b.set_key(&["id", "day"]).unwrap();
        let plan = plan(&p, &b, &KeySpec::same(["id"]), JoinMode::Plain, &[], &opts()).unwrap();
        assert_eq!(plan.index().as_str(), "reuse_build");
    }

    #[test]
    fn keyed_probe_selects_reverse_probing() {
        let mut p = probe();
        p.set_key(&["id"]).unwrap();
        let b = build();
        let plan = plan(&p, &b, &KeySpec::same(["id"]), JoinMode::Plain, &[], &opts()).unwrap();
        assert_eq!(plan.index().as_str(), "reverse_probe");
    }

    #[test]
    fn non_prefix_key_builds_fresh() {
        let p = probe();
        let mut b = build();
        b.set_key(&["n"]).unwrap();
        let plan = plan(&p, &b, &KeySpec::same(["id"]), JoinMode::Plain, &[], &opts()).unwrap();
        assert_eq!(plan.index().as_str(), "fresh");
    }

    #[test]
    fn case_operand_types_are_checked() {
        use crate::expr::Case;
        let (p, b) = (probe(), build());
        let case = Case::new(["i.w"], ColumnType::Integer)
            .when(|_| true, Operand::col("i.v"))
            .otherwise(Operand::lit(0_i64));
        let err = plan(
            &p,
            &b,
            &KeySpec::same(["id"]),
            JoinMode::Plain,
            &[Assignment::new("c", case)],
            &opts(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "type_mismatch");
    }

    #[test]
    fn cross_join_refuses_keys() {
        let (p, b) = (probe(), build());
        let err = plan(&p, &b, &KeySpec::same(["id"]), JoinMode::Cross, &[], &opts()).unwrap_err();
        assert_eq!(err.kind(), "invalid_expression");
    }
}
