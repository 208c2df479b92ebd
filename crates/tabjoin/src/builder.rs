//! The `Join` builder.

use tabjoin_engine::{
    Assignment, JoinMode, JoinOptions, JoinPlan, KeySpec, MatchMap, Mult, execute, materialize,
    plan,
};
use tabjoin_error::Result;
use tabjoin_store::Table;

/// A join of `probe` rows against `build` rows.
///
/// ```
/// use tabjoin::{Column, Join, JoinMode, Table};
///
/// let build = Table::from_columns([
///     ("id", Column::integer([1_i64, 2])),
///     ("v", Column::text(["a", "b"])),
/// ])?;
/// let probe = Table::from_columns([("id", Column::integer([2_i64, 2, 5]))])?;
/// let out = Join::new(&probe, &build)
///     .on_same(["id"])
///     .mode(JoinMode::Plain)
///     .select(["id", "x.v"])
///     .run()?;
/// assert_eq!(out.len(), 3);
/// # Ok::<(), tabjoin::JoinError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Join<'a> {
    probe: &'a Table,
    build: &'a Table,
    keys: KeySpec,
    mode: JoinMode,
    outputs: Vec<Assignment>,
    options: JoinOptions,
}

impl<'a> Join<'a> {
    #[must_use]
    pub fn new(probe: &'a Table, build: &'a Table) -> Self {
        Self {
            probe,
            build,
            keys: KeySpec::default(),
            mode: JoinMode::Plain,
            outputs: Vec::new(),
            options: JoinOptions::strict(),
        }
    }

    /// Key pairs as `(probe column, build column)`.
    #[must_use]
    pub fn on<I, P, B>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (P, B)>,
        P: Into<String>,
        B: Into<String>,
    {
        self.keys = KeySpec::new(pairs);
        self
    }

    /// Key columns named the same in both tables.
    #[must_use]
    pub fn on_same<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keys = KeySpec::same(names);
        self
    }

    #[must_use]
    pub fn keys(mut self, keys: KeySpec) -> Self {
        self.keys = keys;
        self
    }

    #[must_use]
    pub const fn mode(mut self, mode: JoinMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the output list. An empty list selects the mode's default
    /// projection.
    #[must_use]
    pub fn select<I, A>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Assignment>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    /// Append one output.
    #[must_use]
    pub fn output(mut self, output: impl Into<Assignment>) -> Self {
        self.outputs.push(output.into());
        self
    }

    #[must_use]
    pub const fn options(mut self, options: JoinOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub const fn allow_cartesian(mut self, allow: bool) -> Self {
        self.options.allow_cartesian = allow;
        self
    }

    #[must_use]
    pub const fn mult(mut self, mult: Mult) -> Self {
        self.options.mult = mult;
        self
    }

    pub fn plan(&self) -> Result<JoinPlan<'a>> {
        plan(
            self.probe,
            self.build,
            &self.keys,
            self.mode,
            &self.outputs,
            &self.options,
        )
    }

    /// Match map only, without materializing.
    pub fn matches(&self) -> Result<MatchMap> {
        execute(&self.plan()?)
    }

    pub fn run(&self) -> Result<Table> {
        let plan = self.plan()?;
        let matches = execute(&plan)?;
        materialize(&plan, &matches)
    }
}
