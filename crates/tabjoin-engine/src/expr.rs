//! Output and assignment expressions.
//!
//! Expressions name columns through [`ColumnRef`]s. A reference may be
//! qualified with `x.` (build table) or `i.` (probe table); unqualified
//! references are resolved against both tables at plan time.

use std::fmt;
use std::sync::Arc;

use tabjoin_error::Side;
use tabjoin_types::{ColumnType, Value};

use crate::reduce::Reducer;

/// Scalar function over the input values of one output row.
pub type ScalarFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Case branch condition over the input values of one output row.
pub type Predicate = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

/// A possibly qualified column name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub side: Option<Side>,
    pub name: String,
}

impl ColumnRef {
    /// Parse `x.name`, `i.name` or a bare `name`.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        if let Some(name) = text.strip_prefix("x.") {
            Self::build(name)
        } else if let Some(name) = text.strip_prefix("i.") {
            Self::probe(name)
        } else {
            Self::unqualified(text)
        }
    }

    pub fn build(name: impl Into<String>) -> Self {
        Self {
            side: Some(Side::Build),
            name: name.into(),
        }
    }

    pub fn probe(name: impl Into<String>) -> Self {
        Self {
            side: Some(Side::Probe),
            name: name.into(),
        }
    }

    pub fn unqualified(name: impl Into<String>) -> Self {
        Self {
            side: None,
            name: name.into(),
        }
    }

    /// Exchange the build and probe qualifiers.
    #[must_use]
    pub fn swap_sides(mut self) -> Self {
        self.side = match self.side {
            Some(Side::Build) => Some(Side::Probe),
            Some(Side::Probe) => Some(Side::Build),
            other => other,
        };
        self
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.side {
            Some(Side::Build) => write!(f, "x.{}", self.name),
            Some(Side::Probe) => write!(f, "i.{}", self.name),
            _ => f.write_str(&self.name),
        }
    }
}

impl From<&str> for ColumnRef {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl From<String> for ColumnRef {
    fn from(text: String) -> Self {
        Self::parse(&text)
    }
}

/// Value chosen by a case branch.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Column(ColumnRef),
}

impl Operand {
    pub fn col(reference: impl Into<ColumnRef>) -> Self {
        Self::Column(reference.into())
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    #[must_use]
    fn swap_sides(self) -> Self {
        match self {
            Self::Column(c) => Self::Column(c.swap_sides()),
            lit @ Self::Literal(_) => lit,
        }
    }
}

#[derive(Clone)]
pub struct CaseBranch {
    pub predicate: Predicate,
    pub value: Operand,
}

/// Ordered `(predicate, value)` branches with a default, evaluated left to
/// right; the first true predicate wins.
#[derive(Clone)]
pub struct Case {
    pub inputs: Vec<ColumnRef>,
    pub branches: Vec<CaseBranch>,
    pub default: Operand,
    pub output_type: ColumnType,
}

impl Case {
    /// Case over `inputs`; predicates see their values in this order.
    pub fn new<I, R>(inputs: I, output_type: ColumnType) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ColumnRef>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            branches: Vec::new(),
            default: Operand::Literal(Value::Null),
            output_type,
        }
    }

    #[must_use]
    pub fn when<F>(mut self, predicate: F, value: Operand) -> Self
    where
        F: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        self.branches.push(CaseBranch {
            predicate: Arc::new(predicate),
            value,
        });
        self
    }

    #[must_use]
    pub fn otherwise(mut self, value: Operand) -> Self {
        self.default = value;
        self
    }
}

impl fmt::Debug for Case {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Case")
            .field("inputs", &self.inputs)
            .field("branches", &self.branches.len())
            .field("default", &self.default)
            .field("output_type", &self.output_type)
            .finish()
    }
}

/// How one output column is computed.
#[derive(Clone)]
pub enum ColumnExpr {
    /// Pass a column through. Unqualified join-key names yield the key.
    Column(ColumnRef),
    /// Reduce the build matches of a probe row (each-group only).
    Reduce { column: ColumnRef, reducer: Reducer },
    /// The same value on every row.
    Literal { value: Value, output_type: ColumnType },
    /// Row-wise function of `inputs`.
    Scalar {
        inputs: Vec<ColumnRef>,
        func: ScalarFn,
        output_type: ColumnType,
    },
    Case(Case),
}

impl ColumnExpr {
    pub fn col(reference: impl Into<ColumnRef>) -> Self {
        Self::Column(reference.into())
    }

    pub fn reduce(column: impl Into<ColumnRef>, reducer: Reducer) -> Self {
        Self::Reduce {
            column: column.into(),
            reducer,
        }
    }

    /// Literal typed after its value; a bare null is logical.
    pub fn lit(value: impl Into<Value>) -> Self {
        let value = value.into();
        let output_type = value.value_type().unwrap_or(ColumnType::Logical);
        Self::Literal { value, output_type }
    }

    /// Typed all-null literal.
    #[must_use]
    pub const fn null(output_type: ColumnType) -> Self {
        Self::Literal {
            value: Value::Null,
            output_type,
        }
    }

    pub fn scalar<I, R, F>(inputs: I, output_type: ColumnType, func: F) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ColumnRef>,
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self::Scalar {
            inputs: inputs.into_iter().map(Into::into).collect(),
            func: Arc::new(func),
            output_type,
        }
    }

    /// Name this expression, producing an output or assignment entry.
    pub fn named(self, name: impl Into<String>) -> Assignment {
        Assignment {
            name: name.into(),
            expr: self,
        }
    }

    /// Exchange the build and probe qualifiers of every reference.
    #[must_use]
    pub fn swap_sides(self) -> Self {
        match self {
            Self::Column(c) => Self::Column(c.swap_sides()),
            Self::Reduce { column, reducer } => Self::Reduce {
                column: column.swap_sides(),
                reducer,
            },
            lit @ Self::Literal { .. } => lit,
            Self::Scalar {
                inputs,
                func,
                output_type,
            } => Self::Scalar {
                inputs: inputs.into_iter().map(ColumnRef::swap_sides).collect(),
                func,
                output_type,
            },
            Self::Case(case) => Self::Case(Case {
                inputs: case.inputs.into_iter().map(ColumnRef::swap_sides).collect(),
                branches: case
                    .branches
                    .into_iter()
                    .map(|b| CaseBranch {
                        predicate: b.predicate,
                        value: b.value.swap_sides(),
                    })
                    .collect(),
                default: case.default.swap_sides(),
                output_type: case.output_type,
            }),
        }
    }
}

impl fmt::Debug for ColumnExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(c) => f.debug_tuple("Column").field(c).finish(),
            Self::Reduce { column, reducer } => f
                .debug_struct("Reduce")
                .field("column", column)
                .field("reducer", &reducer.name())
                .finish(),
            Self::Literal { value, output_type } => f
                .debug_struct("Literal")
                .field("value", value)
                .field("output_type", output_type)
                .finish(),
            Self::Scalar {
                inputs,
                output_type,
                ..
            } => f
                .debug_struct("Scalar")
                .field("inputs", inputs)
                .field("output_type", output_type)
                .finish_non_exhaustive(),
            Self::Case(case) => fmt::Debug::fmt(case, f),
        }
    }
}

impl From<Case> for ColumnExpr {
    fn from(case: Case) -> Self {
        Self::Case(case)
    }
}

/// A named expression: an output column of a read join, or the target
/// column of an update.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub name: String,
    pub expr: ColumnExpr,
}

impl Assignment {
    pub fn new(name: impl Into<String>, expr: impl Into<ColumnExpr>) -> Self {
        Self {
            name: name.into(),
            expr: expr.into(),
        }
    }

    #[must_use]
    pub fn swap_sides(self) -> Self {
        Self {
            name: self.name,
            expr: self.expr.swap_sides(),
        }
    }
}

/// `"x.v"` selects build column `v` as an output named `x.v`.
impl From<&str> for Assignment {
    fn from(text: &str) -> Self {
        Self {
            name: text.to_owned(),
            expr: ColumnExpr::col(text),
        }
    }
}

impl From<ColumnRef> for ColumnExpr {
    fn from(reference: ColumnRef) -> Self {
        Self::Column(reference)
    }
}
