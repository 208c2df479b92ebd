//! Error taxonomy shared by every tabjoin crate.
//!
//! Every variant aborts the current join invocation: callers never observe a
//! partially materialized table or a partially applied update.

use std::fmt;

use thiserror::Error;

/// Which table an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The table whose rows are looked up (the `i` table).
    Probe,
    /// The indexed table (the `x` table).
    Build,
    /// A standalone table outside of a join (store operations).
    Table,
}

impl Side {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::Build => "build",
            Self::Table => "table",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary error type for table, index and join operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// A referenced column does not exist on the given side.
    #[error("unknown column `{name}` in {side} table")]
    UnknownColumn { name: String, side: Side },

    /// A column's length does not match the table's row count.
    #[error("column `{name}` has {actual} rows but the table has {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A value or column type differs from the declared destination type.
    #[error("type mismatch for column `{name}`: expected {expected}, found {actual}")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// A join key pair cannot be compared.
    #[error(
        "incompatible key types: probe `{probe_column}` is {probe_type}, \
         build `{build_column}` is {build_type}"
    )]
    IncompatibleKeyTypes {
        probe_column: String,
        probe_type: String,
        build_column: String,
        build_type: String,
    },

    /// An unqualified column name exists in both tables.
    #[error("column `{name}` exists in both tables; qualify it with `x.` or `i.`")]
    AmbiguousColumn { name: String },

    /// The match expansion exceeds `probe_rows + build_rows`.
    #[error(
        "join produces {rows} rows, more than probe_rows ({probe_rows}) + build_rows \
         ({build_rows}); check for duplicate keys or set allow_cartesian"
    )]
    CartesianLimitExceeded {
        rows: usize,
        probe_rows: usize,
        build_rows: usize,
    },

    /// A join was requested with no key pairs.
    #[error("key spec is empty")]
    EmptyKeySpec,

    /// A column name is already taken within one table.
    #[error("duplicate column `{name}`")]
    DuplicateColumn { name: String },

    /// An output expression is not valid for the requested mode.
    #[error("invalid expression `{name}`: {detail}")]
    InvalidExpression { name: String, detail: String },

    /// A match map no longer fits the table it is applied to.
    #[error("match map covers {expected} rows but the target table has {actual}")]
    StaleMatchMap { expected: usize, actual: usize },
}

impl JoinError {
    pub fn unknown_column(name: impl Into<String>, side: Side) -> Self {
        Self::UnknownColumn {
            name: name.into(),
            side,
        }
    }

    pub fn type_mismatch(
        name: impl Into<String>,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn invalid_expression(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidExpression {
            name: name.into(),
            detail: detail.into(),
        }
    }

    /// Stable label used in logs and metric dimensions.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownColumn { .. } => "unknown_column",
            Self::LengthMismatch { .. } => "length_mismatch",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::IncompatibleKeyTypes { .. } => "incompatible_key_types",
            Self::AmbiguousColumn { .. } => "ambiguous_column",
            Self::CartesianLimitExceeded { .. } => "cartesian_limit_exceeded",
            Self::EmptyKeySpec => "empty_key_spec",
            Self::DuplicateColumn { .. } => "duplicate_column",
            Self::InvalidExpression { .. } => "invalid_expression",
            Self::StaleMatchMap { .. } => "stale_match_map",
        }
    }
}

/// Result alias using [`JoinError`].
pub type Result<T> = std::result::Result<T, JoinError>;
