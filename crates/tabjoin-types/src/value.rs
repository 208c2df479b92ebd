//! Column types and the dynamically typed scalar used at API boundaries.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Declared storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// 64-bit signed integers.
    Integer,
    /// 64-bit floats.
    Real,
    /// UTF-8 strings.
    Text,
    /// Booleans.
    Logical,
    /// `u32` codes into a sorted list of string levels.
    Categorical,
}

impl ColumnType {
    /// Stable label used in error messages and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "string",
            Self::Logical => "logical",
            Self::Categorical => "categorical",
        }
    }

    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Real | Self::Logical)
    }

    #[must_use]
    pub const fn is_textual(self) -> bool {
        matches!(self, Self::Text | Self::Categorical)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single cell value.
///
/// Categorical cells surface as [`Value::Text`] carrying their level label;
/// the categorical encoding is a storage concern of the column.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(Arc<str>),
    Logical(bool),
}

impl Value {
    pub fn text(s: impl AsRef<str>) -> Self {
        Self::Text(Arc::from(s.as_ref()))
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Natural column type of this value, `None` for null.
    #[must_use]
    pub const fn value_type(&self) -> Option<ColumnType> {
        match self {
            Self::Null => None,
            Self::Integer(_) => Some(ColumnType::Integer),
            Self::Real(_) => Some(ColumnType::Real),
            Self::Text(_) => Some(ColumnType::Text),
            Self::Logical(_) => Some(ColumnType::Logical),
        }
    }

    /// Whether this value can be stored in a column of type `ty` without
    /// conversion. Null fits every type; text fits both textual types.
    #[must_use]
    pub const fn fits(&self, ty: ColumnType) -> bool {
        match self {
            Self::Null => true,
            Self::Integer(_) => matches!(ty, ColumnType::Integer),
            Self::Real(_) => matches!(ty, ColumnType::Real),
            Self::Text(_) => ty.is_textual(),
            Self::Logical(_) => matches!(ty, ColumnType::Logical),
        }
    }

    /// Widen this value to `ty` along the numeric chain
    /// logical -> integer -> real, or between the textual types.
    ///
    /// Returns `None` when the conversion would narrow or cross families.
    #[must_use]
    pub fn widen_to(&self, ty: ColumnType) -> Option<Self> {
        if self.fits(ty) {
            return Some(self.clone());
        }
        match (self, ty) {
            (Self::Logical(b), ColumnType::Integer) => Some(Self::Integer(i64::from(*b))),
            (Self::Logical(b), ColumnType::Real) => Some(Self::Real(f64::from(u8::from(*b)))),
            (Self::Integer(i), ColumnType::Real) => Some(Self::Real(*i as f64)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Real(r) => Some(*r),
            Self::Logical(b) => Some(f64::from(u8::from(*b))),
            Self::Null | Self::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Logical(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Label used in type-mismatch diagnostics.
    #[must_use]
    pub const fn type_label(&self) -> &'static str {
        match self.value_type() {
            Some(ty) => ty.as_str(),
            None => "null",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NA"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => f.write_str(s),
            Self::Logical(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Logical(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::text(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(Arc::from(v))
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
