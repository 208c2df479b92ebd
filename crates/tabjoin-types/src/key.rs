//! Join-key normalization.
//!
//! Key columns of different but compatible types are compared through a
//! single canonical representation, [`KeyValue`]:
//! - logical widens to integer (`FALSE` = 0, `TRUE` = 1),
//! - integral reals collapse onto the integer they represent, so an integer
//!   key column joins a real key column on numeric value,
//! - string and categorical keys compare by label, byte-wise.
//!
//! The canonical form is what both the hash and the sorted index store, which
//! keeps a cached index reusable across joins with differently typed partners.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use smallvec::SmallVec;
use tabjoin_error::{JoinError, Result};

use crate::value::{ColumnType, Value};

/// Largest magnitude for which an integral `f64` is mapped onto `i64`.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Canonical, totally ordered key component.
#[derive(Debug, Clone)]
pub enum KeyValue {
    Null,
    Int(i64),
    /// Non-integral, infinite or NaN reals. NaN is canonicalized.
    Real(f64),
    Text(Arc<str>),
}

/// Composite key, one component per key column.
pub type KeyTuple = SmallVec<[KeyValue; 2]>;

impl KeyValue {
    /// Normalize a cell value into its canonical key form.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Integer(i) => Self::Int(*i),
            Value::Logical(b) => Self::Int(i64::from(*b)),
            Value::Real(r) => Self::from_f64(*r),
            Value::Text(s) => Self::Text(Arc::clone(s)),
        }
    }

    #[must_use]
    pub fn from_f64(r: f64) -> Self {
        if r.is_nan() {
            return Self::Real(f64::NAN);
        }
        if r.is_finite() && r.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&r) {
            return Self::Int(r as i64);
        }
        Self::Real(r)
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Int(_) | Self::Real(_) => 1,
            Self::Text(_) => 2,
        }
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyValue {}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Real(a), Self::Real(b)) => a.total_cmp(b),
            (Self::Int(a), Self::Real(b)) => cmp_int_real(*a, *b),
            (Self::Real(a), Self::Int(b)) => cmp_int_real(*b, *a).reverse(),
            (Self::Text(a), Self::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Exact comparison of an integer with a real. Going through `i as f64`
/// would round integers near the `i64` bounds onto their neighbours.
fn cmp_int_real(i: i64, r: f64) -> Ordering {
    if r.is_nan() || r >= I64_BOUND {
        return Ordering::Less;
    }
    if r < -I64_BOUND {
        return Ordering::Greater;
    }
    let whole = r.trunc();
    // In range, so the truncation is exact.
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0_f64.partial_cmp(&(r - whole)).unwrap_or(Ordering::Equal),
        unequal => unequal,
    }
}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => state.write_u8(0),
            Self::Int(i) => {
                state.write_u8(1);
                i.hash(state);
            }
            Self::Real(r) => {
                state.write_u8(2);
                r.to_bits().hash(state);
            }
            Self::Text(s) => {
                state.write_u8(3);
                s.hash(state);
            }
        }
    }
}

/// Comparison family of a key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// logical, integer, real
    Numeric,
    /// string, categorical
    Textual,
}

impl ColumnType {
    #[must_use]
    pub const fn key_family(self) -> KeyFamily {
        if self.is_numeric() {
            KeyFamily::Numeric
        } else {
            KeyFamily::Textual
        }
    }
}

/// Check that a probe/build key pair can be compared.
pub fn check_key_pair(
    probe_column: &str,
    probe_type: ColumnType,
    build_column: &str,
    build_type: ColumnType,
) -> Result<KeyFamily> {
    let family = probe_type.key_family();
    if family != build_type.key_family() {
        return Err(JoinError::IncompatibleKeyTypes {
            probe_column: probe_column.to_owned(),
            probe_type: probe_type.to_string(),
            build_column: build_column.to_owned(),
            build_type: build_type.to_string(),
        });
    }
    Ok(family)
}

/// Type of a coalesced key column holding values from both sides.
#[must_use]
pub fn common_key_type(probe: ColumnType, build: ColumnType) -> ColumnType {
    if probe == build {
        return probe;
    }
    match (probe, build) {
        (ColumnType::Real, _) | (_, ColumnType::Real) => ColumnType::Real,
        (a, b) if a.is_numeric() && b.is_numeric() => ColumnType::Integer,
        _ => ColumnType::Text,
    }
}
