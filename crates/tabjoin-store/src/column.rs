//! Typed column storage.

use std::sync::Arc;

use tabjoin_error::{JoinError, Result};
use tabjoin_types::{ColumnType, KeyValue, Value};

/// Physical storage of one column. `None` is the null sentinel of every type.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Integer(Vec<Option<i64>>),
    Real(Vec<Option<f64>>),
    Text(Vec<Option<Arc<str>>>),
    Logical(Vec<Option<bool>>),
    Categorical {
        codes: Vec<Option<u32>>,
        levels: Arc<[Arc<str>]>,
    },
}

impl ColumnData {
    fn len(&self) -> usize {
        match self {
            Self::Integer(v) => v.len(),
            Self::Real(v) => v.len(),
            Self::Text(v) => v.len(),
            Self::Logical(v) => v.len(),
            Self::Categorical { codes, .. } => codes.len(),
        }
    }

    const fn column_type(&self) -> ColumnType {
        match self {
            Self::Integer(_) => ColumnType::Integer,
            Self::Real(_) => ColumnType::Real,
            Self::Text(_) => ColumnType::Text,
            Self::Logical(_) => ColumnType::Logical,
            Self::Categorical { .. } => ColumnType::Categorical,
        }
    }
}

/// A fixed-length, homogeneous column with shared, copy-on-write storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    data: Arc<ColumnData>,
}

impl Column {
    fn from_data(data: ColumnData) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    pub fn integer<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<i64>>,
    {
        Self::from_data(ColumnData::Integer(
            values.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn real<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<f64>>,
    {
        Self::from_data(ColumnData::Real(values.into_iter().map(Into::into).collect()))
    }

    pub fn logical<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<bool>>,
    {
        Self::from_data(ColumnData::Logical(
            values.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn text<'a, I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<&'a str>>,
    {
        Self::from_data(ColumnData::Text(
            values
                .into_iter()
                .map(|v| v.into().map(Arc::from))
                .collect(),
        ))
    }

    /// Build a categorical column; levels are the sorted distinct labels.
    pub fn categorical<'a, I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<&'a str>>,
    {
        let labels: Vec<Option<&str>> = values.into_iter().map(Into::into).collect();
        let mut levels: Vec<&str> = labels.iter().flatten().copied().collect();
        levels.sort_unstable();
        levels.dedup();
        let codes = labels
            .iter()
            .map(|label| {
                label.and_then(|l| levels.binary_search(&l).ok().map(|pos| pos as u32))
            })
            .collect();
        let levels: Vec<Arc<str>> = levels.into_iter().map(Arc::from).collect();
        Self::from_data(ColumnData::Categorical {
            codes,
            levels: Arc::from(levels),
        })
    }

    /// All-null column of the given type.
    #[must_use]
    pub fn nulls(column_type: ColumnType, len: usize) -> Self {
        let data = match column_type {
            ColumnType::Integer => ColumnData::Integer(vec![None; len]),
            ColumnType::Real => ColumnData::Real(vec![None; len]),
            ColumnType::Text => ColumnData::Text(vec![None; len]),
            ColumnType::Logical => ColumnData::Logical(vec![None; len]),
            ColumnType::Categorical => ColumnData::Categorical {
                codes: vec![None; len],
                levels: Arc::from(Vec::<Arc<str>>::new()),
            },
        };
        Self::from_data(data)
    }

    /// Build a column of `column_type` from dynamically typed values.
    ///
    /// `name` is only used for diagnostics. Values must fit the type exactly
    /// (see [`Value::fits`]); text values become categorical labels.
    pub fn from_values(name: &str, column_type: ColumnType, values: &[Value]) -> Result<Self> {
        if let Some(bad) = values.iter().find(|v| !v.fits(column_type)) {
            return Err(JoinError::type_mismatch(name, column_type, bad.type_label()));
        }
        let column = match column_type {
            ColumnType::Integer => Self::integer(values.iter().map(Value::as_i64)),
            ColumnType::Real => Self::real(values.iter().map(Value::as_f64)),
            ColumnType::Logical => Self::logical(values.iter().map(|v| match v {
                Value::Logical(b) => Some(*b),
                _ => None,
            })),
            ColumnType::Text => Self::text(values.iter().map(Value::as_str)),
            ColumnType::Categorical => Self::categorical(values.iter().map(Value::as_str)),
        };
        Ok(column)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn column_type(&self) -> ColumnType {
        self.data.column_type()
    }

    #[must_use]
    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    /// Level labels of a categorical column.
    #[must_use]
    pub fn levels(&self) -> Option<&[Arc<str>]> {
        match &*self.data {
            ColumnData::Categorical { levels, .. } => Some(levels),
            _ => None,
        }
    }

    /// Whether two columns share the same physical storage.
    #[must_use]
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Independent copy of the storage.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self::from_data((*self.data).clone())
    }

    /// Value at `row`; out-of-range rows read as null.
    #[must_use]
    pub fn get(&self, row: usize) -> Value {
        match &*self.data {
            ColumnData::Integer(v) => v
                .get(row)
                .copied()
                .flatten()
                .map_or(Value::Null, Value::Integer),
            ColumnData::Real(v) => v
                .get(row)
                .copied()
                .flatten()
                .map_or(Value::Null, Value::Real),
            ColumnData::Text(v) => v
                .get(row)
                .and_then(Option::as_ref)
                .map_or(Value::Null, |s| Value::Text(Arc::clone(s))),
            ColumnData::Logical(v) => v
                .get(row)
                .copied()
                .flatten()
                .map_or(Value::Null, Value::Logical),
            ColumnData::Categorical { codes, levels } => codes
                .get(row)
                .copied()
                .flatten()
                .and_then(|code| levels.get(code as usize))
                .map_or(Value::Null, |s| Value::Text(Arc::clone(s))),
        }
    }

    #[must_use]
    pub fn is_null(&self, row: usize) -> bool {
        match &*self.data {
            ColumnData::Integer(v) => v.get(row).is_none_or(Option::is_none),
            ColumnData::Real(v) => v.get(row).is_none_or(Option::is_none),
            ColumnData::Text(v) => v.get(row).is_none_or(Option::is_none),
            ColumnData::Logical(v) => v.get(row).is_none_or(Option::is_none),
            ColumnData::Categorical { codes, .. } => codes.get(row).is_none_or(Option::is_none),
        }
    }

    /// Canonical join key of `row`.
    #[must_use]
    pub fn key_at(&self, row: usize) -> KeyValue {
        match &*self.data {
            ColumnData::Integer(v) => v
                .get(row)
                .copied()
                .flatten()
                .map_or(KeyValue::Null, KeyValue::Int),
            ColumnData::Real(v) => v
                .get(row)
                .copied()
                .flatten()
                .map_or(KeyValue::Null, KeyValue::from_f64),
            ColumnData::Logical(v) => v
                .get(row)
                .copied()
                .flatten()
                .map_or(KeyValue::Null, |b| KeyValue::Int(i64::from(b))),
            ColumnData::Text(_) | ColumnData::Categorical { .. } => {
                KeyValue::from_value(&self.get(row))
            }
        }
    }

    /// Gather rows into a new column; `None` positions become null.
    #[must_use]
    pub fn gather(&self, rows: &[Option<usize>]) -> Self {
        fn pick<T: Clone>(src: &[Option<T>], rows: &[Option<usize>]) -> Vec<Option<T>> {
            rows.iter()
                .map(|row| row.and_then(|r| src.get(r).cloned().flatten()))
                .collect()
        }
        let data = match &*self.data {
            ColumnData::Integer(v) => ColumnData::Integer(pick(v, rows)),
            ColumnData::Real(v) => ColumnData::Real(pick(v, rows)),
            ColumnData::Text(v) => ColumnData::Text(pick(v, rows)),
            ColumnData::Logical(v) => ColumnData::Logical(pick(v, rows)),
            ColumnData::Categorical { codes, levels } => ColumnData::Categorical {
                codes: pick(codes, rows),
                levels: Arc::clone(levels),
            },
        };
        Self::from_data(data)
    }

    /// Overwrite the cell at `row`. Copies shared storage first.
    ///
    /// The value must fit the column type exactly; `name` is only used for
    /// diagnostics. A label missing from a categorical column's levels is
    /// appended as a new level.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    pub fn set(&mut self, name: &str, row: usize, value: &Value) -> Result<()> {
        let column_type = self.column_type();
        if !value.fits(column_type) {
            return Err(JoinError::type_mismatch(name, column_type, value.type_label()));
        }
        match (Arc::make_mut(&mut self.data), value) {
            (ColumnData::Integer(v), _) => v[row] = value.as_i64(),
            (ColumnData::Real(v), _) => v[row] = value.as_f64(),
            (ColumnData::Logical(v), Value::Logical(b)) => v[row] = Some(*b),
            (ColumnData::Text(v), Value::Text(s)) => v[row] = Some(Arc::clone(s)),
            (ColumnData::Categorical { codes, levels }, Value::Text(s)) => {
                let code = match levels.iter().position(|l| l == s) {
                    Some(pos) => pos,
                    None => {
                        let mut grown = levels.to_vec();
                        grown.push(Arc::clone(s));
                        *levels = Arc::from(grown);
                        levels.len() - 1
                    }
                };
                codes[row] = Some(code as u32);
            }
            (ColumnData::Logical(v), _) => v[row] = None,
            (ColumnData::Text(v), _) => v[row] = None,
            (ColumnData::Categorical { codes, .. }, _) => codes[row] = None,
        }
        Ok(())
    }

    /// Reorder rows by a full permutation.
    #[must_use]
    pub(crate) fn permute(&self, order: &[usize]) -> Self {
        let rows: Vec<Option<usize>> = order.iter().copied().map(Some).collect();
        self.gather(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_fills_absent_rows_with_null() {
        let col = Column::integer([10_i64, 20, 30]);
        let out = col.gather(&[Some(2), None, Some(0)]);
        assert_eq!(out.get(0), Value::Integer(30));
        assert_eq!(out.get(1), Value::Null);
        assert_eq!(out.get(2), Value::Integer(10));
    }

    #[test]
    fn categorical_levels_are_sorted_and_shared_by_gather() {
        let col = Column::categorical(["b", "a", "b"]);
        assert_eq!(col.levels().unwrap().len(), 2);
        assert_eq!(&*col.levels().unwrap()[0], "a");
        assert_eq!(col.get(0), Value::text("b"));
        let out = col.gather(&[Some(1), None]);
        assert_eq!(out.get(0), Value::text("a"));
        assert!(out.is_null(1));
        assert_eq!(out.column_type(), ColumnType::Categorical);
    }

    #[test]
    fn set_copies_shared_storage() {
        let original = Column::integer([1_i64, 2, 3]);
        let mut view = original.clone();
        assert!(view.shares_storage_with(&original));
        view.set("v", 1, &Value::Integer(99)).unwrap();
        assert!(!view.shares_storage_with(&original));
        assert_eq!(original.get(1), Value::Integer(2));
        assert_eq!(view.get(1), Value::Integer(99));
    }

    #[test]
    fn set_rejects_widening() {
        let mut col = Column::real([1.0_f64]);
        let err = col.set("price", 0, &Value::Integer(1)).unwrap_err();
        assert_eq!(
            err,
            JoinError::type_mismatch("price", ColumnType::Real, ColumnType::Integer)
        );
    }

    #[test]
    fn set_appends_new_categorical_level() {
        let mut col = Column::categorical(["a", "b"]);
        col.set("cat", 0, &Value::text("z")).unwrap();
        assert_eq!(col.get(0), Value::text("z"));
        assert_eq!(col.levels().unwrap().len(), 3);
    }

    #[test]
    fn from_values_checks_types() {
        let err = Column::from_values("n", ColumnType::Integer, &[Value::text("x")]).unwrap_err();
        assert_eq!(err.kind(), "type_mismatch");
        let col = Column::from_values("n", ColumnType::Integer, &[Value::Integer(1), Value::Null])
            .unwrap();
        assert_eq!(col.len(), 2);
        assert!(col.is_null(1));
    }

    #[test]
    fn key_at_normalizes_reals_and_labels() {
        let reals = Column::real([2.0_f64, 2.5]);
        assert_eq!(reals.key_at(0), KeyValue::Int(2));
        assert_eq!(reals.key_at(1), KeyValue::Real(2.5));
        let cats = Column::categorical(["x"]);
        assert_eq!(cats.key_at(0), KeyValue::Text(Arc::from("x")));
    }
}
