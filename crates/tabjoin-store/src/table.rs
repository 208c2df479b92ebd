//! Column store: a set of equally long, uniquely named columns.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tabjoin_error::{JoinError, Result, Side};
use tabjoin_types::Value;
use tracing::debug;

use crate::column::Column;
use crate::index::{BuildOptions, KeyIndex};

/// Process-wide storage version source. Versions are unique across tables so
/// an index built on one table can never validate against another.
static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_version() -> u64 {
    NEXT_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// Whether replacing a column may change its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeCoercion {
    /// Replacement must keep the existing type exactly.
    #[default]
    Forbid,
    /// Replacement may change the column type.
    Allow,
}

#[derive(Debug, Clone)]
struct NamedColumn {
    name: String,
    column: Column,
    version: u64,
}

/// Physical sort key of a table together with its sorted index.
#[derive(Debug, Clone)]
struct TableKey {
    columns: Vec<String>,
    index: Arc<KeyIndex>,
}

/// An ordered set of named columns of identical length.
///
/// `Clone` is shallow: the clone shares column storage, versions and key with
/// the original until either side writes. Use [`Table::deep_copy`] for an
/// independent table.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<NamedColumn>,
    rows: usize,
    key: Option<TableKey>,
}

impl Table {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(name, column)` pairs.
    pub fn from_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Column)>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for (name, column) in columns {
            let name = name.into();
            if table.position(&name).is_some() {
                return Err(JoinError::DuplicateColumn { name });
            }
            table.insert_new(name, column)?;
        }
        Ok(table)
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Column by name.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.column)
            .ok_or_else(|| JoinError::unknown_column(name, Side::Table))
    }

    /// Column by position.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= self.width()`.
    #[must_use]
    pub fn column_at(&self, idx: usize) -> &Column {
        &self.columns[idx].column
    }

    /// Column name by position.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= self.width()`.
    #[must_use]
    pub fn name_at(&self, idx: usize) -> &str {
        &self.columns[idx].name
    }

    /// Storage version of a column; changes on every write to it.
    #[must_use]
    pub fn column_version(&self, name: &str) -> Option<u64> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.version)
    }

    /// All values of one row, in column order.
    #[must_use]
    pub fn row(&self, row: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.column.get(row)).collect()
    }

    /// Add a column, or replace an existing one of the same name.
    ///
    /// The column must have `len()` rows unless the table has no columns
    /// yet. Replacing keeps the declared type unless `coercion` is
    /// [`TypeCoercion::Allow`].
    pub fn add_or_replace_column(
        &mut self,
        name: impl Into<String>,
        column: Column,
        coercion: TypeCoercion,
    ) -> Result<()> {
        let name = name.into();
        match self.position(&name) {
            None => self.insert_new(name, column),
            Some(idx) => {
                let existing = self.columns[idx].column.column_type();
                if coercion == TypeCoercion::Forbid && existing != column.column_type() {
                    return Err(JoinError::type_mismatch(
                        name,
                        existing,
                        column.column_type(),
                    ));
                }
                self.check_length(&name, &column)?;
                self.replace_at(idx, column);
                Ok(())
            }
        }
    }

    /// Remove a column and return it.
    pub fn remove_column(&mut self, name: &str) -> Result<Column> {
        let idx = self
            .position(name)
            .ok_or_else(|| JoinError::unknown_column(name, Side::Table))?;
        self.invalidate_key_if_touched(name);
        Ok(self.columns.remove(idx).column)
    }

    /// Fully independent copy; no storage is shared with `self`.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|c| NamedColumn {
                name: c.name.clone(),
                column: c.column.deep_copy(),
                version: next_version(),
            })
            .collect();
        let mut copy = Self {
            columns,
            rows: self.rows,
            key: None,
        };
        if let Some(key) = &self.key {
            // Same physical order, so only the versions need refreshing.
            let columns: Vec<&str> = key.columns.iter().map(String::as_str).collect();
            if let Ok(index) = KeyIndex::build(&copy, &columns, &BuildOptions::sorted()) {
                copy.key = Some(TableKey {
                    columns: key.columns.clone(),
                    index: Arc::new(index),
                });
            }
        }
        copy
    }

    /// New table holding the given rows, in the given order. The key is not
    /// carried over.
    #[must_use]
    pub fn take(&self, rows: &[usize]) -> Self {
        let positions: Vec<Option<usize>> = rows.iter().copied().map(Some).collect();
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| NamedColumn {
                    name: c.name.clone(),
                    column: c.column.gather(&positions),
                    version: next_version(),
                })
                .collect(),
            rows: rows.len(),
            key: None,
        }
    }

    /// Physically sort the table by `columns` (stable) and cache a sorted
    /// index over them.
    pub fn set_key(&mut self, columns: &[&str]) -> Result<()> {
        let options = BuildOptions::sorted();
        let mut index = KeyIndex::build(self, columns, &options)?;
        if !index.is_identity_order() {
            let order = index.order().unwrap_or_default().to_vec();
            for named in &mut self.columns {
                named.column = named.column.permute(&order);
                named.version = next_version();
            }
            index = KeyIndex::build(self, columns, &options)?;
        }
        debug!(
            key = ?columns,
            rows = self.rows,
            groups = index.group_count(),
            "table key set"
        );
        self.key = Some(TableKey {
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
            index: Arc::new(index),
        });
        Ok(())
    }

    /// Key columns, if the table is keyed.
    #[must_use]
    pub fn key(&self) -> Option<&[String]> {
        self.key.as_ref().map(|k| k.columns.as_slice())
    }

    /// Cached sorted index over the key columns, if still valid.
    #[must_use]
    pub fn key_index(&self) -> Option<&Arc<KeyIndex>> {
        self.key
            .as_ref()
            .map(|k| &k.index)
            .filter(|index| index.is_valid_for(self))
    }

    pub fn clear_key(&mut self) {
        self.key = None;
    }

    /// Exclusive handle for in-place mutation.
    pub fn writer(&mut self) -> TableWriter<'_> {
        TableWriter { table: self }
    }

    fn check_length(&self, name: &str, column: &Column) -> Result<()> {
        if !self.columns.is_empty() && column.len() != self.rows {
            return Err(JoinError::LengthMismatch {
                name: name.to_owned(),
                expected: self.rows,
                actual: column.len(),
            });
        }
        Ok(())
    }

    fn insert_new(&mut self, name: String, column: Column) -> Result<()> {
        self.check_length(&name, &column)?;
        if self.columns.is_empty() {
            self.rows = column.len();
        }
        self.columns.push(NamedColumn {
            name,
            column,
            version: next_version(),
        });
        Ok(())
    }

    fn replace_at(&mut self, idx: usize, column: Column) {
        self.columns[idx].column = column;
        self.touch(idx);
    }

    /// Record a change to the column at `idx`.
    fn touch(&mut self, idx: usize) {
        let name = self.columns[idx].name.clone();
        self.invalidate_key_if_touched(&name);
        self.columns[idx].version = next_version();
    }

    fn invalidate_key_if_touched(&mut self, name: &str) {
        if self
            .key
            .as_ref()
            .is_some_and(|k| k.columns.iter().any(|c| c == name))
        {
            debug!(column = name, "key column modified; dropping table key");
            self.key = None;
        }
    }
}

/// Exclusive write access to a [`Table`].
///
/// Writes never change a column's declared type or length. Writing a key
/// column drops the table key.
#[derive(Debug)]
pub struct TableWriter<'a> {
    table: &'a mut Table,
}

impl TableWriter<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Read access through the writer.
    #[must_use]
    pub fn table(&self) -> &Table {
        self.table
    }

    /// Overwrite one cell.
    pub fn set(&mut self, name: &str, row: usize, value: &Value) -> Result<()> {
        let idx = self
            .table
            .position(name)
            .ok_or_else(|| JoinError::unknown_column(name, Side::Table))?;
        if row >= self.table.rows {
            return Err(JoinError::LengthMismatch {
                name: name.to_owned(),
                expected: self.table.rows,
                actual: row + 1,
            });
        }
        // Mutated in place: storage is copied only when another table
        // still shares it.
        self.table.columns[idx].column.set(name, row, value)?;
        self.table.touch(idx);
        Ok(())
    }

    /// Replace or add several columns at once.
    ///
    /// Every column is validated before any is installed, so a failure
    /// leaves the table untouched. Replaced columns must keep their type.
    pub fn apply_columns(&mut self, columns: Vec<(String, Column)>) -> Result<()> {
        let expected = if self.table.columns.is_empty() {
            columns.first().map_or(0, |(_, c)| c.len())
        } else {
            self.table.rows
        };
        for (name, column) in &columns {
            if column.len() != expected {
                return Err(JoinError::LengthMismatch {
                    name: name.clone(),
                    expected,
                    actual: column.len(),
                });
            }
            if let Some(idx) = self.table.position(name) {
                let existing = self.table.columns[idx].column.column_type();
                if existing != column.column_type() {
                    return Err(JoinError::type_mismatch(
                        name.as_str(),
                        existing,
                        column.column_type(),
                    ));
                }
            }
        }
        for (name, column) in columns {
            match self.table.position(&name) {
                Some(idx) => self.table.replace_at(idx, column),
                None => self.table.insert_new(name, column)?,
            }
        }
        Ok(())
    }
}
