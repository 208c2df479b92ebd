//! Column storage, tables and key indexes.
//!
//! A [`Table`] owns reference-counted column storage: cloning a table yields
//! a view that shares every column until one side mutates it, at which point
//! the mutated column is copied. Mutation is only reachable through the
//! exclusive [`TableWriter`] handle.

pub mod column;
pub mod index;
pub mod table;

pub use column::{Column, ColumnData};
pub use index::{BuildOptions, IndexKind, KeyIndex};
pub use table::{Table, TableWriter, TypeCoercion};
