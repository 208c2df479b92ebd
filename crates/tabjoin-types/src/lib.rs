//! Core value and type definitions for tabjoin.

pub mod key;
pub mod value;

pub use key::{KeyFamily, KeyTuple, KeyValue, check_key_pair, common_key_type};
pub use value::{ColumnType, Value};
