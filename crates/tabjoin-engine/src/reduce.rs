//! Group reducers for each-group joins.
//!
//! A reducer is an opaque callable over the build values matched by one
//! probe row. It must accept an empty slice: probe rows without matches still
//! produce an output row.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use tabjoin_error::{JoinError, Result};
use tabjoin_store::Column;
use tabjoin_types::{ColumnType, KeyValue, Value};

/// Reducer body.
pub type ReduceFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Output type rule of a reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducerOutput {
    /// Same type as the reduced column.
    SameAsInput,
    /// Numeric input; integer for integer and logical input, real for real.
    Numeric,
    /// Numeric input; always real.
    Real,
    /// Always this type, whatever the input.
    Fixed(ColumnType),
}

/// A named group reducer.
#[derive(Clone)]
pub struct Reducer {
    name: String,
    output: ReducerOutput,
    func: ReduceFn,
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reducer")
            .field("name", &self.name)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

impl Reducer {
    pub fn new<F>(name: impl Into<String>, output: ReducerOutput, func: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            output,
            func: Arc::new(func),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn output(&self) -> ReducerOutput {
        self.output
    }

    /// Output type when reducing a column of type `input` named `column`.
    pub fn output_type(&self, column: &str, input: ColumnType) -> Result<ColumnType> {
        let needs_numeric = matches!(self.output, ReducerOutput::Numeric | ReducerOutput::Real);
        if needs_numeric && !input.is_numeric() {
            return Err(JoinError::invalid_expression(
                column,
                format!("reducer `{}` needs a numeric column, got {input}", self.name),
            ));
        }
        Ok(match self.output {
            ReducerOutput::SameAsInput => input,
            ReducerOutput::Numeric if input == ColumnType::Real => ColumnType::Real,
            ReducerOutput::Numeric => ColumnType::Integer,
            ReducerOutput::Real => ColumnType::Real,
            ReducerOutput::Fixed(ty) => ty,
        })
    }

    #[must_use]
    pub fn apply(&self, values: &[Value]) -> Value {
        (self.func)(values)
    }
}

/// Reduce `rows` of `column` to one value of `output_type`.
///
/// Results are widened to `output_type` when they do not fit it directly
/// (an empty integer sum reduced into a real column, for instance).
pub fn reduce(
    name: &str,
    column: &Column,
    rows: &[usize],
    reducer: &Reducer,
    output_type: ColumnType,
) -> Result<Value> {
    let values: Vec<Value> = rows.iter().map(|&r| column.get(r)).collect();
    let out = reducer.apply(&values);
    out.widen_to(output_type)
        .ok_or_else(|| JoinError::type_mismatch(name, output_type, out.type_label()))
}

/// Name to reducer lookup.
#[derive(Debug, Clone, Default)]
pub struct ReducerRegistry {
    reducers: HashMap<String, Reducer>,
}

impl ReducerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `sum`, `count`, `mean`, `min`, `max`, `first` and
    /// `last`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Reducer::new("sum", ReducerOutput::Numeric, sum));
        registry.register(Reducer::new(
            "count",
            ReducerOutput::Fixed(ColumnType::Integer),
            count,
        ));
        registry.register(Reducer::new("mean", ReducerOutput::Real, mean));
        registry.register(Reducer::new("min", ReducerOutput::SameAsInput, |v| {
            extreme(v, std::cmp::Ordering::Less)
        }));
        registry.register(Reducer::new("max", ReducerOutput::SameAsInput, |v| {
            extreme(v, std::cmp::Ordering::Greater)
        }));
        registry.register(Reducer::new("first", ReducerOutput::SameAsInput, |v| {
            v.first().cloned().unwrap_or_default()
        }));
        registry.register(Reducer::new("last", ReducerOutput::SameAsInput, |v| {
            v.last().cloned().unwrap_or_default()
        }));
        registry
    }

    /// Add a reducer, replacing any previous one of the same name.
    pub fn register(&mut self, reducer: Reducer) {
        self.reducers.insert(reducer.name.clone(), reducer);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Reducer> {
        self.reducers.get(name)
    }

    /// Reducer by name, or `InvalidExpression` if none is registered.
    pub fn resolve(&self, name: &str) -> Result<Reducer> {
        self.get(name).cloned().ok_or_else(|| {
            JoinError::invalid_expression(name, "no reducer registered under this name")
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.reducers.keys().map(String::as_str)
    }
}

/// Null-skipping sum. Integer while every input is integral, null on
/// integer overflow.
fn sum(values: &[Value]) -> Value {
    let mut int_total: Option<i64> = Some(0);
    let mut real_total = 0.0_f64;
    let mut saw_real = false;
    for v in values {
        match v {
            Value::Real(r) => {
                saw_real = true;
                real_total += r;
            }
            Value::Integer(_) | Value::Logical(_) => {
                let i = v.as_i64().unwrap_or_default();
                int_total = int_total.and_then(|t| t.checked_add(i));
                real_total += i as f64;
            }
            Value::Null | Value::Text(_) => {}
        }
    }
    if saw_real {
        Value::Real(real_total)
    } else {
        int_total.map_or(Value::Null, Value::Integer)
    }
}

/// Number of matched rows, nulls included.
fn count(values: &[Value]) -> Value {
    Value::Integer(values.len() as i64)
}

fn mean(values: &[Value]) -> Value {
    let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
    if nums.is_empty() {
        return Value::Null;
    }
    Value::Real(nums.iter().sum::<f64>() / nums.len() as f64)
}

/// Smallest (`Less`) or largest (`Greater`) non-null value in key order.
fn extreme(values: &[Value], keep: std::cmp::Ordering) -> Value {
    values
        .iter()
        .filter(|v| !v.is_null())
        .fold(None::<&Value>, |best, v| match best {
            Some(b) if KeyValue::from_value(v).cmp(&KeyValue::from_value(b)) != keep => Some(b),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ReducerRegistry {
        ReducerRegistry::with_builtins()
    }

    #[test]
    fn builtins_are_registered() {
        let reg = registry();
        let mut names: Vec<&str> = reg.names().collect::<Vec<_>>();
        names.sort_unstable();
        assert_eq!(
            names,
            vec!["count", "first", "last", "max", "mean", "min", "sum"]
        );
    }

    #[test]
    fn sum_keeps_integers_and_skips_nulls() {
        let r = registry().resolve("sum").unwrap();
        let v = r.apply(&[Value::Integer(2), Value::Null, Value::Integer(5)]);
        assert_eq!(v, Value::Integer(7));
        assert_eq!(r.apply(&[]), Value::Integer(0));
        assert_eq!(
            r.apply(&[Value::Real(1.5), Value::Real(2.0)]),
            Value::Real(3.5)
        );
    }

    #[test]
    fn sum_overflow_is_null() {
        let r = registry().resolve("sum").unwrap();
        assert_eq!(
            r.apply(&[Value::Integer(i64::MAX), Value::Integer(1)]),
            Value::Null
        );
    }

    #[test]
    fn empty_groups_are_accepted() {
        let reg = registry();
        assert_eq!(reg.resolve("count").unwrap().apply(&[]), Value::Integer(0));
        assert_eq!(reg.resolve("mean").unwrap().apply(&[]), Value::Null);
        assert_eq!(reg.resolve("min").unwrap().apply(&[]), Value::Null);
        assert_eq!(reg.resolve("first").unwrap().apply(&[]), Value::Null);
    }

    #[test]
    fn min_max_follow_key_order() {
        let reg = registry();
        let vals = [Value::text("pear"), Value::Null, Value::text("apple")];
        assert_eq!(reg.resolve("min").unwrap().apply(&vals), Value::text("apple"));
        assert_eq!(reg.resolve("max").unwrap().apply(&vals), Value::text("pear"));
        let nums = [Value::Real(2.5), Value::Real(-1.0)];
        assert_eq!(reg.resolve("max").unwrap().apply(&nums), Value::Real(2.5));
    }

    #[test]
    fn output_type_rules() {
        let reg = registry();
        let sum = reg.resolve("sum").unwrap();
        assert_eq!(
            sum.output_type("v", ColumnType::Logical).unwrap(),
            ColumnType::Integer
        );
        assert_eq!(
            sum.output_type("v", ColumnType::Real).unwrap(),
            ColumnType::Real
        );
        let err = sum.output_type("v", ColumnType::Text).unwrap_err();
        assert_eq!(err.kind(), "invalid_expression");
        let first = reg.resolve("first").unwrap();
        assert_eq!(
            first.output_type("v", ColumnType::Categorical).unwrap(),
            ColumnType::Categorical
        );
    }

    #[test]
    fn reduce_widens_into_output_type() {
        let col = Column::real([1.0_f64, 2.0]);
        let sum = registry().resolve("sum").unwrap();
        let v = reduce("v", &col, &[], &sum, ColumnType::Real).unwrap();
        assert_eq!(v, Value::Real(0.0));
        let v = reduce("v", &col, &[0, 1], &sum, ColumnType::Real).unwrap();
        assert_eq!(v, Value::Real(3.0));
    }

    #[test]
    fn custom_reducer_with_wrong_output_is_type_mismatch() {
        let bad = Reducer::new("bad", ReducerOutput::Fixed(ColumnType::Integer), |_| {
            Value::text("oops")
        });
        let col = Column::integer([1_i64]);
        let err = reduce("v", &col, &[0], &bad, ColumnType::Integer).unwrap_err();
        assert_eq!(err.kind(), "type_mismatch");
    }

    #[test]
    fn unknown_reducer_is_invalid_expression() {
        let err = registry().resolve("median").unwrap_err();
        assert_eq!(err.kind(), "invalid_expression");
    }
}
