// src/aggregation/accumulators.rs
//! `$group` accumulators
//!
//! An accumulator is created per group, fed the per-document result of its
//! expression in encounter order, then consumed by `finish`.

use crate::document::Document;
use crate::error::{DocMatchError, Result};
use crate::expression::merge_into;
use crate::value::{compare_values, Value};
use ahash::AHashSet;
use lazy_static::lazy_static;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Stateful reducer over one group's values
pub trait Accumulator: Send {
    fn accumulate(&mut self, value: Value) -> Result<()>;

    fn finish(self: Box<Self>) -> Value;
}

/// Constructor stored in the registry
pub type AccumulatorFactory = fn() -> Box<dyn Accumulator>;

lazy_static! {
    /// Global registry of accumulator operators
    pub static ref ACCUMULATORS: HashMap<&'static str, AccumulatorFactory> = {
        let mut registry: HashMap<&'static str, AccumulatorFactory> = HashMap::new();
        registry.insert("$sum", boxed::<Sum>);
        registry.insert("$avg", boxed::<Avg>);
        registry.insert("$min", min);
        registry.insert("$max", max);
        registry.insert("$first", boxed::<First>);
        registry.insert("$last", boxed::<Last>);
        registry.insert("$push", boxed::<Push>);
        registry.insert("$addToSet", boxed::<AddToSet>);
        registry.insert("$stdDevPop", std_dev_pop);
        registry.insert("$stdDevSamp", std_dev_samp);
        registry.insert("$mergeObjects", boxed::<MergeObjects>);
        registry.insert("$count", boxed::<Count>);
        registry
    };
}

fn boxed<A: Accumulator + Default + 'static>() -> Box<dyn Accumulator> {
    Box::new(A::default())
}

fn min() -> Box<dyn Accumulator> {
    Box::new(Extremum::new(Ordering::Less))
}

fn max() -> Box<dyn Accumulator> {
    Box::new(Extremum::new(Ordering::Greater))
}

fn std_dev_pop() -> Box<dyn Accumulator> {
    Box::new(StdDev::population())
}

fn std_dev_samp() -> Box<dyn Accumulator> {
    Box::new(StdDev::sample())
}

/// Fresh accumulator for `name`
pub fn create(name: &str) -> Result<Box<dyn Accumulator>> {
    ACCUMULATORS
        .get(name)
        .map(|factory| factory())
        .ok_or_else(|| DocMatchError::QueryShape(format!("unknown group operator '{}'", name)))
}

// ============================================================================
// NUMERIC ACCUMULATORS
// ============================================================================

/// Running total; stays Int until a double or an overflow shows up
#[derive(Debug)]
enum Total {
    Int(i64),
    Double(f64),
}

#[derive(Debug)]
struct Sum {
    total: Total,
}

impl Default for Sum {
    fn default() -> Self {
        Self { total: Total::Int(0) }
    }
}

impl Accumulator for Sum {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        self.total = match (&self.total, &value) {
            (Total::Int(a), Value::Int(b)) => match a.checked_add(*b) {
                Some(sum) => Total::Int(sum),
                None => Total::Double(*a as f64 + *b as f64),
            },
            (Total::Int(a), Value::Double(b)) => Total::Double(*a as f64 + b),
            (Total::Double(a), v) if v.is_number() => Total::Double(a + v.as_f64().unwrap_or(0.0)),
            // Non-numeric values contribute nothing
            _ => return Ok(()),
        };
        Ok(())
    }

    fn finish(self: Box<Self>) -> Value {
        match self.total {
            Total::Int(i) => Value::Int(i),
            Total::Double(f) => Value::Double(f),
        }
    }
}

#[derive(Debug, Default)]
struct Avg {
    sum: f64,
    count: u64,
}

impl Accumulator for Avg {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        if let Some(n) = value.as_f64() {
            self.sum += n;
            self.count += 1;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Double(self.sum / self.count as f64)
        }
    }
}

/// Welford's online variance
#[derive(Debug)]
struct StdDev {
    sample: bool,
    count: u64,
    mean: f64,
    m2: f64,
}

impl StdDev {
    fn population() -> Self {
        Self { sample: false, count: 0, mean: 0.0, m2: 0.0 }
    }

    fn sample() -> Self {
        Self { sample: true, ..Self::population() }
    }
}

impl Accumulator for StdDev {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        if let Some(x) = value.as_f64() {
            self.count += 1;
            let delta = x - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (x - self.mean);
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Value {
        let divisor = match (self.sample, self.count) {
            (_, 0) | (true, 1) => return Value::Null,
            (true, n) => (n - 1) as f64,
            (false, n) => n as f64,
        };
        Value::Double((self.m2 / divisor).sqrt())
    }
}

#[derive(Debug, Default)]
struct Count {
    count: i64,
}

impl Accumulator for Count {
    fn accumulate(&mut self, _value: Value) -> Result<()> {
        self.count += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Value {
        Value::Int(self.count)
    }
}

// ============================================================================
// ORDER ACCUMULATORS
// ============================================================================

/// `$min` (keeps values ordering `Less`) or `$max` (`Greater`)
#[derive(Debug)]
struct Extremum {
    keep: Ordering,
    best: Option<Value>,
}

impl Extremum {
    fn new(keep: Ordering) -> Self {
        Self { keep, best: None }
    }
}

impl Accumulator for Extremum {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        if value.is_nullish() {
            return Ok(());
        }
        let replace = match &self.best {
            None => true,
            Some(best) => compare_values(&value, best) == self.keep,
        };
        if replace {
            self.best = Some(value);
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Value {
        self.best.unwrap_or(Value::Null)
    }
}

#[derive(Debug, Default)]
struct First {
    value: Option<Value>,
}

impl Accumulator for First {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        if self.value.is_none() {
            self.value = Some(value.or_null());
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Value {
        self.value.unwrap_or(Value::Null)
    }
}

#[derive(Debug, Default)]
struct Last {
    value: Option<Value>,
}

impl Accumulator for Last {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        self.value = Some(value.or_null());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Value {
        self.value.unwrap_or(Value::Null)
    }
}

// ============================================================================
// COLLECTING ACCUMULATORS
// ============================================================================

#[derive(Debug, Default)]
struct Push {
    items: Vec<Value>,
}

impl Accumulator for Push {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        if !value.is_missing() {
            self.items.push(value);
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Value {
        Value::Array(self.items)
    }
}

/// Distinct values in first-occurrence order
#[derive(Debug, Default)]
struct AddToSet {
    seen: AHashSet<String>,
    items: Vec<Value>,
}

impl Accumulator for AddToSet {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        if !value.is_missing() && self.seen.insert(value.canonical_key()) {
            self.items.push(value);
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Value {
        Value::Array(self.items)
    }
}

#[derive(Debug, Default)]
struct MergeObjects {
    merged: Document,
}

impl Accumulator for MergeObjects {
    fn accumulate(&mut self, value: Value) -> Result<()> {
        merge_into(&mut self.merged, value)
    }

    fn finish(self: Box<Self>) -> Value {
        Value::Object(self.merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fold(name: &str, values: serde_json::Value) -> Result<Value> {
        let mut acc = create(name)?;
        if let serde_json::Value::Array(items) = values {
            for item in items {
                acc.accumulate(Value::from(item))?;
            }
        }
        Ok(acc.finish())
    }

    fn approx(value: Value, expected: f64) {
        let actual = value.as_f64().unwrap();
        assert!((actual - expected).abs() < 1e-3, "{} != {}", actual, expected);
    }

    #[test]
    fn test_sum_keeps_int_and_ignores_non_numeric() {
        assert_eq!(fold("$sum", json!([1, 2, "x", null, 3])).unwrap(), Value::Int(6));
        assert_eq!(fold("$sum", json!([1, 2.5])).unwrap(), Value::Double(3.5));
        assert_eq!(fold("$sum", json!([])).unwrap(), Value::Int(0));
        assert_eq!(
            fold("$sum", json!([i64::MAX, 1])).unwrap(),
            Value::Double(i64::MAX as f64 + 1.0)
        );
    }

    #[test]
    fn test_avg_and_std_dev() {
        approx(fold("$avg", json!([10, 20, 30])).unwrap(), 20.0);
        approx(fold("$stdDevPop", json!([10, 20, 30])).unwrap(), 8.165);
        approx(fold("$stdDevSamp", json!([10, 20, 30])).unwrap(), 10.0);
        assert_eq!(fold("$avg", json!(["a"])).unwrap(), Value::Null);
        assert_eq!(fold("$stdDevSamp", json!([4])).unwrap(), Value::Null);
        assert_eq!(fold("$stdDevPop", json!([4])).unwrap(), Value::Double(0.0));
    }

    #[test]
    fn test_min_max_use_total_order() {
        assert_eq!(fold("$min", json!([5, null, 2, 9])).unwrap(), Value::Int(2));
        assert_eq!(fold("$max", json!([5, "a", 9])).unwrap(), Value::from("a"));
        assert_eq!(fold("$min", json!([null])).unwrap(), Value::Null);
    }

    #[test]
    fn test_first_and_last() {
        assert_eq!(fold("$first", json!(["a", "b", "c"])).unwrap(), Value::from("a"));
        assert_eq!(fold("$last", json!(["a", "b", "c"])).unwrap(), Value::from("c"));

        let mut first = create("$first").unwrap();
        first.accumulate(Value::Missing).unwrap();
        first.accumulate(Value::Int(1)).unwrap();
        assert_eq!(first.finish(), Value::Null);
    }

    #[test]
    fn test_push_and_add_to_set() {
        assert_eq!(fold("$push", json!([1, 1, 2])).unwrap(), Value::from(json!([1, 1, 2])));
        assert_eq!(
            fold("$addToSet", json!([1, 1.0, 2, {"a": 1}, {"a": 1}])).unwrap(),
            Value::from(json!([1, 2, {"a": 1}]))
        );

        let mut push = create("$push").unwrap();
        push.accumulate(Value::Missing).unwrap();
        push.accumulate(Value::Null).unwrap();
        assert_eq!(push.finish(), Value::from(json!([null])));
    }

    #[test]
    fn test_merge_objects() {
        assert_eq!(
            fold("$mergeObjects", json!([{"a": 1}, null, {"b": 2, "a": 3}])).unwrap(),
            Value::from(json!({"a": 3, "b": 2}))
        );
        assert!(fold("$mergeObjects", json!([1])).unwrap_err().is_type_mismatch());
    }

    #[test]
    fn test_count() {
        assert_eq!(fold("$count", json!([{}, {}, {}])).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_unknown_accumulator() {
        assert!(create("$median").is_err());
    }
}
