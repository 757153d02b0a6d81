// src/value.rs
//! Typed value model, total order, truthiness and the JSON wire boundary.
//!
//! # Total order
//!
//! One order is used everywhere values are compared (`$gt` in filters and
//! expressions, `$sort`, `$min`/`$max`, set dedup, group identity):
//!
//! ```text
//! Missing = Null < numbers < strings < objects < arrays < booleans < dates
//! ```
//!
//! - numbers compare by value, `Int` and `Double` alike; NaN sorts below
//!   every other number and equals itself
//! - strings compare byte-wise (equivalent to code point order for UTF-8)
//! - objects compare pair by pair (field name, then value), then by length
//! - arrays compare element-wise, then by length
//! - `false < true`; dates by instant

use crate::document::Document;
use crate::error::Result;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Result of resolving a path that does not exist
    Missing,
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Object(Document),
}

impl Value {
    /// Canonical type name, as returned by `$type` and used by `$jsonSchema`
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Missing => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(f) if is_integral(*f) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `Null` or `Missing`
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Null | Value::Missing)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer view of a number; doubles must be integral and in range
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Double(f) if is_integral(*f) && f.abs() < 9.2e18 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Document> {
        match self {
            Value::Object(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Document> {
        match self {
            Value::Object(doc) => Some(doc),
            _ => None,
        }
    }

    /// Field lookup on objects; anything else has no fields
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|doc| doc.get(key))
    }

    /// `false`, `Null`, `Missing` and numeric zero are falsy
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Missing | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Double(f) => *f != 0.0,
            _ => true,
        }
    }

    /// `Missing` becomes `Null`; everything else is unchanged
    pub fn or_null(self) -> Value {
        match self {
            Value::Missing => Value::Null,
            other => other,
        }
    }

    /// String key that is equal for exactly the values the total order
    /// considers equal. Object field order is significant.
    pub fn canonical_key(&self) -> String {
        let mut out = String::new();
        write_canonical(self, &mut out);
        out
    }

    /// Convert to the JSON wire representation
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Missing | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Double(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(d) => {
                let mut map = serde_json::Map::new();
                map.insert(
                    "$date".to_string(),
                    serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
                );
                serde_json::Value::Object(map)
            }
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(doc) => {
                let mut map = serde_json::Map::new();
                for (k, v) in doc {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }

    /// Parse a JSON text into a value
    pub fn from_json_str(json: &str) -> Result<Value> {
        let parsed: serde_json::Value = serde_json::from_str(json)?;
        Ok(Value::from(parsed))
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Missing | Value::Null => 0,
            Value::Int(_) | Value::Double(_) => 1,
            Value::String(_) => 2,
            Value::Object(_) => 3,
            Value::Array(_) => 4,
            Value::Bool(_) => 5,
            Value::Date(_) => 6,
        }
    }
}

fn is_integral(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0
}

/// 2^63, the first double above `i64::MAX`
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// The `i64` an integral double equals exactly, if any
fn exact_i64(f: f64) -> Option<i64> {
    (is_integral(f) && (-TWO_POW_63..TWO_POW_63).contains(&f)).then(|| f as i64)
}

/// Exact comparison of an integer against a double
fn compare_int_double(i: i64, f: f64) -> Ordering {
    if f.is_nan() {
        return Ordering::Greater;
    }
    if f >= TWO_POW_63 {
        return Ordering::Less;
    }
    if f < -TWO_POW_63 {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => compare_f64(whole, f),
        other => other,
    }
}

/// Compare two values under the total order documented at module level
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = a.type_rank().cmp(&b.type_rank());
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Int(x), Value::Double(y)) => compare_int_double(*x, *y),
        (Value::Double(x), Value::Int(y)) => compare_int_double(*y, *x).reverse(),
        (Value::Double(x), Value::Double(y)) => compare_f64(*x, *y),
        (Value::String(x), Value::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = compare_values(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.as_bytes().cmp(rk.as_bytes());
                if ord != Ordering::Equal {
                    return ord;
                }
                let ord = compare_values(lv, rv);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        // Null and Missing share a rank and are equal
        _ => Ordering::Equal,
    }
}

/// Deep equality under the total order (`2 == 2.0`, `Missing == Null`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

fn compare_f64(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Missing | Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => out.push_str(&format!("n:{}", i)),
        Value::Double(f) => {
            if f.is_nan() {
                out.push_str("n:NaN");
            } else if let Some(i) = exact_i64(*f) {
                out.push_str(&format!("n:{}", i));
            } else {
                out.push_str(&format!("n:{:?}", f));
            }
        }
        Value::String(s) => out.push_str(&format!("s:{:?}", s)),
        Value::Date(d) => out.push_str(&format!("d:{}", d.timestamp_millis())),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(doc) => {
            out.push('{');
            for (i, (k, v)) in doc.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&format!("{:?}:", k));
                write_canonical(v, out);
            }
            out.push('}');
        }
    }
}

/// Recognise extended-JSON dates: `{"$date": "<RFC3339>"}` or `{"$date": millis}`
fn extended_json_date(map: &serde_json::Map<String, serde_json::Value>) -> Option<DateTime<Utc>> {
    if map.len() != 1 {
        return None;
    }
    match map.get("$date")? {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        serde_json::Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        _ => None,
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                if let Some(date) = extended_json_date(&map) {
                    return Value::Date(date);
                }
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        value.to_json()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        i64::try_from(n)
            .map(Value::Int)
            .unwrap_or(Value::Double(n as f64))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn test_type_names() {
        assert_eq!(v(json!(42)).type_name(), "int");
        assert_eq!(v(json!(3.14)).type_name(), "double");
        assert_eq!(v(json!("x")).type_name(), "string");
        assert_eq!(v(json!(true)).type_name(), "bool");
        assert_eq!(v(json!(null)).type_name(), "null");
        assert_eq!(v(json!([1])).type_name(), "array");
        assert_eq!(v(json!({})).type_name(), "object");
        assert_eq!(v(json!({"$date": "2024-01-15T10:30:00Z"})).type_name(), "date");
        assert_eq!(Value::Missing.type_name(), "undefined");
    }

    #[test]
    fn test_type_order() {
        let ordered = vec![
            Value::Null,
            v(json!(-5)),
            v(json!(2.5)),
            v(json!("a")),
            v(json!({"a": 1})),
            v(json!([1])),
            v(json!(false)),
            v(json!({"$date": "2020-01-01T00:00:00Z"})),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(compare_values(&pair[0], &pair[1]), Ordering::Less, "{:?}", pair);
        }
    }

    #[test]
    fn test_numbers_compare_across_representations() {
        assert!(values_equal(&Value::Int(2), &Value::Double(2.0)));
        assert_eq!(
            compare_values(&Value::Int(3), &Value::Double(2.5)),
            Ordering::Greater
        );
        assert_eq!(
            compare_values(&Value::Double(f64::NAN), &Value::Int(-100)),
            Ordering::Less
        );
    }

    #[test]
    fn test_large_integers_compare_exactly_against_doubles() {
        let two_pow_53 = 9_007_199_254_740_992i64;
        let above = Value::Int(two_pow_53 + 1);
        let double = Value::Double(two_pow_53 as f64);
        assert_eq!(compare_values(&above, &double), Ordering::Greater);
        assert_eq!(compare_values(&double, &above), Ordering::Less);
        assert!(!values_equal(&above, &double));
        assert!(values_equal(&Value::Int(two_pow_53), &double));

        // Transitive across representations
        let low = Value::Int(two_pow_53);
        assert_eq!(compare_values(&low, &above), Ordering::Less);
        assert_eq!(compare_values(&double, &above), Ordering::Less);
        assert_eq!(compare_values(&low, &double), Ordering::Equal);

        assert_eq!(compare_values(&Value::Int(i64::MAX), &Value::Double(9.3e18)), Ordering::Less);
        assert_eq!(
            compare_values(&Value::Int(i64::MIN), &Value::Double(-9.223372036854775808e18)),
            Ordering::Equal
        );
        assert_eq!(compare_values(&Value::Int(i64::MIN), &Value::Double(f64::NEG_INFINITY)), Ordering::Greater);
        assert_eq!(compare_values(&Value::Int(-3), &Value::Double(-2.5)), Ordering::Less);
        assert_eq!(compare_values(&Value::Int(-2), &Value::Double(-2.5)), Ordering::Greater);
    }

    #[test]
    fn test_missing_equals_null() {
        assert!(values_equal(&Value::Missing, &Value::Null));
        assert_ne!(Value::Missing, Value::Null);
    }

    #[test]
    fn test_array_and_object_order() {
        assert_eq!(
            compare_values(&v(json!([1, 2])), &v(json!([1, 2, 0]))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&v(json!([1, 3])), &v(json!([1, 2, 9]))),
            Ordering::Greater
        );
        assert_eq!(
            compare_values(&v(json!({"a": 1, "b": 2})), &v(json!({"a": 1, "c": 0}))),
            Ordering::Less
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Missing.is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Double(0.0).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(v(json!("")).is_truthy());
        assert!(v(json!([])).is_truthy());
        assert!(v(json!({})).is_truthy());
    }

    #[test]
    fn test_canonical_key_normalises_numbers() {
        assert_eq!(Value::Int(1).canonical_key(), Value::Double(1.0).canonical_key());
        assert_eq!(Value::Missing.canonical_key(), Value::Null.canonical_key());
        assert_eq!(
            Value::Int(9_200_000_000_000_000_000).canonical_key(),
            Value::Double(9.2e18).canonical_key()
        );
        assert_ne!(
            Value::Int(9_007_199_254_740_993).canonical_key(),
            Value::Double(9_007_199_254_740_992.0).canonical_key()
        );
        assert_ne!(v(json!("1")).canonical_key(), Value::Int(1).canonical_key());
        assert_ne!(
            v(json!({"a": 1, "b": 2})).canonical_key(),
            v(json!({"b": 2, "a": 1})).canonical_key()
        );
    }

    #[test]
    fn test_json_round_trip_keeps_order_and_dates() {
        let original = json!({"z": 1, "a": {"$date": "2024-03-01T12:00:00.000Z"}, "m": [1.5, "x"]});
        let value = v(original.clone());

        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert!(matches!(value.get("a"), Some(Value::Date(_))));
        assert_eq!(value.to_json(), original);
    }

    #[test]
    fn test_date_from_millis() {
        let value = v(json!({"$date": 0}));
        assert_eq!(value.as_date().unwrap().timestamp_millis(), 0);
    }

    #[test]
    fn test_from_json_str() {
        let value = Value::from_json_str(r#"{"a": [1, 2.5]}"#).unwrap();
        assert_eq!(value.get("a"), Some(&Value::Array(vec![Value::Int(1), Value::Double(2.5)])));
        assert!(Value::from_json_str("{not json").is_err());
    }
}
