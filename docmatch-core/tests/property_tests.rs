//! Property-based tests for the matcher and the pipeline
//!
//! Uses proptest to check invariants that must hold for any document:
//! determinism, logical identities, sort ordering and total arithmetic.

use proptest::prelude::*;

use docmatch_core::{compare_values, evaluate_on, matches, run, DocMatchError, Document, Value};
use serde_json::json;
use std::cmp::Ordering;

// ============================================================================
// Test Strategies
// ============================================================================

fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(Value::Int),
        (-1000.0f64..1000.0).prop_map(Value::Double),
        "[a-z]{0,8}".prop_map(Value::String),
    ]
}

fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-c]", inner), 0..3).prop_map(|fields| {
                let mut doc = Document::new();
                for (key, value) in fields {
                    doc.insert(key, value);
                }
                Value::Object(doc)
            }),
        ]
    })
}

/// Documents over a small field alphabet so filters hit existing fields
fn document_strategy() -> impl Strategy<Value = Value> {
    prop::collection::vec(("[a-d]", value_strategy()), 0..5).prop_map(|fields| {
        let mut doc = Document::new();
        for (key, value) in fields {
            doc.insert(key, value);
        }
        Value::Object(doc)
    })
}

/// Single-clause filters `{field: {op: operand}}`
fn clause_strategy() -> impl Strategy<Value = Value> {
    let op = prop_oneof![
        Just("$eq"),
        Just("$ne"),
        Just("$gt"),
        Just("$gte"),
        Just("$lt"),
        Just("$lte"),
        Just("$exists"),
    ];
    ("[a-d]", op, scalar_strategy()).prop_map(|(field, op, operand)| {
        let operand = if op == "$exists" {
            Value::Bool(operand.is_truthy())
        } else {
            operand
        };
        let mut ops = Document::new();
        ops.insert(op, operand);
        let mut filter = Document::new();
        filter.insert(field, Value::Object(ops));
        Value::Object(filter)
    })
}

/// Integers and doubles clustered around 2^53, where `f64` loses precision
fn number_strategy() -> impl Strategy<Value = Value> {
    let base = 9_007_199_254_740_992i64;
    prop_oneof![
        (-4i64..4).prop_map(move |d| Value::Int(base + d)),
        (-4i64..4).prop_map(move |d| Value::Double((base + d) as f64)),
        (-4i64..4).prop_map(move |d| Value::Double((base + d) as f64 + 0.5)),
        any::<i64>().prop_map(Value::Int),
        any::<f64>().prop_map(Value::Double),
    ]
}

fn wrap(operator: &str, operand: Value) -> Value {
    let mut doc = Document::new();
    doc.insert(operator, operand);
    Value::Object(doc)
}

// ============================================================================
// Matcher Properties
// ============================================================================

proptest! {
    /// Matching twice gives the same answer and never touches the document
    #[test]
    fn prop_matching_is_deterministic(doc in document_strategy(), filter in clause_strategy()) {
        let before = doc.clone();
        let first = matches(&doc, &filter).unwrap();
        let second = matches(&doc, &filter).unwrap();
        prop_assert_eq!(first, second);
        prop_assert_eq!(doc, before);
    }

    /// `{$and: []}` is always true, `{$or: []}` always false
    #[test]
    fn prop_empty_logical_arrays(doc in document_strategy()) {
        prop_assert!(matches(&doc, &wrap("$and", Value::Array(vec![]))).unwrap());
        prop_assert!(!matches(&doc, &wrap("$or", Value::Array(vec![]))).unwrap());
    }

    /// Top-level `$not` negates a single clause
    #[test]
    fn prop_not_negates(doc in document_strategy(), filter in clause_strategy()) {
        let plain = matches(&doc, &filter).unwrap();
        let negated = matches(&doc, &wrap("$not", filter.clone())).unwrap();
        prop_assert_eq!(negated, !plain);
    }

    /// `$nor: [F]` agrees with `$not: F`, `$and: [F]` and `$or: [F]` with F
    #[test]
    fn prop_single_element_logical_forms(doc in document_strategy(), filter in clause_strategy()) {
        let plain = matches(&doc, &filter).unwrap();
        let single = Value::Array(vec![filter.clone()]);
        prop_assert_eq!(matches(&doc, &wrap("$and", single.clone())).unwrap(), plain);
        prop_assert_eq!(matches(&doc, &wrap("$or", single.clone())).unwrap(), plain);
        prop_assert_eq!(matches(&doc, &wrap("$nor", single)).unwrap(), !plain);
    }
}

// ============================================================================
// Ordering & Pipeline Properties
// ============================================================================

proptest! {
    /// The total order is antisymmetric and reflexive
    #[test]
    fn prop_total_order_consistency(a in value_strategy(), b in value_strategy()) {
        prop_assert_eq!(compare_values(&a, &a), Ordering::Equal);
        prop_assert_eq!(compare_values(&a, &b), compare_values(&b, &a).reverse());
    }

    /// Mixed Int/Double comparison is transitive and agrees with canonical keys
    #[test]
    fn prop_numeric_order_is_transitive(
        numbers in prop::collection::vec(number_strategy(), 3)
    ) {
        let (a, b, c) = (&numbers[0], &numbers[1], &numbers[2]);
        if compare_values(a, b) != Ordering::Greater && compare_values(b, c) != Ordering::Greater {
            prop_assert_ne!(compare_values(a, c), Ordering::Greater);
        }
        for (x, y) in [(a, b), (b, c), (a, c)] {
            let same_key = x.canonical_key() == y.canonical_key();
            prop_assert_eq!(same_key, compare_values(x, y) == Ordering::Equal);
        }
    }

    /// `$sort` output is ordered and is a permutation of its input
    #[test]
    fn prop_sort_orders_and_keeps_documents(
        keys in prop::collection::vec(scalar_strategy(), 0..20)
    ) {
        let docs: Vec<Value> = keys
            .into_iter()
            .enumerate()
            .map(|(i, key)| {
                let mut doc = Document::new();
                doc.insert("i", Value::from(i));
                doc.insert("k", key);
                Value::Object(doc)
            })
            .collect();

        let sorted = run(docs.clone(), &Value::from(json!([{"$sort": {"k": 1}}]))).unwrap();
        prop_assert_eq!(sorted.len(), docs.len());

        for pair in sorted.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let order = compare_values(a.get("k").unwrap_or(&Value::Missing), b.get("k").unwrap_or(&Value::Missing));
            prop_assert_ne!(order, Ordering::Greater);
            // Stable: ties keep their input order
            if order == Ordering::Equal {
                prop_assert!(compare_values(a.get("i").unwrap(), b.get("i").unwrap()) == Ordering::Less);
            }
        }
    }

    /// `$skip: n` then `$limit: m` is the slice [n, n+m)
    #[test]
    fn prop_skip_limit_slice(len in 0usize..20, skip in 0usize..25, limit in 1usize..25) {
        let docs: Vec<Value> = (0..len).map(|i| Value::from(json!({"i": i}))).collect();
        let out = run(
            docs.clone(),
            &Value::from(json!([{"$skip": skip}, {"$limit": limit}])),
        )
        .unwrap();
        let expected: Vec<Value> = docs.into_iter().skip(skip).take(limit).collect();
        prop_assert_eq!(out, expected);
    }
}

// ============================================================================
// Expression Properties
// ============================================================================

fn eval(expression: serde_json::Value) -> docmatch_core::Result<Value> {
    evaluate_on(&Value::from(expression), &Value::from(json!({"a": [1, 2, 3, 4, 5]})))
}

proptest! {
    /// Integer arithmetic never panics, with or without a date operand
    #[test]
    fn prop_arithmetic_is_total(x in any::<i64>(), y in any::<i64>(), millis in -8_000_000_000_000i64..8_000_000_000_000) {
        let sum = eval(json!({"$add": [x, y]}));
        prop_assert!(sum.is_ok());
        let difference = eval(json!({"$subtract": [x, y]}));
        prop_assert!(difference.is_ok());

        let shifted = eval(json!({"$add": [{"$toDate": millis}, x]}));
        prop_assert!(shifted.is_ok() || matches!(shifted, Err(DocMatchError::Arithmetic(_))));
        let shifted = eval(json!({"$subtract": [{"$toDate": millis}, y as f64]}));
        prop_assert!(shifted.is_ok() || matches!(shifted, Err(DocMatchError::Arithmetic(_))));
    }

    /// `$slice` clamps any count or position to the array
    #[test]
    fn prop_slice_is_total(n in any::<i64>(), position in any::<i64>(), count in 1i64..) {
        let sliced = eval(json!({"$slice": ["$a", n]})).unwrap();
        let len = sliced.as_array().map(Vec::len).unwrap_or(usize::MAX);
        prop_assert!(len <= 5);
        prop_assert_eq!(len as u64, n.unsigned_abs().min(5));

        let windowed = eval(json!({"$slice": ["$a", position, count]})).unwrap();
        prop_assert!(windowed.as_array().map(Vec::len).unwrap_or(usize::MAX) <= 5);
    }

    /// `$range` either fits under its limit or reports it, for any bounds
    #[test]
    fn prop_range_is_bounded(start in any::<i64>(), end in any::<i64>(), step in any::<i64>()) {
        match eval(json!({"$range": [start, end, step]})) {
            Ok(Value::Array(items)) => prop_assert!(items.len() <= 1_000_000),
            Ok(other) => prop_assert!(false, "unexpected {:?}", other),
            Err(err) => prop_assert!(matches!(
                err,
                DocMatchError::LimitExceeded(_) | DocMatchError::QueryShape(_)
            )),
        }
    }
}
