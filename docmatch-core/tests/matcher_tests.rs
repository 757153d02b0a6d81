// matcher_tests.rs
// Filter matching through the public API: field operators, logical operators,
// $expr, $jsonSchema and shape errors

use docmatch_core::{matches, matches_with, DocMatchError, MatchContext, Query, TextSearch, Value};
use serde_json::json;

fn doc(json: serde_json::Value) -> Value {
    Value::from(json)
}

fn check(document: serde_json::Value, filter: serde_json::Value) -> bool {
    matches(&doc(document), &doc(filter)).unwrap()
}

fn inventory() -> Vec<Value> {
    vec![
        doc(json!({"_id": 1, "item": "journal", "qty": 25, "tags": ["blank", "red"], "size": {"h": 14, "w": 21, "uom": "cm"}})),
        doc(json!({"_id": 2, "item": "notebook", "qty": 50, "tags": ["red", "blank"], "size": {"h": 8.5, "w": 11, "uom": "in"}})),
        doc(json!({"_id": 3, "item": "paper", "qty": 100, "tags": ["red", "blank", "plain"], "size": {"h": 8.5, "w": 11, "uom": "in"}})),
        doc(json!({"_id": 4, "item": "planner", "qty": 75, "tags": ["blank", "red"], "size": {"h": 22.85, "w": 30, "uom": "cm"}})),
        doc(json!({"_id": 5, "item": "postcard", "qty": 45, "tags": ["blue"], "size": {"h": 10, "w": 15.25, "uom": "cm"}})),
    ]
}

fn matching_ids(filter: serde_json::Value) -> Vec<i64> {
    let query = Query::from_json(&filter).unwrap();
    inventory()
        .iter()
        .filter(|d| query.matches(d).unwrap())
        .filter_map(|d| d.get("_id").and_then(Value::as_i64))
        .collect()
}

// ========== Field operator tests ==========

#[test]
fn test_implicit_and_across_fields() {
    assert_eq!(matching_ids(json!({"size.uom": "in", "qty": {"$gt": 60}})), vec![3]);
}

#[test]
fn test_array_equality_is_exact_and_ordered() {
    assert_eq!(matching_ids(json!({"tags": ["red", "blank"]})), vec![2]);
    assert_eq!(matching_ids(json!({"tags": "plain"})), vec![3]);
}

#[test]
fn test_all_ignores_order() {
    assert_eq!(matching_ids(json!({"tags": {"$all": ["red", "blank"]}})), vec![1, 2, 3, 4]);
}

#[test]
fn test_size_and_in() {
    assert_eq!(matching_ids(json!({"tags": {"$size": 3}})), vec![3]);
    assert_eq!(matching_ids(json!({"qty": {"$in": [25, 45, 999]}})), vec![1, 5]);
    assert_eq!(matching_ids(json!({"item": {"$nin": ["paper", "planner"]}})), vec![1, 2, 5]);
}

#[test]
fn test_embedded_document_equality() {
    assert_eq!(matching_ids(json!({"size": {"h": 14, "w": 21, "uom": "cm"}})), vec![1]);
    // Field order matters for whole-document equality
    assert!(matching_ids(json!({"size": {"w": 21, "h": 14, "uom": "cm"}})).is_empty());
}

#[test]
fn test_elem_match_on_scores() {
    let d = json!({"results": [82, 85, 88]});
    assert!(check(d.clone(), json!({"results": {"$elemMatch": {"$gte": 80, "$lt": 85}}})));
    assert!(!check(d, json!({"results": {"$elemMatch": {"$gte": 90}}})));

    let survey = json!({"results": [{"product": "abc", "score": 10}, {"product": "xyz", "score": 5}]});
    assert!(check(survey.clone(), json!({"results": {"$elemMatch": {"product": "xyz", "score": {"$gte": 5}}}})));
    assert!(!check(survey, json!({"results": {"$elemMatch": {"product": "xyz", "score": {"$gte": 8}}}})));
}

#[test]
fn test_missing_and_null_fields() {
    let docs = [json!({"_id": 1, "item": null}), json!({"_id": 2})];
    let null_eq: Vec<bool> = docs.iter().map(|d| check(d.clone(), json!({"item": null}))).collect();
    assert_eq!(null_eq, vec![true, true]);

    assert!(check(docs[0].clone(), json!({"item": {"$type": "null"}})));
    assert!(!check(docs[1].clone(), json!({"item": {"$type": "null"}})));
    assert!(check(docs[0].clone(), json!({"item": {"$exists": true}})));
    assert!(!check(docs[1].clone(), json!({"item": {"$exists": true}})));
}

#[test]
fn test_paths_through_arrays_with_missing_fields() {
    let d = json!({"items": [{"x": 1}, {"y": 2}]});
    assert!(check(d.clone(), json!({"items.x": null})));
    assert!(check(d.clone(), json!({"items.x": {"$in": [null]}})));
    assert!(check(d.clone(), json!({"items.x": {"$exists": false}})));
    assert!(check(d.clone(), json!({"items.x": {"$exists": true}})));
    assert!(check(d.clone(), json!({"items.x": 1})));
    assert!(!check(d.clone(), json!({"items.x": {"$ne": null}})));
    assert!(!check(d.clone(), json!({"items.x": {"$type": "undefined"}})));
    assert!(check(d, json!({"items.x": {"$lte": null}})));

    // Scalar elements never hold the field
    let mixed = json!({"items": [5, {"x": 1}]});
    assert!(check(mixed.clone(), json!({"items.x": null})));
    assert!(!check(mixed, json!({"items.x": {"$nin": [null]}})));

    // Every element holds the field
    let full = json!({"items": [{"x": 1}, {"x": 2}]});
    assert!(!check(full.clone(), json!({"items.x": null})));
    assert!(!check(full.clone(), json!({"items.x": {"$exists": false}})));
    assert!(check(full, json!({"items.x": {"$ne": null}})));

    // An empty array reaches nothing, like a missing field
    let empty = json!({"items": []});
    assert!(check(empty.clone(), json!({"items.x": null})));
    assert!(check(empty, json!({"items.x": {"$exists": false}})));
}

#[test]
fn test_regex_forms() {
    let d = json!({"sku": "abc123", "description": "First line\nSecond line"});
    assert!(check(d.clone(), json!({"sku": {"$regex": "^ABC", "$options": "i"}})));
    assert!(!check(d.clone(), json!({"sku": {"$regex": "^ABC"}})));
    assert!(check(d.clone(), json!({"description": {"$regex": "^S", "$options": "m"}})));
    assert!(check(d, json!({"description": {"$regex": "line.Second", "$options": "s"}})));
}

#[test]
fn test_not_includes_missing_fields() {
    assert!(check(json!({"price": 1.99}), json!({"price": {"$not": {"$gt": 1.99}}})));
    assert!(check(json!({"item": "x"}), json!({"price": {"$not": {"$gt": 1.99}}})));
    assert!(!check(json!({"price": 2.5}), json!({"price": {"$not": {"$gt": 1.99}}})));
}

#[test]
fn test_mod_and_bits() {
    assert!(check(json!({"qty": 12}), json!({"qty": {"$mod": [4, 0]}})));
    assert!(!check(json!({"qty": 13}), json!({"qty": {"$mod": [4, 0]}})));
    assert!(check(json!({"a": 54}), json!({"a": {"$bitsAllSet": [1, 5]}})));
    assert!(check(json!({"a": 54}), json!({"a": {"$bitsAnyClear": 1}})));
}

// ========== Logical operator tests ==========

#[test]
fn test_or_and_nor() {
    assert_eq!(matching_ids(json!({"$or": [{"qty": {"$lt": 30}}, {"item": "paper"}]})), vec![1, 3]);
    assert_eq!(
        matching_ids(json!({"$nor": [{"size.uom": "cm"}, {"qty": {"$gte": 100}}]})),
        vec![2]
    );
    assert_eq!(
        matching_ids(json!({"$and": [{"qty": {"$gt": 20}}, {"qty": {"$lt": 50}}]})),
        vec![1, 5]
    );
}

#[test]
fn test_expr_combines_with_field_clauses() {
    let filter = json!({"age": {"$gt": 28}, "$expr": {"$eq": ["$total", {"$multiply": ["$price", "$qty"]}]}});
    assert!(check(json!({"age": 30, "price": 5, "qty": 4, "total": 20}), filter.clone()));
    // $expr holds, field clause fails
    assert!(!check(json!({"age": 20, "price": 5, "qty": 4, "total": 20}), filter.clone()));
    // Field clause holds, $expr fails
    assert!(!check(json!({"age": 30, "price": 5, "qty": 4, "total": 21}), filter));
}

#[test]
fn test_expr_compares_two_fields() {
    let budget = [
        json!({"category": "food", "budget": 400, "spent": 450}),
        json!({"category": "drinks", "budget": 100, "spent": 150}),
        json!({"category": "clothes", "budget": 100, "spent": 50}),
    ];
    let over: Vec<bool> = budget
        .iter()
        .map(|d| check(d.clone(), json!({"$expr": {"$gt": ["$spent", "$budget"]}})))
        .collect();
    assert_eq!(over, vec![true, true, false]);
}

#[test]
fn test_json_schema_filter() {
    let filter = json!({"$jsonSchema": {
        "required": ["name", "major"],
        "properties": {
            "name": {"bsonType": "string"},
            "year": {"bsonType": "int", "minimum": 2017, "maximum": 3017}
        }
    }});
    assert!(check(json!({"name": "Alice", "year": 2019, "major": "History"}), filter.clone()));
    assert!(!check(json!({"name": "Bob", "year": 2016, "major": "Math"}), filter.clone()));
    assert!(!check(json!({"name": "Carol", "year": 2020}), filter));
}

#[test]
fn test_text_search_combines_with_field_clauses() {
    struct CaseInsensitive;
    impl TextSearch for CaseInsensitive {
        fn matches(&self, document: &Value, search: &Value) -> docmatch_core::Result<bool> {
            let needle = search
                .get("$search")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase();
            Ok(document
                .get("body")
                .and_then(Value::as_str)
                .map(|body| body.to_lowercase().contains(&needle))
                .unwrap_or(false))
        }
    }

    let filter = doc(json!({"$text": {"$search": "Coffee"}, "stars": {"$gte": 4}}));
    let hook = CaseInsensitive;
    let ctx = MatchContext::new().with_text_search(&hook);

    let results: Vec<bool> = [
        json!({"body": "coffee shop", "stars": 5}),
        json!({"body": "COFFEE bar", "stars": 2}),
        json!({"body": "tea house", "stars": 5}),
    ]
    .into_iter()
    .map(|d| matches_with(&doc(d), &filter, &ctx).unwrap())
    .collect();
    assert_eq!(results, vec![true, false, false]);

    // No hook: $text accepts everything, the field clause still applies
    assert!(matches(&doc(json!({"body": "tea house", "stars": 5})), &filter).unwrap());
    assert!(!matches(&doc(json!({"body": "tea house", "stars": 1})), &filter).unwrap());
}

// ========== Shape error tests ==========

#[test]
fn test_shape_errors() {
    let d = doc(json!({"a": 1}));
    for filter in [
        json!({"a": {"$foo": 1}}),
        json!({"a": {"$gt": 1, "b": 2}}),
        json!({"$or": {"a": 1}}),
        json!({"$where": "this.a == 1"}),
        json!({"a": {"$in": 5}}),
        json!({"a": {"$size": -1}}),
    ] {
        let err = matches(&d, &doc(filter.clone())).unwrap_err();
        assert!(
            matches!(err, DocMatchError::QueryShape(_)),
            "expected shape error for {}, got {:?}",
            filter,
            err
        );
    }
}

#[test]
fn test_json_schema_errors() {
    let err = matches(&doc(json!({})), &doc(json!({"$jsonSchema": {"bogusKeyword": 1}}))).unwrap_err();
    assert!(matches!(err, DocMatchError::JsonSchema(_)));
}

#[test]
fn test_mod_by_zero_is_arithmetic_error() {
    let err = matches(&doc(json!({"a": 4})), &doc(json!({"a": {"$mod": [0, 0]}}))).unwrap_err();
    assert!(matches!(err, DocMatchError::Arithmetic(_)));
}
