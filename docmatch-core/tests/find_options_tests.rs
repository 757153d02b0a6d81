// find_options_tests.rs
// find(): filter, then sort / skip / limit / projection

use docmatch_core::{find, DocMatchError, ErrorPolicy, FindOptions, Value};
use serde_json::json;

fn collection() -> Vec<Value> {
    match Value::from(json!([
        {"_id": 1, "name": "Alice", "stats": {"score": 85}, "address": {"city": "NYC", "zip": "10001"}},
        {"_id": 2, "name": "Bob", "stats": {"score": 92}, "address": {"city": "LA", "zip": "90001"}},
        {"_id": 3, "name": "Charlie", "stats": {"score": 78}, "address": {"city": "NYC", "zip": "10002"}},
        {"_id": 4, "name": "Dana", "address": {"city": "SF"}}
    ])) {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

fn names(results: &[Value]) -> Vec<&str> {
    results
        .iter()
        .filter_map(|doc| doc.get("name").and_then(Value::as_str))
        .collect()
}

#[test]
fn test_sort_dot_notation_descending() {
    let options = FindOptions::new().with_sort(vec![("stats.score".to_string(), -1)]);
    let results = find(&collection(), &Value::from(json!({})), &options).unwrap();
    // Missing score sorts lowest
    assert_eq!(names(&results), vec!["Bob", "Alice", "Charlie", "Dana"]);
}

#[test]
fn test_sort_multi_field() {
    let options = FindOptions::new().with_sort(vec![
        ("address.city".to_string(), 1),
        ("stats.score".to_string(), -1),
    ]);
    let results = find(&collection(), &Value::from(json!({})), &options).unwrap();
    assert_eq!(names(&results), vec!["Bob", "Alice", "Charlie", "Dana"]);
}

#[test]
fn test_pagination() {
    let filter = Value::from(json!({"address.city": {"$in": ["NYC", "LA", "SF"]}}));
    let page = |skip: usize| {
        let options = FindOptions::new()
            .with_sort(vec![("name".to_string(), 1)])
            .with_skip(skip)
            .with_limit(2);
        find(&collection(), &filter, &options).unwrap()
    };
    assert_eq!(names(&page(0)), vec!["Alice", "Bob"]);
    assert_eq!(names(&page(2)), vec!["Charlie", "Dana"]);
    assert!(page(4).is_empty());
}

#[test]
fn test_projection_dot_notation() {
    let options = FindOptions::new().with_projection(Value::from(json!({"address.city": 1, "name": 1})));
    let results = find(&collection(), &Value::from(json!({"_id": 2})), &options).unwrap();
    assert_eq!(
        results,
        vec![Value::from(json!({"_id": 2, "address": {"city": "LA"}, "name": "Bob"}))]
    );
}

#[test]
fn test_projection_exclusion_and_computed() {
    let options = FindOptions::new()
        .with_projection(Value::from(json!({"address": 0, "stats": 0})))
        .with_limit(1);
    let results = find(&collection(), &Value::from(json!({})), &options).unwrap();
    assert_eq!(results, vec![Value::from(json!({"_id": 1, "name": "Alice"}))]);

    let options = FindOptions::new().with_projection(Value::from(json!({
        "_id": 0,
        "label": {"$concat": ["$name", "@", "$address.city"]}
    })));
    let results = find(&collection(), &Value::from(json!({"_id": 3})), &options).unwrap();
    assert_eq!(results, vec![Value::from(json!({"label": "Charlie@NYC"}))]);
}

#[test]
fn test_skip_document_policy() {
    let filter = Value::from(json!({"$expr": {"$gt": [{"$divide": [100, "$stats.score"]}, 1]}}));
    let mut docs = collection();
    docs.push(Value::from(json!({"_id": 5, "name": "Zero", "stats": {"score": 0}})));

    let err = find(&docs, &filter, &FindOptions::new()).unwrap_err();
    assert!(matches!(err, DocMatchError::Arithmetic(_)));

    let options = FindOptions::new().with_error_policy(ErrorPolicy::SkipDocument);
    let results = find(&docs, &filter, &options).unwrap();
    assert_eq!(names(&results), vec!["Alice", "Bob", "Charlie"]);
}

#[test]
fn test_invalid_projection_is_rejected_before_scanning() {
    let options = FindOptions::new().with_projection(Value::from(json!({"name": 1, "address": 0})));
    let err = find(&collection(), &Value::from(json!({})), &options).unwrap_err();
    assert!(matches!(err.root_cause(), DocMatchError::QueryShape(_)));
}
