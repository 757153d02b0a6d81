// src/query/logical.rs
//! Top-level document operators: `$and`, `$or`, `$nor`, `$not`, `$expr`,
//! `$jsonSchema`, `$comment`, `$text`
//!
//! These apply to the whole document rather than to one field's values.

use super::schema::CompiledSchema;
use super::{matches_filter, validate_filter, MatchContext};
use crate::error::{DocMatchError, Result};
use crate::expression::{self, Scope};
use crate::value::Value;
use lazy_static::lazy_static;
use std::collections::HashMap;
use tracing::trace;

/// Trait for operators that appear as top-level filter keys
pub trait DocumentOperator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check the argument's shape without touching a document
    fn validate(&self, _arg: &Value) -> Result<()> {
        Ok(())
    }

    fn matches(&self, document: &Value, arg: &Value, ctx: &MatchContext<'_>) -> Result<bool>;
}

fn sub_filters<'a>(op: &str, arg: &'a Value) -> Result<&'a Vec<Value>> {
    arg.as_array().ok_or_else(|| {
        DocMatchError::QueryShape(format!("{} argument must be an array", op))
    })
}

// ============================================================================
// LOGICAL OPERATORS
// ============================================================================

/// `$and`: every sub-filter matches (vacuously true when empty)
pub struct AndOperator;

impl DocumentOperator for AndOperator {
    fn name(&self) -> &'static str {
        "$and"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        sub_filters("$and", arg)?.iter().try_for_each(validate_filter)
    }

    fn matches(&self, document: &Value, arg: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        for filter in sub_filters("$and", arg)? {
            if !matches_filter(document, filter, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// `$or`: at least one sub-filter matches (false when empty)
pub struct OrOperator;

impl DocumentOperator for OrOperator {
    fn name(&self) -> &'static str {
        "$or"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        sub_filters("$or", arg)?.iter().try_for_each(validate_filter)
    }

    fn matches(&self, document: &Value, arg: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        for filter in sub_filters("$or", arg)? {
            if matches_filter(document, filter, ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// `$nor`: no sub-filter matches
pub struct NorOperator;

impl DocumentOperator for NorOperator {
    fn name(&self) -> &'static str {
        "$nor"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        sub_filters("$nor", arg)?.iter().try_for_each(validate_filter)
    }

    fn matches(&self, document: &Value, arg: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        Ok(!OrOperator.matches(document, arg, ctx)?)
    }
}

/// Top-level `$not`: negation of a whole filter document
pub struct NotFilterOperator;

impl DocumentOperator for NotFilterOperator {
    fn name(&self) -> &'static str {
        "$not"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        validate_filter(arg)
    }

    fn matches(&self, document: &Value, arg: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        Ok(!matches_filter(document, arg, ctx)?)
    }
}

// ============================================================================
// EXPRESSION AND SCHEMA OPERATORS
// ============================================================================

/// `$expr`: truthiness of an aggregation expression over the document
pub struct ExprOperator;

impl DocumentOperator for ExprOperator {
    fn name(&self) -> &'static str {
        "$expr"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        expression::validate(arg)
    }

    fn matches(&self, document: &Value, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        let result = expression::evaluate(arg, &Scope::new(document))?;
        Ok(result.is_truthy())
    }
}

/// `$jsonSchema`
///
/// The schema is compiled per call; `Query::new` compiles it once up front
/// so malformed schemas fail before any document is seen.
pub struct JsonSchemaOperator;

impl DocumentOperator for JsonSchemaOperator {
    fn name(&self) -> &'static str {
        "$jsonSchema"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        CompiledSchema::from_value(arg).map(|_| ())
    }

    fn matches(&self, document: &Value, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        Ok(CompiledSchema::from_value(arg)?.matches(document))
    }
}

// ============================================================================
// PASS-THROUGH OPERATORS
// ============================================================================

/// `$comment`: ignored for matching
pub struct CommentOperator;

impl DocumentOperator for CommentOperator {
    fn name(&self) -> &'static str {
        "$comment"
    }

    fn matches(&self, _document: &Value, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        trace!(comment = %arg.to_json(), "query comment");
        Ok(true)
    }
}

/// `$text`: delegated to the context's [`TextSearch`](super::TextSearch)
/// hook; without one every document matches
pub struct TextOperator;

impl DocumentOperator for TextOperator {
    fn name(&self) -> &'static str {
        "$text"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        match arg.get("$search") {
            Some(Value::String(_)) => Ok(()),
            _ => Err(DocMatchError::QueryShape(
                "$text requires a $search string".to_string(),
            )),
        }
    }

    fn matches(&self, document: &Value, arg: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        match ctx.text_search() {
            Some(search) => search.matches(document, arg),
            None => {
                trace!("no text search configured, $text matches every document");
                Ok(true)
            }
        }
    }
}

// ============================================================================
// OPERATOR REGISTRY
// ============================================================================

lazy_static! {
    /// Global registry of top-level document operators
    pub static ref DOCUMENT_OPERATORS: HashMap<&'static str, Box<dyn DocumentOperator>> = {
        let mut registry: HashMap<&'static str, Box<dyn DocumentOperator>> = HashMap::new();
        registry.insert("$and", Box::new(AndOperator));
        registry.insert("$or", Box::new(OrOperator));
        registry.insert("$nor", Box::new(NorOperator));
        registry.insert("$not", Box::new(NotFilterOperator));
        registry.insert("$expr", Box::new(ExprOperator));
        registry.insert("$jsonSchema", Box::new(JsonSchemaOperator));
        registry.insert("$comment", Box::new(CommentOperator));
        registry.insert("$text", Box::new(TextOperator));
        registry
    };
}

pub(crate) fn lookup(name: &str) -> Result<&'static dyn DocumentOperator> {
    DOCUMENT_OPERATORS
        .get(name)
        .map(|operator| operator.as_ref())
        .ok_or_else(|| {
            DocMatchError::QueryShape(format!("unknown top level operator: {}", name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(op: &dyn DocumentOperator, doc: serde_json::Value, arg: serde_json::Value) -> Result<bool> {
        op.matches(&Value::from(doc), &Value::from(arg), &MatchContext::default())
    }

    #[test]
    fn test_and_or_nor() {
        let doc = json!({"a": 1, "b": 2});
        assert!(run(&AndOperator, doc.clone(), json!([{"a": 1}, {"b": 2}])).unwrap());
        assert!(!run(&AndOperator, doc.clone(), json!([{"a": 1}, {"b": 3}])).unwrap());
        assert!(run(&OrOperator, doc.clone(), json!([{"a": 5}, {"b": 2}])).unwrap());
        assert!(run(&NorOperator, doc.clone(), json!([{"a": 5}, {"b": 5}])).unwrap());
        assert!(!run(&NorOperator, doc, json!([{"a": 1}])).unwrap());
    }

    #[test]
    fn test_empty_logical_arrays() {
        let doc = json!({"a": 1});
        assert!(run(&AndOperator, doc.clone(), json!([])).unwrap());
        assert!(!run(&OrOperator, doc.clone(), json!([])).unwrap());
        assert!(run(&NorOperator, doc, json!([])).unwrap());
    }

    #[test]
    fn test_logical_requires_array() {
        assert!(AndOperator.validate(&Value::from(json!({"a": 1}))).is_err());
        assert!(run(&OrOperator, json!({}), json!({"a": 1})).is_err());
    }

    #[test]
    fn test_top_level_not() {
        assert!(run(&NotFilterOperator, json!({"a": 1}), json!({"a": 2})).unwrap());
        assert!(!run(&NotFilterOperator, json!({"a": 1}), json!({"a": 1})).unwrap());
    }

    #[test]
    fn test_expr_compares_fields() {
        let arg = json!({"$gt": ["$spent", "$budget"]});
        assert!(run(&ExprOperator, json!({"spent": 150, "budget": 100}), arg.clone()).unwrap());
        assert!(!run(&ExprOperator, json!({"spent": 50, "budget": 100}), arg).unwrap());
        assert!(ExprOperator.validate(&Value::from(json!({"$bogus": 1}))).is_err());
    }

    #[test]
    fn test_json_schema_operator() {
        let schema = json!({"required": ["name"]});
        assert!(run(&JsonSchemaOperator, json!({"name": "x"}), schema.clone()).unwrap());
        assert!(!run(&JsonSchemaOperator, json!({"other": 1}), schema).unwrap());
        let err = JsonSchemaOperator.validate(&Value::from(json!({"nope": 1}))).unwrap_err();
        assert!(matches!(err, DocMatchError::JsonSchema(_)));
    }

    #[test]
    fn test_comment_and_text_pass_through() {
        assert!(run(&CommentOperator, json!({}), json!("audit")).unwrap());
        assert!(run(&TextOperator, json!({}), json!({"$search": "coffee"})).unwrap());
        assert!(TextOperator.validate(&Value::from(json!({}))).is_err());
    }

    #[test]
    fn test_registry_contains_all_operators() {
        for name in ["$and", "$or", "$nor", "$not", "$expr", "$jsonSchema", "$comment", "$text"] {
            assert_eq!(lookup(name).unwrap().name(), name);
        }
        assert!(lookup("$where").is_err());
    }
}
