// src/aggregation/reshape.rs
//! Stages that reshape each document independently:
//! `$project`, `$addFields`/`$set`, `$replaceRoot`/`$replaceWith`, `$unwind`

use super::{check_field_name, document_fields, not_a_document};
use crate::document::Document;
use crate::error::{DocMatchError, Result};
use crate::expression::{self, evaluate, Scope};
use crate::value::Value;
use crate::value_utils::{get_nested_value, include_path, remove_path, set_path};

/// Object values with plain keys nest field paths: `{a: {b: 1}}` is `{"a.b": 1}`
fn is_nested_spec(value: &Value) -> Option<&Document> {
    value
        .as_object()
        .filter(|doc| !doc.is_empty() && !doc.keys().any(|k| k.starts_with('$')))
}

fn join_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}

// ============================================================================
// $project
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectField {
    Include,         // 1 / true
    Exclude,         // 0 / false
    Computed(Value), // any other expression
}

/// $project stage - reshape documents
///
/// Runs in inclusion mode when a field is included, or when fields are
/// computed and nothing but `_id` is excluded; otherwise the passthrough
/// document loses the excluded paths and gains the computed ones.
#[derive(Debug, Clone)]
pub struct ProjectStage {
    fields: Vec<(String, ProjectField)>,
    inclusion: bool,
    exclude_id: bool,
}

impl ProjectStage {
    pub(super) fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec.as_object().ok_or_else(|| {
            DocMatchError::QueryShape("$project must be an object".to_string())
        })?;
        if obj.is_empty() {
            return Err(DocMatchError::QueryShape(
                "$project specification must have at least one field".to_string(),
            ));
        }

        let mut fields = Vec::with_capacity(obj.len());
        Self::parse_fields("", obj, &mut fields)?;

        let has_inclusions = fields
            .iter()
            .any(|(_, action)| matches!(action, ProjectField::Include));
        let has_computed = fields
            .iter()
            .any(|(_, action)| matches!(action, ProjectField::Computed(_)));
        let non_id_exclusion = fields
            .iter()
            .find(|(field, action)| matches!(action, ProjectField::Exclude) && field != "_id");

        if let (true, Some((field, _))) = (has_inclusions, non_id_exclusion) {
            return Err(DocMatchError::QueryShape(format!(
                "Cannot do exclusion on field '{}' in inclusion projection",
                field
            )));
        }

        let inclusion = has_inclusions || (has_computed && non_id_exclusion.is_none());
        let exclude_id = fields
            .iter()
            .any(|(field, action)| field == "_id" && matches!(action, ProjectField::Exclude));

        Ok(ProjectStage {
            fields,
            inclusion,
            exclude_id,
        })
    }

    fn parse_fields(
        prefix: &str,
        obj: &Document,
        out: &mut Vec<(String, ProjectField)>,
    ) -> Result<()> {
        for (field, value) in obj {
            check_field_name("$project", field)?;
            let path = join_path(prefix, field);
            if let Some(nested) = is_nested_spec(value) {
                Self::parse_fields(&path, nested, out)?;
                continue;
            }
            let action = match value {
                Value::Bool(include) => {
                    if *include {
                        ProjectField::Include
                    } else {
                        ProjectField::Exclude
                    }
                }
                number if number.is_number() => {
                    if number.is_truthy() {
                        ProjectField::Include
                    } else {
                        ProjectField::Exclude
                    }
                }
                expr => {
                    expression::validate(expr)?;
                    ProjectField::Computed(expr.clone())
                }
            };
            out.push((path, action));
        }
        Ok(())
    }

    /// Whether the stage keeps only the listed fields
    pub fn is_inclusion(&self) -> bool {
        self.inclusion
    }

    pub(super) fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        docs.iter().map(|doc| self.project_document(doc)).collect()
    }

    pub(crate) fn project_document(&self, doc: &Value) -> Result<Value> {
        let source = document_fields("$project", doc)?;
        let scope = Scope::new(doc);

        if self.inclusion {
            let mut result = Document::with_capacity(self.fields.len() + 1);
            if !self.exclude_id {
                if let Some(id) = source.get("_id") {
                    result.insert("_id", id.clone());
                }
            }
            for (path, action) in &self.fields {
                match action {
                    ProjectField::Include if path != "_id" => include_path(source, path, &mut result),
                    ProjectField::Computed(expr) => {
                        let value = evaluate(expr, &scope)?;
                        if !value.is_missing() {
                            set_path(&mut result, path, value);
                        }
                    }
                    _ => {}
                }
            }
            return Ok(Value::Object(result));
        }

        let mut result = source.clone();
        for (path, action) in &self.fields {
            match action {
                ProjectField::Exclude => remove_path(&mut result, path),
                ProjectField::Computed(expr) => match evaluate(expr, &scope)? {
                    Value::Missing => remove_path(&mut result, path),
                    value => set_path(&mut result, path, value),
                },
                ProjectField::Include => {}
            }
        }
        Ok(Value::Object(result))
    }
}

// ============================================================================
// $addFields / $set
// ============================================================================

/// $addFields stage (alias `$set`) - add or overwrite computed fields
///
/// Every expression sees the incoming document, not fields added by the
/// same stage.
#[derive(Debug, Clone)]
pub struct AddFieldsStage {
    name: &'static str,
    fields: Vec<(String, Value)>,
}

impl AddFieldsStage {
    pub(super) fn from_json(name: &str, spec: &Value) -> Result<Self> {
        let name = if name == "$set" { "$set" } else { "$addFields" };
        let obj = spec.as_object().ok_or_else(|| {
            DocMatchError::QueryShape(format!("{} specification must be an object", name))
        })?;
        if obj.is_empty() {
            return Err(DocMatchError::QueryShape(format!(
                "{} specification must have at least one field",
                name
            )));
        }

        let mut fields = Vec::with_capacity(obj.len());
        Self::parse_fields(name, "", obj, &mut fields)?;
        Ok(AddFieldsStage { name, fields })
    }

    fn parse_fields(
        name: &str,
        prefix: &str,
        obj: &Document,
        out: &mut Vec<(String, Value)>,
    ) -> Result<()> {
        for (field, expr) in obj {
            check_field_name(name, field)?;
            let path = join_path(prefix, field);
            match is_nested_spec(expr) {
                Some(nested) => Self::parse_fields(name, &path, nested, out)?,
                None => {
                    expression::validate(expr)?;
                    out.push((path, expr.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(super) fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        docs.iter()
            .map(|doc| {
                let mut result = document_fields(self.name, doc)?.clone();
                let scope = Scope::new(doc);
                for (path, expr) in &self.fields {
                    match evaluate(expr, &scope)? {
                        Value::Missing => remove_path(&mut result, path),
                        value => set_path(&mut result, path, value),
                    }
                }
                Ok(Value::Object(result))
            })
            .collect()
    }
}

// ============================================================================
// $replaceRoot / $replaceWith
// ============================================================================

/// $replaceRoot / $replaceWith stage - the evaluated expression becomes the
/// document
#[derive(Debug, Clone)]
pub struct ReplaceRootStage {
    name: &'static str,
    new_root: Value,
}

impl ReplaceRootStage {
    pub(super) fn from_replace_root(spec: &Value) -> Result<Self> {
        let new_root = spec
            .as_object()
            .filter(|obj| obj.len() == 1)
            .and_then(|obj| obj.get("newRoot"))
            .ok_or_else(|| {
                DocMatchError::QueryShape(
                    "$replaceRoot specification must be {newRoot: <expression>}".to_string(),
                )
            })?;
        expression::validate(new_root)?;
        Ok(ReplaceRootStage {
            name: "$replaceRoot",
            new_root: new_root.clone(),
        })
    }

    pub(super) fn from_replace_with(spec: &Value) -> Result<Self> {
        expression::validate(spec)?;
        Ok(ReplaceRootStage {
            name: "$replaceWith",
            new_root: spec.clone(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(super) fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        docs.iter()
            .map(|doc| match evaluate(&self.new_root, &Scope::new(doc))? {
                root @ Value::Object(_) => Ok(root),
                other => Err(DocMatchError::TypeMismatch(format!(
                    "'newRoot' expression must evaluate to an object, but resulting value was: {}",
                    other.to_json()
                ))),
            })
            .collect()
    }
}

// ============================================================================
// $unwind
// ============================================================================

/// $unwind stage - one output document per array element
#[derive(Debug, Clone)]
pub struct UnwindStage {
    path: String,
    include_array_index: Option<String>,
    preserve_null_and_empty: bool,
}

impl UnwindStage {
    pub(super) fn from_json(spec: &Value) -> Result<Self> {
        let (path, include_array_index, preserve_null_and_empty) = match spec {
            Value::String(path) => (path.as_str(), None, false),
            Value::Object(options) => {
                let mut path = None;
                let mut index = None;
                let mut preserve = false;
                for (key, value) in options {
                    match key.as_str() {
                        "path" => path = value.as_str(),
                        "includeArrayIndex" => {
                            let field = value.as_str().ok_or_else(|| {
                                DocMatchError::QueryShape(
                                    "$unwind includeArrayIndex must be a string".to_string(),
                                )
                            })?;
                            check_field_name("$unwind", field)?;
                            index = Some(field.to_string());
                        }
                        "preserveNullAndEmptyArrays" => {
                            preserve = value.as_bool().ok_or_else(|| {
                                DocMatchError::QueryShape(
                                    "$unwind preserveNullAndEmptyArrays must be a boolean"
                                        .to_string(),
                                )
                            })?;
                        }
                        other => {
                            return Err(DocMatchError::QueryShape(format!(
                                "unrecognized option to $unwind stage: {}",
                                other
                            )))
                        }
                    }
                }
                let path = path.ok_or_else(|| {
                    DocMatchError::QueryShape("$unwind requires a string 'path'".to_string())
                })?;
                (path, index, preserve)
            }
            _ => {
                return Err(DocMatchError::QueryShape(
                    "$unwind specification must be a string or an object".to_string(),
                ))
            }
        };

        let field = path.strip_prefix('$').ok_or_else(|| {
            DocMatchError::QueryShape(
                "path option to $unwind stage should be prefixed with a '$'".to_string(),
            )
        })?;
        check_field_name("$unwind", field)?;

        Ok(UnwindStage {
            path: field.to_string(),
            include_array_index,
            preserve_null_and_empty,
        })
    }

    fn with_index(&self, mut doc: Document, index: Value) -> Value {
        if let Some(field) = &self.include_array_index {
            set_path(&mut doc, field, index);
        }
        Value::Object(doc)
    }

    pub(super) fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(docs.len());

        for doc in docs {
            let target = get_nested_value(&doc, &self.path).cloned();
            let fields = match doc {
                Value::Object(fields) => fields,
                other => return Err(not_a_document("$unwind", &other)),
            };

            match target {
                Some(Value::Array(items)) if !items.is_empty() => {
                    for (i, item) in items.into_iter().enumerate() {
                        let mut out = fields.clone();
                        set_path(&mut out, &self.path, item);
                        results.push(self.with_index(out, Value::from(i)));
                    }
                }
                Some(Value::Array(_)) => {
                    if self.preserve_null_and_empty {
                        let mut out = fields;
                        remove_path(&mut out, &self.path);
                        results.push(self.with_index(out, Value::Null));
                    }
                }
                None | Some(Value::Null) => {
                    if self.preserve_null_and_empty {
                        results.push(self.with_index(fields, Value::Null));
                    }
                }
                // A non-array value unwinds to itself
                Some(_) => results.push(self.with_index(fields, Value::Null)),
            }
        }

        Ok(results)
    }
}
