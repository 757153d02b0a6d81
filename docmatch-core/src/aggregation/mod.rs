// src/aggregation/mod.rs
//! Aggregation pipeline
//!
//! A pipeline is an ordered array of single-key stage objects. Each stage
//! consumes the full output of the previous one:
//!
//! ```text
//! documents → [$match] → [$project] → [$group] → [$sort] → ... → documents
//! ```
//!
//! Stages are parsed and validated up front by [`Pipeline::new`]; any error,
//! at parse time or while running, is reported as
//! [`DocMatchError::Stage`] carrying the stage index and name.

pub mod accumulators;
mod group;
mod reshape;

pub use group::{GroupStage, SortByCountStage};
pub use reshape::{AddFieldsStage, ProjectStage, ReplaceRootStage, UnwindStage};

use crate::document::Document;
use crate::error::{DocMatchError, Result};
use crate::options::AggregateOptions;
use crate::query::{MatchContext, Query};
use crate::value::{compare_values, Value};
use crate::value_utils::{get_nested_value, remove_path};
use std::cmp::Ordering;
use tracing::debug;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Everything a stage may consult while running
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExecutionContext<'a> {
    pub(crate) options: &'a AggregateOptions,
    pub(crate) matching: MatchContext<'a>,
}

pub(crate) fn not_a_document(stage: &str, value: &Value) -> DocMatchError {
    DocMatchError::TypeMismatch(format!(
        "{} expects documents, found {}",
        stage,
        value.type_name()
    ))
}

/// Fields of a pipeline document; stages only ever see objects
pub(crate) fn document_fields<'a>(stage: &str, doc: &'a Value) -> Result<&'a Document> {
    doc.as_object().ok_or_else(|| not_a_document(stage, doc))
}

/// Output field names may not be empty or start with `$`
pub(crate) fn check_field_name(stage: &str, field: &str) -> Result<()> {
    if field.is_empty() || field.starts_with('$') || field.split('.').any(str::is_empty) {
        return Err(DocMatchError::QueryShape(format!(
            "{}: invalid field name '{}'",
            stage, field
        )));
    }
    Ok(())
}

fn stage_spec_object<'a>(stage: &str, spec: &'a Value) -> Result<&'a Document> {
    spec.as_object().ok_or_else(|| {
        DocMatchError::QueryShape(format!("{} specification must be an object", stage))
    })
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Aggregation pipeline
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use docmatch_core::aggregation::Pipeline;
/// use docmatch_core::value::Value;
///
/// let pipeline = Pipeline::from_json(&json!([
///     {"$match": {"qty": {"$gt": 1}}},
///     {"$project": {"total": {"$multiply": ["$price", "$qty"]}}}
/// ])).unwrap();
///
/// let docs = vec![
///     Value::from(json!({"_id": 1, "price": 10, "qty": 2})),
///     Value::from(json!({"_id": 2, "price": 20, "qty": 1})),
/// ];
/// let out = pipeline.execute(docs).unwrap();
/// assert_eq!(out, vec![Value::from(json!({"_id": 1, "total": 20}))]);
/// ```
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Match(MatchStage),
    Project(ProjectStage),
    AddFields(AddFieldsStage),
    Unset(UnsetStage),
    Group(GroupStage),
    Sort(SortStage),
    Limit(LimitStage),
    Skip(SkipStage),
    Count(CountStage),
    Unwind(UnwindStage),
    ReplaceRoot(ReplaceRootStage),
    SortByCount(SortByCountStage),
}

impl Pipeline {
    /// Parse every stage of a pipeline array
    ///
    /// An empty pipeline is the identity.
    pub fn new(pipeline: &Value) -> Result<Self> {
        let stages_array = pipeline.as_array().ok_or_else(|| {
            DocMatchError::QueryShape("Pipeline must be an array".to_string())
        })?;

        let stages = stages_array
            .iter()
            .enumerate()
            .map(|(index, stage)| Stage::from_json(index, stage))
            .collect::<Result<Vec<_>>>()?;

        Ok(Pipeline { stages })
    }

    pub fn from_json(pipeline: &serde_json::Value) -> Result<Self> {
        Self::new(&Value::from(pipeline.clone()))
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Execute pipeline on documents with default options
    pub fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        self.execute_with(docs, &AggregateOptions::default(), &MatchContext::default())
    }

    /// Execute pipeline with caller bounds and matching context
    pub fn execute_with(
        &self,
        mut docs: Vec<Value>,
        options: &AggregateOptions,
        matching: &MatchContext<'_>,
    ) -> Result<Vec<Value>> {
        options.check_input(docs.len())?;
        let ctx = ExecutionContext {
            options,
            matching: *matching,
        };

        debug!(stages = self.stages.len(), documents = docs.len(), "running pipeline");
        for (index, stage) in self.stages.iter().enumerate() {
            let input = docs.len();
            docs = stage
                .execute(docs, &ctx)
                .map_err(|e| e.in_stage(index, stage.name()))?;
            debug!(index, stage = stage.name(), input, output = docs.len(), "stage finished");
        }
        Ok(docs)
    }
}

/// Parse `stages` and run them over `documents`
pub fn run(documents: Vec<Value>, stages: &Value) -> Result<Vec<Value>> {
    Pipeline::new(stages)?.execute(documents)
}

/// [`run`] with caller-configured bounds
pub fn run_with_options(
    documents: Vec<Value>,
    stages: &Value,
    options: &AggregateOptions,
) -> Result<Vec<Value>> {
    Pipeline::new(stages)?.execute_with(documents, options, &MatchContext::default())
}

impl Stage {
    /// Parse stage from its single-key object
    fn from_json(index: usize, stage_json: &Value) -> Result<Self> {
        let obj = stage_json.as_object().ok_or_else(|| {
            DocMatchError::QueryShape("Stage must be an object".to_string()).in_stage(index, "unknown")
        })?;

        // Each stage should have exactly one key
        let (stage_name, spec) = match obj.first() {
            Some(entry) if obj.len() == 1 => entry,
            _ => {
                let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
                return Err(DocMatchError::QueryShape(format!(
                    "Each stage must have exactly one operator, found [{}]",
                    keys.join(", ")
                ))
                .in_stage(index, "unknown"));
            }
        };

        let parsed = match stage_name.as_str() {
            "$match" => MatchStage::from_json(spec).map(Stage::Match),
            "$project" => ProjectStage::from_json(spec).map(Stage::Project),
            "$addFields" | "$set" => AddFieldsStage::from_json(stage_name, spec).map(Stage::AddFields),
            "$unset" => UnsetStage::from_json(spec).map(Stage::Unset),
            "$group" => GroupStage::from_json(spec).map(Stage::Group),
            "$sort" => SortStage::from_json(spec).map(Stage::Sort),
            "$limit" => LimitStage::from_json(spec).map(Stage::Limit),
            "$skip" => SkipStage::from_json(spec).map(Stage::Skip),
            "$count" => CountStage::from_json(spec).map(Stage::Count),
            "$unwind" => UnwindStage::from_json(spec).map(Stage::Unwind),
            "$replaceRoot" => ReplaceRootStage::from_replace_root(spec).map(Stage::ReplaceRoot),
            "$replaceWith" => ReplaceRootStage::from_replace_with(spec).map(Stage::ReplaceRoot),
            "$sortByCount" => SortByCountStage::from_json(spec).map(Stage::SortByCount),
            _ => Err(DocMatchError::QueryShape(format!(
                "Unknown pipeline stage: {}",
                stage_name
            ))),
        };
        parsed.map_err(|e| e.in_stage(index, stage_name))
    }

    /// Stage name as written in the pipeline
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Project(_) => "$project",
            Stage::AddFields(stage) => stage.name(),
            Stage::Unset(_) => "$unset",
            Stage::Group(_) => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::Skip(_) => "$skip",
            Stage::Count(_) => "$count",
            Stage::Unwind(_) => "$unwind",
            Stage::ReplaceRoot(stage) => stage.name(),
            Stage::SortByCount(_) => "$sortByCount",
        }
    }

    /// Execute this stage
    fn execute(&self, docs: Vec<Value>, ctx: &ExecutionContext<'_>) -> Result<Vec<Value>> {
        match self {
            Stage::Match(stage) => stage.execute(docs, ctx),
            Stage::Project(stage) => stage.execute(docs),
            Stage::AddFields(stage) => stage.execute(docs),
            Stage::Unset(stage) => stage.execute(docs),
            Stage::Group(stage) => stage.execute(docs, ctx),
            Stage::Sort(stage) => stage.execute(docs),
            Stage::Limit(stage) => Ok(stage.execute(docs)),
            Stage::Skip(stage) => Ok(stage.execute(docs)),
            Stage::Count(stage) => Ok(stage.execute(docs)),
            Stage::Unwind(stage) => stage.execute(docs),
            Stage::ReplaceRoot(stage) => stage.execute(docs),
            Stage::SortByCount(stage) => stage.execute(docs, ctx),
        }
    }
}

// ============================================================================
// $match
// ============================================================================

/// $match stage - filter documents, keeping their relative order
#[derive(Debug, Clone)]
pub struct MatchStage {
    query: Query,
}

impl MatchStage {
    fn from_json(spec: &Value) -> Result<Self> {
        Ok(MatchStage {
            query: Query::new(spec.clone())?,
        })
    }

    fn execute(&self, docs: Vec<Value>, ctx: &ExecutionContext<'_>) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            if self.query.matches_with(&doc, &ctx.matching)? {
                results.push(doc);
            }
        }
        Ok(results)
    }
}

// ============================================================================
// $unset
// ============================================================================

/// $unset stage - remove leaf paths
#[derive(Debug, Clone)]
pub struct UnsetStage {
    paths: Vec<String>,
}

impl UnsetStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let paths: Vec<String> = match spec {
            Value::String(path) => vec![path.clone()],
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        DocMatchError::QueryShape(
                            "$unset specification must be a string or an array of strings"
                                .to_string(),
                        )
                    })
                })
                .collect::<Result<_>>()?,
            Value::Object(fields) => fields.keys().cloned().collect(),
            _ => {
                return Err(DocMatchError::QueryShape(
                    "$unset specification must be a string or an array of strings".to_string(),
                ))
            }
        };

        if paths.is_empty() {
            return Err(DocMatchError::QueryShape(
                "$unset specification must name at least one field".to_string(),
            ));
        }
        for path in &paths {
            check_field_name("$unset", path)?;
        }
        Ok(UnsetStage { paths })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        docs.into_iter()
            .map(|doc| match doc {
                Value::Object(mut fields) => {
                    for path in &self.paths {
                        remove_path(&mut fields, path);
                    }
                    Ok(Value::Object(fields))
                }
                other => Err(not_a_document("$unset", &other)),
            })
            .collect()
    }
}

// ============================================================================
// $sort
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// $sort stage - stable multi-key sort under the total order
#[derive(Debug, Clone)]
pub struct SortStage {
    keys: Vec<(String, SortDirection)>,
}

const MISSING: Value = Value::Missing;

impl SortStage {
    pub(crate) fn new(keys: Vec<(String, SortDirection)>) -> Self {
        SortStage { keys }
    }

    fn from_json(spec: &Value) -> Result<Self> {
        let obj = stage_spec_object("$sort", spec)?;
        if obj.is_empty() {
            return Err(DocMatchError::QueryShape(
                "$sort stage must have at least one sort key".to_string(),
            ));
        }

        let mut keys = Vec::with_capacity(obj.len());
        for (field, direction) in obj {
            let direction = match direction.as_i64() {
                Some(1) => SortDirection::Ascending,
                Some(-1) => SortDirection::Descending,
                _ => {
                    return Err(DocMatchError::QueryShape(format!(
                        "$sort key ordering for '{}' must be 1 (for ascending) or -1 (for descending)",
                        field
                    )))
                }
            };
            check_field_name("$sort", field)?;
            keys.push((field.clone(), direction));
        }
        Ok(SortStage { keys })
    }

    pub(crate) fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for (field, direction) in &self.keys {
            let val_a = get_nested_value(a, field).unwrap_or(&MISSING);
            let val_b = get_nested_value(b, field).unwrap_or(&MISSING);

            let cmp = compare_values(val_a, val_b);
            if cmp != Ordering::Equal {
                return match direction {
                    SortDirection::Ascending => cmp,
                    SortDirection::Descending => cmp.reverse(),
                };
            }
        }
        Ordering::Equal
    }

    fn execute(&self, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        // sort_by is stable: ties keep their input order
        docs.sort_by(|a, b| self.compare(a, b));
        Ok(docs)
    }
}

// ============================================================================
// $limit / $skip / $count
// ============================================================================

fn parse_count(stage: &str, spec: &Value, minimum: i64) -> Result<usize> {
    spec.as_i64()
        .filter(|n| *n >= minimum)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| {
            DocMatchError::QueryShape(format!(
                "{} requires an integer >= {}, found {}",
                stage,
                minimum,
                spec.to_json()
            ))
        })
}

/// $limit stage - keep the first `n` documents
#[derive(Debug, Clone)]
pub struct LimitStage {
    limit: usize,
}

impl LimitStage {
    fn from_json(spec: &Value) -> Result<Self> {
        Ok(LimitStage {
            limit: parse_count("$limit", spec, 1)?,
        })
    }

    fn execute(&self, mut docs: Vec<Value>) -> Vec<Value> {
        docs.truncate(self.limit);
        docs
    }
}

/// $skip stage - drop the first `n` documents
#[derive(Debug, Clone)]
pub struct SkipStage {
    skip: usize,
}

impl SkipStage {
    fn from_json(spec: &Value) -> Result<Self> {
        Ok(SkipStage {
            skip: parse_count("$skip", spec, 0)?,
        })
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        docs.into_iter().skip(self.skip).collect()
    }
}

/// $count stage - one document holding the number of inputs
///
/// No input produces no output.
#[derive(Debug, Clone)]
pub struct CountStage {
    field: String,
}

impl CountStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let field = spec.as_str().ok_or_else(|| {
            DocMatchError::QueryShape("$count field name must be a string".to_string())
        })?;
        if field.contains('.') {
            return Err(DocMatchError::QueryShape(
                "$count field name must not contain '.'".to_string(),
            ));
        }
        check_field_name("$count", field)?;
        Ok(CountStage {
            field: field.to_string(),
        })
    }

    fn execute(&self, docs: Vec<Value>) -> Vec<Value> {
        if docs.is_empty() {
            return docs;
        }
        let mut out = Document::with_capacity(1);
        out.insert(self.field.as_str(), Value::from(docs.len()));
        vec![Value::Object(out)]
    }
}
