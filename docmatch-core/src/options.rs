// docmatch-core/src/options.rs
// Caller options: aggregation bounds, find (filter + sort/skip/limit/projection)

use crate::aggregation::Pipeline;
use crate::document::Document;
use crate::error::{DocMatchError, Result};
use crate::query::{MatchContext, Query};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What `find` does when evaluating the filter against a document fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Return the first error
    #[default]
    Abort,
    /// Log the error and treat the document as not matching
    SkipDocument,
}

/// Bounds applied while running a pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateOptions {
    /// Reject inputs with more documents than this
    pub max_input_documents: Option<usize>,

    /// Fail a `$group` (or `$sortByCount`) that would create more groups
    pub max_groups: Option<usize>,
}

impl AggregateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_input_documents(mut self, max: usize) -> Self {
        self.max_input_documents = Some(max);
        self
    }

    pub fn with_max_groups(mut self, max: usize) -> Self {
        self.max_groups = Some(max);
        self
    }

    pub(crate) fn check_input(&self, count: usize) -> Result<()> {
        match self.max_input_documents {
            Some(max) if count > max => Err(DocMatchError::LimitExceeded(format!(
                "pipeline input has {} documents, limit is {}",
                count, max
            ))),
            _ => Ok(()),
        }
    }

    pub(crate) fn check_groups(&self, count: usize) -> Result<()> {
        match self.max_groups {
            Some(max) if count > max => Err(DocMatchError::LimitExceeded(format!(
                "$group would create more than {} groups",
                max
            ))),
            _ => Ok(()),
        }
    }
}

/// Options for find queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindOptions {
    /// Projection in `$project` syntax: field -> 1/0 or an expression
    pub projection: Option<Value>,

    /// Sort: [(field, direction)], direction: 1 (asc) or -1 (desc)
    pub sort: Option<Vec<(String, i32)>>,

    /// Skip: number of matching documents to skip (for pagination)
    pub skip: Option<usize>,

    /// Limit: maximum number of documents to return
    pub limit: Option<usize>,

    pub error_policy: ErrorPolicy,

    /// Examine at most this many input documents
    pub max_scanned: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: Value) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: Vec<(String, i32)>) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_max_scanned(mut self, max: usize) -> Self {
        self.max_scanned = Some(max);
        self
    }

    /// Post-filter stages as a pipeline: sort, skip, limit, then project
    fn stages(&self) -> Value {
        let mut stages = Vec::new();

        if let Some(sort) = self.sort.as_ref().filter(|keys| !keys.is_empty()) {
            let keys: Document = sort
                .iter()
                .map(|(field, direction)| (field.clone(), Value::Int(i64::from(*direction))))
                .collect();
            stages.push(stage("$sort", Value::Object(keys)));
        }
        if let Some(skip) = self.skip.filter(|skip| *skip > 0) {
            stages.push(stage("$skip", Value::from(skip)));
        }
        if let Some(limit) = self.limit {
            stages.push(stage("$limit", Value::from(limit)));
        }
        if let Some(projection) = &self.projection {
            let is_empty = projection.as_object().map(Document::is_empty).unwrap_or(false);
            if !is_empty {
                stages.push(stage("$project", projection.clone()));
            }
        }

        Value::Array(stages)
    }
}

fn stage(name: &str, spec: Value) -> Value {
    let mut doc = Document::with_capacity(1);
    doc.insert(name, spec);
    Value::Object(doc)
}

/// Filter `documents` and apply the sort/skip/limit/projection in `options`
///
/// A `limit` of 0 returns no documents.
pub fn find(documents: &[Value], filter: &Value, options: &FindOptions) -> Result<Vec<Value>> {
    find_with(documents, filter, options, &MatchContext::default())
}

/// [`find`] with a matching context (for `$text`)
pub fn find_with(
    documents: &[Value],
    filter: &Value,
    options: &FindOptions,
    ctx: &MatchContext<'_>,
) -> Result<Vec<Value>> {
    let query = Query::new(filter.clone())?;
    if options.limit == Some(0) {
        return Ok(Vec::new());
    }
    // Parse before scanning so a bad sort or projection fails fast
    let pipeline = Pipeline::new(&options.stages())?;

    let scan = options
        .max_scanned
        .map_or(documents.len(), |max| max.min(documents.len()));

    let mut matched = Vec::new();
    for (position, doc) in documents[..scan].iter().enumerate() {
        match query.matches_with(doc, ctx) {
            Ok(true) => matched.push(doc.clone()),
            Ok(false) => {}
            Err(error) => match options.error_policy {
                ErrorPolicy::Abort => return Err(error),
                ErrorPolicy::SkipDocument => {
                    warn!(position, %error, "skipping document that failed to match");
                }
            },
        }
    }

    pipeline.execute(matched)
}
