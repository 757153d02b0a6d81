// src/aggregation/group.rs
//! `$group` and `$sortByCount`

use super::accumulators::{self, Accumulator, ACCUMULATORS};
use super::{check_field_name, ExecutionContext, SortDirection, SortStage};
use crate::document::Document;
use crate::error::{DocMatchError, Result};
use crate::expression::{self, evaluate, operator_invocation, Scope};
use crate::value::Value;
use ahash::AHashMap;
use tracing::debug;

/// One `name: {$accumulator: expression}` entry
#[derive(Debug, Clone)]
struct GroupField {
    name: String,
    operator: String,
    expression: Value,
}

/// $group stage - group documents and compute aggregates
///
/// Groups are emitted in the order their keys are first seen; accumulators
/// see each group's documents in input order.
#[derive(Debug, Clone)]
pub struct GroupStage {
    id: Value,
    fields: Vec<GroupField>,
}

fn group_key_error(error: DocMatchError) -> DocMatchError {
    match error {
        DocMatchError::QueryShape(message) => DocMatchError::GroupKey(message),
        other => other,
    }
}

impl GroupStage {
    pub(super) fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec.as_object().ok_or_else(|| {
            DocMatchError::QueryShape("$group must be an object".to_string())
        })?;

        let id = obj.get("_id").ok_or_else(|| {
            DocMatchError::GroupKey("a group specification must include an _id".to_string())
        })?;
        if let Value::Object(compound) = id {
            operator_invocation(compound).map_err(group_key_error)?;
        }
        expression::validate(id).map_err(group_key_error)?;

        let mut fields = Vec::with_capacity(obj.len().saturating_sub(1));
        for (name, spec) in obj {
            if name == "_id" {
                continue; // Already parsed
            }
            fields.push(Self::parse_field(name, spec)?);
        }

        Ok(GroupStage {
            id: id.clone(),
            fields,
        })
    }

    fn parse_field(name: &str, spec: &Value) -> Result<GroupField> {
        check_field_name("$group", name)?;
        if name.contains('.') {
            return Err(DocMatchError::QueryShape(format!(
                "the group aggregate field name '{}' cannot contain '.'",
                name
            )));
        }

        let (operator, expression) = spec
            .as_object()
            .filter(|acc| acc.len() == 1)
            .and_then(|acc| acc.first())
            .ok_or_else(|| {
                DocMatchError::QueryShape(format!(
                    "the group aggregate field '{}' must be defined as an expression inside an object",
                    name
                ))
            })?;

        if !ACCUMULATORS.contains_key(operator.as_str()) {
            return Err(DocMatchError::QueryShape(format!(
                "unknown group operator '{}'",
                operator
            )));
        }
        if operator == "$count" && expression.as_object().map(Document::is_empty) != Some(true) {
            return Err(DocMatchError::QueryShape(
                "$count takes no arguments, i.e. $count: {}".to_string(),
            ));
        }
        expression::validate(expression)?;

        Ok(GroupField {
            name: name.to_string(),
            operator: operator.clone(),
            expression: expression.clone(),
        })
    }

    pub(super) fn execute(&self, docs: Vec<Value>, ctx: &ExecutionContext<'_>) -> Result<Vec<Value>> {
        // Step 1: Group documents by the evaluated _id, in first-seen order
        let mut index: AHashMap<String, usize> = AHashMap::new();
        let mut groups: Vec<(Value, Vec<Box<dyn Accumulator>>)> = Vec::new();

        for doc in &docs {
            let scope = Scope::new(doc);
            let key = evaluate(&self.id, &scope)?.or_null();
            let canonical = key.canonical_key();

            let slot = match index.get(&canonical) {
                Some(slot) => *slot,
                None => {
                    ctx.options.check_groups(groups.len() + 1)?;
                    let fresh = self
                        .fields
                        .iter()
                        .map(|field| accumulators::create(&field.operator))
                        .collect::<Result<Vec<_>>>()?;
                    groups.push((key, fresh));
                    index.insert(canonical, groups.len() - 1);
                    groups.len() - 1
                }
            };

            // Step 2: Feed each accumulator this document's value
            let (_, accumulators) = &mut groups[slot];
            for (field, accumulator) in self.fields.iter().zip(accumulators.iter_mut()) {
                accumulator.accumulate(evaluate(&field.expression, &scope)?)?;
            }
        }

        debug!(groups = groups.len(), documents = docs.len(), "$group finished");

        Ok(groups
            .into_iter()
            .map(|(key, accumulators)| {
                let mut result = Document::with_capacity(self.fields.len() + 1);
                result.insert("_id", key);
                for (field, accumulator) in self.fields.iter().zip(accumulators) {
                    result.insert(field.name.as_str(), accumulator.finish());
                }
                Value::Object(result)
            })
            .collect())
    }
}

// ============================================================================
// $sortByCount
// ============================================================================

/// $sortByCount stage - `$group` by the expression with a `count`, then sort
/// by `count` descending
#[derive(Debug, Clone)]
pub struct SortByCountStage {
    group: GroupStage,
    sort: SortStage,
}

impl SortByCountStage {
    pub(super) fn from_json(spec: &Value) -> Result<Self> {
        let is_expression = match spec {
            Value::String(path) => path.starts_with('$'),
            Value::Object(doc) => operator_invocation(doc)?.is_some(),
            _ => false,
        };
        if !is_expression {
            return Err(DocMatchError::QueryShape(
                "$sortByCount requires a field path or an operator expression".to_string(),
            ));
        }
        expression::validate(spec)?;

        let group = GroupStage {
            id: spec.clone(),
            fields: vec![GroupField {
                name: "count".to_string(),
                operator: "$sum".to_string(),
                expression: Value::Int(1),
            }],
        };
        let sort = SortStage::new(vec![("count".to_string(), SortDirection::Descending)]);
        Ok(SortByCountStage { group, sort })
    }

    pub(super) fn execute(&self, docs: Vec<Value>, ctx: &ExecutionContext<'_>) -> Result<Vec<Value>> {
        let mut grouped = self.group.execute(docs, ctx)?;
        grouped.sort_by(|a, b| self.sort.compare(a, b));
        Ok(grouped)
    }
}
