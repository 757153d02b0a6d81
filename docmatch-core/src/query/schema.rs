// src/query/schema.rs
//! `$jsonSchema` support: a compiled, recursive subset of JSON Schema

use regex::Regex;
use tracing::trace;

use crate::document::Document;
use crate::error::{DocMatchError, Result};
use crate::value::{values_equal, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaType {
    Object,
    Array,
    String,
    Number,
    Integer,
    Double,
    Boolean,
    Null,
    Date,
}

impl SchemaType {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" | "int" | "long" => Some(Self::Integer),
            "double" => Some(Self::Double),
            "boolean" | "bool" => Some(Self::Boolean),
            "null" => Some(Self::Null),
            "date" => Some(Self::Date),
            _ => None,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            SchemaType::Object => value.is_object(),
            SchemaType::Array => value.is_array(),
            SchemaType::String => matches!(value, Value::String(_)),
            SchemaType::Number => value.is_number(),
            SchemaType::Integer => value.type_name() == "int",
            SchemaType::Double => value.type_name() == "double",
            SchemaType::Boolean => matches!(value, Value::Bool(_)),
            SchemaType::Null => value.is_null(),
            SchemaType::Date => matches!(value, Value::Date(_)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Double => "double",
            SchemaType::Boolean => "boolean",
            SchemaType::Null => "null",
            SchemaType::Date => "date",
        }
    }
}

/// Compiled schema node; `properties` and `items` hold nested nodes
#[derive(Clone, Debug, Default)]
pub struct CompiledSchema {
    pub(super) types: Option<Vec<SchemaType>>,
    pub(super) required: Vec<String>,
    pub(super) properties: Vec<(String, CompiledSchema)>,
    pub(super) minimum: Option<f64>,
    pub(super) maximum: Option<f64>,
    pub(super) pattern: Option<Regex>,
    pub(super) enum_values: Option<Vec<Value>>,
    pub(super) min_length: Option<usize>,
    pub(super) max_length: Option<usize>,
    pub(super) min_items: Option<usize>,
    pub(super) max_items: Option<usize>,
    pub(super) additional_properties: Option<bool>,
    pub(super) items: Option<Box<CompiledSchema>>,
}

fn schema_error(message: String) -> DocMatchError {
    DocMatchError::JsonSchema(message)
}

fn parse_count(keyword: &str, value: &Value) -> Result<usize> {
    value
        .as_i64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| schema_error(format!("{} must be a non-negative integer", keyword)))
}

fn parse_number(keyword: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| schema_error(format!("{} must be a number", keyword)))
}

fn parse_types(keyword: &str, value: &Value) -> Result<Vec<SchemaType>> {
    let parse_one = |entry: &Value| {
        let name = entry
            .as_str()
            .ok_or_else(|| schema_error(format!("{} must be a string or an array of strings", keyword)))?;
        SchemaType::from_str(name)
            .ok_or_else(|| schema_error(format!("Unsupported type '{}'", name)))
    };
    match value {
        Value::Array(entries) => entries.iter().map(parse_one).collect(),
        single => Ok(vec![parse_one(single)?]),
    }
}

impl CompiledSchema {
    pub fn from_value(schema: &Value) -> Result<Self> {
        let obj = schema
            .as_object()
            .ok_or_else(|| schema_error("Schema must be an object".to_string()))?;
        Self::from_document(obj)
    }

    fn from_document(obj: &Document) -> Result<Self> {
        let mut compiled = CompiledSchema::default();

        for (keyword, value) in obj {
            match keyword.as_str() {
                "type" | "bsonType" => {
                    let parsed = parse_types(keyword, value)?;
                    compiled.types.get_or_insert_with(Vec::new).extend(parsed);
                }
                "required" => {
                    let arr = value.as_array().ok_or_else(|| {
                        schema_error("required must be an array of field names".to_string())
                    })?;
                    for entry in arr {
                        let field = entry.as_str().ok_or_else(|| {
                            schema_error("required entries must be strings".to_string())
                        })?;
                        compiled.required.push(field.to_string());
                    }
                }
                "properties" => {
                    let props = value.as_object().ok_or_else(|| {
                        schema_error("properties must be an object".to_string())
                    })?;
                    for (field, spec) in props {
                        let nested = CompiledSchema::from_value(spec).map_err(|e| match e {
                            DocMatchError::JsonSchema(msg) => {
                                schema_error(format!("property '{}': {}", field, msg))
                            }
                            other => other,
                        })?;
                        compiled.properties.push((field.clone(), nested));
                    }
                }
                "minimum" => compiled.minimum = Some(parse_number(keyword, value)?),
                "maximum" => compiled.maximum = Some(parse_number(keyword, value)?),
                "pattern" => {
                    let pattern = value
                        .as_str()
                        .ok_or_else(|| schema_error("pattern must be a string".to_string()))?;
                    let regex = Regex::new(pattern).map_err(|e| {
                        schema_error(format!("invalid regex pattern '{}': {}", pattern, e))
                    })?;
                    compiled.pattern = Some(regex);
                }
                "enum" => {
                    let values = value
                        .as_array()
                        .ok_or_else(|| schema_error("enum must be an array".to_string()))?;
                    compiled.enum_values = Some(values.clone());
                }
                "minLength" => compiled.min_length = Some(parse_count(keyword, value)?),
                "maxLength" => compiled.max_length = Some(parse_count(keyword, value)?),
                "minItems" => compiled.min_items = Some(parse_count(keyword, value)?),
                "maxItems" => compiled.max_items = Some(parse_count(keyword, value)?),
                "additionalProperties" => {
                    let allowed = value.as_bool().ok_or_else(|| {
                        schema_error("additionalProperties must be a boolean".to_string())
                    })?;
                    compiled.additional_properties = Some(allowed);
                }
                "items" => {
                    compiled.items = Some(Box::new(CompiledSchema::from_value(value)?));
                }
                "description" | "title" => {}
                unknown => {
                    return Err(schema_error(format!("Unsupported keyword '{}'", unknown)));
                }
            }
        }

        Ok(compiled)
    }

    /// Whether `value` satisfies the schema
    pub fn matches(&self, value: &Value) -> bool {
        match self.check(value, "") {
            None => true,
            Some(violation) => {
                trace!(%violation, "$jsonSchema rejected document");
                false
            }
        }
    }

    /// First violation found, described with the offending path
    pub fn check(&self, value: &Value, path: &str) -> Option<String> {
        let at = |path: &str| if path.is_empty() { "document".to_string() } else { format!("'{}'", path) };

        // Type validation
        if let Some(types) = &self.types {
            if !types.iter().any(|t| t.matches(value)) {
                let names: Vec<&str> = types.iter().map(SchemaType::as_str).collect();
                return Some(format!("{} expected type {}", at(path), names.join(" or ")));
            }
        }

        // Enum validation
        if let Some(enum_values) = &self.enum_values {
            if !enum_values.iter().any(|allowed| values_equal(allowed, value)) {
                return Some(format!("{} value not in allowed enum values", at(path)));
            }
        }

        // Numeric bounds
        if let Some(number) = value.as_f64() {
            if let Some(min) = self.minimum.filter(|min| number < *min) {
                return Some(format!("{} is below the minimum {}", at(path), min));
            }
            if let Some(max) = self.maximum.filter(|max| number > *max) {
                return Some(format!("{} is above the maximum {}", at(path), max));
            }
        }

        // String constraints
        if let Some(text) = value.as_str() {
            let length = text.chars().count();
            if self.min_length.is_some_and(|min| length < min) {
                return Some(format!("{} is shorter than minLength", at(path)));
            }
            if self.max_length.is_some_and(|max| length > max) {
                return Some(format!("{} is longer than maxLength", at(path)));
            }
            if let Some(pattern) = &self.pattern {
                if !pattern.is_match(text) {
                    return Some(format!("{} does not match required pattern", at(path)));
                }
            }
        }

        // Array constraints
        if let Some(arr) = value.as_array() {
            if let Some(min) = self.min_items.filter(|min| arr.len() < *min) {
                return Some(format!("{} has {} items, minimum required is {}", at(path), arr.len(), min));
            }
            if let Some(max) = self.max_items.filter(|max| arr.len() > *max) {
                return Some(format!("{} has {} items, maximum allowed is {}", at(path), arr.len(), max));
            }
            if let Some(items) = &self.items {
                for (i, item) in arr.iter().enumerate() {
                    if let Some(violation) = items.check(item, &join_path(path, &i.to_string())) {
                        return Some(violation);
                    }
                }
            }
        }

        // Object constraints
        if let Some(obj) = value.as_object() {
            for field in &self.required {
                if !obj.contains_key(field) {
                    return Some(format!("Missing required field '{}'", join_path(path, field)));
                }
            }
            for (field, nested) in &self.properties {
                if let Some(field_value) = obj.get(field) {
                    if let Some(violation) = nested.check(field_value, &join_path(path, field)) {
                        return Some(violation);
                    }
                }
            }
            if self.additional_properties == Some(false) {
                let extra = obj
                    .keys()
                    .find(|key| !self.properties.iter().any(|(field, _)| field == *key));
                if let Some(extra) = extra {
                    return Some(format!("Additional property '{}' is not allowed", join_path(path, extra)));
                }
            }
        }

        None
    }
}

fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}.{}", parent, child)
    }
}
