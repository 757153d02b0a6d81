// src/query/operators.rs
//! Field-level query operators
//!
//! Each operator is a separate type implementing [`OperatorMatcher`] and is
//! reached through [`OPERATOR_REGISTRY`] by name.
//!
//! # Architecture
//!
//! ```text
//! OperatorMatcher trait
//!     ↓
//! ┌────────────────┬────────────────┬────────────────┬────────────────┐
//! │ Comparison     │ Array          │ Element        │ Evaluation     │
//! │ ($eq, $gt...)  │ ($in, $all...) │ ($exists...)   │ ($regex, $mod) │
//! └────────────────┴────────────────┴────────────────┴────────────────┘
//! ```
//!
//! A field path can reach several candidate values (arrays of embedded
//! objects fan out, and elements lacking the rest of the path contribute a
//! `Missing` candidate). [`OperatorMatcher::matches_candidates`] receives all of
//! them and by default succeeds when any candidate matches; the negating
//! operators (`$ne`, `$nin`, `$not`) override it to negate the positive
//! operator across every candidate.

use super::{matches_filter, split_operators, validate_filter, validate_operator_object, MatchContext};
use crate::document::Document;
use crate::error::{DocMatchError, Result};
use crate::value::{compare_values, values_equal, Value};
use lazy_static::lazy_static;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use tracing::trace;

// ============================================================================
// REGEX WITH OPTIONS SUPPORT
// ============================================================================

const REGEX_CACHE_CAPACITY: usize = 128;

lazy_static! {
    /// Compiled regex memo keyed by "options/pattern"
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> = Mutex::new(LruCache::new(
        NonZeroUsize::new(REGEX_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN)
    ));
}

/// Prefix `pattern` with inline flags for the `i`, `m`, `s`, `x` options
fn build_regex_pattern(pattern: &str, options: &str) -> Result<String> {
    if let Some(bad) = options.chars().find(|c| !matches!(c, 'i' | 'm' | 's' | 'x')) {
        return Err(DocMatchError::QueryShape(format!(
            "invalid flag in regex options: {}",
            bad
        )));
    }

    let mut regex_str = String::with_capacity(pattern.len() + options.len() + 3);
    if !options.is_empty() {
        regex_str.push_str("(?");
        regex_str.push_str(options);
        regex_str.push(')');
    }
    regex_str.push_str(pattern);
    Ok(regex_str)
}

/// Get or compile a regex pattern with caching
pub(crate) fn get_or_compile_regex(pattern: &str, options: &str) -> Result<Regex> {
    let cache_key = format!("{}/{}", options, pattern);

    if let Some(regex) = REGEX_CACHE.lock().get(&cache_key) {
        return Ok(regex.clone());
    }

    trace!(pattern, options, "regex cache miss");
    let regex = Regex::new(&build_regex_pattern(pattern, options)?).map_err(|e| {
        DocMatchError::QueryShape(format!("Invalid regex pattern '{}': {}", pattern, e))
    })?;
    REGEX_CACHE.lock().put(cache_key, regex.clone());
    Ok(regex)
}

// ============================================================================
// TRAIT DEFINITION
// ============================================================================

/// Trait for field-level query operators
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use docmatch_core::query::operators::{GtOperator, OperatorMatcher};
/// use docmatch_core::query::MatchContext;
/// use docmatch_core::value::Value;
///
/// let ctx = MatchContext::default();
/// let found = Value::from(json!(30));
/// assert!(GtOperator.matches(Some(&found), &Value::from(json!(28)), &ctx).unwrap());
/// ```
pub trait OperatorMatcher: Send + Sync {
    /// Operator name (e.g. "$eq")
    fn name(&self) -> &'static str;

    /// Check the argument's shape; called before matching and by `Query::new`
    fn validate(&self, _arg: &Value) -> Result<()> {
        Ok(())
    }

    /// Test one candidate value; `None` when the path is missing
    fn matches(&self, value: Option<&Value>, arg: &Value, ctx: &MatchContext<'_>) -> Result<bool>;

    /// Test every candidate the field path reached
    fn matches_candidates(
        &self,
        candidates: &[&Value],
        arg: &Value,
        ctx: &MatchContext<'_>,
    ) -> Result<bool> {
        if candidates.is_empty() {
            return self.matches(None, arg, ctx);
        }
        for candidate in candidates {
            if self.matches(Some(candidate), arg, ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// The value itself followed by its elements when it is an array
fn with_elements(value: &Value) -> impl Iterator<Item = &Value> {
    std::iter::once(value).chain(value.as_array().into_iter().flatten())
}

fn require_array<'a>(op: &str, arg: &'a Value) -> Result<&'a Vec<Value>> {
    arg.as_array()
        .ok_or_else(|| DocMatchError::QueryShape(format!("{} needs an array", op)))
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

/// `$eq`: deep equality against the value or any of its elements
///
/// A missing field equals `null`.
pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        Ok(match value {
            None => arg.is_null(),
            Some(v) => with_elements(v).any(|candidate| values_equal(candidate, arg)),
        })
    }
}

/// `$ne`: no candidate equals the argument (true when the field is missing,
/// unless the argument is `null`)
pub struct NeOperator;

impl OperatorMatcher for NeOperator {
    fn name(&self) -> &'static str {
        "$ne"
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        Ok(!EqOperator.matches(value, arg, ctx)?)
    }

    fn matches_candidates(
        &self,
        candidates: &[&Value],
        arg: &Value,
        ctx: &MatchContext<'_>,
    ) -> Result<bool> {
        Ok(!EqOperator.matches_candidates(candidates, arg, ctx)?)
    }
}

/// Ordering used by the range operators
///
/// `null`/missing only compare with a `null` argument; otherwise values
/// compare under the total order.
fn bracketed_cmp(value: &Value, arg: &Value) -> Option<Ordering> {
    if value.is_nullish() != arg.is_nullish() {
        return None;
    }
    Some(compare_values(value, arg))
}

/// Shared body of `$gt`, `$gte`, `$lt`, `$lte`
///
/// Array values are compared element-wise, and as a whole only against an
/// array argument.
fn compare_with_predicate<F>(value: Option<&Value>, arg: &Value, predicate: F) -> bool
where
    F: Fn(Ordering) -> bool,
{
    let Some(value) = value else {
        return arg.is_nullish() && predicate(Ordering::Equal);
    };

    let test = |candidate: &Value| bracketed_cmp(candidate, arg).map(&predicate).unwrap_or(false);
    match value {
        Value::Array(items) => {
            (arg.is_array() && test(value)) || items.iter().any(|item| test(item))
        }
        scalar => test(scalar),
    }
}

pub struct GtOperator;

impl OperatorMatcher for GtOperator {
    fn name(&self) -> &'static str {
        "$gt"
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        Ok(compare_with_predicate(value, arg, |ord| ord == Ordering::Greater))
    }
}

pub struct GteOperator;

impl OperatorMatcher for GteOperator {
    fn name(&self) -> &'static str {
        "$gte"
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        Ok(compare_with_predicate(value, arg, |ord| ord != Ordering::Less))
    }
}

pub struct LtOperator;

impl OperatorMatcher for LtOperator {
    fn name(&self) -> &'static str {
        "$lt"
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        Ok(compare_with_predicate(value, arg, |ord| ord == Ordering::Less))
    }
}

pub struct LteOperator;

impl OperatorMatcher for LteOperator {
    fn name(&self) -> &'static str {
        "$lte"
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        Ok(compare_with_predicate(value, arg, |ord| ord != Ordering::Greater))
    }
}

// ============================================================================
// ARRAY OPERATORS
// ============================================================================

/// `$in`: the value (or one of its elements) equals a listed value
pub struct InOperator;

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        require_array("$in", arg).map(|_| ())
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        let listed = require_array("$in", arg)?;
        Ok(match value {
            None => listed.iter().any(Value::is_null),
            Some(v) => with_elements(v)
                .any(|candidate| listed.iter().any(|item| values_equal(candidate, item))),
        })
    }
}

/// `$nin`: negation of `$in` across all candidates
pub struct NinOperator;

impl OperatorMatcher for NinOperator {
    fn name(&self) -> &'static str {
        "$nin"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        require_array("$nin", arg).map(|_| ())
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        Ok(!InOperator.matches(value, arg, ctx)?)
    }

    fn matches_candidates(
        &self,
        candidates: &[&Value],
        arg: &Value,
        ctx: &MatchContext<'_>,
    ) -> Result<bool> {
        Ok(!InOperator.matches_candidates(candidates, arg, ctx)?)
    }
}

/// `$all`: every listed value is present; an empty list matches nothing
///
/// Listed values may be `{$elemMatch: ...}` clauses.
pub struct AllOperator;

impl AllOperator {
    fn matches_one(&self, candidates: &[&Value], wanted: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        match wanted.get("$elemMatch") {
            Some(sub) if wanted.as_object().map(Document::len) == Some(1) => {
                ElemMatchOperator.matches_candidates(candidates, sub, ctx)
            }
            _ => EqOperator.matches_candidates(candidates, wanted, ctx),
        }
    }
}

impl OperatorMatcher for AllOperator {
    fn name(&self) -> &'static str {
        "$all"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        require_array("$all", arg).map(|_| ())
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        match value {
            Some(v) => self.matches_candidates(&[v], arg, ctx),
            None => Ok(false),
        }
    }

    fn matches_candidates(
        &self,
        candidates: &[&Value],
        arg: &Value,
        ctx: &MatchContext<'_>,
    ) -> Result<bool> {
        let wanted = require_array("$all", arg)?;
        if wanted.is_empty() || candidates.is_empty() {
            return Ok(false);
        }
        for item in wanted {
            if !self.matches_one(candidates, item, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// `$elemMatch`: some array element satisfies the sub-filter
///
/// When every key of the sub-filter is a field operator (`{$gte: 80, $lt: 85}`)
/// the operators are applied to the element value itself and must all hold;
/// otherwise the sub-filter is a document filter applied to object elements.
pub struct ElemMatchOperator;

impl ElemMatchOperator {
    fn operator_form(sub: &Document) -> bool {
        !sub.is_empty()
            && sub
                .keys()
                .all(|k| k == "$options" || OPERATOR_REGISTRY.contains_key(k.as_str()))
    }

    fn element_matches(&self, element: &Value, sub: &Document, ctx: &MatchContext<'_>) -> Result<bool> {
        if Self::operator_form(sub) {
            for call in split_operators(sub)? {
                let operator = lookup(call.name)?;
                if !operator.matches_candidates(&[element], &call.arg, ctx)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        match element {
            Value::Object(_) => matches_filter(element, &Value::Object(sub.clone()), ctx),
            _ => Ok(false),
        }
    }
}

impl OperatorMatcher for ElemMatchOperator {
    fn name(&self) -> &'static str {
        "$elemMatch"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        let sub = arg.as_object().ok_or_else(|| {
            DocMatchError::QueryShape("$elemMatch needs an Object".to_string())
        })?;
        if Self::operator_form(sub) {
            for call in split_operators(sub)? {
                lookup(call.name)?.validate(&call.arg)?;
            }
            Ok(())
        } else {
            validate_filter(arg)
        }
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        let Some(Value::Array(items)) = value else {
            return Ok(false);
        };
        let sub = arg.as_object().ok_or_else(|| {
            DocMatchError::QueryShape("$elemMatch needs an Object".to_string())
        })?;
        for item in items {
            if self.element_matches(item, sub, ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// `$size`: array length equality
pub struct SizeOperator;

impl SizeOperator {
    fn expected(arg: &Value) -> Result<usize> {
        arg.as_i64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                DocMatchError::QueryShape(format!(
                    "$size needs a non-negative integer, got {}",
                    arg.to_json()
                ))
            })
    }
}

impl OperatorMatcher for SizeOperator {
    fn name(&self) -> &'static str {
        "$size"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        Self::expected(arg).map(|_| ())
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        let expected = Self::expected(arg)?;
        Ok(matches!(value, Some(Value::Array(items)) if items.len() == expected))
    }
}

// ============================================================================
// ELEMENT OPERATORS
// ============================================================================

/// `$exists`: presence versus `Missing` (an explicit `null` exists)
pub struct ExistsOperator;

impl OperatorMatcher for ExistsOperator {
    fn name(&self) -> &'static str {
        "$exists"
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        Ok(value.is_some_and(|v| !v.is_missing()) == arg.is_truthy())
    }

    /// `true` needs one present candidate; `false` needs one gap
    fn matches_candidates(
        &self,
        candidates: &[&Value],
        arg: &Value,
        _ctx: &MatchContext<'_>,
    ) -> Result<bool> {
        if arg.is_truthy() {
            Ok(candidates.iter().any(|v| !v.is_missing()))
        } else {
            Ok(candidates.is_empty() || candidates.iter().any(|v| v.is_missing()))
        }
    }
}

/// `$type`: type name, numeric code, or an array of either
pub struct TypeOperator;

/// Canonical names `$type` can test for
const NUMBER: &str = "number";

impl TypeOperator {
    fn alias(spec: &Value) -> Result<&'static str> {
        let alias = match spec {
            Value::String(name) => match name.as_str() {
                "double" => Some("double"),
                "int" | "long" => Some("int"),
                "number" | "decimal" => Some(NUMBER),
                "string" => Some("string"),
                "object" => Some("object"),
                "array" => Some("array"),
                "bool" | "boolean" => Some("bool"),
                "null" => Some("null"),
                "date" => Some("date"),
                "undefined" => Some("undefined"),
                _ => None,
            },
            code if code.is_number() => match code.as_i64() {
                Some(1) => Some("double"),
                Some(2) => Some("string"),
                Some(3) => Some("object"),
                Some(4) => Some("array"),
                Some(6) => Some("undefined"),
                Some(8) => Some("bool"),
                Some(9) => Some("date"),
                Some(10) => Some("null"),
                Some(16) | Some(18) => Some("int"),
                Some(19) => Some(NUMBER),
                _ => None,
            },
            _ => None,
        };
        alias.ok_or_else(|| {
            DocMatchError::QueryShape(format!("unknown type name alias: {}", spec.to_json()))
        })
    }

    fn aliases(arg: &Value) -> Result<Vec<&'static str>> {
        match arg {
            Value::Array(items) => items.iter().map(Self::alias).collect(),
            single => Ok(vec![Self::alias(single)?]),
        }
    }

    fn is_type(value: &Value, alias: &str) -> bool {
        if alias == NUMBER {
            value.is_number()
        } else {
            value.type_name() == alias
        }
    }
}

impl OperatorMatcher for TypeOperator {
    fn name(&self) -> &'static str {
        "$type"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        Self::aliases(arg).map(|_| ())
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        let aliases = Self::aliases(arg)?;
        let Some(value) = value.filter(|v| !v.is_missing()) else {
            return Ok(false);
        };
        Ok(with_elements(value).any(|candidate| {
            aliases.iter().any(|alias| Self::is_type(candidate, alias))
        }))
    }
}

// ============================================================================
// EVALUATION OPERATORS
// ============================================================================

/// `$regex`, optionally paired with `$options`
///
/// The argument is either the pattern string or the folded
/// `{$regex, $options}` object built by the clause parser.
pub struct RegexOperator;

impl RegexOperator {
    fn pattern_and_options(arg: &Value) -> Result<(&str, &str)> {
        let (pattern, options) = match arg {
            Value::String(pattern) => (Some(pattern.as_str()), Some("")),
            Value::Object(folded) => (
                folded.get("$regex").and_then(Value::as_str),
                folded.get("$options").map(Value::as_str).unwrap_or(Some("")),
            ),
            _ => (None, None),
        };
        match (pattern, options) {
            (Some(pattern), Some(options)) => Ok((pattern, options)),
            (None, _) => Err(DocMatchError::QueryShape(
                "$regex has to be a string".to_string(),
            )),
            (_, None) => Err(DocMatchError::QueryShape(
                "$options has to be a string".to_string(),
            )),
        }
    }
}

impl OperatorMatcher for RegexOperator {
    fn name(&self) -> &'static str {
        "$regex"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        let (pattern, options) = Self::pattern_and_options(arg)?;
        get_or_compile_regex(pattern, options).map(|_| ())
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        let (pattern, options) = Self::pattern_and_options(arg)?;
        let regex = get_or_compile_regex(pattern, options)?;
        let Some(value) = value.filter(|v| !v.is_missing()) else {
            return Ok(false);
        };
        Ok(with_elements(value)
            .filter_map(Value::as_str)
            .any(|text| regex.is_match(text)))
    }
}

/// `$mod: [divisor, remainder]`; numbers are truncated toward zero
pub struct ModOperator;

impl ModOperator {
    fn divisor_and_remainder(arg: &Value) -> Result<(i64, i64)> {
        let parts = arg.as_array().filter(|parts| parts.len() == 2).ok_or_else(|| {
            DocMatchError::QueryShape(
                "malformed mod, needs to be an array of [divisor, remainder]".to_string(),
            )
        })?;
        let number = |v: &Value| {
            v.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64).ok_or_else(|| {
                DocMatchError::QueryShape(format!(
                    "malformed mod, {} is not a number",
                    v.to_json()
                ))
            })
        };
        let divisor = number(&parts[0])?;
        let remainder = number(&parts[1])?;
        if divisor == 0 {
            return Err(DocMatchError::Arithmetic("$mod divisor cannot be 0".to_string()));
        }
        Ok((divisor, remainder))
    }
}

impl OperatorMatcher for ModOperator {
    fn name(&self) -> &'static str {
        "$mod"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        Self::divisor_and_remainder(arg).map(|_| ())
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        let (divisor, remainder) = Self::divisor_and_remainder(arg)?;
        let Some(value) = value.filter(|v| !v.is_missing()) else {
            return Ok(false);
        };
        Ok(with_elements(value).any(|candidate| {
            candidate
                .as_f64()
                .filter(|f| f.is_finite())
                .map(|f| (f.trunc() as i64).wrapping_rem(divisor) == remainder)
                .unwrap_or(false)
        }))
    }
}

// ============================================================================
// BITWISE OPERATORS
// ============================================================================

#[derive(Clone, Copy)]
enum BitTest {
    AllSet,
    AllClear,
    AnySet,
    AnyClear,
}

/// Bit positions from a mask or a list of positions
fn bit_positions(op: &str, arg: &Value) -> Result<Vec<u32>> {
    let invalid = || {
        DocMatchError::QueryShape(format!(
            "{} takes a non-negative integer bitmask or an array of bit positions, got {}",
            op,
            arg.to_json()
        ))
    };
    match arg {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_i64()
                    .and_then(|p| u32::try_from(p).ok())
                    .ok_or_else(invalid)
            })
            .collect(),
        mask => {
            let mask = mask.as_i64().filter(|m| *m >= 0).ok_or_else(invalid)?;
            Ok((0..63).filter(|bit| mask & (1i64 << bit) != 0).collect())
        }
    }
}

/// Two's complement bit; positions past 63 read the sign bit
fn bit_is_set(value: i64, position: u32) -> bool {
    if position >= 63 {
        value < 0
    } else {
        (value >> position) & 1 == 1
    }
}

/// `$bitsAllSet`, `$bitsAllClear`, `$bitsAnySet`, `$bitsAnyClear`
///
/// Only integral numbers match; arrays are not searched.
pub struct BitsOperator {
    name: &'static str,
    test: BitTest,
}

impl OperatorMatcher for BitsOperator {
    fn name(&self) -> &'static str {
        self.name
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        bit_positions(self.name, arg).map(|_| ())
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        let positions = bit_positions(self.name, arg)?;
        let Some(number) = value.filter(|v| v.is_number()).and_then(Value::as_i64) else {
            return Ok(false);
        };
        let mut bits = positions.iter().map(|p| bit_is_set(number, *p));
        Ok(match self.test {
            BitTest::AllSet => bits.all(|set| set),
            BitTest::AllClear => bits.all(|set| !set),
            BitTest::AnySet => bits.any(|set| set),
            BitTest::AnyClear => bits.any(|set| !set),
        })
    }
}

// ============================================================================
// FIELD-LEVEL NEGATION
// ============================================================================

/// `$not`: negates an operator object across all candidates
pub struct NotOperator;

impl NotOperator {
    fn inner(arg: &Value) -> Result<&Document> {
        arg.as_object().ok_or_else(|| {
            DocMatchError::QueryShape("$not needs a regex or a document".to_string())
        })
    }
}

impl OperatorMatcher for NotOperator {
    fn name(&self) -> &'static str {
        "$not"
    }

    fn validate(&self, arg: &Value) -> Result<()> {
        validate_operator_object(Self::inner(arg)?)
    }

    fn matches(&self, value: Option<&Value>, arg: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        match value {
            Some(v) => self.matches_candidates(&[v], arg, ctx),
            None => self.matches_candidates(&[], arg, ctx),
        }
    }

    fn matches_candidates(
        &self,
        candidates: &[&Value],
        arg: &Value,
        ctx: &MatchContext<'_>,
    ) -> Result<bool> {
        Ok(!super::matches_operator_object(candidates, Self::inner(arg)?, ctx)?)
    }
}

// ============================================================================
// OPERATOR REGISTRY
// ============================================================================

lazy_static! {
    /// Global registry of field-level query operators
    ///
    /// Initialized once and immutable thereafter; every operator is
    /// `Send + Sync`.
    pub static ref OPERATOR_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let mut registry: HashMap<&'static str, Box<dyn OperatorMatcher>> = HashMap::new();

        // Comparison operators
        registry.insert("$eq", Box::new(EqOperator));
        registry.insert("$ne", Box::new(NeOperator));
        registry.insert("$gt", Box::new(GtOperator));
        registry.insert("$gte", Box::new(GteOperator));
        registry.insert("$lt", Box::new(LtOperator));
        registry.insert("$lte", Box::new(LteOperator));

        // Array operators
        registry.insert("$in", Box::new(InOperator));
        registry.insert("$nin", Box::new(NinOperator));
        registry.insert("$all", Box::new(AllOperator));
        registry.insert("$elemMatch", Box::new(ElemMatchOperator));
        registry.insert("$size", Box::new(SizeOperator));

        // Element operators
        registry.insert("$exists", Box::new(ExistsOperator));
        registry.insert("$type", Box::new(TypeOperator));

        // Evaluation operators
        registry.insert("$regex", Box::new(RegexOperator));
        registry.insert("$mod", Box::new(ModOperator));

        // Bitwise operators
        for (name, test) in [
            ("$bitsAllSet", BitTest::AllSet),
            ("$bitsAllClear", BitTest::AllClear),
            ("$bitsAnySet", BitTest::AnySet),
            ("$bitsAnyClear", BitTest::AnyClear),
        ] {
            registry.insert(name, Box::new(BitsOperator { name, test }));
        }

        registry.insert("$not", Box::new(NotOperator));

        registry
    };
}

/// Registry lookup with the unknown-operator error
pub(crate) fn lookup(name: &str) -> Result<&'static dyn OperatorMatcher> {
    OPERATOR_REGISTRY
        .get(name)
        .map(|operator| operator.as_ref())
        .ok_or_else(|| DocMatchError::QueryShape(format!("unknown operator: {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    fn check(op: &dyn OperatorMatcher, value: Option<serde_json::Value>, arg: serde_json::Value) -> bool {
        let ctx = MatchContext::default();
        let value = value.map(v);
        op.matches(value.as_ref(), &v(arg), &ctx).unwrap()
    }

    // ========== Comparison operators ==========

    #[test]
    fn test_eq_operator() {
        assert!(check(&EqOperator, Some(json!("Alice")), json!("Alice")));
        assert!(check(&EqOperator, Some(json!(5)), json!(5.0)));
        assert!(check(&EqOperator, Some(json!(["a", "b"])), json!("b")));
        assert!(check(&EqOperator, Some(json!(["a", "b"])), json!(["a", "b"])));
        assert!(!check(&EqOperator, Some(json!(["a", "b"])), json!(["b", "a"])));
        assert!(check(&EqOperator, None, json!(null)));
        assert!(!check(&EqOperator, None, json!(1)));
    }

    #[test]
    fn test_ne_operator() {
        assert!(check(&NeOperator, Some(json!(1)), json!(2)));
        assert!(!check(&NeOperator, Some(json!([1, 2])), json!(2)));
        assert!(check(&NeOperator, None, json!(2)));
        assert!(!check(&NeOperator, None, json!(null)));
    }

    #[test]
    fn test_gt_gte_lt_lte() {
        assert!(check(&GtOperator, Some(json!(10)), json!(5)));
        assert!(!check(&GtOperator, Some(json!(5)), json!(5)));
        assert!(check(&GteOperator, Some(json!(5)), json!(5.0)));
        assert!(check(&LtOperator, Some(json!(3)), json!(5)));
        assert!(check(&LteOperator, Some(json!(5)), json!(5)));
        assert!(!check(&LteOperator, Some(json!(10)), json!(5)));
    }

    #[test]
    fn test_comparison_missing_and_null() {
        assert!(!check(&GtOperator, None, json!(5)));
        assert!(!check(&LtOperator, Some(json!(null)), json!(5)));
        assert!(check(&GteOperator, None, json!(null)));
        assert!(check(&LteOperator, Some(json!(null)), json!(null)));
        assert!(!check(&GteOperator, Some(json!(3)), json!(null)));
    }

    #[test]
    fn test_comparison_array_elements() {
        assert!(check(&GtOperator, Some(json!([70, 90])), json!(80)));
        assert!(!check(&GtOperator, Some(json!([70, 75])), json!(80)));
        assert!(check(&GtOperator, Some(json!([1, 3])), json!([1, 2])));
    }

    #[test]
    fn test_comparison_cross_type_uses_total_order() {
        assert!(check(&GtOperator, Some(json!("abc")), json!(100)));
        assert!(check(&LtOperator, Some(json!(100)), json!({"a": 1})));
    }

    // ========== Array operators ==========

    #[test]
    fn test_in_nin() {
        assert!(check(&InOperator, Some(json!("b")), json!(["a", "b"])));
        assert!(check(&InOperator, Some(json!(["x", "b"])), json!(["a", "b"])));
        assert!(check(&InOperator, None, json!([1, null])));
        assert!(!check(&InOperator, None, json!([1])));
        assert!(check(&NinOperator, None, json!([1])));
        assert!(!check(&NinOperator, Some(json!(1)), json!([1, 2])));
    }

    #[test]
    fn test_in_requires_array() {
        let ctx = MatchContext::default();
        let err = InOperator.matches(Some(&v(json!(1))), &v(json!(1)), &ctx).unwrap_err();
        assert!(err.to_string().contains("$in needs an array"));
    }

    #[test]
    fn test_all_operator() {
        assert!(check(&AllOperator, Some(json!(["a", "b", "c"])), json!(["a", "c"])));
        assert!(!check(&AllOperator, Some(json!(["a", "b"])), json!(["a", "z"])));
        assert!(!check(&AllOperator, Some(json!(["a"])), json!([])));
        assert!(check(&AllOperator, Some(json!("a")), json!(["a"])));
    }

    #[test]
    fn test_elem_match_operator_form() {
        assert!(check(&ElemMatchOperator, Some(json!([70, 82, 95])), json!({"$gte": 80, "$lt": 85})));
        assert!(!check(&ElemMatchOperator, Some(json!([70, 95])), json!({"$gte": 80, "$lt": 85})));
        assert!(!check(&ElemMatchOperator, Some(json!(82)), json!({"$gte": 80})));
    }

    #[test]
    fn test_elem_match_document_form() {
        let items = json!([{"sku": "a", "qty": 1}, {"sku": "b", "qty": 10}]);
        assert!(check(&ElemMatchOperator, Some(items.clone()), json!({"sku": "b", "qty": {"$gt": 5}})));
        assert!(!check(&ElemMatchOperator, Some(items), json!({"sku": "a", "qty": {"$gt": 5}})));
    }

    #[test]
    fn test_size_operator() {
        assert!(check(&SizeOperator, Some(json!([1, 2])), json!(2)));
        assert!(!check(&SizeOperator, Some(json!("ab")), json!(2)));
        assert!(SizeOperator.validate(&v(json!(-1))).is_err());
    }

    // ========== Element operators ==========

    #[test]
    fn test_exists_operator() {
        let ctx = MatchContext::default();
        let null = v(json!(null));
        assert!(ExistsOperator.matches_candidates(&[&null], &v(json!(true)), &ctx).unwrap());
        assert!(ExistsOperator.matches_candidates(&[], &v(json!(false)), &ctx).unwrap());
        assert!(!ExistsOperator.matches_candidates(&[], &v(json!(true)), &ctx).unwrap());

        let one = v(json!(1));
        let gap = Value::Missing;
        assert!(ExistsOperator.matches_candidates(&[&one, &gap], &v(json!(false)), &ctx).unwrap());
        assert!(ExistsOperator.matches_candidates(&[&one, &gap], &v(json!(true)), &ctx).unwrap());
        assert!(!ExistsOperator.matches_candidates(&[&gap], &v(json!(true)), &ctx).unwrap());
        assert!(!TypeOperator.matches_candidates(&[&gap], &v(json!("undefined")), &ctx).unwrap());
    }

    #[test]
    fn test_type_operator() {
        assert!(check(&TypeOperator, Some(json!(42)), json!("int")));
        assert!(check(&TypeOperator, Some(json!(3.14)), json!("double")));
        assert!(check(&TypeOperator, Some(json!(3.14)), json!("number")));
        assert!(check(&TypeOperator, Some(json!("x")), json!(2)));
        assert!(check(&TypeOperator, Some(json!([1, "x"])), json!("string")));
        assert!(check(&TypeOperator, Some(json!([1])), json!("array")));
        assert!(check(&TypeOperator, Some(json!(null)), json!(["string", "null"])));
        assert!(!check(&TypeOperator, None, json!("undefined")));
        assert!(TypeOperator.validate(&v(json!("potato"))).is_err());
    }

    // ========== Evaluation operators ==========

    #[test]
    fn test_regex_operator() {
        assert!(check(&RegexOperator, Some(json!("Alice")), json!("^Al")));
        assert!(!check(&RegexOperator, Some(json!("alice")), json!("^Al")));
        assert!(check(&RegexOperator, Some(json!("alice")), json!({"$regex": "^Al", "$options": "i"})));
        assert!(check(&RegexOperator, Some(json!(["x", "Alice"])), json!("ice$")));
        assert!(!check(&RegexOperator, Some(json!(42)), json!("42")));
    }

    #[test]
    fn test_regex_rejects_unknown_flag() {
        let err = RegexOperator
            .validate(&v(json!({"$regex": "a", "$options": "q"})))
            .unwrap_err();
        assert!(err.to_string().contains("invalid flag"));
    }

    #[test]
    fn test_regex_cache_reuses_compiled_pattern() {
        let first = get_or_compile_regex("^cached", "i").unwrap();
        let second = get_or_compile_regex("^cached", "i").unwrap();
        assert_eq!(first.as_str(), second.as_str());
        assert_eq!(first.as_str(), "(?i)^cached");
    }

    #[test]
    fn test_mod_operator() {
        assert!(check(&ModOperator, Some(json!(10)), json!([4, 2])));
        assert!(check(&ModOperator, Some(json!(10.9)), json!([4, 2])));
        assert!(!check(&ModOperator, Some(json!("10")), json!([4, 2])));
        let err = ModOperator.validate(&v(json!([0, 1]))).unwrap_err();
        assert!(matches!(err, DocMatchError::Arithmetic(_)));
    }

    // ========== Bitwise operators ==========

    fn bits(name: &'static str, test: BitTest) -> BitsOperator {
        BitsOperator { name, test }
    }

    #[test]
    fn test_bits_with_mask_and_positions() {
        // 54 = 0b110110
        assert!(check(&bits("$bitsAllSet", BitTest::AllSet), Some(json!(54)), json!(6)));
        assert!(check(&bits("$bitsAllSet", BitTest::AllSet), Some(json!(54)), json!([1, 2])));
        assert!(check(&bits("$bitsAllClear", BitTest::AllClear), Some(json!(54)), json!([0, 3])));
        assert!(check(&bits("$bitsAnySet", BitTest::AnySet), Some(json!(54)), json!([0, 1])));
        assert!(!check(&bits("$bitsAnyClear", BitTest::AnyClear), Some(json!(54)), json!([1, 2])));
    }

    #[test]
    fn test_bits_non_numeric_and_negative() {
        assert!(!check(&bits("$bitsAnySet", BitTest::AnySet), Some(json!("54")), json!(6)));
        assert!(!check(&bits("$bitsAnySet", BitTest::AnySet), Some(json!([54])), json!(6)));
        assert!(check(&bits("$bitsAllSet", BitTest::AllSet), Some(json!(-1)), json!([0, 63, 200])));
        assert!(bits("$bitsAllSet", BitTest::AllSet).validate(&v(json!(-5))).is_err());
    }

    // ========== Field-level $not ==========

    #[test]
    fn test_not_operator() {
        assert!(check(&NotOperator, Some(json!(5)), json!({"$gt": 10})));
        assert!(!check(&NotOperator, Some(json!(15)), json!({"$gt": 10})));
        assert!(check(&NotOperator, None, json!({"$gt": 10})));
        assert!(NotOperator.validate(&v(json!({"$gt": 1, "$lt": 5}))).is_err());
    }
}
