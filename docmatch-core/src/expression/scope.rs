// src/expression/scope.rs
//! Variable bindings visible to an expression.

use crate::error::{DocMatchError, Result};
use crate::value::Value;
use crate::value_utils::resolve_path;
use std::rc::Rc;

/// One link of the persistent binding chain
#[derive(Debug)]
struct Binding {
    name: String,
    value: Value,
    parent: Option<Rc<Binding>>,
}

/// Immutable chain of variable bindings over a root document
///
/// `bind` returns a child scope that shares its parent's chain; the parent is
/// never modified, so sibling iterations of `$map`/`$filter`/`$reduce` cannot
/// observe each other's bindings.
///
/// Built-in variables: `$$ROOT` and `$$CURRENT` (the root document) and
/// `$$REMOVE` (evaluates to `Missing`).
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    root: &'a Value,
    bindings: Option<Rc<Binding>>,
}

impl<'a> Scope<'a> {
    pub fn new(root: &'a Value) -> Self {
        Scope {
            root,
            bindings: None,
        }
    }

    /// Document that `"$field"` paths resolve against
    pub fn root(&self) -> &'a Value {
        self.root
    }

    /// Child scope with `name` bound to `value`, shadowing outer bindings
    pub fn bind(&self, name: impl Into<String>, value: Value) -> Scope<'a> {
        Scope {
            root: self.root,
            bindings: Some(Rc::new(Binding {
                name: name.into(),
                value,
                parent: self.bindings.clone(),
            })),
        }
    }

    /// Nearest binding of `name`, walking outward
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        let mut node = self.bindings.as_deref();
        while let Some(binding) = node {
            if binding.name == name {
                return Some(&binding.value);
            }
            node = binding.parent.as_deref();
        }
        None
    }

    /// Resolve a `$$name` or `$$name.path` reference (without the `$$`)
    pub(crate) fn resolve_variable(&self, reference: &str) -> Result<Value> {
        let (name, path) = match reference.split_once('.') {
            Some((name, path)) => (name, Some(path)),
            None => (reference, None),
        };

        let value = match self.lookup(name) {
            Some(bound) => bound,
            None => match name {
                "ROOT" | "CURRENT" => self.root,
                "REMOVE" => return Ok(Value::Missing),
                _ => {
                    return Err(DocMatchError::QueryShape(format!(
                        "Use of undefined variable: $${}",
                        name
                    )))
                }
            },
        };

        Ok(match path {
            Some(path) => resolve_path(value, path),
            None => value.clone(),
        })
    }
}

/// Check a user-supplied variable name (`as` in `$map`/`$filter`, `$let` vars)
pub(crate) fn validate_variable_name(op: &str, name: &str) -> Result<()> {
    let valid = name
        .chars()
        .next()
        .map(|c| c.is_ascii_lowercase() || c == '_' || !c.is_ascii())
        .unwrap_or(false)
        && name.chars().all(|c| c.is_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(DocMatchError::QueryShape(format!(
            "{} has an invalid variable name: '{}'",
            op, name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_shadows_parent_without_mutation() {
        let root = Value::from(json!({"a": 1}));
        let parent = Scope::new(&root).bind("x", Value::Int(1));
        let child = parent.bind("x", Value::Int(2));

        assert_eq!(child.lookup("x"), Some(&Value::Int(2)));
        assert_eq!(parent.lookup("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_builtin_variables() {
        let root = Value::from(json!({"a": {"b": 5}}));
        let scope = Scope::new(&root);

        assert_eq!(scope.resolve_variable("ROOT").unwrap(), root);
        assert_eq!(scope.resolve_variable("CURRENT.a.b").unwrap(), Value::Int(5));
        assert_eq!(scope.resolve_variable("REMOVE").unwrap(), Value::Missing);
    }

    #[test]
    fn test_bound_variable_path() {
        let root = Value::Null;
        let scope = Scope::new(&root).bind("item", Value::from(json!({"qty": 3})));
        assert_eq!(scope.resolve_variable("item.qty").unwrap(), Value::Int(3));
        assert_eq!(scope.resolve_variable("item.nope").unwrap(), Value::Missing);
    }

    #[test]
    fn test_undefined_variable() {
        let root = Value::Null;
        let err = Scope::new(&root).resolve_variable("nope").unwrap_err();
        assert!(err.to_string().contains("undefined variable"));
    }

    #[test]
    fn test_variable_name_rules() {
        assert!(validate_variable_name("$map", "item").is_ok());
        assert!(validate_variable_name("$map", "this_1").is_ok());
        assert!(validate_variable_name("$map", "").is_err());
        assert!(validate_variable_name("$map", "$x").is_err());
        assert!(validate_variable_name("$map", "Item").is_err());
        assert!(validate_variable_name("$map", "a.b").is_err());
    }
}
