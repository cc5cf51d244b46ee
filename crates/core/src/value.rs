//! Value types for Canopy
//!
//! The store holds a single tree of [`Value`]s. Interior nodes are
//! `Value::Object`; every Object entry is a child node. A node holding any other
//! variant is a leaf. `Value::Null` means "no data": writing Null at a path
//! removes the node, and an Object left without entries disappears with it.
//!
//! ## Type Rules
//!
//! - Eight types only: Null, Bool, Int, Float, String, Bytes, Array, Object
//! - No implicit type coercions: `Int(1) != Float(1.0)`
//! - Float uses IEEE-754 equality: `NaN != NaN`, `-0.0 == 0.0`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical value stored at a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Null value (absent node)
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Array of values
    Array(Vec<Value>),
    /// Object with string keys; each entry is a child node
    Object(BTreeMap<String, Value>),
}

// Custom PartialEq implementation for IEEE-754 float semantics
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True if writing this value leaves no node behind (`Null` or `{}`)
    pub fn is_empty_node(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Get as i64 if this is an Int value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as &str if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the child map if this is an Object value
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Build an empty object
    pub fn object() -> Self {
        Value::Object(BTreeMap::new())
    }

    /// Builder-style insert of a child entry
    ///
    /// Non-object values are replaced by a fresh object first.
    pub fn with_child(mut self, key: impl Into<String>, child: impl Into<Value>) -> Self {
        self.set_at(&[key.into()], child.into());
        self
    }

    /// Look up the value at a relative path
    pub fn get_at(&self, segments: &[String]) -> Option<&Value> {
        let mut current = self;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }

    /// Replace the value at a relative path
    ///
    /// Intermediate nodes are created as objects (replacing leaves in the way).
    /// Writing `Null` removes the node and prunes any objects left empty.
    pub fn set_at(&mut self, segments: &[String], value: Value) {
        let Some((first, rest)) = segments.split_first() else {
            *self = value;
            return;
        };

        if value.is_null() {
            if let Value::Object(map) = self {
                if rest.is_empty() {
                    map.remove(first);
                } else if let Some(child) = map.get_mut(first) {
                    child.set_at(rest, Value::Null);
                    if child.is_null() {
                        map.remove(first);
                    }
                }
                if map.is_empty() {
                    *self = Value::Null;
                }
            }
            return;
        }

        if !matches!(self, Value::Object(_)) {
            *self = Value::object();
        }
        if let Value::Object(map) = self {
            map.entry(first.clone())
                .or_insert(Value::Null)
                .set_at(rest, value);
        }
    }

    /// Number of child nodes (Object entries)
    pub fn child_count(&self) -> usize {
        self.as_object().map_or(0, BTreeMap::len)
    }
}

// ============================================================================
// From implementations for ergonomic API usage
// ============================================================================

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(a)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(o: BTreeMap<String, Value>) -> Self {
        Value::Object(o)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(path: &str) -> Vec<String> {
        path.split('/').map(str::to_string).collect()
    }

    #[test]
    fn test_type_equality_is_strict() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::String("a".into()), Value::Bytes(b"a".to_vec()));
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
    }

    #[test]
    fn test_set_and_get_nested() {
        let mut root = Value::Null;
        root.set_at(&segs("jobs/0"), Value::from("first"));
        root.set_at(&segs("jobs/1"), Value::from("second"));
        assert_eq!(root.get_at(&segs("jobs/1")), Some(&Value::from("second")));
        assert_eq!(root.get_at(&segs("jobs")).map(Value::child_count), Some(2));
        assert_eq!(root.get_at(&segs("missing")), None);
    }

    #[test]
    fn test_set_replaces_leaf_with_object() {
        let mut root = Value::Null;
        root.set_at(&segs("a"), Value::Int(1));
        root.set_at(&segs("a/b"), Value::Int(2));
        assert_eq!(root.get_at(&segs("a/b")), Some(&Value::Int(2)));
    }

    #[test]
    fn test_empty_node_values() {
        assert!(Value::Null.is_empty_node());
        assert!(Value::object().is_empty_node());
        assert!(!Value::object().with_child("a", 1).is_empty_node());
        assert!(!Value::from("").is_empty_node());
        assert!(!Value::Int(0).is_empty_node());
    }

    #[test]
    fn test_null_write_removes_and_prunes() {
        let mut root = Value::Null;
        root.set_at(&segs("a/b/c"), Value::Int(1));
        root.set_at(&segs("a/b/c"), Value::Null);
        assert!(root.is_null());
    }

    #[test]
    fn test_null_write_keeps_siblings() {
        let mut root = Value::object().with_child("x", 1).with_child("y", 2);
        root.set_at(&segs("x"), Value::Null);
        assert_eq!(root.child_count(), 1);
        assert_eq!(root.get_at(&segs("y")), Some(&Value::Int(2)));
    }

    #[test]
    fn test_get_at_root_of_null_is_none() {
        assert_eq!(Value::Null.get_at(&[]), None);
    }

    #[test]
    fn test_serde_keeps_variant() {
        let tree = Value::object()
            .with_child("n", 1)
            .with_child("f", 1.0)
            .with_child("s", "1");
        let json = serde_json::to_string(&tree).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
        assert_eq!(back.get_at(&segs("n")), Some(&Value::Int(1)));
    }
}
