//! Node snapshots
//!
//! A [`NodeSnapshot`] is an immutable copy of a node as the store observed it,
//! delivered to read, subscribe and transaction callbacks.

use crate::path::Path;
use crate::query::compare_keys;
use crate::value::Value;

/// Immutable view of a node at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    path: Path,
    value: Option<Value>,
}

impl NodeSnapshot {
    /// Snapshot of `path` holding `value` (`None` or `Null` for an absent node)
    pub fn new(path: Path, value: Option<Value>) -> Self {
        let value = value.filter(|v| !v.is_null());
        NodeSnapshot { path, value }
    }

    /// Snapshot of an absent node
    pub fn empty(path: Path) -> Self {
        NodeSnapshot { path, value: None }
    }

    /// Path the snapshot was taken at
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Key of the node (last path segment)
    pub fn key(&self) -> Option<&str> {
        self.path.key()
    }

    /// Stored value, `None` if the node does not exist
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Consume the snapshot, returning its value
    pub fn into_value(self) -> Option<Value> {
        self.value
    }

    /// True if the node holds data
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// Number of direct children
    pub fn child_count(&self) -> usize {
        self.value.as_ref().map_or(0, Value::child_count)
    }

    /// True if a direct child named `key` exists
    pub fn has_child(&self, key: &str) -> bool {
        self.value
            .as_ref()
            .and_then(Value::as_object)
            .is_some_and(|children| children.get(key).is_some_and(|v| !v.is_null()))
    }

    /// Child keys in key order (integers first)
    pub fn child_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .value
            .as_ref()
            .and_then(Value::as_object)
            .map(|children| children.keys().map(String::as_str).collect())
            .unwrap_or_default();
        keys.sort_by(|a, b| compare_keys(a, b));
        keys
    }

    /// Snapshot of a direct child
    ///
    /// Returns `None` if `key` is not a valid path segment; an absent child
    /// yields an empty snapshot.
    pub fn child(&self, key: &str) -> Option<NodeSnapshot> {
        let path = self.path.child(key).ok()?;
        let value = self
            .value
            .as_ref()
            .and_then(Value::as_object)
            .and_then(|children| children.get(key))
            .cloned();
        Some(NodeSnapshot::new(path, value))
    }

    /// All direct children in key order
    pub fn children(&self) -> Vec<NodeSnapshot> {
        self.child_keys()
            .into_iter()
            .filter_map(|key| self.child(key))
            .collect()
    }
}
