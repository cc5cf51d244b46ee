//! Queries and references
//!
//! A [`Query`] is a path plus an optional ordering and limit. A [`Reference`]
//! is a shared handle to a query; clones of one reference are *the same*
//! reference (see [`Reference::ptr_eq`]), which is what the query memo keys on.
//!
//! ## Key ordering
//!
//! Keys that read as canonical 64-bit integers sort numerically and before
//! every other key. The remaining keys sort lexicographically by bytes. So
//! `["10", "9", "a", "2"]` orders as `2, 9, 10, a`.

use crate::path::Path;
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Parse a key that is a canonical integer (`"42"`, `"-3"`, not `"007"` or `"+1"`)
pub fn parse_int_key(key: &str) -> Option<i64> {
    let parsed: i64 = key.parse().ok()?;
    if parsed.to_string() == key {
        Some(parsed)
    } else {
        None
    }
}

/// Total order over child keys used by `OrderBy::Key`
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (parse_int_key(a), parse_int_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Ordering applied to a node's children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderBy {
    /// Order by child key, integers first
    Key,
}

/// Limit applied after ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    /// Keep the first `n` children
    First(usize),
    /// Keep the last `n` children
    Last(usize),
}

/// A path with optional ordering and limit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    /// Node the query reads
    pub path: Path,
    /// Child ordering, `None` for an unfiltered read
    pub order: Option<OrderBy>,
    /// Limit applied after ordering
    pub limit: Option<Limit>,
}

impl Query {
    /// Unfiltered read of a whole node
    pub fn new(path: Path) -> Self {
        Query {
            path,
            order: None,
            limit: None,
        }
    }

    /// Order children by key
    pub fn order_by_key(mut self) -> Self {
        self.order = Some(OrderBy::Key);
        self
    }

    /// Keep only the first `n` children
    pub fn limit_to_first(mut self, n: usize) -> Self {
        self.limit = Some(Limit::First(n));
        self
    }

    /// Keep only the last `n` children
    pub fn limit_to_last(mut self, n: usize) -> Self {
        self.limit = Some(Limit::Last(n));
        self
    }

    /// True if the query returns the node unchanged
    pub fn is_unfiltered(&self) -> bool {
        self.limit.is_none()
    }

    /// Apply ordering and limit to the value stored at `self.path`
    ///
    /// Leaves and absent nodes pass through unchanged. Ordering alone does
    /// not change an object (its map is already key-ordered for lookups).
    pub fn apply(&self, node: Option<&Value>) -> Option<Value> {
        let node = node?;
        let (Some(limit), Value::Object(children)) = (self.limit, node) else {
            return Some(node.clone());
        };

        let mut keys: Vec<&String> = children.keys().collect();
        keys.sort_by(|a, b| compare_keys(a, b));
        let selected: Vec<&String> = match limit {
            Limit::First(n) => keys.into_iter().take(n).collect(),
            Limit::Last(n) => {
                let skip = keys.len().saturating_sub(n);
                keys.into_iter().skip(skip).collect()
            }
        };
        if selected.is_empty() {
            return None;
        }

        let filtered: BTreeMap<String, Value> = selected
            .into_iter()
            .map(|k| (k.clone(), children[k].clone()))
            .collect();
        Some(Value::Object(filtered))
    }

    /// Canonical textual form, e.g. `/jobs?orderBy=$key&limitToLast=1`
    pub fn canonical(&self) -> String {
        let mut params = Vec::new();
        if let Some(OrderBy::Key) = self.order {
            params.push("orderBy=$key".to_string());
        }
        match self.limit {
            Some(Limit::First(n)) => params.push(format!("limitToFirst={}", n)),
            Some(Limit::Last(n)) => params.push(format!("limitToLast={}", n)),
            None => {}
        }
        if params.is_empty() {
            self.path.to_string()
        } else {
            format!("{}?{}", self.path, params.join("&"))
        }
    }
}

impl From<Path> for Query {
    fn from(path: Path) -> Self {
        Query::new(path)
    }
}

/// Shared handle to a query
///
/// Cloning a reference shares it; two separately constructed references over
/// equal queries are equal by value but not identical.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    query: Arc<Query>,
}

impl Reference {
    /// Construct a new reference
    pub fn new(query: Query) -> Self {
        Reference {
            query: Arc::new(query),
        }
    }

    /// Reference to a whole node
    pub fn to_path(path: Path) -> Self {
        Reference::new(Query::new(path))
    }

    /// The query this reference denotes
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Node the reference points at
    pub fn path(&self) -> &Path {
        &self.query.path
    }

    /// True if both handles are the same reference
    pub fn ptr_eq(&self, other: &Reference) -> bool {
        Arc::ptr_eq(&self.query, &other.query)
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({})", self.query.canonical())
    }
}
