//! Query memo
//!
//! Remembers the most recently constructed [`Reference`] and the path it
//! resolved to, so a caller handing the same reference back skips resolution.
//! Capacity is one: every new reference evicts the previous one, and
//! interleaved callers can thrash it. Matches are by identity
//! ([`Reference::ptr_eq`]), never by value.

use canopy_core::{Path, Query, Reference};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Something a read can target: a bare path or a previously built reference
#[derive(Debug, Clone)]
pub enum Target {
    /// Whole node at a path
    Path(Path),
    /// A reference, possibly carrying ordering and limit
    Reference(Reference),
}

impl From<Path> for Target {
    fn from(path: Path) -> Self {
        Target::Path(path)
    }
}

impl From<&Path> for Target {
    fn from(path: &Path) -> Self {
        Target::Path(path.clone())
    }
}

impl From<Reference> for Target {
    fn from(reference: Reference) -> Self {
        Target::Reference(reference)
    }
}

impl From<&Reference> for Target {
    fn from(reference: &Reference) -> Self {
        Target::Reference(reference.clone())
    }
}

/// A target after resolution
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Reference that will be issued
    pub reference: Reference,
    /// Node path the reference points at
    pub path: Path,
}

struct Memo {
    reference: Reference,
    resolved: Path,
}

/// Single-slot identity cache of reference → path
#[derive(Default)]
pub struct QueryMemo {
    slot: Mutex<Option<Memo>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryMemo {
    /// Empty memo
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a new reference and make it the memoized one
    pub fn reference(&self, query: Query) -> Reference {
        let reference = Reference::new(query);
        self.store(&reference, reference.path().clone());
        reference
    }

    /// Resolve a path or reference
    ///
    /// A reference identical to the memoized one returns the memoized path.
    /// Anything else is resolved afresh and replaces the memo; a bare path is
    /// wrapped in a new whole-node reference first.
    pub fn resolve(&self, target: impl Into<Target>) -> Resolved {
        let reference = match target.into() {
            Target::Reference(reference) => {
                if let Some(memo) = self.slot.lock().as_ref() {
                    if memo.reference.ptr_eq(&reference) {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Resolved {
                            reference,
                            path: memo.resolved.clone(),
                        };
                    }
                }
                reference
            }
            Target::Path(path) => Reference::to_path(path),
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        let path = reference.path().clone();
        trace!(target: "canopy::registry", query = %reference.query().canonical(), "resolved reference");
        self.store(&reference, path.clone());
        Resolved { reference, path }
    }

    /// True if `reference` is the memoized reference
    pub fn is_memoized(&self, reference: &Reference) -> bool {
        self.slot
            .lock()
            .as_ref()
            .is_some_and(|memo| memo.reference.ptr_eq(reference))
    }

    /// Resolutions answered from the memo
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Resolutions computed afresh
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn store(&self, reference: &Reference, resolved: Path) {
        *self.slot.lock() = Some(Memo {
            reference: reference.clone(),
            resolved,
        });
    }
}
