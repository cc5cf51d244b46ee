//! Key proposal
//!
//! Pure functions from an observed node snapshot to the next key to try.
//! Child keys sort integers first (numerically), then everything else, so the
//! last key of a `limit_to_last(1)` read is either the largest integer key or
//! a key outside the integer sequence.

use canopy_core::{parse_int_key, NodeSnapshot};

/// Next key suggested by a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyProposal {
    /// Try this key
    Next(u64),
    /// The last child key is not a non-negative integer
    Malformed(String),
}

/// Propose the key after the snapshot's last child
///
/// An empty node proposes 0. Negative integer keys are outside the sequence;
/// if the last key is one, every integer key is negative and 0 is proposed.
pub fn propose_key(snapshot: &NodeSnapshot) -> KeyProposal {
    let keys = snapshot.child_keys();
    let Some(last) = keys.last() else {
        return KeyProposal::Next(0);
    };
    match parse_int_key(last) {
        Some(n) if n < 0 => KeyProposal::Next(0),
        Some(n) => KeyProposal::Next(n as u64 + 1),
        None => KeyProposal::Malformed((*last).to_string()),
    }
}

/// Largest non-negative integer child key, ignoring every other key
pub fn max_integer_key(snapshot: &NodeSnapshot) -> Option<u64> {
    snapshot
        .child_keys()
        .into_iter()
        .filter_map(parse_int_key)
        .filter(|n| *n >= 0)
        .max()
        .map(|n| n as u64)
}
