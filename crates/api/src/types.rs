//! Client-level handle types

use canopy_core::Path;
use canopy_engine::RequestHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// ClientId
// =============================================================================

/// Identifier of one [`Client`](crate::Client) instance
///
/// A UUID v4 in lowercase hyphenated form, attached to the client's log
/// events so interleaved clients in one process can be told apart.
///
/// ```
/// use canopy_api::ClientId;
///
/// let id = ClientId::new();
/// assert_eq!(ClientId::parse(&id.to_string()), Some(id));
/// assert_eq!(ClientId::parse("not-a-uuid"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Fresh random identifier
    pub fn new() -> Self {
        ClientId(Uuid::new_v4())
    }

    /// Parse a hyphenated UUID string
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(ClientId)
    }

    /// The underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for ClientId {
    fn from(uuid: Uuid) -> Self {
        ClientId(uuid)
    }
}

// =============================================================================
// WatchHandle
// =============================================================================

/// Cancel handle for a [`Client::watch`](crate::Client::watch)
///
/// Each watch owns its own store subscription; cancelling one never affects
/// another on the same path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchHandle {
    pub(crate) request: RequestHandle,
}

impl WatchHandle {
    /// Path being watched
    pub fn path(&self) -> &Path {
        &self.request.path
    }

    /// The registry request behind this watch
    pub fn request(&self) -> &RequestHandle {
        &self.request
    }
}
