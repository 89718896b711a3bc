//! Node identifiers (§3.1).

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Reserved id of the filesystem root folder.
pub const ROOT: &str = "ROOT";

/// Opaque, globally unique identifier for a filesystem node.
///
/// Freshly minted ids are a base64url encoding of 256 random bits; the root
/// node uses the reserved literal [`ROOT`]. `NodeId` displays as its text
/// form so it can be used directly as a CRDT map key and as a path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// The reserved root node id.
    pub fn root() -> Self {
        NodeId(ROOT.to_string())
    }

    /// Generate a fresh random node id.
    pub fn new() -> Self {
        let mut bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        NodeId(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap an already-encoded id, e.g. one read back from storage or the
    /// wire protocol. Does not validate the text is actually base64url -
    /// `ROOT` itself is not valid base64url of 32 bytes either.
    pub fn from_str_unchecked(s: impl Into<String>) -> Self {
        NodeId(s.into())
    }

    /// True iff this is the reserved root id.
    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    /// Borrow the underlying text form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_id_is_reserved_literal() {
        assert_eq!(NodeId::root().as_str(), "ROOT");
        assert!(NodeId::root().is_root());
    }

    #[test]
    fn fresh_ids_are_unique_and_not_root() {
        let a = NodeId::new();
        let b = NodeId::new();
        assert_ne!(a, b);
        assert!(!a.is_root());
    }
}
