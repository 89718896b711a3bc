//! Error taxonomy for the amfs engine.
//!
//! The variants mirror the error classes a filesystem client actually needs
//! to distinguish (§7 of the design): a missing path, a structurally invalid
//! request, an unsupported operation, a corrupt/missing store entry, and
//! plain I/O failure. `Integrity` is reserved for states that mean the
//! on-disk metadata can no longer be trusted; callers that see it should not
//! keep serving requests against the same engine.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for amfs engine operations.
#[derive(Debug, Error)]
pub enum AmfsError {
    /// A path segment did not resolve to an existing node.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is intentionally unimplemented (symlinks, chown, ...).
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// Structural misuse, e.g. removing a child from a non-folder parent.
    #[error("invalid operation: {0}")]
    Invalid(String),

    /// A blob or mergeable document referenced from metadata is missing or
    /// unreadable on disk, or the metadata document itself failed to load.
    /// The engine cannot safely continue after this.
    #[error("integrity failure: {0}")]
    Integrity(String),

    /// A sync connection's framing could not be parsed, or the socket
    /// failed; the caller should close the connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// Any other I/O failure (staging file, store write, ...). Surfaced to
    /// the caller of the current operation, not fatal to the engine.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file failed to parse.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A stored JSON record failed to (de)serialize.
    #[error("metadata encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A CRDT update could not be decoded or applied.
    #[error("CRDT error: {0}")]
    Crdt(String),
}

/// Result type alias for amfs engine operations.
pub type Result<T> = std::result::Result<T, AmfsError>;

impl AmfsError {
    /// True for errors that mean the engine's in-memory state can no longer
    /// be trusted and the process should abort rather than keep serving
    /// requests (§7: "Integrity failures abort the process").
    pub fn is_fatal(&self) -> bool {
        matches!(self, AmfsError::Integrity(_))
    }

    /// Path that was being resolved when a `NotFound` occurred, if known.
    /// Kept separate from the `Display` message so callers building wire
    /// responses (e.g. the sync protocol's `ERROR <line>:<reason>`) can
    /// choose their own formatting.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        AmfsError::NotFound(path.into().to_string_lossy().into_owned())
    }
}
