//! The filesystem facade (§4.6): the operations exposed to an external
//! network-filesystem framework, plus the opaque handle protocol that
//! lets such a framework track files across renames.

use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::error::{AmfsError, Result};
use crate::ids::NodeId;
use crate::resolver;

const ESCAPE_PREFIX: &str = ".amfs/=";

/// Stat-style information about a node, independent of any particular
/// mount framework's wire shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub mod_time: DateTime<Utc>,
    pub is_dir: bool,
}

/// Encode a node's opaque, rename-stable handle (§4.6: `toHandle`).
pub fn to_handle(id: &NodeId) -> Vec<u8> {
    resolver::escaped_path_for(id).into_bytes()
}

/// Decode a handle previously produced by [`to_handle`], recovering the
/// node id and any trailing path segments (§4.6: `fromHandle`).
pub fn from_handle(bytes: &[u8]) -> Result<(NodeId, Vec<String>)> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| AmfsError::Invalid("handle is not valid UTF-8".to_string()))?;
    let rest = text
        .strip_prefix(ESCAPE_PREFIX)
        .ok_or_else(|| AmfsError::Invalid(format!("handle missing required prefix: {text}")))?;

    let mut segments = rest.split('/');
    let id = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AmfsError::Invalid("handle has no node id segment".to_string()))?;

    Ok((
        NodeId::from_str_unchecked(id.to_string()),
        segments.filter(|s| !s.is_empty()).map(str::to_string).collect(),
    ))
}

/// Minimal, local stand-in for whatever trait an external network
/// filesystem/mount framework would require of a facade (§4.6's "External
/// collaborator stub"). Operates on path strings and raw bytes only, so a
/// demo client can exercise it without depending on any particular RPC
/// framework's types.
pub trait MountableFilesystem {
    fn create(&self, path: &str) -> Result<Vec<u8>>;
    fn open(&self, path: &str) -> Result<Vec<u8>>;
    fn open_file(&self, path: &str, create: bool, perm: u32) -> Result<Vec<u8>>;
    fn read(&self, handle: &[u8], buf: &mut [u8], offset: u64) -> Result<usize>;
    fn write(&self, handle: &[u8], buf: &[u8], offset: u64) -> Result<usize>;
    fn close_handle(&self, handle: Vec<u8>) -> Result<()>;
    fn stat(&self, path: &str) -> Result<FileInfo>;
    fn lstat(&self, path: &str) -> Result<FileInfo> {
        self.stat(path)
    }
    fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>>;
    fn mkdir_all(&self, path: &str, perm: u32) -> Result<()>;
    fn rename(&self, old: &str, new: &str) -> Result<()>;
    fn remove(&self, path: &str) -> Result<()>;
    fn chmod(&self, path: &str, mode: u32) -> Result<()>;
    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()>;

    fn to_handle(&self, path: &str) -> Result<Vec<u8>>;
    fn from_handle(&self, handle: &[u8]) -> Result<String>;

    fn temp_file(&self) -> Result<Vec<u8>> {
        Err(AmfsError::NotSupported("tempFile"))
    }
    fn symlink(&self, _target: &str, _link: &str) -> Result<()> {
        Err(AmfsError::NotSupported("symlink"))
    }
    fn readlink(&self, _path: &str) -> Result<String> {
        Err(AmfsError::NotSupported("readlink"))
    }
    fn chroot(&self, _path: &str) -> Result<()> {
        Err(AmfsError::NotSupported("chroot"))
    }
    fn lchown(&self, _path: &str, _uid: u32, _gid: u32) -> Result<()> {
        Err(AmfsError::NotSupported("lchown"))
    }
    fn chown(&self, _path: &str, _uid: u32, _gid: u32) -> Result<()> {
        Err(AmfsError::NotSupported("chown"))
    }

    /// A fixed label for the filesystem's root, per §4.6.
    fn root(&self) -> &str {
        "/"
    }

    /// Join path segments with `/`, matching the rest of the resolver's
    /// separator convention.
    fn join(&self, segments: &[&str]) -> String {
        segments.join("/")
    }

    /// Split `path` into (parent, final segment).
    fn split(&self, path: &str) -> Result<(String, String)> {
        resolver::split_parent(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_round_trips_node_id() {
        let id = NodeId::new();
        let encoded = to_handle(&id);
        let (decoded, rest) = from_handle(&encoded).unwrap();
        assert_eq!(decoded, id);
        assert!(rest.is_empty());
    }

    #[test]
    fn handle_without_prefix_is_invalid() {
        let err = from_handle(b"not-a-handle").unwrap_err();
        assert!(matches!(err, AmfsError::Invalid(_)));
    }
}
