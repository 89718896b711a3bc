//! Content-addressed blob storage (§4.3).
//!
//! Files are named by the lowercase hex SHA-256 of their bytes and live
//! flat inside the engine's data directory alongside the metadata document
//! and the mergeable store (§6.1) - blob names (64 hex chars) and `NodeId`s
//! (43 base64url chars) never collide in length, so one directory suffices.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{AmfsError, Result};

/// Hex-encoded SHA-256 digest of some bytes.
pub type Digest256 = String;

/// Content-addressed, append-only byte store.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Open (and create if absent) a blob store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Compute the digest of `bytes`, without writing anything.
    pub fn digest_of(bytes: &[u8]) -> Digest256 {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex_encode(&hasher.finalize())
    }

    /// Store `bytes` under their SHA-256 digest, returning it. Idempotent:
    /// writing the same bytes twice is a no-op the second time. Uses a
    /// write-to-temp-then-rename sequence so a crash mid-write never
    /// leaves a half-written file visible under its final digest name.
    pub fn put(&self, bytes: &[u8]) -> Result<Digest256> {
        let digest = Self::digest_of(bytes);
        let final_path = self.path_for(&digest);
        if final_path.exists() {
            log::debug!("blob {digest} already present, skipping write");
            return Ok(digest);
        }

        let tmp_path = self.dir.join(format!(".tmp-{}", crate::ids::NodeId::new()));
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &final_path)?;
        log::debug!("wrote blob {digest} ({} bytes)", bytes.len());
        Ok(digest)
    }

    /// Read the bytes stored under `digest`. A missing file is a fatal
    /// inconsistency (§4.3, §7 `Integrity`): metadata claimed this blob
    /// exists.
    pub fn get(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.path_for(digest);
        std::fs::read(&path).map_err(|e| {
            AmfsError::Integrity(format!("blob {digest} missing from store: {e}"))
        })
    }

    fn path_for(&self, digest: &str) -> PathBuf {
        self.dir.join(digest)
    }

    /// The directory backing this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String never fails");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let digest = store.put(b"hello").unwrap();
        assert_eq!(store.get(&digest).unwrap(), b"hello");
    }

    #[test]
    fn identical_content_addresses_to_the_same_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let d1 = store.put(b"abc").unwrap();
        let d2 = store.put(b"abc").unwrap();
        assert_eq!(d1, d2);
        assert_eq!(
            d1,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let mut entries = std::fs::read_dir(store.dir()).unwrap();
        assert!(entries.next().is_some());
        assert!(entries.next().is_none());
    }

    #[test]
    fn missing_blob_is_an_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let err = store.get("deadbeef").unwrap_err();
        assert!(matches!(err, AmfsError::Integrity(_)));
    }
}
