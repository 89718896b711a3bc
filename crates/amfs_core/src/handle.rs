//! The file handle engine (§4.5): bridges mutable byte-oriented file
//! handles to immutable content-addressed blobs and to mergeable text
//! documents via a private staging file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::blobstore::BlobStore;
use crate::error::Result;
use crate::ids::NodeId;
use crate::mergeable::MergeableStore;
use crate::metadata::{FileRecord, NodeKind};

/// One open view of a file, backed by a private staging file (§4.5).
pub struct FileHandle {
    id: NodeId,
    staging_path: PathBuf,
    file: File,
}

impl FileHandle {
    /// Materialize `record`'s current content into a fresh staging file
    /// under `scratch_dir` and open it read-write. If the record has no
    /// content yet (`heads` empty), or `truncate` is set (create|truncate
    /// intent, §4.6), the staging file starts empty instead of being
    /// materialized from the blob or mergeable store.
    pub fn open(
        id: NodeId,
        record: &FileRecord,
        truncate: bool,
        scratch_dir: &Path,
        blobs: &BlobStore,
        mergeables: &MergeableStore,
    ) -> Result<Self> {
        std::fs::create_dir_all(scratch_dir)?;
        let staging_path = scratch_dir.join(format!("{id}-{}", NodeId::new()));

        let content: Vec<u8> = if truncate {
            Vec::new()
        } else {
            match record.kind {
                NodeKind::Mergeable => {
                    let doc = mergeables.load(&id)?;
                    doc.content().into_bytes()
                }
                NodeKind::Blob | NodeKind::Folder => match record.heads.first() {
                    Some(digest) => blobs.get(digest)?,
                    None => Vec::new(),
                },
            }
        };

        std::fs::write(&staging_path, &content)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&staging_path)?;

        Ok(Self {
            id,
            staging_path,
            file,
        })
    }

    /// The node this handle was opened against.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Read up to `buf.len()` bytes starting at the handle's current
    /// position, delegating directly to the staging file (§4.5).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    /// Write `buf` at the handle's current position.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.file.write(buf)?)
    }

    /// Reposition the handle.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos)?)
    }

    /// Truncate (or extend with zero bytes) the staging file to `len`.
    pub fn set_len(&mut self, len: u64) -> Result<()> {
        Ok(self.file.set_len(len)?)
    }

    /// Take an advisory, per-process exclusive lock on the staging file
    /// (§4.5: "a per-process local lock, not distributed").
    pub fn lock(&self) -> Result<()> {
        Ok(self.file.lock_exclusive()?)
    }

    /// Release a previously taken lock.
    pub fn unlock(&self) -> Result<()> {
        Ok(self.file.unlock()?)
    }

    /// Flush and close the staging file, returning its final bytes. The
    /// caller is responsible for digesting these into the blob store and
    /// committing the resulting metadata (§4.5 steps 2-5); this method
    /// alone performs steps 1 and removes the staging file, matching "all
    /// content edits become content-addressed blobs" happening just
    /// outside the handle itself so the engine can hold its lock across
    /// the commit.
    pub fn close(mut self) -> Result<Vec<u8>> {
        self.file.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        self.file.read_to_end(&mut bytes)?;
        std::fs::remove_file(&self.staging_path)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::NodeKind;

    #[test]
    fn open_with_no_prior_content_starts_empty() {
        let scratch = tempfile::tempdir().unwrap();
        let blobs = BlobStore::open(scratch.path().join("blobs")).unwrap();
        let mergeables = MergeableStore::open(scratch.path().join("merge")).unwrap();
        let record = FileRecord::new(NodeKind::Blob, 0o644);

        let mut handle = FileHandle::open(
            NodeId::new(),
            &record,
            false,
            &scratch.path().join("scratch"),
            &blobs,
            &mergeables,
        )
        .unwrap();

        let mut buf = Vec::new();
        handle.read(&mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn open_materializes_existing_blob_then_close_redigests() {
        let scratch = tempfile::tempdir().unwrap();
        let blobs = BlobStore::open(scratch.path().join("blobs")).unwrap();
        let mergeables = MergeableStore::open(scratch.path().join("merge")).unwrap();

        let digest = blobs.put(b"hello").unwrap();
        let mut record = FileRecord::new(NodeKind::Blob, 0o644);
        record.heads = vec![digest];

        let mut handle = FileHandle::open(
            NodeId::new(),
            &record,
            false,
            &scratch.path().join("scratch"),
            &blobs,
            &mergeables,
        )
        .unwrap();

        let mut buf = [0u8; 5];
        handle.read(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.seek(SeekFrom::End(0)).unwrap();
        handle.write(b" world").unwrap();

        let bytes = handle.close().unwrap();
        assert_eq!(bytes, b"hello world");

        let new_digest = blobs.put(&bytes).unwrap();
        assert_eq!(new_digest, BlobStore::digest_of(b"hello world"));
    }
}
