//! The top-level engine: owns the metadata document, the blob and
//! mergeable stores, and the open-handle table, and implements the
//! [`MountableFilesystem`] facade (§4.6) over them.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::blobstore::BlobStore;
use crate::config::Config;
use crate::error::{AmfsError, Result};
use crate::facade::{self, FileInfo, MountableFilesystem};
use crate::handle::FileHandle;
use crate::ids::NodeId;
use crate::mergeable::MergeableStore;
use crate::metadata::{FileRecord, MetadataDocument, NodeKind};
use crate::resolver::{self, Resolution};
use crate::txn::Transaction;

const METADATA_FILE: &str = "folder.automerge";

/// Everything mutated under the engine's single exclusive lock (§5, §9):
/// the metadata document and the table of currently open handles.
struct EngineState {
    metadata: MetadataDocument,
    open_handles: HashMap<String, FileHandle>,
}

/// Owns the on-disk state for one amfs instance: the metadata document,
/// blob store, mergeable store, and scratch directory for staging files.
pub struct Engine {
    state: Mutex<EngineState>,
    blobs: BlobStore,
    mergeables: MergeableStore,
    scratch_dir: PathBuf,
    metadata_path: PathBuf,
}

impl Engine {
    /// Start up against `config`: create the data and scratch directories
    /// if absent, and load the metadata document (or initialize a fresh
    /// one if no file exists yet) (§3.5).
    pub fn open(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(&config.scratch_dir)?;

        let metadata_path = config.data_dir.join(METADATA_FILE);
        let metadata = match std::fs::read(&metadata_path) {
            Ok(bytes) => {
                log::debug!("loading existing metadata document from {}", metadata_path.display());
                MetadataDocument::from_bytes(&bytes)?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no metadata document found, initializing a fresh one");
                MetadataDocument::init()
            }
            Err(err) => return Err(err.into()),
        };

        let blobs = BlobStore::open(&config.data_dir)?;
        let mergeables = MergeableStore::open(&config.data_dir)?;

        log::info!(
            "amfs engine started (data_dir={}, scratch_dir={}, sync_listen={})",
            config.data_dir.display(),
            config.scratch_dir.display(),
            config.sync_listen,
        );

        Ok(Self {
            state: Mutex::new(EngineState {
                metadata,
                open_handles: HashMap::new(),
            }),
            blobs,
            mergeables,
            scratch_dir: config.scratch_dir.clone(),
            metadata_path,
        })
    }

    /// Read-only access to the blob store, used by the sync server's OPEN
    /// handling when promoting a Blob node (§4.7).
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Read-only access to the mergeable store, used by the sync server.
    pub fn mergeables(&self) -> &MergeableStore {
        &self.mergeables
    }

    /// Resolve `path` to a node and its current record, for callers (the
    /// sync server's `OPEN`, §4.7) that need both rather than walking
    /// `stat` + a second lookup. Fails `Invalid` if the path names a
    /// folder - the sync protocol only ever opens files.
    pub fn resolve_for_sync(&self, path: &str) -> Result<(NodeId, FileRecord)> {
        let id = self.must_resolve(path)?;
        let record = self.record_of(&id)?;
        if record.is_dir() {
            return Err(AmfsError::Invalid(format!("{path} is a folder")));
        }
        Ok((id, record))
    }

    /// Look up a node's current record by id, for callers that already
    /// resolved a path (or a `.amfs/=<id>` handle) to a [`NodeId`].
    pub fn file_record(&self, id: &NodeId) -> Result<FileRecord> {
        self.record_of(id)
    }

    /// Commit the metadata side of a `SYNC` exchange that carried a payload
    /// (§4.7 step 4): promote the node to `Mergeable`, record the merged
    /// text's length and head hash, and bump `modtime`/`modcount`.
    pub fn commit_sync_promote(&self, id: &NodeId, text_len: u64, head: String) -> Result<()> {
        let state = self.state.lock().expect("engine lock poisoned");
        Transaction::new(&state.metadata)
            .set_kind(id.clone(), NodeKind::Mergeable)
            .set_size(id.clone(), text_len)
            .set_heads(id.clone(), vec![head])
            .touch_modtime(id.clone())
            .inc_modcount(id.clone())
            .commit(|bytes| self.persist(bytes))
    }

    fn persist(&self, bytes: &[u8]) -> Result<()> {
        let tmp_path = self.metadata_path.with_extension("tmp");
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &self.metadata_path)?;
        Ok(())
    }

    /// Resolve `path`, optionally tolerating a missing final segment.
    fn resolve(&self, path: &str, allow_missing_leaf: bool) -> Result<Resolution> {
        let state = self.state.lock().expect("engine lock poisoned");
        resolver::resolve(&state.metadata, path, allow_missing_leaf)
    }

    fn must_resolve(&self, path: &str) -> Result<NodeId> {
        match self.resolve(path, false)? {
            Resolution::Found(id) => Ok(id),
            Resolution::Missing { .. } => Err(AmfsError::not_found(path)),
        }
    }

    fn record_of(&self, id: &NodeId) -> Result<FileRecord> {
        let state = self.state.lock().expect("engine lock poisoned");
        state
            .metadata
            .get_file(id)
            .ok_or_else(|| AmfsError::Invalid(format!("no such node: {id}")))
    }

    fn file_info(&self, name: &str, record: &FileRecord) -> FileInfo {
        FileInfo {
            name: name.to_string(),
            size: record.size,
            mode: record.perm,
            mod_time: record.effective_modtime(),
            is_dir: record.is_dir(),
        }
    }

    /// Create (or reuse) a node at `path`'s final segment with create
    /// intent, returning its id and record.
    fn get_or_create(&self, path: &str, perm: u32) -> Result<(NodeId, FileRecord)> {
        match self.resolve(path, true)? {
            Resolution::Found(id) => {
                let record = self.record_of(&id)?;
                Ok((id, record))
            }
            Resolution::Missing { parent, name } => {
                let id = NodeId::new();
                let record = FileRecord::new(NodeKind::Blob, perm);
                log::debug!("creating node {id} as {name:?} under {parent}");
                let state = self.state.lock().expect("engine lock poisoned");
                Transaction::new(&state.metadata)
                    .create_file(id.clone(), record.clone())
                    .link_child(parent.clone(), name, id.clone())
                    .touch_modtime(parent.clone())
                    .inc_modcount(parent)
                    .commit(|bytes| self.persist(bytes))?;
                Ok((id, record))
            }
        }
    }

    fn open_handle_for(&self, id: NodeId, record: &FileRecord, truncate: bool) -> Result<Vec<u8>> {
        let handle = FileHandle::open(id, record, truncate, &self.scratch_dir, &self.blobs, &self.mergeables)?;
        let token = format!("fd-{}", NodeId::new());
        let mut state = self.state.lock().expect("engine lock poisoned");
        state.open_handles.insert(token.clone(), handle);
        Ok(token.into_bytes())
    }

    fn token_of(handle: &[u8]) -> Result<String> {
        std::str::from_utf8(handle)
            .map(str::to_string)
            .map_err(|_| AmfsError::Invalid("handle token is not valid UTF-8".to_string()))
    }

    fn close_and_commit(&self, token: String) -> Result<()> {
        let handle = {
            let mut state = self.state.lock().expect("engine lock poisoned");
            state
                .open_handles
                .remove(&token)
                .ok_or_else(|| AmfsError::Invalid(format!("no such open handle: {token}")))?
        };
        let id = handle.id().clone();
        let bytes = handle.close()?;
        let digest = self.blobs.put(&bytes)?;
        log::debug!("closed handle for {id}, wrote blob {digest} ({} bytes)", bytes.len());

        let state = self.state.lock().expect("engine lock poisoned");
        Transaction::new(&state.metadata)
            .set_size(id.clone(), bytes.len() as u64)
            .set_heads(id.clone(), vec![digest])
            .touch_modtime(id.clone())
            .inc_modcount(id)
            .commit(|bytes| self.persist(bytes))
    }
}

impl MountableFilesystem for Engine {
    fn create(&self, path: &str) -> Result<Vec<u8>> {
        let (id, record) = self.get_or_create(path, 0o666)?;
        self.open_handle_for(id, &record, true)
    }

    fn open(&self, path: &str) -> Result<Vec<u8>> {
        let id = self.must_resolve(path)?;
        let record = self.record_of(&id)?;
        self.open_handle_for(id, &record, false)
    }

    fn open_file(&self, path: &str, create: bool, perm: u32) -> Result<Vec<u8>> {
        if create {
            let (id, record) = self.get_or_create(path, perm)?;
            self.open_handle_for(id, &record, false)
        } else {
            self.open(path)
        }
    }

    fn read(&self, handle: &[u8], buf: &mut [u8], offset: u64) -> Result<usize> {
        let token = Self::token_of(handle)?;
        let mut state = self.state.lock().expect("engine lock poisoned");
        let fh = state
            .open_handles
            .get_mut(&token)
            .ok_or_else(|| AmfsError::Invalid(format!("no such open handle: {token}")))?;
        fh.seek(SeekFrom::Start(offset))?;
        fh.read(buf)
    }

    fn write(&self, handle: &[u8], buf: &[u8], offset: u64) -> Result<usize> {
        let token = Self::token_of(handle)?;
        let mut state = self.state.lock().expect("engine lock poisoned");
        let fh = state
            .open_handles
            .get_mut(&token)
            .ok_or_else(|| AmfsError::Invalid(format!("no such open handle: {token}")))?;
        fh.seek(SeekFrom::Start(offset))?;
        fh.write(buf)
    }

    fn close_handle(&self, handle: Vec<u8>) -> Result<()> {
        let token = Self::token_of(&handle)?;
        self.close_and_commit(token)
    }

    fn stat(&self, path: &str) -> Result<FileInfo> {
        let id = self.must_resolve(path)?;
        let record = self.record_of(&id)?;
        Ok(self.file_info(path, &record))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        let id = self.must_resolve(path)?;
        let state = self.state.lock().expect("engine lock poisoned");
        let children = state
            .metadata
            .get_children(&id)
            .ok_or_else(|| AmfsError::Invalid(format!("{path} is not a folder")))?;

        children
            .into_iter()
            .map(|(name, child_id)| {
                let record = state
                    .metadata
                    .get_file(&child_id)
                    .ok_or_else(|| AmfsError::Invalid(format!("dangling child entry: {child_id}")))?;
                Ok(self.file_info(&name, &record))
            })
            .collect()
    }

    fn mkdir_all(&self, path: &str, perm: u32) -> Result<()> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut prefix = String::new();
        for segment in segments {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);

            match self.resolve(&prefix, true)? {
                Resolution::Found(id) => {
                    let record = self.record_of(&id)?;
                    if !record.is_dir() {
                        return Err(AmfsError::Invalid(format!("{prefix} already exists and is not a folder")));
                    }
                }
                Resolution::Missing { parent, name } => {
                    let id = NodeId::new();
                    log::debug!("mkdirAll creating folder {id} as {name:?} under {parent}");
                    let state = self.state.lock().expect("engine lock poisoned");
                    Transaction::new(&state.metadata)
                        .create_file(id.clone(), FileRecord::new(NodeKind::Folder, perm))
                        .create_folder(id.clone())
                        .link_child(parent.clone(), name, id)
                        .touch_modtime(parent.clone())
                        .inc_modcount(parent)
                        .commit(|bytes| self.persist(bytes))?;
                }
            }
        }
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        let (old_parent_path, old_name) = resolver::split_parent(old)?;
        let (new_parent_path, new_name) = resolver::split_parent(new)?;
        let old_parent = self.must_resolve(&old_parent_path)?;
        let new_parent = self.must_resolve(&new_parent_path)?;
        let child = self.must_resolve(old)?;

        let state = self.state.lock().expect("engine lock poisoned");
        Transaction::new(&state.metadata)
            .unlink_child(old_parent.clone(), old_name)
            .link_child(new_parent.clone(), new_name, child)
            .touch_modtime(old_parent.clone())
            .inc_modcount(old_parent)
            .touch_modtime(new_parent.clone())
            .inc_modcount(new_parent)
            .commit(|bytes| self.persist(bytes))
    }

    fn remove(&self, path: &str) -> Result<()> {
        let (parent_path, name) = resolver::split_parent(path)?;
        let parent = self.must_resolve(&parent_path)?;
        {
            let state = self.state.lock().expect("engine lock poisoned");
            if !state.metadata.get_file(&parent).map(|r| r.is_dir()).unwrap_or(false) {
                return Err(AmfsError::Invalid(format!("{parent_path} is not a folder")));
            }
        }

        let state = self.state.lock().expect("engine lock poisoned");
        Transaction::new(&state.metadata)
            .unlink_child(parent.clone(), name)
            .touch_modtime(parent.clone())
            .inc_modcount(parent)
            .commit(|bytes| self.persist(bytes))
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        let id = self.must_resolve(path)?;
        let state = self.state.lock().expect("engine lock poisoned");
        Transaction::new(&state.metadata)
            .set_perm(id.clone(), mode)
            .touch_modtime(id.clone())
            .inc_modcount(id)
            .commit(|bytes| self.persist(bytes))
    }

    fn chtimes(&self, path: &str, _atime: SystemTime, _mtime: SystemTime) -> Result<()> {
        // Caller-supplied times are intentionally discarded; see the
        // resolved design decision in DESIGN.md. Only modcount advances,
        // which still shifts the effective mtime that clients observe.
        let id = self.must_resolve(path)?;
        let state = self.state.lock().expect("engine lock poisoned");
        Transaction::new(&state.metadata)
            .inc_modcount(id)
            .commit(|bytes| self.persist(bytes))
    }

    fn to_handle(&self, path: &str) -> Result<Vec<u8>> {
        let id = self.must_resolve(path)?;
        Ok(facade::to_handle(&id))
    }

    fn from_handle(&self, handle: &[u8]) -> Result<String> {
        let (id, rest) = facade::from_handle(handle)?;
        let state = self.state.lock().expect("engine lock poisoned");
        if state.metadata.get_file(&id).is_none() {
            return Err(AmfsError::not_found(format!("handle for {id}")));
        }
        let mut path = resolver::escaped_path_for(&id);
        for segment in rest {
            path.push('/');
            path.push_str(&segment);
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &Path) -> Config {
        Config {
            data_dir: dir.join("data"),
            scratch_dir: dir.join("scratch"),
            sync_listen: "127.0.0.1:0".to_string(),
            sync_unix_socket: None,
            log_level: "debug".to_string(),
        }
    }

    #[test]
    fn create_write_close_then_open_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(&test_config(dir.path())).unwrap();

        let handle = engine.create("a.txt").unwrap();
        engine.write(&handle, b"hello", 0).unwrap();
        engine.close_handle(handle).unwrap();

        let info = engine.stat("a.txt").unwrap();
        assert_eq!(info.size, 5);

        let handle = engine.open("a.txt").unwrap();
        let mut buf = [0u8; 5];
        engine.read(&handle, &mut buf, 0).unwrap();
        assert_eq!(&buf, b"hello");
        engine.close_handle(handle).unwrap();
    }

    #[test]
    fn create_truncates_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(&test_config(dir.path())).unwrap();

        let handle = engine.create("a.txt").unwrap();
        engine.write(&handle, b"hello", 0).unwrap();
        engine.close_handle(handle).unwrap();

        let handle = engine.create("a.txt").unwrap();
        engine.write(&handle, b"hi", 0).unwrap();
        engine.close_handle(handle).unwrap();

        let info = engine.stat("a.txt").unwrap();
        assert_eq!(info.size, 2);

        let handle = engine.open("a.txt").unwrap();
        let mut buf = [0u8; 2];
        engine.read(&handle, &mut buf, 0).unwrap();
        assert_eq!(&buf, b"hi");
        engine.close_handle(handle).unwrap();
    }

    #[test]
    fn identical_content_shares_one_blob() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(&test_config(dir.path())).unwrap();

        for name in ["x", "y"] {
            let handle = engine.create(name).unwrap();
            engine.write(&handle, b"abc", 0).unwrap();
            engine.close_handle(handle).unwrap();
        }

        let blob_count = std::fs::read_dir(engine.blobs().dir())
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .map(|e| e.file_name().len() == 64)
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(blob_count, 1);
    }

    #[test]
    fn rename_preserves_handle_identity() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(&test_config(dir.path())).unwrap();

        let handle = engine.create("f").unwrap();
        engine.close_handle(handle).unwrap();
        let before = engine.to_handle("f").unwrap();

        engine.rename("f", "g").unwrap();
        assert!(matches!(engine.stat("f").unwrap_err(), AmfsError::NotFound(_)));
        let after = engine.to_handle("g").unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn chmod_strictly_advances_effective_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(&test_config(dir.path())).unwrap();

        let handle = engine.create("m").unwrap();
        engine.close_handle(handle).unwrap();
        let before = engine.stat("m").unwrap().mod_time;

        engine.chmod("m", 0o600).unwrap();
        let after = engine.stat("m").unwrap().mod_time;
        assert_ne!(before, after);
    }

    #[test]
    fn mkdir_all_creates_intermediate_folders() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(&test_config(dir.path())).unwrap();

        engine.mkdir_all("a/b/c", 0o755).unwrap();
        assert!(engine.stat("a").unwrap().is_dir);
        assert!(engine.stat("a/b").unwrap().is_dir);
        assert!(engine.stat("a/b/c").unwrap().is_dir);

        let handle = engine.create("a/b/c/file.txt").unwrap();
        engine.write(&handle, b"x", 0).unwrap();
        engine.close_handle(handle).unwrap();
        assert_eq!(engine.stat("a/b/c/file.txt").unwrap().size, 1);
    }

    #[test]
    fn unsupported_ops_report_not_supported() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(&test_config(dir.path())).unwrap();

        assert!(matches!(engine.symlink("a", "b").unwrap_err(), AmfsError::NotSupported(_)));
        assert!(matches!(engine.readlink("a").unwrap_err(), AmfsError::NotSupported(_)));
        assert!(matches!(engine.chown("a", 0, 0).unwrap_err(), AmfsError::NotSupported(_)));
        assert!(matches!(engine.temp_file().unwrap_err(), AmfsError::NotSupported(_)));
        assert!(matches!(engine.chroot("a").unwrap_err(), AmfsError::NotSupported(_)));
    }
}
