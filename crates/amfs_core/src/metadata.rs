//! The metadata document (§3.2): a single CRDT holding the namespace and
//! per-file metadata for the whole filesystem.
//!
//! Two top-level Y.Maps live in the document:
//! - `files`: `NodeId` -> JSON-encoded [`FileRecord`].
//! - `folders`: `NodeId` (of a folder) -> JSON-encoded `BTreeMap<name, NodeId>`.
//!
//! Storing each record as a JSON blob under a single CRDT map key (rather
//! than modelling every field as its own nested shared type) keeps the
//! document shape simple while still giving every top-level key CRDT
//! merge semantics; field-level merge within one record is not needed here
//! because all mutation goes through the single exclusive lock in
//! [`crate::engine::Engine`] (§9, "do not attempt fine-grained locking").

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, Map, MapRef, ReadTxn, StateVector, Transact, TransactionMut, Update};

use crate::error::{AmfsError, Result};
use crate::ids::NodeId;

const FILES_MAP: &str = "files";
const FOLDERS_MAP: &str = "folders";

/// What kind of node a [`FileRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A directory; has a matching entry in the `folders` map.
    Folder,
    /// Immutable content-addressed bytes.
    Blob,
    /// A collaboratively-edited text CRDT document.
    Mergeable,
}

/// Per-node metadata record (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Permission bits; directory-ness is carried separately in `kind`.
    pub perm: u32,
    /// Byte length of current content (0 for folders).
    pub size: u64,
    /// Wall-clock timestamp of the last mutation, second precision.
    pub modtime: DateTime<Utc>,
    /// Monotonically increasing per-node counter, bumped on every mutation.
    pub modcount: u64,
    /// Node kind.
    pub kind: NodeKind,
    /// For `Blob`: a single-element list holding the hex SHA-256 of the
    /// current content. For `Mergeable`: the document's CRDT head hash(es).
    /// Empty before first write.
    pub heads: Vec<String>,
}

impl FileRecord {
    /// A freshly created record of the given kind, with `modcount = 1`
    /// (matching the reference implementation's `getOrCreate`, which bumps
    /// the counter once on creation).
    pub fn new(kind: NodeKind, perm: u32) -> Self {
        Self {
            perm,
            size: 0,
            modtime: Utc::now(),
            modcount: 1,
            kind,
            heads: Vec::new(),
        }
    }

    /// Effective modification time reported to clients: `modtime`
    /// truncated to whole seconds, plus `modcount` nanoseconds (§3.2). Any
    /// metadata mutation - including an earlier-timestamped remote edit -
    /// therefore strictly changes the reported value.
    pub fn effective_modtime(&self) -> DateTime<Utc> {
        let truncated = self.modtime.timestamp();
        DateTime::from_timestamp(truncated, (self.modcount % 1_000_000_000) as u32)
            .unwrap_or(self.modtime)
    }

    /// True iff this record describes a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Folder)
    }
}

/// The namespace + metadata CRDT, backed by a yrs document.
pub struct MetadataDocument {
    doc: Doc,
    files: MapRef,
    folders: MapRef,
}

impl MetadataDocument {
    /// Construct a brand-new document with just the root folder.
    pub fn init() -> Self {
        let doc = Doc::new();
        let files = doc.get_or_insert_map(FILES_MAP);
        let folders = doc.get_or_insert_map(FOLDERS_MAP);

        {
            let mut txn = doc.transact_mut();
            let root = FileRecord::new(NodeKind::Folder, 0o777);
            let root_json = serde_json::to_string(&root).expect("FileRecord always serializes");
            files.insert(&mut txn, NodeId::root().as_str(), root_json);

            let empty_children: BTreeMap<String, NodeId> = BTreeMap::new();
            let children_json =
                serde_json::to_string(&empty_children).expect("map always serializes");
            folders.insert(&mut txn, NodeId::root().as_str(), children_json);
        }

        Self { doc, files, folders }
    }

    /// Load a document from a full snapshot previously produced by
    /// [`MetadataDocument::to_bytes`]. Callers that get `Ok(None)` back from
    /// disk (file absent) should use [`MetadataDocument::init`] instead
    /// (§3.5: "loaded once at startup, or initialized if absent").
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            let update = Update::decode_v1(bytes)
                .map_err(|e| AmfsError::Integrity(format!("corrupt metadata document: {e}")))?;
            txn.apply_update(update)
                .map_err(|e| AmfsError::Integrity(format!("cannot apply metadata update: {e}")))?;
        }
        let files = doc.get_or_insert_map(FILES_MAP);
        let folders = doc.get_or_insert_map(FOLDERS_MAP);

        let loaded = Self { doc, files, folders };
        if loaded.get_file(&NodeId::root()).is_none() {
            return Err(AmfsError::Integrity(
                "metadata document is missing the root folder".to_string(),
            ));
        }
        Ok(loaded)
    }

    /// Serialize the full current state of the document (a snapshot, not an
    /// incremental update - the persisted layout (§6.1) keeps one file per
    /// document, not an update log).
    pub fn to_bytes(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Look up a node's record.
    pub fn get_file(&self, id: &NodeId) -> Option<FileRecord> {
        let txn = self.doc.transact();
        self.files
            .get(&txn, id.as_str())
            .and_then(|v| serde_json::from_str(&v.to_string(&txn)).ok())
    }

    /// Look up a folder's children (name -> child id), if `id` is a folder.
    pub fn get_children(&self, id: &NodeId) -> Option<BTreeMap<String, NodeId>> {
        let txn = self.doc.transact();
        self.folders
            .get(&txn, id.as_str())
            .and_then(|v| serde_json::from_str(&v.to_string(&txn)).ok())
    }

    /// Resolve a single child of `parent` by name, if any.
    pub fn get_child(&self, parent: &NodeId, name: &str) -> Option<NodeId> {
        self.get_children(parent).and_then(|m| m.get(name).cloned())
    }

    pub(crate) fn files_map(&self) -> &MapRef {
        &self.files
    }

    pub(crate) fn folders_map(&self) -> &MapRef {
        &self.folders
    }

    pub(crate) fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Read a node's record within an already-open transaction. Used by the
    /// transaction builder so a read-modify-write cycle happens under one
    /// CRDT transaction instead of three.
    pub(crate) fn read_record_in<T: ReadTxn>(&self, txn: &T, id: &NodeId) -> Option<FileRecord> {
        self.files
            .get(txn, id.as_str())
            .and_then(|v| serde_json::from_str(&v.to_string(txn)).ok())
    }

    pub(crate) fn write_record_in(&self, txn: &mut TransactionMut, id: &NodeId, record: &FileRecord) {
        let json = serde_json::to_string(record).expect("FileRecord always serializes");
        self.files.insert(txn, id.as_str(), json);
    }

    pub(crate) fn read_children_in<T: ReadTxn>(
        &self,
        txn: &T,
        id: &NodeId,
    ) -> BTreeMap<String, NodeId> {
        self.folders
            .get(txn, id.as_str())
            .and_then(|v| serde_json::from_str(&v.to_string(txn)).ok())
            .unwrap_or_default()
    }

    pub(crate) fn write_children_in(
        &self,
        txn: &mut TransactionMut,
        id: &NodeId,
        children: &BTreeMap<String, NodeId>,
    ) {
        let json = serde_json::to_string(children).expect("map always serializes");
        self.folders.insert(txn, id.as_str(), json);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_root_folder() {
        let doc = MetadataDocument::init();
        let root = doc.get_file(&NodeId::root()).expect("root exists");
        assert!(root.is_dir());
        assert_eq!(doc.get_children(&NodeId::root()), Some(BTreeMap::new()));
    }

    #[test]
    fn round_trips_through_bytes() {
        let doc = MetadataDocument::init();
        let bytes = doc.to_bytes();
        let reloaded = MetadataDocument::from_bytes(&bytes).unwrap();
        assert!(reloaded.get_file(&NodeId::root()).unwrap().is_dir());
    }

    #[test]
    fn effective_modtime_changes_with_modcount() {
        let mut record = FileRecord::new(NodeKind::Blob, 0o666);
        let t1 = record.effective_modtime();
        record.modcount += 1;
        let t2 = record.effective_modtime();
        assert_ne!(t1, t2);
    }
}
