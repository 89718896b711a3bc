//! Mergeable documents (§4.4, §4.7): one per collaboratively-edited file,
//! holding a `content` text CRDT. Persisted one serialized document per
//! `NodeId` (§6.1).

use std::path::{Path, PathBuf};

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, Map, MapRef, StateVector, Text, TextRef, Transact, Update};

use crate::blobstore::BlobStore;
use crate::error::{AmfsError, Result};
use crate::ids::NodeId;
use crate::sync_wire::SyncMessage;

/// A per-file CRDT document whose `content` attribute is a text CRDT.
pub struct MergeableDoc {
    doc: Doc,
    content: TextRef,
    #[allow(dead_code)]
    meta: MapRef,
}

impl MergeableDoc {
    /// Build a brand new document seeding `content` with `initial` text and
    /// `meta.type = "text"` (§4.7's OPEN semantics for promoting a Blob).
    pub fn new_with_text(initial: &str) -> Self {
        let doc = Doc::new();
        let content = doc.get_or_insert_text("content");
        let meta = doc.get_or_insert_map("meta");
        {
            let mut txn = doc.transact_mut();
            if !initial.is_empty() {
                content.insert(&mut txn, 0, initial);
            }
            meta.insert(&mut txn, "type", "text");
        }
        Self { doc, content, meta }
    }

    /// Load a document from bytes previously produced by [`MergeableDoc::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            let update = Update::decode_v1(bytes)
                .map_err(|e| AmfsError::Crdt(format!("corrupt mergeable document: {e}")))?;
            txn.apply_update(update)
                .map_err(|e| AmfsError::Crdt(format!("cannot apply mergeable update: {e}")))?;
        }
        let content = doc.get_or_insert_text("content");
        let meta = doc.get_or_insert_map("meta");
        Ok(Self { doc, content, meta })
    }

    /// Full snapshot of the current state.
    pub fn to_bytes(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// The current text of the `content` attribute.
    pub fn content(&self) -> String {
        let txn = self.doc.transact();
        self.content.get_string(&txn)
    }

    /// A content-derived head hash, used as `heads[0]` in the metadata
    /// record (§3.2's "for Mergeable, the document's CRDT head hash(es)").
    /// yrs does not expose automerge-style per-change hashes, so the
    /// document's full encoded state is hashed instead - stable and
    /// sufficient to detect "did the document change" for clients.
    pub fn head_hash(&self) -> String {
        BlobStore::digest_of(&self.to_bytes())
    }

    pub(crate) fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Insert `text` at position `at` in the `content` attribute - a local
    /// edit a peer makes before generating an outbound `SYNC` message
    /// (§8 scenario 5: "make a local edit").
    pub fn insert_text(&self, at: u32, text: &str) {
        let mut txn = self.doc.transact_mut();
        self.content.insert(&mut txn, at, text);
    }
}

/// Tracks one peer's sync progress against a single [`MergeableDoc`]
/// (§4.7's "Per-connection state: a mapping `NodeId -> SyncState`").
pub struct SyncSession {
    document: MergeableDoc,
    peer_state_vector: Option<yrs::StateVector>,
    sent_initial_request: bool,
}

impl SyncSession {
    /// Start a session wrapping an already-open document.
    pub fn new(document: MergeableDoc) -> Self {
        Self {
            document,
            peer_state_vector: None,
            sent_initial_request: false,
        }
    }

    /// Borrow the underlying document (e.g. to extract `content` for a
    /// metadata commit).
    pub fn document(&self) -> &MergeableDoc {
        &self.document
    }

    /// Merge an inbound `SYNC` payload into the document. A payload may
    /// pack several sync messages back to back (§4.7).
    pub fn receive(&mut self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }
        for message in SyncMessage::decode_all(payload)? {
            match message {
                SyncMessage::SyncStep1(remote_sv) => {
                    let sv = yrs::StateVector::decode_v1(&remote_sv)
                        .map_err(|e| AmfsError::Crdt(format!("bad state vector: {e}")))?;
                    self.peer_state_vector = Some(sv);
                }
                SyncMessage::SyncStep2(update) | SyncMessage::Update(update) => {
                    if update.is_empty() {
                        continue;
                    }
                    let decoded = Update::decode_v1(&update)
                        .map_err(|e| AmfsError::Crdt(format!("bad sync update: {e}")))?;
                    let mut txn = self.document.doc.transact_mut();
                    txn.apply_update(decoded)
                        .map_err(|e| AmfsError::Crdt(format!("cannot apply sync update: {e}")))?;
                }
            }
        }
        Ok(())
    }

    /// Produce the next outbound `SYNC` message. Empty bytes mean "no
    /// further delta" (§4.7) - valid and expected once both sides have
    /// converged.
    ///
    /// The very first call (per session) announces our state vector via a
    /// `SyncStep1` so the peer can tell us what we're missing, *and* bundles
    /// our entire current state as an `Update` - we don't yet know what the
    /// peer already has, so sending it all lets a single exchange converge
    /// rather than waiting for a second round-trip (applying already-known
    /// ops is a no-op for a CRDT). Once we know the peer's state vector -
    /// from a `SyncStep1` it sent us - subsequent calls send only the
    /// incremental diff against it.
    pub fn generate(&mut self) -> Vec<u8> {
        let mut buf = Vec::new();

        if !self.sent_initial_request {
            self.sent_initial_request = true;
            let txn = self.document.doc.transact();
            let sv = txn.state_vector().encode_v1();
            buf.extend(SyncMessage::SyncStep1(sv).encode());
            let full = txn.encode_state_as_update_v1(&StateVector::default());
            drop(txn);
            if !full.is_empty() {
                buf.extend(SyncMessage::Update(full).encode());
            }
        }

        if let Some(peer_sv) = &self.peer_state_vector {
            let txn = self.document.doc.transact();
            let diff = txn.encode_state_as_update_v1(peer_sv);
            if !diff.is_empty() {
                buf.extend(SyncMessage::SyncStep2(diff).encode());
            }
        }

        buf
    }
}

/// Directory of persisted per-file mergeable documents, one file per
/// `NodeId` (§4.4, §6.1).
#[derive(Debug, Clone)]
pub struct MergeableStore {
    dir: PathBuf,
}

impl MergeableStore {
    /// Open (and create if absent) a mergeable store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Load the document for `id`.
    pub fn load(&self, id: &NodeId) -> Result<MergeableDoc> {
        let bytes = std::fs::read(self.path_for(id)).map_err(|e| {
            AmfsError::Integrity(format!("mergeable document {id} missing from store: {e}"))
        })?;
        MergeableDoc::from_bytes(&bytes)
    }

    /// Persist `doc` under `id`. Write-then-rename so a crash mid-write
    /// never leaves a half-written file visible (§4.4).
    pub fn save(&self, id: &NodeId, doc: &MergeableDoc) -> Result<()> {
        let tmp_path = self.dir.join(format!(".tmp-{id}"));
        std::fs::write(&tmp_path, doc.to_bytes())?;
        std::fs::rename(&tmp_path, self.path_for(id))?;
        Ok(())
    }

    fn path_for(&self, id: &NodeId) -> PathBuf {
        self.dir.join(id.as_str())
    }

    /// The directory backing this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_document_carries_seed_text() {
        let doc = MergeableDoc::new_with_text("hello");
        assert_eq!(doc.content(), "hello");
    }

    #[test]
    fn round_trips_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = MergeableStore::open(dir.path()).unwrap();
        let id = NodeId::new();
        let doc = MergeableDoc::new_with_text("abc");
        store.save(&id, &doc).unwrap();
        let loaded = store.load(&id).unwrap();
        assert_eq!(loaded.content(), "abc");
    }

    #[test]
    fn two_sessions_converge_after_sync_exchange() {
        // Peer A starts with "hello", peer B starts from an empty clone of
        // A's document and appends " world" locally.
        let a_doc = MergeableDoc::new_with_text("hello");
        let a_bytes = a_doc.to_bytes();
        let mut a = SyncSession::new(a_doc);

        let mut b_doc = MergeableDoc::from_bytes(&a_bytes).unwrap();
        {
            let mut txn = b_doc.doc().transact_mut();
            let content = b_doc.doc().get_or_insert_text("content");
            content.insert(&mut txn, 5, " world");
        }
        let mut b = SyncSession::new(b_doc);

        // B announces itself, A merges, and the two take turns exchanging
        // messages until both generate empty (no further delta).
        let mut msg = b.generate();
        for _ in 0..4 {
            a.receive(&msg).unwrap();
            let reply = a.generate();
            b.receive(&reply).unwrap();
            msg = b.generate();
            if reply.is_empty() && msg.is_empty() {
                break;
            }
        }

        assert_eq!(a.document().content(), "hello world");
        assert_eq!(b.document().content(), "hello world");
    }
}
