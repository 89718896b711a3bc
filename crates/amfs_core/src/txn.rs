//! Transaction builder (§4.1): stages an ordered list of primitive edits
//! against the metadata document and commits them as a single CRDT change.

use chrono::Utc;

use crate::error::{AmfsError, Result};
use crate::ids::NodeId;
use crate::metadata::{FileRecord, MetadataDocument, NodeKind};

/// One staged edit. Every primitive is expressed in terms of `set`, `inc`
/// or `del` against a path rooted at `files[id]...` or `folders[id]...`
/// (§4.1), specialized to the handful of shapes the engine actually needs.
enum Primitive {
    /// `set(files, id)` - insert a brand new file/folder record.
    CreateFile(NodeId, FileRecord),
    /// `set(folders, id)` - initialize an (empty) folder's children map.
    CreateFolder(NodeId),
    /// `set(files, id, perm)`
    SetPerm(NodeId, u32),
    /// `set(files, id, size)`
    SetSize(NodeId, u64),
    /// `set(files, id, modtime)`
    SetModTime(NodeId),
    /// `inc(files, id, modcount)`
    IncModCount(NodeId),
    /// `set(files, id, type)`
    SetKind(NodeId, NodeKind),
    /// `set(files, id, heads)`
    SetHeads(NodeId, Vec<String>),
    /// `set(folders, parent, name)` - link a child under a new name.
    LinkChild(NodeId, String, NodeId),
    /// `del(folders, parent, name)` - unlink a child.
    UnlinkChild(NodeId, String),
}

/// Stages primitive edits and commits them atomically against a
/// [`MetadataDocument`] (§4.1). Borrows the document for its lifetime so
/// that staging, CRDT commit, and persistence happen under one critical
/// section - callers hold the engine's exclusive lock across the builder's
/// entire lifetime (§5, §9).
pub struct Transaction<'a> {
    doc: &'a MetadataDocument,
    ops: Vec<Primitive>,
}

impl<'a> Transaction<'a> {
    /// Start a new, empty transaction against `doc`.
    pub fn new(doc: &'a MetadataDocument) -> Self {
        Self { doc, ops: Vec::new() }
    }

    /// Stage creation of a new node's record.
    pub fn create_file(mut self, id: NodeId, record: FileRecord) -> Self {
        self.ops.push(Primitive::CreateFile(id, record));
        self
    }

    /// Stage initialization of a folder's (empty) children map.
    pub fn create_folder(mut self, id: NodeId) -> Self {
        self.ops.push(Primitive::CreateFolder(id));
        self
    }

    /// Stage `perm = value`.
    pub fn set_perm(mut self, id: NodeId, perm: u32) -> Self {
        self.ops.push(Primitive::SetPerm(id, perm));
        self
    }

    /// Stage `size = value`.
    pub fn set_size(mut self, id: NodeId, size: u64) -> Self {
        self.ops.push(Primitive::SetSize(id, size));
        self
    }

    /// Stage `modtime = now()`.
    pub fn touch_modtime(mut self, id: NodeId) -> Self {
        self.ops.push(Primitive::SetModTime(id));
        self
    }

    /// Stage `modcount += 1`.
    pub fn inc_modcount(mut self, id: NodeId) -> Self {
        self.ops.push(Primitive::IncModCount(id));
        self
    }

    /// Stage `type = value`.
    pub fn set_kind(mut self, id: NodeId, kind: NodeKind) -> Self {
        self.ops.push(Primitive::SetKind(id, kind));
        self
    }

    /// Stage `heads = value`.
    pub fn set_heads(mut self, id: NodeId, heads: Vec<String>) -> Self {
        self.ops.push(Primitive::SetHeads(id, heads));
        self
    }

    /// Stage linking `name -> child` under `parent`'s children map.
    pub fn link_child(mut self, parent: NodeId, name: String, child: NodeId) -> Self {
        self.ops.push(Primitive::LinkChild(parent, name, child));
        self
    }

    /// Stage removing `name` from `parent`'s children map.
    pub fn unlink_child(mut self, parent: NodeId, name: String) -> Self {
        self.ops.push(Primitive::UnlinkChild(parent, name));
        self
    }

    /// Apply staged primitives and commit the CRDT change, but do not
    /// persist to disk. Used for the sync path's in-memory scratch
    /// documents (§4.1).
    pub fn commit_only(self) -> Result<()> {
        let mut txn = self.doc.doc().transact_mut();

        for op in &self.ops {
            apply(self.doc, &mut txn, op)?;
        }
        drop(txn);
        Ok(())
    }

    /// Apply staged primitives, commit the CRDT change, then persist the
    /// document's full state via `persist`. Either every primitive is
    /// applied and durable, or - if `persist` fails - the caller observes
    /// an error even though the in-memory document already reflects the
    /// change (§4.1 names this a best-effort contract: the CRDT commit and
    /// the disk write are sequential, not one atomic unit, matching the
    /// reference engine's write-then-report behavior).
    pub fn commit(self, persist: impl FnOnce(&[u8]) -> Result<()>) -> Result<()> {
        let doc = self.doc;
        self.commit_only()?;
        persist(&doc.to_bytes())
    }
}

/// Apply one staged primitive against an open transaction.
fn apply(
    doc: &MetadataDocument,
    txn: &mut yrs::TransactionMut,
    op: &Primitive,
) -> Result<()> {
    match op {
        Primitive::CreateFile(id, record) => {
            doc.write_record_in(txn, id, record);
        }
        Primitive::CreateFolder(id) => {
            doc.write_children_in(txn, id, &Default::default());
        }
        Primitive::SetPerm(id, perm) => {
            let mut record = require_record(doc, txn, id)?;
            record.perm = *perm;
            doc.write_record_in(txn, id, &record);
        }
        Primitive::SetSize(id, size) => {
            let mut record = require_record(doc, txn, id)?;
            record.size = *size;
            doc.write_record_in(txn, id, &record);
        }
        Primitive::SetModTime(id) => {
            let mut record = require_record(doc, txn, id)?;
            record.modtime = Utc::now();
            doc.write_record_in(txn, id, &record);
        }
        Primitive::IncModCount(id) => {
            let mut record = require_record(doc, txn, id)?;
            record.modcount += 1;
            doc.write_record_in(txn, id, &record);
        }
        Primitive::SetKind(id, kind) => {
            let mut record = require_record(doc, txn, id)?;
            record.kind = *kind;
            doc.write_record_in(txn, id, &record);
        }
        Primitive::SetHeads(id, heads) => {
            let mut record = require_record(doc, txn, id)?;
            record.heads = heads.clone();
            doc.write_record_in(txn, id, &record);
        }
        Primitive::LinkChild(parent, name, child) => {
            let mut children = doc.read_children_in(&*txn, parent);
            children.insert(name.clone(), child.clone());
            doc.write_children_in(txn, parent, &children);
        }
        Primitive::UnlinkChild(parent, name) => {
            let mut children = doc.read_children_in(&*txn, parent);
            children.remove(name);
            doc.write_children_in(txn, parent, &children);
        }
    }
    Ok(())
}

fn require_record(
    doc: &MetadataDocument,
    txn: &yrs::TransactionMut,
    id: &NodeId,
) -> Result<FileRecord> {
    doc.read_record_in(txn, id)
        .ok_or_else(|| AmfsError::Invalid(format!("no such node: {id}")))
}
