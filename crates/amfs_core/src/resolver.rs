//! Path resolution (§4.2): turns a client-supplied path into a `NodeId`,
//! walking the `folders` map segment by segment, with an escape-hatch
//! prefix for opaque, rename-stable handles.

use crate::error::{AmfsError, Result};
use crate::ids::NodeId;
use crate::metadata::MetadataDocument;

const ESCAPE_DIR: &str = ".amfs";
const ESCAPE_MARKER: &str = "=";

/// The outcome of resolving a path: either it names an existing node, or
/// it names a not-yet-existing child of an existing parent (valid only
/// when the caller is about to create something there).
pub enum Resolution {
    Found(NodeId),
    Missing { parent: NodeId, name: String },
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".").collect()
}

/// Resolve `path` against `doc`, optionally allowing the final segment to
/// be missing (for create-style operations per §4.2's "only the final
/// path segment may be absent").
pub fn resolve(doc: &MetadataDocument, path: &str, allow_missing_leaf: bool) -> Result<Resolution> {
    let segments = split_segments(path);

    if let Some(first) = segments.first() {
        if *first == ESCAPE_DIR {
            let rest = &segments[1..];
            let is_handle_form = rest
                .first()
                .map(|s| s.starts_with(ESCAPE_MARKER))
                .unwrap_or(false);
            if is_handle_form {
                return resolve_escaped(doc, rest);
            }
            // ".amfs/rest…" with no "=" marker is a plain alias for
            // resolving `rest…` starting at ROOT (§4.2).
            return walk(doc, NodeId::root(), rest, allow_missing_leaf, path);
        }
    }

    walk(doc, NodeId::root(), &segments, allow_missing_leaf, path)
}

/// Walk `segments` from `start`, creating a [`Resolution::Missing`] for an
/// absent final segment when `allow_missing_leaf` is set. `original_path` is
/// used only for the `NotFound` error message.
fn walk(
    doc: &MetadataDocument,
    start: NodeId,
    segments: &[&str],
    allow_missing_leaf: bool,
    original_path: &str,
) -> Result<Resolution> {
    let mut current = start;
    if segments.is_empty() {
        return Ok(Resolution::Found(current));
    }

    for (i, segment) in segments.iter().enumerate() {
        let is_last = i == segments.len() - 1;
        match doc.get_child(&current, segment) {
            Some(child) => current = child,
            None if is_last && allow_missing_leaf => {
                return Ok(Resolution::Missing {
                    parent: current,
                    name: (*segment).to_string(),
                });
            }
            None => {
                return Err(AmfsError::not_found(original_path));
            }
        }
    }

    Ok(Resolution::Found(current))
}

/// Handle the `.amfs/=<NodeId>[/...]` escape hatch (§4.2): the node id is
/// opaque and stable across renames, and any trailing segments are walked
/// as ordinary children from there.
fn resolve_escaped(doc: &MetadataDocument, rest: &[&str]) -> Result<Resolution> {
    let (id_segment, remaining) = rest
        .split_first()
        .ok_or_else(|| AmfsError::Invalid(format!("{ESCAPE_DIR} requires a node id segment")))?;

    let encoded = id_segment
        .strip_prefix(ESCAPE_MARKER)
        .ok_or_else(|| AmfsError::Invalid(format!("malformed {ESCAPE_DIR} segment: {id_segment}")))?;

    let id = NodeId::from_str_unchecked(encoded.to_string());
    if doc.get_file(&id).is_none() {
        return Err(AmfsError::not_found(format!("{ESCAPE_DIR}/{id_segment}")));
    }

    let mut current = id;
    for (i, segment) in remaining.iter().enumerate() {
        let is_last = i == remaining.len() - 1;
        match doc.get_child(&current, segment) {
            Some(child) => current = child,
            None if is_last => {
                return Ok(Resolution::Missing {
                    parent: current,
                    name: (*segment).to_string(),
                });
            }
            None => {
                return Err(AmfsError::not_found(format!(
                    "{ESCAPE_DIR}/{id_segment}/{}",
                    remaining.join("/")
                )));
            }
        }
    }

    Ok(Resolution::Found(current))
}

/// Build the opaque, rename-stable handle string for a node (the inverse
/// direction of the escape hatch above).
pub fn escaped_path_for(id: &NodeId) -> String {
    format!("{ESCAPE_DIR}/{ESCAPE_MARKER}{id}")
}

/// Split a path into (parent segments joined, final segment), used by
/// callers that already know the target must exist and just need its
/// parent for a rename/unlink.
pub fn split_parent(path: &str) -> Result<(String, String)> {
    let segments = split_segments(path);
    let (name, parent_segments) = segments
        .split_last()
        .ok_or_else(|| AmfsError::Invalid("path has no final segment".to_string()))?;
    Ok((parent_segments.join("/"), (*name).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::Transaction;

    fn doc_with_child(name: &str) -> (MetadataDocument, NodeId) {
        let doc = MetadataDocument::init();
        let child = NodeId::new();
        Transaction::new(&doc)
            .create_file(child.clone(), crate::metadata::FileRecord::new(crate::metadata::NodeKind::Blob, 0o644))
            .link_child(NodeId::root(), name.to_string(), child.clone())
            .commit_only()
            .unwrap();
        (doc, child)
    }

    #[test]
    fn resolves_top_level_child() {
        let (doc, child) = doc_with_child("a.txt");
        match resolve(&doc, "a.txt", false).unwrap() {
            Resolution::Found(id) => assert_eq!(id, child),
            _ => panic!("expected Found"),
        }
    }

    #[test]
    fn missing_leaf_allowed_for_create() {
        let (doc, _child) = doc_with_child("a.txt");
        match resolve(&doc, "b.txt", true).unwrap() {
            Resolution::Missing { parent, name } => {
                assert_eq!(parent, NodeId::root());
                assert_eq!(name, "b.txt");
            }
            _ => panic!("expected Missing"),
        }
    }

    #[test]
    fn missing_non_leaf_is_not_found() {
        let doc = MetadataDocument::init();
        let err = resolve(&doc, "no/such/dir", false).unwrap_err();
        assert!(matches!(err, AmfsError::NotFound(_)));
    }

    #[test]
    fn escape_hatch_resolves_by_node_id() {
        let (doc, child) = doc_with_child("a.txt");
        let escaped = escaped_path_for(&child);
        match resolve(&doc, &escaped, false).unwrap() {
            Resolution::Found(id) => assert_eq!(id, child),
            _ => panic!("expected Found"),
        }
    }

    #[test]
    fn amfs_alias_without_marker_resolves_from_root() {
        let (doc, child) = doc_with_child("a.txt");
        match resolve(&doc, ".amfs/a.txt", false).unwrap() {
            Resolution::Found(id) => assert_eq!(id, child),
            _ => panic!("expected Found"),
        }
    }

    #[test]
    fn bare_amfs_alias_resolves_to_root() {
        let doc = MetadataDocument::init();
        match resolve(&doc, ".amfs", false).unwrap() {
            Resolution::Found(id) => assert_eq!(id, NodeId::root()),
            _ => panic!("expected Found"),
        }
    }
}
