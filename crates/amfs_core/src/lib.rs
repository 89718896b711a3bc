//! Core engine for amfs: a CRDT-backed, network-mountable filesystem.
//!
//! The namespace and per-file metadata live in a single convergent
//! document; file content is either an immutable content-addressed blob
//! or a collaboratively-edited text CRDT synced between peers. This crate
//! implements the storage layers, the path resolver, the transaction
//! builder, the file handle engine, and the facade a mount framework (or,
//! here, the `amfs` demo binary and `amfs_sync_server`) drives.
#![warn(missing_docs)]

/// Node identifiers.
pub mod ids;

/// Error taxonomy.
pub mod error;

/// Layered configuration.
pub mod config;

/// The metadata CRDT: namespace + per-file records.
pub mod metadata;

/// Staged, atomic edits against the metadata document.
pub mod txn;

/// Content-addressed blob storage.
pub mod blobstore;

/// Persisted per-file CRDT text documents and their sync sessions.
pub mod mergeable;

/// The sync protocol's inner message envelope.
pub mod sync_wire;

/// Path resolution, including the `.amfs/=<NodeId>` escape hatch.
pub mod resolver;

/// The staging-file read/write bridge backing open handles.
pub mod handle;

/// The operations exposed to a network-filesystem framework.
pub mod facade;

/// Ties the stores and facade together into one running instance.
pub mod engine;

pub use engine::Engine;
pub use error::{AmfsError, Result};
pub use facade::{FileInfo, MountableFilesystem};
pub use ids::NodeId;
