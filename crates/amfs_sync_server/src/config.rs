//! Thin re-export of the engine's layered configuration (§6.5). The sync
//! server shares one config shape with the `amfs` demo binary so a single
//! config file/env var set drives both the data directory and the listen
//! addresses.

pub use amfs_core::config::Config;
