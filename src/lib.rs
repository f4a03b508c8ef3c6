//! Naive Disk Store: a write-behind persistence layer over LMDB.
//!
//! `NDS` extends an in-memory cache with a disk-backed "freezer" holding
//! the authoritative, full copy of the keyspace. It coordinates three
//! views of truth for each key -- the in-memory value, the dirty-set
//! marking keys awaiting flush, and the on-disk copy -- so that reads
//! always see the most recent write, writes never block foreground
//! traffic, and a crash loses at most the unflushed dirty set.
//!
//! See `DESIGN.md` in the repository root for the module-by-module
//! design rationale.

pub mod codec;
pub mod command;
pub mod config;
pub mod dirty;
pub mod disk;
pub mod error;
pub mod flush;
pub mod memstore;
pub mod runtime;
pub mod stats;

pub use codec::{ChecksummedCodec, Codec, Value};
pub use command::{dispatch, CommandReply, NdsCommand};
pub use config::{NdsConfig, NdsConfigBuilder};
pub use disk::{DeleteOutcome, DiskEngine};
pub use error::{NdsError, NdsResult};
pub use flush::{BgCompletion, RequestorId};
pub use memstore::{InMemoryStore, MemStore};
pub use runtime::{DelOutcome, NdsRuntime, WalkControl, WalkOutcome};
