//! vtfs: a small POSIX-like filesystem kept in an embedded jammdb database.
//!
//! Inodes, directory entries and file content live in separate buckets and
//! every operation runs as one store transaction. Callers reach the engine
//! either directly through [`FsEngine`] or through [`operation::dispatch`],
//! which speaks the status-prefixed binary envelope from [`wire`].

mod common;

pub mod auth;
pub mod chunk_store;
pub mod config;
pub mod dir_index;
pub mod engine;
pub mod inode_table;
pub mod lock;
pub mod models;
pub mod operation;
pub mod wire;


pub use common::{
    FileKind, FileMode, VtfsError, VtfsResult, STATUS_BAD_REQUEST, STATUS_INTERNAL,
};
pub use config::VtfsConfig;
pub use engine::FsEngine;
pub use models::{DirEntry, Inode, Listing};

/// Inode number of the root directory.
pub const ROOT_INO: u64 = 1000;

/// `S_IFDIR | 0o755`
pub const ROOT_MODE: u32 = 0o40755;

/// Largest piece of file content stored under a single key.
pub const CHUNK_SIZE: usize = if cfg!(feature = "sli512") {
    512
} else if cfg!(feature = "sli1k") {
    1024
} else if cfg!(feature = "sli8k") {
    8192
} else if cfg!(feature = "sli32k") {
    8192 * 2 * 2
} else {
    4096
};
