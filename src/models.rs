use serde::{Deserialize, Serialize};

use crate::common::{FileKind, FileMode};

/// Inode record stored as the value of the `inodes` bucket
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Inode {
    pub ino: u64,
    pub mode: u32,  // type + permission bits
    pub size: u64,  // meaningful for regular files only
    pub nlink: u32, // directory entries referencing this inode
}

impl Inode {
    pub fn file_mode(&self) -> FileMode {
        FileMode::from_bits_truncate(self.mode)
    }

    pub fn kind(&self) -> Option<FileKind> {
        self.file_mode().kind()
    }

    pub fn is_regular(&self) -> bool {
        self.kind() == Some(FileKind::RegularFile)
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == Some(FileKind::Directory)
    }
}

/// One stored slice of a file's content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    /// Whether `[offset, end)` of this chunk shares a byte with `[start, end)`.
    pub fn intersects(&self, start: u64, end: u64) -> bool {
        self.offset < end && self.end() > start
    }
}

/// A directory child as returned by `list`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: u64,
    pub mode: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Listing {
    /// Children of a directory.
    Directory(Vec<DirEntry>),
    /// Every name that references a file inode.
    HardLinks(Vec<String>),
}

impl Listing {
    pub fn len(&self) -> usize {
        match self {
            Listing::Directory(entries) => entries.len(),
            Listing::HardLinks(names) => names.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<&str> {
        match self {
            Listing::Directory(entries) => entries.iter().map(|e| e.name.as_str()).collect(),
            Listing::HardLinks(names) => names.iter().map(String::as_str).collect(),
        }
    }
}
