//! Filesystem operations engine.
//!
//! Every operation is one jammdb transaction: read-only operations run in a
//! snapshot, mutating ones in the single write transaction and commit only when
//! all checks passed. Returning early with an error drops the transaction,
//! which discards everything it wrote.
//!
//! `write` and `truncate` take the per-inode lock before opening their
//! transaction, so the lock order is always inode lock, then store writer.

use std::sync::Arc;

use jammdb::{Tx, DB};
use log::{debug, info};

use crate::{
    auth::TokenValidator,
    chunk_store::{ChunkStore, CHUNK_BUCKET},
    common::{FileKind, FileMode, VtfsError, VtfsResult},
    config::VtfsConfig,
    dir_index::{DirectoryIndex, BACKLINK_BUCKET, DENTRY_BUCKET},
    inode_table::{InodeTable, INODE_BUCKET, META_BUCKET},
    lock::InodeLocks,
    models::{Inode, Listing},
    ROOT_INO, ROOT_MODE,
};

/// The three repositories opened on one transaction.
pub struct Tables<'b, 'tx> {
    pub inodes: InodeTable<'b, 'tx>,
    pub dirs: DirectoryIndex<'b, 'tx>,
    pub chunks: ChunkStore<'b, 'tx>,
}

impl<'b, 'tx> Tables<'b, 'tx> {
    pub fn open(tx: &'b Tx<'tx>) -> VtfsResult<Self> {
        Ok(Self {
            inodes: InodeTable::open(tx)?,
            dirs: DirectoryIndex::open(tx)?,
            chunks: ChunkStore::open(tx)?,
        })
    }
}

/// Creates the top-level buckets if they do not exist yet.
pub fn ensure_layout(db: &DB) -> VtfsResult<()> {
    let tx = db.tx(true)?;
    for name in [
        INODE_BUCKET,
        META_BUCKET,
        DENTRY_BUCKET,
        BACKLINK_BUCKET,
        CHUNK_BUCKET,
    ] {
        tx.get_or_create_bucket(name)?;
    }
    tx.commit()?;
    Ok(())
}

pub struct FsEngine {
    db: DB,
    locks: InodeLocks,
    tokens: Arc<dyn TokenValidator>,
    max_file_size: Option<u64>,
}

impl FsEngine {
    /// Opens (or creates) the database named by the config.
    pub fn open(config: &VtfsConfig) -> VtfsResult<Self> {
        let db = DB::open(&config.db_path)?;
        let engine = Self::with_db(db, config.token_validator())?
            .with_max_file_size(config.max_file_size);
        if config.bootstrap_root {
            engine.bootstrap_root()?;
        }
        Ok(engine)
    }

    pub fn with_db(db: DB, tokens: Arc<dyn TokenValidator>) -> VtfsResult<Self> {
        ensure_layout(&db)?;
        Ok(Self {
            db,
            locks: InodeLocks::new(),
            tokens,
            max_file_size: None,
        })
    }

    pub fn with_max_file_size(mut self, limit: Option<u64>) -> Self {
        self.max_file_size = limit;
        self
    }

    pub fn locks(&self) -> &InodeLocks {
        &self.locks
    }

    /// Creates the root directory if it is missing. Returns whether it did.
    pub fn bootstrap_root(&self) -> VtfsResult<bool> {
        let created = self.update(|t| {
            if t.inodes.contains(ROOT_INO) {
                return Ok(false);
            }
            t.inodes.insert(&Inode {
                ino: ROOT_INO,
                mode: ROOT_MODE,
                size: 0,
                nlink: 2,
            })?;
            Ok(true)
        })?;
        if created {
            info!("Created root directory: ino={}, mode={:o}", ROOT_INO, ROOT_MODE);
        } else {
            debug!("Root directory ino={} already exists", ROOT_INO);
        }
        Ok(created)
    }

    fn authorize(&self, token: &str) -> VtfsResult<()> {
        if self.tokens.is_valid(token) {
            Ok(())
        } else {
            Err(VtfsError::Permission)
        }
    }

    pub(crate) fn view<T>(&self, f: impl FnOnce(&Tables<'_, '_>) -> VtfsResult<T>) -> VtfsResult<T> {
        let tx = self.db.tx(false)?;
        let tables = Tables::open(&tx)?;
        f(&tables)
    }

    fn update<T>(&self, f: impl FnOnce(&Tables<'_, '_>) -> VtfsResult<T>) -> VtfsResult<T> {
        let tx = self.db.tx(true)?;
        let out = {
            let tables = Tables::open(&tx)?;
            f(&tables)?
        };
        tx.commit()?;
        Ok(out)
    }

    /// Lists a directory (`dir_ino`) or the names of a file (`file_ino`).
    /// Exactly one of the two must be given.
    pub fn list(
        &self,
        token: &str,
        dir_ino: Option<u64>,
        file_ino: Option<u64>,
    ) -> VtfsResult<Listing> {
        self.authorize(token)?;
        self.view(|t| match (dir_ino, file_ino) {
            (Some(dir), None) => {
                if !t.inodes.get(dir)?.is_dir() {
                    return Err(VtfsError::NotADirectory);
                }
                Ok(Listing::Directory(t.dirs.list_children(dir, &t.inodes)?))
            }
            (None, Some(file)) => {
                if !t.inodes.contains(file) {
                    return Err(VtfsError::NotFound);
                }
                Ok(Listing::HardLinks(t.dirs.find_names_for(file)?))
            }
            _ => Err(VtfsError::NotFound),
        })
    }

    pub fn create(&self, token: &str, dir_ino: u64, name: &str, mode: u32) -> VtfsResult<u64> {
        self.make_node(token, dir_ino, name, mode, FileKind::RegularFile)
    }

    pub fn mkdir(&self, token: &str, dir_ino: u64, name: &str, mode: u32) -> VtfsResult<u64> {
        self.make_node(token, dir_ino, name, mode, FileKind::Directory)
    }

    fn make_node(
        &self,
        token: &str,
        dir_ino: u64,
        name: &str,
        mode: u32,
        kind: FileKind,
    ) -> VtfsResult<u64> {
        self.authorize(token)?;
        let inode = self.update(|t| {
            if !t.inodes.get(dir_ino)?.is_dir() {
                return Err(VtfsError::NotADirectory);
            }
            if t.dirs.exists(dir_ino, name)? {
                return Err(VtfsError::AlreadyExists);
            }
            let nlink = match kind {
                FileKind::RegularFile => 1,
                FileKind::Directory => 2,
            };
            let inode = t.inodes.create(FileMode::for_kind(kind, mode), 0, nlink)?;
            t.dirs.insert(dir_ino, name, inode.ino)?;
            Ok(inode)
        })?;
        info!(
            "Created {:?}: parent={}, name={}, ino={}, mode={:o}",
            kind, dir_ino, name, inode.ino, inode.mode
        );
        Ok(inode.ino)
    }

    pub fn read(&self, token: &str, file_ino: u64, offset: u64, len: u32) -> VtfsResult<Vec<u8>> {
        self.authorize(token)?;
        self.view(|t| {
            let inode = t.inodes.get(file_ino)?;
            if !inode.is_regular() {
                return Err(VtfsError::NotFound);
            }
            t.chunks.read(&inode, offset, len)
        })
    }

    pub fn write(&self, token: &str, file_ino: u64, offset: u64, data: &[u8]) -> VtfsResult<u64> {
        self.authorize(token)?;
        let guard = self.locks.lock(file_ino);
        let (written, size) = self.update(|t| {
            let mut inode = t.inodes.get_for_exclusive_mutation(&guard)?;
            if !inode.is_regular() {
                return Err(VtfsError::NotFound);
            }
            let written = t.chunks.write(&mut inode, offset, data, self.max_file_size)?;
            t.inodes.save(&inode)?;
            Ok((written, inode.size))
        })?;
        drop(guard);
        info!(
            "Written {} bytes to file ino={} at offset={}, size={}",
            written, file_ino, offset, size
        );
        Ok(written)
    }

    /// Removes one name. The inode goes away with its last name.
    pub fn delete(&self, token: &str, dir_ino: u64, name: &str) -> VtfsResult<()> {
        self.authorize(token)?;
        let (ino, remaining) = self.update(|t| {
            let ino = t.dirs.remove(dir_ino, name)?;
            Ok((ino, Self::release(t, ino)?))
        })?;
        match remaining {
            Some(nlink) => info!("Removed hard link: name={}, ino={}, remaining nlink={}", name, ino, nlink),
            None => info!("Deleted file completely: ino={}", ino),
        }
        Ok(())
    }

    pub fn rmdir(&self, token: &str, dir_ino: u64, name: &str) -> VtfsResult<()> {
        self.authorize(token)?;
        let ino = self.update(|t| {
            let ino = t.dirs.lookup(dir_ino, name)?;
            let inode = t.inodes.get(ino)?;
            if !inode.is_dir() {
                return Err(VtfsError::NotADirectory);
            }
            if t.dirs.count_real_children(ino)? > 0 {
                return Err(VtfsError::NotEmpty);
            }
            t.dirs.remove(dir_ino, name)?;
            Self::destroy(t, &inode)?;
            Ok(ino)
        })?;
        info!("Removed directory: name={}, ino={}", name, ino);
        Ok(())
    }

    /// Adds `name` in `dir_ino` as another name of the regular file `file_ino`.
    pub fn link(&self, token: &str, file_ino: u64, dir_ino: u64, name: &str) -> VtfsResult<()> {
        self.authorize(token)?;
        let nlink = self.update(|t| {
            let mut inode = t.inodes.get(file_ino)?;
            if !inode.is_regular() {
                return Err(VtfsError::Permission);
            }
            if !t.inodes.get(dir_ino)?.is_dir() {
                return Err(VtfsError::NotADirectory);
            }
            t.dirs.insert(dir_ino, name, file_ino)?;
            inode.nlink = inode.nlink.checked_add(1).ok_or(VtfsError::OutOfSpace)?;
            t.inodes.save(&inode)?;
            Ok(inode.nlink)
        })?;
        info!("Created hard link: name={}, ino={}, nlink={}", name, file_ino, nlink);
        Ok(())
    }

    /// Drops all content of a regular file and resets its size to zero.
    pub fn truncate(&self, token: &str, file_ino: u64) -> VtfsResult<()> {
        self.authorize(token)?;
        let guard = self.locks.lock(file_ino);
        self.update(|t| {
            let mut inode = t.inodes.get_for_exclusive_mutation(&guard)?;
            if !inode.is_regular() {
                return Err(VtfsError::NotFound);
            }
            t.chunks.remove_all(file_ino)?;
            inode.size = 0;
            t.inodes.save(&inode)
        })?;
        drop(guard);
        info!("Truncated file: ino={}", file_ino);
        Ok(())
    }

    pub fn size(&self, token: &str, file_ino: u64) -> VtfsResult<u64> {
        self.authorize(token)?;
        self.view(|t| Ok(t.inodes.get(file_ino)?.size))
    }

    /// Full inode record.
    pub fn stat(&self, token: &str, ino: u64) -> VtfsResult<Inode> {
        self.authorize(token)?;
        self.view(|t| t.inodes.get(ino))
    }

    /// Drops one reference to `ino`. Returns the remaining link count, or
    /// `None` if that was the last one and the inode is gone.
    fn release(t: &Tables, ino: u64) -> VtfsResult<Option<u32>> {
        let mut inode = t.inodes.get(ino).map_err(|e| match e {
            VtfsError::NotFound => VtfsError::Corrupted(format!("entry points at missing inode {}", ino)),
            other => other,
        })?;
        inode.nlink = inode.nlink.saturating_sub(1);
        if inode.nlink == 0 {
            Self::destroy(t, &inode)?;
            Ok(None)
        } else {
            t.inodes.save(&inode)?;
            Ok(Some(inode.nlink))
        }
    }

    /// Removes an inode and everything hanging off it. Entries still inside a
    /// directory (only `.`/`..` can be left) are released first, then entries
    /// naming the inode, its chunks, its backlinks and finally the record.
    fn destroy(t: &Tables, inode: &Inode) -> VtfsResult<()> {
        if inode.is_dir() {
            for (name, child) in t.dirs.children_of(inode.ino)? {
                t.dirs.remove(inode.ino, &name)?;
                if child != inode.ino {
                    Self::release(t, child)?;
                }
            }
            t.dirs.drop_directory(inode.ino)?;
        }
        for (parent, name) in t.dirs.referencing(inode.ino)? {
            t.dirs.remove(parent, &name)?;
        }
        t.chunks.remove_all(inode.ino)?;
        t.dirs.forget_inode(inode.ino)?;
        t.inodes.delete(inode.ino)
    }
}
