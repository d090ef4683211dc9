//! Inode table: one JSON record per inode in the `inodes` bucket, plus the
//! allocation counter in `meta`.

use jammdb::{Bucket, Tx};

use crate::{
    common::{be_key, be_u64, FileMode, VtfsError, VtfsResult},
    lock::InodeGuard,
    models::Inode,
    ROOT_INO,
};

pub const INODE_BUCKET: &str = "inodes";
pub const META_BUCKET: &str = "meta";

/// Highest inode number handed out so far. Absent until the first allocation.
const LAST_INO_KEY: &str = "last_ino";

pub struct InodeTable<'b, 'tx> {
    inodes: Bucket<'b, 'tx>,
    meta: Bucket<'b, 'tx>,
}

impl<'b, 'tx> InodeTable<'b, 'tx> {
    pub fn open(tx: &'b Tx<'tx>) -> VtfsResult<Self> {
        Ok(Self {
            inodes: tx.get_bucket(INODE_BUCKET)?,
            meta: tx.get_bucket(META_BUCKET)?,
        })
    }

    pub fn get(&self, ino: u64) -> VtfsResult<Inode> {
        let kv = self.inodes.get_kv(be_key(ino)).ok_or(VtfsError::NotFound)?;
        let inode: Inode = serde_json::from_slice(kv.value())?;
        if inode.ino != ino {
            return Err(VtfsError::Corrupted(format!(
                "inode key {} holds record for {}",
                ino, inode.ino
            )));
        }
        Ok(inode)
    }

    /// Loads the inode the guard was taken for. Holding the guard is the proof
    /// that no other writer can touch this inode until the operation ends.
    pub fn get_for_exclusive_mutation(&self, guard: &InodeGuard) -> VtfsResult<Inode> {
        self.get(guard.ino())
    }

    pub fn contains(&self, ino: u64) -> bool {
        self.inodes.get_kv(be_key(ino)).is_some()
    }

    /// Stores a new inode under a freshly allocated number.
    pub fn create(&self, mode: FileMode, size: u64, nlink: u32) -> VtfsResult<Inode> {
        let inode = Inode {
            ino: self.allocate_ino()?,
            mode: mode.bits(),
            size,
            nlink,
        };
        self.save(&inode)?;
        Ok(inode)
    }

    /// Stores an inode under a caller-chosen number (root bootstrap). The
    /// allocation counter is moved past it so the number is never handed out.
    pub fn insert(&self, inode: &Inode) -> VtfsResult<()> {
        if self.contains(inode.ino) {
            return Err(VtfsError::AlreadyExists);
        }
        self.save(inode)?;
        if self.last_ino()? < inode.ino {
            self.meta.put(LAST_INO_KEY, be_key(inode.ino))?;
        }
        Ok(())
    }

    pub fn save(&self, inode: &Inode) -> VtfsResult<()> {
        self.inodes.put(be_key(inode.ino), serde_json::to_vec(inode)?)?;
        Ok(())
    }

    pub fn delete(&self, ino: u64) -> VtfsResult<()> {
        match self.inodes.delete(be_key(ino)) {
            Ok(_) => Ok(()),
            Err(jammdb::Error::KeyValueMissing) => Err(VtfsError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn last_ino(&self) -> VtfsResult<u64> {
        match self.meta.get_kv(LAST_INO_KEY) {
            Some(kv) => be_u64(kv.value()),
            None => Ok(ROOT_INO),
        }
    }

    fn allocate_ino(&self) -> VtfsResult<u64> {
        let next = self
            .last_ino()?
            .checked_add(1)
            .ok_or(VtfsError::OutOfSpace)?;
        self.meta.put(LAST_INO_KEY, be_key(next))?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{common::FileKind, engine::ensure_layout};

    #[test]
    fn allocation_continues_after_root() {
        let dir = tempfile::tempdir().unwrap();
        let db = jammdb::DB::open(dir.path().join("inodes.db")).unwrap();
        ensure_layout(&db).unwrap();

        let tx = db.tx(true).unwrap();
        let table = InodeTable::open(&tx).unwrap();
        let a = table
            .create(FileMode::for_kind(FileKind::RegularFile, 0o600), 0, 1)
            .unwrap();
        assert_eq!(a.ino, ROOT_INO + 1);

        table
            .insert(&Inode { ino: 5000, mode: 0o40755, size: 0, nlink: 2 })
            .unwrap();
        assert!(matches!(
            table.insert(&Inode { ino: 5000, mode: 0o40755, size: 0, nlink: 2 }),
            Err(VtfsError::AlreadyExists)
        ));
        let b = table.create(FileMode::S_IFREG, 0, 1).unwrap();
        assert_eq!(b.ino, 5001);

        table.delete(a.ino).unwrap();
        assert!(!table.contains(a.ino));
        assert!(matches!(table.get(a.ino), Err(VtfsError::NotFound)));
        assert!(matches!(table.delete(a.ino), Err(VtfsError::NotFound)));
    }

    #[test]
    fn mismatched_record_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let db = jammdb::DB::open(dir.path().join("bad.db")).unwrap();
        ensure_layout(&db).unwrap();

        let tx = db.tx(true).unwrap();
        let table = InodeTable::open(&tx).unwrap();
        let record = Inode { ino: 7, mode: 0o100644, size: 3, nlink: 1 };
        table
            .inodes
            .put(be_key(8), serde_json::to_vec(&record).unwrap())
            .unwrap();
        assert!(matches!(table.get(8), Err(VtfsError::Corrupted(_))));
    }
}
