//! Directory index.
//!
//! Forward entries live in `dentries/<parent ino>` as `name -> child ino`, so a
//! name is unique per parent by construction of the bucket key space. Every
//! forward entry is mirrored in `backlinks/<child ino>` under the key
//! `parent ino ++ name`, which serves the reverse lookup used for hard-link
//! listings and for releasing all names of a destroyed inode.

use jammdb::{Bucket, Data, Tx};

use crate::{
    common::{be_key, be_u64, VtfsError, VtfsResult},
    inode_table::InodeTable,
    models::DirEntry,
};

pub const DENTRY_BUCKET: &str = "dentries";
pub const BACKLINK_BUCKET: &str = "backlinks";

/// Administrative names that never make a directory non-empty.
pub const DOT_NAMES: [&str; 2] = [".", ".."];

pub struct DirectoryIndex<'b, 'tx> {
    dentries: Bucket<'b, 'tx>,
    backlinks: Bucket<'b, 'tx>,
}

fn decode_name(raw: &[u8]) -> VtfsResult<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| VtfsError::Corrupted("directory entry name is not utf-8".into()))
}

fn backlink_key(parent: u64, name: &str) -> Vec<u8> {
    let mut key = be_key(parent);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Nested bucket lookup where a missing bucket just means "no entries yet".
fn nested<'b, 'tx>(bucket: &Bucket<'b, 'tx>, ino: u64) -> VtfsResult<Option<Bucket<'b, 'tx>>> {
    match bucket.get_bucket(be_key(ino)) {
        Ok(b) => Ok(Some(b)),
        Err(jammdb::Error::BucketMissing) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn drop_nested(bucket: &Bucket<'_, '_>, ino: u64) -> VtfsResult<()> {
    match bucket.delete_bucket(be_key(ino)) {
        Ok(()) | Err(jammdb::Error::BucketMissing) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl<'b, 'tx> DirectoryIndex<'b, 'tx> {
    pub fn open(tx: &'b Tx<'tx>) -> VtfsResult<Self> {
        Ok(Self {
            dentries: tx.get_bucket(DENTRY_BUCKET)?,
            backlinks: tx.get_bucket(BACKLINK_BUCKET)?,
        })
    }

    /// Raw `(name, ino)` pairs of a directory, ascending by name bytes.
    pub fn children_of(&self, parent: u64) -> VtfsResult<Vec<(String, u64)>> {
        let Some(dir) = nested(&self.dentries, parent)? else {
            return Ok(Vec::new());
        };
        let mut children = Vec::new();
        for data in dir.cursor() {
            if let Data::KeyValue(kv) = data {
                children.push((decode_name(kv.key())?, be_u64(kv.value())?));
            }
        }
        Ok(children)
    }

    /// Children joined with their inode modes, as shown by a directory listing.
    pub fn list_children(&self, parent: u64, inodes: &InodeTable) -> VtfsResult<Vec<DirEntry>> {
        self.children_of(parent)?
            .into_iter()
            .map(|(name, ino)| {
                let inode = inodes.get(ino).map_err(|e| match e {
                    VtfsError::NotFound => VtfsError::Corrupted(format!(
                        "entry {:?} in {} points at missing inode {}",
                        name, parent, ino
                    )),
                    other => other,
                })?;
                Ok(DirEntry {
                    name,
                    ino,
                    mode: inode.mode,
                })
            })
            .collect()
    }

    pub fn lookup(&self, parent: u64, name: &str) -> VtfsResult<u64> {
        let dir = nested(&self.dentries, parent)?.ok_or(VtfsError::NotFound)?;
        let kv = dir.get_kv(name.as_bytes().to_vec()).ok_or(VtfsError::NotFound)?;
        be_u64(kv.value())
    }

    pub fn exists(&self, parent: u64, name: &str) -> VtfsResult<bool> {
        Ok(match nested(&self.dentries, parent)? {
            Some(dir) => dir.get_kv(name.as_bytes().to_vec()).is_some(),
            None => false,
        })
    }

    pub fn count_real_children(&self, ino: u64) -> VtfsResult<usize> {
        Ok(self
            .children_of(ino)?
            .iter()
            .filter(|(name, _)| !DOT_NAMES.contains(&name.as_str()))
            .count())
    }

    /// Every `(parent, name)` pair whose entry points at `ino`.
    pub fn referencing(&self, ino: u64) -> VtfsResult<Vec<(u64, String)>> {
        let Some(links) = nested(&self.backlinks, ino)? else {
            return Ok(Vec::new());
        };
        let mut refs = Vec::new();
        for data in links.cursor() {
            if let Data::KeyValue(kv) = data {
                let key = kv.key();
                if key.len() < 8 {
                    return Err(VtfsError::Corrupted(format!("short backlink key for {}", ino)));
                }
                refs.push((be_u64(&key[..8])?, decode_name(&key[8..])?));
            }
        }
        Ok(refs)
    }

    pub fn find_names_for(&self, ino: u64) -> VtfsResult<Vec<String>> {
        Ok(self
            .referencing(ino)?
            .into_iter()
            .map(|(_, name)| name)
            .collect())
    }

    pub fn insert(&self, parent: u64, name: &str, ino: u64) -> VtfsResult<()> {
        let dir = self.dentries.get_or_create_bucket(be_key(parent))?;
        if dir.get_kv(name.as_bytes().to_vec()).is_some() {
            return Err(VtfsError::AlreadyExists);
        }
        dir.put(name.as_bytes().to_vec(), be_key(ino))?;
        let links = self.backlinks.get_or_create_bucket(be_key(ino))?;
        links.put(backlink_key(parent, name), Vec::<u8>::new())?;
        Ok(())
    }

    /// Removes one entry and returns the inode it pointed at.
    pub fn remove(&self, parent: u64, name: &str) -> VtfsResult<u64> {
        let ino = self.lookup(parent, name)?;
        let dir = nested(&self.dentries, parent)?.ok_or(VtfsError::NotFound)?;
        dir.delete(name.as_bytes().to_vec())?;
        if let Some(links) = nested(&self.backlinks, ino)? {
            match links.delete(backlink_key(parent, name)) {
                Ok(_) | Err(jammdb::Error::KeyValueMissing) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(ino)
    }

    /// Drops the entry table of a directory that is being destroyed. Callers
    /// release any remaining entries first.
    pub fn drop_directory(&self, ino: u64) -> VtfsResult<()> {
        drop_nested(&self.dentries, ino)
    }

    /// Drops the reverse-lookup table of an inode that is being destroyed.
    pub fn forget_inode(&self, ino: u64) -> VtfsResult<()> {
        drop_nested(&self.backlinks, ino)
    }
}
