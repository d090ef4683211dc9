//! File content, stored as `chunks/<ino>/<offset> -> bytes`.
//!
//! Offsets are big-endian keys, so a cursor over an inode's bucket yields its
//! chunks in ascending offset order and a range scan can stop at the first
//! chunk that starts past the range.
//!
//! Two behaviors here are observable by callers:
//! - a write that overlaps an existing chunk deletes that whole chunk, including
//!   the bytes outside the written range;
//! - a read over a range that no chunk touches returns nothing, even when the
//!   range lies inside the file size, while a write past end of file fills the
//!   hole with one real zero chunk.

use core::cmp::{max, min};

use jammdb::{Bucket, Data, Tx};

use crate::{
    common::{be_key, be_u64, VtfsError, VtfsResult},
    models::{Chunk, Inode},
    CHUNK_SIZE,
};

pub const CHUNK_BUCKET: &str = "chunks";

/// Largest hole a single write may fill with zeros.
pub const MAX_ZERO_FILL: u64 = 16 << 20;

/// Upper bound on the length of any stored chunk.
const MAX_CHUNK_SPAN: u64 = if MAX_ZERO_FILL > CHUNK_SIZE as u64 {
    MAX_ZERO_FILL
} else {
    CHUNK_SIZE as u64
};

pub struct ChunkStore<'b, 'tx> {
    chunks: Bucket<'b, 'tx>,
}

impl<'b, 'tx> ChunkStore<'b, 'tx> {
    pub fn open(tx: &'b Tx<'tx>) -> VtfsResult<Self> {
        Ok(Self {
            chunks: tx.get_bucket(CHUNK_BUCKET)?,
        })
    }

    fn file(&self, ino: u64) -> VtfsResult<Option<Bucket<'b, 'tx>>> {
        match self.chunks.get_bucket(be_key(ino)) {
            Ok(b) => Ok(Some(b)),
            Err(jammdb::Error::BucketMissing) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Calls `f(offset, bytes)` for every chunk intersecting `[start, end)`,
    /// ascending by offset.
    fn visit<F>(&self, ino: u64, start: u64, end: u64, mut f: F) -> VtfsResult<()>
    where
        F: FnMut(u64, &[u8]) -> VtfsResult<()>,
    {
        let Some(file) = self.file(ino)? else {
            return Ok(());
        };
        // No chunk is longer than MAX_CHUNK_SPAN, so one straddling `start`
        // begins at most that far before it.
        let mut cursor = file.cursor();
        cursor.seek(be_key(start.saturating_sub(MAX_CHUNK_SPAN)));
        for data in cursor {
            if let Data::KeyValue(kv) = data {
                let offset = be_u64(kv.key())?;
                if offset >= end {
                    break;
                }
                let bytes = kv.value();
                if offset + bytes.len() as u64 > start {
                    f(offset, bytes)?;
                }
            }
        }
        Ok(())
    }

    /// Chunks intersecting `[start, end)`, ascending by offset.
    pub fn in_range(&self, ino: u64, start: u64, end: u64) -> VtfsResult<Vec<Chunk>> {
        let mut hits = Vec::new();
        self.visit(ino, start, end, |offset, bytes| {
            hits.push(Chunk {
                offset,
                data: bytes.to_vec(),
            });
            Ok(())
        })?;
        Ok(hits)
    }

    /// Every chunk of the file, ascending by offset.
    pub fn all(&self, ino: u64) -> VtfsResult<Vec<Chunk>> {
        self.in_range(ino, 0, u64::MAX)
    }

    pub fn put(&self, ino: u64, offset: u64, bytes: &[u8]) -> VtfsResult<()> {
        let file = self.chunks.get_or_create_bucket(be_key(ino))?;
        file.put(be_key(offset), bytes.to_vec())?;
        Ok(())
    }

    pub fn remove(&self, ino: u64, offset: u64) -> VtfsResult<()> {
        let file = self.file(ino)?.ok_or(VtfsError::NotFound)?;
        match file.delete(be_key(offset)) {
            Ok(_) => Ok(()),
            Err(jammdb::Error::KeyValueMissing) => Err(VtfsError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every chunk of the file.
    pub fn remove_all(&self, ino: u64) -> VtfsResult<()> {
        match self.chunks.delete_bucket(be_key(ino)) {
            Ok(()) | Err(jammdb::Error::BucketMissing) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every chunk intersecting `[start, end)` in full, and returns how
    /// many were dropped.
    pub fn remove_overlapping(&self, ino: u64, start: u64, end: u64) -> VtfsResult<usize> {
        let mut doomed = Vec::new();
        self.visit(ino, start, end, |offset, _| {
            doomed.push(offset);
            Ok(())
        })?;
        for offset in &doomed {
            self.remove(ino, *offset)?;
        }
        Ok(doomed.len())
    }

    /// Stores `bytes` at `offset` as consecutive chunks of at most
    /// `CHUNK_SIZE` bytes.
    fn put_split(&self, ino: u64, offset: u64, bytes: &[u8]) -> VtfsResult<()> {
        let mut at = offset;
        for piece in bytes.chunks(CHUNK_SIZE) {
            self.put(ino, at, piece)?;
            at += piece.len() as u64;
        }
        Ok(())
    }

    /// Materializes `[start, end)` as a single zero chunk.
    fn fill_zeros(&self, ino: u64, start: u64, end: u64) -> VtfsResult<()> {
        let gap = end - start;
        if gap > MAX_ZERO_FILL {
            return Err(VtfsError::OutOfMemory);
        }
        self.put(ino, start, &vec![0u8; gap as usize])
    }

    /// Writes `data` at `offset` and updates `inode.size`. The caller holds the
    /// inode lock and persists the inode afterwards.
    pub fn write(
        &self,
        inode: &mut Inode,
        offset: u64,
        data: &[u8],
        max_file_size: Option<u64>,
    ) -> VtfsResult<u64> {
        let len = data.len() as u64;
        let write_end = offset.checked_add(len).ok_or(VtfsError::OutOfSpace)?;
        if matches!(max_file_size, Some(limit) if write_end > limit) {
            return Err(VtfsError::OutOfSpace);
        }

        if offset > inode.size {
            self.fill_zeros(inode.ino, inode.size, offset)?;
            inode.size = offset;
        }

        if !data.is_empty() {
            self.remove_overlapping(inode.ino, offset, write_end)?;
        }
        self.put_split(inode.ino, offset, data)?;

        inode.size = max(inode.size, write_end);
        Ok(len)
    }

    /// Reads up to `len` bytes at `offset`, clipped to the file size.
    pub fn read(&self, inode: &Inode, offset: u64, len: u32) -> VtfsResult<Vec<u8>> {
        if offset >= inode.size {
            return Ok(Vec::new());
        }
        let end = min(offset.saturating_add(len as u64), inode.size);

        let chunks = self.in_range(inode.ino, offset, end)?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; (end - offset) as usize];
        for chunk in chunks.iter().filter(|c| c.intersects(offset, end)) {
            let from = max(chunk.offset, offset);
            let to = min(chunk.end(), end);
            let src = (from - chunk.offset) as usize..(to - chunk.offset) as usize;
            let dst = (from - offset) as usize..(to - offset) as usize;
            buf[dst].copy_from_slice(&chunk.data[src]);
        }
        Ok(buf)
    }
}
