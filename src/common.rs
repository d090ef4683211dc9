//! Types shared by every layer of the store: mode bits, the error enum and
//! the big-endian key helpers used for bucket keys.

use bitflags::bitflags;
use onlyerror::Error;

bitflags! {
    /// POSIX `st_mode` bits. Only regular files and directories are ever stored.
    pub struct FileMode: u32 {
        const S_IFMT = 0o170000;
        const S_IFREG = 0o100000;
        const S_IFDIR = 0o040000;

        const S_ISUID = 0o4000;
        const S_ISGID = 0o2000;
        const S_ISVTX = 0o1000;

        const S_IRUSR = 0o400;
        const S_IWUSR = 0o200;
        const S_IXUSR = 0o100;
        const S_IRGRP = 0o040;
        const S_IWGRP = 0o020;
        const S_IXGRP = 0o010;
        const S_IROTH = 0o004;
        const S_IWOTH = 0o002;
        const S_IXOTH = 0o001;

        const S_IRWXU = Self::S_IRUSR.bits | Self::S_IWUSR.bits | Self::S_IXUSR.bits;
        const S_IRWXG = Self::S_IRGRP.bits | Self::S_IWGRP.bits | Self::S_IXGRP.bits;
        const S_IRWXO = Self::S_IROTH.bits | Self::S_IWOTH.bits | Self::S_IXOTH.bits;
        const PERMISSIONS = Self::S_ISUID.bits
            | Self::S_ISGID.bits
            | Self::S_ISVTX.bits
            | Self::S_IRWXU.bits
            | Self::S_IRWXG.bits
            | Self::S_IRWXO.bits;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    RegularFile,
    Directory,
}

impl FileKind {
    fn type_bits(self) -> FileMode {
        match self {
            FileKind::RegularFile => FileMode::S_IFREG,
            FileKind::Directory => FileMode::S_IFDIR,
        }
    }
}

impl FileMode {
    /// Builds a stored mode from caller-supplied bits: the permission bits are
    /// kept, any type bits the caller passed are replaced by `kind`.
    pub fn for_kind(kind: FileKind, requested: u32) -> Self {
        kind.type_bits() | (FileMode::from_bits_truncate(requested) & FileMode::PERMISSIONS)
    }

    /// Object type encoded in the `S_IFMT` field, if it is one we store.
    pub fn kind(self) -> Option<FileKind> {
        let ty = self & FileMode::S_IFMT;
        if ty == FileMode::S_IFREG {
            Some(FileKind::RegularFile)
        } else if ty == FileMode::S_IFDIR {
            Some(FileKind::Directory)
        } else {
            None
        }
    }
}

/// Status code written into the envelope for malformed requests.
pub const STATUS_BAD_REQUEST: i64 = -400;
/// Status code written into the envelope for unexpected failures.
pub const STATUS_INTERNAL: i64 = -500;

#[derive(Debug, Error)]
pub enum VtfsError {
    #[error("entry already exists")]
    AlreadyExists,
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("operation not permitted")]
    Permission,
    #[error("out of memory")]
    OutOfMemory,
    #[error("no space left")]
    OutOfSpace,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("store error: {0}")]
    Store(#[from] jammdb::Error),
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupted record: {0}")]
    Corrupted(String),
}

pub type VtfsResult<T> = Result<T, VtfsError>;

impl VtfsError {
    /// Envelope status: positive for domain errors, negative otherwise.
    pub fn status(&self) -> i64 {
        match self {
            VtfsError::AlreadyExists => 1,
            VtfsError::NotFound => 2,
            VtfsError::NotADirectory => 3,
            VtfsError::NotEmpty => 4,
            VtfsError::Permission => 5,
            VtfsError::OutOfMemory => 6,
            VtfsError::OutOfSpace => 7,
            VtfsError::BadRequest(_) => STATUS_BAD_REQUEST,
            VtfsError::Store(_)
            | VtfsError::Codec(_)
            | VtfsError::Io(_)
            | VtfsError::Corrupted(_) => STATUS_INTERNAL,
        }
    }

    /// Precondition failures the caller is expected to handle.
    pub fn is_domain(&self) -> bool {
        self.status() > 0
    }
}

pub(crate) fn be_key(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub(crate) fn be_u64(bytes: &[u8]) -> VtfsResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| VtfsError::Corrupted(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_type_bits_are_replaced() {
        let mode = FileMode::for_kind(FileKind::RegularFile, 0o040644);
        assert_eq!(mode.bits(), 0o100644);
        assert_eq!(mode.kind(), Some(FileKind::RegularFile));

        let mode = FileMode::for_kind(FileKind::Directory, 0o100755);
        assert_eq!(mode.bits(), 0o040755);
        assert_eq!(mode.kind(), Some(FileKind::Directory));
    }

    #[test]
    fn bits_above_permissions_are_dropped() {
        let mode = FileMode::for_kind(FileKind::RegularFile, 0o7_000_644);
        assert_eq!(mode.bits(), 0o100644);
    }

    #[test]
    fn unknown_type_has_no_kind() {
        assert_eq!(FileMode::from_bits_truncate(0o120777).kind(), None);
    }

    #[test]
    fn status_classes() {
        assert_eq!(VtfsError::NotEmpty.status(), 4);
        assert!(VtfsError::Permission.is_domain());
        assert_eq!(VtfsError::Corrupted("x".into()).status(), STATUS_INTERNAL);
        assert!(!VtfsError::BadRequest("y".into()).is_domain());
    }

    #[test]
    fn be_u64_rejects_short_values() {
        assert_eq!(be_u64(&be_key(1001)).unwrap(), 1001);
        assert!(matches!(be_u64(&[1, 2, 3]), Err(VtfsError::Corrupted(_))));
    }
}
