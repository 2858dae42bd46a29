//! error types of the filesystem engine
//!
//! Every fallible engine operation returns [Error]. The variants follow the
//! failure classes of the on-disk format: device I/O, mount-time validation,
//! exhausted inodes or directory slots, and bad names.
//!
//! [Error::to_errno] maps each variant to exactly one POSIX errno, so a host
//! integration layer can forward failures unchanged.

use thiserror::Error;

/// Unified error type for all filesystem operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The block store failed to read or write a block.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A fixed-size record could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(String),

    /// Block 0 does not carry the AUFS magic number.
    #[error("no AUFS filesystem found (magic={0:#010x})")]
    BadMagic(u32),

    /// The superblock bounds are inconsistent.
    #[error("superblock is corrupted: {0}")]
    CorruptSuperblock(String),

    /// The inode table is larger than the bitmap can describe.
    #[error("impossible last inode number {last} > {max}")]
    TooManyInodes { last: u32, max: u32 },

    /// The volume is shorter than its superblock claims.
    #[error("volume is corrupted: {0}")]
    CorruptVolume(String),

    /// An inode record points outside the volume.
    #[error("inode {0:#010x} is corrupted")]
    CorruptInode(u32),

    /// An inode number outside the inode table was requested.
    #[error("bad inode number {0:#010x}")]
    BadInodeNumber(u32),

    /// No free inode is left.
    #[error("no space left on device")]
    NoSpace,

    /// The directory extent has no free entry slot.
    #[error("no free slot left in directory")]
    NoSpaceInDirectory,

    /// Name exceeds the 14-byte limit of a directory entry.
    #[error("name too long")]
    NameTooLong,

    /// Directory entry or inode is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The target name is already taken in the directory.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory")]
    NotDirectory,

    #[error("is a directory")]
    IsDirectory,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A mutation was attempted on a read-only mount.
    #[error("read-only filesystem")]
    ReadOnly,
}

impl Error {
    /// Convert this error into a POSIX errno.
    ///
    /// The mapping is exhaustive, adding a variant without assigning its
    /// errno is a compile error.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Codec(_)
            | Self::CorruptVolume(_)
            | Self::CorruptInode(_)
            | Self::BadInodeNumber(_) => libc::EIO,
            Self::BadMagic(_)
            | Self::CorruptSuperblock(_)
            | Self::TooManyInodes { .. }
            | Self::InvalidArgument(_) => libc::EINVAL,
            Self::NoSpace | Self::NoSpaceInDirectory => libc::ENOSPC,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::NotFound(_) => libc::ENOENT,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::NotDirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
            Self::ReadOnly => libc::EROFS,
        }
    }
}

/// Result alias using [Error].
pub type Result<T> = std::result::Result<T, Error>;
