//! Error kinds surfaced by the filesystem engine.
//!
//! Every kind except `CorruptedDisk` and `Io` is recoverable: the daemon
//! turns it into a `'0'` reply plus the display text and keeps serving.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug, Error)]
pub enum FsError {
    /// A path component did not resolve, or the caller does not own it.
    /// Unowned files are indistinguishable from missing ones on purpose.
    #[error("invalid path or permission denied")]
    NoSuchPath,

    #[error("not a directory")]
    NotADirectory,

    #[error("not a regular file")]
    NotARegularFile,

    #[error("file already exists")]
    AlreadyExists,

    #[error("not enough space in MiniFS")]
    NoSpaceInodes,

    #[error("not enough free blocks left in MiniFS")]
    NoSpaceBlocks,

    #[error("not enough space in directory")]
    DirectoryFull,

    #[error("file too big")]
    FileTooBig,

    #[error("permission denied")]
    PermissionDenied,

    /// The root can be neither removed nor moved.
    #[error("permission denied")]
    RefuseRoot,

    #[error("invalid filename")]
    InvalidName,

    /// Superblock magic mismatch on open, or an on-disk inconsistency (a
    /// double free, a bitmap out of step with the free counters) observed
    /// mid-operation.
    #[error("corrupted disk")]
    CorruptedDisk,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
