//! MiniFS: a toy POSIX-style filesystem held inside a single backing
//! file, served over a line-oriented TCP protocol to concurrent clients.
//!
//! The interesting part is the engine in [`fs`]: the on-disk layout
//! (superblock, two bitmaps, inode table, data region), the allocators,
//! the inode/directory state machine, path resolution and refcounted
//! recursive teardown. [`server`] wraps it in a reader/writer lock and
//! the wire protocol; [`disk`] abstracts the backing store so a regular
//! file, the minifs character device and an in-memory buffer are all
//! interchangeable.

pub mod bits;
pub mod disk;
pub mod error;
pub mod fs;
pub mod param;
pub mod protocol;
pub mod server;

pub use error::{FsError, Result};
pub use fs::{FileType, MiniFs, Session};
