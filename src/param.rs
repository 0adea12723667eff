//! Fixed filesystem parameters. The on-disk format is defined entirely by
//! the constants in this module; changing any of them changes the image
//! format.

/// Block size in bytes.
pub const BSIZE: usize = 1024;

/// Number of data blocks (the data region only, not the metadata blocks).
pub const NBLOCKS: usize = 128;

/// Number of inodes.
pub const NINODES: usize = 128;

/// On-disk inode record size in bytes.
pub const INODE_SIZE: usize = 128;

/// Direct block pointers per inode.
pub const NDIRECT: usize = 22;

/// Filename length including the NUL terminator.
pub const DIRSIZ: usize = 28;

/// Superblock magic.
pub const FSMAGIC: i32 = 13371488;

/// Root inode id. Allocated at mkfs time, never removed.
pub const ROOTINO: u32 = 0;

/// Maximum bytes in a regular file, one data block per direct pointer.
pub const MAXFILE: usize = NDIRECT * BSIZE;

/// Byte offset of the block bitmap. Each bitmap occupies a whole block even
/// though it only needs `N / 8` bytes; the tail bits stay 1.
pub const BMAP_OFFSET: u64 = BSIZE as u64;

/// Byte offset of the inode bitmap.
pub const IMAP_OFFSET: u64 = 2 * BSIZE as u64;

/// Byte offset of the inode table.
pub const ITABLE_OFFSET: u64 = 3 * BSIZE as u64;

/// Byte offset of the data region.
pub const DATA_OFFSET: u64 = ITABLE_OFFSET + (NINODES * INODE_SIZE) as u64;

/// Total image size:
/// [ superblock | block bitmap | inode bitmap | inode table | data blocks ]
pub const DISK_SIZE: usize = 3 * BSIZE + NINODES * INODE_SIZE + NBLOCKS * BSIZE;

/// Upper bound on an absolute path: the deepest tree is a chain of
/// `NINODES - 1` directories under the root, each name followed by a slash,
/// plus the terminator and some slack.
pub const MAXPATH: usize = (NINODES - 1) * DIRSIZ + NINODES + 3;
