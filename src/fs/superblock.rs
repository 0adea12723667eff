//! The superblock: magic plus the two free counters.
//!
//! The counters mirror the population of 1-bits in the bitmaps at all
//! times; an update that would leave `[0, N]` is refused before anything
//! is written.

use core::mem;

use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::disk::Disk;
use crate::error::{FsError, Result};
use crate::param::{BSIZE, NBLOCKS, NINODES};

use super::MiniFs;

#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes)]
pub struct Superblock {
    /// Must be FSMAGIC.
    pub magic: i32,

    /// Data blocks currently free.
    pub n_free_blocks: i32,

    /// Inodes currently free.
    pub n_free_inodes: i32,
}

const_assert!(mem::size_of::<Superblock>() <= BSIZE);

/// Blocks needed to hold `size` bytes, rounded up.
pub fn blocks_needed(size: usize) -> usize {
    (size + BSIZE - 1) / BSIZE
}

impl<D: Disk> MiniFs<D> {
    pub(super) fn superblock(&self) -> Result<Superblock> {
        let mut sb = Superblock::new_zeroed();
        self.disk.read_at(sb.as_bytes_mut(), 0)?;
        Ok(sb)
    }

    pub(super) fn write_superblock(&mut self, sb: &Superblock) -> Result<()> {
        self.disk.write_at(sb.as_bytes(), 0)?;
        Ok(())
    }

    /// Applies deltas to the free counters. One call is one atomic step:
    /// either both counters persist or neither does.
    pub(super) fn update_superblock(
        &mut self,
        delta_blocks: i32,
        delta_inodes: i32,
    ) -> Result<()> {
        let mut sb = self.superblock()?;
        let n_free_blocks = sb.n_free_blocks + delta_blocks;
        let n_free_inodes = sb.n_free_inodes + delta_inodes;
        if n_free_blocks < 0 {
            return Err(FsError::NoSpaceBlocks);
        }
        if n_free_inodes < 0 {
            return Err(FsError::NoSpaceInodes);
        }
        // Counters can only run over N when something was freed twice.
        if n_free_blocks > NBLOCKS as i32 || n_free_inodes > NINODES as i32 {
            return Err(FsError::CorruptedDisk);
        }
        sb.n_free_blocks = n_free_blocks;
        sb.n_free_inodes = n_free_inodes;
        self.write_superblock(&sb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_needed_rounds_up() {
        assert_eq!(blocks_needed(0), 0);
        assert_eq!(blocks_needed(1), 1);
        assert_eq!(blocks_needed(BSIZE), 1);
        assert_eq!(blocks_needed(BSIZE + 1), 2);
        assert_eq!(blocks_needed(3000), 3);
    }
}
