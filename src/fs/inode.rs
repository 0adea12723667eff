//! Inodes and directories.
//!
//! An inode describes a single unnamed file: its type, size, owner, link
//! count and the list of data blocks holding its content. Directories are
//! files whose content is a packed array of entries, each naming one
//! inode. Every directory holds `.` (itself) and `..` (its parent; the
//! root's `..` is the root).
//!
//! Allocation brings an inode to life with stale field contents; the
//! caller fully initialises the record before linking it anywhere.
//! `ref_count` tracks the directory entries naming the inode, excluding
//! `.` and `..` (the root is pinned at 1 so it never reaches teardown).
//! The last unlink drops the count to zero and tears the inode down:
//! regular files free their data blocks, directories recurse into every
//! child first.

use core::mem;

use zerocopy::{AsBytes, FromBytes};

use static_assertions::const_assert;

use crate::bits;
use crate::disk::Disk;
use crate::error::{FsError, Result};
use crate::param::{BSIZE, DIRSIZ, IMAP_OFFSET, INODE_SIZE, ITABLE_OFFSET, MAXFILE, NDIRECT, NINODES};

use super::block::{block_offset, is_valid_block_id};
use super::MiniFs;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(i32)]
pub enum FileType {
    Regular = 0,
    Directory = 1,
}

/// On-disk inode record. Unused direct slots hold -1.
#[repr(C)]
#[derive(Clone, AsBytes, FromBytes)]
pub struct Dinode {
    pub file_type: i32,
    pub size: i32,
    pub user_id: i32,
    pub ref_count: i32,
    pub direct: [i32; NDIRECT],
    pub created: i64,
    pub last_accessed: i64,
    pub last_modified: i64,
}

const_assert!(mem::size_of::<Dinode>() == INODE_SIZE);

impl Dinode {
    pub(super) fn new(typ: FileType, user: i32) -> Self {
        let now = unix_now();
        Self {
            file_type: typ as i32,
            size: 0,
            user_id: user,
            ref_count: 0,
            direct: [-1; NDIRECT],
            created: now,
            last_accessed: now,
            last_modified: now,
        }
    }

    pub(super) fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory as i32
    }

    pub(super) fn is_regular(&self) -> bool {
        self.file_type == FileType::Regular as i32
    }

    /// The data blocks this inode owns, in `direct` order. Directories may
    /// have holes (reclaimed entry blocks); regular files are contiguous.
    pub(super) fn blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.direct
            .iter()
            .filter_map(|&raw| is_valid_block_id(raw).then(|| raw as u32))
    }
}

/// Directory entry. A slot whose inode id is out of range is free; a
/// freshly allocated directory block is all 0xff, so every slot starts
/// free.
#[repr(C)]
#[derive(Clone, AsBytes, FromBytes)]
pub struct Dirent {
    inode_id: i32,
    filename: [u8; DIRSIZ],
}

pub const DIRENT_SIZE: usize = mem::size_of::<Dirent>();

/// Packed entries per directory block.
pub const ENTRIES_PER_BLOCK: usize = BSIZE / DIRENT_SIZE;

const_assert!(DIRENT_SIZE == 32);

impl Dirent {
    fn new(ino: u32, name: &str) -> Self {
        let mut de = Self {
            inode_id: ino as i32,
            filename: [0; DIRSIZ],
        };
        de.set_name(name);
        de
    }

    fn free_slot() -> Self {
        Self {
            inode_id: -1,
            filename: [0; DIRSIZ],
        }
    }

    pub(super) fn ino(&self) -> Option<u32> {
        (0..NINODES as i32)
            .contains(&self.inode_id)
            .then(|| self.inode_id as u32)
    }

    pub(super) fn raw_ino(&self) -> i32 {
        self.inode_id
    }

    /// Fill in the name, NUL terminated. `name` must be shorter than
    /// DIRSIZ, which `validate_name` guarantees for caller-supplied names.
    fn set_name(&mut self, name: &str) {
        let name = name.as_bytes();
        debug_assert!(name.len() < DIRSIZ);
        self.filename[..name.len()].copy_from_slice(name);
        self.filename[name.len()] = 0;
    }

    /// The name bytes up to the first NUL.
    pub(super) fn name_bytes(&self) -> &[u8] {
        let len = self
            .filename
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(DIRSIZ);
        &self.filename[..len]
    }

    pub(super) fn name(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }
}

pub(super) fn entry_at(buf: &[u8; BSIZE], slot: usize) -> Dirent {
    Dirent::read_from(&buf[slot * DIRENT_SIZE..][..DIRENT_SIZE]).expect("dirent size")
}

pub(super) fn unix_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn inode_offset(ino: u32) -> u64 {
    ITABLE_OFFSET + (ino as usize * INODE_SIZE) as u64
}

impl<D: Disk> MiniFs<D> {
    pub(super) fn read_inode(&self, ino: u32) -> Result<Dinode> {
        if ino >= NINODES as u32 {
            return Err(FsError::CorruptedDisk);
        }
        let mut dip = Dinode::new_zeroed();
        self.disk.read_at(dip.as_bytes_mut(), inode_offset(ino))?;
        Ok(dip)
    }

    pub(super) fn write_inode(&mut self, ino: u32, dip: &Dinode) -> Result<()> {
        if ino >= NINODES as u32 {
            return Err(FsError::CorruptedDisk);
        }
        self.disk.write_at(dip.as_bytes(), inode_offset(ino))?;
        Ok(())
    }

    pub(super) fn is_allocated_inode(&self, ino: u32) -> Result<bool> {
        if ino >= NINODES as u32 {
            return Ok(false);
        }
        let mut byte = 0u8;
        self.disk
            .read_at(std::slice::from_mut(&mut byte), IMAP_OFFSET + (ino / 8) as u64)?;
        Ok(!bits::is_set(byte, ino % 8))
    }

    pub(super) fn is_dir(&self, ino: u32) -> Result<bool> {
        Ok(self.is_allocated_inode(ino)? && self.read_inode(ino)?.is_dir())
    }

    pub(super) fn is_regular_file(&self, ino: u32) -> Result<bool> {
        Ok(self.is_allocated_inode(ino)? && self.read_inode(ino)?.is_regular())
    }

    /// An inode is visible to `user` when it belongs to the world (owner
    /// 0) or to `user` itself.
    pub(super) fn check_user(&self, ino: u32, user: i32) -> Result<bool> {
        let dip = self.read_inode(ino)?;
        Ok(dip.user_id == 0 || dip.user_id == user)
    }

    /// Allocates an inode id. The record's contents are stale; the caller
    /// must overwrite every field before the inode becomes reachable.
    pub(super) fn ialloc(&mut self) -> Result<u32> {
        self.update_superblock(0, -1)?;

        let mut map = [0u8; NINODES / 8];
        self.disk.read_at(&mut map, IMAP_OFFSET)?;
        for (i, byte) in map.iter_mut().enumerate() {
            if let Some(bit) = bits::first_set_bit(*byte) {
                bits::clear_bit(byte, bit);
                self.disk.write_at(&map, IMAP_OFFSET)?;
                return Ok((i * 8) as u32 + bit);
            }
        }
        Err(FsError::CorruptedDisk)
    }

    /// Frees an inode id. Does not free data blocks; teardown owns that.
    /// Freeing a free inode is an error, never a no-op.
    pub(super) fn ifree(&mut self, ino: u32) -> Result<()> {
        if ino >= NINODES as u32 {
            return Err(FsError::CorruptedDisk);
        }
        let off = IMAP_OFFSET + (ino / 8) as u64;
        let mut byte = 0u8;
        self.disk.read_at(std::slice::from_mut(&mut byte), off)?;
        if bits::is_set(byte, ino % 8) {
            return Err(FsError::CorruptedDisk);
        }
        self.update_superblock(0, 1)?;
        bits::set_bit(&mut byte, ino % 8);
        self.disk.write_at(std::slice::from_ref(&byte), off)?;
        Ok(())
    }

    /// Gives a fresh directory its first block with `.` and `..`. Neither
    /// entry touches a reference count.
    pub(super) fn init_dir(&mut self, dip: &mut Dinode, ino: u32, parent: u32) -> Result<()> {
        let block_id = self.balloc()?;
        dip.direct[0] = block_id as i32;
        dip.size = (2 * DIRENT_SIZE) as i32;
        self.write_entry(block_id, 0, &Dirent::new(ino, "."))?;
        self.write_entry(block_id, 1, &Dirent::new(parent, ".."))?;
        Ok(())
    }

    fn write_entry(&mut self, block_id: u32, slot: usize, de: &Dirent) -> Result<()> {
        debug_assert!(slot < ENTRIES_PER_BLOCK);
        let off = block_offset(block_id) + (slot * DIRENT_SIZE) as u64;
        self.disk.write_at(de.as_bytes(), off)?;
        Ok(())
    }

    /// Finds `name` in `dir` without an ownership check. `Ok(None)` covers
    /// both a missing name and a non-directory `dir`.
    pub(super) fn dirlookup_raw(&self, dir: u32, name: &str) -> Result<Option<u32>> {
        if !self.is_dir(dir)? {
            return Ok(None);
        }
        let dip = self.read_inode(dir)?;
        for block_id in dip.blocks() {
            let mut buf = [0u8; BSIZE];
            self.read_block(block_id, &mut buf)?;
            for slot in 0..ENTRIES_PER_BLOCK {
                let de = entry_at(&buf, slot);
                if let Some(ino) = de.ino() {
                    if self.is_allocated_inode(ino)? && de.name_bytes() == name.as_bytes() {
                        return Ok(Some(ino));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Finds `name` in `dir` as `user` sees it. A miss and an unowned
    /// match both come out as `NoSuchPath`.
    pub(super) fn dirlookup(&self, dir: u32, name: &str, user: i32) -> Result<u32> {
        match self.dirlookup_raw(dir, name)? {
            Some(ino) if self.check_user(ino, user)? => Ok(ino),
            _ => Err(FsError::NoSuchPath),
        }
    }

    /// Links `ino` into `dir` under `name`: first free slot in existing
    /// blocks, then a fresh block in the first unused direct slot. Bumps
    /// the directory size and the target's reference count.
    pub(super) fn dirlink(&mut self, dir: u32, ino: u32, name: &str) -> Result<()> {
        let mut dip = self.read_inode(dir)?;
        for i in 0..NDIRECT {
            let block_id = if is_valid_block_id(dip.direct[i]) {
                dip.direct[i] as u32
            } else {
                let b = self.balloc()?;
                dip.direct[i] = b as i32;
                b
            };
            let mut buf = [0u8; BSIZE];
            self.read_block(block_id, &mut buf)?;
            for slot in 0..ENTRIES_PER_BLOCK {
                if entry_at(&buf, slot).ino().is_none() {
                    self.write_entry(block_id, slot, &Dirent::new(ino, name))?;
                    dip.size += DIRENT_SIZE as i32;
                    self.write_inode(dir, &dip)?;
                    return self.incref(ino);
                }
            }
        }
        Err(FsError::DirectoryFull)
    }

    /// Unlinks `ino` from `dir`: frees the slot, shrinks the directory and
    /// drops the target's reference count (which may tear it down). An
    /// entry block left without a single live entry goes back to the
    /// allocator, so create/remove cycles restore the free counts.
    pub(super) fn dirunlink(&mut self, dir: u32, ino: u32) -> Result<()> {
        let mut dip = self.read_inode(dir)?;
        for i in 0..NDIRECT {
            if !is_valid_block_id(dip.direct[i]) {
                continue;
            }
            let block_id = dip.direct[i] as u32;
            let mut buf = [0u8; BSIZE];
            self.read_block(block_id, &mut buf)?;
            for slot in 0..ENTRIES_PER_BLOCK {
                if entry_at(&buf, slot).raw_ino() != ino as i32 {
                    continue;
                }
                buf[slot * DIRENT_SIZE..][..DIRENT_SIZE]
                    .copy_from_slice(Dirent::free_slot().as_bytes());
                self.write_block(block_id, &buf)?;
                dip.size -= DIRENT_SIZE as i32;

                let block_is_empty =
                    (0..ENTRIES_PER_BLOCK).all(|s| entry_at(&buf, s).ino().is_none());
                if block_is_empty {
                    dip.direct[i] = -1;
                    self.write_inode(dir, &dip)?;
                    self.bfree(block_id)?;
                } else {
                    self.write_inode(dir, &dip)?;
                }
                return self.decref(ino);
            }
        }
        Err(FsError::NoSuchPath)
    }

    /// Overwrites a filename in place. Reference counts are untouched.
    pub(super) fn dir_rename(&mut self, dir: u32, old: &str, new: &str) -> Result<()> {
        let dip = self.read_inode(dir)?;
        for block_id in dip.blocks() {
            let mut buf = [0u8; BSIZE];
            self.read_block(block_id, &mut buf)?;
            for slot in 0..ENTRIES_PER_BLOCK {
                let mut de = entry_at(&buf, slot);
                if de.ino().is_some() && de.name_bytes() == old.as_bytes() {
                    de.set_name(new);
                    return self.write_entry(block_id, slot, &de);
                }
            }
        }
        Err(FsError::NoSuchPath)
    }

    /// Repoints a moved directory's `..` at its new parent, in place.
    /// Reference counts are untouched.
    pub(super) fn dir_set_parent(&mut self, dir: u32, new_parent: u32) -> Result<()> {
        let dip = self.read_inode(dir)?;
        for block_id in dip.blocks() {
            let mut buf = [0u8; BSIZE];
            self.read_block(block_id, &mut buf)?;
            for slot in 0..ENTRIES_PER_BLOCK {
                let de = entry_at(&buf, slot);
                if de.name_bytes() == b".." {
                    return self.write_entry(block_id, slot, &Dirent::new(new_parent, ".."));
                }
            }
        }
        Err(FsError::CorruptedDisk)
    }

    /// The name under which `dir` holds `ino`.
    pub(super) fn filename_of(&self, dir: u32, ino: u32) -> Result<String> {
        let dip = self.read_inode(dir)?;
        for block_id in dip.blocks() {
            let mut buf = [0u8; BSIZE];
            self.read_block(block_id, &mut buf)?;
            for slot in 0..ENTRIES_PER_BLOCK {
                let de = entry_at(&buf, slot);
                if de.raw_ino() == ino as i32 {
                    return Ok(de.name());
                }
            }
        }
        Err(FsError::NoSuchPath)
    }

    fn incref(&mut self, ino: u32) -> Result<()> {
        let mut dip = self.read_inode(ino)?;
        dip.ref_count += 1;
        self.write_inode(ino, &dip)
    }

    /// Drops one reference. The last one triggers teardown; callers keep
    /// the root out of here.
    pub(super) fn decref(&mut self, ino: u32) -> Result<()> {
        let mut dip = self.read_inode(ino)?;
        dip.ref_count -= 1;
        if dip.ref_count == 0 {
            self.teardown(ino)
        } else {
            self.write_inode(ino, &dip)
        }
    }

    /// Releases an unreachable inode: every owned block, and for a
    /// directory every child first. `.` and `..` are skipped so the
    /// recursion never climbs back up.
    fn teardown(&mut self, ino: u32) -> Result<()> {
        let dip = self.read_inode(ino)?;
        let blocks: Vec<u32> = dip.blocks().collect();
        if dip.is_dir() {
            for &block_id in &blocks {
                let mut buf = [0u8; BSIZE];
                self.read_block(block_id, &mut buf)?;
                for slot in 0..ENTRIES_PER_BLOCK {
                    let de = entry_at(&buf, slot);
                    let name = de.name_bytes();
                    if name == b"." || name == b".." {
                        continue;
                    }
                    if let Some(child) = de.ino() {
                        if self.is_allocated_inode(child)? {
                            self.teardown(child)?;
                        }
                    }
                }
            }
        }
        for &block_id in &blocks {
            self.bfree(block_id)?;
        }
        self.ifree(ino)
    }

    /// Room left before the directory hits the direct-pointer ceiling.
    pub(super) fn free_space_in(&self, dir: u32) -> Result<usize> {
        let dip = self.read_inode(dir)?;
        Ok(MAXFILE - dip.size as usize)
    }

    /// Appends to a regular file, the only write path. Resumes in the
    /// partially filled tail block, then allocates fresh blocks. On block
    /// exhaustion the committed prefix is kept in `size` and the error
    /// returned; a final size past the direct-pointer ceiling is refused
    /// up front.
    pub fn append(&mut self, ino: u32, data: &[u8]) -> Result<()> {
        let mut dip = self.read_inode(ino)?;
        let size = dip.size as usize;
        if size + data.len() > MAXFILE {
            return Err(FsError::FileTooBig);
        }

        let mut written = 0;
        let mut ptr = size / BSIZE;
        if size % BSIZE != 0 {
            if !is_valid_block_id(dip.direct[ptr]) {
                return Err(FsError::CorruptedDisk);
            }
            let n = data.len().min(BSIZE - size % BSIZE);
            let off = block_offset(dip.direct[ptr] as u32) + (size % BSIZE) as u64;
            self.disk.write_at(&data[..n], off)?;
            written += n;
            ptr += 1;
        }
        while written < data.len() {
            let block_id = match self.balloc() {
                Ok(b) => b,
                Err(e) => {
                    dip.size += written as i32;
                    dip.last_modified = unix_now();
                    self.write_inode(ino, &dip)?;
                    return Err(e);
                }
            };
            dip.direct[ptr] = block_id as i32;
            let n = (data.len() - written).min(BSIZE);
            self.disk
                .write_at(&data[written..written + n], block_offset(block_id))?;
            written += n;
            ptr += 1;
        }

        dip.size += written as i32;
        dip.last_modified = unix_now();
        self.write_inode(ino, &dip)?;
        Ok(())
    }
}
