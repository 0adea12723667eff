//! The filesystem engine. Five layers, leaf to root:
//!   + Bits: single-bit operations inside bitmap bytes.
//!   + Blocks: allocator for raw data blocks.
//!   + Inodes: inode allocator, directories, append, refcounted teardown.
//!   + Names: absolute and relative path resolution.
//!   + Verbs: the user-visible operations the daemon exposes.
//!
//! All state lives on disk; `MiniFs` itself owns nothing but the backing
//! store. Read-only verbs take `&self`, mutating verbs `&mut self`, so a
//! `RwLock<MiniFs>` at the daemon hands out exactly the access each verb
//! needs and verbs compose freely as plain method calls.

use arrayvec::ArrayVec;
use log::warn;

use crate::disk::Disk;
use crate::error::{FsError, Result};
use crate::param::{BSIZE, DISK_SIZE, FSMAGIC, MAXFILE, NBLOCKS, NINODES, ROOTINO};

mod block;
mod inode;
mod path;
mod superblock;

pub use inode::{Dinode, Dirent, FileType, DIRENT_SIZE, ENTRIES_PER_BLOCK};
pub use path::{components, validate_name};
pub use superblock::{blocks_needed, Superblock};

use inode::entry_at;

/// Per-session view of the filesystem: the working directory and the user
/// id announced at login. The transport stays with the server.
#[derive(Clone, Copy)]
pub struct Session {
    pub cwd: u32,
    pub user: i32,
}

impl Session {
    pub fn new(user: i32) -> Self {
        Self {
            cwd: ROOTINO,
            user,
        }
    }
}

pub struct MiniFs<D> {
    disk: D,
}

impl<D: Disk> MiniFs<D> {
    /// Builds a fresh image: everything 0xff, a stamped superblock, and
    /// the root directory (inode 0, owned by the world, pinned at one
    /// reference so it can never be torn down).
    pub fn mkfs(disk: D) -> Result<Self> {
        let mut fs = Self { disk };
        let fill = [0xffu8; BSIZE];
        let mut off = 0;
        while off < DISK_SIZE {
            fs.disk.write_at(&fill, off as u64)?;
            off += BSIZE;
        }
        fs.write_superblock(&Superblock {
            magic: FSMAGIC,
            n_free_blocks: NBLOCKS as i32,
            n_free_inodes: NINODES as i32,
        })?;

        // The first ialloc on a fresh bitmap hands out inode 0.
        let root_ino = fs.ialloc()?;
        let mut root = Dinode::new(FileType::Directory, 0);
        root.ref_count = 1;
        fs.init_dir(&mut root, root_ino, root_ino)?;
        fs.write_inode(root_ino, &root)?;
        Ok(fs)
    }

    /// Adopts an existing image; anything without the magic is refused.
    pub fn open(disk: D) -> Result<Self> {
        let fs = Self { disk };
        if fs.superblock()?.magic != FSMAGIC {
            return Err(FsError::CorruptedDisk);
        }
        Ok(fs)
    }

    /// Free block and inode counts, straight from the superblock.
    pub fn statfs(&self) -> Result<(i32, i32)> {
        let sb = self.superblock()?;
        Ok((sb.n_free_blocks, sb.n_free_inodes))
    }

    /// Changes the working directory and reports the new absolute path.
    pub fn chdir(&self, sess: &mut Session, path: &str) -> Result<String> {
        let ino = self.namei(sess, path)?;
        if !self.is_dir(ino)? {
            return Err(FsError::NotADirectory);
        }
        sess.cwd = ino;
        self.work_path(sess)
    }

    /// The absolute path of the working directory: `/` for the root,
    /// otherwise every component followed by a slash (`/a/b/`), built by
    /// climbing `..` links and reading each name back out of the parent.
    pub fn work_path(&self, sess: &Session) -> Result<String> {
        if sess.cwd == ROOTINO {
            return Ok("/".to_string());
        }
        let mut names = ArrayVec::<String, NINODES>::new();
        let mut cur = sess.cwd;
        while cur != ROOTINO {
            let parent = self.dirlookup(cur, "..", sess.user)?;
            names
                .try_push(self.filename_of(parent, cur)?)
                .map_err(|_| FsError::CorruptedDisk)?;
            cur = parent;
        }
        let mut path = String::new();
        for name in names.iter().rev() {
            path.push('/');
            path.push_str(name);
        }
        path.push('/');
        Ok(path)
    }

    /// Lists a directory in entry order, hiding dot-prefixed names unless
    /// `all`, and hiding entries the session's user does not own.
    pub fn list(&self, sess: &Session, path: Option<&str>, all: bool) -> Result<Vec<String>> {
        let ino = match path {
            Some(p) => self.namei(sess, p)?,
            None => sess.cwd,
        };
        if !self.is_dir(ino)? {
            return Err(FsError::NotADirectory);
        }

        let dip = self.read_inode(ino)?;
        let mut names = Vec::new();
        for block_id in dip.blocks() {
            let mut buf = [0u8; BSIZE];
            self.read_block(block_id, &mut buf)?;
            for slot in 0..ENTRIES_PER_BLOCK {
                let de = entry_at(&buf, slot);
                let Some(child) = de.ino() else { continue };
                if !self.is_allocated_inode(child)? || !self.check_user(child, sess.user)? {
                    continue;
                }
                let name = de.name();
                if !all && name.starts_with('.') {
                    continue;
                }
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Creates a regular file (`touch`) or a directory (`mkdir`).
    pub fn create(&mut self, sess: &Session, path: &str, typ: FileType) -> Result<u32> {
        if self.namei(sess, path).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        let (parent, name) = self.nameiparent(sess, path)?;
        if !self.is_dir(parent)? {
            return Err(FsError::NoSuchPath);
        }
        validate_name(&name)?;
        if self.free_space_in(parent)? < DIRENT_SIZE {
            return Err(FsError::DirectoryFull);
        }
        let sb = self.superblock()?;
        if sb.n_free_inodes == 0 {
            return Err(FsError::NoSpaceInodes);
        }
        // A directory needs its first block immediately.
        if typ == FileType::Directory && sb.n_free_blocks == 0 {
            return Err(FsError::NoSpaceBlocks);
        }

        let ino = self.ialloc()?;
        let mut dip = Dinode::new(typ, sess.user);
        if typ == FileType::Directory {
            if let Err(e) = self.init_dir(&mut dip, ino, parent) {
                self.ifree(ino)?;
                return Err(e);
            }
        }
        self.write_inode(ino, &dip)?;
        if let Err(e) = self.dirlink(parent, ino, &name) {
            // The inode is on disk but unreachable; take it back.
            for block_id in dip.blocks().collect::<Vec<_>>() {
                self.bfree(block_id)?;
            }
            self.ifree(ino)?;
            return Err(e);
        }
        Ok(ino)
    }

    /// Removes a file or a whole directory subtree. The root stays.
    pub fn remove(&mut self, sess: &Session, path: &str) -> Result<()> {
        let (parent, name) = self.nameiparent(sess, path)?;
        let ino = self.dirlookup(parent, &name, sess.user)?;
        if ino == ROOTINO {
            return Err(FsError::RefuseRoot);
        }
        // Unlinking `.` or `..` would detach a directory from inside
        // itself.
        if name == "." || name == ".." {
            return Err(FsError::PermissionDenied);
        }
        self.dirunlink(parent, ino)
    }

    /// Renames or moves. Same parent is a rename in place; across parents
    /// the entry is linked at the destination and unlinked at the source,
    /// and a moved directory gets its `..` repointed.
    pub fn rename(&mut self, sess: &Session, src: &str, dest: &str) -> Result<()> {
        let src_ino = self.namei(sess, src)?;
        if src_ino == ROOTINO {
            return Err(FsError::RefuseRoot);
        }
        if self.namei(sess, dest).is_ok() {
            return Err(FsError::AlreadyExists);
        }

        let (src_parent, src_name) = self.nameiparent(sess, src)?;
        if src_name == "." || src_name == ".." {
            return Err(FsError::PermissionDenied);
        }
        let (dest_parent, dest_name) = self.nameiparent(sess, dest)?;
        validate_name(&dest_name)?;

        if src_parent == dest_parent {
            return self.dir_rename(src_parent, &src_name, &dest_name);
        }

        let moving_dir = self.is_dir(src_ino)?;
        // A directory must not move under itself; teardown would never
        // terminate on the resulting cycle.
        if moving_dir && self.in_subtree(src_ino, dest_parent)? {
            return Err(FsError::NoSuchPath);
        }
        if self.free_space_in(dest_parent)? < DIRENT_SIZE {
            return Err(FsError::DirectoryFull);
        }
        self.dirlink(dest_parent, src_ino, &dest_name)?;
        self.dirunlink(src_parent, src_ino)?;
        if moving_dir {
            self.dir_set_parent(src_ino, dest_parent)?;
        }
        Ok(())
    }

    /// Whether `node` is `ancestor` or lies below it, by climbing `..`.
    fn in_subtree(&self, ancestor: u32, mut node: u32) -> Result<bool> {
        loop {
            if node == ancestor {
                return Ok(true);
            }
            if node == ROOTINO {
                return Ok(false);
            }
            node = self
                .dirlookup_raw(node, "..")?
                .ok_or(FsError::CorruptedDisk)?;
        }
    }

    /// Copies a regular file inside the filesystem, block by block through
    /// the append path.
    pub fn copy(&mut self, sess: &Session, src: &str, dest: &str) -> Result<u32> {
        let src_ino = self.namei(sess, src)?;
        if !self.is_regular_file(src_ino)? {
            return Err(FsError::NotARegularFile);
        }
        let src_dip = self.read_inode(src_ino)?;
        if blocks_needed(src_dip.size as usize) > self.superblock()?.n_free_blocks as usize {
            return Err(FsError::NoSpaceBlocks);
        }

        let new_ino = self.create(sess, dest, FileType::Regular)?;
        let size = src_dip.size as usize;
        let mut buf = [0u8; BSIZE];
        for (i, block_id) in src_dip.blocks().enumerate() {
            let n = (size - i * BSIZE).min(BSIZE);
            if n == 0 {
                break;
            }
            self.read_block(block_id, &mut buf)?;
            self.append(new_ino, &buf[..n])?;
        }
        Ok(new_ino)
    }

    /// The full contents of a regular file, for `cat` and downloads.
    pub fn read_contents(&self, sess: &Session, path: &str) -> Result<Vec<u8>> {
        let ino = self.namei(sess, path)?;
        if !self.is_regular_file(ino)? {
            return Err(FsError::NotARegularFile);
        }
        let dip = self.read_inode(ino)?;
        let size = dip.size as usize;
        let mut data = Vec::with_capacity(size);
        let mut buf = [0u8; BSIZE];
        for (i, block_id) in dip.blocks().enumerate() {
            let n = (size - i * BSIZE).min(BSIZE);
            if n == 0 {
                break;
            }
            self.read_block(block_id, &mut buf)?;
            data.extend_from_slice(&buf[..n]);
        }
        Ok(data)
    }

    /// Pre-flight for an upload of `size` declared bytes: the size must
    /// fit a single file and the currently free blocks, then the
    /// destination is created empty and appended to as content arrives.
    pub fn create_for_upload(&mut self, sess: &Session, dest: &str, size: usize) -> Result<u32> {
        if size > MAXFILE {
            return Err(FsError::FileTooBig);
        }
        if blocks_needed(size) > self.superblock()?.n_free_blocks as usize {
            return Err(FsError::NoSpaceBlocks);
        }
        self.create(sess, dest, FileType::Regular)
    }

    /// Full-image audit of the structural invariants: superblock counters
    /// against bitmap populations, direct pointers against the block
    /// bitmap, single ownership of every block and inode, `.`/`..`
    /// wiring, and reference counts against the live entries. Returns a
    /// description of the first violation found.
    pub fn fsck(&self) -> std::result::Result<(), String> {
        let audit = || -> Result<std::result::Result<(), String>> {
            let sb = self.superblock()?;

            let mut free_blocks = 0;
            for b in 0..NBLOCKS as u32 {
                if !self.block_allocated(b)? {
                    free_blocks += 1;
                }
            }
            let mut allocated = Vec::new();
            for ino in 0..NINODES as u32 {
                if self.is_allocated_inode(ino)? {
                    allocated.push(ino);
                }
            }
            if sb.n_free_blocks != free_blocks {
                return Ok(Err(format!(
                    "superblock says {} free blocks, bitmap says {free_blocks}",
                    sb.n_free_blocks
                )));
            }
            let free_inodes = (NINODES - allocated.len()) as i32;
            if sb.n_free_inodes != free_inodes {
                return Ok(Err(format!(
                    "superblock says {} free inodes, bitmap says {free_inodes}",
                    sb.n_free_inodes
                )));
            }

            let mut block_owner = [None::<u32>; NBLOCKS];
            let mut name_refs = [0i32; NINODES];
            for &ino in &allocated {
                let dip = self.read_inode(ino)?;
                for block_id in dip.blocks() {
                    if !self.block_allocated(block_id)? {
                        return Ok(Err(format!(
                            "inode {ino} points at block {block_id}, which the bitmap says is free"
                        )));
                    }
                    if let Some(other) = block_owner[block_id as usize] {
                        return Ok(Err(format!(
                            "block {block_id} owned by inodes {other} and {ino}"
                        )));
                    }
                    block_owner[block_id as usize] = Some(ino);
                }
                if !dip.is_dir() {
                    continue;
                }
                for block_id in dip.blocks() {
                    let mut buf = [0u8; BSIZE];
                    self.read_block(block_id, &mut buf)?;
                    for slot in 0..ENTRIES_PER_BLOCK {
                        let de = entry_at(&buf, slot);
                        let Some(child) = de.ino() else { continue };
                        let name = de.name_bytes();
                        if name == b"." {
                            if child != ino {
                                return Ok(Err(format!("inode {ino}: `.` points at {child}")));
                            }
                        } else if name == b".." {
                            if !self.is_dir(child)? {
                                return Ok(Err(format!(
                                    "inode {ino}: `..` points at non-directory {child}"
                                )));
                            }
                        } else {
                            if !self.is_allocated_inode(child)? {
                                return Ok(Err(format!(
                                    "inode {ino}: entry {:?} names free inode {child}",
                                    String::from_utf8_lossy(name)
                                )));
                            }
                            name_refs[child as usize] += 1;
                        }
                    }
                }
            }

            for &ino in &allocated {
                let dip = self.read_inode(ino)?;
                let expected = if ino == ROOTINO { 1 } else { name_refs[ino as usize] };
                if dip.ref_count != expected {
                    return Ok(Err(format!(
                        "inode {ino}: ref_count {} but {expected} expected",
                        dip.ref_count
                    )));
                }
                if ino != ROOTINO && name_refs[ino as usize] != 1 {
                    return Ok(Err(format!(
                        "inode {ino} named by {} entries",
                        name_refs[ino as usize]
                    )));
                }
            }
            for (block_id, owner) in block_owner.iter().enumerate() {
                if owner.is_none() && self.block_allocated(block_id as u32)? {
                    return Ok(Err(format!("block {block_id} allocated but unowned")));
                }
            }
            Ok(Ok(()))
        };
        match audit() {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("fsck aborted: {e}");
                Err(format!("audit aborted: {e}"))
            }
        }
    }

    fn block_allocated(&self, block_id: u32) -> Result<bool> {
        use crate::bits;
        use crate::param::BMAP_OFFSET;
        let mut byte = 0u8;
        self.disk.read_at(
            std::slice::from_mut(&mut byte),
            BMAP_OFFSET + (block_id / 8) as u64,
        )?;
        Ok(!bits::is_set(byte, block_id % 8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;

    #[test]
    fn mkfs_leaves_a_consistent_image() {
        let fs = MiniFs::mkfs(MemDisk::new(DISK_SIZE)).unwrap();
        // The root costs one inode and one block.
        assert_eq!(fs.statfs().unwrap(), (127, 127));
        fs.fsck().unwrap();
    }

    #[test]
    fn open_checks_the_magic() {
        let fs = MiniFs::mkfs(MemDisk::new(DISK_SIZE)).unwrap();
        let disk = fs.disk;
        assert!(MiniFs::open(disk).is_ok());
        assert!(matches!(
            MiniFs::open(MemDisk::new(DISK_SIZE)),
            Err(FsError::CorruptedDisk)
        ));
    }
}
