//! Path resolution.
//!
//! A path splits on `/` with empty components dropped, so trailing and
//! doubled slashes are harmless. Resolution starts at the root for
//! absolute paths and at the session's working directory otherwise; each
//! step goes through `dirlookup`, so the ownership check applies to every
//! component and a miss, an unowned inode and a non-directory intermediate
//! all come out as `NoSuchPath`.

use crate::disk::Disk;
use crate::error::{FsError, Result};
use crate::param::{DIRSIZ, ROOTINO};

use super::{MiniFs, Session};

/// The components of `path`, in order.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// A caller-supplied filename must fit a dirent with its NUL terminator
/// and may not collide with the reserved names.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.len() > DIRSIZ - 1
        || name.contains('/')
        || name.contains('\0')
        || name == "."
        || name == ".."
    {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

impl<D: Disk> MiniFs<D> {
    fn walk_start(&self, sess: &Session, path: &str) -> u32 {
        if path.starts_with('/') {
            ROOTINO
        } else {
            sess.cwd
        }
    }

    /// Resolves `path` to an inode id as the session's user sees it.
    pub fn namei(&self, sess: &Session, path: &str) -> Result<u32> {
        let mut ino = self.walk_start(sess, path);
        for name in components(path) {
            ino = self.dirlookup(ino, name, sess.user)?;
        }
        Ok(ino)
    }

    /// Resolves all but the last component and hands back the final one.
    /// For the root itself the parent is the root and the name is `.`.
    pub(super) fn nameiparent(&self, sess: &Session, path: &str) -> Result<(u32, String)> {
        if let Ok(ROOTINO) = self.namei(sess, path) {
            return Ok((ROOTINO, ".".to_string()));
        }

        let mut names = components(path);
        let Some(mut last) = names.next() else {
            return Err(FsError::NoSuchPath);
        };
        let mut ino = self.walk_start(sess, path);
        for name in names {
            ino = self.dirlookup(ino, last, sess.user)?;
            last = name;
        }
        Ok((ino, last.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;
    use crate::fs::FileType;
    use crate::param::DISK_SIZE;

    #[test]
    fn components_drops_empty_tokens() {
        let split = |p| components(p).collect::<Vec<_>>();
        assert_eq!(split("/a/bb/c"), ["a", "bb", "c"]);
        assert_eq!(split("a//bb/"), ["a", "bb"]);
        assert_eq!(split("///"), Vec::<&str>::new());
        assert_eq!(split(""), Vec::<&str>::new());
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("a").is_ok());
        assert!(validate_name(&"x".repeat(DIRSIZ - 1)).is_ok());
        assert!(validate_name(&"x".repeat(DIRSIZ)).is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
    }

    #[test]
    fn namei_walks_relative_and_absolute_paths() {
        let mut fs = MiniFs::mkfs(MemDisk::new(DISK_SIZE)).unwrap();
        let mut sess = Session::new(1);
        let a = fs.create(&sess, "/a", FileType::Directory).unwrap();
        let b = fs.create(&sess, "/a/b", FileType::Directory).unwrap();

        assert_eq!(fs.namei(&sess, "/").unwrap(), ROOTINO);
        assert_eq!(fs.namei(&sess, "/a/b").unwrap(), b);
        assert_eq!(fs.namei(&sess, "a/b/").unwrap(), b);

        sess.cwd = a;
        assert_eq!(fs.namei(&sess, "b").unwrap(), b);
        assert_eq!(fs.namei(&sess, "..").unwrap(), ROOTINO);
        // The root's `..` points back at the root.
        assert_eq!(fs.namei(&sess, "../..").unwrap(), ROOTINO);
        assert!(fs.namei(&sess, "missing").is_err());
    }

    #[test]
    fn nameiparent_splits_off_the_final_component() {
        let mut fs = MiniFs::mkfs(MemDisk::new(DISK_SIZE)).unwrap();
        let sess = Session::new(1);
        let a = fs.create(&sess, "/a", FileType::Directory).unwrap();

        let (parent, name) = fs.nameiparent(&sess, "/a/newfile").unwrap();
        assert_eq!((parent, name.as_str()), (a, "newfile"));

        let (parent, name) = fs.nameiparent(&sess, "/").unwrap();
        assert_eq!((parent, name.as_str()), (ROOTINO, "."));

        // The parent walk itself fails on a missing intermediate.
        assert!(fs.nameiparent(&sess, "/nope/x").is_err());
    }
}
