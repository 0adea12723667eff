//! Engine-level end-to-end scenarios, exercised over an in-memory image.
//! `fsck` re-audits the whole image after every interesting mutation.

use minifs::disk::{FileDisk, MemDisk};
use minifs::param::{BSIZE, DISK_SIZE, MAXFILE, NINODES};
use minifs::{FileType, FsError, MiniFs, Session};

fn fresh() -> MiniFs<MemDisk> {
    MiniFs::mkfs(MemDisk::new(DISK_SIZE)).unwrap()
}

fn upload(fs: &mut MiniFs<MemDisk>, sess: &Session, path: &str, data: &[u8]) {
    let ino = fs.create_for_upload(sess, path, data.len()).unwrap();
    for chunk in data.chunks(BSIZE) {
        fs.append(ino, chunk).unwrap();
    }
}

#[test]
fn mkdir_cd_pwd_ls() {
    let mut fs = fresh();
    let mut sess = Session::new(1);

    fs.create(&sess, "/a", FileType::Directory).unwrap();
    assert_eq!(fs.chdir(&mut sess, "/a").unwrap(), "/a/");
    assert_eq!(fs.work_path(&sess).unwrap(), "/a/");
    assert_eq!(fs.list(&sess, Some("/"), false).unwrap(), ["a"]);
    fs.fsck().unwrap();
}

#[test]
fn upload_collides_then_succeeds_after_rm() {
    let mut fs = fresh();
    let sess = Session::new(1);
    let payload = vec![b'x'; 3000];

    fs.create(&sess, "/f", FileType::Regular).unwrap();
    assert!(matches!(
        fs.create_for_upload(&sess, "/f", payload.len()),
        Err(FsError::AlreadyExists)
    ));

    fs.remove(&sess, "/f").unwrap();
    upload(&mut fs, &sess, "/f", &payload);
    assert_eq!(fs.read_contents(&sess, "/f").unwrap(), payload);
    fs.fsck().unwrap();
}

#[test]
fn moved_directory_keeps_its_contents() {
    let mut fs = fresh();
    let sess = Session::new(1);

    fs.create(&sess, "/d", FileType::Directory).unwrap();
    fs.create(&sess, "/d/x", FileType::Regular).unwrap();
    fs.rename(&sess, "/d", "/e").unwrap();

    assert_eq!(fs.list(&sess, Some("/e"), false).unwrap(), ["x"]);
    assert_eq!(fs.read_contents(&sess, "/e/x").unwrap(), b"");
    assert!(fs.namei(&sess, "/d").is_err());
    fs.fsck().unwrap();
}

#[test]
fn files_are_invisible_across_users() {
    let mut fs = fresh();
    let alice = Session::new(1);
    let bob = Session::new(2);

    fs.create(&alice, "/secret", FileType::Regular).unwrap();

    assert!(!fs.list(&bob, Some("/"), true).unwrap().contains(&"secret".to_string()));
    assert!(matches!(
        fs.read_contents(&bob, "/secret"),
        Err(FsError::NoSuchPath)
    ));
    // The owner still sees it, and so does everyone for user-0 files.
    assert_eq!(fs.list(&alice, Some("/"), false).unwrap(), ["secret"]);
    fs.fsck().unwrap();
}

#[test]
fn inode_exhaustion_and_recovery() {
    let mut fs = fresh();
    let sess = Session::new(1);

    assert_eq!(fs.statfs().unwrap().1, (NINODES - 1) as i32);
    for i in 0..NINODES - 1 {
        fs.create(&sess, &format!("/f{i}"), FileType::Regular)
            .unwrap();
    }
    assert!(matches!(
        fs.create(&sess, "/straw", FileType::Regular),
        Err(FsError::NoSpaceInodes)
    ));

    fs.remove(&sess, "/f0").unwrap();
    fs.create(&sess, "/straw", FileType::Regular).unwrap();
    fs.fsck().unwrap();
}

#[test]
fn moved_directory_points_dotdot_at_the_new_parent() {
    let mut fs = fresh();
    let mut sess = Session::new(1);

    fs.create(&sess, "/a", FileType::Directory).unwrap();
    fs.create(&sess, "/b", FileType::Directory).unwrap();
    fs.rename(&sess, "/a", "/b/a").unwrap();

    let b = fs.namei(&sess, "/b").unwrap();
    sess.cwd = fs.namei(&sess, "/b/a").unwrap();
    assert_eq!(fs.namei(&sess, "..").unwrap(), b);
    assert_eq!(fs.work_path(&sess).unwrap(), "/b/a/");
    fs.fsck().unwrap();
}

#[test]
fn upload_download_round_trip() {
    let mut fs = fresh();
    let sess = Session::new(1);
    let payload: Vec<u8> = (0..MAXFILE).map(|i| (i % 251) as u8).collect();

    upload(&mut fs, &sess, "/blob", &payload);
    assert_eq!(fs.read_contents(&sess, "/blob").unwrap(), payload);
    fs.fsck().unwrap();
}

#[test]
fn rename_there_and_back_is_structurally_identity() {
    let mut fs = fresh();
    let sess = Session::new(1);

    fs.create(&sess, "/a", FileType::Directory).unwrap();
    let before = fs.statfs().unwrap();

    fs.rename(&sess, "/a", "/b").unwrap();
    fs.rename(&sess, "/b", "/a").unwrap();

    assert_eq!(fs.statfs().unwrap(), before);
    assert_eq!(fs.list(&sess, Some("/"), false).unwrap(), ["a"]);
    assert!(fs.namei(&sess, "/a").is_ok());
    fs.fsck().unwrap();
}

#[test]
fn create_then_remove_preserves_free_state() {
    let mut fs = fresh();
    let sess = Session::new(1);
    let before = fs.statfs().unwrap();

    fs.create(&sess, "/x", FileType::Regular).unwrap();
    fs.remove(&sess, "/x").unwrap();
    assert_eq!(fs.statfs().unwrap(), before);

    for n in [1, 30, NINODES - 1] {
        for i in 0..n {
            fs.create(&sess, &format!("/f{i}"), FileType::Regular)
                .unwrap();
        }
        for i in 0..n {
            fs.remove(&sess, &format!("/f{i}")).unwrap();
        }
        assert_eq!(fs.statfs().unwrap(), before, "n = {n}");
        fs.fsck().unwrap();
    }
}

#[test]
fn removing_a_tree_frees_everything_it_owned() {
    let mut fs = fresh();
    let sess = Session::new(1);
    let before = fs.statfs().unwrap();

    fs.create(&sess, "/d", FileType::Directory).unwrap();
    fs.create(&sess, "/d/sub", FileType::Directory).unwrap();
    fs.create(&sess, "/d/sub/leaf", FileType::Regular).unwrap();
    upload(&mut fs, &sess, "/d/big", &vec![7u8; 5 * BSIZE]);

    fs.remove(&sess, "/d").unwrap();
    assert_eq!(fs.statfs().unwrap(), before);
    assert!(fs.namei(&sess, "/d").is_err());
    fs.fsck().unwrap();
}

#[test]
fn upload_too_big_is_refused() {
    let mut fs = fresh();
    let sess = Session::new(1);
    assert!(matches!(
        fs.create_for_upload(&sess, "/big", MAXFILE + 1),
        Err(FsError::FileTooBig)
    ));
}

#[test]
fn upload_outrunning_free_blocks_is_refused() {
    let mut fs = fresh();
    let sess = Session::new(1);

    // Eat almost every data block.
    let mut left = fs.statfs().unwrap().0 as usize;
    let mut i = 0;
    while left > 2 {
        let n = (left - 2).min(MAXFILE / BSIZE);
        upload(&mut fs, &sess, &format!("/fill{i}"), &vec![0u8; n * BSIZE]);
        left -= n;
        i += 1;
    }
    assert!(matches!(
        fs.create_for_upload(&sess, "/one-more", 3 * BSIZE),
        Err(FsError::NoSpaceBlocks)
    ));
    fs.fsck().unwrap();
}

#[test]
fn exhausted_append_keeps_the_committed_prefix() {
    let mut fs = fresh();
    let sess = Session::new(1);

    // Leave exactly two free blocks, then try to append three blocks'
    // worth in one call.
    let mut left = fs.statfs().unwrap().0 as usize;
    let mut i = 0;
    while left > 2 {
        let n = (left - 2).min(MAXFILE / BSIZE);
        upload(&mut fs, &sess, &format!("/fill{i}"), &vec![0u8; n * BSIZE]);
        left -= n;
        i += 1;
    }
    let ino = fs.create(&sess, "/tail", FileType::Regular).unwrap();
    assert_eq!(fs.statfs().unwrap().0, 2);

    assert!(matches!(
        fs.append(ino, &vec![b'z'; 3 * BSIZE]),
        Err(FsError::NoSpaceBlocks)
    ));
    let kept = fs.read_contents(&sess, "/tail").unwrap();
    assert_eq!(kept, vec![b'z'; 2 * BSIZE]);
    fs.fsck().unwrap();
}

#[test]
fn rm_of_the_root_is_refused() {
    let mut fs = fresh();
    let sess = Session::new(1);
    assert!(matches!(fs.remove(&sess, "/"), Err(FsError::RefuseRoot)));
    assert!(matches!(
        fs.rename(&sess, "/", "/elsewhere"),
        Err(FsError::RefuseRoot)
    ));
}

#[test]
fn dot_entries_cannot_be_unlinked() {
    let mut fs = fresh();
    let mut sess = Session::new(1);
    fs.create(&sess, "/a", FileType::Directory).unwrap();
    sess.cwd = fs.namei(&sess, "/a").unwrap();

    assert!(matches!(fs.remove(&sess, ".."), Err(FsError::RefuseRoot)));
    assert!(matches!(
        fs.remove(&sess, "/a/."),
        Err(FsError::PermissionDenied)
    ));
    fs.create(&sess, "/a/b", FileType::Directory).unwrap();
    sess.cwd = fs.namei(&sess, "/a/b").unwrap();
    assert!(matches!(
        fs.remove(&sess, ".."),
        Err(FsError::PermissionDenied)
    ));
    fs.fsck().unwrap();
}

#[test]
fn cd_into_a_regular_file_is_refused() {
    let mut fs = fresh();
    let mut sess = Session::new(1);
    fs.create(&sess, "/f", FileType::Regular).unwrap();
    assert!(matches!(
        fs.chdir(&mut sess, "/f"),
        Err(FsError::NotADirectory)
    ));
    assert!(matches!(
        fs.read_contents(&sess, "/"),
        Err(FsError::NotARegularFile)
    ));
}

#[test]
fn copy_duplicates_contents_without_sharing_blocks() {
    let mut fs = fresh();
    let sess = Session::new(1);
    let payload: Vec<u8> = (0..3 * BSIZE + 17).map(|i| (i % 13) as u8).collect();

    upload(&mut fs, &sess, "/src", &payload);
    fs.copy(&sess, "/src", "/dst").unwrap();
    assert_eq!(fs.read_contents(&sess, "/dst").unwrap(), payload);

    // Changing the copy leaves the original alone.
    let dst = fs.namei(&sess, "/dst").unwrap();
    fs.append(dst, b"tail").unwrap();
    assert_eq!(fs.read_contents(&sess, "/src").unwrap(), payload);
    fs.fsck().unwrap();
}

#[test]
fn moving_a_directory_under_itself_is_refused() {
    let mut fs = fresh();
    let sess = Session::new(1);
    fs.create(&sess, "/a", FileType::Directory).unwrap();
    fs.create(&sess, "/a/b", FileType::Directory).unwrap();

    assert!(fs.rename(&sess, "/a", "/a/b/a").is_err());
    assert!(fs.rename(&sess, "/a", "/a/a").is_err());
    fs.fsck().unwrap();
}

#[test]
fn a_file_backed_image_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("minifs.img");
    let payload = b"persistent bytes".to_vec();
    let sess = Session::new(1);

    {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();
        file.set_len(DISK_SIZE as u64).unwrap();
        let mut fs = MiniFs::mkfs(FileDisk::new(file)).unwrap();
        fs.create(&sess, "/keep", FileType::Directory).unwrap();
        let ino = fs
            .create_for_upload(&sess, "/keep/data", payload.len())
            .unwrap();
        fs.append(ino, &payload).unwrap();
    }

    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .unwrap();
    let fs = MiniFs::open(FileDisk::new(file)).unwrap();
    assert_eq!(fs.read_contents(&sess, "/keep/data").unwrap(), payload);
    fs.fsck().unwrap();

    // A scribbled-over superblock is rejected on open.
    std::fs::write(&path, b"garbage").unwrap();
    let file = std::fs::File::options().read(true).write(true).open(&path).unwrap();
    file.set_len(DISK_SIZE as u64).unwrap();
    assert!(matches!(
        MiniFs::open(FileDisk::new(file)),
        Err(FsError::CorruptedDisk)
    ));
}
