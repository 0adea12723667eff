//! Byte-addressable access to the backing image.
//!
//! Every other layer reaches the image exclusively through the [`Disk`]
//! trait, so anything that can serve positioned byte ranges of the right
//! size works as a backing store: a regular file, the minifs character
//! device, or a plain in-memory buffer.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::sync::Mutex;

use crate::param::BSIZE;

/// Positioned whole-buffer I/O. Implementations resume short transfers
/// internally; a partial read or write never reaches the caller.
pub trait Disk: Send + Sync {
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<()>;
    fn write_at(&self, buf: &[u8], off: u64) -> io::Result<()>;
}

/// A regular file. pread/pwrite leave the fd without a shared seek cursor,
/// so concurrent readers need no extra locking.
pub struct FileDisk {
    file: File,
}

impl FileDisk {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

impl Disk for FileDisk {
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<()> {
        self.file.read_exact_at(buf, off)
    }

    fn write_at(&self, buf: &[u8], off: u64) -> io::Result<()> {
        self.file.write_all_at(buf, off)
    }
}

/// The minifs character device. It transfers at most one block per syscall
/// and keeps its own cursor, so transfers are chunked to `BSIZE` and the
/// seek-then-transfer sequence is serialised behind a mutex.
pub struct CharDisk {
    file: Mutex<File>,
}

impl CharDisk {
    pub fn new(file: File) -> Self {
        Self {
            file: Mutex::new(file),
        }
    }
}

impl Disk for CharDisk {
    fn read_at(&self, mut buf: &mut [u8], off: u64) -> io::Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(off))?;
        while !buf.is_empty() {
            let n = buf.len().min(BSIZE);
            file.read_exact(&mut buf[..n])?;
            buf = &mut buf[n..];
        }
        Ok(())
    }

    fn write_at(&self, mut buf: &[u8], off: u64) -> io::Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(off))?;
        while !buf.is_empty() {
            let n = buf.len().min(BSIZE);
            file.write_all(&buf[..n])?;
            buf = &buf[n..];
        }
        Ok(())
    }
}

/// An in-memory image, mainly for tests.
pub struct MemDisk {
    data: Mutex<Vec<u8>>,
}

impl MemDisk {
    pub fn new(size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; size]),
        }
    }
}

impl Disk for MemDisk {
    fn read_at(&self, buf: &mut [u8], off: u64) -> io::Result<()> {
        let data = self.data.lock().unwrap();
        let off = off as usize;
        let end = off.checked_add(buf.len()).filter(|&end| end <= data.len());
        match end {
            Some(end) => {
                buf.copy_from_slice(&data[off..end]);
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past the end of the image",
            )),
        }
    }

    fn write_at(&self, buf: &[u8], off: u64) -> io::Result<()> {
        let mut data = self.data.lock().unwrap();
        let off = off as usize;
        let end = off.checked_add(buf.len()).filter(|&end| end <= data.len());
        match end {
            Some(end) => {
                data[off..end].copy_from_slice(buf);
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write past the end of the image",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_disk_round_trips() {
        let disk = MemDisk::new(4096);
        disk.write_at(b"hello", 1000).unwrap();
        let mut buf = [0u8; 5];
        disk.read_at(&mut buf, 1000).unwrap();
        assert_eq!(&buf, b"hello");
        assert!(disk.read_at(&mut buf, 4094).is_err());
    }

    #[test]
    fn char_disk_chunks_large_transfers() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(8192).unwrap();
        let disk = CharDisk::new(file);

        let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        disk.write_at(&data, 100).unwrap();
        let mut back = vec![0u8; 3000];
        disk.read_at(&mut back, 100).unwrap();
        assert_eq!(back, data);
    }
}
