//! Positioned file I/O for the edge-file scanner and vertex dump/restore.
//!
//! Every reader seeks to its own byte range, so all access goes through
//! offset-based exact reads and writes; there is no shared cursor.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use crate::error::{GaleError, Result};

#[derive(Clone)]
pub struct PositionedFile {
    inner: Arc<File>,
}

impl PositionedFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(GaleError::from)?;
        Ok(PositionedFile {
            inner: Arc::new(file),
        })
    }

    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(GaleError::from)?;
        Ok(PositionedFile {
            inner: Arc::new(file),
        })
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata().map_err(GaleError::from)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn set_len(&self, len: u64) -> Result<()> {
        self.inner.set_len(len).map_err(GaleError::from)
    }

    pub fn read_exact_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        platform::read_exact(&self.inner, off, dst).map_err(GaleError::from)
    }

    pub fn write_all_at(&self, off: u64, src: &[u8]) -> Result<()> {
        platform::write_all(&self.inner, off, src).map_err(GaleError::from)
    }

    pub fn sync_all(&self) -> Result<()> {
        self.inner.sync_all().map_err(GaleError::from)
    }
}

#[cfg(unix)]
mod platform {
    use super::*;
    use std::os::unix::fs::FileExt;

    pub fn read_exact(file: &File, start: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = file.read_at(&mut buf[filled..], start + filled as u64)?;
            if n == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "record range extends past end of file",
                ));
            }
            filled += n;
        }
        Ok(())
    }

    pub fn write_all(file: &File, start: u64, buf: &[u8]) -> io::Result<()> {
        let mut flushed = 0usize;
        while flushed < buf.len() {
            let n = file.write_at(&buf[flushed..], start + flushed as u64)?;
            if n == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "positioned write stalled mid-range",
                ));
            }
            flushed += n;
        }
        Ok(())
    }
}

#[cfg(windows)]
mod platform {
    use super::*;
    use std::os::windows::fs::FileExt;

    pub fn read_exact(file: &File, start: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = file.seek_read(&mut buf[filled..], start + filled as u64)?;
            if n == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "record range extends past end of file",
                ));
            }
            filled += n;
        }
        Ok(())
    }

    pub fn write_all(file: &File, start: u64, buf: &[u8]) -> io::Result<()> {
        let mut flushed = 0usize;
        while flushed < buf.len() {
            let n = file.seek_write(&buf[flushed..], start + flushed as u64)?;
            if n == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "positioned write stalled mid-range",
                ));
            }
            flushed += n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io.bin");
        let io = PositionedFile::open_rw(&path).unwrap();
        io.write_all_at(8, b"edges").unwrap();
        let mut buf = [0u8; 5];
        io.read_exact_at(8, &mut buf).unwrap();
        assert_eq!(&buf, b"edges");
    }

    #[test]
    fn read_past_eof_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io.bin");
        let io = PositionedFile::open_rw(&path).unwrap();
        let mut buf = [0u8; 4];
        let err = io.read_exact_at(0, &mut buf).unwrap_err();
        match err {
            GaleError::Io(inner) => assert_eq!(inner.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
