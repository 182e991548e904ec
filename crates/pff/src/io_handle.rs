//! ## Byte-IO handle
//!
//! Positioned reads over a file or a caller-supplied stream. The handle is
//! shared by the index, block, and stream layers through `Rc` clones; the
//! underlying reader is interior-locked so a stream read cannot interleave
//! with an index descent.
//!
//! For debugging extraction tooling the handle can record every byte range
//! it is asked to read.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::Path,
    sync::Mutex,
};

pub trait PffReader: Read + Seek {}

impl<T> PffReader for T where T: Read + Seek {}

pub struct FileHandle {
    reader: Mutex<Box<dyn PffReader>>,
    size: u64,
    read_ranges: Mutex<Option<Vec<(u64, u64)>>>,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl FileHandle {
    /// Open a container file for reading.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            reader: Mutex::new(Box::new(file)),
            size,
            read_ranges: Mutex::new(None),
        })
    }

    /// Adopt a caller-supplied stream. The stream is seeked to its end once
    /// to establish the container size.
    pub fn from_reader(mut reader: Box<dyn PffReader>) -> io::Result<Self> {
        let size = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader: Mutex::new(reader),
            size,
            read_ranges: Mutex::new(None),
        })
    }

    /// The container size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Fill `buf` from the bytes at `offset`. A short read surfaces as
    /// [`io::ErrorKind::UnexpectedEof`].
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut reader = self
            .reader
            .lock()
            .map_err(|_| io::Error::other("reader lock poisoned"))?;
        let reader = &mut *reader;
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(buf)?;

        if let Ok(mut ranges) = self.read_ranges.lock() {
            if let Some(ranges) = ranges.as_mut() {
                ranges.push((offset, buf.len() as u64));
            }
        }

        Ok(())
    }

    /// Enable or disable read-range recording. Enabling clears any ranges
    /// recorded so far.
    pub fn record_read_ranges(&self, enable: bool) {
        if let Ok(mut ranges) = self.read_ranges.lock() {
            *ranges = if enable { Some(Vec::new()) } else { None };
        }
    }

    /// The `(offset, length)` pairs recorded since recording was enabled.
    pub fn read_ranges(&self) -> Vec<(u64, u64)> {
        self.read_ranges
            .lock()
            .ok()
            .and_then(|ranges| ranges.clone())
            .unwrap_or_default()
    }
}
