//! Positional file reader.
//!
//! Every structure in the file is fetched by absolute offset, so the
//! reader exposes a single `read_exact_at` and keeps no visible seek
//! state. The handle is shared by every node and page decoded from it;
//! reads are serialised behind a lock so concurrent traversals never
//! observe a torn seek position.

use crate::error::Result;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

pub(crate) struct FileReader {
    file: Mutex<File>,
    len: u64,
}

impl FileReader {
    /// Open a file read-only
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }

    /// Length of the underlying file in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Fill `buf` exactly from the bytes at `offset`
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }
}
