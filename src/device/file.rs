//! File-backed device
//!
//! On Unix, positional `pread`/`pwrite` through `FileExt`, so concurrent
//! callers never share a seek cursor. Elsewhere every transfer seeks and
//! reads or writes under one mutex.

use std::fs::{File, OpenOptions};
#[cfg(not(unix))]
use std::io::{Read, Seek, SeekFrom, Write};
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

#[cfg(not(unix))]
use parking_lot::Mutex;
use tracing::debug;

use super::{check_page, BlockDevice, DeviceError, DeviceResult, Geometry};
use crate::page::{BlockId, Lba};

/// Byte written over erased pages
const ERASED: u8 = 0xFF;

/// A device emulated by one preallocated file
#[derive(Debug)]
pub struct FileDevice {
    file: File,
    path: PathBuf,
    geometry: Geometry,
    /// Guards the shared seek cursor
    #[cfg(not(unix))]
    cursor: Mutex<()>,
}

impl FileDevice {
    /// Create (or truncate) `path` and size it for `geometry`
    pub fn format(path: impl AsRef<Path>, geometry: Geometry) -> DeviceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(geometry.capacity_bytes())?;

        debug!(
            path = %path.display(),
            blocks = geometry.blocks,
            bytes = geometry.capacity_bytes(),
            "formatted file device"
        );

        Ok(Self {
            file,
            path,
            geometry,
            #[cfg(not(unix))]
            cursor: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        self.file.read_exact_at(buf, offset)
    }

    #[cfg(unix)]
    fn write_at(&self, data: &[u8], offset: u64) -> std::io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    #[cfg(not(unix))]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        let _cursor = self.cursor.lock();
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    #[cfg(not(unix))]
    fn write_at(&self, data: &[u8], offset: u64) -> std::io::Result<()> {
        let _cursor = self.cursor.lock();
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
    }
}

impl BlockDevice for FileDevice {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn read_page(&self, lba: Lba) -> DeviceResult<Vec<u8>> {
        check_page(&self.geometry, lba, None)?;
        let mut buf = vec![0u8; self.geometry.page_size];
        self.read_at(&mut buf, self.geometry.offset_of(lba))?;
        Ok(buf)
    }

    fn write_page(&self, lba: Lba, data: &[u8]) -> DeviceResult<()> {
        check_page(&self.geometry, lba, Some(data.len()))?;
        self.write_at(data, self.geometry.offset_of(lba))?;
        Ok(())
    }

    fn erase_block(&self, block: BlockId) -> DeviceResult<()> {
        if block >= self.geometry.blocks {
            return Err(DeviceError::OutOfRange(block as u64));
        }
        let erased = vec![ERASED; self.geometry.block_size()];
        let offset = self.geometry.offset_of(self.geometry.first_lba(block));
        self.write_at(&erased, offset)?;
        Ok(())
    }

    fn sync(&self) -> DeviceResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
