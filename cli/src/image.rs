// Disk image files as block devices

use fatvol_core::{BlockDevice, DeviceError};
use log::trace;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const SUPPORTED_BLOCK_SIZES: [usize; 4] = [512, 1024, 2048, 4096];

/// A regular file addressed in logical blocks. Mapped buffers are private
/// copies; `commit` writes them back at once.
pub struct FileDevice {
    file: File,
    len: u64,
    block_size: usize,
}

impl FileDevice {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            block_size: 512,
        })
    }

    /// Create or resize the image to `bytes`
    pub fn create(path: &Path, bytes: u64) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(bytes)?;
        Ok(Self {
            file,
            len: bytes,
            block_size: 512,
        })
    }

    pub fn sync(&mut self) -> std::io::Result<()> {
        self.file.sync_all()
    }

    fn offset(&self, sector: u64) -> Result<u64, DeviceError> {
        let sectors = self.size();
        if sector >= sectors {
            return Err(DeviceError::OutOfRange { sector, sectors });
        }
        Ok(sector * self.block_size as u64)
    }
}

impl BlockDevice for FileDevice {
    type Buffer = Vec<u8>;

    fn map(&mut self, sector: u64) -> Result<Vec<u8>, DeviceError> {
        let offset = self.offset(sector)?;
        let mut buffer = vec![0u8; self.block_size];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buffer)?;
        trace!("mapped sector {}", sector);
        Ok(buffer)
    }

    fn commit(&mut self, sector: u64, buffer: &Vec<u8>) -> Result<(), DeviceError> {
        let offset = self.offset(sector)?;
        if buffer.len() != self.block_size {
            return Err(DeviceError::Commit { sector });
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buffer)?;
        Ok(())
    }

    fn unmap(&mut self, _sector: u64, _buffer: Vec<u8>) {}

    fn set_logical_block_size(&mut self, size: usize) -> Result<(), DeviceError> {
        if !SUPPORTED_BLOCK_SIZES.contains(&size) {
            return Err(DeviceError::BlockSize { requested: size });
        }
        self.block_size = size;
        Ok(())
    }

    fn logical_block_size(&self) -> usize {
        self.block_size
    }

    fn size(&self) -> u64 {
        self.len / self.block_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_commit_persists() {
        let temp = NamedTempFile::new().unwrap();
        let mut dev = FileDevice::create(temp.path(), 4096).unwrap();
        assert_eq!(dev.size(), 8);

        let mut buffer = dev.map(3).unwrap();
        buffer[0] = 0x5A;
        dev.commit(3, &buffer).unwrap();
        dev.unmap(3, buffer);
        dev.sync().unwrap();

        let bytes = std::fs::read(temp.path()).unwrap();
        assert_eq!(bytes[3 * 512], 0x5A);
    }

    #[test]
    fn test_unmap_without_commit_discards() {
        let temp = NamedTempFile::new().unwrap();
        let mut dev = FileDevice::create(temp.path(), 2048).unwrap();
        let mut buffer = dev.map(1).unwrap();
        buffer.fill(0xFF);
        dev.unmap(1, buffer);
        assert!(dev.map(1).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_block_size_and_range() {
        let temp = NamedTempFile::new().unwrap();
        let mut dev = FileDevice::create(temp.path(), 8192).unwrap();
        dev.set_logical_block_size(4096).unwrap();
        assert_eq!(dev.size(), 2);
        assert!(matches!(dev.map(2), Err(DeviceError::OutOfRange { sector: 2, sectors: 2 })));
        assert!(matches!(
            dev.set_logical_block_size(768),
            Err(DeviceError::BlockSize { requested: 768 })
        ));
    }
}
