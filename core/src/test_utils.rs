/// In-memory block device for tests and demos. Never touches real hardware.
use crate::device::{BlockDevice, DeviceError};

const SUPPORTED_BLOCK_SIZES: [usize; 4] = [512, 1024, 2048, 4096];

#[derive(Debug, Clone)]
pub struct MemoryDevice {
    data: Vec<u8>,
    block_size: usize,
    live: Vec<u64>,
    maps: usize,
    commits: usize,
    double_maps: usize,
    fail_commits_after: Option<usize>,
}

impl MemoryDevice {
    /// A zero-filled device of `sectors` blocks of `block_size` bytes
    pub fn new(sectors: u64, block_size: usize) -> Self {
        Self::from_bytes(vec![0; sectors as usize * block_size], block_size)
    }

    pub fn from_bytes(data: Vec<u8>, block_size: usize) -> Self {
        Self {
            data,
            block_size,
            live: Vec::new(),
            maps: 0,
            commits: 0,
            double_maps: 0,
            fail_commits_after: None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Raw copy of one sector at the current block size
    pub fn sector(&self, sector: u64) -> &[u8] {
        let start = sector as usize * self.block_size;
        &self.data[start..start + self.block_size]
    }

    pub fn map_count(&self) -> usize {
        self.maps
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Mappings not yet ended with `unmap`
    pub fn live_mappings(&self) -> usize {
        self.live.len()
    }

    /// Times a sector was mapped while a mapping of it was still live
    pub fn double_maps(&self) -> usize {
        self.double_maps
    }

    /// Make every commit after the next `n` fail
    pub fn fail_commits_after(&mut self, n: usize) {
        self.fail_commits_after = Some(self.commits + n);
    }

    fn check_range(&self, sector: u64) -> Result<usize, DeviceError> {
        let sectors = self.size();
        if sector >= sectors {
            return Err(DeviceError::OutOfRange { sector, sectors });
        }
        Ok(sector as usize * self.block_size)
    }
}

impl BlockDevice for MemoryDevice {
    type Buffer = Vec<u8>;

    fn map(&mut self, sector: u64) -> Result<Vec<u8>, DeviceError> {
        let start = self.check_range(sector)?;
        if self.live.contains(&sector) {
            self.double_maps += 1;
            return Err(DeviceError::Map { sector });
        }
        self.live.push(sector);
        self.maps += 1;
        Ok(self.data[start..start + self.block_size].to_vec())
    }

    fn commit(&mut self, sector: u64, buffer: &Vec<u8>) -> Result<(), DeviceError> {
        let start = self.check_range(sector)?;
        if let Some(limit) = self.fail_commits_after {
            if self.commits >= limit {
                return Err(DeviceError::Commit { sector });
            }
        }
        if buffer.len() != self.block_size {
            return Err(DeviceError::Commit { sector });
        }
        self.data[start..start + self.block_size].copy_from_slice(buffer);
        self.commits += 1;
        Ok(())
    }

    fn unmap(&mut self, sector: u64, _buffer: Vec<u8>) {
        if let Some(pos) = self.live.iter().position(|&s| s == sector) {
            self.live.swap_remove(pos);
        }
    }

    fn set_logical_block_size(&mut self, size: usize) -> Result<(), DeviceError> {
        if !SUPPORTED_BLOCK_SIZES.contains(&size) || !self.live.is_empty() {
            return Err(DeviceError::BlockSize { requested: size });
        }
        self.block_size = size;
        Ok(())
    }

    fn logical_block_size(&self) -> usize {
        self.block_size
    }

    fn size(&self) -> u64 {
        (self.data.len() / self.block_size) as u64
    }
}
