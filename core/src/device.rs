use thiserror::Error;

/// Errors raised by a [`BlockDevice`] backend. The filesystem never retries;
/// these are handed back to the caller untouched.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Failed to map sector {sector}")]
    Map { sector: u64 },

    #[error("Failed to commit sector {sector}")]
    Commit { sector: u64 },

    #[error("Unsupported logical block size: {requested}")]
    BlockSize { requested: usize },

    #[error("Sector {sector} out of range (device has {sectors} sectors)")]
    OutOfRange { sector: u64, sectors: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sector-addressed storage the filesystem runs on.
///
/// A mapping hands out a buffer exactly one logical block long. Changes made
/// to it are only durable once [`BlockDevice::commit`] returns; every mapping
/// is ended with [`BlockDevice::unmap`], committed or not. The filesystem
/// never holds two mappings of the same sector at once.
pub trait BlockDevice {
    type Buffer: AsRef<[u8]> + AsMut<[u8]>;

    fn map(&mut self, sector: u64) -> Result<Self::Buffer, DeviceError>;

    fn commit(&mut self, sector: u64, buffer: &Self::Buffer) -> Result<(), DeviceError>;

    fn unmap(&mut self, sector: u64, buffer: Self::Buffer);

    fn set_logical_block_size(&mut self, size: usize) -> Result<(), DeviceError>;

    fn logical_block_size(&self) -> usize;

    /// Number of sectors at the current logical block size
    fn size(&self) -> u64;
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    type Buffer = T::Buffer;

    fn map(&mut self, sector: u64) -> Result<Self::Buffer, DeviceError> {
        (**self).map(sector)
    }

    fn commit(&mut self, sector: u64, buffer: &Self::Buffer) -> Result<(), DeviceError> {
        (**self).commit(sector, buffer)
    }

    fn unmap(&mut self, sector: u64, buffer: Self::Buffer) {
        (**self).unmap(sector, buffer)
    }

    fn set_logical_block_size(&mut self, size: usize) -> Result<(), DeviceError> {
        (**self).set_logical_block_size(size)
    }

    fn logical_block_size(&self) -> usize {
        (**self).logical_block_size()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}
