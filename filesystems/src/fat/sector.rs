// Scoped sector mappings. A `MappedSector` unmaps itself on drop, so every
// path out of an operation, error paths included, releases what it mapped.

use fatvol_core::{BlockDevice, DeviceError};
use log::trace;

pub(crate) struct MappedSector<'a, D: BlockDevice> {
    device: &'a mut D,
    sector: u64,
    buffer: Option<D::Buffer>,
}

impl<'a, D: BlockDevice> MappedSector<'a, D> {
    pub(crate) fn map(device: &'a mut D, sector: u64) -> Result<Self, DeviceError> {
        trace!("map sector {}", sector);
        let buffer = device.map(sector)?;
        Ok(Self {
            device,
            sector,
            buffer: Some(buffer),
        })
    }

    pub(crate) fn data(&self) -> &[u8] {
        match &self.buffer {
            Some(buffer) => buffer.as_ref(),
            None => &[],
        }
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.buffer {
            Some(buffer) => buffer.as_mut(),
            None => &mut [],
        }
    }

    pub(crate) fn commit(&mut self) -> Result<(), DeviceError> {
        if let Some(buffer) = &self.buffer {
            trace!("commit sector {}", self.sector);
            self.device.commit(self.sector, buffer)?;
        }
        Ok(())
    }
}

impl<D: BlockDevice> Drop for MappedSector<'_, D> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.device.unmap(self.sector, buffer);
        }
    }
}

/// Map `sector`, hand its bytes to `f`, unmap.
pub(crate) fn read<D, T>(
    device: &mut D,
    sector: u64,
    f: impl FnOnce(&[u8]) -> T,
) -> Result<T, DeviceError>
where
    D: BlockDevice,
{
    let mapped = MappedSector::map(device, sector)?;
    Ok(f(mapped.data()))
}

/// Map `sector`, let `f` modify it, commit, unmap.
pub(crate) fn update<D, T>(
    device: &mut D,
    sector: u64,
    f: impl FnOnce(&mut [u8]) -> T,
) -> Result<T, DeviceError>
where
    D: BlockDevice,
{
    let mut mapped = MappedSector::map(device, sector)?;
    let value = f(mapped.data_mut());
    mapped.commit()?;
    Ok(value)
}

/// Overwrite `count` sectors starting at `first` with zeros
pub(crate) fn zero<D: BlockDevice>(device: &mut D, first: u64, count: u64) -> Result<(), DeviceError> {
    for sector in first..first + count {
        update(device, sector, |data| data.fill(0))?;
    }
    Ok(())
}
