// FAT table access for all three entry widths.
// 12-bit entries are nibble-packed and may straddle two sectors; 32-bit
// entries keep their reserved top nibble on write.

use byteorder::{ByteOrder, LittleEndian};
use fatvol_core::{BlockDevice, DeviceError, FatType, MountError, VolumeConfig};
use log::trace;
use std::marker::PhantomData;

use super::boot_sector::Geometry;
use super::constants::FIRST_DATA_CLUSTER;
use super::sector;

/// Decoded meaning of one FAT entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    Next(u32),
    EndOfChain,
    Bad,
    /// Values with no chain meaning (entry 1, the reserved range below the
    /// bad marker)
    Reserved(u32),
}

impl FatEntry {
    pub fn decode(fat_type: FatType, raw: u32) -> Self {
        let value = raw & fat_type.entry_mask();
        if value == 0 {
            FatEntry::Free
        } else if value >= fat_type.end_of_chain() {
            FatEntry::EndOfChain
        } else if value == fat_type.bad_cluster() {
            FatEntry::Bad
        } else if value == 1 || value > fat_type.bad_cluster() - 8 {
            FatEntry::Reserved(value)
        } else {
            FatEntry::Next(value)
        }
    }

    pub fn encode(self, fat_type: FatType) -> u32 {
        match self {
            FatEntry::Free => 0,
            FatEntry::Next(cluster) => cluster & fat_type.entry_mask(),
            FatEntry::EndOfChain => fat_type.entry_mask(),
            FatEntry::Bad => fat_type.bad_cluster(),
            FatEntry::Reserved(value) => value & fat_type.entry_mask(),
        }
    }
}

/// Addressing information for the FAT region. Holds no sector data: every
/// access maps the sector it needs and releases it before returning.
///
/// Width dispatch is guarded by `C::FAT16` and `C::FAT32`, so the arms for
/// widths the configuration excludes fold away. `new` refuses such widths,
/// which leaves the FAT12 arm as the only one reachable for them.
pub struct FatTable<C: VolumeConfig> {
    fat_type: FatType,
    bytes_per_sector: u32,
    first_fat_sector: u64,
    sectors_per_fat: u32,
    fat_count: u32,
    active_fat: Option<u32>,
    max_cluster: u32,
    _config: PhantomData<C>,
}

impl<C: VolumeConfig> FatTable<C> {
    pub fn new(geometry: &Geometry) -> Result<Self, MountError> {
        if geometry.fat_type > C::MAX_TYPE {
            return Err(MountError::UnsupportedConfiguration {
                found: geometry.fat_type,
                max: C::MAX_TYPE,
            });
        }
        Ok(Self {
            fat_type: geometry.fat_type,
            bytes_per_sector: geometry.bytes_per_sector,
            first_fat_sector: geometry.reserved_sectors as u64,
            sectors_per_fat: geometry.sectors_per_fat,
            fat_count: geometry.fat_count,
            // unmirrored FATs exist only on FAT32
            active_fat: if C::FAT32 { geometry.active_fat } else { None },
            max_cluster: geometry.max_cluster(),
            _config: PhantomData,
        })
    }

    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    pub fn max_cluster(&self) -> u32 {
        self.max_cluster
    }

    /// Byte offset of `cluster`'s entry from the start of a FAT
    fn byte_offset(&self, cluster: u32) -> u64 {
        let cluster = cluster as u64;
        match self.fat_type {
            FatType::Fat32 if C::FAT32 => cluster * 4,
            FatType::Fat16 if C::FAT16 => cluster * 2,
            _ => cluster + cluster / 2,
        }
    }

    fn copy_start(&self, index: u32) -> u64 {
        self.first_fat_sector + index as u64 * self.sectors_per_fat as u64
    }

    /// FAT copy that reads are served from
    fn read_copy(&self) -> u32 {
        if C::FAT32 {
            self.active_fat.unwrap_or(0)
        } else {
            0
        }
    }

    /// Raw entry value, masked to the entry width
    pub fn read_raw<D: BlockDevice>(&self, device: &mut D, cluster: u32) -> Result<u32, DeviceError> {
        let offset = self.byte_offset(cluster);
        let bps = self.bytes_per_sector as u64;
        let base = self.copy_start(self.read_copy());
        let sector_index = base + offset / bps;
        let within = (offset % bps) as usize;

        let value = match self.fat_type {
            FatType::Fat32 if C::FAT32 => {
                sector::read(device, sector_index, |data| LittleEndian::read_u32(&data[within..]))?
                    & 0x0FFF_FFFF
            }
            FatType::Fat16 if C::FAT16 => {
                sector::read(device, sector_index, |data| LittleEndian::read_u16(&data[within..]))?
                    as u32
            }
            _ => {
                let packed = if within + 1 == bps as usize {
                    // entry straddles two sectors; map them one after the other
                    let lo = sector::read(device, sector_index, |data| data[within])?;
                    let hi = sector::read(device, sector_index + 1, |data| data[0])?;
                    u16::from_le_bytes([lo, hi])
                } else {
                    sector::read(device, sector_index, |data| {
                        LittleEndian::read_u16(&data[within..])
                    })?
                };
                if cluster & 1 == 1 {
                    (packed >> 4) as u32
                } else {
                    (packed & 0x0FFF) as u32
                }
            }
        };
        Ok(value)
    }

    /// Write a raw value to every mirrored FAT copy (or only the active one
    /// when mirroring is off). Returns once all copies are committed.
    pub fn write_raw<D: BlockDevice>(
        &self,
        device: &mut D,
        cluster: u32,
        value: u32,
    ) -> Result<(), DeviceError> {
        trace!("FAT[{}] = {:#x}", cluster, value);
        match self.active_fat {
            Some(active) if C::FAT32 => self.write_copy(device, active, cluster, value),
            _ => {
                for index in 0..self.fat_count {
                    self.write_copy(device, index, cluster, value)?;
                }
                Ok(())
            }
        }
    }

    fn write_copy<D: BlockDevice>(
        &self,
        device: &mut D,
        index: u32,
        cluster: u32,
        value: u32,
    ) -> Result<(), DeviceError> {
        let offset = self.byte_offset(cluster);
        let bps = self.bytes_per_sector as u64;
        let sector_index = self.copy_start(index) + offset / bps;
        let within = (offset % bps) as usize;
        let odd = cluster & 1 == 1;

        match self.fat_type {
            FatType::Fat32 if C::FAT32 => {
                sector::update(device, sector_index, |data| {
                    let old = LittleEndian::read_u32(&data[within..]);
                    let new = (old & 0xF000_0000) | (value & 0x0FFF_FFFF);
                    LittleEndian::write_u32(&mut data[within..], new);
                })?;
            }
            FatType::Fat16 if C::FAT16 => {
                sector::update(device, sector_index, |data| {
                    LittleEndian::write_u16(&mut data[within..], value as u16);
                })?;
            }
            _ => {
                let value = (value & 0x0FFF) as u16;
                let (lo, hi) = if odd {
                    ((value << 4) as u8, (value >> 4) as u8)
                } else {
                    (value as u8, (value >> 8) as u8)
                };
                // nibble owned by the neighbouring entry
                let (lo_keep, hi_keep) = if odd { (0x0F, 0x00) } else { (0x00, 0xF0) };

                if within + 1 == bps as usize {
                    sector::update(device, sector_index, |data| {
                        data[within] = (data[within] & lo_keep) | lo;
                    })?;
                    sector::update(device, sector_index + 1, |data| {
                        data[0] = (data[0] & hi_keep) | hi;
                    })?;
                } else {
                    sector::update(device, sector_index, |data| {
                        data[within] = (data[within] & lo_keep) | lo;
                        data[within + 1] = (data[within + 1] & hi_keep) | hi;
                    })?;
                }
            }
        }
        Ok(())
    }

    pub fn get<D: BlockDevice>(&self, device: &mut D, cluster: u32) -> Result<FatEntry, DeviceError> {
        Ok(FatEntry::decode(self.fat_type, self.read_raw(device, cluster)?))
    }

    pub fn set<D: BlockDevice>(
        &self,
        device: &mut D,
        cluster: u32,
        entry: FatEntry,
    ) -> Result<(), DeviceError> {
        self.write_raw(device, cluster, entry.encode(self.fat_type))
    }

    /// Number of free data clusters
    pub fn count_free<D: BlockDevice>(&self, device: &mut D) -> Result<u32, DeviceError> {
        let mut free = 0;
        self.scan(device, FIRST_DATA_CLUSTER, self.max_cluster, |_, raw| {
            if raw == 0 {
                free += 1;
            }
            false
        })?;
        Ok(free)
    }

    /// First free cluster at or after `start`, wrapping around to the
    /// start of the data region
    pub fn find_free<D: BlockDevice>(&self, device: &mut D, start: u32) -> Result<Option<u32>, DeviceError> {
        let start = if start < FIRST_DATA_CLUSTER || start > self.max_cluster {
            FIRST_DATA_CLUSTER
        } else {
            start
        };
        if let Some(cluster) = self.scan(device, start, self.max_cluster, |_, raw| raw == 0)? {
            return Ok(Some(cluster));
        }
        if start > FIRST_DATA_CLUSTER {
            return self.scan(device, FIRST_DATA_CLUSTER, start - 1, |_, raw| raw == 0);
        }
        Ok(None)
    }

    /// Visit entries `first..=last` of the read copy in order until `visit`
    /// returns true. FAT16/32 map each FAT sector once; FAT12 entries are
    /// read one at a time because of the packing.
    pub fn scan<D: BlockDevice>(
        &self,
        device: &mut D,
        first: u32,
        last: u32,
        mut visit: impl FnMut(u32, u32) -> bool,
    ) -> Result<Option<u32>, DeviceError> {
        if first > last {
            return Ok(None);
        }
        if !C::FAT16 || self.fat_type == FatType::Fat12 {
            for cluster in first..=last {
                if visit(cluster, self.read_raw(device, cluster)?) {
                    return Ok(Some(cluster));
                }
            }
            return Ok(None);
        }

        let entry_bytes = (self.fat_type.bits() / 8) as u32;
        let per_sector = self.bytes_per_sector / entry_bytes;
        let base = self.copy_start(self.read_copy());
        let mut cluster = first;
        while cluster <= last {
            let sector_index = base + (cluster / per_sector) as u64;
            let sector_end = (cluster / per_sector + 1) * per_sector - 1;
            let stop = sector_end.min(last);
            let fat_type = self.fat_type;
            let found = sector::read(device, sector_index, |data| {
                for c in cluster..=stop {
                    let at = ((c % per_sector) * entry_bytes) as usize;
                    let raw = match fat_type {
                        FatType::Fat32 if C::FAT32 => LittleEndian::read_u32(&data[at..]) & 0x0FFF_FFFF,
                        _ => LittleEndian::read_u16(&data[at..]) as u32,
                    };
                    if visit(c, raw) {
                        return Some(c);
                    }
                }
                None
            })?;
            if found.is_some() {
                return Ok(found);
            }
            cluster = match stop.checked_add(1) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(None)
    }
}
