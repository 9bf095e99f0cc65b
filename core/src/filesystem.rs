use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codepage::{AsciiCodepage, Codepage};

/// FAT entry width. Ordered so that `Fat12 < Fat16 < Fat32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    /// Largest cluster count a FAT12 volume may have
    pub const FAT12_MAX_CLUSTERS: u32 = 4084;
    /// Largest cluster count a FAT16 volume may have
    pub const FAT16_MAX_CLUSTERS: u32 = 65524;
    pub const FAT32_MAX_CLUSTERS: u32 = 0x0FFF_FFF5;

    /// The FAT width is decided by the number of data clusters alone.
    pub fn from_cluster_count(clusters: u32) -> Self {
        if clusters <= Self::FAT12_MAX_CLUSTERS {
            FatType::Fat12
        } else if clusters <= Self::FAT16_MAX_CLUSTERS {
            FatType::Fat16
        } else {
            FatType::Fat32
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            FatType::Fat12 => 12,
            FatType::Fat16 => 16,
            FatType::Fat32 => 32,
        }
    }

    pub fn min_clusters(self) -> u32 {
        match self {
            FatType::Fat12 => 1,
            FatType::Fat16 => Self::FAT12_MAX_CLUSTERS + 1,
            FatType::Fat32 => Self::FAT16_MAX_CLUSTERS + 1,
        }
    }

    pub fn max_clusters(self) -> u32 {
        match self {
            FatType::Fat12 => Self::FAT12_MAX_CLUSTERS,
            FatType::Fat16 => Self::FAT16_MAX_CLUSTERS,
            FatType::Fat32 => Self::FAT32_MAX_CLUSTERS,
        }
    }

    /// Mask of meaningful entry bits (FAT32 keeps 4 reserved high bits)
    pub fn entry_mask(self) -> u32 {
        match self {
            FatType::Fat12 => 0x0FFF,
            FatType::Fat16 => 0xFFFF,
            FatType::Fat32 => 0x0FFF_FFFF,
        }
    }

    /// Smallest value that means end-of-chain
    pub fn end_of_chain(self) -> u32 {
        match self {
            FatType::Fat12 => 0x0FF8,
            FatType::Fat16 => 0xFFF8,
            FatType::Fat32 => 0x0FFF_FFF8,
        }
    }

    pub fn bad_cluster(self) -> u32 {
        match self {
            FatType::Fat12 => 0x0FF7,
            FatType::Fat16 => 0xFFF7,
            FatType::Fat32 => 0x0FFF_FFF7,
        }
    }

    /// Size in bytes of a FAT holding `entries` entries
    pub fn fat_bytes(self, entries: u64) -> u64 {
        match self {
            FatType::Fat12 => (entries * 3 + 1) / 2,
            FatType::Fat16 => entries * 2,
            FatType::Fat32 => entries * 4,
        }
    }

    /// Filesystem type string stored in the boot sector
    pub fn label(self) -> &'static [u8; 8] {
        match self {
            FatType::Fat12 => b"FAT12   ",
            FatType::Fat16 => b"FAT16   ",
            FatType::Fat32 => b"FAT32   ",
        }
    }
}

impl fmt::Display for FatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatType::Fat12 => write!(f, "FAT12"),
            FatType::Fat16 => write!(f, "FAT16"),
            FatType::Fat32 => write!(f, "FAT32"),
        }
    }
}

/// MS-DOS packed date and time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DosTimestamp {
    /// bits 15-9: year since 1980, 8-5: month, 4-0: day
    pub date: u16,
    /// bits 15-11: hours, 10-5: minutes, 4-0: seconds/2
    pub time: u16,
    /// Creation time refinement in units of 10ms (0-199)
    pub centiseconds: u8,
}

impl DosTimestamp {
    /// 1980-01-01 00:00:00
    pub const EPOCH: DosTimestamp = DosTimestamp {
        date: (1 << 5) | 1,
        time: 0,
        centiseconds: 0,
    };
}

/// Source of timestamps for new and modified entries
pub trait Clock {
    fn now(&self) -> DosTimestamp;
}

/// Always reports the FAT epoch. Keeps images reproducible.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> DosTimestamp {
        DosTimestamp::EPOCH
    }
}

/// Scratch space a directory scan reassembles long names in
pub trait NameBuffer: Default {
    fn units(&self) -> &[u16];
    fn units_mut(&mut self) -> &mut [u16];
}

/// Room for the longest long name: 20 fragments of 13 UTF-16 units
pub struct LongNameUnits([u16; 260]);

impl Default for LongNameUnits {
    fn default() -> Self {
        Self([0; 260])
    }
}

impl NameBuffer for LongNameUnits {
    fn units(&self) -> &[u16] {
        &self.0
    }

    fn units_mut(&mut self) -> &mut [u16] {
        &mut self.0
    }
}

/// No storage at all, for configurations without long names
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLongNames;

impl NameBuffer for NoLongNames {
    fn units(&self) -> &[u16] {
        &[]
    }

    fn units_mut(&mut self) -> &mut [u16] {
        &mut []
    }
}

/// Compile-time driver configuration.
///
/// Everything here is fixed before any mount or format. The filesystem is
/// generic over it so that code for widths above `MAX_TYPE`, and the
/// long-name paths when `LONG_NAMES` is false, compile away.
pub trait VolumeConfig {
    const MAX_TYPE: FatType;
    const LONG_NAMES: bool;
    /// Longest long name accepted, in UTF-16 code units (at most 255)
    const MAX_NAME_LEN: usize;

    /// FAT16 volumes can be mounted
    const FAT16: bool = Self::MAX_TYPE as u8 >= FatType::Fat16 as u8;
    /// FAT32 volumes can be mounted
    const FAT32: bool = Self::MAX_TYPE as u8 >= FatType::Fat32 as u8;

    type Codepage: Codepage + Default;
    type Clock: Clock + Default;
    /// `LongNameUnits` when `LONG_NAMES` is set, `NoLongNames` otherwise
    type NameBuffer: NameBuffer;
}

/// FAT12 only, 8.3 names
pub struct Fat12Config;

impl VolumeConfig for Fat12Config {
    const MAX_TYPE: FatType = FatType::Fat12;
    const LONG_NAMES: bool = false;
    const MAX_NAME_LEN: usize = 12;
    type Codepage = AsciiCodepage;
    type Clock = FixedClock;
    type NameBuffer = NoLongNames;
}

/// FAT12 and FAT16, 8.3 names
pub struct Fat16Config;

impl VolumeConfig for Fat16Config {
    const MAX_TYPE: FatType = FatType::Fat16;
    const LONG_NAMES: bool = false;
    const MAX_NAME_LEN: usize = 12;
    type Codepage = AsciiCodepage;
    type Clock = FixedClock;
    type NameBuffer = NoLongNames;
}

/// Every width, 8.3 names
pub struct Fat32Config;

impl VolumeConfig for Fat32Config {
    const MAX_TYPE: FatType = FatType::Fat32;
    const LONG_NAMES: bool = false;
    const MAX_NAME_LEN: usize = 12;
    type Codepage = AsciiCodepage;
    type Clock = FixedClock;
    type NameBuffer = NoLongNames;
}

/// Every width with long names up to 255 UTF-16 units
pub struct DefaultConfig;

impl VolumeConfig for DefaultConfig {
    const MAX_TYPE: FatType = FatType::Fat32;
    const LONG_NAMES: bool = true;
    const MAX_NAME_LEN: usize = 255;
    type Codepage = AsciiCodepage;
    type Clock = FixedClock;
    type NameBuffer = LongNameUnits;
}

/// Format-time parameters. Only `volume_id` is required; every other field
/// overrides a value otherwise derived from the device size.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatOptions {
    pub volume_id: [u8; 4],
    pub label: Option<[u8; 11]>,
    pub fat_type: Option<FatType>,
    pub sectors_per_cluster: Option<u8>,
    pub reserved_sectors: Option<u16>,
    pub fat_count: Option<u8>,
    pub root_entries: Option<u16>,
}

impl FormatOptions {
    pub fn new(volume_id: [u8; 4]) -> Self {
        Self {
            volume_id,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_count_thresholds() {
        assert_eq!(FatType::from_cluster_count(1), FatType::Fat12);
        assert_eq!(FatType::from_cluster_count(4084), FatType::Fat12);
        assert_eq!(FatType::from_cluster_count(4085), FatType::Fat16);
        assert_eq!(FatType::from_cluster_count(65524), FatType::Fat16);
        assert_eq!(FatType::from_cluster_count(65525), FatType::Fat32);
    }

    #[test]
    fn test_thresholds_agree_with_ranges() {
        for ty in [FatType::Fat12, FatType::Fat16, FatType::Fat32] {
            assert_eq!(FatType::from_cluster_count(ty.min_clusters()), ty);
            assert_eq!(FatType::from_cluster_count(ty.max_clusters()), ty);
        }
    }

    #[test]
    fn test_fat12_table_size() {
        // two entries share three bytes
        assert_eq!(FatType::Fat12.fat_bytes(2), 3);
        assert_eq!(FatType::Fat12.fat_bytes(3), 5);
        assert_eq!(FatType::Fat16.fat_bytes(3), 6);
    }

    #[test]
    fn test_config_width_switches() {
        assert!(!Fat12Config::FAT16 && !Fat12Config::FAT32);
        assert!(Fat16Config::FAT16 && !Fat16Config::FAT32);
        assert!(DefaultConfig::FAT16 && DefaultConfig::FAT32);
        assert_eq!(std::mem::size_of::<NoLongNames>(), 0);
        assert_eq!(LongNameUnits::default().units().len(), 260);
    }

    #[test]
    fn test_type_ordering() {
        assert!(FatType::Fat12 < FatType::Fat16);
        assert!(FatType::Fat16 < FatType::Fat32);
    }
}
