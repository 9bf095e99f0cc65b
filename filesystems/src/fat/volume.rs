// Mount / unmount state machine and the live filesystem context.
//
// A `FileSystem` value is the mounted state: `mount` either returns one or
// fails without constructing anything, and `unmount` consumes it.

use arrayvec::ArrayString;
use fatvol_core::{
    BlockDevice, Clock, Codepage, DefaultConfig, FatError, FatType, MountError, VolumeConfig,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::marker::PhantomData;

use super::boot_sector::{BiosParameterBlock, FsInfo, Geometry};
use super::cluster_chain::Fat;
use super::constants::*;
use super::fat_table::FatTable;
use super::sector;

pub type LabelString = ArrayString<33>;

/// Summary of a mounted volume
#[derive(Debug, Clone, Serialize)]
pub struct VolumeInfo {
    pub fat_type: FatType,
    pub label: LabelString,
    pub volume_id: u32,
    pub bytes_per_sector: u32,
    pub bytes_per_cluster: u32,
    pub total_sectors: u64,
    pub cluster_count: u32,
    pub free_clusters: u32,
    pub fat_count: u32,
    pub mirrored: bool,
    pub was_dirty: bool,
}

/// A mounted FAT volume on device `D`, specialised by the static
/// configuration `C`.
pub struct FileSystem<D: BlockDevice, C: VolumeConfig = DefaultConfig> {
    pub(crate) device: D,
    pub(crate) geometry: Geometry,
    pub(crate) fat: Fat<C>,
    pub(crate) codepage: C::Codepage,
    pub(crate) clock: C::Clock,
    label: [u8; 11],
    volume_id: u32,
    fs_info_sector: Option<u64>,
    was_dirty: bool,
    /// Set once this session has cleared the clean-shutdown bit
    modified: bool,
    _config: PhantomData<C>,
}

impl<D: BlockDevice, C: VolumeConfig> FileSystem<D, C> {
    /// Mount with the configuration's default codepage and clock
    pub fn mount(device: D) -> Result<Self, FatError> {
        Self::mount_with(device, C::Codepage::default(), C::Clock::default())
    }

    pub fn mount_with(mut device: D, codepage: C::Codepage, clock: C::Clock) -> Result<Self, FatError> {
        let bpb = sector::read(&mut device, 0, BiosParameterBlock::parse)??;

        device
            .set_logical_block_size(bpb.bytes_per_sector as usize)
            .map_err(MountError::BlockSize)?;
        if bpb.total_sectors as u64 > device.size() {
            return Err(MountError::InconsistentGeometry("volume larger than device").into());
        }

        let geometry = bpb.compute_geometry()?;
        let table = FatTable::<C>::new(&geometry)?;
        let was_dirty = match geometry.fat_type {
            FatType::Fat16 | FatType::Fat32 if C::FAT16 => {
                let (clean_bit, no_error_bit) = clean_bits(geometry.fat_type);
                let flags = table.read_raw(&mut device, 1)?;
                if flags & no_error_bit == 0 {
                    warn!("volume reports a previous hard error");
                }
                flags & clean_bit == 0
            }
            _ => false,
        };
        if was_dirty {
            warn!("volume was not cleanly unmounted");
        }

        let fs_info_sector = match geometry.fat_type {
            FatType::Fat32 if C::FAT32 && bpb.fs_info_sector != 0 && bpb.fs_info_sector < bpb.reserved_sectors => {
                Some(bpb.fs_info_sector as u64)
            }
            _ => None,
        };

        let mut hints = None;
        if let Some(at) = fs_info_sector {
            let fs_info = sector::read(&mut device, at, FsInfo::parse)?;
            hints = match fs_info {
                Some(fs_info) if !was_dirty && plausible(&fs_info, &geometry) => Some(fs_info),
                Some(_) => {
                    warn!("ignoring FSInfo hints");
                    None
                }
                None => {
                    warn!("FSInfo sector has no signature");
                    None
                }
            };
        }

        let (free_clusters, next_free) = match hints {
            Some(fs_info) => {
                let next = if geometry.is_data_cluster(fs_info.next_free) {
                    fs_info.next_free
                } else {
                    FIRST_DATA_CLUSTER
                };
                (fs_info.free_count, next)
            }
            None => (table.count_free(&mut device)?, FIRST_DATA_CLUSTER),
        };

        info!(
            "mounted {} volume: {} clusters of {} bytes, {} free",
            geometry.fat_type,
            geometry.cluster_count,
            geometry.bytes_per_cluster(),
            free_clusters
        );

        Ok(Self {
            device,
            geometry,
            fat: Fat::new(table, free_clusters, next_free),
            codepage,
            clock,
            label: bpb.volume_label,
            volume_id: bpb.volume_id,
            fs_info_sector,
            was_dirty,
            modified: false,
            _config: PhantomData,
        })
    }

    /// End the session and hand the device back. With `clean` the
    /// clean-shutdown flag is set again if this session cleared it; without,
    /// the volume stays marked dirty for recovery tools. A session that never
    /// modified the volume writes nothing.
    pub fn unmount(mut self, clean: bool) -> Result<D, FatError> {
        if self.modified {
            if let Some(at) = self.fs_info_sector {
                let fs_info = FsInfo {
                    free_count: self.fat.free_clusters(),
                    next_free: self.fat.next_free(),
                };
                sector::update(&mut self.device, at, |data| fs_info.write(data))?;
            }
            if clean {
                self.set_clean_bit(true)?;
            }
        }
        info!(
            "unmounted {} volume ({})",
            self.geometry.fat_type,
            if !self.modified {
                "unchanged"
            } else if clean {
                "clean"
            } else {
                "left dirty"
            }
        );
        Ok(self.device)
    }

    /// Clear the clean-shutdown bit before the first change of the session
    pub(crate) fn mark_dirty(&mut self) -> Result<(), FatError> {
        if !self.modified {
            debug!("first modification, clearing clean-shutdown flag");
            self.set_clean_bit(false)?;
            self.modified = true;
        }
        Ok(())
    }

    fn set_clean_bit(&mut self, clean: bool) -> Result<(), FatError> {
        let fat_type = self.geometry.fat_type;
        if !C::FAT16 || fat_type == FatType::Fat12 {
            return Ok(());
        }
        let (clean_bit, _) = clean_bits(fat_type);
        let table = self.fat.table();
        let flags = table.read_raw(&mut self.device, 1)?;
        let flags = if clean { flags | clean_bit } else { flags & !clean_bit };
        table.write_raw(&mut self.device, 1, flags)?;
        Ok(())
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn fat_type(&self) -> FatType {
        self.geometry.fat_type
    }

    pub fn free_clusters(&self) -> u32 {
        self.fat.free_clusters()
    }

    /// Whether the volume lacked the clean-shutdown flag when mounted
    pub fn was_dirty(&self) -> bool {
        self.was_dirty
    }

    pub fn volume_id(&self) -> u32 {
        self.volume_id
    }

    /// Volume label from the boot sector, trailing spaces removed
    pub fn label(&self) -> LabelString {
        let mut label = LabelString::new();
        let len = self.label.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        for &byte in &self.label[..len] {
            let _ = label.try_push(self.codepage.decode(byte));
        }
        label
    }

    pub fn codepage(&self) -> &C::Codepage {
        &self.codepage
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            fat_type: self.geometry.fat_type,
            label: self.label(),
            volume_id: self.volume_id,
            bytes_per_sector: self.geometry.bytes_per_sector,
            bytes_per_cluster: self.geometry.bytes_per_cluster(),
            total_sectors: self.geometry.total_sectors,
            cluster_count: self.geometry.cluster_count,
            free_clusters: self.fat.free_clusters(),
            fat_count: self.geometry.fat_count,
            mirrored: self.geometry.active_fat.is_none(),
            was_dirty: self.was_dirty,
        }
    }

    pub(crate) fn now(&self) -> fatvol_core::DosTimestamp {
        self.clock.now()
    }
}

/// (clean shutdown, no hard error) bits of FAT[1]
fn clean_bits(fat_type: FatType) -> (u32, u32) {
    match fat_type {
        FatType::Fat32 => (FAT32_CLEAN_SHUTDOWN, FAT32_NO_HARD_ERROR),
        _ => (FAT16_CLEAN_SHUTDOWN, FAT16_NO_HARD_ERROR),
    }
}

fn plausible(fs_info: &FsInfo, geometry: &Geometry) -> bool {
    fs_info.free_count != FSINFO_UNKNOWN && fs_info.free_count <= geometry.cluster_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::format::make;
    use fatvol_core::{Fat12Config, Fat16Config, FormatOptions, MemoryDevice};

    fn formatted(sectors: u64) -> MemoryDevice {
        let mut dev = MemoryDevice::new(sectors, 512);
        make::<DefaultConfig, _>(&mut dev, &FormatOptions::new([1, 2, 3, 4])).unwrap();
        dev
    }

    #[test]
    fn test_mount_blank_device_fails() {
        let mut dev = MemoryDevice::new(64, 512);
        let result = FileSystem::<_, DefaultConfig>::mount(&mut dev);
        assert!(matches!(result, Err(FatError::Mount(MountError::BadSignature))));
        assert_eq!(dev.live_mappings(), 0);
    }

    #[test]
    fn test_mount_reports_geometry() {
        let mut dev = formatted(2880);
        let fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        assert_eq!(fs.fat_type(), FatType::Fat12);
        assert_eq!(fs.geometry().cluster_count, 2847);
        assert_eq!(fs.free_clusters(), 2847);
        assert_eq!(fs.volume_id(), u32::from_le_bytes([1, 2, 3, 4]));
        assert_eq!(fs.label().as_str(), "NO NAME");
        assert!(!fs.was_dirty());
    }

    #[test]
    fn test_width_above_maximum_is_refused() {
        let mut dev = formatted(40_000);
        let result = FileSystem::<_, Fat12Config>::mount(&mut dev);
        assert!(matches!(
            result,
            Err(FatError::Mount(MountError::UnsupportedConfiguration {
                found: FatType::Fat16,
                max: FatType::Fat12
            }))
        ));
        assert!(FileSystem::<_, Fat16Config>::mount(&mut dev).is_ok());
    }

    #[test]
    fn test_dirty_flag_cycle() {
        let mut dev = formatted(40_000);
        {
            let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
            fs.mark_dirty().unwrap();
            fs.unmount(false).unwrap();
        }
        let fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        assert!(fs.was_dirty());
        let mut fs = fs;
        fs.mark_dirty().unwrap();
        fs.unmount(true).unwrap();
        let fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        assert!(!fs.was_dirty());
    }

    #[test]
    fn test_unmodified_unmount_writes_nothing() {
        let mut dev = formatted(40_000);
        let before = dev.as_bytes().to_vec();
        let commits = dev.commit_count();
        let fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        fs.unmount(true).unwrap();
        assert_eq!(dev.commit_count(), commits);
        assert_eq!(dev.as_bytes(), &before[..]);
    }

    #[test]
    fn test_free_count_hint_bounds() {
        let mut dev = MemoryDevice::new(70_000, 512);
        let mut options = FormatOptions::new([0; 4]);
        options.fat_type = Some(FatType::Fat32);
        make::<DefaultConfig, _>(&mut dev, &options).unwrap();
        let fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        let geometry = *fs.geometry();
        let hint = |free_count| FsInfo { free_count, next_free: 3 };

        // every data cluster free is a valid state
        assert!(plausible(&hint(geometry.cluster_count), &geometry));
        assert!(plausible(&hint(0), &geometry));
        assert!(!plausible(&hint(geometry.cluster_count + 1), &geometry));
        assert!(!plausible(&hint(FSINFO_UNKNOWN), &geometry));
    }

    #[test]
    fn test_info_summary() {
        let mut dev = formatted(2880);
        let fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        let info = fs.info();
        assert_eq!(info.fat_type, FatType::Fat12);
        assert!(info.mirrored);
        assert_eq!(info.bytes_per_cluster, 512);
    }
}
