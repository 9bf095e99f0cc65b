// Boot sector / BIOS Parameter Block codec and the volume geometry derived
// from it

use byteorder::{ByteOrder, LittleEndian};
use fatvol_core::{FatType, MountError};
use serde::Serialize;

use super::constants::*;

/// Decoded boot sector. Field names follow the BPB; both the 16-bit and
/// 32-bit variants of "total sectors" and "sectors per FAT" are folded into
/// one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BiosParameterBlock {
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_entries: u16,
    pub total_sectors: u32,
    pub media: u8,
    pub sectors_per_fat: u32,
    pub sectors_per_track: u16,
    pub heads: u16,
    pub hidden_sectors: u32,
    pub ext_flags: u16,
    pub fs_version: u16,
    pub root_cluster: u32,
    pub fs_info_sector: u16,
    pub backup_boot_sector: u16,
    pub drive_number: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub fat_type: FatType,
}

/// Layout of a mounted volume, computed once from the BPB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub fat_type: FatType,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub fat_count: u32,
    pub sectors_per_fat: u32,
    pub root_entries: u32,
    pub root_dir_sectors: u32,
    pub first_root_sector: u64,
    pub first_data_sector: u64,
    pub total_sectors: u64,
    pub cluster_count: u32,
    /// FAT32 root directory cluster, 0 on FAT12/16
    pub root_cluster: u32,
    /// Only this FAT is read and written when mirroring is disabled
    pub active_fat: Option<u32>,
}

impl Geometry {
    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    pub fn entries_per_cluster(&self) -> u32 {
        self.bytes_per_cluster() / DIR_ENTRY_SIZE as u32
    }

    /// Highest valid data cluster number
    pub fn max_cluster(&self) -> u32 {
        self.cluster_count + 1
    }

    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        cluster >= FIRST_DATA_CLUSTER && cluster <= self.max_cluster()
    }

    pub fn cluster_first_sector(&self, cluster: u32) -> u64 {
        self.first_data_sector
            + (cluster - FIRST_DATA_CLUSTER) as u64 * self.sectors_per_cluster as u64
    }

    /// Sector where FAT copy `index` begins
    pub fn fat_start(&self, index: u32) -> u64 {
        self.reserved_sectors as u64 + index as u64 * self.sectors_per_fat as u64
    }

    /// Clusters needed to hold `bytes`
    pub fn clusters_for(&self, bytes: u64) -> u32 {
        let cluster = self.bytes_per_cluster() as u64;
        ((bytes + cluster - 1) / cluster) as u32
    }
}

fn is_valid_sector_size(size: u16) -> bool {
    size.is_power_of_two() && (512..=4096).contains(&size)
}

impl BiosParameterBlock {
    /// Parse and validate a boot sector. `buf` must hold at least 512 bytes.
    pub fn parse(buf: &[u8]) -> Result<Self, MountError> {
        if buf.len() < BOOT_SECTOR_SIZE {
            return Err(MountError::InconsistentGeometry("boot sector shorter than 512 bytes"));
        }
        if buf[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2] != BOOT_SIGNATURE {
            return Err(MountError::BadSignature);
        }
        if buf[BS_JMP_BOOT] != 0xEB && buf[BS_JMP_BOOT] != 0xE9 {
            return Err(MountError::BadSignature);
        }

        let bytes_per_sector = LittleEndian::read_u16(&buf[BPB_BYTES_PER_SEC..]);
        let sectors_per_cluster = buf[BPB_SEC_PER_CLUS];
        let reserved_sectors = LittleEndian::read_u16(&buf[BPB_RSVD_SEC_CNT..]);
        let fat_count = buf[BPB_NUM_FATS];
        let root_entries = LittleEndian::read_u16(&buf[BPB_ROOT_ENT_CNT..]);
        let total_sectors_16 = LittleEndian::read_u16(&buf[BPB_TOT_SEC16..]);
        let media = buf[BPB_MEDIA];
        let fat_size_16 = LittleEndian::read_u16(&buf[BPB_FAT_SZ16..]);
        let total_sectors_32 = LittleEndian::read_u32(&buf[BPB_TOT_SEC32..]);

        if !is_valid_sector_size(bytes_per_sector) {
            return Err(MountError::InconsistentGeometry("bytes per sector"));
        }
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(MountError::InconsistentGeometry("sectors per cluster"));
        }
        if reserved_sectors == 0 {
            return Err(MountError::InconsistentGeometry("reserved sector count"));
        }
        if fat_count == 0 {
            return Err(MountError::InconsistentGeometry("FAT count"));
        }
        if media != MEDIA_REMOVABLE && media < MEDIA_FIXED {
            return Err(MountError::InconsistentGeometry("media descriptor"));
        }

        let total_sectors = if total_sectors_16 != 0 {
            total_sectors_16 as u32
        } else {
            total_sectors_32
        };
        if total_sectors == 0 {
            return Err(MountError::InconsistentGeometry("total sectors"));
        }

        // FAT32 layout is signalled by a zero 16-bit FAT size
        let fat32_layout = fat_size_16 == 0;
        let sectors_per_fat = if fat32_layout {
            LittleEndian::read_u32(&buf[BPB_FAT_SZ32..])
        } else {
            fat_size_16 as u32
        };
        if sectors_per_fat == 0 {
            return Err(MountError::InconsistentGeometry("sectors per FAT"));
        }

        let mut bpb = BiosParameterBlock {
            oem_name: [0; 8],
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            root_entries,
            total_sectors,
            media,
            sectors_per_fat,
            sectors_per_track: LittleEndian::read_u16(&buf[BPB_SEC_PER_TRK..]),
            heads: LittleEndian::read_u16(&buf[BPB_NUM_HEADS..]),
            hidden_sectors: LittleEndian::read_u32(&buf[BPB_HIDD_SEC..]),
            ext_flags: 0,
            fs_version: 0,
            root_cluster: 0,
            fs_info_sector: 0,
            backup_boot_sector: 0,
            drive_number: 0,
            volume_id: 0,
            volume_label: [b' '; 11],
            fat_type: FatType::Fat12,
        };
        bpb.oem_name.copy_from_slice(&buf[BS_OEM_NAME..BS_OEM_NAME + 8]);

        let ext = if fat32_layout {
            bpb.ext_flags = LittleEndian::read_u16(&buf[BPB_EXT_FLAGS..]);
            bpb.fs_version = LittleEndian::read_u16(&buf[BPB_FS_VER..]);
            bpb.root_cluster = LittleEndian::read_u32(&buf[BPB_ROOT_CLUS..]);
            bpb.fs_info_sector = LittleEndian::read_u16(&buf[BPB_FS_INFO..]);
            bpb.backup_boot_sector = LittleEndian::read_u16(&buf[BPB_BK_BOOT_SEC..]);
            (BS32_DRV_NUM, BS32_BOOT_SIG, BS32_VOL_ID, BS32_VOL_LAB)
        } else {
            (BS16_DRV_NUM, BS16_BOOT_SIG, BS16_VOL_ID, BS16_VOL_LAB)
        };
        let (drv_num, boot_sig, vol_id, vol_lab) = ext;
        bpb.drive_number = buf[drv_num];
        if buf[boot_sig] == EXTENDED_BOOT_SIGNATURE {
            bpb.volume_id = LittleEndian::read_u32(&buf[vol_id..]);
            bpb.volume_label.copy_from_slice(&buf[vol_lab..vol_lab + 11]);
        }

        let geometry = bpb.compute_geometry()?;
        bpb.fat_type = geometry.fat_type;

        match (fat32_layout, geometry.fat_type) {
            (true, FatType::Fat32) => {
                if root_entries != 0 {
                    return Err(MountError::InconsistentGeometry("FAT32 with fixed root directory"));
                }
                if !geometry.is_data_cluster(bpb.root_cluster) {
                    return Err(MountError::InconsistentGeometry("root cluster"));
                }
            }
            (false, FatType::Fat12 | FatType::Fat16) => {
                if root_entries == 0 {
                    return Err(MountError::InconsistentGeometry("missing root directory"));
                }
            }
            _ => {
                return Err(MountError::InconsistentGeometry(
                    "BPB layout disagrees with cluster count",
                ))
            }
        }

        Ok(bpb)
    }

    /// Derive the volume layout. The FAT width follows from the cluster
    /// count alone.
    pub fn compute_geometry(&self) -> Result<Geometry, MountError> {
        let bytes_per_sector = self.bytes_per_sector as u32;
        let root_dir_sectors =
            (self.root_entries as u32 * DIR_ENTRY_SIZE as u32 + bytes_per_sector - 1) / bytes_per_sector;
        let first_root_sector =
            self.reserved_sectors as u64 + self.fat_count as u64 * self.sectors_per_fat as u64;
        let first_data_sector = first_root_sector + root_dir_sectors as u64;
        let total_sectors = self.total_sectors as u64;
        if first_data_sector >= total_sectors {
            return Err(MountError::InconsistentGeometry("no room for data region"));
        }

        let data_sectors = total_sectors - first_data_sector;
        let cluster_count = (data_sectors / self.sectors_per_cluster as u64) as u32;
        if cluster_count == 0 {
            return Err(MountError::InconsistentGeometry("no data clusters"));
        }
        let fat_type = FatType::from_cluster_count(cluster_count);
        if cluster_count > fat_type.max_clusters() {
            return Err(MountError::InconsistentGeometry("too many clusters"));
        }

        let fat_bytes = self.sectors_per_fat as u64 * bytes_per_sector as u64;
        if fat_type.fat_bytes(cluster_count as u64 + 2) > fat_bytes {
            return Err(MountError::InconsistentGeometry("FAT too small for cluster count"));
        }

        let active_fat = if fat_type == FatType::Fat32 && self.ext_flags & EXT_FLAGS_NO_MIRROR != 0 {
            let active = (self.ext_flags & EXT_FLAGS_ACTIVE_MASK) as u32;
            if active >= self.fat_count as u32 {
                return Err(MountError::InconsistentGeometry("active FAT out of range"));
            }
            Some(active)
        } else {
            None
        };

        Ok(Geometry {
            fat_type,
            bytes_per_sector,
            sectors_per_cluster: self.sectors_per_cluster as u32,
            reserved_sectors: self.reserved_sectors as u32,
            fat_count: self.fat_count as u32,
            sectors_per_fat: self.sectors_per_fat,
            root_entries: self.root_entries as u32,
            root_dir_sectors,
            first_root_sector,
            first_data_sector,
            total_sectors,
            cluster_count,
            root_cluster: if fat_type == FatType::Fat32 { self.root_cluster } else { 0 },
            active_fat,
        })
    }

    /// Serialize into the first 512 bytes of `buf`, signature included.
    /// Bytes past 512 are left untouched.
    pub fn write(&self, buf: &mut [u8]) {
        let buf = &mut buf[..BOOT_SECTOR_SIZE];
        buf.fill(0);

        let fat32 = self.fat_type == FatType::Fat32;
        buf[BS_JMP_BOOT..BS_JMP_BOOT + 3].copy_from_slice(if fat32 {
            &[0xEB, 0x58, 0x90]
        } else {
            &[0xEB, 0x3C, 0x90]
        });
        buf[BS_OEM_NAME..BS_OEM_NAME + 8].copy_from_slice(&self.oem_name);
        LittleEndian::write_u16(&mut buf[BPB_BYTES_PER_SEC..], self.bytes_per_sector);
        buf[BPB_SEC_PER_CLUS] = self.sectors_per_cluster;
        LittleEndian::write_u16(&mut buf[BPB_RSVD_SEC_CNT..], self.reserved_sectors);
        buf[BPB_NUM_FATS] = self.fat_count;
        LittleEndian::write_u16(&mut buf[BPB_ROOT_ENT_CNT..], self.root_entries);
        if self.total_sectors < 0x10000 && !fat32 {
            LittleEndian::write_u16(&mut buf[BPB_TOT_SEC16..], self.total_sectors as u16);
        } else {
            LittleEndian::write_u32(&mut buf[BPB_TOT_SEC32..], self.total_sectors);
        }
        buf[BPB_MEDIA] = self.media;
        LittleEndian::write_u16(&mut buf[BPB_SEC_PER_TRK..], self.sectors_per_track);
        LittleEndian::write_u16(&mut buf[BPB_NUM_HEADS..], self.heads);
        LittleEndian::write_u32(&mut buf[BPB_HIDD_SEC..], self.hidden_sectors);

        let (drv_num, boot_sig, vol_id, vol_lab, fs_type) = if fat32 {
            LittleEndian::write_u32(&mut buf[BPB_FAT_SZ32..], self.sectors_per_fat);
            LittleEndian::write_u16(&mut buf[BPB_EXT_FLAGS..], self.ext_flags);
            LittleEndian::write_u16(&mut buf[BPB_FS_VER..], self.fs_version);
            LittleEndian::write_u32(&mut buf[BPB_ROOT_CLUS..], self.root_cluster);
            LittleEndian::write_u16(&mut buf[BPB_FS_INFO..], self.fs_info_sector);
            LittleEndian::write_u16(&mut buf[BPB_BK_BOOT_SEC..], self.backup_boot_sector);
            (BS32_DRV_NUM, BS32_BOOT_SIG, BS32_VOL_ID, BS32_VOL_LAB, BS32_FIL_SYS_TYPE)
        } else {
            LittleEndian::write_u16(&mut buf[BPB_FAT_SZ16..], self.sectors_per_fat as u16);
            (BS16_DRV_NUM, BS16_BOOT_SIG, BS16_VOL_ID, BS16_VOL_LAB, BS16_FIL_SYS_TYPE)
        };
        buf[drv_num] = self.drive_number;
        buf[boot_sig] = EXTENDED_BOOT_SIGNATURE;
        LittleEndian::write_u32(&mut buf[vol_id..], self.volume_id);
        buf[vol_lab..vol_lab + 11].copy_from_slice(&self.volume_label);
        buf[fs_type..fs_type + 8].copy_from_slice(self.fat_type.label());

        buf[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2].copy_from_slice(&BOOT_SIGNATURE);
    }
}

/// FAT32 FSInfo hints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    pub free_count: u32,
    pub next_free: u32,
}

impl FsInfo {
    /// `None` when any of the three signatures is missing
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < BOOT_SECTOR_SIZE
            || LittleEndian::read_u32(&buf[FSINFO_LEAD_SIG_OFFSET..]) != FSINFO_LEAD_SIG
            || LittleEndian::read_u32(&buf[FSINFO_STRUC_SIG_OFFSET..]) != FSINFO_STRUC_SIG
            || LittleEndian::read_u32(&buf[FSINFO_TRAIL_SIG_OFFSET..]) != FSINFO_TRAIL_SIG
        {
            return None;
        }
        Some(Self {
            free_count: LittleEndian::read_u32(&buf[FSINFO_FREE_COUNT_OFFSET..]),
            next_free: LittleEndian::read_u32(&buf[FSINFO_NXT_FREE_OFFSET..]),
        })
    }

    pub fn write(&self, buf: &mut [u8]) {
        let buf = &mut buf[..BOOT_SECTOR_SIZE];
        buf.fill(0);
        LittleEndian::write_u32(&mut buf[FSINFO_LEAD_SIG_OFFSET..], FSINFO_LEAD_SIG);
        LittleEndian::write_u32(&mut buf[FSINFO_STRUC_SIG_OFFSET..], FSINFO_STRUC_SIG);
        LittleEndian::write_u32(&mut buf[FSINFO_FREE_COUNT_OFFSET..], self.free_count);
        LittleEndian::write_u32(&mut buf[FSINFO_NXT_FREE_OFFSET..], self.next_free);
        LittleEndian::write_u32(&mut buf[FSINFO_TRAIL_SIG_OFFSET..], FSINFO_TRAIL_SIG);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floppy_bpb() -> BiosParameterBlock {
        BiosParameterBlock {
            oem_name: OEM_NAME,
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sectors: 1,
            fat_count: 2,
            root_entries: 224,
            total_sectors: 2880,
            media: MEDIA_REMOVABLE,
            sectors_per_fat: 9,
            sectors_per_track: 18,
            heads: 2,
            hidden_sectors: 0,
            ext_flags: 0,
            fs_version: 0,
            root_cluster: 0,
            fs_info_sector: 0,
            backup_boot_sector: 0,
            drive_number: 0,
            volume_id: 0x1234_5678,
            volume_label: *b"NO NAME    ",
            fat_type: FatType::Fat12,
        }
    }

    #[test]
    fn test_floppy_geometry() {
        let geometry = floppy_bpb().compute_geometry().unwrap();
        assert_eq!(geometry.fat_type, FatType::Fat12);
        assert_eq!(geometry.root_dir_sectors, 14);
        assert_eq!(geometry.first_root_sector, 19);
        assert_eq!(geometry.first_data_sector, 33);
        assert_eq!(geometry.cluster_count, 2847);
    }

    #[test]
    fn test_write_then_parse() {
        let bpb = floppy_bpb();
        let mut sector = [0u8; 512];
        bpb.write(&mut sector);
        assert_eq!(&sector[BS16_FIL_SYS_TYPE..BS16_FIL_SYS_TYPE + 8], b"FAT12   ");
        assert_eq!(LittleEndian::read_u16(&sector[BPB_TOT_SEC16..]), 2880);
        assert_eq!(BiosParameterBlock::parse(&sector).unwrap(), bpb);
    }

    #[test]
    fn test_missing_signature() {
        let mut sector = [0u8; 512];
        floppy_bpb().write(&mut sector);
        sector[BOOT_SIGNATURE_OFFSET] = 0;
        assert!(matches!(
            BiosParameterBlock::parse(&sector),
            Err(MountError::BadSignature)
        ));
    }

    #[test]
    fn test_rejects_bad_sector_size() {
        let mut sector = [0u8; 512];
        floppy_bpb().write(&mut sector);
        LittleEndian::write_u16(&mut sector[BPB_BYTES_PER_SEC..], 768);
        assert!(matches!(
            BiosParameterBlock::parse(&sector),
            Err(MountError::InconsistentGeometry("bytes per sector"))
        ));
    }

    #[test]
    fn test_rejects_non_power_of_two_cluster() {
        let mut sector = [0u8; 512];
        floppy_bpb().write(&mut sector);
        sector[BPB_SEC_PER_CLUS] = 3;
        assert!(BiosParameterBlock::parse(&sector).is_err());
    }

    #[test]
    fn test_rejects_undersized_fat() {
        let mut bpb = floppy_bpb();
        bpb.sectors_per_fat = 2;
        assert!(matches!(
            bpb.compute_geometry(),
            Err(MountError::InconsistentGeometry("FAT too small for cluster count"))
        ));
    }

    #[test]
    fn test_fsinfo_round_trip() {
        let info = FsInfo { free_count: 1000, next_free: 3 };
        let mut sector = [0u8; 512];
        info.write(&mut sector);
        assert_eq!(FsInfo::parse(&sector), Some(info));
        sector[0] = 0;
        assert_eq!(FsInfo::parse(&sector), None);
    }
}
