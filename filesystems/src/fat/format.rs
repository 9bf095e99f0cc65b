// Volume creation: lays out reserved sectors, FAT copies and an empty root
// directory. The layout is computed in full before the first write, and the
// boot sector goes down last so an interrupted format never leaves a
// mountable volume behind.

use fatvol_core::{BlockDevice, Clock, DeviceError, FatError, FatType, FormatOptions, VolumeConfig};
use log::{debug, info};

use super::boot_sector::{BiosParameterBlock, FsInfo};
use super::cluster_calc::{calculate_params, FormatParams};
use super::constants::*;
use super::directory::ShortEntry;
use super::fat_table::{FatEntry, FatTable};
use super::sector;

const DEFAULT_LABEL: [u8; 11] = *b"NO NAME    ";

fn build_bpb(params: &FormatParams, options: &FormatOptions) -> BiosParameterBlock {
    let fat32 = params.fat_type == FatType::Fat32;
    BiosParameterBlock {
        oem_name: OEM_NAME,
        bytes_per_sector: params.bytes_per_sector,
        sectors_per_cluster: params.sectors_per_cluster,
        reserved_sectors: params.reserved_sectors,
        fat_count: params.fat_count,
        root_entries: params.root_entries,
        total_sectors: params.total_sectors,
        media: params.media,
        sectors_per_fat: params.sectors_per_fat,
        sectors_per_track: params.sectors_per_track,
        heads: params.heads,
        hidden_sectors: 0,
        ext_flags: 0,
        fs_version: 0,
        root_cluster: if fat32 { FAT32_ROOT_CLUSTER } else { 0 },
        fs_info_sector: if fat32 { FAT32_FS_INFO_SECTOR } else { 0 },
        backup_boot_sector: if fat32 { FAT32_BACKUP_BOOT_SECTOR } else { 0 },
        drive_number: if params.media == MEDIA_FIXED { 0x80 } else { 0x00 },
        volume_id: u32::from_le_bytes(options.volume_id),
        volume_label: options.label.unwrap_or(DEFAULT_LABEL),
        fat_type: params.fat_type,
    }
}

/// Format `device` as a FAT volume sized to the whole device. The width is
/// chosen from the device size unless `options.fat_type` asks for one, and
/// never exceeds `C::MAX_TYPE`. Returns the boot sector that was written.
/// The volume is not mounted.
pub fn make<C: VolumeConfig, D: BlockDevice>(
    device: &mut D,
    options: &FormatOptions,
) -> Result<BiosParameterBlock, FatError> {
    let block_size = device.logical_block_size();
    if !block_size.is_power_of_two() || !(512..=4096).contains(&block_size) {
        return Err(DeviceError::BlockSize {
            requested: block_size,
        }
        .into());
    }

    let params = calculate_params(device.size(), block_size as u16, C::MAX_TYPE, options)?;
    let bpb = build_bpb(&params, options);
    let geometry = bpb.compute_geometry()?;
    debug_assert_eq!(geometry.fat_type, params.fat_type);
    let table = FatTable::<C>::new(&geometry)?;

    // Invalidate whatever was there before touching anything else
    sector::zero(device, 0, 1)?;
    sector::zero(device, 1, geometry.reserved_sectors as u64 - 1)?;

    for copy in 0..geometry.fat_count {
        sector::zero(device, geometry.fat_start(copy), geometry.sectors_per_fat as u64)?;
    }
    let media_entry = match geometry.fat_type {
        FatType::Fat12 => 0x0F00,
        FatType::Fat16 => 0xFF00,
        FatType::Fat32 => 0x0FFF_FF00,
    } | params.media as u32;
    table.write_raw(device, 0, media_entry)?;
    // all ones: end-of-chain, and on FAT16/32 the clean and no-error bits
    table.set(device, 1, FatEntry::EndOfChain)?;

    let (root_sector, root_sectors) = match geometry.fat_type {
        FatType::Fat32 if C::FAT32 => {
            table.set(device, geometry.root_cluster, FatEntry::EndOfChain)?;
            (
                geometry.cluster_first_sector(geometry.root_cluster),
                geometry.sectors_per_cluster as u64,
            )
        }
        _ => (geometry.first_root_sector, geometry.root_dir_sectors as u64),
    };
    sector::zero(device, root_sector, root_sectors)?;

    if let Some(label) = options.label {
        let entry = ShortEntry::new(label, ATTR_VOLUME_ID, 0, C::Clock::default().now());
        sector::update(device, root_sector, |data| entry.write(&mut data[..DIR_ENTRY_SIZE]))?;
    }

    if C::FAT32 && geometry.fat_type == FatType::Fat32 {
        // cluster 2 holds the root directory
        let fs_info = FsInfo {
            free_count: geometry.cluster_count - 1,
            next_free: geometry.root_cluster + 1,
        };
        let fs_info_sector = bpb.fs_info_sector as u64;
        let backup = bpb.backup_boot_sector as u64;
        sector::update(device, fs_info_sector, |data| fs_info.write(data))?;
        sector::update(device, backup, |data| bpb.write(data))?;
        sector::update(device, backup + fs_info_sector, |data| fs_info.write(data))?;
        debug!("FSInfo at sector {}, backup boot sector at {}", fs_info_sector, backup);
    }

    sector::update(device, 0, |data| bpb.write(data))?;

    info!(
        "formatted {} volume: {} sectors of {} bytes, {} clusters of {} sectors",
        geometry.fat_type,
        geometry.total_sectors,
        geometry.bytes_per_sector,
        geometry.cluster_count,
        geometry.sectors_per_cluster
    );
    Ok(bpb)
}
