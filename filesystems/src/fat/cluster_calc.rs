// Cluster size and FAT size calculation for freshly formatted volumes.
// The FAT width is always the one implied by the resulting cluster count.

use fatvol_core::{FatError, FatType, FormatOptions};
use log::debug;

use super::constants::*;

/// Layout chosen for a new volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatParams {
    pub fat_type: FatType,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    /// 0 for FAT32
    pub root_entries: u16,
    pub sectors_per_fat: u32,
    pub total_sectors: u32,
    pub cluster_count: u32,
    pub media: u8,
    pub sectors_per_track: u16,
    pub heads: u16,
}

// Below this many 512-byte sectors a volume is formatted as FAT12
const FAT12_SIZE_LIMIT: u64 = 8400;
// Up to 1 GiB, FAT16
const FAT16_SIZE_LIMIT: u64 = 2_097_152;
// 1.44M floppy and smaller
const FLOPPY_SIZE_LIMIT: u64 = 2880;
const REMOVABLE_SIZE_LIMIT: u64 = 5760;
const MAX_CLUSTER_BYTES: u32 = 64 * 1024;

/// Width preferred for a volume of `sectors_512` 512-byte sectors
fn preferred_type(sectors_512: u64) -> FatType {
    if sectors_512 < FAT12_SIZE_LIMIT {
        FatType::Fat12
    } else if sectors_512 <= FAT16_SIZE_LIMIT {
        FatType::Fat16
    } else {
        FatType::Fat32
    }
}

/// Recommended cluster size in bytes
fn default_cluster_bytes(fat_type: FatType, sectors_512: u64) -> u32 {
    let sectors = match fat_type {
        // grown until the count fits below the FAT12 limit
        FatType::Fat12 => 1,
        FatType::Fat16 => {
            if sectors_512 <= 32_680 {
                2
            } else if sectors_512 <= 262_144 {
                4
            } else if sectors_512 <= 524_288 {
                8
            } else if sectors_512 <= 1_048_576 {
                16
            } else if sectors_512 <= 2_097_152 {
                32
            } else {
                64
            }
        }
        FatType::Fat32 => {
            if sectors_512 <= 532_480 {
                1
            } else if sectors_512 <= 16_777_216 {
                8
            } else if sectors_512 <= 33_554_432 {
                16
            } else if sectors_512 <= 67_108_864 {
                32
            } else {
                64
            }
        }
    };
    sectors * 512
}

/// Choose the geometry for a device of `total_sectors` sectors of
/// `bytes_per_sector` bytes. Nothing is written.
pub fn calculate_params(
    total_sectors: u64,
    bytes_per_sector: u16,
    max_type: FatType,
    options: &FormatOptions,
) -> Result<FormatParams, FatError> {
    // BPB can describe at most 2^32 - 1 sectors
    let total_sectors = total_sectors.min(u32::MAX as u64) as u32;
    let sectors_512 = total_sectors as u64 * bytes_per_sector as u64 / 512;

    if let Some(fat_type) = options.fat_type {
        if fat_type > max_type {
            return Err(FatError::UnsupportedConfiguration(
                "requested FAT width exceeds the configured maximum",
            ));
        }
        return calculate_for(fat_type, total_sectors, bytes_per_sector, options);
    }

    let preferred = preferred_type(sectors_512).min(max_type);
    let first_error = match calculate_for(preferred, total_sectors, bytes_per_sector, options) {
        Ok(params) => return Ok(params),
        Err(e) => e,
    };

    // Fall back to the other permitted widths, narrower first
    for fat_type in [FatType::Fat12, FatType::Fat16, FatType::Fat32] {
        if fat_type == preferred || fat_type > max_type {
            continue;
        }
        if let Ok(params) = calculate_for(fat_type, total_sectors, bytes_per_sector, options) {
            debug!("{} did not fit, formatting as {}", preferred, fat_type);
            return Ok(params);
        }
    }

    Err(match first_error {
        FatError::InsufficientClusters { clusters, .. } => FatError::InsufficientClusters {
            fat_type: None,
            clusters,
        },
        e => e,
    })
}

enum Fit {
    Ok(FormatParams),
    TooFew(u64),
    TooMany,
}

/// Lay out a volume of exactly `fat_type`
pub fn calculate_for(
    fat_type: FatType,
    total_sectors: u32,
    bytes_per_sector: u16,
    options: &FormatOptions,
) -> Result<FormatParams, FatError> {
    let bps = bytes_per_sector as u32;
    let sectors_512 = total_sectors as u64 * bps as u64 / 512;

    let reserved_sectors = options
        .reserved_sectors
        .unwrap_or(if fat_type == FatType::Fat32 { 32 } else { 1 });
    if reserved_sectors == 0 {
        return Err(FatError::UnsupportedConfiguration("reserved sector count must be non-zero"));
    }
    if fat_type == FatType::Fat32 && reserved_sectors < 8 {
        return Err(FatError::UnsupportedConfiguration(
            "FAT32 needs 8 reserved sectors for FSInfo and the backup boot sector",
        ));
    }

    let fat_count = options.fat_count.unwrap_or(2);
    if fat_count == 0 {
        return Err(FatError::UnsupportedConfiguration("FAT count must be non-zero"));
    }

    let root_entries = if fat_type == FatType::Fat32 {
        0
    } else {
        let requested = options.root_entries.unwrap_or(
            if fat_type == FatType::Fat12 && sectors_512 <= FLOPPY_SIZE_LIMIT {
                224
            } else {
                512
            },
        );
        if requested == 0 {
            return Err(FatError::UnsupportedConfiguration("root directory needs entries"));
        }
        // whole sectors only
        let per_sector = (bps / DIR_ENTRY_SIZE as u32) as u16;
        requested
            .checked_add(per_sector - 1)
            .map(|n| n / per_sector * per_sector)
            .ok_or(FatError::UnsupportedConfiguration("too many root entries"))?
    };

    let base = Layout {
        fat_type,
        bps,
        total_sectors,
        reserved_sectors,
        fat_count,
        root_entries,
    };

    let params = match options.sectors_per_cluster {
        Some(spc) => {
            if spc == 0 || !spc.is_power_of_two() {
                return Err(FatError::UnsupportedConfiguration(
                    "sectors per cluster must be a power of two",
                ));
            }
            match base.fit(spc) {
                Fit::Ok(params) => params,
                Fit::TooFew(clusters) => {
                    return Err(FatError::InsufficientClusters {
                        fat_type: Some(fat_type),
                        clusters,
                    })
                }
                Fit::TooMany => {
                    return Err(FatError::UnsupportedConfiguration(
                        "cluster size too small for the FAT width",
                    ))
                }
            }
        }
        None => {
            let cluster_bytes = default_cluster_bytes(fat_type, sectors_512);
            let mut spc = (cluster_bytes / bps).clamp(1, 128) as u8;
            // Walk the cluster size toward a count inside the width's range;
            // stepping back and forth between two sizes is not possible since
            // doubling the cluster size at least halves the count.
            loop {
                match base.fit(spc) {
                    Fit::Ok(params) => break params,
                    Fit::TooFew(clusters) => {
                        if spc == 1 {
                            return Err(FatError::InsufficientClusters {
                                fat_type: Some(fat_type),
                                clusters,
                            });
                        }
                        spc /= 2;
                    }
                    Fit::TooMany => {
                        if spc >= 128 || spc as u32 * 2 * bps > MAX_CLUSTER_BYTES {
                            return Err(FatError::UnsupportedConfiguration(
                                "volume too large for the FAT width",
                            ));
                        }
                        spc *= 2;
                    }
                }
            }
        }
    };

    debug!(
        "{} layout: {} sectors, {} per cluster, {} per FAT, {} clusters",
        fat_type, total_sectors, params.sectors_per_cluster, params.sectors_per_fat, params.cluster_count
    );
    Ok(params)
}

struct Layout {
    fat_type: FatType,
    bps: u32,
    total_sectors: u32,
    reserved_sectors: u16,
    fat_count: u8,
    root_entries: u16,
}

impl Layout {
    fn fit(&self, sectors_per_cluster: u8) -> Fit {
        let spc = sectors_per_cluster as u64;
        let total = self.total_sectors as u64;
        let root_dir_sectors =
            (self.root_entries as u64 * DIR_ENTRY_SIZE as u64 + self.bps as u64 - 1) / self.bps as u64;
        let fixed = self.reserved_sectors as u64 + root_dir_sectors;

        // Grow the FAT until it covers every cluster left after it. The size
        // only increases, and the cluster count shrinks as it does, so this
        // settles after a few rounds.
        let mut sectors_per_fat = 1u64;
        let clusters = loop {
            let data_start = fixed + self.fat_count as u64 * sectors_per_fat;
            if data_start >= total {
                return Fit::TooFew(0);
            }
            let clusters = (total - data_start) / spc;
            let needed = (self.fat_type.fat_bytes(clusters + 2) + self.bps as u64 - 1) / self.bps as u64;
            if needed <= sectors_per_fat {
                break clusters;
            }
            sectors_per_fat = needed;
        };

        if clusters < self.fat_type.min_clusters() as u64 {
            return Fit::TooFew(clusters);
        }
        if clusters > self.fat_type.max_clusters() as u64 {
            return Fit::TooMany;
        }

        let sectors_512 = total * self.bps as u64 / 512;
        let (media, sectors_per_track, heads) = if sectors_512 <= REMOVABLE_SIZE_LIMIT {
            (MEDIA_REMOVABLE, 18, 2)
        } else {
            (MEDIA_FIXED, 63, 255)
        };

        Fit::Ok(FormatParams {
            fat_type: self.fat_type,
            bytes_per_sector: self.bps as u16,
            sectors_per_cluster,
            reserved_sectors: self.reserved_sectors,
            fat_count: self.fat_count,
            root_entries: self.root_entries,
            sectors_per_fat: sectors_per_fat as u32,
            total_sectors: self.total_sectors,
            cluster_count: clusters as u32,
            media,
            sectors_per_track,
            heads,
        })
    }
}
