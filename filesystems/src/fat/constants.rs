// On-disk constants shared by FAT12, FAT16 and FAT32

use static_assertions::{const_assert, const_assert_eq};

// Boot sector offsets
pub const BS_JMP_BOOT: usize = 0x00;
pub const BS_OEM_NAME: usize = 0x03;
pub const BPB_BYTES_PER_SEC: usize = 0x0B;
pub const BPB_SEC_PER_CLUS: usize = 0x0D;
pub const BPB_RSVD_SEC_CNT: usize = 0x0E;
pub const BPB_NUM_FATS: usize = 0x10;
pub const BPB_ROOT_ENT_CNT: usize = 0x11;
pub const BPB_TOT_SEC16: usize = 0x13;
pub const BPB_MEDIA: usize = 0x15;
pub const BPB_FAT_SZ16: usize = 0x16;
pub const BPB_SEC_PER_TRK: usize = 0x18;
pub const BPB_NUM_HEADS: usize = 0x1A;
pub const BPB_HIDD_SEC: usize = 0x1C;
pub const BPB_TOT_SEC32: usize = 0x20;

// FAT12/16 extended BPB (starts at 36)
pub const BS16_DRV_NUM: usize = 0x24;
pub const BS16_BOOT_SIG: usize = 0x26;
pub const BS16_VOL_ID: usize = 0x27;
pub const BS16_VOL_LAB: usize = 0x2B;
pub const BS16_FIL_SYS_TYPE: usize = 0x36;

// FAT32 extended BPB (starts at 36)
pub const BPB_FAT_SZ32: usize = 0x24;
pub const BPB_EXT_FLAGS: usize = 0x28;
pub const BPB_FS_VER: usize = 0x2A;
pub const BPB_ROOT_CLUS: usize = 0x2C;
pub const BPB_FS_INFO: usize = 0x30;
pub const BPB_BK_BOOT_SEC: usize = 0x32;
pub const BS32_DRV_NUM: usize = 0x40;
pub const BS32_BOOT_SIG: usize = 0x42;
pub const BS32_VOL_ID: usize = 0x43;
pub const BS32_VOL_LAB: usize = 0x47;
pub const BS32_FIL_SYS_TYPE: usize = 0x52;

pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
pub const BOOT_SIGNATURE_OFFSET: usize = 0x1FE;
pub const EXTENDED_BOOT_SIGNATURE: u8 = 0x29;
pub const BOOT_SECTOR_SIZE: usize = 512;
pub const OEM_NAME: [u8; 8] = *b"FATVOL  ";

// Mirroring is disabled when this ext-flags bit is set; bits 0-3 select the FAT
pub const EXT_FLAGS_NO_MIRROR: u16 = 0x0080;
pub const EXT_FLAGS_ACTIVE_MASK: u16 = 0x000F;

// FSInfo sector
pub const FSINFO_LEAD_SIG: u32 = 0x4161_5252;
pub const FSINFO_STRUC_SIG: u32 = 0x6141_7272;
pub const FSINFO_TRAIL_SIG: u32 = 0xAA55_0000;
pub const FSINFO_LEAD_SIG_OFFSET: usize = 0;
pub const FSINFO_STRUC_SIG_OFFSET: usize = 484;
pub const FSINFO_FREE_COUNT_OFFSET: usize = 488;
pub const FSINFO_NXT_FREE_OFFSET: usize = 492;
pub const FSINFO_TRAIL_SIG_OFFSET: usize = 508;
pub const FSINFO_UNKNOWN: u32 = 0xFFFF_FFFF;

pub const FAT32_ROOT_CLUSTER: u32 = 2;
pub const FAT32_FS_INFO_SECTOR: u16 = 1;
pub const FAT32_BACKUP_BOOT_SECTOR: u16 = 6;

// Clean-shutdown bits in FAT[1]
pub const FAT16_CLEAN_SHUTDOWN: u32 = 0x8000;
pub const FAT16_NO_HARD_ERROR: u32 = 0x4000;
pub const FAT32_CLEAN_SHUTDOWN: u32 = 0x0800_0000;
pub const FAT32_NO_HARD_ERROR: u32 = 0x0400_0000;

/// First valid data cluster
pub const FIRST_DATA_CLUSTER: u32 = 2;

// Media descriptors
pub const MEDIA_FIXED: u8 = 0xF8;
pub const MEDIA_REMOVABLE: u8 = 0xF0;

// Directory entries
pub const DIR_ENTRY_SIZE: usize = 32;
pub const DIR_ENTRY_FREE: u8 = 0x00;
pub const DIR_ENTRY_DELETED: u8 = 0xE5;
/// A leading 0xE5 in a real name is stored as 0x05
pub const DIR_ENTRY_KANJI_E5: u8 = 0x05;

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
pub const ATTR_LONG_NAME: u8 = ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_VOLUME_ID;
pub const ATTR_LONG_NAME_MASK: u8 = 0x3F;

// NT reserved byte: lowercase base / extension
pub const NT_LOWER_BASE: u8 = 0x08;
pub const NT_LOWER_EXT: u8 = 0x10;

// Directory entry field offsets
pub const DIR_NAME: usize = 0;
pub const DIR_ATTR: usize = 11;
pub const DIR_NT_RES: usize = 12;
pub const DIR_CRT_TIME_TENTH: usize = 13;
pub const DIR_CRT_TIME: usize = 14;
pub const DIR_CRT_DATE: usize = 16;
pub const DIR_LST_ACC_DATE: usize = 18;
pub const DIR_FST_CLUS_HI: usize = 20;
pub const DIR_WRT_TIME: usize = 22;
pub const DIR_WRT_DATE: usize = 24;
pub const DIR_FST_CLUS_LO: usize = 26;
pub const DIR_FILE_SIZE: usize = 28;

// Long-name entries
pub const LDIR_ORD: usize = 0;
pub const LDIR_NAME1: usize = 1;
pub const LDIR_ATTR: usize = 11;
pub const LDIR_TYPE: usize = 12;
pub const LDIR_CHKSUM: usize = 13;
pub const LDIR_NAME2: usize = 14;
pub const LDIR_FST_CLUS_LO: usize = 26;
pub const LDIR_NAME3: usize = 28;
pub const LAST_LONG_ENTRY: u8 = 0x40;
pub const LONG_ENTRY_ORD_MASK: u8 = 0x1F;
pub const LFN_CHARS_PER_ENTRY: usize = 13;
pub const MAX_LFN_ENTRIES: usize = 20;
pub const MAX_LFN_UNITS: usize = 255;

/// Worst-case UTF-8 length of a long name (3 bytes per UTF-16 unit)
pub const MAX_NAME_BYTES: usize = MAX_LFN_UNITS * 3;
/// Worst-case UTF-8 length of a decoded 8.3 name
pub const MAX_SHORT_NAME_BYTES: usize = 12 * 3;

const_assert_eq!(DIR_ENTRY_SIZE, 32);
const_assert!(LFN_CHARS_PER_ENTRY * MAX_LFN_ENTRIES >= MAX_LFN_UNITS);
const_assert!(DIR_FILE_SIZE + 4 == DIR_ENTRY_SIZE);
