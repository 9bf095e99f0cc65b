// FAT12/16/32 driver running on a mapped block-device capability
pub mod fat;

pub use fat::boot_sector::{BiosParameterBlock, Geometry};
pub use fat::dir_ops::{DirIter, Entry, EntryKind};
pub use fat::format::make as format;
pub use fat::timestamps::SystemClock;
pub use fat::validator::{check_volume, ValidationIssue, ValidationReport};
pub use fat::volume::{FileSystem, VolumeInfo};

pub use fatvol_core::{
    AsciiCodepage, BlockDevice, CaseClass, Codepage, DefaultConfig, DeviceError, DosTimestamp,
    Fat12Config, Fat16Config, Fat32Config, FatError, FatType, FixedClock, FormatOptions,
    MemoryDevice, MountError, NameError, VolumeConfig,
};
