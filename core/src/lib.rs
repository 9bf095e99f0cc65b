pub mod codepage;
pub mod device;
pub mod error;
pub mod filesystem;
pub mod test_utils;

pub use codepage::{AsciiCodepage, CaseClass, Codepage};
pub use device::{BlockDevice, DeviceError};
pub use error::{FatError, MountError, NameError};
pub use filesystem::{
    Clock, DefaultConfig, DosTimestamp, Fat12Config, Fat16Config, Fat32Config, FatType,
    FixedClock, FormatOptions, LongNameUnits, NameBuffer, NoLongNames, VolumeConfig,
};
pub use test_utils::MemoryDevice;
