use thiserror::Error;

use crate::device::DeviceError;
use crate::filesystem::FatType;

/// Reasons a volume refuses to mount. Nothing is constructed when one of
/// these is returned.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("Boot sector signature missing")]
    BadSignature,

    #[error("Inconsistent geometry: {0}")]
    InconsistentGeometry(&'static str),

    #[error("Volume is {found} but this build supports up to {max}")]
    UnsupportedConfiguration { found: FatType, max: FatType },

    #[error("Device rejected the volume sector size: {0}")]
    BlockSize(#[source] DeviceError),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum NameError {
    #[error("Name is empty")]
    Empty,

    #[error("Name is {len} characters long (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("Invalid character in name: {0:?}")]
    InvalidCharacter(char),

    #[error("Name is reserved")]
    Reserved,

    #[error("Name does not fit 8.3 and long names are disabled")]
    LongNamesDisabled,
}

#[derive(Debug, Error)]
pub enum FatError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Mount failed: {0}")]
    Mount(#[from] MountError),

    #[error("Not enough clusters for {fat_type:?} ({clusters} available)")]
    InsufficientClusters { fat_type: Option<FatType>, clusters: u64 },

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(&'static str),

    #[error("Entry not found")]
    NotFound,

    #[error("Entry already exists")]
    AlreadyExists,

    #[error("Directory is not empty")]
    NotEmpty,

    #[error("Invalid name: {0}")]
    Name(#[from] NameError),

    #[error("No space left on volume")]
    NoSpace,

    #[error("Corrupt long name before directory slot {slot}")]
    CorruptLongName { slot: u32 },

    #[error("Corrupt cluster chain at cluster {cluster}")]
    CorruptChain { cluster: u32 },

    #[error("Not a directory")]
    NotADirectory,

    #[error("Is a directory")]
    IsADirectory,

    #[error("Cannot move a directory into itself")]
    InvalidMove,
}
