// FAT family driver
// Layering, leaves first: sector mapping -> boot sector / FAT table ->
// cluster chains -> directory codecs -> directory and file operations.

pub mod boot_sector;
pub mod cluster_calc;
pub mod cluster_chain;
pub mod constants;
pub mod dir_ops;
pub mod directory;
pub mod fat_table;
pub mod file_ops;
pub mod format;
pub mod long_names;
pub mod path_resolver;
pub(crate) mod sector;
pub mod timestamps;
pub mod validator;
pub mod volume;
