// Offline consistency check of a mounted volume.
//
// Unlike the driver proper this pass allocates: it keeps a bitmap of every
// cluster referenced from a directory and a work list of directories.

use fatvol_core::{BlockDevice, FatError, VolumeConfig};
use log::{debug, info};
use serde::Serialize;

use super::cluster_chain::ChainWalker;
use super::dir_ops::{DirLocation, DirScan};
use super::fat_table::FatEntry;
use super::volume::FileSystem;

/// One problem found by [`check_volume`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValidationIssue {
    /// Cluster reached from two chains
    CrossLinked { cluster: u32 },
    /// Chain points outside the data region
    OutOfRange { name: String, cluster: u32 },
    /// Chain loops or runs into a free/bad entry
    BrokenChain { name: String, cluster: u32 },
    /// File size disagrees with the length of its chain
    SizeMismatch { name: String, size: u32, clusters: u32 },
    CorruptLongName { slot: u32 },
    /// Allocated clusters no entry refers to
    LostClusters { count: u32 },
    FreeCountMismatch { recorded: u32, actual: u32 },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub files: u32,
    pub directories: u32,
    pub used_clusters: u32,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

struct Checker {
    seen: Vec<bool>,
    report: ValidationReport,
}

impl Checker {
    /// Walk a chain marking its clusters; returns its length
    fn claim<D: BlockDevice, C: VolumeConfig>(
        &mut self,
        fs: &mut FileSystem<D, C>,
        name: &str,
        first: u32,
    ) -> Result<u32, FatError> {
        if !fs.fat.is_data_cluster(first) {
            self.report.issues.push(ValidationIssue::OutOfRange {
                name: name.to_string(),
                cluster: first,
            });
            return Ok(0);
        }
        let mut walker = ChainWalker::new(first);
        let mut len = 0;
        loop {
            let cluster = match walker.next(&fs.fat, &mut fs.device) {
                Ok(Some(cluster)) => cluster,
                Ok(None) => break,
                Err(FatError::CorruptChain { cluster }) => {
                    self.report.issues.push(ValidationIssue::BrokenChain {
                        name: name.to_string(),
                        cluster,
                    });
                    break;
                }
                Err(e) => return Err(e),
            };
            let seen = &mut self.seen[cluster as usize];
            if *seen {
                self.report.issues.push(ValidationIssue::CrossLinked { cluster });
                break;
            }
            *seen = true;
            len += 1;
        }
        self.report.used_clusters += len;
        Ok(len)
    }
}

/// Walk every directory and cluster chain of `fs` and report structural
/// problems. Read-only.
pub fn check_volume<D: BlockDevice, C: VolumeConfig>(
    fs: &mut FileSystem<D, C>,
) -> Result<ValidationReport, FatError> {
    let max_cluster = fs.geometry.max_cluster();
    let mut checker = Checker {
        seen: vec![false; max_cluster as usize + 1],
        report: ValidationReport::default(),
    };

    let root = fs.root_dir();
    if let DirLocation::Chain(first) = root {
        checker.claim(fs, "/", first)?;
    }

    let mut pending = vec![root];
    while let Some(dir) = pending.pop() {
        checker.report.directories += 1;
        let cursor = fs.cursor_at(dir, 0)?;
        let mut scan = DirScan::<C>::new(cursor);
        while let Some(entry) = scan.next(fs) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(FatError::CorruptLongName { slot }) => {
                    checker.report.issues.push(ValidationIssue::CorruptLongName { slot });
                    continue;
                }
                Err(FatError::CorruptChain { cluster }) => {
                    checker.report.issues.push(ValidationIssue::BrokenChain {
                        name: "<directory>".to_string(),
                        cluster,
                    });
                    break;
                }
                Err(e) => return Err(e),
            };
            let first = entry.first_cluster();
            if entry.is_dir() {
                // a chain already claimed elsewhere yields 0 and is not walked again
                if checker.claim(fs, entry.name(), first)? > 0 {
                    pending.push(DirLocation::Chain(first));
                }
                continue;
            }

            checker.report.files += 1;
            let len = if first == 0 { 0 } else { checker.claim(fs, entry.name(), first)? };
            let expected = fs.geometry.clusters_for(entry.size() as u64);
            if len != expected {
                checker.report.issues.push(ValidationIssue::SizeMismatch {
                    name: entry.name().to_string(),
                    size: entry.size(),
                    clusters: len,
                });
            }
        }
        debug!("checked directory {:?}", dir);
    }

    let mut lost = 0;
    let mut free = 0;
    let table = fs.fat.table();
    for cluster in 2..=max_cluster {
        match table.get(&mut fs.device, cluster)? {
            FatEntry::Free => free += 1,
            FatEntry::Bad | FatEntry::Reserved(_) => {}
            _ if !checker.seen[cluster as usize] => lost += 1,
            _ => {}
        }
    }
    if lost > 0 {
        checker.report.issues.push(ValidationIssue::LostClusters { count: lost });
    }
    if free != fs.free_clusters() {
        checker.report.issues.push(ValidationIssue::FreeCountMismatch {
            recorded: fs.free_clusters(),
            actual: free,
        });
    }

    info!(
        "checked {} files in {} directories, {} issues",
        checker.report.files,
        checker.report.directories,
        checker.report.issues.len()
    );
    Ok(checker.report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::dir_ops::EntryKind;
    use crate::fat::format::make;
    use fatvol_core::{DefaultConfig, FatType, FormatOptions, MemoryDevice};

    fn populated(dev: &mut MemoryDevice) -> FileSystem<&mut MemoryDevice, DefaultConfig> {
        let mut fs = FileSystem::<_, DefaultConfig>::mount(dev).unwrap();
        let dir = fs.create_entry(None, "dir", EntryKind::Directory).unwrap();
        let mut file = fs.create_entry(Some(&dir), "file.bin", EntryKind::File { size: 0 }).unwrap();
        fs.write_all(&mut file, &[5u8; 1500]).unwrap();
        fs.create_entry(None, "empty.txt", EntryKind::File { size: 0 }).unwrap();
        fs
    }

    #[test]
    fn test_clean_volume() {
        let mut dev = MemoryDevice::new(2880, 512);
        make::<DefaultConfig, _>(&mut dev, &FormatOptions::new([0; 4])).unwrap();
        let mut fs = populated(&mut dev);
        let report = check_volume(&mut fs).unwrap();
        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!(report.files, 2);
        assert_eq!(report.directories, 2);
        assert_eq!(report.used_clusters, 4);
    }

    #[test]
    fn test_clean_fat32_volume() {
        let mut dev = MemoryDevice::new(70_000, 512);
        let mut options = FormatOptions::new([0; 4]);
        options.fat_type = Some(FatType::Fat32);
        make::<DefaultConfig, _>(&mut dev, &options).unwrap();
        let mut fs = populated(&mut dev);
        let report = check_volume(&mut fs).unwrap();
        assert!(report.is_clean(), "{:?}", report.issues);
        // the root chain counts too
        assert_eq!(report.used_clusters, 5);
    }

    #[test]
    fn test_cross_link_and_lost_cluster() {
        let mut dev = MemoryDevice::new(2880, 512);
        make::<DefaultConfig, _>(&mut dev, &FormatOptions::new([0; 4])).unwrap();
        let mut fs = populated(&mut dev);
        let dir = fs.lookup(None, "dir").unwrap();
        let file = fs.lookup(Some(&dir), "file.bin").unwrap();
        let table = fs.fat.table();
        // second cluster of the file now continues into the directory's cluster
        let second = fs.fat.nth_cluster(&mut fs.device, file.first_cluster(), 1).unwrap().unwrap();
        table.set(&mut fs.device, second, FatEntry::Next(dir.first_cluster())).unwrap();

        let report = check_volume(&mut fs).unwrap();
        assert!(report.issues.contains(&ValidationIssue::CrossLinked {
            cluster: dir.first_cluster()
        }));
        assert!(report.issues.contains(&ValidationIssue::LostClusters { count: 1 }));
        assert!(!report.is_clean());
    }
}
