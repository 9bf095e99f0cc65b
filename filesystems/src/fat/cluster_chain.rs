// Cluster chain management: walking, allocating, extending, truncating and
// freeing chains. Every walk is bounded by the cluster count so a cyclic or
// otherwise malformed chain ends in an error instead of a hang.

use fatvol_core::{BlockDevice, FatError, VolumeConfig};
use log::{debug, warn};

use super::constants::FIRST_DATA_CLUSTER;
use super::fat_table::{FatEntry, FatTable};

/// The FAT plus free-space bookkeeping for one mounted volume. Owned by the
/// mounted filesystem; there is exactly one live copy of the counters.
pub struct Fat<C: VolumeConfig> {
    table: FatTable<C>,
    free_clusters: u32,
    next_free: u32,
}

// Allocation state, kept so a failed allocation can be undone
struct Progress {
    first: u32,
    last: Option<u32>,
    chained: u32,
    /// Marked end-of-chain but not yet linked from its predecessor
    orphan: Option<u32>,
    hint: u32,
}

/// Cursor over a chain. Holds no borrow of the device so callers can do
/// sector I/O between steps.
#[derive(Debug, Clone, Copy)]
pub struct ChainWalker {
    current: Option<u32>,
    steps: u32,
}

impl ChainWalker {
    /// `first == 0` is the empty chain
    pub fn new(first: u32) -> Self {
        Self {
            current: if first == 0 { None } else { Some(first) },
            steps: 0,
        }
    }

    /// Yield the next cluster of the chain
    pub fn next<D: BlockDevice, C: VolumeConfig>(&mut self, fat: &Fat<C>, device: &mut D) -> Result<Option<u32>, FatError> {
        let cluster = match self.current {
            Some(cluster) => cluster,
            None => return Ok(None),
        };
        self.steps += 1;
        if self.steps > fat.cluster_count() || !fat.is_data_cluster(cluster) {
            return Err(FatError::CorruptChain { cluster });
        }
        self.current = fat.next_cluster(device, cluster)?;
        Ok(Some(cluster))
    }
}

impl<C: VolumeConfig> Fat<C> {
    pub fn new(table: FatTable<C>, free_clusters: u32, next_free: u32) -> Self {
        Self {
            table,
            free_clusters,
            next_free,
        }
    }

    pub fn table(&self) -> &FatTable<C> {
        &self.table
    }

    pub fn free_clusters(&self) -> u32 {
        self.free_clusters
    }

    pub fn next_free(&self) -> u32 {
        self.next_free
    }

    pub fn cluster_count(&self) -> u32 {
        self.table.max_cluster() - 1
    }

    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        cluster >= FIRST_DATA_CLUSTER && cluster <= self.table.max_cluster()
    }

    /// Successor of `cluster`, `None` at end of chain. Any other entry value
    /// inside a chain is corruption.
    pub fn next_cluster<D: BlockDevice>(&self, device: &mut D, cluster: u32) -> Result<Option<u32>, FatError> {
        match self.table.get(device, cluster)? {
            FatEntry::EndOfChain => Ok(None),
            FatEntry::Next(next) if self.is_data_cluster(next) => Ok(Some(next)),
            _ => Err(FatError::CorruptChain { cluster }),
        }
    }

    /// Cluster at position `index` of the chain, `None` when the chain is
    /// shorter
    pub fn nth_cluster<D: BlockDevice>(
        &self,
        device: &mut D,
        first: u32,
        index: u32,
    ) -> Result<Option<u32>, FatError> {
        let mut walker = ChainWalker::new(first);
        let mut position = 0;
        while let Some(cluster) = walker.next(self, device)? {
            if position == index {
                return Ok(Some(cluster));
            }
            position += 1;
        }
        Ok(None)
    }

    /// Last cluster and length of a non-empty chain
    pub fn chain_end<D: BlockDevice>(&self, device: &mut D, first: u32) -> Result<(u32, u32), FatError> {
        let mut walker = ChainWalker::new(first);
        let mut last = first;
        let mut len = 0;
        while let Some(cluster) = walker.next(self, device)? {
            last = cluster;
            len += 1;
        }
        Ok((last, len))
    }

    /// Reserve `count` clusters as one new chain and return its first
    /// cluster. Either the whole chain is reserved or, on failure, nothing.
    pub fn allocate<D: BlockDevice>(&mut self, device: &mut D, count: u32) -> Result<u32, FatError> {
        if count == 0 {
            return Err(FatError::NoSpace);
        }
        if count > self.free_clusters {
            debug!("allocation of {} clusters refused, {} free", count, self.free_clusters);
            return Err(FatError::NoSpace);
        }

        let mut progress = Progress {
            first: 0,
            last: None,
            chained: 0,
            orphan: None,
            hint: self.next_free,
        };
        match self.link_new_chain(device, count, &mut progress) {
            Ok(()) => {
                self.free_clusters -= count;
                self.next_free = if progress.hint > self.table.max_cluster() {
                    FIRST_DATA_CLUSTER
                } else {
                    progress.hint
                };
                debug!("allocated {} clusters starting at {}", count, progress.first);
                Ok(progress.first)
            }
            Err(e) => {
                warn!("rolling back partial allocation of {} clusters", count);
                self.free_clusters -= progress.chained + progress.orphan.is_some() as u32;
                // best effort; the caller sees the original error
                if let Some(orphan) = progress.orphan {
                    if self.table.set(device, orphan, FatEntry::Free).is_ok() {
                        self.free_clusters += 1;
                    }
                }
                if progress.first != 0 {
                    let _ = self.release(device, progress.first, progress.chained);
                }
                Err(e)
            }
        }
    }

    fn link_new_chain<D: BlockDevice>(
        &mut self,
        device: &mut D,
        count: u32,
        progress: &mut Progress,
    ) -> Result<(), FatError> {
        while progress.chained < count {
            let cluster = self
                .table
                .find_free(device, progress.hint)?
                .ok_or(FatError::NoSpace)?;
            // terminate before linking so the chain is always well formed
            self.table.set(device, cluster, FatEntry::EndOfChain)?;
            match progress.last {
                Some(prev) => {
                    progress.orphan = Some(cluster);
                    self.table.set(device, prev, FatEntry::Next(cluster))?;
                    progress.orphan = None;
                }
                None => progress.first = cluster,
            }
            progress.last = Some(cluster);
            progress.chained += 1;
            progress.hint = cluster + 1;
        }
        Ok(())
    }

    /// Append `count` new clusters after `last`, returning the first new one
    pub fn extend<D: BlockDevice>(&mut self, device: &mut D, last: u32, count: u32) -> Result<u32, FatError> {
        let first_new = self.allocate(device, count)?;
        if let Err(e) = self.table.set(device, last, FatEntry::Next(first_new)) {
            let _ = self.free_chain(device, first_new);
            return Err(e.into());
        }
        Ok(first_new)
    }

    /// Free every cluster of the chain starting at `first`. Stops at the
    /// first entry that does not continue the chain. Returns the number of
    /// clusters freed.
    pub fn free_chain<D: BlockDevice>(&mut self, device: &mut D, first: u32) -> Result<u32, FatError> {
        let freed = self.release(device, first, self.cluster_count())?;
        debug!("freed {} clusters from {}", freed, first);
        Ok(freed)
    }

    fn release<D: BlockDevice>(&mut self, device: &mut D, first: u32, limit: u32) -> Result<u32, FatError> {
        let mut current = first;
        let mut freed = 0;
        while freed < limit && self.is_data_cluster(current) {
            let entry = self.table.get(device, current)?;
            if matches!(entry, FatEntry::Free | FatEntry::Bad | FatEntry::Reserved(_)) {
                warn!("chain from {} breaks at cluster {}", first, current);
                break;
            }
            self.table.set(device, current, FatEntry::Free)?;
            self.free_clusters += 1;
            freed += 1;
            if current < self.next_free {
                self.next_free = current;
            }
            match entry {
                FatEntry::Next(next) => current = next,
                _ => break,
            }
        }
        Ok(freed)
    }

    /// Shorten the chain to `keep` clusters. `keep == 0` frees it entirely;
    /// the caller then clears the owning entry's first cluster.
    pub fn truncate<D: BlockDevice>(&mut self, device: &mut D, first: u32, keep: u32) -> Result<(), FatError> {
        if keep == 0 {
            self.free_chain(device, first)?;
            return Ok(());
        }
        let last = self
            .nth_cluster(device, first, keep - 1)?
            .ok_or(FatError::CorruptChain { cluster: first })?;
        if let Some(rest) = self.next_cluster(device, last)? {
            self.table.set(device, last, FatEntry::EndOfChain)?;
            self.free_chain(device, rest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::boot_sector::{BiosParameterBlock, Geometry};
    use fatvol_core::{DefaultConfig, Fat12Config, MemoryDevice, MountError};

    // FAT16 volume of 8400 sectors: 1 reserved, 2 FATs of 33 sectors
    fn fat16_geometry() -> Geometry {
        let bpb = BiosParameterBlock {
            oem_name: *b"FATVOL  ",
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sectors: 1,
            fat_count: 2,
            root_entries: 512,
            total_sectors: 8400,
            media: 0xF8,
            sectors_per_fat: 33,
            sectors_per_track: 63,
            heads: 255,
            hidden_sectors: 0,
            ext_flags: 0,
            fs_version: 0,
            root_cluster: 0,
            fs_info_sector: 0,
            backup_boot_sector: 0,
            drive_number: 0x80,
            volume_id: 0,
            volume_label: *b"NO NAME    ",
            fat_type: fatvol_core::FatType::Fat16,
        };
        bpb.compute_geometry().unwrap()
    }

    fn setup() -> (MemoryDevice, Fat<DefaultConfig>) {
        let geometry = fat16_geometry();
        let table = FatTable::new(&geometry).unwrap();
        let dev = MemoryDevice::new(8400, 512);
        let fat = Fat::new(table, geometry.cluster_count, FIRST_DATA_CLUSTER);
        (dev, fat)
    }

    fn collect(fat: &Fat<DefaultConfig>, dev: &mut MemoryDevice, first: u32) -> Vec<u32> {
        let mut walker = ChainWalker::new(first);
        let mut out = Vec::new();
        while let Some(c) = walker.next(fat, dev).unwrap() {
            out.push(c);
        }
        out
    }

    #[test]
    fn test_table_refuses_width_outside_config() {
        let result = FatTable::<Fat12Config>::new(&fat16_geometry());
        assert!(matches!(
            result,
            Err(MountError::UnsupportedConfiguration { .. })
        ));
    }

    #[test]
    fn test_allocate_links_chain() {
        let (mut dev, mut fat) = setup();
        let free = fat.free_clusters();
        let first = fat.allocate(&mut dev, 3).unwrap();
        assert_eq!(collect(&fat, &mut dev, first), vec![2, 3, 4]);
        assert_eq!(fat.free_clusters(), free - 3);
        assert_eq!(dev.live_mappings(), 0);
    }

    #[test]
    fn test_allocation_never_partial() {
        let (mut dev, mut fat) = setup();
        let free = fat.free_clusters();
        assert!(matches!(fat.allocate(&mut dev, free + 1), Err(FatError::NoSpace)));
        assert_eq!(fat.free_clusters(), free);
        assert_eq!(dev.commit_count(), 0);
    }

    #[test]
    fn test_failed_allocation_rolls_back() {
        let (mut dev, mut fat) = setup();
        // only clusters 2..=4 are really free, the free count claims more
        for cluster in 5..=fat.table().max_cluster() {
            fat.table().set(&mut dev, cluster, FatEntry::Bad).unwrap();
        }
        let free = fat.free_clusters();
        assert!(matches!(fat.allocate(&mut dev, 4), Err(FatError::NoSpace)));
        assert_eq!(fat.free_clusters(), free);
        for cluster in 2..=4 {
            assert_eq!(fat.table().get(&mut dev, cluster).unwrap(), FatEntry::Free);
        }
    }

    #[test]
    fn test_extend_and_truncate() {
        let (mut dev, mut fat) = setup();
        let first = fat.allocate(&mut dev, 2).unwrap();
        let other = fat.allocate(&mut dev, 1).unwrap();
        fat.extend(&mut dev, 3, 2).unwrap();
        assert_eq!(collect(&fat, &mut dev, first), vec![2, 3, 5, 6]);
        assert_eq!(fat.chain_end(&mut dev, first).unwrap(), (6, 4));

        let free = fat.free_clusters();
        fat.truncate(&mut dev, first, 1).unwrap();
        assert_eq!(collect(&fat, &mut dev, first), vec![2]);
        assert_eq!(fat.free_clusters(), free + 3);
        assert_eq!(collect(&fat, &mut dev, other), vec![4]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let (mut dev, fat) = setup();
        fat.table().set(&mut dev, 2, FatEntry::Next(3)).unwrap();
        fat.table().set(&mut dev, 3, FatEntry::Next(2)).unwrap();
        let mut walker = ChainWalker::new(2);
        let result = loop {
            match walker.next(&fat, &mut dev) {
                Ok(Some(_)) => continue,
                other => break other,
            }
        };
        assert!(matches!(result, Err(FatError::CorruptChain { .. })));
    }

    #[test]
    fn test_free_stops_at_cycle() {
        let (mut dev, mut fat) = setup();
        fat.table().set(&mut dev, 2, FatEntry::Next(3)).unwrap();
        fat.table().set(&mut dev, 3, FatEntry::Next(2)).unwrap();
        assert_eq!(fat.free_chain(&mut dev, 2).unwrap(), 2);
        assert_eq!(fat.table().get(&mut dev, 2).unwrap(), FatEntry::Free);
    }
}
