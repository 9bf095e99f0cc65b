// File content: positioned reads and writes, truncation.

use fatvol_core::{BlockDevice, DeviceError, FatError, VolumeConfig};
use log::debug;

use super::constants::ATTR_ARCHIVE;
use super::dir_ops::Entry;
use super::sector;
use super::volume::FileSystem;

impl<D: BlockDevice, C: VolumeConfig> FileSystem<D, C> {
    /// Read up to `buf.len()` bytes at `offset`. Returns the number of bytes
    /// read, 0 at or past the end of the file.
    pub fn read_at(&mut self, entry: &Entry, offset: u64, buf: &mut [u8]) -> Result<usize, FatError> {
        if entry.is_dir() {
            return Err(FatError::IsADirectory);
        }
        let size = entry.size() as u64;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min((size - offset) as usize);
        let buf = &mut buf[..len];
        self.transfer(entry.first_cluster(), offset, len, |device, at, within, pos, n| {
            sector::read(device, at, |data| {
                buf[pos..pos + n].copy_from_slice(&data[within..within + n])
            })
        })?;
        Ok(len)
    }

    /// Read from the start of the file
    pub fn read_all(&mut self, entry: &Entry, buf: &mut [u8]) -> Result<usize, FatError> {
        self.read_at(entry, 0, buf)
    }

    /// Write `data` at `offset`, growing the file as needed. Clusters are
    /// reserved before any byte is written, so running out of space leaves
    /// the file untouched. A gap between the old end and `offset` reads back
    /// as zeros.
    pub fn write_at(&mut self, entry: &mut Entry, offset: u64, data: &[u8]) -> Result<usize, FatError> {
        if entry.is_dir() {
            return Err(FatError::IsADirectory);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset + data.len() as u64;
        if end > u32::MAX as u64 {
            return Err(FatError::NoSpace);
        }
        self.resolve(entry)?;
        self.mark_dirty()?;

        let old_size = entry.short.size as u64;
        self.reserve(entry, end.max(old_size))?;
        if offset > old_size {
            self.fill_zero(entry.short.first_cluster, old_size, offset)?;
        }
        self.transfer(entry.short.first_cluster, offset, data.len(), |device, at, within, pos, n| {
            sector::update(device, at, |sector| {
                sector[within..within + n].copy_from_slice(&data[pos..pos + n])
            })
        })?;

        let now = self.now();
        entry.short.size = end.max(old_size) as u32;
        entry.short.modified = now;
        entry.short.accessed_date = now.date;
        entry.short.attributes |= ATTR_ARCHIVE;
        self.store_entry(entry)?;
        debug!("wrote {} bytes at {} to {}", data.len(), offset, entry.name());
        Ok(data.len())
    }

    /// Replace the file's content with `data`
    pub fn write_all(&mut self, entry: &mut Entry, data: &[u8]) -> Result<(), FatError> {
        self.write_at(entry, 0, data)?;
        self.truncate(entry, data.len() as u32)
    }

    /// Set the file size to `len`. Growing zero-fills; shrinking frees the
    /// clusters no longer needed.
    pub fn truncate(&mut self, entry: &mut Entry, len: u32) -> Result<(), FatError> {
        if entry.is_dir() {
            return Err(FatError::IsADirectory);
        }
        self.resolve(entry)?;
        let size = entry.short.size;
        if len == size {
            return Ok(());
        }
        self.mark_dirty()?;
        let now = self.now();
        entry.short.modified = now;
        entry.short.attributes |= ATTR_ARCHIVE;

        if len > size {
            self.reserve(entry, len as u64)?;
            self.fill_zero(entry.short.first_cluster, size as u64, len as u64)?;
            entry.short.size = len;
            self.store_entry(entry)?;
        } else {
            let first = entry.short.first_cluster;
            let keep = self.geometry.clusters_for(len as u64);
            entry.short.size = len;
            if keep == 0 {
                entry.short.first_cluster = 0;
            }
            // the entry stops referring to the tail before it is freed
            self.store_entry(entry)?;
            if first != 0 {
                self.fat.truncate(&mut self.device, first, keep)?;
            }
        }
        debug!("truncated {} from {} to {} bytes", entry.name(), size, len);
        Ok(())
    }

    /// Make the chain long enough for `bytes`. A newly allocated first
    /// cluster is recorded in the entry right away.
    fn reserve(&mut self, entry: &mut Entry, bytes: u64) -> Result<(), FatError> {
        let needed = self.geometry.clusters_for(bytes);
        if needed == 0 {
            return Ok(());
        }
        let first = entry.short.first_cluster;
        if first == 0 {
            entry.short.first_cluster = self.fat.allocate(&mut self.device, needed)?;
            return self.store_entry(entry);
        }
        let (last, have) = self.fat.chain_end(&mut self.device, first)?;
        if needed > have {
            self.fat.extend(&mut self.device, last, needed - have)?;
        }
        Ok(())
    }

    fn fill_zero(&mut self, first: u32, from: u64, to: u64) -> Result<(), FatError> {
        self.transfer(first, from, (to - from) as usize, |device, at, within, _, n| {
            sector::update(device, at, |sector| sector[within..within + n].fill(0))
        })
    }

    /// Walk the byte range `offset..offset + len` of the chain at `first`
    /// one sector piece at a time. `op` gets the sector, the offset within
    /// it, the position within the range and the piece length.
    fn transfer(
        &mut self,
        first: u32,
        offset: u64,
        len: usize,
        mut op: impl FnMut(&mut D, u64, usize, usize, usize) -> Result<(), DeviceError>,
    ) -> Result<(), FatError> {
        if len == 0 {
            return Ok(());
        }
        let bytes_per_cluster = self.geometry.bytes_per_cluster() as u64;
        let bytes_per_sector = self.geometry.bytes_per_sector as u64;
        let mut cluster = self
            .fat
            .nth_cluster(&mut self.device, first, (offset / bytes_per_cluster) as u32)?
            .ok_or(FatError::CorruptChain { cluster: first })?;

        let end = offset + len as u64;
        let mut position = offset;
        while position < end {
            let in_cluster = position % bytes_per_cluster;
            let at = self.geometry.cluster_first_sector(cluster) + in_cluster / bytes_per_sector;
            let within = (in_cluster % bytes_per_sector) as usize;
            let n = (bytes_per_sector as usize - within).min((end - position) as usize);
            op(&mut self.device, at, within, (position - offset) as usize, n)?;
            position += n as u64;
            if position < end && position % bytes_per_cluster == 0 {
                cluster = self
                    .fat
                    .next_cluster(&mut self.device, cluster)?
                    .ok_or(FatError::CorruptChain { cluster })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::fat::dir_ops::EntryKind;
    use crate::fat::format::make;
    use crate::fat::volume::FileSystem;
    use fatvol_core::{DefaultConfig, FatError, FormatOptions, MemoryDevice};

    fn floppy() -> MemoryDevice {
        let mut dev = MemoryDevice::new(2880, 512);
        make::<DefaultConfig, _>(&mut dev, &FormatOptions::new([1; 4])).unwrap();
        dev
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_write_read_across_clusters() {
        let mut dev = floppy();
        let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        let mut file = fs.create_entry(None, "big.bin", EntryKind::File { size: 0 }).unwrap();
        let data = pattern(3000);
        assert_eq!(fs.write_at(&mut file, 0, &data).unwrap(), 3000);
        assert_eq!(file.size(), 3000);

        let mut back = vec![0u8; 4000];
        assert_eq!(fs.read_all(&file, &mut back).unwrap(), 3000);
        assert_eq!(&back[..3000], &data[..]);

        let mut middle = [0u8; 600];
        assert_eq!(fs.read_at(&file, 1000, &mut middle).unwrap(), 600);
        assert_eq!(&middle[..], &data[1000..1600]);
        assert_eq!(fs.read_at(&file, 3000, &mut middle).unwrap(), 0);
    }

    #[test]
    fn test_sparse_write_zero_fills() {
        let mut dev = floppy();
        let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        let mut file = fs.create_entry(None, "gap.bin", EntryKind::File { size: 0 }).unwrap();
        fs.write_at(&mut file, 0, &[0xAA; 100]).unwrap();
        fs.truncate(&mut file, 10).unwrap();
        fs.write_at(&mut file, 1500, b"tail").unwrap();
        assert_eq!(file.size(), 1504);

        let mut back = vec![0xFFu8; 1504];
        fs.read_all(&file, &mut back).unwrap();
        assert!(back[..10].iter().all(|&b| b == 0xAA));
        assert!(back[10..1500].iter().all(|&b| b == 0));
        assert_eq!(&back[1500..], b"tail");
    }

    #[test]
    fn test_truncate_frees_clusters() {
        let mut dev = floppy();
        let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        let free = fs.free_clusters();
        let mut file = fs.create_entry(None, "t.bin", EntryKind::File { size: 0 }).unwrap();
        fs.write_all(&mut file, &pattern(2048)).unwrap();
        assert_eq!(fs.free_clusters(), free - 4);

        fs.truncate(&mut file, 513).unwrap();
        assert_eq!(fs.free_clusters(), free - 2);
        fs.truncate(&mut file, 0).unwrap();
        assert_eq!(fs.free_clusters(), free);
        assert_eq!(file.first_cluster(), 0);

        let reread = fs.lookup(None, "t.bin").unwrap();
        assert_eq!(reread.size(), 0);
        assert_eq!(reread.first_cluster(), 0);
    }

    #[test]
    fn test_write_all_shrinks() {
        let mut dev = floppy();
        let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        let mut file = fs.create_entry(None, "w.txt", EntryKind::File { size: 0 }).unwrap();
        fs.write_all(&mut file, b"a longer first version").unwrap();
        fs.write_all(&mut file, b"short").unwrap();
        let mut back = [0u8; 64];
        let n = fs.read_all(&file, &mut back).unwrap();
        assert_eq!(&back[..n], b"short");
    }

    #[test]
    fn test_write_without_space_changes_nothing() {
        let mut dev = floppy();
        let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        let mut file = fs.create_entry(None, "huge.bin", EntryKind::File { size: 0 }).unwrap();
        let too_big = (fs.free_clusters() as usize + 1) * 512;
        let free = fs.free_clusters();
        assert!(matches!(
            fs.write_at(&mut file, 0, &vec![1u8; too_big]),
            Err(FatError::NoSpace)
        ));
        assert_eq!(fs.free_clusters(), free);
        assert_eq!(file.size(), 0);
        assert_eq!(fs.lookup(None, "huge.bin").unwrap().first_cluster(), 0);
    }

    #[test]
    fn test_directory_content_refused() {
        let mut dev = floppy();
        let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        let mut dir = fs.create_entry(None, "d", EntryKind::Directory).unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(fs.read_at(&dir, 0, &mut buf), Err(FatError::IsADirectory)));
        assert!(matches!(fs.write_at(&mut dir, 0, b"x"), Err(FatError::IsADirectory)));
        assert!(matches!(fs.truncate(&mut dir, 0), Err(FatError::IsADirectory)));
    }

    #[test]
    fn test_preallocated_file_reads_zeros() {
        let mut dev = floppy();
        let mut fs = FileSystem::<_, DefaultConfig>::mount(&mut dev).unwrap();
        let file = fs.create_entry(None, "pre.bin", EntryKind::File { size: 700 }).unwrap();
        let mut back = [0xEEu8; 700];
        assert_eq!(fs.read_all(&file, &mut back).unwrap(), 700);
        assert!(back.iter().all(|&b| b == 0));
    }
}
