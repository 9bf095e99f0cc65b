// Directory operations: iteration, lookup, create, delete and move.
//
// Entries are addressed by slot index within their directory. An `Entry`
// records where its slots are; operations that mutate through it re-read
// the short slot first and fail with `NotFound` if it no longer holds the
// same entry. `delete` and `rename` consume the handle.

use fatvol_core::{BlockDevice, Codepage, DosTimestamp, FatError, FatType, NameError, VolumeConfig};
use log::{debug, trace, warn};

use super::constants::*;
use super::directory::{
    classify, decode_short_name, encode_short_name, lfn_checksum, validate_name, ShortEntry,
    ShortFit, ShortNameBasis, ShortNameString, SlotKind, DOTDOT_NAME, DOT_NAME,
};
use super::long_names::{fragments_needed, write_fragment, LongName, LongNameBuilder, LongNameString};
use super::sector;
use super::volume::FileSystem;

/// FAT directories hold at most 65536 slots
const MAX_DIR_SLOTS: u32 = 65536;
const MAX_NUMERIC_TAIL: u32 = 999_999;

/// Where a directory's slots live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirLocation {
    /// Fixed root region of FAT12/16
    Root,
    /// Cluster chain starting at this cluster, the FAT32 root included
    Chain(u32),
}

/// Slots occupied by an entry: its long-name fragments, if any, followed by
/// the short entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub dir: DirLocation,
    pub first_slot: u32,
    pub short_slot: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file with `size` bytes allocated up front
    File { size: u32 },
    Directory,
}

/// Handle to a directory entry
#[derive(Debug)]
pub struct Entry {
    pub(crate) name: LongNameString,
    pub(crate) short_name: ShortNameString,
    pub(crate) short: ShortEntry,
    pub(crate) location: EntryLocation,
}

impl Entry {
    /// Long name if there is one, otherwise the short name with its stored
    /// case restored
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The 8.3 name as stored, e.g. `SHORT.TXT`
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn is_dir(&self) -> bool {
        self.short.is_directory()
    }

    pub fn is_file(&self) -> bool {
        !self.short.is_directory()
    }

    pub fn kind(&self) -> EntryKind {
        if self.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File {
                size: self.short.size,
            }
        }
    }

    pub fn size(&self) -> u32 {
        self.short.size
    }

    pub fn first_cluster(&self) -> u32 {
        self.short.first_cluster
    }

    pub fn attributes(&self) -> u8 {
        self.short.attributes
    }

    pub fn created(&self) -> DosTimestamp {
        self.short.created
    }

    pub fn modified(&self) -> DosTimestamp {
        self.short.modified
    }

    pub fn accessed_date(&self) -> u16 {
        self.short.accessed_date
    }

    pub fn location(&self) -> EntryLocation {
        self.location
    }
}

/// Position of one slot. For chained directories `cluster` is the cluster
/// holding the slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotCursor {
    dir: DirLocation,
    slot: u32,
    cluster: u32,
}

enum FreeRun {
    At(u32),
    /// Slots from `first_slot` run past the end of the chain, which needs
    /// `clusters` more clusters after `last_cluster`
    Extend {
        first_slot: u32,
        clusters: u32,
        last_cluster: u32,
    },
}

/// Slot-by-slot walk of one directory yielding entries. Long-name scratch
/// space is whatever `C` selects, none for short-name configurations.
pub(crate) struct DirScan<C: VolumeConfig> {
    cursor: Option<SlotCursor>,
    pending: Option<FatError>,
    /// Short entry of a corrupt run, yielded after the error
    deferred: Option<Entry>,
    builder: LongNameBuilder<C::NameBuffer>,
    run_start: Option<u32>,
}

impl<C: VolumeConfig> DirScan<C> {
    pub(crate) fn new(cursor: Option<SlotCursor>) -> Self {
        Self {
            cursor,
            pending: None,
            deferred: None,
            builder: LongNameBuilder::new(),
            run_start: None,
        }
    }

    pub(crate) fn next<D: BlockDevice>(
        &mut self,
        fs: &mut FileSystem<D, C>,
    ) -> Option<Result<Entry, FatError>> {
        loop {
            if let Some(entry) = self.deferred.take() {
                return Some(Ok(entry));
            }
            if let Some(e) = self.pending.take() {
                return Some(Err(e));
            }
            let cursor = self.cursor?;
            let raw = match fs.read_slot(cursor) {
                Ok(raw) => raw,
                Err(e) => {
                    self.cursor = None;
                    return Some(Err(e));
                }
            };
            let kind = classify(&raw);
            if kind == SlotKind::End {
                self.cursor = None;
                return None;
            }
            self.cursor = match fs.advance(cursor) {
                Ok(next) => next,
                Err(e) => {
                    self.pending = Some(e);
                    None
                }
            };

            match kind {
                SlotKind::End => {}
                SlotKind::Deleted => {
                    if self.run_start.is_some() {
                        warn!("long name run interrupted at slot {}", cursor.slot);
                    }
                    self.builder.reset();
                    self.run_start = None;
                }
                SlotKind::LongName => {
                    trace!("long name fragment at slot {}", cursor.slot);
                    if self.run_start.is_none() || raw[LDIR_ORD] & LAST_LONG_ENTRY != 0 {
                        self.run_start = Some(cursor.slot);
                    }
                    if C::LONG_NAMES {
                        self.builder.push(&raw, cursor.slot);
                    }
                }
                SlotKind::Short => {
                    let short = ShortEntry::parse(&raw);
                    let run_start = self.run_start.take();
                    if short.is_volume_label() || short.is_dot() {
                        self.builder.reset();
                        continue;
                    }

                    let (long, first_slot) = if C::LONG_NAMES {
                        let first = self.builder.first_slot();
                        match self.builder.finish(&short.name) {
                            LongName::Absent => (None, cursor.slot),
                            LongName::Present(name) => (Some(name), first),
                            LongName::Corrupt { first_slot } => {
                                warn!("corrupt long name before slot {}", cursor.slot);
                                // still reachable through its alias, and deleting
                                // it frees the broken fragments too
                                let location = EntryLocation {
                                    dir: cursor.dir,
                                    first_slot,
                                    short_slot: cursor.slot,
                                };
                                self.deferred = Some(fs.make_entry(None, short, location));
                                return Some(Err(FatError::CorruptLongName { slot: first_slot }));
                            }
                        }
                    } else {
                        (None, run_start.unwrap_or(cursor.slot))
                    };

                    let location = EntryLocation {
                        dir: cursor.dir,
                        first_slot,
                        short_slot: cursor.slot,
                    };
                    return Some(Ok(fs.make_entry(long, short, location)));
                }
            }
        }
    }
}

/// Lazy walk over the entries of one directory. Skips free, deleted, dot
/// and volume-label slots. A corrupt long name is reported as an error,
/// followed by its short entry under the 8.3 alias.
pub struct DirIter<'a, D: BlockDevice, C: VolumeConfig> {
    fs: &'a mut FileSystem<D, C>,
    scan: DirScan<C>,
}

impl<D: BlockDevice, C: VolumeConfig> Iterator for DirIter<'_, D, C> {
    type Item = Result<Entry, FatError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.scan.next(self.fs)
    }
}

impl<D: BlockDevice, C: VolumeConfig> FileSystem<D, C> {
    pub(crate) fn root_dir(&self) -> DirLocation {
        match self.geometry.fat_type {
            FatType::Fat32 if C::FAT32 => DirLocation::Chain(self.geometry.root_cluster),
            _ => DirLocation::Root,
        }
    }

    /// Directory whose first cluster is `cluster`; 0 means the root, as in
    /// `..` entries
    pub(crate) fn dir_from_cluster(&self, cluster: u32) -> DirLocation {
        if cluster == 0 {
            self.root_dir()
        } else {
            DirLocation::Chain(cluster)
        }
    }

    /// Cluster value that refers to `dir` from a `..` entry
    fn dir_reference(&self, dir: DirLocation) -> u32 {
        match dir {
            DirLocation::Root => 0,
            DirLocation::Chain(cluster) if self.root_dir() == DirLocation::Chain(cluster) => 0,
            DirLocation::Chain(cluster) => cluster,
        }
    }

    pub(crate) fn dir_of(&self, parent: Option<&Entry>) -> Result<DirLocation, FatError> {
        match parent {
            None => Ok(self.root_dir()),
            Some(entry) if !entry.is_dir() => Err(FatError::NotADirectory),
            Some(entry) => Ok(self.dir_from_cluster(entry.first_cluster())),
        }
    }

    pub(crate) fn cursor_at(&mut self, dir: DirLocation, slot: u32) -> Result<Option<SlotCursor>, FatError> {
        match dir {
            DirLocation::Root => Ok((slot < self.geometry.root_entries).then_some(SlotCursor {
                dir,
                slot,
                cluster: 0,
            })),
            DirLocation::Chain(first) => {
                if slot >= MAX_DIR_SLOTS {
                    return Ok(None);
                }
                let index = slot / self.geometry.entries_per_cluster();
                let cluster = self.fat.nth_cluster(&mut self.device, first, index)?;
                Ok(cluster.map(|cluster| SlotCursor { dir, slot, cluster }))
            }
        }
    }

    pub(crate) fn advance(&mut self, cursor: SlotCursor) -> Result<Option<SlotCursor>, FatError> {
        let slot = cursor.slot + 1;
        match cursor.dir {
            DirLocation::Root => Ok((slot < self.geometry.root_entries).then_some(SlotCursor { slot, ..cursor })),
            DirLocation::Chain(_) => {
                if slot >= MAX_DIR_SLOTS {
                    return Ok(None);
                }
                if slot % self.geometry.entries_per_cluster() != 0 {
                    return Ok(Some(SlotCursor { slot, ..cursor }));
                }
                let next = self.fat.next_cluster(&mut self.device, cursor.cluster)?;
                Ok(next.map(|cluster| SlotCursor { slot, cluster, ..cursor }))
            }
        }
    }

    /// Sector and byte offset of a slot
    fn slot_address(&self, cursor: SlotCursor) -> (u64, usize) {
        let bps = self.geometry.bytes_per_sector as u64;
        match cursor.dir {
            DirLocation::Root => {
                let byte = cursor.slot as u64 * DIR_ENTRY_SIZE as u64;
                (self.geometry.first_root_sector + byte / bps, (byte % bps) as usize)
            }
            DirLocation::Chain(_) => {
                let within = (cursor.slot % self.geometry.entries_per_cluster()) as u64;
                let byte = within * DIR_ENTRY_SIZE as u64;
                (
                    self.geometry.cluster_first_sector(cursor.cluster) + byte / bps,
                    (byte % bps) as usize,
                )
            }
        }
    }

    pub(crate) fn read_slot(&mut self, cursor: SlotCursor) -> Result<[u8; DIR_ENTRY_SIZE], FatError> {
        let (at, offset) = self.slot_address(cursor);
        let raw = sector::read(&mut self.device, at, |data| {
            let mut raw = [0u8; DIR_ENTRY_SIZE];
            raw.copy_from_slice(&data[offset..offset + DIR_ENTRY_SIZE]);
            raw
        })?;
        Ok(raw)
    }

    pub(crate) fn write_slot(
        &mut self,
        cursor: SlotCursor,
        f: impl FnOnce(&mut [u8]),
    ) -> Result<(), FatError> {
        let (at, offset) = self.slot_address(cursor);
        sector::update(&mut self.device, at, |data| f(&mut data[offset..offset + DIR_ENTRY_SIZE]))?;
        Ok(())
    }

    pub(crate) fn make_entry(
        &self,
        long: Option<LongNameString>,
        short: ShortEntry,
        location: EntryLocation,
    ) -> Entry {
        let short_name = decode_short_name(&self.codepage, &short.name, short.nt_flags, false);
        let name = long.unwrap_or_else(|| {
            let restored = decode_short_name(&self.codepage, &short.name, short.nt_flags, true);
            let mut name = LongNameString::new();
            // a decoded 8.3 name is far below the long-name capacity
            let _ = name.try_push_str(&restored);
            name
        });
        Entry {
            name,
            short_name,
            short,
            location,
        }
    }

    /// Walk the entries of `dir` (the root when `None`)
    pub fn iter_dir(&mut self, dir: Option<&Entry>) -> Result<DirIter<'_, D, C>, FatError> {
        let location = self.dir_of(dir)?;
        let cursor = self.cursor_at(location, 0)?;
        Ok(DirIter {
            fs: self,
            scan: DirScan::new(cursor),
        })
    }

    /// Find `name` in `parent` (the root when `None`). Matches the long name
    /// or the 8.3 alias, compared through the codepage.
    pub fn lookup(&mut self, parent: Option<&Entry>, name: &str) -> Result<Entry, FatError> {
        let dir = self.dir_of(parent)?;
        let name = validate_name(name, MAX_LFN_UNITS)?;
        self.find_in(dir, name)?.ok_or(FatError::NotFound)
    }

    /// Entry called `name` in `dir`. Corrupt long names do not stop the
    /// search; the first one is reported only when nothing matched.
    pub(crate) fn find_in(&mut self, dir: DirLocation, name: &str) -> Result<Option<Entry>, FatError> {
        match self.search(dir, name)? {
            (Some(entry), _) => Ok(Some(entry)),
            (None, Some(slot)) => Err(FatError::CorruptLongName { slot }),
            (None, None) => Ok(None),
        }
    }

    /// Existing entry that a new entry called `name` would collide with
    fn find_existing(&mut self, dir: DirLocation, name: &str) -> Result<Option<Entry>, FatError> {
        let (found, corrupt) = self.search(dir, name)?;
        if let (None, Some(slot)) = (&found, corrupt) {
            warn!("name check in a directory with a corrupt long name at slot {}", slot);
        }
        Ok(found)
    }

    fn search(&mut self, dir: DirLocation, name: &str) -> Result<(Option<Entry>, Option<u32>), FatError> {
        let cursor = self.cursor_at(dir, 0)?;
        let mut scan = DirScan::<C>::new(cursor);
        let mut corrupt = None;
        while let Some(entry) = scan.next(self) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(FatError::CorruptLongName { slot }) => {
                    corrupt.get_or_insert(slot);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if self.codepage.compare(entry.name(), name) || self.codepage.compare(entry.short_name(), name) {
                return Ok((Some(entry), corrupt));
            }
        }
        Ok((None, corrupt))
    }

    /// Create a file or directory in `parent` (the root when `None`). A file
    /// gets clusters for its initial size, zero-filled; a directory gets one
    /// cluster holding `.` and `..`.
    pub fn create_entry(
        &mut self,
        parent: Option<&Entry>,
        name: &str,
        kind: EntryKind,
    ) -> Result<Entry, FatError> {
        let dir = self.dir_of(parent)?;
        let name = self.check_new_name(name)?;
        if self.find_existing(dir, name)?.is_some() {
            return Err(FatError::AlreadyExists);
        }
        let (alias, nt_flags, fragments) = self.short_alias(dir, name)?;

        let data_clusters = match kind {
            EntryKind::File { size } => self.geometry.clusters_for(size as u64),
            EntryKind::Directory => 1,
        };
        let run = self.find_free_run(dir, fragments + 1)?;
        let dir_clusters = match run {
            FreeRun::At(_) => 0,
            FreeRun::Extend { clusters, .. } => clusters,
        };
        if data_clusters + dir_clusters > self.fat.free_clusters() {
            return Err(FatError::NoSpace);
        }

        self.mark_dirty()?;
        let now = self.now();
        let (attributes, size) = match kind {
            EntryKind::File { size } => (ATTR_ARCHIVE, size),
            EntryKind::Directory => (ATTR_DIRECTORY, 0),
        };
        let mut short = ShortEntry::new(alias, attributes, nt_flags, now);
        short.size = size;

        if data_clusters > 0 {
            short.first_cluster = self.fat.allocate(&mut self.device, data_clusters)?;
        }
        let placed = self
            .init_contents(&short, dir)
            .and_then(|_| self.place_entry(dir, run, name, &short, fragments));
        let location = match placed {
            Ok(location) => location,
            Err(e) => {
                if short.first_cluster != 0 {
                    let _ = self.fat.free_chain(&mut self.device, short.first_cluster);
                }
                return Err(e);
            }
        };

        debug!("created {:?} {} at slot {}", kind, name, location.short_slot);
        let long = (fragments > 0).then(|| {
            let mut long = LongNameString::new();
            let _ = long.try_push_str(name);
            long
        });
        Ok(self.make_entry(long, short, location))
    }

    /// Remove an entry. A directory must be empty. Its slots are marked
    /// deleted before its clusters are freed.
    pub fn delete(&mut self, entry: Entry) -> Result<(), FatError> {
        let short = self.resolve(&entry)?;
        if short.is_directory() && !self.dir_is_empty(short.first_cluster)? {
            return Err(FatError::NotEmpty);
        }
        self.mark_dirty()?;
        self.mark_deleted(entry.location)?;
        if short.first_cluster != 0 {
            self.fat.free_chain(&mut self.device, short.first_cluster)?;
        }
        debug!("deleted {}", entry.name());
        Ok(())
    }

    /// Move and/or rename an entry. The cluster chain is kept; only the
    /// directory slots change. Returns the handle at the new location.
    pub fn rename(
        &mut self,
        entry: Entry,
        new_parent: Option<&Entry>,
        new_name: &str,
    ) -> Result<Entry, FatError> {
        let short = self.resolve(&entry)?;
        let dest = self.dir_of(new_parent)?;
        let name = self.check_new_name(new_name)?;
        if let Some(existing) = self.find_existing(dest, name)? {
            // changing only the case of its own name
            if existing.location != entry.location {
                return Err(FatError::AlreadyExists);
            }
        }
        if short.is_directory() {
            self.check_not_inside(short.first_cluster, dest)?;
        }

        let (alias, nt_flags, fragments) = self.short_alias(dest, name)?;
        let run = self.find_free_run(dest, fragments + 1)?;
        if let FreeRun::Extend { clusters, .. } = run {
            if clusters > self.fat.free_clusters() {
                return Err(FatError::NoSpace);
            }
        }

        self.mark_dirty()?;
        let mut moved = short;
        moved.name = alias;
        moved.nt_flags = nt_flags;
        let location = self.place_entry(dest, run, name, &moved, fragments)?;
        self.mark_deleted(entry.location)?;

        if short.is_directory() && dest != entry.location.dir {
            let parent = self.dir_reference(dest);
            let cursor = self
                .cursor_at(DirLocation::Chain(short.first_cluster), 1)?
                .ok_or(FatError::CorruptChain {
                    cluster: short.first_cluster,
                })?;
            self.write_slot(cursor, |raw| {
                if raw[..11] == DOTDOT_NAME {
                    let mut dotdot = ShortEntry::parse(raw);
                    dotdot.first_cluster = parent;
                    dotdot.write(raw);
                }
            })?;
        }

        debug!("moved {} to {}", entry.name(), name);
        let long = (fragments > 0).then(|| {
            let mut long = LongNameString::new();
            let _ = long.try_push_str(name);
            long
        });
        Ok(self.make_entry(long, moved, location))
    }

    /// Re-read the short slot behind `entry` and check it still holds it
    pub(crate) fn resolve(&mut self, entry: &Entry) -> Result<ShortEntry, FatError> {
        let cursor = self
            .cursor_at(entry.location.dir, entry.location.short_slot)?
            .ok_or(FatError::NotFound)?;
        let raw = self.read_slot(cursor)?;
        if classify(&raw) != SlotKind::Short {
            return Err(FatError::NotFound);
        }
        let short = ShortEntry::parse(&raw);
        if short.name != entry.short.name || short.first_cluster != entry.short.first_cluster {
            return Err(FatError::NotFound);
        }
        Ok(short)
    }

    pub(crate) fn store_entry(&mut self, entry: &Entry) -> Result<(), FatError> {
        let cursor = self
            .cursor_at(entry.location.dir, entry.location.short_slot)?
            .ok_or(FatError::NotFound)?;
        let short = entry.short;
        self.write_slot(cursor, |raw| short.write(raw))
    }

    fn check_new_name<'n>(&self, name: &'n str) -> Result<&'n str, FatError> {
        let max = if C::LONG_NAMES {
            C::MAX_NAME_LEN.min(MAX_LFN_UNITS)
        } else {
            12
        };
        Ok(validate_name(name, max)?)
    }

    /// 8.3 alias, NT case flags and long-name fragment count for a new name
    fn short_alias(&mut self, dir: DirLocation, name: &str) -> Result<([u8; 11], u8, u32), FatError> {
        match encode_short_name(&self.codepage, name) {
            ShortFit::Exact { name, nt_flags } => Ok((name, nt_flags, 0)),
            // without long names the case of a mixed part is dropped
            ShortFit::MixedCase { name, nt_flags } if !C::LONG_NAMES => Ok((name, nt_flags, 0)),
            ShortFit::NeedsLongName if !C::LONG_NAMES => Err(NameError::LongNamesDisabled.into()),
            ShortFit::MixedCase { .. } | ShortFit::NeedsLongName => {
                let basis = ShortNameBasis::new(&self.codepage, name);
                for n in 1..=MAX_NUMERIC_TAIL {
                    let candidate = basis.with_tail(n);
                    if !self.short_name_taken(dir, &candidate)? {
                        return Ok((candidate, 0, fragments_needed(name) as u32));
                    }
                }
                Err(FatError::AlreadyExists)
            }
        }
    }

    fn short_name_taken(&mut self, dir: DirLocation, name: &[u8; 11]) -> Result<bool, FatError> {
        let mut cursor = self.cursor_at(dir, 0)?;
        while let Some(at) = cursor {
            let raw = self.read_slot(at)?;
            match classify(&raw) {
                SlotKind::End => break,
                SlotKind::Short if raw[..11] == name[..] => return Ok(true),
                _ => {}
            }
            cursor = self.advance(at)?;
        }
        Ok(false)
    }

    fn find_free_run(&mut self, dir: DirLocation, needed: u32) -> Result<FreeRun, FatError> {
        let mut cursor = self.cursor_at(dir, 0)?;
        let mut run_start = 0;
        let mut run_len = 0;
        let mut total = 0;
        let mut last_cluster = match dir {
            DirLocation::Chain(first) => first,
            DirLocation::Root => 0,
        };

        while let Some(at) = cursor {
            let raw = self.read_slot(at)?;
            last_cluster = at.cluster;
            total = at.slot + 1;
            match classify(&raw) {
                SlotKind::End | SlotKind::Deleted => {
                    if run_len == 0 {
                        run_start = at.slot;
                    }
                    run_len += 1;
                    if run_len == needed {
                        return Ok(FreeRun::At(run_start));
                    }
                }
                _ => run_len = 0,
            }
            cursor = self.advance(at)?;
        }

        match dir {
            DirLocation::Root => Err(FatError::NoSpace),
            DirLocation::Chain(_) => {
                if run_len == 0 {
                    run_start = total;
                }
                if run_start + needed > MAX_DIR_SLOTS {
                    return Err(FatError::NoSpace);
                }
                let per_cluster = self.geometry.entries_per_cluster();
                let clusters = (needed - run_len + per_cluster - 1) / per_cluster;
                Ok(FreeRun::Extend {
                    first_slot: run_start,
                    clusters,
                    last_cluster,
                })
            }
        }
    }

    fn zero_cluster(&mut self, cluster: u32) -> Result<(), FatError> {
        let first = self.geometry.cluster_first_sector(cluster);
        sector::zero(&mut self.device, first, self.geometry.sectors_per_cluster as u64)?;
        Ok(())
    }

    fn zero_chain(&mut self, first: u32) -> Result<(), FatError> {
        let mut cluster = Some(first);
        let mut steps = 0;
        while let Some(current) = cluster {
            steps += 1;
            if steps > self.fat.cluster_count() {
                return Err(FatError::CorruptChain { cluster: first });
            }
            self.zero_cluster(current)?;
            cluster = self.fat.next_cluster(&mut self.device, current)?;
        }
        Ok(())
    }

    /// Zero a fresh chain; for a directory also write `.` and `..`
    fn init_contents(&mut self, short: &ShortEntry, parent: DirLocation) -> Result<(), FatError> {
        if short.first_cluster == 0 {
            return Ok(());
        }
        self.zero_chain(short.first_cluster)?;
        if short.is_directory() {
            let mut dot = ShortEntry::new(DOT_NAME, ATTR_DIRECTORY, 0, short.created);
            dot.first_cluster = short.first_cluster;
            let mut dotdot = ShortEntry::new(DOTDOT_NAME, ATTR_DIRECTORY, 0, short.created);
            dotdot.first_cluster = self.dir_reference(parent);
            let at = self.geometry.cluster_first_sector(short.first_cluster);
            sector::update(&mut self.device, at, |data| {
                dot.write(&mut data[..DIR_ENTRY_SIZE]);
                dotdot.write(&mut data[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE]);
            })?;
        }
        Ok(())
    }

    /// Write the long-name fragments and the short entry into a free run
    fn place_entry(
        &mut self,
        dir: DirLocation,
        run: FreeRun,
        name: &str,
        short: &ShortEntry,
        fragments: u32,
    ) -> Result<EntryLocation, FatError> {
        let first_slot = match run {
            FreeRun::At(slot) => slot,
            FreeRun::Extend {
                first_slot,
                clusters,
                last_cluster,
            } => {
                let added = self.fat.extend(&mut self.device, last_cluster, clusters)?;
                self.zero_chain(added)?;
                debug!("directory grew by {} clusters", clusters);
                first_slot
            }
        };

        let broken = FatError::CorruptChain {
            cluster: match dir {
                DirLocation::Chain(first) => first,
                DirLocation::Root => 0,
            },
        };
        let mut cursor = self.cursor_at(dir, first_slot)?.ok_or(broken)?;
        let checksum = lfn_checksum(&short.name);
        let total = fragments as u8;
        for ordinal in (1..=total).rev() {
            self.write_slot(cursor, |raw| write_fragment(raw, name, ordinal, total, checksum))?;
            cursor = self.advance(cursor)?.ok_or(FatError::CorruptChain { cluster: cursor.cluster })?;
        }
        let short = *short;
        self.write_slot(cursor, |raw| short.write(raw))?;

        Ok(EntryLocation {
            dir,
            first_slot,
            short_slot: cursor.slot,
        })
    }

    fn mark_deleted(&mut self, location: EntryLocation) -> Result<(), FatError> {
        let mut cursor = self
            .cursor_at(location.dir, location.first_slot)?
            .ok_or(FatError::NotFound)?;
        loop {
            self.write_slot(cursor, |raw| raw[DIR_NAME] = DIR_ENTRY_DELETED)?;
            if cursor.slot >= location.short_slot {
                return Ok(());
            }
            cursor = self.advance(cursor)?.ok_or(FatError::NotFound)?;
        }
    }

    fn dir_is_empty(&mut self, first_cluster: u32) -> Result<bool, FatError> {
        if first_cluster == 0 {
            return Ok(true);
        }
        let mut cursor = self.cursor_at(DirLocation::Chain(first_cluster), 0)?;
        while let Some(at) = cursor {
            let raw = self.read_slot(at)?;
            match classify(&raw) {
                SlotKind::End => return Ok(true),
                SlotKind::Deleted => {}
                SlotKind::Short if ShortEntry::parse(&raw).is_dot() => {}
                _ => return Ok(false),
            }
            cursor = self.advance(at)?;
        }
        Ok(true)
    }

    /// Fail with `InvalidMove` when `dest` is the directory starting at
    /// `moved` or lies below it
    fn check_not_inside(&mut self, moved: u32, dest: DirLocation) -> Result<(), FatError> {
        let root = self.root_dir();
        let mut current = dest;
        for _ in 0..=self.fat.cluster_count() {
            let cluster = match current {
                DirLocation::Root => return Ok(()),
                DirLocation::Chain(cluster) => cluster,
            };
            if cluster == moved {
                return Err(FatError::InvalidMove);
            }
            if current == root {
                return Ok(());
            }
            let cursor = self
                .cursor_at(current, 1)?
                .ok_or(FatError::CorruptChain { cluster })?;
            let dotdot = ShortEntry::parse(&self.read_slot(cursor)?);
            if dotdot.name != DOTDOT_NAME {
                return Err(FatError::CorruptChain { cluster });
            }
            current = self.dir_from_cluster(dotdot.first_cluster);
        }
        Err(FatError::CorruptChain { cluster: moved })
    }
}
