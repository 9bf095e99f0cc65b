// Long filename (VFAT) fragments: encoding a name into 13-unit UTF-16
// pieces and reassembling a run of fragments during a directory scan

use arrayvec::ArrayString;
use fatvol_core::NameBuffer;
use log::warn;

use super::constants::*;
use super::directory::lfn_checksum;

pub type LongNameString = ArrayString<MAX_NAME_BYTES>;

/// Byte offsets of the 13 UTF-16 units inside a fragment
const UNIT_OFFSETS: [usize; LFN_CHARS_PER_ENTRY] = [
    LDIR_NAME1,
    LDIR_NAME1 + 2,
    LDIR_NAME1 + 4,
    LDIR_NAME1 + 6,
    LDIR_NAME1 + 8,
    LDIR_NAME2,
    LDIR_NAME2 + 2,
    LDIR_NAME2 + 4,
    LDIR_NAME2 + 6,
    LDIR_NAME2 + 8,
    LDIR_NAME2 + 10,
    LDIR_NAME3,
    LDIR_NAME3 + 2,
];

/// Fragments needed for a name
pub fn fragments_needed(name: &str) -> usize {
    (name.encode_utf16().count() + LFN_CHARS_PER_ENTRY - 1) / LFN_CHARS_PER_ENTRY
}

/// Fill `raw` with fragment `ordinal` (1-based) of `name`. The fragment with
/// the highest ordinal is flagged as last and is stored first on disk.
pub fn write_fragment(raw: &mut [u8], name: &str, ordinal: u8, total: u8, checksum: u8) {
    let start = (ordinal as usize - 1) * LFN_CHARS_PER_ENTRY;
    let mut units = name.encode_utf16().skip(start);
    let mut terminated = false;

    for &offset in UNIT_OFFSETS.iter() {
        // a short final piece gets one NUL, then 0xFFFF padding
        let unit = match units.next() {
            Some(unit) => unit,
            None if !terminated => {
                terminated = true;
                0x0000
            }
            None => 0xFFFF,
        };
        raw[offset..offset + 2].copy_from_slice(&unit.to_le_bytes());
    }

    raw[LDIR_ORD] = if ordinal == total {
        ordinal | LAST_LONG_ENTRY
    } else {
        ordinal
    };
    raw[LDIR_ATTR] = ATTR_LONG_NAME;
    raw[LDIR_TYPE] = 0;
    raw[LDIR_CHKSUM] = checksum;
    raw[LDIR_FST_CLUS_LO..LDIR_FST_CLUS_LO + 2].fill(0);
}

/// Long name attached to a short entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LongName {
    Absent,
    Present(LongNameString),
    /// The run preceding the short entry starts at `first_slot` and is
    /// out of sequence or carries the wrong checksum
    Corrupt { first_slot: u32 },
}

/// Accumulates the fragments preceding a short entry. The unit storage comes
/// from the volume configuration; with `NoLongNames` every run decodes as
/// corrupt, so such scans skip the builder altogether.
pub struct LongNameBuilder<B: NameBuffer> {
    units: B,
    expected: u8,
    total: u8,
    checksum: u8,
    first_slot: u32,
    active: bool,
    corrupt: bool,
}

impl<B: NameBuffer> Default for LongNameBuilder<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: NameBuffer> LongNameBuilder<B> {
    pub fn new() -> Self {
        Self {
            units: B::default(),
            expected: 0,
            total: 0,
            checksum: 0,
            first_slot: 0,
            active: false,
            corrupt: false,
        }
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.corrupt = false;
        self.expected = 0;
        self.total = 0;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Slot index of the first fragment of the current run
    pub fn first_slot(&self) -> u32 {
        self.first_slot
    }

    /// Feed the fragment stored at directory slot `slot`
    pub fn push(&mut self, raw: &[u8], slot: u32) {
        let ordinal = raw[LDIR_ORD];
        let sequence = ordinal & LONG_ENTRY_ORD_MASK;

        if ordinal & LAST_LONG_ENTRY != 0 {
            if self.active {
                warn!("long name run at slot {} abandoned by a new run at slot {}", self.first_slot, slot);
            }
            self.reset();
            self.active = true;
            self.first_slot = slot;
            self.checksum = raw[LDIR_CHKSUM];
            if sequence == 0 || sequence as usize > MAX_LFN_ENTRIES {
                self.corrupt = true;
                return;
            }
            self.total = sequence;
            self.expected = sequence;
        } else if !self.active {
            // fragment without the run's first piece
            self.active = true;
            self.corrupt = true;
            self.first_slot = slot;
            return;
        }

        if self.corrupt {
            return;
        }
        if sequence != self.expected || raw[LDIR_CHKSUM] != self.checksum || raw[LDIR_TYPE] != 0 {
            self.corrupt = true;
            return;
        }

        let base = (sequence as usize - 1) * LFN_CHARS_PER_ENTRY;
        let units = self.units.units_mut();
        if base + LFN_CHARS_PER_ENTRY > units.len() {
            self.corrupt = true;
            return;
        }
        for (i, &offset) in UNIT_OFFSETS.iter().enumerate() {
            units[base + i] = u16::from_le_bytes([raw[offset], raw[offset + 1]]);
        }
        self.expected -= 1;
    }

    /// Close the run with the short entry that follows it. The builder is
    /// reset afterwards.
    pub fn finish(&mut self, short_name: &[u8; 11]) -> LongName {
        if !self.active {
            return LongName::Absent;
        }
        let result = if self.corrupt || self.expected != 0 || lfn_checksum(short_name) != self.checksum {
            LongName::Corrupt {
                first_slot: self.first_slot,
            }
        } else {
            self.decode()
        };
        self.reset();
        result
    }

    fn decode(&self) -> LongName {
        let units = self.units.units();
        let capacity = (self.total as usize * LFN_CHARS_PER_ENTRY).min(units.len());
        let len = units[..capacity]
            .iter()
            .position(|&unit| unit == 0)
            .unwrap_or(capacity);
        if len == 0 || len > MAX_LFN_UNITS {
            return LongName::Corrupt {
                first_slot: self.first_slot,
            };
        }
        let mut name = LongNameString::new();
        for c in char::decode_utf16(units[..len].iter().copied()) {
            // 255 units decode to at most 765 bytes
            let _ = name.try_push(c.unwrap_or(char::REPLACEMENT_CHARACTER));
        }
        LongName::Present(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fatvol_core::{LongNameUnits, NoLongNames};

    type Builder = LongNameBuilder<LongNameUnits>;

    const SHORT: [u8; 11] = *b"ALONGF~1TXT";

    fn encode(name: &str) -> Vec<[u8; 32]> {
        let total = fragments_needed(name) as u8;
        let checksum = lfn_checksum(&SHORT);
        // on-disk order: highest ordinal first
        (1..=total)
            .rev()
            .map(|ordinal| {
                let mut raw = [0u8; 32];
                write_fragment(&mut raw, name, ordinal, total, checksum);
                raw
            })
            .collect()
    }

    fn rebuild(slots: &[[u8; 32]]) -> LongName {
        let mut builder = Builder::new();
        for (i, raw) in slots.iter().enumerate() {
            builder.push(raw, i as u32);
        }
        builder.finish(&SHORT)
    }

    #[test]
    fn test_fragment_layout() {
        let slots = encode("a long file.txt");
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0][0], 0x42);
        assert_eq!(slots[1][0], 0x01);
        assert_eq!(slots[0][LDIR_ATTR], ATTR_LONG_NAME);
        // "xt" then NUL then padding
        assert_eq!(&slots[0][1..9], &[b'x', 0, b't', 0, 0, 0, 0xFF, 0xFF]);
        assert_eq!(&slots[0][28..32], &[0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_exact_multiple_has_no_terminator() {
        let slots = encode("thirteen char");
        assert_eq!(slots.len(), 1);
        assert_eq!(&slots[0][30..32], &[b'r', 0]);
    }

    #[test]
    fn test_rebuild_name() {
        let name = "a long file name with unicode \u{00e9}\u{4e2d}.txt";
        assert_eq!(rebuild(&encode(name)), LongName::Present(LongNameString::from(name).unwrap()));
    }

    #[test]
    fn test_checksum_mismatch_is_corrupt() {
        let slots = encode("another long name.txt");
        let mut builder = Builder::new();
        for (i, raw) in slots.iter().enumerate() {
            builder.push(raw, i as u32);
        }
        assert_eq!(builder.finish(b"OTHER   TXT"), LongName::Corrupt { first_slot: 0 });
        assert!(!builder.is_active());
    }

    #[test]
    fn test_missing_fragment_is_corrupt() {
        let slots = encode("a name spanning three fragments!");
        assert_eq!(slots.len(), 3);
        let broken = [slots[0], slots[2]];
        assert_eq!(rebuild(&broken), LongName::Corrupt { first_slot: 0 });
    }

    #[test]
    fn test_orphan_fragment_is_corrupt() {
        let slots = encode("a name spanning three fragments!");
        assert_eq!(rebuild(&slots[1..]), LongName::Corrupt { first_slot: 0 });
    }

    #[test]
    fn test_new_run_replaces_old() {
        let first = encode("first name is long");
        let second = encode("second long name");
        let mut slots = vec![first[0]];
        slots.extend_from_slice(&second);
        assert_eq!(
            rebuild(&slots),
            LongName::Present(LongNameString::from("second long name").unwrap())
        );
    }

    #[test]
    fn test_storage_free_builder_never_decodes() {
        let mut builder = LongNameBuilder::<NoLongNames>::new();
        for (i, raw) in encode("a long file.txt").iter().enumerate() {
            builder.push(raw, i as u32);
        }
        assert_eq!(builder.finish(&SHORT), LongName::Corrupt { first_slot: 0 });
        assert!(std::mem::size_of::<LongNameBuilder<NoLongNames>>() <= 12);
    }

    #[test]
    fn test_no_run() {
        let mut builder = Builder::new();
        assert_eq!(builder.finish(&SHORT), LongName::Absent);
    }
}
