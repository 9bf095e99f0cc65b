// Short (8.3) directory entry codec and name rules shared by the directory
// operations

use arrayvec::ArrayString;
use byteorder::{ByteOrder, LittleEndian};
use fatvol_core::{CaseClass, Codepage, DosTimestamp, NameError};
use std::fmt::Write;

use super::constants::*;

pub const DOT_NAME: [u8; 11] = *b".          ";
pub const DOTDOT_NAME: [u8; 11] = *b"..         ";

/// Decoded 32-byte short entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortEntry {
    pub name: [u8; 11],
    pub attributes: u8,
    pub nt_flags: u8,
    pub created: DosTimestamp,
    pub accessed_date: u16,
    pub modified: DosTimestamp,
    pub first_cluster: u32,
    pub size: u32,
}

impl ShortEntry {
    pub fn new(name: [u8; 11], attributes: u8, nt_flags: u8, now: DosTimestamp) -> Self {
        Self {
            name,
            attributes,
            nt_flags,
            created: now,
            accessed_date: now.date,
            modified: DosTimestamp {
                centiseconds: 0,
                ..now
            },
            first_cluster: 0,
            size: 0,
        }
    }

    pub fn parse(raw: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[DIR_NAME..DIR_NAME + 11]);
        let hi = LittleEndian::read_u16(&raw[DIR_FST_CLUS_HI..]) as u32;
        let lo = LittleEndian::read_u16(&raw[DIR_FST_CLUS_LO..]) as u32;
        Self {
            name,
            attributes: raw[DIR_ATTR],
            nt_flags: raw[DIR_NT_RES],
            created: DosTimestamp {
                date: LittleEndian::read_u16(&raw[DIR_CRT_DATE..]),
                time: LittleEndian::read_u16(&raw[DIR_CRT_TIME..]),
                centiseconds: raw[DIR_CRT_TIME_TENTH],
            },
            accessed_date: LittleEndian::read_u16(&raw[DIR_LST_ACC_DATE..]),
            modified: DosTimestamp {
                date: LittleEndian::read_u16(&raw[DIR_WRT_DATE..]),
                time: LittleEndian::read_u16(&raw[DIR_WRT_TIME..]),
                centiseconds: 0,
            },
            first_cluster: (hi << 16) | lo,
            size: LittleEndian::read_u32(&raw[DIR_FILE_SIZE..]),
        }
    }

    pub fn write(&self, raw: &mut [u8]) {
        raw[DIR_NAME..DIR_NAME + 11].copy_from_slice(&self.name);
        raw[DIR_ATTR] = self.attributes;
        raw[DIR_NT_RES] = self.nt_flags;
        raw[DIR_CRT_TIME_TENTH] = self.created.centiseconds;
        LittleEndian::write_u16(&mut raw[DIR_CRT_TIME..], self.created.time);
        LittleEndian::write_u16(&mut raw[DIR_CRT_DATE..], self.created.date);
        LittleEndian::write_u16(&mut raw[DIR_LST_ACC_DATE..], self.accessed_date);
        LittleEndian::write_u16(&mut raw[DIR_FST_CLUS_HI..], (self.first_cluster >> 16) as u16);
        LittleEndian::write_u16(&mut raw[DIR_WRT_TIME..], self.modified.time);
        LittleEndian::write_u16(&mut raw[DIR_WRT_DATE..], self.modified.date);
        LittleEndian::write_u16(&mut raw[DIR_FST_CLUS_LO..], self.first_cluster as u16);
        LittleEndian::write_u32(&mut raw[DIR_FILE_SIZE..], self.size);
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    pub fn is_volume_label(&self) -> bool {
        self.attributes & ATTR_VOLUME_ID != 0
    }

    /// `.` or `..`
    pub fn is_dot(&self) -> bool {
        self.name == DOT_NAME || self.name == DOTDOT_NAME
    }
}

/// What a 32-byte directory slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Free, and no used slot follows
    End,
    Deleted,
    LongName,
    Short,
}

pub fn classify(raw: &[u8]) -> SlotKind {
    match raw[DIR_NAME] {
        DIR_ENTRY_FREE => SlotKind::End,
        DIR_ENTRY_DELETED => SlotKind::Deleted,
        _ if raw[DIR_ATTR] & ATTR_LONG_NAME_MASK == ATTR_LONG_NAME => SlotKind::LongName,
        _ => SlotKind::Short,
    }
}

/// Check a user-supplied name and strip trailing dots and spaces. `max` is
/// the longest accepted name in UTF-16 units.
pub fn validate_name(name: &str, max: usize) -> Result<&str, NameError> {
    let trimmed = name.trim_end_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        return Err(if name.is_empty() {
            NameError::Empty
        } else {
            NameError::Reserved
        });
    }
    for c in trimmed.chars() {
        if (c as u32) < 0x20 || matches!(c, '"' | '*' | '/' | ':' | '<' | '>' | '?' | '\\' | '|') {
            return Err(NameError::InvalidCharacter(c));
        }
    }
    let len = trimmed.encode_utf16().count();
    if len > max {
        return Err(NameError::TooLong { len, max });
    }
    Ok(trimmed)
}

/// Check if a byte may appear in a stored 8.3 name
pub fn is_valid_83_char(c: u8) -> bool {
    matches!(c,
        b'A'..=b'Z' | b'0'..=b'9' | b'!' | b'#' | b'$' | b'%' | b'&' |
        b'\'' | b'(' | b')' | b'-' | b'@' | b'^' | b'_' | b'`' |
        b'{' | b'}' | b'~' | 0x80..=0xFF)
}

/// Outcome of fitting a name into the 8.3 form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortFit {
    /// Stored as-is; `nt_flags` records an all-lowercase base or extension
    Exact { name: [u8; 11], nt_flags: u8 },
    /// Fits 8.3 once uppercased, but one part mixes case so the original
    /// spelling needs a long name to survive. `nt_flags` covers the other part.
    MixedCase { name: [u8; 11], nt_flags: u8 },
    /// Too long or holds characters 8.3 cannot store
    NeedsLongName,
}

pub fn encode_short_name<P: Codepage>(codepage: &P, name: &str) -> ShortFit {
    let (base, ext) = match name.rfind('.') {
        Some(0) => return ShortFit::NeedsLongName,
        Some(dot) => (&name[..dot], &name[dot + 1..]),
        None => (name, ""),
    };
    if base.contains('.') || ext.is_empty() && name.ends_with('.') {
        return ShortFit::NeedsLongName;
    }

    let mut out = [b' '; 11];
    let mut nt_flags = 0;
    let mut mixed = false;
    for (part, offset, width, lower_flag) in [(base, 0, 8, NT_LOWER_BASE), (ext, 8, 3, NT_LOWER_EXT)] {
        let mut len = 0;
        let mut saw_upper = false;
        let mut saw_lower = false;
        for c in part.chars() {
            if len == width {
                return ShortFit::NeedsLongName;
            }
            let (upper, class) = codepage.to_upper(c);
            match class {
                CaseClass::Upper => saw_upper = true,
                CaseClass::Lower => saw_lower = true,
                CaseClass::Caseless => {}
            }
            let byte = match codepage.encode(upper) {
                Some(byte) if is_valid_83_char(byte) => byte,
                _ => return ShortFit::NeedsLongName,
            };
            out[offset + len] = byte;
            len += 1;
        }
        if saw_upper && saw_lower {
            mixed = true;
        } else if saw_lower {
            nt_flags |= lower_flag;
        }
    }
    if out[0] == DIR_ENTRY_DELETED {
        out[0] = DIR_ENTRY_KANJI_E5;
    }
    if mixed {
        ShortFit::MixedCase { name: out, nt_flags }
    } else {
        ShortFit::Exact { name: out, nt_flags }
    }
}

pub type ShortNameString = ArrayString<MAX_SHORT_NAME_BYTES>;

/// Render a stored 8.3 name as `BASE.EXT`. With `restore_case` the NT
/// lowercase flags are applied.
pub fn decode_short_name<P: Codepage>(
    codepage: &P,
    name: &[u8; 11],
    nt_flags: u8,
    restore_case: bool,
) -> ShortNameString {
    let mut out = ShortNameString::new();
    let lower_base = restore_case && nt_flags & NT_LOWER_BASE != 0;
    let lower_ext = restore_case && nt_flags & NT_LOWER_EXT != 0;

    let push = |out: &mut ShortNameString, byte: u8, lower: bool| {
        let mut c = codepage.decode(byte);
        if lower {
            c = codepage.to_lower(c).0;
        }
        // capacity covers 11 three-byte characters plus the dot
        let _ = out.try_push(c);
    };

    for (i, &byte) in name[..8].iter().enumerate() {
        if byte == b' ' {
            break;
        }
        let byte = if i == 0 && byte == DIR_ENTRY_KANJI_E5 {
            DIR_ENTRY_DELETED
        } else {
            byte
        };
        push(&mut out, byte, lower_base);
    }
    if name[8] != b' ' {
        let _ = out.try_push('.');
        for &byte in &name[8..] {
            if byte == b' ' {
                break;
            }
            push(&mut out, byte, lower_ext);
        }
    }
    out
}

/// Checksum of a short name stored in each of its long-name fragments
pub fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    let mut sum = 0u8;
    for &byte in short_name {
        sum = ((sum >> 1) | ((sum & 1) << 7)).wrapping_add(byte);
    }
    sum
}

/// Uppercased 8.3 skeleton of a long name, before a numeric tail is added
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortNameBasis {
    base: [u8; 8],
    base_len: usize,
    ext: [u8; 3],
}

impl ShortNameBasis {
    pub fn new<P: Codepage>(codepage: &P, long_name: &str) -> Self {
        let stripped = long_name.trim_start_matches('.');
        let (base, ext) = match stripped.rfind('.') {
            Some(dot) => (&stripped[..dot], &stripped[dot + 1..]),
            None => (stripped, ""),
        };

        let mut basis = Self {
            base: [b' '; 8],
            base_len: 0,
            ext: [b' '; 3],
        };
        for c in base.chars().filter(|&c| c != ' ' && c != '.') {
            if basis.base_len == 8 {
                break;
            }
            basis.base[basis.base_len] = Self::map_char(codepage, c);
            basis.base_len += 1;
        }
        if basis.base_len == 0 {
            basis.base[0] = b'_';
            basis.base_len = 1;
        }
        for (slot, c) in basis
            .ext
            .iter_mut()
            .zip(ext.chars().filter(|&c| c != ' ' && c != '.'))
        {
            *slot = Self::map_char(codepage, c);
        }
        basis
    }

    fn map_char<P: Codepage>(codepage: &P, c: char) -> u8 {
        match codepage.encode(codepage.to_upper(c).0) {
            Some(byte) if is_valid_83_char(byte) => byte,
            _ => b'_',
        }
    }

    /// The name with `~n` replacing the end of the base as needed
    pub fn with_tail(&self, n: u32) -> [u8; 11] {
        let mut tail = ArrayString::<8>::new();
        // at most "~9999999"
        let _ = write!(tail, "~{}", n.min(9_999_999));
        let keep = self.base_len.min(8 - tail.len());

        let mut out = [b' '; 11];
        out[..keep].copy_from_slice(&self.base[..keep]);
        out[keep..keep + tail.len()].copy_from_slice(tail.as_bytes());
        out[8..].copy_from_slice(&self.ext);
        if out[0] == DIR_ENTRY_DELETED {
            out[0] = DIR_ENTRY_KANJI_E5;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fatvol_core::AsciiCodepage;

    fn exact(name: &str) -> ([u8; 11], u8) {
        match encode_short_name(&AsciiCodepage, name) {
            ShortFit::Exact { name, nt_flags } => (name, nt_flags),
            other => panic!("{} should fit 8.3, got {:?}", name, other),
        }
    }

    #[test]
    fn test_encode_83() {
        assert_eq!(exact("README.TXT"), (*b"README  TXT", 0));
        assert_eq!(exact("FOLDER"), (*b"FOLDER     ", 0));
        assert_eq!(exact("short.txt"), (*b"SHORT   TXT", NT_LOWER_BASE | NT_LOWER_EXT));
        assert_eq!(exact("makefile"), (*b"MAKEFILE   ", NT_LOWER_BASE));
        assert_eq!(exact("NOTES.md"), (*b"NOTES   MD ", NT_LOWER_EXT));
    }

    #[test]
    fn test_needs_long_name() {
        for name in ["very_long_filename.txt", "file.jpeg", "a.b.c", ".profile", "two words"] {
            assert_eq!(
                encode_short_name(&AsciiCodepage, name),
                ShortFit::NeedsLongName,
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_mixed_case_keeps_uppercased_form() {
        assert_eq!(
            encode_short_name(&AsciiCodepage, "Makefile"),
            ShortFit::MixedCase { name: *b"MAKEFILE   ", nt_flags: 0 }
        );
        assert_eq!(
            encode_short_name(&AsciiCodepage, "ReadMe.txt"),
            ShortFit::MixedCase { name: *b"README  TXT", nt_flags: NT_LOWER_EXT }
        );
        assert_eq!(
            encode_short_name(&AsciiCodepage, "Makefile.am"),
            ShortFit::MixedCase { name: *b"MAKEFILEAM ", nt_flags: NT_LOWER_EXT }
        );
    }

    #[test]
    fn test_decode_restores_case() {
        let cp = AsciiCodepage;
        let name = *b"SHORT   TXT";
        let flags = NT_LOWER_BASE | NT_LOWER_EXT;
        assert_eq!(decode_short_name(&cp, &name, flags, true).as_str(), "short.txt");
        assert_eq!(decode_short_name(&cp, &name, flags, false).as_str(), "SHORT.TXT");
        assert_eq!(decode_short_name(&cp, &name, NT_LOWER_EXT, true).as_str(), "SHORT.txt");
        assert_eq!(decode_short_name(&cp, b"FOLDER     ", 0, true).as_str(), "FOLDER");
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("report. ", 255), Ok("report"));
        assert_eq!(validate_name("", 255), Err(NameError::Empty));
        assert_eq!(validate_name("..", 255), Err(NameError::Reserved));
        assert_eq!(validate_name("a*b", 255), Err(NameError::InvalidCharacter('*')));
        assert_eq!(
            validate_name("abcdefghijklm", 12),
            Err(NameError::TooLong { len: 13, max: 12 })
        );
    }

    #[test]
    fn test_lfn_checksum() {
        assert_eq!(lfn_checksum(b"SHORT   TXT"), 0xB5);
        assert_ne!(lfn_checksum(b"SHORT   TXT"), lfn_checksum(b"SHORT   TXU"));
        assert_eq!(lfn_checksum(&[0; 11]), 0);
    }

    #[test]
    fn test_numeric_tail() {
        let basis = ShortNameBasis::new(&AsciiCodepage, "Long File Name.text");
        assert_eq!(&basis.with_tail(1), b"LONGFI~1TEX");
        assert_eq!(&basis.with_tail(12), b"LONGF~12TEX");
        let basis = ShortNameBasis::new(&AsciiCodepage, ".bashrc");
        assert_eq!(&basis.with_tail(1), b"BASHRC~1   ");
        let basis = ShortNameBasis::new(&AsciiCodepage, "a+b");
        assert_eq!(&basis.with_tail(2), b"A_B~2      ");
    }

    #[test]
    fn test_entry_round_trip() {
        let mut entry = ShortEntry::new(*b"HELLO   TXT", ATTR_ARCHIVE, NT_LOWER_EXT, DosTimestamp::EPOCH);
        entry.first_cluster = 0x0012_3456;
        entry.size = 12;
        let mut raw = [0u8; 32];
        entry.write(&mut raw);
        assert_eq!(&raw[20..22], &[0x12, 0x00]);
        assert_eq!(&raw[26..28], &[0x56, 0x34]);
        assert_eq!(ShortEntry::parse(&raw), entry);
        assert_eq!(classify(&raw), SlotKind::Short);
        raw[0] = DIR_ENTRY_DELETED;
        assert_eq!(classify(&raw), SlotKind::Deleted);
    }

    #[test]
    fn test_e5_lead_byte_escaped() {
        let mut name = [b' '; 11];
        name[0] = DIR_ENTRY_KANJI_E5;
        name[1] = b'A';
        let mut raw = [0u8; 32];
        raw[..11].copy_from_slice(&name);
        assert_eq!(classify(&raw), SlotKind::Short);
    }
}
