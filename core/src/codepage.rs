/// Case class of the character handed to a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseClass {
    Upper,
    Lower,
    Caseless,
}

/// Character conversions used by the directory-entry codec.
///
/// One instance lives in each mounted filesystem and every name comparison
/// goes through it. `encode` and `decode` translate between characters and
/// the single-byte OEM code page stored in 8.3 names.
pub trait Codepage {
    fn to_upper(&self, c: char) -> (char, CaseClass);

    fn to_lower(&self, c: char) -> (char, CaseClass);

    fn encode(&self, c: char) -> Option<u8>;

    fn decode(&self, byte: u8) -> char;

    /// Case-insensitive equality
    fn compare(&self, a: &str, b: &str) -> bool {
        let mut a = a.chars();
        let mut b = b.chars();
        loop {
            match (a.next(), b.next()) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if self.to_upper(x).0 != self.to_upper(y).0 {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

/// ASCII-only folding. Bytes above 0x7F in short names decode to U+FFFD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsciiCodepage;

impl Codepage for AsciiCodepage {
    fn to_upper(&self, c: char) -> (char, CaseClass) {
        if c.is_ascii_lowercase() {
            (c.to_ascii_uppercase(), CaseClass::Lower)
        } else if c.is_ascii_uppercase() {
            (c, CaseClass::Upper)
        } else {
            (c, CaseClass::Caseless)
        }
    }

    fn to_lower(&self, c: char) -> (char, CaseClass) {
        if c.is_ascii_uppercase() {
            (c.to_ascii_lowercase(), CaseClass::Upper)
        } else if c.is_ascii_lowercase() {
            (c, CaseClass::Lower)
        } else {
            (c, CaseClass::Caseless)
        }
    }

    fn encode(&self, c: char) -> Option<u8> {
        if c.is_ascii() {
            Some(c as u8)
        } else {
            None
        }
    }

    fn decode(&self, byte: u8) -> char {
        if byte.is_ascii() {
            byte as char
        } else {
            char::REPLACEMENT_CHARACTER
        }
    }
}
