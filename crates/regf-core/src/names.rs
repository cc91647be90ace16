//! Key and value name handling.
//!
//! Names compare case-insensitively by uppercased characters. On disk a
//! name is stored "compressed" (one byte per character) when every character
//! fits in Latin-1, otherwise as UTF-16LE; a flag bit on the owning cell tells
//! which.

use std::cmp::Ordering;

/// Path separator used by key paths.
pub const PATH_SEPARATOR: char = '\\';

/// Longest key or value name in characters.
pub const MAX_NAME_CHARS: usize = 255;

/// Longest value name in UTF-16 units.
pub const MAX_VALUE_NAME_CHARS: usize = 16383;

/// Uppercase a single character, keeping it when the mapping is not 1:1.
pub fn upcase(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

/// Ordinal, case-insensitive comparison of two names.
pub fn compare(a: &str, b: &str) -> Ordering {
    a.chars().map(upcase).cmp(b.chars().map(upcase))
}

/// Case-insensitive equality.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    compare(a, b) == Ordering::Equal
}

/// Encoded form of a name plus whether it is compressed.
pub(crate) fn encode(name: &str) -> (Vec<u8>, bool) {
    if name.chars().all(|c| (c as u32) < 0x100) {
        (name.chars().map(|c| c as u8).collect(), true)
    } else {
        (utf16_bytes(name), false)
    }
}

/// Decode a stored name.
pub(crate) fn decode(bytes: &[u8], compressed: bool) -> String {
    if compressed {
        bytes.iter().map(|&b| char::from(b)).collect()
    } else {
        from_utf16_bytes(bytes)
    }
}

/// Size in bytes of the stored form of `name`.
pub(crate) fn encoded_len(name: &str) -> usize {
    if name.chars().all(|c| (c as u32) < 0x100) {
        name.chars().count()
    } else {
        name.encode_utf16().count() * 2
    }
}

/// Size of `name` as UTF-16, the unit the cached size hints are kept in.
pub(crate) fn utf16_len(name: &str) -> u32 {
    (name.encode_utf16().count() * 2) as u32
}

pub(crate) fn utf16_bytes(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

pub(crate) fn from_utf16_bytes(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Split a path into its first component and the remainder, if any.
pub(crate) fn split_first(path: &str) -> (&str, Option<&str>) {
    match path.split_once(PATH_SEPARATOR) {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}

/// Checks a single path component for storability.
pub(crate) fn is_valid_component(name: &str) -> bool {
    !name.is_empty() && !name.contains(PATH_SEPARATOR) && name.chars().count() <= MAX_NAME_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_ignores_case() {
        assert_eq!(compare("Software", "SOFTWARE"), Ordering::Equal);
        assert_eq!(compare("abc", "ABD"), Ordering::Less);
        assert_eq!(compare("b", "A"), Ordering::Greater);
        assert_eq!(compare("ab", "a"), Ordering::Greater);
        // no multi-char expansion: sharp s does not equal "SS"
        assert_ne!(compare("\u{df}", "SS"), Ordering::Equal);
    }

    #[test]
    fn test_latin1_names_compress() {
        let (bytes, compressed) = encode("Caf\u{e9}");
        assert!(compressed);
        assert_eq!(bytes, vec![b'C', b'a', b'f', 0xE9]);
        assert_eq!(decode(&bytes, true), "Caf\u{e9}");
        assert_eq!(encoded_len("Caf\u{e9}"), 4);
    }

    #[test]
    fn test_wide_names_use_utf16() {
        let (bytes, compressed) = encode("\u{65e5}\u{672c}");
        assert!(!compressed);
        assert_eq!(bytes.len(), 4);
        assert_eq!(decode(&bytes, false), "\u{65e5}\u{672c}");
    }

    #[test]
    fn test_split_first() {
        assert_eq!(split_first("Software\\Test"), ("Software", Some("Test")));
        assert_eq!(split_first("Leaf"), ("Leaf", None));
        assert_eq!(split_first("a\\b\\c"), ("a", Some("b\\c")));
    }
}
