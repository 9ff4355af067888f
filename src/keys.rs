//! Typed key construction for the four key spaces
//!
//! A key is an ordered tuple of string segments. Each segment is escaped and terminated
//! with a `0x00` byte, so the encoding of a tuple prefix is a byte prefix of every key
//! extending it, and no other key. Escaping: `0x00 -> 0x01 0x01`, `0x01 -> 0x01 0x02`.
//!
//! | Key space | Key | Value |
//! |---|---|---|
//! | primary  | `(place, id)` | JSON record |
//! | spatial  | `(geo, precision, geohash, id)` | id |
//! | category | `(category, category, geohash, id)` | id |
//! | search   | `(search, token, id)` | id |

use bytes::Bytes;
use std::fmt;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0x01;

/// Builder for tuple keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPath {
    buf: Vec<u8>,
}

impl KeyPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one segment
    pub fn push(mut self, segment: impl AsRef<str>) -> Self {
        for &b in segment.as_ref().as_bytes() {
            match b {
                TERMINATOR => self.buf.extend_from_slice(&[ESCAPE, 0x01]),
                ESCAPE => self.buf.extend_from_slice(&[ESCAPE, 0x02]),
                _ => self.buf.push(b),
            }
        }
        self.buf.push(TERMINATOR);
        self
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

/// Split an encoded key back into its segments. Returns `None` for bytes that were not
/// produced by [`KeyPath`].
pub fn decode(key: &[u8]) -> Option<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = Vec::new();
    let mut bytes = key.iter();

    while let Some(&b) = bytes.next() {
        match b {
            TERMINATOR => segments.push(String::from_utf8(std::mem::take(&mut current)).ok()?),
            ESCAPE => match bytes.next()? {
                0x01 => current.push(TERMINATOR),
                0x02 => current.push(ESCAPE),
                _ => return None,
            },
            _ => current.push(b),
        }
    }

    current.is_empty().then_some(segments)
}

/// The four key spaces a place is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySpace {
    Primary,
    Spatial,
    Category,
    Search,
}

impl KeySpace {
    pub const ALL: [KeySpace; 4] = [
        KeySpace::Primary,
        KeySpace::Spatial,
        KeySpace::Category,
        KeySpace::Search,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            KeySpace::Primary => "place",
            KeySpace::Spatial => "geo",
            KeySpace::Category => "category",
            KeySpace::Search => "search",
        }
    }

    pub fn path(&self) -> KeyPath {
        KeyPath::new().push(self.name())
    }

    /// Prefix shared by every key in this space
    pub fn prefix(&self) -> Bytes {
        self.path().into_bytes()
    }
}

impl fmt::Display for KeySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn primary_key(id: &str) -> Bytes {
    KeySpace::Primary.path().push(id).into_bytes()
}

pub fn spatial_prefix(precision: usize, geohash: &str) -> Bytes {
    KeySpace::Spatial
        .path()
        .push(precision.to_string())
        .push(geohash)
        .into_bytes()
}

pub fn spatial_key(precision: usize, geohash: &str, id: &str) -> Bytes {
    KeySpace::Spatial
        .path()
        .push(precision.to_string())
        .push(geohash)
        .push(id)
        .into_bytes()
}

pub fn category_prefix(category: &str, geohash: &str) -> Bytes {
    KeySpace::Category
        .path()
        .push(category)
        .push(geohash)
        .into_bytes()
}

pub fn category_key(category: &str, geohash: &str, id: &str) -> Bytes {
    KeySpace::Category
        .path()
        .push(category)
        .push(geohash)
        .push(id)
        .into_bytes()
}

pub fn search_prefix(token: &str) -> Bytes {
    KeySpace::Search.path().push(token).into_bytes()
}

pub fn search_key(token: &str, id: &str) -> Bytes {
    KeySpace::Search.path().push(token).push(id).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_round_trip() {
        let key = spatial_key(4, "sp3e", "01HABC");
        assert_eq!(
            decode(&key).unwrap(),
            vec!["geo", "4", "sp3e", "01HABC"]
        );
    }

    #[test]
    fn test_prefix_is_segment_aligned() {
        let prefix = search_prefix("caf");
        assert!(search_key("caf", "1").starts_with(&prefix));
        assert!(!search_key("cafe", "1").starts_with(&prefix));
    }

    #[test]
    fn test_key_spaces_do_not_overlap() {
        let prefixes: Vec<Bytes> = KeySpace::ALL.iter().map(KeySpace::prefix).collect();
        for (i, a) in prefixes.iter().enumerate() {
            for (j, b) in prefixes.iter().enumerate() {
                if i != j {
                    assert!(!a.starts_with(b));
                }
            }
        }
        assert!(primary_key("x").starts_with(&KeySpace::Primary.prefix()));
        assert!(category_key("park", "sp3e", "x").starts_with(&category_prefix("park", "sp3e")));
    }

    #[test]
    fn test_escaping() {
        let key = KeyPath::new().push("a\0b").push("c\u{1}d").into_bytes();
        assert_eq!(decode(&key).unwrap(), vec!["a\0b", "c\u{1}d"]);

        // A segment containing NUL cannot be confused with two segments
        let joined = KeyPath::new().push("a").push("b").into_bytes();
        assert_ne!(key, joined);
        assert_ne!(KeyPath::new().push("a\0b").into_bytes(), joined);
    }

    #[test]
    fn test_decode_rejects_unterminated() {
        assert!(decode(b"place").is_none());
        assert!(decode(b"a\x01\x07\x00").is_none());
    }
}
