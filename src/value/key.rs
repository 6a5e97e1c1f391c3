//! Keys and key ranges

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Ordered, hashable address of an entry in a directory.
///
/// Ordering is total: variants compare by rank first (`Iid < Sid < Tuple < Desc`),
/// then by content. `Desc` reverses the ordering of the key it wraps, which lets a
/// composite row key sort one of its columns descending.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    /// Integer identifier
    Iid(i64),
    /// Symbolic identifier
    Sid(String),
    /// Composite key, compared lexicographically
    Tuple(Vec<Key>),
    /// Descending wrapper
    Desc(Box<Key>),
}

impl Key {
    pub fn sid(s: impl Into<String>) -> Key {
        Key::Sid(s.into())
    }

    pub fn tuple(parts: impl IntoIterator<Item = Key>) -> Key {
        Key::Tuple(parts.into_iter().collect())
    }

    pub fn desc(key: Key) -> Key {
        Key::Desc(Box::new(key))
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Iid(_) => 0,
            Key::Sid(_) => 1,
            Key::Tuple(_) => 2,
            Key::Desc(_) => 3,
        }
    }

    pub fn as_iid(&self) -> Option<i64> {
        match self {
            Key::Iid(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_sid(&self) -> Option<&str> {
        match self {
            Key::Sid(s) => Some(s),
            _ => None,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Iid(a), Key::Iid(b)) => a.cmp(b),
            (Key::Sid(a), Key::Sid(b)) => a.cmp(b),
            (Key::Tuple(a), Key::Tuple(b)) => a.cmp(b),
            (Key::Desc(a), Key::Desc(b)) => b.cmp(a),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Iid(i) => write!(f, "{}", i),
            Key::Sid(s) => write!(f, "{:?}", s),
            Key::Tuple(parts) => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", part)?;
                }
                write!(f, ")")
            }
            Key::Desc(inner) => write!(f, "desc({})", inner),
        }
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Iid(i)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Sid(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Sid(s)
    }
}

/// Inclusive key range used to restrict which parent keys an arrow consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: Key,
    pub end: Key,
}

impl KeyRange {
    pub fn new(start: impl Into<Key>, end: impl Into<Key>) -> Self {
        KeyRange {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        &self.start <= key && key <= &self.end
    }
}

/// `true` when `key` falls inside any of `ranges`, or when there is no restriction.
pub fn in_ranges(ranges: Option<&[KeyRange]>, key: &Key) -> bool {
    match ranges {
        None => true,
        Some(ranges) => ranges.iter().any(|r| r.contains(key)),
    }
}
