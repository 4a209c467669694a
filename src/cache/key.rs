//! Cache keys.
//!
//! A chunk is addressed by the hash of the token prefix it was computed for
//! plus a format tag describing its layout (dtype, partitioning, ...).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one immutable KV-cache chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    /// Hash of the token prefix this chunk covers.
    pub prefix_hash: String,

    /// Layout / element type / partitioning tag.
    pub format: String,
}

impl CacheKey {
    pub fn new(prefix_hash: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            prefix_hash: prefix_hash.into(),
            format: format.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.prefix_hash, self.format)
    }
}

impl<P: Into<String>, F: Into<String>> From<(P, F)> for CacheKey {
    fn from((prefix_hash, format): (P, F)) -> Self {
        Self::new(prefix_hash, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_structural_equality() {
        let a = CacheKey::new("abc123", "half");
        let b: CacheKey = ("abc123", "half").into();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&CacheKey::new("abc123", "float")));
    }

    #[test]
    fn test_display() {
        assert_eq!(CacheKey::new("abc123", "half").to_string(), "abc123@half");
    }
}
