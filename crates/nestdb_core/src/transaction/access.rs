//! Access types and collection kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability a unit requests on a collection.
///
/// The variants are ordered by strength: `Read < Write < Exclusive`. A
/// stronger access type covers every weaker one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessType {
    /// Shared read access.
    Read,
    /// Write access. Concurrent readers of other transactions are allowed.
    Write,
    /// Exclusive access. No other transaction may touch the collection.
    Exclusive,
}

impl AccessType {
    /// Whether this access type permits document writes.
    #[must_use]
    pub const fn is_write_capable(self) -> bool {
        matches!(self, Self::Write | Self::Exclusive)
    }

    /// Whether holding `self` already grants everything `other` would.
    #[must_use]
    pub fn covers(self, other: Self) -> bool {
        self >= other
    }

    /// Whether a claim of `self` held by one transaction allows another
    /// transaction to obtain `other` on the same collection.
    #[must_use]
    pub const fn is_compatible_with(self, other: Self) -> bool {
        use AccessType::*;
        matches!((self, other), (Read, Read) | (Read, Write) | (Write, Read))
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Exclusive => "exclusive",
        };
        f.write_str(name)
    }
}

/// Physical kind of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    /// Holds plain documents.
    Document,
    /// Holds edge documents.
    Edge,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document => f.write_str("document"),
            Self::Edge => f.write_str("edge"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_ordering() {
        assert!(AccessType::Read < AccessType::Write);
        assert!(AccessType::Write < AccessType::Exclusive);
        assert!(AccessType::Exclusive.covers(AccessType::Read));
        assert!(!AccessType::Read.covers(AccessType::Write));
    }

    #[test]
    fn write_capability() {
        assert!(!AccessType::Read.is_write_capable());
        assert!(AccessType::Write.is_write_capable());
        assert!(AccessType::Exclusive.is_write_capable());
    }

    #[test]
    fn compatibility_matrix() {
        use AccessType::*;
        assert!(Read.is_compatible_with(Read));
        assert!(Read.is_compatible_with(Write));
        assert!(Write.is_compatible_with(Read));
        assert!(!Write.is_compatible_with(Write));
        for other in [Read, Write, Exclusive] {
            assert!(!Exclusive.is_compatible_with(other));
            assert!(!other.is_compatible_with(Exclusive));
        }
    }
}
