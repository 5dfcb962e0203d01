//! Layout version stamped on every persisted [`ModelSnapshot`](crate::ModelSnapshot).
//!
//! Within one major layout, snapshots only ever gain optional fields. An
//! older snapshot restores with the newer fields at their defaults, and a
//! newer one restores with the fields this build does not know dropped. A
//! snapshot from another major layout is refused, and the model starts empty.

use core::cmp::Ordering;

use crate::SCHEMA_VERSION;

/// Minor layout revision written by this build.
pub const SCHEMA_MINOR: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct SchemaVersion {
    #[cfg_attr(feature = "minicbor", n(0))]
    pub major: u32,
    #[cfg_attr(feature = "minicbor", n(1))]
    pub minor: u32,
}

/// How a stored snapshot's layout relates to the one this build writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Same,
    /// Same major, earlier minor. Missing fields take their defaults.
    Older,
    /// Same major, later minor. Unknown fields are lost on the next save.
    Newer,
    /// Different major. Cannot be restored.
    Incompatible,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// The layout this build writes.
    pub const fn current() -> Self {
        Self::new(SCHEMA_VERSION, SCHEMA_MINOR)
    }

    pub fn compatibility(&self) -> Compatibility {
        let current = Self::current();
        if self.major != current.major {
            return Compatibility::Incompatible;
        }
        match self.minor.cmp(&current.minor) {
            Ordering::Equal => Compatibility::Same,
            Ordering::Less => Compatibility::Older,
            Ordering::Greater => Compatibility::Newer,
        }
    }

    /// True if a snapshot stamped with this version can be restored.
    pub fn is_compatible(&self) -> bool {
        self.compatibility() != Compatibility::Incompatible
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::current()
    }
}

impl core::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_major_layout_decides_restore() {
        let current = SchemaVersion::current();
        assert_eq!(current.compatibility(), Compatibility::Same);
        assert_eq!(
            SchemaVersion::new(SCHEMA_VERSION, SCHEMA_MINOR + 3).compatibility(),
            Compatibility::Newer
        );
        assert!(SchemaVersion::new(SCHEMA_VERSION, SCHEMA_MINOR + 3).is_compatible());
        assert!(!SchemaVersion::new(SCHEMA_VERSION + 1, 0).is_compatible());
        assert!(SchemaVersion::new(SCHEMA_VERSION + 1, 0) > current);
    }

    #[test]
    fn test_display() {
        assert_eq!(SchemaVersion::new(1, 2).to_string(), "1.2");
    }
}
