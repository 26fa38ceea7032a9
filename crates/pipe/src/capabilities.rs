//! Capability flags advertised by pipeline stages

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Bitmask of what a stage (or the source behind it) supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const NONE: Self = Self(0);
    /// Native size (and therefore resolution) of the source is known
    pub const SIZE: Self = Self(1 << 1);
    /// Can create new datasets
    pub const CREATE: Self = Self(1 << 2);
    /// Can delete datasets
    pub const REMOVE: Self = Self(1 << 3);
    /// Can build pyramids (overviews)
    pub const BUILD_PYRAMIDS: Self = Self(1 << 4);
    /// At least one identify format is supported
    pub const IDENTIFY: Self = Self(1 << 5);
    /// Identify returns numeric values
    pub const IDENTIFY_VALUE: Self = Self(1 << 6);
    /// Identify returns plain text
    pub const IDENTIFY_TEXT: Self = Self(1 << 7);
    /// Identify returns HTML
    pub const IDENTIFY_HTML: Self = Self(1 << 8);
    /// Identify returns features
    pub const IDENTIFY_FEATURE: Self = Self(1 << 9);

    const NAMED: [(Self, &'static str); 9] = [
        (Self::SIZE, "Size"),
        (Self::CREATE, "Create"),
        (Self::REMOVE, "Remove"),
        (Self::BUILD_PYRAMIDS, "BuildPyramids"),
        (Self::IDENTIFY, "Identify"),
        (Self::IDENTIFY_VALUE, "IdentifyValue"),
        (Self::IDENTIFY_TEXT, "IdentifyText"),
        (Self::IDENTIFY_HTML, "IdentifyHtml"),
        (Self::IDENTIFY_FEATURE, "IdentifyFeature"),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Names of the set flags, in declaration order
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Capabilities {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut caps = Capabilities::SIZE | Capabilities::IDENTIFY | Capabilities::IDENTIFY_VALUE;
        assert!(caps.contains(Capabilities::SIZE));
        assert!(!caps.contains(Capabilities::CREATE));
        assert_eq!(caps.to_string(), "Size, Identify, IdentifyValue");

        caps.remove(Capabilities::SIZE);
        assert!(!caps.contains(Capabilities::SIZE));
        assert!(Capabilities::default().is_empty());
    }
}
