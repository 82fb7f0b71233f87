bitflags::bitflags! {
    /// The id of a region in a [`CompactHeightfield`](crate::CompactHeightfield).
    ///
    /// Bit 15 marks regions painted along the border of a tile. These are never turned into contours.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct RegionId: u16 {
        /// The default region, which is used for spans that are not in a region, i.e. not walkable.
        const NONE = 0;

        /// Heightfield border flag.
        /// If a heightfield region ID has this bit set, then the region is a border
        /// region and its spans are considered un-walkable.
        /// (Used during the region and contour build process.)
        const BORDER_REGION = 0x8000;

        /// All bits.
        const MAX = u16::MAX;
    }
}

impl Default for RegionId {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<u16> for RegionId {
    fn from(value: u16) -> Self {
        RegionId::from_bits_retain(value)
    }
}

impl RegionId {
    /// Returns `true` if this is a border region.
    #[inline]
    pub fn is_border(&self) -> bool {
        self.intersects(Self::BORDER_REGION)
    }

    /// Returns `true` if the span is in a region that will produce a contour.
    #[inline]
    pub fn is_interior(&self) -> bool {
        *self != Self::NONE && !self.is_border()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_flag_is_detected() {
        let region = RegionId::from(3) | RegionId::BORDER_REGION;
        assert!(region.is_border());
        assert!(!region.is_interior());
        assert!(RegionId::from(3).is_interior());
        assert!(!RegionId::NONE.is_interior());
        assert!(!RegionId::NONE.is_border());
    }
}
