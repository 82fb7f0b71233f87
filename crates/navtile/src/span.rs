use std::ops::{Deref, DerefMut};

use slotmap::SlotMap;

slotmap::new_key_type! {
    /// A key for a span in [`Spans`].
    pub struct SpanKey;
}

/// The arena holding all spans of a [`Heightfield`](crate::Heightfield).
/// Columns are singly linked lists through [`Span::next`].
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Spans(SlotMap<SpanKey, Span>);

impl Deref for Spans {
    type Target = SlotMap<SpanKey, Span>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Spans {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Spans {
    const DEFAULT_CAPACITY: usize = 1024;

    pub(crate) fn with_min_capacity(min_capacity: usize) -> Self {
        let capacity = min_capacity.max(Self::DEFAULT_CAPACITY);
        Self(SlotMap::with_capacity_and_key(capacity))
    }
}

pub(crate) struct SpanBuilder {
    pub(crate) min: u16,
    pub(crate) max: u16,
    pub(crate) area: AreaType,
    pub(crate) next: Option<SpanKey>,
}

impl SpanBuilder {
    pub(crate) fn build(self) -> Span {
        Span {
            min: self.min,
            max: self.max,
            area: self.area,
            next: self.next,
        }
    }
}

impl From<SpanBuilder> for Span {
    fn from(builder: SpanBuilder) -> Self {
        builder.build()
    }
}

/// A solid interval in a heightfield column.
/// Build with [`SpanBuilder`]
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Span {
    /// Height of the floor.
    min: u16,
    /// Height of the ceiling.
    max: u16,
    /// Area type ID.
    area: AreaType,
    /// The key of the next-higher span in the column
    next: Option<SpanKey>,
}

impl Span {
    /// The lower bound of the solid interval. [Units: vx]
    #[inline]
    pub fn min(&self) -> u16 {
        self.min
    }

    #[inline]
    pub(crate) fn set_min(&mut self, min: u16) {
        self.min = min;
    }

    /// The upper bound of the solid interval, i.e. the walkable floor. [Units: vx]
    #[inline]
    pub fn max(&self) -> u16 {
        self.max
    }

    #[inline]
    pub(crate) fn set_max(&mut self, max: u16) {
        self.max = max;
    }

    /// The area type of the span's top surface.
    #[inline]
    pub fn area(&self) -> AreaType {
        self.area
    }

    #[inline]
    pub(crate) fn set_area(&mut self, area: impl Into<AreaType>) {
        self.area = area.into();
    }

    /// The next-higher span in the same column.
    #[inline]
    pub fn next(&self) -> Option<SpanKey> {
        self.next
    }

    #[inline]
    pub(crate) fn set_next(&mut self, next: impl Into<Option<SpanKey>>) {
        self.next = next.into();
    }
}

/// An area id. `0` is unwalkable, everything else is walkable.
/// Higher ids win when spans with different ids are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct AreaType(pub u8);

impl From<u8> for AreaType {
    fn from(value: u8) -> Self {
        AreaType(value)
    }
}

impl AreaType {
    /// The area type 0. Triangles with this area type are not walkable.
    pub const NOT_WALKABLE: Self = Self(0);
    /// Default area type for walkable triangles. The highest possible area type.
    pub const DEFAULT_WALKABLE: Self = Self(u8::MAX);

    /// Returns `true` unless this is [`AreaType::NOT_WALKABLE`].
    #[inline]
    pub fn is_walkable(&self) -> bool {
        *self != Self::NOT_WALKABLE
    }
}
