//! Solid voxel columns produced by rasterizing a tile's input geometry.
//!
//! Every cell of the xz grid holds a sorted, non-overlapping list of solid [`Span`]s.

use thiserror::Error;

use crate::{
    Aabb3d,
    span::{Span, SpanKey, Spans},
};

/// A dense grid of solid span columns. Build with [`HeightfieldBuilder`].
#[derive(Debug, Clone)]
pub struct Heightfield {
    /// Number of columns along x.
    pub width: u16,
    /// Number of columns along z.
    pub depth: u16,
    /// World bounds covered by the grid, border included.
    pub aabb: Aabb3d,
    /// Horizontal cell size in world units.
    pub cell_size: f32,
    /// Vertical cell size in world units.
    pub cell_height: f32,
    /// Lowest span of each column, indexed by `x + z * width`.
    pub spans: Vec<Option<SpanKey>>,
    /// Storage for every span; columns link through [`Span::next`].
    pub allocated_spans: Spans,
}

impl Heightfield {
    /// The highest representable span height.
    pub const MAX_HEIGHT: u16 = u16::MAX;

    /// Inserts a span into its column, merging it with every span it overlaps.
    #[inline]
    pub(crate) fn add_span(&mut self, insertion: SpanInsertion) -> Result<(), SpanInsertionError> {
        let column = self.column_index(insertion.x, insertion.z);
        if column >= self.spans.len() {
            return Err(SpanInsertionError::ColumnIndexOutOfBounds {
                x: insertion.x,
                z: insertion.z,
            });
        }

        let mut new_span = insertion.span;
        let mut below = None;
        let mut cursor = self.spans[column];
        while let Some(key) = cursor {
            let existing = self.span(key).clone();
            cursor = existing.next();
            if existing.min() > new_span.max() {
                break;
            }
            if existing.max() < new_span.min() {
                below = Some(key);
                continue;
            }

            new_span.set_min(new_span.min().min(existing.min()));
            new_span.set_max(new_span.max().max(existing.max()));
            // Ceilings this close count as one surface; the larger area id wins.
            if (new_span.max() as i32 - existing.max() as i32).unsigned_abs()
                <= insertion.flag_merge_threshold as u32
            {
                new_span.set_area(new_span.area().max(existing.area()));
            }

            self.allocated_spans.remove(key);
            match below {
                Some(below) => self.span_mut(below).set_next(cursor),
                None => self.spans[column] = cursor,
            }
        }

        match below {
            Some(below) => {
                new_span.set_next(self.span(below).next());
                let key = self.allocated_spans.insert(new_span);
                self.span_mut(below).set_next(key);
            }
            None => {
                new_span.set_next(self.spans[column]);
                let key = self.allocated_spans.insert(new_span);
                self.spans[column] = Some(key);
            }
        }

        Ok(())
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && x < self.width as i32 && z >= 0 && z < self.depth as i32
    }

    /// Key of the lowest span of a column, or `None` for empty or out-of-range columns.
    #[inline]
    pub fn span_key_at(&self, x: u16, z: u16) -> Option<SpanKey> {
        if x >= self.width || z >= self.depth {
            return None;
        }
        self.spans[self.column_index(x, z)]
    }

    /// The lowest span of a column, see [`Heightfield::span_key_at`].
    #[inline]
    pub fn span_at(&self, x: u16, z: u16) -> Option<&Span> {
        let span_key = self.span_key_at(x, z)?;
        Some(self.span(span_key))
    }

    /// Iterates over the keys of all spans in a column, bottom to top.
    pub fn column(&self, x: u16, z: u16) -> impl Iterator<Item = SpanKey> + '_ {
        let mut next = self.span_key_at(x, z);
        std::iter::from_fn(move || {
            let key = next?;
            next = self.span(key).next();
            Some(key)
        })
    }

    /// # Panics
    ///
    /// Panics if `key` was removed.
    #[inline]
    pub fn span(&self, key: SpanKey) -> &Span {
        &self.allocated_spans[key]
    }

    /// # Panics
    ///
    /// Panics if `key` was removed.
    #[inline]
    pub fn span_mut(&mut self, key: SpanKey) -> &mut Span {
        &mut self.allocated_spans[key]
    }
}

/// Sizes an empty [`Heightfield`] from world bounds and a voxel size.
pub struct HeightfieldBuilder {
    /// World bounds to cover.
    pub aabb: Aabb3d,
    /// Horizontal cell size in world units.
    pub cell_size: f32,
    /// Vertical cell size in world units.
    pub cell_height: f32,
}

impl HeightfieldBuilder {
    /// Allocates a heightfield with every column empty.
    ///
    /// # Errors
    ///
    /// Returns an error if either side needs more columns than a `u16` can address.
    pub fn build(self) -> Result<Heightfield, HeightfieldBuilderError> {
        let width = (self.aabb.max.x - self.aabb.min.x) / self.cell_size + 0.5;
        let depth = (self.aabb.max.z - self.aabb.min.z) / self.cell_size + 0.5;
        if !(0.0..=u16::MAX as f32).contains(&width) || !(0.0..=u16::MAX as f32).contains(&depth)
        {
            return Err(HeightfieldBuilderError::ColumnCountTooLarge { width, depth });
        }
        let column_count = width as usize * depth as usize;
        Ok(Heightfield {
            width: width as u16,
            depth: depth as u16,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            spans: vec![None; column_count],
            allocated_spans: Spans::with_min_capacity(column_count),
        })
    }
}

/// Errors from [`HeightfieldBuilder::build`].
#[derive(Error, Debug)]
pub enum HeightfieldBuilderError {
    /// The grid does not fit the 16-bit cell coordinates.
    #[error("Heightfield is too large, got {width}*{depth} cells but each side must be at most {max}", max = u16::MAX)]
    ColumnCountTooLarge {
        /// Requested columns along x.
        width: f32,
        /// Requested columns along z.
        depth: f32,
    },
}

/// Errors from inserting a span into a [`Heightfield`].
#[derive(Error, Debug)]
pub enum SpanInsertionError {
    /// The column lies outside the grid.
    #[error("column index out of bounds: x={x}, z={z}")]
    ColumnIndexOutOfBounds {
        /// Column x.
        x: u16,
        /// Column z.
        z: u16,
    },
}

pub(crate) struct SpanInsertion {
    pub(crate) x: u16,
    pub(crate) z: u16,
    /// Ceilings at most this far apart merge their area ids.
    pub(crate) flag_merge_threshold: u16,
    pub(crate) span: Span,
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        Aabb3d,
        span::{AreaType, SpanBuilder},
    };

    use super::*;

    fn five_by_five() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [5.0, 5.0, 5.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn solid(min: u16, max: u16, area: u8) -> Span {
        SpanBuilder {
            min,
            max,
            area: AreaType(area),
            next: None,
        }
        .build()
    }

    fn insert_with_threshold(
        field: &mut Heightfield,
        x: u16,
        z: u16,
        threshold: u16,
        span: Span,
    ) {
        field
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: threshold,
                span,
            })
            .unwrap();
    }

    fn insert(field: &mut Heightfield, x: u16, z: u16, span: Span) {
        insert_with_threshold(field, x, z, 0, span);
    }

    /// `(min, max, area)` of every span in a column, bottom to top.
    fn column_of(field: &Heightfield, x: u16, z: u16) -> Vec<(u16, u16, AreaType)> {
        field
            .column(x, z)
            .map(|key| {
                let span = field.span(key);
                (span.min(), span.max(), span.area())
            })
            .collect()
    }

    #[test]
    fn grid_size_follows_bounds() {
        let field = five_by_five();
        assert_eq!((field.width, field.depth), (5, 5));
        assert_eq!(field.spans.len(), 25);
        assert!(field.allocated_spans.is_empty());
    }

    #[test]
    fn oversized_grid_is_an_error() {
        let result = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [1.0e6, 1.0, 1.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build();
        assert!(matches!(
            result,
            Err(HeightfieldBuilderError::ColumnCountTooLarge { .. })
        ));
    }

    #[test]
    fn spans_land_in_their_own_column() {
        let mut field = five_by_five();
        insert(&mut field, 1, 3, solid(2, 4, 2));
        insert(&mut field, 2, 3, solid(4, 7, 2));

        assert_eq!(*field.span_at(1, 3).unwrap(), solid(2, 4, 2));
        assert_eq!(*field.span_at(2, 3).unwrap(), solid(4, 7, 2));
        assert_eq!(field.span_at(3, 1), None);
        assert_eq!(field.span_at(9, 1), None);
    }

    #[test]
    fn columns_outside_the_grid_are_rejected() {
        let mut field = five_by_five();
        let result = field.add_span(SpanInsertion {
            x: 9,
            z: 9,
            flag_merge_threshold: 0,
            span: solid(2, 4, 2),
        });
        assert!(matches!(
            result,
            Err(SpanInsertionError::ColumnIndexOutOfBounds { x: 9, z: 9 })
        ));
    }

    #[test]
    fn columns_stay_sorted_regardless_of_insertion_order() {
        let mut above_first = five_by_five();
        insert(&mut above_first, 1, 3, solid(9, 10, 2));
        insert(&mut above_first, 1, 3, solid(2, 4, 2));

        let mut below_first = five_by_five();
        insert(&mut below_first, 1, 3, solid(2, 4, 2));
        insert(&mut below_first, 1, 3, solid(9, 10, 2));

        let expected = vec![(2, 4, AreaType(2)), (9, 10, AreaType(2))];
        assert_eq!(column_of(&above_first, 1, 3), expected);
        assert_eq!(column_of(&below_first, 1, 3), expected);
    }

    #[test]
    fn touching_spans_merge() {
        let mut field = five_by_five();
        insert(&mut field, 1, 3, solid(2, 4, 2));
        insert(&mut field, 1, 3, solid(4, 7, 2));

        assert_eq!(*field.span_at(1, 3).unwrap(), solid(2, 7, 2));
        assert_eq!(field.allocated_spans.len(), 1);
    }

    #[test]
    fn one_span_can_swallow_several() {
        let mut field = five_by_five();
        insert(&mut field, 0, 0, solid(1, 2, 1));
        insert(&mut field, 0, 0, solid(4, 5, 1));
        insert(&mut field, 0, 0, solid(8, 9, 1));
        insert(&mut field, 0, 0, solid(20, 21, 1));
        insert(&mut field, 0, 0, solid(2, 8, 1));

        assert_eq!(
            column_of(&field, 0, 0),
            vec![(1, 9, AreaType(1)), (20, 21, AreaType(1))]
        );
        assert_eq!(field.allocated_spans.len(), 2);
    }

    #[test]
    fn merging_prefers_higher_area_within_threshold() {
        let mut field = five_by_five();
        insert(&mut field, 0, 0, solid(2, 4, 7));
        insert_with_threshold(&mut field, 0, 0, 1, solid(3, 5, 2));
        assert_eq!(column_of(&field, 0, 0), vec![(2, 5, AreaType(7))]);
    }

    #[test]
    fn distant_ceilings_keep_the_new_area() {
        let mut field = five_by_five();
        insert(&mut field, 0, 0, solid(2, 4, 7));
        insert(&mut field, 0, 0, solid(3, 9, 2));
        assert_eq!(column_of(&field, 0, 0), vec![(2, 9, AreaType(2))]);
    }
}
