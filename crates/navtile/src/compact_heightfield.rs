//! The open space above solid spans, with connections between neighboring spans.

use crate::{
    Aabb3d,
    compact_cell::CompactCell,
    compact_span::CompactSpan,
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    region::RegionId,
    span::AreaType,
};

/// A packed representation of the open space above the walkable spans of a [`Heightfield`].
#[derive(Debug, Clone)]
pub struct CompactHeightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The depth of the heightfield along the z-axis in cell units
    pub depth: u16,
    /// The walkable height used during the build of the field
    pub walkable_height: u16,
    /// The walkable climb used during the build of the field.
    pub walkable_climb: u16,
    /// The AABB border size used during the build of the field.
    pub border_size: u16,
    /// The maximum distance value of any span within the field.
    pub max_distance: u16,
    /// The maximum region id of any span within the field.
    pub max_region: RegionId,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The cells in the heightfield [Size: `width * depth`]
    pub cells: Vec<CompactCell>,
    /// All walkable spans in the heightfield
    pub spans: Vec<CompactSpan>,
    /// Vector containing border distance data. [Size: `spans.len()`]
    pub dist: Vec<u16>,
    /// Vector containing area type data. [Size: `spans.len()`]
    pub areas: Vec<AreaType>,
}

impl Heightfield {
    /// Builds a compact heightfield from this heightfield.
    ///
    /// # Errors
    ///
    /// Returns an error if a column has more layers than a connection slot can address.
    pub fn into_compact(
        self,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<CompactHeightfield, CompactHeightfieldError> {
        CompactHeightfield::from_heightfield(self, walkable_height, walkable_climb)
    }
}

impl CompactHeightfield {
    const MAX_HEIGHT: u16 = u16::MAX;
    /// Highest layer index a connection can store.
    pub const MAX_LAYERS: u8 = CompactSpan::NOT_CONNECTED - 1;

    /// Builds a compact heightfield from a heightfield.
    ///
    /// # Errors
    ///
    /// Returns an error if the heightfield has too many layers.
    pub fn from_heightfield(
        heightfield: Heightfield,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<Self, CompactHeightfieldError> {
        let walkable_span_count = heightfield
            .allocated_spans
            .values()
            .filter(|span| span.area().is_walkable())
            .count();

        let mut compact_heightfield = Self {
            width: heightfield.width,
            depth: heightfield.depth,
            walkable_height,
            walkable_climb,
            border_size: 0,
            aabb: heightfield.aabb,
            max_distance: 0,
            max_region: RegionId::NONE,
            cell_size: heightfield.cell_size,
            cell_height: heightfield.cell_height,
            cells: vec![
                CompactCell::default();
                heightfield.width as usize * heightfield.depth as usize
            ],
            spans: vec![CompactSpan::default(); walkable_span_count],
            dist: vec![0; walkable_span_count],
            areas: vec![AreaType::NOT_WALKABLE; walkable_span_count],
        };
        compact_heightfield.aabb.max.y += walkable_height as f32 * compact_heightfield.cell_height;

        let mut span_index = 0_usize;
        // Fill in cells and spans
        for z in 0..heightfield.depth {
            for x in 0..heightfield.width {
                let column_index = heightfield.column_index(x, z);
                let cell = &mut compact_heightfield.cells[column_index];
                cell.set_index(span_index as u32);

                for span_key in heightfield.column(x, z) {
                    let span = heightfield.span(span_key);
                    if !span.area().is_walkable() {
                        continue;
                    }
                    let bot = span.max();
                    let top = span
                        .next()
                        .map(|span| heightfield.span(span).min())
                        .unwrap_or(Self::MAX_HEIGHT);
                    let compact_span = &mut compact_heightfield.spans[span_index];
                    compact_span.y = bot;
                    let height = (top.saturating_sub(bot)).min(u8::MAX.into()) as u8;
                    compact_span.set_height(height);
                    compact_heightfield.areas[span_index] = span.area();
                    span_index += 1;
                    cell.inc_count();
                }
            }
        }

        // Find neighbour connections
        let mut max_layer_index = 0_u32;
        for z in 0..heightfield.depth {
            for x in 0..heightfield.width {
                let cell = compact_heightfield.cells[heightfield.column_index(x, z)];
                for i in cell.index_range() {
                    for dir in 0..4_u8 {
                        compact_heightfield.spans[i].set_con(dir, None);
                        let neighbor_x = x as i32 + dir_offset_x(dir) as i32;
                        let neighbor_z = z as i32 + dir_offset_z(dir) as i32;
                        // First check that the neighbour cell is in bounds.
                        if !heightfield.contains(neighbor_x, neighbor_z) {
                            continue;
                        }

                        // Iterate over all neighbour spans and check if any of the is
                        // accessible from current cell.
                        let neighbor_cell = compact_heightfield.cells
                            [heightfield.column_index(neighbor_x as u16, neighbor_z as u16)];
                        let span = compact_heightfield.spans[i].clone();
                        for k in neighbor_cell.index_range() {
                            let neighbor_span = &compact_heightfield.spans[k];
                            let bot = span.y.max(neighbor_span.y) as i32;
                            let top = (span.y as i32 + span.height() as i32)
                                .min(neighbor_span.y as i32 + neighbor_span.height() as i32);

                            // Check that the gap between the spans is walkable,
                            // and that the climb height between the gaps is not too high.
                            let is_walkable = (top - bot) >= walkable_height as i32;
                            let is_climbable = (neighbor_span.y as i32 - span.y as i32).abs()
                                <= walkable_climb as i32;
                            if !is_walkable || !is_climbable {
                                continue;
                            }
                            // Mark direction as walkable.
                            let layer_index = (k - neighbor_cell.index() as usize) as u32;
                            if layer_index > Self::MAX_LAYERS as u32 {
                                max_layer_index = max_layer_index.max(layer_index);
                                continue;
                            }
                            compact_heightfield.spans[i].set_con(dir, Some(layer_index as u8));
                            break;
                        }
                    }
                }
            }
        }
        if max_layer_index > Self::MAX_LAYERS as u32 {
            return Err(CompactHeightfieldError::TooManyLayers {
                max_layer_index: Self::MAX_LAYERS,
                layer_index: max_layer_index,
            });
        }
        Ok(compact_heightfield)
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    /// Returns the cell at the given coordinates. Returns `None` if the coordinates are invalid.
    #[inline]
    pub fn get_cell_at(&self, x: u16, z: u16) -> Option<&CompactCell> {
        if x >= self.width || z >= self.depth {
            return None;
        }
        self.cells.get(self.column_index(x, z))
    }

    /// Returns the cell at the given coordinates. Panics if the coordinates are invalid.
    #[inline]
    pub fn cell_at(&self, x: u16, z: u16) -> &CompactCell {
        &self.cells[self.column_index(x, z)]
    }

    /// Follows the connection `con` of the span at `(x, z)` in direction `dir`.
    /// Returns the neighbor's cell coordinates and span index.
    #[inline]
    pub(crate) fn con_indices(&self, x: i32, z: i32, dir: u8, con: u8) -> (i32, i32, usize) {
        let a_x = x + dir_offset_x(dir) as i32;
        let a_z = z + dir_offset_z(dir) as i32;
        let a_i = self.cells[(a_x + a_z * self.width as i32) as usize].index() as usize + con as usize;
        (a_x, a_z, a_i)
    }

    /// Returns the index of the neighbor of span `i` at `(x, z)` in direction `dir`, if connected.
    #[inline]
    pub(crate) fn neighbor_index(&self, x: u16, z: u16, i: usize, dir: u8) -> Option<usize> {
        let con = self.spans[i].con(dir)?;
        Some(self.con_indices(x as i32, z as i32, dir, con).2)
    }

    /// Iterates over all spans as `(x, z, span_index)`.
    pub fn iter_spans(&self) -> impl Iterator<Item = (u16, u16, usize)> + '_ {
        (0..self.depth).flat_map(move |z| {
            (0..self.width).flat_map(move |x| self.cell_at(x, z).index_range().map(move |i| (x, z, i)))
        })
    }
}

/// Errors that can occur when building a compact heightfield.
#[derive(Debug, thiserror::Error)]
pub enum CompactHeightfieldError {
    /// The heightfield has too many layers.
    #[error(
        "Heightfield has too many layers. Max layer index is {max_layer_index}, but got {layer_index}"
    )]
    TooManyLayers {
        /// The maximum layer index.
        max_layer_index: u8,
        /// The layer index that caused the error.
        layer_index: u32,
    },
}

#[cfg(test)]
pub(crate) mod tests {
    use glam::{UVec3, Vec3A};

    use crate::{
        HeightfieldBuilder, TriMesh,
        heightfield::SpanInsertion,
        math::opposite_dir,
        span::SpanBuilder,
    };

    use super::*;

    /// A `size`×`size` floor with a raised step starting halfway through the middle column.
    pub(crate) fn stepped_compact_heightfield(size: u16, step: f32) -> CompactHeightfield {
        let s = size as f32;
        let half = s * 0.5 + 0.5;
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new([0.0, 0.0, 0.0], [s, 10.0, s]),
            cell_size: 1.0,
            cell_height: 0.25,
        }
        .build()
        .unwrap();
        let trimesh = TriMesh {
            vertices: vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, s),
                Vec3A::new(half, 0.0, s),
                Vec3A::new(half, 0.0, 0.0),
                Vec3A::new(half, step, 0.0),
                Vec3A::new(half, step, s),
                Vec3A::new(s, step, s),
                Vec3A::new(s, step, 0.0),
            ],
            indices: vec![
                UVec3::new(0, 1, 2),
                UVec3::new(0, 2, 3),
                UVec3::new(4, 5, 6),
                UVec3::new(4, 6, 7),
            ],
            area_types: vec![AreaType::DEFAULT_WALKABLE; 4],
        };
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();
        heightfield.into_compact(8, 1).unwrap()
    }

    #[test]
    fn every_walkable_span_is_compacted() {
        let chf = stepped_compact_heightfield(8, 0.0);
        assert_eq!(chf.spans.len(), 64);
        for z in 0..8 {
            for x in 0..8 {
                assert_eq!(chf.cell_at(x, z).count(), 1);
            }
        }
    }

    #[test]
    fn connections_are_symmetric() {
        for step in [0.0, 0.25, 2.0] {
            let chf = stepped_compact_heightfield(8, step);
            for (x, z, i) in chf.iter_spans() {
                for dir in 0..4 {
                    let Some(neighbor) = chf.neighbor_index(x, z, i, dir) else {
                        continue;
                    };
                    let n_x = (x as i32 + dir_offset_x(dir) as i32) as u16;
                    let n_z = (z as i32 + dir_offset_z(dir) as i32) as u16;
                    assert_eq!(
                        chf.neighbor_index(n_x, n_z, neighbor, opposite_dir(dir)),
                        Some(i),
                        "step {step}: ({x}, {z}) dir {dir}"
                    );
                }
            }
        }
    }

    #[test]
    fn high_step_is_not_connected() {
        let chf = stepped_compact_heightfield(8, 2.0);
        // Column 3 is on the floor, column 4 holds both the floor and the step.
        let i = chf.cell_at(3, 4).index() as usize;
        assert_eq!(chf.spans[i].con(2), None);
        let i = chf.cell_at(2, 4).index() as usize;
        assert!(chf.spans[i].con(2).is_some());
    }

    #[test]
    fn deep_neighbor_layers_are_an_error() {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new([0.0, 0.0, 0.0], [2.0, 300.0, 1.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        let mut insert = |x: u16, min: u16, max: u16| {
            heightfield
                .add_span(SpanInsertion {
                    x,
                    z: 0,
                    flag_merge_threshold: 0,
                    span: SpanBuilder {
                        min,
                        max,
                        area: AreaType::DEFAULT_WALKABLE,
                        next: None,
                    }
                    .build(),
                })
                .unwrap();
        };
        // A stack of thin floors next to a single floor at the height of the 65th one.
        for k in 0..70 {
            insert(1, k * 4, k * 4 + 1);
        }
        insert(0, 250, 257);

        assert!(matches!(
            heightfield.into_compact(2, 1),
            Err(CompactHeightfieldError::TooManyLayers {
                max_layer_index: CompactHeightfield::MAX_LAYERS,
                layer_index: 64,
            })
        ));
    }
}
