//! Watershed partitioning of a [`CompactHeightfield`](crate::CompactHeightfield) into regions.

use glam::Vec3A;
use thiserror::Error;

use crate::{
    CompactHeightfield,
    math::{dir_offset_x, dir_offset_z},
    merge_regions::RelevantSurfaceMode,
    region::RegionId,
};

impl CompactHeightfield {
    /// Partitions the walkable spans into regions using watershed partitioning.
    ///
    /// Non-null regions consist of connected, non-overlapping walkable spans that form a single contour.
    /// Connected groups of regions smaller than `min_region_area` spans are removed unless they touch the border,
    /// and regions smaller than `merge_region_area` are merged into a neighbor.
    /// A strip of `border_size` cells along each side of the field is painted with border regions.
    ///
    /// Requires [`CompactHeightfield::build_distance_field`] to have been called.
    /// The result is written to [`CompactSpan::region`](crate::CompactSpan::region) and [`CompactHeightfield::max_region`].
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::TooManyRegions`] if the region ids no longer fit next to the border flag.
    pub fn build_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        self.build_regions_with_relevant_surfaces(
            border_size,
            min_region_area,
            merge_region_area,
            RelevantSurfaceMode::DoNotRequire,
            &[],
        )
    }

    /// Like [`CompactHeightfield::build_regions`], but additionally drops groups of regions that do not
    /// contain one of the `relevant_surfaces` points, as configured by `mode`.
    pub fn build_regions_with_relevant_surfaces(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
        mode: RelevantSurfaceMode,
        relevant_surfaces: &[Vec3A],
    ) -> Result<(), RegionError> {
        const LOG_NB_STACKS: usize = 3;
        const NB_STACKS: usize = 1 << LOG_NB_STACKS;
        const EXPAND_ITERS: u16 = 8;

        let mut level_stacks: [Vec<LevelStackEntry>; NB_STACKS] = Default::default();
        let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut src_dist = vec![0_u16; self.spans.len()];

        let mut region_id: u16 = 1;
        let mut level = (self.max_distance + 1) & !1;

        if border_size > 0 {
            // Make sure border will not overflow.
            let border_width = border_size.min(self.width);
            let border_depth = border_size.min(self.depth);
            let strips = [
                (0, border_width, 0, self.depth),
                (self.width - border_width, self.width, 0, self.depth),
                (0, self.width, 0, border_depth),
                (0, self.width, self.depth - border_depth, self.depth),
            ];
            for (min_x, max_x, min_z, max_z) in strips {
                self.paint_rect_region(
                    min_x,
                    max_x,
                    min_z,
                    max_z,
                    RegionId::from(region_id) | RegionId::BORDER_REGION,
                    &mut src_reg,
                );
                region_id += 1;
            }
        }
        self.border_size = border_size;

        let mut s_id = usize::MAX;
        while level > 0 {
            level = level.saturating_sub(2);
            s_id = s_id.wrapping_add(1) & (NB_STACKS - 1);

            if s_id == 0 {
                self.sort_cells_by_level(level, &src_reg, &mut level_stacks, 1);
            } else {
                // Copy left overs from last level.
                let (src, dst) = level_stacks.split_at_mut(s_id);
                append_stacks(&src[s_id - 1], &mut dst[0], &src_reg);
            }

            self.expand_regions(
                EXPAND_ITERS,
                level,
                &mut src_reg,
                &mut src_dist,
                &mut level_stacks[s_id],
                false,
            );

            // Mark new regions with ids.
            for j in 0..level_stacks[s_id].len() {
                let entry = level_stacks[s_id][j];
                let Some(i) = entry.index else {
                    continue;
                };
                if src_reg[i] != RegionId::NONE {
                    continue;
                }
                if self.flood_region(
                    entry,
                    level,
                    RegionId::from(region_id),
                    &mut src_reg,
                    &mut src_dist,
                    &mut stack,
                ) {
                    if region_id >= RegionId::BORDER_REGION.bits() - 1 {
                        return Err(RegionError::TooManyRegions {
                            max: RegionId::BORDER_REGION.bits() - 1,
                        });
                    }
                    region_id += 1;
                }
            }
        }

        // Expand current regions until no empty connected cells are found.
        self.expand_regions(
            EXPAND_ITERS * 8,
            0,
            &mut src_reg,
            &mut src_dist,
            &mut stack,
            true,
        );

        let relevant = self.relevant_spans(relevant_surfaces);
        let max_region = self.merge_and_filter_regions(
            min_region_area,
            merge_region_area,
            region_id,
            mode,
            &relevant,
            &mut src_reg,
        );
        self.max_region = RegionId::from(max_region);

        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        tracing::trace!(regions = max_region, "Built regions");
        Ok(())
    }

    fn paint_rect_region(
        &self,
        min_x: u16,
        max_x: u16,
        min_z: u16,
        max_z: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                for i in self.cell_at(x, z).index_range() {
                    if self.areas[i].is_walkable() {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    fn sort_cells_by_level(
        &self,
        start_level: u16,
        src_reg: &[RegionId],
        stacks: &mut [Vec<LevelStackEntry>],
        log_levels_per_stack: u16,
    ) {
        let start_level = start_level >> log_levels_per_stack;
        for stack in stacks.iter_mut() {
            stack.clear();
        }

        // Put all cells in the level range into the appropriate stacks.
        for (x, z, i) in self.iter_spans() {
            if !self.areas[i].is_walkable() || src_reg[i] != RegionId::NONE {
                continue;
            }
            let level = self.dist[i] >> log_levels_per_stack;
            let Some(s_id) = start_level.checked_sub(level) else {
                // Higher than the current level, will be reached by expansion.
                continue;
            };
            if let Some(stack) = stacks.get_mut(s_id as usize) {
                stack.push(LevelStackEntry { x, z, index: Some(i) });
            }
        }
    }

    fn flood_region(
        &self,
        seed: LevelStackEntry,
        level: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
    ) -> bool {
        let Some(seed_index) = seed.index else {
            return false;
        };
        let area = self.areas[seed_index];

        stack.clear();
        stack.push(seed);
        src_reg[seed_index] = region;
        src_dist[seed_index] = 0;

        let lev = level.saturating_sub(2);
        let mut count = 0;

        while let Some(entry) = stack.pop() {
            let Some(i) = entry.index else {
                continue;
            };
            let (x, z) = (entry.x, entry.z);

            // Check if any of the neighbours already have a valid region set.
            let mut adjacent_region = RegionId::NONE;
            'dirs: for dir in 0..4 {
                let Some(a_i) = self.neighbor_index(x, z, i, dir) else {
                    continue;
                };
                if self.areas[a_i] != area {
                    continue;
                }
                let neighbor_region = src_reg[a_i];
                if neighbor_region.is_border() {
                    continue;
                }
                if neighbor_region != RegionId::NONE && neighbor_region != region {
                    adjacent_region = neighbor_region;
                    break 'dirs;
                }

                let a_x = (x as i32 + dir_offset_x(dir) as i32) as u16;
                let a_z = (z as i32 + dir_offset_z(dir) as i32) as u16;
                let dir2 = (dir + 1) & 0x3;
                let Some(b_i) = self.neighbor_index(a_x, a_z, a_i, dir2) else {
                    continue;
                };
                if self.areas[b_i] != area {
                    continue;
                }
                let diagonal_region = src_reg[b_i];
                if diagonal_region != RegionId::NONE
                    && !diagonal_region.is_border()
                    && diagonal_region != region
                {
                    adjacent_region = diagonal_region;
                    break 'dirs;
                }
            }
            if adjacent_region != RegionId::NONE {
                src_reg[i] = RegionId::NONE;
                continue;
            }

            count += 1;

            // Expand neighbours.
            for dir in 0..4 {
                let Some(a_i) = self.neighbor_index(x, z, i, dir) else {
                    continue;
                };
                if self.areas[a_i] != area {
                    continue;
                }
                if self.dist[a_i] >= lev && src_reg[a_i] == RegionId::NONE {
                    src_reg[a_i] = region;
                    src_dist[a_i] = 0;
                    stack.push(LevelStackEntry {
                        x: (x as i32 + dir_offset_x(dir) as i32) as u16,
                        z: (z as i32 + dir_offset_z(dir) as i32) as u16,
                        index: Some(a_i),
                    });
                }
            }
        }
        count > 0
    }

    fn expand_regions(
        &self,
        max_iter: u16,
        level: u16,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
        fill_stack: bool,
    ) {
        if fill_stack {
            // Find cells revealed by the raised level.
            stack.clear();
            for (x, z, i) in self.iter_spans() {
                if self.dist[i] >= level
                    && src_reg[i] == RegionId::NONE
                    && self.areas[i].is_walkable()
                {
                    stack.push(LevelStackEntry { x, z, index: Some(i) });
                }
            }
        } else {
            // Mark all cells which already have a region.
            for entry in stack.iter_mut() {
                if entry.index.is_some_and(|i| src_reg[i] != RegionId::NONE) {
                    entry.index = None;
                }
            }
        }

        let mut dirty_entries = Vec::new();
        let mut iter = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            dirty_entries.clear();

            for entry in stack.iter_mut() {
                let Some(i) = entry.index else {
                    failed += 1;
                    continue;
                };

                let mut region = src_reg[i];
                let mut distance = u16::MAX;
                let area = self.areas[i];
                for dir in 0..4 {
                    let Some(a_i) = self.neighbor_index(entry.x, entry.z, i, dir) else {
                        continue;
                    };
                    if self.areas[a_i] != area {
                        continue;
                    }
                    let a_region = src_reg[a_i];
                    let a_distance = src_dist[a_i].saturating_add(2);
                    if a_region != RegionId::NONE && !a_region.is_border() && a_distance < distance
                    {
                        region = a_region;
                        distance = a_distance;
                    }
                }
                if region != RegionId::NONE {
                    // Mark as used.
                    entry.index = None;
                    dirty_entries.push(DirtyEntry {
                        index: i,
                        region,
                        distance,
                    });
                } else {
                    failed += 1;
                }
            }

            // Copy entries that differ to keep them in sync.
            for dirty in &dirty_entries {
                src_reg[dirty.index] = dirty.region;
                src_dist[dirty.index] = dirty.distance;
            }

            if failed == stack.len() {
                break;
            }

            if level > 0 {
                iter += 1;
                if iter >= max_iter {
                    break;
                }
            }
        }
    }

    /// Finds the spans that the relevant surface points stand on.
    fn relevant_spans(&self, points: &[Vec3A]) -> Vec<usize> {
        let mut spans = Vec::new();
        for point in points {
            let local = (*point - self.aabb.min) / Vec3A::new(self.cell_size, self.cell_height, self.cell_size);
            if local.x < 0.0 || local.z < 0.0 {
                continue;
            }
            let (x, z) = (local.x as u16, local.z as u16);
            let Some(cell) = self.get_cell_at(x, z) else {
                continue;
            };
            let y = local.y.round() as i32;
            // The highest floor that is not above the point, within one walkable climb.
            let best = cell
                .index_range()
                .filter(|&i| self.areas[i].is_walkable())
                .filter(|&i| (self.spans[i].y as i32) <= y + self.walkable_climb as i32)
                .max_by_key(|&i| self.spans[i].y);
            spans.extend(best);
        }
        spans
    }
}

fn append_stacks(src: &[LevelStackEntry], dst: &mut Vec<LevelStackEntry>, src_reg: &[RegionId]) {
    dst.extend(
        src.iter()
            .filter(|entry| entry.index.is_some_and(|i| src_reg[i] == RegionId::NONE)),
    );
}

#[derive(Clone, Copy, Debug)]
struct LevelStackEntry {
    x: u16,
    z: u16,
    index: Option<usize>,
}

#[derive(Clone, Debug)]
struct DirtyEntry {
    index: usize,
    region: RegionId,
    distance: u16,
}

/// Errors that can occur while building regions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    /// The field produced more regions than a [`RegionId`] can hold next to the border flag.
    #[error("Too many regions, the maximum is {max}")]
    TooManyRegions {
        /// The highest representable region id.
        max: u16,
    },
}

#[cfg(test)]
mod tests {
    use crate::{
        Aabb3d, AreaType, HeightfieldBuilder, compact_heightfield::tests::stepped_compact_heightfield,
        heightfield::SpanInsertion, span::SpanBuilder,
    };

    use super::*;

    fn regions(step: f32, border_size: u16) -> CompactHeightfield {
        let mut chf = stepped_compact_heightfield(8, step);
        chf.build_distance_field();
        chf.build_regions(border_size, 0, 1000).unwrap();
        chf
    }

    #[test]
    fn can_build_single_region_on_flat_floor() {
        let chf = regions(0.0, 0);
        let first = chf.spans[0].region;
        assert!(first.is_interior());
        assert!(chf.spans.iter().all(|span| span.region == first));
        assert_eq!(chf.max_region, RegionId::from(1));
    }

    #[test]
    fn disconnected_floors_get_distinct_regions() {
        let chf = regions(3.0, 0);
        let floor = chf.spans[chf.cell_at(0, 0).index() as usize].region;
        let step = chf.spans[chf.cell_at(7, 7).index() as usize].region;
        assert!(floor.is_interior());
        assert!(step.is_interior());
        assert_ne!(floor, step);
    }

    #[test]
    fn border_is_painted() {
        let chf = regions(0.0, 2);
        assert!(chf.spans[chf.cell_at(0, 3).index() as usize].region.is_border());
        assert!(chf.spans[chf.cell_at(7, 7).index() as usize].region.is_border());
        assert!(chf.spans[chf.cell_at(3, 3).index() as usize].region.is_interior());
        assert_eq!(chf.border_size, 2);
    }

    #[test]
    fn building_twice_is_idempotent() {
        let mut chf = stepped_compact_heightfield(8, 3.0);
        chf.build_distance_field();
        chf.build_regions(1, 0, 0).unwrap();
        let first: Vec<_> = chf.spans.iter().map(|span| span.region).collect();
        chf.build_regions(1, 0, 0).unwrap();
        let second: Vec<_> = chf.spans.iter().map(|span| span.region).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn too_many_regions_is_an_error() {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new([0.0, 0.0, 0.0], [260.0, 4.0, 256.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        // A checkerboard of isolated spans, each its own region, plus one block so the flood runs at all.
        let checkerboard = (0..256_u16)
            .flat_map(|z| (0..256_u16).map(move |x| (x, z)))
            .filter(|(x, z)| (x + z) % 2 == 0);
        let block = (257..260_u16).flat_map(|x| (0..3_u16).map(move |z| (x, z)));
        for (x, z) in checkerboard.chain(block) {
            heightfield
                .add_span(SpanInsertion {
                    x,
                    z,
                    flag_merge_threshold: 0,
                    span: SpanBuilder {
                        min: 0,
                        max: 1,
                        area: AreaType::DEFAULT_WALKABLE,
                        next: None,
                    }
                    .build(),
                })
                .unwrap();
        }
        let mut chf = heightfield.into_compact(2, 0).unwrap();
        chf.build_distance_field();
        assert_eq!(
            chf.build_regions(0, 0, 0),
            Err(RegionError::TooManyRegions { max: 0x7fff })
        );
    }
}
