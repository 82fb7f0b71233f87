//! Shrinks the walkable area away from obstacles by the agent radius.

use crate::{CompactHeightfield, span::AreaType};

impl CompactHeightfield {
    /// Erodes the walkable area by the agent radius.
    ///
    /// Every walkable span closer than `walkable_radius` cells to an unwalkable or disconnected span
    /// is marked as [`AreaType::NOT_WALKABLE`].
    pub fn erode_walkable_area(&mut self, walkable_radius: u16) {
        let mut distance_to_boundary = vec![u16::MAX; self.spans.len()];

        // Mark boundary cells.
        for (x, z, i) in self.iter_spans() {
            if !self.areas[i].is_walkable() {
                distance_to_boundary[i] = 0;
                continue;
            }
            // Check that there is a walkable adjacent span in each of the 4 cardinal directions.
            let neighbor_count = (0..4)
                .filter_map(|dir| self.neighbor_index(x, z, i, dir))
                .filter(|&a_i| self.areas[a_i].is_walkable())
                .count();
            // At least one missing neighbour, so this is a boundary cell.
            if neighbor_count != 4 {
                distance_to_boundary[i] = 0;
            }
        }

        self.chamfer(&mut distance_to_boundary);

        let threshold = walkable_radius.saturating_mul(2);
        for (area, distance) in self.areas.iter_mut().zip(&distance_to_boundary) {
            if *distance < threshold {
                *area = AreaType::NOT_WALKABLE;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::compact_heightfield::tests::stepped_compact_heightfield;

    #[test]
    fn can_erode_edges() {
        let mut chf = stepped_compact_heightfield(8, 0.0);
        chf.erode_walkable_area(2);
        let walkable = |x: u16, z: u16| chf.areas[chf.cell_at(x, z).index() as usize].is_walkable();
        assert!(!walkable(0, 4));
        assert!(!walkable(1, 4));
        assert!(walkable(2, 4));
        assert!(walkable(4, 4));
        assert!(!walkable(6, 6));
    }

    #[test]
    fn zero_radius_keeps_everything() {
        let mut chf = stepped_compact_heightfield(8, 0.0);
        chf.erode_walkable_area(0);
        assert!(chf.areas.iter().all(|area| area.is_walkable()));
    }
}
