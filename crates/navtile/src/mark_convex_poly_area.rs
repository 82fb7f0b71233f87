//! Applies [`ConvexVolume`](crate::ConvexVolume) area overrides to a compact heightfield.

use glam::Vec2;

use crate::{CompactHeightfield, math::ConvexVolume};

impl CompactHeightfield {
    /// Sets the [`AreaType`](crate::AreaType) of the walkable spans within the given convex volume.
    pub fn mark_convex_poly_area(&mut self, volume: &ConvexVolume) {
        let Some((min, max)) = volume
            .vertices
            .iter()
            .fold(None, |acc: Option<(Vec2, Vec2)>, v| {
                Some(acc.map_or((*v, *v), |(min, max)| (min.min(*v), max.max(*v))))
            })
        else {
            // The volume is empty
            return;
        };

        // Compute the grid footprint of the polygon.
        let min_x = ((min.x - self.aabb.min.x) / self.cell_size) as i32;
        let max_x = ((max.x - self.aabb.min.x) / self.cell_size) as i32;
        let min_z = ((min.y - self.aabb.min.z) / self.cell_size) as i32;
        let max_z = ((max.y - self.aabb.min.z) / self.cell_size) as i32;
        let min_y = ((volume.min_y - self.aabb.min.y) / self.cell_height) as i32;
        let max_y = ((volume.max_y - self.aabb.min.y) / self.cell_height) as i32;

        // Early-out if the polygon lies entirely outside the grid.
        if max_x < 0 || min_x >= self.width as i32 || max_z < 0 || min_z >= self.depth as i32 {
            return;
        }
        let min_x = min_x.max(0) as u16;
        let max_x = max_x.min(self.width as i32 - 1) as u16;
        let min_z = min_z.max(0) as u16;
        let max_z = max_z.min(self.depth as i32 - 1) as u16;

        for z in min_z..=max_z {
            for x in min_x..=max_x {
                let point = Vec2::new(
                    self.aabb.min.x + (x as f32 + 0.5) * self.cell_size,
                    self.aabb.min.z + (z as f32 + 0.5) * self.cell_size,
                );
                if !point_in_poly(point, &volume.vertices) {
                    continue;
                }
                for i in self.cell_at(x, z).index_range() {
                    if !self.areas[i].is_walkable() {
                        continue;
                    }
                    let y = self.spans[i].y as i32;
                    if (min_y..=max_y).contains(&y) {
                        self.areas[i] = volume.area;
                    }
                }
            }
        }
    }
}

/// Even-odd point in polygon test on the xz-plane.
fn point_in_poly(point: Vec2, vertices: &[Vec2]) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for (i, vi) in vertices.iter().enumerate() {
        let vj = vertices[j];
        if (vi.y > point.y) != (vj.y > point.y)
            && point.x < (vj.x - vi.x) * (point.y - vi.y) / (vj.y - vi.y) + vi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}
