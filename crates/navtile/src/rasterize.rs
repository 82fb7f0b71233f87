//! Rasterizes triangles of a [`TriMesh`](crate::TriMesh) into a [`Heightfield`](crate::Heightfield).

use glam::Vec3A;
use thiserror::Error;

use crate::{
    heightfield::{Heightfield, SpanInsertion, SpanInsertionError},
    math::TriangleVertices as _,
    polygon_clip::clip_polygon,
    span::{AreaType, SpanBuilder},
    trimesh::TriMesh,
};

impl Heightfield {
    /// Rasterizes all triangles of a [`TriMesh`] into the heightfield.
    ///
    /// `flag_merge_threshold` is the maximum ceiling difference at which the area ids of merged spans are combined.
    /// It is normally the walkable climb. [Units: vx]
    pub fn rasterize_triangles(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        for (i, triangle) in trimesh.indices.iter().enumerate() {
            let triangle = [
                trimesh.vertices[triangle[0] as usize],
                trimesh.vertices[triangle[1] as usize],
                trimesh.vertices[triangle[2] as usize],
            ];
            let area_type = trimesh.area_types[i];
            self.rasterize_triangle(triangle, area_type, flag_merge_threshold)?;
        }
        Ok(())
    }

    fn rasterize_triangle(
        &mut self,
        triangle: [Vec3A; 3],
        area_type: AreaType,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        let triangle_aabb = triangle.aabb();
        // If the triangle does not touch the bounding box of the heightfield, skip the triangle.
        if !self.aabb.intersects(&triangle_aabb) {
            return Ok(());
        }
        let inverse_cell_size = 1.0 / self.cell_size;
        let inverse_cell_height = 1.0 / self.cell_height;
        let by = self.aabb.max.y - self.aabb.min.y;

        // Calculate the footprint of the triangle on the grid's z-axis
        let z0 = ((triangle_aabb.min.z - self.aabb.min.z) * inverse_cell_size).floor() as i32;
        let z1 = ((triangle_aabb.max.z - self.aabb.min.z) * inverse_cell_size).floor() as i32;
        let z0 = z0.clamp(0, self.depth as i32 - 1);
        let z1 = z1.clamp(0, self.depth as i32 - 1);

        let mut row = Vec::with_capacity(7);
        let mut cell = Vec::with_capacity(7);
        let mut scratch = Vec::with_capacity(7);

        for z in z0..=z1 {
            // Clip the triangle into the row.
            let cell_z = self.aabb.min.z + z as f32 * self.cell_size;
            clip_polygon(&triangle, &mut scratch, 1.0, -cell_z as f64, 2);
            clip_polygon(
                &scratch,
                &mut row,
                -1.0,
                (cell_z + self.cell_size) as f64,
                2,
            );
            if row.len() < 3 {
                continue;
            }

            // Find the horizontal bounds in the row
            let (min_x, max_x) = row
                .iter()
                .fold((f32::MAX, f32::MIN), |(min, max), v| (min.min(v.x), max.max(v.x)));
            let x0 = ((min_x - self.aabb.min.x) * inverse_cell_size).floor() as i32;
            let x1 = ((max_x - self.aabb.min.x) * inverse_cell_size).floor() as i32;
            if x1 < 0 || x0 >= self.width as i32 {
                continue;
            }
            let x0 = x0.clamp(0, self.width as i32 - 1);
            let x1 = x1.clamp(0, self.width as i32 - 1);

            for x in x0..=x1 {
                // Clip the row into the cell.
                let cell_x = self.aabb.min.x + x as f32 * self.cell_size;
                clip_polygon(&row, &mut scratch, 1.0, -cell_x as f64, 0);
                clip_polygon(
                    &scratch,
                    &mut cell,
                    -1.0,
                    (cell_x + self.cell_size) as f64,
                    0,
                );
                if cell.len() < 3 {
                    continue;
                }

                // Calculate the min and max of the span.
                let (span_min, span_max) = cell
                    .iter()
                    .fold((f32::MAX, f32::MIN), |(min, max), v| (min.min(v.y), max.max(v.y)));
                let span_min = span_min - self.aabb.min.y;
                let span_max = span_max - self.aabb.min.y;

                // Skip the span if it's completely outside the heightfield bounding box
                if span_max < 0.0 || span_min > by {
                    continue;
                }
                // Clamp the span to the heightfield bounding box.
                let span_min = span_min.max(0.0);
                let span_max = span_max.min(by);

                // Snap the span to the heightfield height grid.
                let max_height = Heightfield::MAX_HEIGHT as i32;
                let span_min_cell = ((span_min * inverse_cell_height).floor() as i32)
                    .clamp(0, max_height - 1);
                let span_max_cell = ((span_max * inverse_cell_height).ceil() as i32)
                    .clamp(span_min_cell + 1, max_height);

                self.add_span(SpanInsertion {
                    x: x as u16,
                    z: z as u16,
                    flag_merge_threshold,
                    span: SpanBuilder {
                        min: span_min_cell as u16,
                        max: span_max_cell as u16,
                        area: area_type,
                        next: None,
                    }
                    .build(),
                })?;
            }
        }
        Ok(())
    }
}

/// Errors that can occur while rasterizing triangles.
#[derive(Error, Debug)]
pub enum RasterizationError {
    /// A span could not be inserted.
    #[error("Failed to insert span: {0}")]
    SpanInsertion(#[from] SpanInsertionError),
}
