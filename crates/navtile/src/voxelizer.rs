//! Runs the whole voxel pipeline for one tile.

use thiserror::Error;

use crate::{
    Aabb3d, CompactHeightfield, CompactHeightfieldError, ContourSet, HeightfieldBuilder,
    HeightfieldBuilderError, NavmeshConfig, PolyMeshError, RasterizationError, RegionError,
    TriMesh, VoxelMesh, trimesh::RasterizationMesh,
};

/// Turns [`RasterizationMesh`] batches into one [`VoxelMesh`] per tile.
///
/// Every tile voxelizes its own bounds plus [`NavmeshConfig::border_size`] cells on each side,
/// so that regions and contours at the edge of the tile match those of its neighbors.
#[derive(Debug, Clone, Copy)]
pub struct Voxelizer<'a> {
    config: &'a NavmeshConfig,
    meshes: &'a [RasterizationMesh],
}

impl<'a> Voxelizer<'a> {
    /// Creates a voxelizer over `meshes`.
    pub fn new(config: &'a NavmeshConfig, meshes: &'a [RasterizationMesh]) -> Self {
        Self { config, meshes }
    }

    /// The config the voxelizer builds with.
    pub fn config(&self) -> &NavmeshConfig {
        self.config
    }

    /// Collects all batches that touch `bounds` into a single world-space [`TriMesh`].
    ///
    /// Steep triangles are already marked as [`AreaType::NOT_WALKABLE`](crate::AreaType::NOT_WALKABLE).
    pub fn collect_geometry(&self, bounds: &Aabb3d) -> TriMesh {
        let mut trimesh = TriMesh::default();
        for batch in self.meshes {
            if !batch.bounds.intersects(bounds) {
                continue;
            }
            trimesh.push_batch(batch);
        }
        trimesh.clear_unwalkable_triangles(self.config.walkable_slope_angle);
        trimesh
    }

    /// Rasterizes, filters and compacts the geometry of the tile at `(x, z)`.
    ///
    /// The returned field is already eroded and has the [`NavmeshConfig::area_volumes`] applied.
    pub fn build_compact_heightfield(
        &self,
        x: u32,
        z: u32,
    ) -> Result<CompactHeightfield, VoxelizerError> {
        let config = self.config;
        let bounds = config.tile_field_bounds(x, z);
        let trimesh = self.collect_geometry(&bounds);

        let mut heightfield = HeightfieldBuilder {
            aabb: bounds,
            cell_size: config.cell_size,
            cell_height: config.cell_height,
        }
        .build()?;
        heightfield.rasterize_triangles(&trimesh, config.walkable_climb)?;

        // Once all geometry is rasterized, we do initial pass of filtering to
        // remove unwanted overhangs caused by the conservative rasterization
        // as well as filter spans where the character cannot possibly stand.
        heightfield.filter_low_hanging_walkable_obstacles(config.walkable_climb);
        heightfield.filter_ledge_spans(config.walkable_height, config.walkable_climb);
        heightfield.filter_walkable_low_height_spans(config.walkable_height);

        let mut compact =
            heightfield.into_compact(config.walkable_height, config.walkable_climb)?;
        compact.erode_walkable_area(config.walkable_radius);
        for volume in &config.area_volumes {
            compact.mark_convex_poly_area(volume);
        }
        Ok(compact)
    }

    /// Builds the regions and contours of the tile at `(x, z)`.
    pub fn build_contours(&self, x: u32, z: u32) -> Result<ContourSet, VoxelizerError> {
        let config = self.config;
        let mut compact = self.build_compact_heightfield(x, z)?;
        compact.build_distance_field();
        compact.build_regions_with_relevant_surfaces(
            config.border_size,
            config.min_region_area,
            config.merge_region_area,
            config.relevant_surface_mode,
            &config.relevant_surfaces,
        )?;
        Ok(compact.build_contours(
            config.max_simplification_error,
            config.max_edge_len,
            config.contour_flags,
        ))
    }

    /// Runs the full pipeline for the tile at `(x, z)`.
    ///
    /// # Errors
    ///
    /// Returns an error if any stage of the pipeline hits a structural limit,
    /// or if a contour could not be triangulated.
    pub fn build_tile(&self, x: u32, z: u32) -> Result<VoxelMesh, VoxelizerError> {
        let contours = self.build_contours(x, z)?;
        let contour_count = contours.contours.len();
        let mesh = contours.into_polygon_mesh()?.to_voxel_mesh();
        tracing::debug!(
            x,
            z,
            contours = contour_count,
            vertices = mesh.vertices.len(),
            triangles = mesh.triangles.len(),
            "Voxelized tile"
        );
        Ok(mesh)
    }
}

/// Errors that can occur while voxelizing a tile.
#[derive(Error, Debug)]
pub enum VoxelizerError {
    /// The voxel field of the tile could not be allocated.
    #[error(transparent)]
    Heightfield(#[from] HeightfieldBuilderError),
    /// A triangle could not be rasterized.
    #[error(transparent)]
    Rasterization(#[from] RasterizationError),
    /// The heightfield could not be compacted.
    #[error(transparent)]
    Compact(#[from] CompactHeightfieldError),
    /// Region growing ran out of ids.
    #[error(transparent)]
    Region(#[from] RegionError),
    /// The contours could not be turned into a mesh.
    #[error(transparent)]
    PolyMesh(#[from] PolyMeshError),
}

#[cfg(test)]
mod tests {
    use glam::{Affine3A, UVec3, Vec3A};

    use crate::{AreaType, NavmeshConfigBuilder};

    use super::*;

    fn plane(size: f32) -> RasterizationMesh {
        RasterizationMesh::new(
            vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, size),
                Vec3A::new(size, 0.0, size),
                Vec3A::new(size, 0.0, 0.0),
            ],
            vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
            AreaType::DEFAULT_WALKABLE,
            Affine3A::IDENTITY,
        )
    }

    fn config() -> NavmeshConfig {
        NavmeshConfigBuilder {
            aabb: Aabb3d::new([0.0, -1.0, 0.0], [16.0, 4.0, 16.0]),
            cell_size: 0.5,
            cell_height: 0.25,
            agent_radius: 0.5,
            tile_size: 16,
            region_min_size: 2.0,
            ..Default::default()
        }
        .build()
    }

    #[test]
    fn can_voxelize_a_flat_tile() {
        let config = config();
        let meshes = [plane(16.0)];
        let voxelizer = Voxelizer::new(&config, &meshes);
        let mesh = voxelizer.build_tile(0, 0).unwrap();
        assert!(!mesh.triangles.is_empty());
        assert_eq!(mesh.triangles.len(), mesh.areas.len());
        // The mesh stays within the tile bounds.
        let bounds = config.tile_bounds(0, 0);
        for v in &mesh.vertices {
            assert!(v.x >= crate::fixed::to_fixed_scalar(bounds.min.x) - 1);
            assert!(v.x <= crate::fixed::to_fixed_scalar(bounds.max.x) + 1);
        }
    }

    #[test]
    fn empty_tile_has_no_triangles() {
        let config = config();
        let meshes = [plane(4.0)];
        let voxelizer = Voxelizer::new(&config, &meshes);
        let mesh = voxelizer.build_tile(3, 3).unwrap();
        assert!(mesh.triangles.is_empty());
    }

    #[test]
    fn geometry_outside_of_the_tile_is_skipped() {
        let config = config();
        let meshes = [plane(4.0)];
        let voxelizer = Voxelizer::new(&config, &meshes);
        let bounds = config.tile_field_bounds(3, 3);
        assert!(voxelizer.collect_geometry(&bounds).indices.is_empty());
        let bounds = config.tile_field_bounds(0, 0);
        assert_eq!(voxelizer.collect_geometry(&bounds).indices.len(), 2);
    }
}
