//! Build settings for the voxel pipeline and the tile grid they describe.

use glam::Vec3A;

use crate::{Aabb3d, BuildContoursFlags, ConvexVolume, RelevantSurfaceMode};

/// The parameters of a tiled navmesh build, in voxel units. Usually built using [`NavmeshConfigBuilder`].
///
/// Units are either voxels (vx) or world units (wu). The voxel units are derived from
/// [`NavmeshConfig::cell_size`] and [`NavmeshConfig::cell_height`].
///
/// > Note:
/// >
/// > First decide the size of your agent's logical cylinder.
/// > If your world uses meters as units, a human-sized agent
/// > is well described by a radius of 0.4 and a height of 2.0.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfig {
    /// The width and depth of a single tile on the xz-plane, without its border. `[Limit: > 0] [Units: vx]`
    pub tile_size: u16,

    /// The size of the non-navigable border voxelized around every tile. `[Limit: >=0] [Units: vx]`
    ///
    /// Geometry in the border is rasterized so that regions near the edge of a tile see their surroundings,
    /// but the border itself never ends up in the mesh.
    pub border_size: u16,

    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// This value is usually derived from the agent radius r. A good starting value is r/2 or r/3.
    /// Smaller values increase rasterization resolution and navmesh detail at a steep cost in generation time.
    pub cell_size: f32,

    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// A good starting point is half of [`NavmeshConfig::cell_size`].
    /// Smaller values let the navmesh connect areas that are only separated by a small curb or ditch.
    pub cell_height: f32,

    /// The bounds of the whole navmesh. Tiles are laid out starting at its minimum corner. [Units: wu]
    pub aabb: Aabb3d,

    /// The maximum slope that is considered walkable. `[Limits: 0 <= value < 0.5*π] [Units: Radians]`
    pub walkable_slope_angle: f32,

    /// Minimum floor to 'ceiling' height that still allows the floor area to be considered walkable. `[Limit: >= 3] [Units: vx]`
    pub walkable_height: u16,

    /// Maximum ledge height that is considered to still be traversable. `[Limit: >=0] [Units: vx]`
    ///
    /// This is also the tolerance used when stitching the edges of neighboring tiles.
    pub walkable_climb: u16,

    /// The distance to erode the walkable area away from obstructions. `[Limit: >=0] [Units: vx]`
    pub walkable_radius: u16,

    /// The maximum allowed length for contour edges along the border of the mesh. `[Limit: >=0] [Units: vx]`
    ///
    /// A value of zero disables edge tessellation.
    pub max_edge_len: u16,

    /// The maximum distance a simplified contour's border edges may deviate from the raw contour. `[Limit: >=0] [Units: vx]`
    ///
    /// Good values are in the range `[1.1, 1.5]`.
    pub max_simplification_error: f32,

    /// The minimum number of spans a group of connected regions needs to be kept. `[Limit: >=0] [Units: vx]`
    ///
    /// Groups touching the tile border are always kept since a neighboring tile may continue them.
    pub min_region_area: u16,

    /// Regions with a span count smaller than this value will, if possible,
    /// be merged with a neighboring region. `[Limit: >=0] [Units: vx]`
    pub merge_region_area: u16,

    /// Flags controlling the [`ContourSet`](crate::ContourSet) generation process.
    pub contour_flags: BuildContoursFlags,

    /// Volumes that override the area type of the spans they contain.
    pub area_volumes: Vec<ConvexVolume>,

    /// Which regions must contain one of [`NavmeshConfig::relevant_surfaces`].
    pub relevant_surface_mode: RelevantSurfaceMode,

    /// World-space points marking surfaces that agents can actually reach. [Units: wu]
    pub relevant_surfaces: Vec<Vec3A>,
}

impl NavmeshConfig {
    /// The width and depth of a tile's voxel field including its border. [Units: vx]
    #[inline]
    pub fn field_size(&self) -> u16 {
        self.tile_size + self.border_size * 2
    }

    /// The width and depth of a tile in world units. [Units: wu]
    #[inline]
    pub fn tile_world_size(&self) -> f32 {
        self.tile_size as f32 * self.cell_size
    }

    /// The number of tiles along the x- and z-axis needed to cover [`NavmeshConfig::aabb`].
    pub fn tile_count(&self) -> (u32, u32) {
        let size = self.aabb.size();
        let tile = self.tile_world_size();
        let count = |extent: f32| ((extent / tile).ceil() as u32).max(1);
        (count(size.x), count(size.z))
    }

    /// The world-space bounds of the tile at `(x, z)` without its border.
    pub fn tile_bounds(&self, x: u32, z: u32) -> Aabb3d {
        let tile = self.tile_world_size();
        let min = self.aabb.min + Vec3A::new(x as f32 * tile, 0.0, z as f32 * tile);
        Aabb3d::new(
            min,
            Vec3A::new(min.x + tile, self.aabb.max.y, min.z + tile),
        )
    }

    /// The world-space bounds of the voxel field of the tile at `(x, z)`, including its border.
    pub fn tile_field_bounds(&self, x: u32, z: u32) -> Aabb3d {
        let pad = self.border_size as f32 * self.cell_size;
        self.tile_bounds(x, z).expanded(Vec3A::new(pad, 0.0, pad))
    }
}

/// A builder for [`NavmeshConfig`]. The config has lots of interdependent settings,
/// so this builder derives them from a description of the agent in world units.
/// The default values are chosen to be reasonable for an agent resembling an adult human.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfigBuilder {
    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`
    pub cell_size: f32,
    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    pub cell_height: f32,
    /// The height of the agent. `[Limit: > 0] [Units: wu]`
    ///
    /// It's often a good idea to add a little bit of padding to the height. For example,
    /// an agent that is 1.8 world units tall might want to set this value to 2.0 units.
    pub agent_height: f32,
    /// The radius of the agent. `[Limit: > 0] [Units: wu]`
    pub agent_radius: f32,
    /// The highest step the agent can climb. `[Limit: >= 0] [Units: wu]`
    pub agent_max_climb: f32,
    /// The steepest slope the agent can walk on. `[Units: Radians]`
    pub agent_max_slope: f32,
    /// The minimum side length of an isolated region. `[Units: vx]`
    pub region_min_size: f32,
    /// The side length below which regions get merged. `[Units: vx]`
    pub region_merge_size: f32,
    /// The maximum length of a contour edge. `[Units: wu]`
    pub edge_max_len: f32,
    /// The maximum deviation of a simplified contour. `[Units: vx]`
    pub edge_max_error: f32,
    /// The width and depth of a tile. `[Units: vx]`
    pub tile_size: u16,
    /// The bounds of the whole navmesh. `[Units: wu]`
    pub aabb: Aabb3d,
    /// See [`NavmeshConfig::contour_flags`].
    pub contour_flags: BuildContoursFlags,
    /// See [`NavmeshConfig::area_volumes`].
    pub area_volumes: Vec<ConvexVolume>,
    /// See [`NavmeshConfig::relevant_surface_mode`].
    pub relevant_surface_mode: RelevantSurfaceMode,
    /// See [`NavmeshConfig::relevant_surfaces`].
    pub relevant_surfaces: Vec<Vec3A>,
}

impl Default for NavmeshConfigBuilder {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0_f32.to_radians(),
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            tile_size: 32,
            aabb: Aabb3d::default(),
            contour_flags: BuildContoursFlags::default(),
            area_volumes: Vec::new(),
            relevant_surface_mode: RelevantSurfaceMode::default(),
            relevant_surfaces: Vec::new(),
        }
    }
}

impl NavmeshConfigBuilder {
    /// Builds a [`NavmeshConfig`] from the current configuration.
    pub fn build(self) -> NavmeshConfig {
        let walkable_radius = (self.agent_radius / self.cell_size).ceil() as u16;
        // Reserve enough padding.
        let border_size = walkable_radius + 3;
        NavmeshConfig {
            tile_size: self.tile_size,
            border_size,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            aabb: self.aabb,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: (self.agent_height / self.cell_height).ceil() as u16,
            walkable_climb: (self.agent_max_climb / self.cell_height).floor() as u16,
            walkable_radius,
            max_edge_len: (self.edge_max_len / self.cell_size) as u16,
            max_simplification_error: self.edge_max_error,
            min_region_area: (self.region_min_size * self.region_min_size) as u16,
            merge_region_area: (self.region_merge_size * self.region_merge_size) as u16,
            contour_flags: self.contour_flags,
            area_volumes: self.area_volumes,
            relevant_surface_mode: self.relevant_surface_mode,
            relevant_surfaces: self.relevant_surfaces,
        }
    }
}
