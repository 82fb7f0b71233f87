//! Reusable tile templates that can be stamped into the grid.

use glam::IVec3;

use crate::{AreaType, TileMesh};

/// A quarter turn around the y-axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Rotation {
    /// No rotation.
    #[default]
    Deg0,
    /// 90 degrees.
    Deg90,
    /// 180 degrees.
    Deg180,
    /// 270 degrees.
    Deg270,
}

impl Rotation {
    /// Rotation matrices `[xx, xz, zx, zz]`, applied as `x' = xx * x + xz * z` and `z' = zx * x + zz * z`.
    const MATRICES: [[i32; 4]; 4] = [[1, 0, 0, 1], [0, 1, -1, 0], [-1, 0, 0, -1], [0, -1, 1, 0]];

    /// The rotation for a number of quarter turns. Wraps around.
    pub fn from_quarter_turns(turns: u32) -> Self {
        match turns % 4 {
            0 => Self::Deg0,
            1 => Self::Deg90,
            2 => Self::Deg180,
            _ => Self::Deg270,
        }
    }

    /// The number of quarter turns.
    #[inline]
    pub fn quarter_turns(self) -> usize {
        self as usize
    }

    /// Returns `true` if the rotation swaps the x and z extents.
    #[inline]
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }

    #[inline]
    fn apply(self, x: i32, z: i32) -> (i32, i32) {
        let [xx, xz, zx, zz] = Self::MATRICES[self.quarter_turns()];
        (xx * x + xz * z, zx * x + zz * z)
    }
}

/// An immutable tile template in tile-local fixed-point coordinates.
///
/// Vertices are relative to the minimum corner of the footprint, which covers
/// `width * depth` grid cells of `tile_size` fixed-point units each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileType {
    mesh: TileMesh,
    width: u32,
    depth: u32,
    tile_size: i32,
}

impl TileType {
    /// Creates a template. `mesh` must be in tile-local coordinates.
    pub fn new(mesh: TileMesh, width: u32, depth: u32, tile_size: i32) -> Self {
        let mut mesh = mesh;
        mesh.areas
            .resize(mesh.triangles.len(), AreaType::DEFAULT_WALKABLE);
        mesh.tags.resize(mesh.triangles.len(), 0);
        Self {
            mesh,
            width,
            depth,
            tile_size,
        }
    }

    /// Creates a template from a mesh in world coordinates whose footprint starts at `origin`.
    pub fn from_world(
        mesh: &TileMesh,
        origin: IVec3,
        width: u32,
        depth: u32,
        tile_size: i32,
    ) -> Self {
        let mut local = mesh.clone();
        for v in &mut local.vertices {
            *v -= origin;
        }
        Self::new(local, width, depth, tile_size)
    }

    /// The tile-local geometry.
    pub fn mesh(&self) -> &TileMesh {
        &self.mesh
    }

    /// The footprint along x in grid cells, without rotation.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// The footprint along z in grid cells, without rotation.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The footprint `(width, depth)` in grid cells after applying `rotation`.
    pub fn footprint(&self, rotation: Rotation) -> (u32, u32) {
        if rotation.swaps_axes() {
            (self.depth, self.width)
        } else {
            (self.width, self.depth)
        }
    }

    /// Places the template with its footprint starting at `origin`, turned by `rotation` and raised by `y_offset`.
    ///
    /// The rotation works on doubled coordinates centered in the footprint, so it is exact for every
    /// footprint size. Rotations are proper, so triangles keep their clockwise winding.
    pub fn stamp(&self, origin: IVec3, rotation: Rotation, y_offset: i32) -> TileMesh {
        let extent_x = self.width as i32 * self.tile_size;
        let extent_z = self.depth as i32 * self.tile_size;
        let (rotated_x, rotated_z) = if rotation.swaps_axes() {
            (extent_z, extent_x)
        } else {
            (extent_x, extent_z)
        };
        let vertices = self
            .mesh
            .vertices
            .iter()
            .map(|v| {
                let (x, z) = rotation.apply(2 * v.x - extent_x, 2 * v.z - extent_z);
                IVec3::new(
                    origin.x + (x + rotated_x) / 2,
                    origin.y + v.y + y_offset,
                    origin.z + (z + rotated_z) / 2,
                )
            })
            .collect();
        TileMesh {
            vertices,
            ..self.mesh.clone()
        }
    }
}
