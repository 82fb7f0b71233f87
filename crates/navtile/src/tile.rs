//! One independently rebuildable chunk of a [`TiledNavmesh`](crate::TiledNavmesh).

use glam::IVec3;
use thiserror::Error;

use crate::{AreaType, BBTree, TriangleMeshNode, VoxelMesh, fixed::IntRect};

/// Global vertex indices store the tile index above this many bits.
pub const TILE_INDEX_OFFSET: u32 = 12;
/// Masks the local part of a global vertex index.
pub const VERTEX_INDEX_MASK: u32 = (1 << TILE_INDEX_OFFSET) - 1;
/// The highest tile index a global vertex index can encode.
pub const MAX_TILE_INDEX: u32 = u32::MAX >> TILE_INDEX_OFFSET;

/// Triangles in fixed-point coordinates, ready to become a [`Tile`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TileMesh {
    /// Vertices in fixed-point world coordinates.
    pub vertices: Vec<IVec3>,
    /// Triangles, clockwise when seen from above.
    pub triangles: Vec<[u32; 3]>,
    /// The area type of each triangle.
    pub areas: Vec<AreaType>,
    /// The tag of each triangle.
    pub tags: Vec<u8>,
}

impl TileMesh {
    /// Checks that every triangle only refers to existing vertices.
    pub fn check_indices(&self) -> Result<(), TileError> {
        check_triangle_indices(&self.triangles, self.vertices.len())
    }
}

pub(crate) fn check_triangle_indices(triangles: &[[u32; 3]], count: usize) -> Result<(), TileError> {
    for (triangle, indices) in triangles.iter().enumerate() {
        if let Some(&vertex) = indices.iter().find(|&&v| v as usize >= count) {
            return Err(TileError::IndexOutOfRange {
                triangle,
                vertex,
                count,
            });
        }
    }
    Ok(())
}

impl From<VoxelMesh> for TileMesh {
    fn from(mesh: VoxelMesh) -> Self {
        let tags = vec![0; mesh.triangles.len()];
        Self {
            vertices: mesh.vertices,
            triangles: mesh.triangles,
            areas: mesh.areas,
            tags,
        }
    }
}

/// The rectangle of grid cells a tile covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCoord {
    /// The x coordinate of the first cell.
    pub x: u32,
    /// The z coordinate of the first cell.
    pub z: u32,
    /// The number of cells along x.
    pub w: u32,
    /// The number of cells along z.
    pub d: u32,
}

impl TileCoord {
    /// A tile covering exactly one cell.
    pub const fn single(x: u32, z: u32) -> Self {
        Self { x, z, w: 1, d: 1 }
    }

    /// Iterates over all covered cells.
    pub fn cells(&self) -> impl Iterator<Item = (u32, u32)> + use<> {
        let Self { x, z, w, d } = *self;
        (z..z + d).flat_map(move |cz| (x..x + w).map(move |cx| (cx, cz)))
    }
}

/// A chunk of the navmesh, with its graph nodes and spatial index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    /// The grid cells covered by the tile.
    pub coord: TileCoord,
    /// The index of the tile, encoded into every global vertex index.
    pub index: u32,
    /// Vertices in fixed-point world coordinates.
    pub vertices: Vec<IVec3>,
    /// Local triangle indices, clockwise when seen from above.
    pub triangles: Vec<[u32; 3]>,
    /// One node per triangle.
    pub nodes: Vec<TriangleMeshNode>,
    /// Spatial index over [`Tile::nodes`].
    pub bbtree: BBTree,
}

impl Tile {
    /// The most vertices a single tile can hold.
    pub const MAX_VERTICES: usize = 1 << TILE_INDEX_OFFSET;

    /// Creates a tile, deriving its nodes and [`BBTree`] from `mesh`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mesh has more vertices than a global vertex index can address,
    /// or if a triangle refers to a vertex that does not exist.
    pub fn new(coord: TileCoord, index: u32, mesh: TileMesh) -> Result<Self, TileError> {
        if mesh.vertices.len() > Self::MAX_VERTICES {
            return Err(TileError::TooManyVertices {
                x: coord.x,
                z: coord.z,
                count: mesh.vertices.len(),
            });
        }
        mesh.check_indices()?;
        if index > MAX_TILE_INDEX {
            return Err(TileError::IndexTooLarge { index });
        }
        let base = index << TILE_INDEX_OFFSET;
        let nodes = mesh
            .triangles
            .iter()
            .enumerate()
            .map(|(i, triangle)| {
                let corners = triangle.map(|v| mesh.vertices[v as usize]);
                let area = mesh.areas.get(i).copied().unwrap_or(AreaType::DEFAULT_WALKABLE);
                TriangleMeshNode {
                    vertices: triangle.map(|v| base | v),
                    position: (corners[0] + corners[1] + corners[2]) / 3,
                    area,
                    tag: mesh.tags.get(i).copied().unwrap_or_default(),
                    walkable: area.is_walkable(),
                    connections: Vec::new(),
                }
            })
            .collect();
        let mut tile = Self {
            coord,
            index,
            vertices: mesh.vertices,
            triangles: mesh.triangles,
            nodes,
            bbtree: BBTree::new(),
        };
        tile.rebuild_bbtree();
        Ok(tile)
    }

    /// Rebuilds the [`BBTree`] from the current nodes.
    pub fn rebuild_bbtree(&mut self) {
        self.bbtree = BBTree::from_triangles(
            self.triangles
                .iter()
                .enumerate()
                .map(|(i, t)| (i as u32, t.map(|v| self.vertices[v as usize]))),
        );
    }

    /// Resolves a global vertex index of this tile.
    #[inline]
    pub fn vertex(&self, global: u32) -> IVec3 {
        self.vertices[(global & VERTEX_INDEX_MASK) as usize]
    }

    /// The corners of the triangle of `node`.
    #[inline]
    pub fn node_corners(&self, node: u32) -> [IVec3; 3] {
        self.triangles[node as usize].map(|v| self.vertices[v as usize])
    }

    /// The xz-bounds of all vertices.
    pub fn bounds(&self) -> Option<IntRect> {
        IntRect::from_points(self.vertices.iter().copied())
    }

    /// Copies the geometry back out of the tile.
    pub fn to_mesh(&self) -> TileMesh {
        TileMesh {
            vertices: self.vertices.clone(),
            triangles: self.triangles.clone(),
            areas: self.nodes.iter().map(|n| n.area).collect(),
            tags: self.nodes.iter().map(|n| n.tag).collect(),
        }
    }
}

/// Decodes the tile index out of a global vertex index.
#[inline]
pub fn tile_index_of_vertex(global: u32) -> u32 {
    global >> TILE_INDEX_OFFSET
}

/// Errors that can occur while creating a [`Tile`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TileError {
    /// The mesh of the tile has too many vertices.
    #[error("Tile ({x}, {z}) has {count} vertices, but at most {max} fit into a vertex index", max = Tile::MAX_VERTICES)]
    TooManyVertices {
        /// The x coordinate of the tile.
        x: u32,
        /// The z coordinate of the tile.
        z: u32,
        /// The vertex count of the mesh.
        count: usize,
    },
    /// A triangle refers to a vertex past the end of the vertex list.
    #[error("Triangle {triangle} refers to vertex {vertex}, but there are only {count} vertices")]
    IndexOutOfRange {
        /// The offending triangle.
        triangle: usize,
        /// The offending vertex index.
        vertex: u32,
        /// The number of vertices.
        count: usize,
    },
    /// The tile index does not fit into a vertex index.
    #[error("Tile index {index} is larger than {MAX_TILE_INDEX}")]
    IndexTooLarge {
        /// The offending index.
        index: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> TileMesh {
        TileMesh {
            vertices: vec![
                IVec3::new(0, 0, 0),
                IVec3::new(0, 0, 900),
                IVec3::new(900, 0, 900),
                IVec3::new(900, 0, 0),
            ],
            triangles: vec![[0, 1, 2], [0, 2, 3]],
            areas: vec![AreaType::DEFAULT_WALKABLE; 2],
            tags: vec![0, 5],
        }
    }

    #[test]
    fn node_vertices_encode_the_tile_index() {
        let tile = Tile::new(TileCoord::single(2, 3), 17, quad()).unwrap();
        assert_eq!(tile.nodes.len(), 2);
        let node = &tile.nodes[1];
        assert_eq!(node.vertices[1] >> TILE_INDEX_OFFSET, 17);
        assert_eq!(tile_index_of_vertex(node.vertices[2]), 17);
        assert_eq!(tile.vertex(node.vertices[1]), IVec3::new(900, 0, 900));
        assert_eq!(node.position, IVec3::new(600, 0, 300));
        assert_eq!(node.tag, 5);
        assert_eq!(tile.bbtree.len(), 2);
        assert_eq!(tile.to_mesh(), quad());
    }

    #[test]
    fn too_many_vertices_is_an_error() {
        let mut mesh = quad();
        mesh.vertices.resize(Tile::MAX_VERTICES + 1, IVec3::ZERO);
        assert!(matches!(
            Tile::new(TileCoord::single(0, 0), 0, mesh),
            Err(TileError::TooManyVertices { count: 4097, .. })
        ));
    }

    #[test]
    fn dangling_vertex_index_is_an_error() {
        let mut mesh = quad();
        mesh.vertices.truncate(3);
        assert_eq!(
            Tile::new(TileCoord::single(0, 0), 0, mesh),
            Err(TileError::IndexOutOfRange {
                triangle: 1,
                vertex: 3,
                count: 3
            })
        );
    }

    #[test]
    fn coords_iterate_over_all_cells() {
        let coord = TileCoord {
            x: 1,
            z: 2,
            w: 2,
            d: 2,
        };
        assert_eq!(
            coord.cells().collect::<Vec<_>>(),
            vec![(1, 2), (2, 2), (1, 3), (2, 3)]
        );
    }
}
