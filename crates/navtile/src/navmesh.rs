//! The tile grid, tile stitching and persistence.

use std::{collections::BTreeSet, sync::Arc, time::Instant};

use glam::IVec3;
use thiserror::Error;

use crate::{
    Connection, NavmeshConfig, NodeRef, ShapeEdge, Tile, TileCoord, TileError, TileMesh,
    Voxelizer, VoxelizerError,
    fixed::{IntRect, cost_between, segment_segment_distance_sqr, to_fixed, to_fixed_scalar},
    tile::{MAX_TILE_INDEX, tile_index_of_vertex},
    trimesh::RasterizationMesh,
};

/// Edge endpoints within this many fixed-point units of a tile border lie on that border.
const BORDER_TOLERANCE: i32 = 2;

/// A grid of [`Tile`]s sharing one navigation graph.
///
/// Each tile is held in an [`Arc`]. Replacing a tile publishes a new `Arc`,
/// so anyone still holding the old one keeps a consistent tile.
#[derive(Debug, Clone)]
pub struct TiledNavmesh {
    tile_x_count: u32,
    tile_z_count: u32,
    tile_size: i32,
    origin: IVec3,
    max_climb: i32,
    /// Tiles by tile index. A tile covering several cells is stored at the index of its first cell.
    tiles: Vec<Option<Arc<Tile>>>,
    /// The index of the tile covering each cell.
    cells: Vec<Option<u32>>,
}

impl TiledNavmesh {
    /// Creates an empty grid of `tile_x_count * tile_z_count` cells.
    ///
    /// `tile_size` is the side length of one cell and `origin` its minimum corner, both in fixed-point units.
    /// `max_climb` is the vertical tolerance used when stitching tiles.
    pub fn new(
        tile_x_count: u32,
        tile_z_count: u32,
        tile_size: i32,
        origin: IVec3,
        max_climb: i32,
    ) -> Result<Self, NavmeshError> {
        let count = tile_x_count as u64 * tile_z_count as u64;
        if count > MAX_TILE_INDEX as u64 + 1 {
            return Err(NavmeshError::TooManyTiles {
                count,
                max: MAX_TILE_INDEX as u64 + 1,
            });
        }
        Ok(Self {
            tile_x_count,
            tile_z_count,
            tile_size,
            origin,
            max_climb,
            tiles: vec![None; count as usize],
            cells: vec![None; count as usize],
        })
    }

    /// Creates an empty grid laid out as described by `config`.
    pub fn from_config(config: &NavmeshConfig) -> Result<Self, NavmeshError> {
        let (tile_x_count, tile_z_count) = config.tile_count();
        Self::new(
            tile_x_count,
            tile_z_count,
            to_fixed_scalar(config.tile_world_size()),
            to_fixed(config.aabb.min),
            to_fixed_scalar(config.walkable_climb as f32 * config.cell_height),
        )
    }

    /// Voxelizes every tile from `meshes` and connects all neighbors.
    ///
    /// # Errors
    ///
    /// Returns the first tile that failed to build, with its coordinates.
    pub fn build(
        config: &NavmeshConfig,
        meshes: &[RasterizationMesh],
    ) -> Result<Self, NavmeshError> {
        let mut navmesh = Self::from_config(config)?;
        let voxelizer = Voxelizer::new(config, meshes);
        let start = Instant::now();
        for z in 0..navmesh.tile_z_count {
            for x in 0..navmesh.tile_x_count {
                let mesh = voxelizer
                    .build_tile(x, z)
                    .map_err(|source| NavmeshError::Build { x, z, source })?;
                let index = navmesh.tile_index(x, z);
                let tile = Tile::new(TileCoord::single(x, z), index, TileMesh::from(mesh))?;
                navmesh.replace_tile(tile)?;
            }
        }
        navmesh.connect_all()?;
        tracing::debug!(
            tiles = navmesh.tiles().count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Built tiled navmesh"
        );
        Ok(navmesh)
    }

    /// The number of cells along x.
    pub fn tile_x_count(&self) -> u32 {
        self.tile_x_count
    }

    /// The number of cells along z.
    pub fn tile_z_count(&self) -> u32 {
        self.tile_z_count
    }

    /// The side length of one cell in fixed-point units.
    pub fn tile_size(&self) -> i32 {
        self.tile_size
    }

    /// The minimum corner of the grid in fixed-point units.
    pub fn origin(&self) -> IVec3 {
        self.origin
    }

    /// The vertical stitching tolerance in fixed-point units.
    pub fn max_climb(&self) -> i32 {
        self.max_climb
    }

    /// The tile index of the cell at `(x, z)`.
    #[inline]
    pub fn tile_index(&self, x: u32, z: u32) -> u32 {
        x + z * self.tile_x_count
    }

    /// Returns `true` if the cell at `(x, z)` is inside the grid.
    #[inline]
    pub fn contains(&self, x: u32, z: u32) -> bool {
        x < self.tile_x_count && z < self.tile_z_count
    }

    /// Returns an error unless every cell of `coord` is inside the grid.
    pub fn check_bounds(&self, coord: TileCoord) -> Result<(), NavmeshError> {
        if coord.w == 0
            || coord.d == 0
            || !self.contains(coord.x + coord.w - 1, coord.z + coord.d - 1)
        {
            return Err(NavmeshError::OutOfBounds {
                x: coord.x,
                z: coord.z,
            });
        }
        Ok(())
    }

    /// The fixed-point xz-rect of the cells covered by `coord`.
    pub fn cell_rect(&self, coord: TileCoord) -> IntRect {
        let min_x = self.origin.x + coord.x as i32 * self.tile_size;
        let min_z = self.origin.z + coord.z as i32 * self.tile_size;
        IntRect::new(
            min_x,
            min_z,
            min_x + coord.w as i32 * self.tile_size,
            min_z + coord.d as i32 * self.tile_size,
        )
    }

    /// Iterates over the cells whose rect touches `rect`.
    pub fn cells_touching(&self, rect: IntRect) -> impl Iterator<Item = (u32, u32)> + use<> {
        let grid = IntRect::new(
            self.origin.x,
            self.origin.z,
            self.origin.x + self.tile_x_count as i32 * self.tile_size,
            self.origin.z + self.tile_z_count as i32 * self.tile_size,
        );
        if self.tile_x_count == 0 || self.tile_z_count == 0 || !grid.intersects(&rect) {
            return TileCoord { x: 0, z: 0, w: 0, d: 0 }.cells();
        }
        let to_cell = |v: i32, origin: i32, count: u32| {
            ((v - origin).div_euclid(self.tile_size.max(1))).clamp(0, count as i32 - 1) as u32
        };
        let x0 = to_cell(rect.xmin, self.origin.x, self.tile_x_count);
        let x1 = to_cell(rect.xmax, self.origin.x, self.tile_x_count);
        let z0 = to_cell(rect.zmin, self.origin.z, self.tile_z_count);
        let z1 = to_cell(rect.zmax, self.origin.z, self.tile_z_count);
        TileCoord {
            x: x0,
            z: z0,
            w: x1 - x0 + 1,
            d: z1 - z0 + 1,
        }
        .cells()
    }

    /// The tile covering the cell at `(x, z)`.
    pub fn tile_at(&self, x: u32, z: u32) -> Option<&Arc<Tile>> {
        if !self.contains(x, z) {
            return None;
        }
        let index = self.cells[self.tile_index(x, z) as usize]?;
        self.tile(index)
    }

    /// The tile with the given tile index.
    pub fn tile(&self, index: u32) -> Option<&Arc<Tile>> {
        self.tiles.get(index as usize)?.as_ref()
    }

    /// Iterates over all tiles.
    pub fn tiles(&self) -> impl Iterator<Item = &Arc<Tile>> {
        self.tiles.iter().flatten()
    }

    pub(crate) fn tile_mut(&mut self, index: u32) -> Option<&mut Tile> {
        self.tiles.get_mut(index as usize)?.as_mut().map(Arc::make_mut)
    }

    /// Publishes `tile`, replacing every tile that overlaps its cells.
    ///
    /// Connections into the replaced tiles are removed first. The new tile starts without cross-tile
    /// connections; call [`TiledNavmesh::connect_tiles`] afterwards.
    pub fn replace_tile(&mut self, tile: Tile) -> Result<(), NavmeshError> {
        self.check_bounds(tile.coord)?;
        let index = tile.index;
        if index != self.tile_index(tile.coord.x, tile.coord.z) {
            return Err(NavmeshError::OutOfBounds {
                x: tile.coord.x,
                z: tile.coord.z,
            });
        }
        let replaced: BTreeSet<u32> = tile
            .coord
            .cells()
            .filter_map(|(x, z)| self.cells[self.tile_index(x, z) as usize])
            .collect();
        for old in replaced {
            self.remove_tile(old);
        }
        for (x, z) in tile.coord.cells() {
            let cell = self.tile_index(x, z) as usize;
            self.cells[cell] = Some(index);
        }
        self.tiles[index as usize] = Some(Arc::new(tile));
        Ok(())
    }

    /// Removes the tile with the given index and every connection into it.
    pub fn remove_tile(&mut self, index: u32) -> Option<Arc<Tile>> {
        self.remove_connections_from_tile(index);
        let tile = self.tiles.get_mut(index as usize)?.take()?;
        for (x, z) in tile.coord.cells() {
            let cell = self.tile_index(x, z) as usize;
            if self.cells[cell] == Some(index) {
                self.cells[cell] = None;
            }
        }
        Some(tile)
    }

    /// Tile indices of all tiles sharing a border with the tile `index`.
    pub fn neighbors(&self, index: u32) -> BTreeSet<u32> {
        let mut neighbors = BTreeSet::new();
        let Some(tile) = self.tile(index) else {
            return neighbors;
        };
        let TileCoord { x, z, w, d } = tile.coord;
        let mut consider = |cx: i64, cz: i64| {
            if cx < 0 || cz < 0 || !self.contains(cx as u32, cz as u32) {
                return;
            }
            if let Some(other) = self.cells[self.tile_index(cx as u32, cz as u32) as usize] {
                if other != index {
                    neighbors.insert(other);
                }
            }
        };
        let (x, z, w, d) = (x as i64, z as i64, w as i64, d as i64);
        for cz in z..z + d {
            consider(x - 1, cz);
            consider(x + w, cz);
        }
        for cx in x..x + w {
            consider(cx, z - 1);
            consider(cx, z + d);
        }
        neighbors
    }

    /// Connects every pair of neighboring tiles.
    pub fn connect_all(&mut self) -> Result<(), NavmeshError> {
        let indices: Vec<u32> = self.tiles().map(|t| t.index).collect();
        for a in indices {
            for b in self.neighbors(a) {
                if a < b {
                    self.connect_tiles(a, b)?;
                }
            }
        }
        Ok(())
    }

    /// Connects all nodes of tile `a` and tile `b` that share an edge along their common border.
    ///
    /// Existing connections between the two tiles are replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if either tile is missing or the tiles do not share a border.
    pub fn connect_tiles(&mut self, a: u32, b: u32) -> Result<usize, NavmeshError> {
        let (Some(tile_a), Some(tile_b)) = (self.tile(a), self.tile(b)) else {
            return Err(NavmeshError::NotAdjacent { a, b });
        };
        let (rect_a, rect_b) = (self.cell_rect(tile_a.coord), self.cell_rect(tile_b.coord));

        // Axis 0 means the border is perpendicular to x.
        let (axis, border) = if rect_a.xmax == rect_b.xmin {
            (0, rect_a.xmax)
        } else if rect_b.xmax == rect_a.xmin {
            (0, rect_a.xmin)
        } else if rect_a.zmax == rect_b.zmin {
            (2, rect_a.zmax)
        } else if rect_b.zmax == rect_a.zmin {
            (2, rect_a.zmin)
        } else {
            return Err(NavmeshError::NotAdjacent { a, b });
        };
        let overlaps = if axis == 0 {
            rect_a.zmin < rect_b.zmax && rect_b.zmin < rect_a.zmax
        } else {
            rect_a.xmin < rect_b.xmax && rect_b.xmin < rect_a.xmax
        };
        if !overlaps {
            return Err(NavmeshError::NotAdjacent { a, b });
        }

        let edges_a = border_edges(tile_a, axis, border);
        let edges_b = border_edges(tile_b, axis, border);
        let other_axis = 2 - axis;
        let max_climb_sqr = (self.max_climb as f64) * (self.max_climb as f64);

        let mut links = Vec::new();
        for edge_a in &edges_a {
            for edge_b in &edges_b {
                let [a0, a1] = edge_a.points;
                let [b0, b1] = edge_b.points;
                let exact = (a0 == b1 && a1 == b0) || (a0 == b0 && a1 == b1);
                if !exact {
                    let (a_min, a_max) = min_max(a0[other_axis], a1[other_axis]);
                    let (b_min, b_max) = min_max(b0[other_axis], b1[other_axis]);
                    if a_min.max(b_min) >= a_max.min(b_max) {
                        continue;
                    }
                    let distance_sqr = segment_segment_distance_sqr(
                        a0.as_dvec3(),
                        a1.as_dvec3(),
                        b0.as_dvec3(),
                        b1.as_dvec3(),
                    );
                    if distance_sqr >= max_climb_sqr {
                        continue;
                    }
                }
                links.push((edge_a.clone(), edge_b.clone()));
            }
        }

        self.remove_connections_from_to(a, b);
        self.remove_connections_from_to(b, a);
        let count = links.len();
        for (edge_a, edge_b) in links {
            let from = NodeRef::new(a, edge_a.node);
            let to = NodeRef::new(b, edge_b.node);
            let cost = cost_between(edge_a.position, edge_b.position);
            let shape_edge = ShapeEdge::new(edge_a.edge, edge_b.edge);
            if let Some(tile) = self.tile_mut(a) {
                tile.nodes[edge_a.node as usize].add_connection(Connection {
                    node: to,
                    cost,
                    shape_edge,
                });
            }
            if let Some(tile) = self.tile_mut(b) {
                tile.nodes[edge_b.node as usize].add_connection(Connection {
                    node: from,
                    cost,
                    shape_edge: shape_edge.reversed(),
                });
            }
        }
        tracing::trace!(a, b, links = count, "Connected tiles");
        Ok(count)
    }

    /// Removes every connection from tile `from` into tile `to`.
    pub fn remove_connections_from_to(&mut self, from: u32, to: u32) {
        let Some(tile) = self.tile(from) else {
            return;
        };
        let touches = tile
            .nodes
            .iter()
            .any(|n| n.connections.iter().any(|c| c.node.tile == to));
        if !touches {
            return;
        }
        if let Some(tile) = self.tile_mut(from) {
            for node in &mut tile.nodes {
                node.connections.retain(|c| c.node.tile != to);
            }
        }
    }

    /// Removes all connections between tile `index` and other tiles, in both directions.
    pub fn remove_connections_from_tile(&mut self, index: u32) {
        let Some(tile) = self.tile(index) else {
            return;
        };
        let others: BTreeSet<u32> = tile
            .nodes
            .iter()
            .flat_map(|n| n.connections.iter().map(|c| c.node.tile))
            .filter(|&other| other != index)
            .collect();
        for other in others {
            self.remove_connections_from_to(other, index);
            self.remove_connections_from_to(index, other);
        }
    }

    /// Counts connections from tile `from` into tile `to`.
    pub fn connection_count(&self, from: u32, to: u32) -> usize {
        self.tile(from).map_or(0, |tile| {
            tile.nodes
                .iter()
                .flat_map(|n| &n.connections)
                .filter(|c| c.node.tile == to)
                .count()
        })
    }

    /// Resolves a global vertex index through the tile it encodes.
    pub fn vertex(&self, global: u32) -> Option<IVec3> {
        let tile = self.tile(tile_index_of_vertex(global))?;
        Some(tile.vertex(global))
    }
}

#[derive(Debug, Clone)]
struct BorderEdge {
    node: u32,
    edge: u8,
    points: [IVec3; 2],
    position: IVec3,
}

/// All node edges of `tile` lying on the border `coordinate` along `axis`.
fn border_edges(tile: &Tile, axis: usize, coordinate: i32) -> Vec<BorderEdge> {
    let on_border = |v: IVec3| (v[axis] - coordinate).abs() <= BORDER_TOLERANCE;
    let mut edges = Vec::new();
    for (i, node) in tile.nodes.iter().enumerate() {
        let corners = tile.node_corners(i as u32);
        for edge in 0..3 {
            let (p, q) = (corners[edge], corners[(edge + 1) % 3]);
            if on_border(p) && on_border(q) && p != q {
                edges.push(BorderEdge {
                    node: i as u32,
                    edge: edge as u8,
                    points: [p, q],
                    position: node.position,
                });
            }
        }
    }
    edges
}

#[inline]
fn min_max(a: i32, b: i32) -> (i32, i32) {
    (a.min(b), a.max(b))
}

#[cfg(feature = "serialize")]
mod serialization {
    use super::*;

    /// The persisted form of a [`TiledNavmesh`]. Every coordinate stays a fixed-point integer.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct SerializedNavmesh {
        /// The number of cells along x.
        pub tile_x_count: u32,
        /// The number of cells along z.
        pub tile_z_count: u32,
        /// The side length of one cell.
        pub tile_size: i32,
        /// The minimum corner of the grid.
        pub origin: IVec3,
        /// The vertical stitching tolerance.
        pub max_climb: i32,
        /// All tiles, in index order.
        pub tiles: Vec<SerializedTile>,
    }

    /// The persisted form of a [`Tile`].
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct SerializedTile {
        /// The cells covered by the tile.
        pub coord: TileCoord,
        /// Vertices in fixed-point world coordinates.
        pub vertices: Vec<IVec3>,
        /// Local triangle indices.
        pub triangles: Vec<[u32; 3]>,
        /// One entry per triangle.
        pub nodes: Vec<SerializedNode>,
    }

    /// The persisted form of a [`TriangleMeshNode`](crate::TriangleMeshNode).
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct SerializedNode {
        /// The centroid of the triangle.
        pub position: IVec3,
        /// See [`TriangleMeshNode::flags`](crate::TriangleMeshNode::flags).
        pub flags: u32,
        /// Outgoing connections.
        pub connections: Vec<Connection>,
    }

    impl TiledNavmesh {
        /// Converts the navmesh into its persisted form.
        pub fn serialize(&self) -> SerializedNavmesh {
            SerializedNavmesh {
                tile_x_count: self.tile_x_count,
                tile_z_count: self.tile_z_count,
                tile_size: self.tile_size,
                origin: self.origin,
                max_climb: self.max_climb,
                tiles: self
                    .tiles()
                    .map(|tile| SerializedTile {
                        coord: tile.coord,
                        vertices: tile.vertices.clone(),
                        triangles: tile.triangles.clone(),
                        nodes: tile
                            .nodes
                            .iter()
                            .map(|node| SerializedNode {
                                position: node.position,
                                flags: node.flags(),
                                connections: node.connections.clone(),
                            })
                            .collect(),
                    })
                    .collect(),
            }
        }

        /// Restores a navmesh from its persisted form. Node centroids and BBTrees are rebuilt.
        pub fn deserialize(serialized: SerializedNavmesh) -> Result<Self, NavmeshError> {
            let mut navmesh = Self::new(
                serialized.tile_x_count,
                serialized.tile_z_count,
                serialized.tile_size,
                serialized.origin,
                serialized.max_climb,
            )?;
            for tile in serialized.tiles {
                let index = navmesh.tile_index(tile.coord.x, tile.coord.z);
                let nodes = tile.nodes;
                let mut restored = Tile::new(
                    tile.coord,
                    index,
                    TileMesh {
                        vertices: tile.vertices,
                        triangles: tile.triangles,
                        areas: Vec::new(),
                        tags: Vec::new(),
                    },
                )?;
                if restored.nodes.len() != nodes.len() {
                    return Err(NavmeshError::CorruptTile {
                        x: tile.coord.x,
                        z: tile.coord.z,
                    });
                }
                for (node, serialized) in restored.nodes.iter_mut().zip(nodes) {
                    node.position = serialized.position;
                    node.set_flags(serialized.flags);
                    node.connections = serialized.connections;
                }
                navmesh.replace_tile(restored)?;
            }
            Ok(navmesh)
        }

        /// Encodes the navmesh with `bincode`.
        pub fn to_bytes(&self) -> Result<Vec<u8>, NavmeshError> {
            Ok(bincode::serde::encode_to_vec(
                self.serialize(),
                bincode::config::standard(),
            )?)
        }

        /// Decodes a navmesh written by [`TiledNavmesh::to_bytes`].
        pub fn from_bytes(bytes: &[u8]) -> Result<Self, NavmeshError> {
            let (serialized, _): (SerializedNavmesh, usize) =
                bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
            Self::deserialize(serialized)
        }
    }
}

#[cfg(feature = "serialize")]
pub use serialization::{SerializedNavmesh, SerializedNode, SerializedTile};

/// Errors that can occur while working with a [`TiledNavmesh`].
#[derive(Error, Debug)]
pub enum NavmeshError {
    /// The tile does not fit into the grid.
    #[error("Tile ({x}, {z}) is outside of the tile grid")]
    OutOfBounds {
        /// The x coordinate of the tile.
        x: u32,
        /// The z coordinate of the tile.
        z: u32,
    },
    /// The tiles passed to [`TiledNavmesh::connect_tiles`] do not share a border.
    #[error("Tiles {a} and {b} are not adjacent")]
    NotAdjacent {
        /// The first tile index.
        a: u32,
        /// The second tile index.
        b: u32,
    },
    /// The grid has more cells than a vertex index can address.
    #[error("The grid has {count} tiles, but at most {max} are supported")]
    TooManyTiles {
        /// The requested number of tiles.
        count: u64,
        /// The maximum number of tiles.
        max: u64,
    },
    /// A tile failed to voxelize.
    #[error("Failed to build tile ({x}, {z}): {source}")]
    Build {
        /// The x coordinate of the tile.
        x: u32,
        /// The z coordinate of the tile.
        z: u32,
        /// What went wrong.
        source: VoxelizerError,
    },
    /// A tile could not be created.
    #[error(transparent)]
    Tile(#[from] TileError),
    /// A persisted tile does not match its own geometry.
    #[error("Serialized tile ({x}, {z}) has a different number of nodes than triangles")]
    CorruptTile {
        /// The x coordinate of the tile.
        x: u32,
        /// The z coordinate of the tile.
        z: u32,
    },
    /// Encoding failed.
    #[cfg(feature = "serialize")]
    #[error("Failed to encode navmesh: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    /// Decoding failed.
    #[cfg(feature = "serialize")]
    #[error("Failed to decode navmesh: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl NavmeshError {
    /// The cell coordinates of the tile the error is about, if any.
    pub fn tile(&self) -> Option<(u32, u32)> {
        match self {
            Self::OutOfBounds { x, z } | Self::Build { x, z, .. } | Self::CorruptTile { x, z } => {
                Some((*x, *z))
            }
            Self::Tile(TileError::TooManyVertices { x, z, .. }) => Some((*x, *z)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::AreaType;

    use super::*;

    /// A flat quad filling the cell at `(x, z)` of a grid with 1000 unit tiles.
    fn quad(x: i32, z: i32, y: i32) -> TileMesh {
        let (x0, z0) = (x * 1000, z * 1000);
        TileMesh {
            vertices: vec![
                IVec3::new(x0, y, z0),
                IVec3::new(x0, y, z0 + 1000),
                IVec3::new(x0 + 1000, y, z0 + 1000),
                IVec3::new(x0 + 1000, y, z0),
            ],
            triangles: vec![[0, 1, 2], [0, 2, 3]],
            areas: vec![AreaType::DEFAULT_WALKABLE; 2],
            tags: vec![0; 2],
        }
    }

    fn navmesh() -> TiledNavmesh {
        let mut navmesh = TiledNavmesh::new(2, 2, 1000, IVec3::ZERO, 100).unwrap();
        for (x, z) in [(0, 0), (1, 0), (0, 1)] {
            let index = navmesh.tile_index(x, z);
            let tile = Tile::new(TileCoord::single(x, z), index, quad(x as i32, z as i32, 0)).unwrap();
            navmesh.replace_tile(tile).unwrap();
        }
        navmesh
    }

    #[test]
    fn can_connect_neighbors() {
        let mut navmesh = navmesh();
        assert_eq!(navmesh.connect_tiles(0, 1).unwrap(), 1);
        assert_eq!(navmesh.connection_count(0, 1), 1);
        assert_eq!(navmesh.connection_count(1, 0), 1);
        let tile = navmesh.tile(0).unwrap();
        let connection = tile.nodes[1].connections[0];
        assert_eq!(connection.node, NodeRef::new(1, 0));
        let target = &navmesh.tile(1).unwrap().nodes[0];
        assert_eq!(
            connection.cost,
            cost_between(tile.nodes[1].position, target.position)
        );
        assert_eq!(connection.shape_edge, ShapeEdge::new(1, 0));
        // Connecting twice does not duplicate connections.
        navmesh.connect_tiles(1, 0).unwrap();
        assert_eq!(navmesh.connection_count(0, 1), 1);
    }

    #[test]
    fn diagonal_tiles_are_not_adjacent() {
        let mut navmesh = navmesh();
        assert!(matches!(
            navmesh.connect_tiles(1, 2),
            Err(NavmeshError::NotAdjacent { a: 1, b: 2 })
        ));
    }

    #[test]
    fn step_above_climb_is_not_connected() {
        let mut navmesh = TiledNavmesh::new(2, 1, 1000, IVec3::ZERO, 100).unwrap();
        navmesh
            .replace_tile(Tile::new(TileCoord::single(0, 0), 0, quad(0, 0, 0)).unwrap())
            .unwrap();
        navmesh
            .replace_tile(Tile::new(TileCoord::single(1, 0), 1, quad(1, 0, 300)).unwrap())
            .unwrap();
        assert_eq!(navmesh.connect_tiles(0, 1).unwrap(), 0);
    }

    #[test]
    fn replacing_a_tile_removes_connections_into_it() {
        let mut navmesh = navmesh();
        navmesh.connect_all().unwrap();
        assert_eq!(navmesh.connection_count(2, 0), 1);
        let tile = Tile::new(TileCoord::single(0, 0), 0, quad(0, 0, 0)).unwrap();
        navmesh.replace_tile(tile).unwrap();
        assert_eq!(navmesh.connection_count(1, 0), 0);
        assert_eq!(navmesh.connection_count(2, 0), 0);
    }

    #[test]
    fn readers_keep_their_tile_when_it_changes() {
        let mut navmesh = navmesh();
        let before = navmesh.tile(0).unwrap().clone();
        navmesh.connect_all().unwrap();
        assert!(before.nodes.iter().all(|n| n.connections.is_empty()));
        assert!(navmesh.connection_count(0, 1) > 0);
    }

    #[test]
    fn large_tiles_cover_several_cells() {
        let mut navmesh = navmesh();
        let coord = TileCoord {
            x: 0,
            z: 0,
            w: 2,
            d: 1,
        };
        let mut mesh = quad(0, 0, 0);
        for v in &mut mesh.vertices {
            v.x *= 2;
        }
        navmesh.replace_tile(Tile::new(coord, 0, mesh).unwrap()).unwrap();
        assert!(navmesh.tile(1).is_none());
        assert_eq!(navmesh.tile_at(1, 0).unwrap().index, 0);
        assert_eq!(navmesh.neighbors(0), BTreeSet::from([2]));
        assert!(matches!(
            navmesh.replace_tile(
                Tile::new(
                    TileCoord {
                        x: 1,
                        z: 1,
                        w: 2,
                        d: 1
                    },
                    3,
                    quad(1, 1, 0)
                )
                .unwrap()
            ),
            Err(NavmeshError::OutOfBounds { x: 1, z: 1 })
        ));
    }

    #[test]
    fn can_find_touched_cells() {
        let navmesh = navmesh();
        let cells: Vec<_> = navmesh
            .cells_touching(IntRect::new(500, 200, 1500, 800))
            .collect();
        assert_eq!(cells, vec![(0, 0), (1, 0)]);
        assert_eq!(
            navmesh
                .cells_touching(IntRect::new(5000, 5000, 6000, 6000))
                .count(),
            0
        );
    }

    #[cfg(feature = "serialize")]
    #[test]
    fn corrupt_bytes_are_rejected() {
        let navmesh = navmesh();
        let mut serialized = navmesh.serialize();
        serialized.tiles[0].triangles[1][2] = 99;
        let bytes =
            bincode::serde::encode_to_vec(&serialized, bincode::config::standard()).unwrap();
        assert!(matches!(
            TiledNavmesh::from_bytes(&bytes),
            Err(NavmeshError::Tile(TileError::IndexOutOfRange { vertex: 99, .. }))
        ));

        let mut serialized = navmesh.serialize();
        serialized.tiles[0].nodes.pop();
        assert!(matches!(
            TiledNavmesh::deserialize(serialized),
            Err(NavmeshError::CorruptTile { x: 0, z: 0 })
        ));
    }
}
