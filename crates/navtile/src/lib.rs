#![doc = include_str!("../../../readme.md")]

mod bbtree;
mod clipping;
mod compact_cell;
mod compact_heightfield;
mod compact_span;
mod config;
mod contours;
mod cut;
mod distance_field;
mod erosion;
mod filter;
pub mod fixed;
mod graph;
mod heightfield;
mod mark_convex_poly_area;
pub(crate) mod math;
mod merge_regions;
mod navmesh;
mod node;
mod poly_mesh;
mod polygon_clip;
mod rasterize;
mod refine;
mod region;
mod span;
mod tile;
mod tile_handler;
mod tile_type;
mod trimesh;
mod voxelizer;
mod watershed;
mod work_item;

pub use bbtree::{BBTree, BBTreeBox, NearestNode};
pub use clipping::TriangulationError;
pub use compact_cell::CompactCell;
pub use compact_heightfield::{CompactHeightfield, CompactHeightfieldError};
pub use compact_span::CompactSpan;
pub use config::{NavmeshConfig, NavmeshConfigBuilder};
pub use contours::{BuildContoursFlags, Contour, ContourSet, RegionVertexId};
pub use cut::{AddId, CutId, NavmeshAdd, NavmeshCut, TileTypeId};
pub use graph::{AreaUpdate, NavGraph, NearestNodeInfo};
pub use heightfield::{Heightfield, HeightfieldBuilder, HeightfieldBuilderError};
pub use math::{Aabb3d, ConvexVolume};
pub use merge_regions::RelevantSurfaceMode;
#[cfg(feature = "serialize")]
pub use navmesh::{SerializedNavmesh, SerializedNode, SerializedTile};
pub use navmesh::{NavmeshError, TiledNavmesh};
pub use node::{Connection, NodeRef, ShapeEdge, TriangleMeshNode};
pub use poly_mesh::{PolyMeshError, PolygonMesh, VoxelMesh};
pub use rasterize::RasterizationError;
pub use region::RegionId;
pub use span::{AreaType, Span, SpanKey, Spans};
pub use tile::{
    MAX_TILE_INDEX, TILE_INDEX_OFFSET, Tile, TileCoord, TileError, TileMesh, VERTEX_INDEX_MASK,
    tile_index_of_vertex,
};
pub use tile_handler::{
    LoadedTile, MAX_PERTURBATION_ATTEMPTS, TileHandler, TileHandlerError, TileState,
};
pub use tile_type::{Rotation, TileType};
pub use trimesh::{RasterizationMesh, TriMesh};
pub use voxelizer::{Voxelizer, VoxelizerError};
pub use watershed::RegionError;
pub use work_item::{NavmeshState, NavmeshUpdates, SharedNavmesh, WorkContext, WorkItem};
