//! Stamps tile types into a [`TiledNavmesh`] and keeps them up to date with cuts and additions.

use std::collections::BTreeSet;

use glam::IVec3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use slotmap::SlotMap;
use thiserror::Error;

use crate::{
    AddId, CutId, NavmeshAdd, NavmeshCut, NavmeshError, Rotation, Tile, TileCoord, TileError,
    TileMesh, TileType, TileTypeId, TiledNavmesh,
    clipping::{TriangulationError, cut_tile, perturb_cuts},
    fixed::IntRect,
    refine::refine,
};

/// How often a tile cut is attempted before giving up. Every retry perturbs the cut vertices.
pub const MAX_PERTURBATION_ATTEMPTS: u32 = 4;

/// How a loaded tile was stamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedTile {
    /// The template the tile was stamped from.
    pub tile_type: TileTypeId,
    /// The rotation of the template.
    pub rotation: Rotation,
    /// The vertical offset of the template, in fixed-point units.
    pub y_offset: i32,
}

/// The lifecycle of one tile index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileState {
    /// Nothing was loaded here, or the tile was covered by a larger one.
    #[default]
    Empty,
    /// A tile type is stamped here.
    Loaded(LoadedTile),
    /// The tile is being rebuilt with the current cuts.
    Cutting(LoadedTile),
}

/// Owns the tile types, cuts and additions of a [`TiledNavmesh`] and rebuilds tiles when they change.
///
/// The handler never owns the navmesh. Every operation that touches tiles takes it explicitly.
#[derive(Debug, Clone)]
pub struct TileHandler {
    tile_types: SlotMap<TileTypeId, TileType>,
    cuts: SlotMap<CutId, NavmeshCut>,
    adds: SlotMap<AddId, NavmeshAdd>,
    states: Vec<TileState>,
    dirty: Vec<IntRect>,
    batch_depth: u32,
    pending_stitches: BTreeSet<u32>,
}

impl TileHandler {
    /// Creates a handler for an empty `navmesh`.
    pub fn new(navmesh: &TiledNavmesh) -> Self {
        let count = navmesh.tile_x_count() as usize * navmesh.tile_z_count() as usize;
        Self {
            tile_types: SlotMap::with_key(),
            cuts: SlotMap::with_key(),
            adds: SlotMap::with_key(),
            states: vec![TileState::Empty; count],
            dirty: Vec::new(),
            batch_depth: 0,
            pending_stitches: BTreeSet::new(),
        }
    }

    /// Creates a handler that adopts every tile of `navmesh` as its own tile type, so generated tiles can be cut.
    pub fn from_graph(navmesh: &TiledNavmesh) -> Self {
        let mut handler = Self::new(navmesh);
        for tile in navmesh.tiles() {
            let origin = cell_origin(navmesh, tile.coord);
            let tile_type = TileType::from_world(
                &tile.to_mesh(),
                origin,
                tile.coord.w,
                tile.coord.d,
                navmesh.tile_size(),
            );
            let id = handler.tile_types.insert(tile_type);
            handler.states[tile.index as usize] = TileState::Loaded(LoadedTile {
                tile_type: id,
                rotation: Rotation::Deg0,
                y_offset: 0,
            });
        }
        tracing::debug!(tiles = handler.tile_types.len(), "Adopted tiles from graph");
        handler
    }

    /// Registers a template for [`TileHandler::load_tile`].
    pub fn register_tile_type(&mut self, tile_type: TileType) -> TileTypeId {
        self.tile_types.insert(tile_type)
    }

    /// Returns a registered template.
    pub fn tile_type(&self, id: TileTypeId) -> Option<&TileType> {
        self.tile_types.get(id)
    }

    /// The state of the tile index of the cell at `(x, z)`.
    pub fn state(&self, navmesh: &TiledNavmesh, x: u32, z: u32) -> TileState {
        if !navmesh.contains(x, z) {
            return TileState::Empty;
        }
        let index = navmesh.tile_index(x, z);
        self.states.get(index as usize).copied().unwrap_or_default()
    }

    /// Stamps `tile_type` with its footprint starting at the cell `(x, z)`, applies all cuts and publishes it.
    ///
    /// Tiles overlapped by the footprint are replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the tile type is unknown, the footprint leaves the grid or cutting failed.
    /// The navmesh is left untouched in that case.
    pub fn load_tile(
        &mut self,
        navmesh: &mut TiledNavmesh,
        x: u32,
        z: u32,
        tile_type: TileTypeId,
        rotation: Rotation,
        y_offset: i32,
    ) -> Result<(), TileHandlerError> {
        let loaded = LoadedTile {
            tile_type,
            rotation,
            y_offset,
        };
        let tile = self.build_tile(navmesh, x, z, loaded)?;
        self.publish(navmesh, tile, loaded)
    }

    /// Rebuilds the tile covering the cell at `(x, z)` from its tile type and the current cuts.
    pub fn reload_tile(
        &mut self,
        navmesh: &mut TiledNavmesh,
        x: u32,
        z: u32,
    ) -> Result<(), TileHandlerError> {
        let Some(tile) = navmesh.tile_at(x, z) else {
            return Err(TileHandlerError::NotLoaded { x, z });
        };
        let (index, coord) = (tile.index, tile.coord);
        let Some(TileState::Loaded(loaded)) = self.states.get(index as usize).copied() else {
            return Err(TileHandlerError::NotLoaded { x, z });
        };
        let tile = self.build_tile(navmesh, coord.x, coord.z, loaded)?;
        self.publish(navmesh, tile, loaded)
    }

    /// Adds an obstacle. Affected tiles are rebuilt by [`TileHandler::reload_dirty_tiles`].
    pub fn add_cut(&mut self, cut: NavmeshCut) -> CutId {
        self.dirty.extend(cut.bounds());
        self.cuts.insert(cut)
    }

    /// Replaces an obstacle. Tiles touched by the old or new shape become dirty.
    pub fn update_cut(&mut self, id: CutId, cut: NavmeshCut) -> Result<(), TileHandlerError> {
        let Some(existing) = self.cuts.get_mut(id) else {
            return Err(TileHandlerError::UnknownCut);
        };
        self.dirty.extend(existing.bounds());
        self.dirty.extend(cut.bounds());
        *existing = cut;
        Ok(())
    }

    /// Removes an obstacle.
    pub fn remove_cut(&mut self, id: CutId) -> Option<NavmeshCut> {
        let cut = self.cuts.remove(id)?;
        self.dirty.extend(cut.bounds());
        Some(cut)
    }

    /// Returns a registered obstacle.
    pub fn cut(&self, id: CutId) -> Option<&NavmeshCut> {
        self.cuts.get(id)
    }

    /// Adds walkable geometry. Affected tiles are rebuilt by [`TileHandler::reload_dirty_tiles`].
    ///
    /// # Errors
    ///
    /// Returns an error if a triangle refers to a vertex that does not exist.
    pub fn add_geometry(&mut self, add: NavmeshAdd) -> Result<AddId, TileHandlerError> {
        add.check_indices()?;
        self.dirty.extend(add.bounds());
        Ok(self.adds.insert(add))
    }

    /// Removes walkable geometry.
    pub fn remove_geometry(&mut self, id: AddId) -> Option<NavmeshAdd> {
        let add = self.adds.remove(id)?;
        self.dirty.extend(add.bounds());
        Some(add)
    }

    /// Tile indices of loaded tiles that changed cuts or additions touch.
    pub fn dirty_tiles(&self, navmesh: &TiledNavmesh) -> BTreeSet<u32> {
        self.dirty
            .iter()
            .flat_map(|rect| navmesh.cells_touching(*rect))
            .filter_map(|(x, z)| navmesh.tile_at(x, z).map(|tile| tile.index))
            .filter(|&index| {
                matches!(self.states.get(index as usize), Some(TileState::Loaded(_)))
            })
            .collect()
    }

    /// Rebuilds all dirty tiles in one batch. Returns the number of rebuilt tiles.
    ///
    /// Every dirty tile is attempted. A tile that fails keeps its old version and stays dirty, so a later call
    /// retries it. The first error is returned after all other tiles were rebuilt and stitched.
    pub fn reload_dirty_tiles(&mut self, navmesh: &mut TiledNavmesh) -> Result<usize, TileHandlerError> {
        let dirty = self.dirty_tiles(navmesh);
        let rects = std::mem::take(&mut self.dirty);
        if dirty.is_empty() {
            return Ok(0);
        }
        self.start_batch_tile_update();
        let mut count = 0;
        let mut failed = Vec::new();
        let mut first_error = None;
        for index in &dirty {
            let Some(coord) = navmesh.tile(*index).map(|tile| tile.coord) else {
                continue;
            };
            match self.reload_tile(navmesh, coord.x, coord.z) {
                Ok(()) => count += 1,
                Err(err) => {
                    tracing::warn!(x = coord.x, z = coord.z, "Failed to reload dirty tile: {err}");
                    failed.push(navmesh.cell_rect(coord));
                    first_error.get_or_insert(err);
                }
            }
        }
        self.dirty.extend(
            rects
                .into_iter()
                .filter(|rect| failed.iter().any(|tile| tile.intersects(rect))),
        );
        let stitched = self.end_batch_tile_update(navmesh);
        if let Some(err) = first_error {
            return Err(err);
        }
        stitched?;
        tracing::debug!(tiles = count, "Reloaded dirty tiles");
        Ok(count)
    }

    /// Defers stitching until the matching [`TileHandler::end_batch_tile_update`]. Batches nest.
    pub fn start_batch_tile_update(&mut self) {
        self.batch_depth += 1;
    }

    /// Ends a batch. When the outermost batch ends, every tile loaded during it is stitched once.
    pub fn end_batch_tile_update(&mut self, navmesh: &mut TiledNavmesh) -> Result<(), TileHandlerError> {
        if self.batch_depth == 0 {
            return Err(TileHandlerError::NotBatching);
        }
        self.batch_depth -= 1;
        if self.batch_depth > 0 {
            return Ok(());
        }
        let mut pairs = BTreeSet::new();
        for index in std::mem::take(&mut self.pending_stitches) {
            for neighbor in navmesh.neighbors(index) {
                pairs.insert((index.min(neighbor), index.max(neighbor)));
            }
        }
        for (a, b) in pairs {
            navmesh.connect_tiles(a, b)?;
        }
        Ok(())
    }

    /// Returns `true` while a batch is open.
    pub fn is_batching(&self) -> bool {
        self.batch_depth > 0
    }

    fn build_tile(
        &mut self,
        navmesh: &TiledNavmesh,
        x: u32,
        z: u32,
        loaded: LoadedTile,
    ) -> Result<Tile, TileHandlerError> {
        let tile_type = self
            .tile_types
            .get(loaded.tile_type)
            .ok_or(TileHandlerError::UnknownTileType)?;
        let (w, d) = tile_type.footprint(loaded.rotation);
        let coord = TileCoord { x, z, w, d };
        navmesh.check_bounds(coord)?;
        tile_type.mesh().check_indices()?;
        let index = navmesh.tile_index(x, z);
        let mesh = tile_type.stamp(cell_origin(navmesh, coord), loaded.rotation, loaded.y_offset);

        let previous = self.states[index as usize];
        self.states[index as usize] = TileState::Cutting(loaded);
        let result = self.cut_mesh(navmesh, coord, mesh);
        self.states[index as usize] = previous;
        Ok(Tile::new(coord, index, result?)?)
    }

    /// Applies all cuts and additions touching `coord` to `mesh`.
    fn cut_mesh(
        &self,
        navmesh: &TiledNavmesh,
        coord: TileCoord,
        mesh: TileMesh,
    ) -> Result<TileMesh, TileHandlerError> {
        let rect = navmesh.cell_rect(coord);
        let cuts: Vec<NavmeshCut> = self
            .cuts
            .values()
            .filter(|cut| cut.bounds().is_some_and(|b| b.intersects(&rect)))
            .cloned()
            .collect();
        let adds: Vec<&NavmeshAdd> = self
            .adds
            .values()
            .filter(|add| add.bounds().is_some_and(|b| b.intersects(&rect)))
            .collect();
        if cuts.is_empty() && adds.is_empty() {
            return Ok(mesh);
        }

        let index = navmesh.tile_index(coord.x, coord.z);
        let mut output = retry_with_perturbation(index, &cuts, |attempt_cuts| {
            cut_tile(&mesh, rect, attempt_cuts, &adds)
        })
        .map_err(|(attempts, source)| TileHandlerError::DegenerateCut {
            x: coord.x,
            z: coord.z,
            attempts,
            source,
        })?;
        if !output.changed {
            return Ok(mesh);
        }
        refine(&mut output.mesh);
        tracing::debug!(
            x = coord.x,
            z = coord.z,
            cuts = cuts.len(),
            adds = adds.len(),
            triangles = output.mesh.triangles.len(),
            "Cut tile"
        );
        Ok(output.mesh)
    }

    fn publish(
        &mut self,
        navmesh: &mut TiledNavmesh,
        tile: Tile,
        loaded: LoadedTile,
    ) -> Result<(), TileHandlerError> {
        let index = tile.index;
        let replaced: BTreeSet<u32> = tile
            .coord
            .cells()
            .filter_map(|(x, z)| navmesh.tile_at(x, z).map(|t| t.index))
            .filter(|&old| old != index)
            .collect();
        navmesh.replace_tile(tile)?;
        for old in replaced {
            self.states[old as usize] = TileState::Empty;
            self.pending_stitches.remove(&old);
        }
        self.states[index as usize] = TileState::Loaded(loaded);
        if self.is_batching() {
            self.pending_stitches.insert(index);
        } else {
            for neighbor in navmesh.neighbors(index) {
                navmesh.connect_tiles(index, neighbor)?;
            }
        }
        Ok(())
    }
}

/// Runs `cut` with the original cuts, then with perturbed ones until it succeeds or
/// [`MAX_PERTURBATION_ATTEMPTS`] are used up. The perturbation is seeded by the tile index and attempt.
///
/// On failure, returns the number of attempts and the last error.
fn retry_with_perturbation<T>(
    index: u32,
    cuts: &[NavmeshCut],
    mut cut: impl FnMut(&[NavmeshCut]) -> Result<T, TriangulationError>,
) -> Result<T, (u32, TriangulationError)> {
    let mut attempt = 0;
    loop {
        let result = if attempt == 0 {
            cut(cuts)
        } else {
            let mut rng = ChaCha8Rng::seed_from_u64(((index as u64) << 32) | attempt as u64);
            cut(&perturb_cuts(cuts, &mut rng))
        };
        match result {
            Ok(output) => return Ok(output),
            Err(source) => {
                attempt += 1;
                if attempt >= MAX_PERTURBATION_ATTEMPTS {
                    return Err((attempt, source));
                }
                tracing::warn!(
                    tile = index,
                    attempt,
                    "Cut triangulation failed, retrying with perturbed cuts: {source}"
                );
            }
        }
    }
}

/// The fixed-point minimum corner of the cells of `coord`.
fn cell_origin(navmesh: &TiledNavmesh, coord: TileCoord) -> IVec3 {
    let rect = navmesh.cell_rect(coord);
    IVec3::new(rect.xmin, navmesh.origin().y, rect.zmin)
}

/// Errors that can occur while loading or cutting tiles.
#[derive(Error, Debug)]
pub enum TileHandlerError {
    /// The tile type was never registered.
    #[error("Unknown tile type")]
    UnknownTileType,
    /// The cut was never added or was already removed.
    #[error("Unknown cut")]
    UnknownCut,
    /// No tile type is loaded at the given cell.
    #[error("No tile is loaded at ({x}, {z})")]
    NotLoaded {
        /// The x coordinate of the cell.
        x: u32,
        /// The z coordinate of the cell.
        z: u32,
    },
    /// [`TileHandler::end_batch_tile_update`] was called without a matching start.
    #[error("No batch tile update is in progress")]
    NotBatching,
    /// Cutting kept failing even with perturbed cut vertices.
    #[error("Cutting tile ({x}, {z}) failed after {attempts} attempts: {source}")]
    DegenerateCut {
        /// The x coordinate of the tile.
        x: u32,
        /// The z coordinate of the tile.
        z: u32,
        /// The number of attempts.
        attempts: u32,
        /// The error of the last attempt.
        source: TriangulationError,
    },
    /// The navmesh rejected the tile.
    #[error(transparent)]
    Navmesh(#[from] NavmeshError),
    /// The tile could not be created.
    #[error(transparent)]
    Tile(#[from] TileError),
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::AreaType;

    use super::*;

    /// A flat 1×1 tile type of 1000 units, split into two triangles.
    fn flat() -> TileType {
        TileType::new(
            TileMesh {
                vertices: vec![
                    IVec3::new(0, 0, 0),
                    IVec3::new(0, 0, 1000),
                    IVec3::new(1000, 0, 1000),
                    IVec3::new(1000, 0, 0),
                ],
                triangles: vec![[0, 1, 2], [0, 2, 3]],
                areas: vec![AreaType::DEFAULT_WALKABLE; 2],
                tags: vec![0; 2],
            },
            1,
            1,
            1000,
        )
    }

    fn setup() -> (TiledNavmesh, TileHandler, TileTypeId) {
        let navmesh = TiledNavmesh::new(3, 2, 1000, IVec3::ZERO, 100).unwrap();
        let mut handler = TileHandler::new(&navmesh);
        let id = handler.register_tile_type(flat());
        (navmesh, handler, id)
    }

    fn area(tile: &Tile) -> i64 {
        tile.triangles
            .iter()
            .map(|t| {
                let [a, b, c] = t.map(|v| tile.vertices[v as usize]);
                -crate::fixed::cross_xz(a, b, c)
            })
            .sum()
    }

    #[test]
    fn loading_stitches_neighbors() {
        let (mut navmesh, mut handler, id) = setup();
        handler
            .load_tile(&mut navmesh, 0, 0, id, Rotation::Deg0, 0)
            .unwrap();
        handler
            .load_tile(&mut navmesh, 1, 0, id, Rotation::Deg0, 0)
            .unwrap();
        assert!(navmesh.connection_count(0, 1) > 0);
        assert_eq!(navmesh.connection_count(0, 1), navmesh.connection_count(1, 0));
        assert!(matches!(
            handler.state(&navmesh, 1, 0),
            TileState::Loaded(LoadedTile { tile_type, .. }) if tile_type == id
        ));
    }

    #[test]
    fn batches_defer_stitching() {
        let (mut navmesh, mut handler, id) = setup();
        handler.start_batch_tile_update();
        for x in 0..3 {
            handler
                .load_tile(&mut navmesh, x, 0, id, Rotation::Deg0, 0)
                .unwrap();
        }
        assert_eq!(navmesh.connection_count(0, 1), 0);
        handler.end_batch_tile_update(&mut navmesh).unwrap();
        assert!(navmesh.connection_count(0, 1) > 0);
        assert!(navmesh.connection_count(2, 1) > 0);
        assert!(matches!(
            handler.end_batch_tile_update(&mut navmesh),
            Err(TileHandlerError::NotBatching)
        ));
    }

    #[test]
    fn cuts_rebuild_dirty_tiles() {
        let (mut navmesh, mut handler, id) = setup();
        for x in 0..2 {
            handler
                .load_tile(&mut navmesh, x, 0, id, Rotation::Deg0, 0)
                .unwrap();
        }
        let cut = handler.add_cut(NavmeshCut::rectangle(
            Vec3A::new(0.5, 0.0, 0.5),
            Vec3A::new(0.2, 1.0, 0.2),
        ));
        assert_eq!(handler.dirty_tiles(&navmesh), BTreeSet::from([0]));
        assert_eq!(handler.reload_dirty_tiles(&mut navmesh).unwrap(), 1);
        let tile = navmesh.tile(0).unwrap();
        assert_eq!(area(tile), 2 * (1000 * 1000 - 200 * 200));
        // Stitching survives the rebuild.
        assert!(navmesh.connection_count(0, 1) > 0);

        handler.remove_cut(cut).unwrap();
        handler.reload_dirty_tiles(&mut navmesh).unwrap();
        assert_eq!(navmesh.tile(0).unwrap().triangles.len(), 2);
    }

    #[test]
    fn cut_outside_the_tile_changes_nothing() {
        let (mut navmesh, mut handler, id) = setup();
        handler
            .load_tile(&mut navmesh, 0, 0, id, Rotation::Deg0, 0)
            .unwrap();
        let before = navmesh.tile(0).unwrap().clone();
        handler.add_cut(NavmeshCut::rectangle(
            Vec3A::new(2.5, 0.0, 1.5),
            Vec3A::new(0.5, 1.0, 0.5),
        ));
        assert_eq!(handler.reload_dirty_tiles(&mut navmesh).unwrap(), 0);
        handler.reload_tile(&mut navmesh, 0, 0).unwrap();
        let after = navmesh.tile(0).unwrap();
        assert_eq!(after.vertices.len(), before.vertices.len());
        assert_eq!(after.triangles.len(), before.triangles.len());
    }

    #[test]
    fn failed_load_keeps_the_old_tile() {
        let (mut navmesh, mut handler, id) = setup();
        handler
            .load_tile(&mut navmesh, 2, 1, id, Rotation::Deg0, 0)
            .unwrap();
        let wide = handler.register_tile_type(TileType::new(TileMesh::default(), 2, 1, 1000));
        let err = handler
            .load_tile(&mut navmesh, 2, 1, wide, Rotation::Deg0, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            TileHandlerError::Navmesh(NavmeshError::OutOfBounds { x: 2, z: 1 })
        ));
        assert_eq!(navmesh.tile_at(2, 1).unwrap().triangles.len(), 2);
        assert!(matches!(handler.state(&navmesh, 2, 1), TileState::Loaded(_)));
    }

    #[test]
    fn large_tile_types_replace_what_they_cover() {
        let (mut navmesh, mut handler, id) = setup();
        for x in 0..3 {
            handler
                .load_tile(&mut navmesh, x, 0, id, Rotation::Deg0, 0)
                .unwrap();
        }
        let tall = handler.register_tile_type(TileType::new(
            TileMesh {
                vertices: vec![
                    IVec3::new(0, 0, 0),
                    IVec3::new(0, 0, 2000),
                    IVec3::new(1000, 0, 2000),
                    IVec3::new(1000, 0, 0),
                ],
                triangles: vec![[0, 1, 2], [0, 2, 3]],
                areas: Vec::new(),
                tags: Vec::new(),
            },
            1,
            2,
            1000,
        ));
        // Turned a quarter, the tall type covers two cells along x.
        handler
            .load_tile(&mut navmesh, 1, 1, tall, Rotation::Deg90, 0)
            .unwrap();
        assert_eq!(navmesh.tile_at(2, 1).unwrap().index, navmesh.tile_index(1, 1));
        assert!(navmesh.connection_count(1, 4) > 0);

        handler
            .load_tile(&mut navmesh, 2, 1, id, Rotation::Deg0, 0)
            .unwrap();
        assert_eq!(handler.state(&navmesh, 1, 1), TileState::Empty);
        assert!(navmesh.tile_at(1, 1).is_none());
        assert_eq!(navmesh.connection_count(1, 4), 0);
    }

    #[test]
    fn can_cut_adopted_tiles() {
        let mut navmesh = TiledNavmesh::new(1, 1, 1000, IVec3::ZERO, 100).unwrap();
        let mesh = flat().stamp(IVec3::ZERO, Rotation::Deg0, 0);
        navmesh
            .replace_tile(Tile::new(TileCoord::single(0, 0), 0, mesh).unwrap())
            .unwrap();
        let mut handler = TileHandler::from_graph(&navmesh);
        assert!(matches!(handler.state(&navmesh, 0, 0), TileState::Loaded(_)));
        handler.add_cut(NavmeshCut::rectangle(
            Vec3A::new(0.5, 0.0, 0.5),
            Vec3A::new(0.2, 1.0, 0.2),
        ));
        assert_eq!(handler.reload_dirty_tiles(&mut navmesh).unwrap(), 1);
        assert_eq!(area(navmesh.tile(0).unwrap()), 2 * (1000 * 1000 - 200 * 200));
    }

    #[test]
    fn added_geometry_extends_tiles() {
        let (mut navmesh, mut handler, id) = setup();
        handler
            .load_tile(&mut navmesh, 0, 0, id, Rotation::Deg0, 0)
            .unwrap();
        let add = handler
            .add_geometry(NavmeshAdd::rectangle(
                Vec3A::new(0.5, 1.0, 0.5),
                glam::Vec2::new(0.4, 0.4),
            ))
            .unwrap();
        handler.reload_dirty_tiles(&mut navmesh).unwrap();
        assert_eq!(navmesh.tile(0).unwrap().triangles.len(), 4);
        handler.remove_geometry(add).unwrap();
        handler.reload_dirty_tiles(&mut navmesh).unwrap();
        assert_eq!(navmesh.tile(0).unwrap().triangles.len(), 2);
    }

    #[test]
    fn ending_a_batch_that_never_started_is_an_error() {
        let (mut navmesh, mut handler, _) = setup();
        assert!(matches!(
            handler.end_batch_tile_update(&mut navmesh),
            Err(TileHandlerError::NotBatching)
        ));
        assert!(!handler.is_batching());
    }

    #[test]
    fn oversized_tile_types_fail_to_load() {
        let (mut navmesh, mut handler, _) = setup();
        let mut mesh = flat().mesh().clone();
        mesh.vertices.resize(Tile::MAX_VERTICES + 1, IVec3::new(500, 0, 500));
        let huge = handler.register_tile_type(TileType::new(mesh, 1, 1, 1000));
        assert!(matches!(
            handler.load_tile(&mut navmesh, 1, 1, huge, Rotation::Deg0, 0),
            Err(TileHandlerError::Tile(TileError::TooManyVertices {
                x: 1,
                z: 1,
                count: 4097
            }))
        ));
        assert_eq!(handler.state(&navmesh, 1, 1), TileState::Empty);
        assert!(navmesh.tile_at(1, 1).is_none());
    }

    #[test]
    fn dangling_indices_are_rejected() {
        let (mut navmesh, mut handler, _) = setup();
        let mut mesh = flat().mesh().clone();
        mesh.triangles.push([0, 2, 9]);
        let broken = handler.register_tile_type(TileType::new(mesh, 1, 1, 1000));
        assert!(matches!(
            handler.load_tile(&mut navmesh, 0, 0, broken, Rotation::Deg0, 0),
            Err(TileHandlerError::Tile(TileError::IndexOutOfRange { vertex: 9, .. }))
        ));

        let mut add = NavmeshAdd::rectangle(Vec3A::new(0.5, 0.0, 0.5), glam::Vec2::ONE);
        add.triangles.push([0, 1, 7]);
        assert!(handler.add_geometry(add).is_err());
        assert!(handler.dirty_tiles(&navmesh).is_empty());
    }

    fn square_cut() -> NavmeshCut {
        NavmeshCut::rectangle(Vec3A::new(0.5, 0.0, 0.5), Vec3A::new(0.2, 1.0, 0.2))
    }

    #[test]
    fn failed_cuts_are_retried_with_perturbed_vertices() {
        let cuts = [square_cut()];
        let mut seen = Vec::new();
        let attempts = retry_with_perturbation(7, &cuts, |cuts| {
            seen.push(cuts.to_vec());
            if seen.len() < 3 {
                Err(TriangulationError::IntersectingConstraints)
            } else {
                Ok(seen.len())
            }
        })
        .unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(seen[0], cuts);
        for perturbed in &seen[1..] {
            for (a, b) in cuts[0].contour.iter().zip(&perturbed[0].contour) {
                assert!((a.x - b.x).abs() <= 1 && (a.z - b.z).abs() <= 1);
            }
        }

        // The same tile and attempt always perturb the same way.
        let mut again = Vec::new();
        let _ = retry_with_perturbation(7, &cuts, |cuts| {
            again.push(cuts.to_vec());
            Err::<(), _>(TriangulationError::IntersectingConstraints)
        });
        assert_eq!(again[..3], seen[..]);
    }

    #[test]
    fn cutting_gives_up_after_the_last_attempt() {
        let cuts = [square_cut()];
        let mut calls = 0;
        let result = retry_with_perturbation(0, &cuts, |_| {
            calls += 1;
            Err::<(), _>(TriangulationError::IntersectingConstraints)
        });
        assert!(matches!(
            result,
            Err((MAX_PERTURBATION_ATTEMPTS, TriangulationError::IntersectingConstraints))
        ));
        assert_eq!(calls, MAX_PERTURBATION_ATTEMPTS);
    }
}
