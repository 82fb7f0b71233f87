//! Queued navmesh updates that run under one write lock.

use std::{collections::VecDeque, fmt, sync::Arc};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::{Tile, TileHandler, TileHandlerError, TiledNavmesh};

/// A navmesh together with the handler that owns its tile types and cuts.
#[derive(Debug, Clone)]
pub struct NavmeshState {
    /// The published tiles.
    pub navmesh: TiledNavmesh,
    /// Tile types, cuts and additions of [`NavmeshState::navmesh`].
    pub handler: TileHandler,
}

/// A [`NavmeshState`] shared between readers and the thread applying [`NavmeshUpdates`].
///
/// Readers either hold the read lock while querying or clone the [`Arc`] of the tiles they need.
/// A cloned tile stays valid and unchanged while newer versions are published.
#[derive(Debug, Clone)]
pub struct SharedNavmesh(Arc<RwLock<NavmeshState>>);

impl SharedNavmesh {
    /// Shares `navmesh` with an empty [`TileHandler`].
    pub fn new(navmesh: TiledNavmesh) -> Self {
        let handler = TileHandler::new(&navmesh);
        Self::with_handler(navmesh, handler)
    }

    /// Shares `navmesh` with an existing handler.
    pub fn with_handler(navmesh: TiledNavmesh, handler: TileHandler) -> Self {
        Self(Arc::new(RwLock::new(NavmeshState { navmesh, handler })))
    }

    /// Takes the read lock. Updates wait until the guard is dropped.
    pub fn read(&self) -> RwLockReadGuard<'_, NavmeshState> {
        self.0.read()
    }

    /// The current tile covering the cell at `(x, z)`.
    pub fn tile(&self, x: u32, z: u32) -> Option<Arc<Tile>> {
        self.0.read().navmesh.tile_at(x, z).cloned()
    }

    /// Runs `f` with shared access to the navmesh.
    pub fn with_navmesh<R>(&self, f: impl FnOnce(&TiledNavmesh) -> R) -> R {
        f(&self.0.read().navmesh)
    }
}

/// Mutable access handed to a [`WorkItem`].
#[derive(Debug)]
pub struct WorkContext<'a> {
    /// The navmesh being updated.
    pub navmesh: &'a mut TiledNavmesh,
    /// The handler of [`WorkContext::navmesh`].
    pub handler: &'a mut TileHandler,
}

/// One queued update.
pub type WorkItem = Box<dyn FnOnce(&mut WorkContext<'_>) -> Result<(), TileHandlerError> + Send>;

/// A queue of updates applied together by [`NavmeshUpdates::process`].
#[derive(Default)]
pub struct NavmeshUpdates {
    queue: VecDeque<WorkItem>,
}

impl fmt::Debug for NavmeshUpdates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavmeshUpdates")
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl NavmeshUpdates {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an update.
    pub fn push(
        &mut self,
        item: impl FnOnce(&mut WorkContext<'_>) -> Result<(), TileHandlerError> + Send + 'static,
    ) {
        self.queue.push_back(Box::new(item));
    }

    /// The number of queued updates.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Runs all queued updates in order inside one write lock and one tile batch, then reloads dirty tiles.
    ///
    /// Returns the number of updates that ran. If an update fails, the updates after it stay queued and
    /// the tiles loaded so far are still stitched.
    pub fn process(&mut self, shared: &SharedNavmesh) -> Result<usize, TileHandlerError> {
        if self.queue.is_empty() {
            return Ok(0);
        }
        let mut guard = shared.0.write();
        let NavmeshState { navmesh, handler } = &mut *guard;

        handler.start_batch_tile_update();
        let mut ran = 0;
        let mut result = Ok(());
        while let Some(item) = self.queue.pop_front() {
            let mut context = WorkContext {
                navmesh: &mut *navmesh,
                handler: &mut *handler,
            };
            if let Err(err) = item(&mut context) {
                result = Err(err);
                break;
            }
            ran += 1;
        }
        if result.is_ok() {
            result = handler.reload_dirty_tiles(navmesh).map(|_| ());
        }
        let stitched = handler.end_batch_tile_update(navmesh);
        result?;
        stitched?;
        tracing::debug!(updates = ran, queued = self.queue.len(), "Processed navmesh updates");
        Ok(ran)
    }
}
