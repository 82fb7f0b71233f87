//! The interface a path search uses to consume a navmesh.

use glam::{IVec3, Vec3A};

use crate::{
    Aabb3d, AreaType, NodeRef, TiledNavmesh, TriangleMeshNode,
    fixed::{IntRect, PRECISION, to_fixed, to_fixed_scalar, to_world},
};

/// The node closest to a query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestNodeInfo {
    /// The closest node.
    pub node: NodeRef,
    /// The closest point on the node, in world space.
    pub position: Vec3A,
    /// The distance from the query point to [`NearestNodeInfo::position`]. [Units: wu]
    pub distance: f32,
}

/// Changes applied to all nodes touching a volume.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AreaUpdate {
    /// The affected volume in world space.
    pub bounds: Aabb3d,
    /// Overrides whether the nodes are walkable.
    pub walkable: Option<bool>,
    /// Overrides the area type of the nodes.
    pub area: Option<AreaType>,
    /// Overrides the tag of the nodes.
    pub tag: Option<u8>,
}

/// The minimal capabilities a graph search needs from a navigation graph.
pub trait NavGraph {
    /// Finds the node closest to `position`, at most `max_distance` world units away.
    fn get_nearest(&self, position: Vec3A, max_distance: f32) -> Option<NearestNodeInfo>;

    /// Calls `visit` for every node of the graph.
    fn get_nodes(&self, visit: &mut dyn FnMut(NodeRef, &TriangleMeshNode));

    /// Applies `update` to every node whose triangle touches its bounds. Returns the number of changed nodes.
    fn update_area(&mut self, update: &AreaUpdate) -> usize;
}

impl NavGraph for TiledNavmesh {
    fn get_nearest(&self, position: Vec3A, max_distance: f32) -> Option<NearestNodeInfo> {
        let point = to_fixed(position);
        let radius = to_fixed_scalar(max_distance).max(0);
        let radius_sqr = radius as i64 * radius as i64;
        let mut best: Option<(NodeRef, crate::NearestNode)> = None;
        for tile in self.tiles() {
            let in_reach = tile
                .bbtree
                .rect()
                .is_some_and(|rect| rect.distance_sqr_xz(point) <= radius_sqr);
            if !in_reach {
                continue;
            }
            let Some(found) = tile.bbtree.query_closest(point, radius) else {
                continue;
            };
            if best.is_none_or(|(_, b)| found.distance_sqr < b.distance_sqr) {
                best = Some((NodeRef::new(tile.index, found.node), found));
            }
        }
        best.map(|(node, found)| NearestNodeInfo {
            node,
            position: to_world(found.point.round().as_ivec3()),
            distance: (found.distance_sqr.sqrt() / PRECISION as f64) as f32,
        })
    }

    fn get_nodes(&self, visit: &mut dyn FnMut(NodeRef, &TriangleMeshNode)) {
        for tile in self.tiles() {
            for (i, node) in tile.nodes.iter().enumerate() {
                visit(NodeRef::new(tile.index, i as u32), node);
            }
        }
    }

    fn update_area(&mut self, update: &AreaUpdate) -> usize {
        let min = to_fixed(update.bounds.min);
        let max = to_fixed(update.bounds.max);
        let rect = IntRect::new(min.x, min.z, max.x, max.z);

        let mut tiles: Vec<u32> = self
            .cells_touching(rect)
            .filter_map(|(x, z)| self.tile_at(x, z).map(|t| t.index))
            .collect();
        tiles.sort_unstable();
        tiles.dedup();

        let mut changed = 0;
        for index in tiles {
            let Some(tile) = self.tile(index) else {
                continue;
            };
            let affected: Vec<usize> = (0..tile.nodes.len())
                .filter(|&i| {
                    let corners = tile.node_corners(i as u32);
                    touches(&corners, rect, min.y, max.y)
                })
                .collect();
            if affected.is_empty() {
                continue;
            }
            let Some(tile) = self.tile_mut(index) else {
                continue;
            };
            for i in affected {
                let node = &mut tile.nodes[i];
                if let Some(walkable) = update.walkable {
                    node.walkable = walkable;
                }
                if let Some(area) = update.area {
                    node.area = area;
                }
                if let Some(tag) = update.tag {
                    node.tag = tag;
                }
                changed += 1;
            }
        }
        tracing::debug!(changed, "Updated node areas");
        changed
    }
}

fn touches(corners: &[IVec3; 3], rect: IntRect, min_y: i32, max_y: i32) -> bool {
    let Some(bounds) = IntRect::from_points(corners.iter().copied()) else {
        return false;
    };
    let low = corners.iter().map(|c| c.y).min().unwrap_or_default();
    let high = corners.iter().map(|c| c.y).max().unwrap_or_default();
    bounds.intersects(&rect) && low <= max_y && high >= min_y
}
