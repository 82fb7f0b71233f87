//! The graph nodes of a tiled navmesh.

use glam::IVec3;

use crate::AreaType;

/// Addresses a node by the index of its tile and its position in [`Tile::nodes`](crate::Tile::nodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeRef {
    /// The index of the tile owning the node.
    pub tile: u32,
    /// The index of the node within its tile.
    pub node: u32,
}

impl NodeRef {
    /// Creates a new node reference.
    #[inline]
    pub const fn new(tile: u32, node: u32) -> Self {
        Self { tile, node }
    }
}

/// Which edges of two triangles a [`Connection`] crosses.
///
/// Layout: bits 0..2 hold the edge of the node owning the connection,
/// bits 2..4 the edge of the connected node. `0xff` means the nodes do not share an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ShapeEdge(pub u8);

impl ShapeEdge {
    /// The nodes are connected without sharing an edge.
    pub const NONE: Self = Self(0xff);
    const EDGE_MASK: u8 = 0b11;

    /// Packs the two edge indices. Edge `i` runs from vertex `i` to vertex `(i + 1) % 3`.
    #[inline]
    pub const fn new(from_edge: u8, to_edge: u8) -> Self {
        Self((from_edge & Self::EDGE_MASK) | ((to_edge & Self::EDGE_MASK) << 2))
    }

    /// The edge of the node owning the connection.
    #[inline]
    pub fn from_edge(self) -> Option<u8> {
        (self != Self::NONE).then_some(self.0 & Self::EDGE_MASK)
    }

    /// The edge of the connected node.
    #[inline]
    pub fn to_edge(self) -> Option<u8> {
        (self != Self::NONE).then_some((self.0 >> 2) & Self::EDGE_MASK)
    }

    /// The same edge pair seen from the other node.
    #[inline]
    pub fn reversed(self) -> Self {
        match (self.from_edge(), self.to_edge()) {
            (Some(from), Some(to)) => Self::new(to, from),
            _ => Self::NONE,
        }
    }
}

/// A directed edge of the navigation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Connection {
    /// The node this connection leads to.
    pub node: NodeRef,
    /// The cost of traversing the connection, in fixed-point units.
    pub cost: u32,
    /// The shared edge of the two triangles.
    pub shape_edge: ShapeEdge,
}

/// One triangle of a tile, as seen by the navigation graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriangleMeshNode {
    /// Global vertex indices, `(tile_index << TILE_INDEX_OFFSET) | local_index`. Clockwise when seen from above.
    pub vertices: [u32; 3],
    /// The centroid of the triangle in fixed-point coordinates.
    pub position: IVec3,
    /// The area type of the triangle.
    pub area: AreaType,
    /// A user tag, set by cuts and added geometry.
    pub tag: u8,
    /// Whether agents may enter the node.
    pub walkable: bool,
    /// Outgoing connections.
    pub connections: Vec<Connection>,
}

impl TriangleMeshNode {
    const AREA_MASK: u32 = 0xff;
    const TAG_SHIFT: u32 = 8;
    const WALKABLE_FLAG: u32 = 1 << 16;

    /// Packs area, tag and walkability into one integer.
    ///
    /// Layout: bits 0..8 area, bits 8..16 tag, bit 16 walkable.
    #[inline]
    pub fn flags(&self) -> u32 {
        let mut flags = self.area.0 as u32 | ((self.tag as u32) << Self::TAG_SHIFT);
        if self.walkable {
            flags |= Self::WALKABLE_FLAG;
        }
        flags
    }

    /// Restores area, tag and walkability from [`TriangleMeshNode::flags`].
    #[inline]
    pub fn set_flags(&mut self, flags: u32) {
        self.area = AreaType((flags & Self::AREA_MASK) as u8);
        self.tag = ((flags >> Self::TAG_SHIFT) & 0xff) as u8;
        self.walkable = flags & Self::WALKABLE_FLAG != 0;
    }

    /// Returns the connection to `node`, if there is one.
    pub fn connection_to(&self, node: NodeRef) -> Option<&Connection> {
        self.connections.iter().find(|c| c.node == node)
    }

    /// Adds a connection or updates the existing one to the same node.
    pub fn add_connection(&mut self, connection: Connection) {
        match self.connections.iter_mut().find(|c| c.node == connection.node) {
            Some(existing) => *existing = connection,
            None => self.connections.push(connection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_pack_shape_edges() {
        let edge = ShapeEdge::new(2, 1);
        assert_eq!(edge.from_edge(), Some(2));
        assert_eq!(edge.to_edge(), Some(1));
        assert_eq!(edge.reversed(), ShapeEdge::new(1, 2));
        assert_eq!(ShapeEdge::NONE.from_edge(), None);
        assert_eq!(ShapeEdge::NONE.reversed(), ShapeEdge::NONE);
    }

    #[test]
    fn can_round_trip_flags() {
        let mut node = TriangleMeshNode {
            vertices: [0, 1, 2],
            position: IVec3::ZERO,
            area: AreaType(7),
            tag: 3,
            walkable: true,
            connections: Vec::new(),
        };
        let flags = node.flags();
        node.set_flags(0);
        assert!(!node.walkable);
        node.set_flags(flags);
        assert_eq!(node.area, AreaType(7));
        assert_eq!(node.tag, 3);
        assert!(node.walkable);
    }

    #[test]
    fn adding_a_connection_twice_updates_it() {
        let mut node = TriangleMeshNode {
            vertices: [0, 1, 2],
            position: IVec3::ZERO,
            area: AreaType::DEFAULT_WALKABLE,
            tag: 0,
            walkable: true,
            connections: Vec::new(),
        };
        let target = NodeRef::new(1, 4);
        for cost in [10, 20] {
            node.add_connection(Connection {
                node: target,
                cost,
                shape_edge: ShapeEdge::NONE,
            });
        }
        assert_eq!(node.connections.len(), 1);
        assert_eq!(node.connection_to(target).unwrap().cost, 20);
    }
}
