//! An incremental bounding box tree over the triangles of a tile.

use glam::{DVec3, IVec3};

use crate::fixed::{
    IntRect, barycentric_y, closest_point_on_triangle, closest_point_on_triangle_xz,
    triangle_contains_xz,
};

/// A box in a [`BBTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BBTreeBox {
    /// Holds a single node.
    Leaf {
        /// The index of the node within its tile.
        node: u32,
        /// The xz-bounds of the triangle.
        rect: IntRect,
        /// The corners of the triangle in fixed-point coordinates.
        triangle: [IVec3; 3],
    },
    /// Groups two boxes. The rect always contains the rects of both children.
    Internal {
        /// The union of the children's rects.
        rect: IntRect,
        /// Index of the first child.
        left: usize,
        /// Index of the second child.
        right: usize,
    },
}

impl BBTreeBox {
    /// The xz-bounds of the box.
    #[inline]
    pub fn rect(&self) -> IntRect {
        match self {
            Self::Leaf { rect, .. } | Self::Internal { rect, .. } => *rect,
        }
    }
}

/// The result of a nearest node query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestNode {
    /// The index of the node within its tile.
    pub node: u32,
    /// The closest point on the node's triangle, in fixed-point coordinates.
    pub point: DVec3,
    /// The squared distance from the query point to [`NearestNode::point`].
    pub distance_sqr: f64,
}

/// An axis-aligned bounding box tree on the xz-plane.
///
/// Nodes are inserted one by one. Each insertion descends into the child that grows the least,
/// and the tree is never rebalanced. That keeps insertion cheap for trees that are thrown away
/// whenever their tile changes, at the cost of slower queries for unlucky insertion orders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BBTree {
    boxes: Vec<BBTreeBox>,
    root: Option<usize>,
}

impl BBTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree from `(node, triangle)` pairs in insertion order.
    pub fn from_triangles(triangles: impl IntoIterator<Item = (u32, [IVec3; 3])>) -> Self {
        let mut tree = Self::new();
        for (node, triangle) in triangles {
            tree.insert(node, triangle);
        }
        tree
    }

    /// The number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.boxes
            .iter()
            .filter(|b| matches!(b, BBTreeBox::Leaf { .. }))
            .count()
    }

    /// Returns `true` if the tree holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// The bounds of everything in the tree.
    pub fn rect(&self) -> Option<IntRect> {
        self.root.map(|root| self.boxes[root].rect())
    }

    /// All boxes of the tree. Children are referenced by index into this slice.
    pub fn boxes(&self) -> &[BBTreeBox] {
        &self.boxes
    }

    /// Removes all nodes.
    pub fn clear(&mut self) {
        self.boxes.clear();
        self.root = None;
    }

    /// Inserts the triangle of `node`.
    pub fn insert(&mut self, node: u32, triangle: [IVec3; 3]) {
        let Some(rect) = IntRect::from_points(triangle) else {
            return;
        };
        let leaf = self.boxes.len();
        self.boxes.push(BBTreeBox::Leaf {
            node,
            rect,
            triangle,
        });
        let Some(mut current) = self.root else {
            self.root = Some(leaf);
            return;
        };

        loop {
            match self.boxes[current] {
                BBTreeBox::Internal {
                    rect: current_rect,
                    left,
                    right,
                } => {
                    self.boxes[current] = BBTreeBox::Internal {
                        rect: current_rect.union(&rect),
                        left,
                        right,
                    };
                    let left_rect = self.boxes[left].rect();
                    let right_rect = self.boxes[right].rect();
                    let left_expansion = left_rect.expansion(&rect);
                    let right_expansion = right_rect.expansion(&rect);
                    current = if left_expansion < right_expansion
                        || (left_expansion == right_expansion
                            && left_rect.area() <= right_rect.area())
                    {
                        left
                    } else {
                        right
                    };
                }
                leaf_box @ BBTreeBox::Leaf {
                    rect: current_rect, ..
                } => {
                    // Move the old leaf out and turn its slot into the parent of both leaves.
                    let moved = self.boxes.len();
                    self.boxes.push(leaf_box);
                    self.boxes[current] = BBTreeBox::Internal {
                        rect: current_rect.union(&rect),
                        left: moved,
                        right: leaf,
                    };
                    return;
                }
            }
        }
    }

    /// Returns any node whose triangle contains `point` on the xz-plane.
    pub fn query_inside(&self, point: IVec3) -> Option<u32> {
        let mut found = None;
        self.visit_containing(point, |node, _| {
            found = Some(node);
            false
        });
        found
    }

    /// Returns the node whose triangle contains `point` on the xz-plane and is closest to it along y.
    pub fn query(&self, point: IVec3) -> Option<u32> {
        let mut best: Option<(u32, i64)> = None;
        self.visit_containing(point, |node, [a, b, c]| {
            let y = barycentric_y(a, b, c, point.x, point.z);
            let dy = (y as i64 - point.y as i64).abs();
            if best.is_none_or(|(_, best_dy)| dy < best_dy) {
                best = Some((node, dy));
            }
            true
        });
        best.map(|(node, _)| node)
    }

    /// Finds the node closest to `point` in 3D, at most `max_radius` fixed-point units away.
    pub fn query_closest(&self, point: IVec3, max_radius: i32) -> Option<NearestNode> {
        self.closest_by(point, max_radius, |[a, b, c]| {
            let closest = closest_point_on_triangle(a, b, c, point);
            (closest, (closest - point.as_dvec3()).length_squared())
        })
    }

    /// Finds the node closest to `point` on the xz-plane, at most `max_radius` fixed-point units away.
    /// The y coordinate of `point` is ignored.
    pub fn query_closest_xz(&self, point: IVec3, max_radius: i32) -> Option<NearestNode> {
        self.closest_by(point, max_radius, |[a, b, c]| {
            let closest = closest_point_on_triangle_xz(a, b, c, point);
            let dx = closest.x - point.x as f64;
            let dz = closest.z - point.z as f64;
            (closest, dx * dx + dz * dz)
        })
    }

    /// Calls `visit` for every leaf whose triangle contains `point` until it returns `false`.
    fn visit_containing(&self, point: IVec3, mut visit: impl FnMut(u32, [IVec3; 3]) -> bool) {
        let Some(root) = self.root else {
            return;
        };
        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            let bbox = self.boxes[index];
            if !bbox.rect().contains(point.x, point.z) {
                continue;
            }
            match bbox {
                BBTreeBox::Internal { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
                BBTreeBox::Leaf { node, triangle, .. } => {
                    let [a, b, c] = triangle;
                    if triangle_contains_xz(a, b, c, point) && !visit(node, triangle) {
                        return;
                    }
                }
            }
        }
    }

    /// Branch and bound search. `distance` returns the closest point on a triangle and its squared distance.
    /// The xz-distance to a rect is a lower bound for both metrics, so it is used for pruning.
    fn closest_by(
        &self,
        point: IVec3,
        max_radius: i32,
        distance: impl Fn([IVec3; 3]) -> (DVec3, f64),
    ) -> Option<NearestNode> {
        let root = self.root?;
        let max_distance_sqr = (max_radius as f64) * (max_radius as f64);
        let mut best: Option<NearestNode> = None;
        let bound = |best: &Option<NearestNode>| best.map_or(max_distance_sqr, |b| b.distance_sqr);

        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            let bbox = self.boxes[index];
            if bbox.rect().distance_sqr_xz(point) as f64 > bound(&best) {
                continue;
            }
            match bbox {
                BBTreeBox::Internal { left, right, .. } => {
                    let left_distance = self.boxes[left].rect().distance_sqr_xz(point);
                    let right_distance = self.boxes[right].rect().distance_sqr_xz(point);
                    // Visit the nearer child first.
                    if left_distance <= right_distance {
                        stack.push(right);
                        stack.push(left);
                    } else {
                        stack.push(left);
                        stack.push(right);
                    }
                }
                BBTreeBox::Leaf { node, triangle, .. } => {
                    let (closest, distance_sqr) = distance(triangle);
                    let better = match best {
                        Some(b) => distance_sqr < b.distance_sqr,
                        None => distance_sqr <= max_distance_sqr,
                    };
                    if better {
                        best = Some(NearestNode {
                            node,
                            point: closest,
                            distance_sqr,
                        });
                    }
                }
            }
        }
        best
    }
}
