//! Runtime obstacles and additions applied on top of loaded tiles.

use glam::{Affine3A, IVec3, UVec3, Vec2, Vec3A};

use crate::{
    AreaType, TileError,
    fixed::{IntRect, to_fixed, to_fixed_scalar},
    tile::check_triangle_indices,
};

slotmap::new_key_type! {
    /// Identifies a [`NavmeshCut`] registered with a [`TileHandler`](crate::TileHandler).
    pub struct CutId;
    /// Identifies a [`NavmeshAdd`] registered with a [`TileHandler`](crate::TileHandler).
    pub struct AddId;
    /// Identifies a [`TileType`](crate::TileType) registered with a [`TileHandler`](crate::TileHandler).
    pub struct TileTypeId;
}

/// A 2D obstacle outline that is subtracted from the navmesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavmeshCut {
    /// The outline on the xz-plane in fixed-point coordinates. The y component is ignored.
    pub contour: Vec<IVec3>,
    /// The lowest y the cut reaches, in fixed-point units.
    pub min_y: i32,
    /// The highest y the cut reaches, in fixed-point units.
    pub max_y: i32,
    /// Keep the part of the navmesh inside the cut as well, tagged with [`NavmeshCut::tag`].
    pub dual: bool,
    /// Also cut geometry added by [`NavmeshAdd`]s.
    pub cuts_added_geom: bool,
    /// The tag of the inside part of a dual cut.
    pub tag: u8,
}

impl NavmeshCut {
    /// Creates a plain cut from a world-space outline on the xz-plane.
    pub fn new(contour: &[Vec2], min_y: f32, max_y: f32) -> Self {
        Self {
            contour: contour
                .iter()
                .map(|p| to_fixed(Vec3A::new(p.x, 0.0, p.y)))
                .collect(),
            min_y: to_fixed_scalar(min_y),
            max_y: to_fixed_scalar(max_y),
            dual: false,
            cuts_added_geom: true,
            tag: 0,
        }
    }

    /// An axis-aligned box cut centered at `center`.
    pub fn rectangle(center: Vec3A, size: Vec3A) -> Self {
        let half = size * 0.5;
        let (min, max) = (center - half, center + half);
        Self::new(
            &[
                Vec2::new(min.x, min.z),
                Vec2::new(min.x, max.z),
                Vec2::new(max.x, max.z),
                Vec2::new(max.x, min.z),
            ],
            min.y,
            max.y,
        )
    }

    /// Turns this into a dual cut that keeps the inside with `tag`.
    pub fn with_dual_tag(mut self, tag: u8) -> Self {
        self.dual = true;
        self.tag = tag;
        self
    }

    /// The xz-bounds of the outline. `None` for an empty outline.
    pub fn bounds(&self) -> Option<IntRect> {
        IntRect::from_points(self.contour.iter().copied())
    }

    /// Returns `true` if the cut reaches into the vertical range `[min_y, max_y]`.
    #[inline]
    pub fn overlaps_y(&self, min_y: i32, max_y: i32) -> bool {
        self.min_y <= max_y && self.max_y >= min_y
    }
}

/// Extra walkable geometry merged into every tile it touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavmeshAdd {
    /// Vertices in fixed-point world coordinates.
    pub vertices: Vec<IVec3>,
    /// Triangles, clockwise when seen from above.
    pub triangles: Vec<[u32; 3]>,
    /// The area type of the added triangles.
    pub area: AreaType,
    /// The tag of the added triangles.
    pub tag: u8,
}

impl NavmeshAdd {
    /// Creates an addition from world-space geometry.
    pub fn new(vertices: &[Vec3A], triangles: &[UVec3], transform: Affine3A) -> Self {
        Self {
            vertices: vertices
                .iter()
                .map(|v| to_fixed(transform.transform_point3a(*v)))
                .collect(),
            triangles: triangles.iter().map(|t| t.to_array()).collect(),
            area: AreaType::DEFAULT_WALKABLE,
            tag: 0,
        }
    }

    /// A flat walkable rectangle centered at `center`.
    pub fn rectangle(center: Vec3A, size: Vec2) -> Self {
        let half = Vec3A::new(size.x * 0.5, 0.0, size.y * 0.5);
        let corners = [
            Vec3A::new(-half.x, 0.0, -half.z),
            Vec3A::new(-half.x, 0.0, half.z),
            Vec3A::new(half.x, 0.0, half.z),
            Vec3A::new(half.x, 0.0, -half.z),
        ];
        Self::new(
            &corners,
            &[UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
            Affine3A::from_translation(center.into()),
        )
    }

    /// Checks that every triangle only refers to existing vertices.
    pub fn check_indices(&self) -> Result<(), TileError> {
        check_triangle_indices(&self.triangles, self.vertices.len())
    }

    /// The xz-bounds of the geometry. `None` if there are no vertices.
    pub fn bounds(&self) -> Option<IntRect> {
        IntRect::from_points(self.vertices.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_create_rectangle_cut() {
        let cut = NavmeshCut::rectangle(Vec3A::new(1.0, 0.0, 2.0), Vec3A::new(1.0, 2.0, 0.5));
        assert_eq!(cut.bounds(), Some(IntRect::new(500, 1750, 1500, 2250)));
        assert!(cut.overlaps_y(-2000, -1000));
        assert!(!cut.overlaps_y(1500, 3000));
        assert!(!cut.dual);
        let dual = cut.with_dual_tag(2);
        assert!(dual.dual);
        assert_eq!(dual.tag, 2);
    }

    #[test]
    fn can_create_rectangle_add() {
        let add = NavmeshAdd::rectangle(Vec3A::new(3.0, 1.0, 0.0), Vec2::new(2.0, 1.0));
        assert_eq!(add.bounds(), Some(IntRect::new(2000, -500, 4000, 500)));
        assert!(add.vertices.iter().all(|v| v.y == 1000));
        assert_eq!(add.triangles.len(), 2);
        assert!(add.check_indices().is_ok());
    }

    #[test]
    fn dangling_add_index_is_an_error() {
        let mut add = NavmeshAdd::rectangle(Vec3A::ZERO, Vec2::ONE);
        add.triangles.push([0, 2, 4]);
        assert_eq!(
            add.check_indices(),
            Err(TileError::IndexOutOfRange {
                triangle: 2,
                vertex: 4,
                count: 4
            })
        );
    }
}
