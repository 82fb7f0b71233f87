use glam::{Affine3A, UVec3, Vec2, Vec3A};

/// An axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3d {
    /// The minimum corner.
    pub min: Vec3A,
    /// The maximum corner.
    pub max: Vec3A,
}

impl Aabb3d {
    /// Creates a new AABB from its corners.
    pub fn new(min: impl Into<Vec3A>, max: impl Into<Vec3A>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Computes the AABB of a set of vertices.
    /// Returns `None` if `verts` is empty.
    pub fn from_verts(verts: &[Vec3A]) -> Option<Self> {
        let first = *verts.first()?;
        let (min, max) = verts
            .iter()
            .fold((first, first), |(min, max), v| (min.min(*v), max.max(*v)));
        Some(Self { min, max })
    }

    /// Returns the size of the AABB along each axis.
    #[inline]
    pub fn size(&self) -> Vec3A {
        self.max - self.min
    }

    /// Returns `true` if the two boxes overlap or touch.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Returns `true` if the boxes overlap or touch on the xz-plane, ignoring y.
    #[inline]
    pub fn intersects_xz(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Grows the AABB by `amount` on every side.
    #[inline]
    pub fn expanded(&self, amount: Vec3A) -> Self {
        Self {
            min: self.min - amount,
            max: self.max + amount,
        }
    }

    /// Computes the AABB of this box after applying `transform` to all of its corners.
    pub fn transformed(&self, transform: &Affine3A) -> Self {
        let corners = [
            Vec3A::new(self.min.x, self.min.y, self.min.z),
            Vec3A::new(self.max.x, self.min.y, self.min.z),
            Vec3A::new(self.min.x, self.max.y, self.min.z),
            Vec3A::new(self.max.x, self.max.y, self.min.z),
            Vec3A::new(self.min.x, self.min.y, self.max.z),
            Vec3A::new(self.max.x, self.min.y, self.max.z),
            Vec3A::new(self.min.x, self.max.y, self.max.z),
            Vec3A::new(self.max.x, self.max.y, self.max.z),
        ]
        .map(|corner| transform.transform_point3a(corner));
        // The array is never empty, so this always succeeds.
        Self::from_verts(&corners).unwrap_or(*self)
    }
}

/// A convex volume that overrides the area type of the spans it contains.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvexVolume {
    /// The xz-plane outline of the volume. Should be convex.
    pub vertices: Vec<Vec2>,
    /// The lower y bound of the volume. [Units: wu]
    pub min_y: f32,
    /// The upper y bound of the volume. [Units: wu]
    pub max_y: f32,
    /// The area type to apply to the contained spans.
    pub area: crate::AreaType,
}

pub(crate) trait TriangleIndices {
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A;
}

impl TriangleIndices for UVec3 {
    #[inline]
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A {
        let a = vertices[self[0] as usize];
        let b = vertices[self[1] as usize];
        let c = vertices[self[2] as usize];
        let ab = b - a;
        let ac = c - a;
        ab.cross(ac).normalize_or_zero()
    }
}

pub(crate) trait TriangleVertices {
    fn aabb(&self) -> Aabb3d;
}

impl TriangleVertices for [Vec3A; 3] {
    #[inline]
    fn aabb(&self) -> Aabb3d {
        let min = self[0].min(self[1]).min(self[2]);
        let max = self[0].max(self[1]).max(self[2]);
        Aabb3d { min, max }
    }
}

/// Gets the standard width (x-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The width offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_x(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [-1, 0, 1, 0];
    OFFSET[direction as usize & 0x03]
}

/// Gets the standard depth (z-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The depth offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_z(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [0, 1, 0, -1];
    OFFSET[direction as usize & 0x03]
}

/// The direction pointing the other way.
#[inline]
pub(crate) fn opposite_dir(direction: u8) -> u8 {
    (direction + 2) & 0x3
}
