//! Input geometry for the [`Voxelizer`](crate::Voxelizer).

use glam::{Affine3A, UVec3, Vec3A};

use crate::{
    math::{Aabb3d, TriangleIndices as _},
    span::AreaType,
};

/// A mesh used as input for [`Heightfield`](crate::Heightfield) rasterization, in world space.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// The vertices composing the mesh.
    /// Follows the convention of a triangle list.
    pub vertices: Vec<Vec3A>,

    /// The indices composing the mesh.
    /// Follows the convention of a triangle list.
    pub indices: Vec<UVec3>,

    /// The area types of the trimesh. Each index corresponds 1:1 to the [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Extends the trimesh with the vertices and indices of another trimesh.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    pub fn extend(&mut self, other: TriMesh) {
        let next_vertex_index = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| i + next_vertex_index));
        self.area_types.extend(other.area_types);
    }

    /// Appends a geometry batch, applying its transform. Every triangle gets the batch's area.
    pub fn push_batch(&mut self, batch: &RasterizationMesh) {
        self.extend(TriMesh {
            vertices: batch
                .vertices
                .iter()
                .map(|v| batch.transform.transform_point3a(*v))
                .collect(),
            indices: batch.triangles.clone(),
            area_types: vec![batch.area; batch.triangles.len()],
        });
    }

    /// Computes the AABB of the trimesh.
    /// Returns `None` if the trimesh is empty.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// Marks triangles that are too steep as [`AreaType::NOT_WALKABLE`].
    ///
    /// A triangle stays walkable only if the y component of its normal is greater than the cosine of the threshold angle.
    /// Triangles are expected to wind so that `(b - a) × (c - a)` points up.
    ///
    /// # Arguments
    ///
    /// * `threshold_rad` - The threshold angle in radians.
    ///
    pub fn clear_unwalkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for (i, indices) in self.indices.iter().enumerate() {
            let normal = indices.normal(&self.vertices);
            if normal.y <= threshold_cos {
                self.area_types[i] = AreaType::NOT_WALKABLE;
            }
        }
    }
}

/// One batch of input geometry, as handed over by whatever collects scene geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterizationMesh {
    /// Vertices in the mesh's local space.
    pub vertices: Vec<Vec3A>,
    /// Triangle indices into [`Self::vertices`].
    pub triangles: Vec<UVec3>,
    /// The area applied to every walkable triangle of this batch.
    pub area: AreaType,
    /// Local to world transform.
    pub transform: Affine3A,
    /// World-space bounds of the transformed mesh.
    pub bounds: Aabb3d,
}

impl RasterizationMesh {
    /// Creates a batch and computes its world-space bounds.
    pub fn new(
        vertices: Vec<Vec3A>,
        triangles: Vec<UVec3>,
        area: AreaType,
        transform: Affine3A,
    ) -> Self {
        let bounds = Aabb3d::from_verts(&vertices)
            .map(|aabb| aabb.transformed(&transform))
            .unwrap_or_default();
        Self {
            vertices,
            triangles,
            area,
            transform,
            bounds,
        }
    }
}
