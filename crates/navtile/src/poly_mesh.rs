//! Ear clips contours into the [`PolygonMesh`] a tile is built from.

use std::collections::HashMap;

use glam::IVec3;
use thiserror::Error;

use crate::{
    Aabb3d, AreaType, RegionId,
    contours::ContourSet,
    fixed::{
        right_or_colinear_xz, right_xz, segments_intersect_properly_xz, segments_intersect_xz,
        to_fixed,
    },
};

/// A triangle mesh in cell coordinates built from a [`ContourSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonMesh {
    /// Vertices in cell units relative to [`PolygonMesh::aabb`].
    pub vertices: Vec<IVec3>,
    /// Triangles, clockwise when seen from above.
    pub triangles: Vec<[u32; 3]>,
    /// The region of each triangle.
    pub regions: Vec<RegionId>,
    /// The area type of each triangle.
    pub areas: Vec<AreaType>,
    /// The AABB of the mesh in world space, without the border.
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane.
    pub cell_size: f32,
    /// The size of each cell along the y-axis.
    pub cell_height: f32,
    /// The border size the source data was built with.
    pub border_size: u16,
    /// The max error of the contours the mesh was built from.
    pub max_edge_error: f32,
}

/// The output of the voxel pipeline for one tile: triangles in fixed-point world coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct VoxelMesh {
    /// Vertices in fixed-point world coordinates.
    pub vertices: Vec<IVec3>,
    /// Triangles, clockwise when seen from above.
    pub triangles: Vec<[u32; 3]>,
    /// The area type of each triangle.
    pub areas: Vec<AreaType>,
}

impl ContourSet {
    /// Triangulates every contour into a [`PolygonMesh`] using ear clipping.
    ///
    /// # Errors
    ///
    /// Returns an error if a contour cannot be triangulated or the mesh has too many vertices.
    pub fn into_polygon_mesh(self) -> Result<PolygonMesh, PolyMeshError> {
        PolygonMesh::from_contours(&self)
    }
}

impl PolygonMesh {
    const MAX_VERTICES: usize = 0xfffe;
    /// Vertices closer than this along y are welded when they share x and z.
    const VERTEX_Y_TOLERANCE: i32 = 2;

    /// Triangulates every contour of `contours`.
    ///
    /// # Errors
    ///
    /// Returns an error if a contour cannot be triangulated or the mesh has too many vertices.
    pub fn from_contours(contours: &ContourSet) -> Result<Self, PolyMeshError> {
        let mut mesh = Self {
            vertices: Vec::new(),
            triangles: Vec::new(),
            regions: Vec::new(),
            areas: Vec::new(),
            aabb: contours.aabb,
            cell_size: contours.cell_size,
            cell_height: contours.cell_height,
            border_size: contours.border_size,
            max_edge_error: contours.max_error,
        };

        let max_vertices: usize = contours
            .contours
            .iter()
            .filter(|contour| contour.vertices.len() >= 3)
            .map(|contour| contour.vertices.len())
            .sum();
        if max_vertices >= Self::MAX_VERTICES {
            return Err(PolyMeshError::TooManyVertices {
                count: max_vertices,
                max: Self::MAX_VERTICES,
            });
        }

        let mut buckets: HashMap<(i32, i32), Vec<u32>> = HashMap::new();
        for contour in &contours.contours {
            if contour.vertices.len() < 3 {
                continue;
            }
            let points: Vec<IVec3> = contour.vertices.iter().map(|(v, _)| *v).collect();
            let triangles = triangulate(&points).ok_or(PolyMeshError::TriangulationFailed {
                region: contour.region,
                vertices: points.len(),
            })?;

            // Add and merge vertices.
            let indices: Vec<u32> = points
                .iter()
                .map(|&v| mesh.add_vertex(v, &mut buckets))
                .collect();

            for [a, b, c] in triangles {
                let (a, b, c) = (indices[a], indices[b], indices[c]);
                if a == b || a == c || b == c {
                    continue;
                }
                mesh.triangles.push([a, b, c]);
                mesh.regions.push(contour.region);
                mesh.areas.push(contour.area);
            }
        }
        tracing::trace!(
            vertices = mesh.vertices.len(),
            triangles = mesh.triangles.len(),
            "Built polygon mesh"
        );
        Ok(mesh)
    }

    fn add_vertex(&mut self, v: IVec3, buckets: &mut HashMap<(i32, i32), Vec<u32>>) -> u32 {
        let bucket = buckets.entry((v.x, v.z)).or_default();
        if let Some(&existing) = bucket
            .iter()
            .find(|&&i| (self.vertices[i as usize].y - v.y).abs() <= Self::VERTEX_Y_TOLERANCE)
        {
            return existing;
        }
        let index = self.vertices.len() as u32;
        self.vertices.push(v);
        bucket.push(index);
        index
    }

    /// Converts the mesh to fixed-point world coordinates.
    pub fn to_voxel_mesh(&self) -> VoxelMesh {
        let scale = glam::Vec3A::new(self.cell_size, self.cell_height, self.cell_size);
        VoxelMesh {
            vertices: self
                .vertices
                .iter()
                .map(|v| to_fixed(self.aabb.min + v.as_vec3a() * scale))
                .collect(),
            triangles: self.triangles.clone(),
            areas: self.areas.clone(),
        }
    }
}

/// Ear clips a simple polygon. Returns triangles as indices into `vertices`,
/// or `None` if the polygon is too broken to triangulate.
fn triangulate(vertices: &[IVec3]) -> Option<Vec<[usize; 3]>> {
    let mut indices: Vec<usize> = (0..vertices.len()).collect();
    // Whether the vertex can be clipped off as an ear.
    let mut ear = vec![false; vertices.len()];
    let mut triangles = Vec::with_capacity(vertices.len().saturating_sub(2));

    let mut n = indices.len();
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        ear[i1] = diagonal(i, i2, vertices, &indices);
    }

    while n > 3 {
        let shortest_ear = |valid: &dyn Fn(usize) -> bool| {
            let mut best: Option<(i64, usize)> = None;
            for i in 0..n {
                let i1 = next(i, n);
                if !valid(i) {
                    continue;
                }
                let p0 = vertices[indices[i]];
                let p2 = vertices[indices[next(i1, n)]];
                let dx = (p2.x - p0.x) as i64;
                let dz = (p2.z - p0.z) as i64;
                let len = dx * dx + dz * dz;
                if best.is_none_or(|(min, _)| len < min) {
                    best = Some((len, i));
                }
            }
            best.map(|(_, i)| i)
        };

        let strict = shortest_ear(&|i| ear[next(i, n)]);
        let i = match strict {
            Some(i) => i,
            None => {
                // We might get here because the contour has overlapping segments.
                // Try to recover by loosening up the in-cone test a bit.
                shortest_ear(&|i| diagonal_loose(i, next(next(i, n), n), vertices, &indices))?
            }
        };

        let mut i1 = next(i, n);
        let i2 = next(i1, n);
        triangles.push([indices[i], indices[i1], indices[i2]]);

        // Removes P[i1] by shifting the remaining vertices left one index.
        indices.remove(i1);
        ear.remove(i1);
        n -= 1;
        if i1 >= n {
            i1 = 0;
        }
        let i = prev(i1, n);
        // Update diagonal flags.
        ear[i] = diagonal(prev(i, n), i1, vertices, &indices);
        ear[i1] = diagonal(i, next(i1, n), vertices, &indices);
    }

    // Append the remaining triangle.
    triangles.push([indices[0], indices[1], indices[2]]);
    Some(triangles)
}

#[inline]
fn prev(i: usize, n: usize) -> usize {
    if i == 0 { n - 1 } else { i - 1 }
}

#[inline]
fn next(i: usize, n: usize) -> usize {
    if i + 1 >= n { 0 } else { i + 1 }
}

/// Returns `true` if the diagonal `i -> j` is strictly internal to the polygon.
fn diagonal(i: usize, j: usize, vertices: &[IVec3], indices: &[usize]) -> bool {
    in_cone(i, j, vertices, indices, false) && diagonalie(i, j, vertices, indices, false)
}

fn diagonal_loose(i: usize, j: usize, vertices: &[IVec3], indices: &[usize]) -> bool {
    in_cone(i, j, vertices, indices, true) && diagonalie(i, j, vertices, indices, true)
}

/// Returns `true` if the diagonal `i -> j` lies in the cone of the polygon at vertex `i`.
fn in_cone(i: usize, j: usize, vertices: &[IVec3], indices: &[usize], loose: bool) -> bool {
    let n = indices.len();
    let pi = vertices[indices[i]];
    let pj = vertices[indices[j]];
    let pi1 = vertices[indices[next(i, n)]];
    let pin1 = vertices[indices[prev(i, n)]];

    // If P[i] is a convex vertex [ i+1 right of or on (i-1,i) ].
    if right_or_colinear_xz(pin1, pi, pi1) {
        return if loose {
            right_or_colinear_xz(pi, pj, pin1) && right_or_colinear_xz(pj, pi, pi1)
        } else {
            right_xz(pi, pj, pin1) && right_xz(pj, pi, pi1)
        };
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(right_or_colinear_xz(pi, pj, pi1) && right_or_colinear_xz(pj, pi, pin1))
}

/// Returns `true` if `i -> j` is a proper internal or external diagonal,
/// i.e. it does not cross any edge of the polygon.
fn diagonalie(i: usize, j: usize, vertices: &[IVec3], indices: &[usize], loose: bool) -> bool {
    let n = indices.len();
    let d0 = vertices[indices[i]];
    let d1 = vertices[indices[j]];
    let same_xz = |a: IVec3, b: IVec3| a.x == b.x && a.z == b.z;

    // For each edge (k,k+1) of P
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i or j
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vertices[indices[k]];
        let p1 = vertices[indices[k1]];
        if same_xz(d0, p0) || same_xz(d1, p0) || same_xz(d0, p1) || same_xz(d1, p1) {
            continue;
        }
        let crosses = if loose {
            segments_intersect_properly_xz(d0, d1, p0, p1)
        } else {
            segments_intersect_xz(d0, d1, p0, p1)
        };
        if crosses {
            return false;
        }
    }
    true
}

/// Errors that can occur while building a [`PolygonMesh`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolyMeshError {
    /// Ear clipping found no valid ear for a contour.
    #[error(
        "Failed to triangulate the contour of region {region:?} with {vertices} vertices. Contour simplification is likely too aggressive"
    )]
    TriangulationFailed {
        /// The region of the broken contour.
        region: RegionId,
        /// The vertex count of the broken contour.
        vertices: usize,
    },
    /// The contours have more vertices than a mesh can index.
    #[error("Too many vertices: {count} (max {max})")]
    TooManyVertices {
        /// The total vertex count of the contours.
        count: usize,
        /// The maximum vertex count.
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use crate::{
        BuildContoursFlags, Contour, RegionVertexId,
        compact_heightfield::tests::stepped_compact_heightfield, fixed::is_clockwise_xz,
    };

    use super::*;

    fn polygon(points: &[(i32, i32)]) -> Vec<IVec3> {
        points.iter().map(|&(x, z)| IVec3::new(x, 0, z)).collect()
    }

    fn area2_sum(vertices: &[IVec3], triangles: &[[usize; 3]]) -> i64 {
        triangles
            .iter()
            .map(|t| crate::fixed::cross_xz(vertices[t[0]], vertices[t[1]], vertices[t[2]]))
            .sum()
    }

    #[test]
    fn can_triangulate_convex_polygon() {
        let vertices = polygon(&[(0, 0), (0, 4), (4, 4), (4, 0)]);
        let triangles = triangulate(&vertices).unwrap();
        assert_eq!(triangles.len(), 2);
        for t in &triangles {
            assert!(is_clockwise_xz(vertices[t[0]], vertices[t[1]], vertices[t[2]]));
        }
    }

    #[test]
    fn can_triangulate_concave_polygon() {
        // An L shape, clockwise when seen from above.
        let vertices = polygon(&[(0, 0), (0, 2), (2, 2), (2, 1), (1, 1), (1, 0)]);
        let triangles = triangulate(&vertices).unwrap();
        assert_eq!(triangles.len(), 4);
        // The triangles cover exactly the polygon's area of 3.
        assert_eq!(area2_sum(&vertices, &triangles), -6);
    }

    #[test]
    fn can_build_mesh_from_contours() {
        let mut chf = stepped_compact_heightfield(8, 0.0);
        chf.build_distance_field();
        chf.build_regions(0, 0, 1000).unwrap();
        let mesh = chf
            .build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .into_polygon_mesh()
            .unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.triangles.len(), 2);
        let voxel_mesh = mesh.to_voxel_mesh();
        let max_x = voxel_mesh.vertices.iter().map(|v| v.x).max().unwrap();
        assert_eq!(max_x, 8000);
        for [a, b, c] in &voxel_mesh.triangles {
            let v = &voxel_mesh.vertices;
            assert!(is_clockwise_xz(v[*a as usize], v[*b as usize], v[*c as usize]));
        }
    }

    #[test]
    fn near_vertices_are_welded() {
        let mut mesh = PolygonMesh {
            vertices: Vec::new(),
            triangles: Vec::new(),
            regions: Vec::new(),
            areas: Vec::new(),
            aabb: Aabb3d::default(),
            cell_size: 1.0,
            cell_height: 1.0,
            border_size: 0,
            max_edge_error: 1.0,
        };
        let mut buckets = HashMap::new();
        let a = mesh.add_vertex(IVec3::new(1, 10, 1), &mut buckets);
        let b = mesh.add_vertex(IVec3::new(1, 12, 1), &mut buckets);
        let c = mesh.add_vertex(IVec3::new(1, 13, 1), &mut buckets);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    fn contour_set(vertices: &[IVec3]) -> ContourSet {
        ContourSet {
            contours: vec![Contour {
                vertices: vertices.iter().map(|v| (*v, RegionVertexId::NONE)).collect(),
                region: RegionId::from(1),
                area: AreaType::DEFAULT_WALKABLE,
                ..Default::default()
            }],
            aabb: Aabb3d::default(),
            cell_size: 1.0,
            cell_height: 1.0,
            width: 4,
            depth: 4,
            border_size: 0,
            max_error: 1.3,
        }
    }

    #[test]
    fn inside_out_contour_fails_to_triangulate() {
        // Counter-clockwise, so every vertex looks reflex.
        let vertices = polygon(&[(0, 0), (4, 0), (4, 4), (0, 4)]);
        assert_eq!(triangulate(&vertices), None);
        assert_eq!(
            contour_set(&vertices).into_polygon_mesh(),
            Err(PolyMeshError::TriangulationFailed {
                region: RegionId::from(1),
                vertices: 4
            })
        );
    }

    #[test]
    fn too_many_contour_vertices_is_an_error() {
        let vertices = vec![IVec3::ZERO; PolygonMesh::MAX_VERTICES];
        assert!(matches!(
            contour_set(&vertices).into_polygon_mesh(),
            Err(PolyMeshError::TooManyVertices { count: 0xfffe, .. })
        ));
    }
}
