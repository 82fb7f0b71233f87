//! Clipping of convex polygons against axis-aligned half-planes.
//!
//! The same routine is used with float vertices during rasterization and with fixed-point
//! vertices when added geometry is cut to a tile's footprint.

use glam::{IVec3, Vec3A};

/// A vertex that can be clipped by [`clip_polygon`].
pub trait ClipVertex: Copy {
    /// Returns the coordinate along `axis` (0 = x, 1 = y, 2 = z).
    fn coordinate(&self, axis: usize) -> f64;

    /// Linearly interpolates towards `other`.
    fn lerp_to(self, other: Self, t: f64) -> Self;
}

impl ClipVertex for Vec3A {
    #[inline]
    fn coordinate(&self, axis: usize) -> f64 {
        self[axis] as f64
    }

    #[inline]
    fn lerp_to(self, other: Self, t: f64) -> Self {
        self + (other - self) * t as f32
    }
}

impl ClipVertex for IVec3 {
    #[inline]
    fn coordinate(&self, axis: usize) -> f64 {
        self[axis] as f64
    }

    #[inline]
    fn lerp_to(self, other: Self, t: f64) -> Self {
        let a = self.as_dvec3();
        let b = other.as_dvec3();
        (a + (b - a) * t).round().as_ivec3()
    }
}

/// Clips `input` so that only the part where `multi * v[axis] + offset >= 0` remains.
///
/// The result is written to `output`, which is cleared first.
/// Vertex order is preserved, so a clockwise input stays clockwise.
pub fn clip_polygon<V: ClipVertex>(
    input: &[V],
    output: &mut Vec<V>,
    multi: f64,
    offset: f64,
    axis: usize,
) {
    output.clear();
    let n = input.len();
    if n == 0 {
        return;
    }
    for i in 0..n {
        let j = (i + n - 1) % n;
        let dist_i = multi * input[i].coordinate(axis) + offset;
        let dist_j = multi * input[j].coordinate(axis) + offset;
        let inside_i = dist_i >= 0.0;
        let inside_j = dist_j >= 0.0;
        if inside_i != inside_j {
            let t = dist_j / (dist_j - dist_i);
            output.push(input[j].lerp_to(input[i], t));
        }
        if inside_i {
            output.push(input[i]);
        }
    }
}

/// Clips `input` to the xz-rectangle `[min_x, max_x] × [min_z, max_z]`.
pub fn clip_polygon_to_rect<V: ClipVertex>(
    input: &[V],
    min_x: f64,
    max_x: f64,
    min_z: f64,
    max_z: f64,
) -> Vec<V> {
    let mut a = input.to_vec();
    let mut b = Vec::with_capacity(input.len() + 4);
    clip_polygon(&a, &mut b, 1.0, -min_x, 0);
    clip_polygon(&b, &mut a, -1.0, max_x, 0);
    clip_polygon(&a, &mut b, 1.0, -min_z, 2);
    clip_polygon(&b, &mut a, -1.0, max_z, 2);
    a
}
