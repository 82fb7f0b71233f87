//! Fixed-point coordinates and the integer geometry built on top of them.
//!
//! Tiles, cuts and the [`BBTree`](crate::BBTree) all work on [`IVec3`] coordinates scaled by [`PRECISION`].
//! Exact integer equality is what makes vertex deduplication and tile stitching reliable.

use glam::{DVec3, IVec3, Vec3, Vec3A};

/// Number of fixed-point units per world unit.
pub const PRECISION: i32 = 1000;

/// Converts a world-space position to fixed-point coordinates.
#[inline]
pub fn to_fixed(v: Vec3A) -> IVec3 {
    let v = Vec3::from(v) * PRECISION as f32;
    v.round().as_ivec3()
}

/// Converts a world-space scalar to fixed-point units.
#[inline]
pub fn to_fixed_scalar(v: f32) -> i32 {
    (v * PRECISION as f32).round() as i32
}

/// Converts a fixed-point position back to world space.
#[inline]
pub fn to_world(v: IVec3) -> Vec3A {
    Vec3A::from(v.as_dvec3().as_vec3() / PRECISION as f32)
}

/// An integer rectangle on the xz-plane. Bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct IntRect {
    /// The minimum x coordinate.
    pub xmin: i32,
    /// The minimum z coordinate.
    pub zmin: i32,
    /// The maximum x coordinate.
    pub xmax: i32,
    /// The maximum z coordinate.
    pub zmax: i32,
}

impl IntRect {
    /// Creates a new rect. The caller is responsible for `min <= max`.
    pub const fn new(xmin: i32, zmin: i32, xmax: i32, zmax: i32) -> Self {
        Self {
            xmin,
            zmin,
            xmax,
            zmax,
        }
    }

    /// The smallest rect containing all `points`. Returns `None` for no points.
    pub fn from_points(points: impl IntoIterator<Item = IVec3>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let mut rect = Self::new(first.x, first.z, first.x, first.z);
        for p in points {
            rect.xmin = rect.xmin.min(p.x);
            rect.zmin = rect.zmin.min(p.z);
            rect.xmax = rect.xmax.max(p.x);
            rect.zmax = rect.zmax.max(p.z);
        }
        Some(rect)
    }

    /// Returns `true` if the point lies inside or on the edge of the rect.
    #[inline]
    pub fn contains(&self, x: i32, z: i32) -> bool {
        x >= self.xmin && x <= self.xmax && z >= self.zmin && z <= self.zmax
    }

    /// Returns `true` if the rects overlap or touch.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.xmin <= other.xmax
            && self.xmax >= other.xmin
            && self.zmin <= other.zmax
            && self.zmax >= other.zmin
    }

    /// The smallest rect containing both rects.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            xmin: self.xmin.min(other.xmin),
            zmin: self.zmin.min(other.zmin),
            xmax: self.xmax.max(other.xmax),
            zmax: self.zmax.max(other.zmax),
        }
    }

    /// Returns `true` if `other` lies completely inside this rect.
    #[inline]
    pub fn contains_rect(&self, other: &Self) -> bool {
        other.xmin >= self.xmin
            && other.xmax <= self.xmax
            && other.zmin >= self.zmin
            && other.zmax <= self.zmax
    }

    /// The area of the rect.
    #[inline]
    pub fn area(&self) -> i64 {
        (self.xmax - self.xmin) as i64 * (self.zmax - self.zmin) as i64
    }

    /// How much the area grows when `other` is added to this rect.
    #[inline]
    pub fn expansion(&self, other: &Self) -> i64 {
        self.union(other).area() - self.area()
    }

    /// Squared distance on the xz-plane from `p` to the closest point of the rect.
    /// Zero when the point is inside.
    #[inline]
    pub fn distance_sqr_xz(&self, p: IVec3) -> i64 {
        let dx = if p.x < self.xmin {
            self.xmin - p.x
        } else if p.x > self.xmax {
            p.x - self.xmax
        } else {
            0
        } as i64;
        let dz = if p.z < self.zmin {
            self.zmin - p.z
        } else if p.z > self.zmax {
            p.z - self.zmax
        } else {
            0
        } as i64;
        dx * dx + dz * dz
    }
}

/// Twice the signed area of the triangle `a, b, c` on the xz-plane.
/// Negative for clockwise triangles.
#[inline]
pub(crate) fn cross_xz(a: IVec3, b: IVec3, c: IVec3) -> i64 {
    (b.x as i64 - a.x as i64) * (c.z as i64 - a.z as i64)
        - (c.x as i64 - a.x as i64) * (b.z as i64 - a.z as i64)
}

/// Returns `true` if `a, b, c` winds clockwise when seen from above.
#[inline]
pub fn is_clockwise_xz(a: IVec3, b: IVec3, c: IVec3) -> bool {
    cross_xz(a, b, c) < 0
}

/// Returns `true` if `p` is on the right side of the directed line `a -> b` or on the line.
#[inline]
pub(crate) fn right_or_colinear_xz(a: IVec3, b: IVec3, p: IVec3) -> bool {
    cross_xz(a, b, p) <= 0
}

/// Returns `true` if `p` is strictly on the right side of the directed line `a -> b`.
#[inline]
pub(crate) fn right_xz(a: IVec3, b: IVec3, p: IVec3) -> bool {
    cross_xz(a, b, p) < 0
}

#[inline]
pub(crate) fn colinear_xz(a: IVec3, b: IVec3, p: IVec3) -> bool {
    cross_xz(a, b, p) == 0
}

/// Returns `true` if the segments `a -> b` and `c -> d` cross at a point interior to both.
pub(crate) fn segments_intersect_properly_xz(a: IVec3, b: IVec3, c: IVec3, d: IVec3) -> bool {
    // Eliminate improper cases.
    if colinear_xz(a, b, c) || colinear_xz(a, b, d) || colinear_xz(c, d, a) || colinear_xz(c, d, b)
    {
        return false;
    }
    (right_xz(a, b, c) ^ right_xz(a, b, d)) && (right_xz(c, d, a) ^ right_xz(c, d, b))
}

/// Returns `true` if `p` lies on the closed segment `a -> b`.
pub(crate) fn between_xz(a: IVec3, b: IVec3, p: IVec3) -> bool {
    if !colinear_xz(a, b, p) {
        return false;
    }
    // If ab not vertical, check betweenness on x; else on z.
    if a.x != b.x {
        (a.x <= p.x && p.x <= b.x) || (a.x >= p.x && p.x >= b.x)
    } else {
        (a.z <= p.z && p.z <= b.z) || (a.z >= p.z && p.z >= b.z)
    }
}

/// Returns `true` if the segments `a -> b` and `c -> d` touch or cross.
pub(crate) fn segments_intersect_xz(a: IVec3, b: IVec3, c: IVec3, d: IVec3) -> bool {
    segments_intersect_properly_xz(a, b, c, d)
        || between_xz(a, b, c)
        || between_xz(a, b, d)
        || between_xz(c, d, a)
        || between_xz(c, d, b)
}

/// Returns `true` if the clockwise triangle `a, b, c` contains `p` on the xz-plane.
#[inline]
pub fn triangle_contains_xz(a: IVec3, b: IVec3, c: IVec3, p: IVec3) -> bool {
    right_or_colinear_xz(a, b, p) && right_or_colinear_xz(b, c, p) && right_or_colinear_xz(c, a, p)
}

/// Interpolates the height of the triangle's plane at `(x, z)`.
/// Degenerate triangles return the highest corner.
pub(crate) fn barycentric_y(a: IVec3, b: IVec3, c: IVec3, x: i32, z: i32) -> i32 {
    let det = cross_xz(a, b, c);
    if det == 0 {
        return a.y.max(b.y).max(c.y);
    }
    let p = IVec3::new(x, 0, z);
    let det = det as f64;
    let wa = cross_xz(b, c, p) as f64 / det;
    let wb = cross_xz(c, a, p) as f64 / det;
    let wc = 1.0 - wa - wb;
    (wa * a.y as f64 + wb * b.y as f64 + wc * c.y as f64).round() as i32
}

/// Barycentric weights of the point on triangle `a, b, c` closest to `p`.
pub(crate) fn closest_point_on_triangle_weights(
    a: DVec3,
    b: DVec3,
    c: DVec3,
    p: DVec3,
) -> DVec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return DVec3::X;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return DVec3::Y;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return DVec3::new(1.0 - v, v, 0.0);
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return DVec3::Z;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return DVec3::new(1.0 - w, 0.0, w);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return DVec3::new(0.0, 1.0 - w, w);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    DVec3::new(1.0 - v - w, v, w)
}

/// The point on triangle `a, b, c` closest to `p`.
pub fn closest_point_on_triangle(a: IVec3, b: IVec3, c: IVec3, p: IVec3) -> DVec3 {
    let (a, b, c) = (a.as_dvec3(), b.as_dvec3(), c.as_dvec3());
    let w = closest_point_on_triangle_weights(a, b, c, p.as_dvec3());
    a * w.x + b * w.y + c * w.z
}

/// The point on triangle `a, b, c` closest to `p` when only the xz-plane is considered.
/// The returned y lies on the triangle.
pub fn closest_point_on_triangle_xz(a: IVec3, b: IVec3, c: IVec3, p: IVec3) -> DVec3 {
    let flat = |v: IVec3| DVec3::new(v.x as f64, 0.0, v.z as f64);
    let w = closest_point_on_triangle_weights(flat(a), flat(b), flat(c), flat(p));
    a.as_dvec3() * w.x + b.as_dvec3() * w.y + c.as_dvec3() * w.z
}

/// Squared distance between the segments `p1 -> q1` and `p2 -> q2`.
pub(crate) fn segment_segment_distance_sqr(p1: DVec3, q1: DVec3, p2: DVec3, q2: DVec3) -> f64 {
    const EPSILON: f64 = 1e-9;
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    if a <= EPSILON && e <= EPSILON {
        return r.length_squared();
    }
    let (s, t) = if a <= EPSILON {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e <= EPSILON {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            let mut s = if denom != 0.0 {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };
    let c1 = p1 + d1 * s;
    let c2 = p2 + d2 * t;
    (c1 - c2).length_squared()
}

/// Traversal cost between two fixed-point positions: their rounded euclidean distance.
#[inline]
pub fn cost_between(a: IVec3, b: IVec3) -> u32 {
    (b - a).as_dvec3().length().round() as u32
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn can_round_trip_fixed_point() {
        let p = Vec3A::new(1.2346, -0.5, 10.0);
        let fixed = to_fixed(p);
        assert_eq!(fixed, IVec3::new(1235, -500, 10000));
        let back = to_world(fixed);
        assert_relative_eq!(back.x, 1.235, epsilon = 1e-6);
        assert_relative_eq!(back.z, 10.0, epsilon = 1e-6);
    }

    #[test]
    fn clockwise_triangle_contains_its_centroid() {
        let a = IVec3::new(0, 0, 0);
        let b = IVec3::new(0, 0, 100);
        let c = IVec3::new(100, 0, 0);
        assert!(is_clockwise_xz(a, b, c));
        assert!(triangle_contains_xz(a, b, c, IVec3::new(30, 0, 30)));
        assert!(triangle_contains_xz(a, b, c, a));
        assert!(!triangle_contains_xz(a, b, c, IVec3::new(80, 0, 80)));
    }

    #[test]
    fn barycentric_height_follows_slope() {
        let a = IVec3::new(0, 0, 0);
        let b = IVec3::new(0, 0, 1000);
        let c = IVec3::new(1000, 1000, 0);
        assert_eq!(barycentric_y(a, b, c, 500, 0), 500);
        assert_eq!(barycentric_y(a, b, c, 0, 500), 0);
    }

    #[test]
    fn closest_point_is_projected_onto_triangle() {
        let a = IVec3::new(0, 0, 0);
        let b = IVec3::new(0, 0, 1000);
        let c = IVec3::new(1000, 0, 0);
        let p = closest_point_on_triangle(a, b, c, IVec3::new(100, 500, 100));
        assert_relative_eq!(p.x, 100.0);
        assert_relative_eq!(p.y, 0.0);
        assert_relative_eq!(p.z, 100.0);
        let p = closest_point_on_triangle(a, b, c, IVec3::new(-100, 0, -100));
        assert_relative_eq!(p.length(), 0.0);
    }

    #[test]
    fn segment_distance_handles_parallel_segments() {
        let d = segment_segment_distance_sqr(
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(10.0, 0.0, 0.0),
            DVec3::new(0.0, 3.0, 0.0),
            DVec3::new(10.0, 3.0, 0.0),
        );
        assert_relative_eq!(d, 9.0);
    }

    #[test]
    fn segments_touching_at_an_endpoint_intersect_improperly() {
        let a = IVec3::new(0, 0, 0);
        let b = IVec3::new(10, 0, 0);
        let c = IVec3::new(5, 0, 0);
        let d = IVec3::new(5, 0, 5);
        assert!(segments_intersect_xz(a, b, c, d));
        assert!(!segments_intersect_properly_xz(a, b, c, d));
        let e = IVec3::new(5, 0, -5);
        assert!(segments_intersect_properly_xz(a, b, e, d));
        assert!(!segments_intersect_xz(a, b, IVec3::new(0, 0, 1), IVec3::new(10, 0, 1)));
    }

    #[test]
    fn rect_distance_is_zero_inside() {
        let rect = IntRect::new(0, 0, 10, 10);
        assert_eq!(rect.distance_sqr_xz(IVec3::new(5, 99, 5)), 0);
        assert_eq!(rect.distance_sqr_xz(IVec3::new(13, 0, 14)), 9 + 16);
    }
}
