//! Traces and simplifies the outline of every region into a [`ContourSet`].

use std::collections::BTreeMap;

use glam::IVec3;

use crate::{
    Aabb3d, AreaType, CompactHeightfield, RegionId,
    fixed::{right_or_colinear_xz, right_xz, segments_intersect_xz},
    math::{dir_offset_x, dir_offset_z},
};

impl CompactHeightfield {
    /// Builds simplified contours around every region.
    ///
    /// The raw contours will match the region outlines exactly. The `max_error` and `max_edge_len`
    /// parameters control how closely the simplified contours will match the raw contours.
    ///
    /// Simplified contours are generated such that the vertices for portals between areas match up.
    /// (They are considered mandatory vertices.)
    ///
    /// Setting `max_edge_len` to zero will disable the edge length feature.
    pub fn build_contours(
        &self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: BuildContoursFlags,
    ) -> ContourSet {
        let border_size = self.border_size;
        let mut contour_set = ContourSet {
            contours: Vec::new(),
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: self.width.saturating_sub(border_size * 2),
            depth: self.depth.saturating_sub(border_size * 2),
            border_size,
            max_error,
        };
        if border_size > 0 {
            // If the heightfield was built with a border, remove the offset.
            let pad = border_size as f32 * self.cell_size;
            contour_set.aabb.min.x += pad;
            contour_set.aabb.min.z += pad;
            contour_set.aabb.max.x -= pad;
            contour_set.aabb.max.z -= pad;
        }

        // Mark boundaries.
        let mut flags = vec![0_u8; self.spans.len()];
        for (x, z, i) in self.iter_spans() {
            let region = self.spans[i].region;
            if !region.is_interior() {
                continue;
            }
            let mut connected = 0;
            for dir in 0..4 {
                let neighbor_region = self
                    .neighbor_index(x, z, i, dir)
                    .map(|a_i| self.spans[a_i].region)
                    .unwrap_or(RegionId::NONE);
                if neighbor_region == region {
                    connected |= 1 << dir;
                }
            }
            // Inverse, mark non connected edges.
            flags[i] = connected ^ 0xf;
        }

        let mut raw = Vec::with_capacity(256);
        for (x, z, i) in self.iter_spans() {
            if flags[i] == 0 || flags[i] == 0xf {
                flags[i] = 0;
                continue;
            }
            let region = self.spans[i].region;
            if !region.is_interior() {
                continue;
            }

            raw.clear();
            self.walk_contour(x, z, i, &mut flags, &mut raw);
            let mut simplified = simplify_contour(&raw, max_error, max_edge_len, build_flags);
            remove_degenerate_segments(&mut simplified);

            if simplified.len() < 3 {
                tracing::debug!(?region, "Skipping degenerate contour");
                continue;
            }
            let offset = IVec3::new(border_size as i32, 0, border_size as i32);
            contour_set.contours.push(Contour {
                vertices: simplified.into_iter().map(|(v, r)| (v - offset, r)).collect(),
                raw_vertices: raw.iter().map(|&(v, r)| (v - offset, r)).collect(),
                region,
                area: self.areas[i],
            });
        }

        merge_holes(&mut contour_set.contours);
        contour_set
    }

    fn walk_contour(
        &self,
        mut x: u16,
        mut z: u16,
        mut i: usize,
        flags: &mut [u8],
        points: &mut Vec<(IVec3, RegionVertexId)>,
    ) {
        // Choose the first non-connected edge.
        let mut dir = 0;
        while flags[i] & (1 << dir) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_i = i;
        let area = self.areas[i];

        for _ in 0..40_000 {
            if flags[i] & (1 << dir) != 0 {
                // Choose the edge corner.
                let (p_y, is_border_vertex) = self.corner_height(x, z, i, dir);
                let (p_x, p_z) = match dir {
                    0 => (x, z + 1),
                    1 => (x + 1, z + 1),
                    2 => (x + 1, z),
                    _ => (x, z),
                };
                let mut region = RegionVertexId::NONE;
                if let Some(a_i) = self.neighbor_index(x, z, i, dir) {
                    region = RegionVertexId::from(self.spans[a_i].region);
                    if area != self.areas[a_i] {
                        region |= RegionVertexId::AREA_BORDER;
                    }
                }
                if is_border_vertex {
                    region |= RegionVertexId::BORDER_VERTEX;
                }
                points.push((
                    IVec3::new(p_x as i32, p_y as i32, p_z as i32),
                    region,
                ));

                flags[i] &= !(1 << dir);
                // Rotate clockwise.
                dir = (dir + 1) & 0x3;
            } else {
                let Some(n_i) = self.neighbor_index(x, z, i, dir) else {
                    // The boundary flags guarantee a connection here.
                    tracing::warn!(x, z, "Contour walk hit a missing connection");
                    return;
                };
                x = (x as i32 + dir_offset_x(dir) as i32) as u16;
                z = (z as i32 + dir_offset_z(dir) as i32) as u16;
                i = n_i;
                // Rotate counterclockwise.
                dir = (dir + 3) & 0x3;
            }
            if start_i == i && start_dir == dir {
                break;
            }
        }
    }

    /// Returns the height of the corner of span `i` between `dir` and the next direction,
    /// and whether the corner lies on the border of the tile.
    fn corner_height(&self, x: u16, z: u16, i: usize, dir: u8) -> (u16, bool) {
        let dir_p = (dir + 1) & 0x3;
        let mut height = self.spans[i].y;

        // Combine region and area codes in order to find vertices between two areas on the border.
        let code = |i: usize| self.spans[i].region.bits() as u32 | ((self.areas[i].0 as u32) << 16);
        let mut regs = [0_u32; 4];
        regs[0] = code(i);

        if let Some(a_i) = self.neighbor_index(x, z, i, dir) {
            let a_x = (x as i32 + dir_offset_x(dir) as i32) as u16;
            let a_z = (z as i32 + dir_offset_z(dir) as i32) as u16;
            height = height.max(self.spans[a_i].y);
            regs[1] = code(a_i);
            if let Some(b_i) = self.neighbor_index(a_x, a_z, a_i, dir_p) {
                height = height.max(self.spans[b_i].y);
                regs[2] = code(b_i);
            }
        }
        if let Some(a_i) = self.neighbor_index(x, z, i, dir_p) {
            let a_x = (x as i32 + dir_offset_x(dir_p) as i32) as u16;
            let a_z = (z as i32 + dir_offset_z(dir_p) as i32) as u16;
            height = height.max(self.spans[a_i].y);
            regs[3] = code(a_i);
            if let Some(b_i) = self.neighbor_index(a_x, a_z, a_i, dir) {
                height = height.max(self.spans[b_i].y);
                regs[2] = code(b_i);
            }
        }

        let border = RegionId::BORDER_REGION.bits() as u32;
        let is_border_vertex = (0..4).any(|j| {
            let a = regs[j];
            let b = regs[(j + 1) & 0x3];
            let c = regs[(j + 2) & 0x3];
            let d = regs[(j + 3) & 0x3];
            // Two same exterior cells in a row, followed by two interior cells
            // of the same area, and none of the regions are out of bounds.
            let two_same_exteriors = a & b & border != 0 && a == b;
            let two_interiors = (c | d) & border == 0;
            let interiors_same_area = (c >> 16) == (d >> 16);
            let no_zeros = regs.iter().all(|&r| r != 0);
            two_same_exteriors && two_interiors && interiors_same_area && no_zeros
        });
        (height, is_border_vertex)
    }
}

fn simplify_contour(
    points: &[(IVec3, RegionVertexId)],
    max_error: f32,
    max_edge_len: u16,
    flags: BuildContoursFlags,
) -> Vec<(IVec3, RegionVertexId)> {
    let pn = points.len();
    // Simplified vertex and the index of the raw vertex it came from.
    let mut simplified: Vec<(IVec3, usize)> = Vec::new();
    if pn == 0 {
        return Vec::new();
    }

    let has_connections = points
        .iter()
        .any(|(_, r)| r.region() != RegionId::NONE);
    if has_connections {
        // The contour has some portals to other regions.
        // Add a new point to every location where the region changes.
        for (i, (point, region)) in points.iter().enumerate() {
            let next = points[(i + 1) % pn].1;
            let different_regions = region.region() != next.region();
            let area_borders = region.contains(RegionVertexId::AREA_BORDER)
                != next.contains(RegionVertexId::AREA_BORDER);
            if different_regions || area_borders {
                simplified.push((*point, i));
            }
        }
    }

    if simplified.is_empty() {
        // If there are no connections at all, create some initial points for the simplification process.
        // Find lower-left and upper-right vertices of the contour.
        let mut lower_left = (points[0].0, 0);
        let mut upper_right = lower_left;
        for (i, (p, _)) in points.iter().enumerate() {
            if p.x < lower_left.0.x || (p.x == lower_left.0.x && p.z < lower_left.0.z) {
                lower_left = (*p, i);
            }
            if p.x > upper_right.0.x || (p.x == upper_right.0.x && p.z > upper_right.0.z) {
                upper_right = (*p, i);
            }
        }
        simplified.push(lower_left);
        simplified.push(upper_right);
    }

    // Add points until all raw points are within the error tolerance of the simplified shape.
    let max_error_sqr = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();
        let (mut a, a_i) = simplified[i];
        let (mut b, b_i) = simplified[ii];

        // Traverse the segment in lexicographic order so that the max deviation is
        // calculated similarly when traversing opposite segments.
        let (mut c_i, c_inc, end_i) = if b.x > a.x || (b.x == a.x && b.z > a.z) {
            ((a_i + 1) % pn, 1, b_i)
        } else {
            std::mem::swap(&mut a, &mut b);
            ((b_i + pn - 1) % pn, pn - 1, a_i)
        };

        let mut max: Option<(f32, usize)> = None;
        // Tessellate only outer edges or edges between areas.
        let raw = points[c_i].1;
        if raw.region() == RegionId::NONE || raw.contains(RegionVertexId::AREA_BORDER) {
            while c_i != end_i {
                let d = distance_pt_seg_sqr(points[c_i].0, a, b);
                if max.is_none_or(|(max_d, _)| d > max_d) {
                    max = Some((d, c_i));
                }
                c_i = (c_i + c_inc) % pn;
            }
        }

        // If the max deviation is larger than accepted error, add new point, else continue to next segment.
        match max {
            Some((d, max_i)) if d > max_error_sqr => {
                simplified.insert(i + 1, (points[max_i].0, max_i));
            }
            _ => i += 1,
        }
    }

    // Split too long edges.
    let tessellate_walls = flags.contains(BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES);
    let tessellate_areas = flags.contains(BuildContoursFlags::TESSELLATE_AREA_EDGES);
    if max_edge_len > 0 && (tessellate_walls || tessellate_areas) {
        let max_edge_len_sqr = max_edge_len as i64 * max_edge_len as i64;
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();
            let (a, a_i) = simplified[i];
            let (b, b_i) = simplified[ii];

            let raw = points[(a_i + 1) % pn].1;
            let tessellate = (tessellate_walls && raw.region() == RegionId::NONE)
                || (tessellate_areas && raw.contains(RegionVertexId::AREA_BORDER));

            let mut split = None;
            if tessellate {
                let dx = (b.x - a.x) as i64;
                let dz = (b.z - a.z) as i64;
                if dx * dx + dz * dz > max_edge_len_sqr {
                    // Round based on the segments in lexicographic order so that the
                    // max tesselation is consistent regardless in which direction segments are traversed.
                    let n = if b_i < a_i { b_i + pn - a_i } else { b_i - a_i };
                    if n > 1 {
                        split = Some(if b.x > a.x || (b.x == a.x && b.z > a.z) {
                            (a_i + n / 2) % pn
                        } else {
                            (a_i + n.div_ceil(2)) % pn
                        });
                    }
                }
            }

            match split {
                Some(max_i) => simplified.insert(i + 1, (points[max_i].0, max_i)),
                None => i += 1,
            }
        }
    }

    simplified
        .into_iter()
        .map(|(v, raw_i)| {
            // The edge vertex flag is taken from the current raw point,
            // and the neighbour region is taken from the next raw point.
            let next = points[(raw_i + 1) % pn].1;
            let current = points[raw_i].1;
            let region = (next & (RegionVertexId::REGION_MASK | RegionVertexId::AREA_BORDER))
                | (current & RegionVertexId::BORDER_VERTEX);
            (v, region)
        })
        .collect()
}

fn distance_pt_seg_sqr(p: IVec3, a: IVec3, b: IVec3) -> f32 {
    let pq_x = (b.x - a.x) as f32;
    let pq_z = (b.z - a.z) as f32;
    let mut dx = (p.x - a.x) as f32;
    let mut dz = (p.z - a.z) as f32;
    let d = pq_x * pq_x + pq_z * pq_z;
    let mut t = pq_x * dx + pq_z * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    dx = a.x as f32 + t * pq_x - p.x as f32;
    dz = a.z as f32 + t * pq_z - p.z as f32;
    dx * dx + dz * dz
}

fn remove_degenerate_segments(simplified: &mut Vec<(IVec3, RegionVertexId)>) {
    // Remove adjacent vertices which are equal on the xz-plane,
    // or else the triangulator will get confused.
    let mut i = 0;
    while i < simplified.len() && simplified.len() > 1 {
        let next = (i + 1) % simplified.len();
        let (a, b) = (simplified[i].0, simplified[next].0);
        if a.x == b.x && a.z == b.z {
            simplified.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Twice the signed area of a contour. Positive for outlines, negative for holes.
fn contour_area2(vertices: &[(IVec3, RegionVertexId)]) -> i64 {
    let n = vertices.len();
    (0..n)
        .map(|i| {
            let vi = vertices[i].0;
            let vj = vertices[(i + n - 1) % n].0;
            vi.x as i64 * vj.z as i64 - vj.x as i64 * vi.z as i64
        })
        .sum()
}

/// Merges every hole into the outline of its region.
fn merge_holes(contours: &mut Vec<Contour>) {
    let mut outlines = BTreeMap::new();
    let mut holes: BTreeMap<RegionId, Vec<usize>> = BTreeMap::new();
    for (i, contour) in contours.iter().enumerate() {
        if contour_area2(&contour.vertices) < 0 {
            holes.entry(contour.region).or_default().push(i);
        } else {
            outlines.insert(contour.region, i);
        }
    }
    if holes.is_empty() {
        return;
    }

    for (region, hole_indices) in holes {
        let Some(&outline) = outlines.get(&region) else {
            // The region has holes but no outline.
            // This can happen if the contour becomes self-overlapping because of too aggressive simplification settings.
            tracing::warn!(?region, "Bad outline for region, contour simplification is likely too aggressive");
            continue;
        };
        let hole_vertices = hole_indices
            .iter()
            .map(|&i| std::mem::take(&mut contours[i].vertices))
            .collect();
        merge_region_holes(&mut contours[outline].vertices, hole_vertices);
    }
    contours.retain(|contour| !contour.vertices.is_empty());
}

fn merge_region_holes(
    outline: &mut Vec<(IVec3, RegionVertexId)>,
    holes: Vec<Vec<(IVec3, RegionVertexId)>>,
) {
    // Sort holes from left to right.
    let mut holes: Vec<_> = holes
        .into_iter()
        .map(|hole| {
            let leftmost = leftmost_vertex(&hole);
            (hole, leftmost)
        })
        .collect();
    holes.sort_by_key(|(hole, leftmost)| (hole[*leftmost].0.x, hole[*leftmost].0.z));

    for i in 0..holes.len() {
        let (hole, leftmost) = &holes[i];
        let mut best_vertex = *leftmost;
        let mut merge_index = None;
        for _ in 0..hole.len() {
            // Find potential diagonals.
            // The 'best' vertex must be in the cone described by 3 consecutive vertices of the outline.
            let corner = hole[best_vertex].0;
            let mut diagonals: Vec<(usize, i64)> = (0..outline.len())
                .filter(|&j| in_cone(j, outline, corner))
                .map(|j| {
                    let d = outline[j].0 - corner;
                    (j, d.x as i64 * d.x as i64 + d.z as i64 * d.z as i64)
                })
                .collect();
            diagonals.sort_by_key(|&(_, distance)| distance);

            // Find a diagonal that is not intersecting the outline nor the remaining holes.
            merge_index = diagonals.iter().map(|&(j, _)| j).find(|&j| {
                let pt = outline[j].0;
                !intersect_seg_contour(pt, corner, Some(j), outline)
                    && !holes[i..]
                        .iter()
                        .any(|(other, _)| intersect_seg_contour(pt, corner, None, other))
            });
            if merge_index.is_some() {
                break;
            }
            // All the potential diagonals for the current vertex were intersecting, try next vertex.
            best_vertex = (best_vertex + 1) % hole.len();
        }

        let Some(index) = merge_index else {
            tracing::warn!(vertices = hole.len(), "Failed to find merge points for a contour hole");
            continue;
        };
        let merged: Vec<_> = (0..=outline.len())
            .map(|k| outline[(index + k) % outline.len()])
            .chain((0..=hole.len()).map(|k| hole[(best_vertex + k) % hole.len()]))
            .collect();
        *outline = merged;
    }
}

fn leftmost_vertex(vertices: &[(IVec3, RegionVertexId)]) -> usize {
    let mut best = 0;
    for (i, (v, _)) in vertices.iter().enumerate() {
        let b = vertices[best].0;
        if v.x < b.x || (v.x == b.x && v.z < b.z) {
            best = i;
        }
    }
    best
}

fn in_cone(i: usize, vertices: &[(IVec3, RegionVertexId)], pj: IVec3) -> bool {
    let n = vertices.len();
    let pi = vertices[i].0;
    let pi1 = vertices[(i + 1) % n].0;
    let pin1 = vertices[(i + n - 1) % n].0;
    // If P[i] is a convex vertex [ i+1 right or on (i-1,i) ].
    if right_or_colinear_xz(pin1, pi, pi1) {
        return right_xz(pi, pj, pin1) && right_xz(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    !(right_or_colinear_xz(pi, pj, pi1) && right_or_colinear_xz(pj, pi, pin1))
}

fn intersect_seg_contour(
    d0: IVec3,
    d1: IVec3,
    skip: Option<usize>,
    vertices: &[(IVec3, RegionVertexId)],
) -> bool {
    let n = vertices.len();
    let same_xz = |a: IVec3, b: IVec3| a.x == b.x && a.z == b.z;
    (0..n).any(|k| {
        let k1 = (k + 1) % n;
        // Skip edges incident to i.
        if skip == Some(k) || skip == Some(k1) {
            return false;
        }
        let p0 = vertices[k].0;
        let p1 = vertices[k1].0;
        if same_xz(d0, p0) || same_xz(d1, p0) || same_xz(d0, p1) || same_xz(d1, p1) {
            return false;
        }
        segments_intersect_xz(d0, d1, p0, p1)
    })
}

/// Represents a group of related contours.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourSet {
    /// An array of the contours in the set.
    pub contours: Vec<Contour>,
    /// The AABB in world space
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The width of the set. (Along the x-axis in cell units.)
    pub width: u16,
    /// The depth of the set. (Along the z-axis in cell units.)
    pub depth: u16,
    /// The AABB border size used to generate the source data from which the contours were derived.
    pub border_size: u16,
    /// The max edge error that this contour set was simplified with.
    pub max_error: f32,
}

/// Represents a simple, non-overlapping contour in field space.
///
/// Vertices are `(x, y, z)` in cells with the border removed, plus the region data of the edge they start.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Contour {
    /// Simplified contour vertex and connection data.
    pub vertices: Vec<(IVec3, RegionVertexId)>,
    /// Raw contour vertex and connection data.
    pub raw_vertices: Vec<(IVec3, RegionVertexId)>,
    /// Region ID of the contour.
    pub region: RegionId,
    /// Area type of the contour.
    pub area: AreaType,
}

bitflags::bitflags! {
    /// Region data attached to a contour vertex.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct RegionVertexId: u32 {
        /// No neighbor region.
        const NONE = 0;

        /// Applied to the region id field of contour vertices in order to extract the region id.
        const REGION_MASK = RegionId::MAX.bits() as u32;

        /// Border vertex flag.
        /// If a contour vertex has this bit set, it lies on a tile border and must
        /// stay where it is so that the tile lines up with its neighbors.
        const BORDER_VERTEX = 0x1_0000;

        /// Area border flag.
        /// If a contour vertex has this bit set, it lies on the border between two areas.
        const AREA_BORDER = 0x2_0000;
    }
}

impl RegionVertexId {
    /// The neighbor region of the edge starting at this vertex.
    #[inline]
    pub fn region(&self) -> RegionId {
        RegionId::from((self.bits() & Self::REGION_MASK.bits()) as u16)
    }
}

impl From<RegionId> for RegionVertexId {
    fn from(region_id: RegionId) -> Self {
        RegionVertexId::from_bits_retain(region_id.bits() as u32)
    }
}

bitflags::bitflags! {
    /// Contour build flags used in [`CompactHeightfield::build_contours`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct BuildContoursFlags: u8 {
        /// Tessellate solid (impassable) edges during contour simplification.
        const TESSELLATE_SOLID_WALL_EDGES = 1;
        /// Tessellate edges between areas during contour simplification.
        const TESSELLATE_AREA_EDGES = 2;

        /// Default flags for building contours.
        const DEFAULT = Self::TESSELLATE_SOLID_WALL_EDGES.bits();
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}
