//! Cleans up triangles after cutting: sliver vertices on seams are collapsed, then edges are flipped.

use std::collections::{HashMap, HashSet};

use glam::IVec3;

use crate::{
    TileMesh,
    fixed::{barycentric_y, cross_xz},
};

/// Interior vertices closer than this to the edge between two of their neighbors are collapsed. [Units: fixed point]
const SEAM_TOLERANCE: i64 = 2;

/// Refines a cut tile mesh. Returns the number of collapsed vertices plus the number of flipped edges.
///
/// Interior vertices that lie on the seam between two of their neighbors form sliver triangles. They are
/// collapsed into one of those neighbors. Then the shared edge of two triangles is flipped whenever that
/// strictly increases the smallest angle of the pair, which drives the mesh towards a Delaunay triangulation.
/// Both steps only touch triangles with the same area and tag that lie in one plane, and only apply when
/// the smallest angle strictly increases.
pub(crate) fn refine(mesh: &mut TileMesh) -> usize {
    // Collapses remove vertices and flips strictly improve the sorted angle vector, so this cap is only a guard.
    let max_passes = mesh.triangles.len() * 4 + 1;
    let (mut collapses, mut flips) = (0, 0);
    for _ in 0..max_passes {
        let collapsed = collapse_seams(mesh);
        let flipped = flip_pass(mesh);
        if collapsed + flipped == 0 {
            break;
        }
        collapses += collapsed;
        flips += flipped;
    }
    if collapses + flips > 0 {
        tracing::trace!(collapses, flips, "Refined tile");
    }
    collapses + flips
}

/// Collapses interior vertices that sit on the seam between two neighbors. Returns the number of collapses.
pub(crate) fn collapse_seams(mesh: &mut TileMesh) -> usize {
    let mut incident: Vec<Vec<usize>> = vec![Vec::new(); mesh.vertices.len()];
    let mut edges: HashSet<(u32, u32)> = HashSet::new();
    for (i, t) in mesh.triangles.iter().enumerate() {
        for e in 0..3 {
            incident[t[e] as usize].push(i);
            let (a, b) = (t[e], t[(e + 1) % 3]);
            edges.insert((a.min(b), a.max(b)));
        }
    }

    let mut removed = vec![false; mesh.triangles.len()];
    let mut locked = vec![false; mesh.vertices.len()];
    let mut collapses = 0;
    for v in 0..mesh.vertices.len() {
        if locked[v] {
            continue;
        }
        let Some(collapse) = find_collapse(mesh, v as u32, &incident[v], &edges) else {
            continue;
        };
        for (&t, triangle) in incident[v].iter().zip(&collapse.triangles) {
            match triangle {
                Some(triangle) => mesh.triangles[t] = *triangle,
                None => removed[t] = true,
            }
        }
        for &w in &collapse.ring {
            locked[w as usize] = true;
            edges.insert((w.min(collapse.target), w.max(collapse.target)));
        }
        locked[v] = true;
        collapses += 1;
    }

    if collapses > 0 {
        retain_kept(&mut mesh.triangles, &removed);
        retain_kept(&mut mesh.areas, &removed);
        retain_kept(&mut mesh.tags, &removed);
        remove_unused_vertices(mesh);
    }
    collapses
}

/// A vertex collapse: the replacement of every triangle around the vertex, `None` for removed ones.
struct Collapse {
    target: u32,
    ring: Vec<u32>,
    triangles: Vec<Option<[u32; 3]>>,
}

fn find_collapse(
    mesh: &TileMesh,
    v: u32,
    fan: &[usize],
    edges: &HashSet<(u32, u32)>,
) -> Option<Collapse> {
    if fan.len() < 3 {
        return None;
    }
    let first = fan[0];
    if fan
        .iter()
        .any(|&t| mesh.areas[t] != mesh.areas[first] || mesh.tags[t] != mesh.tags[first])
    {
        return None;
    }

    // The opposite edge of every fan triangle, oriented like the triangle.
    let mut next: HashMap<u32, u32> = HashMap::with_capacity(fan.len());
    for &t in fan {
        let triangle = mesh.triangles[t];
        let k = triangle.iter().position(|&w| w == v)?;
        if next
            .insert(triangle[(k + 1) % 3], triangle[(k + 2) % 3])
            .is_some()
        {
            return None;
        }
    }
    // Only vertices with a closed ring are interior.
    let start = *next.keys().next()?;
    let mut ring = vec![start];
    let mut current = start;
    loop {
        current = *next.get(&current)?;
        if current == start {
            break;
        }
        if ring.len() >= fan.len() {
            return None;
        }
        ring.push(current);
    }
    if ring.len() != fan.len() {
        return None;
    }

    let p = |i: u32| mesh.vertices[i as usize];
    let [a, b, c] = mesh.triangles[first].map(p);
    if std::iter::once(v)
        .chain(ring.iter().copied())
        .any(|w| (barycentric_y(a, b, c, p(w).x, p(w).z) - p(w).y).abs() > 1)
    {
        return None;
    }

    let before = fan
        .iter()
        .map(|&t| min_angle(mesh.triangles[t].map(p)))
        .fold(f64::INFINITY, f64::min);
    let pv = p(v);
    for i in 0..ring.len() {
        let (r0, r1) = (ring[i], ring[(i + 1) % ring.len()]);
        if !on_seam(p(r0), p(r1), pv) {
            continue;
        }
        for target in [r0, r1] {
            let Some(collapse) = collapse_into(mesh, v, target, fan, &ring, edges) else {
                continue;
            };
            let after = collapse
                .triangles
                .iter()
                .flatten()
                .map(|t| min_angle(t.map(p)))
                .fold(f64::INFINITY, f64::min);
            if after > before + 1e-9 {
                return Some(collapse);
            }
        }
    }
    None
}

/// Returns `true` if `p` lies strictly between `a` and `b` and within [`SEAM_TOLERANCE`] of their edge.
fn on_seam(a: IVec3, b: IVec3, p: IVec3) -> bool {
    let (dx, dz) = (b.x as i64 - a.x as i64, b.z as i64 - a.z as i64);
    let len_sqr = dx * dx + dz * dz;
    let dot = (p.x as i64 - a.x as i64) * dx + (p.z as i64 - a.z as i64) * dz;
    if len_sqr == 0 || dot <= 0 || dot >= len_sqr {
        return false;
    }
    let cross = cross_xz(a, b, p) as i128;
    cross * cross <= (SEAM_TOLERANCE * SEAM_TOLERANCE) as i128 * len_sqr as i128
}

/// Moves `v` onto `target`. Fails if a triangle would flip or an edge would be duplicated.
fn collapse_into(
    mesh: &TileMesh,
    v: u32,
    target: u32,
    fan: &[usize],
    ring: &[u32],
    edges: &HashSet<(u32, u32)>,
) -> Option<Collapse> {
    let position = ring.iter().position(|&w| w == target)?;
    let neighbors = [
        ring[(position + 1) % ring.len()],
        ring[(position + ring.len() - 1) % ring.len()],
    ];
    for &w in ring {
        if w != target
            && !neighbors.contains(&w)
            && edges.contains(&(w.min(target), w.max(target)))
        {
            return None;
        }
    }

    let p = |i: u32| mesh.vertices[i as usize];
    let mut triangles = Vec::with_capacity(fan.len());
    for &t in fan {
        let triangle = mesh.triangles[t];
        if triangle.contains(&target) {
            triangles.push(None);
            continue;
        }
        let moved = triangle.map(|w| if w == v { target } else { w });
        if cross_xz(p(moved[0]), p(moved[1]), p(moved[2])) >= 0 {
            return None;
        }
        triangles.push(Some(moved));
    }
    Some(Collapse {
        target,
        ring: ring.to_vec(),
        triangles,
    })
}

fn retain_kept<T>(items: &mut Vec<T>, removed: &[bool]) {
    *items = std::mem::take(items)
        .into_iter()
        .zip(removed)
        .filter(|(_, removed)| !**removed)
        .map(|(item, _)| item)
        .collect();
}

/// Drops vertices no triangle refers to and renumbers the rest.
fn remove_unused_vertices(mesh: &mut TileMesh) {
    let mut used = vec![false; mesh.vertices.len()];
    for t in &mesh.triangles {
        for &v in t {
            used[v as usize] = true;
        }
    }
    let mut remap = vec![0; mesh.vertices.len()];
    let mut vertices = Vec::with_capacity(mesh.vertices.len());
    for (i, v) in mesh.vertices.iter().enumerate() {
        if used[i] {
            remap[i] = vertices.len() as u32;
            vertices.push(*v);
        }
    }
    for t in &mut mesh.triangles {
        *t = t.map(|v| remap[v as usize]);
    }
    mesh.vertices = vertices;
}

fn flip_pass(mesh: &mut TileMesh) -> usize {
    let mut edges: HashMap<(u32, u32), usize> = HashMap::new();
    for (i, t) in mesh.triangles.iter().enumerate() {
        for e in 0..3 {
            edges.insert((t[e], t[(e + 1) % 3]), i);
        }
    }

    let mut touched = vec![false; mesh.triangles.len()];
    let mut flips = 0;
    for t1 in 0..mesh.triangles.len() {
        for e in 0..3 {
            if touched[t1] {
                break;
            }
            let triangle = mesh.triangles[t1];
            let (u, v, c) = (triangle[e], triangle[(e + 1) % 3], triangle[(e + 2) % 3]);
            let Some(&t2) = edges.get(&(v, u)) else {
                continue;
            };
            if t2 <= t1 || touched[t2] {
                continue;
            }
            if mesh.areas[t1] != mesh.areas[t2] || mesh.tags[t1] != mesh.tags[t2] {
                continue;
            }
            let other = mesh.triangles[t2];
            let Some(d) = other.iter().copied().find(|&w| w != u && w != v) else {
                continue;
            };

            let p = |i: u32| mesh.vertices[i as usize];
            let (pu, pv, pc, pd) = (p(u), p(v), p(c), p(d));
            if (barycentric_y(pu, pv, pc, pd.x, pd.z) - pd.y).abs() > 1 {
                continue;
            }
            // Both new triangles must stay clockwise, which fails for non-convex quads.
            if cross_xz(pc, pu, pd) >= 0 || cross_xz(pd, pv, pc) >= 0 {
                continue;
            }
            let before = min_angle([pu, pv, pc]).min(min_angle([pv, pu, pd]));
            let after = min_angle([pc, pu, pd]).min(min_angle([pd, pv, pc]));
            if after <= before + 1e-9 {
                continue;
            }

            mesh.triangles[t1] = [c, u, d];
            mesh.triangles[t2] = [d, v, c];
            touched[t1] = true;
            touched[t2] = true;
            flips += 1;
        }
    }
    flips
}

/// The smallest interior angle of the triangle on the xz-plane, in radians.
fn min_angle(corners: [IVec3; 3]) -> f64 {
    (0..3)
        .map(|i| {
            let p = corners[i].as_dvec3();
            let q = corners[(i + 1) % 3].as_dvec3() - p;
            let r = corners[(i + 2) % 3].as_dvec3() - p;
            let cross = q.x * r.z - q.z * r.x;
            let dot = q.x * r.x + q.z * r.z;
            cross.abs().atan2(dot)
        })
        .fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use crate::AreaType;

    use super::*;

    /// A flat kite split along its long diagonal.
    fn kite() -> TileMesh {
        TileMesh {
            vertices: vec![
                IVec3::new(0, 0, 0),
                IVec3::new(500, 0, 100),
                IVec3::new(1000, 0, 0),
                IVec3::new(500, 0, -100),
            ],
            triangles: vec![[0, 1, 2], [0, 2, 3]],
            areas: vec![AreaType::DEFAULT_WALKABLE; 2],
            tags: vec![0; 2],
        }
    }

    fn has_edge(mesh: &TileMesh, a: u32, b: u32) -> bool {
        mesh.triangles
            .iter()
            .any(|t| t.contains(&a) && t.contains(&b))
    }

    /// A square whose center vertex was pushed onto its left edge, leaving a sliver along that seam.
    fn square_with_seam_vertex() -> TileMesh {
        TileMesh {
            vertices: vec![
                IVec3::new(0, 0, 0),
                IVec3::new(0, 0, 1000),
                IVec3::new(1000, 0, 1000),
                IVec3::new(1000, 0, 0),
                IVec3::new(1, 0, 500),
            ],
            triangles: vec![[0, 1, 4], [1, 2, 4], [2, 3, 4], [3, 0, 4]],
            areas: vec![AreaType::DEFAULT_WALKABLE; 4],
            tags: vec![0; 4],
        }
    }

    fn area(mesh: &TileMesh) -> i64 {
        mesh.triangles
            .iter()
            .map(|t| {
                let [a, b, c] = t.map(|v| mesh.vertices[v as usize]);
                -cross_xz(a, b, c)
            })
            .sum()
    }

    #[test]
    fn can_collapse_sliver_on_seam() {
        let mut mesh = square_with_seam_vertex();
        let before = area(&mesh);
        assert_eq!(collapse_seams(&mut mesh), 1);
        assert_eq!(mesh.triangles.len(), 2);
        assert_eq!(mesh.areas.len(), 2);
        assert_eq!(mesh.vertices.len(), 4);
        assert!(!mesh.vertices.contains(&IVec3::new(1, 0, 500)));
        assert_eq!(area(&mesh), before);
        for t in &mesh.triangles {
            let [a, b, c] = t.map(|v| mesh.vertices[v as usize]);
            assert!(cross_xz(a, b, c) < 0);
            assert!(min_angle([a, b, c]) > 0.5);
        }
        assert_eq!(collapse_seams(&mut mesh), 0);
    }

    #[test]
    fn refine_removes_slivers() {
        let mut mesh = square_with_seam_vertex();
        assert!(refine(&mut mesh) >= 1);
        for t in &mesh.triangles {
            assert!(min_angle(t.map(|v| mesh.vertices[v as usize])) > 0.5);
        }
    }

    #[test]
    fn boundary_vertices_are_not_collapsed() {
        let mut mesh = square_with_seam_vertex();
        // Without the last triangle the ring around the seam vertex is open.
        mesh.triangles.pop();
        mesh.areas.pop();
        mesh.tags.pop();
        assert_eq!(collapse_seams(&mut mesh), 0);
        assert_eq!(mesh.vertices.len(), 5);
    }

    #[test]
    fn vertices_away_from_seams_are_kept() {
        let mut mesh = square_with_seam_vertex();
        mesh.vertices[4] = IVec3::new(500, 0, 500);
        assert_eq!(collapse_seams(&mut mesh), 0);
    }

    #[test]
    fn mixed_tags_are_not_collapsed() {
        let mut mesh = square_with_seam_vertex();
        mesh.tags[2] = 1;
        assert_eq!(collapse_seams(&mut mesh), 0);
    }

    #[test]
    fn can_flip_long_diagonal() {
        let mut mesh = kite();
        assert_eq!(refine(&mut mesh), 1);
        assert!(!has_edge(&mesh, 0, 2));
        assert!(has_edge(&mesh, 1, 3));
        for t in &mesh.triangles {
            let [a, b, c] = t.map(|v| mesh.vertices[v as usize]);
            assert!(cross_xz(a, b, c) < 0);
        }
        // Refining again changes nothing.
        assert_eq!(refine(&mut mesh), 0);
    }

    #[test]
    fn different_tags_are_not_flipped() {
        let mut mesh = kite();
        mesh.tags[1] = 2;
        assert_eq!(refine(&mut mesh), 0);
    }

    #[test]
    fn bent_quads_are_not_flipped() {
        let mut mesh = kite();
        mesh.vertices[3].y = 300;
        assert_eq!(refine(&mut mesh), 0);
    }

    #[test]
    fn concave_quads_are_not_flipped() {
        let mut mesh = kite();
        // Move the lower tip past the end of the long diagonal, making the quad concave there.
        mesh.vertices[3] = IVec3::new(1200, 0, -10);
        let before = mesh.clone();
        refine(&mut mesh);
        assert_eq!(mesh, before);
    }
}
