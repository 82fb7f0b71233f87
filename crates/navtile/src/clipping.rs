//! Applies [`NavmeshCut`]s and [`NavmeshAdd`]s to the triangles of one tile.

use std::collections::HashMap;

use geo::{BooleanOps, Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use glam::IVec3;
use rand::Rng;
use spade::{ConstrainedDelaunayTriangulation, Point2, Triangulation};
use thiserror::Error;

use crate::{
    AreaType, NavmeshAdd, NavmeshCut, TileMesh,
    fixed::{IntRect, barycentric_y, cross_xz},
    polygon_clip::clip_polygon_to_rect,
};

/// Collects triangles, merging vertices that are exactly equal.
#[derive(Debug, Default)]
pub(crate) struct MeshBuilder {
    mesh: TileMesh,
    lookup: HashMap<IVec3, u32>,
}

impl MeshBuilder {
    fn vertex(&mut self, v: IVec3) -> u32 {
        *self.lookup.entry(v).or_insert_with(|| {
            self.mesh.vertices.push(v);
            (self.mesh.vertices.len() - 1) as u32
        })
    }

    /// Adds a triangle, turning it clockwise if needed. Degenerate triangles are dropped.
    pub(crate) fn push_triangle(&mut self, corners: [IVec3; 3], area: AreaType, tag: u8) {
        let [a, b, c] = corners;
        let corners = match cross_xz(a, b, c) {
            0 => return,
            cross if cross > 0 => [a, c, b],
            _ => corners,
        };
        let indices = corners.map(|v| self.vertex(v));
        if indices[0] == indices[1] || indices[1] == indices[2] || indices[0] == indices[2] {
            return;
        }
        self.mesh.triangles.push(indices);
        self.mesh.areas.push(area);
        self.mesh.tags.push(tag);
    }

    pub(crate) fn finish(self) -> TileMesh {
        self.mesh
    }
}

/// A triangle of the tile before cutting.
#[derive(Debug, Clone, Copy)]
struct SourceTriangle {
    corners: [IVec3; 3],
    area: AreaType,
    tag: u8,
    added: bool,
}

/// The result of cutting one tile.
#[derive(Debug)]
pub(crate) struct CutOutput {
    pub(crate) mesh: TileMesh,
    /// Whether any cut or addition changed the geometry.
    pub(crate) changed: bool,
}

/// Cuts `mesh`, a tile covering `tile_rect`, with `cuts` and merges in `adds`.
///
/// Returns an error if a polygon could not be triangulated. The caller is expected to retry with
/// [`perturb_cuts`].
pub(crate) fn cut_tile(
    mesh: &TileMesh,
    tile_rect: IntRect,
    cuts: &[NavmeshCut],
    adds: &[&NavmeshAdd],
) -> Result<CutOutput, TriangulationError> {
    let mut sources: Vec<SourceTriangle> = mesh
        .triangles
        .iter()
        .enumerate()
        .map(|(i, t)| SourceTriangle {
            corners: t.map(|v| mesh.vertices[v as usize]),
            area: mesh.areas.get(i).copied().unwrap_or(AreaType::DEFAULT_WALKABLE),
            tag: mesh.tags.get(i).copied().unwrap_or_default(),
            added: false,
        })
        .collect();
    let mut changed = false;

    for add in adds {
        for triangle in &add.triangles {
            let corners = triangle.map(|v| add.vertices[v as usize]);
            let clipped = clip_polygon_to_rect(
                &corners,
                tile_rect.xmin as f64,
                tile_rect.xmax as f64,
                tile_rect.zmin as f64,
                tile_rect.zmax as f64,
            );
            // The clipped polygon is convex, so a fan covers it.
            for i in 1..clipped.len().saturating_sub(1) {
                sources.push(SourceTriangle {
                    corners: [clipped[0], clipped[i], clipped[i + 1]],
                    area: add.area,
                    tag: add.tag,
                    added: true,
                });
                changed = true;
            }
        }
    }

    let cut_polygons: Vec<(Polygon<f64>, Option<IntRect>)> = cuts
        .iter()
        .map(|cut| {
            let ring: Vec<Coord<f64>> = cut
                .contour
                .iter()
                .map(|p| Coord {
                    x: p.x as f64,
                    y: p.z as f64,
                })
                .collect();
            (Polygon::new(LineString::new(ring), Vec::new()), cut.bounds())
        })
        .collect();

    let mut builder = MeshBuilder::default();
    for source in &sources {
        let [a, b, c] = source.corners;
        let Some(rect) = IntRect::from_points(source.corners) else {
            continue;
        };
        let min_y = a.y.min(b.y).min(c.y);
        let max_y = a.y.max(b.y).max(c.y);
        let relevant: Vec<usize> = cuts
            .iter()
            .enumerate()
            .filter(|(i, cut)| {
                cut.contour.len() >= 3
                    && cut_polygons[*i].1.is_some_and(|bounds| bounds.intersects(&rect))
                    && cut.overlaps_y(min_y, max_y)
                    && (!source.added || cut.cuts_added_geom)
            })
            .map(|(i, _)| i)
            .collect();
        if relevant.is_empty() {
            builder.push_triangle(source.corners, source.area, source.tag);
            continue;
        }

        let triangle = polygon_of(&source.corners);
        let mut remaining = MultiPolygon::new(vec![triangle]);
        let mut pieces: Vec<(Polygon<f64>, u8)> = Vec::new();
        for i in relevant {
            let cut = &cuts[i];
            let cut_polygon = &cut_polygons[i].0;
            if cut.dual {
                pieces.extend(
                    remaining
                        .intersection(cut_polygon)
                        .into_iter()
                        .map(|p| (p, cut.tag)),
                );
            }
            remaining = remaining.difference(cut_polygon);
        }
        pieces.extend(remaining.into_iter().map(|p| (p, source.tag)));

        if is_untouched(&pieces, source) {
            builder.push_triangle(source.corners, source.area, source.tag);
            continue;
        }
        changed = true;
        for (polygon, tag) in pieces {
            emit_polygon(&polygon, source, tag, &mut builder)?;
        }
    }

    Ok(CutOutput {
        mesh: builder.finish(),
        changed,
    })
}

/// Jitters every cut vertex by at most one fixed-point unit along x and z.
pub(crate) fn perturb_cuts(cuts: &[NavmeshCut], rng: &mut impl Rng) -> Vec<NavmeshCut> {
    cuts.iter()
        .map(|cut| {
            let mut cut = cut.clone();
            for p in &mut cut.contour {
                p.x += rng.gen_range(-1..=1);
                p.z += rng.gen_range(-1..=1);
            }
            cut
        })
        .collect()
}

fn polygon_of(corners: &[IVec3; 3]) -> Polygon<f64> {
    let ring: Vec<Coord<f64>> = corners
        .iter()
        .map(|p| Coord {
            x: p.x as f64,
            y: p.z as f64,
        })
        .collect();
    Polygon::new(LineString::new(ring), Vec::new())
}

/// Returns `true` if cutting left exactly the source triangle.
fn is_untouched(pieces: &[(Polygon<f64>, u8)], source: &SourceTriangle) -> bool {
    let [(polygon, tag)] = pieces else {
        return false;
    };
    if *tag != source.tag || !polygon.interiors().is_empty() {
        return false;
    }
    let ring = rounded_ring(polygon.exterior());
    ring.len() == 3
        && source
            .corners
            .iter()
            .all(|c| ring.iter().any(|&(x, z)| x == c.x && z == c.z))
}

/// Rounds a ring to fixed-point coordinates and drops the closing point and repeated points.
fn rounded_ring(ring: &LineString<f64>) -> Vec<(i32, i32)> {
    let mut points: Vec<(i32, i32)> = Vec::with_capacity(ring.0.len());
    for coord in &ring.0 {
        let p = (coord.x.round() as i32, coord.y.round() as i32);
        if points.last() != Some(&p) {
            points.push(p);
        }
    }
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

/// Triangulates one piece of a cut triangle. Heights come from the plane of the source triangle.
fn emit_polygon(
    polygon: &Polygon<f64>,
    source: &SourceTriangle,
    tag: u8,
    builder: &mut MeshBuilder,
) -> Result<(), TriangulationError> {
    let [a, b, c] = source.corners;
    let lift = |(x, z): (i32, i32)| IVec3::new(x, barycentric_y(a, b, c, x, z), z);

    let exterior = rounded_ring(polygon.exterior());
    if exterior.len() < 3 {
        return Ok(());
    }
    if polygon.interiors().is_empty() && exterior.len() == 3 {
        let corners = [exterior[0], exterior[1], exterior[2]].map(lift);
        builder.push_triangle(corners, source.area, tag);
        return Ok(());
    }

    let rings: Vec<Vec<(i32, i32)>> = std::iter::once(exterior)
        .chain(polygon.interiors().iter().map(rounded_ring))
        .filter(|ring| ring.len() >= 3)
        .collect();

    let mut cdt = ConstrainedDelaunayTriangulation::<Point2<f64>>::new();
    for ring in &rings {
        let handles = ring
            .iter()
            .map(|&(x, z)| cdt.insert(Point2::new(x as f64, z as f64)))
            .collect::<Result<Vec<_>, _>>()?;
        for i in 0..handles.len() {
            let (from, to) = (handles[i], handles[(i + 1) % handles.len()]);
            if from == to {
                continue;
            }
            if !cdt.can_add_constraint(from, to) {
                return Err(TriangulationError::IntersectingConstraints);
            }
            cdt.add_constraint(from, to);
        }
    }

    // Faces of the triangulation that lie inside the rounded polygon.
    let to_geo = |ring: &Vec<(i32, i32)>| {
        LineString::new(
            ring.iter()
                .map(|&(x, z)| Coord {
                    x: x as f64,
                    y: z as f64,
                })
                .collect(),
        )
    };
    let rounded = Polygon::new(to_geo(&rings[0]), rings[1..].iter().map(to_geo).collect());
    for face in cdt.inner_faces() {
        let positions = face.vertices().map(|v| v.position());
        let centroid = Point::new(
            (positions[0].x + positions[1].x + positions[2].x) / 3.0,
            (positions[0].y + positions[1].y + positions[2].y) / 3.0,
        );
        if !rounded.contains(&centroid) {
            continue;
        }
        let corners = positions.map(|p| lift((p.x.round() as i32, p.y.round() as i32)));
        builder.push_triangle(corners, source.area, tag);
    }
    Ok(())
}

/// A piece of a cut triangle could not be triangulated.
#[derive(Error, Debug)]
pub enum TriangulationError {
    /// A vertex could not be inserted.
    #[error("Failed to insert vertex: {0}")]
    Insertion(#[from] spade::InsertionError),
    /// Rounding made two constraint edges cross.
    #[error("Constraint edges intersect")]
    IntersectingConstraints,
}
