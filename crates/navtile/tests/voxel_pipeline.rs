//! Runs the voxel pipeline step by step on small hand-made levels.

use std::collections::{BTreeMap, BTreeSet};

use glam::{IVec3, UVec3, Vec2, Vec3A};
use navtile::{
    Aabb3d, AreaType, BuildContoursFlags, CompactHeightfield, ConvexVolume, HeightfieldBuilder,
    NavmeshConfig, NavmeshConfigBuilder, RegionId, TriMesh,
};

/// A 10×10 floor with a 1.6×1.5×1.6 box standing in its middle.
fn floor_with_cube() -> TriMesh {
    let mut trimesh = TriMesh {
        vertices: vec![
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 10.0),
            Vec3A::new(10.0, 0.0, 10.0),
            Vec3A::new(10.0, 0.0, 0.0),
        ],
        indices: vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
        area_types: vec![AreaType::DEFAULT_WALKABLE; 2],
    };
    trimesh.extend(cube(Vec3A::new(4.2, 0.0, 4.2), Vec3A::new(5.8, 1.5, 5.8)));
    trimesh
}

fn cube(min: Vec3A, max: Vec3A) -> TriMesh {
    let vertices: Vec<Vec3A> = (0..8)
        .map(|i| {
            Vec3A::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            )
        })
        .collect();
    // Every face as two triangles. The top face winds so that its normal points up.
    let quads = [
        [2, 6, 7, 3],
        [0, 1, 5, 4],
        [0, 4, 6, 2],
        [1, 3, 7, 5],
        [0, 2, 3, 1],
        [4, 5, 7, 6],
    ];
    let indices: Vec<UVec3> = quads
        .iter()
        .flat_map(|[a, b, c, d]| [UVec3::new(*a, *b, *c), UVec3::new(*a, *c, *d)])
        .collect();
    TriMesh {
        area_types: vec![AreaType::DEFAULT_WALKABLE; indices.len()],
        vertices,
        indices,
    }
}

fn config() -> NavmeshConfig {
    NavmeshConfigBuilder {
        cell_size: 0.25,
        cell_height: 0.2,
        agent_radius: 0.5,
        region_merge_size: 40.0,
        aabb: Aabb3d::new([0.0, -1.0, 0.0], [10.0, 3.0, 10.0]),
        ..Default::default()
    }
    .build()
}

fn compact_heightfield(trimesh: &TriMesh, config: &NavmeshConfig) -> CompactHeightfield {
    let mut trimesh = trimesh.clone();
    trimesh.clear_unwalkable_triangles(config.walkable_slope_angle);

    let mut heightfield = HeightfieldBuilder {
        aabb: config.aabb,
        cell_size: config.cell_size,
        cell_height: config.cell_height,
    }
    .build()
    .unwrap();
    heightfield
        .rasterize_triangles(&trimesh, config.walkable_climb)
        .unwrap();
    heightfield.filter_low_hanging_walkable_obstacles(config.walkable_climb);
    heightfield.filter_ledge_spans(config.walkable_height, config.walkable_climb);
    heightfield.filter_walkable_low_height_spans(config.walkable_height);

    let mut compact = heightfield
        .into_compact(config.walkable_height, config.walkable_climb)
        .unwrap();
    compact.erode_walkable_area(config.walkable_radius);
    for volume in &config.area_volumes {
        compact.mark_convex_poly_area(volume);
    }
    compact.build_distance_field();
    compact
}

fn interior_regions(compact: &CompactHeightfield) -> BTreeSet<RegionId> {
    compact
        .spans
        .iter()
        .map(|span| span.region)
        .filter(RegionId::is_interior)
        .collect()
}

/// Even-odd test on the xz-plane. `x` and `z` must not lie on a vertex row.
fn contains(polygon: &[IVec3], x: f32, z: f32) -> bool {
    let mut inside = false;
    for i in 0..polygon.len() {
        let a = polygon[i].as_vec3();
        let b = polygon[(i + 1) % polygon.len()].as_vec3();
        if (a.z > z) != (b.z > z) && x < a.x + (z - a.z) / (b.z - a.z) * (b.x - a.x) {
            inside = !inside;
        }
    }
    inside
}

#[test]
fn floor_around_a_cube_is_one_region() {
    let config = config();
    let mut compact = compact_heightfield(&floor_with_cube(), &config);
    compact
        .build_regions(0, config.min_region_area, config.merge_region_area)
        .unwrap();

    assert_eq!(interior_regions(&compact).len(), 1);
    assert_eq!(compact.max_region, RegionId::from(1));

    // No span under the cube is walkable.
    let cube_min = ((4.2 / config.cell_size) as u16) + 1;
    let cube_max = (5.8 / config.cell_size) as u16 - 1;
    for (x, z, i) in compact.iter_spans() {
        let under_cube = (cube_min..=cube_max).contains(&x) && (cube_min..=cube_max).contains(&z);
        if under_cube && compact.spans[i].y < 3 {
            assert_eq!(compact.spans[i].region, RegionId::NONE, "({x}, {z})");
        }
    }
}

#[test]
fn contour_excludes_the_cube() {
    let config = config();
    let mut compact = compact_heightfield(&floor_with_cube(), &config);
    compact
        .build_regions(0, config.min_region_area, config.merge_region_area)
        .unwrap();
    let contours = compact.build_contours(
        config.max_simplification_error,
        config.max_edge_len,
        BuildContoursFlags::DEFAULT,
    );

    // The hole around the cube is merged into the outline of the floor.
    assert_eq!(contours.contours.len(), 1);
    let outline: Vec<IVec3> = contours.contours[0]
        .vertices
        .iter()
        .map(|(v, _)| *v)
        .collect();
    let to_cell = |world: f32| world / config.cell_size;
    assert!(!contains(&outline, to_cell(5.0) + 0.5, to_cell(5.0) + 0.5));
    assert!(contains(&outline, to_cell(2.0) + 0.5, to_cell(2.0) + 0.5));
    assert!(contains(&outline, to_cell(8.0) + 0.5, to_cell(5.0) + 0.5));

    let mesh = contours.into_polygon_mesh().unwrap().to_voxel_mesh();
    assert!(!mesh.triangles.is_empty());
}

#[test]
fn regions_never_mix_area_types() {
    let config = NavmeshConfig {
        area_volumes: vec![ConvexVolume {
            vertices: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(0.0, 10.0),
                Vec2::new(5.0, 10.0),
                Vec2::new(5.0, 0.0),
            ],
            min_y: -1.0,
            max_y: 1.0,
            area: AreaType(1),
        }],
        ..config()
    };
    let mut compact = compact_heightfield(&floor_with_cube(), &config);
    compact
        .build_regions(0, config.min_region_area, config.merge_region_area)
        .unwrap();

    let mut areas_by_region: BTreeMap<RegionId, BTreeSet<AreaType>> = BTreeMap::new();
    for (i, span) in compact.spans.iter().enumerate() {
        if span.region.is_interior() {
            areas_by_region
                .entry(span.region)
                .or_default()
                .insert(compact.areas[i]);
        }
    }
    assert!(areas_by_region.len() >= 2);
    for (region, areas) in areas_by_region {
        assert_eq!(areas.len(), 1, "{region:?} mixes {areas:?}");
    }
}

#[test]
fn building_regions_twice_gives_the_same_result() {
    let config = config();
    let mut compact = compact_heightfield(&floor_with_cube(), &config);
    compact
        .build_regions(0, config.min_region_area, config.merge_region_area)
        .unwrap();
    let first: Vec<RegionId> = compact.spans.iter().map(|span| span.region).collect();
    compact
        .build_regions(0, config.min_region_area, config.merge_region_area)
        .unwrap();
    let second: Vec<RegionId> = compact.spans.iter().map(|span| span.region).collect();
    assert_eq!(first, second);
}
