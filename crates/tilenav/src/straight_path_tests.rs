//! Funnel string-pulling tests

use crate::filter::DefaultQueryFilter;
use crate::nav_mesh::{NavMesh, NavMeshParams};
use crate::nav_mesh_builder::{build_tile_blob, TileBuildParams, TilePolygon};
use crate::nav_mesh_query::{
    NavMeshQuery, StraightPathFlags, StraightPathOptions, StraightPathVertex,
};
use crate::status::Status;
use crate::test_mesh_helpers::*;
use crate::tile::PolyFlags;
use crate::PolyRef;

fn localize(query: &NavMeshQuery<'_>, pos: &[f32; 3]) -> (PolyRef, [f32; 3]) {
    let filter = DefaultQueryFilter::default();
    let (status, r, pt) = query.find_nearest_poly(pos, &[0.45, 2.0, 0.45], &filter);
    assert!(status.is_success());
    assert!(!r.is_null(), "no polygon near {pos:?}");
    (r, pt)
}

fn corridor(
    query: &mut NavMeshQuery<'_>,
    start: &[f32; 3],
    end: &[f32; 3],
) -> (Vec<PolyRef>, [f32; 3], [f32; 3]) {
    let filter = DefaultQueryFilter::default();
    let (start_ref, start_pt) = localize(query, start);
    let (end_ref, end_pt) = localize(query, end);
    let mut path = [PolyRef::NULL; 64];
    let (status, n) = query.find_path(start_ref, end_ref, &start_pt, &end_pt, &filter, &mut path);
    assert!(status.is_success());
    assert!(!status.has(Status::PARTIAL_RESULT));
    (path[..n].to_vec(), start_pt, end_pt)
}

#[test]
fn test_single_poly_start_end_only() {
    let mesh = single_poly_mesh();
    let mut query = NavMeshQuery::new(&mesh, 64).unwrap();

    let start = [1.0, 0.0, 1.0];
    let end = [9.0, 0.0, 9.0];
    let (path, start_pt, end_pt) = corridor(&mut query, &start, &end);
    assert_eq!(path.len(), 1);

    let mut out = [StraightPathVertex::default(); 8];
    let (status, n) = query.find_straight_path(
        &start_pt,
        &end_pt,
        &path,
        StraightPathOptions::empty(),
        &mut out,
    );
    assert!(status.is_success());
    assert_eq!(n, 2);
    assert_eq!(out[0].flags, StraightPathFlags::START);
    assert_eq!(out[0].poly, path[0]);
    assert_eq!(out[1].flags, StraightPathFlags::END);
    assert!(out[1].poly.is_null());
    assert_eq!(out[0].pos, start_pt);
    assert_eq!(out[1].pos, end_pt);
}

#[test]
fn test_straight_corridor_collapses() {
    let mesh = corridor_mesh(2);
    let mut query = NavMeshQuery::new(&mesh, 64).unwrap();

    let (path, start_pt, end_pt) = corridor(&mut query, &[0.5, 0.0, 0.5], &[1.5, 0.0, 0.5]);
    assert_eq!(path.len(), 2);

    let mut out = [StraightPathVertex::default(); 8];
    let (status, n) = query.find_straight_path(
        &start_pt,
        &end_pt,
        &path,
        StraightPathOptions::empty(),
        &mut out,
    );
    assert!(status.is_success());
    // The funnel collapses: no intermediate vertex on a straight corridor.
    assert_eq!(n, 2);
    assert_eq!(out[0].flags, StraightPathFlags::START);
    assert_eq!(out[1].flags, StraightPathFlags::END);
}

#[test]
fn test_l_shape_emits_inner_corner() {
    let mesh = l_shape_mesh();
    let mut query = NavMeshQuery::new(&mesh, 64).unwrap();

    let (path, start_pt, end_pt) = corridor(&mut query, &[2.0, 0.0, 5.0], &[15.0, 0.0, 18.0]);
    assert_eq!(path.len(), 3);

    let mut out = [StraightPathVertex::default(); 8];
    let (status, n) = query.find_straight_path(
        &start_pt,
        &end_pt,
        &path,
        StraightPathOptions::empty(),
        &mut out,
    );
    assert!(status.is_success());
    assert_eq!(n, 3, "exactly one interior vertex");

    // The interior vertex sits on the concave corner.
    assert!((out[1].pos[0] - 10.0).abs() < 1e-3);
    assert!((out[1].pos[2] - 10.0).abs() < 1e-3);
    assert_eq!(out[1].flags, StraightPathFlags::empty());
    assert!(!out[1].poly.is_null());

    // The polyline is no longer than walking around the corner the long way.
    let d = |a: &[f32; 3], b: &[f32; 3]| {
        ((a[0] - b[0]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
    };
    let pulled = d(&out[0].pos, &out[1].pos) + d(&out[1].pos, &out[2].pos);
    let via_centers = d(&start_pt, &[15.0, 0.0, 5.0]) + d(&[15.0, 0.0, 5.0], &end_pt);
    assert!(pulled < via_centers);
}

#[test]
fn test_all_crossings_emits_every_portal() {
    let mesh = corridor_mesh(4);
    let mut query = NavMeshQuery::new(&mesh, 64).unwrap();

    let (path, start_pt, end_pt) = corridor(&mut query, &[0.5, 0.0, 0.5], &[3.5, 0.0, 0.5]);
    assert_eq!(path.len(), 4);

    let mut out = [StraightPathVertex::default(); 16];
    let (status, n) = query.find_straight_path(
        &start_pt,
        &end_pt,
        &path,
        StraightPathOptions::ALL_CROSSINGS,
        &mut out,
    );
    assert!(status.is_success());
    // Start, one vertex per portal, end.
    assert_eq!(n, path.len() + 1);

    // Portal crossings carry the polygon they enter.
    for (i, v) in out[1..n - 1].iter().enumerate() {
        assert_eq!(v.poly, path[i + 1]);
        assert!((v.pos[0] - (i as f32 + 1.0)).abs() < 1e-3);
    }
}

#[test]
fn test_area_crossings_only_at_area_changes() {
    // Four unit squares in a row; the third has a different area id.
    let mut params = TileBuildParams {
        x: 0,
        y: 0,
        layer: 0,
        user_id: 0,
        verts: Vec::new(),
        polys: Vec::new(),
        off_mesh_cons: Vec::new(),
        walkable_height: 2.0,
        walkable_radius: 0.6,
        walkable_climb: 0.9,
        bmin: [0.0, -1.0, 0.0],
        bmax: [4.0, 1.0, 1.0],
        build_bv_tree: true,
    };
    for x in 0..=4 {
        params.verts.push([x as f32, 0.0, 0.0]);
        params.verts.push([x as f32, 0.0, 1.0]);
    }
    for i in 0..4u16 {
        params.polys.push(TilePolygon {
            verts: vec![2 * i, 2 * i + 1, 2 * i + 3, 2 * i + 2],
            flags: PolyFlags::WALK,
            area: if i == 2 { 1 } else { 0 },
        });
    }
    let mut mesh = NavMesh::new(&NavMeshParams {
        origin: [0.0, 0.0, 0.0],
        tile_width: 4.0,
        tile_height: 4.0,
        max_tiles: 1,
        max_polys: 8,
    })
    .unwrap();
    mesh.add_tile(&build_tile_blob(&params).unwrap()).unwrap();

    let mut query = NavMeshQuery::new(&mesh, 64).unwrap();
    let (path, start_pt, end_pt) = corridor(&mut query, &[0.5, 0.0, 0.5], &[3.5, 0.0, 0.5]);
    assert_eq!(path.len(), 4);

    let mut out = [StraightPathVertex::default(); 16];
    let (status, n) = query.find_straight_path(
        &start_pt,
        &end_pt,
        &path,
        StraightPathOptions::AREA_CROSSINGS,
        &mut out,
    );
    assert!(status.is_success());
    // Start, area change into poly 2, area change out of it, end.
    assert_eq!(n, 4);
    assert!((out[1].pos[0] - 2.0).abs() < 1e-3);
    assert!((out[2].pos[0] - 3.0).abs() < 1e-3);
}

#[test]
fn test_start_on_portal_is_skipped() {
    let mesh = corridor_mesh(2);
    let mut query = NavMeshQuery::new(&mesh, 64).unwrap();
    let filter = DefaultQueryFilter::default();

    let (start_ref, _) = localize(&query, &[0.9, 0.0, 0.5]);
    let (end_ref, end_pt) = localize(&query, &[1.5, 0.0, 0.5]);

    // Start exactly on the shared edge at x = 1.
    let start_pt = [1.0, 0.0, 0.5];
    let mut path = [PolyRef::NULL; 8];
    let (status, n) = query.find_path(start_ref, end_ref, &start_pt, &end_pt, &filter, &mut path);
    assert!(status.is_success());

    let mut out = [StraightPathVertex::default(); 8];
    let (status, count) = query.find_straight_path(
        &start_pt,
        &end_pt,
        &path[..n],
        StraightPathOptions::empty(),
        &mut out,
    );
    assert!(status.is_success());
    assert_eq!(count, 2);
    assert_eq!(out[0].flags, StraightPathFlags::START);
    assert_eq!(out[1].flags, StraightPathFlags::END);
}

#[test]
fn test_stale_corridor_returns_partial() {
    let mut mesh = tile_row_mesh(3, 10.0);
    let path;
    let start_pt;
    let end_pt;
    {
        let mut query = NavMeshQuery::new(&mesh, 64).unwrap();
        let (p, s, e) = corridor(&mut query, &[5.0, 0.0, 5.0], &[25.0, 0.0, 5.0]);
        path = p;
        start_pt = s;
        end_pt = e;
    }
    assert_eq!(path.len(), 3);

    // Invalidate the middle corridor polygon by unloading its tile.
    mesh.remove_tile(path[1]).unwrap();

    let query = NavMeshQuery::new(&mesh, 64).unwrap();
    let mut out = [StraightPathVertex::default(); 8];
    let (status, n) = query.find_straight_path(
        &start_pt,
        &end_pt,
        &path,
        StraightPathOptions::empty(),
        &mut out,
    );
    assert!(status.is_success());
    assert!(status.has(Status::PARTIAL_RESULT));
    assert_eq!(n, 2);
    // The end is clamped onto the last reachable polygon's boundary.
    assert!((out[n - 1].pos[0] - 10.0).abs() < 1e-3);

    // A stale final polygon is an input error instead.
    let (status, _) = query.find_straight_path(
        &start_pt,
        &end_pt,
        &path[..2],
        StraightPathOptions::empty(),
        &mut out,
    );
    assert!(status.is_failure());
}

#[test]
fn test_straight_path_buffer_too_small() {
    let mesh = l_shape_mesh();
    let mut query = NavMeshQuery::new(&mesh, 64).unwrap();

    let (path, start_pt, end_pt) = corridor(&mut query, &[2.0, 0.0, 5.0], &[15.0, 0.0, 18.0]);

    let mut out = [StraightPathVertex::default(); 2];
    let (status, n) = query.find_straight_path(
        &start_pt,
        &end_pt,
        &path,
        StraightPathOptions::empty(),
        &mut out,
    );
    assert!(status.is_success());
    assert!(status.has(Status::BUFFER_TOO_SMALL));
    assert_eq!(n, 2);
    // Filled from the start onward.
    assert_eq!(out[0].flags, StraightPathFlags::START);
}

#[test]
fn test_invalid_inputs_rejected() {
    let mesh = single_poly_mesh();
    let query = NavMeshQuery::new(&mesh, 64).unwrap();

    let mut out = [StraightPathVertex::default(); 8];
    let (status, n) = query.find_straight_path(
        &[0.0, 0.0, 0.0],
        &[1.0, 0.0, 1.0],
        &[],
        StraightPathOptions::empty(),
        &mut out,
    );
    assert!(status.is_failure());
    assert!(status.has(Status::INVALID_PARAM));
    assert_eq!(n, 0);

    let (status, _) = query.find_straight_path(
        &[f32::NAN, 0.0, 0.0],
        &[1.0, 0.0, 1.0],
        &[PolyRef::new(1)],
        StraightPathOptions::empty(),
        &mut out,
    );
    assert!(status.is_failure());

    let (status, _) = query.find_straight_path(
        &[0.0, 0.0, 0.0],
        &[1.0, 0.0, 1.0],
        &[PolyRef::NULL],
        StraightPathOptions::empty(),
        &mut out,
    );
    assert!(status.is_failure());
}

#[test]
fn test_off_mesh_vertex_flagged() {
    let mesh = off_mesh_connection_mesh(true);
    let mut query = NavMeshQuery::new(&mesh, 64).unwrap();

    let (path, start_pt, end_pt) = corridor(&mut query, &[2.0, 0.0, 5.0], &[8.0, 0.0, 5.0]);
    assert_eq!(path.len(), 3);

    let mut out = [StraightPathVertex::default(); 8];
    let (status, n) = query.find_straight_path(
        &start_pt,
        &end_pt,
        &path,
        StraightPathOptions::empty(),
        &mut out,
    );
    assert!(status.is_success());

    // One vertex enters the off-mesh connection.
    let flagged = out[..n]
        .iter()
        .filter(|v| v.flags.contains(StraightPathFlags::OFFMESH_CONNECTION))
        .count();
    assert_eq!(flagged, 1);
}
