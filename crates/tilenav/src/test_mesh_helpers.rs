//! Schematic navigation meshes shared by the test suites

use crate::nav_mesh::{NavMesh, NavMeshParams};
use crate::nav_mesh_builder::{build_tile_blob, OffMeshParams, TileBuildParams, TilePolygon};
use crate::tile::{PolyFlags, OFFMESH_CON_BIDIR};

/// Default agent parameters used by every helper tile
fn base_params(x: i32, y: i32, bmin: [f32; 3], bmax: [f32; 3]) -> TileBuildParams {
    TileBuildParams {
        x,
        y,
        layer: 0,
        user_id: 0,
        verts: Vec::new(),
        polys: Vec::new(),
        off_mesh_cons: Vec::new(),
        walkable_height: 2.0,
        walkable_radius: 0.6,
        walkable_climb: 0.9,
        bmin,
        bmax,
        build_bv_tree: true,
    }
}

fn mesh_params(tile_size: f32, max_tiles: i32, max_polys: i32) -> NavMeshParams {
    NavMeshParams {
        origin: [0.0, 0.0, 0.0],
        tile_width: tile_size,
        tile_height: tile_size,
        max_tiles,
        max_polys,
    }
}

/// Quad with the winding the engine expects: interior to the right of each
/// directed edge
pub fn quad(v0: u16, v1: u16, v2: u16, v3: u16) -> TilePolygon {
    TilePolygon {
        verts: vec![v0, v1, v2, v3],
        flags: PolyFlags::WALK,
        area: 0,
    }
}

/// One tile, one square polygon covering x, z in [0, 10] at y = 0
pub fn single_poly_mesh() -> NavMesh {
    let mut params = base_params(0, 0, [0.0, -1.0, 0.0], [10.0, 1.0, 10.0]);
    params.verts = vec![
        [0.0, 0.0, 0.0],
        [0.0, 0.0, 10.0],
        [10.0, 0.0, 10.0],
        [10.0, 0.0, 0.0],
    ];
    params.polys = vec![quad(0, 1, 2, 3)];

    let mut mesh = NavMesh::new(&mesh_params(10.0, 1, 8)).unwrap();
    mesh.add_tile(&build_tile_blob(&params).unwrap()).unwrap();
    mesh
}

/// One tile with an n x n grid of unit squares
pub fn grid_mesh(n: usize, cell: f32) -> NavMesh {
    let side = n as f32 * cell;
    let mut params = base_params(0, 0, [0.0, -1.0, 0.0], [side, 1.0, side]);
    for z in 0..=n {
        for x in 0..=n {
            params.verts.push([x as f32 * cell, 0.0, z as f32 * cell]);
        }
    }
    let stride = (n + 1) as u16;
    for z in 0..n as u16 {
        for x in 0..n as u16 {
            let v0 = z * stride + x;
            params.polys.push(quad(v0, v0 + stride, v0 + stride + 1, v0 + 1));
        }
    }

    let mut mesh = NavMesh::new(&mesh_params(side, 1, (n * n) as i32)).unwrap();
    mesh.add_tile(&build_tile_blob(&params).unwrap()).unwrap();
    mesh
}

/// Three squares forming an L: A at x 0..10, B east of it, C north of B.
/// The concave inner corner sits at (10, 0, 10).
pub fn l_shape_mesh() -> NavMesh {
    let mut params = base_params(0, 0, [0.0, -1.0, 0.0], [20.0, 1.0, 20.0]);
    params.verts = vec![
        [0.0, 0.0, 0.0],   // 0
        [0.0, 0.0, 10.0],  // 1
        [10.0, 0.0, 10.0], // 2
        [10.0, 0.0, 0.0],  // 3
        [20.0, 0.0, 0.0],  // 4
        [20.0, 0.0, 10.0], // 5
        [10.0, 0.0, 20.0], // 6
        [20.0, 0.0, 20.0], // 7
    ];
    params.polys = vec![quad(0, 1, 2, 3), quad(3, 2, 5, 4), quad(2, 6, 7, 5)];

    let mut mesh = NavMesh::new(&mesh_params(20.0, 1, 8)).unwrap();
    mesh.add_tile(&build_tile_blob(&params).unwrap()).unwrap();
    mesh
}

/// Two disconnected squares in one tile: A at x 0..4, B at x 6..10
pub fn two_component_mesh() -> NavMesh {
    let mut params = base_params(0, 0, [0.0, -1.0, 0.0], [10.0, 1.0, 10.0]);
    params.verts = vec![
        [0.0, 0.0, 0.0],
        [0.0, 0.0, 10.0],
        [4.0, 0.0, 10.0],
        [4.0, 0.0, 0.0],
        [6.0, 0.0, 0.0],
        [6.0, 0.0, 10.0],
        [10.0, 0.0, 10.0],
        [10.0, 0.0, 0.0],
    ];
    params.polys = vec![quad(0, 1, 2, 3), quad(4, 5, 6, 7)];

    let mut mesh = NavMesh::new(&mesh_params(10.0, 1, 8)).unwrap();
    mesh.add_tile(&build_tile_blob(&params).unwrap()).unwrap();
    mesh
}

/// Like `two_component_mesh`, plus an off-mesh connection bridging the gap
pub fn off_mesh_connection_mesh(bidirectional: bool) -> NavMesh {
    let mut params = base_params(0, 0, [0.0, -1.0, 0.0], [10.0, 1.0, 10.0]);
    params.verts = vec![
        [0.0, 0.0, 0.0],
        [0.0, 0.0, 10.0],
        [4.0, 0.0, 10.0],
        [4.0, 0.0, 0.0],
        [6.0, 0.0, 0.0],
        [6.0, 0.0, 10.0],
        [10.0, 0.0, 10.0],
        [10.0, 0.0, 0.0],
    ];
    params.polys = vec![quad(0, 1, 2, 3), quad(4, 5, 6, 7)];
    params.off_mesh_cons = vec![OffMeshParams {
        start: [3.0, 0.0, 5.0],
        end: [7.0, 0.0, 5.0],
        rad: 1.0,
        con_flags: if bidirectional { OFFMESH_CON_BIDIR } else { 0 },
        area: 0,
        poly_flags: PolyFlags::WALK,
    }];

    let mut mesh = NavMesh::new(&mesh_params(10.0, 1, 8)).unwrap();
    mesh.add_tile(&build_tile_blob(&params).unwrap()).unwrap();
    mesh
}

/// One long tile with `n` unit squares in a row along x
pub fn corridor_mesh(n: usize) -> NavMesh {
    let mut params = base_params(0, 0, [0.0, -1.0, 0.0], [n as f32, 1.0, 1.0]);
    for x in 0..=n {
        params.verts.push([x as f32, 0.0, 0.0]);
        params.verts.push([x as f32, 0.0, 1.0]);
    }
    for i in 0..n as u16 {
        // Vertices 2i:(x,0) 2i+1:(x,1) 2i+2:(x+1,0) 2i+3:(x+1,1)
        params.polys.push(quad(2 * i, 2 * i + 1, 2 * i + 3, 2 * i + 2));
    }

    let mut mesh = NavMesh::new(&NavMeshParams {
        origin: [0.0, 0.0, 0.0],
        tile_width: n as f32,
        tile_height: n as f32,
        max_tiles: 1,
        max_polys: n as i32,
    })
    .unwrap();
    mesh.add_tile(&build_tile_blob(&params).unwrap()).unwrap();
    mesh
}

/// Two square tiles of the given size side by side, sharing the boundary at
/// x = tile_size, each holding one polygon
pub fn two_tile_mesh(tile_size: f32) -> NavMesh {
    tile_row_mesh(2, tile_size)
}

/// A west-to-east row of square single-polygon tiles
pub fn tile_row_mesh(count: i32, tile_size: f32) -> NavMesh {
    let mut mesh = NavMesh::new(&mesh_params(tile_size, count.max(4), 8)).unwrap();

    for tx in 0..count {
        let ox = tx as f32 * tile_size;
        let mut params = base_params(
            tx,
            0,
            [ox, -1.0, 0.0],
            [ox + tile_size, 1.0, tile_size],
        );
        params.verts = vec![
            [ox, 0.0, 0.0],
            [ox, 0.0, tile_size],
            [ox + tile_size, 0.0, tile_size],
            [ox + tile_size, 0.0, 0.0],
        ];
        params.polys = vec![quad(0, 1, 2, 3)];
        mesh.add_tile(&build_tile_blob(&params).unwrap()).unwrap();
    }
    mesh
}

/// A 2x1 arrangement of grid tiles: each tile is an n x n grid of squares
pub fn two_tile_grid_mesh(n: usize, cell: f32) -> NavMesh {
    let side = n as f32 * cell;
    let mut mesh = NavMesh::new(&mesh_params(side, 4, (n * n) as i32)).unwrap();

    for tx in 0..2 {
        let ox = tx as f32 * side;
        let mut params = base_params(tx, 0, [ox, -1.0, 0.0], [ox + side, 1.0, side]);
        for z in 0..=n {
            for x in 0..=n {
                params
                    .verts
                    .push([ox + x as f32 * cell, 0.0, z as f32 * cell]);
            }
        }
        let stride = (n + 1) as u16;
        for z in 0..n as u16 {
            for x in 0..n as u16 {
                let v0 = z * stride + x;
                params.polys.push(quad(v0, v0 + stride, v0 + stride + 1, v0 + 1));
            }
        }
        mesh.add_tile(&build_tile_blob(&params).unwrap()).unwrap();
    }
    mesh
}
