//! In-memory tile construction
//!
//! Turns schematic polygon soup into the binary tile blobs the mesh ingests:
//! derives internal adjacency from shared edges, tags tile-border edges with
//! their portal side, appends off-mesh connection polygons, triangulates a
//! detail fan per polygon and optionally builds the quantized BV tree.

use std::collections::HashMap;

use log::debug;

use crate::binary_format::encode_tile;
use crate::tile::{
    BvNode, Link, MeshHeader, MeshTile, OffMeshConnection, Poly, PolyDetail, PolyFlags, PolyType,
    EXT_LINK, NULL_LINK, VERTS_PER_POLYGON,
};
use tilenav_common::{clamp, Error, Result};

/// Tolerance when testing whether an edge lies on the tile border
const BORDER_EPS: f32 = 0.001;

/// One walkable polygon of a tile under construction
#[derive(Debug, Clone)]
pub struct TilePolygon {
    /// Vertex indices, counter-clockwise, 3..=6 entries
    pub verts: Vec<u16>,
    pub flags: PolyFlags,
    pub area: u8,
}

/// One off-mesh connection of a tile under construction
#[derive(Debug, Clone)]
pub struct OffMeshParams {
    pub start: [f32; 3],
    pub end: [f32; 3],
    pub rad: f32,
    /// OFFMESH_CON_BIDIR for two-way traversal
    pub con_flags: u8,
    pub area: u8,
    pub poly_flags: PolyFlags,
}

/// Everything needed to build one tile blob
#[derive(Debug, Clone)]
pub struct TileBuildParams {
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    pub user_id: u32,
    /// World-space vertex positions
    pub verts: Vec<[f32; 3]>,
    pub polys: Vec<TilePolygon>,
    pub off_mesh_cons: Vec<OffMeshParams>,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    /// Tile bounding box; border edges are detected against it
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub build_bv_tree: bool,
}

/// Builds a binary tile blob from schematic data
pub fn build_tile_blob(params: &TileBuildParams) -> Result<Vec<u8>> {
    if params.polys.is_empty() {
        return Err(Error::InvalidParam("tile has no polygons"));
    }
    if params.verts.len() > u16::MAX as usize {
        return Err(Error::InvalidParam("too many vertices for a tile"));
    }
    for poly in &params.polys {
        if poly.verts.len() < 3 || poly.verts.len() > VERTS_PER_POLYGON {
            return Err(Error::InvalidParam("polygon vertex count out of range"));
        }
        if poly.verts.iter().any(|&v| v as usize >= params.verts.len()) {
            return Err(Error::InvalidParam("polygon vertex index out of range"));
        }
    }

    let ground_count = params.polys.len();
    let con_count = params.off_mesh_cons.len();

    // Flatten vertices; off-mesh endpoints are appended after the mesh verts.
    let mut verts: Vec<f32> = Vec::with_capacity((params.verts.len() + con_count * 2) * 3);
    for v in &params.verts {
        verts.extend_from_slice(v);
    }

    let mut polys = Vec::with_capacity(ground_count + con_count);
    for p in &params.polys {
        let mut poly = Poly {
            first_link: NULL_LINK,
            verts: [0; VERTS_PER_POLYGON],
            neis: [0; VERTS_PER_POLYGON],
            flags: p.flags,
            vert_count: p.verts.len() as u8,
            area_and_type: Poly::pack_area_and_type(p.area, PolyType::Ground),
        };
        for (i, &v) in p.verts.iter().enumerate() {
            poly.verts[i] = v;
        }
        polys.push(poly);
    }

    derive_neighbours(&mut polys[..ground_count], params);

    // Off-mesh connection polygons and records.
    let mut off_mesh_cons = Vec::with_capacity(con_count);
    for con in &params.off_mesh_cons {
        let v0 = (verts.len() / 3) as u16;
        verts.extend_from_slice(&con.start);
        verts.extend_from_slice(&con.end);

        let mut poly = Poly {
            first_link: NULL_LINK,
            verts: [0; VERTS_PER_POLYGON],
            neis: [0; VERTS_PER_POLYGON],
            flags: con.poly_flags,
            vert_count: 2,
            area_and_type: Poly::pack_area_and_type(con.area, PolyType::OffMeshConnection),
        };
        poly.verts[0] = v0;
        poly.verts[1] = v0 + 1;
        let poly_index = polys.len() as u16;
        polys.push(poly);

        let mut pos = [0.0f32; 6];
        pos[..3].copy_from_slice(&con.start);
        pos[3..].copy_from_slice(&con.end);
        off_mesh_cons.push(OffMeshConnection {
            pos,
            rad: con.rad,
            poly: poly_index,
            flags: con.con_flags,
            side: classify_off_mesh_point(&con.end, &params.bmin, &params.bmax),
            area: con.area,
        });
    }

    // Detail fan per ground polygon, indexing the polygon's own vertices.
    let mut detail_meshes = Vec::with_capacity(ground_count);
    let mut detail_tris: Vec<u8> = Vec::new();
    for poly in &polys[..ground_count] {
        let nv = poly.vert_count as usize;
        let tri_base = (detail_tris.len() / 4) as u32;
        for k in 1..nv - 1 {
            let mut flags = 0u8;
            if k == 1 {
                flags |= 1; // edge (0, 1) lies on the ring
            }
            flags |= 1 << 2; // edge (k, k+1) lies on the ring
            if k + 1 == nv - 1 {
                flags |= 1 << 4; // edge (nv-1, 0) lies on the ring
            }
            detail_tris.extend_from_slice(&[0, k as u8, (k + 1) as u8, flags]);
        }
        detail_meshes.push(PolyDetail {
            vert_base: 0,
            tri_base,
            vert_count: 0,
            tri_count: (nv - 2) as u8,
        });
    }

    let bv_tree = if params.build_bv_tree {
        build_bv_tree(&polys[..ground_count], &verts, &params.bmin, &params.bmax)
    } else {
        Vec::new()
    };

    // Generous link pool: one per internal edge, four per portal edge for
    // multiple partial matches, four per off-mesh connection.
    let mut max_link_count = con_count as i32 * 4;
    for poly in &polys[..ground_count] {
        for j in 0..poly.vert_count as usize {
            if poly.neis[j] & EXT_LINK != 0 {
                max_link_count += 4;
            } else if poly.neis[j] != 0 {
                max_link_count += 1;
            }
        }
    }

    let quant_extent = (params.bmax[0] - params.bmin[0])
        .max(params.bmax[1] - params.bmin[1])
        .max(params.bmax[2] - params.bmin[2])
        .max(f32::EPSILON);

    let header = MeshHeader {
        x: params.x,
        y: params.y,
        layer: params.layer,
        user_id: params.user_id,
        poly_count: polys.len() as i32,
        vert_count: (verts.len() / 3) as i32,
        max_link_count,
        detail_mesh_count: detail_meshes.len() as i32,
        detail_vert_count: 0,
        detail_tri_count: (detail_tris.len() / 4) as i32,
        bv_node_count: bv_tree.len() as i32,
        off_mesh_con_count: con_count as i32,
        off_mesh_base: ground_count as i32,
        walkable_height: params.walkable_height,
        walkable_radius: params.walkable_radius,
        walkable_climb: params.walkable_climb,
        bmin: params.bmin,
        bmax: params.bmax,
        bv_quant_factor: 65535.0 / quant_extent,
    };

    let tile = MeshTile {
        header: Some(header),
        verts,
        polys,
        links: vec![Link::free(NULL_LINK); max_link_count as usize],
        detail_meshes,
        detail_tris,
        off_mesh_cons,
        bv_tree,
        ..Default::default()
    };

    debug!(
        "built tile ({}, {}) layer {}: {} polys, {} off-mesh connections, {} bv nodes",
        params.x,
        params.y,
        params.layer,
        tile.polys.len(),
        con_count,
        tile.bv_tree.len()
    );

    encode_tile(&tile)
}

/// Fills each polygon's neighbour slots: shared edges become internal
/// neighbours, unshared edges on the tile border become portal edges
fn derive_neighbours(polys: &mut [Poly], params: &TileBuildParams) {
    // Map an undirected edge to the polygons using it.
    let mut edge_users: HashMap<(u16, u16), Vec<(usize, usize)>> = HashMap::new();
    for (pi, poly) in polys.iter().enumerate() {
        let nv = poly.vert_count as usize;
        for j in 0..nv {
            let a = poly.verts[j];
            let b = poly.verts[(j + 1) % nv];
            let key = (a.min(b), a.max(b));
            edge_users.entry(key).or_default().push((pi, j));
        }
    }

    for users in edge_users.values() {
        if users.len() == 2 {
            let (pa, ea) = users[0];
            let (pb, eb) = users[1];
            polys[pa].neis[ea] = pb as u16 + 1;
            polys[pb].neis[eb] = pa as u16 + 1;
        }
    }

    // Unmatched edges lying on the tile border become portals.
    for poly in polys.iter_mut() {
        let nv = poly.vert_count as usize;
        for j in 0..nv {
            if poly.neis[j] != 0 {
                continue;
            }
            let a = params.verts[poly.verts[j] as usize];
            let b = params.verts[poly.verts[(j + 1) % nv] as usize];
            if let Some(side) = border_side(&a, &b, &params.bmin, &params.bmax) {
                poly.neis[j] = EXT_LINK | side as u16;
            }
        }
    }
}

/// Side of the tile border an edge lies on, if any
fn border_side(a: &[f32; 3], b: &[f32; 3], bmin: &[f32; 3], bmax: &[f32; 3]) -> Option<u8> {
    if (a[0] - bmax[0]).abs() < BORDER_EPS && (b[0] - bmax[0]).abs() < BORDER_EPS {
        Some(0)
    } else if (a[2] - bmax[2]).abs() < BORDER_EPS && (b[2] - bmax[2]).abs() < BORDER_EPS {
        Some(2)
    } else if (a[0] - bmin[0]).abs() < BORDER_EPS && (b[0] - bmin[0]).abs() < BORDER_EPS {
        Some(4)
    } else if (a[2] - bmin[2]).abs() < BORDER_EPS && (b[2] - bmin[2]).abs() < BORDER_EPS {
        Some(6)
    } else {
        None
    }
}

/// Classifies where an off-mesh endpoint lies relative to the tile bounds,
/// returning the boundary side or 0xff when inside
fn classify_off_mesh_point(pt: &[f32; 3], bmin: &[f32; 3], bmax: &[f32; 3]) -> u8 {
    const XP: u8 = 1 << 0;
    const ZP: u8 = 1 << 1;
    const XM: u8 = 1 << 2;
    const ZM: u8 = 1 << 3;

    let mut outcode = 0u8;
    if pt[0] >= bmax[0] {
        outcode |= XP;
    }
    if pt[2] >= bmax[2] {
        outcode |= ZP;
    }
    if pt[0] < bmin[0] {
        outcode |= XM;
    }
    if pt[2] < bmin[2] {
        outcode |= ZM;
    }

    match outcode {
        x if x == XP => 0,
        x if x == XP | ZP => 1,
        x if x == ZP => 2,
        x if x == ZP | XM => 3,
        x if x == XM => 4,
        x if x == XM | ZM => 5,
        x if x == ZM => 6,
        x if x == ZM | XP => 7,
        _ => 0xff,
    }
}

/// Item bounds used while building the BV tree
#[derive(Clone, Copy)]
struct BvItem {
    bmin: [u16; 3],
    bmax: [u16; 3],
    i: i32,
}

/// Builds the quantized BV tree over the ground polygons in skip-pointer
/// layout
fn build_bv_tree(polys: &[Poly], verts: &[f32], bmin: &[f32; 3], bmax: &[f32; 3]) -> Vec<BvNode> {
    if polys.is_empty() {
        return Vec::new();
    }

    let extent = (bmax[0] - bmin[0])
        .max(bmax[1] - bmin[1])
        .max(bmax[2] - bmin[2])
        .max(f32::EPSILON);
    let qfac = 65535.0 / extent;

    let mut items: Vec<BvItem> = Vec::with_capacity(polys.len());
    for (i, poly) in polys.iter().enumerate() {
        let mut pmin = [f32::MAX; 3];
        let mut pmax = [f32::MIN; 3];
        for j in 0..poly.vert_count as usize {
            let vi = poly.verts[j] as usize;
            for axis in 0..3 {
                pmin[axis] = pmin[axis].min(verts[vi * 3 + axis]);
                pmax[axis] = pmax[axis].max(verts[vi * 3 + axis]);
            }
        }
        let q = |v: f32, axis: usize| clamp((v - bmin[axis]) * qfac, 0.0, 65535.0);
        items.push(BvItem {
            bmin: [
                q(pmin[0], 0).floor() as u16,
                q(pmin[1], 1).floor() as u16,
                q(pmin[2], 2).floor() as u16,
            ],
            bmax: [
                q(pmax[0], 0).ceil() as u16,
                q(pmax[1], 1).ceil() as u16,
                q(pmax[2], 2).ceil() as u16,
            ],
            i: i as i32,
        });
    }

    let mut nodes = Vec::with_capacity(items.len() * 2);
    subdivide(&mut items, 0, polys.len(), &mut nodes);
    nodes
}

fn subdivide(items: &mut [BvItem], imin: usize, imax: usize, nodes: &mut Vec<BvNode>) {
    let inum = imax - imin;
    let icur = nodes.len();

    if inum == 1 {
        let item = items[imin];
        nodes.push(BvNode {
            bmin: item.bmin,
            bmax: item.bmax,
            i: item.i,
        });
        return;
    }

    // Inner node spanning all items of the range.
    let mut bmin = [u16::MAX; 3];
    let mut bmax = [0u16; 3];
    for item in &items[imin..imax] {
        for axis in 0..3 {
            bmin[axis] = bmin[axis].min(item.bmin[axis]);
            bmax[axis] = bmax[axis].max(item.bmax[axis]);
        }
    }
    nodes.push(BvNode { bmin, bmax, i: 0 });

    // Split the longest axis at the median.
    let spans = [
        bmax[0] - bmin[0],
        bmax[1] - bmin[1],
        bmax[2] - bmin[2],
    ];
    let axis = if spans[1] > spans[0] && spans[1] >= spans[2] {
        1
    } else if spans[2] > spans[0] {
        2
    } else {
        0
    };
    items[imin..imax].sort_by_key(|item| item.bmin[axis]);
    let isplit = imin + inum / 2;

    subdivide(items, imin, isplit, nodes);
    subdivide(items, isplit, imax, nodes);

    let iescape = (nodes.len() - icur) as i32;
    nodes[icur].i = -iescape;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary_format::decode_tile;

    fn square_grid_params(n: usize, cell: f32) -> TileBuildParams {
        // (n+1)^2 vertices forming an n x n grid of square polygons at y=0.
        let mut verts = Vec::new();
        for z in 0..=n {
            for x in 0..=n {
                verts.push([x as f32 * cell, 0.0, z as f32 * cell]);
            }
        }
        let stride = (n + 1) as u16;
        let mut polys = Vec::new();
        for z in 0..n as u16 {
            for x in 0..n as u16 {
                let v0 = z * stride + x;
                polys.push(TilePolygon {
                    verts: vec![v0, v0 + stride, v0 + stride + 1, v0 + 1],
                    flags: PolyFlags::WALK,
                    area: 0,
                });
            }
        }
        TileBuildParams {
            x: 0,
            y: 0,
            layer: 0,
            user_id: 0,
            verts,
            polys,
            off_mesh_cons: Vec::new(),
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.9,
            bmin: [0.0, -1.0, 0.0],
            bmax: [n as f32 * cell, 1.0, n as f32 * cell],
            build_bv_tree: true,
        }
    }

    #[test]
    fn test_grid_adjacency() {
        let blob = build_tile_blob(&square_grid_params(3, 1.0)).unwrap();
        let tile = decode_tile(&blob).unwrap();
        assert_eq!(tile.polys.len(), 9);

        // The middle polygon (index 4) has all four internal neighbours.
        let mid = &tile.polys[4];
        let mut internal = 0;
        for j in 0..mid.vert_count as usize {
            let nei = mid.neis[j];
            assert_eq!(nei & EXT_LINK, 0);
            if nei != 0 {
                internal += 1;
            }
        }
        assert_eq!(internal, 4);

        // The corner polygon (index 0) has two border edges.
        let corner = &tile.polys[0];
        let border = (0..corner.vert_count as usize)
            .filter(|&j| corner.neis[j] & EXT_LINK != 0)
            .count();
        assert_eq!(border, 2);
    }

    #[test]
    fn test_bv_tree_covers_all_polys() {
        let blob = build_tile_blob(&square_grid_params(4, 2.0)).unwrap();
        let tile = decode_tile(&blob).unwrap();
        let leaves = tile.bv_tree.iter().filter(|n| n.i >= 0).count();
        assert_eq!(leaves, 16);

        // Escape offsets must stay inside the array.
        for (i, node) in tile.bv_tree.iter().enumerate() {
            if node.i < 0 {
                assert!(i + (-node.i) as usize <= tile.bv_tree.len());
            }
        }
    }

    #[test]
    fn test_off_mesh_records() {
        let mut params = square_grid_params(2, 1.0);
        params.off_mesh_cons.push(OffMeshParams {
            start: [0.5, 0.0, 0.5],
            end: [1.5, 0.0, 1.5],
            rad: 0.5,
            con_flags: crate::tile::OFFMESH_CON_BIDIR,
            area: 0,
            poly_flags: PolyFlags::WALK,
        });
        let blob = build_tile_blob(&params).unwrap();
        let tile = decode_tile(&blob).unwrap();
        let header = tile.header.unwrap();

        assert_eq!(header.off_mesh_con_count, 1);
        assert_eq!(header.off_mesh_base, 4);
        assert_eq!(tile.polys.len(), 5);
        assert_eq!(tile.polys[4].poly_type(), PolyType::OffMeshConnection);
        // Both endpoints inside the tile: side is 0xff.
        assert_eq!(tile.off_mesh_cons[0].side, 0xff);
        assert!(tile.off_mesh_cons[0].is_bidirectional());
    }

    #[test]
    fn test_classify_off_mesh_point() {
        let bmin = [0.0, 0.0, 0.0];
        let bmax = [10.0, 1.0, 10.0];
        assert_eq!(classify_off_mesh_point(&[11.0, 0.0, 5.0], &bmin, &bmax), 0);
        assert_eq!(classify_off_mesh_point(&[5.0, 0.0, 11.0], &bmin, &bmax), 2);
        assert_eq!(classify_off_mesh_point(&[-1.0, 0.0, 5.0], &bmin, &bmax), 4);
        assert_eq!(classify_off_mesh_point(&[5.0, 0.0, -1.0], &bmin, &bmax), 6);
        assert_eq!(classify_off_mesh_point(&[11.0, 0.0, 11.0], &bmin, &bmax), 1);
        assert_eq!(classify_off_mesh_point(&[5.0, 0.0, 5.0], &bmin, &bmax), 0xff);
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut params = square_grid_params(2, 1.0);
        params.polys[0].verts = vec![0, 1];
        assert!(build_tile_blob(&params).is_err());

        let mut params = square_grid_params(2, 1.0);
        params.polys.clear();
        assert!(build_tile_blob(&params).is_err());

        let mut params = square_grid_params(2, 1.0);
        params.polys[0].verts = vec![0, 1, 200];
        assert!(build_tile_blob(&params).is_err());
    }
}
