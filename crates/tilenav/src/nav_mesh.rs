//! Navigation mesh: tile slot table and cross-tile polygon graph
//!
//! Tiles arrive as binary blobs and are stitched greedily into the link
//! graph as they are installed: internal edges first, then off-mesh
//! connection anchoring, then external edges against every already-present
//! tile in the same cell and the eight neighbouring cells.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use crate::binary_format::decode_tile;
use crate::poly_ref::{PolyRef, MAX_POLY_INDEX, MAX_TILE_INDEX};
use crate::tile::{
    MeshTile, Poly, PolyType, EXT_LINK, DETAIL_EDGE_BOUNDARY, NULL_LINK, NULL_SLOT,
    VERTS_PER_POLYGON, detail_tri_edge_flags,
};
use tilenav_common::{
    clamp, closest_height_point_triangle, dist_point_segment_sqr_2d, opposite_tile,
    overlap_bounds, overlap_quant_bounds, point_in_polygon_2d, sqr, vdist, vdist_2d_sqr, vlerp,
    vmax_mut, vmin_mut, Error, Result,
};

/// Most polygons a bounded in-tile query will report
const MAX_POLYS_PER_TILE_QUERY: usize = 128;

/// Most connecting polygons a single external edge can record
const MAX_CONNECTING_POLYS: usize = 4;

/// Navigation mesh initialization parameters
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshParams {
    /// World-space origin of the tile grid
    pub origin: [f32; 3],
    /// Width of each tile along the x axis
    pub tile_width: f32,
    /// Height of each tile along the z axis
    pub tile_height: f32,
    /// Capacity of the tile slot table
    pub max_tiles: i32,
    /// Maximum polygons a single tile may carry
    pub max_polys: i32,
}

impl NavMeshParams {
    /// Size of the serialized parameter record
    pub const SERIALIZED_SIZE: usize = 28;

    /// Decodes the 28-byte little-endian parameter record
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SERIALIZED_SIZE {
            return Err(Error::BadFormat(format!(
                "navmesh params record is {} bytes, expected {}",
                data.len(),
                Self::SERIALIZED_SIZE
            )));
        }
        Ok(Self {
            origin: [
                LittleEndian::read_f32(&data[0..]),
                LittleEndian::read_f32(&data[4..]),
                LittleEndian::read_f32(&data[8..]),
            ],
            tile_width: LittleEndian::read_f32(&data[12..]),
            tile_height: LittleEndian::read_f32(&data[16..]),
            max_tiles: LittleEndian::read_i32(&data[20..]),
            max_polys: LittleEndian::read_i32(&data[24..]),
        })
    }

    /// Encodes the 28-byte little-endian parameter record
    pub fn to_bytes(&self) -> [u8; Self::SERIALIZED_SIZE] {
        let mut out = [0u8; Self::SERIALIZED_SIZE];
        LittleEndian::write_f32(&mut out[0..], self.origin[0]);
        LittleEndian::write_f32(&mut out[4..], self.origin[1]);
        LittleEndian::write_f32(&mut out[8..], self.origin[2]);
        LittleEndian::write_f32(&mut out[12..], self.tile_width);
        LittleEndian::write_f32(&mut out[16..], self.tile_height);
        LittleEndian::write_i32(&mut out[20..], self.max_tiles);
        LittleEndian::write_i32(&mut out[24..], self.max_polys);
        out
    }
}

/// A link queued for insertion during a stitching pass
struct PendingLink {
    poly: usize,
    target: PolyRef,
    edge: u8,
    side: u8,
    bmin: u8,
    bmax: u8,
}

/// Navigation mesh
pub struct NavMesh {
    params: NavMeshParams,
    /// Fixed-capacity tile slot table
    tiles: Vec<MeshTile>,
    /// Maps a grid cell to the head of its slot chain (layers)
    pos_lookup: HashMap<(i32, i32), u32>,
    /// Head of the free slot list
    free_list: u32,
}

impl NavMesh {
    /// Creates a navigation mesh with an empty slot table
    pub fn new(params: &NavMeshParams) -> Result<Self> {
        if !params.origin.iter().all(|v| v.is_finite()) {
            return Err(Error::InvalidParam("navmesh origin is not finite"));
        }
        if !(params.tile_width > 0.0 && params.tile_width.is_finite())
            || !(params.tile_height > 0.0 && params.tile_height.is_finite())
        {
            return Err(Error::InvalidParam("tile dimensions must be positive"));
        }
        if params.max_tiles <= 0 || params.max_tiles as u32 > MAX_TILE_INDEX + 1 {
            return Err(Error::InvalidParam("max_tiles out of range"));
        }
        if params.max_polys <= 0 || params.max_polys as u32 > MAX_POLY_INDEX + 1 {
            return Err(Error::InvalidParam("max_polys out of range"));
        }

        let max_tiles = params.max_tiles as usize;
        let mut tiles = vec![MeshTile::default(); max_tiles];
        // Fresh slots start with salt 1 so a valid ref is never all zeros.
        for (i, tile) in tiles.iter_mut().enumerate() {
            tile.salt = 1;
            tile.next = if i + 1 < max_tiles {
                (i + 1) as u32
            } else {
                NULL_SLOT
            };
        }

        Ok(Self {
            params: *params,
            tiles,
            pos_lookup: HashMap::new(),
            free_list: 0,
        })
    }

    /// Initialization parameters
    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    /// Computes the tile grid cell containing a world position
    pub fn calc_tile_loc(&self, pos: &[f32; 3]) -> (i32, i32) {
        let tx = ((pos[0] - self.params.origin[0]) / self.params.tile_width).floor() as i32;
        let ty = ((pos[2] - self.params.origin[2]) / self.params.tile_height).floor() as i32;
        (tx, ty)
    }

    /// Slot index of the tile at (x, y, layer), if installed
    pub fn tile_at(&self, x: i32, y: i32, layer: i32) -> Option<u32> {
        let mut slot = *self.pos_lookup.get(&(x, y))?;
        while slot != NULL_SLOT {
            let tile = &self.tiles[slot as usize];
            if let Some(header) = &tile.header {
                if header.x == x && header.y == y && header.layer == layer {
                    return Some(slot);
                }
            }
            slot = tile.next;
        }
        None
    }

    /// Collects the slot indices of all layers at cell (x, y)
    pub fn tiles_at(&self, x: i32, y: i32, out: &mut [u32]) -> usize {
        let mut n = 0;
        let Some(&head) = self.pos_lookup.get(&(x, y)) else {
            return 0;
        };
        let mut slot = head;
        while slot != NULL_SLOT && n < out.len() {
            out[n] = slot;
            n += 1;
            slot = self.tiles[slot as usize].next;
        }
        n
    }

    /// Collects the slots of the tiles in the cell adjacent to (x, y) on the
    /// given side
    fn neighbour_tiles_at(&self, x: i32, y: i32, side: i32, out: &mut [u32]) -> usize {
        let (nx, ny) = match side {
            0 => (x + 1, y),
            1 => (x + 1, y + 1),
            2 => (x, y + 1),
            3 => (x - 1, y + 1),
            4 => (x - 1, y),
            5 => (x - 1, y - 1),
            6 => (x, y - 1),
            7 => (x + 1, y - 1),
            _ => return 0,
        };
        self.tiles_at(nx, ny, out)
    }

    /// Base reference of a tile slot (polygon index zero)
    pub fn poly_ref_base(&self, slot: u32) -> PolyRef {
        PolyRef::encode(self.tiles[slot as usize].salt, slot, 0)
    }

    /// Borrow a tile by slot index
    pub fn tile(&self, slot: u32) -> &MeshTile {
        &self.tiles[slot as usize]
    }

    /// Checks that a reference points at a live polygon: the slot index is in
    /// range, the slot's salt matches, and the polygon index is in range
    pub fn is_valid_poly_ref(&self, r: PolyRef) -> bool {
        if r.is_null() {
            return false;
        }
        let (salt, it, ip) = r.decode();
        if it as usize >= self.tiles.len() {
            return false;
        }
        let tile = &self.tiles[it as usize];
        if tile.salt != salt || tile.header.is_none() {
            return false;
        }
        (ip as usize) < tile.polys.len()
    }

    /// Resolves a reference to its tile and polygon
    pub fn tile_and_poly(&self, r: PolyRef) -> Option<(&MeshTile, &Poly)> {
        if !self.is_valid_poly_ref(r) {
            return None;
        }
        let (_, it, ip) = r.decode();
        let tile = &self.tiles[it as usize];
        Some((tile, &tile.polys[ip as usize]))
    }

    /// Resolves a reference without salt or bounds checks; only for code
    /// paths that already validated the reference
    pub fn tile_and_poly_unchecked(&self, r: PolyRef) -> (&MeshTile, &Poly) {
        debug_assert!(self.is_valid_poly_ref(r));
        let (_, it, ip) = r.decode();
        let tile = &self.tiles[it as usize];
        (tile, &tile.polys[ip as usize])
    }

    // ------------------------------------------------------------------
    // Tile installation

    /// Decodes a tile blob and installs it into the mesh
    ///
    /// On success the tile is fully linked: internal edges, off-mesh anchor
    /// links and external edges against every loaded neighbour. On failure
    /// nothing is committed.
    pub fn add_tile(&mut self, data: &[u8]) -> Result<PolyRef> {
        let mut tile = decode_tile(data)?;
        let header = *tile.header.as_ref().unwrap();

        if header.poly_count > self.params.max_polys {
            return Err(Error::BadFormat(format!(
                "tile carries {} polys, mesh allows {}",
                header.poly_count, self.params.max_polys
            )));
        }
        if self.tile_at(header.x, header.y, header.layer).is_some() {
            return Err(Error::SlotOccupied {
                x: header.x,
                y: header.y,
                layer: header.layer,
            });
        }

        // Claim a free slot.
        let slot = self.free_list;
        if slot == NULL_SLOT {
            return Err(Error::NoFreeSlot);
        }
        self.free_list = self.tiles[slot as usize].next;

        // Install, keeping the slot's salt.
        tile.salt = self.tiles[slot as usize].salt;
        tile.next = NULL_SLOT;
        tile.init_link_pool();
        self.tiles[slot as usize] = tile;

        // Chain into the cell lookup.
        let head = self
            .pos_lookup
            .insert((header.x, header.y), slot)
            .unwrap_or(NULL_SLOT);
        self.tiles[slot as usize].next = head;

        self.connect_int_links(slot);
        self.base_off_mesh_links(slot);
        // Connections whose far endpoint lands inside this same tile.
        self.connect_ext_off_mesh_links(slot, slot, -1);

        let mut neis = [0u32; 32];

        // Connect with layers in the current cell.
        let n = self.tiles_at(header.x, header.y, &mut neis);
        for j in 0..n {
            let other = neis[j];
            if other == slot {
                continue;
            }
            self.connect_ext_links(slot, other, -1);
            self.connect_ext_links(other, slot, -1);
            self.connect_ext_off_mesh_links(slot, other, -1);
            self.connect_ext_off_mesh_links(other, slot, -1);
        }

        // Connect with neighbour cells.
        for side in 0..8 {
            let n = self.neighbour_tiles_at(header.x, header.y, side, &mut neis);
            for j in 0..n {
                let other = neis[j];
                self.connect_ext_links(slot, other, side);
                self.connect_ext_links(other, slot, opposite_tile(side));
                self.connect_ext_off_mesh_links(slot, other, side);
                self.connect_ext_off_mesh_links(other, slot, opposite_tile(side));
            }
        }

        debug!(
            "installed tile ({}, {}) layer {} into slot {}: {} polys, {} verts",
            header.x, header.y, header.layer, slot, header.poly_count, header.vert_count
        );

        Ok(self.poly_ref_base(slot))
    }

    /// Removes a tile, severing every link that points into it
    pub fn remove_tile(&mut self, r: PolyRef) -> Result<()> {
        let (salt, it, _) = r.decode();
        if it as usize >= self.tiles.len() {
            return Err(Error::InvalidParam("tile reference out of range"));
        }
        let Some(header) = self.tiles[it as usize].header else {
            return Err(Error::InvalidParam("tile slot is not occupied"));
        };
        if self.tiles[it as usize].salt != salt {
            return Err(Error::InvalidParam("stale tile reference"));
        }

        // Unchain from the cell lookup.
        let key = (header.x, header.y);
        let head = *self.pos_lookup.get(&key).unwrap();
        if head == it {
            let next = self.tiles[it as usize].next;
            if next == NULL_SLOT {
                self.pos_lookup.remove(&key);
            } else {
                self.pos_lookup.insert(key, next);
            }
        } else {
            let mut cur = head;
            while cur != NULL_SLOT {
                let next = self.tiles[cur as usize].next;
                if next == it {
                    self.tiles[cur as usize].next = self.tiles[it as usize].next;
                    break;
                }
                cur = next;
            }
        }

        // Sever links held by neighbours.
        let mut neis = [0u32; 32];
        let n = self.tiles_at(header.x, header.y, &mut neis);
        for j in 0..n {
            if neis[j] != it {
                self.unconnect_links(neis[j], it);
            }
        }
        for side in 0..8 {
            let n = self.neighbour_tiles_at(header.x, header.y, side, &mut neis);
            for j in 0..n {
                self.unconnect_links(neis[j], it);
            }
        }

        // Reset the slot and bump the salt so stale refs are detectable.
        let tile = &mut self.tiles[it as usize];
        let old_salt = tile.salt;
        *tile = MeshTile::default();
        tile.salt = (old_salt + 1) & 0xffff;
        if tile.salt == 0 {
            tile.salt = 1;
        }
        tile.next = self.free_list;
        self.free_list = it;

        debug!(
            "removed tile ({}, {}) layer {} from slot {}",
            header.x, header.y, header.layer, it
        );
        Ok(())
    }

    /// Removes all links in `slot` that point into `target_slot`
    fn unconnect_links(&mut self, slot: u32, target_slot: u32) {
        let tile = &mut self.tiles[slot as usize];
        if tile.header.is_none() {
            return;
        }
        for i in 0..tile.polys.len() {
            let mut j = tile.polys[i].first_link;
            let mut prev = NULL_LINK;
            while j != NULL_LINK {
                let next = tile.links[j as usize].next;
                if tile.links[j as usize].target.tile_index() == target_slot {
                    if prev == NULL_LINK {
                        tile.polys[i].first_link = next;
                    } else {
                        tile.links[prev as usize].next = next;
                    }
                    tile.free_link(j);
                } else {
                    prev = j;
                }
                j = next;
            }
        }
    }

    /// Builds links for edges that connect polygons inside one tile
    fn connect_int_links(&mut self, slot: u32) {
        let salt = self.tiles[slot as usize].salt;
        let tile = &mut self.tiles[slot as usize];
        let poly_count = tile.polys.len();

        for i in 0..poly_count {
            tile.polys[i].first_link = NULL_LINK;
            if tile.polys[i].poly_type() == PolyType::OffMeshConnection {
                continue;
            }
            // Build the chain backwards so it runs from lowest edge to highest.
            let nv = tile.polys[i].vert_count as usize;
            for j in (0..nv).rev() {
                let nei = tile.polys[i].neis[j];
                if nei == 0 || (nei & EXT_LINK) != 0 {
                    continue;
                }
                let Some(idx) = tile.alloc_link() else {
                    break;
                };
                let first = tile.polys[i].first_link;
                let link = &mut tile.links[idx as usize];
                link.target = PolyRef::encode(salt, slot, (nei - 1) as u32);
                link.edge = j as u8;
                link.side = 0xff;
                link.bmin = 0;
                link.bmax = 0;
                link.next = first;
                tile.polys[i].first_link = idx;
            }
        }
    }

    /// Anchors the off-mesh connections whose start point lies in this tile
    fn base_off_mesh_links(&mut self, slot: u32) {
        let salt = self.tiles[slot as usize].salt;
        let Some(header) = self.tiles[slot as usize].header else {
            return;
        };

        struct Anchor {
            con_poly: usize,
            land_ref: PolyRef,
            nearest: [f32; 3],
        }

        let mut anchors = Vec::new();
        for (ci, con) in self.tiles[slot as usize].off_mesh_cons.iter().enumerate() {
            let p = con.start_pos();
            let half_extents = [con.rad, header.walkable_climb, con.rad];
            let Some((land_ref, nearest)) = self.find_nearest_poly_in_tile(slot, &p, &half_extents)
            else {
                warn!("off-mesh connection {ci} has no landing polygon, skipping");
                continue;
            };
            // findNearestPoly may return too optimistic results; make sure
            // the landing really is within the snap radius.
            if sqr(nearest[0] - p[0]) + sqr(nearest[2] - p[2]) > sqr(con.rad) {
                warn!("off-mesh connection {ci} landing is outside its radius, skipping");
                continue;
            }
            anchors.push(Anchor {
                con_poly: con.poly as usize,
                land_ref,
                nearest,
            });
        }

        let tile = &mut self.tiles[slot as usize];
        for anchor in anchors {
            // Snap the connection's start vertex to the landing point.
            let v = tile.polys[anchor.con_poly].verts[0] as usize;
            tile.verts[v * 3..v * 3 + 3].copy_from_slice(&anchor.nearest);

            // Off-mesh polygon to landing polygon.
            if let Some(idx) = tile.alloc_link() {
                let first = tile.polys[anchor.con_poly].first_link;
                let link = &mut tile.links[idx as usize];
                link.target = anchor.land_ref;
                link.edge = 0;
                link.side = 0xff;
                link.bmin = 0;
                link.bmax = 0;
                link.next = first;
                tile.polys[anchor.con_poly].first_link = idx;
            }

            // Landing polygon back to the off-mesh polygon.
            let land_poly = anchor.land_ref.poly_index() as usize;
            if let Some(idx) = tile.alloc_link() {
                let first = tile.polys[land_poly].first_link;
                let link = &mut tile.links[idx as usize];
                link.target = PolyRef::encode(salt, slot, anchor.con_poly as u32);
                link.edge = 0xff;
                link.side = 0xff;
                link.bmin = 0;
                link.bmax = 0;
                link.next = first;
                tile.polys[land_poly].first_link = idx;
            }
        }
    }

    /// Builds the links of `slot` that cross into `target_slot`
    ///
    /// `side` restricts the pass to edges facing that direction; -1 connects
    /// all sides (used for other layers of the same cell).
    fn connect_ext_links(&mut self, slot: u32, target_slot: u32, side: i32) {
        if self.tiles[slot as usize].header.is_none() {
            return;
        }

        let mut pending: Vec<PendingLink> = Vec::new();
        {
            let tile = &self.tiles[slot as usize];
            for (i, poly) in tile.polys.iter().enumerate() {
                let nv = poly.vert_count as usize;
                for j in 0..nv {
                    if (poly.neis[j] & EXT_LINK) == 0 {
                        continue;
                    }
                    let dir = (poly.neis[j] & 0xff) as i32;
                    if side != -1 && dir != side {
                        continue;
                    }

                    let va = tile.vert(poly.verts[j] as usize);
                    let vb = tile.vert(poly.verts[(j + 1) % nv] as usize);
                    let mut nei = [PolyRef::NULL; MAX_CONNECTING_POLYS];
                    let mut neia = [0.0f32; MAX_CONNECTING_POLYS * 2];
                    let nnei = self.find_connecting_polys(
                        &va,
                        &vb,
                        target_slot,
                        opposite_tile(dir),
                        &mut nei,
                        &mut neia,
                    );
                    for k in 0..nnei {
                        let (bmin, bmax) = if dir == 0 || dir == 4 {
                            let mut tmin = (neia[k * 2] - va[2]) / (vb[2] - va[2]);
                            let mut tmax = (neia[k * 2 + 1] - va[2]) / (vb[2] - va[2]);
                            if tmin > tmax {
                                std::mem::swap(&mut tmin, &mut tmax);
                            }
                            (
                                (clamp(tmin, 0.0, 1.0) * 255.0).round() as u8,
                                (clamp(tmax, 0.0, 1.0) * 255.0).round() as u8,
                            )
                        } else if dir == 2 || dir == 6 {
                            let mut tmin = (neia[k * 2] - va[0]) / (vb[0] - va[0]);
                            let mut tmax = (neia[k * 2 + 1] - va[0]) / (vb[0] - va[0]);
                            if tmin > tmax {
                                std::mem::swap(&mut tmin, &mut tmax);
                            }
                            (
                                (clamp(tmin, 0.0, 1.0) * 255.0).round() as u8,
                                (clamp(tmax, 0.0, 1.0) * 255.0).round() as u8,
                            )
                        } else {
                            (0, 255)
                        };
                        pending.push(PendingLink {
                            poly: i,
                            target: nei[k],
                            edge: j as u8,
                            side: dir as u8,
                            bmin,
                            bmax,
                        });
                    }
                }
            }
        }

        let tile = &mut self.tiles[slot as usize];
        for p in pending {
            let Some(idx) = tile.alloc_link() else {
                break;
            };
            let first = tile.polys[p.poly].first_link;
            let link = &mut tile.links[idx as usize];
            link.target = p.target;
            link.edge = p.edge;
            link.side = p.side;
            link.bmin = p.bmin;
            link.bmax = p.bmax;
            link.next = first;
            tile.polys[p.poly].first_link = idx;
        }
    }

    /// Finds polygons in `target_slot` whose matching external edge overlaps
    /// the segment (va, vb), recording the connection interval of each
    fn find_connecting_polys(
        &self,
        va: &[f32; 3],
        vb: &[f32; 3],
        target_slot: u32,
        side: i32,
        nei: &mut [PolyRef; MAX_CONNECTING_POLYS],
        neia: &mut [f32; MAX_CONNECTING_POLYS * 2],
    ) -> usize {
        let target = &self.tiles[target_slot as usize];
        let Some(header) = &target.header else {
            return 0;
        };

        let (amin, amax) = calc_slab_end_points(va, vb, side);
        let apos = slab_coord(va, side);
        let base = self.poly_ref_base(target_slot);
        let m = EXT_LINK | side as u16;
        let mut n = 0;

        for (i, poly) in target.polys.iter().enumerate() {
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                if poly.neis[j] != m {
                    continue;
                }
                let vc = target.vert(poly.verts[j] as usize);
                let vd = target.vert(poly.verts[(j + 1) % nv] as usize);
                let bpos = slab_coord(&vc, side);

                // Segments are not close enough.
                if (apos - bpos).abs() > 0.01 {
                    continue;
                }

                let (bmin, bmax) = calc_slab_end_points(&vc, &vd, side);
                if !overlap_slabs(&amin, &amax, &bmin, &bmax, 0.01, header.walkable_climb) {
                    continue;
                }

                if n < MAX_CONNECTING_POLYS {
                    neia[n * 2] = amin[0].max(bmin[0]);
                    neia[n * 2 + 1] = amax[0].min(bmax[0]);
                    nei[n] = PolyRef::new(base.id() | i as u64);
                    n += 1;
                }
                break;
            }
        }
        n
    }

    /// Connects off-mesh connections of `target_slot` whose far endpoint
    /// lands inside `slot`
    fn connect_ext_off_mesh_links(&mut self, slot: u32, target_slot: u32, side: i32) {
        if self.tiles[slot as usize].header.is_none()
            || self.tiles[target_slot as usize].header.is_none()
        {
            return;
        }
        let opposite = if side == -1 {
            0xff
        } else {
            opposite_tile(side) as u8
        };

        struct Landing {
            con_poly: usize,
            land_ref: PolyRef,
            nearest: [f32; 3],
            bidir: bool,
        }

        let mut landings = Vec::new();
        {
            let target = &self.tiles[target_slot as usize];
            let header = target.header.as_ref().unwrap();
            for con in &target.off_mesh_cons {
                if con.side != opposite {
                    continue;
                }
                // Skip connections whose start location could not be anchored.
                if target.polys[con.poly as usize].first_link == NULL_LINK {
                    continue;
                }

                let p = con.end_pos();
                let half_extents = [con.rad, header.walkable_climb, con.rad];
                let Some((land_ref, nearest)) =
                    self.find_nearest_poly_in_tile(slot, &p, &half_extents)
                else {
                    continue;
                };
                if sqr(nearest[0] - p[0]) + sqr(nearest[2] - p[2]) > sqr(con.rad) {
                    continue;
                }
                landings.push(Landing {
                    con_poly: con.poly as usize,
                    land_ref,
                    nearest,
                    bidir: con.is_bidirectional(),
                });
            }
        }

        let target_salt = self.tiles[target_slot as usize].salt;
        let slot_salt = self.tiles[slot as usize].salt;
        for landing in landings {
            // Snap the connection's far vertex and link it to the landing.
            {
                let target = &mut self.tiles[target_slot as usize];
                let v = target.polys[landing.con_poly].verts[1] as usize;
                target.verts[v * 3..v * 3 + 3].copy_from_slice(&landing.nearest);

                if let Some(idx) = target.alloc_link() {
                    let first = target.polys[landing.con_poly].first_link;
                    let link = &mut target.links[idx as usize];
                    link.target = landing.land_ref;
                    link.edge = 1;
                    link.side = opposite;
                    link.bmin = 0;
                    link.bmax = 0;
                    link.next = first;
                    target.polys[landing.con_poly].first_link = idx;
                }
            }

            // Landing polygon back to the off-mesh polygon, when two-way.
            if landing.bidir {
                let tile = &mut self.tiles[slot as usize];
                let land_poly = landing.land_ref.poly_index() as usize;
                debug_assert_eq!(landing.land_ref.salt(), slot_salt);
                if let Some(idx) = tile.alloc_link() {
                    let first = tile.polys[land_poly].first_link;
                    let link = &mut tile.links[idx as usize];
                    link.target =
                        PolyRef::encode(target_salt, target_slot, landing.con_poly as u32);
                    link.edge = 0xff;
                    link.side = if side == -1 { 0xff } else { side as u8 };
                    link.bmin = 0;
                    link.bmax = 0;
                    link.next = first;
                    tile.polys[land_poly].first_link = idx;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Spatial queries

    /// Collects polygons of one tile whose bounds overlap the query box
    ///
    /// Uses the tile's quantized BV tree when present; tiles without one are
    /// scanned linearly with per-polygon bounds recomputation.
    pub fn query_polygons_in_tile(
        &self,
        slot: u32,
        qmin: &[f32; 3],
        qmax: &[f32; 3],
        out: &mut [PolyRef],
    ) -> usize {
        let tile = &self.tiles[slot as usize];
        let Some(header) = &tile.header else {
            return 0;
        };
        let base = self.poly_ref_base(slot);
        let mut n = 0;

        if !tile.bv_tree.is_empty() {
            let tbmin = &header.bmin;
            let tbmax = &header.bmax;
            let qfac = header.bv_quant_factor;

            // Clamp the query box onto the tile and quantize it so the
            // comparison against node bounds is conservative.
            let minx = clamp(qmin[0], tbmin[0], tbmax[0]) - tbmin[0];
            let miny = clamp(qmin[1], tbmin[1], tbmax[1]) - tbmin[1];
            let minz = clamp(qmin[2], tbmin[2], tbmax[2]) - tbmin[2];
            let maxx = clamp(qmax[0], tbmin[0], tbmax[0]) - tbmin[0];
            let maxy = clamp(qmax[1], tbmin[1], tbmax[1]) - tbmin[1];
            let maxz = clamp(qmax[2], tbmin[2], tbmax[2]) - tbmin[2];
            let bmin = [
                (qfac * minx) as u16 & 0xfffe,
                (qfac * miny) as u16 & 0xfffe,
                (qfac * minz) as u16 & 0xfffe,
            ];
            let bmax = [
                (qfac * maxx + 1.0) as u16 | 1,
                (qfac * maxy + 1.0) as u16 | 1,
                (qfac * maxz + 1.0) as u16 | 1,
            ];

            let mut i = 0usize;
            let end = tile.bv_tree.len();
            while i < end {
                let node = &tile.bv_tree[i];
                let overlap = overlap_quant_bounds(&bmin, &bmax, &node.bmin, &node.bmax);
                let is_leaf = node.i >= 0;

                if is_leaf && overlap && n < out.len() {
                    out[n] = PolyRef::new(base.id() | node.i as u64);
                    n += 1;
                }

                if overlap || is_leaf {
                    i += 1;
                } else {
                    i += (-node.i) as usize;
                }
            }
        } else {
            for (i, poly) in tile.polys.iter().enumerate() {
                if poly.poly_type() == PolyType::OffMeshConnection {
                    continue;
                }
                let mut bmin = tile.vert(poly.verts[0] as usize);
                let mut bmax = bmin;
                for j in 1..poly.vert_count as usize {
                    let v = tile.vert(poly.verts[j] as usize);
                    vmin_mut(&mut bmin, &v);
                    vmax_mut(&mut bmax, &v);
                }
                if overlap_bounds(qmin, qmax, &bmin, &bmax) && n < out.len() {
                    out[n] = PolyRef::new(base.id() | i as u64);
                    n += 1;
                }
            }
        }
        n
    }

    /// Finds the polygon of one tile nearest to `center`
    pub fn find_nearest_poly_in_tile(
        &self,
        slot: u32,
        center: &[f32; 3],
        half_extents: &[f32; 3],
    ) -> Option<(PolyRef, [f32; 3])> {
        let header = self.tiles[slot as usize].header?;
        let bmin = [
            center[0] - half_extents[0],
            center[1] - half_extents[1],
            center[2] - half_extents[2],
        ];
        let bmax = [
            center[0] + half_extents[0],
            center[1] + half_extents[1],
            center[2] + half_extents[2],
        ];

        let mut polys = [PolyRef::NULL; MAX_POLYS_PER_TILE_QUERY];
        let n = self.query_polygons_in_tile(slot, &bmin, &bmax, &mut polys);

        let mut nearest = None;
        let mut nearest_dist_sqr = f32::MAX;
        for &r in &polys[..n] {
            let Some((closest, over_poly)) = self.closest_point_on_poly(r, center) else {
                continue;
            };
            let dy = (center[1] - closest[1]).abs();
            let d = if over_poly {
                // A polygon directly above or below wins over a closer one
                // reached sideways, as long as it is within climb reach.
                let h = dy - header.walkable_climb;
                if h > 0.0 {
                    h * h
                } else {
                    0.0
                }
            } else {
                vdist_2d_sqr(center, &closest) + dy * dy
            };
            if d < nearest_dist_sqr {
                nearest_dist_sqr = d;
                nearest = Some((r, closest));
            }
        }
        nearest
    }

    /// Closest point on a polygon to `pos`, and whether `pos` projects onto
    /// the polygon's xz silhouette
    pub fn closest_point_on_poly(&self, r: PolyRef, pos: &[f32; 3]) -> Option<([f32; 3], bool)> {
        let (tile, poly) = self.tile_and_poly(r)?;
        let poly_index = r.poly_index() as usize;

        if let Some(h) = self.poly_height(tile, poly, poly_index, pos) {
            return Some(([pos[0], h, pos[2]], true));
        }

        // Off-mesh connections are projected onto their segment.
        if poly.poly_type() == PolyType::OffMeshConnection {
            let v0 = tile.vert(poly.verts[0] as usize);
            let v1 = tile.vert(poly.verts[1] as usize);
            let d0 = vdist(pos, &v0);
            let d1 = vdist(pos, &v1);
            let u = d0 / (d0 + d1);
            return Some((vlerp(&v0, &v1, u), false));
        }

        Some((
            self.closest_point_on_detail_edges(tile, poly, poly_index, pos, true),
            false,
        ))
    }

    /// Height of the polygon surface under `pos`, if `pos` projects inside
    /// the polygon on the xz plane
    ///
    /// Off-mesh connection polygons have no surface and always return None.
    pub fn poly_height(
        &self,
        tile: &MeshTile,
        poly: &Poly,
        poly_index: usize,
        pos: &[f32; 3],
    ) -> Option<f32> {
        if poly.poly_type() == PolyType::OffMeshConnection {
            return None;
        }

        let mut verts = [0.0f32; VERTS_PER_POLYGON * 3];
        let nv = tile.collect_poly_verts(poly, &mut verts);
        if !point_in_polygon_2d(pos, &verts, nv) {
            return None;
        }

        // Interpolate across the detail triangle containing the point.
        if let Some(detail) = tile.detail_meshes.get(poly_index) {
            for t in 0..detail.tri_count as usize {
                let tri =
                    &tile.detail_tris[(detail.tri_base as usize + t) * 4..][..4];
                let a = tile.detail_tri_vert(poly, detail, tri[0]);
                let b = tile.detail_tri_vert(poly, detail, tri[1]);
                let c = tile.detail_tri_vert(poly, detail, tri[2]);
                if let Some(h) = closest_height_point_triangle(pos, &a, &b, &c) {
                    return Some(h);
                }
            }
            // All triangle checks can miss on degenerate triangles or points
            // sitting exactly on an edge; fall back to the closest edge.
            let closest = self.closest_point_on_detail_edges(tile, poly, poly_index, pos, false);
            return Some(closest[1]);
        }

        // No detail mesh: interpolate over the polygon's own fan.
        let v0 = tile.vert(poly.verts[0] as usize);
        for k in 1..nv - 1 {
            let b = tile.vert(poly.verts[k] as usize);
            let c = tile.vert(poly.verts[k + 1] as usize);
            if let Some(h) = closest_height_point_triangle(pos, &v0, &b, &c) {
                return Some(h);
            }
        }
        Some(v0[1])
    }

    /// Closest point on the polygon's detail edges; `only_boundary` limits
    /// the search to edges on the polygon boundary
    fn closest_point_on_detail_edges(
        &self,
        tile: &MeshTile,
        poly: &Poly,
        poly_index: usize,
        pos: &[f32; 3],
        only_boundary: bool,
    ) -> [f32; 3] {
        let mut dmin = f32::MAX;
        let mut tmin = 0.0f32;
        let mut pmin = [0.0f32; 3];
        let mut pmax = [0.0f32; 3];
        let mut found = false;

        if let Some(detail) = tile.detail_meshes.get(poly_index) {
            const ANY_BOUNDARY_EDGE: u8 = (DETAIL_EDGE_BOUNDARY)
                | (DETAIL_EDGE_BOUNDARY << 2)
                | (DETAIL_EDGE_BOUNDARY << 4);
            for t in 0..detail.tri_count as usize {
                let tri = &tile.detail_tris[(detail.tri_base as usize + t) * 4..][..4];
                if only_boundary && (tri[3] & ANY_BOUNDARY_EDGE) == 0 {
                    continue;
                }
                let v = [
                    tile.detail_tri_vert(poly, detail, tri[0]),
                    tile.detail_tri_vert(poly, detail, tri[1]),
                    tile.detail_tri_vert(poly, detail, tri[2]),
                ];
                let mut j = 2usize;
                for k in 0..3usize {
                    if (detail_tri_edge_flags(tri[3], j) & DETAIL_EDGE_BOUNDARY) == 0
                        && (only_boundary || tri[j] < tri[k])
                    {
                        // Interior edge: either not wanted, or visited from
                        // its twin triangle.
                        j = k;
                        continue;
                    }
                    let (d, t_seg) = dist_point_segment_sqr_2d(pos, &v[j], &v[k]);
                    if d < dmin {
                        dmin = d;
                        tmin = t_seg;
                        pmin = v[j];
                        pmax = v[k];
                        found = true;
                    }
                    j = k;
                }
            }
        }

        if !found {
            // No usable detail data: use the polygon's own boundary.
            let nv = poly.vert_count as usize;
            let mut j = nv - 1;
            for k in 0..nv {
                let a = tile.vert(poly.verts[j] as usize);
                let b = tile.vert(poly.verts[k] as usize);
                let (d, t_seg) = dist_point_segment_sqr_2d(pos, &a, &b);
                if d < dmin {
                    dmin = d;
                    tmin = t_seg;
                    pmin = a;
                    pmax = b;
                }
                j = k;
            }
        }

        vlerp(&pmin, &pmax, tmin)
    }
}

/// Coordinate shared by both tiles across the boundary of the given side
fn slab_coord(v: &[f32; 3], side: i32) -> f32 {
    if side == 0 || side == 4 {
        v[0]
    } else if side == 2 || side == 6 {
        v[2]
    } else {
        0.0
    }
}

/// Projects an edge onto the boundary plane of the given side as a 2D slab:
/// (coordinate along the boundary, height), min endpoint first
fn calc_slab_end_points(va: &[f32; 3], vb: &[f32; 3], side: i32) -> ([f32; 2], [f32; 2]) {
    if side == 0 || side == 4 {
        if va[2] < vb[2] {
            ([va[2], va[1]], [vb[2], vb[1]])
        } else {
            ([vb[2], vb[1]], [va[2], va[1]])
        }
    } else if va[0] < vb[0] {
        ([va[0], va[1]], [vb[0], vb[1]])
    } else {
        ([vb[0], vb[1]], [va[0], va[1]])
    }
}

/// Tests whether two edge slabs overlap, with horizontal padding `px` and
/// vertical tolerance `py`
fn overlap_slabs(amin: &[f32; 2], amax: &[f32; 2], bmin: &[f32; 2], bmax: &[f32; 2], px: f32, py: f32) -> bool {
    let minx = (amin[0] + px).max(bmin[0] + px);
    let maxx = (amax[0] - px).min(bmax[0] - px);
    if minx > maxx {
        return false;
    }

    // Heights along both slabs at the overlap interval ends.
    let ad = (amax[1] - amin[1]) / (amax[0] - amin[0]);
    let ak = amin[1] - ad * amin[0];
    let bd = (bmax[1] - bmin[1]) / (bmax[0] - bmin[0]);
    let bk = bmin[1] - bd * bmin[0];
    let aminy = ad * minx + ak;
    let amaxy = ad * maxx + ak;
    let bminy = bd * minx + bk;
    let bmaxy = bd * maxx + bk;
    let dmin = bminy - aminy;
    let dmax = bmaxy - amaxy;

    // Crossing segments always overlap.
    if dmin * dmax < 0.0 {
        return true;
    }

    // Endpoints within climb tolerance.
    let thr = sqr(py * 2.0);
    dmin * dmin <= thr || dmax * dmax <= thr
}
