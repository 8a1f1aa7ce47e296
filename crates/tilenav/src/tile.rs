//! Tile data model
//!
//! A tile is parsed once from its binary blob and is immutable afterwards,
//! with one exception: the link pool. Links are handed out from an intrusive
//! free list inside the tile while the `NavMesh` stitches the tile graph
//! together, and returned to it when a neighbouring tile goes away.

use crate::PolyRef;
use bitflags::bitflags;

/// Maximum number of vertices per navigation polygon
pub const VERTS_PER_POLYGON: usize = 6;

/// End-of-list marker for link chains
pub const NULL_LINK: u32 = u32::MAX;

/// A value in `Poly::neis` with this bit set marks an external edge; the low
/// byte holds the direction the edge faces (0..7)
pub const EXT_LINK: u16 = 0x8000;

/// Off-mesh connection flag bit: traversal is allowed in both directions
pub const OFFMESH_CON_BIDIR: u8 = 1;

/// Number of entries in a filter's per-area cost table
pub const MAX_AREAS: usize = 64;

/// Detail triangle edge flag: the edge lies on the polygon boundary
pub const DETAIL_EDGE_BOUNDARY: u8 = 0x1;

/// Extracts the flags of detail triangle edge `edge` (0..2) from the packed
/// per-triangle flag byte
#[inline]
pub fn detail_tri_edge_flags(tri_flags: u8, edge: usize) -> u8 {
    (tri_flags >> (edge * 2)) & 0x3
}

bitflags! {
    /// Per-polygon capability flags matched against a query filter
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PolyFlags: u16 {
        const WALK = 0x01;
        const SWIM = 0x02;
        const DOOR = 0x04;
        const JUMP = 0x08;
        const DISABLED = 0x10;
    }
}

/// Polygon variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolyType {
    /// Regular walkable surface polygon
    Ground,
    /// Two-vertex teleport connection
    OffMeshConnection,
}

/// Polygon in a mesh tile
#[derive(Debug, Clone)]
pub struct Poly {
    /// Head of this polygon's link chain, NULL_LINK when empty
    pub first_link: u32,
    /// Vertex indices into the tile vertex array
    pub verts: [u16; VERTS_PER_POLYGON],
    /// Neighbour data per edge: 0 = wall, 1..=poly_count = internal
    /// neighbour index + 1, EXT_LINK | side = external edge
    pub neis: [u16; VERTS_PER_POLYGON],
    /// Capability flags
    pub flags: PolyFlags,
    /// Number of vertices actually used
    pub vert_count: u8,
    /// Packed 6-bit area id and 2-bit polygon type
    pub area_and_type: u8,
}

impl Poly {
    /// Area id (0..63)
    #[inline]
    pub fn area(&self) -> u8 {
        self.area_and_type & 0x3f
    }

    /// Polygon type decoded from the top two bits
    #[inline]
    pub fn poly_type(&self) -> PolyType {
        if (self.area_and_type >> 6) == 1 {
            PolyType::OffMeshConnection
        } else {
            PolyType::Ground
        }
    }

    /// Packs an area id and type tag
    #[inline]
    pub fn pack_area_and_type(area: u8, poly_type: PolyType) -> u8 {
        let t: u8 = match poly_type {
            PolyType::Ground => 0,
            PolyType::OffMeshConnection => 1,
        };
        (area & 0x3f) | (t << 6)
    }
}

/// Directed adjacency record from one polygon to another
#[derive(Debug, Clone, Copy)]
pub struct Link {
    /// Reference of the neighbour polygon
    pub target: PolyRef,
    /// Next link in the owning polygon's chain, NULL_LINK at the end
    pub next: u32,
    /// Edge index in the source polygon this link crosses
    pub edge: u8,
    /// 0xff for internal links, otherwise the boundary direction (0..7)
    pub side: u8,
    /// Quantized start of the shared sub-edge (0..255)
    pub bmin: u8,
    /// Quantized end of the shared sub-edge (0..255)
    pub bmax: u8,
}

impl Link {
    /// An unused pool entry chained at `next`
    pub fn free(next: u32) -> Self {
        Self {
            target: PolyRef::NULL,
            next,
            edge: 0,
            side: 0,
            bmin: 0,
            bmax: 0,
        }
    }
}

/// Per-polygon refined triangulation for height sampling
#[derive(Debug, Clone, Copy, Default)]
pub struct PolyDetail {
    /// First detail vertex of this polygon
    pub vert_base: u32,
    /// First detail triangle of this polygon
    pub tri_base: u32,
    /// Number of detail vertices
    pub vert_count: u8,
    /// Number of detail triangles
    pub tri_count: u8,
}

/// Quantized bounding volume node in skip-pointer layout
///
/// Leaves carry a non-negative polygon index in `i`; inner nodes carry the
/// negated escape offset to the next sibling subtree.
#[derive(Debug, Clone, Copy, Default)]
pub struct BvNode {
    pub bmin: [u16; 3],
    pub bmax: [u16; 3],
    pub i: i32,
}

/// Teleport edge between two world positions
#[derive(Debug, Clone, Copy)]
pub struct OffMeshConnection {
    /// Endpoints \[sx, sy, sz, ex, ey, ez\]
    pub pos: [f32; 6],
    /// Snap radius around each endpoint
    pub rad: f32,
    /// Index of the off-mesh polygon inside the owning tile
    pub poly: u16,
    /// Connection flags (OFFMESH_CON_BIDIR)
    pub flags: u8,
    /// Endpoint side, 0xff when both endpoints are inside the owning tile
    pub side: u8,
    /// Area id assigned to the connection polygon
    pub area: u8,
}

impl OffMeshConnection {
    /// Start endpoint
    #[inline]
    pub fn start_pos(&self) -> [f32; 3] {
        [self.pos[0], self.pos[1], self.pos[2]]
    }

    /// End endpoint
    #[inline]
    pub fn end_pos(&self) -> [f32; 3] {
        [self.pos[3], self.pos[4], self.pos[5]]
    }

    /// True when traversal is allowed in both directions
    #[inline]
    pub fn is_bidirectional(&self) -> bool {
        self.flags & OFFMESH_CON_BIDIR != 0
    }
}

/// Parsed tile header
#[derive(Debug, Clone, Copy)]
pub struct MeshHeader {
    /// Tile grid location
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    /// User defined id
    pub user_id: u32,
    pub poly_count: i32,
    pub vert_count: i32,
    pub max_link_count: i32,
    pub detail_mesh_count: i32,
    pub detail_vert_count: i32,
    pub detail_tri_count: i32,
    pub bv_node_count: i32,
    pub off_mesh_con_count: i32,
    /// Polygon index of the first off-mesh connection polygon
    pub off_mesh_base: i32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    /// Tile bounding box
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    /// Quantization factor of the BV tree
    pub bv_quant_factor: f32,
}

/// One slot of the navigation mesh tile table
#[derive(Debug, Clone, Default)]
pub struct MeshTile {
    /// Reuse counter, folded into every PolyRef pointing at this slot
    pub salt: u32,
    /// Head of the link free list
    pub links_free_list: u32,
    /// Parsed header; None while the slot is free
    pub header: Option<MeshHeader>,
    pub polys: Vec<Poly>,
    /// Flat vertex positions \[x, y, z, ...\]
    pub verts: Vec<f32>,
    /// Link pool of size max_link_count
    pub links: Vec<Link>,
    pub detail_meshes: Vec<PolyDetail>,
    /// Flat detail vertex positions
    pub detail_verts: Vec<f32>,
    /// Detail triangles, 4 bytes each: three indices plus packed edge flags
    pub detail_tris: Vec<u8>,
    pub bv_tree: Vec<BvNode>,
    pub off_mesh_cons: Vec<OffMeshConnection>,
    /// Next slot in the cell chain (occupied) or the free list (vacant)
    pub next: u32,
}

/// End-of-chain marker for tile slot chains
pub const NULL_SLOT: u32 = u32::MAX;

impl MeshTile {
    /// Resets the link pool so every entry is on the free list
    pub fn init_link_pool(&mut self) {
        let max_links = self.links.len();
        for (i, link) in self.links.iter_mut().enumerate() {
            *link = Link::free(if i + 1 < max_links {
                (i + 1) as u32
            } else {
                NULL_LINK
            });
        }
        self.links_free_list = if max_links > 0 { 0 } else { NULL_LINK };
    }

    /// Takes a link from the free list
    pub fn alloc_link(&mut self) -> Option<u32> {
        if self.links_free_list == NULL_LINK {
            return None;
        }
        let idx = self.links_free_list;
        self.links_free_list = self.links[idx as usize].next;
        Some(idx)
    }

    /// Returns a link to the free list
    pub fn free_link(&mut self, idx: u32) {
        self.links[idx as usize].next = self.links_free_list;
        self.links_free_list = idx;
    }

    /// Vertex position by index
    #[inline]
    pub fn vert(&self, idx: usize) -> [f32; 3] {
        [
            self.verts[idx * 3],
            self.verts[idx * 3 + 1],
            self.verts[idx * 3 + 2],
        ]
    }

    /// Detail vertex position by index
    #[inline]
    pub fn detail_vert(&self, idx: usize) -> [f32; 3] {
        [
            self.detail_verts[idx * 3],
            self.detail_verts[idx * 3 + 1],
            self.detail_verts[idx * 3 + 2],
        ]
    }

    /// Resolves vertex `k` of a detail triangle: indices below the polygon's
    /// vertex count address polygon vertices, the rest address detail verts
    #[inline]
    pub fn detail_tri_vert(&self, poly: &Poly, detail: &PolyDetail, k: u8) -> [f32; 3] {
        if k < poly.vert_count {
            self.vert(poly.verts[k as usize] as usize)
        } else {
            self.detail_vert(detail.vert_base as usize + (k - poly.vert_count) as usize)
        }
    }

    /// Copies a polygon's vertex ring into a flat scratch buffer, returning
    /// the vertex count
    pub fn collect_poly_verts(&self, poly: &Poly, out: &mut [f32]) -> usize {
        let nv = poly.vert_count as usize;
        for i in 0..nv {
            let v = self.vert(poly.verts[i] as usize);
            out[i * 3..i * 3 + 3].copy_from_slice(&v);
        }
        nv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_pool_exhausts_and_recycles() {
        let mut tile = MeshTile {
            links: vec![Link::free(NULL_LINK); 4],
            ..Default::default()
        };
        tile.init_link_pool();

        let mut taken = Vec::new();
        while let Some(idx) = tile.alloc_link() {
            taken.push(idx);
        }
        assert_eq!(taken, vec![0, 1, 2, 3]);
        assert!(tile.alloc_link().is_none());

        tile.free_link(2);
        assert_eq!(tile.alloc_link(), Some(2));
        assert!(tile.alloc_link().is_none());
    }

    #[test]
    fn test_area_and_type_packing() {
        let packed = Poly::pack_area_and_type(21, PolyType::OffMeshConnection);
        let poly = Poly {
            first_link: NULL_LINK,
            verts: [0; VERTS_PER_POLYGON],
            neis: [0; VERTS_PER_POLYGON],
            flags: PolyFlags::WALK,
            vert_count: 2,
            area_and_type: packed,
        };
        assert_eq!(poly.area(), 21);
        assert_eq!(poly.poly_type(), PolyType::OffMeshConnection);

        let ground = Poly::pack_area_and_type(63, PolyType::Ground);
        assert_eq!(ground, 63);
    }

    #[test]
    fn test_detail_tri_edge_flags() {
        // Edge 0 boundary, edge 1 internal, edge 2 boundary
        let packed: u8 = 0b01_00_01;
        assert_eq!(detail_tri_edge_flags(packed, 0) & DETAIL_EDGE_BOUNDARY, 1);
        assert_eq!(detail_tri_edge_flags(packed, 1) & DETAIL_EDGE_BOUNDARY, 0);
        assert_eq!(detail_tri_edge_flags(packed, 2) & DETAIL_EDGE_BOUNDARY, 1);
    }
}
