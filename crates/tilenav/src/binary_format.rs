//! Binary tile blob format
//!
//! A tile blob starts with a 20-byte envelope written by the offline
//! generator, followed by the mesh payload: a 100-byte header and the data
//! sections in fixed order (vertices, polygons, link pool, detail meshes,
//! detail vertices, detail triangles, BV nodes, off-mesh connections).
//! Everything is little-endian; floats are IEEE 754 single precision and are
//! passed through verbatim, including NaN and infinity bit patterns.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::tile::{
    BvNode, Link, MeshHeader, MeshTile, OffMeshConnection, Poly, PolyDetail, PolyFlags, NULL_LINK,
    NULL_SLOT, VERTS_PER_POLYGON,
};
use tilenav_common::{Error, Result};

/// Magic number of the tile envelope ('MMAP')
pub const MMAP_MAGIC: u32 = 0x4d4d_4150;
/// Envelope format version
pub const MMAP_VERSION: u32 = 8;
/// Magic number of the mesh payload ('DNAV')
pub const NAVMESH_MAGIC: u32 = 0x444e_4156;
/// Mesh payload version
pub const NAVMESH_VERSION: u32 = 7;

/// Size of the envelope in bytes
pub const ENVELOPE_SIZE: usize = 20;
/// Size of the mesh header in bytes
pub const MESH_HEADER_SIZE: usize = 100;

const VERT_SIZE: usize = 12;
const POLY_SIZE: usize = 32;
const LINK_SIZE: usize = 16;
const DETAIL_MESH_SIZE: usize = 12;
const DETAIL_VERT_SIZE: usize = 12;
const DETAIL_TRI_SIZE: usize = 4;
const BV_NODE_SIZE: usize = 16;
const OFF_MESH_CON_SIZE: usize = 36;

/// Tile blob envelope
#[derive(Debug, Clone, Copy)]
pub struct TileEnvelope {
    pub mmap_magic: u32,
    /// Version of the decoder the blob was generated for
    pub dt_version: u32,
    pub mmap_version: u32,
    /// Size of the payload that follows
    pub size: u32,
    /// Nonzero when the generator sampled liquid surfaces
    pub uses_liquids: u32,
}

impl TileEnvelope {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(Self {
            mmap_magic: cursor.read_u32::<LittleEndian>()?,
            dt_version: cursor.read_u32::<LittleEndian>()?,
            mmap_version: cursor.read_u32::<LittleEndian>()?,
            size: cursor.read_u32::<LittleEndian>()?,
            uses_liquids: cursor.read_u32::<LittleEndian>()?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u32::<LittleEndian>(self.mmap_magic)?;
        out.write_u32::<LittleEndian>(self.dt_version)?;
        out.write_u32::<LittleEndian>(self.mmap_version)?;
        out.write_u32::<LittleEndian>(self.size)?;
        out.write_u32::<LittleEndian>(self.uses_liquids)?;
        Ok(())
    }
}

fn read_header(cursor: &mut Cursor<&[u8]>) -> Result<MeshHeader> {
    let magic = cursor.read_u32::<LittleEndian>()?;
    if magic != NAVMESH_MAGIC {
        return Err(Error::BadFormat(format!(
            "bad mesh header magic {magic:#010x}"
        )));
    }
    let version = cursor.read_u32::<LittleEndian>()?;
    if version != NAVMESH_VERSION {
        return Err(Error::VersionMismatch {
            expected: NAVMESH_VERSION,
            found: version,
        });
    }
    Ok(MeshHeader {
        x: cursor.read_i32::<LittleEndian>()?,
        y: cursor.read_i32::<LittleEndian>()?,
        layer: cursor.read_i32::<LittleEndian>()?,
        user_id: cursor.read_u32::<LittleEndian>()?,
        poly_count: cursor.read_i32::<LittleEndian>()?,
        vert_count: cursor.read_i32::<LittleEndian>()?,
        max_link_count: cursor.read_i32::<LittleEndian>()?,
        detail_mesh_count: cursor.read_i32::<LittleEndian>()?,
        detail_vert_count: cursor.read_i32::<LittleEndian>()?,
        detail_tri_count: cursor.read_i32::<LittleEndian>()?,
        bv_node_count: cursor.read_i32::<LittleEndian>()?,
        off_mesh_con_count: cursor.read_i32::<LittleEndian>()?,
        off_mesh_base: cursor.read_i32::<LittleEndian>()?,
        walkable_height: cursor.read_f32::<LittleEndian>()?,
        walkable_radius: cursor.read_f32::<LittleEndian>()?,
        walkable_climb: cursor.read_f32::<LittleEndian>()?,
        bmin: [
            cursor.read_f32::<LittleEndian>()?,
            cursor.read_f32::<LittleEndian>()?,
            cursor.read_f32::<LittleEndian>()?,
        ],
        bmax: [
            cursor.read_f32::<LittleEndian>()?,
            cursor.read_f32::<LittleEndian>()?,
            cursor.read_f32::<LittleEndian>()?,
        ],
        bv_quant_factor: cursor.read_f32::<LittleEndian>()?,
    })
}

fn write_header(header: &MeshHeader, out: &mut Vec<u8>) -> Result<()> {
    out.write_u32::<LittleEndian>(NAVMESH_MAGIC)?;
    out.write_u32::<LittleEndian>(NAVMESH_VERSION)?;
    out.write_i32::<LittleEndian>(header.x)?;
    out.write_i32::<LittleEndian>(header.y)?;
    out.write_i32::<LittleEndian>(header.layer)?;
    out.write_u32::<LittleEndian>(header.user_id)?;
    out.write_i32::<LittleEndian>(header.poly_count)?;
    out.write_i32::<LittleEndian>(header.vert_count)?;
    out.write_i32::<LittleEndian>(header.max_link_count)?;
    out.write_i32::<LittleEndian>(header.detail_mesh_count)?;
    out.write_i32::<LittleEndian>(header.detail_vert_count)?;
    out.write_i32::<LittleEndian>(header.detail_tri_count)?;
    out.write_i32::<LittleEndian>(header.bv_node_count)?;
    out.write_i32::<LittleEndian>(header.off_mesh_con_count)?;
    out.write_i32::<LittleEndian>(header.off_mesh_base)?;
    out.write_f32::<LittleEndian>(header.walkable_height)?;
    out.write_f32::<LittleEndian>(header.walkable_radius)?;
    out.write_f32::<LittleEndian>(header.walkable_climb)?;
    for v in header.bmin {
        out.write_f32::<LittleEndian>(v)?;
    }
    for v in header.bmax {
        out.write_f32::<LittleEndian>(v)?;
    }
    out.write_f32::<LittleEndian>(header.bv_quant_factor)?;
    Ok(())
}

fn payload_size(header: &MeshHeader) -> usize {
    MESH_HEADER_SIZE
        + header.vert_count as usize * VERT_SIZE
        + header.poly_count as usize * POLY_SIZE
        + header.max_link_count as usize * LINK_SIZE
        + header.detail_mesh_count as usize * DETAIL_MESH_SIZE
        + header.detail_vert_count as usize * DETAIL_VERT_SIZE
        + header.detail_tri_count as usize * DETAIL_TRI_SIZE
        + header.bv_node_count as usize * BV_NODE_SIZE
        + header.off_mesh_con_count as usize * OFF_MESH_CON_SIZE
}

/// Parses a tile blob into a mesh tile
///
/// The returned tile is not yet installed anywhere: its salt is zero, the
/// link pool content is discarded (links are rebuilt during installation)
/// and no stitching has happened.
pub fn decode_tile(data: &[u8]) -> Result<MeshTile> {
    if data.len() < ENVELOPE_SIZE {
        return Err(Error::BadFormat(format!(
            "blob of {} bytes is shorter than the envelope",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let envelope = TileEnvelope::read(&mut cursor)?;
    if envelope.mmap_magic != MMAP_MAGIC {
        return Err(Error::BadFormat(format!(
            "bad envelope magic {:#010x}",
            envelope.mmap_magic
        )));
    }
    if envelope.mmap_version != MMAP_VERSION {
        return Err(Error::VersionMismatch {
            expected: MMAP_VERSION,
            found: envelope.mmap_version,
        });
    }
    if data.len() - ENVELOPE_SIZE < envelope.size as usize {
        return Err(Error::BadFormat(format!(
            "envelope promises {} payload bytes, {} present",
            envelope.size,
            data.len() - ENVELOPE_SIZE
        )));
    }
    if (envelope.size as usize) < MESH_HEADER_SIZE {
        return Err(Error::BadFormat(
            "payload is shorter than the mesh header".into(),
        ));
    }

    let header = read_header(&mut cursor)?;
    if header.poly_count < 0
        || header.vert_count < 0
        || header.max_link_count < 0
        || header.detail_mesh_count < 0
        || header.detail_vert_count < 0
        || header.detail_tri_count < 0
        || header.bv_node_count < 0
        || header.off_mesh_con_count < 0
    {
        return Err(Error::BadFormat("negative section count".into()));
    }
    if payload_size(&header) > envelope.size as usize {
        return Err(Error::BadFormat("truncated payload sections".into()));
    }

    let mut tile = MeshTile {
        salt: 0,
        next: NULL_SLOT,
        ..Default::default()
    };

    tile.verts.reserve(header.vert_count as usize * 3);
    for _ in 0..header.vert_count * 3 {
        tile.verts.push(cursor.read_f32::<LittleEndian>()?);
    }

    tile.polys.reserve(header.poly_count as usize);
    for _ in 0..header.poly_count {
        // The stored first_link is stale generator output; chains are rebuilt
        // during installation.
        let _ = cursor.read_u32::<LittleEndian>()?;
        let mut verts = [0u16; VERTS_PER_POLYGON];
        for v in &mut verts {
            *v = cursor.read_u16::<LittleEndian>()?;
        }
        let mut neis = [0u16; VERTS_PER_POLYGON];
        for n in &mut neis {
            *n = cursor.read_u16::<LittleEndian>()?;
        }
        let flags = cursor.read_u16::<LittleEndian>()?;
        let vert_count = cursor.read_u8()?;
        let area_and_type = cursor.read_u8()?;
        if vert_count as usize > VERTS_PER_POLYGON {
            return Err(Error::BadFormat(format!(
                "polygon with {vert_count} vertices exceeds the per-poly limit"
            )));
        }
        tile.polys.push(Poly {
            first_link: NULL_LINK,
            verts,
            neis,
            flags: PolyFlags::from_bits_truncate(flags),
            vert_count,
            area_and_type,
        });
    }

    for poly in &tile.polys {
        for i in 0..poly.vert_count as usize {
            if poly.verts[i] as i32 >= header.vert_count {
                return Err(Error::BadFormat("polygon vertex index out of range".into()));
            }
        }
    }

    // The link section is an allocated, zero-initialized pool; skip its
    // content and size the in-memory pool from the header.
    let pos = cursor.position() + (header.max_link_count as u64 * LINK_SIZE as u64);
    cursor.set_position(pos);
    tile.links = vec![Link::free(NULL_LINK); header.max_link_count as usize];

    tile.detail_meshes.reserve(header.detail_mesh_count as usize);
    for _ in 0..header.detail_mesh_count {
        let detail = PolyDetail {
            vert_base: cursor.read_u32::<LittleEndian>()?,
            tri_base: cursor.read_u32::<LittleEndian>()?,
            vert_count: cursor.read_u8()?,
            tri_count: cursor.read_u8()?,
        };
        // Two bytes of struct padding
        let _ = cursor.read_u16::<LittleEndian>()?;
        tile.detail_meshes.push(detail);
    }

    tile.detail_verts.reserve(header.detail_vert_count as usize * 3);
    for _ in 0..header.detail_vert_count * 3 {
        tile.detail_verts.push(cursor.read_f32::<LittleEndian>()?);
    }

    tile.detail_tris.reserve(header.detail_tri_count as usize * 4);
    for _ in 0..header.detail_tri_count * 4 {
        tile.detail_tris.push(cursor.read_u8()?);
    }

    tile.bv_tree.reserve(header.bv_node_count as usize);
    for _ in 0..header.bv_node_count {
        tile.bv_tree.push(BvNode {
            bmin: [
                cursor.read_u16::<LittleEndian>()?,
                cursor.read_u16::<LittleEndian>()?,
                cursor.read_u16::<LittleEndian>()?,
            ],
            bmax: [
                cursor.read_u16::<LittleEndian>()?,
                cursor.read_u16::<LittleEndian>()?,
                cursor.read_u16::<LittleEndian>()?,
            ],
            i: cursor.read_i32::<LittleEndian>()?,
        });
    }

    tile.off_mesh_cons.reserve(header.off_mesh_con_count as usize);
    for _ in 0..header.off_mesh_con_count {
        let mut pos = [0.0f32; 6];
        for p in &mut pos {
            *p = cursor.read_f32::<LittleEndian>()?;
        }
        let con = OffMeshConnection {
            pos,
            rad: cursor.read_f32::<LittleEndian>()?,
            poly: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u8()?,
            side: cursor.read_u8()?,
            area: cursor.read_u8()?,
        };
        // Three bytes of record padding
        let _ = cursor.read_u8()?;
        let _ = cursor.read_u16::<LittleEndian>()?;
        if (con.poly as i32) < header.off_mesh_base
            || con.poly as i32 >= header.poly_count
        {
            return Err(Error::BadFormat(
                "off-mesh connection polygon index out of range".into(),
            ));
        }
        tile.off_mesh_cons.push(con);
    }

    // Structural checks so a malformed blob fails here instead of panicking
    // inside a query.
    for (i, detail) in tile.detail_meshes.iter().enumerate() {
        if detail.tri_base as usize + detail.tri_count as usize
            > header.detail_tri_count as usize
        {
            return Err(Error::BadFormat(format!(
                "detail mesh {i} triangle range out of bounds"
            )));
        }
        if detail.vert_base as usize + detail.vert_count as usize
            > header.detail_vert_count as usize
        {
            return Err(Error::BadFormat(format!(
                "detail mesh {i} vertex range out of bounds"
            )));
        }
        if let Some(poly) = tile.polys.get(i) {
            let limit = poly.vert_count as u16 + detail.vert_count as u16;
            for t in 0..detail.tri_count as usize {
                let tri = &tile.detail_tris[(detail.tri_base as usize + t) * 4..][..3];
                if tri.iter().any(|&k| k as u16 >= limit) {
                    return Err(Error::BadFormat(format!(
                        "detail mesh {i} triangle index out of bounds"
                    )));
                }
            }
        }
    }
    for (i, node) in tile.bv_tree.iter().enumerate() {
        if node.i >= 0 {
            if node.i >= header.poly_count {
                return Err(Error::BadFormat(format!(
                    "bv node {i} references polygon {} out of range",
                    node.i
                )));
            }
        } else if i as i64 - node.i as i64 > tile.bv_tree.len() as i64 {
            return Err(Error::BadFormat(format!(
                "bv node {i} escape offset out of range"
            )));
        }
    }

    tile.header = Some(header);
    Ok(tile)
}

/// Serializes a tile back into blob form (envelope included)
///
/// The link pool is written zeroed; its content is rebuilt on load. Used by
/// the tile builder and by round-trip tests.
pub fn encode_tile(tile: &MeshTile) -> Result<Vec<u8>> {
    let header = tile
        .header
        .as_ref()
        .ok_or(Error::InvalidParam("tile has no header"))?;

    let size = payload_size(header);
    let mut out = Vec::with_capacity(ENVELOPE_SIZE + size);

    let envelope = TileEnvelope {
        mmap_magic: MMAP_MAGIC,
        dt_version: NAVMESH_VERSION,
        mmap_version: MMAP_VERSION,
        size: size as u32,
        uses_liquids: 0,
    };
    envelope.write(&mut out)?;
    write_header(header, &mut out)?;

    for &v in &tile.verts {
        out.write_f32::<LittleEndian>(v)?;
    }

    for poly in &tile.polys {
        out.write_u32::<LittleEndian>(NULL_LINK)?;
        for &v in &poly.verts {
            out.write_u16::<LittleEndian>(v)?;
        }
        for &n in &poly.neis {
            out.write_u16::<LittleEndian>(n)?;
        }
        out.write_u16::<LittleEndian>(poly.flags.bits())?;
        out.write_u8(poly.vert_count)?;
        out.write_u8(poly.area_and_type)?;
    }

    for _ in 0..header.max_link_count {
        out.extend_from_slice(&[0u8; LINK_SIZE]);
    }

    for detail in &tile.detail_meshes {
        out.write_u32::<LittleEndian>(detail.vert_base)?;
        out.write_u32::<LittleEndian>(detail.tri_base)?;
        out.write_u8(detail.vert_count)?;
        out.write_u8(detail.tri_count)?;
        out.write_u16::<LittleEndian>(0)?;
    }

    for &v in &tile.detail_verts {
        out.write_f32::<LittleEndian>(v)?;
    }

    for &t in &tile.detail_tris {
        out.write_u8(t)?;
    }

    for node in &tile.bv_tree {
        for v in node.bmin {
            out.write_u16::<LittleEndian>(v)?;
        }
        for v in node.bmax {
            out.write_u16::<LittleEndian>(v)?;
        }
        out.write_i32::<LittleEndian>(node.i)?;
    }

    for con in &tile.off_mesh_cons {
        for p in con.pos {
            out.write_f32::<LittleEndian>(p)?;
        }
        out.write_f32::<LittleEndian>(con.rad)?;
        out.write_u16::<LittleEndian>(con.poly)?;
        out.write_u8(con.flags)?;
        out.write_u8(con.side)?;
        out.write_u8(con.area)?;
        out.write_u8(0)?;
        out.write_u16::<LittleEndian>(0)?;
    }

    debug_assert_eq!(out.len(), ENVELOPE_SIZE + size);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::PolyType;

    fn sample_tile() -> MeshTile {
        let polys = vec![Poly {
            first_link: NULL_LINK,
            verts: [0, 1, 2, 3, 0, 0],
            neis: [0, crate::tile::EXT_LINK, 0, 0, 0, 0],
            flags: PolyFlags::WALK,
            vert_count: 4,
            area_and_type: Poly::pack_area_and_type(0, PolyType::Ground),
        }];

        MeshTile {
            header: Some(MeshHeader {
                x: 3,
                y: 7,
                layer: 0,
                user_id: 99,
                poly_count: 1,
                vert_count: 4,
                max_link_count: 4,
                detail_mesh_count: 1,
                detail_vert_count: 0,
                detail_tri_count: 2,
                bv_node_count: 0,
                off_mesh_con_count: 0,
                off_mesh_base: 1,
                walkable_height: 2.0,
                walkable_radius: 0.6,
                walkable_climb: 0.9,
                bmin: [0.0, 0.0, 0.0],
                bmax: [10.0, 1.0, 10.0],
                bv_quant_factor: 6553.5,
            }),
            verts: vec![
                0.0, 0.0, 0.0, 0.0, 0.0, 10.0, 10.0, 0.0, 10.0, 10.0, 0.0, 0.0,
            ],
            polys,
            links: vec![Link::free(NULL_LINK); 4],
            detail_meshes: vec![PolyDetail {
                vert_base: 0,
                tri_base: 0,
                vert_count: 0,
                tri_count: 2,
            }],
            detail_tris: vec![0, 1, 2, 0b01_01_01, 0, 2, 3, 0b01_01_01],
            ..Default::default()
        }
    }

    #[test]
    fn test_round_trip() {
        let tile = sample_tile();
        let blob = encode_tile(&tile).unwrap();
        assert_eq!(blob.len(), ENVELOPE_SIZE + payload_size(tile.header.as_ref().unwrap()));

        let decoded = decode_tile(&blob).unwrap();
        let header = decoded.header.unwrap();
        assert_eq!(header.x, 3);
        assert_eq!(header.y, 7);
        assert_eq!(header.user_id, 99);
        assert_eq!(decoded.verts, tile.verts);
        assert_eq!(decoded.polys.len(), 1);
        assert_eq!(decoded.polys[0].verts, tile.polys[0].verts);
        assert_eq!(decoded.polys[0].flags, PolyFlags::WALK);
        assert_eq!(decoded.links.len(), 4);
        assert_eq!(decoded.detail_tris, tile.detail_tris);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut blob = encode_tile(&sample_tile()).unwrap();
        blob[0] ^= 0xff;
        assert!(matches!(decode_tile(&blob), Err(Error::BadFormat(_))));
    }

    #[test]
    fn test_rejects_bad_version() {
        let mut blob = encode_tile(&sample_tile()).unwrap();
        blob[8] = 9; // envelope format version
        assert!(matches!(
            decode_tile(&blob),
            Err(Error::VersionMismatch { expected: 8, found: 9 })
        ));
    }

    #[test]
    fn test_rejects_truncation() {
        let blob = encode_tile(&sample_tile()).unwrap();
        let cut = &blob[..blob.len() - 8];
        assert!(matches!(decode_tile(cut), Err(Error::BadFormat(_))));
    }

    #[test]
    fn test_rejects_short_envelope() {
        assert!(matches!(decode_tile(&[0u8; 10]), Err(Error::BadFormat(_))));
    }
}
