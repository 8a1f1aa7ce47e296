//! Lazy tile loading and end-to-end path queries
//!
//! The engine never touches the filesystem: a `TileLoader` hands it raw
//! blobs on demand. `Pathfinder` drives the usual request sequence over it:
//! load the tiles covering the query rectangle, localize both endpoints,
//! search the polygon corridor, clamp an unreached goal to the last corridor
//! polygon and pull the string path.

use std::collections::HashSet;

use log::{debug, info, warn};

use crate::filter::DefaultQueryFilter;
use crate::nav_mesh::{NavMesh, NavMeshParams};
use crate::nav_mesh_query::{NavMeshQuery, StraightPathOptions, StraightPathVertex};
use crate::status::Status;
use crate::PolyRef;
use glam::Vec3;
use tilenav_common::Result;

/// Default search box half-extents when localizing a query point
const SEARCH_EXTENTS: [f32; 3] = [2.0, 4.0, 2.0];
/// Longest polygon corridor a request may produce
const MAX_PATH_POLYS: usize = 256;
/// Most vertices a pulled path may carry
const MAX_STRAIGHT_POINTS: usize = 256;
/// A* node budget per pathfinder
const MAX_SEARCH_NODES: usize = 2048;

/// Supplies serialized navigation data on demand
///
/// `load_params` returns the 28-byte mesh parameter record; `load_tile`
/// returns a tile blob (envelope included). Resource naming and storage are
/// entirely the loader's business.
pub trait TileLoader {
    fn load_params(&mut self, map_id: u32) -> Result<Vec<u8>>;
    fn load_tile(&mut self, map_id: u32, tx: i32, ty: i32) -> Result<Vec<u8>>;
}

/// Navigation queries over lazily loaded tiles of one map
pub struct Pathfinder<L: TileLoader> {
    loader: L,
    map_id: u32,
    nav: NavMesh,
    /// Cells already requested from the loader, hit or miss
    requested: HashSet<(i32, i32)>,
}

impl<L: TileLoader> Pathfinder<L> {
    /// Loads the mesh parameters and prepares an empty mesh
    pub fn new(mut loader: L, map_id: u32) -> Result<Self> {
        let raw = loader.load_params(map_id)?;
        let params = NavMeshParams::from_bytes(&raw)?;
        info!(
            "navmesh params for map {}: origin=({:.2}, {:.2}, {:.2}) tile={}x{} max_tiles={} max_polys={}",
            map_id,
            params.origin[0],
            params.origin[1],
            params.origin[2],
            params.tile_width,
            params.tile_height,
            params.max_tiles,
            params.max_polys
        );
        Ok(Self {
            loader,
            map_id,
            nav: NavMesh::new(&params)?,
            requested: HashSet::new(),
        })
    }

    /// The mesh assembled so far
    pub fn nav_mesh(&self) -> &NavMesh {
        &self.nav
    }

    /// Requests every tile covering the rectangle spanned by two positions
    fn ensure_tiles_loaded(&mut self, a: &[f32; 3], b: &[f32; 3]) {
        let (tx1, ty1) = self.nav.calc_tile_loc(a);
        let (tx2, ty2) = self.nav.calc_tile_loc(b);
        for ty in ty1.min(ty2)..=ty1.max(ty2) {
            for tx in tx1.min(tx2)..=tx1.max(tx2) {
                self.request_tile(tx, ty);
            }
        }
    }

    fn request_tile(&mut self, tx: i32, ty: i32) {
        if !self.requested.insert((tx, ty)) {
            return;
        }
        match self.loader.load_tile(self.map_id, tx, ty) {
            Ok(blob) => match self.nav.add_tile(&blob) {
                Ok(_) => debug!("nav tile ({tx}, {ty}) loaded"),
                Err(e) => warn!("nav tile ({tx}, {ty}) rejected: {e}"),
            },
            Err(e) => debug!("nav tile ({tx}, {ty}) unavailable: {e}"),
        }
    }

    /// Computes the walkable polyline between two world positions
    ///
    /// Success with `PARTIAL_RESULT` means the goal was unreachable and the
    /// returned polyline ends at the closest reachable point.
    pub fn find_path(&mut self, start: &[f32; 3], end: &[f32; 3]) -> (Status, Vec<Vec3>) {
        self.ensure_tiles_loaded(start, end);

        let filter = DefaultQueryFilter::default();
        let Ok(mut query) = NavMeshQuery::new(&self.nav, MAX_SEARCH_NODES) else {
            return (Status::FAILURE, Vec::new());
        };

        let (s1, start_ref, start_pt) = query.find_nearest_poly(start, &SEARCH_EXTENTS, &filter);
        let (s2, end_ref, end_pt) = query.find_nearest_poly(end, &SEARCH_EXTENTS, &filter);
        if s1.is_failure() || s2.is_failure() || start_ref.is_null() || end_ref.is_null() {
            debug!("no polygon near start or end position");
            return (Status::FAILURE | Status::INVALID_PARAM, Vec::new());
        }

        let mut polys = [PolyRef::NULL; MAX_PATH_POLYS];
        let (mut status, npolys) = query.find_path(
            start_ref,
            end_ref,
            &start_pt,
            &end_pt,
            &filter,
            &mut polys,
        );
        if status.is_failure() || npolys == 0 {
            return (status, Vec::new());
        }

        // If the corridor stops short of the goal, clamp the end position to
        // the last reachable polygon.
        let mut end_adj = end_pt;
        if polys[npolys - 1] != end_ref {
            let (cs, pt, _) = query.closest_point_on_poly(polys[npolys - 1], &end_pt);
            if cs.is_success() {
                end_adj = pt;
            }
        }

        let mut straight = [StraightPathVertex::default(); MAX_STRAIGHT_POINTS];
        let (ss, nstraight) = query.find_straight_path(
            &start_pt,
            &end_adj,
            &polys[..npolys],
            StraightPathOptions::empty(),
            &mut straight,
        );
        if ss.is_failure() {
            return (ss, Vec::new());
        }
        status |= Status(ss.detail());

        let points = straight[..nstraight]
            .iter()
            .map(|v| Vec3::from_array(v.pos))
            .collect();
        (status, points)
    }

    /// Total length of the walkable path between two positions, or None when
    /// no usable path exists
    pub fn path_length(&mut self, start: &[f32; 3], end: &[f32; 3]) -> Option<f32> {
        let (status, points) = self.find_path(start, end);
        if !status.is_success() || points.len() < 2 {
            return None;
        }
        let mut total = 0.0;
        for pair in points.windows(2) {
            total += pair[0].distance(pair[1]);
        }
        Some(total)
    }
}
