//! Batched polygon query visitors

use crate::nav_mesh::NavMesh;
use crate::tile::MeshTile;
use crate::PolyRef;
use tilenav_common::vdist_sqr;

/// Receives batches of polygons touched by a spatial query
///
/// `process` is invoked repeatedly until every overlapping polygon has been
/// reported; a batch never outlives the call, so implementations copy what
/// they need.
pub trait PolyQuery {
    /// Called for each batch of polygons from one tile
    fn process(&mut self, tile: &MeshTile, refs: &[PolyRef]);
}

/// Collects polygon references into a caller buffer
pub struct CollectPolysQuery<'a> {
    polys: &'a mut [PolyRef],
    count: usize,
    overflow: bool,
}

impl<'a> CollectPolysQuery<'a> {
    pub fn new(polys: &'a mut [PolyRef]) -> Self {
        Self {
            polys,
            count: 0,
            overflow: false,
        }
    }

    /// Number of collected polygons
    pub fn count(&self) -> usize {
        self.count
    }

    /// True when more polygons were reported than the buffer could hold
    pub fn overflowed(&self) -> bool {
        self.overflow
    }
}

impl PolyQuery for CollectPolysQuery<'_> {
    fn process(&mut self, _tile: &MeshTile, refs: &[PolyRef]) {
        let left = self.polys.len() - self.count;
        let to_copy = if refs.len() > left {
            self.overflow = true;
            left
        } else {
            refs.len()
        };
        self.polys[self.count..self.count + to_copy].copy_from_slice(&refs[..to_copy]);
        self.count += to_copy;
    }
}

/// Tracks the polygon nearest to a center point
pub struct FindNearestPolyQuery<'a> {
    nav: &'a NavMesh,
    center: [f32; 3],
    nearest_distance_sqr: f32,
    nearest_ref: PolyRef,
    nearest_point: [f32; 3],
    over_poly: bool,
}

impl<'a> FindNearestPolyQuery<'a> {
    pub fn new(nav: &'a NavMesh, center: &[f32; 3]) -> Self {
        Self {
            nav,
            center: *center,
            nearest_distance_sqr: f32::MAX,
            nearest_ref: PolyRef::NULL,
            nearest_point: *center,
            over_poly: false,
        }
    }

    pub fn nearest_ref(&self) -> PolyRef {
        self.nearest_ref
    }

    pub fn nearest_point(&self) -> [f32; 3] {
        self.nearest_point
    }

    pub fn is_over_poly(&self) -> bool {
        self.over_poly
    }
}

impl PolyQuery for FindNearestPolyQuery<'_> {
    fn process(&mut self, tile: &MeshTile, refs: &[PolyRef]) {
        let climb = tile.header.map(|h| h.walkable_climb).unwrap_or(0.0);
        for &r in refs {
            let Some((closest, over_poly)) = self.nav.closest_point_on_poly(r, &self.center)
            else {
                continue;
            };

            // A polygon directly above or below the center within climb
            // reach beats a closer straight-line candidate.
            let d = if over_poly {
                let h = (self.center[1] - closest[1]).abs() - climb;
                if h > 0.0 {
                    h * h
                } else {
                    0.0
                }
            } else {
                vdist_sqr(&self.center, &closest)
            };

            if d < self.nearest_distance_sqr {
                self.nearest_distance_sqr = d;
                self.nearest_ref = r;
                self.nearest_point = closest;
                self.over_poly = over_poly;
            }
        }
    }
}
