//! Polygon admission and traversal cost
//!
//! The search calls `get_cost` once per expanded edge, so filters are a
//! generic parameter at the query call sites rather than trait objects. For
//! A* to stay admissible the cost must never be less than the distance
//! between the two points.

use crate::tile::{MeshTile, Poly, PolyFlags, MAX_AREAS};
use crate::PolyRef;
use tilenav_common::vdist;

/// Decides which polygons a query may enter and what traversal costs
pub trait QueryFilter {
    /// Returns true if the polygon may be visited
    fn pass_filter(&self, r: PolyRef, tile: &MeshTile, poly: &Poly) -> bool;

    /// Cost of moving from `pa` to `pb` across `cur_poly`
    fn get_cost(&self, pa: &[f32; 3], pb: &[f32; 3], cur_poly: &Poly) -> f32;
}

/// Flag-mask filter with a per-area cost table
///
/// A polygon passes when it shares at least one bit with `include_flags`
/// and none with `exclude_flags`; a polygon with no flags at all is never
/// considered.
#[derive(Debug, Clone)]
pub struct DefaultQueryFilter {
    /// Traversal cost multiplier per area id
    pub area_cost: [f32; MAX_AREAS],
    /// At least one of these flags must be set on a polygon
    pub include_flags: PolyFlags,
    /// None of these flags may be set on a polygon
    pub exclude_flags: PolyFlags,
}

impl Default for DefaultQueryFilter {
    fn default() -> Self {
        Self {
            area_cost: [1.0; MAX_AREAS],
            include_flags: PolyFlags::all(),
            exclude_flags: PolyFlags::empty(),
        }
    }
}

impl QueryFilter for DefaultQueryFilter {
    #[inline]
    fn pass_filter(&self, _r: PolyRef, _tile: &MeshTile, poly: &Poly) -> bool {
        poly.flags.intersects(self.include_flags) && !poly.flags.intersects(self.exclude_flags)
    }

    #[inline]
    fn get_cost(&self, pa: &[f32; 3], pb: &[f32; 3], cur_poly: &Poly) -> f32 {
        vdist(pa, pb) * self.area_cost[cur_poly.area() as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{PolyType, NULL_LINK, VERTS_PER_POLYGON};

    fn poly_with(flags: PolyFlags, area: u8) -> Poly {
        Poly {
            first_link: NULL_LINK,
            verts: [0; VERTS_PER_POLYGON],
            neis: [0; VERTS_PER_POLYGON],
            flags,
            vert_count: 3,
            area_and_type: Poly::pack_area_and_type(area, PolyType::Ground),
        }
    }

    #[test]
    fn test_include_exclude() {
        let tile = MeshTile::default();
        let r = PolyRef::new(1);

        let mut filter = DefaultQueryFilter::default();
        assert!(filter.pass_filter(r, &tile, &poly_with(PolyFlags::WALK, 0)));
        // No flags at all never passes.
        assert!(!filter.pass_filter(r, &tile, &poly_with(PolyFlags::empty(), 0)));

        filter.include_flags = PolyFlags::WALK;
        filter.exclude_flags = PolyFlags::SWIM;
        assert!(filter.pass_filter(r, &tile, &poly_with(PolyFlags::WALK, 0)));
        assert!(!filter.pass_filter(r, &tile, &poly_with(PolyFlags::SWIM, 0)));
        // Both include and exclude set: excluded wins.
        assert!(!filter.pass_filter(r, &tile, &poly_with(PolyFlags::WALK | PolyFlags::SWIM, 0)));
    }

    #[test]
    fn test_cost_scales_by_area() {
        let mut filter = DefaultQueryFilter::default();
        filter.area_cost[5] = 10.0;

        let a = [0.0, 0.0, 0.0];
        let b = [3.0, 0.0, 4.0];
        assert!((filter.get_cost(&a, &b, &poly_with(PolyFlags::WALK, 0)) - 5.0).abs() < 1e-6);
        assert!((filter.get_cost(&a, &b, &poly_with(PolyFlags::WALK, 5)) - 50.0).abs() < 1e-6);
    }
}
