//! Navigation mesh query surface
//!
//! One `NavMeshQuery` owns the A* working memory (node pool and open queue)
//! and runs all read-only queries against a shared `NavMesh`: point
//! localization, the polygon-corridor path search, funnel string pulling and
//! the short 2D raycast. Instances are single-threaded; run one per thread
//! over the same mesh.

use bitflags::bitflags;

use crate::filter::QueryFilter;
use crate::nav_mesh::NavMesh;
use crate::node_pool::{NodeFlags, NodePool, NodeQueue};
use crate::poly_query::{CollectPolysQuery, FindNearestPolyQuery, PolyQuery};
use crate::status::Status;
use crate::tile::{MeshTile, Poly, PolyType, NULL_LINK, VERTS_PER_POLYGON};
use crate::PolyRef;
use tilenav_common::{
    clamp, dist_point_segment_sqr_2d, distance_pt_poly_edges_sqr, intersect_seg_seg_2d,
    intersect_segment_poly_2d, overlap_bounds, overlap_quant_bounds, sqr, tri_area_2d, vadd,
    vdist, vequal, visfinite, visfinite_2d, vlerp, vmax_mut, vmin_mut, vnormalize, vsub, Error,
    Result,
};

/// Search heuristic scale: a slight under-weight of the remaining straight
/// line distance breaks ties toward nodes closer to the goal
const H_SCALE: f32 = 0.999;

/// Batch size used when reporting polygons to a visitor
const QUERY_BATCH_SIZE: usize = 32;

bitflags! {
    /// Flags attached to the vertices of a straight path
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StraightPathFlags: u8 {
        /// The vertex is the path start
        const START = 0x01;
        /// The vertex is the path end
        const END = 0x02;
        /// The vertex enters an off-mesh connection
        const OFFMESH_CONNECTION = 0x04;
    }
}

bitflags! {
    /// Options for `find_straight_path`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StraightPathOptions: u32 {
        /// Emit a vertex at every portal where the area changes
        const AREA_CROSSINGS = 0x01;
        /// Emit a vertex at every portal crossing
        const ALL_CROSSINGS = 0x02;
    }
}

/// One vertex of a pulled string path
#[derive(Debug, Clone, Copy, Default)]
pub struct StraightPathVertex {
    pub pos: [f32; 3],
    pub flags: StraightPathFlags,
    /// Polygon entered at this vertex; null on the END vertex
    pub poly: PolyRef,
}

/// Result of a raycast
#[derive(Debug, Clone, Copy)]
pub struct RaycastHit {
    /// Hit parameter along the ray; `f32::MAX` when the end position was
    /// reached without hitting a wall
    pub t: f32,
    /// Outward 2D normal of the blocking wall edge; undefined unless a wall
    /// was hit with `0 < t < 1`
    pub hit_normal: [f32; 3],
    /// Index of the blocking edge in the final visited polygon
    pub hit_edge_index: i32,
}

impl Default for RaycastHit {
    fn default() -> Self {
        Self {
            t: 0.0,
            hit_normal: [0.0; 3],
            hit_edge_index: -1,
        }
    }
}

/// Query interface over a navigation mesh
pub struct NavMeshQuery<'a> {
    nav: &'a NavMesh,
    node_pool: NodePool,
    open_list: NodeQueue,
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a query with working memory for at most `max_nodes` search
    /// nodes
    pub fn new(nav: &'a NavMesh, max_nodes: usize) -> Result<Self> {
        if max_nodes == 0 || max_nodes > u32::MAX as usize / 2 {
            return Err(Error::InvalidParam("max_nodes out of range"));
        }
        Ok(Self {
            nav,
            node_pool: NodePool::new(max_nodes),
            open_list: NodeQueue::new(max_nodes),
        })
    }

    /// The mesh this query reads
    pub fn nav_mesh(&self) -> &'a NavMesh {
        self.nav
    }

    // ------------------------------------------------------------------
    // Point location

    /// Finds the polygon nearest to `center` within the search box
    ///
    /// A search box intersecting no polygon is not an error: the status is
    /// success and the returned reference is null.
    pub fn find_nearest_poly<F: QueryFilter>(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &F,
    ) -> (Status, PolyRef, [f32; 3]) {
        let mut query = FindNearestPolyQuery::new(self.nav, center);
        let status = self.query_polygons(center, half_extents, filter, &mut query);
        if status.is_failure() {
            return (status, PolyRef::NULL, *center);
        }
        (Status::SUCCESS, query.nearest_ref(), query.nearest_point())
    }

    /// Reports every polygon overlapping the search box to the visitor, in
    /// batches
    pub fn query_polygons<F: QueryFilter, Q: PolyQuery>(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &F,
        query: &mut Q,
    ) -> Status {
        if !visfinite(center) || !visfinite(half_extents) {
            return Status::FAILURE | Status::INVALID_PARAM;
        }

        let bmin = vsub(center, half_extents);
        let bmax = vadd(center, half_extents);

        let (minx, miny) = self.nav.calc_tile_loc(&bmin);
        let (maxx, maxy) = self.nav.calc_tile_loc(&bmax);

        let mut neis = [0u32; 32];
        for y in miny..=maxy {
            for x in minx..=maxx {
                let n = self.nav.tiles_at(x, y, &mut neis);
                for &slot in &neis[..n] {
                    self.query_polygons_in_tile(slot, &bmin, &bmax, filter, query);
                }
            }
        }
        Status::SUCCESS
    }

    /// Collects polygons overlapping the search box into a buffer
    pub fn query_polygons_into<F: QueryFilter>(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &F,
        polys: &mut [PolyRef],
    ) -> (Status, usize) {
        let mut collector = CollectPolysQuery::new(polys);
        let status = self.query_polygons(center, half_extents, filter, &mut collector);
        if status.is_failure() {
            return (status, 0);
        }
        let status = if collector.overflowed() {
            Status::SUCCESS | Status::BUFFER_TOO_SMALL
        } else {
            Status::SUCCESS
        };
        (status, collector.count())
    }

    /// Walks one tile's BV tree and feeds overlapping, filter-passing
    /// polygons to the visitor
    fn query_polygons_in_tile<F: QueryFilter, Q: PolyQuery>(
        &self,
        slot: u32,
        qmin: &[f32; 3],
        qmax: &[f32; 3],
        filter: &F,
        query: &mut Q,
    ) {
        let tile = self.nav.tile(slot);
        let Some(header) = &tile.header else {
            return;
        };
        let base = self.nav.poly_ref_base(slot);
        let mut batch = [PolyRef::NULL; QUERY_BATCH_SIZE];
        let mut n = 0;

        if !tile.bv_tree.is_empty() {
            let tbmin = &header.bmin;
            let tbmax = &header.bmax;
            let qfac = header.bv_quant_factor;

            // Clamp the query box onto the tile and quantize, rounding min
            // down to even and max up to odd so the comparison against node
            // bounds stays conservative.
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

                if is_leaf && overlap {
                    let r = PolyRef::new(base.id() | node.i as u64);
                    if filter.pass_filter(r, tile, &tile.polys[node.i as usize]) {
                        batch[n] = r;
                        n += 1;
                        if n == QUERY_BATCH_SIZE {
                            query.process(tile, &batch);
                            n = 0;
                        }
                    }
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
                let r = PolyRef::new(base.id() | i as u64);
                if !filter.pass_filter(r, tile, poly) {
                    continue;
                }
                let mut bmin = tile.vert(poly.verts[0] as usize);
                let mut bmax = bmin;
                for j in 1..poly.vert_count as usize {
                    let v = tile.vert(poly.verts[j] as usize);
                    vmin_mut(&mut bmin, &v);
                    vmax_mut(&mut bmax, &v);
                }
                if overlap_bounds(qmin, qmax, &bmin, &bmax) {
                    batch[n] = r;
                    n += 1;
                    if n == QUERY_BATCH_SIZE {
                        query.process(tile, &batch);
                        n = 0;
                    }
                }
            }
        }

        if n > 0 {
            query.process(tile, &batch[..n]);
        }
    }

    /// Closest point on a polygon, using the detail mesh for height
    pub fn closest_point_on_poly(&self, r: PolyRef, pos: &[f32; 3]) -> (Status, [f32; 3], bool) {
        if !self.nav.is_valid_poly_ref(r) || !visfinite(pos) {
            return (Status::FAILURE | Status::INVALID_PARAM, *pos, false);
        }
        match self.nav.closest_point_on_poly(r, pos) {
            Some((pt, over)) => (Status::SUCCESS, pt, over),
            None => (Status::FAILURE | Status::INVALID_PARAM, *pos, false),
        }
    }

    /// Closest point on the polygon's own vertex ring; cheaper than
    /// `closest_point_on_poly` and ignores the height detail
    pub fn closest_point_on_poly_boundary(&self, r: PolyRef, pos: &[f32; 3]) -> (Status, [f32; 3]) {
        let Some((tile, poly)) = self.nav.tile_and_poly(r) else {
            return (Status::FAILURE | Status::INVALID_PARAM, *pos);
        };
        if !visfinite(pos) {
            return (Status::FAILURE | Status::INVALID_PARAM, *pos);
        }
        match closest_point_on_poly_boundary(tile, poly, pos) {
            Some(pt) => (Status::SUCCESS, pt),
            None => (Status::FAILURE | Status::INVALID_PARAM, *pos),
        }
    }

    /// Height of the walkable surface at `pos`
    ///
    /// Fails when `pos` is outside the polygon's xz bounds. Off-mesh
    /// connections report the height interpolated along their segment.
    pub fn get_poly_height(&self, r: PolyRef, pos: &[f32; 3]) -> (Status, f32) {
        let Some((tile, poly)) = self.nav.tile_and_poly(r) else {
            return (Status::FAILURE | Status::INVALID_PARAM, 0.0);
        };
        if !visfinite_2d(pos) {
            return (Status::FAILURE | Status::INVALID_PARAM, 0.0);
        }

        if poly.poly_type() == PolyType::OffMeshConnection {
            let v0 = tile.vert(poly.verts[0] as usize);
            let v1 = tile.vert(poly.verts[1] as usize);
            let (_, t) = dist_point_segment_sqr_2d(pos, &v0, &v1);
            return (Status::SUCCESS, v0[1] + (v1[1] - v0[1]) * t);
        }

        match self
            .nav
            .poly_height(tile, poly, r.poly_index() as usize, pos)
        {
            Some(h) => (Status::SUCCESS, h),
            None => (Status::FAILURE | Status::INVALID_PARAM, 0.0),
        }
    }

    // ------------------------------------------------------------------
    // Path search

    /// Finds a polygon corridor from `start_ref` to `end_ref`
    ///
    /// The search keeps the best node seen so far; when the goal is
    /// unreachable the corridor toward the closest reachable polygon is
    /// returned with `PARTIAL_RESULT`. Exhausting the node pool adds
    /// `OUT_OF_NODES`; a corridor longer than the buffer keeps the end-most
    /// polygons and adds `BUFFER_TOO_SMALL`.
    pub fn find_path<F: QueryFilter>(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &F,
        path: &mut [PolyRef],
    ) -> (Status, usize) {
        let nav = self.nav;

        if !nav.is_valid_poly_ref(start_ref)
            || !nav.is_valid_poly_ref(end_ref)
            || !visfinite(start_pos)
            || !visfinite(end_pos)
            || path.is_empty()
        {
            return (Status::FAILURE | Status::INVALID_PARAM, 0);
        }

        if start_ref == end_ref {
            path[0] = start_ref;
            return (Status::SUCCESS, 1);
        }

        self.node_pool.clear();
        self.open_list.clear();

        let Some(start_idx) = self.node_pool.get_node(start_ref, 0) else {
            return (Status::FAILURE | Status::OUT_OF_MEMORY, 0);
        };
        {
            let start_node = self.node_pool.node_mut(start_idx);
            start_node.pos = *start_pos;
            start_node.pidx = 0;
            start_node.cost = 0.0;
            start_node.total = vdist(start_pos, end_pos) * H_SCALE;
            start_node.flags = NodeFlags::default();
            start_node.flags.insert(NodeFlags::OPEN);
        }
        self.open_list.push(&mut self.node_pool, start_idx);

        let mut last_best = start_idx;
        let mut last_best_cost = self.node_pool.node(start_idx).total;
        let mut out_of_nodes = false;

        while let Some(best_idx) = self.open_list.pop(&mut self.node_pool) {
            {
                let best = self.node_pool.node_mut(best_idx);
                best.flags.remove(NodeFlags::OPEN);
                best.flags.insert(NodeFlags::CLOSED);
            }

            let best_ref = self.node_pool.node(best_idx).id;
            if best_ref == end_ref {
                last_best = best_idx;
                break;
            }

            let best_pos = self.node_pool.node(best_idx).pos;
            let best_cost = self.node_pool.node(best_idx).cost;

            // Input refs were validated up front; internal link targets are
            // maintained by the mesh, so skip the checked lookup.
            let (best_tile, best_poly) = nav.tile_and_poly_unchecked(best_ref);

            let parent_ref = match self.node_pool.node(best_idx).pidx {
                0 => PolyRef::NULL,
                pidx => self.node_pool.node_at_idx(pidx).unwrap().id,
            };

            let mut link_idx = best_poly.first_link;
            while link_idx != NULL_LINK {
                let link = best_tile.links[link_idx as usize];
                link_idx = link.next;

                let neighbour_ref = link.target;
                // Skip null targets and do not expand back to where we came
                // from.
                if neighbour_ref.is_null() || neighbour_ref == parent_ref {
                    continue;
                }

                let (neighbour_tile, neighbour_poly) = nav.tile_and_poly_unchecked(neighbour_ref);
                if !filter.pass_filter(neighbour_ref, neighbour_tile, neighbour_poly) {
                    continue;
                }

                // Visits through different tile-boundary directions get
                // distinct node states.
                let cross_side = if link.side != 0xff { link.side >> 1 } else { 0 };

                let Some(neighbour_idx) = self.node_pool.get_node(neighbour_ref, cross_side)
                else {
                    out_of_nodes = true;
                    continue;
                };

                // First visit: cache the portal midpoint as the node position.
                if self.node_pool.node(neighbour_idx).flags.is_empty() {
                    if let Some((left, right)) = portal_points(
                        best_ref,
                        best_poly,
                        best_tile,
                        neighbour_ref,
                        neighbour_poly,
                        neighbour_tile,
                    ) {
                        self.node_pool.node_mut(neighbour_idx).pos = [
                            (left[0] + right[0]) * 0.5,
                            (left[1] + right[1]) * 0.5,
                            (left[2] + right[2]) * 0.5,
                        ];
                    }
                }

                let neighbour_pos = self.node_pool.node(neighbour_idx).pos;

                let (cost, heuristic) = if neighbour_ref == end_ref {
                    let cur_cost = filter.get_cost(&best_pos, &neighbour_pos, best_poly);
                    let end_cost = filter.get_cost(&neighbour_pos, end_pos, neighbour_poly);
                    (best_cost + cur_cost + end_cost, 0.0)
                } else {
                    let cur_cost = filter.get_cost(&best_pos, &neighbour_pos, best_poly);
                    (best_cost + cur_cost, vdist(&neighbour_pos, end_pos) * H_SCALE)
                };
                let total = cost + heuristic;

                {
                    let node = self.node_pool.node(neighbour_idx);
                    // Already queued or expanded with a better result.
                    if (node.flags.contains(NodeFlags::OPEN)
                        || node.flags.contains(NodeFlags::CLOSED))
                        && total >= node.total
                    {
                        continue;
                    }
                }

                let was_open = self
                    .node_pool
                    .node(neighbour_idx)
                    .flags
                    .contains(NodeFlags::OPEN);
                let parent_idx = self.node_pool.node_idx(best_idx);
                {
                    let node = self.node_pool.node_mut(neighbour_idx);
                    node.pidx = parent_idx;
                    node.cost = cost;
                    node.total = total;
                    // Clear only CLOSED; other flag bits are preserved.
                    node.flags.remove(NodeFlags::CLOSED);
                }

                if was_open {
                    self.open_list.modify(&mut self.node_pool, neighbour_idx);
                } else {
                    self.node_pool
                        .node_mut(neighbour_idx)
                        .flags
                        .insert(NodeFlags::OPEN);
                    self.open_list.push(&mut self.node_pool, neighbour_idx);
                }

                if heuristic < last_best_cost {
                    last_best_cost = heuristic;
                    last_best = neighbour_idx;
                }
            }
        }

        let (mut status, count) = self.path_to_node(last_best, path);
        if self.node_pool.node(last_best).id != end_ref {
            status |= Status::PARTIAL_RESULT;
        }
        if out_of_nodes {
            status |= Status::OUT_OF_NODES;
        }
        (status, count)
    }

    /// Reconstructs the corridor ending at a node by walking parent links
    fn path_to_node(&self, end_idx: usize, path: &mut [PolyRef]) -> (Status, usize) {
        let mut length = 0;
        let mut cur = end_idx;
        loop {
            length += 1;
            let pidx = self.node_pool.node(cur).pidx;
            if pidx == 0 {
                break;
            }
            cur = (pidx - 1) as usize;
        }

        // When the corridor does not fit, keep the end-most polygons.
        let mut cur = end_idx;
        let mut write_count = length;
        while write_count > path.len() {
            write_count -= 1;
            cur = (self.node_pool.node(cur).pidx - 1) as usize;
        }

        for i in (0..write_count).rev() {
            path[i] = self.node_pool.node(cur).id;
            let pidx = self.node_pool.node(cur).pidx;
            if pidx != 0 {
                cur = (pidx - 1) as usize;
            }
        }

        if length > path.len() {
            (Status::SUCCESS | Status::BUFFER_TOO_SMALL, path.len())
        } else {
            (Status::SUCCESS, length)
        }
    }

    // ------------------------------------------------------------------
    // String pulling

    /// Pulls the shortest polyline through a polygon corridor
    ///
    /// The start position is clamped to the first corridor polygon and the
    /// end position to the last. Every emitted vertex carries the reference
    /// of the polygon it enters; the END vertex carries the null reference.
    pub fn find_straight_path(
        &self,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        path: &[PolyRef],
        options: StraightPathOptions,
        out: &mut [StraightPathVertex],
    ) -> (Status, usize) {
        let mut count = 0usize;

        if !visfinite(start_pos)
            || !visfinite(end_pos)
            || path.is_empty()
            || path[0].is_null()
            || out.is_empty()
        {
            return (Status::FAILURE | Status::INVALID_PARAM, 0);
        }

        let Some(closest_start) = self.boundary_point(path[0], start_pos) else {
            return (Status::FAILURE | Status::INVALID_PARAM, 0);
        };
        let Some(mut closest_end) = self.boundary_point(path[path.len() - 1], end_pos) else {
            return (Status::FAILURE | Status::INVALID_PARAM, 0);
        };

        let stat = append_vertex(
            &closest_start,
            StraightPathFlags::START,
            path[0],
            out,
            &mut count,
        );
        if stat != Status::IN_PROGRESS {
            return (stat, count);
        }

        if path.len() > 1 {
            let mut portal_apex = closest_start;
            let mut portal_left = portal_apex;
            let mut portal_right = portal_apex;
            let mut apex_index = 0usize;
            let mut left_index = 0usize;
            let mut right_index = 0usize;

            let mut left_poly_type = PolyType::Ground;
            let mut right_poly_type = PolyType::Ground;

            let mut left_poly_ref = path[0];
            let mut right_poly_ref = path[0];

            let mut i = 0usize;
            while i < path.len() {
                let left;
                let right;
                let to_type;

                if i + 1 < path.len() {
                    match self.portal_points_refs(path[i], path[i + 1]) {
                        Some((l, r, _, t)) => {
                            left = l;
                            right = r;
                            to_type = t;
                        }
                        None => {
                            // path[i+1] is invalid: clamp the end to path[i]
                            // and return what we have.
                            let Some(clamped) = self.boundary_point(path[i], end_pos) else {
                                // Can only happen when the first polygon is
                                // invalid.
                                return (Status::FAILURE | Status::INVALID_PARAM, count);
                            };
                            closest_end = clamped;

                            if options.intersects(
                                StraightPathOptions::AREA_CROSSINGS
                                    | StraightPathOptions::ALL_CROSSINGS,
                            ) {
                                // Return value ignored, we are finishing anyway.
                                let _ = self.append_portals(
                                    apex_index,
                                    i,
                                    &closest_end,
                                    path,
                                    options,
                                    out,
                                    &mut count,
                                );
                            }
                            let _ = append_vertex(
                                &closest_end,
                                StraightPathFlags::empty(),
                                path[i],
                                out,
                                &mut count,
                            );

                            let mut status = Status::SUCCESS | Status::PARTIAL_RESULT;
                            if count >= out.len() {
                                status |= Status::BUFFER_TOO_SMALL;
                            }
                            return (status, count);
                        }
                    }

                    // Starting right on a portal: step past it first.
                    if i == 0 {
                        let (d, _) = dist_point_segment_sqr_2d(&portal_apex, &left, &right);
                        if d < sqr(0.001) {
                            i += 1;
                            continue;
                        }
                    }
                } else {
                    // End of the path.
                    left = closest_end;
                    right = closest_end;
                    to_type = PolyType::Ground;
                }

                // Right side of the funnel.
                if tri_area_2d(&portal_apex, &portal_right, &right) <= 0.0 {
                    if vequal(&portal_apex, &portal_right)
                        || tri_area_2d(&portal_apex, &portal_left, &right) > 0.0
                    {
                        portal_right = right;
                        right_poly_ref = if i + 1 < path.len() {
                            path[i + 1]
                        } else {
                            PolyRef::NULL
                        };
                        right_poly_type = to_type;
                        right_index = i;
                    } else {
                        if options.intersects(
                            StraightPathOptions::AREA_CROSSINGS | StraightPathOptions::ALL_CROSSINGS,
                        ) {
                            let stat = self.append_portals(
                                apex_index,
                                left_index,
                                &portal_left,
                                path,
                                options,
                                out,
                                &mut count,
                            );
                            if stat != Status::IN_PROGRESS {
                                return (stat, count);
                            }
                        }

                        portal_apex = portal_left;
                        apex_index = left_index;

                        let flags = if left_poly_ref.is_null() {
                            StraightPathFlags::END
                        } else if left_poly_type == PolyType::OffMeshConnection {
                            StraightPathFlags::OFFMESH_CONNECTION
                        } else {
                            StraightPathFlags::empty()
                        };

                        let stat = append_vertex(&portal_apex, flags, left_poly_ref, out, &mut count);
                        if stat != Status::IN_PROGRESS {
                            return (stat, count);
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;

                        // Restart the funnel from the new apex.
                        i = apex_index + 1;
                        continue;
                    }
                }

                // Left side of the funnel.
                if tri_area_2d(&portal_apex, &portal_left, &left) >= 0.0 {
                    if vequal(&portal_apex, &portal_left)
                        || tri_area_2d(&portal_apex, &portal_right, &left) < 0.0
                    {
                        portal_left = left;
                        left_poly_ref = if i + 1 < path.len() {
                            path[i + 1]
                        } else {
                            PolyRef::NULL
                        };
                        left_poly_type = to_type;
                        left_index = i;
                    } else {
                        if options.intersects(
                            StraightPathOptions::AREA_CROSSINGS | StraightPathOptions::ALL_CROSSINGS,
                        ) {
                            let stat = self.append_portals(
                                apex_index,
                                right_index,
                                &portal_right,
                                path,
                                options,
                                out,
                                &mut count,
                            );
                            if stat != Status::IN_PROGRESS {
                                return (stat, count);
                            }
                        }

                        portal_apex = portal_right;
                        apex_index = right_index;

                        let flags = if right_poly_ref.is_null() {
                            StraightPathFlags::END
                        } else if right_poly_type == PolyType::OffMeshConnection {
                            StraightPathFlags::OFFMESH_CONNECTION
                        } else {
                            StraightPathFlags::empty()
                        };

                        let stat =
                            append_vertex(&portal_apex, flags, right_poly_ref, out, &mut count);
                        if stat != Status::IN_PROGRESS {
                            return (stat, count);
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;

                        // Restart the funnel from the new apex.
                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }

            // Portals along the final straight segment.
            if options.intersects(
                StraightPathOptions::AREA_CROSSINGS | StraightPathOptions::ALL_CROSSINGS,
            ) {
                let stat = self.append_portals(
                    apex_index,
                    path.len() - 1,
                    &closest_end,
                    path,
                    options,
                    out,
                    &mut count,
                );
                if stat != Status::IN_PROGRESS {
                    return (stat, count);
                }
            }
        }

        // Return value ignored, we are finishing anyway.
        let _ = append_vertex(
            &closest_end,
            StraightPathFlags::END,
            PolyRef::NULL,
            out,
            &mut count,
        );

        let mut status = Status::SUCCESS;
        if count >= out.len() {
            status |= Status::BUFFER_TOO_SMALL;
        }
        (status, count)
    }

    /// Emits one vertex per portal crossed by the current straight segment
    #[allow(clippy::too_many_arguments)]
    fn append_portals(
        &self,
        start_idx: usize,
        end_idx: usize,
        end_pos: &[f32; 3],
        path: &[PolyRef],
        options: StraightPathOptions,
        out: &mut [StraightPathVertex],
        count: &mut usize,
    ) -> Status {
        let start_pos = out[*count - 1].pos;
        for i in start_idx..end_idx {
            let Some((from_tile, from_poly)) = self.nav.tile_and_poly(path[i]) else {
                return Status::FAILURE | Status::INVALID_PARAM;
            };
            let Some((to_tile, to_poly)) = self.nav.tile_and_poly(path[i + 1]) else {
                return Status::FAILURE | Status::INVALID_PARAM;
            };

            let Some((left, right)) = portal_points(
                path[i],
                from_poly,
                from_tile,
                path[i + 1],
                to_poly,
                to_tile,
            ) else {
                break;
            };

            if options.contains(StraightPathOptions::AREA_CROSSINGS)
                && from_poly.area() == to_poly.area()
            {
                // Only area transitions are wanted.
                continue;
            }

            if let Some((_, t)) = intersect_seg_seg_2d(&start_pos, end_pos, &left, &right) {
                let pt = vlerp(&left, &right, t);
                let stat = append_vertex(&pt, StraightPathFlags::empty(), path[i + 1], out, count);
                if stat != Status::IN_PROGRESS {
                    return stat;
                }
            }
        }
        Status::IN_PROGRESS
    }

    /// Portal between two adjacent polygons given just their references
    fn portal_points_refs(
        &self,
        from: PolyRef,
        to: PolyRef,
    ) -> Option<([f32; 3], [f32; 3], PolyType, PolyType)> {
        let (from_tile, from_poly) = self.nav.tile_and_poly(from)?;
        let (to_tile, to_poly) = self.nav.tile_and_poly(to)?;
        let (left, right) = portal_points(from, from_poly, from_tile, to, to_poly, to_tile)?;
        Some((left, right, from_poly.poly_type(), to_poly.poly_type()))
    }

    /// Clamps a position to a polygon's boundary, None when the reference is
    /// stale
    fn boundary_point(&self, r: PolyRef, pos: &[f32; 3]) -> Option<[f32; 3]> {
        let (tile, poly) = self.nav.tile_and_poly(r)?;
        closest_point_on_poly_boundary(tile, poly, pos)
    }

    // ------------------------------------------------------------------
    // Raycast

    /// Shoots a 2D ray along the walkable surface and reports where it hits
    /// a wall
    ///
    /// `hit.t == f32::MAX` means the end position was reached; the visited
    /// polygons form a valid corridor. The ray ignores the y coordinate of
    /// the end position, which limits this to short-distance checks.
    pub fn raycast<F: QueryFilter>(
        &self,
        start_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &F,
        path: &mut [PolyRef],
    ) -> (Status, RaycastHit, usize) {
        let nav = self.nav;
        let mut hit = RaycastHit::default();

        if !nav.is_valid_poly_ref(start_ref) || !visfinite(start_pos) || !visfinite(end_pos) {
            return (Status::FAILURE | Status::INVALID_PARAM, hit, 0);
        }

        let mut status = Status::SUCCESS;
        let mut verts = [0.0f32; (VERTS_PER_POLYGON + 1) * 3];
        let mut n = 0usize;

        let mut cur_ref = start_ref;
        let (mut tile, mut poly) = nav.tile_and_poly_unchecked(cur_ref);

        while !cur_ref.is_null() {
            // Cast the ray against the current polygon.
            let nv = tile.collect_poly_verts(poly, &mut verts);

            let Some((_, tmax, _, seg_max)) =
                intersect_segment_poly_2d(start_pos, end_pos, &verts, nv)
            else {
                // Could not hit the polygon, keep the old t and report hit.
                return (status, hit, n);
            };

            hit.hit_edge_index = seg_max;

            // Keep track of the furthest t so far.
            if tmax > hit.t {
                hit.t = tmax;
            }

            if n < path.len() {
                path[n] = cur_ref;
                n += 1;
            } else {
                status |= Status::BUFFER_TOO_SMALL;
            }

            // The ray end is inside the polygon.
            if seg_max == -1 {
                hit.t = f32::MAX;
                return (status, hit, n);
            }

            // Follow the link crossing the exit edge.
            let mut next_ref = PolyRef::NULL;
            let mut next_tile = tile;
            let mut next_poly = poly;

            let mut link_idx = poly.first_link;
            while link_idx != NULL_LINK {
                let link = tile.links[link_idx as usize];
                link_idx = link.next;

                if link.edge as i32 != seg_max {
                    continue;
                }

                let (candidate_tile, candidate_poly) = nav.tile_and_poly_unchecked(link.target);

                // Off-mesh connections cannot be raycast through.
                if candidate_poly.poly_type() == PolyType::OffMeshConnection {
                    continue;
                }

                if !filter.pass_filter(link.target, candidate_tile, candidate_poly) {
                    continue;
                }

                // Internal edges span the whole edge.
                if link.side == 0xff {
                    next_ref = link.target;
                    next_tile = candidate_tile;
                    next_poly = candidate_poly;
                    break;
                }

                // So do full external links.
                if link.bmin == 0 && link.bmax == 255 {
                    next_ref = link.target;
                    next_tile = candidate_tile;
                    next_poly = candidate_poly;
                    break;
                }

                // Partial external links: the crossing must fall inside the
                // quantized portal window on the boundary axis.
                let v0 = poly.verts[link.edge as usize] as usize;
                let v1 = poly.verts[(link.edge as usize + 1) % poly.vert_count as usize] as usize;
                let left = tile.vert(v0);
                let right = tile.vert(v1);

                let s = 1.0 / 255.0;
                if link.side == 0 || link.side == 4 {
                    let mut lmin = left[2] + (right[2] - left[2]) * (link.bmin as f32 * s);
                    let mut lmax = left[2] + (right[2] - left[2]) * (link.bmax as f32 * s);
                    if lmin > lmax {
                        std::mem::swap(&mut lmin, &mut lmax);
                    }
                    let z = start_pos[2] + (end_pos[2] - start_pos[2]) * tmax;
                    if z >= lmin && z <= lmax {
                        next_ref = link.target;
                        next_tile = candidate_tile;
                        next_poly = candidate_poly;
                        break;
                    }
                } else if link.side == 2 || link.side == 6 {
                    let mut lmin = left[0] + (right[0] - left[0]) * (link.bmin as f32 * s);
                    let mut lmax = left[0] + (right[0] - left[0]) * (link.bmax as f32 * s);
                    if lmin > lmax {
                        std::mem::swap(&mut lmin, &mut lmax);
                    }
                    let x = start_pos[0] + (end_pos[0] - start_pos[0]) * tmax;
                    if x >= lmin && x <= lmax {
                        next_ref = link.target;
                        next_tile = candidate_tile;
                        next_poly = candidate_poly;
                        break;
                    }
                }
            }

            if next_ref.is_null() {
                // No neighbour: the ray hit a wall. Compute its outward
                // normal from the blocked edge.
                let a = seg_max as usize;
                let b = if a + 1 < nv { a + 1 } else { 0 };
                let va = [verts[a * 3], verts[a * 3 + 1], verts[a * 3 + 2]];
                let vb = [verts[b * 3], verts[b * 3 + 1], verts[b * 3 + 2]];
                let dx = vb[0] - va[0];
                let dz = vb[2] - va[2];
                hit.hit_normal = [dz, 0.0, -dx];
                vnormalize(&mut hit.hit_normal);
                return (status, hit, n);
            }

            cur_ref = next_ref;
            tile = next_tile;
            poly = next_poly;
        }

        (status, hit, n)
    }
}

/// Appends a vertex to the straight path, merging coincident points by
/// overwriting the previous vertex's flags and reference
fn append_vertex(
    pos: &[f32; 3],
    flags: StraightPathFlags,
    r: PolyRef,
    out: &mut [StraightPathVertex],
    count: &mut usize,
) -> Status {
    if *count > 0 && vequal(&out[*count - 1].pos, pos) {
        out[*count - 1].flags = flags;
        out[*count - 1].poly = r;
    } else {
        if *count >= out.len() {
            return Status::SUCCESS | Status::BUFFER_TOO_SMALL;
        }
        out[*count] = StraightPathVertex {
            pos: *pos,
            flags,
            poly: r,
        };
        *count += 1;

        if *count >= out.len() {
            return Status::SUCCESS | Status::BUFFER_TOO_SMALL;
        }
        if flags == StraightPathFlags::END {
            return Status::SUCCESS;
        }
    }
    Status::IN_PROGRESS
}

/// Portal between two adjacent polygons
///
/// For off-mesh connections both sides collapse onto the anchor vertex. For
/// ground polygons the portal is the source polygon's shared edge, clipped
/// to the link's quantized sub-range when the edge is only partially shared
/// across a tile boundary.
fn portal_points(
    from: PolyRef,
    from_poly: &Poly,
    from_tile: &MeshTile,
    to: PolyRef,
    to_poly: &Poly,
    to_tile: &MeshTile,
) -> Option<([f32; 3], [f32; 3])> {
    // Find the link from -> to.
    let mut found = None;
    let mut link_idx = from_poly.first_link;
    while link_idx != NULL_LINK {
        let link = &from_tile.links[link_idx as usize];
        if link.target == to {
            found = Some(*link);
            break;
        }
        link_idx = link.next;
    }
    let link = found?;

    if from_poly.poly_type() == PolyType::OffMeshConnection {
        let v = from_poly.verts[link.edge as usize] as usize;
        let p = from_tile.vert(v);
        return Some((p, p));
    }

    if to_poly.poly_type() == PolyType::OffMeshConnection {
        let mut link_idx = to_poly.first_link;
        while link_idx != NULL_LINK {
            let back = &to_tile.links[link_idx as usize];
            if back.target == from {
                let v = to_poly.verts[back.edge as usize] as usize;
                let p = to_tile.vert(v);
                return Some((p, p));
            }
            link_idx = back.next;
        }
        return None;
    }

    // Portal is the shared edge of the source polygon.
    let v0 = from_poly.verts[link.edge as usize] as usize;
    let v1 = from_poly.verts[(link.edge as usize + 1) % from_poly.vert_count as usize] as usize;
    let mut left = from_tile.vert(v0);
    let mut right = from_tile.vert(v1);

    // Clip tile-boundary portals to the shared sub-range.
    if link.side != 0xff && (link.bmin != 0 || link.bmax != 255) {
        let s = 1.0 / 255.0;
        left = vlerp(&from_tile.vert(v0), &from_tile.vert(v1), link.bmin as f32 * s);
        right = vlerp(&from_tile.vert(v0), &from_tile.vert(v1), link.bmax as f32 * s);
    }

    Some((left, right))
}

/// Clamps a position onto a polygon's vertex ring
fn closest_point_on_poly_boundary(
    tile: &MeshTile,
    poly: &Poly,
    pos: &[f32; 3],
) -> Option<[f32; 3]> {
    let mut verts = [0.0f32; VERTS_PER_POLYGON * 3];
    let mut ed = [0.0f32; VERTS_PER_POLYGON];
    let mut et = [0.0f32; VERTS_PER_POLYGON];
    let nv = tile.collect_poly_verts(poly, &mut verts);
    if nv == 0 {
        return None;
    }

    let inside = distance_pt_poly_edges_sqr(pos, &verts, nv, &mut ed, &mut et);
    if inside {
        return Some(*pos);
    }

    // Clamp to the nearest edge.
    let mut imin = 0;
    for i in 1..nv {
        if ed[i] < ed[imin] {
            imin = i;
        }
    }
    let va = [
        verts[imin * 3],
        verts[imin * 3 + 1],
        verts[imin * 3 + 2],
    ];
    let j = (imin + 1) % nv;
    let vb = [verts[j * 3], verts[j * 3 + 1], verts[j * 3 + 2]];
    Some(vlerp(&va, &vb, et[imin]))
}
