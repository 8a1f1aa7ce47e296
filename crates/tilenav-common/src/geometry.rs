//! Geometry primitives for navigation mesh queries
//!
//! Positions are `[f32; 3]` with the XZ plane horizontal and Y up. The 2D
//! variants operate on the XZ projection and ignore Y entirely.

use crate::Vec3;

/// Vector addition (a + b)
#[inline]
pub fn vadd(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// Vector subtraction (a - b)
#[inline]
pub fn vsub(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Scaled vector addition (a + b * s)
#[inline]
pub fn vmad(a: &[f32; 3], b: &[f32; 3], s: f32) -> [f32; 3] {
    [a[0] + b[0] * s, a[1] + b[1] * s, a[2] + b[2] * s]
}

/// Linear interpolation between two vectors (a toward b)
#[inline]
pub fn vlerp(a: &[f32; 3], b: &[f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

/// Dot product of two vectors
#[inline]
pub fn vdot(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Scalar length of the vector
#[inline]
pub fn vlen(v: &[f32; 3]) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Square of the scalar length of the vector
#[inline]
pub fn vlen_sqr(v: &[f32; 3]) -> f32 {
    v[0] * v[0] + v[1] * v[1] + v[2] * v[2]
}

/// Distance between two points
#[inline]
pub fn vdist(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    vlen(&vsub(b, a))
}

/// Square of the distance between two points
#[inline]
pub fn vdist_sqr(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    vlen_sqr(&vsub(b, a))
}

/// Distance between two points on the xz-plane
#[inline]
pub fn vdist_2d(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dx = b[0] - a[0];
    let dz = b[2] - a[2];
    (dx * dx + dz * dz).sqrt()
}

/// Square of the distance between two points on the xz-plane
#[inline]
pub fn vdist_2d_sqr(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dx = b[0] - a[0];
    let dz = b[2] - a[2];
    dx * dx + dz * dz
}

/// Component-wise minimum assignment
#[inline]
pub fn vmin_mut(dest: &mut [f32; 3], v: &[f32; 3]) {
    dest[0] = dest[0].min(v[0]);
    dest[1] = dest[1].min(v[1]);
    dest[2] = dest[2].min(v[2]);
}

/// Component-wise maximum assignment
#[inline]
pub fn vmax_mut(dest: &mut [f32; 3], v: &[f32; 3]) {
    dest[0] = dest[0].max(v[0]);
    dest[1] = dest[1].max(v[1]);
    dest[2] = dest[2].max(v[2]);
}

/// Normalizes the vector in place
#[inline]
pub fn vnormalize(v: &mut [f32; 3]) {
    let len = vlen(v);
    if len > 0.0 {
        let d = 1.0 / len;
        v[0] *= d;
        v[1] *= d;
        v[2] *= d;
    }
}

/// Sloppy colocation check of two points
#[inline]
pub fn vequal(a: &[f32; 3], b: &[f32; 3]) -> bool {
    const THR: f32 = 1.0 / 16384.0;
    vdist_sqr(a, b) < THR * THR
}

/// Checks that all vector components are finite
#[inline]
pub fn visfinite(v: &[f32; 3]) -> bool {
    v[0].is_finite() && v[1].is_finite() && v[2].is_finite()
}

/// Checks that the xz components are finite
#[inline]
pub fn visfinite_2d(v: &[f32; 3]) -> bool {
    v[0].is_finite() && v[2].is_finite()
}

/// xz-plane perp product of the two vectors (uz*vx - ux*vz)
#[inline]
pub fn vperp_2d(u: &[f32; 3], v: &[f32; 3]) -> f32 {
    u[2] * v[0] - u[0] * v[2]
}

/// Signed xz-plane area of the triangle ABC (doubled)
#[inline]
pub fn tri_area_2d(a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> f32 {
    let abx = b[0] - a[0];
    let abz = b[2] - a[2];
    let acx = c[0] - a[0];
    let acz = c[2] - a[2];
    acx * abz - abx * acz
}

/// Determines if two axis-aligned bounding boxes overlap
#[inline]
pub fn overlap_bounds(amin: &[f32; 3], amax: &[f32; 3], bmin: &[f32; 3], bmax: &[f32; 3]) -> bool {
    !(amin[0] > bmax[0]
        || amax[0] < bmin[0]
        || amin[1] > bmax[1]
        || amax[1] < bmin[1]
        || amin[2] > bmax[2]
        || amax[2] < bmin[2])
}

/// Determines if two quantized axis-aligned bounding boxes overlap
#[inline]
pub fn overlap_quant_bounds(
    amin: &[u16; 3],
    amax: &[u16; 3],
    bmin: &[u16; 3],
    bmax: &[u16; 3],
) -> bool {
    !(amin[0] > bmax[0]
        || amax[0] < bmin[0]
        || amin[1] > bmax[1]
        || amax[1] < bmin[1]
        || amin[2] > bmax[2]
        || amax[2] < bmin[2])
}

/// Squared xz-plane distance from a point to the segment (a, b), and the
/// parameter of the closest point along the segment
pub fn dist_point_segment_sqr_2d(p: &[f32; 3], a: &[f32; 3], b: &[f32; 3]) -> (f32, f32) {
    let pqx = b[0] - a[0];
    let pqz = b[2] - a[2];
    let mut dx = p[0] - a[0];
    let mut dz = p[2] - a[2];
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);
    dx = a[0] + t * pqx - p[0];
    dz = a[2] + t * pqz - p[2];
    (dx * dx + dz * dz, t)
}

/// Determines if the point is inside the polygon on the xz-plane (even-odd rule)
pub fn point_in_polygon_2d(pt: &[f32; 3], verts: &[f32], nverts: usize) -> bool {
    let mut inside = false;
    let mut j = nverts - 1;
    for i in 0..nverts {
        let vi = &verts[i * 3..i * 3 + 3];
        let vj = &verts[j * 3..j * 3 + 3];
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Point-in-polygon test that also reports, for every edge, the squared
/// distance to the edge and the parameter of the closest point on it.
/// `ed` and `et` must hold at least `nverts` entries.
pub fn distance_pt_poly_edges_sqr(
    pt: &[f32; 3],
    verts: &[f32],
    nverts: usize,
    ed: &mut [f32],
    et: &mut [f32],
) -> bool {
    let mut inside = false;
    let mut j = nverts - 1;
    for i in 0..nverts {
        let vi: [f32; 3] = verts[i * 3..i * 3 + 3].try_into().unwrap();
        let vj: [f32; 3] = verts[j * 3..j * 3 + 3].try_into().unwrap();
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        let (d, t) = dist_point_segment_sqr_2d(pt, &vj, &vi);
        ed[j] = d;
        et[j] = t;
        j = i;
    }
    inside
}

/// Intersects two 2D segments, returning the parameters along each when the
/// supporting lines cross. Parallel segments return None.
pub fn intersect_seg_seg_2d(
    ap: &[f32; 3],
    aq: &[f32; 3],
    bp: &[f32; 3],
    bq: &[f32; 3],
) -> Option<(f32, f32)> {
    let u = vsub(aq, ap);
    let v = vsub(bq, bp);
    let w = vsub(ap, bp);
    let d = vperp_2d(&u, &v);
    if d.abs() < 1e-6 {
        return None;
    }
    let s = vperp_2d(&v, &w) / d;
    let t = vperp_2d(&u, &w) / d;
    Some((s, t))
}

/// Intersects the 2D segment (p0, p1) with a convex polygon boundary.
/// Returns (tmin, tmax, seg_min, seg_max) where seg_min/seg_max are the
/// entry and exit edge indices, or -1 when the corresponding endpoint lies
/// inside the polygon.
pub fn intersect_segment_poly_2d(
    p0: &[f32; 3],
    p1: &[f32; 3],
    verts: &[f32],
    nverts: usize,
) -> Option<(f32, f32, i32, i32)> {
    const EPS: f32 = 0.000_000_01;

    let mut tmin = 0.0f32;
    let mut tmax = 1.0f32;
    let mut seg_min = -1i32;
    let mut seg_max = -1i32;

    let dir = vsub(p1, p0);

    let mut j = nverts - 1;
    for i in 0..nverts {
        let vi: [f32; 3] = verts[i * 3..i * 3 + 3].try_into().unwrap();
        let vj: [f32; 3] = verts[j * 3..j * 3 + 3].try_into().unwrap();
        let edge = vsub(&vi, &vj);
        let diff = vsub(p0, &vj);
        let n = vperp_2d(&edge, &diff);
        let d = vperp_2d(&dir, &edge);
        if d.abs() < EPS {
            // Segment is nearly parallel to this edge
            if n < 0.0 {
                return None;
            }
            j = i;
            continue;
        }
        let t = n / d;
        if d < 0.0 {
            // Crossing into the polygon
            if t > tmin {
                tmin = t;
                seg_min = j as i32;
                if tmin > tmax {
                    return None;
                }
            }
        } else {
            // Crossing out of the polygon
            if t < tmax {
                tmax = t;
                seg_max = j as i32;
                if tmax < tmin {
                    return None;
                }
            }
        }
        j = i;
    }

    Some((tmin, tmax, seg_min, seg_max))
}

/// Closest point on a triangle to the reference point
pub fn closest_point_on_triangle(p: &[f32; 3], a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> [f32; 3] {
    let ab = vsub(b, a);
    let ac = vsub(c, a);
    let ap = vsub(p, a);
    let d1 = vdot(&ab, &ap);
    let d2 = vdot(&ac, &ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = vsub(p, b);
    let d3 = vdot(&ab, &bp);
    let d4 = vdot(&ac, &bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return vmad(a, &ab, v);
    }

    let cp = vsub(p, c);
    let d5 = vdot(&ab, &cp);
    let d6 = vdot(&ac, &cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return vmad(a, &ac, w);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        let bc = vsub(c, b);
        return vmad(b, &bc, w);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    vmad(&vmad(a, &ab, v), &ac, w)
}

/// Height of the triangle at the point's xz location, if the point projects
/// inside the triangle. Degenerate triangles return None.
pub fn closest_height_point_triangle(
    p: &[f32; 3],
    a: &[f32; 3],
    b: &[f32; 3],
    c: &[f32; 3],
) -> Option<f32> {
    const EPS: f32 = 1e-6;

    let v0 = vsub(c, a);
    let v1 = vsub(b, a);
    let v2 = vsub(p, a);

    // Scaled barycentric coordinates
    let mut denom = v0[0] * v1[2] - v0[2] * v1[0];
    if denom.abs() < EPS {
        return None;
    }
    let mut u = v1[2] * v2[0] - v1[0] * v2[2];
    let mut v = v0[0] * v2[2] - v0[2] * v2[0];
    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    if u >= 0.0 && v >= 0.0 && (u + v) <= denom {
        return Some(a[1] + (v0[1] * u + v1[1] * v) / denom);
    }
    None
}

/// Converts an array position to a glam vector
#[inline]
pub fn to_vec3(v: &[f32; 3]) -> Vec3 {
    Vec3::from_array(*v)
}

/// Converts a glam vector to an array position
#[inline]
pub fn from_vec3(v: Vec3) -> [f32; 3] {
    v.to_array()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tri_area_2d_sign() {
        let a = [0.0, 0.0, 0.0];
        let b = [1.0, 0.0, 0.0];
        let c = [0.0, 0.0, 1.0];
        // Counter-clockwise on xz gives a negative doubled area with this
        // orientation convention, clockwise the opposite.
        assert!(tri_area_2d(&a, &b, &c) < 0.0);
        assert!(tri_area_2d(&a, &c, &b) > 0.0);
    }

    #[test]
    fn test_point_in_polygon() {
        let verts = [0.0, 0.0, 0.0, 0.0, 0.0, 4.0, 4.0, 0.0, 4.0, 4.0, 0.0, 0.0];
        assert!(point_in_polygon_2d(&[2.0, 0.0, 2.0], &verts, 4));
        assert!(!point_in_polygon_2d(&[5.0, 0.0, 2.0], &verts, 4));
        assert!(!point_in_polygon_2d(&[-0.1, 0.0, 2.0], &verts, 4));
    }

    #[test]
    fn test_dist_point_segment_2d() {
        let a = [0.0, 0.0, 0.0];
        let b = [4.0, 0.0, 0.0];
        let (d, t) = dist_point_segment_sqr_2d(&[2.0, 5.0, 3.0], &a, &b);
        assert!((d - 9.0).abs() < 1e-6);
        assert!((t - 0.5).abs() < 1e-6);
        // Clamped to the endpoint
        let (d, t) = dist_point_segment_sqr_2d(&[6.0, 0.0, 0.0], &a, &b);
        assert!((d - 4.0).abs() < 1e-6);
        assert!((t - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_intersect_seg_seg_2d() {
        let ap = [0.0, 0.0, 0.0];
        let aq = [4.0, 0.0, 4.0];
        let bp = [0.0, 0.0, 4.0];
        let bq = [4.0, 0.0, 0.0];
        let (s, t) = intersect_seg_seg_2d(&ap, &aq, &bp, &bq).unwrap();
        assert!((s - 0.5).abs() < 1e-6);
        assert!((t - 0.5).abs() < 1e-6);

        // Parallel segments
        let bp = [0.0, 0.0, 1.0];
        let bq = [4.0, 0.0, 5.0];
        assert!(intersect_seg_seg_2d(&ap, &aq, &bp, &bq).is_none());
    }

    #[test]
    fn test_intersect_segment_poly_2d() {
        // Wound with the interior on the right of each directed edge, the
        // convention navigation polygons use.
        let verts = [0.0, 0.0, 0.0, 0.0, 0.0, 4.0, 4.0, 0.0, 4.0, 4.0, 0.0, 0.0];
        // Segment crossing the whole polygon
        let (tmin, tmax, seg_min, seg_max) =
            intersect_segment_poly_2d(&[-2.0, 0.0, 2.0], &[6.0, 0.0, 2.0], &verts, 4).unwrap();
        assert!(tmin > 0.0 && tmin < tmax && tmax < 1.0);
        assert!(seg_min >= 0);
        assert!(seg_max >= 0);

        // Segment ending inside the polygon: no exit edge
        let (_, tmax, _, seg_max) =
            intersect_segment_poly_2d(&[2.0, 0.0, 2.0], &[3.0, 0.0, 2.0], &verts, 4).unwrap();
        assert_eq!(seg_max, -1);
        assert!((tmax - 1.0).abs() < 1e-6);

        // Segment entirely outside
        assert!(
            intersect_segment_poly_2d(&[-2.0, 0.0, -2.0], &[-1.0, 0.0, -2.0], &verts, 4).is_none()
        );
    }

    #[test]
    fn test_closest_point_on_triangle() {
        let a = [0.0, 0.0, 0.0];
        let b = [1.0, 0.0, 0.0];
        let c = [0.0, 0.0, 1.0];

        let inside = closest_point_on_triangle(&[0.25, 1.0, 0.25], &a, &b, &c);
        assert!((inside[0] - 0.25).abs() < 1e-6);
        assert!(inside[1].abs() < 1e-6);
        assert!((inside[2] - 0.25).abs() < 1e-6);

        let clamped = closest_point_on_triangle(&[2.0, 0.0, -1.0], &a, &b, &c);
        assert_eq!(clamped, b);
    }

    #[test]
    fn test_closest_height_point_triangle() {
        let a = [0.0, 0.0, 0.0];
        let b = [4.0, 4.0, 0.0];
        let c = [0.0, 0.0, 4.0];
        let h = closest_height_point_triangle(&[2.0, 0.0, 1.0], &a, &b, &c).unwrap();
        assert!((h - 2.0).abs() < 1e-4);

        // Outside the triangle
        assert!(closest_height_point_triangle(&[5.0, 0.0, 5.0], &a, &b, &c).is_none());

        // Degenerate triangle
        assert!(closest_height_point_triangle(&[0.0, 0.0, 0.0], &a, &a, &a).is_none());
    }
}
