//! Planar geometry kernels for conflation and clipping.
//!
//! Everything in this module works in projected coordinates (the hydrofabric
//! CRS); there is no spherical math. The kernels are intentionally small:
//! cross-section polylines, river centerlines, and the concave hulls built
//! from them only need length/station arithmetic, segment intersection, and
//! point-in-polygon tests.

mod types;

pub use types::{BBox, LineString, Point, Polygon};

/// Intersection of two line segments `a1→a2` and `b1→b2`, if any.
///
/// Collinear overlaps report the midpoint of the shared extent; touching
/// endpoints count as intersections.
pub fn segment_intersection(a1: Point, a2: Point, b1: Point, b2: Point) -> Option<Point> {
    let r = Point::new(a2.x - a1.x, a2.y - a1.y);
    let s = Point::new(b2.x - b1.x, b2.y - b1.y);
    let denom = cross(r, s);
    let qp = Point::new(b1.x - a1.x, b1.y - a1.y);

    if denom.abs() < f64::EPSILON {
        // Parallel. Check collinear overlap.
        if cross(qp, r).abs() > f64::EPSILON {
            return None;
        }
        let r_len2 = r.x * r.x + r.y * r.y;
        if r_len2 < f64::EPSILON {
            return None;
        }
        let t0 = (qp.x * r.x + qp.y * r.y) / r_len2;
        let t1 = t0 + (s.x * r.x + s.y * r.y) / r_len2;
        let (lo, hi) = (t0.min(t1).max(0.0), t0.max(t1).min(1.0));
        if lo > hi {
            return None;
        }
        let mid = (lo + hi) / 2.0;
        return Some(Point::new(a1.x + mid * r.x, a1.y + mid * r.y));
    }

    let t = cross(qp, s) / denom;
    let u = cross(qp, r) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(Point::new(a1.x + t * r.x, a1.y + t * r.y))
    } else {
        None
    }
}

fn cross(a: Point, b: Point) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Builds the concave hull of an ordered set of cross-section polylines.
///
/// Cross sections are drawn bank-to-bank and ordered upstream to downstream.
/// The hull chains the full upstream section, the left endpoints of the
/// interior sections, the full downstream section reversed, and the right
/// endpoints walked back upstream. Junction polygons, when present, are
/// spliced into the left chain so the hull covers the confluence area.
pub fn xs_concave_hull(sections: &[LineString], junctions: &[Polygon]) -> Option<Polygon> {
    if sections.len() < 2 {
        return None;
    }
    let first = sections.first()?;
    let last = sections.last()?;

    let mut ring: Vec<Point> = first.points().to_vec();
    for xs in &sections[1..sections.len() - 1] {
        if let Some(p) = xs.points().last() {
            ring.push(*p);
        }
    }
    ring.extend(last.points().iter().rev().copied());
    for xs in sections[1..sections.len() - 1].iter().rev() {
        if let Some(p) = xs.points().first() {
            ring.push(*p);
        }
    }
    for junction in junctions {
        ring.extend(junction.exterior().iter().copied());
    }
    Some(Polygon::new(ring))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_intersection_crossing() {
        let p = segment_intersection(
            Point::new(0.0, 0.0),
            Point::new(2.0, 2.0),
            Point::new(0.0, 2.0),
            Point::new(2.0, 0.0),
        )
        .expect("segments cross");
        assert!((p.x - 1.0).abs() < 1e-9);
        assert!((p.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_segment_intersection_disjoint() {
        let p = segment_intersection(
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(1.0, 1.0),
        );
        assert!(p.is_none());
    }

    #[test]
    fn test_segment_intersection_touching_endpoint() {
        let p = segment_intersection(
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
        );
        assert!(p.is_some());
    }

    #[test]
    fn test_hull_from_parallel_sections() {
        let sections = vec![
            LineString::new(vec![Point::new(0.0, 2.0), Point::new(4.0, 2.0)]),
            LineString::new(vec![Point::new(0.0, 1.0), Point::new(4.0, 1.0)]),
            LineString::new(vec![Point::new(0.0, 0.0), Point::new(4.0, 0.0)]),
        ];
        let hull = xs_concave_hull(&sections, &[]).expect("hull");
        assert!(hull.contains(Point::new(2.0, 1.0)));
        assert!(!hull.contains(Point::new(5.0, 1.0)));
    }

    #[test]
    fn test_hull_requires_two_sections() {
        let one = vec![LineString::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
        ])];
        assert!(xs_concave_hull(&one, &[]).is_none());
    }
}
