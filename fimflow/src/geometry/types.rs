//! Core planar types: points, polylines, polygons, bounding boxes.

use serde::{Deserialize, Serialize};

/// A point in projected (planar) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// An ordered polyline.
///
/// Cross sections and river centerlines are both linestrings. Stationing
/// (distance along the line from its first vertex) is the shared measure
/// used by `interpolate` and `project`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineString {
    points: Vec<Point>,
}

impl LineString {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.len() < 2
    }

    pub fn first(&self) -> Option<Point> {
        self.points.first().copied()
    }

    pub fn last(&self) -> Option<Point> {
        self.points.last().copied()
    }

    /// Total length along the line.
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| w[0].distance(w[1]))
            .sum()
    }

    /// Point at `distance` along the line, clamped to the endpoints.
    pub fn interpolate(&self, distance: f64) -> Option<Point> {
        if self.points.is_empty() {
            return None;
        }
        if distance <= 0.0 {
            return self.first();
        }
        let mut remaining = distance;
        for w in self.points.windows(2) {
            let seg = w[0].distance(w[1]);
            if remaining <= seg && seg > 0.0 {
                let t = remaining / seg;
                return Some(Point::new(
                    w[0].x + t * (w[1].x - w[0].x),
                    w[0].y + t * (w[1].y - w[0].y),
                ));
            }
            remaining -= seg;
        }
        self.last()
    }

    /// Station of the closest point on the line to `p`.
    pub fn project(&self, p: Point) -> f64 {
        let mut best_station = 0.0;
        let mut best_dist = f64::INFINITY;
        let mut walked = 0.0;
        for w in self.points.windows(2) {
            let seg_len = w[0].distance(w[1]);
            let (dist, t) = point_segment_distance(p, w[0], w[1]);
            if dist < best_dist {
                best_dist = dist;
                best_station = walked + t * seg_len;
            }
            walked += seg_len;
        }
        best_station
    }

    /// Shortest distance from `p` to the line.
    pub fn distance_to_point(&self, p: Point) -> f64 {
        self.points
            .windows(2)
            .map(|w| point_segment_distance(p, w[0], w[1]).0)
            .fold(f64::INFINITY, f64::min)
    }

    /// True when any segments of the two lines intersect.
    pub fn intersects(&self, other: &LineString) -> bool {
        self.intersection(other).is_some()
    }

    /// First intersection point with another line, walking this line from
    /// its start.
    pub fn intersection(&self, other: &LineString) -> Option<Point> {
        for a in self.points.windows(2) {
            for b in other.points.windows(2) {
                if let Some(p) = super::segment_intersection(a[0], a[1], b[0], b[1]) {
                    return Some(p);
                }
            }
        }
        None
    }

    /// Line clipped to the stations of the first and last intersecting
    /// cross sections, extended by `extend` vertices on each side when
    /// available.
    pub fn clipped_to(&self, stations: &[f64]) -> LineString {
        if stations.is_empty() || self.is_empty() {
            return self.clone();
        }
        let lo = stations.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = stations.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut pts = Vec::new();
        if let Some(p) = self.interpolate(lo) {
            pts.push(p);
        }
        let mut walked = 0.0;
        for w in self.points.windows(2) {
            walked += w[0].distance(w[1]);
            if walked > lo && walked < hi {
                pts.push(w[1]);
            }
        }
        if let Some(p) = self.interpolate(hi) {
            pts.push(p);
        }
        LineString::new(pts)
    }

    /// Concatenates this line with another, dropping a duplicated joint.
    pub fn join(&self, other: &LineString) -> LineString {
        let mut pts = self.points.clone();
        for p in other.points() {
            if pts.last().map(|l| l.distance(*p) > 1e-9).unwrap_or(true) {
                pts.push(*p);
            }
        }
        LineString::new(pts)
    }

    pub fn bbox(&self) -> BBox {
        BBox::from_points(&self.points)
    }

    pub fn reversed(&self) -> LineString {
        LineString::new(self.points.iter().rev().copied().collect())
    }
}

fn point_segment_distance(p: Point, a: Point, b: Point) -> (f64, f64) {
    let len2 = (b.x - a.x).powi(2) + (b.y - a.y).powi(2);
    if len2 < f64::EPSILON {
        return (p.distance(a), 0.0);
    }
    let t = (((p.x - a.x) * (b.x - a.x) + (p.y - a.y) * (b.y - a.y)) / len2).clamp(0.0, 1.0);
    let proj = Point::new(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y));
    (p.distance(proj), t)
}

/// A simple polygon given by its exterior ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    exterior: Vec<Point>,
}

impl Polygon {
    /// Builds a polygon, closing the ring when the input is open.
    pub fn new(mut exterior: Vec<Point>) -> Self {
        if let (Some(first), Some(last)) = (exterior.first().copied(), exterior.last().copied()) {
            if first.distance(last) > 1e-9 {
                exterior.push(first);
            }
        }
        Self { exterior }
    }

    pub fn exterior(&self) -> &[Point] {
        &self.exterior
    }

    /// Even-odd ray cast point-in-polygon test.
    pub fn contains(&self, p: Point) -> bool {
        let mut inside = false;
        let n = self.exterior.len();
        if n < 4 {
            return false;
        }
        let mut j = n - 1;
        for i in 0..n {
            let (a, b) = (self.exterior[i], self.exterior[j]);
            if ((a.y > p.y) != (b.y > p.y))
                && (p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x)
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// True when the polygon fully covers the given line.
    pub fn covers_line(&self, line: &LineString) -> bool {
        line.points().iter().all(|p| self.contains(*p))
    }

    /// Length of the portion of `line` whose vertices fall inside the
    /// polygon, approximated segment-by-segment at the vertex level.
    pub fn line_overlap_length(&self, line: &LineString) -> f64 {
        line.points()
            .windows(2)
            .filter(|w| {
                let mid = Point::new((w[0].x + w[1].x) / 2.0, (w[0].y + w[1].y) / 2.0);
                self.contains(mid)
            })
            .map(|w| w[0].distance(w[1]))
            .sum()
    }

    pub fn bbox(&self) -> BBox {
        BBox::from_points(&self.exterior)
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn from_points(points: &[Point]) -> Self {
        let mut bbox = Self::empty();
        for p in points {
            bbox.expand_point(*p);
        }
        bbox
    }

    pub fn empty() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    pub fn expand_point(&mut self, p: Point) {
        self.min_x = self.min_x.min(p.x);
        self.min_y = self.min_y.min(p.y);
        self.max_x = self.max_x.max(p.x);
        self.max_y = self.max_y.max(p.y);
    }

    pub fn expand(&mut self, other: BBox) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// Box grown by `distance` on every side.
    pub fn buffered(&self, distance: f64) -> BBox {
        BBox::new(
            self.min_x - distance,
            self.min_y - distance,
            self.max_x + distance,
            self.max_y + distance,
        )
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn contains_bbox(&self, other: &BBox) -> bool {
        self.min_x <= other.min_x
            && self.max_x >= other.max_x
            && self.min_y <= other.min_y
            && self.max_y >= other.max_y
    }

    pub fn width(&self) -> f64 {
        (self.max_x - self.min_x).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.max_y - self.min_y).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagonal() -> LineString {
        LineString::new(vec![
            Point::new(0.0, 0.0),
            Point::new(3.0, 4.0),
            Point::new(6.0, 8.0),
        ])
    }

    #[test]
    fn test_length() {
        assert!((diagonal().length() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_interpolate_midpoint() {
        let p = diagonal().interpolate(5.0).unwrap();
        assert!((p.x - 3.0).abs() < 1e-9);
        assert!((p.y - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_interpolate_clamps() {
        let line = diagonal();
        assert_eq!(line.interpolate(-1.0).unwrap(), line.first().unwrap());
        assert_eq!(line.interpolate(100.0).unwrap(), line.last().unwrap());
    }

    #[test]
    fn test_project_recovers_station() {
        let line = diagonal();
        let p = line.interpolate(7.5).unwrap();
        assert!((line.project(p) - 7.5).abs() < 1e-6);
    }

    #[test]
    fn test_distance_to_point() {
        let line = LineString::new(vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)]);
        assert!((line.distance_to_point(Point::new(5.0, 3.0)) - 3.0).abs() < 1e-9);
        assert!((line.distance_to_point(Point::new(-4.0, 3.0)) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_intersection_walk_order() {
        let line = LineString::new(vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)]);
        let other = LineString::new(vec![
            Point::new(2.0, -1.0),
            Point::new(2.0, 1.0),
            Point::new(7.0, 1.0),
            Point::new(7.0, -1.0),
        ]);
        let p = line.intersection(&other).unwrap();
        assert!((p.x - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_join_drops_duplicate_joint() {
        let a = LineString::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)]);
        let b = LineString::new(vec![Point::new(1.0, 0.0), Point::new(2.0, 0.0)]);
        let joined = a.join(&b);
        assert_eq!(joined.points().len(), 3);
        assert!((joined.length() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_polygon_contains() {
        let square = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 4.0),
            Point::new(0.0, 4.0),
        ]);
        assert!(square.contains(Point::new(2.0, 2.0)));
        assert!(!square.contains(Point::new(5.0, 2.0)));
    }

    #[test]
    fn test_bbox_buffer_and_intersects() {
        let a = BBox::new(0.0, 0.0, 1.0, 1.0).buffered(1.0);
        let b = BBox::new(1.5, 1.5, 3.0, 3.0);
        assert!(a.intersects(&b));
        assert!(!BBox::new(0.0, 0.0, 1.0, 1.0).intersects(&b));
    }
}
