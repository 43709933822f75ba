//! Synthetic rating curves: monotone discharge → stage mappings.

/// A monotone, finite stage-discharge curve at one cross section.
///
/// Points are kept sorted by discharge; stages are made non-decreasing on
/// construction (solver output can carry sub-tolerance wiggles).
#[derive(Debug, Clone, PartialEq)]
pub struct RatingCurve {
    points: Vec<(f64, f64)>,
}

impl RatingCurve {
    /// Builds a curve from unordered (discharge, stage) samples.
    ///
    /// Duplicate discharges keep the last stage seen.
    pub fn from_points(mut samples: Vec<(f64, f64)>) -> Self {
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        samples.dedup_by(|a, b| (a.0 - b.0).abs() < 1e-9);
        let mut running_max = f64::NEG_INFINITY;
        for point in &mut samples {
            running_max = running_max.max(point.1);
            point.1 = running_max;
        }
        Self { points: samples }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    pub fn min_stage(&self) -> Option<f64> {
        self.points.first().map(|p| p.1)
    }

    pub fn max_stage(&self) -> Option<f64> {
        self.points.last().map(|p| p.1)
    }

    /// Stage at `discharge`, linearly interpolated and clamped to the curve
    /// extent.
    pub fn stage_at(&self, discharge: f64) -> Option<f64> {
        interpolate(&self.points, discharge)
    }

    /// Discharge producing `stage`, linearly interpolated on the inverted
    /// curve and clamped to the curve extent.
    pub fn discharge_at(&self, stage: f64) -> Option<f64> {
        let inverted: Vec<(f64, f64)> = self.points.iter().map(|(q, s)| (*s, *q)).collect();
        interpolate(&inverted, stage)
    }

    /// Resamples the curve to discharges hitting evenly spaced stages.
    ///
    /// The stage ladder starts at the curve minimum floored to the nearest
    /// `increment` and steps to the maximum; the resulting discharges are
    /// clamped to the observed flow range.
    pub fn discharges_for_stage_increment(&self, increment: f64) -> Vec<f64> {
        let (Some(min_stage), Some(max_stage)) = (self.min_stage(), self.max_stage()) else {
            return Vec::new();
        };
        if increment <= 0.0 {
            return Vec::new();
        }
        let start = (min_stage / increment).floor() * increment;
        let mut discharges = Vec::new();
        let mut stage = start;
        while stage <= max_stage + increment / 2.0 {
            let clamped = stage.clamp(min_stage, max_stage);
            if let Some(q) = self.discharge_at(clamped) {
                if discharges
                    .last()
                    .map(|last: &f64| (q - last).abs() > 1e-9)
                    .unwrap_or(true)
                {
                    discharges.push(q);
                }
            }
            stage += increment;
        }
        discharges
    }
}

fn interpolate(points: &[(f64, f64)], x: f64) -> Option<f64> {
    let first = points.first()?;
    let last = points.last()?;
    if x <= first.0 {
        return Some(first.1);
    }
    if x >= last.0 {
        return Some(last.1);
    }
    for pair in points.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x >= x0 && x <= x1 {
            if (x1 - x0).abs() < 1e-12 {
                return Some(y1);
            }
            let t = (x - x0) / (x1 - x0);
            return Some(y0 + t * (y1 - y0));
        }
    }
    Some(last.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> RatingCurve {
        RatingCurve::from_points(vec![
            (100.0, 161.0),
            (400.0, 163.0),
            (200.0, 162.0),
            (800.0, 165.0),
        ])
    }

    #[test]
    fn test_points_sorted_by_discharge() {
        let discharges: Vec<f64> = curve().points().iter().map(|p| p.0).collect();
        assert_eq!(discharges, vec![100.0, 200.0, 400.0, 800.0]);
    }

    #[test]
    fn test_stage_interpolation() {
        let curve = curve();
        assert_eq!(curve.stage_at(300.0), Some(162.5));
        // Clamped at the ends.
        assert_eq!(curve.stage_at(50.0), Some(161.0));
        assert_eq!(curve.stage_at(9999.0), Some(165.0));
    }

    #[test]
    fn test_discharge_inversion() {
        let curve = curve();
        assert_eq!(curve.discharge_at(162.5), Some(300.0));
        assert_eq!(curve.discharge_at(100.0), Some(100.0));
    }

    #[test]
    fn test_monotone_enforcement() {
        let curve = RatingCurve::from_points(vec![(100.0, 162.0), (200.0, 161.5), (300.0, 163.0)]);
        let stages: Vec<f64> = curve.points().iter().map(|p| p.1).collect();
        assert_eq!(stages, vec![162.0, 162.0, 163.0]);
    }

    #[test]
    fn test_stage_increment_resampling() {
        let curve = RatingCurve::from_points(vec![(100.0, 161.0), (900.0, 165.0)]);
        let discharges = curve.discharges_for_stage_increment(1.0);
        // Stages 161..=165 → five discharges, first at the curve minimum.
        assert_eq!(discharges.len(), 5);
        assert!((discharges[0] - 100.0).abs() < 1e-9);
        assert!((discharges[4] - 900.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_curve() {
        let curve = RatingCurve::from_points(vec![]);
        assert!(curve.is_empty());
        assert_eq!(curve.stage_at(10.0), None);
        assert!(curve.discharges_for_stage_increment(0.5).is_empty());
    }
}
