//! Terrain agreement metrics: how well the downloaded terrain reproduces
//! the surveyed cross-section geometry.
//!
//! For every cross section the terrain is sampled along the cut line and
//! compared against the surveyed station/elevation profile, both as raw
//! residuals and as hydraulic properties (top width, flow area, hydraulic
//! radius) evaluated on a ladder of water elevations.

use crate::model::layers::XsFeature;
use crate::raster::RasterTile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Step between evaluated water elevations.
const ELEVATION_STEP: f64 = 2.0;
/// Upper bound on evaluated elevations per section.
const MAX_ELEVATION_STEPS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResidualStats {
    pub mean: f64,
    pub std: f64,
    pub max: f64,
    pub min: f64,
    pub p_25: f64,
    pub p_50: f64,
    pub p_75: f64,
    pub rmse: f64,
    pub normalized_rmse: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElevationMetrics {
    pub inundation_overlap: f64,
    pub flow_area_overlap: f64,
    pub top_width_agreement: f64,
    pub flow_area_agreement: f64,
    pub hydraulic_radius_agreement: f64,
    pub residuals: ResidualStats,
}

/// Per-section summary: the elevation metrics averaged, plus profile-shape
/// statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgreementSummary {
    #[serde(flatten)]
    pub metrics: ElevationMetrics,
    pub r_squared: f64,
    pub spectral_angle: f64,
    pub spectral_correlation: f64,
    pub correlation: f64,
    pub max_cross_correlation: f64,
    pub thalweg_elevation_difference: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XsAgreement {
    pub elevation: BTreeMap<String, ElevationMetrics>,
    pub summary: AgreementSummary,
}

/// The full terrain-agreement document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerrainAgreement {
    pub xs: BTreeMap<String, XsAgreement>,
    pub summary: AgreementSummary,
}

/// Computes the agreement document for a set of sections against a terrain
/// tile.
pub fn compute_agreement(sections: &[XsFeature], terrain: &RasterTile) -> TerrainAgreement {
    let mut document = TerrainAgreement::default();
    for xs in sections {
        if let Some(agreement) = xs_agreement(xs, terrain) {
            document
                .xs
                .insert(format!("{}", xs.river_station), agreement);
        }
    }
    document.summary = average_summaries(
        &document
            .xs
            .values()
            .map(|x| x.summary.clone())
            .collect::<Vec<_>>(),
    );
    document
}

fn xs_agreement(xs: &XsFeature, terrain: &RasterTile) -> Option<XsAgreement> {
    let surveyed: Vec<(f64, f64)> = xs.station_elevation.clone();
    if surveyed.len() < 3 {
        return None;
    }
    let sampled: Vec<(f64, f64)> = surveyed
        .iter()
        .filter_map(|(station, _)| {
            let point = xs.geometry.interpolate(*station)?;
            let elevation = terrain.sample(point.x, point.y)?;
            Some((*station, elevation))
        })
        .collect();
    if sampled.len() < surveyed.len() {
        // Sections reaching past the terrain are compared over the shared
        // extent only.
        if sampled.len() < 3 {
            return None;
        }
    }
    let paired: Vec<(f64, f64, f64)> = surveyed
        .iter()
        .filter_map(|(station, surveyed_elev)| {
            sampled
                .iter()
                .find(|(s, _)| s == station)
                .map(|(_, terrain_elev)| (*station, *surveyed_elev, *terrain_elev))
        })
        .collect();

    let surveyed_profile: Vec<(f64, f64)> = paired.iter().map(|(s, a, _)| (*s, *a)).collect();
    let terrain_profile: Vec<(f64, f64)> = paired.iter().map(|(s, _, b)| (*s, *b)).collect();
    let residuals: Vec<f64> = paired.iter().map(|(_, a, b)| b - a).collect();

    let thalweg = xs.thalweg;
    let start = (thalweg / ELEVATION_STEP).floor() * ELEVATION_STEP + ELEVATION_STEP;
    let mut elevation = BTreeMap::new();
    let mut level = start;
    for _ in 0..MAX_ELEVATION_STEPS {
        if level > xs.max_elevation {
            break;
        }
        elevation.insert(
            format!("{level}"),
            elevation_metrics(&surveyed_profile, &terrain_profile, &residuals, level),
        );
        level += ELEVATION_STEP;
    }

    let averaged = average_elevation_metrics(&elevation.values().cloned().collect::<Vec<_>>());
    let surveyed_values: Vec<f64> = surveyed_profile.iter().map(|(_, e)| *e).collect();
    let terrain_values: Vec<f64> = terrain_profile.iter().map(|(_, e)| *e).collect();
    let terrain_thalweg = terrain_values.iter().copied().fold(f64::INFINITY, f64::min);

    let summary = AgreementSummary {
        metrics: averaged,
        r_squared: round3(r_squared(&surveyed_values, &terrain_values)),
        spectral_angle: round3(spectral_angle(&surveyed_values, &terrain_values)),
        spectral_correlation: round3(cosine_similarity(&surveyed_values, &terrain_values)),
        correlation: round3(pearson(&surveyed_values, &terrain_values)),
        max_cross_correlation: round3(max_cross_correlation(&surveyed_values, &terrain_values)),
        thalweg_elevation_difference: round2(terrain_thalweg - thalweg),
    };
    Some(XsAgreement { elevation, summary })
}

fn elevation_metrics(
    surveyed: &[(f64, f64)],
    terrain: &[(f64, f64)],
    residuals: &[f64],
    level: f64,
) -> ElevationMetrics {
    let a = section_hydraulics(surveyed, level);
    let b = section_hydraulics(terrain, level);
    ElevationMetrics {
        inundation_overlap: round3(interval_overlap(&a.intervals, &b.intervals)),
        flow_area_overlap: round3(ratio_overlap(a.area, b.area)),
        top_width_agreement: round3(agreement(a.top_width, b.top_width)),
        flow_area_agreement: round3(agreement(a.area, b.area)),
        hydraulic_radius_agreement: round3(agreement(a.hydraulic_radius(), b.hydraulic_radius())),
        residuals: residual_stats(residuals, level),
    }
}

struct Hydraulics {
    top_width: f64,
    area: f64,
    wetted_perimeter: f64,
    intervals: Vec<(f64, f64)>,
}

impl Hydraulics {
    fn hydraulic_radius(&self) -> f64 {
        if self.wetted_perimeter > 0.0 {
            self.area / self.wetted_perimeter
        } else {
            0.0
        }
    }
}

/// Trapezoidal hydraulic properties of a station/elevation profile at a
/// water elevation.
fn section_hydraulics(profile: &[(f64, f64)], level: f64) -> Hydraulics {
    let mut top_width = 0.0;
    let mut area = 0.0;
    let mut wetted_perimeter = 0.0;
    let mut intervals: Vec<(f64, f64)> = Vec::new();
    let mut open: Option<f64> = None;

    for pair in profile.windows(2) {
        let (s0, e0) = pair[0];
        let (s1, e1) = pair[1];
        let d0 = level - e0;
        let d1 = level - e1;
        let span = s1 - s0;
        if span <= 0.0 {
            continue;
        }
        match (d0 > 0.0, d1 > 0.0) {
            (true, true) => {
                top_width += span;
                area += span * (d0 + d1) / 2.0;
                wetted_perimeter += (span * span + (e1 - e0).powi(2)).sqrt();
                if open.is_none() {
                    open = Some(s0);
                }
            }
            (true, false) => {
                let t = d0 / (d0 - d1);
                let cross = s0 + t * span;
                top_width += cross - s0;
                area += (cross - s0) * d0 / 2.0;
                wetted_perimeter += ((cross - s0).powi(2) + d0 * d0).sqrt();
                intervals.push((open.unwrap_or(s0), cross));
                open = None;
            }
            (false, true) => {
                let t = d0 / (d0 - d1);
                let cross = s0 + t * span;
                top_width += s1 - cross;
                area += (s1 - cross) * d1 / 2.0;
                wetted_perimeter += ((s1 - cross).powi(2) + d1 * d1).sqrt();
                open = Some(cross);
            }
            (false, false) => {}
        }
    }
    if let Some(start) = open {
        if let Some((s_last, _)) = profile.last() {
            intervals.push((start, *s_last));
        }
    }
    Hydraulics {
        top_width,
        area,
        wetted_perimeter,
        intervals,
    }
}

/// Jaccard overlap of wetted station intervals.
fn interval_overlap(a: &[(f64, f64)], b: &[(f64, f64)]) -> f64 {
    let length = |set: &[(f64, f64)]| set.iter().map(|(lo, hi)| hi - lo).sum::<f64>();
    let mut intersection = 0.0;
    for (a_lo, a_hi) in a {
        for (b_lo, b_hi) in b {
            let lo = a_lo.max(*b_lo);
            let hi = a_hi.min(*b_hi);
            if hi > lo {
                intersection += hi - lo;
            }
        }
    }
    let union = length(a) + length(b) - intersection;
    if union <= 0.0 {
        1.0
    } else {
        intersection / union
    }
}

fn ratio_overlap(a: f64, b: f64) -> f64 {
    let hi = a.max(b);
    if hi <= 0.0 {
        1.0
    } else {
        a.min(b) / hi
    }
}

fn agreement(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale <= f64::EPSILON {
        1.0
    } else {
        (1.0 - (a - b).abs() / scale).clamp(0.0, 1.0)
    }
}

fn residual_stats(residuals: &[f64], level: f64) -> ResidualStats {
    if residuals.is_empty() {
        return ResidualStats::default();
    }
    let n = residuals.len() as f64;
    let mean = residuals.iter().sum::<f64>() / n;
    let variance = residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let rmse = (residuals.iter().map(|r| r * r).sum::<f64>() / n).sqrt();
    let mut sorted: Vec<f64> = residuals.to_vec();
    sorted.sort_by(f64::total_cmp);
    ResidualStats {
        mean: round2(mean),
        std: round2(variance.sqrt()),
        max: round2(sorted[sorted.len() - 1]),
        min: round2(sorted[0]),
        p_25: round2(percentile(&sorted, 0.25)),
        p_50: round2(percentile(&sorted, 0.50)),
        p_75: round2(percentile(&sorted, 0.75)),
        rmse: round2(rmse),
        normalized_rmse: round3(if level.abs() > f64::EPSILON {
            rmse / level.abs()
        } else {
            rmse
        }),
    }
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let t = position - lower as f64;
        sorted[lower] * (1.0 - t) + sorted[upper] * t
    }
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

fn max_cross_correlation(a: &[f64], b: &[f64]) -> f64 {
    let mut best = pearson(a, b);
    for shift in 1..=2usize {
        if a.len() > shift {
            best = best.max(pearson(&a[shift..], &b[..b.len() - shift]));
            best = best.max(pearson(&a[..a.len() - shift], &b[shift..]));
        }
    }
    best
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

fn spectral_angle(a: &[f64], b: &[f64]) -> f64 {
    cosine_similarity(a, b).acos()
}

fn r_squared(observed: &[f64], modelled: &[f64]) -> f64 {
    let n = observed.len().min(modelled.len());
    if n < 2 {
        return 0.0;
    }
    let mean = observed[..n].iter().sum::<f64>() / n as f64;
    let ss_tot: f64 = observed[..n].iter().map(|o| (o - mean).powi(2)).sum();
    let ss_res: f64 = observed[..n]
        .iter()
        .zip(&modelled[..n])
        .map(|(o, m)| (o - m).powi(2))
        .sum();
    if ss_tot <= f64::EPSILON {
        return 0.0;
    }
    1.0 - ss_res / ss_tot
}

fn average_elevation_metrics(metrics: &[ElevationMetrics]) -> ElevationMetrics {
    if metrics.is_empty() {
        return ElevationMetrics::default();
    }
    let n = metrics.len() as f64;
    let avg = |f: fn(&ElevationMetrics) -> f64| round3(metrics.iter().map(f).sum::<f64>() / n);
    let residuals = metrics
        .last()
        .map(|m| m.residuals.clone())
        .unwrap_or_default();
    ElevationMetrics {
        inundation_overlap: avg(|m| m.inundation_overlap),
        flow_area_overlap: avg(|m| m.flow_area_overlap),
        top_width_agreement: avg(|m| m.top_width_agreement),
        flow_area_agreement: avg(|m| m.flow_area_agreement),
        hydraulic_radius_agreement: avg(|m| m.hydraulic_radius_agreement),
        residuals,
    }
}

fn average_summaries(summaries: &[AgreementSummary]) -> AgreementSummary {
    if summaries.is_empty() {
        return AgreementSummary::default();
    }
    let n = summaries.len() as f64;
    let avg = |f: fn(&AgreementSummary) -> f64| round3(summaries.iter().map(f).sum::<f64>() / n);
    AgreementSummary {
        metrics: average_elevation_metrics(
            &summaries.iter().map(|s| s.metrics.clone()).collect::<Vec<_>>(),
        ),
        r_squared: avg(|s| s.r_squared),
        spectral_angle: avg(|s| s.spectral_angle),
        spectral_correlation: avg(|s| s.spectral_correlation),
        correlation: avg(|s| s.correlation),
        max_cross_correlation: avg(|s| s.max_cross_correlation),
        thalweg_elevation_difference: round2(
            summaries.iter().map(|s| s.thalweg_elevation_difference).sum::<f64>() / n,
        ),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v_profile() -> Vec<(f64, f64)> {
        vec![
            (0.0, 170.0),
            (25.0, 165.0),
            (50.0, 160.0),
            (75.0, 165.0),
            (100.0, 170.0),
        ]
    }

    #[test]
    fn test_hydraulics_of_v_channel() {
        // Water at 165 fills the lower half of the V.
        let h = section_hydraulics(&v_profile(), 165.0);
        assert!((h.top_width - 50.0).abs() < 1e-9);
        assert!((h.area - 125.0).abs() < 1e-6);
        assert_eq!(h.intervals.len(), 1);
        assert!(h.hydraulic_radius() > 0.0);
    }

    #[test]
    fn test_dry_section() {
        let h = section_hydraulics(&v_profile(), 150.0);
        assert_eq!(h.top_width, 0.0);
        assert_eq!(h.area, 0.0);
        assert!(h.intervals.is_empty());
    }

    #[test]
    fn test_identical_profiles_agree_perfectly() {
        let profile = v_profile();
        let residuals = vec![0.0; profile.len()];
        let m = elevation_metrics(&profile, &profile, &residuals, 165.0);
        assert_eq!(m.inundation_overlap, 1.0);
        assert_eq!(m.flow_area_agreement, 1.0);
        assert_eq!(m.top_width_agreement, 1.0);
        assert_eq!(m.residuals.rmse, 0.0);
    }

    #[test]
    fn test_pearson_of_shifted_profile_is_one() {
        let a: Vec<f64> = v_profile().iter().map(|(_, e)| *e).collect();
        let b: Vec<f64> = a.iter().map(|e| e + 0.5).collect();
        assert!((pearson(&a, &b) - 1.0).abs() < 1e-9);
        assert!(r_squared(&a, &b) < 1.0);
    }

    #[test]
    fn test_interval_overlap_partial() {
        let a = vec![(0.0, 10.0)];
        let b = vec![(5.0, 15.0)];
        assert!((interval_overlap(&a, &b) - 5.0 / 15.0).abs() < 1e-9);
        assert_eq!(interval_overlap(&[], &[]), 1.0);
    }

    #[test]
    fn test_percentile_interpolation() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&sorted, 0.5) - 2.5).abs() < 1e-9);
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 1.0), 4.0);
    }
}
