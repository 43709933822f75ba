//! Results bundle reader/writer.

use super::SolverError;
use crate::model::RatingCurve;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One profile record at one cross section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub profile: String,
    pub discharge: f64,
    pub river: String,
    pub reach: String,
    pub station: f64,
    pub water_surface_elevation: f64,
    pub velocity: f64,
}

/// A parsed results bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolverResults {
    pub plan_title: String,
    pub records: Vec<ProfileRecord>,
}

impl SolverResults {
    pub fn open(path: &Path) -> Result<Self, SolverError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| SolverError::MalformedResults {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), SolverError> {
        let text =
            serde_json::to_string_pretty(self).map_err(|e| SolverError::MalformedResults {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Records at the cross section nearest to `station`.
    pub fn records_at_station(&self, station: f64) -> Vec<&ProfileRecord> {
        let Some(nearest) = self
            .records
            .iter()
            .map(|r| r.station)
            .min_by(|a, b| (a - station).abs().total_cmp(&(b - station).abs()))
        else {
            return Vec::new();
        };
        self.records
            .iter()
            .filter(|r| (r.station - nearest).abs() < 1e-6)
            .collect()
    }

    /// Stage-discharge curve at the cross section nearest to `station`.
    pub fn rating_curve_at(&self, station: f64) -> RatingCurve {
        RatingCurve::from_points(
            self.records_at_station(station)
                .iter()
                .map(|r| (r.discharge, r.water_surface_elevation))
                .collect(),
        )
    }

    /// Per-profile (discharge, stage) at the nearest station, keyed by
    /// profile name.
    pub fn profile_stages_at(&self, station: f64) -> Vec<(String, f64, f64)> {
        self.records_at_station(station)
            .iter()
            .map(|r| (r.profile.clone(), r.discharge, r.water_surface_elevation))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(profile: &str, discharge: f64, station: f64, wse: f64) -> ProfileRecord {
        ProfileRecord {
            profile: profile.to_string(),
            discharge,
            river: "2823932".to_string(),
            reach: "2823932".to_string(),
            station,
            water_surface_elevation: wse,
            velocity: 2.0,
        }
    }

    fn sample() -> SolverResults {
        SolverResults {
            plan_title: "2823932_ind".to_string(),
            records: vec![
                record("0", 100.0, 200.0, 163.0),
                record("1", 500.0, 200.0, 165.0),
                record("0", 100.0, 100.0, 162.0),
                record("1", 500.0, 100.0, 164.0),
            ],
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("2823932.r01");
        sample().write(&path).unwrap();
        let back = SolverResults::open(&path).unwrap();
        assert_eq!(back.records.len(), 4);
        assert_eq!(back.plan_title, "2823932_ind");
    }

    #[test]
    fn test_rating_curve_at_station() {
        let results = sample();
        let curve = results.rating_curve_at(200.0);
        assert_eq!(curve.len(), 2);
        assert_eq!(curve.stage_at(100.0), Some(163.0));
        // Nearest-station matching tolerates offsets.
        let curve = results.rating_curve_at(95.0);
        assert_eq!(curve.stage_at(500.0), Some(164.0));
    }

    #[test]
    fn test_malformed_results() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.r01");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            SolverResults::open(&path),
            Err(SolverError::MalformedResults { .. })
        ));
    }
}
