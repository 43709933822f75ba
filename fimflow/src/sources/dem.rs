//! Elevation sources.

use super::SourceError;
use crate::geometry::BBox;
use crate::raster::RasterTile;
use std::path::{Path, PathBuf};

/// Feet-to-meters conversion (survey foot).
pub const METERS_PER_FOOT: f64 = 1200.0 / 3937.0;

/// Unit of a requested resample resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionUnits {
    Feet,
    Meters,
}

impl ResolutionUnits {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Feet" => Some(Self::Feet),
            "Meters" => Some(Self::Meters),
            _ => None,
        }
    }

    /// Converts a resolution in these units to source (meter) units.
    pub fn to_meters(&self, resolution: f64) -> f64 {
        match self {
            Self::Feet => resolution * METERS_PER_FOOT,
            Self::Meters => resolution,
        }
    }
}

/// Read interface over an elevation model.
pub trait DemSource: Send + Sync {
    /// A clipped, resampled tile covering `bbox`.
    ///
    /// Fails with `OutOfBounds` when the source does not cover the request.
    fn read(
        &self,
        bbox: &BBox,
        resolution: f64,
        units: ResolutionUnits,
    ) -> Result<RasterTile, SourceError>;
}

/// Elevation source backed by a local grid container file.
pub struct GridDemSource {
    tile: RasterTile,
}

impl GridDemSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let tile = RasterTile::read_grid(path).map_err(|e| SourceError::Format(e.to_string()))?;
        Ok(Self { tile })
    }

    pub fn from_tile(tile: RasterTile) -> Self {
        Self { tile }
    }
}

impl DemSource for GridDemSource {
    fn read(
        &self,
        bbox: &BBox,
        resolution: f64,
        units: ResolutionUnits,
    ) -> Result<RasterTile, SourceError> {
        if !self.tile.bbox().contains_bbox(bbox) {
            return Err(SourceError::OutOfBounds(format!(
                "request {bbox:?} exceeds source extent {:?}",
                self.tile.bbox()
            )));
        }
        let cell_size = units.to_meters(resolution);
        let mut out = RasterTile::filled(*bbox, cell_size);
        for row in 0..out.rows {
            for col in 0..out.cols {
                let center = out.cell_center(col, row);
                if let Some(v) = self.tile.sample(center.x, center.y) {
                    out.set(col, row, v as f32);
                }
            }
        }
        Ok(out)
    }
}

/// Fetches a URL to bytes. Tests substitute a canned implementation.
pub trait HttpFetch: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, SourceError>;
}

/// `reqwest`-backed fetcher.
pub struct ReqwestFetch;

impl HttpFetch for ReqwestFetch {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let response = reqwest::blocking::get(url).map_err(|e| SourceError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SourceError::Http(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .map_err(|e| SourceError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Elevation source fetching a grid container over HTTP.
///
/// The whole container is fetched once and cached in the data directory;
/// subsequent reads resample the cached grid.
pub struct RemoteGridDemSource {
    url: String,
    cache_path: PathBuf,
    fetch: Box<dyn HttpFetch>,
}

impl RemoteGridDemSource {
    pub fn new(url: &str, cache_path: &Path, fetch: Box<dyn HttpFetch>) -> Self {
        Self {
            url: url.to_string(),
            cache_path: cache_path.to_path_buf(),
            fetch,
        }
    }

    fn ensure_cached(&self) -> Result<GridDemSource, SourceError> {
        if !self.cache_path.exists() {
            let bytes = self.fetch.fetch(&self.url)?;
            if let Some(parent) = self.cache_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&self.cache_path, bytes)?;
        }
        GridDemSource::open(&self.cache_path)
    }
}

impl DemSource for RemoteGridDemSource {
    fn read(
        &self,
        bbox: &BBox,
        resolution: f64,
        units: ResolutionUnits,
    ) -> Result<RasterTile, SourceError> {
        self.ensure_cached()?.read(bbox, resolution, units)
    }
}

/// Analytic elevation surface for tests: a tilted plane with a parabolic
/// channel carved along `channel_x`.
pub struct PlaneDemSource {
    pub base_elevation: f64,
    pub valley_slope: f64,
    pub channel_x: f64,
    pub channel_depth: f64,
    pub channel_half_width: f64,
}

impl PlaneDemSource {
    pub fn elevation(&self, x: f64, y: f64) -> f64 {
        let offset = (x - self.channel_x).abs();
        let channel = if offset < self.channel_half_width {
            let t = offset / self.channel_half_width;
            self.channel_depth * (1.0 - t * t)
        } else {
            0.0
        };
        self.base_elevation + self.valley_slope * y - channel
    }
}

impl DemSource for PlaneDemSource {
    fn read(
        &self,
        bbox: &BBox,
        resolution: f64,
        units: ResolutionUnits,
    ) -> Result<RasterTile, SourceError> {
        let cell_size = units.to_meters(resolution);
        let mut out = RasterTile::filled(*bbox, cell_size);
        for row in 0..out.rows {
            for col in 0..out.cols {
                let center = out.cell_center(col, row);
                out.set(col, row, self.elevation(center.x, center.y) as f32);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane() -> PlaneDemSource {
        PlaneDemSource {
            base_elevation: 160.0,
            valley_slope: 0.001,
            channel_x: 50.0,
            channel_depth: 8.0,
            channel_half_width: 20.0,
        }
    }

    #[test]
    fn test_plane_channel_is_lowest_on_axis() {
        let dem = plane();
        assert!(dem.elevation(50.0, 0.0) < dem.elevation(10.0, 0.0));
        assert_eq!(dem.elevation(50.0, 0.0), 152.0);
    }

    #[test]
    fn test_grid_source_resamples() {
        let dem = plane();
        let tile = dem
            .read(&BBox::new(0.0, 0.0, 100.0, 100.0), 5.0, ResolutionUnits::Meters)
            .unwrap();
        let source = GridDemSource::from_tile(tile);
        let resampled = source
            .read(&BBox::new(10.0, 10.0, 90.0, 90.0), 10.0, ResolutionUnits::Meters)
            .unwrap();
        assert_eq!(resampled.cols, 8);
        let sampled = resampled.sample(50.0, 50.0).unwrap();
        assert!((sampled - dem.elevation(50.0, 50.0)).abs() < 1.0);
    }

    #[test]
    fn test_grid_source_out_of_bounds() {
        let tile = plane()
            .read(&BBox::new(0.0, 0.0, 50.0, 50.0), 5.0, ResolutionUnits::Meters)
            .unwrap();
        let source = GridDemSource::from_tile(tile);
        let result = source.read(
            &BBox::new(0.0, 0.0, 500.0, 500.0),
            5.0,
            ResolutionUnits::Meters,
        );
        assert!(matches!(result, Err(SourceError::OutOfBounds(_))));
    }

    #[test]
    fn test_resolution_units() {
        assert_eq!(ResolutionUnits::parse("Feet"), Some(ResolutionUnits::Feet));
        assert_eq!(ResolutionUnits::parse("yards"), None);
        assert!((ResolutionUnits::Feet.to_meters(1.0) - METERS_PER_FOOT).abs() < 1e-12);
        assert_eq!(ResolutionUnits::Meters.to_meters(3.0), 3.0);
    }
}
