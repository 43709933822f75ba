//! Raster grids: elevation tiles, depth grids, and their on-disk containers.
//!
//! Two containers are written by the engine:
//!
//! - the elevation grid container used for DEM sources and the submodel
//!   terrain bundle: a JSON header line (`GridHeader`) followed by
//!   little-endian `f32` samples in row-major order;
//! - single-strip float32 GeoTIFFs for depth grids, carrying pixel-scale,
//!   tiepoint, and nodata tags so downstream mapping tools can consume the
//!   library directly.
//!
//! Both are deliberately minimal; richer formats live behind the adapters
//! that produce them.

use crate::geometry::{BBox, Point, Polygon};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Nodata marker used across all engine-produced grids.
pub const NODATA: f32 = -9999.0;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("raster I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed grid header: {0}")]
    Header(String),

    #[error("grid dimensions do not match payload: expected {expected} samples, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// JSON header of the elevation grid container.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GridHeader {
    origin_x: f64,
    origin_y: f64,
    cell_size: f64,
    cols: usize,
    rows: usize,
    nodata: f32,
}

/// An in-memory single-band float raster.
///
/// `origin` is the outer corner of the top-left cell; rows advance south
/// (decreasing y), columns advance east.
#[derive(Debug, Clone)]
pub struct RasterTile {
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell_size: f64,
    pub cols: usize,
    pub rows: usize,
    pub data: Vec<f32>,
    pub nodata: f32,
}

impl RasterTile {
    /// Allocates a tile covering `bbox` at `cell_size`, filled with nodata.
    pub fn filled(bbox: BBox, cell_size: f64) -> Self {
        let cols = ((bbox.width() / cell_size).ceil() as usize).max(1);
        let rows = ((bbox.height() / cell_size).ceil() as usize).max(1);
        Self {
            origin_x: bbox.min_x,
            origin_y: bbox.max_y,
            cell_size,
            cols,
            rows,
            data: vec![NODATA; cols * rows],
            nodata: NODATA,
        }
    }

    pub fn bbox(&self) -> BBox {
        BBox::new(
            self.origin_x,
            self.origin_y - self.rows as f64 * self.cell_size,
            self.origin_x + self.cols as f64 * self.cell_size,
            self.origin_y,
        )
    }

    pub fn get(&self, col: usize, row: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, col: usize, row: usize, value: f32) {
        self.data[row * self.cols + col] = value;
    }

    /// Center coordinate of a cell.
    pub fn cell_center(&self, col: usize, row: usize) -> Point {
        Point::new(
            self.origin_x + (col as f64 + 0.5) * self.cell_size,
            self.origin_y - (row as f64 + 0.5) * self.cell_size,
        )
    }

    /// Bilinear sample at a projected coordinate; `None` outside the tile
    /// or when any contributing cell is nodata.
    pub fn sample(&self, x: f64, y: f64) -> Option<f64> {
        let fx = (x - self.origin_x) / self.cell_size - 0.5;
        let fy = (self.origin_y - y) / self.cell_size - 0.5;
        let c0 = fx.floor();
        let r0 = fy.floor();
        let tx = fx - c0;
        let ty = fy - r0;

        let sample_at = |c: f64, r: f64| -> Option<f64> {
            if c < 0.0 || r < 0.0 {
                return None;
            }
            let (c, r) = (c as usize, r as usize);
            if c >= self.cols || r >= self.rows {
                return None;
            }
            let v = self.get(c, r);
            if v == self.nodata {
                None
            } else {
                Some(v as f64)
            }
        };

        // Fall back to the nearest valid corner when a neighbour is off the
        // grid so edge cells remain sampleable.
        let corners = [
            sample_at(c0, r0),
            sample_at(c0 + 1.0, r0),
            sample_at(c0, r0 + 1.0),
            sample_at(c0 + 1.0, r0 + 1.0),
        ];
        if corners.iter().all(|c| c.is_none()) {
            return None;
        }
        let nearest = sample_at(c0.max(0.0).round(), r0.max(0.0).round())
            .or_else(|| corners.iter().flatten().next().copied())?;
        let v00 = corners[0].unwrap_or(nearest);
        let v10 = corners[1].unwrap_or(nearest);
        let v01 = corners[2].unwrap_or(nearest);
        let v11 = corners[3].unwrap_or(nearest);
        Some(v00 * (1.0 - tx) * (1.0 - ty) + v10 * tx * (1.0 - ty) + v01 * (1.0 - tx) * ty + v11 * tx * ty)
    }

    /// Masks every cell whose center falls outside the polygon to nodata.
    pub fn clip_to_polygon(&self, polygon: &Polygon) -> RasterTile {
        let mut clipped = self.clone();
        for row in 0..self.rows {
            for col in 0..self.cols {
                if !polygon.contains(self.cell_center(col, row)) {
                    clipped.set(col, row, self.nodata);
                }
            }
        }
        clipped
    }

    /// Count of cells holding data.
    pub fn valid_cells(&self) -> usize {
        self.data.iter().filter(|v| **v != self.nodata).count()
    }

    /// Writes the elevation grid container.
    pub fn write_grid(&self, path: &Path) -> Result<(), RasterError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut w = BufWriter::new(File::create(path)?);
        let header = GridHeader {
            origin_x: self.origin_x,
            origin_y: self.origin_y,
            cell_size: self.cell_size,
            cols: self.cols,
            rows: self.rows,
            nodata: self.nodata,
        };
        let header_json =
            serde_json::to_string(&header).map_err(|e| RasterError::Header(e.to_string()))?;
        writeln!(w, "{header_json}")?;
        for v in &self.data {
            w.write_all(&v.to_le_bytes())?;
        }
        w.flush()?;
        Ok(())
    }

    /// Reads the elevation grid container.
    pub fn read_grid(path: &Path) -> Result<RasterTile, RasterError> {
        let mut r = BufReader::new(File::open(path)?);
        let mut header_line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            r.read_exact(&mut byte)?;
            if byte[0] == b'\n' {
                break;
            }
            header_line.push(byte[0]);
        }
        let header: GridHeader = serde_json::from_slice(&header_line)
            .map_err(|e| RasterError::Header(e.to_string()))?;
        let expected = header.cols * header.rows;
        let mut payload = Vec::new();
        r.read_to_end(&mut payload)?;
        if payload.len() != expected * 4 {
            return Err(RasterError::Truncated {
                expected,
                actual: payload.len() / 4,
            });
        }
        let data = payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(RasterTile {
            origin_x: header.origin_x,
            origin_y: header.origin_y,
            cell_size: header.cell_size,
            cols: header.cols,
            rows: header.rows,
            data,
            nodata: header.nodata,
        })
    }

    /// Writes the tile as a single-strip float32 GeoTIFF.
    pub fn write_geotiff(&self, path: &Path) -> Result<(), RasterError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut w = BufWriter::new(File::create(path)?);
        write_float_tiff(self, &mut w)?;
        w.flush()?;
        Ok(())
    }
}

/// Minimal baseline-TIFF writer: one IFD, one strip, 32-bit IEEE samples,
/// GeoTIFF pixel-scale/tiepoint tags and a GDAL nodata tag.
fn write_float_tiff<W: Write>(tile: &RasterTile, w: &mut W) -> Result<(), RasterError> {
    const TAG_COUNT: u16 = 13;
    let header_len: u32 = 8;
    let ifd_len: u32 = 2 + TAG_COUNT as u32 * 12 + 4;
    let scale_off = header_len + ifd_len;
    let tiepoint_off = scale_off + 3 * 8;
    let nodata_str = format!("{}\0", tile.nodata);
    let nodata_off = tiepoint_off + 6 * 8;
    let strip_off = nodata_off + nodata_str.len() as u32;

    w.write_all(&[0x49, 0x49, 42, 0])?; // little-endian magic
    w.write_all(&header_len.to_le_bytes())?; // IFD follows immediately

    let mut ifd: Vec<u8> = Vec::new();
    ifd.extend(TAG_COUNT.to_le_bytes());
    let mut tag = |id: u16, ty: u16, count: u32, value: u32| {
        ifd.extend(id.to_le_bytes());
        ifd.extend(ty.to_le_bytes());
        ifd.extend(count.to_le_bytes());
        ifd.extend(value.to_le_bytes());
    };
    tag(256, 3, 1, tile.cols as u32); // ImageWidth
    tag(257, 3, 1, tile.rows as u32); // ImageLength
    tag(258, 3, 1, 32); // BitsPerSample
    tag(259, 3, 1, 1); // Compression: none
    tag(262, 3, 1, 1); // Photometric: BlackIsZero
    tag(273, 4, 1, strip_off); // StripOffsets
    tag(277, 3, 1, 1); // SamplesPerPixel
    tag(278, 3, 1, tile.rows as u32); // RowsPerStrip
    tag(279, 4, 1, (tile.data.len() * 4) as u32); // StripByteCounts
    tag(339, 3, 1, 3); // SampleFormat: IEEE float
    tag(33550, 12, 3, scale_off); // ModelPixelScale
    tag(33922, 12, 6, tiepoint_off); // ModelTiepoint
    tag(42113, 2, nodata_str.len() as u32, nodata_off); // GDAL_NODATA
    ifd.extend(0u32.to_le_bytes()); // no next IFD
    w.write_all(&ifd)?;

    for v in [tile.cell_size, tile.cell_size, 0.0] {
        w.write_all(&v.to_le_bytes())?;
    }
    for v in [0.0, 0.0, 0.0, tile.origin_x, tile.origin_y, 0.0] {
        w.write_all(&v.to_le_bytes())?;
    }
    w.write_all(nodata_str.as_bytes())?;
    for v in &tile.data {
        w.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ramp_tile() -> RasterTile {
        let mut tile = RasterTile::filled(BBox::new(0.0, 0.0, 10.0, 10.0), 1.0);
        for row in 0..tile.rows {
            for col in 0..tile.cols {
                tile.set(col, row, col as f32);
            }
        }
        tile
    }

    #[test]
    fn test_filled_dimensions() {
        let tile = RasterTile::filled(BBox::new(0.0, 0.0, 10.0, 5.0), 2.0);
        assert_eq!(tile.cols, 5);
        assert_eq!(tile.rows, 3);
        assert_eq!(tile.valid_cells(), 0);
    }

    #[test]
    fn test_bilinear_sample_on_ramp() {
        let tile = ramp_tile();
        // At x = 3.5 the sample sits on the center of column 3.
        let v = tile.sample(3.5, 5.0).unwrap();
        assert!((v - 3.0).abs() < 1e-6);
        // Halfway between columns 3 and 4.
        let v = tile.sample(4.0, 5.0).unwrap();
        assert!((v - 3.5).abs() < 1e-6);
    }

    #[test]
    fn test_sample_outside_is_none() {
        let tile = ramp_tile();
        assert!(tile.sample(-5.0, 5.0).is_none());
        assert!(tile.sample(5.0, 25.0).is_none());
    }

    #[test]
    fn test_clip_to_polygon_masks_outside() {
        let tile = ramp_tile();
        let poly = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(5.0, 10.0),
            Point::new(0.0, 10.0),
        ]);
        let clipped = tile.clip_to_polygon(&poly);
        assert_eq!(clipped.valid_cells(), 50);
    }

    #[test]
    fn test_grid_container_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("terrain.hdf");
        let tile = ramp_tile();
        tile.write_grid(&path).unwrap();
        let back = RasterTile::read_grid(&path).unwrap();
        assert_eq!(back.cols, tile.cols);
        assert_eq!(back.rows, tile.rows);
        assert_eq!(back.data, tile.data);
        assert_eq!(back.cell_size, tile.cell_size);
    }

    #[test]
    fn test_geotiff_header_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("depth.tif");
        ramp_tile().write_geotiff(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], &[0x49, 0x49, 42, 0]);
        // Payload holds every sample.
        assert!(bytes.len() > 100 * 4);
    }
}
