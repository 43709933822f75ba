//! Minimal GeoPackage reader/writer.
//!
//! The engine stores extracted geometry in GeoPackage files so downstream
//! GIS tooling can open them directly. Only the subset the pipeline needs is
//! implemented: feature layers with Point/LineString/Polygon geometry in a
//! single srs, plus one non-spatial attribute table for model metadata.

use crate::geometry::{BBox, LineString, Point, Polygon};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpkgError {
    #[error("geopackage database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("layer not found: {0}")]
    LayerNotFound(String),

    #[error("malformed geometry blob: {0}")]
    BadGeometry(String),
}

/// Geometry payload of a feature.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Point),
    LineString(LineString),
    Polygon(Polygon),
}

impl Geometry {
    pub fn bbox(&self) -> BBox {
        match self {
            Geometry::Point(p) => BBox::from_points(&[*p]),
            Geometry::LineString(l) => l.bbox(),
            Geometry::Polygon(p) => p.bbox(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "POINT",
            Geometry::LineString(_) => "LINESTRING",
            Geometry::Polygon(_) => "POLYGON",
        }
    }
}

/// A feature: geometry plus free-form attributes.
///
/// Attribute values are JSON scalars; `Null`, numbers, and strings map to
/// SQLite `NULL`, `REAL`/`INTEGER`, and `TEXT`.
#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Geometry,
    pub attrs: BTreeMap<String, serde_json::Value>,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(|v| v.as_str())
    }

    pub fn f64_attr(&self, key: &str) -> Option<f64> {
        self.attrs.get(key).and_then(|v| v.as_f64())
    }
}

/// A GeoPackage file opened for reading or writing.
pub struct GeoPackage {
    conn: Connection,
    srs_id: i32,
}

impl GeoPackage {
    /// Creates (or truncates into) a geopackage at `path`.
    pub fn create(path: &Path, srs_id: i32) -> Result<Self, GpkgError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "application_id", 0x47504B47)?; // "GPKG"
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS gpkg_spatial_ref_sys (
                 srs_name TEXT NOT NULL,
                 srs_id INTEGER PRIMARY KEY,
                 organization TEXT NOT NULL,
                 organization_coordsys_id INTEGER NOT NULL,
                 definition TEXT NOT NULL,
                 description TEXT
             );
             CREATE TABLE IF NOT EXISTS gpkg_contents (
                 table_name TEXT PRIMARY KEY,
                 data_type TEXT NOT NULL,
                 identifier TEXT UNIQUE,
                 description TEXT DEFAULT '',
                 last_change DATETIME DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                 min_x DOUBLE, min_y DOUBLE, max_x DOUBLE, max_y DOUBLE,
                 srs_id INTEGER
             );
             CREATE TABLE IF NOT EXISTS gpkg_geometry_columns (
                 table_name TEXT PRIMARY KEY,
                 column_name TEXT NOT NULL,
                 geometry_type_name TEXT NOT NULL,
                 srs_id INTEGER NOT NULL,
                 z TINYINT NOT NULL,
                 m TINYINT NOT NULL
             );",
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO gpkg_spatial_ref_sys
                 (srs_name, srs_id, organization, organization_coordsys_id, definition)
             VALUES (?1, ?2, 'EPSG', ?2, 'undefined')",
            params![format!("EPSG:{srs_id}"), srs_id],
        )?;
        Ok(Self { conn, srs_id })
    }

    /// Opens an existing geopackage.
    pub fn open(path: &Path) -> Result<Self, GpkgError> {
        let conn = Connection::open(path)?;
        let srs_id = conn
            .query_row(
                "SELECT srs_id FROM gpkg_geometry_columns LIMIT 1",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        Ok(Self { conn, srs_id })
    }

    pub fn srs_id(&self) -> i32 {
        self.srs_id
    }

    pub fn has_layer(&self, name: &str) -> Result<bool, GpkgError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM gpkg_contents WHERE table_name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn layer_names(&self) -> Result<Vec<String>, GpkgError> {
        let mut stmt = self
            .conn
            .prepare("SELECT table_name FROM gpkg_contents WHERE data_type = 'features'")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Writes a feature layer, replacing it when it already exists.
    ///
    /// Column set is the union of attribute keys across the features; the
    /// SQLite type of each column follows the first non-null value seen.
    pub fn write_layer(&self, name: &str, features: &[Feature]) -> Result<(), GpkgError> {
        let mut columns: Vec<String> = Vec::new();
        for feature in features {
            for key in feature.attrs.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let mut bbox = BBox::empty();
        for feature in features {
            bbox.expand(feature.geometry.bbox());
        }
        let geom_type = features
            .first()
            .map(|f| f.geometry.type_name())
            .unwrap_or("GEOMETRY");

        self.conn
            .execute(&format!("DROP TABLE IF EXISTS \"{name}\""), [])?;
        let column_ddl: String = columns
            .iter()
            .map(|c| format!(", \"{c}\""))
            .collect::<Vec<_>>()
            .join("");
        self.conn.execute(
            &format!(
                "CREATE TABLE \"{name}\" (fid INTEGER PRIMARY KEY AUTOINCREMENT, geom BLOB{column_ddl})"
            ),
            [],
        )?;

        let placeholders: String = (0..columns.len() + 1)
            .map(|i| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let column_list: String = std::iter::once("geom".to_string())
            .chain(columns.iter().map(|c| format!("\"{c}\"")))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql = format!("INSERT INTO \"{name}\" ({column_list}) VALUES ({placeholders})");

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&insert_sql)?;
            for feature in features {
                let blob = encode_gpkg_geometry(&feature.geometry, self.srs_id);
                let mut values: Vec<rusqlite::types::Value> =
                    vec![rusqlite::types::Value::Blob(blob)];
                for column in &columns {
                    values.push(json_to_sql(feature.attrs.get(column)));
                }
                stmt.execute(rusqlite::params_from_iter(values))?;
            }
        }
        tx.execute(
            "DELETE FROM gpkg_contents WHERE table_name = ?1",
            params![name],
        )?;
        tx.execute(
            "INSERT INTO gpkg_contents
                 (table_name, data_type, identifier, min_x, min_y, max_x, max_y, srs_id)
             VALUES (?1, 'features', ?1, ?2, ?3, ?4, ?5, ?6)",
            params![name, bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y, self.srs_id],
        )?;
        tx.execute(
            "DELETE FROM gpkg_geometry_columns WHERE table_name = ?1",
            params![name],
        )?;
        tx.execute(
            "INSERT INTO gpkg_geometry_columns
                 (table_name, column_name, geometry_type_name, srs_id, z, m)
             VALUES (?1, 'geom', ?2, ?3, 0, 0)",
            params![name, geom_type, self.srs_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Reads every feature of a layer.
    pub fn read_layer(&self, name: &str) -> Result<Vec<Feature>, GpkgError> {
        if !self.has_layer(name)? {
            return Err(GpkgError::LayerNotFound(name.to_string()));
        }
        let mut stmt = self.conn.prepare(&format!("SELECT * FROM \"{name}\""))?;
        let column_names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut rows = stmt.query([])?;
        let mut features = Vec::new();
        while let Some(row) = rows.next()? {
            let mut geometry = None;
            let mut attrs = BTreeMap::new();
            for (idx, column) in column_names.iter().enumerate() {
                match column.as_str() {
                    "fid" => {}
                    "geom" => {
                        let blob: Vec<u8> = row.get(idx)?;
                        geometry = Some(decode_gpkg_geometry(&blob)?);
                    }
                    _ => {
                        let value: rusqlite::types::Value = row.get(idx)?;
                        attrs.insert(column.clone(), sql_to_json(value));
                    }
                }
            }
            let geometry =
                geometry.ok_or_else(|| GpkgError::BadGeometry("missing geom column".into()))?;
            features.push(Feature { geometry, attrs });
        }
        Ok(features)
    }

    /// Writes the non-spatial `metadata` attribute table.
    pub fn write_metadata(&self, entries: &BTreeMap<String, String>) -> Result<(), GpkgError> {
        self.conn.execute_batch(
            "DROP TABLE IF EXISTS metadata;
             CREATE TABLE metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL);",
        )?;
        for (key, value) in entries {
            self.conn.execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        self.conn.execute(
            "INSERT OR REPLACE INTO gpkg_contents (table_name, data_type, identifier)
             VALUES ('metadata', 'attributes', 'metadata')",
            [],
        )?;
        Ok(())
    }

    pub fn read_metadata(&self) -> Result<BTreeMap<String, String>, GpkgError> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM metadata")?;
        let entries = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(entries)
    }
}

fn json_to_sql(value: Option<&serde_json::Value>) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        None | Some(serde_json::Value::Null) => Sql::Null,
        Some(serde_json::Value::Bool(b)) => Sql::Integer(*b as i64),
        Some(serde_json::Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else {
                Sql::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Some(serde_json::Value::String(s)) => Sql::Text(s.clone()),
        Some(other) => Sql::Text(other.to_string()),
    }
}

fn sql_to_json(value: rusqlite::types::Value) -> serde_json::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Sql::Null => serde_json::Value::Null,
        Sql::Integer(i) => serde_json::Value::from(i),
        Sql::Real(f) => serde_json::Value::from(f),
        Sql::Text(s) => serde_json::Value::from(s),
        Sql::Blob(_) => serde_json::Value::Null,
    }
}

// GeoPackage geometry blob: "GP" magic, version, flags (little-endian with
// a 32-byte envelope), srs id, envelope, then standard WKB.

fn encode_gpkg_geometry(geometry: &Geometry, srs_id: i32) -> Vec<u8> {
    let bbox = geometry.bbox();
    let mut blob = Vec::with_capacity(64);
    blob.extend(b"GP");
    blob.push(0); // version
    blob.push(0b0000_0011); // little-endian, envelope [minx,maxx,miny,maxy]
    blob.extend(srs_id.to_le_bytes());
    for v in [bbox.min_x, bbox.max_x, bbox.min_y, bbox.max_y] {
        blob.extend(v.to_le_bytes());
    }
    encode_wkb(geometry, &mut blob);
    blob
}

fn decode_gpkg_geometry(blob: &[u8]) -> Result<Geometry, GpkgError> {
    if blob.len() < 8 || &blob[0..2] != b"GP" {
        return Err(GpkgError::BadGeometry("missing GP magic".into()));
    }
    let flags = blob[3];
    if flags & 0x01 == 0 {
        return Err(GpkgError::BadGeometry("big-endian blobs unsupported".into()));
    }
    let envelope_len = match (flags >> 1) & 0x07 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        other => {
            return Err(GpkgError::BadGeometry(format!(
                "invalid envelope indicator {other}"
            )))
        }
    };
    decode_wkb(&blob[8 + envelope_len..])
}

pub(crate) fn encode_wkb(geometry: &Geometry, out: &mut Vec<u8>) {
    out.push(1); // little-endian
    match geometry {
        Geometry::Point(p) => {
            out.extend(1u32.to_le_bytes());
            out.extend(p.x.to_le_bytes());
            out.extend(p.y.to_le_bytes());
        }
        Geometry::LineString(line) => {
            out.extend(2u32.to_le_bytes());
            out.extend((line.points().len() as u32).to_le_bytes());
            for p in line.points() {
                out.extend(p.x.to_le_bytes());
                out.extend(p.y.to_le_bytes());
            }
        }
        Geometry::Polygon(polygon) => {
            out.extend(3u32.to_le_bytes());
            out.extend(1u32.to_le_bytes()); // one ring
            out.extend((polygon.exterior().len() as u32).to_le_bytes());
            for p in polygon.exterior() {
                out.extend(p.x.to_le_bytes());
                out.extend(p.y.to_le_bytes());
            }
        }
    }
}

pub(crate) fn decode_wkb(wkb: &[u8]) -> Result<Geometry, GpkgError> {
    let mut cursor = WkbCursor::new(wkb)?;
    let geometry_type = cursor.read_u32()?;
    match geometry_type {
        1 => {
            let (x, y) = (cursor.read_f64()?, cursor.read_f64()?);
            Ok(Geometry::Point(Point::new(x, y)))
        }
        2 => {
            let n = cursor.read_u32()? as usize;
            let mut points = Vec::with_capacity(n);
            for _ in 0..n {
                points.push(Point::new(cursor.read_f64()?, cursor.read_f64()?));
            }
            Ok(Geometry::LineString(LineString::new(points)))
        }
        3 => {
            let rings = cursor.read_u32()?;
            if rings == 0 {
                return Err(GpkgError::BadGeometry("polygon with no rings".into()));
            }
            let n = cursor.read_u32()? as usize;
            let mut points = Vec::with_capacity(n);
            for _ in 0..n {
                points.push(Point::new(cursor.read_f64()?, cursor.read_f64()?));
            }
            Ok(Geometry::Polygon(Polygon::new(points)))
        }
        other => Err(GpkgError::BadGeometry(format!(
            "unsupported wkb type {other}"
        ))),
    }
}

struct WkbCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WkbCursor<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self, GpkgError> {
        if bytes.first() != Some(&1) {
            return Err(GpkgError::BadGeometry("expected little-endian wkb".into()));
        }
        Ok(Self { bytes, pos: 1 })
    }

    fn read_u32(&mut self) -> Result<u32, GpkgError> {
        let end = self.pos + 4;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| GpkgError::BadGeometry("truncated wkb".into()))?;
        self.pos = end;
        Ok(u32::from_le_bytes(slice.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64, GpkgError> {
        let end = self.pos + 8;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| GpkgError::BadGeometry("truncated wkb".into()))?;
        self.pos = end;
        Ok(f64::from_le_bytes(slice.try_into().unwrap()))
    }
}
