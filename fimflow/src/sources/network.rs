//! Reference-network reach source and tree traversal.

use super::SourceError;
use crate::geometry::{BBox, LineString};
use crate::gpkg;
use arrow::array::{Array, BinaryArray, Float64Array, Int64Array, LargeBinaryArray};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// One reach of the reference hydrologic network.
#[derive(Debug, Clone)]
pub struct NetworkReach {
    pub id: i64,
    pub geometry: LineString,
    /// Downstream link; `None` at a network outlet.
    pub to_id: Option<i64>,
    pub high_flow_threshold: f64,
    pub hundred_year_flow: f64,
}

/// Query interface over the reference network.
pub trait ReachSource: Send + Sync {
    /// Reaches whose geometry extent intersects `bbox`.
    fn query(&self, bbox: &BBox) -> Result<Vec<NetworkReach>, SourceError>;
}

/// Parquet-backed reach source.
///
/// Expected columns: `ID` (int64), `to_id` (int64, 0 or null at outlets),
/// `geometry` (WKB binary), `high_flow_threshold` and `hundred_year_flow`
/// (float64).
pub struct ParquetReachSource {
    path: PathBuf,
}

impl ParquetReachSource {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl ReachSource for ParquetReachSource {
    fn query(&self, bbox: &BBox) -> Result<Vec<NetworkReach>, SourceError> {
        let file = File::open(&self.path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| SourceError::Network(e.to_string()))?
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let mut reaches = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| SourceError::Network(e.to_string()))?;
            decode_batch(&batch, bbox, &mut reaches)?;
        }
        Ok(reaches)
    }
}

fn decode_batch(
    batch: &RecordBatch,
    bbox: &BBox,
    out: &mut Vec<NetworkReach>,
) -> Result<(), SourceError> {
    let ids = column::<Int64Array>(batch, "ID")?;
    let to_ids = column::<Int64Array>(batch, "to_id")?;
    let high_flows = column::<Float64Array>(batch, "high_flow_threshold")?;
    let hundred_year = column::<Float64Array>(batch, "hundred_year_flow")?;
    let geometry_column = batch
        .column_by_name("geometry")
        .ok_or_else(|| SourceError::Format("missing geometry column".into()))?;

    for row in 0..batch.num_rows() {
        let wkb: &[u8] = if let Some(binary) = geometry_column.as_any().downcast_ref::<BinaryArray>()
        {
            binary.value(row)
        } else if let Some(binary) = geometry_column.as_any().downcast_ref::<LargeBinaryArray>() {
            binary.value(row)
        } else {
            return Err(SourceError::Format(
                "geometry column is not binary WKB".into(),
            ));
        };
        let geometry = match gpkg::decode_wkb(wkb) {
            Ok(gpkg::Geometry::LineString(line)) => line,
            Ok(_) => continue, // non-linear rows carry no reach geometry
            Err(e) => return Err(SourceError::Format(e.to_string())),
        };
        if !geometry.bbox().intersects(bbox) {
            continue;
        }
        let to_id = if to_ids.is_null(row) || to_ids.value(row) == 0 {
            None
        } else {
            Some(to_ids.value(row))
        };
        out.push(NetworkReach {
            id: ids.value(row),
            geometry,
            to_id,
            high_flow_threshold: high_flows.value(row),
            hundred_year_flow: hundred_year.value(row),
        });
    }
    Ok(())
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, SourceError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| SourceError::Format(format!("missing or mistyped column {name}")))
}

/// In-memory reach source for tests and fixtures.
#[derive(Debug, Clone, Default)]
pub struct MemoryReachSource {
    reaches: Vec<NetworkReach>,
}

impl MemoryReachSource {
    pub fn new(reaches: Vec<NetworkReach>) -> Self {
        Self { reaches }
    }
}

impl ReachSource for MemoryReachSource {
    fn query(&self, bbox: &BBox) -> Result<Vec<NetworkReach>, SourceError> {
        Ok(self
            .reaches
            .iter()
            .filter(|r| r.geometry.bbox().intersects(bbox))
            .cloned()
            .collect())
    }
}

/// Downstream-link tree over a set of reaches.
///
/// The network is traversed as a tree: each reach has at most one `to_id`,
/// children are the reaches flowing into a given reach. Traversal walks
/// downstream links only, so cycles are bounded by the walk limit.
pub struct NetworkGraph {
    reaches: HashMap<i64, NetworkReach>,
    children: HashMap<i64, Vec<i64>>,
}

impl NetworkGraph {
    pub fn new(reaches: Vec<NetworkReach>) -> Self {
        let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
        for reach in &reaches {
            if let Some(to_id) = reach.to_id {
                children.entry(to_id).or_default().push(reach.id);
            }
        }
        Self {
            reaches: reaches.into_iter().map(|r| (r.id, r)).collect(),
            children,
        }
    }

    pub fn reach(&self, id: i64) -> Option<&NetworkReach> {
        self.reaches.get(&id)
    }

    /// Upstream children of a reach.
    pub fn children(&self, id: i64) -> &[i64] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Walks downstream from `us_id` to `ds_id` inclusive.
    ///
    /// Fails when the walk leaves the loaded reach set or exceeds the step
    /// bound before reaching `ds_id`.
    pub fn walk(&self, us_id: i64, ds_id: i64) -> Result<Vec<i64>, SourceError> {
        const MAX_WALK: usize = 30_000;
        let mut path = vec![us_id];
        let mut current = us_id;
        let mut steps = 0;
        while current != ds_id {
            steps += 1;
            if steps > MAX_WALK {
                return Err(SourceError::Network(format!(
                    "no path from {us_id} to {ds_id} within {MAX_WALK} steps"
                )));
            }
            let reach = self.reach(current).ok_or_else(|| {
                SourceError::Network(format!("reach {current} not in loaded network"))
            })?;
            let Some(next) = reach.to_id else {
                return Err(SourceError::Network(format!(
                    "walk from {us_id} reached outlet {current} before {ds_id}"
                )));
            };
            if !self.reaches.contains_key(&next) {
                return Err(SourceError::Network(format!(
                    "walk from {us_id} left the loaded network at {next}"
                )));
            }
            path.push(next);
            current = next;
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    fn reach(id: i64, to_id: Option<i64>, y: f64) -> NetworkReach {
        NetworkReach {
            id,
            geometry: LineString::new(vec![Point::new(0.0, y + 10.0), Point::new(0.0, y)]),
            to_id,
            high_flow_threshold: 100.0,
            hundred_year_flow: 5000.0,
        }
    }

    #[test]
    fn test_walk_chain() {
        let graph = NetworkGraph::new(vec![
            reach(1, Some(2), 20.0),
            reach(2, Some(3), 10.0),
            reach(3, None, 0.0),
        ]);
        assert_eq!(graph.walk(1, 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(graph.walk(2, 2).unwrap(), vec![2]);
    }

    #[test]
    fn test_walk_past_outlet_fails() {
        let graph = NetworkGraph::new(vec![reach(1, Some(2), 10.0), reach(2, None, 0.0)]);
        assert!(graph.walk(2, 1).is_err());
    }

    #[test]
    fn test_children() {
        let graph = NetworkGraph::new(vec![
            reach(1, Some(3), 20.0),
            reach(2, Some(3), 20.0),
            reach(3, None, 0.0),
        ]);
        let mut children = graph.children(3).to_vec();
        children.sort();
        assert_eq!(children, vec![1, 2]);
        assert!(graph.children(1).is_empty());
    }

    #[test]
    fn test_memory_source_filters_by_bbox() {
        let source = MemoryReachSource::new(vec![reach(1, None, 0.0), reach(2, None, 1000.0)]);
        let hits = source
            .query(&BBox::new(-5.0, -5.0, 5.0, 15.0))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }
}
