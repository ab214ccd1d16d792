//! Pour point resolution
//!
//! Pour points are the cells at which sub-catchments are closed: every
//! source, junction and outlet node of the stream network.

use geo_types::Point;
use serde::{Deserialize, Serialize};
use cuenca_core::raster::{GeoTransform, GridCell, Raster};
use cuenca_core::vector::Feature;

use super::stream_network::{NodeKind, StreamNetwork};

/// A catchment closing cell with its role and contributing cell count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PourPoint {
    pub cell: GridCell,
    pub kind: NodeKind,
    pub accumulation: u32,
}

impl PourPoint {
    /// `Point` feature at the cell centre
    pub fn to_feature(&self, transform: &GeoTransform) -> Feature {
        let (x, y) = transform.pixel_to_geo(self.cell.col, self.cell.row);
        Feature::new(Point::new(x, y))
            .with_property("kind", self.kind.as_str())
            .with_property("accumulation", self.accumulation)
            .with_property("row", self.cell.row as i64)
            .with_property("col", self.cell.col as i64)
    }
}

/// Every network node as a pour point, largest accumulation first.
///
/// Ties are ordered by ascending (row, col). An empty network yields an
/// empty vector.
pub fn resolve_pour_points(network: &StreamNetwork) -> Vec<PourPoint> {
    let mut points: Vec<PourPoint> = network
        .nodes
        .iter()
        .map(|node| PourPoint {
            cell: node.cell,
            kind: node.kind,
            accumulation: node.accumulation,
        })
        .collect();

    points.sort_by(|a, b| {
        b.accumulation
            .cmp(&a.accumulation)
            .then_with(|| a.cell.cmp(&b.cell))
    });
    points
}

/// Snap a map coordinate to the nearest stream cell.
///
/// Searches cells whose centre lies within `max_distance` map units of
/// `(x, y)` and whose accumulation reaches `threshold`. Equal distances
/// prefer the larger accumulation, then the lower (row, col). Returns
/// `None` when no stream cell is in range.
pub fn snap_to_stream(
    x: f64,
    y: f64,
    flow_acc: &Raster<u32>,
    threshold: u32,
    max_distance: f64,
) -> Option<GridCell> {
    let transform = flow_acc.transform();
    let cell_size = transform.cell_size();
    if !x.is_finite() || !y.is_finite() || max_distance.is_nan() || max_distance < 0.0 {
        return None;
    }

    let (rows, cols) = flow_acc.shape();
    let (fc, fr) = transform.geo_to_pixel(x, y);
    let reach = (max_distance / cell_size).ceil() + 1.0;

    let window = |centre: f64, n: usize| {
        let lo = (centre - reach).floor().max(0.0);
        let hi = (centre + reach).ceil().min(n as f64 - 1.0);
        (lo <= hi).then_some((lo as usize, hi as usize))
    };
    let (r0, r1) = window(fr, rows)?;
    let (c0, c1) = window(fc, cols)?;

    let acc = flow_acc.data();
    let mut best: Option<(f64, u32, GridCell)> = None;
    for row in r0..=r1 {
        for col in c0..=c1 {
            let a = acc[(row, col)];
            if a < threshold || flow_acc.is_nodata(a) {
                continue;
            }
            let (cx, cy) = transform.pixel_to_geo(col, row);
            let d = ((cx - x).powi(2) + (cy - y).powi(2)).sqrt();
            if d > max_distance {
                continue;
            }
            let better = match best {
                None => true,
                Some((bd, ba, _)) => d < bd || (d == bd && a > ba),
            };
            if better {
                best = Some((d, a, GridCell::new(row, col)));
            }
        }
    }

    best.map(|(_, _, cell)| cell)
}
