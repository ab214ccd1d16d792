//! Hydrological analysis algorithms
//!
//! Stages of the catchment pipeline, leaf first:
//! - Priority-Flood: O(n log n) depression filling (Barnes 2014)
//! - Flats: epsilon gradients so every filled plateau drains
//! - Flow direction: D8 single flow direction
//! - Flow accumulation: upstream contributing cell count
//! - Stream network: thresholded, vectorized drainage network
//! - Pour points: network sources, junctions and outlets
//! - Watershed: nested sub-catchments per pour point
//! - Boundary: cell masks to polygons

mod boundary;
mod flats;
pub(crate) mod flow_accumulation;
pub(crate) mod flow_direction;
mod pipeline;
mod pour_points;
mod priority_flood;
mod stream_network;
mod watershed;

pub use boundary::trace_boundary;
pub use flow_accumulation::{flow_accumulation, route, FlowAccumulation, FlowRouting};
pub use flow_direction::{flow_direction, FlowDirection};
pub use pipeline::{Pipeline, PipelineOutput, PipelineParams, ThresholdTuning};
pub use pour_points::{resolve_pour_points, snap_to_stream, PourPoint};
pub use priority_flood::{correct_terrain, priority_flood, PriorityFlood, TerrainCorrectionParams};
pub use stream_network::{
    extract_streams, stream_mask, NodeKind, StreamEdge, StreamNetwork, StreamNode,
};
pub use watershed::{delineate, Catchment, CatchmentSet, Watershed, WatershedParams};

use ndarray::Array2;
use cuenca_core::raster::{d8_neighbors, Raster};
use cuenca_core::{Error, Result};

/// Reject rasters no stage can work on.
///
/// Fails with [`Error::InvalidGrid`] when the grid is smaller than 2x2, the
/// cells are not finite positive squares, or every cell is nodata.
pub fn validate_dem(dem: &Raster<f64>) -> Result<()> {
    let (rows, cols) = dem.shape();
    if rows < 2 || cols < 2 {
        return Err(Error::InvalidGrid(format!(
            "DEM must be at least 2x2, got {}x{}",
            rows, cols
        )));
    }

    let cell_size = dem.cell_size();
    if !cell_size.is_finite() || cell_size <= 0.0 {
        return Err(Error::InvalidGrid(format!(
            "cell size must be finite and positive, got {}",
            cell_size
        )));
    }

    let height = dem.transform().pixel_height.abs();
    if !height.is_finite() || (height - cell_size).abs() > cell_size * 1e-6 {
        return Err(Error::InvalidGrid(format!(
            "cells must be square, got {} x {}",
            cell_size, height
        )));
    }

    if dem.data().iter().all(|&v| dem.is_nodata(v)) {
        return Err(Error::InvalidGrid("every cell is nodata".into()));
    }

    Ok(())
}

/// Cells through which water may leave the grid: valid cells on the raster
/// edge or 8-adjacent to a nodata cell.
///
/// Only these cells may seed the Priority-Flood and only these may be
/// routed as outlets.
pub(crate) fn drainage_boundary(valid: &Array2<bool>) -> Array2<bool> {
    let (rows, cols) = valid.dim();
    Array2::from_shape_fn((rows, cols), |(row, col)| {
        if !valid[(row, col)] {
            return false;
        }
        if row == 0 || col == 0 || row == rows - 1 || col == cols - 1 {
            return true;
        }
        d8_neighbors(row, col, rows, cols).any(|(_, r, c)| !valid[(r, c)])
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use cuenca_core::{GeoTransform, Raster};

    /// Build a DEM from row-major values with unit cells.
    pub fn dem_from(values: &[f64], rows: usize, cols: usize) -> Raster<f64> {
        let mut dem = Raster::from_vec(values.to_vec(), rows, cols).unwrap();
        dem.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        dem
    }

    /// 5x5 plateau at 10 with the upper-left corner dropped to 0.
    pub fn corner_outlet_dem() -> Raster<f64> {
        let mut values = vec![10.0; 25];
        values[0] = 0.0;
        dem_from(&values, 5, 5)
    }

    /// Three one-cell tributaries meeting at (2,1) above an outlet at (3,1).
    ///
    /// ```text
    ///   S   S   S
    ///   SE  S   SW
    ///   E   S   W
    ///   E   .   W
    /// ```
    /// Accumulation: row 1 holds 2, (2,1) holds 9, the outlet holds 12.
    pub fn y_confluence() -> Raster<u8> {
        use cuenca_core::raster::{Direction::*, FLOW_NODATA, FLOW_OUTLET};
        #[rustfmt::skip]
        let codes = vec![
            South.code(), South.code(), South.code(),
            SouthEast.code(), South.code(), SouthWest.code(),
            East.code(), South.code(), West.code(),
            East.code(), FLOW_OUTLET, West.code(),
        ];
        let mut fdir = Raster::from_vec(codes, 4, 3).unwrap();
        fdir.set_transform(GeoTransform::new(0.0, 40.0, 10.0, -10.0));
        fdir.set_nodata(Some(FLOW_NODATA));
        fdir
    }

    /// Plane sloping down to the south.
    pub fn south_slope(rows: usize, cols: usize) -> Raster<f64> {
        let values: Vec<f64> = (0..rows * cols)
            .map(|i| (rows - i / cols) as f64 * 10.0)
            .collect();
        dem_from(&values, rows, cols)
    }
}
