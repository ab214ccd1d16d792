//! D8 flow direction algorithm
//!
//! Calculates the direction of flow from each cell to its steepest
//! downslope neighbor using the D8 (deterministic eight-node) method.
//!
//! Flow direction encoding:
//! ```text
//!   4  3  2
//!   5  0  1
//!   6  7  8
//! ```
//! 0 = outlet (flow leaves the grid), 1-8 = direction to steepest neighbor,
//! 255 = nodata

use ndarray::Array2;
use crate::maybe_rayon::*;
use cuenca_core::raster::{Direction, FlowCell, Raster, FLOW_NODATA, FLOW_OUTLET};
use cuenca_core::{Algorithm, CancellationToken, Error, Result};

use super::{drainage_boundary, validate_dem};

/// Flow direction algorithm (D8)
#[derive(Debug, Clone, Default)]
pub struct FlowDirection;

impl Algorithm for FlowDirection {
    type Input = Raster<f64>;
    type Output = Raster<u8>;
    type Params = ();
    type Error = Error;

    fn name(&self) -> &'static str {
        "Flow Direction (D8)"
    }

    fn description(&self) -> &'static str {
        "Calculate D8 flow direction from a corrected DEM"
    }

    fn execute(&self, input: Self::Input, _params: Self::Params) -> Result<Self::Output> {
        flow_direction(&input)
    }
}

/// Calculate D8 flow direction from a corrected DEM.
///
/// Each valid cell points to the neighbour with the largest drop
/// `(z_cell - z_neighbour) / distance`, where distance is the cell size for
/// cardinal and `cell size * sqrt(2)` for diagonal neighbours. Equal drops
/// are resolved clockwise from East (E, SE, S, SW, W, NW, N, NE).
///
/// Cells without a lower neighbour become outlets. That is only legal on
/// the drainage boundary.
///
/// # Errors
/// [`Error::RoutingInconsistency`] at the first (row-major) interior cell
/// without a lower neighbour: the DEM was not corrected.
pub fn flow_direction(dem: &Raster<f64>) -> Result<Raster<u8>> {
    compute_directions(dem, &CancellationToken::new())
}

pub(crate) fn compute_directions(dem: &Raster<f64>, cancel: &CancellationToken) -> Result<Raster<u8>> {
    validate_dem(dem)?;

    let (rows, cols) = dem.shape();
    let cell_size = dem.cell_size();
    let valid = dem.valid_mask();
    let boundary = drainage_boundary(&valid);
    let elev = dem.data();

    // Each row reports its codes plus the first interior cell left without outflow
    let row_results: Vec<(Vec<u8>, Option<usize>)> = (0..rows)
        .into_par_iter()
        .map(|row| {
            let mut row_data = vec![FLOW_NODATA; cols];
            let mut first_pit = None;
            if cancel.is_cancelled() {
                return (row_data, first_pit);
            }

            for col in 0..cols {
                if !valid[(row, col)] {
                    continue;
                }
                let center = elev[(row, col)];

                let mut max_drop = 0.0_f64;
                let mut best = FlowCell::Outlet;

                for dir in Direction::CLOCKWISE_FROM_EAST {
                    let Some((nr, nc)) = dir.step(row, col, rows, cols) else {
                        continue;
                    };
                    if !valid[(nr, nc)] {
                        continue;
                    }

                    let distance = dir.distance_factor() * cell_size;
                    let drop = (center - elev[(nr, nc)]) / distance;

                    if drop > max_drop {
                        max_drop = drop;
                        best = FlowCell::Toward(dir);
                    }
                }

                if best == FlowCell::Outlet && !boundary[(row, col)] && first_pit.is_none() {
                    first_pit = Some(col);
                }
                row_data[col] = best.code();
            }

            (row_data, first_pit)
        })
        .collect();

    cancel.check()?;

    let mut codes = Vec::with_capacity(rows * cols);
    for (row, (row_data, first_pit)) in row_results.into_iter().enumerate() {
        if let Some(col) = first_pit {
            return Err(Error::RoutingInconsistency {
                row,
                col,
                reason: "interior cell has no lower neighbour".into(),
            });
        }
        codes.extend(row_data);
    }

    let array = Array2::from_shape_vec((rows, cols), codes).map_err(|e| Error::Other(e.to_string()))?;
    let mut output = dem.with_data(array)?;
    output.set_nodata(Some(FLOW_NODATA));
    Ok(output)
}

/// Cell that (row, col) drains into, or `None` for outlets, nodata and
/// codes pointing off the grid.
#[inline]
pub(crate) fn downstream(codes: &Array2<u8>, row: usize, col: usize) -> Option<(usize, usize)> {
    let (rows, cols) = codes.dim();
    FlowCell::from_code(codes[(row, col)])
        .direction()
        .and_then(|dir| dir.step(row, col, rows, cols))
}

/// Whether the cell at `(row, col)` drains into its neighbour reached by
/// going `dir` from the receiving cell.
#[inline]
pub(crate) fn drains_into(code: u8, dir_from_receiver: Direction) -> bool {
    code != FLOW_OUTLET && code == dir_from_receiver.opposite().code()
}
