//! Priority-Flood depression filling
//!
//! O(n log n) algorithm for filling depressions in a DEM. Uses a
//! priority queue (min-heap) to process cells in elevation order,
//! starting from the drainage boundary (raster edge and nodata margins).
//!
//! Filled plateaus are then given a tiny gradient by [`super::flats`] so
//! that every cell has a strictly descending path to the boundary.
//!
//! Reference:
//! Barnes, R., Lehman, C., & Mulla, D. (2014). Priority-Flood: An optimal
//! depression-filling and watershed-labeling algorithm for digital elevation
//! models. *Computers & Geosciences*, 62, 117–127.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;
use cuenca_core::raster::{d8_neighbors, Raster};
use cuenca_core::{Algorithm, CancellationToken, Error, Result};

use super::flats::resolve_flats;
use super::{drainage_boundary, validate_dem};

/// A cell in the priority queue, ordered by elevation (min-heap via reversed Ord).
#[derive(Debug, Clone, Copy)]
struct Cell {
    elevation: f64,
    row: usize,
    col: usize,
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse: lower elevation first, then lower (row, col)
        other
            .elevation
            .total_cmp(&self.elevation)
            .then_with(|| (other.row, other.col).cmp(&(self.row, self.col)))
    }
}

/// Parameters for terrain correction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainCorrectionParams {
    /// Upper bound of the per-step elevation increment used to give
    /// filled flats a drainage gradient. Smaller flats-adjacent rises shrink
    /// it further so raised cells never overtake surrounding terrain.
    pub flat_increment: f64,
}

impl Default for TerrainCorrectionParams {
    fn default() -> Self {
        Self { flat_increment: 1e-5 }
    }
}

impl TerrainCorrectionParams {
    pub fn validate(&self) -> Result<()> {
        if !self.flat_increment.is_finite() || self.flat_increment <= 0.0 {
            return Err(Error::invalid_parameter(
                "flat_increment",
                self.flat_increment,
                "must be finite and positive",
            ));
        }
        Ok(())
    }
}

/// Terrain correction: Priority-Flood fill followed by flat resolution
#[derive(Debug, Clone, Default)]
pub struct PriorityFlood;

impl Algorithm for PriorityFlood {
    type Input = Raster<f64>;
    type Output = Raster<f64>;
    type Params = TerrainCorrectionParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Priority-Flood"
    }

    fn description(&self) -> &'static str {
        "Fill depressions (Barnes 2014) and impose drainage on flats"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        correct_terrain(&input, &params, &CancellationToken::new())
    }
}

/// Fill depressions in a DEM using the Priority-Flood algorithm.
///
/// # Algorithm
/// 1. Seed a min-heap with every drainage boundary cell, marked resolved
/// 2. Pop the lowest resolved cell
/// 3. For each unresolved neighbour:
///    - output = max(neighbour_elevation, popped_elevation)
///    - mark resolved, push to heap
/// 4. Repeat until the heap is empty
///
/// Filled depressions come out perfectly flat; use [`correct_terrain`] to
/// also make them drain. Nodata cells are copied unchanged.
///
/// # Errors
/// [`Error::InvalidGrid`] for degenerate rasters, [`Error::Cancelled`] when
/// `cancel` fires between heap pops.
pub fn priority_flood(dem: &Raster<f64>, cancel: &CancellationToken) -> Result<Raster<f64>> {
    validate_dem(dem)?;

    let (rows, cols) = dem.shape();
    let valid = dem.valid_mask();
    let boundary = drainage_boundary(&valid);

    let mut output = dem.data().clone();
    let mut resolved = Array2::<bool>::from_elem((rows, cols), false);
    let mut heap = BinaryHeap::new();

    // Seed the priority queue with the drainage boundary
    for row in 0..rows {
        for col in 0..cols {
            if !valid[(row, col)] {
                resolved[(row, col)] = true;
            } else if boundary[(row, col)] {
                heap.push(Cell {
                    elevation: output[(row, col)],
                    row,
                    col,
                });
                resolved[(row, col)] = true;
            }
        }
    }
    debug!(seeds = heap.len(), rows, cols, "priority-flood seeded");

    let mut raised = 0usize;
    while let Some(cell) = heap.pop() {
        cancel.check()?;

        for (_, nr, nc) in d8_neighbors(cell.row, cell.col, rows, cols) {
            if resolved[(nr, nc)] {
                continue;
            }
            resolved[(nr, nc)] = true;

            let original = output[(nr, nc)];
            let filled = original.max(cell.elevation);
            if filled > original {
                raised += 1;
            }
            output[(nr, nc)] = filled;
            heap.push(Cell {
                elevation: filled,
                row: nr,
                col: nc,
            });
        }
    }
    debug!(raised, "priority-flood complete");

    let mut result = dem.clone();
    *result.data_mut() = output;
    Ok(result)
}

/// Correct a DEM for flow routing.
///
/// Fills every depression with [`priority_flood`] and then resolves the
/// resulting flats, so that following the steepest descent from any valid
/// cell reaches the drainage boundary. Corrected elevations are never
/// below the originals.
pub fn correct_terrain(
    dem: &Raster<f64>,
    params: &TerrainCorrectionParams,
    cancel: &CancellationToken,
) -> Result<Raster<f64>> {
    params.validate()?;
    let mut filled = priority_flood(dem, cancel)?;

    let valid = filled.valid_mask();
    let boundary = drainage_boundary(&valid);
    let summary = resolve_flats(filled.data_mut(), &valid, &boundary, params.flat_increment, cancel)?;
    debug!(
        flats = summary.flats,
        raised_cells = summary.raised_cells,
        undrained = summary.undrained,
        "flat resolution complete"
    );

    Ok(filled)
}
