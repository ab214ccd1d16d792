//! Flow accumulation algorithm
//!
//! Counts, for every cell, the cells that drain through it (itself
//! included) based on D8 flow direction. This is the upstream
//! contributing area in cell counts.

use ndarray::Array2;
use tracing::debug;
use cuenca_core::raster::{FlowCell, Raster};
use cuenca_core::{Algorithm, CancellationToken, Error, Result};

use super::flow_direction::compute_directions;

/// Flow accumulation algorithm
#[derive(Debug, Clone, Default)]
pub struct FlowAccumulation;

impl Algorithm for FlowAccumulation {
    type Input = Raster<u8>;
    type Output = Raster<u32>;
    type Params = ();
    type Error = Error;

    fn name(&self) -> &'static str {
        "Flow Accumulation"
    }

    fn description(&self) -> &'static str {
        "Calculate upstream contributing cell count from D8 flow direction"
    }

    fn execute(&self, input: Self::Input, _params: Self::Params) -> Result<Self::Output> {
        flow_accumulation(&input)
    }
}

/// Direction and accumulation grids of one routed DEM
#[derive(Debug, Clone)]
pub struct FlowRouting {
    pub direction: Raster<u8>,
    pub accumulation: Raster<u32>,
}

/// Route a corrected DEM: D8 directions, then accumulation.
pub fn route(dem: &Raster<f64>, cancel: &CancellationToken) -> Result<FlowRouting> {
    let direction = compute_directions(dem, cancel)?;
    let accumulation = accumulate(&direction, cancel)?;
    Ok(FlowRouting {
        direction,
        accumulation,
    })
}

/// Calculate flow accumulation from a D8 flow direction raster.
///
/// Every valid cell counts itself, so headwater cells hold 1 and
/// `acc(cell) = 1 + sum(acc(upstream neighbours))`. Nodata cells hold 0.
///
/// # Algorithm
/// 1. Count incoming flows for each cell (in-degree)
/// 2. Start from cells with in-degree 0 (headwaters)
/// 3. Propagate downstream (Kahn's topological order), accumulating counts
///
/// # Errors
/// [`Error::RoutingInconsistency`] when a direction points off the grid or
/// into nodata, or when the directions contain a cycle.
pub fn flow_accumulation(flow_dir: &Raster<u8>) -> Result<Raster<u32>> {
    accumulate(flow_dir, &CancellationToken::new())
}

pub(crate) fn accumulate(flow_dir: &Raster<u8>, cancel: &CancellationToken) -> Result<Raster<u32>> {
    let (rows, cols) = flow_dir.shape();
    let codes = flow_dir.data();

    // Resolve each cell's receiver once, validating the field on the way
    let mut receiver: Array2<Option<(usize, usize)>> = Array2::from_elem((rows, cols), None);
    let mut in_degree = Array2::<u32>::zeros((rows, cols));
    let mut accumulation = Array2::<u32>::zeros((rows, cols));
    let mut valid_count = 0usize;

    for row in 0..rows {
        for col in 0..cols {
            let dir = match FlowCell::from_code(codes[(row, col)]) {
                FlowCell::NoData => continue,
                FlowCell::Outlet => {
                    valid_count += 1;
                    accumulation[(row, col)] = 1;
                    continue;
                }
                FlowCell::Toward(dir) => dir,
            };
            valid_count += 1;
            accumulation[(row, col)] = 1;

            let target = dir
                .step(row, col, rows, cols)
                .filter(|&(r, c)| FlowCell::from_code(codes[(r, c)]) != FlowCell::NoData);
            let Some((nr, nc)) = target else {
                return Err(Error::RoutingInconsistency {
                    row,
                    col,
                    reason: format!("direction {:?} leaves the valid grid", dir),
                });
            };
            receiver[(row, col)] = Some((nr, nc));
            in_degree[(nr, nc)] += 1;
        }
    }

    // Headwaters in row-major order
    let mut queue: Vec<(usize, usize)> = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            if in_degree[(row, col)] == 0 && FlowCell::from_code(codes[(row, col)]) != FlowCell::NoData {
                queue.push((row, col));
            }
        }
    }

    let mut processed = 0usize;
    while let Some((row, col)) = queue.pop() {
        cancel.check()?;
        processed += 1;

        let Some((nr, nc)) = receiver[(row, col)] else {
            continue;
        };

        // Pass accumulation downstream: this cell + all its upstream
        accumulation[(nr, nc)] += accumulation[(row, col)];
        in_degree[(nr, nc)] -= 1;
        if in_degree[(nr, nc)] == 0 {
            queue.push((nr, nc));
        }
    }

    if processed < valid_count {
        // Cells still waiting on upstream input sit on or below a cycle
        if let Some(((row, col), _)) = in_degree.indexed_iter().find(|(_, d)| **d > 0) {
            return Err(Error::RoutingInconsistency {
                row,
                col,
                reason: "flow directions contain a cycle".into(),
            });
        }
    }
    debug!(cells = processed, "flow accumulation complete");

    let mut output = flow_dir.with_data(accumulation)?;
    output.set_nodata(None);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::flow_direction::{flow_direction, FlowDirection};
    use crate::hydrology::test_support::{dem_from, south_slope};
    use cuenca_core::raster::{Direction, FLOW_NODATA, FLOW_OUTLET};

    #[test]
    fn test_flow_accumulation_linear() {
        // 2x5 strip sloping east, each row a chain
        let values: Vec<f64> = (0..10).map(|i| (5 - i % 5) as f64).collect();
        let fdir = flow_direction(&dem_from(&values, 2, 5)).unwrap();
        let acc = flow_accumulation(&fdir).unwrap();

        for col in 0..5 {
            assert_eq!(acc.get(0, col).unwrap(), col as u32 + 1);
        }
    }

    #[test]
    fn test_flow_accumulation_convergent() {
        // 3x3 DEM with the centre lowest and draining to the south edge
        #[rustfmt::skip]
        let values = [
            5.0, 5.0, 5.0,
            5.0, 2.0, 5.0,
            5.0, 1.0, 5.0,
        ];
        let fdir = flow_direction(&dem_from(&values, 3, 3)).unwrap();
        let acc = flow_accumulation(&fdir).unwrap();

        // Everything ends up in the bottom-centre outlet
        assert_eq!(acc.get(2, 1).unwrap(), 9);
        assert_eq!(acc.get(0, 0).unwrap(), 1);
    }

    #[test]
    fn test_conservation_on_plane() {
        let fdir = flow_direction(&south_slope(6, 4)).unwrap();
        let acc = flow_accumulation(&fdir).unwrap();

        for row in 0..6 {
            for col in 0..4 {
                let upstream: u32 = Direction::ALL
                    .into_iter()
                    .filter_map(|d| d.step(row, col, 6, 4).map(|(r, c)| (d, r, c)))
                    .filter(|&(d, r, c)| fdir.get(r, c).unwrap() == d.opposite().code())
                    .map(|(_, r, c)| acc.get(r, c).unwrap())
                    .sum();
                assert_eq!(acc.get(row, col).unwrap(), 1 + upstream);
            }
        }
        assert_eq!(acc.get(5, 2).unwrap(), 6);
    }

    #[test]
    fn test_nodata_cells_hold_zero() {
        let mut fdir = Raster::from_vec(vec![FLOW_OUTLET, FLOW_NODATA, 5, FLOW_OUTLET], 2, 2).unwrap();
        fdir.set_nodata(Some(FLOW_NODATA));
        // (1,0) points West, off the grid
        let err = flow_accumulation(&fdir).unwrap_err();
        assert!(matches!(err, Error::RoutingInconsistency { row: 1, col: 0, .. }));

        fdir.set(1, 0, Direction::East.code()).unwrap();
        let acc = flow_accumulation(&fdir).unwrap();
        assert_eq!(acc.get(0, 1).unwrap(), 0);
        assert_eq!(acc.get(1, 1).unwrap(), 2);
    }

    #[test]
    fn test_cycle_detected() {
        // (0,0) -> E -> (0,1) -> W -> (0,0)
        let fdir = Raster::from_vec(
            vec![Direction::East.code(), Direction::West.code(), FLOW_OUTLET, FLOW_OUTLET],
            2,
            2,
        )
        .unwrap();
        let err = flow_accumulation(&fdir).unwrap_err();
        assert!(matches!(err, Error::RoutingInconsistency { row: 0, col: 0, .. }));
    }

    #[test]
    fn test_route_pairs_grids() {
        let routing = route(&south_slope(4, 3), &CancellationToken::new()).unwrap();
        assert_eq!(routing.direction.shape(), routing.accumulation.shape());
        assert_eq!(routing.accumulation.get(3, 1).unwrap(), 4);
    }

    #[test]
    fn test_algorithm_chain() {
        let dem = south_slope(5, 2);
        let fdir = FlowDirection.execute_default(dem).unwrap();
        let acc = FlowAccumulation.execute_default(fdir).unwrap();
        assert_eq!(acc.get(4, 0).unwrap(), 5);
        assert_eq!(FlowAccumulation.name(), "Flow Accumulation");
    }
}
