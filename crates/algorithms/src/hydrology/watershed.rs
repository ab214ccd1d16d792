//! Catchment delineation
//!
//! Labels, for each pour point, the cells that drain to it without passing
//! another pour point first. Pour points are processed in the order given
//! (largest accumulation first when they come from
//! [`resolve_pour_points`](super::resolve_pour_points)); a cell already
//! claimed by an earlier catchment is never relabelled, so the result is a
//! set of disjoint incremental catchments nested along the drainage tree.

use std::collections::VecDeque;

use geo_types::MultiPolygon;
use serde::{Deserialize, Serialize};
use tracing::debug;
use cuenca_core::raster::{d8_neighbors, GridCell, Raster, FLOW_NODATA};
use cuenca_core::vector::{Feature, FeatureCollection};
use cuenca_core::{Algorithm, CancellationToken, Error, Result};

use super::boundary::trace_boundary;
use super::flow_direction::{downstream, drains_into};
use super::pour_points::PourPoint;
use crate::maybe_rayon::*;

/// Parameters for [`Watershed`]
#[derive(Debug, Clone, Default)]
pub struct WatershedParams {
    /// Pour points, in processing order
    pub pour_points: Vec<PourPoint>,
}

/// Watershed delineation algorithm
#[derive(Debug, Clone, Default)]
pub struct Watershed;

impl Algorithm for Watershed {
    type Input = Raster<u8>;
    type Output = CatchmentSet;
    type Params = WatershedParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Watershed"
    }

    fn description(&self) -> &'static str {
        "Delineate nested sub-catchments above pour points from D8 flow direction"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        delineate(&params.pour_points, &input, &CancellationToken::new())
    }
}

/// Cells draining to one pour point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catchment {
    /// 1-based id, also the value in [`CatchmentSet::labels`]
    pub id: i32,
    pub pour_point: PourPoint,
    /// Member cells in row-major order
    pub cells: Vec<GridCell>,
    /// Area of the member cells in map units squared
    pub area: f64,
    /// Area of everything upstream of the pour point, nested catchments included
    pub contributing_area: f64,
    /// Catchment receiving this one's outflow, `None` at network outlets
    pub drains_to: Option<i32>,
    pub boundary: MultiPolygon<f64>,
}

/// All catchments of one delineation plus their label raster
#[derive(Debug, Clone)]
pub struct CatchmentSet {
    pub catchments: Vec<Catchment>,
    /// Catchment id per cell; 0 where no pour point is reached
    pub labels: Raster<i32>,
}

impl CatchmentSet {
    pub fn len(&self) -> usize {
        self.catchments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catchments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Catchment> {
        self.catchments.iter()
    }

    /// Catchment closed at `pour_point`
    pub fn get(&self, pour_point: &PourPoint) -> Option<&Catchment> {
        self.catchments
            .iter()
            .find(|c| c.pour_point.cell == pour_point.cell)
    }

    pub fn by_id(&self, id: i32) -> Option<&Catchment> {
        usize::try_from(id - 1)
            .ok()
            .and_then(|i| self.catchments.get(i))
    }

    /// Catchments as polygon features, one per catchment.
    pub fn to_features(&self) -> FeatureCollection {
        let transform = self.labels.transform();
        let mut collection = FeatureCollection::new(self.labels.crs().cloned());
        for c in &self.catchments {
            let (x, y) = transform.pixel_to_geo(c.pour_point.cell.col, c.pour_point.cell.row);
            collection.push(
                Feature::new(c.boundary.clone())
                    .with_id(c.id.to_string())
                    .with_property("kind", c.pour_point.kind.as_str())
                    .with_property("accumulation", c.pour_point.accumulation)
                    .with_property("cells", c.cells.len() as i64)
                    .with_property("area", c.area)
                    .with_property("contributing_area", c.contributing_area)
                    .with_property("drains_to", c.drains_to.map(i64::from))
                    .with_property("pour_x", x)
                    .with_property("pour_y", y),
            );
        }
        collection
    }
}

/// Delineate one catchment per pour point over a D8 direction raster.
///
/// Every pour point cell is claimed by its own catchment before any fill
/// starts, so an upstream fill stops where it meets another pour point.
/// Fills then run in input order with an inverse BFS over the direction
/// field, skipping claimed cells.
///
/// # Errors
/// - [`Error::InvalidParameter`] for a pour point outside the grid, on a
///   nodata cell, or listed twice
/// - [`Error::Cancelled`] when `cancel` fires
pub fn delineate(
    pour_points: &[PourPoint],
    flow_dir: &Raster<u8>,
    cancel: &CancellationToken,
) -> Result<CatchmentSet> {
    let (rows, cols) = flow_dir.shape();
    let codes = flow_dir.data();
    let mut labels = flow_dir.with_same_meta::<i32>();
    labels.set_nodata(Some(0));
    let claimed = labels.data_mut();

    for (i, pp) in pour_points.iter().enumerate() {
        let GridCell { row, col } = pp.cell;
        if row >= rows || col >= cols {
            return Err(Error::invalid_parameter(
                "pour_points",
                format!("({}, {})", row, col),
                format!("outside the {}x{} grid", rows, cols),
            ));
        }
        if codes[(row, col)] == FLOW_NODATA {
            return Err(Error::invalid_parameter(
                "pour_points",
                format!("({}, {})", row, col),
                "pour point on a nodata cell",
            ));
        }
        if claimed[(row, col)] != 0 {
            return Err(Error::invalid_parameter(
                "pour_points",
                format!("({}, {})", row, col),
                "pour point listed twice",
            ));
        }
        claimed[(row, col)] = (i + 1) as i32;
    }

    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
    for (i, pp) in pour_points.iter().enumerate() {
        let id = (i + 1) as i32;
        queue.push_back((pp.cell.row, pp.cell.col));

        while let Some((row, col)) = queue.pop_front() {
            cancel.check()?;
            for (dir, nr, nc) in d8_neighbors(row, col, rows, cols) {
                if claimed[(nr, nc)] != 0 {
                    continue;
                }
                if drains_into(codes[(nr, nc)], dir) {
                    claimed[(nr, nc)] = id;
                    queue.push_back((nr, nc));
                }
            }
        }
    }

    let mut members: Vec<Vec<GridCell>> = vec![Vec::new(); pour_points.len()];
    for ((row, col), &id) in claimed.indexed_iter() {
        if id > 0 {
            members[(id - 1) as usize].push(GridCell::new(row, col));
        }
    }

    let transform = *flow_dir.transform();
    let boundaries: Vec<MultiPolygon<f64>> = (0..members.len())
        .into_par_iter()
        .map(|i| trace_boundary(&members[i], &transform))
        .collect();
    cancel.check()?;

    let cell_area = transform.cell_area();
    let catchments: Vec<Catchment> = pour_points
        .iter()
        .zip(members)
        .zip(boundaries)
        .enumerate()
        .map(|(i, ((pp, cells), boundary))| {
            let id = (i + 1) as i32;
            let drains_to = downstream(codes, pp.cell.row, pp.cell.col)
                .map(|(r, c)| claimed[(r, c)])
                .filter(|&to| to > 0 && to != id);
            Catchment {
                id,
                pour_point: *pp,
                area: cells.len() as f64 * cell_area,
                contributing_area: pp.accumulation as f64 * cell_area,
                cells,
                drains_to,
                boundary,
            }
        })
        .collect();

    debug!(
        catchments = catchments.len(),
        labelled = catchments.iter().map(|c| c.cells.len()).sum::<usize>(),
        "catchments delineated"
    );

    Ok(CatchmentSet { catchments, labels })
}
