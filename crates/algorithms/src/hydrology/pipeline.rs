//! Catchment pipeline
//!
//! Runs terrain correction, routing, stream extraction, pour point
//! resolution and delineation in sequence on one DEM, checking the
//! invariants each stage promises before handing its output on.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use cuenca_core::raster::{d8_neighbors, Raster};
use cuenca_core::{CancellationToken, Error, Result};

use super::flow_accumulation::{route, FlowRouting};
use super::flow_direction::drains_into;
use super::pour_points::{resolve_pour_points, PourPoint};
use super::priority_flood::{correct_terrain, TerrainCorrectionParams};
use super::stream_network::{extract_streams, StreamNetwork};
use super::validate_dem;
use super::watershed::{delineate, CatchmentSet};

/// Invocation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    /// Minimum accumulation, in cells, of a stream cell
    pub threshold: u32,
    /// Nominal DEM resolution in metres. Only compared against the grid's
    /// cell size; a mismatch is logged.
    pub resolution: f64,
    /// Area of interest (min_x, min_y, max_x, max_y) the DEM was fetched
    /// for. Carried through untouched.
    pub bbox: Option<[f64; 4]>,
    /// See [`TerrainCorrectionParams::flat_increment`]
    pub flat_increment: f64,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            threshold: 1000,
            resolution: 10.0,
            bbox: None,
            flat_increment: TerrainCorrectionParams::default().flat_increment,
        }
    }
}

impl PipelineParams {
    /// Parse and validate parameters from JSON. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)
            .map_err(|e| Error::invalid_parameter("params", json.trim(), e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(Error::invalid_parameter(
                "threshold",
                self.threshold,
                "stream threshold must be a positive cell count",
            ));
        }
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(Error::invalid_parameter(
                "resolution",
                self.resolution,
                "must be finite and positive",
            ));
        }
        if let Some([min_x, min_y, max_x, max_y]) = self.bbox {
            let finite = [min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite());
            if !finite || min_x >= max_x || min_y >= max_y {
                return Err(Error::invalid_parameter(
                    "bbox",
                    format!("{:?}", [min_x, min_y, max_x, max_y]),
                    "expected finite (min_x, min_y, max_x, max_y) with min < max",
                ));
            }
        }
        self.correction().validate()
    }

    fn correction(&self) -> TerrainCorrectionParams {
        TerrainCorrectionParams {
            flat_increment: self.flat_increment,
        }
    }
}

/// Threshold tuning for [`Pipeline::run_tuned`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdTuning {
    /// Divisor applied to the threshold after each empty extraction
    pub factor: f64,
    /// Lowest threshold worth trying
    pub min_threshold: u32,
}

impl Default for ThresholdTuning {
    fn default() -> Self {
        Self {
            factor: 2.0,
            min_threshold: 1,
        }
    }
}

impl ThresholdTuning {
    pub fn validate(&self) -> Result<()> {
        if !self.factor.is_finite() || self.factor <= 1.0 {
            return Err(Error::invalid_parameter(
                "factor",
                self.factor,
                "must be finite and greater than 1",
            ));
        }
        if self.min_threshold == 0 {
            return Err(Error::invalid_parameter(
                "min_threshold",
                self.min_threshold,
                "must be a positive cell count",
            ));
        }
        Ok(())
    }
}

/// Everything a pipeline run produces
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub corrected: Raster<f64>,
    pub direction: Raster<u8>,
    pub accumulation: Raster<u32>,
    pub network: StreamNetwork,
    /// Largest accumulation first
    pub pour_points: Vec<PourPoint>,
    pub catchments: CatchmentSet,
    /// Threshold the network was extracted with
    pub threshold: u32,
    pub bbox: Option<[f64; 4]>,
}

/// DEM to catchments in one call.
///
/// # Example
///
/// ```
/// use cuenca_algorithms::hydrology::{Pipeline, PipelineParams};
/// use cuenca_core::{GeoTransform, Raster};
///
/// let values: Vec<f64> = (0..36).map(|i| (6 - i / 6) as f64).collect();
/// let mut dem = Raster::from_vec(values, 6, 6).unwrap();
/// dem.set_transform(GeoTransform::new(0.0, 60.0, 10.0, -10.0));
///
/// let params = PipelineParams { threshold: 3, ..Default::default() };
/// let output = Pipeline::new(params).run(&dem).unwrap();
/// assert_eq!(output.network.outlets().count(), 6);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    params: PipelineParams,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(params: PipelineParams) -> Self {
        Self {
            params,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort the run when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    /// Run every stage with the configured threshold.
    ///
    /// An empty stream network is a valid outcome and yields no pour points
    /// and no catchments.
    pub fn run(&self, dem: &Raster<f64>) -> Result<PipelineOutput> {
        let (corrected, routing) = self.prepare(dem)?;
        let network = extract_streams(&routing.accumulation, &routing.direction, self.params.threshold)?;
        self.finish(corrected, routing, network)
    }

    /// Like [`Pipeline::run`], but when the network comes out empty the
    /// threshold is divided by `tuning.factor` and extraction retried, as
    /// long as the threshold stays at or above `tuning.min_threshold`.
    /// Correction and routing do not depend on the threshold and run once.
    pub fn run_tuned(&self, dem: &Raster<f64>, tuning: &ThresholdTuning) -> Result<PipelineOutput> {
        tuning.validate()?;
        let (corrected, routing) = self.prepare(dem)?;

        let mut threshold = self.params.threshold;
        let network = loop {
            self.cancel.check()?;
            let network = extract_streams(&routing.accumulation, &routing.direction, threshold)?;
            if !network.is_empty() {
                break network;
            }
            let next = (threshold as f64 / tuning.factor).floor() as u32;
            if next < tuning.min_threshold {
                warn!(threshold, "no stream cells at the lowest allowed threshold");
                break network;
            }
            info!(from = threshold, to = next, "empty stream network, lowering threshold");
            threshold = next;
        };

        self.finish(corrected, routing, network)
    }

    fn prepare(&self, dem: &Raster<f64>) -> Result<(Raster<f64>, FlowRouting)> {
        self.params.validate()?;
        validate_dem(dem)?;

        let (rows, cols) = dem.shape();
        let cell_size = dem.cell_size();
        if (cell_size - self.params.resolution).abs() > 0.01 * self.params.resolution {
            warn!(
                cell_size,
                resolution = self.params.resolution,
                "grid cell size differs from the requested resolution"
            );
        }
        info!(rows, cols, cell_size, threshold = self.params.threshold, "catchment pipeline started");

        let corrected = correct_terrain(dem, &self.params.correction(), &self.cancel)?;
        check_monotone(dem, &corrected)?;
        debug!("terrain corrected");

        let routing = route(&corrected, &self.cancel)?;
        check_conservation(&routing)?;
        debug!("flow routed");

        Ok((corrected, routing))
    }

    fn finish(
        &self,
        corrected: Raster<f64>,
        routing: FlowRouting,
        network: StreamNetwork,
    ) -> Result<PipelineOutput> {
        self.cancel.check()?;
        let pour_points = resolve_pour_points(&network);
        let catchments = delineate(&pour_points, &routing.direction, &self.cancel)?;

        info!(
            threshold = network.threshold,
            nodes = network.nodes.len(),
            edges = network.edges.len(),
            catchments = catchments.len(),
            "catchment pipeline finished"
        );

        let FlowRouting {
            direction,
            accumulation,
        } = routing;
        Ok(PipelineOutput {
            corrected,
            direction,
            accumulation,
            threshold: network.threshold,
            network,
            pour_points,
            catchments,
            bbox: self.params.bbox,
        })
    }
}

/// Correction only ever raises cells and never touches nodata.
fn check_monotone(original: &Raster<f64>, corrected: &Raster<f64>) -> Result<()> {
    original.ensure_same_shape(corrected)?;
    for ((row, col), &before) in original.data().indexed_iter() {
        let after = corrected.data()[(row, col)];
        let ok = if original.is_nodata(before) {
            corrected.is_nodata(after)
        } else {
            after >= before
        };
        if !ok {
            return Err(Error::RoutingInconsistency {
                row,
                col,
                reason: format!("corrected elevation {} is below original {}", after, before),
            });
        }
    }
    Ok(())
}

/// `acc(cell) == 1 + sum(acc(n))` over neighbours draining into the cell.
fn check_conservation(routing: &FlowRouting) -> Result<()> {
    let codes = routing.direction.data();
    let acc = routing.accumulation.data();
    let (rows, cols) = codes.dim();

    for ((row, col), &value) in acc.indexed_iter() {
        if routing.direction.is_nodata(codes[(row, col)]) {
            continue;
        }
        let inflow: u64 = d8_neighbors(row, col, rows, cols)
            .filter(|&(dir, r, c)| drains_into(codes[(r, c)], dir))
            .map(|(_, r, c)| acc[(r, c)] as u64)
            .sum();
        if value as u64 != inflow + 1 {
            return Err(Error::RoutingInconsistency {
                row,
                col,
                reason: format!("accumulation {} but inflow is {}", value, inflow),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::test_support::{corner_outlet_dem, dem_from, south_slope};
    use crate::hydrology::NodeKind;
    use cuenca_core::GridCell;

    fn params(threshold: u32) -> PipelineParams {
        PipelineParams {
            threshold,
            resolution: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let p = PipelineParams::default();
        assert_eq!(p.threshold, 1000);
        assert_eq!(p.resolution, 10.0);
        assert!(p.bbox.is_none());
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_params_from_json() {
        let p = PipelineParams::from_json(r#"{"threshold": 50, "bbox": [0, 0, 10, 10]}"#).unwrap();
        assert_eq!(p.threshold, 50);
        assert_eq!(p.resolution, 10.0);
        assert_eq!(p.bbox, Some([0.0, 0.0, 10.0, 10.0]));

        assert!(matches!(
            PipelineParams::from_json(r#"{"threshold": 0}"#),
            Err(Error::InvalidParameter { name: "threshold", .. })
        ));
        assert!(matches!(
            PipelineParams::from_json("not json"),
            Err(Error::InvalidParameter { name: "params", .. })
        ));
    }

    #[test]
    fn test_invalid_params_rejected_before_grid() {
        let all_nodata = dem_from(&[f64::NAN; 9], 3, 3);

        let bad_resolution = PipelineParams {
            resolution: -5.0,
            ..params(5)
        };
        assert!(matches!(
            Pipeline::new(bad_resolution).run(&all_nodata),
            Err(Error::InvalidParameter { name: "resolution", .. })
        ));

        let inverted = PipelineParams {
            bbox: Some([10.0, 0.0, 0.0, 10.0]),
            ..params(5)
        };
        assert!(matches!(
            Pipeline::new(inverted).run(&all_nodata),
            Err(Error::InvalidParameter { name: "bbox", .. })
        ));

        assert!(matches!(
            Pipeline::new(params(5)).run(&all_nodata),
            Err(Error::InvalidGrid(_))
        ));
    }

    #[test]
    fn test_corner_outlet_scenario() {
        let output = Pipeline::new(params(25)).run(&corner_outlet_dem()).unwrap();

        assert_eq!(output.corrected.get(0, 0).unwrap(), 0.0);
        assert_eq!(output.accumulation.get(0, 0).unwrap(), 25);
        assert_eq!(output.pour_points.len(), 1);
        assert_eq!(output.pour_points[0].cell, GridCell::new(0, 0));
        assert_eq!(output.pour_points[0].kind, NodeKind::Outlet);
        assert_eq!(output.catchments.catchments[0].cells.len(), 25);
    }

    #[test]
    fn test_bbox_carried_through() {
        let p = PipelineParams {
            bbox: Some([0.0, 0.0, 5.0, 5.0]),
            ..params(25)
        };
        let output = Pipeline::new(p).run(&corner_outlet_dem()).unwrap();
        assert_eq!(output.bbox, Some([0.0, 0.0, 5.0, 5.0]));
    }

    #[test]
    fn test_tuning_lowers_threshold() {
        let dem = south_slope(6, 6);
        let pipeline = Pipeline::new(params(100));

        assert!(pipeline.run(&dem).unwrap().network.is_empty());

        let output = pipeline.run_tuned(&dem, &ThresholdTuning::default()).unwrap();
        // 100 -> 50 -> 25 -> 12 -> 6: only the bottom row reaches 6
        assert_eq!(output.threshold, 6);
        assert_eq!(output.pour_points.len(), 6);
        assert!(output.pour_points.iter().all(|p| p.kind == NodeKind::Outlet));
    }

    #[test]
    fn test_tuning_gives_up_at_min_threshold() {
        let dem = south_slope(4, 4);
        let tuning = ThresholdTuning {
            factor: 2.0,
            min_threshold: 20,
        };
        let output = Pipeline::new(params(100)).run_tuned(&dem, &tuning).unwrap();
        assert!(output.network.is_empty());
        assert!(output.catchments.is_empty());
        assert_eq!(output.threshold, 25);

        let bad = ThresholdTuning {
            factor: 1.0,
            ..tuning
        };
        assert!(Pipeline::new(params(100)).run_tuned(&dem, &bad).is_err());
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let err = Pipeline::new(params(5))
            .with_cancellation(token)
            .run(&corner_outlet_dem())
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_conservation_check_catches_bad_accumulation() {
        let dem = south_slope(4, 4);
        let mut routing = route(&dem, &CancellationToken::new()).unwrap();
        assert!(check_conservation(&routing).is_ok());

        routing.accumulation.set(2, 2, 99).unwrap();
        assert!(matches!(
            check_conservation(&routing),
            Err(Error::RoutingInconsistency { row: 2, col: 2, .. })
        ));
    }

    #[test]
    fn test_monotone_check_catches_lowering() {
        let dem = south_slope(3, 3);
        let mut lowered = dem.clone();
        lowered.set(1, 1, 0.0).unwrap();
        assert!(check_monotone(&dem, &dem).is_ok());
        assert!(matches!(
            check_monotone(&dem, &lowered),
            Err(Error::RoutingInconsistency { row: 1, col: 1, .. })
        ));
    }
}
