//! # Cuenca Algorithms
//!
//! Hydrologic terrain analysis on a DEM:
//!
//! - **Terrain correction**: Priority-Flood sink filling plus flat resolution
//! - **Flow routing**: D8 flow direction and topological flow accumulation
//! - **Stream extraction**: thresholded stream network with Strahler order
//! - **Pour points**: sources, junctions and outlets of the network
//! - **Catchments**: nested, non-overlapping sub-catchments with polygon boundaries
//! - **Pipeline**: sequences the stages and validates their invariants

pub mod hydrology;
pub(crate) mod maybe_rayon;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::hydrology::{
        correct_terrain, delineate, extract_streams, flow_accumulation, flow_direction,
        resolve_pour_points, route, Catchment, CatchmentSet, FlowRouting, NodeKind, Pipeline,
        PipelineOutput, PipelineParams, PourPoint, StreamNetwork, TerrainCorrectionParams,
    };
    pub use cuenca_core::prelude::*;
}
