//! # Cuenca Core
//!
//! Core types for the Cuenca hydrologic terrain-analysis engine.
//!
//! This crate provides:
//! - `Raster<T>`: generic georeferenced grid with a nodata sentinel
//! - `GeoTransform`: cell geometry (origin and resolution)
//! - `CRS`: opaque coordinate reference tag
//! - D8 `Direction` / `FlowCell` encoding of flow-direction rasters
//! - `CancellationToken` for aborting long runs
//! - Vector `Feature`s for handing results to external writers
//! - The `Algorithm` trait implemented by every pipeline stage

pub mod cancel;
pub mod crs;
pub mod error;
pub mod raster;
pub mod vector;

pub use cancel::CancellationToken;
pub use crs::CRS;
pub use error::{Error, Result};
pub use raster::{Direction, FlowCell, GeoTransform, GridCell, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cancel::CancellationToken;
    pub use crate::crs::CRS;
    pub use crate::error::{Error, Result};
    pub use crate::raster::{Direction, FlowCell, GeoTransform, GridCell, Raster, RasterElement};
    pub use crate::Algorithm;
}

/// Core trait for all algorithms in Cuenca.
///
/// Algorithms are pure functions that transform input data according to parameters.
pub trait Algorithm {
    /// Input type for the algorithm
    type Input;
    /// Output type for the algorithm
    type Output;
    /// Parameters controlling algorithm behavior
    type Params: Default;
    /// Error type for algorithm execution
    type Error: std::error::Error;

    /// Returns the algorithm name
    fn name(&self) -> &'static str;

    /// Returns a description of what the algorithm does
    fn description(&self) -> &'static str;

    /// Execute the algorithm
    fn execute(&self, input: Self::Input, params: Self::Params) -> std::result::Result<Self::Output, Self::Error>;

    /// Execute with default parameters
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
