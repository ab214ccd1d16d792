//! Raster data structures and the D8 neighbourhood

mod element;
mod geotransform;
mod grid;
mod neighborhood;

pub use element::RasterElement;
pub use geotransform::GeoTransform;
pub use grid::{GridCell, Raster};
pub use neighborhood::{d8_neighbors, Direction, FlowCell, FLOW_NODATA, FLOW_OUTLET};
