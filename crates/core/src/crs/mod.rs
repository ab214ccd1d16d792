//! Coordinate reference metadata
//!
//! The engine works on a single planar grid and never reprojects. The CRS
//! travels with each raster only so that vector outputs can be tagged for
//! the writer that persists them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque coordinate reference tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CRS {
    /// EPSG authority code
    Epsg(u32),
    /// WKT or any other textual definition, carried verbatim
    Wkt(String),
}

impl CRS {
    pub fn from_epsg(code: u32) -> Self {
        CRS::Epsg(code)
    }

    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        CRS::Wkt(wkt.into())
    }

    /// EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        match self {
            CRS::Epsg(code) => Some(*code),
            CRS::Wkt(_) => None,
        }
    }

    /// Short identifier, e.g. `EPSG:32719`
    pub fn identifier(&self) -> String {
        match self {
            CRS::Epsg(code) => format!("EPSG:{}", code),
            // First 50 chars are enough to tell definitions apart in logs
            CRS::Wkt(wkt) => format!("WKT:{}", wkt.chars().take(50).collect::<String>()),
        }
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crs_epsg() {
        let crs = CRS::from_epsg(32719);
        assert_eq!(crs.epsg(), Some(32719));
        assert_eq!(crs.identifier(), "EPSG:32719");
    }

    #[test]
    fn test_crs_wkt_identifier_truncated() {
        let crs = CRS::from_wkt("X".repeat(200));
        assert_eq!(crs.epsg(), None);
        assert_eq!(crs.to_string().len(), "WKT:".len() + 50);
    }
}
