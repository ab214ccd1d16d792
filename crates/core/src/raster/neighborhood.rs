//! D8 neighbourhood and flow-direction encoding
//!
//! Flow direction codes stored in a `Raster<u8>`:
//! ```text
//!   4  3  2
//!   5  0  1
//!   6  7  8
//! ```
//! `0` marks an outlet (flow leaves the grid), `255` marks nodata.

use serde::{Deserialize, Serialize};
use std::f64::consts::SQRT_2;

/// Code of a cell whose flow leaves the grid
pub const FLOW_OUTLET: u8 = 0;
/// Code of a cell that takes no part in routing
pub const FLOW_NODATA: u8 = u8::MAX;

/// One of the eight D8 compass directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    East = 1,
    NorthEast = 2,
    North = 3,
    NorthWest = 4,
    West = 5,
    SouthWest = 6,
    South = 7,
    SouthEast = 8,
}

impl Direction {
    /// All directions in code order (1..=8)
    pub const ALL: [Direction; 8] = [
        Direction::East,
        Direction::NorthEast,
        Direction::North,
        Direction::NorthWest,
        Direction::West,
        Direction::SouthWest,
        Direction::South,
        Direction::SouthEast,
    ];

    /// Tie-break priority for steepest descent: clockwise from East
    pub const CLOCKWISE_FROM_EAST: [Direction; 8] = [
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
        Direction::North,
        Direction::NorthEast,
    ];

    /// (row_offset, col_offset)
    pub const fn offset(self) -> (isize, isize) {
        match self {
            Direction::East => (0, 1),
            Direction::NorthEast => (-1, 1),
            Direction::North => (-1, 0),
            Direction::NorthWest => (-1, -1),
            Direction::West => (0, -1),
            Direction::SouthWest => (1, -1),
            Direction::South => (1, 0),
            Direction::SouthEast => (1, 1),
        }
    }

    /// 1 for cardinal directions, sqrt(2) for diagonals
    pub fn distance_factor(self) -> f64 {
        if self.is_diagonal() {
            SQRT_2
        } else {
            1.0
        }
    }

    pub fn is_diagonal(self) -> bool {
        let (dr, dc) = self.offset();
        dr != 0 && dc != 0
    }

    pub fn opposite(self) -> Direction {
        Direction::ALL[(self.code() as usize - 1 + 4) % 8]
    }

    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Direction> {
        match code {
            1..=8 => Some(Direction::ALL[code as usize - 1]),
            _ => None,
        }
    }

    /// Neighbour of (row, col) in this direction, if it lies inside a
    /// `rows x cols` grid.
    #[inline]
    pub fn step(self, row: usize, col: usize, rows: usize, cols: usize) -> Option<(usize, usize)> {
        let (dr, dc) = self.offset();
        let nr = row as isize + dr;
        let nc = col as isize + dc;
        if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
            None
        } else {
            Some((nr as usize, nc as usize))
        }
    }
}

/// Typed view of a flow-direction code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowCell {
    Toward(Direction),
    Outlet,
    NoData,
}

impl FlowCell {
    /// Decode a stored flow code. Unknown codes read as nodata.
    pub fn from_code(code: u8) -> FlowCell {
        match code {
            FLOW_OUTLET => FlowCell::Outlet,
            c => Direction::from_code(c).map_or(FlowCell::NoData, FlowCell::Toward),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            FlowCell::Toward(dir) => dir.code(),
            FlowCell::Outlet => FLOW_OUTLET,
            FlowCell::NoData => FLOW_NODATA,
        }
    }

    pub fn direction(self) -> Option<Direction> {
        match self {
            FlowCell::Toward(dir) => Some(dir),
            _ => None,
        }
    }
}

/// In-bounds D8 neighbours of (row, col), paired with the direction that
/// leads from the centre to them. Yields in code order.
pub fn d8_neighbors(
    row: usize,
    col: usize,
    rows: usize,
    cols: usize,
) -> impl Iterator<Item = (Direction, usize, usize)> {
    Direction::ALL
        .into_iter()
        .filter_map(move |dir| dir.step(row, col, rows, cols).map(|(r, c)| (dir, r, c)))
}
