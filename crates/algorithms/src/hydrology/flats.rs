//! Flat resolution
//!
//! After filling, depressions become plateaus on which D8 finds no
//! downslope neighbour. Each plateau gets a small gradient built from two
//! breadth-first distance transforms: towards lower terrain (the cells it
//! spills into) and away from higher terrain. Their combination
//! `2 * d_low + (max_high - d_high)` guarantees every plateau cell a
//! strictly lower neighbour.
//!
//! Reference:
//! Barnes, R., Lehman, C., & Mulla, D. (2014). An efficient assignment of
//! drainage direction over flat surfaces in raster digital elevation models.
//! *Computers & Geosciences*, 62, 128–135.

use std::collections::VecDeque;

use ndarray::Array2;
use tracing::warn;
use cuenca_core::raster::d8_neighbors;
use cuenca_core::{CancellationToken, Result};

const UNSET: u32 = u32::MAX;

/// Per-plateau bookkeeping
#[derive(Debug, Clone)]
struct Flat {
    elevation: f64,
    /// Spills into an equal-elevation cell that has a lower neighbour
    drained: bool,
    /// Largest away-from-higher distance in the plateau (0 if no higher terrain)
    max_high: u32,
    max_mask: u32,
    /// Smallest rise from the plateau to any neighbouring higher cell
    gap: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FlatSummary {
    pub flats: usize,
    pub raised_cells: usize,
    /// Plateau cells left without a gradient (no spill and off the boundary)
    pub undrained: usize,
}

/// Raise plateau cells of `elev` so each has a strictly lower neighbour.
///
/// Plateaus that spill into lower terrain drain towards their spill cells.
/// Plateaus with no spill but touching the drainage boundary drain towards
/// their boundary cells, which stay unchanged and become outlets.
pub(crate) fn resolve_flats(
    elev: &mut Array2<f64>,
    valid: &Array2<bool>,
    boundary: &Array2<bool>,
    flat_increment: f64,
    cancel: &CancellationToken,
) -> Result<FlatSummary> {
    let (rows, cols) = elev.dim();

    let is_flat = Array2::from_shape_fn((rows, cols), |(r, c)| {
        valid[(r, c)]
            && !d8_neighbors(r, c, rows, cols)
                .any(|(_, nr, nc)| valid[(nr, nc)] && elev[(nr, nc)] < elev[(r, c)])
    });

    let (labels, mut flats) = label_flats(elev, valid, &is_flat, cancel)?;
    let mut summary = FlatSummary {
        flats: flats.len(),
        ..Default::default()
    };
    if flats.is_empty() {
        return Ok(summary);
    }

    // Towards lower: seeds are spill cells (low edges)...
    let mut d_low = Array2::<u32>::from_elem((rows, cols), UNSET);
    let mut queue = VecDeque::new();
    for row in 0..rows {
        for col in 0..cols {
            if !valid[(row, col)] || is_flat[(row, col)] {
                continue;
            }
            let z = elev[(row, col)];
            let mut is_low_edge = false;
            for (_, nr, nc) in d8_neighbors(row, col, rows, cols) {
                if is_flat[(nr, nc)] && elev[(nr, nc)] == z {
                    flats[labels[(nr, nc)] as usize - 1].drained = true;
                    is_low_edge = true;
                }
            }
            if is_low_edge {
                d_low[(row, col)] = 0;
                queue.push_back((row, col));
            }
        }
    }
    // ...or, for plateaus without a spill, their drainage boundary cells
    for row in 0..rows {
        for col in 0..cols {
            let label = labels[(row, col)];
            if label != 0 && boundary[(row, col)] && !flats[label as usize - 1].drained {
                d_low[(row, col)] = 0;
                queue.push_back((row, col));
            }
        }
    }
    spread(&mut d_low, queue, elev, &is_flat, cancel)?;

    // Away from higher: seeds are plateau cells bordering higher terrain
    let mut d_high = Array2::<u32>::from_elem((rows, cols), UNSET);
    let mut queue = VecDeque::new();
    for row in 0..rows {
        for col in 0..cols {
            if labels[(row, col)] == 0 {
                continue;
            }
            let z = elev[(row, col)];
            let borders_higher = d8_neighbors(row, col, rows, cols)
                .any(|(_, nr, nc)| valid[(nr, nc)] && elev[(nr, nc)] > z);
            if borders_higher {
                d_high[(row, col)] = 1;
                queue.push_back((row, col));
            }
        }
    }
    spread(&mut d_high, queue, elev, &is_flat, cancel)?;

    for ((row, col), &label) in labels.indexed_iter() {
        if label != 0 && d_high[(row, col)] != UNSET {
            let flat = &mut flats[label as usize - 1];
            flat.max_high = flat.max_high.max(d_high[(row, col)]);
        }
    }

    // Combine both transforms into an integer increment per cell
    let mut mask = Array2::<u32>::zeros((rows, cols));
    for ((row, col), &label) in labels.indexed_iter() {
        if label == 0 {
            continue;
        }
        let flat = &mut flats[label as usize - 1];
        match d_low[(row, col)] {
            UNSET => summary.undrained += 1,
            0 => {}
            low => {
                let away = match d_high[(row, col)] {
                    UNSET => 0,
                    high => flat.max_high - high,
                };
                let m = 2 * low + away;
                mask[(row, col)] = m;
                flat.max_mask = flat.max_mask.max(m);
            }
        }
    }

    for ((row, col), &label) in labels.indexed_iter() {
        let m = mask[(row, col)];
        if m == 0 {
            continue;
        }
        let flat = &flats[label as usize - 1];
        let eps = flat_epsilon(flat, flat_increment);
        elev[(row, col)] += eps * m as f64;
        summary.raised_cells += 1;
    }

    for flat in flats.iter().filter(|f| f.max_mask > 0) {
        let eps = flat_epsilon(flat, flat_increment);
        if flat.elevation + eps == flat.elevation {
            warn!(
                elevation = flat.elevation,
                eps, "flat increment below floating-point resolution; plateau may not drain"
            );
        }
    }
    if summary.undrained > 0 {
        warn!(cells = summary.undrained, "plateau cells without a drainage path");
    }

    Ok(summary)
}

/// Step size for one plateau, small enough that the highest raised cell
/// stays below the lowest neighbouring higher cell.
fn flat_epsilon(flat: &Flat, flat_increment: f64) -> f64 {
    if flat.gap.is_finite() {
        flat_increment.min(flat.gap / (flat.max_mask as f64 + 1.0))
    } else {
        flat_increment
    }
}

/// Label 8-connected, equal-elevation components of flat cells (1-based).
fn label_flats(
    elev: &Array2<f64>,
    valid: &Array2<bool>,
    is_flat: &Array2<bool>,
    cancel: &CancellationToken,
) -> Result<(Array2<u32>, Vec<Flat>)> {
    let (rows, cols) = elev.dim();
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut flats = Vec::new();
    let mut queue = VecDeque::new();

    for row in 0..rows {
        for col in 0..cols {
            if !is_flat[(row, col)] || labels[(row, col)] != 0 {
                continue;
            }

            let z = elev[(row, col)];
            let label = flats.len() as u32 + 1;
            let mut gap = f64::INFINITY;
            labels[(row, col)] = label;
            queue.push_back((row, col));

            while let Some((r, c)) = queue.pop_front() {
                cancel.check()?;
                for (_, nr, nc) in d8_neighbors(r, c, rows, cols) {
                    if !valid[(nr, nc)] {
                        continue;
                    }
                    let zn = elev[(nr, nc)];
                    if zn > z {
                        gap = gap.min(zn - z);
                    } else if zn == z && is_flat[(nr, nc)] && labels[(nr, nc)] == 0 {
                        labels[(nr, nc)] = label;
                        queue.push_back((nr, nc));
                    }
                }
            }

            flats.push(Flat {
                elevation: z,
                drained: false,
                max_high: 0,
                max_mask: 0,
                gap,
            });
        }
    }

    Ok((labels, flats))
}

/// Multi-source BFS over equal-elevation flat cells.
///
/// Seeds must already hold their starting distance in `dist`.
fn spread(
    dist: &mut Array2<u32>,
    mut queue: VecDeque<(usize, usize)>,
    elev: &Array2<f64>,
    is_flat: &Array2<bool>,
    cancel: &CancellationToken,
) -> Result<()> {
    let (rows, cols) = dist.dim();
    while let Some((row, col)) = queue.pop_front() {
        cancel.check()?;
        let z = elev[(row, col)];
        let next = dist[(row, col)] + 1;
        for (_, nr, nc) in d8_neighbors(row, col, rows, cols) {
            if is_flat[(nr, nc)] && dist[(nr, nc)] == UNSET && elev[(nr, nc)] == z {
                dist[(nr, nc)] = next;
                queue.push_back((nr, nc));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::drainage_boundary;
    use crate::hydrology::test_support::dem_from;

    fn resolve(values: &[f64], rows: usize, cols: usize) -> (Array2<f64>, FlatSummary) {
        let dem = dem_from(values, rows, cols);
        let valid = dem.valid_mask();
        let boundary = drainage_boundary(&valid);
        let mut elev = dem.data().clone();
        let summary =
            resolve_flats(&mut elev, &valid, &boundary, 1e-3, &CancellationToken::new()).unwrap();
        (elev, summary)
    }

    fn has_lower_neighbor(elev: &Array2<f64>, row: usize, col: usize) -> bool {
        let (rows, cols) = elev.dim();
        d8_neighbors(row, col, rows, cols).any(|(_, r, c)| elev[(r, c)] < elev[(row, col)])
    }

    #[test]
    fn test_plateau_drains_to_spill_cell() {
        // Interior plateau at 5 spilling through (4,2) at 5 next to a 1.0 edge cell
        #[rustfmt::skip]
        let values = [
            9.0, 9.0, 9.0, 9.0, 9.0,
            9.0, 5.0, 5.0, 5.0, 9.0,
            9.0, 5.0, 5.0, 5.0, 9.0,
            9.0, 5.0, 5.0, 5.0, 9.0,
            9.0, 9.0, 1.0, 9.0, 9.0,
        ];
        let (elev, summary) = resolve(&values, 5, 5);

        assert_eq!(summary.undrained, 0);
        for row in 1..4 {
            for col in 1..4 {
                assert!(has_lower_neighbor(&elev, row, col), "({}, {}) has no descent", row, col);
                assert!(elev[(row, col)] < 9.0, "plateau must stay below its rim");
            }
        }
        // Spill cells keep their elevation
        assert_eq!(elev[(3, 1)], 5.0);
        assert_eq!(elev[(3, 2)], 5.0);
        assert_eq!(elev[(3, 3)], 5.0);
    }

    #[test]
    fn test_away_from_higher_prefers_centre_of_valley() {
        // Long flat valley floor, spill at the east end
        #[rustfmt::skip]
        let values = [
            9.0, 9.0, 9.0, 9.0, 9.0, 9.0,
            9.0, 5.0, 5.0, 5.0, 5.0, 9.0,
            9.0, 5.0, 5.0, 5.0, 5.0, 4.0,
            9.0, 5.0, 5.0, 5.0, 5.0, 9.0,
            9.0, 9.0, 9.0, 9.0, 9.0, 9.0,
        ];
        let (elev, _) = resolve(&values, 5, 6);

        // Same distance to the spill, but row 2 is farther from the rim
        assert!(elev[(2, 2)] < elev[(1, 2)]);
        assert!(elev[(2, 2)] < elev[(3, 2)]);
    }

    #[test]
    fn test_tight_rim_shrinks_increment() {
        // Rim only 1e-6 above the plateau: raised cells must stay below it
        let rim = 5.000_001;
        #[rustfmt::skip]
        let values = [
            rim, rim, rim, rim, rim,
            rim, 5.0, 5.0, 5.0, rim,
            rim, 5.0, 5.0, 5.0, rim,
            rim, 5.0, 5.0, 5.0, rim,
            rim, rim, 4.0, rim, rim,
        ];
        let (elev, _) = resolve(&values, 5, 5);
        for row in 1..4 {
            for col in 1..4 {
                assert!(elev[(row, col)] < rim);
                assert!(elev[(row, col)] >= 5.0);
            }
        }
    }

    #[test]
    fn test_boundary_plateau_without_spill_drains_to_edge() {
        let (elev, summary) = resolve(&[3.0; 16], 4, 4);

        assert_eq!(summary.flats, 1);
        assert_eq!(summary.undrained, 0);
        // Edge cells stay put, interior cells rise and drain outwards
        assert_eq!(elev[(0, 0)], 3.0);
        assert!(elev[(1, 1)] > 3.0);
        assert!(has_lower_neighbor(&elev, 1, 1));
        assert!(has_lower_neighbor(&elev, 2, 2));
    }
}
