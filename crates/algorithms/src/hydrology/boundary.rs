//! Cell-edge contour walk from a set of cells to polygons
//!
//! Boundary edges are emitted with the interior on their right and linked
//! into rings in vertex space (x = col, y = row, y pointing down). Where two
//! cells only touch at a corner the walk turns right, so parts are
//! 4-connected and diagonal neighbours become separate polygons.

use std::collections::{HashMap, VecDeque};

use geo::orient::{Direction, Orient};
use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use ndarray::Array2;
use cuenca_core::raster::{GeoTransform, GridCell};

type Vertex = (i64, i64);

#[derive(Debug, Clone, Copy)]
struct Edge {
    start: Vertex,
    dir: Vertex,
}

impl Edge {
    fn end(&self) -> Vertex {
        (self.start.0 + self.dir.0, self.start.1 + self.dir.1)
    }

    /// Local (row, col) of the cell on the right of this edge
    fn right_cell(&self) -> (usize, usize) {
        let (x, y) = self.start;
        let (dx, dy) = self.dir;
        let col = (2 * x + dx - dy).div_euclid(2);
        let row = (2 * y + dy + dx).div_euclid(2);
        (row as usize, col as usize)
    }
}

/// Trace the outline of `cells` as map-space polygons.
///
/// Each 4-connected part yields one polygon with its holes. Exteriors are
/// counter-clockwise and holes clockwise in map coordinates. An empty cell
/// list yields an empty `MultiPolygon`.
pub fn trace_boundary(cells: &[GridCell], transform: &GeoTransform) -> MultiPolygon<f64> {
    if cells.is_empty() {
        return MultiPolygon::new(Vec::new());
    }

    let min_row = cells.iter().map(|c| c.row).min().unwrap_or(0);
    let max_row = cells.iter().map(|c| c.row).max().unwrap_or(0);
    let min_col = cells.iter().map(|c| c.col).min().unwrap_or(0);
    let max_col = cells.iter().map(|c| c.col).max().unwrap_or(0);

    let (h, w) = (max_row - min_row + 1, max_col - min_col + 1);
    let mut mask = Array2::from_elem((h, w), false);
    for c in cells {
        mask[(c.row - min_row, c.col - min_col)] = true;
    }

    let (parts, n_parts) = label_parts(&mask);
    let edges = boundary_edges(&mask);

    let mut rings: Vec<Vec<(Vec<Vertex>, i64)>> = vec![Vec::new(); n_parts];
    for ring in link_rings(&edges) {
        let (row, col) = edges[ring[0]].right_cell();
        let part = parts[(row, col)];
        let vertices = simplify_ring(&ring, &edges);
        let area2 = signed_area2(&vertices);
        rings[part].push((vertices, area2));
    }

    let to_map = |(x, y): Vertex| {
        let (gx, gy) =
            transform.pixel_to_geo_corner(x as usize + min_col, y as usize + min_row);
        Coord { x: gx, y: gy }
    };
    let to_line = |vertices: &[Vertex]| {
        let mut coords: Vec<Coord<f64>> = vertices.iter().map(|&v| to_map(v)).collect();
        coords.push(to_map(vertices[0]));
        LineString::new(coords)
    };

    let mut polygons = Vec::with_capacity(n_parts);
    for mut part_rings in rings {
        // Positive area in vertex space means interior on the right, i.e. an exterior
        part_rings.sort_by(|a, b| b.1.cmp(&a.1));
        let mut iter = part_rings.into_iter();
        let Some((exterior, area2)) = iter.next() else {
            continue;
        };
        if area2 <= 0 {
            continue;
        }
        let mut holes = Vec::new();
        for (vertices, area2) in iter {
            if area2 < 0 {
                holes.push(to_line(&vertices));
            } else {
                polygons.push(Polygon::new(to_line(&vertices), Vec::new()));
            }
        }
        polygons.push(Polygon::new(to_line(&exterior), holes));
    }

    MultiPolygon::new(polygons).orient(Direction::Default)
}

/// 4-connected component id per cell, in row-major order of first cell
fn label_parts(mask: &Array2<bool>) -> (Array2<usize>, usize) {
    let (h, w) = mask.dim();
    let mut labels = Array2::from_elem((h, w), usize::MAX);
    let mut queue = VecDeque::new();
    let mut next = 0;

    for ((row, col), &inside) in mask.indexed_iter() {
        if !inside || labels[(row, col)] != usize::MAX {
            continue;
        }
        labels[(row, col)] = next;
        queue.push_back((row, col));
        while let Some((r, c)) = queue.pop_front() {
            let neighbors = [
                (r.wrapping_sub(1), c),
                (r + 1, c),
                (r, c.wrapping_sub(1)),
                (r, c + 1),
            ];
            for (nr, nc) in neighbors {
                if nr < h && nc < w && mask[(nr, nc)] && labels[(nr, nc)] == usize::MAX {
                    labels[(nr, nc)] = next;
                    queue.push_back((nr, nc));
                }
            }
        }
        next += 1;
    }

    (labels, next)
}

fn boundary_edges(mask: &Array2<bool>) -> Vec<Edge> {
    let (h, w) = mask.dim();
    let outside = |r: isize, c: isize| {
        r < 0 || c < 0 || r >= h as isize || c >= w as isize || !mask[(r as usize, c as usize)]
    };

    let mut edges = Vec::new();
    for ((row, col), &inside) in mask.indexed_iter() {
        if !inside {
            continue;
        }
        let (r, c) = (row as isize, col as isize);
        let (x, y) = (col as i64, row as i64);
        if outside(r - 1, c) {
            edges.push(Edge { start: (x, y), dir: (1, 0) });
        }
        if outside(r, c + 1) {
            edges.push(Edge { start: (x + 1, y), dir: (0, 1) });
        }
        if outside(r + 1, c) {
            edges.push(Edge { start: (x + 1, y + 1), dir: (-1, 0) });
        }
        if outside(r, c - 1) {
            edges.push(Edge { start: (x, y + 1), dir: (0, -1) });
        }
    }
    edges
}

/// Link edges into closed rings, turning right, then straight, then left.
fn link_rings(edges: &[Edge]) -> Vec<Vec<usize>> {
    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::new();
    for (i, e) in edges.iter().enumerate() {
        outgoing.entry(e.start).or_default().push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for first in 0..edges.len() {
        if used[first] {
            continue;
        }
        let mut ring = vec![first];
        used[first] = true;
        let mut current = first;

        loop {
            let (dx, dy) = edges[current].dir;
            let preferences = [(-dy, dx), (dx, dy), (dy, -dx)];
            let candidates = outgoing
                .get(&edges[current].end())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let next = preferences.iter().find_map(|&dir| {
                candidates.iter().copied().find(|&e| edges[e].dir == dir)
            });

            match next {
                Some(e) if e == first => break,
                Some(e) if !used[e] => {
                    used[e] = true;
                    ring.push(e);
                    current = e;
                }
                _ => break,
            }
        }
        rings.push(ring);
    }

    rings
}

/// Ring vertices with collinear interior points removed
fn simplify_ring(ring: &[usize], edges: &[Edge]) -> Vec<Vertex> {
    let n = ring.len();
    (0..n)
        .filter(|&i| {
            let prev = edges[ring[(i + n - 1) % n]].dir;
            edges[ring[i]].dir != prev
        })
        .map(|i| edges[ring[i]].start)
        .collect()
}

/// Twice the shoelace area in vertex space
fn signed_area2(vertices: &[Vertex]) -> i64 {
    let n = vertices.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = vertices[i];
            let (x1, y1) = vertices[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum()
}
