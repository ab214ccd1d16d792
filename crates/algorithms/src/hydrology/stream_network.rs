//! Stream network extraction
//!
//! Thresholds a flow accumulation raster into stream cells and vectorizes
//! them into a directed network: nodes at sources, junctions and outlets,
//! edges as cell polylines following flow direction between two nodes.

use std::collections::HashMap;

use geo_types::{Coord, LineString};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use cuenca_core::raster::{GeoTransform, GridCell, Raster};
use cuenca_core::vector::{Feature, FeatureCollection};
use cuenca_core::{Error, Result, CRS};

use super::flow_direction::downstream;

/// Role of a network node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Stream cell with no upstream stream neighbour
    Source,
    /// Stream cell fed by two or more stream neighbours
    Junction,
    /// Stream cell with no downstream stream cell
    Outlet,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Source => "source",
            NodeKind::Junction => "junction",
            NodeKind::Outlet => "outlet",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamNode {
    pub cell: GridCell,
    pub kind: NodeKind,
    pub accumulation: u32,
}

/// A reach between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEdge {
    /// Index of the upstream node
    pub from: usize,
    /// Index of the downstream node
    pub to: usize,
    /// Cells from `from` to `to`, both included
    pub cells: Vec<GridCell>,
    /// Strahler order
    pub order: u32,
}

impl StreamEdge {
    /// Length along cell centres, in map units
    pub fn length(&self, cell_size: f64) -> f64 {
        self.cells
            .windows(2)
            .map(|pair| {
                let diagonal = pair[0].row != pair[1].row && pair[0].col != pair[1].col;
                if diagonal {
                    cell_size * std::f64::consts::SQRT_2
                } else {
                    cell_size
                }
            })
            .sum()
    }
}

/// Directed, acyclic stream network. One outlet per connected tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamNetwork {
    /// Nodes in row-major order of their cells
    pub nodes: Vec<StreamNode>,
    /// Edges in the order their upstream nodes appear in `nodes`
    pub edges: Vec<StreamEdge>,
    pub threshold: u32,
    pub transform: GeoTransform,
    pub crs: Option<CRS>,
}

impl StreamNetwork {
    /// No cell reached the threshold
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn outlets(&self) -> impl Iterator<Item = &StreamNode> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Outlet)
    }

    pub fn node_at(&self, cell: GridCell) -> Option<&StreamNode> {
        self.nodes.iter().find(|n| n.cell == cell)
    }

    /// Edges as `LineString` features through cell centres.
    pub fn to_features(&self) -> FeatureCollection {
        let cell_size = self.transform.cell_size();
        let mut collection = FeatureCollection::new(self.crs.clone());

        for (i, edge) in self.edges.iter().enumerate() {
            let line: LineString<f64> = edge
                .cells
                .iter()
                .map(|c| {
                    let (x, y) = self.transform.pixel_to_geo(c.col, c.row);
                    Coord { x, y }
                })
                .collect();
            let from = &self.nodes[edge.from];
            let to = &self.nodes[edge.to];

            collection.push(
                Feature::new(line)
                    .with_id(format!("reach-{}", i + 1))
                    .with_property("from_kind", from.kind.as_str())
                    .with_property("to_kind", to.kind.as_str())
                    .with_property("order", edge.order)
                    .with_property("length", edge.length(cell_size))
                    .with_property("accumulation", to.accumulation),
            );
        }

        collection
    }
}

/// Binary stream mask: 1 where accumulation >= threshold, 0 elsewhere.
pub fn stream_mask(flow_acc: &Raster<u32>, threshold: u32) -> Result<Raster<u8>> {
    check_threshold(threshold)?;
    let mask = flow_acc.data().mapv(|acc| u8::from(acc >= threshold));
    flow_acc.with_data(mask)
}

fn check_threshold(threshold: u32) -> Result<()> {
    if threshold == 0 {
        return Err(Error::invalid_parameter(
            "threshold",
            threshold,
            "stream threshold must be a positive cell count",
        ));
    }
    Ok(())
}

/// Extract the stream network from accumulation and direction rasters.
///
/// Cells with `accumulation >= threshold` are stream cells. A stream cell
/// becomes a node when it has no downstream stream cell (outlet), two or
/// more upstream stream neighbours (junction), or none (source), in that
/// order of precedence. Nodes are created in ascending (row, col) order and
/// edges are traced from them in the same order, so output is reproducible.
///
/// # Errors
/// - [`Error::InvalidParameter`] if `threshold == 0`
/// - [`Error::SizeMismatch`] if the rasters differ in shape
/// - [`Error::RoutingInconsistency`] if a trace does not terminate
pub fn extract_streams(
    flow_acc: &Raster<u32>,
    flow_dir: &Raster<u8>,
    threshold: u32,
) -> Result<StreamNetwork> {
    check_threshold(threshold)?;
    flow_acc.ensure_same_shape(flow_dir)?;

    let (rows, cols) = flow_acc.shape();
    let acc = flow_acc.data();
    let codes = flow_dir.data();
    let is_stream = acc.mapv(|a| a >= threshold);

    let stream_downstream = |row: usize, col: usize| -> Option<(usize, usize)> {
        downstream(codes, row, col).filter(|&(r, c)| is_stream[(r, c)])
    };

    let mut upstream_count = Array2::<u8>::zeros((rows, cols));
    for ((row, col), &stream) in is_stream.indexed_iter() {
        if stream {
            if let Some((r, c)) = stream_downstream(row, col) {
                upstream_count[(r, c)] += 1;
            }
        }
    }

    let mut nodes = Vec::new();
    let mut node_index: HashMap<usize, usize> = HashMap::new();
    for ((row, col), &stream) in is_stream.indexed_iter() {
        if !stream {
            continue;
        }
        let kind = if stream_downstream(row, col).is_none() {
            NodeKind::Outlet
        } else if upstream_count[(row, col)] >= 2 {
            NodeKind::Junction
        } else if upstream_count[(row, col)] == 0 {
            NodeKind::Source
        } else {
            continue;
        };
        node_index.insert(row * cols + col, nodes.len());
        nodes.push(StreamNode {
            cell: GridCell::new(row, col),
            kind,
            accumulation: acc[(row, col)],
        });
    }

    let mut edges = Vec::new();
    for (from, node) in nodes.iter().enumerate() {
        if node.kind == NodeKind::Outlet {
            continue;
        }
        let mut cells = vec![node.cell];
        let (mut row, mut col) = (node.cell.row, node.cell.col);
        let to = loop {
            let Some((r, c)) = stream_downstream(row, col) else {
                return Err(Error::RoutingInconsistency {
                    row,
                    col,
                    reason: "stream cell without a downstream node".into(),
                });
            };
            cells.push(GridCell::new(r, c));
            if let Some(&to) = node_index.get(&(r * cols + c)) {
                break to;
            }
            if cells.len() > rows * cols {
                return Err(Error::RoutingInconsistency {
                    row: node.cell.row,
                    col: node.cell.col,
                    reason: "stream trace does not terminate".into(),
                });
            }
            (row, col) = (r, c);
        };
        edges.push(StreamEdge {
            from,
            to,
            cells,
            order: 0,
        });
    }

    assign_strahler_order(&nodes, &mut edges);

    Ok(StreamNetwork {
        nodes,
        edges,
        threshold,
        transform: *flow_acc.transform(),
        crs: flow_acc.crs().cloned(),
    })
}

/// Strahler order: edges leaving a source are order 1; an edge leaving a
/// junction takes the highest incoming order, plus one when two or more
/// incoming edges share it.
fn assign_strahler_order(nodes: &[StreamNode], edges: &mut [StreamEdge]) {
    // Accumulation strictly grows downstream, so this is a topological order
    let mut by_upstream: Vec<usize> = (0..edges.len()).collect();
    by_upstream.sort_by_key(|&e| {
        let node = &nodes[edges[e].from];
        (node.accumulation, node.cell)
    });

    let mut incoming: Vec<Vec<u32>> = vec![Vec::new(); nodes.len()];
    for e in by_upstream {
        let from = edges[e].from;
        let order = match incoming[from].iter().max() {
            None => 1,
            Some(&max) => {
                let ties = incoming[from].iter().filter(|&&o| o == max).count();
                if ties >= 2 {
                    max + 1
                } else {
                    max
                }
            }
        };
        edges[e].order = order;
        incoming[edges[e].to].push(order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::test_support::{south_slope, y_confluence};
    use crate::hydrology::{flow_accumulation, flow_direction};

    #[test]
    fn test_stream_mask_threshold() {
        let fdir = flow_direction(&south_slope(10, 10)).unwrap();
        let facc = flow_accumulation(&fdir).unwrap();
        let streams = stream_mask(&facc, 5).unwrap();

        // Row r holds accumulation r + 1
        for col in 0..10 {
            assert_eq!(streams.get(3, col).unwrap(), 0);
            assert_eq!(streams.get(4, col).unwrap(), 1);
            assert_eq!(streams.get(9, col).unwrap(), 1);
        }
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let fdir = flow_direction(&south_slope(5, 5)).unwrap();
        let facc = flow_accumulation(&fdir).unwrap();

        let err = extract_streams(&facc, &fdir, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name: "threshold", .. }));
        assert!(stream_mask(&facc, 0).is_err());
    }

    #[test]
    fn test_parallel_channels_on_plane() {
        let fdir = flow_direction(&south_slope(10, 4)).unwrap();
        let facc = flow_accumulation(&fdir).unwrap();
        let network = extract_streams(&facc, &fdir, 5).unwrap();

        assert_eq!(network.nodes.len(), 8);
        assert_eq!(network.outlets().count(), 4);
        assert_eq!(network.edges.len(), 4);
        for edge in &network.edges {
            assert_eq!(edge.cells.len(), 6);
            assert_eq!(edge.order, 1);
            assert_eq!(network.nodes[edge.from].kind, NodeKind::Source);
            assert_eq!(network.nodes[edge.to].kind, NodeKind::Outlet);
        }
        // Nodes come out in row-major order
        assert_eq!(network.nodes[0].cell, GridCell::new(4, 0));
        assert_eq!(network.nodes[4].cell, GridCell::new(9, 0));
    }

    #[test]
    fn test_confluence_builds_junction() {
        let fdir = y_confluence();
        let facc = flow_accumulation(&fdir).unwrap();
        let network = extract_streams(&facc, &fdir, 2).unwrap();

        let kinds: Vec<NodeKind> = network.nodes.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::Source,
                NodeKind::Source,
                NodeKind::Source,
                NodeKind::Junction,
                NodeKind::Outlet
            ]
        );
        assert_eq!(network.node_at(GridCell::new(2, 1)).unwrap().accumulation, 9);

        assert_eq!(network.edges.len(), 4);
        let trunk = network.edges.iter().find(|e| e.from == 3).unwrap();
        assert_eq!(trunk.to, 4);
        assert_eq!(trunk.cells, vec![GridCell::new(2, 1), GridCell::new(3, 1)]);
        assert_eq!(trunk.order, 2);
    }

    #[test]
    fn test_high_threshold_yields_empty_network() {
        let fdir = flow_direction(&south_slope(5, 5)).unwrap();
        let facc = flow_accumulation(&fdir).unwrap();
        let network = extract_streams(&facc, &fdir, 1000).unwrap();
        assert!(network.is_empty());
        assert!(network.edges.is_empty());
    }

    #[test]
    fn test_features_carry_length_and_order() {
        let fdir = y_confluence();
        let facc = flow_accumulation(&fdir).unwrap();
        let network = extract_streams(&facc, &fdir, 2).unwrap();
        let features = network.to_features();

        assert_eq!(features.len(), 4);
        let first = &features.features[0];
        // (1,0) -> (2,1) is one diagonal step of 10 m cells
        match first.get_property("length") {
            Some(cuenca_core::vector::AttributeValue::Float(len)) => {
                approx::assert_relative_eq!(*len, 10.0 * std::f64::consts::SQRT_2)
            }
            other => panic!("unexpected length {:?}", other),
        }
        assert_eq!(
            first.get_property("to_kind"),
            Some(&cuenca_core::vector::AttributeValue::String("junction".into()))
        );
    }
}
