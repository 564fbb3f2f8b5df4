//! Connected components of the tile graph.

use std::collections::BTreeMap;

use crate::graph::{TileGraph, TileId};

/// Connected components, edges treated as undirected.
///
/// Each component lists its tiles in ascending tile-index order; components
/// are ordered by their smallest tile index.
pub fn connected_components(graph: &TileGraph) -> Vec<Vec<TileId>> {
    let mut order: Vec<TileId> = graph.tile_ids().collect();
    order.sort_by_key(|&id| graph.tile(id).index);

    let mut seen = vec![false; graph.len()];
    let mut components = Vec::new();

    for start in order {
        if seen[start.0] {
            continue;
        }
        seen[start.0] = true;
        let mut component = Vec::new();
        let mut stack = vec![start];

        while let Some(current) = stack.pop() {
            component.push(current);
            for neighbor in graph.neighbors(current) {
                if !seen[neighbor.0] {
                    seen[neighbor.0] = true;
                    stack.push(neighbor);
                }
            }
        }

        component.sort_by_key(|&id| graph.tile(id).index);
        components.push(component);
    }

    components
}

/// Component size → number of components of that size.
pub fn size_histogram(components: &[Vec<TileId>]) -> BTreeMap<usize, usize> {
    let mut histogram = BTreeMap::new();
    for component in components {
        *histogram.entry(component.len()).or_insert(0) += 1;
    }
    histogram
}

/// The largest component. Among equally large components the one holding
/// the smallest tile index wins.
pub fn largest_component(components: &[Vec<TileId>]) -> Option<&[TileId]> {
    let mut best: Option<&Vec<TileId>> = None;
    for component in components {
        if best.is_none_or(|b| component.len() > b.len()) {
            best = Some(component);
        }
    }
    best.map(Vec::as_slice)
}
