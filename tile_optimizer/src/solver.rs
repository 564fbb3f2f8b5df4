//! Iterative least-squares solver over a connected set of tiles.
//!
//! Every iteration refits each free tile to its correspondences (own local
//! points → neighbours' current world points) and moves the tile's own world
//! points towards the new model by the damping factor. One anchor tile stays
//! fixed to remove the global gauge freedom.

use std::collections::VecDeque;

use serde::Serialize;

use crate::error::{OptimizerError, Result};
use crate::graph::{TileGraph, TileId};

/// Change of the mean error over a plateau window below which the solver
/// considers itself converged.
const PLATEAU_SLOPE_EPS: f64 = 1e-4;

/// Parameters of one refinement run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineParams {
    pub max_iterations: usize,
    /// Minimum number of iterations before convergence is checked, and the
    /// widest window the plateau check looks at.
    pub max_plateau_width: usize,
    /// Mean error above which the solver keeps iterating regardless of the
    /// plateau.
    pub max_allowed_error: f64,
    pub damping: f64,
}

impl RefineParams {
    /// Always runs the whole iteration budget.
    pub fn fixed_budget(iterations: usize, damping: f64) -> Self {
        Self {
            max_iterations: iterations,
            max_plateau_width: iterations,
            max_allowed_error: 0.0,
            damping,
        }
    }
}

/// History of the mean point-match error, one entry per iteration.
#[derive(Debug, Clone, Default)]
pub struct ErrorStatistic {
    values: Vec<f64>,
    min: f64,
    max: f64,
}

impl ErrorStatistic {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.values.push(value);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Average change per iteration over the last `width` iterations.
    pub fn wide_slope(&self, width: usize) -> f64 {
        let n = self.values.len();
        if width == 0 || n <= width {
            return f64::INFINITY;
        }
        (self.values[n - 1] - self.values[n - 1 - width]) / width as f64
    }
}

/// Residual distances of the final configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Residuals {
    /// Mean distance over all point matches.
    pub avg: f64,
    /// Largest distance over all point matches.
    pub max: f64,
    /// Per tile (same order as the solved tiles): weighted mean and maximum
    /// distance of its incident point matches.
    pub per_tile: Vec<(f64, f64)>,
}

/// A connected set of tiles of a [`TileGraph`] being solved together.
pub struct TileConfiguration<'g> {
    graph: &'g mut TileGraph,
    tiles: Vec<TileId>,
    member: Vec<bool>,
    anchor: TileId,
}

impl<'g> TileConfiguration<'g> {
    /// Solve `tiles` (non-empty) with the lowest-index tile as anchor.
    pub fn new(graph: &'g mut TileGraph, tiles: &[TileId]) -> Self {
        assert!(!tiles.is_empty(), "tile configuration needs at least one tile");
        let mut member = vec![false; graph.len()];
        for &id in tiles {
            member[id.0] = true;
        }
        let anchor = *tiles
            .iter()
            .min_by_key(|&&id| graph.tile(id).index)
            .unwrap_or(&tiles[0]);

        Self {
            graph,
            tiles: tiles.to_vec(),
            member,
            anchor,
        }
    }

    pub fn anchor(&self) -> TileId {
        self.anchor
    }

    pub fn tiles(&self) -> &[TileId] {
        &self.tiles
    }

    pub fn graph(&self) -> &TileGraph {
        self.graph
    }

    pub fn graph_mut(&mut self) -> &mut TileGraph {
        self.graph
    }

    /// Bring every world point in line with its tile's current model.
    pub fn apply(&mut self) {
        for &id in &self.tiles {
            self.graph.apply_model(id, 1.0);
        }
    }

    /// Breadth-first initial placement from the anchor: each newly reached
    /// tile is fitted against its already placed neighbours only. A tile with
    /// too few correspondences to placed tiles waits until another placed
    /// neighbour reaches it; tiles never placed keep their current model.
    pub fn prealign(&mut self) -> Result<()> {
        let mut aligned = vec![false; self.graph.len()];
        aligned[self.anchor.0] = true;
        self.graph.apply_model(self.anchor, 1.0);

        let mut queue = VecDeque::from([self.anchor]);
        let mut placed = 1;
        while let Some(current) = queue.pop_front() {
            let neighbors: Vec<TileId> = self.graph.neighbors(current).collect();
            for neighbor in neighbors {
                if !self.member[neighbor.0] || aligned[neighbor.0] {
                    continue;
                }
                let correspondences = self
                    .graph
                    .correspondences(neighbor, |other| aligned[other.0]);
                let tile = self.graph.tile_mut(neighbor);
                if correspondences.len() < tile.model.min_matches() {
                    continue;
                }
                let index = tile.index;
                tile.model
                    .fit(&correspondences)
                    .map_err(|err| OptimizerError::from_fit(index, err))?;
                self.graph.apply_model(neighbor, 1.0);

                aligned[neighbor.0] = true;
                placed += 1;
                queue.push_back(neighbor);
            }
        }

        tracing::debug!(
            anchor = self.graph.tile(self.anchor).index,
            placed,
            "Prealignment finished"
        );
        Ok(())
    }

    /// Damped iterative refinement of all free tiles.
    pub fn optimize(&mut self, params: RefineParams) -> Result<ErrorStatistic> {
        assert!(
            params.damping > 0.0 && params.damping <= 1.0,
            "damping must be in (0, 1], got {}",
            params.damping
        );
        let mut observer = ErrorStatistic::with_capacity(params.max_iterations);
        self.apply();

        let mut i = 0;
        let mut proceed = i < params.max_iterations;
        while proceed {
            for k in 0..self.tiles.len() {
                let id = self.tiles[k];
                if id == self.anchor {
                    continue;
                }
                let member = &self.member;
                let correspondences = self.graph.correspondences(id, |other| member[other.0]);
                let tile = self.graph.tile_mut(id);
                let index = tile.index;
                tile.model
                    .fit(&correspondences)
                    .map_err(|err| OptimizerError::from_fit(index, err))?;
                self.graph.apply_model(id, params.damping);
            }

            let error = self.mean_error();
            observer.push(error);

            if i > params.max_plateau_width {
                proceed = error > params.max_allowed_error;
                let mut width = params.max_plateau_width;
                while !proceed && width >= 1 {
                    proceed |= observer.wide_slope(width).abs() > PLATEAU_SLOPE_EPS;
                    width /= 2;
                }
            }

            i += 1;
            proceed &= i < params.max_iterations;
        }

        tracing::debug!(
            iterations = observer.len(),
            damping = params.damping,
            error = observer.last().unwrap_or(0.0),
            min_error = observer.min(),
            "Refinement finished"
        );
        Ok(observer)
    }

    /// Point matches whose both endpoints are in the configuration, each
    /// counted once.
    fn member_matches(&self) -> impl Iterator<Item = &crate::graph::EdgeMatch> + '_ {
        self.graph
            .edges()
            .iter()
            .filter(move |edge| self.member[edge.tiles.0.0] && self.member[edge.tiles.1.0])
            .flat_map(|edge| edge.matches.iter())
    }

    fn mean_error(&self) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for m in self.member_matches() {
            sum += m.point_match.distance();
            count += 1;
        }
        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    /// Residual distances under the current models.
    pub fn residuals(&mut self) -> Residuals {
        self.apply();

        let mut sum = 0.0;
        let mut count = 0usize;
        let mut max: f64 = 0.0;
        for m in self.member_matches() {
            let d = m.point_match.distance();
            sum += d;
            count += 1;
            max = max.max(d);
        }

        let per_tile = self
            .tiles
            .iter()
            .map(|&id| {
                let mut weighted = 0.0;
                let mut total_weight = 0.0;
                let mut tile_max: f64 = 0.0;
                for &edge_id in &self.graph.tile(id).edges {
                    for m in &self.graph.edge(edge_id).matches {
                        let d = m.point_match.distance();
                        weighted += m.point_match.weight * d;
                        total_weight += m.point_match.weight;
                        tile_max = tile_max.max(d);
                    }
                }
                let mean = if total_weight > 0.0 {
                    weighted / total_weight
                } else {
                    0.0
                };
                (mean, tile_max)
            })
            .collect();

        Residuals {
            avg: if count == 0 { 0.0 } else { sum / count as f64 },
            max,
            per_tile,
        }
    }
}
