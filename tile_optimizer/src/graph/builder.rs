//! Graph construction from pairwise match evidence.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::{OptimizerError, Result};
use crate::geometry::{AffineTransform, Dimensionality, Interval, SubTile};
use crate::graph::{Point, PointMatch, TileGraph, TileId};

/// Measured correspondence between a sub-tile of a fixed tile and a sub-tile
/// of a moving tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseMatch {
    pub fixed: SubTile,
    pub moving: SubTile,
    /// Offset of the moving sub-tile relative to its estimated position in
    /// the fixed tile's frame.
    pub offset: DVec3,
    /// Cross-correlation of the match, used as its weight.
    pub weight: f64,
    /// Estimated full-tile transform of the fixed tile at match time.
    pub fixed_transform: AffineTransform,
    /// Estimated full-tile transform of the moving tile at match time.
    pub moving_transform: AffineTransform,
}

impl PairwiseMatch {
    /// Match with identity estimated transforms and the given offset.
    pub fn new(
        dim: Dimensionality,
        fixed: SubTile,
        moving: SubTile,
        offset: DVec3,
        weight: f64,
    ) -> Self {
        Self {
            fixed,
            moving,
            offset,
            weight,
            fixed_transform: AffineTransform::identity(dim),
            moving_transform: AffineTransform::identity(dim),
        }
    }

    pub fn with_transforms(mut self, fixed: AffineTransform, moving: AffineTransform) -> Self {
        self.fixed_transform = fixed;
        self.moving_transform = moving;
        self
    }

    pub fn tiles(&self) -> (usize, usize) {
        (self.fixed.tile, self.moving.tile)
    }

    /// Length of the measured offset.
    pub fn raw_displacement(&self) -> f64 {
        self.offset.length()
    }

    /// Point match from the middle of the moving sub-tile (moving-local) to
    /// its position in the fixed tile: `T_fixed⁻¹(T_moving(middle)) + offset`.
    ///
    /// `None` when the fixed transform cannot be inverted.
    pub fn point_match(&self) -> Option<PointMatch> {
        let dim = self.fixed_transform.dimensionality();
        let middle = dim.project(self.moving.bounds.middle());
        let fixed_inverse = self.fixed_transform.try_inverse()?;
        let in_fixed =
            fixed_inverse.apply(self.moving_transform.apply(middle)) + dim.project(self.offset);

        Some(PointMatch {
            p1: Point::new(middle),
            p2: Point::new(in_fixed),
            weight: self.weight,
        })
    }

    fn dimensionality(&self, position: usize) -> Result<Dimensionality> {
        let dim = self.fixed_transform.dimensionality();
        let moving = self.moving_transform.dimensionality();
        if moving != dim {
            return Err(OptimizerError::ConfigurationMismatch {
                expected: dim,
                found: moving,
                context: format!(
                    "estimated transforms of pairwise match {} (tiles {} / {})",
                    position, self.fixed.tile, self.moving.tile
                ),
            });
        }
        Ok(dim)
    }
}

/// Dimensionality shared by every match, `None` for an empty list.
pub fn dataset_dimensionality(matches: &[PairwiseMatch]) -> Result<Option<Dimensionality>> {
    let mut dataset = None;
    for (position, m) in matches.iter().enumerate() {
        let dim = m.dimensionality(position)?;
        match dataset {
            None => dataset = Some(dim),
            Some(expected) if expected != dim => {
                return Err(OptimizerError::ConfigurationMismatch {
                    expected,
                    found: dim,
                    context: format!("pairwise match {}", position),
                });
            }
            Some(_) => {}
        }
    }
    Ok(dataset)
}

/// Incrementally builds a [`TileGraph`] from pairwise matches, assigning
/// each newly seen tile its configured initial model.
pub struct TileGraphBuilder<'a> {
    graph: TileGraph,
    models: &'a ModelConfig,
    skipped: usize,
}

impl<'a> TileGraphBuilder<'a> {
    pub fn new(dim: Dimensionality, models: &'a ModelConfig) -> Self {
        Self {
            graph: TileGraph::new(dim),
            models,
            skipped: 0,
        }
    }

    /// Build a graph from a whole match list.
    pub fn build(
        dim: Dimensionality,
        models: &'a ModelConfig,
        matches: &[PairwiseMatch],
    ) -> Result<TileGraph> {
        let mut builder = Self::new(dim, models);
        for (position, m) in matches.iter().enumerate() {
            builder.add_match(position, m)?;
        }
        Ok(builder.finish())
    }

    pub fn add_match(&mut self, position: usize, m: &PairwiseMatch) -> Result<()> {
        let dim = m.dimensionality(position)?;
        if dim != self.graph.dimensionality() {
            return Err(OptimizerError::ConfigurationMismatch {
                expected: self.graph.dimensionality(),
                found: dim,
                context: format!("pairwise match {}", position),
            });
        }
        if m.fixed.tile == m.moving.tile {
            tracing::warn!(
                position,
                tile = m.fixed.tile,
                "Skipping pairwise match within a single tile"
            );
            self.skipped += 1;
            return Ok(());
        }

        let fixed = self.register(m.fixed.tile)?;
        let moving = self.register(m.moving.tile)?;
        self.graph.connect(moving, fixed);

        match m.point_match() {
            Some(point_match) => self.graph.add_point_match(moving, fixed, point_match),
            None => {
                tracing::warn!(
                    position,
                    fixed = m.fixed.tile,
                    moving = m.moving.tile,
                    "Estimated fixed-tile transform is not invertible, no point match added"
                );
                self.skipped += 1;
            }
        }

        let project = |bounds: Interval| Interval {
            min: dim.project(bounds.min),
            size: dim.project(bounds.size),
        };
        self.graph
            .tile_mut(fixed)
            .matched_subtiles
            .push(project(m.fixed.bounds));
        self.graph
            .tile_mut(moving)
            .matched_subtiles
            .push(project(m.moving.bounds));
        Ok(())
    }

    /// Number of matches that contributed no point match.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn finish(self) -> TileGraph {
        self.graph
    }

    fn register(&mut self, index: usize) -> Result<TileId> {
        if let Some(id) = self.graph.id_of(index) {
            return Ok(id);
        }
        let model = self.models.model_for(index, self.graph.dimensionality())?;
        Ok(self.graph.add_tile(index, model))
    }
}
