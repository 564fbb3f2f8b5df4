//! Two-phase global optimization of a tile graph.
//!
//! ```text
//! INIT → GRAPH_READY → COMPONENT_SELECTED → MODELS_FINALIZED
//!      → TRANSLATION_SOLVED → [FULL_MODEL_SOLVED] → DONE
//! ```
//!
//! Phase 1 always solves for translations. Unless every tile already asks
//! for a translation model, phase 2 restores the finalized models, seeds
//! them from the translation solution and refines them with damping.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::time::Instant;

use glam::DVec3;

use crate::config::OptimizerConfig;
use crate::degeneracy::{self, Downgrades};
use crate::error::Result;
use crate::geometry::Dimensionality;
use crate::graph::{
    PairwiseMatch, TileGraph, TileGraphBuilder, TileId, connected_components,
    dataset_dimensionality, largest_component, size_histogram,
};
use crate::model::TileModel;
use crate::report::{
    LostTile, OptimizationResult, PhaseOutcome, ProgressLog, ResultTile, Timings,
    histogram_lines, max_raw_displacement, referenced_tiles, remaining_pairs,
};
use crate::solver::{RefineParams, TileConfiguration};

/// Pipeline stage, advanced strictly in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    GraphReady,
    ComponentSelected,
    ModelsFinalized,
    TranslationSolved,
    FullModelSolved,
    Done,
}

impl Stage {
    fn advance(&mut self, next: Stage) {
        assert!(next > *self, "stage cannot go from {:?} to {:?}", self, next);
        tracing::debug!(from = ?*self, to = ?next, "Optimizer stage");
        *self = next;
    }
}

/// The largest component and what was discarded to get it.
#[derive(Debug, Clone)]
pub struct ComponentSelection {
    /// Retained tiles, ascending tile index.
    pub tiles: Vec<TileId>,
    pub histogram: BTreeMap<usize, usize>,
    /// Size of the component each tile belongs to.
    pub component_size: Vec<usize>,
}

/// Models after degeneracy handling.
#[derive(Debug, Clone, Copy)]
pub struct ModelFinalization {
    pub translation_only: bool,
    pub downgrades: Downgrades,
}

/// Aligns all tiles of a dataset from pairwise match evidence.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptimizer {
    config: OptimizerConfig,
}

impl GlobalOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        config.validate();
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn optimize(&self, matches: &[PairwiseMatch]) -> Result<OptimizationResult> {
        self.optimize_with_log(matches, None)
    }

    /// Run the whole pipeline, writing progress lines to `log` if given.
    pub fn optimize_with_log(
        &self,
        matches: &[PairwiseMatch],
        log: Option<&mut dyn Write>,
    ) -> Result<OptimizationResult> {
        let start = Instant::now();
        let mut log = ProgressLog::new(log);
        let mut stage = Stage::Init;

        let Some(dim) = dataset_dimensionality(matches)? else {
            log.line("Added 0 pairwise matches");
            return Ok(OptimizationResult::empty(matches));
        };

        let graph_start = Instant::now();
        let mut graph = TileGraphBuilder::build(dim, &self.config.models, matches)?;
        let graph_ms = elapsed_ms(graph_start);
        stage.advance(Stage::GraphReady);
        log.line(format_args!("Added {} pairwise matches", matches.len()));

        if graph.is_empty() {
            return Ok(OptimizationResult::empty(matches));
        }

        let components_start = Instant::now();
        let selection = select_component(&graph);
        let components_ms = elapsed_ms(components_start);
        stage.advance(Stage::ComponentSelected);
        for line in histogram_lines(&selection.histogram) {
            log.line(line);
        }
        log.line(format_args!(
            "Using the largest graph of size {} (throwing away {} tiles from smaller graphs)",
            selection.tiles.len(),
            graph.len() - selection.tiles.len()
        ));

        let models_start = Instant::now();
        let finalization = finalize_models(&mut graph, &selection.tiles)?;
        let models_ms = elapsed_ms(models_start);
        stage.advance(Stage::ModelsFinalized);
        tracing::info!(
            translation_only = finalization.translation_only,
            collinear = finalization.downgrades.collinear,
            coplanar = finalization.downgrades.coplanar,
            "Tile models finalized"
        );

        let (translation_phase, full_model_phase) = if finalization.translation_only {
            let mut configuration = TileConfiguration::new(&mut graph, &selection.tiles);
            let phase = self.solve_translation(&mut configuration)?;
            stage.advance(Stage::TranslationSolved);
            (phase, None)
        } else {
            let full_models = stash_translation_models(&mut graph, &selection.tiles, dim);
            let mut configuration = TileConfiguration::new(&mut graph, &selection.tiles);
            let translation = self.solve_translation(&mut configuration)?;
            stage.advance(Stage::TranslationSolved);
            let full = self.solve_full_model(&mut configuration, full_models)?;
            stage.advance(Stage::FullModelSolved);
            (translation, Some(full))
        };
        log.line(format_args!(
            "Optimization round took {:.2}s",
            (translation_phase.elapsed_ms + full_model_phase.map_or(0.0, |p| p.elapsed_ms))
                / 1000.0
        ));

        let residuals = TileConfiguration::new(&mut graph, &selection.tiles).residuals();
        let max_pairwise_displacement = max_raw_displacement(matches);
        log.line("");
        log.line(format_args!(
            "Max pairwise match displacement: {:.2}px",
            max_pairwise_displacement
        ));
        log.line(format_args!("avg error: {:.2}px", residuals.avg));
        log.line(format_args!("max error: {:.2}px", residuals.max));

        let tiles: Vec<ResultTile> = selection
            .tiles
            .iter()
            .zip(&residuals.per_tile)
            .map(|(&id, &(avg_error, max_error))| {
                let tile = graph.tile(id);
                ResultTile {
                    index: tile.index,
                    model: tile.model.clone(),
                    avg_error,
                    max_error,
                }
            })
            .collect();
        let retained: BTreeSet<usize> = tiles.iter().map(|t| t.index).collect();
        let lost_tiles = lost_tiles(matches, &retained, &graph, &selection);
        log.line(format_args!("Tiles lost: {}", lost_tiles.len()));
        stage.advance(Stage::Done);

        Ok(OptimizationResult {
            remaining_graph_size: tiles.len(),
            remaining_pairs: remaining_pairs(matches, &retained),
            tiles,
            translation_only: finalization.translation_only,
            downgrades: finalization.downgrades,
            avg_error: residuals.avg,
            max_error: residuals.max,
            max_pairwise_displacement,
            lost_tiles,
            component_histogram: selection.histogram,
            translation_phase: Some(translation_phase),
            full_model_phase,
            match_count: matches.len(),
            timings: Timings {
                graph_ms,
                components_ms,
                models_ms,
                total_ms: elapsed_ms(start),
            },
        })
    }

    /// Phase 1: prealign, then refine translations with full steps.
    fn solve_translation(&self, configuration: &mut TileConfiguration) -> Result<PhaseOutcome> {
        let start = Instant::now();
        configuration.prealign()?;
        let stats = configuration.optimize(RefineParams::fixed_budget(
            self.config.iterations,
            self.config.translation_damping,
        ))?;
        let outcome = PhaseOutcome {
            iterations: stats.len(),
            final_error: stats.last().unwrap_or(0.0),
            elapsed_ms: elapsed_ms(start),
        };
        tracing::info!(
            iterations = outcome.iterations,
            error = outcome.final_error,
            elapsed_ms = outcome.elapsed_ms,
            "Translation phase finished"
        );
        Ok(outcome)
    }

    /// Phase 2: seed the finalized models from the translation solution and
    /// refine them with damping.
    fn solve_full_model(
        &self,
        configuration: &mut TileConfiguration,
        full_models: Vec<TileModel>,
    ) -> Result<PhaseOutcome> {
        let start = Instant::now();
        let tiles = configuration.tiles().to_vec();
        for (id, mut model) in tiles.into_iter().zip(full_models) {
            let tile = configuration.graph_mut().tile_mut(id);
            model.seed_from_translation(tile.index, &tile.model)?;
            tile.model = model;
        }

        let stats = configuration.optimize(RefineParams::fixed_budget(
            self.config.iterations,
            self.config.full_model_damping,
        ))?;
        let outcome = PhaseOutcome {
            iterations: stats.len(),
            final_error: stats.last().unwrap_or(0.0),
            elapsed_ms: elapsed_ms(start),
        };
        tracing::info!(
            iterations = outcome.iterations,
            error = outcome.final_error,
            elapsed_ms = outcome.elapsed_ms,
            "Full-model phase finished"
        );
        Ok(outcome)
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Connected components, their size histogram, and the largest one.
pub fn select_component(graph: &TileGraph) -> ComponentSelection {
    let components = connected_components(graph);
    let histogram = size_histogram(&components);

    let mut component_size = vec![0; graph.len()];
    for component in &components {
        for &id in component {
            component_size[id.0] = component.len();
        }
    }

    let tiles = largest_component(&components)
        .map(<[TileId]>::to_vec)
        .unwrap_or_default();

    ComponentSelection {
        tiles,
        histogram,
        component_size,
    }
}

/// Decide whether the run is translation-only and, if not, downgrade
/// degenerate tile models. Every tile needs at least one point match.
pub fn finalize_models(graph: &mut TileGraph, tiles: &[TileId]) -> Result<ModelFinalization> {
    degeneracy::require_point_matches(graph, tiles)?;
    let translation_only = degeneracy::is_translation_only(graph, tiles);
    let downgrades = if translation_only {
        Downgrades::default()
    } else {
        degeneracy::simplify_models(graph, tiles)?
    };
    Ok(ModelFinalization {
        translation_only,
        downgrades,
    })
}

/// Replace every tile's model by a zero translation, returning the
/// finalized models in tile order.
fn stash_translation_models(
    graph: &mut TileGraph,
    tiles: &[TileId],
    dim: Dimensionality,
) -> Vec<TileModel> {
    tiles
        .iter()
        .map(|&id| {
            std::mem::replace(
                &mut graph.tile_mut(id).model,
                TileModel::translation(dim, DVec3::ZERO),
            )
        })
        .collect()
}

fn lost_tiles(
    matches: &[PairwiseMatch],
    retained: &BTreeSet<usize>,
    graph: &TileGraph,
    selection: &ComponentSelection,
) -> BTreeMap<usize, LostTile> {
    referenced_tiles(matches)
        .into_iter()
        .filter(|index| !retained.contains(index))
        .map(|index| {
            let lost = match graph.id_of(index) {
                Some(id) => LostTile {
                    index,
                    model: Some(graph.tile(id).model.clone()),
                    component_size: selection.component_size[id.0],
                },
                None => LostTile {
                    index,
                    model: None,
                    component_size: 0,
                },
            };
            (index, lost)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;

    use crate::config::{ModelConfig, ModelSpec};
    use crate::error::OptimizerError;
    use crate::geometry::AffineTransform;
    use crate::model::ModelFamily;
    use crate::synthetic::TileGrid;
    use crate::testing::{assert_close, chain_2d, init_tracing, match_2d, subtile_2d};

    fn optimizer(models: ModelConfig, iterations: usize) -> GlobalOptimizer {
        GlobalOptimizer::new(OptimizerConfig {
            models,
            iterations,
            ..Default::default()
        })
    }

    #[test]
    fn stages_only_move_forward() {
        let mut stage = Stage::Init;
        stage.advance(Stage::GraphReady);
        stage.advance(Stage::TranslationSolved);
        assert_eq!(stage, Stage::TranslationSolved);
    }

    #[test]
    #[should_panic(expected = "stage cannot go")]
    fn stages_cannot_repeat() {
        let mut stage = Stage::ModelsFinalized;
        stage.advance(Stage::ModelsFinalized);
    }

    #[test]
    fn translation_only_grid_skips_full_model_phase() {
        init_tracing();
        let grid = TileGrid::new_2d(3, 3, 100.0);
        let result = optimizer(ModelConfig::translation_only(), 50)
            .optimize(&grid.matches())
            .unwrap();

        assert!(result.translation_only);
        assert!(result.full_model_phase.is_none());
        assert_eq!(result.translation_phase.unwrap().iterations, 50);
        assert_eq!(result.tiles.len(), 9);
        assert!(result.max_error < 1e-9);
        for tile in &result.tiles {
            assert_close(
                tile.model.translation_component(),
                grid.position(tile.index),
                1e-9,
            );
        }
    }

    #[test]
    fn full_model_phase_keeps_exact_solution() {
        let grid = TileGrid::new_2d(3, 3, 100.0);
        let result = optimizer(ModelConfig::default(), 100)
            .optimize(&grid.matches())
            .unwrap();

        assert!(!result.translation_only);
        assert_eq!(result.full_model_phase.unwrap().iterations, 100);
        assert_eq!(result.downgrades, Downgrades::default());
        assert!(result.max_error < 1e-6, "max error {}", result.max_error);
        for tile in &result.tiles {
            assert!(matches!(tile.model, TileModel::Interpolated(_)));
            assert_close(
                tile.model.apply(DVec3::ZERO),
                grid.position(tile.index),
                1e-6,
            );
        }
    }

    #[test]
    fn progress_log_receives_summary_lines() {
        let mut matches = chain_2d(0, 4, 100.0);
        matches.extend(chain_2d(20, 2, 100.0));
        let mut text = Vec::new();
        let sink: &mut dyn Write = &mut text;

        let result = optimizer(ModelConfig::translation_only(), 10)
            .optimize_with_log(&matches, Some(sink))
            .unwrap();

        let text = String::from_utf8(text).unwrap();
        assert!(text.starts_with("Added 12 pairwise matches\n"));
        assert!(text.contains("Number of tile graphs = 2\n"));
        assert!(text.contains("   4 tiles: 1 graphs\n"));
        assert!(text.contains("Using the largest graph of size 4 (throwing away 2 tiles"));
        assert!(text.contains("Tiles lost: 2\n"));
        assert_eq!(result.lost_tiles[&21].component_size, 2);
    }

    #[test]
    fn single_subtile_rigid_tile_falls_back_to_translation() {
        let matches = vec![match_2d(
            subtile_2d(0, 90.0, 0.0, 10.0, 10.0),
            subtile_2d(1, 0.0, 0.0, 10.0, 10.0),
            DVec2::new(90.0, 0.0),
        )];
        let mut models = ModelConfig::default();
        models.default = ModelSpec::plain(ModelFamily::Translation);
        models.per_tile.insert(1, ModelSpec::plain(ModelFamily::Rigid));

        let result = optimizer(models, 10).optimize(&matches).unwrap();

        assert!(!result.translation_only);
        assert_eq!(result.downgrades.collinear, 2);
        assert!(result.tiles.iter().all(|t| t.model.is_translation()));
        assert_close(
            result.tile(1).unwrap().model.translation_component(),
            DVec3::new(90.0, 0.0, 0.0),
            1e-9,
        );
    }

    /// Tile 0 reaches tile 1 only through a match whose fixed transform
    /// cannot be inverted; tiles 1 and 2 are matched normally.
    fn anchor_without_point_matches() -> Vec<PairwiseMatch> {
        let mut matches = vec![
            match_2d(
                subtile_2d(0, 90.0, 0.0, 10.0, 10.0),
                subtile_2d(1, 0.0, 0.0, 10.0, 10.0),
                DVec2::new(90.0, 0.0),
            )
            .with_transforms(
                AffineTransform::D2(glam::DAffine2::from_scale(DVec2::ZERO)),
                AffineTransform::identity(Dimensionality::Two),
            ),
        ];
        matches.extend(chain_2d(1, 2, 100.0));
        matches
    }

    #[test]
    fn tile_without_point_matches_fails_on_every_path() {
        let matches = anchor_without_point_matches();
        let expected = OptimizerError::InsufficientData {
            tile: 0,
            required: 1,
            found: 0,
        };

        let err = optimizer(ModelConfig::translation_only(), 10)
            .optimize(&matches)
            .unwrap_err();
        assert_eq!(err, expected);

        let err = optimizer(ModelConfig::default(), 10)
            .optimize(&matches)
            .unwrap_err();
        assert_eq!(err, expected);
    }

    #[test]
    fn mixed_transform_dimensionality_is_rejected() {
        let mut matches = chain_2d(0, 3, 100.0);
        matches[2].fixed_transform = AffineTransform::identity(Dimensionality::Three);

        let err = optimizer(ModelConfig::default(), 10)
            .optimize(&matches)
            .unwrap_err();
        assert!(matches!(err, OptimizerError::ConfigurationMismatch { .. }));
    }
}
