//! Optimization results and diagnostics.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::io::Write;

use serde::Serialize;

use crate::degeneracy::Downgrades;
use crate::graph::PairwiseMatch;
use crate::model::TileModel;

/// A tile of the optimized component with its final model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultTile {
    pub index: usize,
    pub model: TileModel,
    /// Weighted mean residual of the tile's point matches.
    pub avg_error: f64,
    pub max_error: f64,
}

/// A tile referenced by the input that is not part of the result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LostTile {
    pub index: usize,
    /// Initial model, if the tile made it into the graph.
    pub model: Option<TileModel>,
    /// Size of the component the tile ended up in, 0 if it has none.
    pub component_size: usize,
}

/// Outcome of one refinement phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseOutcome {
    pub iterations: usize,
    /// Mean point-match distance after the last iteration.
    pub final_error: f64,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Timings {
    pub graph_ms: f64,
    pub components_ms: f64,
    pub models_ms: f64,
    pub total_ms: f64,
}

/// Result of a global optimization run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    /// Tiles of the largest connected component, ascending tile index.
    pub tiles: Vec<ResultTile>,
    pub translation_only: bool,
    pub downgrades: Downgrades,
    pub remaining_graph_size: usize,
    /// Input matches with both tiles in the result.
    pub remaining_pairs: usize,
    pub avg_error: f64,
    pub max_error: f64,
    /// Largest measured offset length over all input matches.
    pub max_pairwise_displacement: f64,
    pub lost_tiles: BTreeMap<usize, LostTile>,
    /// Component size → number of components.
    pub component_histogram: BTreeMap<usize, usize>,
    pub translation_phase: Option<PhaseOutcome>,
    pub full_model_phase: Option<PhaseOutcome>,
    pub match_count: usize,
    pub timings: Timings,
}

impl OptimizationResult {
    /// Result of a run that had nothing to optimize.
    pub fn empty(matches: &[PairwiseMatch]) -> Self {
        let lost_tiles = referenced_tiles(matches)
            .into_iter()
            .map(|index| {
                (
                    index,
                    LostTile {
                        index,
                        model: None,
                        component_size: 0,
                    },
                )
            })
            .collect();

        Self {
            tiles: Vec::new(),
            translation_only: false,
            downgrades: Downgrades::default(),
            remaining_graph_size: 0,
            remaining_pairs: 0,
            avg_error: 0.0,
            max_error: 0.0,
            max_pairwise_displacement: max_raw_displacement(matches),
            lost_tiles,
            component_histogram: BTreeMap::new(),
            translation_phase: None,
            full_model_phase: None,
            match_count: matches.len(),
            timings: Timings::default(),
        }
    }

    pub fn tile(&self, index: usize) -> Option<&ResultTile> {
        self.tiles
            .binary_search_by_key(&index, |t| t.index)
            .ok()
            .map(|i| &self.tiles[i])
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Human-readable summary.
    pub fn write_report(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Added {} pairwise matches", self.match_count)?;
        for line in histogram_lines(&self.component_histogram) {
            writeln!(w, "{}", line)?;
        }
        writeln!(
            w,
            "Using the largest graph of size {} (throwing away {} tiles from smaller graphs)",
            self.remaining_graph_size,
            self.lost_tiles.values().filter(|t| t.component_size > 0).count()
        )?;
        writeln!(w, "Remaining pairs: {}", self.remaining_pairs)?;
        if self.translation_only {
            writeln!(w, "Translation-only stitching")?;
        } else {
            writeln!(
                w,
                "Simplified tile models: {} collinear, {} coplanar",
                self.downgrades.collinear, self.downgrades.coplanar
            )?;
        }
        if let Some(elapsed) = self.optimization_secs() {
            writeln!(w, "Optimization round took {:.2}s", elapsed)?;
        }
        writeln!(w)?;
        writeln!(
            w,
            "Max pairwise match displacement: {:.2}px",
            self.max_pairwise_displacement
        )?;
        writeln!(w, "avg error: {:.2}px", self.avg_error)?;
        writeln!(w, "max error: {:.2}px", self.max_error)?;
        writeln!(w, "Tiles lost: {}", self.lost_tiles.len())?;
        Ok(())
    }

    fn optimization_secs(&self) -> Option<f64> {
        let translation = self.translation_phase?;
        let full = self.full_model_phase.map_or(0.0, |p| p.elapsed_ms);
        Some((translation.elapsed_ms + full) / 1000.0)
    }
}

/// `Number of tile graphs = N` followed by one line per size, largest first.
pub fn histogram_lines(histogram: &BTreeMap<usize, usize>) -> Vec<String> {
    let mut lines = vec![format!(
        "Number of tile graphs = {}",
        histogram.values().sum::<usize>()
    )];
    for (size, count) in histogram.iter().rev() {
        lines.push(format!("   {} tiles: {} graphs", size, count));
    }
    lines
}

/// Every tile index referenced by a match, fixed or moving.
pub fn referenced_tiles(matches: &[PairwiseMatch]) -> BTreeSet<usize> {
    matches
        .iter()
        .flat_map(|m| [m.fixed.tile, m.moving.tile])
        .collect()
}

/// Number of matches whose both tiles are retained.
pub fn remaining_pairs(matches: &[PairwiseMatch], retained: &BTreeSet<usize>) -> usize {
    matches
        .iter()
        .filter(|m| retained.contains(&m.fixed.tile) && retained.contains(&m.moving.tile))
        .count()
}

pub fn max_raw_displacement(matches: &[PairwiseMatch]) -> f64 {
    matches
        .iter()
        .map(PairwiseMatch::raw_displacement)
        .fold(0.0, f64::max)
}

/// Progress lines for an optional caller-provided text sink, mirrored as
/// `tracing` events.
pub struct ProgressLog<'a> {
    sink: Option<&'a mut dyn Write>,
}

impl<'a> ProgressLog<'a> {
    pub fn new(sink: Option<&'a mut dyn Write>) -> Self {
        Self { sink }
    }

    pub fn line(&mut self, text: impl Display) {
        let text = text.to_string();
        if !text.is_empty() {
            tracing::info!("{}", text);
        }
        if let Some(sink) = self.sink.as_mut() {
            if let Err(err) = writeln!(sink, "{}", text) {
                tracing::warn!(%err, "Failed to write optimization log line");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;

    use crate::testing::{match_2d, subtile_2d};

    fn sample_matches() -> Vec<PairwiseMatch> {
        vec![
            match_2d(
                subtile_2d(0, 90.0, 0.0, 10.0, 10.0),
                subtile_2d(1, 0.0, 0.0, 10.0, 10.0),
                DVec2::new(3.0, 4.0),
            ),
            match_2d(
                subtile_2d(1, 90.0, 0.0, 10.0, 10.0),
                subtile_2d(2, 0.0, 0.0, 10.0, 10.0),
                DVec2::new(-1.0, 0.0),
            ),
            match_2d(
                subtile_2d(5, 90.0, 0.0, 10.0, 10.0),
                subtile_2d(6, 0.0, 0.0, 10.0, 10.0),
                DVec2::ZERO,
            ),
        ]
    }

    #[test]
    fn pair_and_displacement_statistics() {
        let matches = sample_matches();
        let retained: BTreeSet<usize> = [0, 1, 2].into_iter().collect();

        assert_eq!(remaining_pairs(&matches, &retained), 2);
        assert_eq!(max_raw_displacement(&matches), 5.0);
        assert_eq!(
            referenced_tiles(&matches).into_iter().collect::<Vec<_>>(),
            vec![0, 1, 2, 5, 6]
        );
    }

    #[test]
    fn histogram_is_listed_largest_first() {
        let histogram: BTreeMap<usize, usize> = [(3, 1), (5, 2)].into_iter().collect();
        assert_eq!(
            histogram_lines(&histogram),
            vec![
                "Number of tile graphs = 3".to_string(),
                "   5 tiles: 2 graphs".to_string(),
                "   3 tiles: 1 graphs".to_string(),
            ]
        );
    }

    #[test]
    fn empty_result_loses_every_referenced_tile() {
        let result = OptimizationResult::empty(&sample_matches());
        assert!(result.is_empty());
        assert_eq!(result.lost_tiles.len(), 5);
        assert!(result.tile(0).is_none());

        let mut text = Vec::new();
        result.write_report(&mut text).unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.contains("Max pairwise match displacement: 5.00px"));
        assert!(text.contains("Tiles lost: 5"));
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failing_sink_does_not_abort() {
        let mut failing = FailingSink;
        let sink: &mut dyn Write = &mut failing;
        let mut log = ProgressLog::new(Some(sink));
        log.line("still running");

        let mut buffer = Vec::new();
        let sink: &mut dyn Write = &mut buffer;
        let mut log = ProgressLog::new(Some(sink));
        log.line(format_args!("{} tiles", 3));
        drop(log);
        assert_eq!(buffer, b"3 tiles\n");
    }
}
