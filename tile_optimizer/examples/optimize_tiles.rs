//! Example: Globally optimize a tiled acquisition from pairwise matches
//!
//! Reads a list of pairwise matches (JSON or YAML, see [`PairwiseMatch`]) and an
//! optional optimizer configuration, solves the tile models and prints the
//! summary report plus the final model of every tile. Without arguments a
//! synthetic noisy 6x4 grid is optimized instead.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example optimize_tiles -- matches.json [optimizer.yaml]
//! ```
//!
//! Logs are written to `test_output/logs`.

use std::io::Write;

use anyhow::Context;
use tile_optimizer::synthetic::TileGrid;
use tile_optimizer::{GlobalOptimizer, OptimizerConfig, PairwiseMatch, config, logging};

fn main() -> anyhow::Result<()> {
    logging::setup_logging("info", "test_output/logs")?;

    let mut args = std::env::args().skip(1);
    let matches: Vec<PairwiseMatch> = match args.next() {
        Some(path) => config::load_file(&path)?,
        None => {
            tracing::info!("No match file given, using a synthetic 6x4 grid");
            TileGrid::new_2d(6, 4, 1000.0).with_noise(1.5, 42).matches()
        }
    };
    let optimizer_config = match args.next() {
        Some(path) => OptimizerConfig::load(&path)?,
        None => OptimizerConfig::default(),
    };

    let optimizer = GlobalOptimizer::new(optimizer_config);
    let mut stdout = std::io::stdout().lock();
    let sink: &mut dyn Write = &mut stdout;
    let result = optimizer
        .optimize_with_log(&matches, Some(sink))
        .context("Global optimization failed")?;

    writeln!(stdout)?;
    for tile in &result.tiles {
        writeln!(
            stdout,
            "tile {:>4}: {} (avg {:.3}px, max {:.3}px)",
            tile.index, tile.model, tile.avg_error, tile.max_error
        )?;
    }
    tracing::info!(
        total_ms = result.timings.total_ms,
        tiles = result.tiles.len(),
        "Done"
    );
    Ok(())
}
