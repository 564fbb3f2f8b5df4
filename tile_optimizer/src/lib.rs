//! Tile optimizer - global alignment of overlapping image tiles.
//!
//! Given pairwise match results between sub-tiles of a tiled 2D or 3D
//! acquisition, this library computes one geometric model per tile so that
//! all tiles agree in a common world frame:
//! - Tile graph construction from pairwise matches
//! - Connected-component analysis (only the largest component is solved)
//! - Degenerate-configuration handling (collinear / coplanar evidence)
//! - Two-phase optimization: translations first, then the configured models
//! - Diagnostics: residuals, lost tiles, component histogram
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tile_optimizer::{GlobalOptimizer, OptimizerConfig, PairwiseMatch};
//!
//! let matches: Vec<PairwiseMatch> = tile_optimizer::config::load_file("matches.json")?;
//! let optimizer = GlobalOptimizer::new(OptimizerConfig::default());
//! let result = optimizer.optimize(&matches)?;
//!
//! println!("avg error: {:.2}px", result.avg_error);
//! ```

pub mod config;
pub mod degeneracy;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod logging;
pub mod model;
pub mod optimizer;
pub mod report;
pub mod solver;
pub mod synthetic;

#[cfg(test)]
pub mod testing;

// ============================================================================
// Inputs and configuration
// ============================================================================

pub use config::{ModelConfig, ModelSpec, OptimizerConfig, Regularizer};
pub use geometry::{AffineTransform, Dimensionality, Interval, SubTile};
pub use graph::PairwiseMatch;
pub use model::{ModelFamily, TileModel};

// ============================================================================
// Optimization
// ============================================================================

pub use error::{FitError, OptimizerError};
pub use optimizer::{GlobalOptimizer, Stage};
pub use report::{LostTile, OptimizationResult, PhaseOutcome, ResultTile, Timings};
