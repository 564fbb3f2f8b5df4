//! Test utilities.

use glam::{DVec2, DVec3};

use crate::geometry::{Dimensionality, Interval, SubTile};
use crate::graph::PairwiseMatch;

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn subtile_2d(tile: usize, x: f64, y: f64, w: f64, h: f64) -> SubTile {
    SubTile::new(tile, Interval::new_2d(DVec2::new(x, y), DVec2::new(w, h)))
}

/// 2D match with identity estimated transforms: the moving sub-tile middle
/// lands at `middle + offset` in the fixed tile.
pub fn match_2d(fixed: SubTile, moving: SubTile, offset: DVec2) -> PairwiseMatch {
    PairwiseMatch::new(Dimensionality::Two, fixed, moving, offset.extend(0.0), 1.0)
}

/// Chain of tiles `first..first + count` along x, `spacing` apart, each
/// neighbouring pair matched through three non-collinear sub-tiles.
pub fn chain_2d(first: usize, count: usize, spacing: f64) -> Vec<PairwiseMatch> {
    let mut matches = Vec::new();
    for tile in first..first + count.saturating_sub(1) {
        for (x, y) in [(0.0, 0.0), (0.0, 40.0), (15.0, 80.0)] {
            matches.push(match_2d(
                subtile_2d(tile, spacing + x, y, 10.0, 20.0),
                subtile_2d(tile + 1, x, y, 10.0, 20.0),
                DVec2::new(spacing, 0.0),
            ));
        }
    }
    matches
}

pub fn assert_close(actual: DVec3, expected: DVec3, tolerance: f64) {
    assert!(
        (actual - expected).length() < tolerance,
        "Expected {:?}, got {:?}",
        expected,
        actual
    );
}
