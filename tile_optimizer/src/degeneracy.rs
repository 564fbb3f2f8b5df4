//! Detection of tiles whose matched sub-tiles cannot constrain their model.
//!
//! The middle points of all sub-tiles of a tile that took part in a match
//! are classified by their spatial spread. Collinear evidence only fixes a
//! translation; coplanar evidence in 3D fixes at most a similarity.

use glam::DVec3;
use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use serde::Serialize;

use crate::error::{OptimizerError, Result};
use crate::geometry::Dimensionality;
use crate::graph::{TileGraph, TileId};
use crate::model::{ModelFamily, TileModel};

/// Relative eigenvalue threshold of the point covariance below which a
/// direction is considered flat.
const SPREAD_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spread {
    /// All points on one line (or a single point).
    Collinear,
    /// All points in one plane, but not on a line.
    Coplanar,
    /// Spans every dimension of the dataset.
    Full,
}

/// Number of tiles whose model was downgraded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Downgrades {
    pub collinear: usize,
    pub coplanar: usize,
}

/// Classify the spread of a point set.
pub fn classify_spread(points: &[DVec3], dim: Dimensionality) -> Spread {
    let n = points.len();
    if n < 2 {
        return Spread::Collinear;
    }

    let centroid = points.iter().copied().sum::<DVec3>() / n as f64;
    let mut covariance = Matrix3::<f64>::zeros();
    for p in points {
        let d = dim.project(*p - centroid);
        let v = Vector3::new(d.x, d.y, d.z);
        covariance += v * v.transpose();
    }

    let mut eigenvalues: Vec<f64> = SymmetricEigen::new(covariance)
        .eigenvalues
        .iter()
        .map(|e| e.max(0.0))
        .collect();
    eigenvalues.sort_by(|a, b| b.total_cmp(a));

    let largest = eigenvalues[0];
    if largest <= f64::MIN_POSITIVE || eigenvalues[1] <= SPREAD_EPS * largest {
        return Spread::Collinear;
    }
    if dim == Dimensionality::Three && eigenvalues[2] <= SPREAD_EPS * largest {
        return Spread::Coplanar;
    }
    Spread::Full
}

/// Distinct middle points of the tile's matched sub-tiles.
fn matched_positions(graph: &TileGraph, id: TileId) -> Vec<DVec3> {
    let mut positions: Vec<DVec3> = graph
        .tile(id)
        .matched_subtiles
        .iter()
        .map(|bounds| bounds.middle())
        .collect();
    positions.sort_by(|a, b| {
        a.x.total_cmp(&b.x)
            .then(a.y.total_cmp(&b.y))
            .then(a.z.total_cmp(&b.z))
    });
    positions.dedup();
    positions
}

/// `true` when every tile in the set already carries a translation model.
pub fn is_translation_only(graph: &TileGraph, tiles: &[TileId]) -> bool {
    tiles.iter().all(|&id| graph.tile(id).model.is_translation())
}

/// Model a tile should fall back to for the given spread, if any.
fn replacement(spread: Spread, dim: Dimensionality) -> Option<TileModel> {
    match (spread, dim) {
        (Spread::Collinear, _) => Some(TileModel::new(ModelFamily::Translation, dim)),
        (Spread::Coplanar, Dimensionality::Three) => {
            Some(TileModel::new(ModelFamily::Similarity, dim))
        }
        _ => None,
    }
}

/// Fails with [`OptimizerError::InsufficientData`] for the first tile without
/// any point match.
pub fn require_point_matches(graph: &TileGraph, tiles: &[TileId]) -> Result<()> {
    match tiles.iter().find(|&&id| graph.match_count(id) == 0) {
        Some(&id) => Err(OptimizerError::InsufficientData {
            tile: graph.tile(id).index,
            required: 1,
            found: 0,
        }),
        None => Ok(()),
    }
}

/// Downgrade the model of every tile whose matched sub-tiles are collinear
/// (→ translation) or, in 3D, coplanar (→ similarity).
///
/// An interpolated model keeps its regulariser side and λ when the
/// replacement is not a translation; a translation replacement is assigned
/// as is. Fails with [`OptimizerError::InsufficientData`] for a tile without
/// point matches.
pub fn simplify_models(graph: &mut TileGraph, tiles: &[TileId]) -> Result<Downgrades> {
    require_point_matches(graph, tiles)?;
    let dim = graph.dimensionality();
    let mut downgrades = Downgrades::default();

    for &id in tiles {
        let index = graph.tile(id).index;
        let spread = classify_spread(&matched_positions(graph, id), dim);
        let Some(replacement) = replacement(spread, dim) else {
            continue;
        };
        match spread {
            Spread::Collinear => downgrades.collinear += 1,
            Spread::Coplanar => downgrades.coplanar += 1,
            Spread::Full => {}
        }

        let current = &graph.tile(id).model;
        let model = match current {
            TileModel::Interpolated(m) if !replacement.is_translation() => {
                TileModel::interpolated(replacement, m.b().clone(), m.lambda())?
            }
            _ => replacement,
        };
        tracing::debug!(
            tile = index,
            ?spread,
            from = %current,
            to = %model,
            "Downgrading degenerate tile model"
        );
        graph.tile_mut(id).model = model;
    }

    Ok(downgrades)
}
