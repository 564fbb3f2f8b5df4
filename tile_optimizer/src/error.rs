//! Error types for global tile optimization.

use thiserror::Error;

use crate::geometry::Dimensionality;

/// Reason a single model could not be fitted to its correspondences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitError {
    /// Fewer correspondences than the model has to be constrained by.
    NotEnoughMatches { required: usize, found: usize },
    /// Correspondences exist but do not determine the model (singular system,
    /// coincident points, zero total weight).
    IllDefined(&'static str),
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitError::NotEnoughMatches { required, found } => {
                write!(f, "not enough matches: need {}, got {}", required, found)
            }
            FitError::IllDefined(reason) => write!(f, "ill-defined data points: {}", reason),
        }
    }
}

/// Errors that abort an `optimize()` call.
///
/// None of them are retried internally; a caller either receives a complete
/// result or one of these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizerError {
    #[error("Tile {tile} has {found} point matches, its model needs at least {required}")]
    InsufficientData {
        tile: usize,
        required: usize,
        found: usize,
    },

    #[error("Point-match geometry of tile {tile} is degenerate: {reason}")]
    IllDefinedGeometry { tile: usize, reason: &'static str },

    #[error("Tile {tile}: no translation seeding rule for model {model}")]
    UnsupportedModelSeeding { tile: usize, model: String },

    #[error("Dimensionality mismatch in {context}: expected {expected}, found {found}")]
    ConfigurationMismatch {
        expected: Dimensionality,
        found: Dimensionality,
        context: String,
    },
}

impl OptimizerError {
    /// Attach a tile index to a model fit failure.
    pub(crate) fn from_fit(tile: usize, err: FitError) -> Self {
        match err {
            FitError::NotEnoughMatches { required, found } => OptimizerError::InsufficientData {
                tile,
                required,
                found,
            },
            FitError::IllDefined(reason) => OptimizerError::IllDefinedGeometry { tile, reason },
        }
    }
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
