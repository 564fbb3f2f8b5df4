//! Dimensionality, sub-tile intervals and the estimated full-tile transforms.
//!
//! Coordinates are always carried as [`DVec3`]. For 2D datasets the `z`
//! component is zero and every 2D operation leaves it at zero.

use glam::{DAffine2, DAffine3, DVec2, DVec3};
use serde::{Deserialize, Serialize};

const DETERMINANT_EPS: f64 = 1e-12;

/// Number of spatial dimensions of a dataset. Fixed per dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimensionality {
    #[serde(rename = "2d")]
    Two,
    #[serde(rename = "3d")]
    Three,
}

impl Dimensionality {
    pub fn count(self) -> usize {
        match self {
            Dimensionality::Two => 2,
            Dimensionality::Three => 3,
        }
    }

    /// Drop the components this dimensionality does not carry.
    #[inline]
    pub fn project(self, p: DVec3) -> DVec3 {
        match self {
            Dimensionality::Two => DVec3::new(p.x, p.y, 0.0),
            Dimensionality::Three => p,
        }
    }
}

impl std::fmt::Display for Dimensionality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}D", self.count())
    }
}

/// Axis-aligned box in tile-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub min: DVec3,
    pub size: DVec3,
}

impl Interval {
    pub fn new(min: DVec3, size: DVec3) -> Self {
        Self { min, size }
    }

    pub fn new_2d(min: DVec2, size: DVec2) -> Self {
        Self {
            min: min.extend(0.0),
            size: size.extend(0.0),
        }
    }

    /// Middle point of the box, `min + size / 2`.
    #[inline]
    pub fn middle(&self) -> DVec3 {
        self.min + self.size * 0.5
    }
}

/// A sub-region of a tile that took part in a pairwise match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubTile {
    /// Index of the tile this sub-region belongs to.
    pub tile: usize,
    /// Bounds in the tile's local coordinates.
    pub bounds: Interval,
}

impl SubTile {
    pub fn new(tile: usize, bounds: Interval) -> Self {
        Self { tile, bounds }
    }
}

/// Affine transform of a whole tile into world space, as estimated at
/// pairwise-match time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AffineTransform {
    D2(DAffine2),
    D3(DAffine3),
}

impl AffineTransform {
    pub fn identity(dim: Dimensionality) -> Self {
        match dim {
            Dimensionality::Two => AffineTransform::D2(DAffine2::IDENTITY),
            Dimensionality::Three => AffineTransform::D3(DAffine3::IDENTITY),
        }
    }

    pub fn from_translation(dim: Dimensionality, t: DVec3) -> Self {
        match dim {
            Dimensionality::Two => AffineTransform::D2(DAffine2::from_translation(t.truncate())),
            Dimensionality::Three => AffineTransform::D3(DAffine3::from_translation(t)),
        }
    }

    pub fn dimensionality(&self) -> Dimensionality {
        match self {
            AffineTransform::D2(_) => Dimensionality::Two,
            AffineTransform::D3(_) => Dimensionality::Three,
        }
    }

    #[inline]
    pub fn apply(&self, p: DVec3) -> DVec3 {
        match self {
            AffineTransform::D2(a) => a.transform_point2(p.truncate()).extend(0.0),
            AffineTransform::D3(a) => a.transform_point3(p),
        }
    }

    pub fn determinant(&self) -> f64 {
        match self {
            AffineTransform::D2(a) => a.matrix2.determinant(),
            AffineTransform::D3(a) => a.matrix3.determinant(),
        }
    }

    /// Inverse transform, `None` when the linear part is singular.
    pub fn try_inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < DETERMINANT_EPS {
            return None;
        }
        Some(match self {
            AffineTransform::D2(a) => AffineTransform::D2(a.inverse()),
            AffineTransform::D3(a) => AffineTransform::D3(a.inverse()),
        })
    }
}
