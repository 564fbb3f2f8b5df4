//! Geometric tile models.
//!
//! A tile's model maps tile-local coordinates into the common world frame.
//! Supported families, each in 2D and 3D:
//!
//! | Family | DOF (2D / 3D) | Min matches (2D / 3D) |
//! |--------|---------------|-----------------------|
//! | Translation | 2 / 3 | 1 / 1 |
//! | Rigid | 3 / 6 | 2 / 3 |
//! | Similarity | 4 / 7 | 2 / 3 |
//! | Affine | 6 / 12 | 3 / 4 |
//!
//! plus an [`InterpolatedModel`] blending two models of the same
//! dimensionality with a coefficient λ.

mod fit;

#[cfg(test)]
mod tests;

use glam::{DAffine2, DAffine3, DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::error::{FitError, OptimizerError, Result};
use crate::geometry::{AffineTransform, Dimensionality};

/// Base model families. Interpolated composites are built from two of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Translation,
    Rigid,
    Similarity,
    #[default]
    Affine,
}

/// A weighted correspondence used as the fitting primitive: the model should
/// map `source` onto `target`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub source: DVec3,
    pub target: DVec3,
    pub weight: f64,
}

/// Geometric model of one tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TileModel {
    Translation2D(DVec2),
    Rigid2D(DAffine2),
    Similarity2D(DAffine2),
    Affine2D(DAffine2),
    Translation3D(DVec3),
    Rigid3D(DAffine3),
    Similarity3D(DAffine3),
    Affine3D(DAffine3),
    Interpolated(Box<InterpolatedModel>),
}

/// Blend `(1 - λ)·a + λ·b` of two models, evaluated on their affine matrices.
///
/// `a` carries the requested model, `b` the regulariser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolatedModel {
    a: TileModel,
    b: TileModel,
    lambda: f64,
    blended: AffineTransform,
}

impl InterpolatedModel {
    pub fn a(&self) -> &TileModel {
        &self.a
    }

    pub fn b(&self) -> &TileModel {
        &self.b
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn blended(&self) -> &AffineTransform {
        &self.blended
    }

    /// Recompute the blended transform from the two inner models.
    pub fn interpolate(&mut self) {
        self.blended = blend(&self.a.to_affine(), &self.b.to_affine(), self.lambda);
    }
}

fn blend(a: &AffineTransform, b: &AffineTransform, lambda: f64) -> AffineTransform {
    let wa = 1.0 - lambda;
    match (a, b) {
        (AffineTransform::D2(a), AffineTransform::D2(b)) => {
            AffineTransform::D2(DAffine2::from_mat2_translation(
                a.matrix2 * wa + b.matrix2 * lambda,
                a.translation * wa + b.translation * lambda,
            ))
        }
        (AffineTransform::D3(a), AffineTransform::D3(b)) => {
            AffineTransform::D3(DAffine3::from_mat3_translation(
                a.matrix3 * wa + b.matrix3 * lambda,
                a.translation * wa + b.translation * lambda,
            ))
        }
        _ => unreachable!("interpolated models are checked for equal dimensionality"),
    }
}

impl TileModel {
    /// Identity model of the given family.
    pub fn new(family: ModelFamily, dim: Dimensionality) -> Self {
        match (family, dim) {
            (ModelFamily::Translation, Dimensionality::Two) => TileModel::Translation2D(DVec2::ZERO),
            (ModelFamily::Rigid, Dimensionality::Two) => TileModel::Rigid2D(DAffine2::IDENTITY),
            (ModelFamily::Similarity, Dimensionality::Two) => {
                TileModel::Similarity2D(DAffine2::IDENTITY)
            }
            (ModelFamily::Affine, Dimensionality::Two) => TileModel::Affine2D(DAffine2::IDENTITY),
            (ModelFamily::Translation, Dimensionality::Three) => {
                TileModel::Translation3D(DVec3::ZERO)
            }
            (ModelFamily::Rigid, Dimensionality::Three) => TileModel::Rigid3D(DAffine3::IDENTITY),
            (ModelFamily::Similarity, Dimensionality::Three) => {
                TileModel::Similarity3D(DAffine3::IDENTITY)
            }
            (ModelFamily::Affine, Dimensionality::Three) => TileModel::Affine3D(DAffine3::IDENTITY),
        }
    }

    /// Translation model of the given dimensionality.
    pub fn translation(dim: Dimensionality, t: DVec3) -> Self {
        match dim {
            Dimensionality::Two => TileModel::Translation2D(t.truncate()),
            Dimensionality::Three => TileModel::Translation3D(t),
        }
    }

    /// Interpolated composite `(1 - λ)·a + λ·b`.
    ///
    /// Fails with [`OptimizerError::ConfigurationMismatch`] when `a` and `b`
    /// do not share a dimensionality.
    pub fn interpolated(a: TileModel, b: TileModel, lambda: f64) -> Result<Self> {
        assert!(
            (0.0..=1.0).contains(&lambda),
            "Interpolation lambda must be in [0, 1], got {}",
            lambda
        );
        if a.dimensionality() != b.dimensionality() {
            return Err(OptimizerError::ConfigurationMismatch {
                expected: a.dimensionality(),
                found: b.dimensionality(),
                context: "interpolated model".to_string(),
            });
        }
        let blended = blend(&a.to_affine(), &b.to_affine(), lambda);
        Ok(TileModel::Interpolated(Box::new(InterpolatedModel {
            a,
            b,
            lambda,
            blended,
        })))
    }

    pub fn dimensionality(&self) -> Dimensionality {
        match self {
            TileModel::Translation2D(_)
            | TileModel::Rigid2D(_)
            | TileModel::Similarity2D(_)
            | TileModel::Affine2D(_) => Dimensionality::Two,
            TileModel::Translation3D(_)
            | TileModel::Rigid3D(_)
            | TileModel::Similarity3D(_)
            | TileModel::Affine3D(_) => Dimensionality::Three,
            TileModel::Interpolated(m) => m.a.dimensionality(),
        }
    }

    /// Base family, `None` for interpolated composites.
    pub fn family(&self) -> Option<ModelFamily> {
        match self {
            TileModel::Translation2D(_) | TileModel::Translation3D(_) => {
                Some(ModelFamily::Translation)
            }
            TileModel::Rigid2D(_) | TileModel::Rigid3D(_) => Some(ModelFamily::Rigid),
            TileModel::Similarity2D(_) | TileModel::Similarity3D(_) => Some(ModelFamily::Similarity),
            TileModel::Affine2D(_) | TileModel::Affine3D(_) => Some(ModelFamily::Affine),
            TileModel::Interpolated(_) => None,
        }
    }

    pub fn is_translation(&self) -> bool {
        self.family() == Some(ModelFamily::Translation)
    }

    /// Minimum number of point matches needed to determine the parameters.
    pub fn min_matches(&self) -> usize {
        match self {
            TileModel::Translation2D(_) | TileModel::Translation3D(_) => 1,
            TileModel::Rigid2D(_) | TileModel::Similarity2D(_) => 2,
            TileModel::Affine2D(_) => 3,
            TileModel::Rigid3D(_) | TileModel::Similarity3D(_) => 3,
            TileModel::Affine3D(_) => 4,
            TileModel::Interpolated(m) => m.a.min_matches().max(m.b.min_matches()),
        }
    }

    /// Model as an affine transform.
    pub fn to_affine(&self) -> AffineTransform {
        match self {
            TileModel::Translation2D(t) => AffineTransform::D2(DAffine2::from_translation(*t)),
            TileModel::Rigid2D(a) | TileModel::Similarity2D(a) | TileModel::Affine2D(a) => {
                AffineTransform::D2(*a)
            }
            TileModel::Translation3D(t) => AffineTransform::D3(DAffine3::from_translation(*t)),
            TileModel::Rigid3D(a) | TileModel::Similarity3D(a) | TileModel::Affine3D(a) => {
                AffineTransform::D3(*a)
            }
            TileModel::Interpolated(m) => m.blended,
        }
    }

    /// Translation component (z is zero for 2D models).
    pub fn translation_component(&self) -> DVec3 {
        match self.to_affine() {
            AffineTransform::D2(a) => a.translation.extend(0.0),
            AffineTransform::D3(a) => a.translation,
        }
    }

    /// Map a tile-local point into world space.
    #[inline]
    pub fn apply(&self, p: DVec3) -> DVec3 {
        match self {
            TileModel::Translation2D(t) => DVec3::new(p.x + t.x, p.y + t.y, 0.0),
            TileModel::Translation3D(t) => p + *t,
            TileModel::Rigid2D(a) | TileModel::Similarity2D(a) | TileModel::Affine2D(a) => {
                a.transform_point2(p.truncate()).extend(0.0)
            }
            TileModel::Rigid3D(a) | TileModel::Similarity3D(a) | TileModel::Affine3D(a) => {
                a.transform_point3(p)
            }
            TileModel::Interpolated(m) => m.blended.apply(p),
        }
    }

    /// Least-squares fit to the given correspondences, replacing the current
    /// parameters. On failure the model is left unchanged.
    pub fn fit(&mut self, correspondences: &[Correspondence]) -> std::result::Result<(), FitError> {
        let required = self.min_matches();
        if correspondences.len() < required {
            return Err(FitError::NotEnoughMatches {
                required,
                found: correspondences.len(),
            });
        }

        match self {
            TileModel::Translation2D(t) => *t = fit::fit_translation(correspondences)?.truncate(),
            TileModel::Translation3D(t) => *t = fit::fit_translation(correspondences)?,
            TileModel::Rigid2D(a) => *a = fit::fit_rigid_2d(correspondences)?,
            TileModel::Similarity2D(a) => *a = fit::fit_similarity_2d(correspondences)?,
            TileModel::Affine2D(a) => *a = fit::fit_affine_2d(correspondences)?,
            TileModel::Rigid3D(a) => *a = fit::fit_rigid_3d(correspondences)?,
            TileModel::Similarity3D(a) => *a = fit::fit_similarity_3d(correspondences)?,
            TileModel::Affine3D(a) => *a = fit::fit_affine_3d(correspondences)?,
            TileModel::Interpolated(m) => {
                let mut a = m.a.clone();
                let mut b = m.b.clone();
                a.fit(correspondences)?;
                b.fit(correspondences)?;
                m.a = a;
                m.b = b;
                m.interpolate();
            }
        }
        Ok(())
    }

    /// Reset the parameters so that the model represents exactly the
    /// translation carried by `source`: identity linear part plus that
    /// translation. Interpolated composites seed both sides and re-blend.
    ///
    /// `source` must be a translation model of the same dimensionality.
    pub fn seed_from_translation(&mut self, tile: usize, source: &TileModel) -> Result<()> {
        let t = match source {
            TileModel::Translation2D(t) => t.extend(0.0),
            TileModel::Translation3D(t) => *t,
            other => {
                return Err(OptimizerError::UnsupportedModelSeeding {
                    tile,
                    model: other.to_string(),
                });
            }
        };
        if source.dimensionality() != self.dimensionality() {
            return Err(OptimizerError::ConfigurationMismatch {
                expected: self.dimensionality(),
                found: source.dimensionality(),
                context: format!("translation seeding of tile {}", tile),
            });
        }

        match self {
            TileModel::Translation2D(v) => *v = t.truncate(),
            TileModel::Translation3D(v) => *v = t,
            TileModel::Rigid2D(a) | TileModel::Similarity2D(a) | TileModel::Affine2D(a) => {
                *a = DAffine2::from_translation(t.truncate())
            }
            TileModel::Rigid3D(a) | TileModel::Similarity3D(a) | TileModel::Affine3D(a) => {
                *a = DAffine3::from_translation(t)
            }
            TileModel::Interpolated(m) => {
                m.a.seed_from_translation(tile, source)?;
                m.b.seed_from_translation(tile, source)?;
                m.interpolate();
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self {
            TileModel::Translation2D(_) => "Translation2D",
            TileModel::Rigid2D(_) => "Rigid2D",
            TileModel::Similarity2D(_) => "Similarity2D",
            TileModel::Affine2D(_) => "Affine2D",
            TileModel::Translation3D(_) => "Translation3D",
            TileModel::Rigid3D(_) => "Rigid3D",
            TileModel::Similarity3D(_) => "Similarity3D",
            TileModel::Affine3D(_) => "Affine3D",
            TileModel::Interpolated(_) => "Interpolated",
        }
    }
}

impl std::fmt::Display for TileModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TileModel::Translation2D(t) => {
                write!(f, "{}(dx={:.2}, dy={:.2})", self.name(), t.x, t.y)
            }
            TileModel::Translation3D(t) => {
                write!(
                    f,
                    "{}(dx={:.2}, dy={:.2}, dz={:.2})",
                    self.name(),
                    t.x,
                    t.y,
                    t.z
                )
            }
            TileModel::Rigid2D(a) | TileModel::Similarity2D(a) | TileModel::Affine2D(a) => {
                let m = a.matrix2;
                write!(
                    f,
                    "{}([{:.4}, {:.4}, {:.2}; {:.4}, {:.4}, {:.2}])",
                    self.name(),
                    m.x_axis.x,
                    m.y_axis.x,
                    a.translation.x,
                    m.x_axis.y,
                    m.y_axis.y,
                    a.translation.y
                )
            }
            TileModel::Rigid3D(a) | TileModel::Similarity3D(a) | TileModel::Affine3D(a) => {
                let m = a.matrix3;
                write!(
                    f,
                    "{}([{:.4}, {:.4}, {:.4}, {:.2}; {:.4}, {:.4}, {:.4}, {:.2}; {:.4}, {:.4}, {:.4}, {:.2}])",
                    self.name(),
                    m.x_axis.x,
                    m.y_axis.x,
                    m.z_axis.x,
                    a.translation.x,
                    m.x_axis.y,
                    m.y_axis.y,
                    m.z_axis.y,
                    a.translation.y,
                    m.x_axis.z,
                    m.y_axis.z,
                    m.z_axis.z,
                    a.translation.z
                )
            }
            TileModel::Interpolated(m) => {
                write!(f, "{}({}, {}, lambda={})", self.name(), m.a, m.b, m.lambda)
            }
        }
    }
}
