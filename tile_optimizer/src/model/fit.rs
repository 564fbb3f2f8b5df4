//! Weighted least-squares estimators for every model family.
//!
//! Pure geometry / linear algebra: each function maps `source` points onto
//! `target` points, minimising the weighted sum of squared residuals.

use glam::{DAffine2, DAffine3, DMat2, DMat3, DVec2, DVec3};
use nalgebra::{Matrix2, Matrix3, SVD};

use crate::error::FitError;
use crate::model::Correspondence;

/// Relative threshold on determinants / singular values below which a
/// system is treated as singular.
const SINGULAR_EPS: f64 = 1e-10;

struct Centered {
    source_centroid: DVec3,
    target_centroid: DVec3,
    total_weight: f64,
}

fn weighted_centroids(correspondences: &[Correspondence]) -> Result<Centered, FitError> {
    let mut source = DVec3::ZERO;
    let mut target = DVec3::ZERO;
    let mut total_weight = 0.0;

    for c in correspondences {
        source += c.source * c.weight;
        target += c.target * c.weight;
        total_weight += c.weight;
    }

    if total_weight <= 0.0 || !total_weight.is_finite() {
        return Err(FitError::IllDefined("total match weight is not positive"));
    }

    Ok(Centered {
        source_centroid: source / total_weight,
        target_centroid: target / total_weight,
        total_weight,
    })
}

/// Weighted mean displacement.
pub(crate) fn fit_translation(correspondences: &[Correspondence]) -> Result<DVec3, FitError> {
    let c = weighted_centroids(correspondences)?;
    Ok(c.target_centroid - c.source_centroid)
}

/// Rotation (+ optional uniform scale) in 2D.
///
/// Closed-form Procrustes on centred coordinates: the optimal angle is
/// `atan2(Σ w·(s×t), Σ w·(s·t))`.
fn fit_rotation_2d(
    correspondences: &[Correspondence],
    with_scale: bool,
) -> Result<DAffine2, FitError> {
    let c = weighted_centroids(correspondences)?;
    let sc = c.source_centroid.truncate();
    let tc = c.target_centroid.truncate();

    let mut dot = 0.0;
    let mut cross = 0.0;
    let mut source_var = 0.0;
    for corr in correspondences {
        let s = corr.source.truncate() - sc;
        let t = corr.target.truncate() - tc;
        dot += corr.weight * s.dot(t);
        cross += corr.weight * s.perp_dot(t);
        source_var += corr.weight * s.length_squared();
    }

    if source_var <= SINGULAR_EPS * c.total_weight {
        return Err(FitError::IllDefined("source points coincide"));
    }
    let norm = (dot * dot + cross * cross).sqrt();
    if norm <= SINGULAR_EPS * c.total_weight {
        return Err(FitError::IllDefined("rotation is undetermined"));
    }

    let angle = cross.atan2(dot);
    let scale = if with_scale { norm / source_var } else { 1.0 };
    let linear = DMat2::from_angle(angle) * scale;
    let translation = tc - linear * sc;

    Ok(DAffine2::from_mat2_translation(linear, translation))
}

pub(crate) fn fit_rigid_2d(correspondences: &[Correspondence]) -> Result<DAffine2, FitError> {
    fit_rotation_2d(correspondences, false)
}

pub(crate) fn fit_similarity_2d(correspondences: &[Correspondence]) -> Result<DAffine2, FitError> {
    fit_rotation_2d(correspondences, true)
}

/// Full 2D affine via weighted normal equations on centred coordinates.
pub(crate) fn fit_affine_2d(correspondences: &[Correspondence]) -> Result<DAffine2, FitError> {
    let c = weighted_centroids(correspondences)?;
    let sc = c.source_centroid.truncate();
    let tc = c.target_centroid.truncate();

    let mut ss = Matrix2::<f64>::zeros();
    let mut st = Matrix2::<f64>::zeros();
    for corr in correspondences {
        let s = corr.source.truncate() - sc;
        let t = corr.target.truncate() - tc;
        let s = nalgebra::Vector2::new(s.x, s.y);
        let t = nalgebra::Vector2::new(t.x, t.y);
        ss += corr.weight * s * s.transpose();
        st += corr.weight * s * t.transpose();
    }

    let scale = ss.trace();
    if scale <= 0.0 || ss.determinant().abs() <= SINGULAR_EPS * scale * scale {
        return Err(FitError::IllDefined("singular normal equations"));
    }
    let ss_inv = ss
        .try_inverse()
        .ok_or(FitError::IllDefined("singular normal equations"))?;
    let a = (ss_inv * st).transpose();

    let linear = DMat2::from_cols(
        DVec2::new(a[(0, 0)], a[(1, 0)]),
        DVec2::new(a[(0, 1)], a[(1, 1)]),
    );
    let translation = tc - linear * sc;

    Ok(DAffine2::from_mat2_translation(linear, translation))
}

fn to_dmat3(m: &Matrix3<f64>) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(m[(0, 0)], m[(1, 0)], m[(2, 0)]),
        DVec3::new(m[(0, 1)], m[(1, 1)], m[(2, 1)]),
        DVec3::new(m[(0, 2)], m[(1, 2)], m[(2, 2)]),
    )
}

fn to_vector3(v: DVec3) -> nalgebra::Vector3<f64> {
    nalgebra::Vector3::new(v.x, v.y, v.z)
}

/// Rotation (+ optional uniform scale) in 3D.
///
/// Weighted Kabsch / Umeyama: `H = Σ w·s·tᵀ = U Σ Vᵀ`, `R = V D Uᵀ`, where
/// `D` flips the axis of the smallest singular value if needed to keep a
/// proper rotation.
fn fit_rotation_3d(
    correspondences: &[Correspondence],
    with_scale: bool,
) -> Result<DAffine3, FitError> {
    let c = weighted_centroids(correspondences)?;

    let mut h = Matrix3::<f64>::zeros();
    let mut source_var = 0.0;
    for corr in correspondences {
        let s = to_vector3(corr.source - c.source_centroid);
        let t = to_vector3(corr.target - c.target_centroid);
        h += corr.weight * s * t.transpose();
        source_var += corr.weight * s.norm_squared();
    }

    if source_var <= SINGULAR_EPS * c.total_weight {
        return Err(FitError::IllDefined("source points coincide"));
    }

    let svd = SVD::new(h, true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(FitError::IllDefined("singular value decomposition failed"));
    };
    let sigma = svd.singular_values;

    // Rotation about a line is free when all points are collinear: two
    // singular values vanish.
    let mut sorted = [sigma[0], sigma[1], sigma[2]];
    sorted.sort_by(|a, b| b.total_cmp(a));
    if sorted[1] <= SINGULAR_EPS * sorted[0].max(f64::MIN_POSITIVE) {
        return Err(FitError::IllDefined("points are collinear"));
    }

    let v = v_t.transpose();
    let ut = u.transpose();
    let reflection = (v * ut).determinant() < 0.0;
    let mut d = Matrix3::<f64>::identity();
    if reflection {
        let smallest = (0..3)
            .min_by(|&a, &b| sigma[a].total_cmp(&sigma[b]))
            .unwrap_or(2);
        d[(smallest, smallest)] = -1.0;
    }
    let rotation = v * d * ut;

    let scale = if with_scale {
        let trace: f64 = (0..3).map(|i| sigma[i] * d[(i, i)]).sum();
        trace / source_var
    } else {
        1.0
    };
    if scale <= 0.0 || !scale.is_finite() {
        return Err(FitError::IllDefined("non-positive scale"));
    }

    let linear = to_dmat3(&rotation) * scale;
    let translation = c.target_centroid - linear * c.source_centroid;

    Ok(DAffine3::from_mat3_translation(linear, translation))
}

pub(crate) fn fit_rigid_3d(correspondences: &[Correspondence]) -> Result<DAffine3, FitError> {
    fit_rotation_3d(correspondences, false)
}

pub(crate) fn fit_similarity_3d(correspondences: &[Correspondence]) -> Result<DAffine3, FitError> {
    fit_rotation_3d(correspondences, true)
}

/// Full 3D affine via weighted normal equations on centred coordinates.
pub(crate) fn fit_affine_3d(correspondences: &[Correspondence]) -> Result<DAffine3, FitError> {
    let c = weighted_centroids(correspondences)?;

    let mut ss = Matrix3::<f64>::zeros();
    let mut st = Matrix3::<f64>::zeros();
    for corr in correspondences {
        let s = to_vector3(corr.source - c.source_centroid);
        let t = to_vector3(corr.target - c.target_centroid);
        ss += corr.weight * s * s.transpose();
        st += corr.weight * s * t.transpose();
    }

    let scale = ss.trace();
    if scale <= 0.0 || ss.determinant().abs() <= SINGULAR_EPS * scale * scale * scale {
        return Err(FitError::IllDefined("singular normal equations"));
    }
    let ss_inv = ss
        .try_inverse()
        .ok_or(FitError::IllDefined("singular normal equations"))?;
    let a = (ss_inv * st).transpose();

    let linear = to_dmat3(&a);
    let translation = c.target_centroid - linear * c.source_centroid;

    Ok(DAffine3::from_mat3_translation(linear, translation))
}
