use super::*;
use glam::{DMat3, DQuat};
use std::f64::consts::PI;

fn grid_points_2d(rows: usize, cols: usize, spacing: f64) -> Vec<DVec3> {
    let mut points = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            points.push(DVec3::new(c as f64 * spacing, r as f64 * spacing, 0.0));
        }
    }
    points
}

fn cube_points(spacing: f64) -> Vec<DVec3> {
    let mut points = Vec::new();
    for z in 0..2 {
        for y in 0..2 {
            for x in 0..3 {
                points.push(DVec3::new(x as f64, y as f64, z as f64) * spacing);
            }
        }
    }
    points
}

fn correspondences(points: &[DVec3], transform: impl Fn(DVec3) -> DVec3) -> Vec<Correspondence> {
    points
        .iter()
        .map(|&p| Correspondence {
            source: p,
            target: transform(p),
            weight: 1.0,
        })
        .collect()
}

fn max_residual(model: &TileModel, correspondences: &[Correspondence]) -> f64 {
    correspondences
        .iter()
        .map(|c| (model.apply(c.source) - c.target).length())
        .fold(0.0, f64::max)
}

#[test]
fn translation_fit_is_weighted_mean_displacement() {
    let corr = vec![
        Correspondence {
            source: DVec3::new(0.0, 0.0, 0.0),
            target: DVec3::new(10.0, 0.0, 0.0),
            weight: 3.0,
        },
        Correspondence {
            source: DVec3::new(5.0, 5.0, 0.0),
            target: DVec3::new(9.0, 5.0, 0.0),
            weight: 1.0,
        },
    ];
    let mut model = TileModel::new(ModelFamily::Translation, Dimensionality::Two);
    model.fit(&corr).unwrap();

    // (3 * 10 + 1 * 4) / 4 = 8.5
    assert_eq!(model, TileModel::Translation2D(DVec2::new(8.5, 0.0)));
}

#[test]
fn rigid_2d_recovers_rotation_and_translation() {
    let truth = DAffine2::from_angle_translation(0.2, DVec2::new(15.0, -7.0));
    let corr = correspondences(&grid_points_2d(3, 3, 50.0), |p| {
        truth.transform_point2(p.truncate()).extend(0.0)
    });

    let mut model = TileModel::new(ModelFamily::Rigid, Dimensionality::Two);
    model.fit(&corr).unwrap();

    assert!(max_residual(&model, &corr) < 1e-9);
}

#[test]
fn similarity_2d_recovers_scale() {
    let truth =
        DAffine2::from_scale_angle_translation(DVec2::splat(1.05), -0.1, DVec2::new(3.0, 4.0));
    let corr = correspondences(&grid_points_2d(2, 3, 40.0), |p| {
        truth.transform_point2(p.truncate()).extend(0.0)
    });

    let mut model = TileModel::new(ModelFamily::Similarity, Dimensionality::Two);
    model.fit(&corr).unwrap();

    let TileModel::Similarity2D(a) = model else {
        panic!("fit must keep the model family");
    };
    let scale = a.matrix2.determinant().sqrt();
    assert!((scale - 1.05).abs() < 1e-9, "Expected scale=1.05, got {}", scale);
}

#[test]
fn affine_2d_recovers_shear() {
    let truth = DAffine2::from_cols_array(&[1.02, 0.03, -0.05, 0.98, 12.0, 8.0]);
    let corr = correspondences(&grid_points_2d(3, 3, 30.0), |p| {
        truth.transform_point2(p.truncate()).extend(0.0)
    });

    let mut model = TileModel::new(ModelFamily::Affine, Dimensionality::Two);
    model.fit(&corr).unwrap();

    assert!(max_residual(&model, &corr) < 1e-9);
}

#[test]
fn affine_2d_on_collinear_points_is_ill_defined() {
    let points: Vec<DVec3> = (0..3).map(|i| DVec3::new(i as f64 * 10.0, 0.0, 0.0)).collect();
    let corr = correspondences(&points, |p| p + DVec3::new(1.0, 1.0, 0.0));

    let mut model = TileModel::new(ModelFamily::Affine, Dimensionality::Two);
    let err = model.fit(&corr).unwrap_err();

    assert_eq!(err, FitError::IllDefined("singular normal equations"));
    assert_eq!(model, TileModel::Affine2D(DAffine2::IDENTITY));
}

#[test]
fn too_few_matches_is_reported() {
    let corr = correspondences(&grid_points_2d(1, 2, 10.0), |p| p);

    let mut model = TileModel::new(ModelFamily::Affine, Dimensionality::Three);
    assert_eq!(
        model.fit(&corr),
        Err(FitError::NotEnoughMatches {
            required: 4,
            found: 2
        })
    );
}

#[test]
fn rigid_3d_recovers_rotation() {
    let rotation = DQuat::from_euler(glam::EulerRot::XYZ, 0.1, -0.05, PI / 12.0);
    let truth = DAffine3::from_rotation_translation(rotation, DVec3::new(5.0, -2.0, 9.0));
    let corr = correspondences(&cube_points(20.0), |p| truth.transform_point3(p));

    let mut model = TileModel::new(ModelFamily::Rigid, Dimensionality::Three);
    model.fit(&corr).unwrap();

    assert!(max_residual(&model, &corr) < 1e-8);
}

#[test]
fn similarity_3d_fits_coplanar_points() {
    let truth = DAffine3::from_scale_rotation_translation(
        DVec3::splat(0.9),
        DQuat::from_rotation_z(0.3),
        DVec3::new(1.0, 2.0, 3.0),
    );
    let corr = correspondences(&grid_points_2d(3, 3, 25.0), |p| truth.transform_point3(p));

    let mut model = TileModel::new(ModelFamily::Similarity, Dimensionality::Three);
    model.fit(&corr).unwrap();

    assert!(max_residual(&model, &corr) < 1e-8);
}

#[test]
fn affine_3d_recovers_general_matrix() {
    let linear = DMat3::from_cols_array(&[1.01, 0.02, 0.0, -0.03, 0.97, 0.01, 0.0, 0.02, 1.1]);
    let truth = DAffine3::from_mat3_translation(linear, DVec3::new(-4.0, 6.0, 2.0));
    let corr = correspondences(&cube_points(30.0), |p| truth.transform_point3(p));

    let mut model = TileModel::new(ModelFamily::Affine, Dimensionality::Three);
    model.fit(&corr).unwrap();

    assert!(max_residual(&model, &corr) < 1e-8);
}

#[test]
fn interpolated_model_blends_both_sides() {
    let a = TileModel::new(ModelFamily::Affine, Dimensionality::Two);
    let b = TileModel::new(ModelFamily::Translation, Dimensionality::Two);
    let mut model = TileModel::interpolated(a, b, 0.25).unwrap();

    // Pure scaling about the origin: affine fits it exactly, translation
    // finds the mean displacement.
    let corr = correspondences(&grid_points_2d(2, 2, 10.0), |p| p * 2.0);
    model.fit(&corr).unwrap();

    let TileModel::Interpolated(m) = &model else {
        panic!("expected interpolated model");
    };
    let mean_shift = DVec2::new(5.0, 5.0);
    let expected_linear = 0.75 * 2.0 + 0.25 * 1.0;
    let AffineTransform::D2(blended) = m.blended() else {
        panic!("expected 2D blend");
    };
    assert!((blended.matrix2.x_axis.x - expected_linear).abs() < 1e-12);
    assert!((blended.translation - mean_shift * 0.25).length() < 1e-12);
    assert_eq!(model.min_matches(), 3);
}

#[test]
fn interpolated_model_rejects_mixed_dimensionality() {
    let a = TileModel::new(ModelFamily::Affine, Dimensionality::Three);
    let b = TileModel::new(ModelFamily::Translation, Dimensionality::Two);

    let err = TileModel::interpolated(a, b, 0.1).unwrap_err();
    assert!(matches!(
        err,
        OptimizerError::ConfigurationMismatch {
            expected: Dimensionality::Three,
            found: Dimensionality::Two,
            ..
        }
    ));
}

#[test]
fn seeding_produces_pure_translation() {
    let source = TileModel::translation(Dimensionality::Two, DVec3::new(100.0, -20.0, 0.0));

    for family in [
        ModelFamily::Translation,
        ModelFamily::Rigid,
        ModelFamily::Similarity,
        ModelFamily::Affine,
    ] {
        let mut model = TileModel::new(family, Dimensionality::Two);
        if let TileModel::Affine2D(a) = &mut model {
            *a = DAffine2::from_scale(DVec2::splat(3.0));
        }
        model.seed_from_translation(0, &source).unwrap();

        let p = DVec3::new(7.0, 11.0, 0.0);
        assert_eq!(model.apply(p), DVec3::new(107.0, -9.0, 0.0), "{:?}", family);
        assert_eq!(model.family(), Some(family));
    }
}

#[test]
fn seeding_interpolated_reblends() {
    let a = TileModel::new(ModelFamily::Affine, Dimensionality::Three);
    let b = TileModel::new(ModelFamily::Rigid, Dimensionality::Three);
    let mut model = TileModel::interpolated(a, b, 0.5).unwrap();
    let source = TileModel::translation(Dimensionality::Three, DVec3::new(1.0, 2.0, 3.0));

    model.seed_from_translation(4, &source).unwrap();

    assert_eq!(model.translation_component(), DVec3::new(1.0, 2.0, 3.0));
    assert_eq!(model.apply(DVec3::ONE), DVec3::new(2.0, 3.0, 4.0));
}

#[test]
fn seeding_from_non_translation_is_unsupported() {
    let mut model = TileModel::new(ModelFamily::Affine, Dimensionality::Two);
    let source = TileModel::new(ModelFamily::Rigid, Dimensionality::Two);

    let err = model.seed_from_translation(9, &source).unwrap_err();
    assert!(matches!(
        err,
        OptimizerError::UnsupportedModelSeeding { tile: 9, .. }
    ));
}

#[test]
fn seeding_across_dimensionality_is_a_mismatch() {
    let mut model = TileModel::new(ModelFamily::Rigid, Dimensionality::Three);
    let source = TileModel::translation(Dimensionality::Two, DVec3::X);

    let err = model.seed_from_translation(1, &source).unwrap_err();
    assert!(matches!(err, OptimizerError::ConfigurationMismatch { .. }));
}

#[test]
fn display_shows_parameters() {
    let model = TileModel::translation(Dimensionality::Two, DVec3::new(1.5, -2.25, 0.0));
    assert_eq!(model.to_string(), "Translation2D(dx=1.50, dy=-2.25)");
}
