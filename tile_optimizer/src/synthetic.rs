//! Synthetic tile grids with known ground truth.
//!
//! Tiles sit on a regular grid; every pair of axis-neighbours overlaps by
//! `overlap` and is matched through one sub-tile per half of the shared face
//! (two sub-tiles per pair in 2D, four in 3D). Estimated transforms carry a
//! deterministic stage error that the measured offsets correct, so the exact
//! solution places tile `i` at [`TileGrid::position`]`(i)` relative to
//! tile 0.

use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::geometry::{AffineTransform, Dimensionality, Interval, SubTile};
use crate::graph::PairwiseMatch;

#[derive(Debug, Clone)]
pub struct TileGrid {
    pub dim: Dimensionality,
    /// Tiles along x, y, z (z is 1 for 2D grids).
    pub shape: [usize; 3],
    pub spacing: f64,
    pub overlap: f64,
    /// Magnitude of the stage error baked into the estimated transforms.
    pub stage_error: f64,
    /// Uniform offset noise amplitude and RNG seed.
    pub noise: Option<(f64, u64)>,
    /// Index of the first tile.
    pub first_index: usize,
}

impl TileGrid {
    pub fn new_2d(cols: usize, rows: usize, spacing: f64) -> Self {
        Self {
            dim: Dimensionality::Two,
            shape: [cols, rows, 1],
            spacing,
            overlap: spacing * 0.1,
            stage_error: spacing * 0.02,
            noise: None,
            first_index: 0,
        }
    }

    pub fn new_3d(nx: usize, ny: usize, nz: usize, spacing: f64) -> Self {
        Self {
            dim: Dimensionality::Three,
            shape: [nx, ny, nz],
            ..Self::new_2d(nx, ny, spacing)
        }
    }

    pub fn with_noise(mut self, amplitude: f64, seed: u64) -> Self {
        self.noise = Some((amplitude, seed));
        self
    }

    pub fn with_first_index(mut self, first_index: usize) -> Self {
        self.first_index = first_index;
        self
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        self.first_index + x + y * self.shape[0] + z * self.shape[0] * self.shape[1]
    }

    fn grid_coords(&self, index: usize) -> [usize; 3] {
        let local = index - self.first_index;
        [
            local % self.shape[0],
            (local / self.shape[0]) % self.shape[1],
            local / (self.shape[0] * self.shape[1]),
        ]
    }

    /// True position of a tile's origin in world space.
    pub fn position(&self, index: usize) -> DVec3 {
        let [x, y, z] = self.grid_coords(index);
        DVec3::new(x as f64, y as f64, z as f64) * self.spacing
    }

    /// Position the stage reported for a tile.
    pub fn estimated_position(&self, index: usize) -> DVec3 {
        let i = index as f64;
        let error = DVec3::new((i * 1.7).sin(), (i * 2.3).cos(), (i * 0.9).sin());
        self.dim
            .project(self.position(index) + error * self.stage_error)
    }

    pub fn tile_size(&self) -> f64 {
        self.spacing + self.overlap
    }

    pub fn matches(&self) -> Vec<PairwiseMatch> {
        let mut rng = self.noise.map(|(_, seed)| StdRng::seed_from_u64(seed));
        let axes = self.dim.count();
        let half = self.tile_size() * 0.5;
        let mut matches = Vec::new();

        for fixed in self.first_index..self.first_index + self.len() {
            let coords = self.grid_coords(fixed);
            for axis in 0..axes {
                if coords[axis] + 1 >= self.shape[axis] {
                    continue;
                }
                let mut neighbor = coords;
                neighbor[axis] += 1;
                let moving = self.index(neighbor[0], neighbor[1], neighbor[2]);

                let others: Vec<usize> = (0..axes).filter(|&a| a != axis).collect();
                for combo in 0..(1usize << others.len()) {
                    let mut min = DVec3::ZERO;
                    let mut size = DVec3::ZERO;
                    size[axis] = self.overlap;
                    for (bit, &other) in others.iter().enumerate() {
                        min[other] = ((combo >> bit) & 1) as f64 * half;
                        size[other] = half;
                    }
                    let moving_bounds = Interval::new(min, size);
                    let mut fixed_min = min;
                    fixed_min[axis] = self.spacing;
                    let fixed_bounds = Interval::new(fixed_min, size);

                    let mut offset = (self.position(moving) - self.position(fixed))
                        - (self.estimated_position(moving) - self.estimated_position(fixed));
                    if let (Some(rng), Some((amplitude, _))) = (rng.as_mut(), self.noise) {
                        offset += DVec3::new(
                            rng.random_range(-amplitude..=amplitude),
                            rng.random_range(-amplitude..=amplitude),
                            rng.random_range(-amplitude..=amplitude),
                        );
                    }

                    matches.push(
                        PairwiseMatch::new(
                            self.dim,
                            SubTile::new(fixed, fixed_bounds),
                            SubTile::new(moving, moving_bounds),
                            self.dim.project(offset),
                            1.0,
                        )
                        .with_transforms(
                            AffineTransform::from_translation(
                                self.dim,
                                self.estimated_position(fixed),
                            ),
                            AffineTransform::from_translation(
                                self.dim,
                                self.estimated_position(moving),
                            ),
                        ),
                    );
                }
            }
        }
        matches
    }
}
