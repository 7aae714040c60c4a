//! The bed-height correction grid.
//!
//! The bed is split into `divisions` cells along each axis, and the grid holds one
//! sample at every cell corner, so `divisions + 1` samples per axis. A sample of
//! zero means that corner has not been calibrated.

/// The largest number of divisions per axis.
pub const MAX_DIVISIONS: usize = 16;

const SAMPLES: usize = MAX_DIVISIONS + 1;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BedGrid {
    max_x: f32,
    max_y: f32,
    divisions_x: usize,
    divisions_y: usize,
    // Indexed as `samples[x][y]`.
    samples: [[f32; SAMPLES]; SAMPLES],
}

impl BedGrid {
    /// An empty grid covering `[0, max_x] x [0, max_y]`, with three divisions per axis.
    pub fn new(max_x: f32, max_y: f32) -> Self {
        BedGrid {
            max_x,
            max_y,
            divisions_x: 3,
            divisions_y: 3,
            samples: [[0.0; SAMPLES]; SAMPLES],
        }
    }

    pub fn divisions(&self) -> (usize, usize) {
        (self.divisions_x, self.divisions_y)
    }

    /// Sets the number of divisions along each axis, keeping the samples.
    /// Values are clamped to `1..=MAX_DIVISIONS`.
    pub fn set_divisions(&mut self, x: usize, y: usize) {
        self.divisions_x = x.clamp(1, MAX_DIVISIONS);
        self.divisions_y = y.clamp(1, MAX_DIVISIONS);
    }

    /// The size of one cell, in mm.
    pub fn step(&self) -> (f32, f32) {
        (
            self.max_x / self.divisions_x as f32,
            self.max_y / self.divisions_y as f32,
        )
    }

    pub fn size(&self) -> (f32, f32) {
        (self.max_x, self.max_y)
    }

    pub fn clear(&mut self) {
        self.samples = [[0.0; SAMPLES]; SAMPLES];
    }

    /// The sample index nearest below a bed position, clamped into the grid.
    pub fn index_of(&self, x: f32, y: f32) -> (usize, usize) {
        (
            clamp_index(x / self.max_x * self.divisions_x as f32, self.divisions_x),
            clamp_index(y / self.max_y * self.divisions_y as f32, self.divisions_y),
        )
    }

    pub fn sample(&self, ix: usize, iy: usize) -> f32 {
        self.samples[ix.min(self.divisions_x)][iy.min(self.divisions_y)]
    }

    /// Stores `z` as the sample for the grid point at (or just below) `(x, y)`.
    /// Returns the indices that were written.
    pub fn capture(&mut self, x: f32, y: f32, z: f32) -> (usize, usize) {
        let (ix, iy) = self.index_of(x, y);
        self.samples[ix][iy] = z;
        (ix, iy)
    }

    /// The sample at (or just below) a bed position.
    pub fn sample_at(&self, x: f32, y: f32) -> f32 {
        let (ix, iy) = self.index_of(x, y);
        self.samples[ix][iy]
    }

    /// The Z correction at a bed position, bilinearly interpolated from the
    /// four surrounding samples. Zero outside the bed.
    ///
    /// The fractional position inside the cell comes from the coordinate truncated
    /// to whole millimetres. Along the top and right edges the "next" sample would
    /// be outside the grid, so the edge sample is used again.
    pub fn height_correction(&self, x: f32, y: f32) -> f32 {
        if !(0.0..=self.max_x).contains(&x) || !(0.0..=self.max_y).contains(&y) {
            return 0.0;
        }
        let (step_x, step_y) = self.step();

        let cx = clamp_index(x / step_x, self.divisions_x);
        let cy = clamp_index(y / step_y, self.divisions_y);
        let fx = trunc(x) / step_x - cx as f32;
        let fy = trunc(y) / step_y - cy as f32;
        let nx = (cx + 1).min(self.divisions_x);
        let ny = (cy + 1).min(self.divisions_y);

        let s = &self.samples;
        let lower = (1.0 - fx) * s[cx][cy] + fx * s[nx][cy];
        let upper = (1.0 - fx) * s[cx][ny] + fx * s[nx][ny];
        lower + fy * (upper - lower)
    }

    /// The live samples, one row per Y index.
    pub fn rows(&self) -> impl Iterator<Item = impl Iterator<Item = f32> + '_> + '_ {
        (0..=self.divisions_y).map(move |iy| (0..=self.divisions_x).map(move |ix| self.samples[ix][iy]))
    }
}

fn trunc(x: f32) -> f32 {
    libm::truncf(x)
}

// Negative coordinates never get here, so the cast only truncates.
fn clamp_index(scaled: f32, divisions: usize) -> usize {
    if scaled <= 0.0 {
        0
    } else {
        (scaled as usize).min(divisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tilted() -> BedGrid {
        let mut grid = BedGrid::new(200.0, 200.0);
        grid.set_divisions(2, 2);
        for ix in 0..=2 {
            for iy in 0..=2 {
                grid.samples[ix][iy] = ix as f32 * 0.1 + iy as f32 * 0.2;
            }
        }
        grid
    }

    #[test]
    fn outside_bed_is_zero() {
        let grid = tilted();
        assert_eq!(grid.height_correction(-0.5, 10.0), 0.0);
        assert_eq!(grid.height_correction(10.0, 200.5), 0.0);
        assert_eq!(grid.height_correction(250.0, 250.0), 0.0);
    }

    #[test]
    fn corners_and_midpoints() {
        let grid = tilted();
        assert!((grid.height_correction(0.0, 0.0) - 0.0).abs() < 1e-6);
        assert!((grid.height_correction(100.0, 0.0) - 0.1).abs() < 1e-6);
        assert!((grid.height_correction(50.0, 0.0) - 0.05).abs() < 1e-6);
        assert!((grid.height_correction(100.0, 150.0) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn top_right_edge_reads_edge_sample() {
        let grid = tilted();
        assert!((grid.height_correction(200.0, 200.0) - 0.6).abs() < 1e-6);
        assert!((grid.height_correction(200.0, 0.0) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn fraction_uses_truncated_coordinate() {
        let grid = tilted();
        assert_eq!(grid.height_correction(50.9, 0.0), grid.height_correction(50.0, 0.0));
    }

    #[test]
    fn capture_writes_nearest_lower_point() {
        let mut grid = BedGrid::new(200.0, 200.0);
        assert_eq!(grid.capture(67.6, 1.0, -0.3), (1, 0));
        assert_eq!(grid.sample(1, 0), -0.3);
        assert_eq!(grid.sample_at(67.6, 1.0), -0.3);
        // Far corner, past the last index.
        assert_eq!(grid.capture(200.0, 200.0, 0.7), (3, 3));
        grid.clear();
        assert_eq!(grid.sample(3, 3), 0.0);
    }

    #[test]
    fn rows_cover_live_samples() {
        let grid = tilted();
        let rows: Vec<Vec<f32>> = grid.rows().map(|r| r.collect()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].len(), 3);
        assert!((rows[2][1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn divisions_are_bounded() {
        let mut grid = BedGrid::new(200.0, 200.0);
        grid.set_divisions(0, 40);
        assert_eq!(grid.divisions(), (1, MAX_DIVISIONS));
    }

    proptest! {
        #[test]
        fn cleared_grid_is_flat(x in -10.0..210.0f32, y in -10.0..210.0f32, dx in 1usize..=16, dy in 1usize..=16) {
            let mut grid = tilted();
            grid.set_divisions(dx, dy);
            grid.clear();
            prop_assert_eq!(grid.height_correction(x, y), 0.0);
        }

        #[test]
        fn correction_is_repeatable(x in 0.0..=200.0f32, y in 0.0..=200.0f32) {
            let grid = tilted();
            let a = grid.height_correction(x, y);
            let b = grid.height_correction(x, y);
            prop_assert_eq!(a.to_bits(), b.to_bits());
        }
    }
}
