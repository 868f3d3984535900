//! Summed-area tables over the valid samples of an amplitude raster.

use ndarray::{Array2, ArrayView2};

/// Sums of the valid samples inside a rectangle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowSums {
    pub sum: f64,
    pub sum_sq: f64,
    pub count: u64,
}

impl WindowSums {
    /// Mean and sample standard deviation, if at least two samples exist
    pub fn mean_std(&self) -> Option<(f64, f64)> {
        if self.count < 2 {
            return None;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        let variance = ((self.sum_sq - n * mean * mean) / (n - 1.0)).max(0.0);
        Some((mean, variance.sqrt()))
    }
}

impl std::ops::Sub for WindowSums {
    type Output = WindowSums;

    fn sub(self, rhs: WindowSums) -> WindowSums {
        WindowSums {
            sum: self.sum - rhs.sum,
            sum_sq: self.sum_sq - rhs.sum_sq,
            count: self.count.saturating_sub(rhs.count),
        }
    }
}

/// Inclusive summed-area table with a zero border row and column
pub struct SummedAreaTable {
    sum: Array2<f64>,
    sum_sq: Array2<f64>,
    count: Array2<u64>,
}

impl SummedAreaTable {
    /// Build over `image`, counting only pixels where `valid` is true
    pub fn build(image: &ArrayView2<f32>, valid: &ArrayView2<bool>) -> Self {
        let (rows, cols) = image.dim();
        let mut sum = Array2::<f64>::zeros((rows + 1, cols + 1));
        let mut sum_sq = Array2::<f64>::zeros((rows + 1, cols + 1));
        let mut count = Array2::<u64>::zeros((rows + 1, cols + 1));

        for r in 0..rows {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            let mut row_count = 0u64;
            for c in 0..cols {
                let v = image[[r, c]];
                if valid[[r, c]] && v.is_finite() {
                    let v = v as f64;
                    row_sum += v;
                    row_sq += v * v;
                    row_count += 1;
                }
                sum[[r + 1, c + 1]] = sum[[r, c + 1]] + row_sum;
                sum_sq[[r + 1, c + 1]] = sum_sq[[r, c + 1]] + row_sq;
                count[[r + 1, c + 1]] = count[[r, c + 1]] + row_count;
            }
        }

        Self { sum, sum_sq, count }
    }

    pub fn dim(&self) -> (usize, usize) {
        let (r, c) = self.sum.dim();
        (r - 1, c - 1)
    }

    /// Sums over rows `r0..=r1`, cols `c0..=c1`, clipped to the raster
    pub fn window(&self, r0: isize, c0: isize, r1: isize, c1: isize) -> WindowSums {
        let (rows, cols) = self.dim();
        let clip = |v: isize, max: usize| v.clamp(0, max as isize) as usize;
        let r0 = clip(r0, rows);
        let c0 = clip(c0, cols);
        let r1 = clip(r1 + 1, rows);
        let c1 = clip(c1 + 1, cols);
        if r1 <= r0 || c1 <= c0 {
            return WindowSums::default();
        }

        let area = |t: &Array2<f64>| t[[r1, c1]] - t[[r0, c1]] - t[[r1, c0]] + t[[r0, c0]];
        WindowSums {
            sum: area(&self.sum),
            sum_sq: area(&self.sum_sq),
            count: self.count[[r1, c1]] + self.count[[r0, c0]] - self.count[[r0, c1]] - self.count[[r1, c0]],
        }
    }

    /// Square window of half-size `radius` centred on (row, col)
    pub fn square(&self, row: usize, col: usize, radius: usize) -> WindowSums {
        let (r, c, h) = (row as isize, col as isize, radius as isize);
        self.window(r - h, c - h, r + h, c + h)
    }
}
