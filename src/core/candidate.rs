//! Candidate detection: connected exceedance regions with local statistics.

use crate::core::cfar::{CellState, ClutterMap};
use crate::types::{SarError, SarResult};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Cap used when the background spread at the peak is exactly zero
const MAX_CONTRAST: f64 = 1e6;

/// Candidate detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateParams {
    /// Regions smaller than this many resolution cells are dropped
    pub min_resolution_cells: f64,
    /// Contrast margin above k giving confidence 1 - 1/e
    pub contrast_scale: f64,
    /// Weight of region coherence in the initial confidence
    pub coherence_weight: f64,
}

impl Default for CandidateParams {
    fn default() -> Self {
        Self {
            min_resolution_cells: 1.0,
            contrast_scale: 4.0,
            coherence_weight: 0.3,
        }
    }
}

impl CandidateParams {
    pub fn validate(&self) -> SarResult<()> {
        if !(self.min_resolution_cells >= 0.0) {
            return Err(SarError::InvalidParameters("min resolution cells must be non-negative".to_string()));
        }
        if !(self.contrast_scale > 0.0) {
            return Err(SarError::InvalidParameters("contrast scale must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.coherence_weight) {
            return Err(SarError::InvalidParameters("coherence weight must lie in [0, 1]".to_string()));
        }
        Ok(())
    }
}

/// A connected set of candidate pixels and its local statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRegion {
    /// Member pixels (row, col), row-major order
    pub pixels: Vec<(usize, usize)>,
    /// Mean pixel index (row, col); pixel centres sit on integers
    pub centroid: (f64, f64),
    /// Inclusive (min_row, min_col, max_row, max_col)
    pub bounds: (usize, usize, usize, usize),
    pub peak_amplitude: f32,
    pub peak_position: (usize, usize),
    /// Mean local background over the region
    pub background_mean: f32,
    /// Local background spread at the peak
    pub background_std: f32,
    pub threshold_at_peak: f32,
    /// (peak - background mean) / background std
    pub contrast: f64,
    /// Exceeding pixels over the hole-filled region area
    pub coherence: f64,
    pub confidence: f64,
}

impl CandidateRegion {
    pub fn area(&self) -> usize {
        self.pixels.len()
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.pixels.binary_search(&(row, col)).is_ok()
    }
}

/// 8-connected components of `mask`, in global coordinates offset by `origin`.
///
/// Regions are returned in order of their first pixel in row-major scan,
/// each with its pixels sorted row-major.
pub fn label_regions(mask: &ArrayView2<bool>, origin: (usize, usize)) -> Vec<Vec<(usize, usize)>> {
    let (rows, cols) = mask.dim();
    let mut visited = Array2::from_elem((rows, cols), false);
    let mut regions = Vec::new();
    let mut queue = VecDeque::new();

    for r in 0..rows {
        for c in 0..cols {
            if !mask[[r, c]] || visited[[r, c]] {
                continue;
            }
            visited[[r, c]] = true;
            queue.push_back((r, c));
            let mut pixels = Vec::new();

            while let Some((pr, pc)) = queue.pop_front() {
                pixels.push((pr + origin.0, pc + origin.1));
                for dr in -1isize..=1 {
                    for dc in -1isize..=1 {
                        if dr == 0 && dc == 0 {
                            continue;
                        }
                        let nr = pr as isize + dr;
                        let nc = pc as isize + dc;
                        if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                            continue;
                        }
                        let (nr, nc) = (nr as usize, nc as usize);
                        if mask[[nr, nc]] && !visited[[nr, nc]] {
                            visited[[nr, nc]] = true;
                            queue.push_back((nr, nc));
                        }
                    }
                }
            }

            pixels.sort_unstable();
            regions.push(pixels);
        }
    }

    regions
}

/// Inclusive bounding box of a non-empty pixel list
pub fn pixel_bounds(pixels: &[(usize, usize)]) -> (usize, usize, usize, usize) {
    pixels.iter().fold(
        (usize::MAX, usize::MAX, 0, 0),
        |(r0, c0, r1, c1), &(r, c)| (r0.min(r), c0.min(c), r1.max(r), c1.max(c)),
    )
}

/// Area of the region with interior holes filled
pub fn filled_area(pixels: &[(usize, usize)]) -> usize {
    if pixels.is_empty() {
        return 0;
    }
    let (r0, c0, r1, c1) = pixel_bounds(pixels);
    // One pixel of padding so the exterior is connected around the region
    let h = r1 - r0 + 3;
    let w = c1 - c0 + 3;
    let mut member = Array2::from_elem((h, w), false);
    for &(r, c) in pixels {
        member[[r - r0 + 1, c - c0 + 1]] = true;
    }

    let mut exterior = Array2::from_elem((h, w), false);
    let mut queue = VecDeque::from([(0usize, 0usize)]);
    exterior[[0, 0]] = true;
    let mut outside = 0usize;
    while let Some((r, c)) = queue.pop_front() {
        outside += 1;
        let neighbours = [
            (r.wrapping_sub(1), c),
            (r + 1, c),
            (r, c.wrapping_sub(1)),
            (r, c + 1),
        ];
        for (nr, nc) in neighbours {
            if nr < h && nc < w && !member[[nr, nc]] && !exterior[[nr, nc]] {
                exterior[[nr, nc]] = true;
                queue.push_back((nr, nc));
            }
        }
    }
    h * w - outside
}

/// Converts exceedances into described candidate regions
#[derive(Debug, Clone)]
pub struct CandidateDetector {
    params: CandidateParams,
    k: f64,
    resolution_cell_px: f64,
}

impl CandidateDetector {
    /// `k` is the CFAR threshold multiplier, `resolution_cell_px` the area
    /// of one sensor resolution cell in pixels
    pub fn new(params: CandidateParams, k: f64, resolution_cell_px: f64) -> SarResult<Self> {
        params.validate()?;
        if !(resolution_cell_px.is_finite() && resolution_cell_px > 0.0) {
            return Err(SarError::InvalidParameters(format!(
                "resolution cell area must be positive, got {}",
                resolution_cell_px
            )));
        }
        Ok(Self {
            params,
            k,
            resolution_cell_px,
        })
    }

    /// Minimum region area in pixels
    pub fn min_area_px(&self) -> f64 {
        self.params.min_resolution_cells * self.resolution_cell_px
    }

    /// Initial confidence, non-decreasing in contrast for a fixed region
    pub fn confidence(&self, contrast: f64, coherence: f64) -> f64 {
        let margin = (contrast - self.k).max(0.0);
        let strength = 1.0 - (-margin / self.params.contrast_scale).exp();
        let shape = 1.0 - self.params.coherence_weight * (1.0 - coherence.clamp(0.0, 1.0));
        (strength * shape).clamp(0.0, 1.0)
    }

    /// Label every exceedance of the clutter map and describe the regions
    pub fn detect(&self, amplitude: &ArrayView2<f32>, clutter: &ClutterMap) -> Vec<CandidateRegion> {
        let exceedance = clutter.exceedance();
        let regions = label_regions(&exceedance.view(), (0, 0));
        let total = regions.len();
        let described: Vec<CandidateRegion> = regions
            .into_iter()
            .filter_map(|pixels| self.describe(pixels, amplitude, clutter))
            .collect();
        log::debug!(
            "Candidate detection: {} regions, {} after degenerate-region removal",
            total,
            described.len()
        );
        described
    }

    /// Attach statistics to a labelled region; `None` for degenerate regions
    pub fn describe(
        &self,
        pixels: Vec<(usize, usize)>,
        amplitude: &ArrayView2<f32>,
        clutter: &ClutterMap,
    ) -> Option<CandidateRegion> {
        if pixels.is_empty() || (pixels.len() as f64) < self.min_area_px() {
            return None;
        }

        let n = pixels.len() as f64;
        let mut sum_r = 0.0;
        let mut sum_c = 0.0;
        let mut peak = f32::NEG_INFINITY;
        let mut peak_position = pixels[0];
        let mut bg_sum = 0.0;
        let mut bg_count = 0usize;
        let mut exceeding = 0usize;

        for &(r, c) in &pixels {
            sum_r += r as f64;
            sum_c += c as f64;
            let value = amplitude[[r, c]];
            if value > peak {
                peak = value;
                peak_position = (r, c);
            }
            let cell = clutter.cell(r, c);
            if cell.state == CellState::Tested {
                bg_sum += cell.mean as f64;
                bg_count += 1;
            }
            if cell.exceeds {
                exceeding += 1;
            }
        }

        let peak_cell = clutter.cell(peak_position.0, peak_position.1);
        if bg_count == 0 || peak_cell.state != CellState::Tested {
            return None;
        }
        let background_mean = bg_sum / bg_count as f64;
        let background_std = peak_cell.std as f64;
        let contrast = if background_std > 0.0 {
            ((peak as f64 - background_mean) / background_std).min(MAX_CONTRAST)
        } else {
            MAX_CONTRAST
        };
        let coherence = exceeding as f64 / filled_area(&pixels).max(1) as f64;
        let bounds = pixel_bounds(&pixels);

        Some(CandidateRegion {
            centroid: (sum_r / n, sum_c / n),
            bounds,
            peak_amplitude: peak,
            peak_position,
            background_mean: background_mean as f32,
            background_std: background_std as f32,
            threshold_at_peak: peak_cell.threshold,
            contrast,
            coherence,
            confidence: self.confidence(contrast, coherence),
            pixels,
        })
    }
}
