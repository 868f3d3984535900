//! Clutter statistics estimation and adaptive CFAR thresholding.
//!
//! For every sea cell the background mean and spread are estimated from the
//! training ring of a square window: the window minus a guard box centred on
//! the cell. Land pixels, non-finite pixels and (in the second pass)
//! pixels flagged as targets in the first pass are excluded from the ring.
//! Windows grow from the minimum to the maximum size until the ring holds
//! enough valid samples and is homogeneous; cells that never qualify are
//! indeterminate.

use crate::core::clutter_model::{ClutterDistribution, ClutterModel};
use crate::core::integral::SummedAreaTable;
use crate::types::{SarError, SarResult};
use ndarray::{s, Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

/// Smallest background spread, relative to the mean, used to scale the threshold
const MIN_RELATIVE_SPREAD: f64 = 1e-4;

/// CFAR parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfarParams {
    /// Smallest window side in pixels (covers 2·(w/2)+1 pixels)
    pub min_window: usize,
    /// Largest window side in pixels
    pub max_window: usize,
    /// Growth step between window sizes
    pub window_step: usize,
    /// Half-size of the guard box around the test cell
    pub guard_radius: usize,
    /// Target probability of false alarm per tested cell
    pub false_alarm_probability: f64,
    /// Background amplitude distribution
    pub clutter_model: ClutterModel,
    /// Minimum fraction of the nominal ring that must remain valid
    pub min_valid_fraction: f64,
    /// Homogeneity bound on the ring's coefficient of variation σ/μ
    pub max_coefficient_of_variation: f64,
    /// Re-estimate with first-pass detections removed from the rings
    pub censoring: bool,
    /// Sensor resolution footprint in meters; the guard box must cover it
    pub sensor_resolution_m: f64,
}

impl Default for CfarParams {
    fn default() -> Self {
        Self {
            min_window: 50,
            max_window: 200,
            window_step: 50,
            guard_radius: 10,
            false_alarm_probability: 1e-6,
            clutter_model: ClutterModel::Gaussian,
            min_valid_fraction: 0.3,
            max_coefficient_of_variation: 1.0,
            censoring: true,
            sensor_resolution_m: 20.0, // Sentinel-1 IW GRD
        }
    }
}

impl CfarParams {
    pub fn validate(&self) -> SarResult<()> {
        if self.min_window < 3 || self.max_window < self.min_window {
            return Err(SarError::InvalidParameters(format!(
                "window bounds {}..{} are invalid",
                self.min_window, self.max_window
            )));
        }
        if self.window_step == 0 {
            return Err(SarError::InvalidParameters("window step must be positive".to_string()));
        }
        if self.guard_radius >= self.min_window / 2 {
            return Err(SarError::InvalidParameters(format!(
                "guard radius {} leaves no training ring in a {} px window",
                self.guard_radius, self.min_window
            )));
        }
        if !(self.min_valid_fraction > 0.0 && self.min_valid_fraction <= 1.0) {
            return Err(SarError::InvalidParameters(format!(
                "min valid fraction must lie in (0, 1], got {}",
                self.min_valid_fraction
            )));
        }
        if !(self.max_coefficient_of_variation > 0.0) {
            return Err(SarError::InvalidParameters("homogeneity bound must be positive".to_string()));
        }
        if !(self.sensor_resolution_m.is_finite() && self.sensor_resolution_m > 0.0) {
            return Err(SarError::InvalidParameters("sensor resolution must be positive".to_string()));
        }
        self.clutter_model.threshold_multiplier(self.false_alarm_probability)?;
        Ok(())
    }

    /// Window sides tried in order, always ending at `max_window`
    pub fn window_sizes(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = (self.min_window..=self.max_window)
            .step_by(self.window_step.max(1))
            .collect();
        if sizes.last() != Some(&self.max_window) {
            sizes.push(self.max_window);
        }
        sizes
    }

    pub fn max_radius(&self) -> usize {
        self.max_window / 2
    }

    /// Context needed around a tile so its cells see untruncated rings
    /// in every pass
    pub fn halo(&self) -> usize {
        let passes = if self.censoring { 2 } else { 1 };
        self.max_radius() * passes
    }

    /// Sensor resolution footprint in pixels for the given (range, azimuth) spacing
    pub fn resolution_footprint_px(&self, pixel_spacing: (f64, f64)) -> usize {
        let finest = pixel_spacing.0.min(pixel_spacing.1);
        (self.sensor_resolution_m / finest).ceil().max(1.0) as usize
    }

    /// Guard box must never be smaller than the resolution footprint
    pub fn check_guard(&self, pixel_spacing: (f64, f64)) -> SarResult<()> {
        let footprint = self.resolution_footprint_px(pixel_spacing);
        if self.guard_radius < footprint {
            return Err(SarError::InvalidParameters(format!(
                "guard radius {} px is below the {} px resolution footprint",
                self.guard_radius, footprint
            )));
        }
        Ok(())
    }
}

/// Outcome for one test cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellState {
    Land,
    /// Non-finite amplitude
    NoData,
    /// No reliable background statistic could be formed
    Indeterminate,
    Tested,
}

/// Per-cell background estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellEstimate {
    pub state: CellState,
    pub mean: f32,
    pub std: f32,
    pub threshold: f32,
    /// Window side that produced the estimate (0 when none)
    pub window: u16,
    pub exceeds: bool,
}

impl Default for CellEstimate {
    fn default() -> Self {
        Self {
            state: CellState::NoData,
            mean: 0.0,
            std: 0.0,
            threshold: f32::INFINITY,
            window: 0,
            exceeds: false,
        }
    }
}

/// Cell tallies for a scene or tile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellCounts {
    pub land: usize,
    pub no_data: usize,
    pub indeterminate: usize,
    pub tested: usize,
    pub exceedances: usize,
}

impl CellCounts {
    /// Indeterminate cells over all sea cells that were attempted
    pub fn indeterminate_fraction(&self) -> f64 {
        let attempted = self.indeterminate + self.tested;
        if attempted == 0 {
            return 0.0;
        }
        self.indeterminate as f64 / attempted as f64
    }
}

/// Background statistics for every cell of a raster
#[derive(Debug, Clone, PartialEq)]
pub struct ClutterMap {
    cells: Array2<CellEstimate>,
}

impl ClutterMap {
    pub fn new(dims: (usize, usize)) -> Self {
        Self {
            cells: Array2::from_elem(dims, CellEstimate::default()),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.cells.dim()
    }

    pub fn cell(&self, row: usize, col: usize) -> &CellEstimate {
        &self.cells[[row, col]]
    }

    pub fn cells(&self) -> &Array2<CellEstimate> {
        &self.cells
    }

    pub fn exceedance(&self) -> Array2<bool> {
        self.cells.mapv(|c| c.exceeds)
    }

    pub fn counts(&self) -> CellCounts {
        let mut counts = CellCounts::default();
        for cell in self.cells.iter() {
            match cell.state {
                CellState::Land => counts.land += 1,
                CellState::NoData => counts.no_data += 1,
                CellState::Indeterminate => counts.indeterminate += 1,
                CellState::Tested => {
                    counts.tested += 1;
                    if cell.exceeds {
                        counts.exceedances += 1;
                    }
                }
            }
        }
        counts
    }

    /// Copy a block of `src` starting at `src_origin` into this map at `dst_origin`
    pub fn paste(&mut self, src: &ClutterMap, src_origin: (usize, usize), dst_origin: (usize, usize), size: (usize, usize)) {
        let (sr, sc) = src_origin;
        let (dr, dc) = dst_origin;
        let (h, w) = size;
        self.cells
            .slice_mut(s![dr..dr + h, dc..dc + w])
            .assign(&src.cells.slice(s![sr..sr + h, sc..sc + w]));
    }
}

/// Clutter statistics estimator (CFAR core)
pub struct ClutterEstimator {
    params: CfarParams,
    k: f64,
    windows: Vec<usize>,
}

impl ClutterEstimator {
    pub fn new(params: CfarParams) -> SarResult<Self> {
        params.validate()?;
        let k = params
            .clutter_model
            .threshold_multiplier(params.false_alarm_probability)?;
        let windows = params.window_sizes();
        log::debug!(
            "CFAR {} model, Pfa {:e} -> k = {:.3}, windows {:?}",
            params.clutter_model.name(),
            params.false_alarm_probability,
            k,
            windows
        );
        Ok(Self { params, k, windows })
    }

    pub fn params(&self) -> &CfarParams {
        &self.params
    }

    /// Multiplier k in T = μ + kσ
    pub fn threshold_multiplier(&self) -> f64 {
        self.k
    }

    /// Estimate background statistics and exceedances for every cell.
    ///
    /// `sea` is true for sea pixels. With censoring enabled a second pass
    /// re-estimates every cell with the first pass's exceedances removed from
    /// all training rings, which makes the result independent of scan order.
    pub fn estimate(&self, amplitude: &ArrayView2<f32>, sea: &ArrayView2<bool>) -> SarResult<ClutterMap> {
        if amplitude.dim() != sea.dim() {
            return Err(SarError::Processing(format!(
                "mask dimensions {:?} do not match raster {:?}",
                sea.dim(),
                amplitude.dim()
            )));
        }

        let samples = Zip::from(amplitude)
            .and(sea)
            .map_collect(|a, s| *s && a.is_finite());
        let first = self.single_pass(amplitude, sea, &samples);
        if !self.params.censoring {
            return Ok(first);
        }

        let censored = Zip::from(&samples)
            .and(first.cells())
            .map_collect(|valid, cell| *valid && !cell.exceeds);
        let second = self.single_pass(amplitude, sea, &censored);

        log::debug!(
            "Censoring pass: {} -> {} exceedances",
            first.counts().exceedances,
            second.counts().exceedances
        );
        Ok(second)
    }

    fn single_pass(&self, amplitude: &ArrayView2<f32>, sea: &ArrayView2<bool>, samples: &Array2<bool>) -> ClutterMap {
        let sat = SummedAreaTable::build(amplitude, &samples.view());
        let mut map = ClutterMap::new(amplitude.dim());

        let estimate = |(row, col): (usize, usize), cell: &mut CellEstimate| {
            *cell = self.estimate_cell(&sat, amplitude, sea, row, col);
        };

        #[cfg(feature = "parallel")]
        Zip::indexed(&mut map.cells).par_for_each(estimate);
        #[cfg(not(feature = "parallel"))]
        Zip::indexed(&mut map.cells).for_each(estimate);

        map
    }

    fn estimate_cell(
        &self,
        sat: &SummedAreaTable,
        amplitude: &ArrayView2<f32>,
        sea: &ArrayView2<bool>,
        row: usize,
        col: usize,
    ) -> CellEstimate {
        if !sea[[row, col]] {
            return CellEstimate { state: CellState::Land, ..CellEstimate::default() };
        }
        let value = amplitude[[row, col]];
        if !value.is_finite() {
            return CellEstimate::default();
        }

        match self.background(sat, row, col) {
            Some((window, mean, std)) => {
                // A flat ring gives no spread to scale by; floor it so T stays above μ
                let spread = std.max(mean.abs() * MIN_RELATIVE_SPREAD);
                let threshold = mean + self.k * spread;
                CellEstimate {
                    state: CellState::Tested,
                    mean: mean as f32,
                    std: std as f32,
                    threshold: threshold as f32,
                    window: window.min(u16::MAX as usize) as u16,
                    exceeds: value as f64 > threshold,
                }
            }
            None => CellEstimate {
                state: CellState::Indeterminate,
                ..CellEstimate::default()
            },
        }
    }

    /// Smallest window whose ring is large and homogeneous enough
    fn background(&self, sat: &SummedAreaTable, row: usize, col: usize) -> Option<(usize, f64, f64)> {
        let guard_radius = self.params.guard_radius;
        let guard = sat.square(row, col, guard_radius);
        let guard_side = 2 * guard_radius + 1;

        for &window in &self.windows {
            let radius = window / 2;
            let side = 2 * radius + 1;
            let nominal = (side * side - guard_side * guard_side) as f64;
            let ring = sat.square(row, col, radius) - guard;

            if (ring.count as f64) < self.params.min_valid_fraction * nominal {
                continue;
            }
            let Some((mean, std)) = ring.mean_std() else {
                continue;
            };
            if mean > 0.0 && std / mean > self.params.max_coefficient_of_variation {
                continue;
            }
            return Some((window, mean, std));
        }
        None
    }
}
