//! Morphological and contextual screening of candidate regions.

use crate::core::candidate::CandidateRegion;
use crate::core::geodesy::{distance_to_polyline_m, PixelLocator};
use crate::types::{amplitude_to_db, LandSeaMask, SarError, SarResult, ShippingLane};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shape window that exempts coastal regions from the coast penalty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselProfile {
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    pub min_compactness: f64,
    pub min_coherence: f64,
}

impl Default for VesselProfile {
    fn default() -> Self {
        Self {
            min_aspect_ratio: 2.0,
            max_aspect_ratio: 8.0,
            min_compactness: 0.3,
            min_coherence: 0.9,
        }
    }
}

/// Morphological filter parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MorphologyParams {
    pub min_area_px: usize,
    pub max_area_px: usize,
    /// Major over minor principal axis
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    /// 4π·area / perimeter²
    pub min_compactness: f64,
    /// Peak amplitude floor in dB
    pub min_peak_db: Option<f64>,
    /// Square structuring element half-size; 0 disables
    pub closing_radius: usize,
    pub opening_radius: usize,
    /// Fraction of the remaining headroom added inside a shipping lane
    pub lane_boost: f64,
    /// Regions with a pixel this close to land count as coastal
    pub coast_buffer_px: usize,
    /// Fractional confidence reduction for coastal regions
    pub coast_penalty: f64,
    pub vessel_profile: VesselProfile,
}

impl Default for MorphologyParams {
    fn default() -> Self {
        Self {
            min_area_px: 25,
            max_area_px: 1000,
            min_aspect_ratio: 1.2,
            max_aspect_ratio: 10.0,
            min_compactness: 0.2,
            min_peak_db: Some(-15.0),
            closing_radius: 0,
            opening_radius: 0,
            lane_boost: 0.15,
            coast_buffer_px: 2,
            coast_penalty: 0.4,
            vessel_profile: VesselProfile::default(),
        }
    }
}

impl MorphologyParams {
    pub fn validate(&self) -> SarResult<()> {
        if self.max_area_px < self.min_area_px {
            return Err(SarError::InvalidParameters(format!(
                "area bounds {}..{} px are inverted",
                self.min_area_px, self.max_area_px
            )));
        }
        if !(self.min_aspect_ratio >= 1.0 && self.max_aspect_ratio >= self.min_aspect_ratio) {
            return Err(SarError::InvalidParameters(format!(
                "aspect ratio bounds {}..{} are invalid",
                self.min_aspect_ratio, self.max_aspect_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.lane_boost) || !(0.0..=1.0).contains(&self.coast_penalty) {
            return Err(SarError::InvalidParameters(
                "lane boost and coast penalty must lie in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Second-moment shape summary of a region in pixel units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapeDescriptor {
    pub area: usize,
    /// Standard deviations along the principal axes
    pub major_sigma: f64,
    pub minor_sigma: f64,
    pub aspect_ratio: f64,
    /// Unit (row, col) direction of the major axis
    pub major_axis: (f64, f64),
    /// Exposed 4-neighbour pixel edges
    pub perimeter: usize,
    pub compactness: f64,
}

impl ShapeDescriptor {
    pub fn of(pixels: &[(usize, usize)]) -> Self {
        let n = pixels.len().max(1) as f64;
        let (sr, sc) = pixels
            .iter()
            .fold((0.0, 0.0), |(sr, sc), &(r, c)| (sr + r as f64, sc + c as f64));
        let (mr, mc) = (sr / n, sc / n);

        // Each pixel contributes a uniform unit square: +1/12 per axis
        let (mut rr, mut cc, mut rc) = (1.0 / 12.0, 1.0 / 12.0, 0.0);
        for &(r, c) in pixels {
            let dr = r as f64 - mr;
            let dc = c as f64 - mc;
            rr += dr * dr / n;
            cc += dc * dc / n;
            rc += dr * dc / n;
        }
        let (major_var, minor_var, angle) = principal_axes(rr, cc, rc);

        let members: std::collections::BTreeSet<(usize, usize)> = pixels.iter().copied().collect();
        let mut perimeter = 0;
        for &(r, c) in pixels {
            let neighbours = [
                r.checked_sub(1).map(|r| (r, c)),
                Some((r + 1, c)),
                c.checked_sub(1).map(|c| (r, c)),
                Some((r, c + 1)),
            ];
            perimeter += neighbours
                .iter()
                .filter(|n| n.map_or(true, |p| !members.contains(&p)))
                .count();
        }

        let major_sigma = major_var.sqrt();
        let minor_sigma = minor_var.max(f64::MIN_POSITIVE).sqrt();
        Self {
            area: pixels.len(),
            major_sigma,
            minor_sigma,
            aspect_ratio: major_sigma / minor_sigma,
            major_axis: (angle.sin(), angle.cos()),
            perimeter,
            compactness: if perimeter > 0 {
                4.0 * std::f64::consts::PI * pixels.len() as f64 / (perimeter * perimeter) as f64
            } else {
                0.0
            },
        }
    }
}

/// Eigen-decomposition of a 2x2 (row, col) covariance.
///
/// Returns (major variance, minor variance, angle of the major axis from the
/// column axis towards the row axis).
pub fn principal_axes(rr: f64, cc: f64, rc: f64) -> (f64, f64, f64) {
    let half_trace = (rr + cc) / 2.0;
    let spread = (((cc - rr) / 2.0).powi(2) + rc * rc).sqrt();
    let angle = 0.5 * (2.0 * rc).atan2(cc - rr);
    (half_trace + spread, (half_trace - spread).max(0.0), angle)
}

/// Why a region failed a hard bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RejectReason {
    TooSmall,
    TooLarge,
    AspectRatio,
    Compactness,
    WeakPeak,
    OnLand,
}

/// A region that passed screening, with its context-adjusted confidence
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredCandidate {
    pub region: CandidateRegion,
    pub shape: ShapeDescriptor,
    pub confidence: f64,
    pub near_shipping_lane: Option<String>,
    pub touches_coast: bool,
}

/// Result of screening one scene's candidates
#[derive(Debug, Clone, Default)]
pub struct ScreeningOutcome {
    pub kept: Vec<FilteredCandidate>,
    pub rejected: BTreeMap<RejectReason, usize>,
}

/// Morphological & contextual filter
pub struct MorphologicalFilter {
    params: MorphologyParams,
    lanes: Vec<ShippingLane>,
}

impl MorphologicalFilter {
    pub fn new(params: MorphologyParams, lanes: Vec<ShippingLane>) -> SarResult<Self> {
        params.validate()?;
        Ok(Self { params, lanes })
    }

    pub fn params(&self) -> &MorphologyParams {
        &self.params
    }

    /// Closing then opening of the exceedance mask, where enabled
    pub fn clean_mask(&self, mask: &Array2<bool>) -> Array2<bool> {
        let mut out = mask.clone();
        if self.params.closing_radius > 0 {
            out = binary_close(&out.view(), self.params.closing_radius);
        }
        if self.params.opening_radius > 0 {
            out = binary_open(&out.view(), self.params.opening_radius);
        }
        out
    }

    fn hard_bounds(&self, region: &CandidateRegion, shape: &ShapeDescriptor) -> Option<RejectReason> {
        let p = &self.params;
        if shape.area < p.min_area_px {
            return Some(RejectReason::TooSmall);
        }
        if shape.area > p.max_area_px {
            return Some(RejectReason::TooLarge);
        }
        if shape.aspect_ratio < p.min_aspect_ratio || shape.aspect_ratio > p.max_aspect_ratio {
            return Some(RejectReason::AspectRatio);
        }
        if shape.compactness < p.min_compactness {
            return Some(RejectReason::Compactness);
        }
        if let Some(floor) = p.min_peak_db {
            if (amplitude_to_db(region.peak_amplitude as f64)) < floor {
                return Some(RejectReason::WeakPeak);
            }
        }
        None
    }

    fn matches_vessel_profile(&self, region: &CandidateRegion, shape: &ShapeDescriptor) -> bool {
        let v = &self.params.vessel_profile;
        (v.min_aspect_ratio..=v.max_aspect_ratio).contains(&shape.aspect_ratio)
            && shape.compactness >= v.min_compactness
            && region.coherence >= v.min_coherence
    }

    fn touches_coast(&self, region: &CandidateRegion, mask: &LandSeaMask) -> bool {
        let b = self.params.coast_buffer_px as isize;
        let (rows, cols) = mask.dim();
        region.pixels.iter().any(|&(r, c)| {
            (-b..=b).any(|dr| {
                (-b..=b).any(|dc| {
                    let nr = r as isize + dr;
                    let nc = c as isize + dc;
                    // The scene edge is not coastline
                    nr >= 0
                        && nc >= 0
                        && nr < rows as isize
                        && nc < cols as isize
                        && mask.is_land(nr as usize, nc as usize)
                })
            })
        })
    }

    fn nearest_lane(&self, region: &CandidateRegion, locator: &PixelLocator) -> Option<String> {
        if self.lanes.is_empty() {
            return None;
        }
        let at = locator.geographic(region.centroid.0, region.centroid.1);
        self.lanes
            .iter()
            .map(|lane| (distance_to_polyline_m(at, &lane.centerline), lane))
            .filter(|(d, lane)| *d <= lane.buffer_m)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, lane)| lane.name.clone())
    }

    /// Apply hard bounds, then adjust confidence for lanes and coast proximity
    pub fn screen(&self, regions: Vec<CandidateRegion>, mask: &LandSeaMask, locator: &PixelLocator) -> ScreeningOutcome {
        let mut outcome = ScreeningOutcome::default();

        for region in regions {
            let centre = centre_pixel(region.centroid);
            if mask.is_land(centre.0, centre.1) {
                *outcome.rejected.entry(RejectReason::OnLand).or_insert(0) += 1;
                continue;
            }
            let shape = ShapeDescriptor::of(&region.pixels);
            if let Some(reason) = self.hard_bounds(&region, &shape) {
                *outcome.rejected.entry(reason).or_insert(0) += 1;
                continue;
            }

            let mut confidence = region.confidence;
            let near_shipping_lane = self.nearest_lane(&region, locator);
            if near_shipping_lane.is_some() {
                confidence += self.params.lane_boost * (1.0 - confidence);
            }
            let touches_coast = self.touches_coast(&region, mask);
            if touches_coast && !self.matches_vessel_profile(&region, &shape) {
                confidence *= 1.0 - self.params.coast_penalty;
            }

            outcome.kept.push(FilteredCandidate {
                region,
                shape,
                confidence: confidence.clamp(0.0, 1.0),
                near_shipping_lane,
                touches_coast,
            });
        }

        log::debug!(
            "Morphological filter kept {} regions, rejected {:?}",
            outcome.kept.len(),
            outcome.rejected
        );
        outcome
    }
}

/// Set where any pixel within `radius` along each line is set
fn line_any(get: impl Fn(usize, usize) -> bool, lines: usize, len: usize, radius: usize) -> Array2<bool> {
    let mut out = Array2::from_elem((lines, len), false);
    let mut prefix = vec![0usize; len + 1];
    for line in 0..lines {
        for i in 0..len {
            prefix[i + 1] = prefix[i] + get(line, i) as usize;
        }
        for i in 0..len {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(len);
            out[[line, i]] = prefix[hi] > prefix[lo];
        }
    }
    out
}

/// Square-window "any" filter, separable into row and column passes
fn square_any(mask: &ArrayView2<bool>, radius: usize) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    let horizontal = line_any(|r, c| mask[[r, c]], rows, cols, radius);
    let vertical = line_any(|c, r| horizontal[[r, c]], cols, rows, radius);
    vertical.reversed_axes()
}

pub fn binary_dilate(mask: &ArrayView2<bool>, radius: usize) -> Array2<bool> {
    square_any(mask, radius)
}

/// Erosion treats pixels beyond the border as set
pub fn binary_erode(mask: &ArrayView2<bool>, radius: usize) -> Array2<bool> {
    let inverted = mask.mapv(|v| !v);
    square_any(&inverted.view(), radius).mapv(|v| !v)
}

pub fn binary_close(mask: &ArrayView2<bool>, radius: usize) -> Array2<bool> {
    binary_erode(&binary_dilate(mask, radius).view(), radius)
}

pub fn binary_open(mask: &ArrayView2<bool>, radius: usize) -> Array2<bool> {
    binary_dilate(&binary_erode(mask, radius).view(), radius)
}

/// Pixel whose cell holds a sub-pixel position; half-way positions go to the higher index
fn centre_pixel(position: (f64, f64)) -> (usize, usize) {
    (
        (position.0 + 0.5).floor().max(0.0) as usize,
        (position.1 + 0.5).floor().max(0.0) as usize,
    )
}
