//! Wake corroboration by accumulator line search in a trailing cone.
//!
//! Rays fan out from the candidate centroid within a cone around the
//! trailing direction (both principal-axis directions when the heading is
//! unknown). Each ray accumulates the amplitude of a narrow band from just
//! beyond the hull end to a multiple of the hull length. A ray whose band
//! mean departs from the cone mean by more than `acceptance_z` standard
//! errors is accepted as a wake, bright or dark.

use crate::core::morphology::FilteredCandidate;
use crate::types::{LandSeaMask, SarError, SarResult, WakePolarity};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

/// Wake search parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeParams {
    pub enabled: bool,
    /// Search length as a multiple of the hull length
    pub wake_length_ratio: f64,
    pub min_wake_length_px: f64,
    /// Cone half-angle around the trailing direction
    pub half_angle_deg: f64,
    pub angle_step_deg: f64,
    /// Band spans 2·half_width + 1 pixels across the ray
    pub band_half_width_px: usize,
    pub acceptance_z: f64,
    /// Minimum valid sea samples in an accepted band
    pub min_samples: usize,
    /// Fraction of the remaining headroom added on a wake
    pub confidence_boost: f64,
}

impl Default for WakeParams {
    fn default() -> Self {
        Self {
            enabled: true,
            wake_length_ratio: 5.0,
            min_wake_length_px: 20.0,
            half_angle_deg: 15.0,
            angle_step_deg: 1.0,
            band_half_width_px: 1,
            acceptance_z: 5.0,
            min_samples: 30,
            confidence_boost: 0.25,
        }
    }
}

impl WakeParams {
    pub fn validate(&self) -> SarResult<()> {
        if !(self.angle_step_deg > 0.0) || !(self.half_angle_deg >= 0.0 && self.half_angle_deg < 90.0) {
            return Err(SarError::InvalidParameters("wake cone angles are invalid".to_string()));
        }
        if !(self.wake_length_ratio > 0.0) || !(self.acceptance_z > 0.0) {
            return Err(SarError::InvalidParameters(
                "wake length ratio and acceptance bound must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_boost) {
            return Err(SarError::InvalidParameters("wake confidence boost must lie in [0, 1]".to_string()));
        }
        Ok(())
    }
}

/// Accepted wake signature
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WakeEvidence {
    pub polarity: WakePolarity,
    /// Signed standard score of the winning ray
    pub score: f64,
    /// Unit (row, col) direction of the winning ray
    pub direction: (f64, f64),
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    sum: f64,
    count: usize,
}

/// Wake corroborator
pub struct WakeCorroborator {
    params: WakeParams,
}

impl WakeCorroborator {
    pub fn new(params: WakeParams) -> SarResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &WakeParams {
        &self.params
    }

    /// Confidence after corroboration; never lower than before
    pub fn boosted(&self, confidence: f64) -> f64 {
        (confidence + self.params.confidence_boost * (1.0 - confidence)).clamp(0.0, 1.0)
    }

    /// Search for a wake behind `candidate`.
    ///
    /// `targets` marks pixels of every candidate in the scene; they never
    /// count as wake or clutter samples. `heading` is the unit (row, col)
    /// direction of travel when known.
    pub fn search(
        &self,
        candidate: &FilteredCandidate,
        amplitude: &ArrayView2<f32>,
        mask: &LandSeaMask,
        targets: &ArrayView2<bool>,
        heading: Option<(f64, f64)>,
    ) -> Option<WakeEvidence> {
        if !self.params.enabled {
            return None;
        }
        let shape = &candidate.shape;
        let hull_length = (12.0 * shape.major_sigma * shape.major_sigma).sqrt();
        let start = hull_length / 2.0 + 2.0;
        let end = start + (self.params.wake_length_ratio * hull_length).max(self.params.min_wake_length_px);

        let axes: Vec<(f64, f64)> = match heading {
            Some((dr, dc)) => vec![(-dr, -dc)],
            None => {
                let (ar, ac) = shape.major_axis;
                vec![(ar, ac), (-ar, -ac)]
            }
        };

        let steps = (self.params.half_angle_deg / self.params.angle_step_deg).floor() as i64;
        let mut rays = Vec::new();
        for &(ar, ac) in &axes {
            for i in -steps..=steps {
                let phi = (i as f64 * self.params.angle_step_deg).to_radians();
                let (s, c) = phi.sin_cos();
                rays.push((ar * c - ac * s, ar * s + ac * c));
            }
        }

        let (rows, cols) = amplitude.dim();
        let centre = candidate.region.centroid;
        let half = self.params.band_half_width_px as isize;
        let mut bins = vec![Accumulator::default(); rays.len()];
        let (mut cone_sum, mut cone_sq, mut cone_n) = (0.0, 0.0, 0usize);

        for (bin, &(dr, dc)) in bins.iter_mut().zip(&rays) {
            // Perpendicular to the ray
            let (pr, pc) = (-dc, dr);
            let mut t = start;
            while t <= end {
                for offset in -half..=half {
                    let r = (centre.0 + t * dr + offset as f64 * pr).round();
                    let c = (centre.1 + t * dc + offset as f64 * pc).round();
                    if r < 0.0 || c < 0.0 || r >= rows as f64 || c >= cols as f64 {
                        continue;
                    }
                    let (r, c) = (r as usize, c as usize);
                    let value = amplitude[[r, c]];
                    if !value.is_finite()
                        || mask.is_land(r, c)
                        || candidate.region.contains(r, c)
                        || targets.get((r, c)).copied().unwrap_or(false)
                    {
                        continue;
                    }
                    let v = value as f64;
                    bin.sum += v;
                    bin.count += 1;
                    cone_sum += v;
                    cone_sq += v * v;
                    cone_n += 1;
                }
                t += 1.0;
            }
        }

        if cone_n < 2 {
            return None;
        }
        let cone_mean = cone_sum / cone_n as f64;
        let cone_std = ((cone_sq - cone_n as f64 * cone_mean * cone_mean) / (cone_n as f64 - 1.0))
            .max(0.0)
            .sqrt();
        if cone_std <= 0.0 {
            return None;
        }

        let mut best: Option<WakeEvidence> = None;
        for (bin, &direction) in bins.iter().zip(&rays) {
            if bin.count < self.params.min_samples.max(1) {
                continue;
            }
            let mean = bin.sum / bin.count as f64;
            let z = (mean - cone_mean) / (cone_std / (bin.count as f64).sqrt());
            if best.map_or(true, |b| z.abs() > b.score.abs()) {
                best = Some(WakeEvidence {
                    polarity: if z >= 0.0 { WakePolarity::Bright } else { WakePolarity::Dark },
                    score: z,
                    direction,
                    samples: bin.count,
                });
            }
        }

        best.filter(|b| b.score.abs() >= self.params.acceptance_z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::candidate::{pixel_bounds, CandidateRegion};
    use crate::core::morphology::ShapeDescriptor;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn scene(seed: u64) -> Array2<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(1.0, 0.05).unwrap();
        Array2::from_shape_fn((200, 200), |_| normal.sample(&mut rng) as f32)
    }

    fn hull_at(row: usize, col: usize) -> FilteredCandidate {
        let mut pixels = Vec::new();
        for r in row - 1..=row + 1 {
            for c in col - 5..col + 5 {
                pixels.push((r, c));
            }
        }
        let shape = ShapeDescriptor::of(&pixels);
        let region = CandidateRegion {
            bounds: pixel_bounds(&pixels),
            centroid: (row as f64, col as f64 - 0.5),
            peak_amplitude: 5.6,
            peak_position: (row, col),
            background_mean: 1.0,
            background_std: 0.05,
            threshold_at_peak: 1.24,
            contrast: 90.0,
            coherence: 1.0,
            confidence: 0.7,
            pixels,
        };
        FilteredCandidate {
            region,
            shape,
            confidence: 0.7,
            near_shipping_lane: None,
            touches_coast: false,
        }
    }

    #[test]
    fn test_no_wake_in_plain_clutter() {
        let image = scene(1);
        let corroborator = WakeCorroborator::new(WakeParams::default()).unwrap();
        let hull = hull_at(100, 100);
        let mask = LandSeaMask::all_sea((200, 200));
        let no_targets = Array2::from_elem((200, 200), false);
        assert!(corroborator.search(&hull, &image.view(), &mask, &no_targets.view(), None).is_none());
    }

    #[test]
    fn test_bright_wake_behind_hull() {
        let mut image = scene(2);
        for c in 30..93 {
            image[[100, c]] = 1.25;
        }
        let corroborator = WakeCorroborator::new(WakeParams::default()).unwrap();
        let hull = hull_at(100, 100);
        let mask = LandSeaMask::all_sea((200, 200));
        let no_targets = Array2::from_elem((200, 200), false);

        let wake = corroborator.search(&hull, &image.view(), &mask, &no_targets.view(), None).unwrap();
        assert_eq!(wake.polarity, WakePolarity::Bright);
        assert!(wake.direction.1 < -0.95);
        assert!(wake.samples >= 30);
    }

    #[test]
    fn test_dark_wake_with_known_heading() {
        let mut image = scene(3);
        for c in 108..170 {
            image[[100, c]] = 0.75;
        }
        let corroborator = WakeCorroborator::new(WakeParams::default()).unwrap();
        let hull = hull_at(100, 100);
        let mask = LandSeaMask::all_sea((200, 200));
        let no_targets = Array2::from_elem((200, 200), false);

        // Heading west, so the wake trails east
        let wake = corroborator.search(&hull, &image.view(), &mask, &no_targets.view(), Some((0.0, -1.0))).unwrap();
        assert_eq!(wake.polarity, WakePolarity::Dark);
        assert!(wake.score < -5.0);
    }

    #[test]
    fn test_other_vessel_in_cone_is_not_a_wake() {
        let mut image = scene(4);
        let mut targets = Array2::from_elem((200, 200), false);
        // Second hull 40 px astern on the same axis
        for r in 99..102 {
            for c in 55..65 {
                image[[r, c]] = 5.6;
                targets[[r, c]] = true;
            }
        }
        let corroborator = WakeCorroborator::new(WakeParams::default()).unwrap();
        let hull = hull_at(100, 100);
        let mask = LandSeaMask::all_sea((200, 200));
        let no_targets = Array2::from_elem((200, 200), false);

        assert!(corroborator.search(&hull, &image.view(), &mask, &no_targets.view(), None).is_some());
        assert!(corroborator.search(&hull, &image.view(), &mask, &targets.view(), None).is_none());
    }

    #[test]
    fn test_boost_only_raises_confidence() {
        let corroborator = WakeCorroborator::new(WakeParams::default()).unwrap();
        assert!((corroborator.boosted(0.6) - 0.7).abs() < 1e-12);
        assert_eq!(corroborator.boosted(1.0), 1.0);
    }
}
