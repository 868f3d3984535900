//! Per-detection geometry and radiometric summary.

use crate::core::geodesy::PixelLocator;
use crate::core::morphology::{principal_axes, FilteredCandidate};
use crate::types::{
    intensity_to_db, AttributeCorrections, RadiometricReference, RangeGeometry, RcsMethod, SarError, SarResult,
    SceneMetadata,
};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

/// Smallest RCS reported, in square meters
const RCS_FLOOR_M2: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeParams {
    /// Absolute calibration constant applied to the RCS estimate
    pub calibration_constant_db: f64,
    pub rcs_method: RcsMethod,
}

impl Default for AttributeParams {
    fn default() -> Self {
        Self {
            calibration_constant_db: 0.0,
            rcs_method: RcsMethod::IntegratedExcess,
        }
    }
}

impl AttributeParams {
    pub fn validate(&self) -> SarResult<()> {
        if !self.calibration_constant_db.is_finite() {
            return Err(SarError::InvalidParameters("calibration constant must be finite".to_string()));
        }
        Ok(())
    }
}

/// Physical attributes of one detection
#[derive(Debug, Clone, PartialEq)]
pub struct VesselAttributes {
    pub size_pixels: usize,
    pub size_m2: f64,
    pub length_m: f64,
    pub width_m: f64,
    /// Bearing of the principal axis from grid north, [0, 180)
    pub orientation_deg: f64,
    pub rcs_db: f64,
    pub corrections: AttributeCorrections,
}

pub struct AttributeExtractor {
    params: AttributeParams,
}

impl AttributeExtractor {
    pub fn new(params: AttributeParams) -> SarResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Geometric and radiometric corrections at a given range column
    pub fn corrections(&self, metadata: &SceneMetadata, col: f64, width: usize) -> AttributeCorrections {
        let incidence = metadata.incidence.at(col, width);
        let theta = incidence.to_radians();
        let foreshortening_factor = match metadata.range_geometry {
            RangeGeometry::GroundRange => 1.0,
            RangeGeometry::SlantRange => 1.0 / theta.sin(),
        };
        let sigma0_conversion = match metadata.radiometric_reference {
            RadiometricReference::Sigma0 => 1.0,
            RadiometricReference::Beta0 => theta.sin(),
            RadiometricReference::Gamma0 => theta.cos(),
        };

        AttributeCorrections {
            incidence_angle_deg: incidence,
            foreshortening_factor,
            ground_range_spacing_m: metadata.pixel_spacing.0 * foreshortening_factor,
            azimuth_spacing_m: metadata.pixel_spacing.1,
            radiometric_reference: metadata.radiometric_reference,
            sigma0_conversion,
            calibration_constant_db: self.params.calibration_constant_db,
            rcs_method: self.params.rcs_method,
        }
    }

    pub fn extract(
        &self,
        candidate: &FilteredCandidate,
        amplitude: &ArrayView2<f32>,
        metadata: &SceneMetadata,
        locator: &PixelLocator,
    ) -> VesselAttributes {
        let region = &candidate.region;
        let width = amplitude.dim().1;
        let corrections = self.corrections(metadata, region.centroid.1, width);
        let dx = corrections.ground_range_spacing_m;
        let dy = corrections.azimuth_spacing_m;
        let pixel_area = dx * dy;
        let n = region.area() as f64;

        // Second moments in meters, columns along range
        let (mut yy, mut xx, mut xy) = (dy * dy / 12.0, dx * dx / 12.0, 0.0);
        for &(r, c) in &region.pixels {
            let y = (r as f64 - region.centroid.0) * dy;
            let x = (c as f64 - region.centroid.1) * dx;
            yy += y * y / n;
            xx += x * x / n;
            xy += x * y / n;
        }
        let (major, minor, angle) = principal_axes(yy, xx, xy);
        // Back to a (row, col) pixel-step direction for the map bearing
        let direction = (angle.sin() / dy, angle.cos() / dx);
        let at = locator.geographic(region.centroid.0, region.centroid.1);
        let orientation_deg = locator.axis_bearing_deg(direction, at);

        let scale = corrections.sigma0_conversion * pixel_area * 10f64.powf(corrections.calibration_constant_db / 10.0);
        let rcs_linear = match corrections.rcs_method {
            RcsMethod::IntegratedExcess => {
                let background = (region.background_mean as f64).powi(2);
                let excess: f64 = region
                    .pixels
                    .iter()
                    .map(|&(r, c)| ((amplitude[[r, c]] as f64).powi(2) - background).max(0.0))
                    .sum();
                excess * scale
            }
            RcsMethod::Peak => (region.peak_amplitude as f64).powi(2) * scale,
        };

        VesselAttributes {
            size_pixels: region.area(),
            size_m2: n * pixel_area,
            length_m: (12.0 * major).sqrt(),
            width_m: (12.0 * minor).sqrt(),
            orientation_deg,
            rcs_db: intensity_to_db(rcs_linear.max(RCS_FLOOR_M2)),
            corrections,
        }
    }
}
