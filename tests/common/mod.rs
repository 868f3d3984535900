//! Synthetic scenes shared by the integration tests

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use sarship::core::PipelineParams;
use sarship::types::{
    CoordinateSystem, GeoTransform, IncidenceAngles, Polarization, RadiometricReference, RangeGeometry,
    SarRealImage, SceneMetadata, SceneRaster,
};

/// +15 dB above a unit background, in amplitude
pub const TARGET_AMPLITUDE: f32 = 5.62;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn acquisition_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 3, 14, 6, 30, 0).unwrap()
}

/// 10 m ITM grid off the east coast of Ireland
pub fn scene_metadata(scene_id: &str, acquisition_time: DateTime<Utc>) -> SceneMetadata {
    SceneMetadata {
        scene_id: scene_id.to_string(),
        acquisition_time,
        polarizations: vec![Polarization::VV],
        orbit_direction: None,
        pixel_spacing: (10.0, 10.0),
        geo_transform: Some(GeoTransform::north_up(735_000.0, 740_000.0, 10.0, 10.0)),
        coordinate_system: CoordinateSystem::Projected { epsg: 2157 },
        incidence: IncidenceAngles::Constant(35.0),
        radiometric_reference: RadiometricReference::Sigma0,
        range_geometry: RangeGeometry::GroundRange,
    }
}

/// Gaussian amplitude clutter, 0 dB mean
pub fn background(dims: (usize, usize), std: f32, seed: u64) -> SarRealImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(1.0f32, std).unwrap();
    Array2::from_shape_fn(dims, |_| normal.sample(&mut rng))
}

/// Fill a `height` x `width` block at (row, col) with a constant amplitude
pub fn inject_target(image: &mut SarRealImage, row: usize, col: usize, height: usize, width: usize, amplitude: f32) {
    for r in row..row + height {
        for c in col..col + width {
            image[[r, c]] = amplitude;
        }
    }
}

pub fn raster(scene_id: &str, image: SarRealImage) -> SceneRaster {
    SceneRaster::single_band(scene_metadata(scene_id, acquisition_time()), Polarization::VV, image)
        .expect("Failed to build raster")
}

/// Fixed 50 px window, 10 px guard, Pfa 1e-6, Gaussian background
pub fn scenario_params() -> PipelineParams {
    let mut params = PipelineParams::default();
    params.cfar.min_window = 50;
    params.cfar.max_window = 50;
    params
}

/// 160 x 160 scene with one 3 x 10 target at +15 dB
pub fn scenario_image(seed: u64) -> SarRealImage {
    let mut image = background((160, 160), 0.05, seed);
    inject_target(&mut image, 79, 75, 3, 10, TARGET_AMPLITUDE);
    image
}
