mod common;

use common::*;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp, Weibull};
use sarship::core::{CandidateDetector, CandidateParams, CfarParams, ClutterEstimator, ClutterModel};
use sarship::types::SarRealImage;

fn fixed_window(pfa: f64, censoring: bool) -> CfarParams {
    CfarParams {
        min_window: 50,
        max_window: 50,
        false_alarm_probability: pfa,
        clutter_model: ClutterModel::Gaussian,
        censoring,
        ..CfarParams::default()
    }
}

/// Exceedances over tested cells across `scenes` independent 128 x 128 images
fn empirical_rate(params: CfarParams, scenes: u64, image: impl Fn(u64) -> SarRealImage) -> (f64, usize) {
    let estimator = ClutterEstimator::new(params).unwrap();
    let mut tested = 0usize;
    let mut exceedances = 0usize;
    for seed in 0..scenes {
        let image = image(seed);
        let sea = Array2::from_elem(image.dim(), true);
        let counts = estimator.estimate(&image.view(), &sea.view()).unwrap().counts();
        tested += counts.tested;
        exceedances += counts.exceedances;
    }
    (exceedances as f64 / tested as f64, tested)
}

fn sampled(seed: u64, distribution: impl Distribution<f32>) -> SarRealImage {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((128, 128), |_| distribution.sample(&mut rng))
}

fn detect_regions(image: &sarship::types::SarRealImage) -> Vec<sarship::core::CandidateRegion> {
    let estimator = ClutterEstimator::new(fixed_window(1e-6, true)).unwrap();
    let sea = Array2::from_elem(image.dim(), true);
    let clutter = estimator.estimate(&image.view(), &sea.view()).unwrap();
    // 20 m resolution on a 10 m grid
    let detector = CandidateDetector::new(CandidateParams::default(), estimator.threshold_multiplier(), 4.0).unwrap();
    detector.detect(&image.view(), &clutter)
}

#[test]
fn test_point_target_above_margin_gives_one_region() {
    init_logging();
    let mut image = background((120, 120), 0.05, 21);
    inject_target(&mut image, 60, 60, 3, 3, 2.0);

    let regions = detect_regions(&image);
    assert_eq!(regions.len(), 1);
    let region = &regions[0];
    assert!(region.contains(61, 61));
    assert_eq!(region.area(), 9);
    assert!(region.contrast > 4.75);
}

#[test]
fn test_point_target_below_margin_gives_nothing() {
    let mut image = background((120, 120), 0.05, 21);
    inject_target(&mut image, 60, 60, 3, 3, 1.1);

    let regions = detect_regions(&image);
    assert!(regions.is_empty(), "unexpected regions: {:?}", regions.iter().map(|r| r.centroid).collect::<Vec<_>>());
}

#[test]
fn test_false_alarm_rate_matches_target() {
    init_logging();
    let pfa = 1e-2;
    let estimator = ClutterEstimator::new(fixed_window(pfa, false)).unwrap();

    let mut tested = 0usize;
    let mut exceedances = 0usize;
    for seed in 0..4 {
        let image = background((128, 128), 0.05, 100 + seed);
        let sea = Array2::from_elem(image.dim(), true);
        let counts = estimator.estimate(&image.view(), &sea.view()).unwrap().counts();
        tested += counts.tested;
        exceedances += counts.exceedances;
    }

    let rate = exceedances as f64 / tested as f64;
    println!("empirical false alarm rate {:.5} over {} cells (target {})", rate, tested, pfa);
    assert!(tested > 40_000);
    assert!(rate > 0.6 * pfa && rate < 1.4 * pfa, "rate {} outside band", rate);
}

#[test]
fn test_false_alarm_rate_with_censoring() {
    // Censoring trims the top of each ring, which lowers the threshold slightly
    let pfa = 1e-3;
    let (rate, tested) = empirical_rate(fixed_window(pfa, true), 8, |seed| background((128, 128), 0.05, 200 + seed));

    println!("censored false alarm rate {:.5} over {} cells (target {})", rate, tested, pfa);
    assert!(tested > 80_000);
    assert!(rate > 0.6 * pfa && rate < 1.6 * pfa, "rate {} outside band", rate);
}

#[test]
fn test_false_alarm_rate_exponential_intensity() {
    let pfa = 1e-2;
    let params = CfarParams {
        clutter_model: ClutterModel::Exponential,
        // σ/μ is 1 for single-look intensity
        max_coefficient_of_variation: 2.0,
        ..fixed_window(pfa, false)
    };
    let exp = Exp::new(1.0f32).unwrap();
    let (rate, tested) = empirical_rate(params, 4, |seed| sampled(300 + seed, exp));

    println!("exponential false alarm rate {:.5} over {} cells (target {})", rate, tested, pfa);
    assert!(tested > 40_000);
    assert!(rate > 0.6 * pfa && rate < 1.4 * pfa, "rate {} outside band", rate);
}

#[test]
fn test_false_alarm_rate_weibull_amplitude() {
    let pfa = 1e-2;
    let params = CfarParams {
        clutter_model: ClutterModel::Weibull { shape: 1.2 },
        max_coefficient_of_variation: 2.0,
        ..fixed_window(pfa, false)
    };
    let weibull = Weibull::new(1.0f32, 1.2).unwrap();
    let (rate, tested) = empirical_rate(params, 4, |seed| sampled(400 + seed, weibull));

    println!("weibull false alarm rate {:.5} over {} cells (target {})", rate, tested, pfa);
    assert!(tested > 40_000);
    assert!(rate > 0.6 * pfa && rate < 1.4 * pfa, "rate {} outside band", rate);
}

#[test]
fn test_heavier_tailed_model_raises_threshold() {
    let gaussian = ClutterEstimator::new(fixed_window(1e-6, true)).unwrap();
    let lognormal = ClutterEstimator::new(CfarParams {
        clutter_model: ClutterModel::LogNormal { shape: 0.5 },
        ..fixed_window(1e-6, true)
    })
    .unwrap();
    assert!(lognormal.threshold_multiplier() > gaussian.threshold_multiplier());
}
