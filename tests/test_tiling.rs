mod common;

use common::*;
use ndarray::Array2;
use sarship::core::tiling::{estimate_tiled, extract_regions_tiled, TileGrid};
use sarship::core::{ClutterEstimator, MaskSource, ShipDetector};
use sarship::types::LandSeaMask;

#[test]
fn test_target_across_tile_corner_reported_once() {
    init_logging();
    let mut image = background((192, 192), 0.05, 17);
    // Straddles the row seam at 128 and the column seam at 64
    inject_target(&mut image, 126, 59, 3, 10, TARGET_AMPLITUDE);

    let mut tiled_params = scenario_params();
    tiled_params.tiling.tile_size = 64;
    let tiled = ShipDetector::new(tiled_params, Vec::new()).unwrap();
    let whole = ShipDetector::new(scenario_params(), Vec::new()).unwrap();

    let raster = raster("S1A_SEAM", image);
    let mask = MaskSource::Aligned(LandSeaMask::all_sea(raster.dim()));
    let from_tiles = tiled.detect(&raster, &mask, &[]).unwrap();
    let from_whole = whole.detect(&raster, &mask, &[]).unwrap();

    assert_eq!(from_tiles.detections.len(), 1);
    assert_eq!(from_tiles.detections[0].size_pixels, 30);
    assert_eq!(from_whole.detections.len(), 1);
    approx::assert_abs_diff_eq!(
        from_tiles.detections[0].pixel_centroid.0,
        from_whole.detections[0].pixel_centroid.0,
        epsilon = 1e-9
    );
    approx::assert_abs_diff_eq!(
        from_tiles.detections[0].pixel_centroid.1,
        from_whole.detections[0].pixel_centroid.1,
        epsilon = 1e-9
    );
}

#[test]
fn test_tiled_clutter_matches_whole_scene() {
    let image = background((150, 170), 0.05, 23);
    let sea = Array2::from_shape_fn(image.dim(), |(r, c)| !(r < 30 && c < 40));
    let params = scenario_params().cfar;
    let estimator = ClutterEstimator::new(params.clone()).unwrap();

    let whole = estimator.estimate(&image.view(), &sea.view()).unwrap();
    let grid = TileGrid::new(image.dim(), 48, params.halo()).unwrap();
    let tiled = estimate_tiled(&estimator, &image.view(), &sea.view(), &grid).unwrap();

    assert_eq!(whole.counts().tested, tiled.counts().tested);
    assert_eq!(whole.counts().indeterminate, tiled.counts().indeterminate);
    for ((r, c), cell) in whole.cells().indexed_iter() {
        let other = tiled.cell(r, c);
        assert_eq!(cell.state, other.state, "state differs at ({}, {})", r, c);
        approx::assert_abs_diff_eq!(cell.mean, other.mean, epsilon = 1e-3);
        approx::assert_abs_diff_eq!(cell.std, other.std, epsilon = 1e-3);
    }
}

#[test]
fn test_snake_region_spanning_many_tiles_merges() {
    let mut mask = Array2::from_elem((100, 100), false);
    // One connected zig-zag through four tiles
    for c in 5..95 {
        mask[[20, c]] = true;
    }
    for r in 20..80 {
        mask[[r, 94]] = true;
    }
    for c in 5..95 {
        mask[[80, c]] = true;
    }
    mask[[50, 50]] = true;

    let grid = TileGrid::new((100, 100), 40, 10).unwrap();
    let regions = extract_regions_tiled(&mask.view(), &grid).unwrap();
    assert_eq!(regions.len(), 2);
    let sizes: Vec<usize> = regions.iter().map(Vec::len).collect();
    assert!(sizes.contains(&1));
    assert!(sizes.contains(&(90 + 59 + 90)));
}
