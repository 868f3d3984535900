mod common;

use chrono::{TimeZone, Utc};
use common::*;
use sarship::core::catalog::PartitionKey;
use sarship::core::{BatchProcessor, BatchStatus, MaskSource, SceneInput, ShipDetector};
use sarship::io::CatalogStore;
use sarship::types::{GeoPoint, LandSeaMask, MaritimeZone, Polarization, SceneRaster};
use std::fs;
use std::path::Path;

fn zone(name: &str, lat: (f64, f64), lon: (f64, f64)) -> MaritimeZone {
    MaritimeZone {
        name: name.to_string(),
        polygon: vec![
            GeoPoint::new(lat.0, lon.0),
            GeoPoint::new(lat.0, lon.1),
            GeoPoint::new(lat.1, lon.1),
            GeoPoint::new(lat.1, lon.0),
        ],
    }
}

fn zones() -> Vec<MaritimeZone> {
    vec![
        zone("celtic_sea", (50.0, 51.5), (-9.0, -5.0)),
        zone("irish_sea", (53.0, 54.0), (-7.0, -5.0)),
    ]
}

fn scene(scene_id: &str, month: u32, seed: u64) -> SceneInput {
    let time = Utc.with_ymd_and_hms(2022, month, 14, 6, 30, 0).unwrap();
    let raster = SceneRaster::single_band(scene_metadata(scene_id, time), Polarization::VV, scenario_image(seed))
        .expect("Failed to build raster");
    SceneInput {
        mask: MaskSource::Aligned(LandSeaMask::all_sea(raster.dim())),
        raster,
        reference_coastline: Vec::new(),
    }
}

fn processor(root: &Path) -> BatchProcessor {
    BatchProcessor::new(
        ShipDetector::new(scenario_params(), Vec::new()).unwrap(),
        zones(),
        CatalogStore::open(root).unwrap(),
    )
}

fn part_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with("part-"))
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn test_failed_commit_leaves_nothing_visible_and_resumes() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let processor = processor(root);
    let scenes = vec![scene("S1A_MARCH", 3, 7), scene("S1A_APRIL", 4, 8)];
    let processed_at = Utc.with_ymd_and_hms(2022, 5, 1, 12, 0, 0).unwrap();
    let march = PartitionKey::new("irish_sea", "2022-03");
    let april = PartitionKey::new("irish_sea", "2022-04");

    // A plain file where the second partition directory must go
    fs::create_dir_all(root.join("zone=irish_sea")).unwrap();
    let blocker = root.join("zone=irish_sea/period=2022-04");
    fs::write(&blocker, b"not a directory").unwrap();

    let error = processor
        .run("batch-001", &scenes, &[], processed_at, None)
        .expect_err("Commit should fail while the partition is blocked");
    assert!(matches!(error, sarship::SarError::CatalogWrite { .. }));
    assert!(error.to_string().contains("batch-001"));

    let store = processor.store();
    assert!(!store.is_committed("batch-001").unwrap());
    assert!(store.read_partition(&march).unwrap().is_empty());
    assert!(store.partitions().unwrap().is_empty());
    store.recover().unwrap();
    assert_eq!(part_files(&root.join("zone=irish_sea/period=2022-03")), 0);

    // Resume
    fs::remove_file(&blocker).unwrap();
    let report = processor.run("batch-001", &scenes, &[], processed_at, None).unwrap();
    let manifest = match report.status {
        BatchStatus::Committed(manifest) => manifest,
        other => panic!("expected a commit, got {:?}", other),
    };
    assert_eq!(manifest.row_count, 2);
    assert_eq!(manifest.files.len(), 2);
    assert_eq!(manifest.scene_ids, vec!["S1A_APRIL".to_string(), "S1A_MARCH".to_string()]);
    assert_eq!(manifest.snapshot, *processor.detector().snapshot());

    assert_eq!(store.partitions().unwrap(), vec![march.clone(), april.clone()]);
    let rows = store.read_partition(&march).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].zone, "irish_sea");
    assert_eq!(rows[0].scene_id, "S1A_MARCH");
    assert_eq!(rows[0].processing_uuid, manifest.processing_uuid);
    assert_eq!(rows[0].size_pixels, 30);
    assert_eq!(store.read_partition(&april).unwrap().len(), 1);

    // A committed batch is never reprocessed
    let again = processor.run("batch-001", &scenes, &[], processed_at, None).unwrap();
    assert!(matches!(again.status, BatchStatus::AlreadyCommitted));
    assert_eq!(store.committed_batches().unwrap().len(), 1);
}

#[test]
fn test_corrections_append_without_rewriting() {
    let dir = tempfile::tempdir().unwrap();
    let processor = processor(dir.path());
    let scenes = vec![scene("S1A_MARCH", 3, 7)];
    let processed_at = Utc.with_ymd_and_hms(2022, 5, 1, 12, 0, 0).unwrap();
    let march = PartitionKey::new("irish_sea", "2022-03");

    processor.run("batch-001", &scenes, &[], processed_at, None).unwrap();
    let report = processor
        .run("batch-002", &scenes, &[], processed_at, Some("batch-001"))
        .unwrap();
    assert!(matches!(report.status, BatchStatus::Committed(_)));

    let store = processor.store();
    let manifest = store.manifest("batch-002").unwrap().unwrap();
    assert_eq!(manifest.supersedes.as_deref(), Some("batch-001"));

    let rows = store.read_partition(&march).unwrap();
    assert_eq!(rows.len(), 2);
    assert_ne!(rows[0].processing_uuid, rows[1].processing_uuid);
    assert_eq!(rows[0].detection_id, rows[1].detection_id);
}

#[test]
fn test_identical_batches_write_identical_rows() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let scenes = vec![scene("S1A_MARCH", 3, 7), scene("S1A_APRIL", 4, 8)];
    let processed_at = Utc.with_ymd_and_hms(2022, 5, 1, 12, 0, 0).unwrap();

    processor(first.path()).run("batch-001", &scenes, &[], processed_at, None).unwrap();
    processor(second.path()).run("batch-001", &scenes, &[], processed_at, None).unwrap();

    let a = CatalogStore::open(first.path()).unwrap();
    let b = CatalogStore::open(second.path()).unwrap();
    for key in a.partitions().unwrap() {
        let rows_a = serde_json::to_string(&a.read_partition(&key).unwrap()).unwrap();
        let rows_b = serde_json::to_string(&b.read_partition(&key).unwrap()).unwrap();
        assert_eq!(rows_a, rows_b);
    }
    assert_eq!(
        a.manifest("batch-001").unwrap().unwrap().processing_uuid,
        b.manifest("batch-001").unwrap().unwrap().processing_uuid
    );
}

#[test]
fn test_unzoned_detections_use_fallback_partition() {
    let dir = tempfile::tempdir().unwrap();
    let processor = BatchProcessor::new(
        ShipDetector::new(scenario_params(), Vec::new()).unwrap(),
        vec![zone("celtic_sea", (50.0, 51.5), (-9.0, -5.0))],
        CatalogStore::open(dir.path()).unwrap(),
    );
    let processed_at = Utc.with_ymd_and_hms(2022, 5, 1, 12, 0, 0).unwrap();
    processor
        .run("batch-001", &[scene("S1A_MARCH", 3, 7)], &[], processed_at, None)
        .unwrap();

    let partitions = processor.store().partitions().unwrap();
    assert_eq!(partitions, vec![PartitionKey::new("unzoned", "2022-03")]);
}

#[test]
fn test_orbit_partitions_round_trip_through_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = scenario_params();
    params.catalog.by_orbit = true;
    let processor = BatchProcessor::new(
        ShipDetector::new(params, Vec::new()).unwrap(),
        zones(),
        CatalogStore::open(dir.path()).unwrap(),
    );
    let processed_at = Utc.with_ymd_and_hms(2022, 5, 1, 12, 0, 0).unwrap();
    processor
        .run("batch-001", &[scene("S1A_MARCH", 3, 7)], &[], processed_at, None)
        .unwrap();

    // The synthetic scenes carry no pass direction
    let key = PartitionKey::new("irish_sea", "2022-03").with_orbit("unknown");
    assert_eq!(processor.store().partitions().unwrap(), vec![key.clone()]);
    assert_eq!(processor.store().read_partition(&key).unwrap().len(), 1);
    assert!(processor.store().read_partition(&PartitionKey::new("irish_sea", "2022-03")).unwrap().is_empty());
    assert_eq!(part_files(&dir.path().join("zone=irish_sea/orbit=unknown/period=2022-03")), 1);
}
