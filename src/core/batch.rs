//! Batch processing with catalog checkpointing.
//!
//! A batch is the unit of commitment: every scene is detected independently,
//! rejected scenes are reported without rows, and the surviving detections
//! are committed to the catalog in one step. A batch whose commit manifest
//! already exists is skipped, so an interrupted run can simply be repeated.

use crate::core::catalog::{CatalogBuilder, validate_batch_id};
use crate::core::mask_align::MaskSource;
use crate::core::pipeline::{SceneContext, SceneDetections, ShipDetector};
use crate::io::catalog_store::{CatalogStore, CommitManifest};
use crate::types::{AisReport, GeoPoint, MaritimeZone, SarError, SarResult, SceneRaster, Stage};
use chrono::{DateTime, Utc};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// One scene of a batch with its side inputs
#[derive(Debug, Clone)]
pub struct SceneInput {
    pub raster: SceneRaster,
    pub mask: MaskSource,
    pub reference_coastline: Vec<GeoPoint>,
}

#[derive(Debug)]
pub struct SceneFailure {
    pub scene_id: String,
    pub stage: Stage,
    pub error: SarError,
}

#[derive(Debug)]
pub enum BatchStatus {
    Committed(CommitManifest),
    /// Found committed by an earlier run; nothing was processed
    AlreadyCommitted,
}

#[derive(Debug)]
pub struct BatchReport {
    pub batch_id: String,
    pub status: BatchStatus,
    pub scenes: Vec<SceneDetections>,
    pub failures: Vec<SceneFailure>,
}

impl BatchReport {
    pub fn row_count(&self) -> usize {
        self.scenes.iter().map(|s| s.detections.len()).sum()
    }
}

pub struct BatchProcessor {
    detector: ShipDetector,
    builder: CatalogBuilder,
    store: CatalogStore,
}

impl BatchProcessor {
    pub fn new(detector: ShipDetector, zones: Vec<MaritimeZone>, store: CatalogStore) -> Self {
        let builder = CatalogBuilder::new(detector.params().catalog.clone(), zones);
        Self {
            detector,
            builder,
            store,
        }
    }

    pub fn detector(&self) -> &ShipDetector {
        &self.detector
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// Detect, catalog and commit one batch of scenes
    pub fn run(
        &self,
        batch_id: &str,
        scenes: &[SceneInput],
        ais_reports: &[AisReport],
        processed_at: DateTime<Utc>,
        supersedes: Option<&str>,
    ) -> SarResult<BatchReport> {
        validate_batch_id(batch_id)?;
        if self.store.is_committed(batch_id)? {
            log::info!("Batch {} already committed, skipping", batch_id);
            return Ok(BatchReport {
                batch_id: batch_id.to_string(),
                status: BatchStatus::AlreadyCommitted,
                scenes: Vec::new(),
                failures: Vec::new(),
            });
        }
        log::info!("Batch {}: processing {} scenes", batch_id, scenes.len());

        #[cfg(feature = "parallel")]
        let outcomes: Vec<SarResult<SceneDetections>> =
            scenes.par_iter().map(|scene| self.run_scene(scene, ais_reports)).collect();

        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<SarResult<SceneDetections>> =
            scenes.iter().map(|scene| self.run_scene(scene, ais_reports)).collect();

        let mut accepted = Vec::new();
        let mut failures = Vec::new();
        for (scene, outcome) in scenes.iter().zip(outcomes) {
            match outcome {
                Ok(detections) => accepted.push(detections),
                Err(error) => match error.stage() {
                    Some(stage) if error.is_scene_rejection() => {
                        log::warn!("Batch {}: scene rejected: {}", batch_id, error);
                        failures.push(SceneFailure {
                            scene_id: scene.raster.scene_id().to_string(),
                            stage,
                            error,
                        });
                    }
                    _ => return Err(error),
                },
            }
        }

        let batch = self
            .builder
            .build(batch_id, self.detector.snapshot(), processed_at, &accepted, supersedes)?;
        let manifest = self.store.commit(&batch)?;

        log::info!(
            "Batch {}: {} scenes accepted, {} rejected, {} rows committed",
            batch_id,
            accepted.len(),
            failures.len(),
            manifest.row_count
        );
        Ok(BatchReport {
            batch_id: batch_id.to_string(),
            status: BatchStatus::Committed(manifest),
            scenes: accepted,
            failures,
        })
    }

    fn run_scene(&self, scene: &SceneInput, ais_reports: &[AisReport]) -> SarResult<SceneDetections> {
        let context = SceneContext {
            mask: &scene.mask,
            reference_coastline: &scene.reference_coastline,
            ais_reports,
        };
        self.detector.run(&scene.raster, &context)
    }
}
