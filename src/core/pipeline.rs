//! Scene-level detection pipeline.
//!
//! A scene run is a pure function of (raster, mask, AIS snapshot, parameters):
//! mask alignment, tiled clutter estimation, candidate extraction, screening,
//! wake corroboration, attribute extraction and AIS correlation, in that
//! order. Failures are tagged once with the stage and scene that produced them.

use crate::core::ais::{AisCorrelator, AisParams};
use crate::core::attributes::{AttributeExtractor, AttributeParams};
use crate::core::candidate::{CandidateDetector, CandidateParams};
use crate::core::catalog::CatalogParams;
use crate::core::cfar::{CellCounts, CfarParams, ClutterEstimator};
use crate::core::geodesy::{MapProjection, PixelLocator};
use crate::core::mask_align::{AlignmentParams, AlignmentReport, MaskAligner, MaskSource};
use crate::core::morphology::{MorphologicalFilter, MorphologyParams, RejectReason};
use crate::core::tiling::{estimate_tiled, extract_regions_tiled, TileGrid, TilingParams};
use crate::core::wake::{WakeCorroborator, WakeParams};
use crate::types::{
    AisReport, CoordinateSystem, GeoPoint, OrbitDirection, Polarization, SarError, SarResult, SceneRaster,
    ShipDetection, ShippingLane, Stage,
};
use chrono::{DateTime, Utc};
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Version of the detection algorithm recorded in every parameter snapshot
pub const ALGORITHM_VERSION: &str = "cfar-2pass-censored/1.0";

/// Complete, immutable parameter set of a detection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineParams {
    pub alignment: AlignmentParams,
    pub cfar: CfarParams,
    pub candidate: CandidateParams,
    pub morphology: MorphologyParams,
    pub wake: WakeParams,
    pub attributes: AttributeParams,
    pub ais: AisParams,
    pub tiling: TilingParams,
    pub catalog: CatalogParams,
    /// Band used for detection; falls back to the first co-pol band
    pub detection_polarization: Option<Polarization>,
    /// EPSG code of the projected output coordinates
    pub output_epsg: Option<u32>,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            alignment: AlignmentParams::default(),
            cfar: CfarParams::default(),
            candidate: CandidateParams::default(),
            morphology: MorphologyParams::default(),
            wake: WakeParams::default(),
            attributes: AttributeParams::default(),
            ais: AisParams::default(),
            tiling: TilingParams::default(),
            catalog: CatalogParams::default(),
            detection_polarization: Some(Polarization::VV),
            output_epsg: Some(2157), // Irish Transverse Mercator
        }
    }
}

impl PipelineParams {
    pub fn validate(&self) -> SarResult<()> {
        self.cfar.validate()?;
        self.candidate.validate()?;
        self.morphology.validate()?;
        self.wake.validate()?;
        self.attributes.validate()?;
        self.ais.validate()?;
        if self.tiling.tile_size == 0 {
            return Err(SarError::InvalidParameters("tile size must be positive".to_string()));
        }
        if let Some(epsg) = self.output_epsg {
            MapProjection::for_coordinate_system(&CoordinateSystem::from_epsg(epsg))?;
        }
        Ok(())
    }

    fn output_projection(&self) -> SarResult<Option<MapProjection>> {
        self.output_epsg
            .map(|epsg| MapProjection::for_coordinate_system(&CoordinateSystem::from_epsg(epsg)))
            .transpose()
    }
}

/// Frozen parameter set plus toolkit and algorithm versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub params: PipelineParams,
    pub toolkit_version: String,
    pub algorithm_version: String,
}

impl ParameterSnapshot {
    pub fn capture(params: &PipelineParams) -> Self {
        Self {
            params: params.clone(),
            toolkit_version: env!("CARGO_PKG_VERSION").to_string(),
            algorithm_version: ALGORITHM_VERSION.to_string(),
        }
    }

    /// Canonical serialized form, stable across runs
    pub fn fingerprint(&self) -> SarResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deterministic identifier for `name` under this snapshot
    pub fn derive_id(&self, name: &str) -> SarResult<Uuid> {
        let key = format!("{}\n{}", name, self.fingerprint()?);
        Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()))
    }
}

/// Everything one scene run produced
#[derive(Debug, Clone, PartialEq)]
pub struct SceneDetections {
    pub scene_id: String,
    pub run_id: Uuid,
    pub acquisition_time: DateTime<Utc>,
    pub orbit_direction: Option<OrbitDirection>,
    pub polarization: Polarization,
    pub detections: Vec<ShipDetection>,
    pub cell_counts: CellCounts,
    pub indeterminate_fraction: f64,
    pub alignment: AlignmentReport,
    pub rejected: BTreeMap<RejectReason, usize>,
    pub candidates_found: usize,
}

/// Per-scene inputs beyond the raster itself
#[derive(Debug, Clone, Copy)]
pub struct SceneContext<'a> {
    pub mask: &'a MaskSource,
    /// Known coastline points used to validate mask registration
    pub reference_coastline: &'a [GeoPoint],
    /// AIS feed snapshot covering the acquisition window
    pub ais_reports: &'a [AisReport],
}

/// Ship detection pipeline for single scenes
pub struct ShipDetector {
    params: PipelineParams,
    snapshot: ParameterSnapshot,
    aligner: MaskAligner,
    estimator: ClutterEstimator,
    filter: MorphologicalFilter,
    wake: WakeCorroborator,
    attributes: AttributeExtractor,
    output_projection: Option<MapProjection>,
}

impl ShipDetector {
    pub fn new(params: PipelineParams, lanes: Vec<ShippingLane>) -> SarResult<Self> {
        params.validate()?;
        let snapshot = ParameterSnapshot::capture(&params);
        Ok(Self {
            aligner: MaskAligner::new(params.alignment.clone())?,
            estimator: ClutterEstimator::new(params.cfar.clone())?,
            filter: MorphologicalFilter::new(params.morphology.clone(), lanes)?,
            wake: WakeCorroborator::new(params.wake.clone())?,
            attributes: AttributeExtractor::new(params.attributes.clone())?,
            output_projection: params.output_projection()?,
            snapshot,
            params,
        })
    }

    /// Detector with reference parameters and no shipping lanes
    pub fn standard() -> SarResult<Self> {
        Self::new(PipelineParams::default(), Vec::new())
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    pub fn snapshot(&self) -> &ParameterSnapshot {
        &self.snapshot
    }

    /// Run every stage on one scene
    pub fn run(&self, raster: &SceneRaster, context: &SceneContext<'_>) -> SarResult<SceneDetections> {
        let mut scene = self.detect(raster, context.mask, context.reference_coastline)?;
        if !context.ais_reports.is_empty() {
            let correlator = AisCorrelator::new(self.params.ais.clone(), context.ais_reports.to_vec())
                .map_err(|e| e.in_stage(Stage::AisCorrelation, &scene.scene_id))?;
            correlator.correlate(&mut scene.detections);
        }
        Ok(scene)
    }

    /// Detection without AIS correlation
    pub fn detect(&self, raster: &SceneRaster, mask: &MaskSource, reference_coastline: &[GeoPoint]) -> SarResult<SceneDetections> {
        let metadata = &raster.metadata;
        let scene_id = metadata.scene_id.as_str();
        let dims = raster.dim();
        log::info!("Scene {}: detection on {}x{} grid", scene_id, dims.0, dims.1);

        let transform = metadata.validate_geolocation()?;
        let native = MapProjection::for_coordinate_system(&metadata.coordinate_system).map_err(|e| {
            SarError::InvalidGeolocation {
                scene_id: scene_id.to_string(),
                reason: e.to_string(),
            }
        })?;
        let locator = PixelLocator::new(transform, native, self.output_projection);

        // Mask alignment
        let (mask, alignment) = self
            .aligner
            .align(scene_id, mask, dims, &locator, reference_coastline)
            .map_err(|e| e.in_stage(Stage::MaskAlignment, scene_id))?;

        // Clutter estimation
        let (polarization, amplitude) = raster
            .detection_band(self.params.detection_polarization)
            .ok_or_else(|| SarError::Processing("raster has no amplitude bands".to_string()))
            .map_err(|e| e.in_stage(Stage::ClutterEstimation, scene_id))?;
        let amplitude = amplitude.view();
        let sea = mask.sea();
        let clutter = self
            .params
            .cfar
            .check_guard(metadata.pixel_spacing)
            .and_then(|_| TileGrid::new(dims, self.params.tiling.tile_size, self.params.cfar.halo()))
            .and_then(|grid| estimate_tiled(&self.estimator, &amplitude, &sea.view(), &grid).map(|c| (grid, c)))
            .map_err(|e| e.in_stage(Stage::ClutterEstimation, scene_id))?;
        let (grid, clutter) = clutter;
        let cell_counts = clutter.counts();
        if cell_counts.tested == 0 {
            return Err(SarError::InsufficientSea {
                scene_id: scene_id.to_string(),
                valid_fraction: mask.sea_fraction(),
            });
        }
        let indeterminate_fraction = cell_counts.indeterminate_fraction();
        log::info!(
            "Scene {}: {} cells tested, {} exceedances, indeterminate fraction {:.4}",
            scene_id,
            cell_counts.tested,
            cell_counts.exceedances,
            indeterminate_fraction
        );

        // Candidate detection
        let resolution_px = self.params.cfar.sensor_resolution_m.powi(2) / (metadata.pixel_spacing.0 * metadata.pixel_spacing.1);
        let detector = CandidateDetector::new(
            self.params.candidate.clone(),
            self.estimator.threshold_multiplier(),
            resolution_px,
        )
        .map_err(|e| e.in_stage(Stage::CandidateDetection, scene_id))?;
        let cleaned = Zip::from(&self.filter.clean_mask(&clutter.exceedance()))
            .and(&sea)
            .map_collect(|hit, sea| *hit && *sea);
        let regions = extract_regions_tiled(&cleaned.view(), &grid).map_err(|e| e.in_stage(Stage::CandidateDetection, scene_id))?;
        let candidates_found = regions.len();
        let candidates: Vec<_> = regions
            .into_iter()
            .filter_map(|pixels| detector.describe(pixels, &amplitude, &clutter))
            .collect();
        log::info!(
            "Scene {}: {} candidate regions, {} above one resolution cell",
            scene_id,
            candidates_found,
            candidates.len()
        );

        // Morphological & contextual filter
        let outcome = self.filter.screen(candidates, &mask, &locator);
        let mut kept = outcome.kept;
        kept.sort_by(|a, b| {
            a.region
                .centroid
                .0
                .total_cmp(&b.region.centroid.0)
                .then(a.region.centroid.1.total_cmp(&b.region.centroid.1))
        });

        // Wake corroboration, attributes
        let mut detections = Vec::with_capacity(kept.len());
        for (n, mut candidate) in kept.into_iter().enumerate() {
            let wake = self.wake.search(&candidate, &amplitude, &mask, &cleaned.view(), None);
            if wake.is_some() {
                candidate.confidence = self.wake.boosted(candidate.confidence);
            }
            let attrs = self.attributes.extract(&candidate, &amplitude, metadata, &locator);
            let (row, col) = candidate.region.centroid;

            detections.push(ShipDetection {
                detection_id: format!("{}-{:04}", scene_id, n + 1),
                scene_id: scene_id.to_string(),
                timestamp: metadata.acquisition_time,
                pixel_centroid: (row + 0.5, col + 0.5),
                native_xy: locator.native_xy(row, col),
                location: locator.geographic(row, col),
                projected_xy: locator.projected(row, col),
                size_pixels: attrs.size_pixels,
                size_m2: attrs.size_m2,
                length_m: attrs.length_m,
                width_m: attrs.width_m,
                orientation_deg: attrs.orientation_deg,
                rcs_db: attrs.rcs_db,
                peak_amplitude: candidate.region.peak_amplitude,
                background_mean: candidate.region.background_mean,
                background_std: candidate.region.background_std,
                contrast: candidate.region.contrast,
                confidence: candidate.confidence,
                wake_present: wake.is_some(),
                wake_polarity: wake.map(|w| w.polarity),
                near_shipping_lane: candidate.near_shipping_lane,
                touches_coast: candidate.touches_coast,
                polarization,
                corrections: attrs.corrections,
                ais: None,
            });
        }
        log::info!(
            "Scene {}: {} detections ({} with wake)",
            scene_id,
            detections.len(),
            detections.iter().filter(|d| d.wake_present).count()
        );

        let run_id = self
            .snapshot
            .derive_id(&format!("scene:{}", scene_id))
            .map_err(|e| e.in_stage(Stage::AttributeExtraction, scene_id))?;

        Ok(SceneDetections {
            scene_id: scene_id.to_string(),
            run_id,
            acquisition_time: metadata.acquisition_time,
            orbit_direction: metadata.orbit_direction,
            polarization,
            detections,
            cell_counts,
            indeterminate_fraction,
            alignment,
            rejected: outcome.rejected,
            candidates_found,
        })
    }
}
