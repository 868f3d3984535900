//! Catalog assembly: zone assignment, temporal partitioning and provenance.

use crate::core::geodesy::point_in_polygon;
use crate::core::pipeline::{ParameterSnapshot, SceneDetections};
use crate::types::{
    AttributeCorrections, GeoPoint, MaritimeZone, OrbitDirection, Polarization, SarError, SarResult, ShipDetection,
    VesselCategory, WakePolarity,
};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Temporal partition granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalGranularity {
    Day,
    Month,
    Year,
}

impl TemporalGranularity {
    pub fn period_of(&self, t: DateTime<Utc>) -> String {
        match self {
            TemporalGranularity::Day => t.format("%Y-%m-%d").to_string(),
            TemporalGranularity::Month => format!("{:04}-{:02}", t.year(), t.month()),
            TemporalGranularity::Year => format!("{:04}", t.year()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogParams {
    pub granularity: TemporalGranularity,
    /// Zone name for detections outside every zone polygon
    pub unzoned: String,
    /// Split partitions by pass direction as well
    #[serde(default)]
    pub by_orbit: bool,
}

impl Default for CatalogParams {
    fn default() -> Self {
        Self {
            granularity: TemporalGranularity::Month,
            unzoned: "unzoned".to_string(),
            by_orbit: false,
        }
    }
}

/// Orbit partition value for scenes without a known pass direction
const UNKNOWN_ORBIT: &str = "unknown";

/// Zone, optional pass direction and period a row is stored under
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orbit: Option<String>,
    pub period: String,
}

impl PartitionKey {
    pub fn new(zone: impl Into<String>, period: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            orbit: None,
            period: period.into(),
        }
    }

    pub fn with_orbit(mut self, orbit: impl Into<String>) -> Self {
        self.orbit = Some(orbit.into());
        self
    }

    /// Relative directory of the partition under the store root
    pub fn relative_dir(&self) -> String {
        let zone = path_segment(&self.zone);
        match &self.orbit {
            Some(orbit) => format!("zone={}/orbit={}/period={}", zone, path_segment(orbit), self.period),
            None => format!("zone={}/period={}", zone, self.period),
        }
    }
}

/// Replace path-unsafe characters. A name that had to change gets a suffix
/// derived from its original bytes, so distinct names stay distinct.
fn path_segment(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if safe == name {
        return safe;
    }
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).simple().to_string();
    format!("{}-{}", safe, &digest[..8])
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.orbit {
            Some(orbit) => write!(f, "{}/{}/{}", self.zone, orbit, self.period),
            None => write!(f, "{}/{}", self.zone, self.period),
        }
    }
}

/// One output record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub detection_id: String,
    pub processing_uuid: Uuid,
    pub scene_id: String,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub projected_x: Option<f64>,
    pub projected_y: Option<f64>,
    pub size_pixels: usize,
    pub size_m2: f64,
    pub length_m: f64,
    pub width_m: f64,
    pub orientation_deg: f64,
    pub confidence_score: f64,
    pub rcs_db: f64,
    pub wake_present: bool,
    pub wake_polarity: Option<WakePolarity>,
    pub ais_match_id: Option<String>,
    pub ais_ambiguous: bool,
    pub ais_distance_m: Option<f64>,
    pub vessel_category: Option<VesselCategory>,
    pub zone: String,
    pub indeterminate_fraction: f64,
    pub polarization: Polarization,
    pub orbit_direction: Option<OrbitDirection>,
    pub near_shipping_lane: Option<String>,
    pub touches_coast: bool,
    pub corrections: AttributeCorrections,
}

impl CatalogRow {
    fn from_detection(d: &ShipDetection, scene: &SceneDetections, processing_uuid: Uuid, zone: String) -> Self {
        Self {
            detection_id: d.detection_id.clone(),
            processing_uuid,
            scene_id: d.scene_id.clone(),
            timestamp: d.timestamp,
            latitude: d.location.lat,
            longitude: d.location.lon,
            projected_x: d.projected_xy.map(|p| p.0),
            projected_y: d.projected_xy.map(|p| p.1),
            size_pixels: d.size_pixels,
            size_m2: d.size_m2,
            length_m: d.length_m,
            width_m: d.width_m,
            orientation_deg: d.orientation_deg,
            confidence_score: d.confidence,
            rcs_db: d.rcs_db,
            wake_present: d.wake_present,
            wake_polarity: d.wake_polarity,
            ais_match_id: d.ais_match_id().map(str::to_string),
            ais_ambiguous: d.ais_ambiguous(),
            ais_distance_m: d.ais.as_ref().map(|m| m.distance_m),
            vessel_category: d.ais.as_ref().map(|m| m.category),
            zone,
            indeterminate_fraction: scene.indeterminate_fraction,
            polarization: d.polarization,
            orbit_direction: scene.orbit_direction,
            near_shipping_lane: d.near_shipping_lane.clone(),
            touches_coast: d.touches_coast,
            corrections: d.corrections.clone(),
        }
    }
}

/// Provenance shared by every row of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProvenance {
    pub batch_id: String,
    pub processing_uuid: Uuid,
    pub processed_at: DateTime<Utc>,
    pub snapshot: ParameterSnapshot,
    /// Earlier batch whose rows this batch corrects
    pub supersedes: Option<String>,
    pub scene_ids: Vec<String>,
}

/// Rows of one batch grouped by partition
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogBatch {
    pub provenance: BatchProvenance,
    pub partitions: BTreeMap<PartitionKey, Vec<CatalogRow>>,
}

impl CatalogBatch {
    pub fn batch_id(&self) -> &str {
        &self.provenance.batch_id
    }

    pub fn row_count(&self) -> usize {
        self.partitions.values().map(Vec::len).sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = &CatalogRow> {
        self.partitions.values().flatten()
    }
}

/// Batch ids become file names, so they are restricted to a safe alphabet
pub fn validate_batch_id(batch_id: &str) -> SarResult<()> {
    let ok = !batch_id.is_empty()
        && batch_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !batch_id.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(SarError::InvalidParameters(format!("invalid batch id {:?}", batch_id)))
    }
}

pub struct CatalogBuilder {
    params: CatalogParams,
    zones: Vec<MaritimeZone>,
}

impl CatalogBuilder {
    pub fn new(params: CatalogParams, zones: Vec<MaritimeZone>) -> Self {
        Self { params, zones }
    }

    /// First zone, in configured order, whose polygon contains `p`
    pub fn zone_of(&self, p: GeoPoint) -> String {
        self.zones
            .iter()
            .find(|z| point_in_polygon(p, &z.polygon))
            .map(|z| z.name.clone())
            .unwrap_or_else(|| self.params.unzoned.clone())
    }

    pub fn build(
        &self,
        batch_id: &str,
        snapshot: &ParameterSnapshot,
        processed_at: DateTime<Utc>,
        scenes: &[SceneDetections],
        supersedes: Option<&str>,
    ) -> SarResult<CatalogBatch> {
        validate_batch_id(batch_id)?;
        if let Some(previous) = supersedes {
            validate_batch_id(previous)?;
        }
        let processing_uuid = snapshot.derive_id(&format!("batch:{}", batch_id))?;

        let mut ordered: Vec<&SceneDetections> = scenes.iter().collect();
        ordered.sort_by(|a, b| a.scene_id.cmp(&b.scene_id));

        let mut partitions: BTreeMap<PartitionKey, Vec<CatalogRow>> = BTreeMap::new();
        for scene in &ordered {
            for detection in &scene.detections {
                let zone = self.zone_of(detection.location);
                let mut key = PartitionKey::new(zone.clone(), self.params.granularity.period_of(detection.timestamp));
                if self.params.by_orbit {
                    key = key.with_orbit(scene.orbit_direction.map_or(UNKNOWN_ORBIT, |o| o.as_str()));
                }
                partitions
                    .entry(key)
                    .or_default()
                    .push(CatalogRow::from_detection(detection, scene, processing_uuid, zone));
            }
        }
        for rows in partitions.values_mut() {
            rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.detection_id.cmp(&b.detection_id)));
        }

        let batch = CatalogBatch {
            provenance: BatchProvenance {
                batch_id: batch_id.to_string(),
                processing_uuid,
                processed_at,
                snapshot: snapshot.clone(),
                supersedes: supersedes.map(str::to_string),
                scene_ids: ordered.iter().map(|s| s.scene_id.clone()).collect(),
            },
            partitions,
        };
        log::info!(
            "Catalog batch {}: {} rows in {} partitions",
            batch_id,
            batch.row_count(),
            batch.partitions.len()
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cfar::CellCounts;
    use crate::core::mask_align::AlignmentReport;
    use crate::core::pipeline::PipelineParams;
    use crate::types::{RadiometricReference, RcsMethod};
    use chrono::TimeZone;

    fn detection(id: &str, scene: &str, location: GeoPoint, timestamp: DateTime<Utc>) -> ShipDetection {
        ShipDetection {
            detection_id: id.to_string(),
            scene_id: scene.to_string(),
            timestamp,
            pixel_centroid: (10.5, 10.5),
            native_xy: (location.lon, location.lat),
            location,
            projected_xy: None,
            size_pixels: 30,
            size_m2: 3000.0,
            length_m: 100.0,
            width_m: 30.0,
            orientation_deg: 90.0,
            rcs_db: 38.6,
            peak_amplitude: 5.6,
            background_mean: 1.0,
            background_std: 0.05,
            contrast: 90.0,
            confidence: 0.97,
            wake_present: false,
            wake_polarity: None,
            near_shipping_lane: None,
            touches_coast: false,
            polarization: Polarization::VV,
            corrections: AttributeCorrections {
                incidence_angle_deg: 35.0,
                foreshortening_factor: 1.0,
                ground_range_spacing_m: 10.0,
                azimuth_spacing_m: 10.0,
                radiometric_reference: RadiometricReference::Sigma0,
                sigma0_conversion: 1.0,
                calibration_constant_db: 0.0,
                rcs_method: RcsMethod::IntegratedExcess,
            },
            ais: None,
        }
    }

    fn scene(id: &str, detections: Vec<ShipDetection>) -> SceneDetections {
        SceneDetections {
            scene_id: id.to_string(),
            run_id: Uuid::nil(),
            acquisition_time: detections[0].timestamp,
            orbit_direction: Some(OrbitDirection::Ascending),
            polarization: Polarization::VV,
            detections,
            cell_counts: CellCounts::default(),
            indeterminate_fraction: 0.02,
            alignment: AlignmentReport {
                displacement_px: 0.1,
                checked_points: 4,
            },
            rejected: BTreeMap::new(),
            candidates_found: 1,
        }
    }

    fn zones() -> Vec<MaritimeZone> {
        vec![MaritimeZone {
            name: "irish sea".to_string(),
            polygon: vec![
                GeoPoint::new(52.0, -6.5),
                GeoPoint::new(52.0, -3.0),
                GeoPoint::new(55.0, -3.0),
                GeoPoint::new(55.0, -6.5),
            ],
        }]
    }

    #[test]
    fn test_partitioning_by_zone_and_month() {
        let june = Utc.with_ymd_and_hms(2021, 6, 30, 23, 0, 0).unwrap();
        let july = Utc.with_ymd_and_hms(2021, 7, 1, 1, 0, 0).unwrap();
        let scenes = vec![
            scene("B", vec![detection("B-0001", "B", GeoPoint::new(53.5, -5.0), july)]),
            scene(
                "A",
                vec![
                    detection("A-0001", "A", GeoPoint::new(53.5, -5.0), june),
                    detection("A-0002", "A", GeoPoint::new(51.0, -10.0), june),
                ],
            ),
        ];

        let builder = CatalogBuilder::new(CatalogParams::default(), zones());
        let snapshot = ParameterSnapshot::capture(&PipelineParams::default());
        let batch = builder.build("batch-001", &snapshot, july, &scenes, None).unwrap();

        let keys: Vec<String> = batch.partitions.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["irish sea/2021-06", "irish sea/2021-07", "unzoned/2021-06"]);
        assert_eq!(batch.row_count(), 3);
        assert!(batch.rows().all(|r| r.processing_uuid == batch.provenance.processing_uuid));
        assert_eq!(batch.provenance.scene_ids, vec!["A", "B"]);
        assert_eq!(
            batch.partitions.keys().next().unwrap().relative_dir(),
            "zone=irish_sea-2621acc7/period=2021-06"
        );
    }

    #[test]
    fn test_sanitised_zone_names_do_not_collide() {
        let plain = PartitionKey::new("irish_sea", "2021-06");
        let spaced = PartitionKey::new("irish sea", "2021-06");
        let slashed = PartitionKey::new("irish/sea", "2021-06");

        assert_eq!(plain.relative_dir(), "zone=irish_sea/period=2021-06");
        assert_eq!(spaced.relative_dir(), "zone=irish_sea-2621acc7/period=2021-06");
        assert_eq!(slashed.relative_dir(), "zone=irish_sea-a5eefce5/period=2021-06");
    }

    #[test]
    fn test_partitioning_by_orbit() {
        let june = Utc.with_ymd_and_hms(2021, 6, 14, 6, 0, 0).unwrap();
        let mut descending = scene("B", vec![detection("B-0001", "B", GeoPoint::new(53.5, -5.0), june)]);
        descending.orbit_direction = Some(OrbitDirection::Descending);
        let mut unknown = scene("C", vec![detection("C-0001", "C", GeoPoint::new(53.5, -5.0), june)]);
        unknown.orbit_direction = None;
        let scenes = vec![
            scene("A", vec![detection("A-0001", "A", GeoPoint::new(53.5, -5.0), june)]),
            descending,
            unknown,
        ];
        let snapshot = ParameterSnapshot::capture(&PipelineParams::default());

        let flat = CatalogBuilder::new(CatalogParams::default(), zones())
            .build("b1", &snapshot, june, &scenes, None)
            .unwrap();
        assert_eq!(flat.partitions.len(), 1);

        let params = CatalogParams {
            by_orbit: true,
            ..CatalogParams::default()
        };
        let split = CatalogBuilder::new(params, zones()).build("b1", &snapshot, june, &scenes, None).unwrap();
        let keys: Vec<String> = split.partitions.keys().map(|k| k.to_string()).collect();
        assert_eq!(
            keys,
            vec!["irish sea/ascending/2021-06", "irish sea/descending/2021-06", "irish sea/unknown/2021-06"]
        );
        assert_eq!(
            split.partitions.keys().next().unwrap().relative_dir(),
            "zone=irish_sea-2621acc7/orbit=ascending/period=2021-06"
        );
    }

    #[test]
    fn test_processing_uuid_depends_on_batch_and_parameters() {
        let builder = CatalogBuilder::new(CatalogParams::default(), Vec::new());
        let t = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
        let scenes = vec![scene("A", vec![detection("A-0001", "A", GeoPoint::new(53.5, -5.0), t)])];
        let snapshot = ParameterSnapshot::capture(&PipelineParams::default());

        let a = builder.build("b1", &snapshot, t, &scenes, None).unwrap();
        let again = builder.build("b1", &snapshot, t, &scenes, None).unwrap();
        let other = builder.build("b2", &snapshot, t, &scenes, Some("b1")).unwrap();
        assert_eq!(a, again);
        assert_ne!(a.provenance.processing_uuid, other.provenance.processing_uuid);
        assert_eq!(other.provenance.supersedes.as_deref(), Some("b1"));
    }

    #[test]
    fn test_granularity_and_batch_ids() {
        let t = Utc.with_ymd_and_hms(2020, 1, 3, 17, 8, 15).unwrap();
        assert_eq!(TemporalGranularity::Day.period_of(t), "2020-01-03");
        assert_eq!(TemporalGranularity::Month.period_of(t), "2020-01");
        assert_eq!(TemporalGranularity::Year.period_of(t), "2020");
        assert!(validate_batch_id("2020-01_run.2").is_ok());
        assert!(validate_batch_id("../escape").is_err());
        assert!(validate_batch_id("").is_err());
    }
}
