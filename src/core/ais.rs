//! Spatio-temporal association of detections with AIS reports.

use crate::core::geodesy::{destination, haversine_m, KNOT_MS};
use crate::types::{AisMatch, AisReport, GeoPoint, SarError, SarResult, ShipDetection, VesselCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// AIS correlation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AisParams {
    /// Spatial search radius around the detection
    pub max_distance_m: f64,
    /// Temporal window around the acquisition time
    pub max_time_offset_s: f64,
    /// Weight of distance / max_distance in the combined distance
    pub spatial_weight: f64,
    /// Weight of |Δt| / max_time_offset in the combined distance
    pub temporal_weight: f64,
    /// Two vessels whose combined distances differ by at most this are ambiguous
    pub ambiguity_band: f64,
    /// Reports further than this from the acquisition are not dead-reckoned
    pub max_extrapolation_s: f64,
}

impl Default for AisParams {
    fn default() -> Self {
        Self {
            max_distance_m: 500.0,
            max_time_offset_s: 1800.0, // 30 minutes
            spatial_weight: 0.5,
            temporal_weight: 0.5,
            ambiguity_band: 0.1,
            max_extrapolation_s: 1800.0,
        }
    }
}

impl AisParams {
    pub fn validate(&self) -> SarResult<()> {
        if !(self.max_distance_m > 0.0 && self.max_time_offset_s > 0.0) {
            return Err(SarError::InvalidParameters("AIS tolerances must be positive".to_string()));
        }
        if !(self.spatial_weight >= 0.0 && self.temporal_weight >= 0.0)
            || self.spatial_weight + self.temporal_weight <= 0.0
        {
            return Err(SarError::InvalidParameters(
                "AIS weights must be non-negative and not both zero".to_string(),
            ));
        }
        if !(self.ambiguity_band >= 0.0 && self.max_extrapolation_s >= 0.0) {
            return Err(SarError::InvalidParameters(
                "AIS ambiguity band and extrapolation limit must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// A report that fell inside both tolerances
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredReport<'a> {
    pub report: &'a AisReport,
    pub propagated: GeoPoint,
    pub distance_m: f64,
    /// Report time minus acquisition time
    pub time_offset_s: f64,
    pub combined: f64,
}

fn rank(a: &ScoredReport, b: &ScoredReport) -> Ordering {
    a.combined
        .total_cmp(&b.combined)
        .then(a.distance_m.total_cmp(&b.distance_m))
        .then(a.report.timestamp.cmp(&b.report.timestamp))
        .then(a.report.vessel_id.cmp(&b.report.vessel_id))
}

/// Correlator over one snapshot of the AIS feed
pub struct AisCorrelator {
    params: AisParams,
    reports: Vec<AisReport>,
}

impl AisCorrelator {
    pub fn new(params: AisParams, mut reports: Vec<AisReport>) -> SarResult<Self> {
        params.validate()?;
        reports.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.vessel_id.cmp(&b.vessel_id)));
        Ok(Self { params, reports })
    }

    pub fn params(&self) -> &AisParams {
        &self.params
    }

    pub fn report_count(&self) -> usize {
        self.reports.len()
    }

    /// Report position dead-reckoned to `at`, when speed and course are known
    pub fn propagate(&self, report: &AisReport, at: DateTime<Utc>) -> GeoPoint {
        let dt = (at - report.timestamp).num_milliseconds() as f64 / 1000.0;
        match (report.speed_knots, report.course_deg) {
            (Some(speed), Some(course))
                if speed.is_finite() && course.is_finite() && dt.abs() <= self.params.max_extrapolation_s =>
            {
                destination(report.position, course, speed * KNOT_MS * dt)
            }
            _ => report.position,
        }
    }

    /// Reports inside both tolerances, best per vessel, ranked best first
    pub fn candidates(&self, location: GeoPoint, time: DateTime<Utc>) -> Vec<ScoredReport<'_>> {
        let p = &self.params;
        let mut best_per_vessel: BTreeMap<&str, ScoredReport> = BTreeMap::new();

        for report in &self.reports {
            let time_offset_s = (report.timestamp - time).num_milliseconds() as f64 / 1000.0;
            if time_offset_s.abs() > p.max_time_offset_s {
                continue;
            }
            let propagated = self.propagate(report, time);
            let distance_m = haversine_m(location, propagated);
            if distance_m > p.max_distance_m {
                continue;
            }
            let combined =
                p.spatial_weight * distance_m / p.max_distance_m + p.temporal_weight * time_offset_s.abs() / p.max_time_offset_s;
            let scored = ScoredReport {
                report,
                propagated,
                distance_m,
                time_offset_s,
                combined,
            };
            let better = best_per_vessel
                .get(report.vessel_id.as_str())
                .map_or(true, |existing| rank(existing, &scored) == Ordering::Greater);
            if better {
                best_per_vessel.insert(report.vessel_id.as_str(), scored);
            }
        }

        let mut ranked: Vec<ScoredReport> = best_per_vessel.into_values().collect();
        ranked.sort_by(rank);
        ranked
    }

    /// Best association for a detection, flagged when another vessel is within the band
    pub fn best_match(&self, location: GeoPoint, time: DateTime<Utc>) -> Option<AisMatch> {
        let ranked = self.candidates(location, time);
        let best = ranked.first()?;
        let ambiguous = ranked
            .get(1)
            .map_or(false, |second| second.combined - best.combined <= self.params.ambiguity_band);

        Some(AisMatch {
            vessel_id: best.report.vessel_id.clone(),
            report_time: best.report.timestamp,
            distance_m: best.distance_m,
            time_offset_s: best.time_offset_s,
            combined_distance: best.combined,
            ambiguous,
            category: VesselCategory::from_ship_type(best.report.ship_type),
        })
    }

    /// Attach AIS matches to a scene's finalized detections
    pub fn correlate(&self, detections: &mut [ShipDetection]) {
        let mut matched = 0usize;
        let mut ambiguous = 0usize;
        for detection in detections.iter_mut() {
            detection.ais = self.best_match(detection.location, detection.timestamp);
            if let Some(m) = &detection.ais {
                matched += 1;
                if m.ambiguous {
                    ambiguous += 1;
                }
            }
        }
        log::info!(
            "AIS correlation: {}/{} detections matched, {} ambiguous",
            matched,
            detections.len(),
            ambiguous
        );
    }
}
