use crate::types::{
    CoordinateSystem, GeoTransform, IncidenceAngles, OrbitDirection, Polarization, RadiometricReference,
    RangeGeometry, SarError, SarResult, SceneMetadata,
};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// Scene annotation sidecar written next to each calibrated, geocoded raster.
/// This represents the root <sceneAnnotation> element directly
#[derive(Debug, Deserialize)]
pub struct SceneAnnotation {
    #[serde(rename = "productId")]
    pub product_id: String,
    #[serde(rename = "acquisitionStart")]
    pub acquisition_start: Option<String>,
    #[serde(rename = "polarisationList")]
    pub polarisation_list: PolarisationList,
    #[serde(rename = "orbitDirection")]
    pub orbit_direction: Option<String>,
    #[serde(rename = "rangePixelSpacing")]
    pub range_pixel_spacing: Option<f64>,
    #[serde(rename = "azimuthPixelSpacing")]
    pub azimuth_pixel_spacing: Option<f64>,
    #[serde(rename = "geoTransform")]
    pub geo_transform: Option<String>,
    #[serde(rename = "epsg")]
    pub epsg: Option<u32>,
    #[serde(rename = "incidenceAngleNear")]
    pub incidence_angle_near: f64,
    #[serde(rename = "incidenceAngleFar")]
    pub incidence_angle_far: Option<f64>,
    #[serde(rename = "radiometricReference")]
    pub radiometric_reference: Option<String>,
    #[serde(rename = "rangeGeometry")]
    pub range_geometry: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PolarisationList {
    #[serde(rename = "polarisation")]
    pub polarisations: Vec<String>,
}

/// Fields encoded in a Sentinel-1 product name
#[derive(Debug, Clone, PartialEq)]
pub struct ProductName {
    pub mission: String,
    pub mode: String,
    pub product_type: String,
    pub resolution: Option<char>,
    pub processing_level: u8,
    /// SV, SH, DV, DH or a single channel
    pub polarization_class: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub absolute_orbit: u32,
    pub datatake_id: String,
}

static PRODUCT_NAME: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// Compiled once per process
fn product_name_pattern() -> SarResult<&'static Regex> {
    PRODUCT_NAME
        .get_or_init(|| {
            Regex::new(
                r"^(?P<mission>S1[A-D])_(?P<mode>IW|EW|SM|WV|S[1-6])_(?P<product>GRD|SLC|OCN|RAW)(?P<res>[FHM_])_(?P<level>[0-2])[SA](?P<pol>SH|SV|DH|DV|HH|HV|VV|VH)_(?P<start>\d{8}T\d{6})_(?P<stop>\d{8}T\d{6})_(?P<orbit>\d{6})_(?P<datatake>[0-9A-F]{6})_[0-9A-F]{4}(?:\.SAFE|\.zip)?$"
            )
        })
        .as_ref()
        .map_err(|e| SarError::Processing(format!("Regex error: {}", e)))
}

impl ProductName {
    pub fn parse(name: &str) -> SarResult<Self> {
        let pattern = product_name_pattern()?;
        let caps = pattern
            .captures(name.trim())
            .ok_or_else(|| SarError::InvalidFormat(format!("Not a Sentinel-1 product name: {}", name)))?;
        let field = |key: &str| caps.name(key).map(|m| m.as_str()).unwrap_or_default();
        let compact_time = |key: &str| -> SarResult<DateTime<Utc>> {
            NaiveDateTime::parse_from_str(field(key), "%Y%m%dT%H%M%S")
                .map(|t| Utc.from_utc_datetime(&t))
                .map_err(|e| SarError::InvalidFormat(format!("Bad {} time in {}: {}", key, name, e)))
        };

        Ok(Self {
            mission: field("mission").to_string(),
            mode: field("mode").to_string(),
            product_type: field("product").to_string(),
            resolution: field("res").chars().next().filter(|c| *c != '_'),
            processing_level: field("level").parse().unwrap_or_default(),
            polarization_class: field("pol").to_string(),
            start: compact_time("start")?,
            stop: compact_time("stop")?,
            absolute_orbit: field("orbit")
                .parse()
                .map_err(|e| SarError::InvalidFormat(format!("Bad orbit number in {}: {}", name, e)))?,
            datatake_id: field("datatake").to_string(),
        })
    }

    /// Channels implied by the polarization class
    pub fn polarizations(&self) -> Vec<Polarization> {
        match self.polarization_class.as_str() {
            "SV" | "VV" => vec![Polarization::VV],
            "SH" | "HH" => vec![Polarization::HH],
            "DV" => vec![Polarization::VV, Polarization::VH],
            "DH" => vec![Polarization::HH, Polarization::HV],
            "VH" => vec![Polarization::VH],
            "HV" => vec![Polarization::HV],
            _ => Vec::new(),
        }
    }
}

/// Parser for scene annotation sidecars
pub struct AnnotationParser;

impl AnnotationParser {
    /// Parse the annotation XML
    pub fn parse_annotation(xml_content: &str) -> SarResult<SceneAnnotation> {
        from_str::<SceneAnnotation>(xml_content)
            .map_err(|e| SarError::XmlParsing(format!("Failed to parse scene annotation XML: {}", e)))
    }

    /// Parse the annotation XML straight into validated scene metadata
    pub fn parse_scene_metadata(xml_content: &str) -> SarResult<SceneMetadata> {
        let annotation = Self::parse_annotation(xml_content)?;
        let metadata = Self::scene_metadata(&annotation)?;
        metadata.validate_geolocation()?;
        Ok(metadata)
    }

    /// Convert a parsed annotation into scene metadata
    pub fn scene_metadata(annotation: &SceneAnnotation) -> SarResult<SceneMetadata> {
        let scene_id = annotation.product_id.trim().to_string();
        let product = ProductName::parse(&scene_id).ok();
        let invalid = |reason: String| SarError::InvalidGeolocation {
            scene_id: scene_id.clone(),
            reason,
        };

        let acquisition_time = match (&annotation.acquisition_start, &product) {
            (Some(text), _) => Self::parse_time(text)?,
            (None, Some(p)) => p.start,
            (None, None) => {
                return Err(SarError::InvalidFormat(format!(
                    "Scene {} has no acquisition time",
                    scene_id
                )))
            }
        };

        let polarizations = annotation
            .polarisation_list
            .polarisations
            .iter()
            .map(|p| p.parse::<Polarization>())
            .collect::<SarResult<Vec<_>>>()?;

        let orbit_direction = match annotation.orbit_direction.as_deref().map(str::trim) {
            None => None,
            Some(d) if d.eq_ignore_ascii_case("ascending") => Some(OrbitDirection::Ascending),
            Some(d) if d.eq_ignore_ascii_case("descending") => Some(OrbitDirection::Descending),
            Some(other) => {
                return Err(SarError::InvalidFormat(format!("Unknown orbit direction: {}", other)));
            }
        };

        let pixel_spacing = match (annotation.range_pixel_spacing, annotation.azimuth_pixel_spacing) {
            (Some(range), Some(azimuth)) => (range, azimuth),
            _ => return Err(invalid("missing pixel spacing".to_string())),
        };

        let geo_transform = annotation
            .geo_transform
            .as_deref()
            .map(|text| Self::parse_geo_transform(text).map_err(|e| invalid(e.to_string())))
            .transpose()?;

        let incidence = match annotation.incidence_angle_far {
            Some(far) => IncidenceAngles::RangeLinear {
                near_deg: annotation.incidence_angle_near,
                far_deg: far,
            },
            None => IncidenceAngles::Constant(annotation.incidence_angle_near),
        };

        let radiometric_reference = match annotation
            .radiometric_reference
            .as_deref()
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("sigma0") | Some("sigmanought") => RadiometricReference::Sigma0,
            Some("beta0") | Some("betanought") => RadiometricReference::Beta0,
            Some("gamma0") | Some("gammanought") => RadiometricReference::Gamma0,
            Some(other) => {
                return Err(SarError::InvalidFormat(format!("Unknown radiometric reference: {}", other)));
            }
        };

        let range_geometry = match annotation.range_geometry.as_deref().map(str::trim) {
            None => RangeGeometry::GroundRange,
            Some(g) if g.eq_ignore_ascii_case("groundrange") => RangeGeometry::GroundRange,
            Some(g) if g.eq_ignore_ascii_case("slantrange") => RangeGeometry::SlantRange,
            Some(other) => {
                return Err(SarError::InvalidFormat(format!("Unknown range geometry: {}", other)));
            }
        };

        log::debug!(
            "Parsed annotation for {}: {} polarizations, spacing {:?}",
            scene_id,
            polarizations.len(),
            pixel_spacing
        );

        Ok(SceneMetadata {
            acquisition_time,
            polarizations,
            orbit_direction,
            pixel_spacing,
            geo_transform,
            coordinate_system: CoordinateSystem::from_epsg(annotation.epsg.unwrap_or(4326)),
            incidence,
            radiometric_reference,
            range_geometry,
            scene_id,
        })
    }

    /// Six whitespace-separated GDAL coefficients
    pub fn parse_geo_transform(text: &str) -> SarResult<GeoTransform> {
        let values = text
            .split_whitespace()
            .map(|v| v.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SarError::InvalidFormat(format!("Bad geotransform value: {}", e)))?;
        if values.len() != 6 {
            return Err(SarError::InvalidFormat(format!(
                "Geotransform needs 6 coefficients, got {}",
                values.len()
            )));
        }
        Ok(GeoTransform {
            top_left_x: values[0],
            pixel_width: values[1],
            rotation_x: values[2],
            top_left_y: values[3],
            rotation_y: values[4],
            pixel_height: values[5],
        })
    }

    /// Annotation timestamps, with or without a zone suffix
    pub fn parse_time(text: &str) -> SarResult<DateTime<Utc>> {
        let text = text.trim();
        if let Ok(t) = DateTime::parse_from_rfc3339(text) {
            return Ok(t.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|t| Utc.from_utc_datetime(&t))
            .map_err(|e| SarError::InvalidFormat(format!("Bad timestamp {}: {}", text, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const PRODUCT: &str = "S1A_IW_GRDH_1SDV_20200103T170815_20200103T170840_030639_0382D5_DADE";

    fn sample_xml(geo_transform: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
        <sceneAnnotation>
            <productId>{}</productId>
            <acquisitionStart>2020-01-03T17:08:15.123456</acquisitionStart>
            <polarisationList>
                <polarisation>VV</polarisation>
                <polarisation>VH</polarisation>
            </polarisationList>
            <orbitDirection>ASCENDING</orbitDirection>
            <rangePixelSpacing>10.0</rangePixelSpacing>
            <azimuthPixelSpacing>10.0</azimuthPixelSpacing>
            <geoTransform>{}</geoTransform>
            <epsg>2157</epsg>
            <incidenceAngleNear>30.8</incidenceAngleNear>
            <incidenceAngleFar>46.0</incidenceAngleFar>
            <radiometricReference>sigma0</radiometricReference>
            <rangeGeometry>groundRange</rangeGeometry>
        </sceneAnnotation>"#,
            PRODUCT, geo_transform
        )
    }

    #[test]
    fn test_annotation_parsing() {
        let xml = sample_xml("700000 10 0 750000 0 -10");
        let result = AnnotationParser::parse_scene_metadata(&xml);
        assert!(result.is_ok());
        let metadata = result.unwrap();

        assert_eq!(metadata.scene_id, PRODUCT);
        assert_eq!(metadata.polarizations, vec![Polarization::VV, Polarization::VH]);
        assert_eq!(metadata.orbit_direction, Some(OrbitDirection::Ascending));
        assert_eq!(metadata.coordinate_system, CoordinateSystem::Projected { epsg: 2157 });
        assert_eq!(metadata.acquisition_time.nanosecond(), 123_456_000);
        assert_eq!(metadata.geo_transform.unwrap().pixel_height, -10.0);
        match metadata.incidence {
            IncidenceAngles::RangeLinear { near_deg, far_deg } => {
                assert_eq!(near_deg, 30.8);
                assert_eq!(far_deg, 46.0);
            }
            other => panic!("unexpected incidence {:?}", other),
        }
    }

    #[test]
    fn test_malformed_geotransform_is_geolocation_error() {
        let xml = sample_xml("700000 10 0 750000");
        let result = AnnotationParser::parse_scene_metadata(&xml);
        assert!(matches!(result, Err(SarError::InvalidGeolocation { .. })));

        let degenerate = sample_xml("700000 0 0 750000 0 0");
        let result = AnnotationParser::parse_scene_metadata(&degenerate);
        assert!(matches!(result, Err(SarError::InvalidGeolocation { .. })));
    }

    #[test]
    fn test_product_name_parsing() {
        let name = ProductName::parse(PRODUCT).unwrap();
        assert_eq!(name.mission, "S1A");
        assert_eq!(name.mode, "IW");
        assert_eq!(name.product_type, "GRD");
        assert_eq!(name.resolution, Some('H'));
        assert_eq!(name.processing_level, 1);
        assert_eq!(name.absolute_orbit, 30639);
        assert_eq!(name.datatake_id, "0382D5");
        assert_eq!(name.start.day(), 3);
        assert_eq!((name.stop - name.start).num_seconds(), 25);
        assert_eq!(name.polarizations(), vec![Polarization::VV, Polarization::VH]);

        assert!(ProductName::parse(&format!("{}.SAFE", PRODUCT)).is_ok());
        assert!(ProductName::parse("S1A_IW_GRDH_broken").is_err());
    }

    #[test]
    fn test_product_name_pattern_is_compiled_once() {
        let first = product_name_pattern().unwrap();
        ProductName::parse(PRODUCT).unwrap();
        assert!(std::ptr::eq(first, product_name_pattern().unwrap()));
    }
}
