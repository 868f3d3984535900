use chrono::{DateTime, Utc};
use ndarray::Array2;
use num_traits::Float;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Real-valued amplitude data
pub type SarReal = f32;

/// 2D real SAR data array (azimuth lines x range samples)
pub type SarRealImage = Array2<SarReal>;

/// Coordinate system of a raster's map coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (longitude, latitude), EPSG:4326
    Geographic,
    /// Projected coordinates (e.g., UTM or Irish Transverse Mercator)
    Projected { epsg: u32 },
}

impl CoordinateSystem {
    pub fn from_epsg(epsg: u32) -> Self {
        if epsg == 4326 {
            CoordinateSystem::Geographic
        } else {
            CoordinateSystem::Projected { epsg }
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            CoordinateSystem::Geographic => 4326,
            CoordinateSystem::Projected { epsg } => *epsg,
        }
    }
}

/// Polarization channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl Polarization {
    /// Co-polarized channels carry most of the hull return
    pub fn is_co_pol(&self) -> bool {
        matches!(self, Polarization::VV | Polarization::HH)
    }
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl std::str::FromStr for Polarization {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            other => Err(SarError::InvalidFormat(format!("Invalid polarization: {}", other))),
        }
    }
}

/// Satellite pass direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbitDirection {
    Ascending,
    Descending,
}

impl OrbitDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrbitDirection::Ascending => "ascending",
            OrbitDirection::Descending => "descending",
        }
    }
}

/// Radiometric normalization the amplitude raster was calibrated to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadiometricReference {
    Sigma0,
    Beta0,
    Gamma0,
}

/// Geometry of the range axis of the raster grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeGeometry {
    /// Ground range / geocoded grid, spacing already on the ground
    GroundRange,
    /// Slant range grid, range spacing must be projected to the ground
    SlantRange,
}

/// A point on the WGS84 ellipsoid in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn contains(&self, p: GeoPoint) -> bool {
        p.lon >= self.min_lon && p.lon <= self.max_lon && p.lat >= self.min_lat && p.lat <= self.max_lat
    }
}

/// Affine grid-to-map transform (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square-ish pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    fn determinant(&self) -> f64 {
        self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y
    }

    /// A transform is usable when finite and invertible
    pub fn is_valid(&self) -> bool {
        let coeffs = [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ];
        coeffs.iter().all(|c| c.is_finite()) && self.determinant().abs() > f64::EPSILON
    }

    /// Map coordinates of a fractional pixel position.
    ///
    /// `row`/`col` are corner-based: (0.5, 0.5) is the centre of the first pixel.
    pub fn pixel_to_map(&self, row: f64, col: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Inverse of [`pixel_to_map`](Self::pixel_to_map), returning corner-based (row, col)
    pub fn map_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.determinant();
        if det.abs() <= f64::EPSILON {
            return None;
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (dx * self.pixel_height - dy * self.rotation_x) / det;
        let row = (dy * self.pixel_width - dx * self.rotation_y) / det;
        Some((row, col))
    }

    /// Map-space displacement of one pixel step along columns and rows
    pub fn axis_vectors(&self) -> ((f64, f64), (f64, f64)) {
        (
            (self.pixel_width, self.rotation_y),
            (self.rotation_x, self.pixel_height),
        )
    }
}

/// Incidence angle field over the scene grid (degrees)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IncidenceAngles {
    Constant(f64),
    /// Linear variation from the first to the last range sample (column)
    RangeLinear { near_deg: f64, far_deg: f64 },
}

impl IncidenceAngles {
    pub fn at(&self, col: f64, width: usize) -> f64 {
        match self {
            IncidenceAngles::Constant(deg) => *deg,
            IncidenceAngles::RangeLinear { near_deg, far_deg } => {
                if width <= 1 {
                    return *near_deg;
                }
                let t = (col / (width - 1) as f64).clamp(0.0, 1.0);
                near_deg + t * (far_deg - near_deg)
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        let ok = |d: f64| d.is_finite() && d > 0.0 && d < 90.0;
        match self {
            IncidenceAngles::Constant(deg) => ok(*deg),
            IncidenceAngles::RangeLinear { near_deg, far_deg } => ok(*near_deg) && ok(*far_deg),
        }
    }
}

/// Scene-level metadata delivered with the calibrated, geocoded raster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub scene_id: String,
    pub acquisition_time: DateTime<Utc>,
    pub polarizations: Vec<Polarization>,
    pub orbit_direction: Option<OrbitDirection>,
    /// (range, azimuth) pixel spacing in meters
    pub pixel_spacing: (f64, f64),
    pub geo_transform: Option<GeoTransform>,
    pub coordinate_system: CoordinateSystem,
    pub incidence: IncidenceAngles,
    pub radiometric_reference: RadiometricReference,
    pub range_geometry: RangeGeometry,
}

impl SceneMetadata {
    /// Check the geolocation block; failures reject the whole scene
    pub fn validate_geolocation(&self) -> SarResult<GeoTransform> {
        let invalid = |reason: &str| SarError::InvalidGeolocation {
            scene_id: self.scene_id.clone(),
            reason: reason.to_string(),
        };

        let transform = self.geo_transform.ok_or_else(|| invalid("missing geotransform"))?;
        if !transform.is_valid() {
            return Err(invalid("geotransform is not finite or not invertible"));
        }
        let (range_spacing, azimuth_spacing) = self.pixel_spacing;
        if !(range_spacing.is_finite() && range_spacing > 0.0 && azimuth_spacing.is_finite() && azimuth_spacing > 0.0) {
            return Err(invalid("pixel spacing must be positive and finite"));
        }
        if !self.incidence.is_valid() {
            return Err(invalid("incidence angle outside (0, 90) degrees"));
        }
        Ok(transform)
    }
}

/// Calibrated amplitude raster, one band per polarization
#[derive(Debug, Clone)]
pub struct SceneRaster {
    pub metadata: SceneMetadata,
    bands: BTreeMap<Polarization, SarRealImage>,
}

impl SceneRaster {
    pub fn new(metadata: SceneMetadata, bands: BTreeMap<Polarization, SarRealImage>) -> SarResult<Self> {
        let mut dims = None;
        for (pol, band) in &bands {
            match dims {
                None => dims = Some(band.dim()),
                Some(d) if d != band.dim() => {
                    return Err(SarError::InvalidFormat(format!(
                        "Band {} has dimensions {:?}, expected {:?}",
                        pol,
                        band.dim(),
                        d
                    )));
                }
                Some(_) => {}
            }
        }
        if dims.is_none() {
            return Err(SarError::InvalidFormat(format!(
                "Scene {} has no amplitude bands",
                metadata.scene_id
            )));
        }
        Ok(Self { metadata, bands })
    }

    /// Single-band convenience constructor
    pub fn single_band(metadata: SceneMetadata, polarization: Polarization, band: SarRealImage) -> SarResult<Self> {
        let mut bands = BTreeMap::new();
        bands.insert(polarization, band);
        Self::new(metadata, bands)
    }

    pub fn scene_id(&self) -> &str {
        &self.metadata.scene_id
    }

    /// (rows, cols) of every band
    pub fn dim(&self) -> (usize, usize) {
        self.bands.values().next().map(|b| b.dim()).unwrap_or((0, 0))
    }

    pub fn band(&self, pol: Polarization) -> Option<&SarRealImage> {
        self.bands.get(&pol)
    }

    pub fn polarizations(&self) -> impl Iterator<Item = Polarization> + '_ {
        self.bands.keys().copied()
    }

    /// Preferred band if present, else the first co-pol band, else any band
    pub fn detection_band(&self, preferred: Option<Polarization>) -> Option<(Polarization, &SarRealImage)> {
        if let Some(pol) = preferred {
            if let Some(band) = self.bands.get(&pol) {
                return Some((pol, band));
            }
        }
        self.bands
            .iter()
            .find(|(pol, _)| pol.is_co_pol())
            .or_else(|| self.bands.iter().next())
            .map(|(pol, band)| (*pol, band))
    }
}

/// Land-sea mask co-registered to a scene grid (true = land)
#[derive(Debug, Clone, PartialEq)]
pub struct LandSeaMask {
    land: Array2<bool>,
}

impl LandSeaMask {
    pub fn from_land(land: Array2<bool>) -> Self {
        Self { land }
    }

    /// All-sea mask of the given dimensions
    pub fn all_sea(dims: (usize, usize)) -> Self {
        Self { land: Array2::from_elem(dims, false) }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.land.dim()
    }

    pub fn is_land(&self, row: usize, col: usize) -> bool {
        self.land.get((row, col)).copied().unwrap_or(true)
    }

    pub fn is_sea(&self, row: usize, col: usize) -> bool {
        !self.is_land(row, col)
    }

    pub fn land(&self) -> &Array2<bool> {
        &self.land
    }

    pub fn sea(&self) -> Array2<bool> {
        self.land.mapv(|l| !l)
    }

    pub fn sea_fraction(&self) -> f64 {
        let total = self.land.len();
        if total == 0 {
            return 0.0;
        }
        self.land.iter().filter(|l| !**l).count() as f64 / total as f64
    }
}

/// Position report from the external AIS feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AisReport {
    /// Vessel identifier (MMSI)
    pub vessel_id: String,
    pub position: GeoPoint,
    pub timestamp: DateTime<Utc>,
    /// Speed over ground in knots
    pub speed_knots: Option<f64>,
    /// Course over ground in degrees from north
    pub course_deg: Option<f64>,
    /// AIS ship-and-cargo type code
    pub ship_type: Option<u8>,
}

/// Named polygon used only to partition the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaritimeZone {
    pub name: String,
    /// Closed or open ring of vertices in lon/lat
    pub polygon: Vec<GeoPoint>,
}

/// Mapped shipping corridor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingLane {
    pub name: String,
    pub centerline: Vec<GeoPoint>,
    /// Half-width of the corridor in meters
    pub buffer_m: f64,
}

/// Coarse vessel class derived from the AIS ship type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VesselCategory {
    Cargo,
    Tanker,
    Passenger,
    Fishing,
    Other,
    Unknown,
}

impl VesselCategory {
    pub fn from_ship_type(code: Option<u8>) -> Self {
        match code {
            Some(70..=79) => VesselCategory::Cargo,
            Some(80..=89) => VesselCategory::Tanker,
            Some(60..=69) => VesselCategory::Passenger,
            Some(30) => VesselCategory::Fishing,
            Some(90..=99) => VesselCategory::Other,
            _ => VesselCategory::Unknown,
        }
    }
}

/// Association between one detection and one AIS report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AisMatch {
    pub vessel_id: String,
    pub report_time: DateTime<Utc>,
    /// Distance between detection and propagated report position
    pub distance_m: f64,
    /// Report time minus acquisition time
    pub time_offset_s: f64,
    pub combined_distance: f64,
    /// Another vessel scored within the ambiguity band
    pub ambiguous: bool,
    pub category: VesselCategory,
}

/// Wake polarity relative to the surrounding sea
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WakePolarity {
    Bright,
    Dark,
}

/// Geometric and radiometric assumptions behind the physical attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeCorrections {
    pub incidence_angle_deg: f64,
    /// Factor applied to range spacing to obtain ground range spacing
    pub foreshortening_factor: f64,
    pub ground_range_spacing_m: f64,
    pub azimuth_spacing_m: f64,
    pub radiometric_reference: RadiometricReference,
    /// Factor converting the raster's intensity to sigma0
    pub sigma0_conversion: f64,
    pub calibration_constant_db: f64,
    pub rcs_method: RcsMethod,
}

/// How the radar cross-section was aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RcsMethod {
    /// Background-subtracted integrated intensity
    IntegratedExcess,
    /// Peak pixel intensity times pixel area
    Peak,
}

/// A finalized vessel detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipDetection {
    pub detection_id: String,
    pub scene_id: String,
    pub timestamp: DateTime<Utc>,
    /// Corner-based fractional pixel centroid (row, col)
    pub pixel_centroid: (f64, f64),
    /// Centroid in the raster's native map coordinates
    pub native_xy: (f64, f64),
    pub location: GeoPoint,
    /// Centroid in the configured output projection
    pub projected_xy: Option<(f64, f64)>,
    pub size_pixels: usize,
    pub size_m2: f64,
    pub length_m: f64,
    pub width_m: f64,
    pub orientation_deg: f64,
    pub rcs_db: f64,
    pub peak_amplitude: f32,
    pub background_mean: f32,
    pub background_std: f32,
    pub contrast: f64,
    pub confidence: f64,
    pub wake_present: bool,
    pub wake_polarity: Option<WakePolarity>,
    pub near_shipping_lane: Option<String>,
    pub touches_coast: bool,
    pub polarization: Polarization,
    pub corrections: AttributeCorrections,
    pub ais: Option<AisMatch>,
}

impl ShipDetection {
    pub fn ais_match_id(&self) -> Option<&str> {
        self.ais.as_ref().map(|m| m.vessel_id.as_str())
    }

    pub fn ais_ambiguous(&self) -> bool {
        self.ais.as_ref().map(|m| m.ambiguous).unwrap_or(false)
    }
}

/// Pipeline stage, used to tag scene- and batch-level failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Geolocation,
    MaskAlignment,
    ClutterEstimation,
    CandidateDetection,
    MorphologicalFilter,
    WakeCorroboration,
    AttributeExtraction,
    AisCorrelation,
    CatalogBuild,
    CatalogWrite,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Geolocation => "geolocation",
            Stage::MaskAlignment => "mask alignment",
            Stage::ClutterEstimation => "clutter estimation",
            Stage::CandidateDetection => "candidate detection",
            Stage::MorphologicalFilter => "morphological filter",
            Stage::WakeCorroboration => "wake corroboration",
            Stage::AttributeExtraction => "attribute extraction",
            Stage::AisCorrelation => "AIS correlation",
            Stage::CatalogBuild => "catalog build",
            Stage::CatalogWrite => "catalog write",
        };
        write!(f, "{}", name)
    }
}

/// Error types for ship detection processing
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("geolocation failed for scene {scene_id}: invalid geolocation metadata ({reason})")]
    InvalidGeolocation { scene_id: String, reason: String },

    #[error("mask alignment failed for scene {scene_id}: mask displaced by {displacement_px:.2} px (tolerance {tolerance_px} px)")]
    Alignment {
        scene_id: String,
        displacement_px: f64,
        tolerance_px: f64,
    },

    #[error("clutter estimation failed for scene {scene_id}: insufficient valid sea pixels (valid fraction {valid_fraction:.4})")]
    InsufficientSea { scene_id: String, valid_fraction: f64 },

    #[error("{stage} failed for scene {scene_id}: {source}")]
    StageFailed {
        stage: Stage,
        scene_id: String,
        #[source]
        source: Box<SarError>,
    },

    #[error("batch {batch_id} already committed")]
    AlreadyCommitted { batch_id: String },

    #[error("catalog write failed for batch {batch_id} after {attempts} attempt(s): {source}")]
    CatalogWrite {
        batch_id: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
}

impl SarError {
    /// Tag an error with the stage and scene it came from, once.
    pub fn in_stage(self, stage: Stage, scene_id: &str) -> SarError {
        match self {
            // Already carries its scene and a specific cause
            e @ SarError::StageFailed { .. }
            | e @ SarError::InvalidGeolocation { .. }
            | e @ SarError::Alignment { .. }
            | e @ SarError::InsufficientSea { .. } => e,
            other => SarError::StageFailed {
                stage,
                scene_id: scene_id.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Stage that produced the error, when it is known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            SarError::InvalidGeolocation { .. } => Some(Stage::Geolocation),
            SarError::Alignment { .. } => Some(Stage::MaskAlignment),
            SarError::InsufficientSea { .. } => Some(Stage::ClutterEstimation),
            SarError::StageFailed { stage, .. } => Some(*stage),
            SarError::CatalogWrite { .. } => Some(Stage::CatalogWrite),
            _ => None,
        }
    }

    /// Scene-level rejections reject the scene but not the batch
    pub fn is_scene_rejection(&self) -> bool {
        matches!(
            self,
            SarError::InvalidGeolocation { .. }
                | SarError::Alignment { .. }
                | SarError::InsufficientSea { .. }
                | SarError::StageFailed { .. }
        )
    }
}

/// Result type for SAR operations
pub type SarResult<T> = Result<T, SarError>;

/// Convert linear intensity to dB
pub fn intensity_to_db<T: Float>(intensity: T) -> T {
    let ten = T::from(10.0).unwrap_or_else(T::one);
    if intensity > T::zero() {
        ten * intensity.log10()
    } else {
        T::neg_infinity()
    }
}

/// Convert linear amplitude to dB (20 log10)
pub fn amplitude_to_db<T: Float>(amplitude: T) -> T {
    intensity_to_db(amplitude * amplitude)
}

/// Convert dB to linear intensity
pub fn db_to_intensity<T: Float>(db: T) -> T {
    let ten = T::from(10.0).unwrap_or_else(T::one);
    ten.powf(db / ten)
}
