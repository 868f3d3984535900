//! Geodetic helpers: WGS84 transverse Mercator, great-circle distances and
//! dead reckoning on the sphere.

use crate::types::{CoordinateSystem, GeoPoint, GeoTransform, SarError, SarResult};
use serde::{Deserialize, Serialize};

const INVERSE_REFINEMENTS: usize = 4;
const WGS84_A: f64 = 6_378_137.0; // WGS84 semi-major axis
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const MEAN_EARTH_RADIUS: f64 = 6_371_008.8;

/// Meters per second in one knot
pub const KNOT_MS: f64 = 1852.0 / 3600.0;

/// Transverse Mercator parameters on the WGS84 ellipsoid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransverseMercator {
    pub lat0_deg: f64,
    pub lon0_deg: f64,
    pub scale: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl TransverseMercator {
    pub fn utm(zone: u32, north: bool) -> Self {
        Self {
            lat0_deg: 0.0,
            lon0_deg: zone as f64 * 6.0 - 183.0,
            scale: 0.9996,
            false_easting: 500_000.0,
            false_northing: if north { 0.0 } else { 10_000_000.0 },
        }
    }

    /// Irish Transverse Mercator (EPSG:2157)
    pub fn irish_tm() -> Self {
        Self {
            lat0_deg: 53.5,
            lon0_deg: -8.0,
            scale: 0.999_820,
            false_easting: 600_000.0,
            false_northing: 750_000.0,
        }
    }

    pub fn from_epsg(epsg: u32) -> Option<Self> {
        match epsg {
            32601..=32660 => Some(Self::utm(epsg - 32600, true)),
            32701..=32760 => Some(Self::utm(epsg - 32700, false)),
            2157 => Some(Self::irish_tm()),
            _ => None,
        }
    }

    fn ellipsoid() -> (f64, f64) {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        (e2, e2 / (1.0 - e2))
    }

    fn meridian_arc(phi: f64) -> f64 {
        let (e2, _) = Self::ellipsoid();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        WGS84_A
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
    }

    /// Geographic to (easting, northing)
    pub fn forward(&self, p: GeoPoint) -> (f64, f64) {
        let (e2, ep2) = Self::ellipsoid();
        let phi = p.lat.to_radians();
        let lam = p.lon.to_radians();
        let lam0 = self.lon0_deg.to_radians();

        let sin_phi = phi.sin();
        let cos_phi = phi.cos();
        let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
        let t = phi.tan().powi(2);
        let c = ep2 * cos_phi * cos_phi;
        let a = (lam - lam0) * cos_phi;
        let m = Self::meridian_arc(phi);
        let m0 = Self::meridian_arc(self.lat0_deg.to_radians());

        let x = self.scale
            * n
            * (a + (1.0 - t + c) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0);
        let y = self.scale
            * (m - m0
                + n * phi.tan()
                    * (a * a / 2.0
                        + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                        + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));

        (x + self.false_easting, y + self.false_northing)
    }

    /// (easting, northing) to geographic, refined until it round-trips through `forward`
    pub fn inverse(&self, easting: f64, northing: f64) -> GeoPoint {
        let (e2, _) = Self::ellipsoid();
        let mut p = self.series_inverse(easting, northing);
        for _ in 0..INVERSE_REFINEMENTS {
            let (x, y) = self.forward(p);
            let (de, dn) = (easting - x, northing - y);
            if de.abs() < 1e-9 && dn.abs() < 1e-9 {
                break;
            }
            let phi = p.lat.to_radians();
            let w = 1.0 - e2 * phi.sin().powi(2);
            let meridional = WGS84_A * (1.0 - e2) / w.powf(1.5) * self.scale;
            let parallel = WGS84_A / w.sqrt() * phi.cos() * self.scale;
            p = GeoPoint::new(
                p.lat + (dn / meridional).to_degrees(),
                p.lon + (de / parallel).to_degrees(),
            );
        }
        p
    }

    fn series_inverse(&self, easting: f64, northing: f64) -> GeoPoint {
        let (e2, ep2) = Self::ellipsoid();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let m0 = Self::meridian_arc(self.lat0_deg.to_radians());
        let m = m0 + (northing - self.false_northing) / self.scale;
        let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
        let sqrt_1me2 = (1.0 - e2).sqrt();
        let e1 = (1.0 - sqrt_1me2) / (1.0 + sqrt_1me2);

        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let sin1 = phi1.sin();
        let cos1 = phi1.cos();
        let c1 = ep2 * cos1 * cos1;
        let t1 = phi1.tan().powi(2);
        let n1 = WGS84_A / (1.0 - e2 * sin1 * sin1).sqrt();
        let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin1 * sin1).powf(1.5);
        let d = (easting - self.false_easting) / (n1 * self.scale);

        let phi = phi1
            - (n1 * phi1.tan() / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);
        let lam = self.lon0_deg.to_radians()
            + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
                + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
                    / 120.0)
                / cos1;

        GeoPoint::new(phi.to_degrees(), lam.to_degrees())
    }
}

/// Map projection of a raster's native or output coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapProjection {
    Geographic,
    TransverseMercator { epsg: u32, tm: TransverseMercator },
}

impl MapProjection {
    pub fn for_coordinate_system(cs: &CoordinateSystem) -> SarResult<Self> {
        match cs {
            CoordinateSystem::Geographic => Ok(MapProjection::Geographic),
            CoordinateSystem::Projected { epsg } => TransverseMercator::from_epsg(*epsg)
                .map(|tm| MapProjection::TransverseMercator { epsg: *epsg, tm })
                .ok_or_else(|| SarError::InvalidParameters(format!("Unsupported projection EPSG:{}", epsg))),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            MapProjection::Geographic => 4326,
            MapProjection::TransverseMercator { epsg, .. } => *epsg,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, MapProjection::Geographic)
    }

    /// Map (x, y) to geographic; geographic maps use x = lon, y = lat
    pub fn to_geographic(&self, x: f64, y: f64) -> GeoPoint {
        match self {
            MapProjection::Geographic => GeoPoint::new(y, x),
            MapProjection::TransverseMercator { tm, .. } => tm.inverse(x, y),
        }
    }

    pub fn from_geographic(&self, p: GeoPoint) -> (f64, f64) {
        match self {
            MapProjection::Geographic => (p.lon, p.lat),
            MapProjection::TransverseMercator { tm, .. } => tm.forward(p),
        }
    }

    /// Meters per map unit along (x, y) near `at`
    pub fn meters_per_unit(&self, at: GeoPoint) -> (f64, f64) {
        match self {
            MapProjection::Geographic => {
                let m_per_deg = MEAN_EARTH_RADIUS.to_radians();
                (m_per_deg * at.lat.to_radians().cos(), m_per_deg)
            }
            MapProjection::TransverseMercator { .. } => (1.0, 1.0),
        }
    }
}

/// Great-circle distance in meters
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dphi = phi2 - phi1;
    let dlam = (b.lon - a.lon).to_radians();
    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlam / 2.0).sin().powi(2);
    2.0 * MEAN_EARTH_RADIUS * h.sqrt().min(1.0).asin()
}

/// Initial great-circle bearing from `a` to `b`, degrees clockwise from north
pub fn initial_bearing_deg(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dlam = (b.lon - a.lon).to_radians();
    let y = dlam.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlam.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Point reached after travelling `distance_m` along `bearing_deg`.
///
/// Negative distances travel backwards along the same bearing.
pub fn destination(start: GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let delta = distance_m / MEAN_EARTH_RADIUS;
    let theta = bearing_deg.to_radians();
    let phi1 = start.lat.to_radians();
    let lam1 = start.lon.to_radians();

    let sin_phi2 = phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos();
    let phi2 = sin_phi2.clamp(-1.0, 1.0).asin();
    let y = theta.sin() * delta.sin() * phi1.cos();
    let x = delta.cos() - phi1.sin() * sin_phi2;
    let lam2 = lam1 + y.atan2(x);

    let lon = (lam2.to_degrees() + 540.0) % 360.0 - 180.0;
    GeoPoint::new(phi2.to_degrees(), lon)
}

/// Local east/north offset of `p` from `origin` in meters (equirectangular)
fn local_offset_m(origin: GeoPoint, p: GeoPoint) -> (f64, f64) {
    let m_per_deg = MEAN_EARTH_RADIUS.to_radians();
    let east = (p.lon - origin.lon) * m_per_deg * origin.lat.to_radians().cos();
    let north = (p.lat - origin.lat) * m_per_deg;
    (east, north)
}

/// Shortest distance in meters from `p` to a polyline
pub fn distance_to_polyline_m(p: GeoPoint, line: &[GeoPoint]) -> f64 {
    match line.len() {
        0 => f64::INFINITY,
        1 => haversine_m(p, line[0]),
        _ => line
            .windows(2)
            .map(|seg| {
                let (ax, ay) = local_offset_m(p, seg[0]);
                let (bx, by) = local_offset_m(p, seg[1]);
                let (dx, dy) = (bx - ax, by - ay);
                let len2 = dx * dx + dy * dy;
                let t = if len2 > 0.0 {
                    (-(ax * dx + ay * dy) / len2).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let (cx, cy) = (ax + t * dx, ay + t * dy);
                (cx * cx + cy * cy).sqrt()
            })
            .fold(f64::INFINITY, f64::min),
    }
}

/// Even-odd point-in-polygon test in lon/lat space
pub fn point_in_polygon(p: GeoPoint, polygon: &[GeoPoint]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (vi, vj) = (polygon[i], polygon[j]);
        if (vi.lat > p.lat) != (vj.lat > p.lat) {
            let lon_cross = vi.lon + (p.lat - vi.lat) / (vj.lat - vi.lat) * (vj.lon - vi.lon);
            if p.lon < lon_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Maps pixel indices of one raster to native, geographic and output coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelLocator {
    pub transform: GeoTransform,
    pub native: MapProjection,
    pub output: Option<MapProjection>,
}

impl PixelLocator {
    pub fn new(transform: GeoTransform, native: MapProjection, output: Option<MapProjection>) -> Self {
        Self {
            transform,
            native,
            output,
        }
    }

    /// Native map coordinates of a pixel-index position (centres on integers)
    pub fn native_xy(&self, row: f64, col: f64) -> (f64, f64) {
        self.transform.pixel_to_map(row + 0.5, col + 0.5)
    }

    pub fn geographic(&self, row: f64, col: f64) -> GeoPoint {
        let (x, y) = self.native_xy(row, col);
        self.native.to_geographic(x, y)
    }

    pub fn projected(&self, row: f64, col: f64) -> Option<(f64, f64)> {
        let output = self.output?;
        Some(output.from_geographic(self.geographic(row, col)))
    }

    /// Pixel-index position of a geographic point, if the transform inverts
    pub fn pixel_of(&self, p: GeoPoint) -> Option<(f64, f64)> {
        let (x, y) = self.native.from_geographic(p);
        self.transform.map_to_pixel(x, y).map(|(r, c)| (r - 0.5, c - 0.5))
    }

    /// Bearing from grid north in [0, 180) of a (row, col) direction
    pub fn axis_bearing_deg(&self, direction: (f64, f64), at: GeoPoint) -> f64 {
        let ((cx, cy), (rx, ry)) = self.transform.axis_vectors();
        let (mx, my) = self.native.meters_per_unit(at);
        let east = (direction.1 * cx + direction.0 * rx) * mx;
        let north = (direction.1 * cy + direction.0 * ry) * my;
        let bearing = east.atan2(north).to_degrees().rem_euclid(180.0);
        if bearing >= 180.0 {
            0.0
        } else {
            bearing
        }
    }
}
