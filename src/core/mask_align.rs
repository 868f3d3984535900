//! Land-sea mask alignment onto a scene grid.
//!
//! Masks arrive either as a categorical raster on their own grid and
//! projection or as land polygons. Both are resampled onto the scene grid
//! with nearest-neighbour sampling at pixel centres. Registration is checked
//! against reference coastline points: the mean distance from each point to
//! the nearest land/sea pixel edge of the aligned mask must stay within
//! tolerance, else the scene is rejected.

use crate::core::geodesy::{point_in_polygon, MapProjection, PixelLocator};
use crate::types::{CoordinateSystem, GeoPoint, GeoTransform, LandSeaMask, SarError, SarResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Mask in its native form
#[derive(Debug, Clone)]
pub enum MaskSource {
    /// Categorical raster (true = land) with its own grid
    Raster {
        land: Array2<bool>,
        transform: GeoTransform,
        coordinate_system: CoordinateSystem,
    },
    /// Land polygons in lon/lat (even-odd fill)
    Polygons { land: Vec<Vec<GeoPoint>> },
    /// Mask already on the scene grid
    Aligned(LandSeaMask),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentParams {
    /// Maximum mean boundary displacement in scene pixels
    pub tolerance_px: f64,
    /// Search radius for the nearest mask edge
    pub search_radius_px: usize,
}

impl Default for AlignmentParams {
    fn default() -> Self {
        Self {
            tolerance_px: 0.5,
            search_radius_px: 3,
        }
    }
}

/// Outcome of the registration check
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub displacement_px: f64,
    pub checked_points: usize,
}

pub struct MaskAligner {
    params: AlignmentParams,
}

impl MaskAligner {
    pub fn new(params: AlignmentParams) -> SarResult<Self> {
        if !(params.tolerance_px > 0.0) {
            return Err(SarError::InvalidParameters("alignment tolerance must be positive".to_string()));
        }
        Ok(Self { params })
    }

    /// Resample `source` onto the scene grid and validate it against `reference`
    pub fn align(
        &self,
        scene_id: &str,
        source: &MaskSource,
        dims: (usize, usize),
        locator: &PixelLocator,
        reference: &[GeoPoint],
    ) -> SarResult<(LandSeaMask, AlignmentReport)> {
        let mask = match source {
            MaskSource::Aligned(mask) => {
                if mask.dim() != dims {
                    return Err(SarError::InvalidFormat(format!(
                        "mask dimensions {:?} do not match raster {:?}",
                        mask.dim(),
                        dims
                    )));
                }
                mask.clone()
            }
            MaskSource::Raster {
                land,
                transform,
                coordinate_system,
            } => {
                let projection = MapProjection::for_coordinate_system(coordinate_system)?;
                resample_raster(land, transform, &projection, dims, locator)
            }
            MaskSource::Polygons { land } => rasterize_polygons(land, dims, locator),
        };

        let report = self.check_registration(&mask, locator, reference);
        if report.checked_points == 0 {
            log::warn!("Scene {}: no reference boundary points on the grid, registration unchecked", scene_id);
        } else {
            log::debug!(
                "Scene {}: mask displacement {:.3} px over {} reference points",
                scene_id,
                report.displacement_px,
                report.checked_points
            );
        }
        if report.displacement_px > self.params.tolerance_px {
            return Err(SarError::Alignment {
                scene_id: scene_id.to_string(),
                displacement_px: report.displacement_px,
                tolerance_px: self.params.tolerance_px,
            });
        }
        Ok((mask, report))
    }

    /// Mean distance from reference points to the nearest mask edge
    pub fn check_registration(&self, mask: &LandSeaMask, locator: &PixelLocator, reference: &[GeoPoint]) -> AlignmentReport {
        let (rows, cols) = mask.dim();
        let radius = self.params.search_radius_px as f64;
        let mut total = 0.0;
        let mut checked = 0usize;

        for &p in reference {
            let Some((row, col)) = locator.pixel_of(p) else {
                continue;
            };
            if row < -0.5 || col < -0.5 || row > rows as f64 - 0.5 || col > cols as f64 - 0.5 {
                continue;
            }
            let d = nearest_edge_distance(mask, (row, col), self.params.search_radius_px);
            total += d.unwrap_or(radius + 1.0);
            checked += 1;
        }

        AlignmentReport {
            displacement_px: if checked > 0 { total / checked as f64 } else { 0.0 },
            checked_points: checked,
        }
    }
}

fn resample_raster(
    land: &Array2<bool>,
    transform: &GeoTransform,
    projection: &MapProjection,
    dims: (usize, usize),
    locator: &PixelLocator,
) -> LandSeaMask {
    let (src_rows, src_cols) = land.dim();
    let same_projection = projection.epsg() == locator.native.epsg();
    let resampled = Array2::from_shape_fn(dims, |(r, c)| {
        let (x, y) = locator.native_xy(r as f64, c as f64);
        let (sx, sy) = if same_projection {
            (x, y)
        } else {
            projection.from_geographic(locator.native.to_geographic(x, y))
        };
        match transform.map_to_pixel(sx, sy) {
            Some((sr, sc)) if sr >= 0.0 && sc >= 0.0 => {
                let (sr, sc) = (sr.floor() as usize, sc.floor() as usize);
                // Outside the source counts as land
                if sr < src_rows && sc < src_cols {
                    land[[sr, sc]]
                } else {
                    true
                }
            }
            _ => true,
        }
    });
    LandSeaMask::from_land(resampled)
}

fn rasterize_polygons(polygons: &[Vec<GeoPoint>], dims: (usize, usize), locator: &PixelLocator) -> LandSeaMask {
    let land = Array2::from_shape_fn(dims, |(r, c)| {
        let p = locator.geographic(r as f64, c as f64);
        polygons.iter().any(|poly| point_in_polygon(p, poly))
    });
    LandSeaMask::from_land(land)
}

/// Distance from a pixel-index position to the nearest land/sea pixel edge
fn nearest_edge_distance(mask: &LandSeaMask, at: (f64, f64), radius: usize) -> Option<f64> {
    let (rows, cols) = mask.dim();
    let (row, col) = at;
    let r0 = (row.round() as isize - radius as isize).max(0) as usize;
    let c0 = (col.round() as isize - radius as isize).max(0) as usize;
    let r1 = ((row.round() as isize + radius as isize).max(0) as usize).min(rows.saturating_sub(1));
    let c1 = ((col.round() as isize + radius as isize).max(0) as usize).min(cols.saturating_sub(1));

    let mut best: Option<f64> = None;
    let mut consider = |d: f64| {
        if best.map_or(true, |b| d < b) {
            best = Some(d);
        }
    };

    for r in r0..=r1 {
        for c in c0..=c1 {
            let here = mask.is_land(r, c);
            // Vertical edge at col + 0.5 spanning row ± 0.5
            if c + 1 < cols && mask.is_land(r, c + 1) != here {
                consider(segment_distance(at, (r as f64 - 0.5, c as f64 + 0.5), (r as f64 + 0.5, c as f64 + 0.5)));
            }
            // Horizontal edge at row + 0.5 spanning col ± 0.5
            if r + 1 < rows && mask.is_land(r + 1, c) != here {
                consider(segment_distance(at, (r as f64 + 0.5, c as f64 - 0.5), (r as f64 + 0.5, c as f64 + 0.5)));
            }
        }
    }
    best
}

fn segment_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let t = if len2 > 0.0 {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> PixelLocator {
        // 0.001 degree pixels, top-left at (54.0 N, 8.0 W)
        PixelLocator::new(
            GeoTransform::north_up(-8.0, 54.0, 0.001, 0.001),
            MapProjection::Geographic,
            None,
        )
    }

    /// Land west of 7.97 W, i.e. columns 0..30
    fn western_land() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(53.0, -9.0),
            GeoPoint::new(53.0, -7.97),
            GeoPoint::new(55.0, -7.97),
            GeoPoint::new(55.0, -9.0),
        ]
    }

    fn coastline() -> Vec<GeoPoint> {
        (5..45).map(|i| GeoPoint::new(54.0 - i as f64 * 0.001 - 0.0005, -7.97)).collect()
    }

    #[test]
    fn test_polygon_mask_aligns() {
        let aligner = MaskAligner::new(AlignmentParams::default()).unwrap();
        let source = MaskSource::Polygons { land: vec![western_land()] };
        let (mask, report) = aligner.align("s1", &source, (50, 60), &locator(), &coastline()).unwrap();

        assert!(mask.is_land(10, 29));
        assert!(mask.is_sea(10, 30));
        assert_eq!(report.checked_points, 40);
        assert!(report.displacement_px < 0.5);
    }

    #[test]
    fn test_shifted_raster_rejected() {
        let mut land = Array2::from_elem((50, 60), false);
        for r in 0..50 {
            for c in 0..30 {
                land[[r, c]] = true;
            }
        }
        // Same content registered two pixels too far east
        let source = MaskSource::Raster {
            land,
            transform: GeoTransform::north_up(-7.998, 54.0, 0.001, 0.001),
            coordinate_system: CoordinateSystem::Geographic,
        };
        let aligner = MaskAligner::new(AlignmentParams::default()).unwrap();
        let result = aligner.align("s2", &source, (50, 60), &locator(), &coastline());

        match result {
            Err(SarError::Alignment { scene_id, displacement_px, .. }) => {
                assert_eq!(scene_id, "s2");
                assert!(displacement_px > 1.5);
            }
            other => panic!("expected alignment error, got {:?}", other.map(|(_, r)| r)),
        }
    }

    #[test]
    fn test_raster_on_same_grid_passes() {
        let mut land = Array2::from_elem((50, 60), false);
        for r in 0..50 {
            for c in 0..30 {
                land[[r, c]] = true;
            }
        }
        let source = MaskSource::Raster {
            land: land.clone(),
            transform: GeoTransform::north_up(-8.0, 54.0, 0.001, 0.001),
            coordinate_system: CoordinateSystem::Geographic,
        };
        let aligner = MaskAligner::new(AlignmentParams::default()).unwrap();
        let (mask, report) = aligner.align("s3", &source, (50, 60), &locator(), &coastline()).unwrap();
        assert_eq!(mask.land(), &land);
        assert!(report.displacement_px < 1e-6);
    }

    #[test]
    fn test_empty_reference_is_unchecked() {
        let aligner = MaskAligner::new(AlignmentParams::default()).unwrap();
        let source = MaskSource::Aligned(LandSeaMask::all_sea((10, 10)));
        let (_, report) = aligner.align("s4", &source, (10, 10), &locator(), &[]).unwrap();
        assert_eq!(report.checked_points, 0);
    }
}
