//! Overlapping tiles for clutter estimation and region extraction.
//!
//! Each tile owns a core block of the raster and is processed with a halo
//! of context around it, so that every core cell sees the same training
//! rings it would see in a whole-scene run. Regions are labelled per tile
//! core and stitched across seams with a union-find; the tile containing a
//! merged region's centroid owns it.

use crate::core::candidate::label_regions;
use crate::core::cfar::{ClutterEstimator, ClutterMap};
use crate::types::{SarError, SarResult};
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Tiling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilingParams {
    /// Side of a tile core in pixels
    pub tile_size: usize,
}

impl Default for TilingParams {
    fn default() -> Self {
        Self { tile_size: 512 }
    }
}

/// One tile: a core block plus its padded processing extent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// (tile row, tile column) in the grid
    pub index: (usize, usize),
    /// Core rows/cols, half-open
    pub core_rows: (usize, usize),
    pub core_cols: (usize, usize),
    /// Padded rows/cols, half-open, clipped to the raster
    pub padded_rows: (usize, usize),
    pub padded_cols: (usize, usize),
}

impl Tile {
    pub fn core_dim(&self) -> (usize, usize) {
        (self.core_rows.1 - self.core_rows.0, self.core_cols.1 - self.core_cols.0)
    }

    /// Offset of the core inside the padded block
    pub fn core_offset(&self) -> (usize, usize) {
        (self.core_rows.0 - self.padded_rows.0, self.core_cols.0 - self.padded_cols.0)
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        (self.core_rows.0..self.core_rows.1).contains(&row) && (self.core_cols.0..self.core_cols.1).contains(&col)
    }
}

/// Regular grid of tiles covering a raster
#[derive(Debug, Clone)]
pub struct TileGrid {
    dims: (usize, usize),
    tile_size: usize,
    halo: usize,
    grid_dims: (usize, usize),
    tiles: Vec<Tile>,
}

impl TileGrid {
    pub fn new(dims: (usize, usize), tile_size: usize, halo: usize) -> SarResult<Self> {
        if tile_size == 0 {
            return Err(SarError::InvalidParameters("tile size must be positive".to_string()));
        }
        let (rows, cols) = dims;
        let grid_rows = (rows + tile_size - 1) / tile_size;
        let grid_cols = (cols + tile_size - 1) / tile_size;

        let mut tiles = Vec::with_capacity(grid_rows * grid_cols);
        for tr in 0..grid_rows {
            for tc in 0..grid_cols {
                let r0 = tr * tile_size;
                let c0 = tc * tile_size;
                let r1 = (r0 + tile_size).min(rows);
                let c1 = (c0 + tile_size).min(cols);
                tiles.push(Tile {
                    index: (tr, tc),
                    core_rows: (r0, r1),
                    core_cols: (c0, c1),
                    padded_rows: (r0.saturating_sub(halo), (r1 + halo).min(rows)),
                    padded_cols: (c0.saturating_sub(halo), (c1 + halo).min(cols)),
                });
            }
        }

        Ok(Self {
            dims,
            tile_size,
            halo,
            grid_dims: (grid_rows, grid_cols),
            tiles,
        })
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn halo(&self) -> usize {
        self.halo
    }

    pub fn dims(&self) -> (usize, usize) {
        self.dims
    }

    /// Index of the tile whose core contains (row, col)
    pub fn tile_of(&self, row: usize, col: usize) -> usize {
        let tr = (row / self.tile_size).min(self.grid_dims.0.saturating_sub(1));
        let tc = (col / self.tile_size).min(self.grid_dims.1.saturating_sub(1));
        tr * self.grid_dims.1 + tc
    }
}

/// Clutter estimation tile by tile, stitched into one scene-wide map.
///
/// Core cells match a whole-scene run as long as the grid halo is at least
/// the estimator's required halo.
pub fn estimate_tiled(
    estimator: &ClutterEstimator,
    amplitude: &ArrayView2<f32>,
    sea: &ArrayView2<bool>,
    grid: &TileGrid,
) -> SarResult<ClutterMap> {
    if amplitude.dim() != grid.dims() {
        return Err(SarError::Processing(format!(
            "tile grid covers {:?}, raster is {:?}",
            grid.dims(),
            amplitude.dim()
        )));
    }
    if grid.halo() < estimator.params().halo() {
        return Err(SarError::InvalidParameters(format!(
            "tile halo {} is smaller than the required {} px",
            grid.halo(),
            estimator.params().halo()
        )));
    }

    let run = |tile: &Tile| -> SarResult<(Tile, ClutterMap)> {
        let rows = tile.padded_rows.0..tile.padded_rows.1;
        let cols = tile.padded_cols.0..tile.padded_cols.1;
        let amp = amplitude.slice(s![rows.clone(), cols.clone()]);
        let mask = sea.slice(s![rows, cols]);
        let map = estimator.estimate(&amp, &mask)?;
        log::debug!(
            "Tile {:?}: {} exceedances in core {:?}x{:?}",
            tile.index,
            map.counts().exceedances,
            tile.core_rows,
            tile.core_cols
        );
        Ok((*tile, map))
    };

    #[cfg(feature = "parallel")]
    let results: SarResult<Vec<(Tile, ClutterMap)>> = grid.tiles().par_iter().map(run).collect();
    #[cfg(not(feature = "parallel"))]
    let results: SarResult<Vec<(Tile, ClutterMap)>> = grid.tiles().iter().map(run).collect();

    let mut stitched = ClutterMap::new(grid.dims());
    for (tile, map) in results? {
        stitched.paste(&map, tile.core_offset(), (tile.core_rows.0, tile.core_cols.0), tile.core_dim());
    }
    Ok(stitched)
}

/// Minimal union-find over region ids
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Smaller root wins, keeping the result independent of merge order
    fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[hi] = lo;
        true
    }
}

/// 8-connected regions of `mask`, labelled per tile and merged across seams.
///
/// Each region is emitted exactly once, by the tile that contains its
/// centroid. Output is sorted by each region's first pixel.
pub fn extract_regions_tiled(mask: &ArrayView2<bool>, grid: &TileGrid) -> SarResult<Vec<Vec<(usize, usize)>>> {
    if mask.dim() != grid.dims() {
        return Err(SarError::Processing(format!(
            "tile grid covers {:?}, mask is {:?}",
            grid.dims(),
            mask.dim()
        )));
    }

    let label_tile = |tile: &Tile| {
        let core = mask.slice(s![tile.core_rows.0..tile.core_rows.1, tile.core_cols.0..tile.core_cols.1]);
        label_regions(&core, (tile.core_rows.0, tile.core_cols.0))
    };

    #[cfg(feature = "parallel")]
    let per_tile: Vec<Vec<Vec<(usize, usize)>>> = grid.tiles().par_iter().map(label_tile).collect();
    #[cfg(not(feature = "parallel"))]
    let per_tile: Vec<Vec<Vec<(usize, usize)>>> = grid.tiles().iter().map(label_tile).collect();

    let pieces: Vec<Vec<(usize, usize)>> = per_tile.into_iter().flatten().collect();
    let mut labels = Array2::<usize>::from_elem(grid.dims(), usize::MAX);
    for (id, piece) in pieces.iter().enumerate() {
        for &(r, c) in piece {
            labels[[r, c]] = id;
        }
    }

    // Different labels can only touch across a tile seam
    let (rows, cols) = grid.dims();
    let mut sets = DisjointSet::new(pieces.len());
    let mut seam_merges = 0usize;
    for r in 0..rows {
        for c in 0..cols {
            let a = labels[[r, c]];
            if a == usize::MAX {
                continue;
            }
            let forward = [(r, c + 1), (r + 1, c.wrapping_sub(1)), (r + 1, c), (r + 1, c + 1)];
            for (nr, nc) in forward {
                if nr >= rows || nc >= cols {
                    continue;
                }
                let b = labels[[nr, nc]];
                if b != usize::MAX && b != a && sets.union(a, b) {
                    seam_merges += 1;
                }
            }
        }
    }

    let mut merged: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
    for (id, piece) in pieces.into_iter().enumerate() {
        let root = sets.find(id);
        merged.entry(root).or_default().extend(piece);
    }

    let mut owned: Vec<Vec<Vec<(usize, usize)>>> = vec![Vec::new(); grid.tiles().len()];
    for (_, mut pixels) in merged {
        pixels.sort_unstable();
        let n = pixels.len() as f64;
        let (sr, sc) = pixels
            .iter()
            .fold((0.0, 0.0), |(sr, sc), &(r, c)| (sr + r as f64, sc + c as f64));
        let owner = grid.tile_of((sr / n).round() as usize, (sc / n).round() as usize);
        owned[owner].push(pixels);
    }

    let mut regions: Vec<Vec<(usize, usize)>> = owned.into_iter().flatten().collect();
    regions.sort_by(|a, b| a[0].cmp(&b[0]));
    log::debug!(
        "Tiled extraction: {} regions, {} seam merges over {} tiles",
        regions.len(),
        seam_merges,
        grid.tiles().len()
    );
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cfar::CfarParams;

    #[test]
    fn test_grid_covers_raster() {
        let grid = TileGrid::new((100, 70), 32, 8).unwrap();
        assert_eq!(grid.tiles().len(), 4 * 3);
        let last = grid.tiles()[grid.tiles().len() - 1];
        assert_eq!(last.core_rows, (96, 100));
        assert_eq!(last.core_cols, (64, 70));
        assert_eq!(last.padded_rows, (88, 100));
        assert_eq!(last.core_offset(), (8, 8));
        assert_eq!(grid.tile_of(99, 69), grid.tiles().len() - 1);

        let covered: usize = grid.tiles().iter().map(|t| t.core_dim().0 * t.core_dim().1).sum();
        assert_eq!(covered, 100 * 70);
    }

    #[test]
    fn test_seam_region_reported_once() {
        let mut mask = Array2::from_elem((40, 40), false);
        // Straddles both the row and column seams at 16 and 32
        for r in 14..19 {
            for c in 30..35 {
                mask[[r, c]] = true;
            }
        }
        mask[[2, 2]] = true;

        let grid = TileGrid::new((40, 40), 16, 0).unwrap();
        let regions = extract_regions_tiled(&mask.view(), &grid).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0], vec![(2, 2)]);
        assert_eq!(regions[1].len(), 25);
        assert_eq!(regions[1], label_regions(&mask.slice(s![10..20, 28..36]), (10, 28))[0]);
    }

    #[test]
    fn test_diagonal_seam_contact_merges() {
        let mut mask = Array2::from_elem((20, 20), false);
        mask[[9, 9]] = true;
        mask[[10, 10]] = true;
        let grid = TileGrid::new((20, 20), 10, 0).unwrap();
        let regions = extract_regions_tiled(&mask.view(), &grid).unwrap();
        assert_eq!(regions, vec![vec![(9, 9), (10, 10)]]);
    }

    #[test]
    fn test_halo_must_cover_training_rings() {
        let params = CfarParams {
            min_window: 11,
            max_window: 21,
            window_step: 10,
            guard_radius: 2,
            ..CfarParams::default()
        };
        let estimator = ClutterEstimator::new(params).unwrap();
        let amplitude = Array2::from_elem((30, 30), 1.0_f32);
        let sea = Array2::from_elem((30, 30), true);
        let grid = TileGrid::new((30, 30), 10, 5).unwrap();
        assert!(estimate_tiled(&estimator, &amplitude.view(), &sea.view(), &grid).is_err());
    }
}
