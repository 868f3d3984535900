//! sarship: CFAR-based ship detection for calibrated, geocoded SAR scenes
//!
//! Scenes go through land-sea mask alignment, adaptive two-pass CFAR
//! clutter estimation, candidate extraction, morphological screening,
//! wake corroboration, attribute extraction and AIS correlation. Batches of
//! scene results are committed to an append-only, partitioned catalog.

pub mod types;
pub mod core;
pub mod io;

// Re-export main types and functions for easier access
pub use types::{
    AisMatch, AisReport, GeoPoint, LandSeaMask, MaritimeZone, Polarization, SarError, SarResult, SceneMetadata,
    SceneRaster, ShipDetection, ShippingLane, Stage,
};

pub use crate::core::{
    BatchProcessor, BatchReport, BatchStatus, MaskSource, PipelineParams, SceneContext, SceneDetections,
    SceneInput, ShipDetector,
};
pub use io::{AnnotationParser, CatalogStore, ProductName};
