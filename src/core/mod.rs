//! Core ship detection modules

pub mod ais;
pub mod attributes;
pub mod batch;
pub mod candidate;
pub mod catalog;
pub mod cfar;
pub mod clutter_model;
pub mod geodesy;
pub mod integral;
pub mod mask_align;
pub mod morphology;
pub mod pipeline;
pub mod tiling;
pub mod wake;

// Re-export main types
pub use ais::{AisCorrelator, AisParams};
pub use attributes::{AttributeExtractor, AttributeParams, VesselAttributes};
pub use batch::{BatchProcessor, BatchReport, BatchStatus, SceneFailure, SceneInput};
pub use candidate::{CandidateDetector, CandidateParams, CandidateRegion};
pub use catalog::{CatalogBatch, CatalogBuilder, CatalogParams, CatalogRow, PartitionKey, TemporalGranularity};
pub use cfar::{CellState, CfarParams, ClutterEstimator, ClutterMap};
pub use clutter_model::{ClutterDistribution, ClutterModel};
pub use geodesy::{MapProjection, PixelLocator, TransverseMercator};
pub use mask_align::{AlignmentParams, AlignmentReport, MaskAligner, MaskSource};
pub use morphology::{MorphologicalFilter, MorphologyParams, RejectReason, VesselProfile};
pub use pipeline::{ParameterSnapshot, PipelineParams, SceneContext, SceneDetections, ShipDetector, ALGORITHM_VERSION};
pub use tiling::{TileGrid, TilingParams};
pub use wake::{WakeCorroborator, WakeEvidence, WakeParams};
