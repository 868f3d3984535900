//! Adapters at the crate's external boundaries

pub mod annotation;
pub mod catalog_store;

pub use annotation::{AnnotationParser, ProductName, SceneAnnotation};
pub use catalog_store::{CatalogStore, CommitManifest, ManifestEntry, RetryPolicy};
