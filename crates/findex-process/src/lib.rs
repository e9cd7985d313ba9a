//! Findex Process — the document pipeline: cleaning and feature extraction,
//! two-stage deduplication, quality assessment, and the retention policy
//! driver.

pub mod cleaner;
pub mod dedup;
pub mod pipeline;
pub mod quality;

pub use cleaner::{content_hash, derive_document_id, Cleaner};
pub use dedup::Deduplicator;
pub use pipeline::{DocumentPipeline, PipelineOutcome};
pub use quality::QualityAssessor;
