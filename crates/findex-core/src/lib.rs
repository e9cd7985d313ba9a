//! Findex Core — shared data model, configuration, error type.

pub mod config;
pub mod error;
pub mod types;

pub use config::FindexConfig;
pub use error::{Error, Result};
pub use types::{
    Document, DocumentFeatures, QualityAssessment, QualityLabel, RawDocument,
};
