//! Findex Search — merges full-text and vector results into one ranked list.

pub mod fusion;

pub use fusion::{FusedHit, HybridSearcher, RankedResults};
