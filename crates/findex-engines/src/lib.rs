//! Findex Engines — narrow interfaces to the external storage engines and
//! model capabilities, with in-memory fallbacks.
//!
//! Every trait here is a consumed capability: the pipeline owns none of the
//! stores and talks to them only through these seams. Each seam ships with an
//! in-memory implementation used as the degraded-mode fallback and as the
//! test double.

pub mod cache;
pub mod embedder;
pub mod features;
pub mod fulltext;
pub mod queue;
pub mod types;
pub mod vector;

pub use cache::{DistributedCache, MemoryCache, RedisCache};
pub use embedder::{adjust_dimension, Embedder, HashingEmbedder, HttpEmbedder};
pub use features::{FeatureExtractor, HttpFeatureExtractor, NoopFeatureExtractor};
pub use fulltext::{ElasticFullText, FullTextEngine, MemoryFullText};
pub use queue::{JobRecord, MemoryTaskQueue, TaskQueue};
pub use types::{EngineHit, FullTextResults, SearchFilters, SearchQuery, SortOrder};
pub use vector::{MemoryVector, QdrantVector, VectorEngine};
