//! Two-stage deduplication: exact fingerprint lookup against the distributed
//! cache, then in-batch term-frequency cosine similarity.
//!
//! Stage 2 is O(n²) per batch; batches are bounded upstream, and
//! near-duplicates are only caught within one batch. That is an accepted
//! scaling limit, not a race.

use std::collections::HashMap;
use std::sync::Arc;

use findex_core::{Document, FindexConfig};
use findex_engines::DistributedCache;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

const HASH_KEY_PREFIX: &str = "findex:hash:";

/// Removes exact and near-duplicate documents from a batch.
///
/// The durable fingerprint set maps `content_hash -> owning document id`.
/// A hash hit only marks a duplicate when the hit belongs to a *different*
/// document: sources deliver full pulls, so the same logical document is
/// re-observed every cycle and must flow through to change detection to be
/// classified unchanged.
pub struct Deduplicator {
    cache: Arc<dyn DistributedCache>,
    /// In-memory stand-in for the fingerprint set when the cache is down.
    fallback: Mutex<HashMap<String, String>>,
    similarity_threshold: f64,
    fingerprint_ttl_secs: u64,
}

impl Deduplicator {
    pub fn new(config: &FindexConfig, cache: Arc<dyn DistributedCache>) -> Self {
        Self {
            cache,
            fallback: Mutex::new(HashMap::new()),
            similarity_threshold: config.similarity_threshold,
            fingerprint_ttl_secs: config.cache_ttl_secs,
        }
    }

    /// Deduplicate a batch of cleaned documents. Returns `(unique, duplicates)`;
    /// duplicates carry `duplicate_of` naming the surviving document.
    pub async fn deduplicate(&self, documents: Vec<Document>) -> (Vec<Document>, Vec<Document>) {
        let total = documents.len();
        let (hash_unique, mut duplicates) = self.dedup_by_fingerprint(documents).await;
        debug!("Fingerprint stage kept {}/{} documents", hash_unique.len(), total);

        let (unique, similar) = self.dedup_by_similarity(hash_unique);
        duplicates.extend(similar);

        info!(
            "Deduplication: {} unique, {} duplicates of {} documents",
            unique.len(),
            duplicates.len(),
            total
        );
        (unique, duplicates)
    }

    /// Stage 1: exact duplicates via the durable fingerprint set.
    async fn dedup_by_fingerprint(
        &self,
        documents: Vec<Document>,
    ) -> (Vec<Document>, Vec<Document>) {
        let mut unique = Vec::new();
        let mut duplicates = Vec::new();
        let mut batch_hashes: HashMap<String, String> = HashMap::new();

        for mut doc in documents {
            let hash = doc.content_hash.clone();
            let owner = match batch_hashes.get(&hash) {
                Some(owner) => Some(owner.clone()),
                None => self.fingerprint_owner(&hash).await,
            };

            match owner {
                Some(owner) if owner != doc.id => {
                    debug!("Exact duplicate of {owner}: {}", doc.id);
                    doc.duplicate_of = Some(owner);
                    duplicates.push(doc);
                }
                _ => {
                    // New fingerprint, or this document re-observed
                    batch_hashes.insert(hash.clone(), doc.id.clone());
                    self.store_fingerprint(&hash, &doc.id).await;
                    unique.push(doc);
                }
            }
        }

        (unique, duplicates)
    }

    async fn fingerprint_owner(&self, hash: &str) -> Option<String> {
        let key = format!("{HASH_KEY_PREFIX}{hash}");
        match self.cache.get(&key).await {
            Ok(owner) => owner,
            Err(e) => {
                warn!("Fingerprint lookup failed, using in-memory set: {}", e);
                self.fallback.lock().get(hash).cloned()
            }
        }
    }

    async fn store_fingerprint(&self, hash: &str, owner: &str) {
        let key = format!("{HASH_KEY_PREFIX}{hash}");
        if let Err(e) = self
            .cache
            .set(&key, owner, Some(self.fingerprint_ttl_secs))
            .await
        {
            warn!("Fingerprint store failed, using in-memory set: {}", e);
            self.fallback
                .lock()
                .insert(hash.to_string(), owner.to_string());
        }
    }

    /// Stage 2: near-duplicates within the batch via pairwise cosine over
    /// sparse term-frequency vectors.
    fn dedup_by_similarity(&self, documents: Vec<Document>) -> (Vec<Document>, Vec<Document>) {
        if documents.len() <= 1 {
            return (documents, Vec::new());
        }

        let vectors: Vec<HashMap<String, f64>> = documents
            .iter()
            .map(|d| term_frequencies(&format!("{} {}", d.title, d.body)))
            .collect();

        let mut documents: Vec<Option<Document>> = documents.into_iter().map(Some).collect();
        let mut unique = Vec::new();
        let mut duplicates = Vec::new();

        for i in 0..documents.len() {
            let Some(mut keeper) = documents[i].take() else {
                continue;
            };

            for j in (i + 1)..documents.len() {
                if documents[j].is_none() {
                    continue;
                }
                let similarity = cosine_sparse(&vectors[i], &vectors[j]);
                if similarity < self.similarity_threshold {
                    continue;
                }
                let Some(mut loser) = documents[j].take() else {
                    continue;
                };

                debug!(
                    "Near-duplicate (similarity {:.3}): {} vs {}",
                    similarity, keeper.id, loser.id
                );
                if prefer_first(&keeper, &loser) {
                    loser.duplicate_of = Some(keeper.id.clone());
                    duplicates.push(loser);
                } else {
                    // Candidate wins; the previous keeper becomes the duplicate
                    std::mem::swap(&mut keeper, &mut loser);
                    loser.duplicate_of = Some(keeper.id.clone());
                    duplicates.push(loser);
                }
            }

            unique.push(keeper);
        }

        (unique, duplicates)
    }

    /// Size of the in-memory fallback fingerprint set.
    pub fn fallback_len(&self) -> usize {
        self.fallback.lock().len()
    }
}

/// Survivor precedence: clearly more words, then newer publication, then the
/// higher existing quality score.
fn prefer_first(a: &Document, b: &Document) -> bool {
    let word_gap = a.word_count as i64 - b.word_count as i64;
    if word_gap.abs() > 50 {
        return word_gap > 0;
    }
    if let (Some(ta), Some(tb)) = (a.published_at, b.published_at) {
        if ta != tb {
            return ta > tb;
        }
    }
    a.quality_score() >= b.quality_score()
}

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut counts: HashMap<String, f64> = HashMap::new();
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        *counts.entry(token.to_string()).or_insert(0.0) += 1.0;
    }
    counts
}

fn cosine_sparse(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(term, va)| large.get(term).map(|vb| va * vb))
        .sum();
    let norm_a: f64 = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
