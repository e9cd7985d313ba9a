//! Document cleaning: markup stripping, normalization, fingerprinting,
//! best-effort feature extraction.

use std::sync::Arc;

use findex_core::{Document, Error, FindexConfig, RawDocument, Result};
use findex_engines::FeatureExtractor;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static HORIZONTAL_WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\x0c]+").unwrap());
static BLANK_LINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s<>\x22]+").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());
static NUMERIC_ENTITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#(\d+);").unwrap());

/// Spelled-out financial terms normalized to their standard abbreviations.
const TERM_MAPPING: &[(&str, &str)] = &[
    ("earnings per share", "EPS"),
    ("price-to-earnings ratio", "P/E"),
    ("price-to-book ratio", "P/B"),
    ("return on equity", "ROE"),
    ("year-over-year", "YoY"),
    ("initial public offering", "IPO"),
    ("mergers and acquisitions", "M&A"),
];

/// Normalizes raw crawler records into [`Document`]s. No store I/O; the only
/// external call is the best-effort feature extractor.
pub struct Cleaner {
    extractor: Arc<dyn FeatureExtractor>,
    min_word_count: usize,
    max_word_count: usize,
    max_content_chars: usize,
}

impl Cleaner {
    pub fn new(config: &FindexConfig, extractor: Arc<dyn FeatureExtractor>) -> Self {
        Self {
            extractor,
            min_word_count: config.min_word_count,
            max_word_count: config.max_word_count,
            max_content_chars: config.max_content_chars,
        }
    }

    /// Clean one raw record. Missing required fields and too-short bodies are
    /// deterministic data errors; oversized bodies are truncated instead.
    pub async fn clean(&self, raw: &RawDocument) -> Result<Document> {
        if raw.title.trim().is_empty() {
            return Err(Error::Data("missing title".into()));
        }
        if raw.content.trim().is_empty() {
            return Err(Error::Data("missing content".into()));
        }
        if raw.url.trim().is_empty() {
            return Err(Error::Data("missing url".into()));
        }
        if raw.source.trim().is_empty() {
            return Err(Error::Data("missing source".into()));
        }

        let title = clean_text(&raw.title);
        let mut body = clean_text(&raw.content);
        let url = canonical_url(&raw.url);

        // Character cap first, then the word cap
        if body.chars().count() > self.max_content_chars {
            body = body.chars().take(self.max_content_chars).collect();
            debug!("Truncated oversized body to {} chars", self.max_content_chars);
        }
        let words: Vec<&str> = body.split_whitespace().collect();
        if words.len() < self.min_word_count {
            return Err(Error::Data(format!(
                "body too short: {} words (minimum {})",
                words.len(),
                self.min_word_count
            )));
        }
        if words.len() > self.max_word_count {
            body = truncate_words(&body, self.max_word_count);
        }

        let word_count = body.split_whitespace().count();
        let char_count = body.chars().count();
        let hash = content_hash(&title, &body, &url);
        let id = derive_document_id(raw.id.as_deref(), &url, &title, raw.published_at);

        // Feature extraction is best-effort, never fatal
        let features = match self.extractor.extract(&title, &body).await {
            Ok(features) => features,
            Err(e) => {
                warn!("Feature extraction failed for {}, proceeding without: {}", id, e);
                Default::default()
            }
        };

        Ok(Document {
            id,
            title,
            body,
            url,
            source: raw.source.clone(),
            published_at: raw.published_at,
            tags: raw.tags.clone(),
            content_hash: hash,
            word_count,
            char_count,
            features,
            quality: None,
            embedding: None,
            duplicate_of: None,
            metadata: raw.metadata.clone(),
        })
    }
}

/// Strip markup, decode entities, normalize whitespace, drop URLs and
/// e-mail addresses, normalize financial terms.
pub fn clean_text(text: &str) -> String {
    let text = decode_entities(text);
    let text = TAG_RE.replace_all(&text, " ");
    let text = URL_RE.replace_all(&text, "");
    let text = EMAIL_RE.replace_all(&text, "");
    let text = HORIZONTAL_WS_RE.replace_all(&text, " ");
    let text = BLANK_LINES_RE.replace_all(&text, "\n\n");

    let mut text: String = text
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    for (term, abbreviation) in TERM_MAPPING {
        if text.contains(term) {
            text = text.replace(term, abbreviation);
        }
    }
    text
}

/// Decode the common named entities plus numeric references.
fn decode_entities(text: &str) -> String {
    let text = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    NUMERIC_ENTITY_RE
        .replace_all(&text, |caps: &regex::Captures| {
            caps[1]
                .parse::<u32>()
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Trim, drop the fragment, drop `utm_*` tracking parameters.
pub fn canonical_url(url: &str) -> String {
    let url = url.trim();
    let url = url.split('#').next().unwrap_or(url);

    match url.split_once('?') {
        Some((base, query)) => {
            let kept: Vec<&str> = query
                .split('&')
                .filter(|param| !param.starts_with("utm_"))
                .collect();
            if kept.is_empty() {
                base.to_string()
            } else {
                format!("{}?{}", base, kept.join("&"))
            }
        }
        None => url.to_string(),
    }
}

fn truncate_words(text: &str, max_words: usize) -> String {
    let mut seen = 0usize;
    let mut end = text.len();
    for (idx, _) in text.match_indices(|c: char| c.is_whitespace()) {
        seen += 1;
        if seen >= max_words {
            end = idx;
            break;
        }
    }
    text[..end].trim_end().to_string()
}

/// sha256 over `title + first 500 body chars + url`. A pure function of
/// normalized content: equal hashes mean exact duplicates.
pub fn content_hash(title: &str, body: &str, url: &str) -> String {
    let body_prefix: String = body.chars().take(500).collect();
    let key = format!("{title}|{body_prefix}|{url}");
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Document id derivation contract: external id, else hash of the canonical
/// URL, else hash of `title|published_at`.
pub fn derive_document_id(
    external_id: Option<&str>,
    url: &str,
    title: &str,
    published_at: Option<chrono::DateTime<chrono::Utc>>,
) -> String {
    if let Some(id) = external_id {
        if !id.is_empty() {
            return id.to_string();
        }
    }
    if !url.is_empty() {
        return hex::encode(Sha256::digest(url.as_bytes()));
    }
    let stamp = published_at.map(|t| t.to_rfc3339()).unwrap_or_default();
    hex::encode(Sha256::digest(format!("{title}|{stamp}").as_bytes()))
}
