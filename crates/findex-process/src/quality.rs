//! Quality assessment: five weighted sub-scores in [0, 1].
//!
//! The assessor only scores; whether a document is retained is the
//! pipeline's policy, so callers are free to index everything and filter at
//! ranking time instead.

use findex_core::{Document, FindexConfig, QualityAssessment, QualityLabel};
use once_cell::sync::Lazy;
use regex::Regex;

static EXCESSIVE_PUNCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[!?]{3,}|\.{5,}").unwrap());
static EXCESSIVE_CAPS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]{10,}").unwrap());
static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.?\d*").unwrap());
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());
static CONTACT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(phone|tel|whatsapp|telegram|wechat)[:\s]*\+?\d{5,}").unwrap());

/// Promotional boilerplate that marks low-value content.
const SPAM_PATTERNS: &[&str] = &[
    "click here",
    "buy now",
    "limited time offer",
    "contact us for details",
    "free consultation",
    "subscribe now",
    "act now",
];

/// Phrases that indicate substantive financial coverage.
const HIGH_VALUE_KEYWORDS: &[&str] = &[
    "research report",
    "market analysis",
    "industry analysis",
    "earnings forecast",
    "financial results",
    "regulatory filing",
    "investment recommendation",
    "risk assessment",
    "quarterly results",
    "annual report",
];

const WEIGHT_COMPLETENESS: f64 = 0.25;
const WEIGHT_CONTENT: f64 = 0.25;
const WEIGHT_INFORMATION: f64 = 0.25;
const WEIGHT_SPAM: f64 = 0.15;
const WEIGHT_STRUCTURE: f64 = 0.10;

/// Scores documents; stateless per call.
pub struct QualityAssessor {
    min_word_count: usize,
    max_word_count: usize,
}

impl QualityAssessor {
    pub fn new(config: &FindexConfig) -> Self {
        Self {
            min_word_count: config.min_word_count,
            max_word_count: config.max_word_count,
        }
    }

    /// Compute the weighted quality score and label for a document.
    pub fn assess(&self, doc: &Document) -> QualityAssessment {
        let mut issues = Vec::new();

        let completeness = self.check_completeness(doc, &mut issues);
        let content_quality = check_content_quality(doc, &mut issues);
        let information_value = check_information_value(doc);
        let spam_score = check_spam(doc, &mut issues);
        let structure_quality = check_structure(doc, &mut issues);

        let score = completeness * WEIGHT_COMPLETENESS
            + content_quality * WEIGHT_CONTENT
            + information_value * WEIGHT_INFORMATION
            + spam_score * WEIGHT_SPAM
            + structure_quality * WEIGHT_STRUCTURE;

        QualityAssessment {
            score,
            label: QualityLabel::from_score(score),
            completeness,
            content_quality,
            information_value,
            spam_score,
            structure_quality,
            issues,
        }
    }

    /// Attach the assessment to the document and return it.
    pub fn assess_into(&self, mut doc: Document) -> Document {
        doc.quality = Some(self.assess(&doc));
        doc
    }

    fn check_completeness(&self, doc: &Document, issues: &mut Vec<String>) -> f64 {
        let mut score: f64 = 1.0;

        for (field, value) in [
            ("title", &doc.title),
            ("body", &doc.body),
            ("url", &doc.url),
            ("source", &doc.source),
        ] {
            if value.trim().is_empty() {
                score -= 0.2;
                issues.push(format!("missing field: {field}"));
            }
        }

        if doc.word_count < self.min_word_count {
            score -= 0.3;
            issues.push(format!("body too short: {} words", doc.word_count));
        } else if doc.word_count > self.max_word_count {
            score -= 0.1;
            issues.push(format!("body too long: {} words", doc.word_count));
        }

        let title_len = doc.title.chars().count();
        if title_len < 5 {
            score -= 0.2;
            issues.push("title too short".into());
        } else if title_len > 200 {
            score -= 0.1;
            issues.push("title too long".into());
        }

        score.max(0.0)
    }
}

fn check_content_quality(doc: &Document, issues: &mut Vec<String>) -> f64 {
    let full_text = format!("{} {}", doc.title, doc.body);
    if full_text.trim().is_empty() {
        return 0.0;
    }
    let mut score: f64 = 1.0;

    if EXCESSIVE_PUNCT_RE.is_match(&full_text) {
        score -= 0.15;
        issues.push("excessive punctuation".into());
    }
    if EXCESSIVE_CAPS_RE.is_match(&full_text) {
        score -= 0.15;
        issues.push("excessive capitalization".into());
    }
    if has_repeated_run(&full_text, 6) {
        score -= 0.15;
        issues.push("repeated characters".into());
    }

    let words: Vec<&str> = full_text.split_whitespace().collect();
    let number_count = NUMBER_RE.find_iter(&full_text).count();
    if !words.is_empty() && number_count as f64 / words.len() as f64 > 0.3 {
        score -= 0.2;
        issues.push("mostly numeric content".into());
    }

    if words.len() > 10 {
        let unique: std::collections::HashSet<&str> = words.iter().copied().collect();
        if (unique.len() as f64) / (words.len() as f64) < 0.3 {
            score -= 0.2;
            issues.push("highly repetitive text".into());
        }
    }

    let sentences = doc
        .body
        .split(['.', '!', '?'])
        .filter(|s| s.trim().chars().count() > 5)
        .count();
    if sentences < 2 {
        score -= 0.2;
        issues.push("too few sentences".into());
    }

    score.max(0.0)
}

fn check_information_value(doc: &Document) -> f64 {
    let full_text = format!("{} {}", doc.title, doc.body).to_lowercase();
    let mut score = 0.5;

    let keyword_hits = HIGH_VALUE_KEYWORDS
        .iter()
        .filter(|kw| full_text.contains(**kw))
        .count();
    score += (keyword_hits as f64 * 0.1).min(0.3);

    score += (doc.features.entities.len() as f64 * 0.02).min(0.2);

    if NUMBER_RE.find_iter(&doc.body).count() >= 3 {
        score += 0.1;
    }
    if doc.published_at.is_some() {
        score += 0.1;
    }

    score.min(1.0)
}

fn check_spam(doc: &Document, issues: &mut Vec<String>) -> f64 {
    let full_text = format!("{} {}", doc.title, doc.body).to_lowercase();
    let mut score: f64 = 1.0;

    for pattern in SPAM_PATTERNS {
        if full_text.contains(pattern) {
            score -= 0.3;
            issues.push(format!("spam pattern: {pattern}"));
        }
    }

    if URL_RE.find_iter(&full_text).count() > 3 {
        score -= 0.2;
        issues.push("high url density".into());
    }
    if CONTACT_RE.is_match(&full_text) {
        score -= 0.3;
        issues.push("contains contact solicitation".into());
    }

    score.max(0.0)
}

fn check_structure(doc: &Document, issues: &mut Vec<String>) -> f64 {
    if doc.body.trim().is_empty() {
        return 0.0;
    }
    let mut score: f64 = 1.0;

    let paragraphs = doc
        .body
        .split('\n')
        .filter(|p| p.trim().chars().count() > 20)
        .count();
    if paragraphs < 2 {
        score -= 0.2;
        issues.push("weak paragraph structure".into());
    }

    if doc.word_count > 50 {
        let punctuation = doc
            .body
            .chars()
            .filter(|c| matches!(c, '.' | ',' | ';' | ':' | '!' | '?'))
            .count();
        if (punctuation as f64) / (doc.word_count as f64) < 0.05 {
            score -= 0.2;
            issues.push("sparse punctuation".into());
        }
    }

    score.max(0.0)
}

/// The `regex` crate has no backreferences; scan for runs directly.
fn has_repeated_run(text: &str, run_length: usize) -> bool {
    let mut previous = None;
    let mut run = 0usize;
    for c in text.chars() {
        if Some(c) == previous {
            run += 1;
            if run >= run_length {
                return true;
            }
        } else {
            previous = Some(c);
            run = 1;
        }
    }
    false
}
