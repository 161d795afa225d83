// src/prefilter.rs
//! Pre-Filter: zero-cost heuristic gate in front of the model stages.
//!
//! A record is rejected when
//! - it already has an insight or a recorded failed attempt,
//! - title + body (normalized) is shorter than `min_content_chars`,
//! - neither title nor body mentions the platform keyword or any pain keyword,
//! - its normalized content fingerprint equals an already classified record's.
//!
//! The filter works against a `KnownRecords` snapshot taken before the run, so
//! `admit` is pure: same record + same snapshot + same config => same verdict.
//! `claim` adds the one piece of run state: the first record admitted with a
//! given fingerprint owns it, and later records in the same run with that
//! content are duplicates.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::FunnelConfig;
use crate::error::FunnelError;
use crate::insight::ScreeningResult;
use crate::record::RawRecord;

/// Why the pre-filter turned a record away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    TooShort { chars: usize, min: usize },
    NoKeyword,
    AlreadyClassified,
    PriorFailure,
    DuplicateContent { fingerprint: String },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::TooShort { chars, min } => write!(f, "too_short:{chars}<{min}"),
            RejectReason::NoKeyword => f.write_str("no_keyword"),
            RejectReason::AlreadyClassified => f.write_str("already_classified"),
            RejectReason::PriorFailure => f.write_str("prior_failure"),
            RejectReason::DuplicateContent { .. } => f.write_str("duplicate_content"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum PreFilterVerdict {
    Admit,
    Reject { reason: RejectReason },
}

impl PreFilterVerdict {
    pub fn is_admit(&self) -> bool {
        matches!(self, PreFilterVerdict::Admit)
    }
}

/// Snapshot of what the store already knows, taken once per run.
#[derive(Debug, Clone, Default)]
pub struct KnownRecords {
    pub classified: HashSet<String>,
    pub failed: HashSet<String>,
    pub fingerprints: HashSet<String>,
    /// Passed screening results of records deferred before deep classification.
    pub screened: HashMap<String, ScreeningResult>,
}

/// Compiled pre-filter. Cheap to call; never touches the network.
#[derive(Debug)]
pub struct PreFilter {
    min_chars: usize,
    keywords: Regex,
    known: KnownRecords,
    /// fingerprint -> id of the record admitted with it during this run
    claimed: Mutex<HashMap<String, String>>,
}

impl PreFilter {
    pub fn new(cfg: &FunnelConfig, known: KnownRecords) -> Result<Self, FunnelError> {
        let terms: Vec<String> = std::iter::once(&cfg.platform_keyword)
            .chain(&cfg.pain_keywords)
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(keyword_term)
            .collect();
        if terms.is_empty() {
            return Err(FunnelError::Configuration(
                "pre-filter needs at least one keyword".into(),
            ));
        }
        let pattern = format!("(?i)(?:{})", terms.join("|"));
        let keywords = Regex::new(&pattern)
            .map_err(|e| FunnelError::Configuration(format!("keyword regex error: {e}")))?;

        Ok(Self {
            min_chars: cfg.min_content_chars,
            keywords,
            known,
            claimed: Mutex::new(HashMap::new()),
        })
    }

    /// Boolean contract used by the executor.
    pub fn admit(&self, record: &RawRecord) -> bool {
        self.evaluate(record).is_admit()
    }

    /// `evaluate`, then take ownership of the record's fingerprint for this
    /// run. Check and claim happen under one lock, so of two identical
    /// records dispatched concurrently exactly one is admitted.
    pub fn claim(&self, record: &RawRecord) -> PreFilterVerdict {
        let verdict = self.evaluate(record);
        if !verdict.is_admit() {
            return verdict;
        }
        let fingerprint = content_fingerprint(record);
        let mut claimed = self.claimed.lock();
        match claimed.get(&fingerprint) {
            Some(owner) if *owner != record.id => {
                reject(RejectReason::DuplicateContent { fingerprint })
            }
            _ => {
                claimed.insert(fingerprint, record.id.clone());
                PreFilterVerdict::Admit
            }
        }
    }

    /// Full verdict with the rejection reason.
    pub fn evaluate(&self, record: &RawRecord) -> PreFilterVerdict {
        if self.known.classified.contains(&record.id) {
            return reject(RejectReason::AlreadyClassified);
        }
        if self.known.failed.contains(&record.id) {
            return reject(RejectReason::PriorFailure);
        }

        let title = normalize_text(record.title.as_deref().unwrap_or(""));
        let body = normalize_text(&record.body);

        let chars = title.chars().count() + body.chars().count();
        if chars < self.min_chars {
            return reject(RejectReason::TooShort {
                chars,
                min: self.min_chars,
            });
        }

        if !self.keywords.is_match(&title) && !self.keywords.is_match(&body) {
            return reject(RejectReason::NoKeyword);
        }

        let fingerprint = content_fingerprint(record);
        if self.known.fingerprints.contains(&fingerprint) {
            return reject(RejectReason::DuplicateContent { fingerprint });
        }

        PreFilterVerdict::Admit
    }
}

/// Anchored at a word start, open at the end: "frustrat" matches
/// "frustrating" but "bug" does not match "debug".
fn keyword_term(keyword: &str) -> String {
    let escaped = regex::escape(&keyword.to_lowercase());
    if keyword.starts_with(|c: char| c.is_alphanumeric() || c == '_') {
        format!(r"\b{escaped}")
    } else {
        escaped
    }
}

fn reject(reason: RejectReason) -> PreFilterVerdict {
    PreFilterVerdict::Reject { reason }
}

/// Normalize scraped text: decode HTML entities, strip tags, ASCII quotes,
/// collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[a-z][^>]*>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Curly quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: once_cell::sync::OnceCell<Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Stable fingerprint of a record's normalized, lowercased title + body.
pub fn content_fingerprint(record: &RawRecord) -> String {
    let title = normalize_text(record.title.as_deref().unwrap_or(""));
    let body = normalize_text(&record.body);
    let mut hasher = Sha256::new();
    hasher.update(title.to_lowercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(body.to_lowercase().as_bytes());
    hex_prefix(&hasher.finalize(), 16)
}

/// Short anonymized id for logging text without logging the text.
pub(crate) fn anon_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex_prefix(&hasher.finalize(), 6)
}

fn hex_prefix(digest: &[u8], bytes: usize) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes * 2);
    for b in digest.iter().take(bytes) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rec(id: &str, title: Option<&str>, body: &str) -> RawRecord {
        RawRecord {
            id: id.into(),
            source: "reddit".into(),
            title: title.map(Into::into),
            body: body.into(),
            author: None,
            url: None,
            created_at: Utc::now(),
            engagement: Default::default(),
            fetched_at: Utc::now(),
            processed: false,
        }
    }

    fn filter(known: KnownRecords) -> PreFilter {
        PreFilter::new(&FunnelConfig::default(), known).unwrap()
    }

    #[test]
    fn normalize_text_decodes_and_collapses() {
        let s = "  Hello,&nbsp;&nbsp;<b>world</b>\n\n  “quoted”  ";
        assert_eq!(normalize_text(s), "Hello, world \"quoted\"");
    }

    #[test]
    fn short_body_without_keyword_is_rejected() {
        // 40 characters, no platform or pain keyword.
        let body = "The weather today was sunny and calm....";
        assert_eq!(body.chars().count(), 40);
        let v = filter(KnownRecords::default()).evaluate(&rec("a", None, body));
        assert!(matches!(
            v,
            PreFilterVerdict::Reject {
                reason: RejectReason::TooShort { chars: 40, min: 50 }
            }
        ));
    }

    #[test]
    fn long_text_needs_a_keyword() {
        let body = "I spent the whole afternoon rearranging furniture in the living room today.";
        let v = filter(KnownRecords::default()).evaluate(&rec("a", None, body));
        assert_eq!(
            v,
            PreFilterVerdict::Reject {
                reason: RejectReason::NoKeyword
            }
        );
    }

    #[test]
    fn keyword_in_title_is_enough_and_case_insensitive() {
        let body = "Inventory counts drift every night after the sync runs, no idea why at all.";
        let r = rec("a", Some("SHOPIFY sync"), body);
        assert!(filter(KnownRecords::default()).admit(&r));
    }

    #[test]
    fn keywords_match_from_a_word_start() {
        // "hate" inside "whatever", "bug" inside "debug".
        let body = "Whatever we tried, the debug output stayed empty for the whole day.";
        let v = filter(KnownRecords::default()).evaluate(&rec("a", None, body));
        assert_eq!(
            v,
            PreFilterVerdict::Reject {
                reason: RejectReason::NoKeyword
            }
        );

        let cfg = FunnelConfig {
            pain_keywords: vec!["frustrat".into()],
            ..FunnelConfig::default()
        };
        let f = PreFilter::new(&cfg, KnownRecords::default()).unwrap();
        let body = "Honestly the whole checkout flow is frustrating for every single customer.";
        assert!(f.admit(&rec("b", None, body)));
        let body = "Nothing here resembles unfrustrated customers talking about the weather.";
        assert!(!f.admit(&rec("c", None, body)));
    }

    #[test]
    fn known_ids_and_duplicates_are_rejected() {
        let body = "Shopify checkout is broken again and support keeps closing my tickets.";
        let r = rec("dup", None, body);
        let mut known = KnownRecords::default();
        known.classified.insert("dup".into());
        assert_eq!(
            filter(known).evaluate(&r),
            PreFilterVerdict::Reject {
                reason: RejectReason::AlreadyClassified
            }
        );

        let mut known = KnownRecords::default();
        known.failed.insert("dup".into());
        assert!(!filter(known).admit(&r));

        let mut known = KnownRecords::default();
        known.fingerprints.insert(content_fingerprint(&r));
        let other = rec("other", None, body);
        assert!(matches!(
            filter(known).evaluate(&other),
            PreFilterVerdict::Reject {
                reason: RejectReason::DuplicateContent { .. }
            }
        ));
    }

    #[test]
    fn verdict_is_idempotent() {
        let f = filter(KnownRecords::default());
        let r = rec(
            "x",
            Some("Help"),
            "Our Shopify theme editor keeps crashing whenever I upload images.",
        );
        assert_eq!(f.evaluate(&r), f.evaluate(&r));
    }

    #[test]
    fn second_copy_in_a_run_is_a_duplicate() {
        let f = filter(KnownRecords::default());
        let body = "Shopify payouts have been stuck for nine days and nobody answers.";
        let first = rec("first", Some("Payouts"), body);
        let repost = rec("repost", Some("payouts"), body);

        assert_eq!(f.claim(&first), PreFilterVerdict::Admit);
        assert!(matches!(
            f.claim(&repost),
            PreFilterVerdict::Reject {
                reason: RejectReason::DuplicateContent { .. }
            }
        ));
        // The owner itself stays admissible.
        assert_eq!(f.claim(&first), PreFilterVerdict::Admit);
        // The pure verdict is unaffected by claims.
        assert!(f.admit(&repost));
    }

    #[test]
    fn fingerprint_ignores_case_and_markup() {
        let a = rec("a", Some("Title"), "Shopify <b>payouts</b> are late");
        let b = rec("b", Some("title"), "shopify payouts   are LATE");
        assert_eq!(content_fingerprint(&a), content_fingerprint(&b));
        assert_eq!(anon_hash("x").len(), 12);
    }
}
