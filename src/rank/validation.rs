// src/rank/validation.rs
//! Secondary-source validation (merchant interviews).
//!
//! Absence of a signal is the normal case and never an error.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::insight::{Category, ClassifiedInsight};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessImpact {
    Low,
    Medium,
    High,
}

/// Corroboration for one insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSignal {
    /// Evidence exists for the insight's own category (not only keyword overlap).
    pub matches_category: bool,
    pub wtp_confirmed: bool,
    pub business_impact: BusinessImpact,
}

/// Looks up corroboration for an insight.
pub trait ValidationLookup: Send + Sync {
    fn lookup(&self, insight: &ClassifiedInsight) -> Option<ValidationSignal>;
}

/// No secondary source configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoValidation;

impl ValidationLookup for NoValidation {
    fn lookup(&self, _insight: &ClassifiedInsight) -> Option<ValidationSignal> {
        None
    }
}

/// One structured interview finding, as produced by the interview pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewEvidence {
    pub category: Category,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub wtp_low: Option<f64>,
    #[serde(default)]
    pub wtp_high: Option<f64>,
    pub business_impact: BusinessImpact,
    #[serde(default)]
    pub quotes: Vec<String>,
}

impl InterviewEvidence {
    pub fn has_wtp_data(&self) -> bool {
        self.wtp_low.is_some() || self.wtp_high.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
struct Rollup {
    wtp_confirmed: bool,
    impact: BusinessImpact,
}

impl Rollup {
    fn of<'a>(items: impl Iterator<Item = &'a InterviewEvidence>) -> Option<Self> {
        items.fold(None, |acc: Option<Rollup>, e| {
            let mut r = acc.unwrap_or(Rollup {
                wtp_confirmed: false,
                impact: e.business_impact,
            });
            r.wtp_confirmed |= e.has_wtp_data();
            r.impact = r.impact.max(e.business_impact);
            Some(r)
        })
    }
}

/// Interview evidence indexed by category and by keyword.
///
/// A category match wins. Otherwise an insight whose keywords overlap an
/// interview's keywords gets a signal with `matches_category = false`,
/// which the reranker does not score.
#[derive(Debug, Clone, Default)]
pub struct InterviewValidation {
    by_category: BTreeMap<Category, Rollup>,
    by_keyword: BTreeMap<String, Vec<usize>>,
    evidence: Vec<InterviewEvidence>,
}

impl InterviewValidation {
    pub fn new(evidence: Vec<InterviewEvidence>) -> Self {
        let mut by_category = BTreeMap::new();
        for c in Category::ALL {
            if let Some(r) = Rollup::of(evidence.iter().filter(|e| e.category == c)) {
                by_category.insert(c, r);
            }
        }
        let mut by_keyword: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, e) in evidence.iter().enumerate() {
            for k in &e.keywords {
                let k = k.trim().to_lowercase();
                if !k.is_empty() {
                    by_keyword.entry(k).or_default().push(idx);
                }
            }
        }
        Self {
            by_category,
            by_keyword,
            evidence,
        }
    }

    pub fn len(&self) -> usize {
        self.evidence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evidence.is_empty()
    }

    /// Up to `max` verbatim quotes backing a category.
    pub fn key_quotes(&self, category: Category, max: usize) -> Vec<&str> {
        self.evidence
            .iter()
            .filter(|e| e.category == category)
            .flat_map(|e| e.quotes.iter().take(2))
            .map(String::as_str)
            .take(max)
            .collect()
    }
}

impl ValidationLookup for InterviewValidation {
    fn lookup(&self, insight: &ClassifiedInsight) -> Option<ValidationSignal> {
        if let Some(r) = self.by_category.get(&insight.category) {
            return Some(ValidationSignal {
                matches_category: true,
                wtp_confirmed: r.wtp_confirmed,
                business_impact: r.impact,
            });
        }
        let hits: BTreeSet<usize> = insight
            .keywords
            .iter()
            .filter_map(|k| self.by_keyword.get(k))
            .flatten()
            .copied()
            .collect();
        let r = Rollup::of(hits.iter().map(|&i| &self.evidence[i]))?;
        Some(ValidationSignal {
            matches_category: false,
            wtp_confirmed: r.wtp_confirmed,
            business_impact: r.impact,
        })
    }
}
