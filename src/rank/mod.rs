// src/rank/mod.rs
//! Priority Reranker.
//!
//! ```text
//! relevance   = screening confidence, else category fit (1.0, `other` 0.5)
//! frustration = frustration_level / 5
//! engagement  = min(1, (ln(score+1) + ln(comments+1)) / 10)
//! wtp         = 1 if willingness_to_pay else 0
//! recency     = 1.0 (<7d) | 0.7 (<30d) | 0.4 (<90d) | 0.2
//! base_score  = round2(100 * weighted sum)
//! with signal: final = round2(base_score * 0.65 + bonus * 100), bonus <= 0.35
//! ```
//!
//! Pure: `now` is an argument, nothing is cached, output order is total.

pub mod validation;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::StoreError;
use crate::insight::{Category, ClassifiedInsight};
use crate::record::Engagement;
use crate::store::{InsightFilter, InsightStore};

pub use validation::{
    BusinessImpact, InterviewEvidence, InterviewValidation, NoValidation, ValidationLookup,
    ValidationSignal,
};

pub const W_RELEVANCE: f64 = 0.30;
pub const W_FRUSTRATION: f64 = 0.25;
pub const W_ENGAGEMENT: f64 = 0.20;
pub const W_WTP: f64 = 0.15;
pub const W_RECENCY: f64 = 0.10;

pub const BONUS_VALIDATED: f64 = 0.15;
pub const BONUS_WTP_CONFIRMED: f64 = 0.10;
pub const BONUS_HIGH_IMPACT: f64 = 0.10;

/// Share of the base score kept when a validation signal exists.
pub const VALIDATED_BASE_SHARE: f64 = 0.65;

/// Normalized inputs, each in [0,1] (bonus in [0,0.35]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreComponents {
    pub relevance: f64,
    pub frustration: f64,
    pub engagement: f64,
    pub wtp: f64,
    pub recency: f64,
    pub validation_bonus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityScore {
    pub record_id: String,
    /// Final score in [0,100].
    pub score: f64,
    pub base_score: f64,
    pub components: ScoreComponents,
    pub validated: bool,
    pub category: Category,
    pub frustration_level: u8,
    pub classified_at: DateTime<Utc>,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn engagement_norm(e: Engagement) -> f64 {
    let raw = ((e.score as f64) + 1.0).ln() + ((e.comment_count as f64) + 1.0).ln();
    (raw / 10.0).min(1.0)
}

/// Step function on age. Boundaries belong to the older bucket.
pub fn recency_norm(age: Duration) -> f64 {
    let age = age.max(Duration::zero());
    if age < Duration::days(7) {
        1.0
    } else if age < Duration::days(30) {
        0.7
    } else if age < Duration::days(90) {
        0.4
    } else {
        0.2
    }
}

pub fn relevance_norm(insight: &ClassifiedInsight) -> f64 {
    match insight.screening_confidence {
        Some(c) => c.clamp(0.0, 1.0),
        None if insight.category == Category::Other => 0.5,
        None => 1.0,
    }
}

pub fn validation_bonus(signal: &ValidationSignal) -> f64 {
    let mut bonus = 0.0;
    if signal.matches_category {
        bonus += BONUS_VALIDATED;
    }
    if signal.wtp_confirmed {
        bonus += BONUS_WTP_CONFIRMED;
    }
    if signal.business_impact == BusinessImpact::High {
        bonus += BONUS_HIGH_IMPACT;
    }
    bonus
}

pub fn components(
    insight: &ClassifiedInsight,
    signal: Option<&ValidationSignal>,
    now: DateTime<Utc>,
) -> ScoreComponents {
    ScoreComponents {
        relevance: relevance_norm(insight),
        frustration: (insight.frustration_level.clamp(1, 5) as f64) / 5.0,
        engagement: engagement_norm(insight.engagement),
        wtp: if insight.willingness_to_pay { 1.0 } else { 0.0 },
        recency: recency_norm(now - insight.source_created_at),
        validation_bonus: signal.map(validation_bonus).unwrap_or(0.0),
    }
}

/// `round2(100 * weighted sum)` of the five base components.
pub fn base_score_from_components(c: &ScoreComponents) -> f64 {
    let base = W_RELEVANCE * c.relevance
        + W_FRUSTRATION * c.frustration
        + W_ENGAGEMENT * c.engagement
        + W_WTP * c.wtp
        + W_RECENCY * c.recency;
    round2(base * 100.0)
}

/// Only a signal for the insight's own category replaces the pure base score.
pub fn final_score(base_score: f64, signal: Option<&ValidationSignal>) -> f64 {
    match signal {
        Some(s) if s.matches_category => round2(base_score * VALIDATED_BASE_SHARE + validation_bonus(s) * 100.0),
        _ => base_score,
    }
}

pub fn score_insight(
    insight: &ClassifiedInsight,
    lookup: &dyn ValidationLookup,
    now: DateTime<Utc>,
) -> PriorityScore {
    // Keyword-only overlap is not corroboration of the category.
    let signal = lookup.lookup(insight).filter(|s| s.matches_category);
    let c = components(insight, signal.as_ref(), now);
    let base_score = base_score_from_components(&c);
    PriorityScore {
        record_id: insight.record_id.clone(),
        score: final_score(base_score, signal.as_ref()),
        base_score,
        components: c,
        validated: signal.is_some(),
        category: insight.category,
        frustration_level: insight.frustration_level,
        classified_at: insight.classified_at,
    }
}

/// Higher score, then higher frustration, then more recent classification,
/// then record id for a total order.
pub fn priority_order(a: &PriorityScore, b: &PriorityScore) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.frustration_level.cmp(&a.frustration_level))
        .then_with(|| b.classified_at.cmp(&a.classified_at))
        .then_with(|| a.record_id.cmp(&b.record_id))
}

pub fn rank(
    insights: &[ClassifiedInsight],
    filter: &InsightFilter,
    lookup: &dyn ValidationLookup,
    now: DateTime<Utc>,
) -> Vec<PriorityScore> {
    let mut scores: Vec<PriorityScore> = insights
        .iter()
        .filter(|i| filter.matches(i))
        .map(|i| score_insight(i, lookup, now))
        .collect();
    scores.sort_by(priority_order);
    debug!(target: "rank", ranked = scores.len(), "ranked insights");
    scores
}

/// `rank` over whatever the store currently holds.
pub async fn rank_from_store(
    store: &dyn InsightStore,
    filter: &InsightFilter,
    lookup: &dyn ValidationLookup,
    now: DateTime<Utc>,
) -> Result<Vec<PriorityScore>, StoreError> {
    let insights = store.list_insights(filter).await?;
    Ok(rank(&insights, filter, lookup, now))
}

/// Per-category opportunity roll-up of ranked scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub category: Category,
    pub count: usize,
    pub mean_score: f64,
    pub max_score: f64,
    pub wtp_count: usize,
    pub validated: bool,
}

pub fn summarize_by_category(scores: &[PriorityScore]) -> Vec<CategorySummary> {
    let mut groups: BTreeMap<Category, Vec<&PriorityScore>> = BTreeMap::new();
    for s in scores {
        groups.entry(s.category).or_default().push(s);
    }
    let mut out: Vec<CategorySummary> = groups
        .into_iter()
        .map(|(category, items)| {
            let total: f64 = items.iter().map(|s| s.score).sum();
            CategorySummary {
                category,
                count: items.len(),
                mean_score: round2(total / items.len() as f64),
                max_score: items.iter().map(|s| s.score).fold(0.0, f64::max),
                wtp_count: items.iter().filter(|s| s.components.wtp > 0.0).count(),
                validated: items.iter().any(|s| s.validated),
            }
        })
        .collect();
    out.sort_by(|a, b| {
        b.mean_score
            .total_cmp(&a.mean_score)
            .then_with(|| a.category.cmp(&b.category))
    });
    out
}
