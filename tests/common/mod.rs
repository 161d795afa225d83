// tests/common/mod.rs
// Shared fixtures for integration tests. Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};

use pain_funnel::classify::{DeepClassifier, MockModel, Screener};
use pain_funnel::config::FunnelConfig;
use pain_funnel::funnel::{Funnel, RetryPolicy};
use pain_funnel::insight::ModelTier;
use pain_funnel::record::{Engagement, RawRecord};
use pain_funnel::store::MemoryStore;

pub const DEEP_OK: &str = r#"{
  "problem_statement": "Refunds are charged twice when an order is edited.",
  "category": "payments",
  "secondary_categories": ["customer_support"],
  "content_type": "complaint",
  "frustration_level": 4,
  "clarity_score": 4,
  "urgency_score": 3,
  "willingness_to_pay": true,
  "wtp_quotes": ["happy to pay for an app that fixes this"],
  "price_sensitivity": "low",
  "current_workaround": "manual refunds in Stripe",
  "competitor_mentions": ["Stripe"],
  "keywords": ["refund", "double charge", "order edit"]
}"#;

/// Same as `DEEP_OK` without `problem_statement`.
pub const DEEP_MISSING_PROBLEM: &str = r#"{
  "category": "payments",
  "frustration_level": 4,
  "clarity_score": 4,
  "urgency_score": 3,
  "willingness_to_pay": true,
  "keywords": ["refund", "double charge", "order edit"]
}"#;

pub fn screen_json(relevant: bool, confidence: f64) -> String {
    format!(r#"{{"relevant": {relevant}, "content_type": "complaint", "confidence": {confidence}}}"#)
}

/// A record the default pre-filter admits.
pub fn record(id: &str) -> RawRecord {
    RawRecord {
        id: id.to_string(),
        source: "reddit".into(),
        title: Some(format!("Shopify refunds [{id}]")),
        body: "Every time I edit an order in Shopify the customer gets refunded twice. \
               Support keeps closing the ticket and I'm losing money."
            .into(),
        author: Some("merchant".into()),
        url: None,
        created_at: Utc::now() - Duration::days(2),
        engagement: Engagement {
            score: 12,
            comment_count: 4,
        },
        fetched_at: Utc::now(),
        processed: false,
    }
}

pub fn records(n: usize) -> Vec<RawRecord> {
    (0..n).map(|i| record(&format!("rec-{i:03}"))).collect()
}

pub fn fast(response: impl Into<String>) -> Arc<MockModel> {
    Arc::new(MockModel::fixed(ModelTier::Fast, response))
}

pub fn high(response: impl Into<String>) -> Arc<MockModel> {
    Arc::new(MockModel::fixed(ModelTier::HighFidelity, response))
}

pub fn funnel(
    store: &Arc<MemoryStore>,
    cfg: FunnelConfig,
    screen: Arc<MockModel>,
    deep: Arc<MockModel>,
) -> Funnel {
    Funnel::new(
        cfg,
        RetryPolicy::immediate(),
        Screener::new(screen, 500),
        DeepClassifier::new(deep, 2000),
        store.clone(),
        store.clone(),
    )
    .expect("valid funnel config")
}

/// A classified insight with neutral defaults; tests override what they check.
pub fn insight(id: &str, category: pain_funnel::insight::Category) -> pain_funnel::ClassifiedInsight {
    pain_funnel::ClassifiedInsight {
        record_id: id.to_string(),
        source: "reddit".into(),
        category,
        secondary_categories: Default::default(),
        content_type: pain_funnel::insight::ContentType::Complaint,
        problem_statement: "Refunds are charged twice.".into(),
        frustration_level: 3,
        clarity_score: 4,
        urgency_score: 3,
        willingness_to_pay: false,
        wtp_quotes: vec![],
        price_sensitivity: None,
        current_workaround: None,
        competitor_mentions: Default::default(),
        keywords: ["refund", "charge", "order"].iter().map(|s| s.to_string()).collect(),
        screening_confidence: Some(0.8),
        engagement: Engagement::default(),
        source_created_at: Utc::now() - Duration::days(2),
        original_title: None,
        content_snippet: String::new(),
        content_fingerprint: format!("fp-{id}"),
        classified_at: Utc::now(),
        model_tier_used: ModelTier::HighFidelity,
    }
}
