//! Insight data model: the taxonomy, screening output, and the structured
//! insight produced by deep classification.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::Engagement;

/// Problem taxonomy (14 values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Admin,
    Analytics,
    Marketing,
    Loyalty,
    Payments,
    Fulfillment,
    Inventory,
    CustomerSupport,
    Design,
    Seo,
    Integrations,
    Performance,
    Pricing,
    Other,
}

impl Category {
    pub const ALL: [Category; 14] = [
        Category::Admin,
        Category::Analytics,
        Category::Marketing,
        Category::Loyalty,
        Category::Payments,
        Category::Fulfillment,
        Category::Inventory,
        Category::CustomerSupport,
        Category::Design,
        Category::Seo,
        Category::Integrations,
        Category::Performance,
        Category::Pricing,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Admin => "admin",
            Category::Analytics => "analytics",
            Category::Marketing => "marketing",
            Category::Loyalty => "loyalty",
            Category::Payments => "payments",
            Category::Fulfillment => "fulfillment",
            Category::Inventory => "inventory",
            Category::CustomerSupport => "customer_support",
            Category::Design => "design",
            Category::Seo => "seo",
            Category::Integrations => "integrations",
            Category::Performance => "performance",
            Category::Pricing => "pricing",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == norm)
            .ok_or_else(|| format!("unknown category `{s}`"))
    }
}

/// Coarse content type estimated by screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Complaint,
    FeatureRequest,
    Question,
    Comparison,
    Review,
    Workaround,
    Other,
}

impl ContentType {
    pub const ALL: [ContentType; 7] = [
        ContentType::Complaint,
        ContentType::FeatureRequest,
        ContentType::Question,
        ContentType::Comparison,
        ContentType::Review,
        ContentType::Workaround,
        ContentType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Complaint => "complaint",
            ContentType::FeatureRequest => "feature_request",
            ContentType::Question => "question",
            ContentType::Comparison => "comparison",
            ContentType::Review => "review",
            ContentType::Workaround => "workaround",
            ContentType::Other => "other",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        ContentType::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == norm)
            .ok_or_else(|| format!("unknown content type `{s}`"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSensitivity {
    Low,
    Medium,
    High,
}

impl FromStr for PriceSensitivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown price sensitivity `{other}`")),
        }
    }
}

/// Which model tier served a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Fast,
    HighFidelity,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Fast => "fast",
            ModelTier::HighFidelity => "high_fidelity",
        }
    }
}

/// Transient output of the screening stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub record_id: String,
    pub relevant: bool,
    pub content_type: ContentType,
    pub confidence: f64, // [0,1]
}

impl ScreeningResult {
    /// Admission rule: relevant AND confidence >= threshold.
    pub fn passes(&self, threshold: f64) -> bool {
        self.relevant && self.confidence >= threshold
    }
}

/// Structured insight for one record. At most one per `record_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedInsight {
    pub record_id: String,
    pub source: String,
    pub category: Category,
    #[serde(default)]
    pub secondary_categories: BTreeSet<Category>,
    pub content_type: ContentType,
    pub problem_statement: String,
    pub frustration_level: u8, // 1..=5
    pub clarity_score: u8,     // 1..=5
    pub urgency_score: u8,     // 1..=5
    pub willingness_to_pay: bool,
    #[serde(default)]
    pub wtp_quotes: Vec<String>,
    #[serde(default)]
    pub price_sensitivity: Option<PriceSensitivity>,
    #[serde(default)]
    pub current_workaround: Option<String>,
    #[serde(default)]
    pub competitor_mentions: BTreeSet<String>,
    pub keywords: BTreeSet<String>, // 3..=5
    /// Screening confidence when screening ran; `None` under skip-screening.
    #[serde(default)]
    pub screening_confidence: Option<f64>,
    pub engagement: Engagement,
    pub source_created_at: DateTime<Utc>,
    #[serde(default)]
    pub original_title: Option<String>,
    pub content_snippet: String,
    pub content_fingerprint: String,
    pub classified_at: DateTime<Utc>,
    pub model_tier_used: ModelTier,
}
