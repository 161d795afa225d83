//! Response parsing and field-completeness validation.
//!
//! Any missing required field, out-of-range score or unknown primary category
//! is a `ModelCallError::Malformed`. Partial results never leave this module.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::error::ModelCallError;
use crate::insight::{Category, ContentType, PriceSensitivity, ScreeningResult};

pub const MIN_KEYWORDS: usize = 3;
pub const MAX_KEYWORDS: usize = 5;

/// Pull the JSON object out of a completion: tolerates ```json fences and
/// leading/trailing prose.
pub fn extract_json(text: &str) -> Result<&str, ModelCallError> {
    let trimmed = text.trim();
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => Ok(&trimmed[s..=e]),
        _ => Err(ModelCallError::malformed("no JSON object in response")),
    }
}

fn from_json<'a, T: Deserialize<'a>>(text: &'a str) -> Result<T, ModelCallError> {
    let json = extract_json(text)?;
    serde_json::from_str(json).map_err(|e| ModelCallError::malformed(format!("invalid JSON: {e}")))
}

fn missing(field: &str) -> ModelCallError {
    ModelCallError::malformed(format!("missing required field `{field}`"))
}

pub fn parse_screening(record_id: &str, text: &str) -> Result<ScreeningResult, ModelCallError> {
    #[derive(Deserialize)]
    struct RawScreen {
        relevant: Option<bool>,
        content_type: Option<String>,
        confidence: Option<f64>,
    }

    let raw: RawScreen = from_json(text)?;
    let relevant = raw.relevant.ok_or_else(|| missing("relevant"))?;
    let confidence = raw.confidence.ok_or_else(|| missing("confidence"))?;
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(ModelCallError::malformed(format!(
            "confidence out of range: {confidence}"
        )));
    }
    let content_type = raw
        .content_type
        .as_deref()
        .and_then(|s| s.parse::<ContentType>().ok())
        .unwrap_or(ContentType::Other);

    Ok(ScreeningResult {
        record_id: record_id.to_string(),
        relevant,
        content_type,
        confidence,
    })
}

/// Model-derived part of a `ClassifiedInsight`, already validated.
#[derive(Debug, Clone, PartialEq)]
pub struct DeepExtraction {
    pub problem_statement: String,
    pub category: Category,
    pub secondary_categories: BTreeSet<Category>,
    pub content_type: Option<ContentType>,
    pub frustration_level: u8,
    pub clarity_score: u8,
    pub urgency_score: u8,
    pub willingness_to_pay: bool,
    pub wtp_quotes: Vec<String>,
    pub price_sensitivity: Option<PriceSensitivity>,
    pub current_workaround: Option<String>,
    pub competitor_mentions: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
}

fn score_1_to_5(field: &str, v: Option<i64>) -> Result<u8, ModelCallError> {
    let v = v.ok_or_else(|| missing(field))?;
    if !(1..=5).contains(&v) {
        return Err(ModelCallError::malformed(format!(
            "`{field}` out of range 1..5: {v}"
        )));
    }
    Ok(v as u8)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub fn parse_deep(text: &str) -> Result<DeepExtraction, ModelCallError> {
    #[derive(Deserialize)]
    struct RawDeep {
        problem_statement: Option<String>,
        category: Option<String>,
        #[serde(default)]
        secondary_categories: Option<Vec<String>>,
        #[serde(default)]
        content_type: Option<String>,
        frustration_level: Option<i64>,
        clarity_score: Option<i64>,
        urgency_score: Option<i64>,
        willingness_to_pay: Option<bool>,
        #[serde(default)]
        wtp_quotes: Option<Vec<String>>,
        #[serde(default)]
        price_sensitivity: Option<String>,
        #[serde(default)]
        current_workaround: Option<String>,
        #[serde(default)]
        competitor_mentions: Option<Vec<String>>,
        keywords: Option<Vec<String>>,
    }

    let raw: RawDeep = from_json(text)?;

    let problem_statement =
        non_empty(raw.problem_statement).ok_or_else(|| missing("problem_statement"))?;
    let category = raw
        .category
        .ok_or_else(|| missing("category"))?
        .parse::<Category>()
        .map_err(ModelCallError::malformed)?;
    let frustration_level = score_1_to_5("frustration_level", raw.frustration_level)?;
    let clarity_score = score_1_to_5("clarity_score", raw.clarity_score)?;
    let urgency_score = score_1_to_5("urgency_score", raw.urgency_score)?;
    let willingness_to_pay = raw
        .willingness_to_pay
        .ok_or_else(|| missing("willingness_to_pay"))?;

    // Keywords: trimmed, lowercased, deduplicated in response order, capped at 5.
    let mut keywords = BTreeSet::new();
    let mut seen = Vec::new();
    for k in raw.keywords.ok_or_else(|| missing("keywords"))? {
        let k = k.trim().to_lowercase();
        if k.is_empty() || seen.contains(&k) {
            continue;
        }
        seen.push(k);
    }
    if seen.len() < MIN_KEYWORDS {
        return Err(ModelCallError::malformed(format!(
            "expected at least {MIN_KEYWORDS} keywords, got {}",
            seen.len()
        )));
    }
    keywords.extend(seen.into_iter().take(MAX_KEYWORDS));

    // Secondary categories: unknown labels are dropped, the primary is never repeated.
    let secondary_categories = raw
        .secondary_categories
        .unwrap_or_default()
        .iter()
        .filter_map(|s| s.parse::<Category>().ok())
        .filter(|c| *c != category)
        .collect();

    let content_type = raw
        .content_type
        .as_deref()
        .and_then(|s| s.parse::<ContentType>().ok());

    let price_sensitivity = raw
        .price_sensitivity
        .as_deref()
        .and_then(|s| s.parse::<PriceSensitivity>().ok());

    let wtp_quotes = raw
        .wtp_quotes
        .unwrap_or_default()
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();

    let competitor_mentions = raw
        .competitor_mentions
        .unwrap_or_default()
        .into_iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();

    Ok(DeepExtraction {
        problem_statement,
        category,
        secondary_categories,
        content_type,
        frustration_level,
        clarity_score,
        urgency_score,
        willingness_to_pay,
        wtp_quotes,
        price_sensitivity,
        current_workaround: non_empty(raw.current_workaround),
        competitor_mentions,
        keywords,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "problem_statement": "Payouts are delayed for a week with no explanation.",
        "category": "payments",
        "secondary_categories": ["customer_support", "payments", "banking"],
        "content_type": "complaint",
        "frustration_level": 4,
        "clarity_score": 5,
        "urgency_score": 3,
        "willingness_to_pay": true,
        "wtp_quotes": ["I'd pay $20/mo for faster payouts"],
        "price_sensitivity": "medium",
        "current_workaround": "  ",
        "competitor_mentions": ["Stripe", " PayPal "],
        "keywords": ["Payouts", "delay", "payouts", "bank", "cash flow", "support", "extra"]
    }"#;

    #[test]
    fn fenced_json_is_accepted() {
        let text = "```json\n{\"relevant\": true, \"content_type\": \"question\", \"confidence\": 0.7}\n```";
        let r = parse_screening("r1", text).unwrap();
        assert!(r.relevant);
        assert_eq!(r.content_type, ContentType::Question);
        assert_eq!(r.record_id, "r1");
    }

    #[test]
    fn screening_confidence_must_be_in_range() {
        let err = parse_screening("r", r#"{"relevant": true, "confidence": 1.4}"#).unwrap_err();
        assert!(matches!(err, ModelCallError::Malformed { .. }));
        let err = parse_screening("r", r#"{"relevant": true}"#).unwrap_err();
        assert!(matches!(err, ModelCallError::Malformed { .. }));
    }

    #[test]
    fn unknown_content_type_falls_back_to_other() {
        let r = parse_screening("r", r#"{"relevant": false, "content_type": "rant", "confidence": 0.2}"#)
            .unwrap();
        assert_eq!(r.content_type, ContentType::Other);
    }

    #[test]
    fn full_deep_response_is_normalized() {
        let d = parse_deep(FULL).unwrap();
        assert_eq!(d.category, Category::Payments);
        assert_eq!(
            d.secondary_categories.iter().copied().collect::<Vec<_>>(),
            vec![Category::CustomerSupport]
        );
        assert_eq!(d.keywords.len(), 5);
        assert!(d.keywords.contains("payouts"));
        assert!(!d.keywords.contains("extra"));
        assert_eq!(d.current_workaround, None);
        assert!(d.competitor_mentions.contains("paypal"));
        assert_eq!(d.price_sensitivity, Some(PriceSensitivity::Medium));
    }

    #[test]
    fn missing_problem_statement_is_malformed() {
        let text = FULL.replace(
            r#""problem_statement": "Payouts are delayed for a week with no explanation.","#,
            "",
        );
        let err = parse_deep(&text).unwrap_err();
        assert_eq!(
            err,
            ModelCallError::malformed("missing required field `problem_statement`")
        );
    }

    #[test]
    fn out_of_range_scores_and_thin_keywords_are_malformed() {
        let text = FULL.replace(r#""frustration_level": 4"#, r#""frustration_level": 7"#);
        assert!(parse_deep(&text).is_err());

        let text = FULL.replace(
            r#"["Payouts", "delay", "payouts", "bank", "cash flow", "support", "extra"]"#,
            r#"["payouts", "Payouts"]"#,
        );
        assert!(parse_deep(&text).is_err());

        let text = FULL.replace(r#""category": "payments""#, r#""category": "shipping""#);
        assert!(parse_deep(&text).is_err());
    }

    #[test]
    fn prose_without_json_is_malformed() {
        assert!(extract_json("Sorry, I can't help with that.").is_err());
    }
}
