// src/classify/deep.rs
use chrono::Utc;
use tracing::debug;

use crate::error::ModelCallError;
use crate::insight::{ClassifiedInsight, ContentType};
use crate::prefilter::{content_fingerprint, normalize_text};
use crate::record::RawRecord;

use super::model::DynModel;
use super::parse::parse_deep;
use super::prompts::{deep_prompt, truncate_chars};

/// Chars of the normalized body kept on the insight for reviewers.
pub const SNIPPET_CHARS: usize = 500;

/// Deep Classifier: one high-fidelity call producing a complete insight.
///
/// A response missing any required field is `Malformed`; nothing partial is
/// ever returned.
pub struct DeepClassifier {
    model: DynModel,
    window_chars: usize,
}

impl DeepClassifier {
    pub fn new(model: DynModel, window_chars: usize) -> Self {
        Self {
            model,
            window_chars,
        }
    }

    pub async fn classify(
        &self,
        record: &RawRecord,
        content_type_hint: Option<ContentType>,
    ) -> Result<ClassifiedInsight, ModelCallError> {
        let prompt = deep_prompt(record, content_type_hint, self.window_chars);
        let text = self.model.complete(&prompt).await?;
        let d = parse_deep(&text)?;

        let body = normalize_text(&record.body);
        let insight = ClassifiedInsight {
            record_id: record.id.clone(),
            source: record.source.clone(),
            category: d.category,
            secondary_categories: d.secondary_categories,
            content_type: d
                .content_type
                .or(content_type_hint)
                .unwrap_or(ContentType::Other),
            problem_statement: d.problem_statement,
            frustration_level: d.frustration_level,
            clarity_score: d.clarity_score,
            urgency_score: d.urgency_score,
            willingness_to_pay: d.willingness_to_pay,
            wtp_quotes: d.wtp_quotes,
            price_sensitivity: d.price_sensitivity,
            current_workaround: d.current_workaround,
            competitor_mentions: d.competitor_mentions,
            keywords: d.keywords,
            screening_confidence: None,
            engagement: record.engagement,
            source_created_at: record.created_at,
            original_title: record.title.clone(),
            content_snippet: truncate_chars(&body, SNIPPET_CHARS).to_string(),
            content_fingerprint: content_fingerprint(record),
            classified_at: Utc::now(),
            model_tier_used: self.model.tier(),
        };

        debug!(
            target: "deep",
            record_id = %record.id,
            category = %insight.category,
            frustration = insight.frustration_level,
            wtp = insight.willingness_to_pay,
            tier = insight.model_tier_used.as_str(),
        );
        Ok(insight)
    }
}
