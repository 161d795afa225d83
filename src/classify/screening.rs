// src/classify/screening.rs
use tracing::debug;

use crate::error::ModelCallError;
use crate::insight::ScreeningResult;
use crate::prefilter::anon_hash;
use crate::record::RawRecord;

use super::model::DynModel;
use super::parse::parse_screening;
use super::prompts::screening_prompt;

/// Screening Classifier: one cheap call over title + a short window.
///
/// `screen` performs exactly one model invocation. Retry and budget
/// accounting belong to the executor.
pub struct Screener {
    model: DynModel,
    window_chars: usize,
}

impl Screener {
    pub fn new(model: DynModel, window_chars: usize) -> Self {
        Self {
            model,
            window_chars,
        }
    }

    pub async fn screen(&self, record: &RawRecord) -> Result<ScreeningResult, ModelCallError> {
        let prompt = screening_prompt(record, self.window_chars);
        let text = self.model.complete(&prompt).await?;
        let result = parse_screening(&record.id, &text)?;
        debug!(
            target: "screening",
            record_id = %record.id,
            prompt_id = %anon_hash(&prompt),
            relevant = result.relevant,
            confidence = result.confidence,
            content_type = %result.content_type,
            provider = self.model.provider_name(),
        );
        Ok(result)
    }
}
