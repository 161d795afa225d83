// src/config/models.rs
use serde::Deserialize;
use std::env;

use crate::insight::ModelTier;

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_fast_model() -> String {
    "claude-3-haiku-20240307".to_string()
}
fn default_high_fidelity_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}
fn default_screening_tier() -> ModelTier {
    ModelTier::Fast
}
fn default_deep_tier() -> ModelTier {
    ModelTier::HighFidelity
}

/// Model-tier configuration (the `[models]` table).
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// "anthropic" | "openai" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// "ENV" means: read from ANTHROPIC_API_KEY / OPENAI_API_KEY (by provider)
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_fast_model")]
    pub fast_model: String,
    #[serde(default = "default_high_fidelity_model")]
    pub high_fidelity_model: String,
    /// Which tier serves the screening stage.
    #[serde(default = "default_screening_tier")]
    pub screening_tier: ModelTier,
    /// Which tier serves deep classification.
    #[serde(default = "default_deep_tier")]
    pub deep_tier: ModelTier,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: default_api_key(),
            fast_model: default_fast_model(),
            high_fidelity_model: default_high_fidelity_model(),
            screening_tier: default_screening_tier(),
            deep_tier: default_deep_tier(),
        }
    }
}

impl ModelsConfig {
    pub fn provider_normalized(&self) -> String {
        self.provider.trim().to_ascii_lowercase()
    }

    /// Resolve the API key, reading the provider's env var when configured as "ENV".
    pub fn resolve_api_key(&self) -> anyhow::Result<String> {
        if !self.api_key.trim().eq_ignore_ascii_case("env") {
            return Ok(self.api_key.clone());
        }
        match self.provider_normalized().as_str() {
            "anthropic" => env::var("ANTHROPIC_API_KEY")
                .map_err(|_| anyhow::anyhow!("Missing ANTHROPIC_API_KEY env var")),
            "openai" => env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var")),
            other => anyhow::bail!("Unsupported provider in config: {other}"),
        }
    }

    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast_model,
            ModelTier::HighFidelity => &self.high_fidelity_model,
        }
    }
}
