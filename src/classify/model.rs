//! Model-tier abstraction: one capability trait, two tiers picked by config.
//!
//! Stages never inspect which concrete client they hold. They ask
//! `TieredModels` for the tier their config names and call `complete`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ModelsConfig;
use crate::error::ModelCallError;
use crate::insight::ModelTier;

use super::providers::{AnthropicProvider, OpenAiProvider};

/// A single request/response model call with a bounded timeout.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Send one prompt, get raw completion text back.
    async fn complete(&self, prompt: &str) -> Result<String, ModelCallError>;
    /// Tier this client serves.
    fn tier(&self) -> ModelTier;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

/// Convenient alias used by callers.
pub type DynModel = Arc<dyn ModelClient>;

/// The fast and high-fidelity clients side by side.
#[derive(Clone)]
pub struct TieredModels {
    fast: DynModel,
    high_fidelity: DynModel,
}

impl TieredModels {
    pub fn new(fast: DynModel, high_fidelity: DynModel) -> Self {
        Self {
            fast,
            high_fidelity,
        }
    }

    pub fn get(&self, tier: ModelTier) -> DynModel {
        match tier {
            ModelTier::Fast => Arc::clone(&self.fast),
            ModelTier::HighFidelity => Arc::clone(&self.high_fidelity),
        }
    }
}

/// Factory: build both tier clients from the `[models]` table.
pub fn build_models_from_config(
    cfg: &ModelsConfig,
    call_timeout: Duration,
) -> anyhow::Result<TieredModels> {
    let api_key = cfg.resolve_api_key()?;
    let build = |tier: ModelTier| -> anyhow::Result<DynModel> {
        let model = cfg.model_for(tier);
        let client: DynModel = match cfg.provider_normalized().as_str() {
            "anthropic" => Arc::new(AnthropicProvider::new(
                api_key.clone(),
                model,
                tier,
                call_timeout,
            )?),
            "openai" => Arc::new(OpenAiProvider::new(
                api_key.clone(),
                model,
                tier,
                call_timeout,
            )?),
            other => anyhow::bail!("Unsupported provider in config: {other}"),
        };
        Ok(client)
    };
    Ok(TieredModels::new(
        build(ModelTier::Fast)?,
        build(ModelTier::HighFidelity)?,
    ))
}

type Responder = dyn Fn(&str) -> Result<String, ModelCallError> + Send + Sync;

/// Deterministic in-process client for tests and dry runs. Counts calls.
pub struct MockModel {
    tier: ModelTier,
    responder: Box<Responder>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockModel {
    pub fn new<F>(tier: ModelTier, responder: F) -> Self
    where
        F: Fn(&str) -> Result<String, ModelCallError> + Send + Sync + 'static,
    {
        Self {
            tier,
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answer with the same text.
    pub fn fixed(tier: ModelTier, response: impl Into<String>) -> Self {
        let response = response.into();
        Self::new(tier, move |_| Ok(response.clone()))
    }

    /// Simulated network latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ModelClient for MockModel {
    async fn complete(&self, prompt: &str) -> Result<String, ModelCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        (self.responder)(prompt)
    }

    fn tier(&self) -> ModelTier {
        self.tier
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tiers_resolve_to_their_clients() {
        let fast = Arc::new(MockModel::fixed(ModelTier::Fast, "f"));
        let hf = Arc::new(MockModel::fixed(ModelTier::HighFidelity, "h"));
        let models = TieredModels::new(fast.clone(), hf.clone());

        assert_eq!(models.get(ModelTier::Fast).complete("x").await.unwrap(), "f");
        assert_eq!(
            models.get(ModelTier::HighFidelity).complete("x").await.unwrap(),
            "h"
        );
        assert_eq!(fast.calls(), 1);
        assert_eq!(hf.calls(), 1);
    }

    #[test]
    fn factory_rejects_unknown_provider() {
        let cfg = ModelsConfig {
            provider: "nope".into(),
            api_key: "k".into(),
            ..ModelsConfig::default()
        };
        assert!(build_models_from_config(&cfg, Duration::from_secs(1)).is_err());
    }
}
