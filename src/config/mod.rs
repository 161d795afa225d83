// src/config/mod.rs
//! Funnel configuration: TOML file + env overrides + validation.
//!
//! Resolution order for the file path:
//! 1) $FUNNEL_CONFIG_PATH
//! 2) config/funnel.toml
//! 3) built-in defaults (no file)
//!
//! Validation never "repairs" a bad value. A bad threshold or zero
//! concurrency is a `FunnelError::Configuration` and the run does not start.

pub mod models;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::FunnelError;
use crate::funnel::retry::RetryPolicy;
pub use models::ModelsConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/funnel.toml";
pub const ENV_CONFIG_PATH: &str = "FUNNEL_CONFIG_PATH";
pub const ENV_CONCURRENCY: &str = "FUNNEL_CONCURRENCY";
pub const ENV_SCREENING_THRESHOLD: &str = "FUNNEL_SCREENING_THRESHOLD";
pub const ENV_SKIP_SCREENING: &str = "FUNNEL_SKIP_SCREENING";

fn default_concurrency() -> usize {
    5
}
fn default_screening_threshold() -> f64 {
    0.6
}
fn default_min_content_chars() -> usize {
    50
}
fn default_platform_keyword() -> String {
    "shopify".to_string()
}
fn default_pain_keywords() -> Vec<String> {
    [
        "frustrated",
        "annoying",
        "hate",
        "wish",
        "missing",
        "need",
        "want",
        "problem",
        "issue",
        "bug",
        "broken",
        "expensive",
        "overpriced",
        "alternative",
        "stuck",
        "can't",
        "doesn't work",
        "looking for",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_screen_window_chars() -> usize {
    500
}
fn default_deep_window_chars() -> usize {
    2000
}
fn default_batch_limit() -> usize {
    100
}

/// Knobs consumed by the funnel executor and its stages.
#[derive(Debug, Clone, Deserialize)]
pub struct FunnelConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_screening_threshold")]
    pub screening_threshold: f64,
    #[serde(default)]
    pub skip_screening: bool,
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
    #[serde(default = "default_platform_keyword")]
    pub platform_keyword: String,
    #[serde(default = "default_pain_keywords")]
    pub pain_keywords: Vec<String>,
    #[serde(default = "default_screen_window_chars")]
    pub screen_window_chars: usize,
    #[serde(default = "default_deep_window_chars")]
    pub deep_window_chars: usize,
    /// Per-run ceiling on screening invocations (retries included).
    #[serde(default)]
    pub max_screen_calls: Option<u64>,
    /// Per-run ceiling on deep classification invocations (retries included).
    #[serde(default)]
    pub max_deep_calls: Option<u64>,
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            screening_threshold: default_screening_threshold(),
            skip_screening: false,
            min_content_chars: default_min_content_chars(),
            platform_keyword: default_platform_keyword(),
            pain_keywords: default_pain_keywords(),
            screen_window_chars: default_screen_window_chars(),
            deep_window_chars: default_deep_window_chars(),
            max_screen_calls: None,
            max_deep_calls: None,
            batch_limit: default_batch_limit(),
        }
    }
}

impl FunnelConfig {
    /// Reject configurations that would make a run meaningless.
    pub fn validate(&self) -> Result<(), FunnelError> {
        if self.concurrency == 0 {
            return Err(FunnelError::Configuration(
                "concurrency must be at least 1".into(),
            ));
        }
        if !self.screening_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.screening_threshold)
        {
            return Err(FunnelError::Configuration(format!(
                "screening_threshold must be within [0,1], got {}",
                self.screening_threshold
            )));
        }
        if self.screen_window_chars == 0 || self.deep_window_chars == 0 {
            return Err(FunnelError::Configuration(
                "content windows must be non-zero".into(),
            ));
        }
        let has_keyword = !self.platform_keyword.trim().is_empty()
            || self.pain_keywords.iter().any(|k| !k.trim().is_empty());
        if !has_keyword {
            return Err(FunnelError::Configuration(
                "at least one platform or pain keyword is required".into(),
            ));
        }
        Ok(())
    }
}

/// Root of `config/funnel.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub funnel: FunnelConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub models: ModelsConfig,
}

impl Settings {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(s).context("parsing funnel config")?;
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading funnel config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallbacks, then apply env overrides.
    pub fn load_default() -> Result<Self> {
        let mut settings = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                anyhow::bail!("{ENV_CONFIG_PATH} points to non-existent path");
            }
            Self::load_from(&pb)?
        } else {
            let pb = PathBuf::from(DEFAULT_CONFIG_PATH);
            if pb.exists() {
                Self::load_from(&pb)?
            } else {
                Self::default()
            }
        };
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var(ENV_CONCURRENCY) {
            self.funnel.concurrency = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_CONCURRENCY} must be an integer"))?;
        }
        if let Ok(v) = std::env::var(ENV_SCREENING_THRESHOLD) {
            self.funnel.screening_threshold = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_SCREENING_THRESHOLD} must be a number"))?;
        }
        if let Ok(v) = std::env::var(ENV_SKIP_SCREENING) {
            self.funnel.skip_screening = matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), FunnelError> {
        self.funnel.validate()?;
        self.retry.validate()
    }
}
