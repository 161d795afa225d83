//! HTTP model providers. Each maps transport failures onto the funnel's
//! error taxonomy: 429 / 5xx / timeouts are transient, other 4xx are rejected,
//! unreadable bodies are malformed.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::ModelCallError;
use crate::insight::ModelTier;

use super::model::ModelClient;

const USER_AGENT: &str = "pain-funnel/0.1";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(4))
        .timeout(timeout)
        .build()?;
    Ok(client)
}

fn max_tokens_for(tier: ModelTier) -> u32 {
    match tier {
        ModelTier::Fast => 256,
        ModelTier::HighFidelity => 1024,
    }
}

fn map_send_error(e: reqwest::Error) -> ModelCallError {
    if e.is_timeout() {
        ModelCallError::transient("request timed out")
    } else if e.is_connect() {
        ModelCallError::transient(format!("connect error: {e}"))
    } else {
        ModelCallError::transient(format!("request error: {e}"))
    }
}

fn map_status(status: StatusCode) -> Option<ModelCallError> {
    if status.is_success() {
        return None;
    }
    // 529 is Anthropic's "overloaded".
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() || status.as_u16() == 529
    {
        Some(ModelCallError::transient(format!("HTTP {status}")))
    } else {
        Some(ModelCallError::rejected(format!("HTTP {status}")))
    }
}

/// Anthropic Messages API.
pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    tier: ModelTier,
}

impl AnthropicProvider {
    pub fn new(
        api_key: String,
        model: &str,
        tier: ModelTier,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            model: model.to_string(),
            tier,
        })
    }
}

#[async_trait::async_trait]
impl ModelClient for AnthropicProvider {
    async fn complete(&self, prompt: &str) -> Result<String, ModelCallError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            max_tokens: u32,
            temperature: f32,
            messages: Vec<Msg<'a>>,
        }
        #[derive(Deserialize)]
        struct Resp {
            content: Vec<Block>,
        }
        #[derive(Deserialize)]
        struct Block {
            #[serde(default)]
            text: Option<String>,
        }

        let req = Req {
            model: &self.model,
            max_tokens: max_tokens_for(self.tier),
            temperature: 0.0,
            messages: vec![Msg {
                role: "user",
                content: prompt,
            }],
        };

        let resp = self
            .http
            .post(ANTHROPIC_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req)
            .send()
            .await
            .map_err(map_send_error)?;

        if let Some(err) = map_status(resp.status()) {
            return Err(err);
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ModelCallError::malformed(format!("unreadable body: {e}")))?;
        let text: String = body
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(ModelCallError::malformed("empty completion"));
        }
        Ok(text)
    }

    fn tier(&self) -> ModelTier {
        self.tier
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}

/// OpenAI Chat Completions API.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    tier: ModelTier,
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        model: &str,
        tier: ModelTier,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            model: model.to_string(),
            tier,
        })
    }
}

#[async_trait::async_trait]
impl ModelClient for OpenAiProvider {
    async fn complete(&self, prompt: &str) -> Result<String, ModelCallError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![Msg {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
            max_tokens: max_tokens_for(self.tier),
        };

        let resp = self
            .http
            .post(OPENAI_URL)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(map_send_error)?;

        if let Some(err) = map_status(resp.status()) {
            return Err(err);
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ModelCallError::malformed(format!("unreadable body: {e}")))?;
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ModelCallError::malformed("empty completion"));
        }
        Ok(text)
    }

    fn tier(&self) -> ModelTier {
        self.tier
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}
