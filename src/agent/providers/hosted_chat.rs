//! Hosted chat provider: HTTPS REST against an Anthropic-shaped Messages
//! API. Generalizes the teacher's `ai.rs::call_http` (reqwest POST to
//! `/v1/messages`) into a `Provider`, adding the per-model rate limiter
//! and retry-once-with-fallback-model on model-not-found.

use async_trait::async_trait;
use serde_json::json;

use crate::agent::rate_limit::RateLimiter;
use crate::agent::{CallError, ProviderResponse, Role};

pub struct HostedChatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    fallback_model: Option<String>,
    limiter: RateLimiter,
}

impl HostedChatProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        model: String,
        fallback_model: Option<String>,
        limiter: RateLimiter,
    ) -> Self {
        Self { client, base_url, api_key, model, fallback_model, limiter }
    }

    async fn call_model(&self, model: &str, history: &[(Role, String)]) -> Result<ProviderResponse, CallError> {
        let messages: Vec<_> = history
            .iter()
            .map(|(role, text)| {
                json!({
                    "role": match role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": text,
                })
            })
            .collect();

        let body = json!({
            "model": model,
            "max_tokens": 4096,
            "system": crate::agent::prompts::system_prompt(),
            "messages": messages,
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::Timeout
                } else {
                    CallError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(CallError::RateLimited);
        }
        if status.as_u16() == 404 {
            return Err(CallError::ModelNotFound);
        }
        if status.is_server_error() {
            return Err(CallError::Upstream5xx(status.as_u16()));
        }
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(CallError::BadRequest(text));
        }

        let parsed: serde_json::Value = response.json().await.map_err(|e| CallError::Network(e.to_string()))?;
        let text = parsed["content"]
            .as_array()
            .and_then(|blocks| blocks.iter().find_map(|b| b["text"].as_str()))
            .unwrap_or_default()
            .to_string();
        if text.trim().is_empty() {
            return Err(CallError::EmptyResponse);
        }

        Ok(ProviderResponse {
            text,
            input_tokens: parsed["usage"]["input_tokens"].as_i64(),
            output_tokens: parsed["usage"]["output_tokens"].as_i64(),
            total_tokens: None,
        })
    }
}

#[async_trait]
impl crate::agent::Provider for HostedChatProvider {
    async fn call(&self, history: &[(Role, String)]) -> Result<ProviderResponse, CallError> {
        match self.call_model(&self.model, history).await {
            Err(CallError::ModelNotFound) => {
                if let Some(fallback_model) = &self.fallback_model {
                    tracing::warn!(model = %self.model, fallback_model, "model not found, retrying once with fallback model");
                    self.call_model(fallback_model, history).await
                } else {
                    Err(CallError::ModelNotFound)
                }
            }
            other => other,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn rate_limiter(&self) -> Option<&RateLimiter> {
        Some(&self.limiter)
    }
}
