//! Local HTTP provider: chat over a local daemon (e.g. Ollama-compatible)
//! with a configurable base URL/model/context window/temperature. New —
//! no teacher equivalent — but shares `HostedChatProvider`'s request shape.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::{CallError, ProviderResponse, Role};

pub struct LocalHttpProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    context_window: u32,
    temperature: f32,
    extra_options: Value,
    timeout: std::time::Duration,
}

impl LocalHttpProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        model: String,
        context_window: u32,
        temperature: f32,
        extra_options: Value,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        if !extra_options.is_null() && !extra_options.is_object() {
            anyhow::bail!("extra options must be a plain JSON object");
        }
        Ok(Self { client, base_url, model, context_window, temperature, extra_options, timeout })
    }
}

#[async_trait]
impl crate::agent::Provider for LocalHttpProvider {
    async fn call(&self, history: &[(Role, String)]) -> Result<ProviderResponse, CallError> {
        let system = json!({ "role": "system", "content": crate::agent::prompts::system_prompt() });
        let messages: Vec<_> = std::iter::once(system)
            .chain(history.iter().map(|(role, text)| {
                json!({
                    "role": match role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": text,
                })
            }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "options": {
                "num_ctx": self.context_window,
                "temperature": self.temperature,
            },
            "stream": false,
        });
        if let Some(extra) = self.extra_options.as_object() {
            if let Some(options) = body["options"].as_object_mut() {
                for (k, v) in extra {
                    options.insert(k.clone(), v.clone());
                }
            }
        }

        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(format!("{}/api/chat", self.base_url.trim_end_matches('/'))).json(&body).send(),
        )
        .await
        .map_err(|_| CallError::Timeout)?
        .map_err(|e| CallError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(CallError::Upstream5xx(status.as_u16()));
        }
        if status.is_client_error() {
            return Err(CallError::BadRequest(response.text().await.unwrap_or_default()));
        }

        let parsed: Value = response.json().await.map_err(|e| CallError::Network(e.to_string()))?;
        let text = parsed["message"]["content"].as_str().unwrap_or_default().to_string();
        if text.trim().is_empty() {
            return Err(CallError::EmptyResponse);
        }

        Ok(ProviderResponse {
            text,
            input_tokens: parsed["prompt_eval_count"].as_i64(),
            output_tokens: parsed["eval_count"].as_i64(),
            total_tokens: None,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_object_extra_options() {
        let client = reqwest::Client::new();
        let result = LocalHttpProvider::new(
            client,
            "http://localhost:11434".to_string(),
            "llama3".to_string(),
            4096,
            0.2,
            json!(["not", "an", "object"]),
            std::time::Duration::from_secs(30),
        );
        assert!(result.is_err());
    }
}
