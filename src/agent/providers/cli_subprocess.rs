//! CLI subprocess provider: spawns an external binary with the prompt on
//! a temp-file round-trip, parses a final-message file and a token-usage
//! line, times out with SIGTERM-then-kill escalation. New — no teacher
//! equivalent — grounded in `tempfile` usage across `lanegrid-agtrace`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::agent::{CallError, ProviderResponse, Role};

pub struct CliSubprocessProvider {
    binary: String,
    model: String,
    timeout: Duration,
    /// Open-source bridge flag: routes the CLI through a local provider
    /// with environment injection (spec §4.3) — e.g. a host URL override.
    bridge_env: Vec<(String, String)>,
}

impl CliSubprocessProvider {
    pub fn new(binary: String, model: String, timeout: Duration, bridge_env: Vec<(String, String)>) -> Self {
        Self { binary, model, timeout, bridge_env }
    }
}

fn render_prompt(history: &[(Role, String)]) -> String {
    let system = format!("[system]\n{}\n", crate::agent::prompts::system_prompt());
    let turns = history
        .iter()
        .map(|(role, text)| {
            let tag = match role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            format!("[{tag}]\n{text}\n")
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("{system}\n{turns}")
}

#[async_trait]
impl crate::agent::Provider for CliSubprocessProvider {
    async fn call(&self, history: &[(Role, String)]) -> Result<ProviderResponse, CallError> {
        let prompt_file = NamedTempFile::new().map_err(|e| CallError::Network(e.to_string()))?;
        let response_file = NamedTempFile::new().map_err(|e| CallError::Network(e.to_string()))?;

        {
            let mut file = tokio::fs::File::create(prompt_file.path())
                .await
                .map_err(|e| CallError::Network(e.to_string()))?;
            file.write_all(render_prompt(history).as_bytes())
                .await
                .map_err(|e| CallError::Network(e.to_string()))?;
        }

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--model")
            .arg(&self.model)
            .arg("--prompt-file")
            .arg(prompt_file.path())
            .arg("--output-file")
            .arg(response_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in &self.bridge_env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|e| CallError::Network(e.to_string()))?;

        let wait_result = tokio::time::timeout(self.timeout, child.wait()).await;
        let status = match wait_result {
            Ok(result) => result.map_err(|e| CallError::Network(e.to_string()))?,
            Err(_) => {
                #[cfg(unix)]
                {
                    if let Some(pid) = child.id() {
                        unsafe {
                            libc::kill(pid as i32, libc::SIGTERM);
                        }
                    }
                    let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
                }
                let _ = child.kill().await;
                return Err(CallError::Timeout);
            }
        };

        if !status.success() {
            return Err(CallError::Network(format!("cli provider exited with {status}")));
        }

        let raw = tokio::fs::read_to_string(response_file.path())
            .await
            .map_err(|e| CallError::Network(e.to_string()))?;
        let (text, usage_line) = split_usage_line(&raw);
        if text.trim().is_empty() {
            return Err(CallError::EmptyResponse);
        }

        let total_tokens = usage_line.and_then(|line| {
            line.trim()
                .strip_prefix("tokens:")
                .and_then(|n| n.trim().parse::<i64>().ok())
        });

        Ok(ProviderResponse {
            text: text.to_string(),
            input_tokens: None,
            output_tokens: None,
            total_tokens,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// The output file is the final message followed optionally by a trailing
/// `tokens: N` accounting line.
fn split_usage_line(raw: &str) -> (&str, Option<&str>) {
    match raw.rsplit_once('\n') {
        Some((body, last)) if last.trim_start().starts_with("tokens:") => (body, Some(last)),
        _ => (raw, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_usage_line_extracts_trailing_token_count() {
        let (body, usage) = split_usage_line("hello world\ntokens: 42");
        assert_eq!(body, "hello world");
        assert_eq!(usage, Some("tokens: 42"));
    }

    #[test]
    fn split_usage_line_passes_through_without_usage() {
        let (body, usage) = split_usage_line("just text");
        assert_eq!(body, "just text");
        assert!(usage.is_none());
    }
}
