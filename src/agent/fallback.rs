//! Fallback-policy resolution and agent-chain construction (spec §4.3,
//! REDESIGN FLAGS: explicit composition, never subclass overrides).
//! `auto` prefers the CLI provider if available, else hosted-chat; `off`
//! disables fallback; `codex`/`sdk` pin a specific fallback agent.

use std::collections::HashMap;
use std::time::Duration;

use crate::agent::providers::{CliSubprocessProvider, HostedChatProvider, LocalHttpProvider};
use crate::agent::rate_limit::RateLimiter;
use crate::agent::{Agent, Mode, ProviderAgent};
use crate::config;
use crate::http::state::SharedState;

fn cli_binary() -> Option<String> {
    std::env::var("MEMKEEP_CLI_BINARY").ok().filter(|s| !s.is_empty())
}

fn hosted_chat_agent(state: &SharedState, fallback: Option<Box<dyn Agent>>) -> Box<dyn Agent> {
    let model = config::resolve(&config::MODEL).unwrap_or_else(|| "claude-sonnet-4-5-20250929".to_string());
    let base_url = config::resolve(&config::BASE_URL).unwrap_or_else(|| "https://api.anthropic.com".to_string());
    let api_key = config::resolve(&config::API_KEY).unwrap_or_default();
    let limiter = RateLimiter::new(HashMap::new(), 50);
    let provider = HostedChatProvider::new(state.http_client.clone(), base_url, api_key, model, None, limiter);
    Box::new(ProviderAgent { provider: Box::new(provider), fallback, mode: Mode::default() })
}

fn cli_agent(binary: String, fallback: Option<Box<dyn Agent>>) -> Box<dyn Agent> {
    let model = config::resolve(&config::MODEL).unwrap_or_default();
    let provider = CliSubprocessProvider::new(binary, model, Duration::from_secs(120), Vec::new());
    Box::new(ProviderAgent { provider: Box::new(provider), fallback, mode: Mode::default() })
}

fn local_http_agent(state: &SharedState, fallback: Option<Box<dyn Agent>>) -> anyhow::Result<Box<dyn Agent>> {
    let base_url = config::resolve(&config::BASE_URL).unwrap_or_else(|| "http://localhost:11434".to_string());
    let model = config::resolve(&config::MODEL).unwrap_or_else(|| "llama3".to_string());
    let provider = LocalHttpProvider::new(
        state.http_client.clone(),
        base_url,
        model,
        4096,
        0.2,
        serde_json::Value::Null,
        Duration::from_secs(60),
    )?;
    Ok(Box::new(ProviderAgent { provider: Box::new(provider), fallback, mode: Mode::default() }))
}

fn build_fallback(state: &SharedState, primary_is_hosted_chat: bool) -> Option<Box<dyn Agent>> {
    let policy = config::resolve(&config::FALLBACK_POLICY).unwrap_or_else(|| "auto".to_string());
    match policy.as_str() {
        "off" => None,
        "codex" => cli_binary().map(|bin| cli_agent(bin, None)),
        "sdk" => Some(hosted_chat_agent(state, None)),
        _ => {
            // auto: CLI provider if available, else hosted-chat (unless
            // hosted-chat is already the primary — no self-fallback).
            if let Some(bin) = cli_binary() {
                Some(cli_agent(bin, None))
            } else if !primary_is_hosted_chat {
                Some(hosted_chat_agent(state, None))
            } else {
                None
            }
        }
    }
}

/// Build the top-level agent for a session from the configured provider
/// and fallback policy.
pub fn build_agent(state: &SharedState) -> Box<dyn Agent> {
    let provider_kind = config::resolve(&config::PROVIDER).unwrap_or_else(|| "hosted-chat".to_string());
    match provider_kind.as_str() {
        "cli-subprocess" => {
            let binary = cli_binary().unwrap_or_else(|| "codex".to_string());
            let fallback = build_fallback(state, false);
            cli_agent(binary, fallback)
        }
        "local-http" => {
            let fallback = build_fallback(state, false);
            match local_http_agent(state, fallback) {
                Ok(agent) => agent,
                Err(e) => {
                    tracing::error!(error = %e, "failed to build local-http provider, falling back to hosted-chat");
                    hosted_chat_agent(state, None)
                }
            }
        }
        _ => {
            let fallback = build_fallback(state, true);
            hosted_chat_agent(state, fallback)
        }
    }
}
