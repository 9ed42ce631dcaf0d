//! SearchBridge (C9): a stdio JSON-RPC sub-protocol exposing exactly
//! `search`, `timeline`, `get_observations`, each a thin wrapper over the
//! worker's HTTP endpoints (spec §4.7). Stdout carries only JSON-RPC
//! framing; every log line goes to stderr via `telemetry::init_bridge`,
//! installed before anything else that might log (REDESIGN FLAGS).

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const HEALTH_POLL_TIMEOUT: Duration = Duration::from_secs(35);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

const TOOLS: &[(&str, &str)] = &[
    ("search", "Full-text search over observations and summaries"),
    ("timeline", "Interleaved chronological window around an anchor"),
    ("get_observations", "Batched full-record fetch by id"),
];

pub struct BridgeOptions {
    pub base_url: String,
    pub worker_binary: Option<String>,
}

pub async fn run_stdio(opts: BridgeOptions) -> Result<()> {
    let client = reqwest::Client::new();
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Value>(&line) {
            Ok(request) => handle_request(&client, &opts, request).await,
            Err(e) => json!({ "error": { "code": -32700, "message": format!("parse error: {e}") } }),
        };
        let encoded = serde_json::to_string(&response)?;
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn handle_request(client: &reqwest::Client, opts: &BridgeOptions, request: Value) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request["method"].as_str().unwrap_or_default();

    let result = match method {
        "tools/list" => Ok(json!({
            "tools": TOOLS.iter().map(|(name, desc)| json!({ "name": name, "description": desc })).collect::<Vec<_>>()
        })),
        "tools/call" => {
            let tool = request["params"]["name"].as_str().unwrap_or_default();
            let args = request["params"]["arguments"].clone();
            call_tool(client, opts, tool, args).await
        }
        other => Err(anyhow!("unknown method '{other}'")),
    };

    match result {
        Ok(value) => json!({ "id": id, "result": value }),
        Err(e) => json!({ "id": id, "error": { "code": -32000, "message": e.to_string() } }),
    }
}

async fn call_tool(client: &reqwest::Client, opts: &BridgeOptions, tool: &str, args: Value) -> Result<Value> {
    ensure_worker_healthy(client, opts).await?;

    let attempt = dispatch_tool(client, &opts.base_url, tool, &args).await;
    match attempt {
        Ok(v) => Ok(v),
        Err(_) => {
            // One retry per spec §4.7, after another health probe/spawn cycle.
            ensure_worker_healthy(client, opts).await?;
            dispatch_tool(client, &opts.base_url, tool, &args).await
        }
    }
}

async fn dispatch_tool(client: &reqwest::Client, base_url: &str, tool: &str, args: &Value) -> Result<Value> {
    match tool {
        "search" => get_with_query(client, &format!("{base_url}/search"), args).await,
        "timeline" => get_with_query(client, &format!("{base_url}/timeline"), args).await,
        "get_observations" => {
            let ids = args["ids"].as_array().ok_or_else(|| anyhow!("get_observations requires ids:number[]"))?;
            client
                .post(format!("{base_url}/observations/batch"))
                .json(&json!({ "ids": ids }))
                .send()
                .await?
                .json::<Value>()
                .await
                .map_err(|e| anyhow!(e))
        }
        other => Err(anyhow!("unknown tool '{other}'")),
    }
}

async fn get_with_query(client: &reqwest::Client, url: &str, args: &Value) -> Result<Value> {
    let mut request = client.get(url);
    if let Value::Object(map) = args {
        let pairs: Vec<(String, String)> = map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())).or_else(|| Some((k.clone(), v.to_string()))))
            .collect();
        request = request.query(&pairs);
    }
    request.send().await?.json::<Value>().await.map_err(|e| anyhow!(e))
}

async fn ensure_worker_healthy(client: &reqwest::Client, opts: &BridgeOptions) -> Result<()> {
    if probe_health(client, &opts.base_url).await {
        return Ok(());
    }
    let binary = opts.worker_binary.clone().unwrap_or_else(|| "memkeepd".to_string());
    tracing::info!(binary, "worker not responding, attempting to spawn");
    let _ = tokio::process::Command::new(&binary).arg("serve").stdin(std::process::Stdio::null()).stdout(std::process::Stdio::null()).stderr(std::process::Stdio::null()).spawn();

    let deadline = tokio::time::Instant::now() + HEALTH_POLL_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if probe_health(client, &opts.base_url).await {
            return Ok(());
        }
        tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
    }
    Err(anyhow!("worker did not become healthy within {:?}", HEALTH_POLL_TIMEOUT))
}

async fn probe_health(client: &reqwest::Client, base_url: &str) -> bool {
    client
        .get(format!("{base_url}/health"))
        .timeout(Duration::from_secs(2))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_list_exposes_exactly_three_tools() {
        let names: Vec<&str> = TOOLS.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["search", "timeline", "get_observations"]);
    }
}
