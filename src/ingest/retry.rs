//! `postJsonWithRetry` (spec §4.4/§8 scenarios 3/4): exponential-backoff
//! retry on HTTP 408/425/429/5xx or network errors only; everything else
//! fails immediately. Grounded in
//! `examples/other_examples/983ca6ad_SpillwaveSolutions-agent-memory__crates-memory-service-src-ingest.rs.rs`'s
//! retry shape.

use anyhow::{anyhow, Result};
use serde_json::Value;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_attempts: 3, base_delay_ms: 200 }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429) || (500..600).contains(&status)
}

pub async fn post_json_with_retry(client: &reqwest::Client, url: &str, body: &Value, policy: &RetryPolicy) -> Result<Value> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = client.post(url).json(body).send().await;
        match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response.json::<Value>().await.map_err(|e| anyhow!(e));
                }
                if !is_retryable_status(status.as_u16()) || attempt >= policy.max_attempts {
                    return Err(anyhow!("request to {url} failed with status {status}"));
                }
            }
            Err(e) => {
                if attempt >= policy.max_attempts {
                    return Err(anyhow!(e));
                }
            }
        }
        let delay = policy.base_delay_ms * 2u64.pow(attempt - 1);
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_match_spec() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(408));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(404));
    }
}
