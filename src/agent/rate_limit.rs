//! Per-model request-per-minute limiter: a millisecond-precision "last
//! request time" per model with `(60_000 / rpm) + margin` spacing (spec
//! §4.3/§5). Grounded in the `Instant`-based timing idiom the teacher
//! already uses for `log::Timer`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

const SAFETY_MARGIN_MS: u64 = 50;

pub struct RateLimiter {
    limits: HashMap<String, u32>,
    default_rpm: u32,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(limits: HashMap<String, u32>, default_rpm: u32) -> Self {
        Self {
            limits,
            default_rpm,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    fn spacing_for(&self, model: &str) -> Duration {
        let rpm = self.limits.get(model).copied().unwrap_or(self.default_rpm).max(1);
        Duration::from_millis(60_000 / rpm as u64 + SAFETY_MARGIN_MS)
    }

    /// Suspend until it is this model's turn. A single model is serialised
    /// across all sessions sharing this limiter instance.
    pub async fn wait_turn(&self, model: &str) {
        let spacing = self.spacing_for(model);
        let mut last = self.last_request.lock().await;
        if let Some(prev) = last.get(model) {
            let elapsed = prev.elapsed();
            if elapsed < spacing {
                tokio::time::sleep(spacing - elapsed).await;
            }
        }
        last.insert(model.to_string(), Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn second_call_for_same_model_is_delayed() {
        let limiter = RateLimiter::new(HashMap::from([("m".to_string(), 6000)]), 60);
        let start = Instant::now();
        limiter.wait_turn("m").await;
        limiter.wait_turn("m").await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_model_uses_default_rpm() {
        let limiter = RateLimiter::new(HashMap::new(), 6000);
        limiter.wait_turn("unknown").await;
        limiter.wait_turn("unknown").await;
    }
}
