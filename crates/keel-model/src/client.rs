// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use keel_config::RetryConfig;

use crate::{CompletionRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// Abstract streaming chat interface.
///
/// The agent loop consumes the event stream chunk by chunk; auxiliary calls
/// (title generation, summary generation) use [`complete_text`] which drains
/// the stream into a single string.
///
/// [`complete_text`]: ModelClient::complete_text
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Human-readable client name for status display and logs.
    fn name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// Non-streaming convenience: run the request and return the full text.
    ///
    /// The default implementation drains [`stream`](ModelClient::stream);
    /// drivers may override with a true non-streaming wire call.
    async fn complete_text(&self, req: CompletionRequest) -> anyhow::Result<String> {
        let mut stream = self.stream(req).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(t) => text.push_str(&t),
                ResponseEvent::Done => break,
                _ => {}
            }
        }
        Ok(text)
    }
}

// ─── Retry policy ─────────────────────────────────────────────────────────────

/// Exponential backoff applied to retryable model errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_secs_f64(cfg.base_delay_sec.max(0.0)),
            max_delay: Duration::from_secs_f64(cfg.max_delay_sec.max(0.0)),
        }
    }

    /// Only server-side failures are retried; 4xx means the request itself is
    /// wrong and repeating it cannot help.
    pub fn should_retry(&self, status: u16) -> bool {
        (500..600).contains(&status)
    }

    /// Delay before retry number `attempt` (0-based): base × 2^attempt,
    /// capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self.base_delay.saturating_mul(factor);
        if self.max_delay > Duration::ZERO {
            delay.min(self.max_delay)
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Retry classification ─────────────────────────────────────────────────

    #[test]
    fn retries_5xx_only() {
        let p = RetryPolicy::default();
        assert!(p.should_retry(500));
        assert!(p.should_retry(503));
        assert!(p.should_retry(599));
        assert!(!p.should_retry(400));
        assert!(!p.should_retry(404));
        assert!(!p.should_retry(429));
        assert!(!p.should_retry(200));
    }

    // ── Backoff arithmetic ───────────────────────────────────────────────────

    #[test]
    fn delay_doubles_then_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay(0), Duration::from_secs(1));
        assert_eq!(p.delay(1), Duration::from_secs(2));
        assert_eq!(p.delay(2), Duration::from_secs(4));
        assert_eq!(p.delay(3), Duration::from_secs(8));
        assert_eq!(p.delay(4), Duration::from_secs(8), "capped at max_delay");
        assert_eq!(p.delay(10), Duration::from_secs(8));
    }

    #[test]
    fn zero_max_delay_means_uncapped() {
        let p = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::ZERO,
        };
        assert_eq!(p.delay(5), Duration::from_secs(32));
    }

    #[test]
    fn from_config_reads_values() {
        let cfg = RetryConfig {
            max_retries: 2,
            base_delay_sec: 0.5,
            max_delay_sec: 4.0,
        };
        let p = RetryPolicy::from_config(&cfg);
        assert_eq!(p.max_retries, 2);
        assert_eq!(p.delay(0), Duration::from_millis(500));
        assert_eq!(p.delay(4), Duration::from_secs(4));
    }
}
