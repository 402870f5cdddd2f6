//! Remote sentence generator over an OpenAI-compatible chat-completions API.
//! Requests are paced by a minimum interval and retried per `RetryPolicy`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{SentenceGenerator, TranslateError};
use crate::config::RemoteConfig;

const SYSTEM_PROMPT: &str = "You turn sign-language gloss sequences into one short, natural \
English sentence. Output only the sentence.";

pub struct RemoteGenerator {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    /// Next time a request may be sent.
    next_allowed: Arc<tokio::sync::Mutex<Instant>>,
    min_interval: Duration,
    retry: RetryPolicy,
}

impl RemoteGenerator {
    /// Build from config, reading the API key from `config.api_key_env`.
    pub fn new(config: &RemoteConfig) -> Result<Self, TranslateError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                TranslateError::Unavailable(format!(
                    "{} environment variable not set",
                    config.api_key_env
                ))
            })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &RemoteConfig, api_key: String) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TranslateError::Api(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            next_allowed: Arc::new(tokio::sync::Mutex::new(Instant::now())),
            min_interval: Duration::from_millis(config.min_interval_ms),
            retry: RetryPolicy::from_config(config),
        })
    }

    /// Wait until the rate limiter allows a request.
    async fn rate_limit_wait(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    async fn complete(&self, glosses: &str) -> Result<String, TranslateError> {
        self.rate_limit_wait().await;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": glosses}
            ],
            "max_tokens": estimate_max_tokens(glosses),
            "stream": false,
            "temperature": 0.2
        });

        let start = Instant::now();
        let response = self.send_with_retry(&body).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::Api(format!("decode response: {e}")))?;

        let sentence = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            tokens = parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
            "remote generation complete"
        );
        if sentence.is_empty() {
            return Err(TranslateError::EmptyOutput);
        }
        Ok(sentence)
    }

    async fn send_with_retry(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, TranslateError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut state = RetryState::default();
        loop {
            let failure = match self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    Failure::RateLimited {
                        retry_after: resp
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.trim().parse::<u64>().ok())
                            .map(Duration::from_secs),
                    }
                }
                Ok(resp) if resp.status().is_server_error() => Failure::Server(resp.status().as_u16()),
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    return Err(TranslateError::Api(format!(
                        "unexpected status {status}: {}",
                        text.chars().take(200).collect::<String>()
                    )));
                }
                Err(e) if e.is_timeout() => Failure::Timeout,
                Err(e) => return Err(TranslateError::Api(e.to_string())),
            };

            let wait = self.retry.next_wait(&mut state, &failure)?;
            warn!(?failure, wait_ms = wait.as_millis() as u64, "remote generation failed, retrying");
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
    }
}

/// A retryable failure of one request attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Failure {
    RateLimited { retry_after: Option<Duration> },
    Server(u16),
    Timeout,
}

#[derive(Debug, Default)]
struct RetryState {
    rate_limited: u32,
    server_errors: u32,
    timed_out: bool,
}

/// Retry budget per failure class. 429 honors `Retry-After` and otherwise
/// waits 1s, 2s, 4s. 5xx backs off exponentially. A timeout is retried once
/// without waiting.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_rate_limited: u32,
    max_server_errors: u32,
    backoff_base: Duration,
}

impl RetryPolicy {
    fn from_config(config: &RemoteConfig) -> Self {
        Self {
            max_rate_limited: config.max_rate_limit_retries,
            max_server_errors: config.max_server_error_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// How long to wait before the next attempt, or the error to give up with.
    fn next_wait(&self, state: &mut RetryState, failure: &Failure) -> Result<Duration, TranslateError> {
        match *failure {
            Failure::RateLimited { retry_after } => {
                let wait = retry_after
                    .unwrap_or_else(|| Duration::from_secs(1u64 << state.rate_limited.min(6)));
                if state.rate_limited >= self.max_rate_limited {
                    return Err(TranslateError::RateLimited {
                        retry_after_ms: wait.as_millis() as u64,
                    });
                }
                state.rate_limited += 1;
                Ok(wait)
            }
            Failure::Server(status) => {
                if state.server_errors >= self.max_server_errors {
                    return Err(TranslateError::Api(format!("server error: {status}")));
                }
                let wait = self.backoff_base * (1u32 << state.server_errors.min(16));
                state.server_errors += 1;
                Ok(wait)
            }
            Failure::Timeout => {
                if state.timed_out {
                    return Err(TranslateError::Timeout);
                }
                state.timed_out = true;
                Ok(Duration::ZERO)
            }
        }
    }
}

impl SentenceGenerator for RemoteGenerator {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn generate<'a>(&'a self, glosses: &'a str) -> BoxFuture<'a, Result<String, TranslateError>> {
        Box::pin(self.complete(glosses))
    }
}

/// Sentences run a little longer than their glosses: 2 tokens per gloss + 16, capped at 128.
fn estimate_max_tokens(glosses: &str) -> u32 {
    let words = glosses.split_whitespace().count() as u32;
    (words * 2 + 16).min(128)
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}
