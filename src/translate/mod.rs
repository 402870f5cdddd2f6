//! Gloss-to-sentence translation.
//!
//! [`GlossTranslator`] never fails: an empty input, a missing or unavailable
//! generator, or a generation error all return the input unchanged.

pub mod cache;
pub mod remote;

pub use cache::TranslationCache;
pub use remote::RemoteGenerator;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::TranslatorConfig;
use crate::metrics::{metric_names, MetricsRegistry};

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("generator unavailable: {0}")]
    Unavailable(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("generation timeout")]
    Timeout,
    #[error("model worker error: {0}")]
    Worker(String),
    #[error("generator returned an empty sentence")]
    EmptyOutput,
}

/// Gloss sequence → sentence model (adapter for different backends).
pub trait SentenceGenerator: Send + Sync {
    /// Short backend name, part of the cache key.
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    /// Generate a sentence from whitespace-normalized glosses.
    fn generate<'a>(&'a self, glosses: &'a str) -> BoxFuture<'a, Result<String, TranslateError>>;
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn normalize_glosses(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fail-open translator with a result cache.
pub struct GlossTranslator {
    generator: Option<Arc<dyn SentenceGenerator>>,
    cache: TranslationCache,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl GlossTranslator {
    pub fn new(generator: Option<Arc<dyn SentenceGenerator>>, config: &TranslatorConfig) -> Self {
        match &generator {
            Some(g) => info!(backend = g.name(), "translator ready"),
            None => info!("no sentence generator, translation passes glosses through"),
        }
        Self {
            generator,
            cache: TranslationCache::new(
                config.cache_capacity,
                Duration::from_secs(config.cache_ttl_secs),
            ),
            metrics: None,
        }
    }

    /// Translator that always echoes its input.
    pub fn passthrough() -> Self {
        Self::new(None, &TranslatorConfig::default())
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_available(&self) -> bool {
        self.generator.as_ref().is_some_and(|g| g.is_available())
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.generator.as_ref().map(|g| g.name())
    }

    pub async fn translate(&self, text: &str) -> String {
        let normalized = normalize_glosses(text);
        if normalized.is_empty() {
            return text.to_string();
        }
        let Some(generator) = self.generator.as_ref().filter(|g| g.is_available()) else {
            debug!("generator unavailable, passing glosses through");
            return text.to_string();
        };

        let key = TranslationCache::compute_key(generator.name(), &normalized);
        if let Some(sentence) = self.cache.get(&key) {
            debug!(glosses = %normalized, "translation cache hit");
            self.record(metric_names::TRANSLATE_CACHED, 0.0);
            return sentence;
        }

        let start = std::time::Instant::now();
        let result = generator.generate(&normalized).await;
        self.record(
            metric_names::TRANSLATE,
            start.elapsed().as_micros() as f64,
        );

        match result.map(|s| s.trim().to_string()) {
            Ok(sentence) if !sentence.is_empty() => {
                info!(
                    backend = generator.name(),
                    glosses = %normalized,
                    sentence = %sentence,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "translated"
                );
                self.cache.insert(key, sentence.clone());
                sentence
            }
            Ok(_) => {
                warn!(
                    backend = generator.name(),
                    error = %TranslateError::EmptyOutput,
                    "translation failed, passing through"
                );
                text.to_string()
            }
            Err(e) => {
                warn!(
                    backend = generator.name(),
                    error = %e,
                    "translation failed, passing through"
                );
                text.to_string()
            }
        }
    }

    fn record(&self, name: &'static str, value_us: f64) {
        if let Some(metrics) = &self.metrics {
            metrics.record(name, value_us);
        }
    }
}

/// Mock generator for testing: title-cases the glosses into a sentence.
pub struct MockGenerator {
    available: bool,
    fail: bool,
    calls: AtomicUsize,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            available: true,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// "HELLO ME SAD" → "Hello me sad."
    pub fn sentence_for(glosses: &str) -> String {
        let lower = glosses.to_lowercase();
        let mut chars = lower.chars();
        match chars.next() {
            Some(first) => format!("{}{}.", first.to_uppercase(), chars.as_str()),
            None => String::new(),
        }
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SentenceGenerator for MockGenerator {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn generate<'a>(&'a self, glosses: &'a str) -> BoxFuture<'a, Result<String, TranslateError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TranslateError::Worker("mock generator failure".into()));
            }
            Ok(Self::sentence_for(glosses))
        })
    }
}
