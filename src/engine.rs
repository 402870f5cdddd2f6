//! Engine: composition root tying extractor, recognizer, sessions and
//! translator together. Loaded once at startup and shared read-only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, EngineConfig, TranslatorBackend};
use crate::keypoints::{ExtractError, KeypointExtractor, Normalizer, KEYPOINT_DIM};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::recognizer::{
    Confirmation, LabelError, LabelSet, RecognizeError, Recognizer, SequenceClassifier,
};
use crate::sessions::{SessionId, SessionIdError, SessionStore};
use crate::translate::{GlossTranslator, RemoteGenerator, SentenceGenerator};
use crate::worker::{
    WorkerClassifier, WorkerError, WorkerExtractor, WorkerGenerator, WorkerPool,
};

/// Startup failures. Any of these means the engine must not serve traffic.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("labels: {0}")]
    Labels(#[from] LabelError),
    #[error("classifier weights not found at {0}")]
    MissingClassifier(String),
    #[error("model worker: {0}")]
    Worker(#[from] WorkerError),
    #[error("model worker incompatible: {0}")]
    Incompatible(String),
}

/// Per-frame failures. The session is untouched whenever one is returned.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    InvalidSession(#[from] SessionIdError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Recognize(#[from] RecognizeError),
}

/// Model implementations an engine is assembled from.
pub struct EngineParts {
    pub extractor: Arc<dyn KeypointExtractor>,
    pub classifier: Arc<dyn SequenceClassifier>,
    pub generator: Option<Arc<dyn SentenceGenerator>>,
    pub normalizer: Normalizer,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub worker_available: bool,
    pub translator_available: bool,
    pub translator_backend: Option<&'static str>,
    pub sessions: usize,
    /// Worker processes currently alive; `None` when no pool is owned.
    pub workers_running: Option<usize>,
}

pub struct Engine {
    config: EngineConfig,
    extractor: Arc<dyn KeypointExtractor>,
    recognizer: Recognizer,
    translator: GlossTranslator,
    sessions: SessionStore,
    metrics: Arc<MetricsRegistry>,
    worker: Option<Arc<WorkerPool>>,
}

impl Engine {
    /// Assemble an engine from ready-made parts.
    pub fn from_parts(config: EngineConfig, parts: EngineParts) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let recognizer = Recognizer::new(
            config.recognizer.clone(),
            Arc::new(parts.normalizer),
            parts.classifier,
        )
        .with_metrics(Arc::clone(&metrics));
        let translator = GlossTranslator::new(parts.generator, &config.translator)
            .with_metrics(Arc::clone(&metrics));
        let sessions = SessionStore::new(&config.sessions, config.recognizer.clone());
        Self {
            config,
            extractor: parts.extractor,
            recognizer,
            translator,
            sessions,
            metrics,
            worker: None,
        }
    }

    /// Load models and start the worker pool. Blocking.
    pub fn load(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let models = &config.models;

        let labels = LabelSet::load_from_file(&models.labels)?;
        info!(path = %models.labels.display(), count = labels.len(), "labels loaded");

        if !models.classifier.exists() {
            return Err(EngineError::MissingClassifier(
                models.classifier.display().to_string(),
            ));
        }

        let pool = Arc::new(WorkerPool::from_config(&config.worker, models));
        let description = pool.describe()?;
        info!(
            keypoint_dim = description.keypoint_dim,
            num_classes = description.num_classes,
            generator_loaded = description.generator_loaded,
            workers = pool.size(),
            "model worker ready"
        );
        if description.keypoint_dim != KEYPOINT_DIM {
            return Err(EngineError::Incompatible(format!(
                "worker extracts {} keypoint values, recognizer expects {KEYPOINT_DIM}",
                description.keypoint_dim
            )));
        }
        if description.num_classes != labels.len() {
            return Err(EngineError::Incompatible(format!(
                "classifier has {} classes, label file has {}",
                description.num_classes,
                labels.len()
            )));
        }

        let normalizer = Normalizer::from_optional_file(models.stats.as_deref());

        let generator: Option<Arc<dyn SentenceGenerator>> = match config.translator.backend {
            TranslatorBackend::Worker if description.generator_loaded => Some(Arc::new(
                WorkerGenerator::new(Arc::clone(&pool), config.translator.max_length),
            )),
            TranslatorBackend::Worker => {
                warn!("worker has no translator model loaded, translation passes through");
                None
            }
            TranslatorBackend::Remote => match RemoteGenerator::new(&config.translator.remote) {
                Ok(remote) => Some(Arc::new(remote)),
                Err(e) => {
                    warn!(error = %e, "remote translator init failed, translation passes through");
                    None
                }
            },
            TranslatorBackend::Disabled => None,
        };

        let parts = EngineParts {
            extractor: Arc::new(WorkerExtractor::new(
                Arc::clone(&pool),
                config.recognizer.mirror_frames,
            )),
            classifier: Arc::new(WorkerClassifier::new(Arc::clone(&pool), labels)),
            generator,
            normalizer,
        };
        let mut engine = Self::from_parts(config, parts);
        engine.worker = Some(pool);
        Ok(engine)
    }

    /// Process one encoded image for a session (`None` → default session).
    /// Blocking. Returns a gloss when a new word is confirmed on this frame.
    pub fn process_frame(
        &self,
        session_id: Option<&str>,
        image: &[u8],
    ) -> Result<Option<Confirmation>, FrameError> {
        let id = SessionId::from_optional(session_id)?;
        let total = self.metrics.span(metric_names::FRAME_TOTAL);

        let extract = self.metrics.span(metric_names::EXTRACT);
        let landmarks = self.extractor.extract(id.as_str(), image)?;
        let keypoints = landmarks.to_frame()?;
        extract.finish();

        let session = self.sessions.get_or_create(&id);
        let wait = Instant::now();
        let mut session = session.lock();
        self.metrics.record(
            metric_names::SESSION_LOCK_WAIT,
            wait.elapsed().as_micros() as f64,
        );

        let recognize = self.metrics.span(metric_names::RECOGNIZE);
        let outcome = self.recognizer.process(&mut session, &keypoints)?;
        recognize.finish();
        total.finish();

        debug!(
            session = %id,
            frame = session.frame_counter(),
            state = %outcome.state,
            movement = outcome.movement,
            hand = outcome.hand_present,
            "frame_processed"
        );
        Ok(outcome.confirmation)
    }

    /// Gloss text → sentence. Never fails.
    pub async fn translate(&self, text: &str) -> String {
        self.translator.translate(text).await
    }

    pub fn create_session(&self) -> SessionId {
        self.sessions.create()
    }

    /// Drop a session and the worker tracker that follows it.
    pub fn remove_session(&self, raw: &str) -> Result<bool, SessionIdError> {
        let id = SessionId::parse(raw)?;
        let removed = self.sessions.remove(&id);
        if removed {
            self.extractor.release(id.as_str());
        }
        Ok(removed)
    }

    pub fn sweep_sessions(&self) -> usize {
        let evicted = self.sessions.evict_idle();
        for id in &evicted {
            self.extractor.release(id.as_str());
        }
        evicted.len()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            worker_available: self.extractor.is_available(),
            translator_available: self.translator.is_available(),
            translator_backend: self.translator.backend_name(),
            sessions: self.sessions.len(),
            workers_running: self.worker.as_ref().map(|pool| pool.running()),
        }
    }

    /// Start the worker health loop, if this engine owns workers.
    pub fn spawn_worker_health(
        &self,
        cancel: CancellationToken,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let pool = self.worker.as_ref()?;
        let interval = Duration::from_secs(self.config.worker.health_interval_secs.max(1));
        Some(WorkerPool::spawn_health_loop(
            Arc::clone(pool),
            interval,
            cancel,
        ))
    }

    /// Periodically drop idle sessions until cancelled.
    pub fn spawn_session_sweeper(
        engine: Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(engine.config.sessions.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let evicted = engine.sweep_sessions();
                if evicted > 0 {
                    debug!(evicted, "session sweep");
                }
            }
            debug!("session sweeper stopped");
        })
    }

    /// Stop owned worker processes.
    pub fn shutdown(&self) {
        if let Some(pool) = &self.worker {
            pool.shutdown();
        }
    }
}
