//! Worker-backed implementations of the model traits.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use super::protocol::{f32_le_bytes, WorkerRequest};
use super::{WorkerError, WorkerPool};
use crate::keypoints::{ExtractError, HolisticLandmarks, KeypointExtractor};
use crate::recognizer::{ClassifyError, FeatureWindow, LabelSet, Prediction, SequenceClassifier};
use crate::translate::{SentenceGenerator, TranslateError};

/// Worker error kind for frames the worker could not decode.
pub const INVALID_IMAGE_KIND: &str = "invalid_image";

pub struct WorkerExtractor {
    pool: Arc<WorkerPool>,
    mirror: bool,
}

impl WorkerExtractor {
    pub fn new(pool: Arc<WorkerPool>, mirror: bool) -> Self {
        Self { pool, mirror }
    }
}

/// Frames of a session always go to the same worker, which holds that
/// session's tracker.
impl KeypointExtractor for WorkerExtractor {
    fn extract(&self, session: &str, image: &[u8]) -> Result<HolisticLandmarks, ExtractError> {
        if image.is_empty() {
            return Err(ExtractError::InvalidImage("empty image".into()));
        }
        let response = self
            .pool
            .call_pinned(
                session,
                &WorkerRequest::Extract {
                    session,
                    image,
                    mirror: self.mirror,
                },
            )
            .and_then(|r| r.expect_type("landmarks"))
            .map_err(|e| match e {
                WorkerError::Remote { kind, message } if kind == INVALID_IMAGE_KIND => {
                    ExtractError::InvalidImage(message)
                }
                e if e.is_unavailable() => ExtractError::Unavailable(e.to_string()),
                e => ExtractError::Failed(e.to_string()),
            })?;
        Ok(HolisticLandmarks {
            pose: response.pose,
            face: response.face,
            left_hand: response.left_hand,
            right_hand: response.right_hand,
        })
    }

    fn release(&self, session: &str) {
        // A slot with no process holds no trackers.
        let Some(index) = self.pool.slot_for(session) else {
            return;
        };
        if !self.pool.is_running(index) {
            return;
        }
        match self
            .pool
            .call_pinned(session, &WorkerRequest::Release { session })
            .and_then(|r| r.expect_type("released"))
        {
            Ok(_) => debug!(session, slot = index, "tracker_released"),
            Err(e) => warn!(session, error = %e, "tracker release failed"),
        }
    }

    fn is_available(&self) -> bool {
        self.pool.is_available()
    }
}

/// Classifier running in the worker. Class indices map through the
/// Rust-owned label set, which must match the training order.
pub struct WorkerClassifier {
    pool: Arc<WorkerPool>,
    labels: LabelSet,
}

impl WorkerClassifier {
    pub fn new(pool: Arc<WorkerPool>, labels: LabelSet) -> Self {
        Self { pool, labels }
    }
}

impl SequenceClassifier for WorkerClassifier {
    fn classify(&self, window: &FeatureWindow) -> Result<Prediction, ClassifyError> {
        let data = f32_le_bytes(window.as_flat());
        let response = self
            .pool
            .call(&WorkerRequest::Classify {
                frames: window.frames(),
                dim: window.dim(),
                data: &data,
            })
            .and_then(|r| r.expect_type("prediction"))
            .map_err(|e| {
                if e.is_unavailable() {
                    ClassifyError::Unavailable(e.to_string())
                } else {
                    ClassifyError::Inference(e.to_string())
                }
            })?;
        let index = response
            .index
            .ok_or_else(|| ClassifyError::Inference("prediction missing `index`".into()))?;
        Ok(Prediction {
            label: self.labels.get(index)?.to_string(),
            confidence: response.confidence.unwrap_or(0.0),
        })
    }
}

/// Seq2seq gloss-to-sentence model running in the worker.
pub struct WorkerGenerator {
    pool: Arc<WorkerPool>,
    max_length: u32,
}

impl WorkerGenerator {
    pub fn new(pool: Arc<WorkerPool>, max_length: u32) -> Self {
        Self { pool, max_length }
    }
}

impl SentenceGenerator for WorkerGenerator {
    fn name(&self) -> &'static str {
        "worker"
    }

    fn is_available(&self) -> bool {
        self.pool.is_available()
    }

    fn generate<'a>(&'a self, glosses: &'a str) -> BoxFuture<'a, Result<String, TranslateError>> {
        let pool = Arc::clone(&self.pool);
        let text = glosses.to_string();
        let max_length = self.max_length;
        Box::pin(async move {
            let response = tokio::task::spawn_blocking(move || {
                pool.call(&WorkerRequest::Generate {
                    text: &text,
                    max_length,
                })
                .and_then(|r| r.expect_type("sentence"))
            })
            .await
            .map_err(|e| TranslateError::Worker(e.to_string()))?
            .map_err(|e| TranslateError::Worker(e.to_string()))?;
            response.text.ok_or(TranslateError::EmptyOutput)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::FakeWorker;
    use crate::worker::WorkerLaunch;
    use std::path::PathBuf;

    fn dead_pool() -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(
            WorkerLaunch {
                python_bin: "/nonexistent/quietcare/python".into(),
                script: PathBuf::from("worker.py"),
                args: Vec::new(),
            },
            1,
            3,
        ))
    }

    #[test]
    fn test_extract_empty_image_is_invalid() {
        let extractor = WorkerExtractor::new(dead_pool(), true);
        assert!(matches!(
            extractor.extract("cam-1", &[]),
            Err(ExtractError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_extract_without_worker_is_unavailable() {
        let extractor = WorkerExtractor::new(dead_pool(), true);
        assert!(matches!(
            extractor.extract("cam-1", &[0xFF, 0xD8, 0xFF]),
            Err(ExtractError::Unavailable(_))
        ));
        assert!(!extractor.is_available());
    }

    #[test]
    fn test_session_frames_reach_one_worker() {
        let Some(fake) = FakeWorker::new() else { return };
        let pool = Arc::new(WorkerPool::new(fake.launch("ok"), 2, 3));
        let extractor = WorkerExtractor::new(Arc::clone(&pool), true);
        for _ in 0..4 {
            let landmarks = extractor.extract("cam-1", &[0xFF, 0xD8, 0xFF]).unwrap();
            assert!(landmarks.right_hand.is_none());
        }
        // Slots spawn lazily, so one process means one slot served every frame.
        assert_eq!(pool.running(), 1);
        assert_eq!(fake.spawned().len(), 1);

        extractor.release("cam-1");
        assert_eq!(pool.running(), 1);
    }

    #[test]
    fn test_release_skips_unspawned_slot() {
        let extractor = WorkerExtractor::new(dead_pool(), true);
        extractor.release("cam-1");
        assert!(!extractor.is_available());
    }

    #[test]
    fn test_classify_without_worker_is_unavailable() {
        let classifier = WorkerClassifier::new(dead_pool(), LabelSet::parse("A\nB"));
        let window = FeatureWindow::new(vec![0.0; 4], 2, 2);
        assert!(matches!(
            classifier.classify(&window),
            Err(ClassifyError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_without_worker_errors() {
        let generator = WorkerGenerator::new(dead_pool(), 50);
        assert!(generator.generate("HELLO").await.is_err());
    }
}
