//! Sequence classifier contract and label vocabulary.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use super::sequence_buffer::FeatureWindow;

/// One raw classifier output.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    /// Softmax probability of `label`. Logged, never used for gating.
    pub confidence: f32,
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    #[error("classifier inference failed: {0}")]
    Inference(String),
    #[error("classifier returned class {index}, vocabulary has {len} labels")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Feature window → label classifier (model adapter).
pub trait SequenceClassifier: Send + Sync {
    fn classify(&self, window: &FeatureWindow) -> Result<Prediction, ClassifyError>;
}

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("label file IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("label file {0} contains no labels")]
    Empty(String),
}

/// Classifier vocabulary. Index order must match the training order.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Parse newline-delimited labels, trimming and skipping blank lines.
    pub fn parse(text: &str) -> Self {
        Self {
            labels: text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self, LabelError> {
        let content = std::fs::read_to_string(path)?;
        let labels = Self::parse(&content);
        if labels.is_empty() {
            return Err(LabelError::Empty(path.display().to_string()));
        }
        Ok(labels)
    }

    pub fn get(&self, index: usize) -> Result<&str, ClassifyError> {
        self.labels
            .get(index)
            .map(String::as_str)
            .ok_or(ClassifyError::IndexOutOfRange {
                index,
                len: self.labels.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Mock classifier for testing: replays scripted labels, then repeats the last.
pub struct MockClassifier {
    script: Mutex<Vec<String>>,
    fallback: String,
    calls: AtomicUsize,
    windows: Mutex<Vec<(usize, usize)>>,
    fail: bool,
}

impl MockClassifier {
    /// Always answers `label`.
    pub fn constant(label: &str) -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            fallback: label.to_string(),
            calls: AtomicUsize::new(0),
            windows: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Answers `labels` in order, then keeps answering the last one.
    pub fn scripted(labels: &[&str]) -> Self {
        let fallback = labels.last().copied().unwrap_or("UNKNOWN");
        let mut script: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        script.reverse();
        Self {
            script: Mutex::new(script),
            ..Self::constant(fallback)
        }
    }

    /// Fail every call.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::constant("UNKNOWN")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(frames, dim)` of every window seen.
    pub fn window_shapes(&self) -> Vec<(usize, usize)> {
        self.windows.lock().clone()
    }
}

impl SequenceClassifier for MockClassifier {
    fn classify(&self, window: &FeatureWindow) -> Result<Prediction, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.windows.lock().push((window.frames(), window.dim()));
        if self.fail {
            return Err(ClassifyError::Inference("mock classifier failure".into()));
        }
        let label = self
            .script
            .lock()
            .pop()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Prediction {
            label,
            confidence: 0.9,
        })
    }
}
