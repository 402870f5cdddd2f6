//! Keypoint extractor contract (image bytes → holistic landmarks).
//! The production implementation lives in the model worker.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use super::HolisticLandmarks;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("keypoint extractor unavailable: {0}")]
    Unavailable(String),
    #[error("keypoint extraction failed: {0}")]
    Failed(String),
    #[error("{part} has {actual} landmarks, expected {expected}")]
    LandmarkCount {
        part: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Image → landmark extractor (platform/model adapter).
///
/// Landmark trackers smooth across frames, so implementations keep tracking
/// state per `session` and never mix frames of different sessions.
pub trait KeypointExtractor: Send + Sync {
    /// Detect landmarks in one encoded image (JPEG, PNG or WebP).
    fn extract(&self, session: &str, image: &[u8]) -> Result<HolisticLandmarks, ExtractError>;

    /// Forget tracking state for a session that has ended.
    fn release(&self, _session: &str) {}

    fn is_available(&self) -> bool;
}

/// Cheap signature check so obviously broken uploads never reach the model.
pub fn sniff_image(image: &[u8]) -> Result<(), ExtractError> {
    if image.is_empty() {
        return Err(ExtractError::InvalidImage("empty image".into()));
    }
    let known = image.starts_with(&[0xFF, 0xD8, 0xFF])
        || image.starts_with(b"\x89PNG\r\n\x1a\n")
        || (image.len() >= 12 && &image[..4] == b"RIFF" && &image[8..12] == b"WEBP")
        || image.starts_with(b"BM");
    if known {
        Ok(())
    } else {
        Err(ExtractError::InvalidImage("unrecognized image format".into()))
    }
}

/// Mock extractor for testing: replays scripted landmarks, then repeats the last.
pub struct MockExtractor {
    script: Mutex<Vec<HolisticLandmarks>>,
    last: Mutex<HolisticLandmarks>,
    calls: AtomicUsize,
    released: Mutex<Vec<String>>,
    fail: bool,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            last: Mutex::new(HolisticLandmarks::default()),
            calls: AtomicUsize::new(0),
            released: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Landmarks returned for successive calls, in order.
    pub fn with_script(self, script: Vec<HolisticLandmarks>) -> Self {
        let mut reversed = script;
        reversed.reverse();
        *self.script.lock() = reversed;
        self
    }

    /// Report every call as unavailable.
    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Sessions passed to `release`, in order.
    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl KeypointExtractor for MockExtractor {
    fn extract(&self, _session: &str, image: &[u8]) -> Result<HolisticLandmarks, ExtractError> {
        sniff_image(image)?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ExtractError::Unavailable("mock extractor failure".into()));
        }
        let mut last = self.last.lock();
        if let Some(next) = self.script.lock().pop() {
            *last = next;
        }
        Ok(last.clone())
    }

    fn release(&self, session: &str) {
        self.released.lock().push(session.to_string());
    }

    fn is_available(&self) -> bool {
        !self.fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00];

    #[test]
    fn test_sniff_known_formats() {
        assert!(sniff_image(JPEG).is_ok());
        assert!(sniff_image(b"\x89PNG\r\n\x1a\nrest").is_ok());
        assert!(sniff_image(b"RIFF\x00\x00\x00\x00WEBPVP8 ").is_ok());
    }

    #[test]
    fn test_sniff_rejects_garbage() {
        assert!(matches!(sniff_image(b""), Err(ExtractError::InvalidImage(_))));
        assert!(matches!(
            sniff_image(b"hello world"),
            Err(ExtractError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_mock_replays_script_then_repeats_last() {
        let first = HolisticLandmarks {
            left_hand: Some(vec![[0.1; 3]; 21]),
            ..Default::default()
        };
        let second = HolisticLandmarks::default();
        let mock = MockExtractor::new().with_script(vec![first.clone(), second.clone()]);

        assert_eq!(mock.extract("s", JPEG).unwrap(), first);
        assert_eq!(mock.extract("s", JPEG).unwrap(), second);
        assert_eq!(mock.extract("s", JPEG).unwrap(), second);
        assert_eq!(mock.calls(), 3);
    }

    #[test]
    fn test_mock_rejects_invalid_image_without_counting() {
        let mock = MockExtractor::new();
        assert!(mock.extract("s", b"nope").is_err());
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn test_mock_failure() {
        let mock = MockExtractor::new().with_failure();
        assert!(!mock.is_available());
        assert!(matches!(
            mock.extract("s", JPEG),
            Err(ExtractError::Unavailable(_))
        ));
    }
}
