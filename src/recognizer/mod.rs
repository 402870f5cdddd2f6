//! Streaming gloss recognizer.
//!
//! Per frame: normalize → motion → segmentation → buffer → (throttled)
//! classify → majority vote → confirmation. Work happens on scratch copies
//! and is committed to the [`Session`] only once the frame succeeds, so a
//! failed classification leaves the session exactly as it was.

pub mod classifier;
pub mod sequence_buffer;
pub mod session;
pub mod state_machine;
pub mod vote;

pub use classifier::{
    ClassifyError, LabelError, LabelSet, MockClassifier, Prediction, SequenceClassifier,
};
pub use sequence_buffer::{FeatureWindow, SequenceBuffer};
pub use session::Session;
pub use state_machine::{GestureState, SegmentationMachine, SegmentationThresholds, Transition};
pub use vote::{required_votes, VoteRounding, VoteWindow};

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::RecognizerConfig;
use crate::keypoints::{hand_present, MotionEstimator, Normalizer, KEYPOINT_DIM};
use crate::metrics::{metric_names, MetricsRegistry};

#[derive(Debug, Error)]
pub enum RecognizeError {
    #[error("keypoint frame has {actual} values, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Classify(#[from] ClassifyError),
}

/// A gloss that won a fresh majority.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Confirmation {
    pub gloss: String,
    /// Confidence of the prediction that completed the majority.
    pub confidence: f32,
    pub votes: usize,
    /// Session frame index the confirmation happened on.
    pub frame: u64,
}

/// What one frame did to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    pub state: GestureState,
    pub movement: f32,
    pub hand_present: bool,
    pub transition: Option<Transition>,
    pub prediction: Option<Prediction>,
    pub confirmation: Option<Confirmation>,
}

/// Shared, read-only recognition pipeline. Sessions carry all mutable state.
pub struct Recognizer {
    config: RecognizerConfig,
    normalizer: Arc<Normalizer>,
    motion: MotionEstimator,
    classifier: Arc<dyn SequenceClassifier>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Recognizer {
    pub fn new(
        config: RecognizerConfig,
        normalizer: Arc<Normalizer>,
        classifier: Arc<dyn SequenceClassifier>,
    ) -> Self {
        Self {
            motion: MotionEstimator::new(config.velocity_correction),
            config,
            normalizer,
            classifier,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    pub fn new_session(&self) -> Session {
        Session::new(&self.config)
    }

    /// Feed one raw keypoint frame into `session`.
    ///
    /// On error the session is untouched and the same frame may be retried.
    pub fn process(
        &self,
        session: &mut Session,
        raw: &[f32],
    ) -> Result<FrameOutcome, RecognizeError> {
        if raw.len() != KEYPOINT_DIM {
            return Err(RecognizeError::DimensionMismatch {
                expected: KEYPOINT_DIM,
                actual: raw.len(),
            });
        }

        let frame_index = session.frame_counter + 1;
        let normalized = self.normalizer.normalize(raw);
        let motion = self
            .motion
            .estimate(&normalized, session.last_normalized.as_deref());
        let hand = hand_present(&normalized);

        let mut feature = Vec::with_capacity(normalized.len() * 2);
        feature.extend_from_slice(&normalized);
        feature.extend_from_slice(&motion.velocity);

        let mut machine = session.machine;
        let transition = machine.step(motion.movement, hand);
        let started = transition == Some(Transition::Started);
        let clear_buffer = started && self.config.clear_buffer_on_start;

        let buffer_full = if clear_buffer {
            session.buffer.capacity() <= 1
        } else {
            session.buffer.full_after_push()
        };
        let due = buffer_full && frame_index % self.config.prediction_rate == 0;

        let mut prediction = None;
        let mut hand_lost = false;
        if machine.state() == GestureState::Recording && due {
            if hand || !self.config.require_hand {
                let window = if clear_buffer {
                    FeatureWindow::new(feature.clone(), 1, feature.len())
                } else {
                    session.buffer.window_with(&feature)
                };
                prediction = Some(self.classify(&window)?);
            } else {
                hand_lost = true;
            }
        }

        // Commit.
        session.frame_counter = frame_index;
        session.machine = machine;
        if started {
            session.votes.clear();
            session.last_confirmed = None;
        }
        if clear_buffer {
            session.buffer.clear();
        }
        session.buffer.push(&feature);
        session.last_normalized = Some(normalized);
        if hand_lost && !session.votes.is_empty() {
            debug!(frame = frame_index, "hand_lost_votes_cleared");
            session.votes.clear();
        }

        let mut confirmation = None;
        if let Some(pred) = &prediction {
            session.votes.push(pred.label.clone());
            debug!(
                frame = frame_index,
                label = %pred.label,
                confidence = pred.confidence,
                votes = session.votes.len(),
                "prediction"
            );
            if let Some((gloss, votes)) = session.votes.decide(session.last_confirmed.as_deref()) {
                info!(
                    frame = frame_index,
                    gloss = %gloss,
                    votes,
                    confidence = pred.confidence,
                    "gloss_confirmed"
                );
                session.last_confirmed = Some(gloss.clone());
                session.votes.clear();
                confirmation = Some(Confirmation {
                    gloss,
                    confidence: pred.confidence,
                    votes,
                    frame: frame_index,
                });
            }
        }

        Ok(FrameOutcome {
            state: machine.state(),
            movement: motion.movement,
            hand_present: hand,
            transition,
            prediction,
            confirmation,
        })
    }

    fn classify(&self, window: &FeatureWindow) -> Result<Prediction, ClassifyError> {
        let span = self.metrics.as_ref().map(|m| m.span(metric_names::CLASSIFY));
        let result = self.classifier.classify(window);
        if let Some(span) = span {
            span.finish();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypoints::{FEATURE_DIM, RIGHT_HAND};

    /// A frame with only the right hand populated at `value`.
    fn hand_frame(value: f32) -> Vec<f32> {
        let mut frame = vec![0.0; KEYPOINT_DIM];
        for v in &mut frame[RIGHT_HAND] {
            *v = value;
        }
        frame
    }

    /// Alternates between two hand positions so every frame after the first moves.
    fn moving_frame(i: usize) -> Vec<f32> {
        hand_frame(if i % 2 == 0 { 0.2 } else { 0.3 })
    }

    fn recognizer(classifier: Arc<dyn SequenceClassifier>) -> Recognizer {
        Recognizer::new(
            RecognizerConfig::default(),
            Arc::new(Normalizer::identity()),
            classifier,
        )
    }

    #[test]
    fn test_rejects_wrong_dimension() {
        let rec = recognizer(Arc::new(MockClassifier::constant("HELLO")));
        let mut session = rec.new_session();
        let err = rec.process(&mut session, &[0.0; 10]).unwrap_err();
        assert!(matches!(
            err,
            RecognizeError::DimensionMismatch {
                expected: KEYPOINT_DIM,
                actual: 10
            }
        ));
        assert_eq!(session.frame_counter(), 0);
    }

    #[test]
    fn test_still_zero_frames_stay_idle() {
        let classifier = Arc::new(MockClassifier::constant("HELLO"));
        let rec = recognizer(classifier.clone());
        let mut session = rec.new_session();
        for _ in 0..50 {
            let outcome = rec.process(&mut session, &vec![0.0; KEYPOINT_DIM]).unwrap();
            assert_eq!(outcome.state, GestureState::Idle);
            assert_eq!(outcome.movement, 0.0);
            assert!(outcome.confirmation.is_none());
        }
        assert_eq!(classifier.calls(), 0);
        assert_eq!(session.frame_counter(), 50);
        assert_eq!(session.buffered_frames(), 50);
    }

    #[test]
    fn test_sustained_motion_confirms_after_majority() {
        let classifier = Arc::new(MockClassifier::constant("HELLO"));
        let rec = recognizer(classifier.clone());
        let mut session = rec.new_session();

        let mut confirmations = Vec::new();
        for i in 1..=90 {
            let outcome = rec.process(&mut session, &moving_frame(i)).unwrap();
            if i == 2 {
                assert_eq!(outcome.transition, Some(Transition::Started));
            }
            if i >= 2 {
                assert_eq!(outcome.state, GestureState::Recording);
            }
            if let Some(c) = outcome.confirmation {
                confirmations.push(c);
            }
        }

        // Predictions on frames 50, 55, ...; the 8th vote lands on frame 85.
        assert_eq!(confirmations.len(), 1);
        assert_eq!(confirmations[0].gloss, "HELLO");
        assert_eq!(confirmations[0].votes, 8);
        assert_eq!(confirmations[0].frame, 85);
        assert_eq!(classifier.calls(), 9);
        assert!(classifier
            .window_shapes()
            .iter()
            .all(|&shape| shape == (50, FEATURE_DIM)));
        assert_eq!(session.last_confirmed(), Some("HELLO"));
    }

    #[test]
    fn test_stillness_after_confirmation_returns_to_idle() {
        let rec = recognizer(Arc::new(MockClassifier::constant("HELLO")));
        let mut session = rec.new_session();
        for i in 1..=85 {
            rec.process(&mut session, &moving_frame(i)).unwrap();
        }
        assert_eq!(session.last_confirmed(), Some("HELLO"));

        let still = moving_frame(85);
        for n in 1..=8 {
            let outcome = rec.process(&mut session, &still).unwrap();
            if n < 8 {
                assert_eq!(outcome.state, GestureState::Recording);
            } else {
                assert_eq!(outcome.state, GestureState::Idle);
                assert_eq!(outcome.transition, Some(Transition::Ended));
            }
        }
    }

    #[test]
    fn test_one_moving_frame_resets_end_counter() {
        let rec = recognizer(Arc::new(MockClassifier::constant("HELLO")));
        let mut session = rec.new_session();
        for i in 1..=10 {
            rec.process(&mut session, &moving_frame(i)).unwrap();
        }
        let still = moving_frame(10);
        for _ in 0..7 {
            rec.process(&mut session, &still).unwrap();
        }
        assert_eq!(session.end_counter(), 7);
        rec.process(&mut session, &moving_frame(11)).unwrap();
        assert_eq!(session.end_counter(), 0);
        assert_eq!(session.state(), GestureState::Recording);
    }

    #[test]
    fn test_predictions_only_on_full_buffer_and_rate() {
        let classifier = Arc::new(MockClassifier::scripted(&["A", "B"]));
        let rec = recognizer(classifier.clone());
        let mut session = rec.new_session();
        for i in 1..=64 {
            let outcome = rec.process(&mut session, &moving_frame(i)).unwrap();
            let expected = i >= 50 && i % 5 == 0;
            assert_eq!(outcome.prediction.is_some(), expected, "frame {i}");
        }
        assert_eq!(classifier.calls(), 3);
    }

    #[test]
    fn test_same_word_not_reconfirmed_immediately() {
        let rec = recognizer(Arc::new(MockClassifier::constant("HELLO")));
        let mut session = rec.new_session();
        let mut count = 0;
        for i in 1..=200 {
            if rec
                .process(&mut session, &moving_frame(i))
                .unwrap()
                .confirmation
                .is_some()
            {
                count += 1;
            }
        }
        assert_eq!(count, 1);
        assert_eq!(session.pending_votes(), 15);
    }

    #[test]
    fn test_new_word_confirms_after_fresh_majority() {
        let mut script = vec!["HELLO"; 8];
        script.extend(vec!["ME"; 8]);
        let rec = recognizer(Arc::new(MockClassifier::scripted(&script)));
        let mut session = rec.new_session();
        let mut glosses = Vec::new();
        for i in 1..=125 {
            if let Some(c) = rec.process(&mut session, &moving_frame(i)).unwrap().confirmation {
                glosses.push(c.gloss);
            }
        }
        assert_eq!(glosses, vec!["HELLO", "ME"]);
    }

    #[test]
    fn test_hand_loss_at_prediction_clears_votes() {
        let classifier = Arc::new(MockClassifier::constant("HELLO"));
        let rec = recognizer(classifier.clone());
        let mut session = rec.new_session();
        for i in 1..=59 {
            rec.process(&mut session, &moving_frame(i)).unwrap();
        }
        assert_eq!(session.pending_votes(), 2);

        // Frame 60: body moves, no hands.
        let mut no_hands = vec![0.0; KEYPOINT_DIM];
        no_hands[0] = 5.0;
        let outcome = rec.process(&mut session, &no_hands).unwrap();
        assert!(!outcome.hand_present);
        assert_eq!(outcome.state, GestureState::Recording);
        assert!(outcome.prediction.is_none());
        assert_eq!(session.pending_votes(), 0);
        assert_eq!(classifier.calls(), 2);
    }

    #[test]
    fn test_without_hand_requirement_predicts_handless() {
        let config = RecognizerConfig {
            require_hand: false,
            ..RecognizerConfig::default()
        };
        let classifier = Arc::new(MockClassifier::constant("HELLO"));
        let rec = Recognizer::new(config, Arc::new(Normalizer::identity()), classifier.clone());
        let mut session = rec.new_session();
        for i in 1..=50 {
            let mut frame = vec![0.0; KEYPOINT_DIM];
            frame[0] = if i % 2 == 0 { 1.0 } else { 2.0 };
            rec.process(&mut session, &frame).unwrap();
        }
        assert_eq!(session.state(), GestureState::Recording);
        assert_eq!(classifier.calls(), 1);
    }

    #[test]
    fn test_no_start_without_hand_when_required() {
        let rec = recognizer(Arc::new(MockClassifier::constant("HELLO")));
        let mut session = rec.new_session();
        for i in 1..=20 {
            let mut frame = vec![0.0; KEYPOINT_DIM];
            frame[0] = i as f32;
            let outcome = rec.process(&mut session, &frame).unwrap();
            assert_eq!(outcome.state, GestureState::Idle);
        }
    }

    #[test]
    fn test_failed_classification_leaves_session_unchanged() {
        let failing = recognizer(Arc::new(MockClassifier::failing()));
        let working_classifier = Arc::new(MockClassifier::constant("HELLO"));
        let working = recognizer(working_classifier.clone());

        let mut session = failing.new_session();
        for i in 1..=49 {
            failing.process(&mut session, &moving_frame(i)).unwrap();
        }
        let before = (
            session.frame_counter(),
            session.buffered_frames(),
            session.state(),
            session.end_counter(),
            session.pending_votes(),
        );

        let err = failing.process(&mut session, &moving_frame(50)).unwrap_err();
        assert!(matches!(err, RecognizeError::Classify(_)));
        let after = (
            session.frame_counter(),
            session.buffered_frames(),
            session.state(),
            session.end_counter(),
            session.pending_votes(),
        );
        assert_eq!(before, after);

        // Retrying the same frame against a healthy classifier succeeds.
        let outcome = working.process(&mut session, &moving_frame(50)).unwrap();
        assert!(outcome.prediction.is_some());
        assert_eq!(session.frame_counter(), 50);
        assert_eq!(session.pending_votes(), 1);
    }

    #[test]
    fn test_restart_clears_votes_and_last_word() {
        let rec = recognizer(Arc::new(MockClassifier::constant("HELLO")));
        let mut session = rec.new_session();
        for i in 1..=85 {
            rec.process(&mut session, &moving_frame(i)).unwrap();
        }
        let still = moving_frame(85);
        for _ in 0..8 {
            rec.process(&mut session, &still).unwrap();
        }
        assert_eq!(session.state(), GestureState::Idle);
        assert_eq!(session.last_confirmed(), Some("HELLO"));

        let outcome = rec.process(&mut session, &moving_frame(86)).unwrap();
        assert_eq!(outcome.transition, Some(Transition::Started));
        assert_eq!(session.last_confirmed(), None);
        assert_eq!(session.pending_votes(), 0);
        // The buffer keeps sliding across the restart.
        assert_eq!(session.buffered_frames(), 50);
    }

    #[test]
    fn test_clear_buffer_on_start_option() {
        let config = RecognizerConfig {
            clear_buffer_on_start: true,
            ..RecognizerConfig::default()
        };
        let rec = Recognizer::new(
            config,
            Arc::new(Normalizer::identity()),
            Arc::new(MockClassifier::constant("HELLO")),
        );
        let mut session = rec.new_session();
        let still = hand_frame(0.2);
        for _ in 0..10 {
            rec.process(&mut session, &still).unwrap();
        }
        assert_eq!(session.buffered_frames(), 10);
        let outcome = rec.process(&mut session, &hand_frame(0.3)).unwrap();
        assert_eq!(outcome.transition, Some(Transition::Started));
        assert_eq!(session.buffered_frames(), 1);
    }

    #[test]
    fn test_first_frame_velocity_is_zero() {
        let rec = recognizer(Arc::new(MockClassifier::constant("HELLO")));
        let mut session = rec.new_session();
        let outcome = rec.process(&mut session, &hand_frame(0.5)).unwrap();
        assert_eq!(outcome.movement, 0.0);
        assert!(session.has_previous_frame());
    }

    #[test]
    fn test_classify_timing_recorded() {
        let metrics = Arc::new(MetricsRegistry::new());
        let rec =
            recognizer(Arc::new(MockClassifier::constant("HELLO"))).with_metrics(metrics.clone());
        let mut session = rec.new_session();
        for i in 1..=50 {
            rec.process(&mut session, &moving_frame(i)).unwrap();
        }
        assert_eq!(metrics.count(metric_names::CLASSIFY), 1);
    }
}
