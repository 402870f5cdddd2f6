//! Mutable per-stream recognition state. One per client session.

use crate::config::RecognizerConfig;
use crate::keypoints::FEATURE_DIM;

use super::sequence_buffer::SequenceBuffer;
use super::state_machine::{GestureState, SegmentationMachine};
use super::vote::VoteWindow;

/// Everything one gesture stream remembers between frames.
pub struct Session {
    pub(super) machine: SegmentationMachine,
    pub(super) buffer: SequenceBuffer,
    pub(super) votes: VoteWindow,
    pub(super) last_normalized: Option<Vec<f32>>,
    pub(super) frame_counter: u64,
    pub(super) last_confirmed: Option<String>,
}

impl Session {
    pub fn new(config: &RecognizerConfig) -> Self {
        Self {
            machine: SegmentationMachine::new(config.thresholds()),
            buffer: SequenceBuffer::new(config.sequence_length, FEATURE_DIM),
            votes: VoteWindow::new(config.prediction_queue_length, config.required_votes()),
            last_normalized: None,
            frame_counter: 0,
            last_confirmed: None,
        }
    }

    pub fn state(&self) -> GestureState {
        self.machine.state()
    }

    pub fn end_counter(&self) -> u32 {
        self.machine.end_counter()
    }

    /// Frames successfully processed so far.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn last_confirmed(&self) -> Option<&str> {
        self.last_confirmed.as_deref()
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffer.len()
    }

    pub fn pending_votes(&self) -> usize {
        self.votes.len()
    }

    pub fn has_previous_frame(&self) -> bool {
        self.last_normalized.is_some()
    }
}
