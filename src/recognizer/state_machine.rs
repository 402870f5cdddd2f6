//! Gesture segmentation: Idle → Recording → Idle.
//! Two asymmetric motion thresholds give hysteresis; ending a gesture needs a
//! run of consecutive low-motion frames so one quiet frame cannot cut it short.

use serde::Serialize;
use tracing::info;

/// Segmentation state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GestureState {
    Idle,
    Recording,
}

impl std::fmt::Display for GestureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GestureState::Idle => write!(f, "Idle"),
            GestureState::Recording => write!(f, "Recording"),
        }
    }
}

/// Transition taken on a frame, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Ended,
}

/// Thresholds governing segmentation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentationThresholds {
    /// Movement must strictly exceed this to start a gesture.
    pub start: f32,
    /// Movement strictly below this counts toward ending a gesture.
    pub end: f32,
    /// Consecutive low-motion frames needed to end a gesture.
    pub end_stability_frames: u32,
    /// Only start when a hand is visible.
    pub require_hand: bool,
}

/// Segmentation state machine. `Copy` so a frame can be evaluated on a
/// scratch copy and committed only once the whole frame succeeds.
#[derive(Debug, Clone, Copy)]
pub struct SegmentationMachine {
    thresholds: SegmentationThresholds,
    state: GestureState,
    end_counter: u32,
}

impl SegmentationMachine {
    pub fn new(thresholds: SegmentationThresholds) -> Self {
        Self {
            thresholds,
            state: GestureState::Idle,
            end_counter: 0,
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn end_counter(&self) -> u32 {
        self.end_counter
    }

    /// Advance one frame. A start and the Recording counter update happen on
    /// the same frame, matching the order the classifier was tuned against.
    pub fn step(&mut self, movement: f32, hand_present: bool) -> Option<Transition> {
        let mut transition = None;

        if self.state == GestureState::Idle
            && movement > self.thresholds.start
            && (!self.thresholds.require_hand || hand_present)
        {
            self.state = GestureState::Recording;
            self.end_counter = 0;
            transition = Some(Transition::Started);
            info!(movement, "gesture_started");
        }

        if self.state == GestureState::Recording {
            if movement < self.thresholds.end {
                self.end_counter += 1;
            } else {
                self.end_counter = 0;
            }

            if self.end_counter >= self.thresholds.end_stability_frames {
                self.state = GestureState::Idle;
                self.end_counter = 0;
                transition = Some(Transition::Ended);
                info!(movement, "gesture_ended");
            }
        }

        transition
    }
}
