//! Holistic keypoint layout: pose + face + left hand + right hand, flattened.
//! Missing body parts are zero-filled so every frame has the same width.

pub mod extractor;
pub mod motion;
pub mod normalize;

use serde::{Deserialize, Serialize};

pub use extractor::{ExtractError, KeypointExtractor, MockExtractor};
pub use motion::{Motion, MotionEstimator};
pub use normalize::{FeatureStats, Normalizer, StatsError};

pub const POSE_LANDMARKS: usize = 33;
pub const POSE_VALUES: usize = 4; // x, y, z, visibility
pub const FACE_LANDMARKS: usize = 468;
pub const HAND_LANDMARKS: usize = 21;
pub const POINT_VALUES: usize = 3; // x, y, z

const POSE_LEN: usize = POSE_LANDMARKS * POSE_VALUES;
const FACE_LEN: usize = FACE_LANDMARKS * POINT_VALUES;
const HAND_LEN: usize = HAND_LANDMARKS * POINT_VALUES;

/// Width of one raw or normalized keypoint frame.
pub const KEYPOINT_DIM: usize = POSE_LEN + FACE_LEN + 2 * HAND_LEN;

/// Width of one feature frame (normalized keypoints ++ velocity).
pub const FEATURE_DIM: usize = KEYPOINT_DIM * 2;

/// Index range of the left hand inside a keypoint frame.
pub const LEFT_HAND: std::ops::Range<usize> = (POSE_LEN + FACE_LEN)..(POSE_LEN + FACE_LEN + HAND_LEN);

/// Index range of the right hand inside a keypoint frame.
pub const RIGHT_HAND: std::ops::Range<usize> =
    (POSE_LEN + FACE_LEN + HAND_LEN)..(POSE_LEN + FACE_LEN + 2 * HAND_LEN);

/// One flattened keypoint frame of `KEYPOINT_DIM` floats.
pub type KeypointFrame = Vec<f32>;

/// Landmarks detected in one image. `None` means the part was not detected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HolisticLandmarks {
    pub pose: Option<Vec<[f32; POSE_VALUES]>>,
    pub face: Option<Vec<[f32; POINT_VALUES]>>,
    pub left_hand: Option<Vec<[f32; POINT_VALUES]>>,
    pub right_hand: Option<Vec<[f32; POINT_VALUES]>>,
}

impl HolisticLandmarks {
    /// Flatten into a fixed-width frame, zero-filling absent parts.
    pub fn to_frame(&self) -> Result<KeypointFrame, ExtractError> {
        let mut frame = Vec::with_capacity(KEYPOINT_DIM);
        append_group(&mut frame, "pose", self.pose.as_deref(), POSE_LANDMARKS)?;
        append_group(&mut frame, "face", self.face.as_deref(), FACE_LANDMARKS)?;
        append_group(&mut frame, "left_hand", self.left_hand.as_deref(), HAND_LANDMARKS)?;
        append_group(&mut frame, "right_hand", self.right_hand.as_deref(), HAND_LANDMARKS)?;
        debug_assert_eq!(frame.len(), KEYPOINT_DIM);
        Ok(frame)
    }
}

fn append_group<const N: usize>(
    frame: &mut Vec<f32>,
    part: &'static str,
    points: Option<&[[f32; N]]>,
    expected: usize,
) -> Result<(), ExtractError> {
    match points {
        Some(points) if points.len() != expected => Err(ExtractError::LandmarkCount {
            part,
            expected,
            actual: points.len(),
        }),
        Some(points) => {
            frame.extend(points.iter().flatten().copied());
            Ok(())
        }
        None => {
            frame.resize(frame.len() + expected * N, 0.0);
            Ok(())
        }
    }
}

/// True if either hand sub-vector has non-zero magnitude.
pub fn hand_present(frame: &[f32]) -> bool {
    let magnitude = |range: std::ops::Range<usize>| -> f32 {
        frame.get(range).map_or(0.0, |s| s.iter().map(|v| v.abs()).sum())
    };
    magnitude(LEFT_HAND) > 0.0 || magnitude(RIGHT_HAND) > 0.0
}
