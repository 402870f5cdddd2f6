//! Frame-to-frame motion: L1 movement and speed-corrected velocity.

/// Default velocity correction. Web clients deliver frames slower than the
/// 30 fps the classifier was trained on.
pub const DEFAULT_VELOCITY_CORRECTION: f32 = 3.0;

/// Motion between two consecutive normalized frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Motion {
    /// Sum of absolute per-dimension differences.
    pub movement: f32,
    /// Per-dimension difference divided by the correction factor.
    pub velocity: Vec<f32>,
}

#[derive(Debug, Clone, Copy)]
pub struct MotionEstimator {
    correction: f32,
}

impl MotionEstimator {
    pub fn new(correction: f32) -> Self {
        Self { correction }
    }

    pub fn correction(&self) -> f32 {
        self.correction
    }

    /// Estimate motion from `previous` to `current`. Without a previous frame
    /// movement is zero and velocity is the zero vector.
    pub fn estimate(&self, current: &[f32], previous: Option<&[f32]>) -> Motion {
        let Some(previous) = previous else {
            return Motion {
                movement: 0.0,
                velocity: vec![0.0; current.len()],
            };
        };

        let mut movement = 0.0f32;
        let velocity = current
            .iter()
            .zip(previous)
            .map(|(&cur, &prev)| {
                let delta = cur - prev;
                movement += delta.abs();
                delta / self.correction
            })
            .collect();

        Motion { movement, velocity }
    }
}

impl Default for MotionEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_VELOCITY_CORRECTION)
    }
}
