//! Per-dimension mean/std normalization of keypoint frames.
//! Statistics are loaded once at startup; without them normalization is identity.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use super::KEYPOINT_DIM;

/// Added to the standard deviation to avoid division by zero.
pub const STD_EPSILON: f32 = 1e-8;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("statistics IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("statistics parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("statistics length mismatch: mean {mean}, std {std}, expected {expected}")]
    Length {
        mean: usize,
        std: usize,
        expected: usize,
    },
}

/// On-disk statistics file format.
#[derive(Debug, Deserialize)]
struct StatsFile {
    mean: Vec<f32>,
    std: Vec<f32>,
}

/// Per-dimension mean and standard deviation of the training keypoints.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureStats {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl FeatureStats {
    pub fn new(mean: Vec<f32>, std: Vec<f32>) -> Result<Self, StatsError> {
        if mean.len() != KEYPOINT_DIM || std.len() != KEYPOINT_DIM {
            return Err(StatsError::Length {
                mean: mean.len(),
                std: std.len(),
                expected: KEYPOINT_DIM,
            });
        }
        Ok(Self { mean, std })
    }

    /// Load statistics from a JSON file `{"mean": [...], "std": [...]}`.
    pub fn load_from_file(path: &Path) -> Result<Self, StatsError> {
        let content = std::fs::read_to_string(path)?;
        let file: StatsFile = serde_json::from_str(&content)?;
        Self::new(file.mean, file.std)
    }
}

/// Keypoint normalizer. Shared read-only across sessions.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    stats: Option<FeatureStats>,
}

impl Normalizer {
    pub fn new(stats: Option<FeatureStats>) -> Self {
        Self { stats }
    }

    /// Identity normalizer.
    pub fn identity() -> Self {
        Self { stats: None }
    }

    /// Build from an optional statistics path. Every failure degrades to identity.
    pub fn from_optional_file(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("no statistics configured, keypoints pass through unnormalized");
            return Self::identity();
        };
        if !path.exists() {
            info!(path = %path.display(), "statistics file missing, keypoints pass through unnormalized");
            return Self::identity();
        }
        match FeatureStats::load_from_file(path) {
            Ok(stats) => {
                info!(path = %path.display(), "keypoint statistics loaded");
                Self::new(Some(stats))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "statistics load failed, using identity");
                Self::identity()
            }
        }
    }

    pub fn has_stats(&self) -> bool {
        self.stats.is_some()
    }

    /// `(x - mean) / (std + eps)` per dimension, or a copy of the input.
    pub fn normalize(&self, raw: &[f32]) -> Vec<f32> {
        match &self.stats {
            Some(stats) => raw
                .iter()
                .zip(stats.mean.iter().zip(stats.std.iter()))
                .map(|(&x, (&mean, &std))| (x - mean) / (std + STD_EPSILON))
                .collect(),
            None => raw.to_vec(),
        }
    }
}
