//! Majority-vote smoothing over recent raw predictions.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Rounding applied to `capacity × threshold` when computing required votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VoteRounding {
    /// Round up: 15 × 0.5 needs 8 votes (strict majority).
    #[default]
    Ceil,
    /// Truncate: 15 × 0.5 needs 7 votes.
    Floor,
}

/// Votes needed to confirm a label, never less than one.
pub fn required_votes(capacity: usize, threshold: f32, rounding: VoteRounding) -> usize {
    let raw = capacity as f64 * threshold as f64;
    // Absorb float noise such as 0.1 * 30 = 3.0000000000000004.
    let raw = (raw * 1e6).round() / 1e6;
    let needed = match rounding {
        VoteRounding::Ceil => raw.ceil(),
        VoteRounding::Floor => raw.floor(),
    };
    (needed.max(0.0) as usize).max(1)
}

/// Bounded FIFO of predicted labels.
#[derive(Debug, Clone)]
pub struct VoteWindow {
    labels: VecDeque<String>,
    capacity: usize,
    required: usize,
}

impl VoteWindow {
    pub fn new(capacity: usize, required: usize) -> Self {
        Self {
            labels: VecDeque::with_capacity(capacity),
            capacity,
            required,
        }
    }

    /// Append a label, evicting the oldest at capacity.
    pub fn push(&mut self, label: String) {
        if self.capacity == 0 {
            return;
        }
        if self.labels.len() == self.capacity {
            self.labels.pop_front();
        }
        self.labels.push_back(label);
    }

    /// Most frequent label and its count. Ties go to the label seen first.
    pub fn mode(&self) -> Option<(&str, usize)> {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for label in &self.labels {
            match counts.iter_mut().find(|(l, _)| *l == label.as_str()) {
                Some((_, count)) => *count += 1,
                None => counts.push((label.as_str(), 1)),
            }
        }
        counts
            .into_iter()
            .fold(None, |best: Option<(&str, usize)>, (label, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((label, count)),
            })
    }

    /// The winning label if it has enough votes and differs from `last`.
    pub fn decide(&self, last: Option<&str>) -> Option<(String, usize)> {
        let (label, count) = self.mode()?;
        if count >= self.required && Some(label) != last {
            Some((label.to_string(), count))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn required(&self) -> usize {
        self.required
    }
}
