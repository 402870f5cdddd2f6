//! Sequence buffer: fixed pre-allocated ring of feature frames.
//! Capacity is `frames × dim` floats. Overwrites the oldest frame when full.

/// Ordered `frames × dim` snapshot handed to the classifier (oldest first).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureWindow {
    data: Vec<f32>,
    frames: usize,
    dim: usize,
}

impl FeatureWindow {
    pub fn new(data: Vec<f32>, frames: usize, dim: usize) -> Self {
        debug_assert_eq!(data.len(), frames * dim);
        Self { data, frames, dim }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Row-major flat data.
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim)
    }
}

/// Sliding window of the most recent feature frames.
pub struct SequenceBuffer {
    buffer: Box<[f32]>,
    dim: usize,
    capacity: usize,
    /// Slot the next frame is written to.
    write_pos: usize,
    len: usize,
}

impl SequenceBuffer {
    /// Buffer holding `capacity` frames of `dim` floats each.
    pub fn new(capacity: usize, dim: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity * dim].into_boxed_slice(),
            dim,
            capacity,
            write_pos: 0,
            len: 0,
        }
    }

    /// Append a frame, evicting the oldest if at capacity.
    pub fn push(&mut self, frame: &[f32]) {
        debug_assert_eq!(frame.len(), self.dim);
        if self.capacity == 0 {
            return;
        }
        let start = self.write_pos * self.dim;
        self.buffer[start..start + self.dim].copy_from_slice(frame);
        self.write_pos = (self.write_pos + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Whether the buffer would be full after one more push.
    pub fn full_after_push(&self) -> bool {
        self.len + 1 >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.len = 0;
    }

    /// Frames currently held, oldest first.
    pub fn window(&self) -> FeatureWindow {
        let mut data = Vec::with_capacity(self.len * self.dim);
        self.extend_oldest_first(&mut data, self.len);
        FeatureWindow::new(data, self.len, self.dim)
    }

    /// The window as it would look after pushing `next`, without mutating.
    pub fn window_with(&self, next: &[f32]) -> FeatureWindow {
        debug_assert_eq!(next.len(), self.dim);
        let kept = self.len.min(self.capacity.saturating_sub(1));
        let frames = kept + 1;
        let mut data = Vec::with_capacity(frames * self.dim);
        self.extend_oldest_first(&mut data, kept);
        data.extend_from_slice(next);
        FeatureWindow::new(data, frames, self.dim)
    }

    /// Append the newest `count` frames to `out`, oldest first.
    fn extend_oldest_first(&self, out: &mut Vec<f32>, count: usize) {
        if self.capacity == 0 {
            return;
        }
        let first = (self.write_pos + self.capacity - count) % self.capacity;
        for i in 0..count {
            let slot = (first + i) % self.capacity;
            let start = slot * self.dim;
            out.extend_from_slice(&self.buffer[start..start + self.dim]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: f32) -> Vec<f32> {
        vec![value; 2]
    }

    #[test]
    fn test_fills_then_reports_full() {
        let mut buffer = SequenceBuffer::new(3, 2);
        assert!(buffer.is_empty());
        buffer.push(&frame(1.0));
        buffer.push(&frame(2.0));
        assert!(!buffer.is_full());
        assert!(buffer.full_after_push());
        buffer.push(&frame(3.0));
        assert!(buffer.is_full());
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_evicts_oldest() {
        let mut buffer = SequenceBuffer::new(3, 2);
        for v in 1..=5 {
            buffer.push(&frame(v as f32));
        }
        let window = buffer.window();
        assert_eq!(window.frames(), 3);
        assert_eq!(window.as_flat(), &[3.0, 3.0, 4.0, 4.0, 5.0, 5.0]);
    }

    #[test]
    fn test_window_partial() {
        let mut buffer = SequenceBuffer::new(4, 2);
        buffer.push(&frame(1.0));
        buffer.push(&frame(2.0));
        let window = buffer.window();
        let rows: Vec<&[f32]> = window.rows().collect();
        assert_eq!(rows, vec![&[1.0, 1.0][..], &[2.0, 2.0][..]]);
    }

    #[test]
    fn test_window_with_does_not_mutate() {
        let mut buffer = SequenceBuffer::new(3, 2);
        for v in 1..=3 {
            buffer.push(&frame(v as f32));
        }
        let prospective = buffer.window_with(&frame(9.0));
        assert_eq!(prospective.as_flat(), &[2.0, 2.0, 3.0, 3.0, 9.0, 9.0]);
        assert_eq!(buffer.window().as_flat(), &[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);

        buffer.push(&frame(9.0));
        assert_eq!(buffer.window(), prospective);
    }

    #[test]
    fn test_window_with_before_full() {
        let mut buffer = SequenceBuffer::new(3, 2);
        buffer.push(&frame(1.0));
        let prospective = buffer.window_with(&frame(2.0));
        assert_eq!(prospective.frames(), 2);
        assert_eq!(prospective.as_flat(), &[1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_clear() {
        let mut buffer = SequenceBuffer::new(2, 2);
        buffer.push(&frame(1.0));
        buffer.push(&frame(2.0));
        buffer.clear();
        assert!(buffer.is_empty());
        buffer.push(&frame(3.0));
        assert_eq!(buffer.window().as_flat(), &[3.0, 3.0]);
    }
}
