//! Fixed-size windowing of captured samples.

/// Accumulates reads of any size and yields exact `frame_size` windows.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Samples waiting for a full window.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append samples and drain every complete window, oldest first.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_size;
        if complete == 0 {
            return Vec::new();
        }

        let mut windows = Vec::with_capacity(complete);
        let mut rest = self.pending.split_off(complete * self.frame_size);
        std::mem::swap(&mut rest, &mut self.pending);
        for window in rest.chunks_exact(self.frame_size) {
            windows.push(window.to_vec());
        }
        windows
    }

    /// Zero-pad and return the partial window, if any.
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        if self.pending.is_empty() {
            return None;
        }
        let mut window = std::mem::take(&mut self.pending);
        window.resize(self.frame_size, 0.0);
        Some(window)
    }
}
