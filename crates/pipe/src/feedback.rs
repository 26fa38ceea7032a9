//! Cooperative cancellation and preview signalling for block reads

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct FeedbackState {
    cancelled: AtomicBool,
    preview_only: AtomicBool,
    render_partial_output: AtomicBool,
    /// f64 bits of the progress percentage
    progress: AtomicU64,
    new_data: AtomicUsize,
}

/// Feedback handle passed into [`block`](crate::Chain::block) reads.
///
/// Cloning yields another handle to the same state, so a renderer can keep
/// one clone and cancel the read from another thread while the pipeline
/// polls [`is_cancelled`](Self::is_cancelled) on its own.
#[derive(Debug, Clone, Default)]
pub struct BlockFeedback {
    state: Arc<FeedbackState>,
}

impl BlockFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; stages return as soon as they notice
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Whether stages should only return data that is already available
    pub fn is_preview_only(&self) -> bool {
        self.state.preview_only.load(Ordering::Acquire)
    }

    pub fn set_preview_only(&self, preview: bool) {
        self.state.preview_only.store(preview, Ordering::Release);
    }

    /// Whether the consumer draws into a temporary image owned by this layer
    pub fn render_partial_output(&self) -> bool {
        self.state.render_partial_output.load(Ordering::Acquire)
    }

    pub fn set_render_partial_output(&self, enable: bool) {
        self.state.render_partial_output.store(enable, Ordering::Release);
    }

    /// Progress in percent, clamped to [0, 100]
    pub fn set_progress(&self, percent: f64) {
        let p = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
        self.state.progress.store(p.to_bits(), Ordering::Release);
    }

    pub fn progress(&self) -> f64 {
        f64::from_bits(self.state.progress.load(Ordering::Acquire))
    }

    /// Called by a provider when partial data became available for a new preview
    pub fn on_new_data(&self) {
        self.state.new_data.fetch_add(1, Ordering::AcqRel);
    }

    /// How many times [`on_new_data`](Self::on_new_data) fired
    pub fn new_data_count(&self) -> usize {
        self.state.new_data.load(Ordering::Acquire)
    }
}

/// `true` when an optional feedback requests cancellation
pub(crate) fn cancelled(feedback: Option<&BlockFeedback>) -> bool {
    feedback.is_some_and(BlockFeedback::is_cancelled)
}

/// `true` when an optional feedback requests preview-only reads
pub(crate) fn preview_only(feedback: Option<&BlockFeedback>) -> bool {
    feedback.is_some_and(BlockFeedback::is_preview_only)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_cancel_from_other_thread() {
        let feedback = BlockFeedback::new();
        let remote = feedback.clone();
        thread::spawn(move || remote.cancel()).join().unwrap();
        assert!(feedback.is_cancelled());
        assert!(cancelled(Some(&feedback)));
        assert!(!cancelled(None));
    }

    #[test]
    fn test_flags_and_progress() {
        let feedback = BlockFeedback::new();
        assert!(!feedback.is_preview_only());
        feedback.set_preview_only(true);
        feedback.set_render_partial_output(true);
        assert!(preview_only(Some(&feedback)));
        assert!(feedback.render_partial_output());

        feedback.set_progress(150.0);
        assert_eq!(feedback.progress(), 100.0);

        feedback.on_new_data();
        feedback.on_new_data();
        assert_eq!(feedback.new_data_count(), 2);
    }
}
