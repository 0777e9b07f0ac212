
use super::TransportOperation;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Transport stand-in that counts cancel requests
#[derive(Clone, Default)]
pub(super) struct RecordingOperation {
    cancels: Arc<AtomicUsize>,
}

impl RecordingOperation {
    pub(super) fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub(super) fn was_cancelled(&self) -> bool {
        self.cancel_count() > 0
    }
}

impl TransportOperation for RecordingOperation {
    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}
