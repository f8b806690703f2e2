//! Newest-wins single-frame mailbox shared by the worker and the handle.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::types::Frame;

#[derive(Default)]
struct SlotInner {
    frame: Option<Arc<Frame>>,
    published: u64,
}

/// Holds at most one frame: the latest one.
///
/// Publishing replaces whatever was there, so a slow reader silently skips
/// frames instead of building up a backlog.
#[derive(Default)]
pub struct FrameSlot {
    inner: Mutex<SlotInner>,
    ready: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        // A panicking holder can only leave a valid Option behind.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: Frame) {
        let mut inner = self.lock();
        inner.frame = Some(Arc::new(frame));
        inner.published += 1;
        drop(inner);
        self.ready.notify_all();
    }

    /// Drop the current frame so readers see nothing until the next publish.
    pub fn clear(&self) {
        self.lock().frame = None;
    }

    /// Latest frame, if any.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.lock().frame.clone()
    }

    /// Number of frames published since the slot was created.
    pub fn published(&self) -> u64 {
        self.lock().published
    }

    /// Wait up to `timeout` for a frame with a sequence greater than `after`.
    pub fn wait_newer(&self, after: u64, timeout: Duration) -> Option<Arc<Frame>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if let Some(frame) = inner.frame.as_ref().filter(|f| f.sequence > after) {
                return Some(Arc::clone(frame));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            inner = self
                .ready
                .wait_timeout(inner, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Wake any waiters without publishing, e.g. on shutdown.
    pub fn wake_all(&self) {
        self.ready.notify_all();
    }
}
