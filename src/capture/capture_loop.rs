//! Background acquisition thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

use super::errors::BackendError;
use super::frame_utils::normalize;
use super::slot::FrameSlot;
use crate::config::CaptureConfig;
use crate::registry::Registry;

/// Reports sent to a waiting `launch`.
#[derive(Debug)]
pub enum LaunchEvent {
    /// Stream is open and frames are flowing
    Ready,
    /// Stream could not be opened
    Failed(BackendError),
    /// The capture was released while launching
    Cancelled,
}

/// Everything the capture thread needs. Nothing here points back at the
/// handle, so dropping the handle never waits on the thread's references.
pub struct CaptureLoop {
    pub registry: Arc<Registry>,
    pub name: String,
    pub slot: Arc<FrameSlot>,
    pub stop: Arc<AtomicBool>,
    pub alive: Arc<AtomicBool>,
    pub events: Sender<LaunchEvent>,
    pub settings: CaptureConfig,
}

/// Thread entry point. Backend panics are contained: a pending launch sees
/// them as a failure, a running stream ends with its slot emptied.
pub fn spawn_entry(ctx: CaptureLoop) {
    let events = ctx.events.clone();
    let alive = Arc::clone(&ctx.alive);
    let slot = Arc::clone(&ctx.slot);
    let name = ctx.name.clone();
    if panic::catch_unwind(AssertUnwindSafe(|| run_capture_loop(ctx))).is_err() {
        log::error!("Capture thread for '{}' panicked", name);
        let _ = events.send(LaunchEvent::Failed(BackendError::Unavailable(
            "capture thread panicked".to_string(),
        )));
        slot.clear();
    }
    alive.store(false, Ordering::SeqCst);
    slot.wake_all();
}

/// Open the stream, report readiness, then pull frames until stopped.
pub fn run_capture_loop(ctx: CaptureLoop) {
    let mut source = match ctx.registry.open(&ctx.name, &ctx.stop) {
        Ok(Some(source)) => source,
        Ok(None) => {
            log::debug!("Capture of '{}' stopped before the stream was opened", ctx.name);
            return;
        }
        Err(e) => {
            let _ = ctx.events.send(LaunchEvent::Failed(e));
            return;
        }
    };

    // Release or a launch timeout may have happened while the backend was
    // negotiating; such a stream is dropped here and never delivered.
    if ctx.stop.load(Ordering::SeqCst) {
        log::debug!("Discarding stream for '{}' opened after stop", ctx.name);
        return;
    }
    if ctx.events.send(LaunchEvent::Ready).is_err() {
        return;
    }

    let frame_timeout = ctx.settings.frame_timeout();
    let mut sequence = 0u64;
    let mut consecutive_errors = 0u32;

    while !ctx.stop.load(Ordering::SeqCst) {
        match source.next_frame(frame_timeout) {
            Ok(Some(raw)) => match normalize(raw, sequence + 1) {
                Ok(frame) => {
                    if ctx.stop.load(Ordering::SeqCst) {
                        break;
                    }
                    sequence += 1;
                    consecutive_errors = 0;
                    log::trace!("Captured frame {} from '{}'", sequence, ctx.name);
                    ctx.slot.publish(frame);
                }
                Err(e) => {
                    consecutive_errors += 1;
                    log::warn!("Dropping frame from '{}': {}", ctx.name, e);
                    ctx.slot.clear();
                }
            },
            Ok(None) => {}
            Err(BackendError::Disconnected) => {
                log::warn!("Capture stream for '{}' disconnected", ctx.name);
                ctx.slot.clear();
                break;
            }
            Err(e) => {
                consecutive_errors += 1;
                log::debug!("Capture error on '{}': {}", ctx.name, e);
                ctx.slot.clear();
                thread::sleep(ctx.settings.error_backoff());
            }
        }

        if consecutive_errors >= ctx.settings.max_consecutive_errors.max(1) {
            log::warn!(
                "Giving up on '{}' after {} consecutive errors",
                ctx.name,
                consecutive_errors
            );
            ctx.slot.clear();
            break;
        }
    }

    ctx.alive.store(false, Ordering::SeqCst);
    ctx.slot.wake_all();
    log::info!("Capture of '{}' stopped after {} frames", ctx.name, sequence);
}
