//! Capture handle and public API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::capture_loop::{spawn_entry, CaptureLoop, LaunchEvent};
use super::errors::{BackendError, CaptureError};
use super::slot::FrameSlot;
use super::types::{CaptureState, Frame};
use crate::registry::{Lease, Registry};

/// A running (or starting) capture thread and the slot it publishes into.
struct Worker {
    slot: Arc<FrameSlot>,
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Stop the thread and wait for it to finish.
    fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.slot.wake_all();
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Stop the thread without waiting; it exits once the backend returns.
    fn abandon(self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

struct PendingLaunch {
    worker: Worker,
    events: Sender<LaunchEvent>,
}

struct Lifecycle {
    state: CaptureState,
    launch: Option<PendingLaunch>,
    worker: Option<Worker>,
    lease: Option<Lease>,
}

/// Capture handle bound to one named source.
///
/// Construction only registers the session; [`Capture::try_launch`] opens
/// the stream on a background thread that keeps the latest frame in a
/// shared slot, and [`Capture::capture_frame`] samples that slot.
///
/// All operations take `&self` and may be called from any thread. A
/// [`Capture::release`] racing an in-flight launch always wins: the launch
/// reports [`CaptureError::LaunchCancelled`] and any stream it opened is
/// discarded.
pub struct Capture {
    name: String,
    registry: Arc<Registry>,
    lifecycle: Mutex<Lifecycle>,
    /// Highest sequence handed out, for `wait_for_frame`
    last_seen: AtomicU64,
}

impl std::fmt::Debug for Capture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capture")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("is_streaming", &self.is_streaming())
            .finish_non_exhaustive()
    }
}

impl Capture {
    /// Create a capture of `name` on the process-wide registry.
    ///
    /// Succeeds for any non-empty name; whether the source exists is only
    /// checked at launch.
    ///
    /// # Errors
    /// * `CaptureError::EmptyName` - If `name` is empty
    pub fn new(name: impl Into<String>) -> Result<Self, CaptureError> {
        Self::with_registry(name, Registry::global())
    }

    /// Create a capture of `name` on a specific registry.
    pub fn with_registry(
        name: impl Into<String>,
        registry: Arc<Registry>,
    ) -> Result<Self, CaptureError> {
        let name = name.into();
        if name.is_empty() {
            return Err(CaptureError::EmptyName);
        }

        let lease = registry.register(&name);
        log::debug!("Created capture of '{}'", name);

        Ok(Self {
            name,
            registry,
            lifecycle: Mutex::new(Lifecycle {
                state: CaptureState::Created,
                launch: None,
                worker: None,
                lease: Some(lease),
            }),
            last_seen: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The source name this capture is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CaptureState {
        self.lock().state
    }

    /// Whether the capture thread is still pulling frames.
    ///
    /// A launched capture whose stream disconnected stays `Launched` but
    /// stops streaming; `capture_frame` then reports no frame.
    pub fn is_streaming(&self) -> bool {
        let lifecycle = self.lock();
        lifecycle.state == CaptureState::Launched
            && lifecycle
                .worker
                .as_ref()
                .is_some_and(|w| w.alive.load(Ordering::SeqCst))
    }

    /// Frames published since the current stream was launched.
    pub fn frames_published(&self) -> u64 {
        self.lock()
            .worker
            .as_ref()
            .map(|w| w.slot.published())
            .unwrap_or(0)
    }

    /// Launch the capture stream.
    ///
    /// Blocks until the backend reports the stream open, the launch times
    /// out, or the capture is released from another thread. Calling it on a
    /// launched capture is a no-op.
    ///
    /// # Errors
    /// * `CaptureError::LaunchFailed` - The backend could not open the source
    /// * `CaptureError::LaunchTimeout` - No answer within the launch timeout
    /// * `CaptureError::LaunchCancelled` - Released during the launch
    /// * `CaptureError::LaunchInProgress` - Another thread is launching it
    /// * `CaptureError::InvalidState` - The capture was released
    pub fn try_launch(&self) -> Result<(), CaptureError> {
        let settings = self.registry.settings().clone();
        let timeout = settings.launch_timeout();

        let events = {
            let mut lifecycle = self.lock();
            match lifecycle.state {
                CaptureState::Launched => return Ok(()),
                CaptureState::Released => {
                    return Err(CaptureError::InvalidState {
                        state: CaptureState::Released,
                        operation: "launch",
                    })
                }
                CaptureState::Created | CaptureState::Failed => {}
            }
            if lifecycle.launch.is_some() {
                return Err(CaptureError::LaunchInProgress(self.name.clone()));
            }

            let slot = Arc::new(FrameSlot::new());
            let stop = Arc::new(AtomicBool::new(false));
            let alive = Arc::new(AtomicBool::new(true));
            let (tx, rx) = mpsc::channel();

            let ctx = CaptureLoop {
                registry: Arc::clone(&self.registry),
                name: self.name.clone(),
                slot: Arc::clone(&slot),
                stop: Arc::clone(&stop),
                alive: Arc::clone(&alive),
                events: tx.clone(),
                settings,
            };

            let spawned = thread::Builder::new()
                .name(format!("capture-{}", self.name))
                .spawn(move || spawn_entry(ctx));
            let thread = match spawned {
                Ok(thread) => thread,
                Err(e) => {
                    lifecycle.state = CaptureState::Failed;
                    return Err(CaptureError::LaunchFailed {
                        name: self.name.clone(),
                        source: BackendError::Unavailable(format!(
                            "failed to spawn capture thread: {}",
                            e
                        )),
                    });
                }
            };

            lifecycle.launch = Some(PendingLaunch {
                worker: Worker {
                    slot,
                    stop,
                    alive,
                    thread: Some(thread),
                },
                events: tx,
            });
            rx
        };

        log::info!("Launching capture of '{}'", self.name);
        let outcome = events.recv_timeout(timeout);

        let mut lifecycle = self.lock();
        let pending = match lifecycle.launch.take() {
            Some(pending) if lifecycle.state != CaptureState::Released => pending,
            // Release took the pending launch and already stopped it.
            _ => {
                log::info!("Launch of '{}' cancelled by release", self.name);
                return Err(CaptureError::LaunchCancelled(self.name.clone()));
            }
        };

        match outcome {
            Ok(LaunchEvent::Ready) => {
                lifecycle.state = CaptureState::Launched;
                lifecycle.worker = Some(pending.worker);
                self.last_seen.store(0, Ordering::SeqCst);
                log::info!("Capture of '{}' launched", self.name);
                Ok(())
            }
            Ok(LaunchEvent::Failed(source)) => {
                lifecycle.state = CaptureState::Failed;
                drop(lifecycle);
                pending.worker.shutdown();
                log::warn!("Failed to launch capture of '{}': {}", self.name, source);
                Err(CaptureError::LaunchFailed {
                    name: self.name.clone(),
                    source,
                })
            }
            // `Cancelled` only comes from release, which takes the pending
            // launch first; with it still here, treat the stream as lost.
            Ok(LaunchEvent::Cancelled)
            | Err(RecvTimeoutError::Timeout)
            | Err(RecvTimeoutError::Disconnected) => {
                lifecycle.state = CaptureState::Failed;
                pending.worker.abandon();
                log::warn!(
                    "Launch of '{}' timed out after {:?}",
                    self.name,
                    timeout
                );
                Err(CaptureError::LaunchTimeout {
                    name: self.name.clone(),
                    timeout,
                })
            }
        }
    }

    /// Launch, reporting only success.
    pub fn launch(&self) -> bool {
        self.try_launch().is_ok()
    }

    /// Get the latest captured frame.
    ///
    /// Never blocks. The returned snapshot stays valid for as long as it is
    /// held, even after newer frames arrive or the capture is released.
    ///
    /// # Errors
    /// * `CaptureError::InvalidState` - The capture is not launched
    /// * `CaptureError::NoFrameAvailable` - Nothing captured yet, or the
    ///   backend failed since the last good frame
    pub fn capture_frame(&self) -> Result<Arc<Frame>, CaptureError> {
        let slot = self.launched_slot("poll")?;
        let frame = slot.latest().ok_or(CaptureError::NoFrameAvailable)?;
        self.last_seen.fetch_max(frame.sequence, Ordering::SeqCst);
        Ok(frame)
    }

    /// Wait up to `timeout` for a frame newer than the last one returned.
    ///
    /// # Errors
    /// Same as [`Capture::capture_frame`].
    pub fn wait_for_frame(&self, timeout: Duration) -> Result<Arc<Frame>, CaptureError> {
        let slot = self.launched_slot("wait on")?;
        let after = self.last_seen.load(Ordering::SeqCst);
        let frame = slot
            .wait_newer(after, timeout)
            .ok_or(CaptureError::NoFrameAvailable)?;
        self.last_seen.fetch_max(frame.sequence, Ordering::SeqCst);
        Ok(frame)
    }

    fn launched_slot(&self, operation: &'static str) -> Result<Arc<FrameSlot>, CaptureError> {
        let lifecycle = self.lock();
        match (&lifecycle.state, &lifecycle.worker) {
            (CaptureState::Launched, Some(worker)) => Ok(Arc::clone(&worker.slot)),
            (state, _) => Err(CaptureError::InvalidState {
                state: *state,
                operation,
            }),
        }
    }

    /// Stop the stream and release all backend resources.
    ///
    /// Safe in any state and safe to repeat; only the first call does work.
    pub fn release(&self) {
        let (previous, pending, worker, lease) = {
            let mut lifecycle = self.lock();
            if lifecycle.state == CaptureState::Released {
                return;
            }
            let previous = lifecycle.state;
            lifecycle.state = CaptureState::Released;
            (
                previous,
                lifecycle.launch.take(),
                lifecycle.worker.take(),
                lifecycle.lease.take(),
            )
        };

        if let Some(pending) = pending {
            pending.worker.stop.store(true, Ordering::SeqCst);
            let _ = pending.events.send(LaunchEvent::Cancelled);
            pending.worker.abandon();
        }
        if let Some(worker) = worker {
            worker.shutdown();
        }
        drop(lease);

        log::info!("Released capture of '{}' (was {})", self.name, previous);
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CaptureBackend, FrameSource, SyntheticBackend};
    use crate::capture::{PixelLayout, RawFrame, SourceInfo};
    use crate::config::{CaptureConfig, SourceConfig};

    fn registry(sources: Vec<SourceConfig>, settings: CaptureConfig) -> Arc<Registry> {
        Registry::with_backend(Arc::new(SyntheticBackend::new(sources)), settings)
    }

    fn small_registry() -> Arc<Registry> {
        registry(
            vec![SourceConfig::new("monitor-0").with_size(32, 16).with_fps(200)],
            CaptureConfig::default(),
        )
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = Capture::with_registry("", small_registry());
        assert_eq!(result.unwrap_err(), CaptureError::EmptyName);
    }

    #[test]
    fn test_new_capture_is_created() {
        let capture = Capture::with_registry("monitor-0", small_registry()).unwrap();
        assert_eq!(capture.name(), "monitor-0");
        assert_eq!(capture.state(), CaptureState::Created);
        assert!(!capture.is_streaming());
        assert_eq!(capture.frames_published(), 0);
    }

    #[test]
    fn test_capture_frame_before_launch() {
        let capture = Capture::with_registry("monitor-0", small_registry()).unwrap();
        assert_eq!(
            capture.capture_frame().unwrap_err(),
            CaptureError::InvalidState {
                state: CaptureState::Created,
                operation: "poll",
            }
        );
    }

    #[test]
    fn test_launch_is_idempotent() {
        let capture = Capture::with_registry("monitor-0", small_registry()).unwrap();
        assert!(capture.try_launch().is_ok());
        assert!(capture.try_launch().is_ok());
        assert_eq!(capture.state(), CaptureState::Launched);
    }

    #[test]
    fn test_launch_unknown_source_fails() {
        let capture = Capture::with_registry("monitor-9", small_registry()).unwrap();
        match capture.try_launch() {
            Err(CaptureError::LaunchFailed { source, .. }) => {
                assert_eq!(source, BackendError::SourceNotFound("monitor-9".to_string()))
            }
            other => panic!("Expected LaunchFailed, got {:?}", other),
        }
        assert_eq!(capture.state(), CaptureState::Failed);
        assert!(capture.capture_frame().is_err());
    }

    #[test]
    fn test_launch_after_release_is_invalid() {
        let capture = Capture::with_registry("monitor-0", small_registry()).unwrap();
        capture.release();
        assert!(matches!(
            capture.try_launch(),
            Err(CaptureError::InvalidState {
                state: CaptureState::Released,
                ..
            })
        ));
        assert!(!capture.launch());
    }

    #[test]
    fn test_launch_timeout_marks_failed() {
        let settings = CaptureConfig {
            launch_timeout_ms: 20,
            ..CaptureConfig::default()
        };
        let reg = registry(
            vec![SourceConfig::new("slow")
                .with_size(8, 8)
                .with_open_delay(Duration::from_millis(300))],
            settings,
        );
        let capture = Capture::with_registry("slow", reg).unwrap();
        assert!(matches!(
            capture.try_launch(),
            Err(CaptureError::LaunchTimeout { .. })
        ));
        assert_eq!(capture.state(), CaptureState::Failed);
    }

    #[test]
    fn test_wait_for_frame_returns_newer_frames() {
        let capture = Capture::with_registry("monitor-0", small_registry()).unwrap();
        capture.try_launch().unwrap();
        let first = capture.wait_for_frame(Duration::from_secs(5)).unwrap();
        let second = capture.wait_for_frame(Duration::from_secs(5)).unwrap();
        assert!(second.sequence > first.sequence);
        assert_eq!(second.data.len(), second.expected_len());
    }

    #[test]
    fn test_release_is_idempotent_and_unregisters() {
        let reg = small_registry();
        let capture = Capture::with_registry("monitor-0", Arc::clone(&reg)).unwrap();
        capture.try_launch().unwrap();
        assert_eq!(reg.sessions("monitor-0"), 1);
        capture.release();
        capture.release();
        assert_eq!(capture.state(), CaptureState::Released);
        assert_eq!(reg.sessions("monitor-0"), 0);
        assert!(!reg.is_initialized());
    }

    /// Backend whose stream serves one 1x1 frame and then panics.
    struct OneShotBackend;

    struct OneShotSource {
        served: bool,
    }

    impl FrameSource for OneShotSource {
        fn next_frame(&mut self, _timeout: Duration) -> Result<Option<RawFrame>, BackendError> {
            if self.served {
                panic!("backend blew up");
            }
            self.served = true;
            Ok(Some(RawFrame {
                width: 1,
                height: 1,
                pitch: 4,
                layout: PixelLayout::Bgra8,
                flipped: false,
                data: vec![1, 2, 3, 255],
            }))
        }
    }

    impl CaptureBackend for OneShotBackend {
        fn name(&self) -> &'static str {
            "one-shot"
        }

        fn sources(&self) -> Vec<SourceInfo> {
            Vec::new()
        }

        fn open(&self, _source: &str) -> Result<Box<dyn FrameSource>, BackendError> {
            Ok(Box::new(OneShotSource { served: false }))
        }
    }

    #[test]
    fn test_panicked_stream_serves_no_frame() {
        let reg = Registry::with_backend(Arc::new(OneShotBackend), CaptureConfig::default());
        let capture = Capture::with_registry("one-shot", reg).unwrap();
        capture.try_launch().unwrap();

        let start = std::time::Instant::now();
        while capture.is_streaming() && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!capture.is_streaming());
        assert_eq!(capture.state(), CaptureState::Launched);
        assert_eq!(capture.capture_frame().unwrap_err(), CaptureError::NoFrameAvailable);
        capture.release();
    }

    #[test]
    fn test_drop_releases_session() {
        let reg = small_registry();
        {
            let _capture = Capture::with_registry("monitor-0", Arc::clone(&reg)).unwrap();
            assert_eq!(reg.active_sessions(), 1);
        }
        assert_eq!(reg.active_sessions(), 0);
    }
}
