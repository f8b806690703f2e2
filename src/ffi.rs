//! C ABI over [`Capture`].
//!
//! Declared in `include/framegrab.h`. Handles are opaque tokens looked up in
//! a process-wide table, so a stale, repeated or NULL handle is a no-op and
//! never a use-after-free. Every entry point catches panics; failures come
//! back as NULL or `false`.
//!
//! # Frame ownership
//!
//! The `Frame` returned by [`capture_frame`] and its `data` buffer belong to
//! the handle. They stay valid until the next `capture_frame` or
//! `free_capture` on the same handle. The buffer is read-only, BGRA8,
//! tightly packed, `width * height * 4` bytes.

use std::collections::HashMap;
use std::ffi::{c_char, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::capture::{self, Capture};

/// Opaque handle type; C only ever sees pointers to it.
#[repr(C)]
pub struct CaptureHandle {
    _private: [u8; 0],
}

/// Frame record handed to C callers.
#[repr(C)]
#[derive(Debug)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub data: *mut u8,
}

/// The frame currently lent out through a handle.
struct HeldFrame {
    /// Keeps the pixel buffer `record.data` points into alive
    _snapshot: Arc<capture::Frame>,
    record: *mut Frame,
}

// SAFETY: `record` is a uniquely owned heap allocation and `data` points into
// the immutable buffer of `_snapshot`; neither is aliased mutably from Rust.
unsafe impl Send for HeldFrame {}

impl Drop for HeldFrame {
    fn drop(&mut self) {
        // SAFETY: `record` came from `Box::into_raw` in `capture_frame` and is
        // dropped exactly once, here.
        drop(unsafe { Box::from_raw(self.record) });
    }
}

struct Session {
    capture: Capture,
    held: Mutex<Option<HeldFrame>>,
}

impl Session {
    fn held(&self) -> MutexGuard<'_, Option<HeldFrame>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }
}

static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

fn sessions() -> MutexGuard<'static, HashMap<usize, Arc<Session>>> {
    static SESSIONS: OnceLock<Mutex<HashMap<usize, Arc<Session>>>> = OnceLock::new();
    SESSIONS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

/// Session behind `handle`, kept alive for the duration of the call even if
/// another thread frees the handle meanwhile.
fn lookup(handle: *mut CaptureHandle) -> Option<Arc<Session>> {
    if handle.is_null() {
        return None;
    }
    sessions().get(&(handle as usize)).cloned()
}

fn guarded<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        log::error!("Panic caught at the C boundary");
        fallback
    })
}

/// Create a capture bound to the source named by `name_str`.
///
/// The name ends at the first NUL; invalid UTF-8 is replaced lossily. The
/// source is not checked until launch. Returns NULL if `name_str` is NULL or
/// empty, or if the handle could not be built.
///
/// # Safety
///
/// `name_str` must be NULL or point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn create_capture(name_str: *const c_char) -> *mut CaptureHandle {
    if name_str.is_null() {
        log::warn!("create_capture called with a NULL name");
        return ptr::null_mut();
    }
    // SAFETY: guaranteed by the caller.
    let name = unsafe { CStr::from_ptr(name_str) }
        .to_string_lossy()
        .into_owned();

    guarded(ptr::null_mut(), || match Capture::new(name) {
        Ok(capture) => {
            let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
            let session = Arc::new(Session {
                capture,
                held: Mutex::new(None),
            });
            sessions().insert(token, session);
            token as *mut CaptureHandle
        }
        Err(e) => {
            log::warn!("create_capture failed: {}", e);
            ptr::null_mut()
        }
    })
}

/// Release a capture and everything it holds. NULL, unknown and already
/// freed handles are ignored.
#[no_mangle]
pub extern "C" fn free_capture(capture: *mut CaptureHandle) {
    if capture.is_null() {
        return;
    }
    guarded((), || {
        let removed = sessions().remove(&(capture as usize));
        match removed {
            Some(session) => {
                session.held().take();
                session.capture.release();
            }
            None => log::debug!("free_capture on unknown handle {:p}", capture),
        }
    })
}

/// Launch the capture stream. Returns `true` once frames are flowing,
/// `false` on any failure; a failed launch may be retried.
#[no_mangle]
pub extern "C" fn try_launch_capture(capture: *mut CaptureHandle) -> bool {
    let Some(session) = lookup(capture) else {
        return false;
    };
    guarded(false, || match session.capture.try_launch() {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to launch capture: {}", e);
            false
        }
    })
}

/// Latest frame of a launched capture, or NULL when none is available or
/// the capture is not launched. Invalidates the previously returned frame.
#[no_mangle]
pub extern "C" fn capture_frame(capture: *mut CaptureHandle) -> *mut Frame {
    let Some(session) = lookup(capture) else {
        return ptr::null_mut();
    };
    guarded(ptr::null_mut(), || {
        let mut held = session.held();
        *held = None;

        match session.capture.capture_frame() {
            Ok(snapshot) => {
                let record = Box::into_raw(Box::new(Frame {
                    width: snapshot.width as usize,
                    height: snapshot.height as usize,
                    data: snapshot.data.as_ptr() as *mut u8,
                }));
                *held = Some(HeldFrame {
                    _snapshot: snapshot,
                    record,
                });
                record
            }
            Err(e) => {
                log::trace!("capture_frame: {}", e);
                ptr::null_mut()
            }
        }
    })
}
