//! C ABI for native hosts.
//!
//! Exposes a process-wide [`MediaRuntime`], created on first use, behind
//! plain C functions so an encoder pipeline (e.g. VideoToolbox on macOS) can
//! push SPS/PPS and encoded frames without knowing anything about Rust.
//!
//! ## Header
//!
//! ```c
//! typedef enum StreamType { Audio, Video } StreamType;
//!
//! typedef void (*SpsPpsCallback)(void *context,
//!                                const uint8_t *pps, uintptr_t pps_length,
//!                                const uint8_t *sps, uintptr_t sps_length);
//! typedef void (*ReleaseCallback)(void *context);
//!
//! bool rust_set_signalling_addr(const uint8_t *host_addr, uintptr_t host_addr_length);
//! void rust_send_video_callback(void *context, SpsPpsCallback callback);
//! bool rust_send_h264_config(const uint8_t *pps, uintptr_t pps_length,
//!                            const uint8_t *sps, uintptr_t sps_length);
//! bool rust_send_frame(const uint8_t *data, uintptr_t len,
//!                      void *context, ReleaseCallback release_callback);
//! bool rust_send_audio_frame(const uint8_t *data, uintptr_t len,
//!                            void *context, ReleaseCallback release_callback);
//! bool run_runtime_server(StreamType stream);
//! void rust_stop_runtime_server(StreamType stream);
//! ```
//!
//! ## Buffer ownership
//!
//! Frame bytes are read in place, not copied. When a `release_callback` is
//! given it is called exactly once with `context` after the runtime is done
//! with `data`, including when the frame is rejected (then before the send
//! function returns). The buffer must stay valid until that call.

use std::ffi::c_void;
use std::slice;
use std::sync::{Arc, LazyLock};

use rtp_runtime::{Frame, MediaRuntime, ParameterSetListener, StreamKind};

static RUNTIME: LazyLock<MediaRuntime> = LazyLock::new(|| {
    tracing::debug!("creating process-wide media runtime");
    MediaRuntime::new()
});

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Audio,
    Video,
}

impl From<StreamType> for StreamKind {
    fn from(stream: StreamType) -> Self {
        match stream {
            StreamType::Audio => StreamKind::Audio,
            StreamType::Video => StreamKind::Video,
        }
    }
}

pub type SpsPpsCallback = unsafe extern "C" fn(
    context: *mut c_void,
    pps: *const u8,
    pps_length: usize,
    sps: *const u8,
    sps_length: usize,
);

pub type ReleaseCallback = unsafe extern "C" fn(context: *mut c_void);

/// `None` for a null pointer; an empty slice for a zero length.
///
/// # Safety
///
/// A non-null `ptr` must be valid for reads of `len` bytes for `'a`.
unsafe fn bytes<'a>(ptr: *const u8, len: usize) -> Option<&'a [u8]> {
    if ptr.is_null() {
        None
    } else if len == 0 {
        Some(&[])
    } else {
        Some(unsafe { slice::from_raw_parts(ptr, len) })
    }
}

/// Host-owned frame memory, valid until its release callback runs.
struct ForeignBuffer {
    ptr: *const u8,
    len: usize,
}

// The host guarantees the memory outlives the release callback and is not
// written to in the meantime.
unsafe impl Send for ForeignBuffer {}

impl AsRef<[u8]> for ForeignBuffer {
    fn as_ref(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }
}

struct ReleaseHandle {
    callback: ReleaseCallback,
    context: *mut c_void,
}

// The context pointer is opaque to us and only handed back to the host.
unsafe impl Send for ReleaseHandle {}

impl ReleaseHandle {
    fn fire(self) {
        unsafe { (self.callback)(self.context) }
    }
}

struct ForeignListener {
    callback: SpsPpsCallback,
    context: *mut c_void,
}

unsafe impl Send for ForeignListener {}
unsafe impl Sync for ForeignListener {}

impl ParameterSetListener for ForeignListener {
    fn on_parameter_sets(&self, pps: &[u8], sps: &[u8]) {
        unsafe {
            (self.callback)(
                self.context,
                pps.as_ptr(),
                pps.len(),
                sps.as_ptr(),
                sps.len(),
            )
        }
    }
}

/// Wrap host memory as a [`Frame`]. A null `data` becomes an empty frame so
/// that it is rejected, and released, like any other invalid input.
unsafe fn foreign_frame(
    data: *const u8,
    len: usize,
    context: *mut c_void,
    release_callback: Option<ReleaseCallback>,
) -> Frame {
    let buffer = if data.is_null() {
        ForeignBuffer {
            ptr: std::ptr::NonNull::<u8>::dangling().as_ptr(),
            len: 0,
        }
    } else {
        ForeignBuffer { ptr: data, len }
    };

    match release_callback {
        Some(callback) => {
            let handle = ReleaseHandle { callback, context };
            Frame::with_release(buffer, move |_| handle.fire())
        }
        None => Frame::new(buffer),
    }
}

fn submit(kind: StreamKind, frame: Frame) -> bool {
    match RUNTIME.try_submit_frame(kind, frame) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(kind = %kind, error = %e, "frame not accepted");
            false
        }
    }
}

/// Set the destination used by the next `run_runtime_server`.
///
/// Returns `false` for a null, empty or oversize address.
///
/// # Safety
///
/// `host_addr` must be null or valid for reads of `host_addr_length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rust_set_signalling_addr(
    host_addr: *const u8,
    host_addr_length: usize,
) -> bool {
    let Some(address) = (unsafe { bytes(host_addr, host_addr_length) }) else {
        return false;
    };
    match RUNTIME.set_signalling_address(address) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "signalling address rejected");
            false
        }
    }
}

/// Register `callback` to receive SPS/PPS; a null callback unregisters.
///
/// The callback runs on the thread that calls `rust_send_h264_config`.
///
/// # Safety
///
/// `context` must remain valid for as long as the callback is registered,
/// and the callback must be safe to call from any thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rust_send_video_callback(
    context: *mut c_void,
    callback: Option<SpsPpsCallback>,
) {
    match callback {
        Some(callback) => {
            RUNTIME.register_parameter_set_listener(Arc::new(ForeignListener { callback, context }))
        }
        None => RUNTIME.unregister_parameter_set_listener(),
    }
}

/// Deliver an H.264 parameter-set pair. `false` if either is null or empty.
///
/// # Safety
///
/// Each pointer must be null or valid for reads of its length.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rust_send_h264_config(
    pps: *const u8,
    pps_length: usize,
    sps: *const u8,
    sps_length: usize,
) -> bool {
    let (Some(pps), Some(sps)) = (unsafe { bytes(pps, pps_length) }, unsafe {
        bytes(sps, sps_length)
    }) else {
        return false;
    };
    match RUNTIME.submit_parameter_sets(pps, sps) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "H.264 config rejected");
            false
        }
    }
}

/// Submit an encoded video frame (Annex B).
///
/// # Safety
///
/// `data` must be null or valid for reads of `len` bytes until
/// `release_callback` is invoked (or, without one, until the runtime is
/// stopped).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rust_send_frame(
    data: *const u8,
    len: usize,
    context: *mut c_void,
    release_callback: Option<ReleaseCallback>,
) -> bool {
    let frame = unsafe { foreign_frame(data, len, context, release_callback) };
    submit(StreamKind::Video, frame)
}

/// Submit an encoded audio frame.
///
/// # Safety
///
/// Same contract as [`rust_send_frame`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rust_send_audio_frame(
    data: *const u8,
    len: usize,
    context: *mut c_void,
    release_callback: Option<ReleaseCallback>,
) -> bool {
    let frame = unsafe { foreign_frame(data, len, context, release_callback) };
    submit(StreamKind::Audio, frame)
}

/// Start the runtime for `stream`. Blocks until it is running or has failed.
#[unsafe(no_mangle)]
pub extern "C" fn run_runtime_server(stream: StreamType) -> bool {
    let kind = StreamKind::from(stream);
    match RUNTIME.start(kind) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(kind = %kind, error = %e, "runtime failed to start");
            false
        }
    }
}

/// Stop the runtime for `stream`, draining queued frames.
#[unsafe(no_mangle)]
pub extern "C" fn rust_stop_runtime_server(stream: StreamType) {
    RUNTIME.stop(StreamKind::from(stream));
}
