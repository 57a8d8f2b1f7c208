//! Owned frame buffers with a single-fire release notification.
//!
//! A [`Frame`] moves a producer's encoded buffer into the conveyor. Whatever
//! happens next (transmitted, rejected at the door, abandoned on shutdown,
//! failed on a dead transport) the release handle fires exactly once, when
//! the frame is dropped. Because firing is tied to `Drop`, there is no code
//! path that can skip it or run it twice.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

/// Callback invoked once the conveyor no longer needs the buffer.
pub type ReleaseFn = Box<dyn FnOnce(FrameOutcome) + Send + 'static>;

/// Why a frame was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Every RTP packet for the frame was handed to the transport.
    Transmitted,
    /// Refused at admission; released before `submit` returned.
    Rejected,
    /// Accepted, then dropped without sending (drain timeout, shutdown).
    Abandoned,
    /// Accepted, then lost to a fatal transport error.
    Failed,
}

/// An encoded audio or video frame plus its release handle.
pub struct Frame {
    data: Option<Box<dyn AsRef<[u8]> + Send>>,
    release: Option<ReleaseFn>,
    outcome: FrameOutcome,
}

impl Frame {
    /// A frame nobody needs to hear back about.
    pub fn new<B>(data: B) -> Self
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        Self {
            data: Some(Box::new(data)),
            release: None,
            outcome: FrameOutcome::Abandoned,
        }
    }

    /// A frame whose release runs `on_release` exactly once.
    ///
    /// The buffer itself is dropped before `on_release` runs.
    pub fn with_release<B, F>(data: B, on_release: F) -> Self
    where
        B: AsRef<[u8]> + Send + 'static,
        F: FnOnce(FrameOutcome) + Send + 'static,
    {
        Self {
            data: Some(Box::new(data)),
            release: Some(Box::new(on_release)),
            outcome: FrameOutcome::Abandoned,
        }
    }

    /// A frame paired with a one-shot receiver for its release.
    pub fn with_completion<B>(data: B) -> (Self, ReleaseReceiver)
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let frame = Self::with_release(data, move |outcome| {
            // Receiver may be gone; the producer stopped caring.
            let _ = tx.send(outcome);
        });
        (frame, ReleaseReceiver { rx })
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            Some(data) => (**data).as_ref(),
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Record the outcome and release.
    pub(crate) fn finish(mut self, outcome: FrameOutcome) {
        self.outcome = outcome;
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        drop(self.data.take());
        if let Some(release) = self.release.take() {
            release(self.outcome);
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.len())
            .field("notifies", &self.release.is_some())
            .finish()
    }
}

/// Receiving half of [`Frame::with_completion`].
#[derive(Debug)]
pub struct ReleaseReceiver {
    rx: Receiver<FrameOutcome>,
}

impl ReleaseReceiver {
    /// Block until the frame is released.
    pub fn wait(&self) -> Option<FrameOutcome> {
        self.rx.recv().ok()
    }

    /// Block up to `timeout`; `None` if the frame has not been released yet.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<FrameOutcome> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Non-blocking check.
    pub fn try_outcome(&self) -> Option<FrameOutcome> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn drop_releases_once_as_abandoned() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let frame = Frame::with_release(vec![1u8, 2, 3], move |outcome| {
            assert_eq!(outcome, FrameOutcome::Abandoned);
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(frame.len(), 3);
        drop(frame);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finish_reports_outcome() {
        let (frame, rx) = Frame::with_completion(vec![0u8; 16]);
        assert!(rx.try_outcome().is_none());
        frame.finish(FrameOutcome::Transmitted);
        assert_eq!(rx.try_outcome(), Some(FrameOutcome::Transmitted));
        assert!(rx.try_outcome().is_none(), "never fires twice");
    }

    #[test]
    fn buffer_dropped_before_release() {
        let buffer = Arc::new(vec![7u8; 32]);
        let watcher = buffer.clone();

        struct Shared(Arc<Vec<u8>>);
        impl AsRef<[u8]> for Shared {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        let frame = Frame::with_release(Shared(buffer), move |_| {
            assert_eq!(Arc::strong_count(&watcher), 1);
        });
        drop(frame);
    }

    #[test]
    fn plain_frame_has_no_release() {
        let frame = Frame::new(b"abc");
        assert_eq!(frame.as_bytes(), b"abc");
        assert!(format!("{frame:?}").contains("notifies: false"));
    }

    #[test]
    fn wait_timeout_before_release() {
        let (frame, rx) = Frame::with_completion(vec![1u8]);
        assert_eq!(rx.wait_timeout(Duration::from_millis(5)), None);
        drop(frame);
        assert_eq!(rx.wait(), Some(FrameOutcome::Abandoned));
    }
}
