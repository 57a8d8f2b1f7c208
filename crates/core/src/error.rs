//! Error types for the media transport runtime.

use std::fmt;

use crate::StreamKind;

/// Errors that can occur in the media transport runtime.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Input**: [`InvalidArgument`](Self::InvalidArgument) for empty buffers,
///   oversize addresses or frames.
/// - **Lifecycle**: [`NotConfigured`](Self::NotConfigured),
///   [`AlreadyRunning`](Self::AlreadyRunning),
///   [`Cancelled`](Self::Cancelled).
/// - **Admission**: [`TransportUnavailable`](Self::TransportUnavailable),
///   [`QueueFull`](Self::QueueFull).
/// - **Transport**: [`TransientTransport`](Self::TransientTransport),
///   [`FatalTransport`](Self::FatalTransport), [`Io`](Self::Io).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Malformed input: empty buffer, oversize address or frame.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: InvalidReason },

    /// The operation needs a signalling address and none has been set.
    #[error("signalling address not configured")]
    NotConfigured,

    /// A runtime for this kind is already connecting, running or draining.
    #[error("{0} runtime already running")]
    AlreadyRunning(StreamKind),

    /// No running runtime for this kind.
    #[error("no running {0} runtime")]
    TransportUnavailable(StreamKind),

    /// The frame queue stayed full for the whole admission wait.
    #[error("{0} frame queue full")]
    QueueFull(StreamKind),

    /// `stop` was called while `start` was still connecting.
    #[error("{0} runtime start cancelled by stop")]
    Cancelled(StreamKind),

    /// A send failure worth retrying (packet loss, transient I/O). Returned
    /// by a single classified send; the retry loop never surfaces it.
    #[error("transient transport error: {0}")]
    TransientTransport(#[source] std::io::Error),

    /// A send failure that ends the session (reset, unreachable, retries exhausted).
    #[error("fatal transport error: {0}")]
    FatalTransport(#[source] std::io::Error),

    /// Underlying I/O or socket error outside the send path (bind, resolve).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub(crate) fn invalid(reason: InvalidReason) -> Self {
        Self::InvalidArgument { reason }
    }

    /// Whether a send failing with this error may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientTransport(_))
    }

    /// Whether this error was caused by the caller's input rather than runtime state.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }
}

/// Specific kind of invalid input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// Signalling address was empty.
    EmptyAddress,
    /// Signalling address exceeded the configured maximum length.
    AddressTooLong { len: usize, max: usize },
    /// Frame buffer was empty.
    EmptyFrame,
    /// Frame exceeded the per-kind maximum length.
    FrameTooLarge { len: usize, max: usize },
    /// SPS region was empty.
    EmptySps,
    /// PPS region was empty.
    EmptyPps,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyAddress => write!(f, "empty signalling address"),
            Self::AddressTooLong { len, max } => {
                write!(f, "signalling address of {len} bytes exceeds {max}")
            }
            Self::EmptyFrame => write!(f, "empty frame"),
            Self::FrameTooLarge { len, max } => write!(f, "frame of {len} bytes exceeds {max}"),
            Self::EmptySps => write!(f, "empty SPS"),
            Self::EmptyPps => write!(f, "empty PPS"),
        }
    }
}

/// Convenience alias for `Result<T, RuntimeError>`.
pub type Result<T> = std::result::Result<T, RuntimeError>;
