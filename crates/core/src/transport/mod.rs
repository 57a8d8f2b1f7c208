//! Outbound RTP delivery.
//!
//! A [`TransportConnector`] turns the current [`SignallingAddress`] into a
//! connected [`MediaTransport`] when a runtime starts. Each running
//! [`StreamKind`] owns its own transport; the worker thread is the only
//! writer.
//!
//! Send failures are split into transient and fatal by [`classify`]. The
//! worker retries transient ones through [`send_with_retry`] and tears the
//! session down on fatal ones.

pub mod udp;

use std::io;
use std::thread;

pub use udp::{UdpConnector, UdpTransport};

use crate::StreamKind;
use crate::address::SignallingAddress;
use crate::config::RetryPolicy;
use crate::error::{Result, RuntimeError};

/// A connected, packet-oriented path to the remote peer.
pub trait MediaTransport: Send {
    /// Send one complete RTP packet.
    fn send(&mut self, packet: &[u8]) -> io::Result<usize>;
}

/// Establishes a [`MediaTransport`] for a stream kind.
pub trait TransportConnector: Send + Sync {
    fn connect(
        &self,
        kind: StreamKind,
        address: &SignallingAddress,
    ) -> Result<Box<dyn MediaTransport>>;
}

/// How the worker should react to a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    Transient,
    Fatal,
}

/// Sort an I/O error into [`SendFailure::Transient`] or [`SendFailure::Fatal`].
///
/// Unknown kinds are treated as transient; the retry budget bounds them.
pub fn classify(err: &io::Error) -> SendFailure {
    use io::ErrorKind::*;
    match err.kind() {
        ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected | BrokenPipe
        | AddrNotAvailable | HostUnreachable | NetworkUnreachable | NetworkDown => {
            SendFailure::Fatal
        }
        _ => SendFailure::Transient,
    }
}

/// One send attempt, with any failure classified into
/// [`RuntimeError::TransientTransport`] or [`RuntimeError::FatalTransport`].
pub fn send_once(transport: &mut dyn MediaTransport, packet: &[u8]) -> Result<usize> {
    transport.send(packet).map_err(|e| match classify(&e) {
        SendFailure::Transient => RuntimeError::TransientTransport(e),
        SendFailure::Fatal => RuntimeError::FatalTransport(e),
    })
}

/// Outcome of a successful [`send_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub bytes: usize,
    pub retries: u32,
}

/// Send `packet`, retrying transient failures per `policy`.
///
/// Returns [`RuntimeError::FatalTransport`] on a fatal error or when the
/// retry budget runs out.
pub fn send_with_retry(
    transport: &mut dyn MediaTransport,
    packet: &[u8],
    policy: &RetryPolicy,
) -> Result<Delivered> {
    let attempts = policy.attempts();
    let mut retries = 0;

    loop {
        match send_once(transport, packet) {
            Ok(bytes) => return Ok(Delivered { bytes, retries }),
            Err(RuntimeError::TransientTransport(e)) if retries + 1 >= attempts => {
                tracing::debug!(error = %e, attempts, "send retry budget exhausted");
                return Err(RuntimeError::FatalTransport(e));
            }
            Err(RuntimeError::TransientTransport(e)) => {
                retries += 1;
                tracing::debug!(
                    error = %e,
                    retry = retries,
                    "transient send failure, retrying"
                );
                thread::sleep(policy.backoff(retries));
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct Scripted {
        results: VecDeque<io::Result<usize>>,
        calls: usize,
    }

    impl Scripted {
        fn new(results: Vec<io::Result<usize>>) -> Self {
            Self {
                results: results.into(),
                calls: 0,
            }
        }
    }

    impl MediaTransport for Scripted {
        fn send(&mut self, packet: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            self.results.pop_front().unwrap_or(Ok(packet.len()))
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_send_attempts: 3,
            retry_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn classification() {
        let fatal = [
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::HostUnreachable,
            io::ErrorKind::NetworkDown,
        ];
        for kind in fatal {
            assert_eq!(classify(&io::Error::from(kind)), SendFailure::Fatal, "{kind:?}");
        }
        let transient = [
            io::ErrorKind::WouldBlock,
            io::ErrorKind::Interrupted,
            io::ErrorKind::TimedOut,
            io::ErrorKind::OutOfMemory,
            io::ErrorKind::Other,
        ];
        for kind in transient {
            assert_eq!(classify(&io::Error::from(kind)), SendFailure::Transient, "{kind:?}");
        }
    }

    #[test]
    fn single_attempt_classifies_failure() {
        let mut t = Scripted::new(vec![
            Err(io::ErrorKind::WouldBlock.into()),
            Err(io::ErrorKind::ConnectionReset.into()),
        ]);
        let err = send_once(&mut t, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, RuntimeError::TransientTransport(_)));
        assert!(err.is_transient());
        let err = send_once(&mut t, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, RuntimeError::FatalTransport(_)));
        assert!(!err.is_transient());
        assert_eq!(send_once(&mut t, &[0u8; 4]).unwrap(), 4);
    }

    #[test]
    fn transient_then_success() {
        let mut t = Scripted::new(vec![Err(io::ErrorKind::WouldBlock.into())]);
        let delivered = send_with_retry(&mut t, &[0u8; 10], &fast_policy()).unwrap();
        assert_eq!(delivered, Delivered { bytes: 10, retries: 1 });
        assert_eq!(t.calls, 2);
    }

    #[test]
    fn budget_exhausted_is_fatal() {
        let mut t = Scripted::new(vec![
            Err(io::ErrorKind::TimedOut.into()),
            Err(io::ErrorKind::TimedOut.into()),
            Err(io::ErrorKind::TimedOut.into()),
        ]);
        let err = send_with_retry(&mut t, &[0u8; 4], &fast_policy()).unwrap_err();
        assert!(matches!(err, RuntimeError::FatalTransport(_)));
        assert_eq!(t.calls, 3);
    }

    #[test]
    fn fatal_not_retried() {
        let mut t = Scripted::new(vec![Err(io::ErrorKind::ConnectionRefused.into())]);
        let err = send_with_retry(&mut t, &[0u8; 4], &fast_policy()).unwrap_err();
        assert!(matches!(err, RuntimeError::FatalTransport(_)));
        assert_eq!(t.calls, 1);
    }

    #[test]
    fn no_retry_policy_single_attempt() {
        let mut t = Scripted::new(vec![Err(io::ErrorKind::WouldBlock.into())]);
        assert!(send_with_retry(&mut t, &[1], &RetryPolicy::no_retry()).is_err());
        assert_eq!(t.calls, 1);
    }
}
