//! Signalling address registry.
//!
//! Holds the single active destination that a [`StreamRuntime`](crate::StreamRuntime)
//! reads when it connects. Writers replace the value wholesale; readers get a
//! cheap clone of whatever was last written. Sessions that already connected
//! keep their resolved peer and are not affected by later updates.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::DEFAULT_MAX_ADDRESS_LEN;
use crate::error::{InvalidReason, Result, RuntimeError};

/// Opaque signalling destination, copied out of the caller's buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct SignallingAddress {
    bytes: Arc<[u8]>,
}

impl SignallingAddress {
    fn copy_from(bytes: &[u8]) -> Self {
        Self {
            bytes: Arc::from(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The address as UTF-8 text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    /// Resolve the address as `host:port` to the first socket address.
    pub fn resolve(&self) -> io::Result<SocketAddr> {
        let text = self.as_str().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "signalling address is not UTF-8")
        })?;
        text.trim().to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("signalling address {text} resolved to nothing"),
            )
        })
    }
}

impl fmt::Display for SignallingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

impl fmt::Debug for SignallingAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SignallingAddress")
            .field(&String::from_utf8_lossy(&self.bytes))
            .finish()
    }
}

/// Thread-safe holder of the current [`SignallingAddress`].
///
/// Last writer wins. Empty input and input longer than `max_len` are
/// rejected with [`RuntimeError::InvalidArgument`] and leave the stored
/// value untouched.
pub struct AddressRegistry {
    current: RwLock<Option<SignallingAddress>>,
    max_len: usize,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_ADDRESS_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            current: RwLock::new(None),
            max_len,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Copy `bytes` in as the new destination, superseding the old one.
    pub fn set(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(RuntimeError::invalid(InvalidReason::EmptyAddress));
        }
        if bytes.len() > self.max_len {
            return Err(RuntimeError::invalid(InvalidReason::AddressTooLong {
                len: bytes.len(),
                max: self.max_len,
            }));
        }

        let address = SignallingAddress::copy_from(bytes);
        tracing::info!(address = %address, "signalling address set");
        *self.current.write() = Some(address);
        Ok(())
    }

    /// The latest stored address, or `None` if never set (or cleared).
    pub fn current(&self) -> Option<SignallingAddress> {
        self.current.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.current.read().is_some()
    }

    /// Return to the unset state.
    pub fn clear(&self) {
        if self.current.write().take().is_some() {
            tracing::debug!("signalling address cleared");
        }
    }
}

impl Default for AddressRegistry {
    fn default() -> Self {
        Self::new()
    }
}
