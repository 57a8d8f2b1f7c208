use std::sync::Arc;

use super::{RuntimeState, StreamRuntime};
use crate::StreamKind;
use crate::address::{AddressRegistry, SignallingAddress};
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::frame::Frame;
use crate::params::{ParameterSetChannel, ParameterSetListener};
use crate::stats::StreamStats;
use crate::transport::{TransportConnector, UdpConnector};

/// The media transport runtime.
///
/// Owns the signalling address, the parameter-set channel and one
/// [`StreamRuntime`] per [`StreamKind`]. Dropping it stops both streams and
/// releases every frame still queued.
///
/// ```no_run
/// use rtp_runtime::{Frame, MediaRuntime, StreamKind};
///
/// let runtime = MediaRuntime::new();
/// runtime.set_signalling_address(b"127.0.0.1:5004")?;
/// runtime.start(StreamKind::Video)?;
///
/// let access_unit = vec![0, 0, 0, 1, 0x65, 0x88, 0x84];
/// runtime.submit_frame(StreamKind::Video, Frame::new(access_unit));
///
/// runtime.stop(StreamKind::Video);
/// # Ok::<(), rtp_runtime::RuntimeError>(())
/// ```
pub struct MediaRuntime {
    config: RuntimeConfig,
    addresses: AddressRegistry,
    parameter_sets: ParameterSetChannel,
    connector: Box<dyn TransportConnector>,
    audio: StreamRuntime,
    video: StreamRuntime,
}

impl MediaRuntime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// UDP delivery with custom settings.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let connector = UdpConnector::new(config.bind_addr.clone());
        Self::with_connector(config, connector)
    }

    /// Deliver through a caller-supplied connector instead of UDP.
    pub fn with_connector(
        config: RuntimeConfig,
        connector: impl TransportConnector + 'static,
    ) -> Self {
        tracing::debug!(
            bind_addr = %config.bind_addr,
            pending_parameter_sets = ?config.pending_parameter_sets,
            "media runtime created"
        );
        Self {
            addresses: AddressRegistry::with_max_len(config.max_address_len),
            parameter_sets: ParameterSetChannel::new(config.pending_parameter_sets),
            connector: Box::new(connector),
            audio: StreamRuntime::new(
                StreamKind::Audio,
                config.audio.clone(),
                config.retry.clone(),
            ),
            video: StreamRuntime::new(
                StreamKind::Video,
                config.video.clone(),
                config.retry.clone(),
            ),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn runtime(&self, kind: StreamKind) -> &StreamRuntime {
        match kind {
            StreamKind::Audio => &self.audio,
            StreamKind::Video => &self.video,
        }
    }

    /// Replace the destination used by the next `start`.
    pub fn set_signalling_address(&self, address: &[u8]) -> Result<()> {
        self.addresses.set(address)
    }

    pub fn signalling_address(&self) -> Option<SignallingAddress> {
        self.addresses.current()
    }

    pub fn register_parameter_set_listener(&self, listener: Arc<dyn ParameterSetListener>) {
        self.parameter_sets.register_listener(listener);
    }

    pub fn unregister_parameter_set_listener(&self) {
        self.parameter_sets.unregister_listener();
    }

    /// Deliver an SPS/PPS pair to the listener and the live video packetizer.
    pub fn submit_parameter_sets(&self, pps: &[u8], sps: &[u8]) -> Result<()> {
        let params = self.parameter_sets.submit(pps, sps)?;
        self.video.update_parameter_sets(&params);
        Ok(())
    }

    /// `true` if the frame entered the pipeline for `kind`.
    pub fn submit_frame(&self, kind: StreamKind, frame: Frame) -> bool {
        self.runtime(kind).submit(frame)
    }

    pub fn try_submit_frame(&self, kind: StreamKind, frame: Frame) -> Result<()> {
        self.runtime(kind).try_submit(frame)
    }

    /// Connect `kind` to the current signalling address.
    pub fn start(&self, kind: StreamKind) -> Result<()> {
        let parameter_sets = match kind {
            StreamKind::Video => Some(&self.parameter_sets),
            StreamKind::Audio => None,
        };
        self.runtime(kind).start(
            self.addresses.current(),
            self.connector.as_ref(),
            parameter_sets,
        )
    }

    pub fn stop(&self, kind: StreamKind) {
        self.runtime(kind).stop();
    }

    /// Stop both streams.
    pub fn shutdown(&self) {
        for kind in StreamKind::ALL {
            self.stop(kind);
        }
    }

    pub fn state(&self, kind: StreamKind) -> RuntimeState {
        self.runtime(kind).state()
    }

    pub fn stats(&self, kind: StreamKind) -> StreamStats {
        self.runtime(kind).stats()
    }

    pub fn media_attributes(&self, kind: StreamKind) -> Option<Vec<String>> {
        self.runtime(kind).media_attributes()
    }
}

impl Default for MediaRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MediaRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::frame::FrameOutcome;

    #[test]
    fn submit_without_address_releases_synchronously() {
        let runtime = MediaRuntime::new();
        let (frame, rx) = Frame::with_completion(vec![0u8; 1024]);
        assert!(!runtime.submit_frame(StreamKind::Video, frame));
        assert_eq!(rx.try_outcome(), Some(FrameOutcome::Rejected));
        assert!(matches!(runtime.start(StreamKind::Video), Err(RuntimeError::NotConfigured)));
    }

    #[test]
    fn invalid_address_leaves_previous() {
        let runtime = MediaRuntime::new();
        runtime.set_signalling_address(b"127.0.0.1:5004").unwrap();
        assert!(runtime.set_signalling_address(b"").is_err());
        assert_eq!(
            runtime.signalling_address().unwrap().as_str(),
            Some("127.0.0.1:5004")
        );
    }

    #[test]
    fn parameter_sets_validated() {
        let runtime = MediaRuntime::new();
        assert!(runtime.submit_parameter_sets(&[], &[0x67]).unwrap_err().is_invalid_argument());
        assert!(runtime.submit_parameter_sets(&[0x68], &[0x67]).is_ok());
    }

    #[test]
    fn fresh_runtime_idle() {
        let runtime = MediaRuntime::default();
        for kind in StreamKind::ALL {
            assert_eq!(runtime.state(kind), RuntimeState::Idle);
            assert_eq!(runtime.stats(kind), StreamStats::default());
            assert!(runtime.media_attributes(kind).is_none());
        }
        runtime.shutdown();
    }
}
