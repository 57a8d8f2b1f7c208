//! Runtime configuration.
//!
//! Everything has a `Default` that matches the behaviour a host gets from
//! the C ABI: 64-frame queues, a 5 ms admission wait, three send attempts
//! per packet and a two second drain on stop.

use std::time::Duration;

use crate::StreamKind;
use crate::media::h264::H264Bitstream;
use crate::params::PendingPolicy;

/// Largest UDP payload minus the 12-byte RTP header.
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507 - 12;

/// Default upper bound on a signalling address, in bytes.
pub const DEFAULT_MAX_ADDRESS_LEN: usize = 1024;

/// Top-level configuration for a [`MediaRuntime`](crate::MediaRuntime).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Local address the UDP connector binds before connecting to the peer.
    pub bind_addr: String,
    /// Upper bound on the signalling address length.
    pub max_address_len: usize,
    /// What to do with parameter sets submitted before a listener exists.
    pub pending_parameter_sets: PendingPolicy,
    /// Per-packet send retry policy, shared by both kinds.
    pub retry: RetryPolicy,
    /// Audio stream settings.
    pub audio: StreamConfig,
    /// Video stream settings.
    pub video: StreamConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:0".to_string(),
            max_address_len: DEFAULT_MAX_ADDRESS_LEN,
            pending_parameter_sets: PendingPolicy::Replay,
            retry: RetryPolicy::default(),
            audio: StreamConfig::audio(),
            video: StreamConfig::video(),
        }
    }
}

impl RuntimeConfig {
    /// Settings for one stream kind.
    pub fn stream(&self, kind: StreamKind) -> &StreamConfig {
        match kind {
            StreamKind::Audio => &self.audio,
            StreamKind::Video => &self.video,
        }
    }

    pub fn stream_mut(&mut self, kind: StreamKind) -> &mut StreamConfig {
        match kind {
            StreamKind::Audio => &mut self.audio,
            StreamKind::Video => &mut self.video,
        }
    }
}

/// Settings for a single stream kind.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// RTP payload type (RFC 3551). Dynamic range 96–127.
    pub payload_type: u8,
    /// RTP timestamp advance per submitted frame, in clock ticks.
    ///
    /// 3000 for 30 fps video at 90 kHz; 960 for 20 ms audio at 48 kHz.
    pub timestamp_increment: u32,
    /// Maximum RTP payload size before the packetizer fragments.
    pub mtu: usize,
    /// Bounded frame queue between producers and the worker.
    pub queue_capacity: usize,
    /// How long `submit` may wait for queue space before rejecting.
    pub admission_timeout: Duration,
    /// How long `stop` keeps transmitting queued frames before abandoning them.
    pub drain_timeout: Duration,
    /// Frames longer than this are rejected with `InvalidArgument`.
    pub max_frame_len: usize,
    /// Layout of submitted H.264 frames. Ignored for audio.
    pub bitstream: H264Bitstream,
}

impl StreamConfig {
    pub fn video() -> Self {
        Self {
            payload_type: 96,
            timestamp_increment: 3000,
            mtu: 1400,
            queue_capacity: 64,
            admission_timeout: Duration::from_millis(5),
            drain_timeout: Duration::from_secs(2),
            max_frame_len: 16 * 1024 * 1024,
            bitstream: H264Bitstream::AnnexB,
        }
    }

    pub fn audio() -> Self {
        Self {
            payload_type: 111,
            timestamp_increment: 960,
            mtu: 1400,
            queue_capacity: 64,
            admission_timeout: Duration::from_millis(5),
            drain_timeout: Duration::from_secs(2),
            max_frame_len: MAX_DATAGRAM_PAYLOAD,
            bitstream: H264Bitstream::AnnexB,
        }
    }
}

/// Bounded retry for transient send failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per packet, including the first. Minimum 1.
    pub max_send_attempts: u32,
    /// Sleep before retry `n` is `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_send_attempts: 3,
            retry_backoff: Duration::from_millis(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_send_attempts: 1,
            retry_backoff: Duration::ZERO,
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_send_attempts.max(1)
    }

    pub(crate) fn backoff(&self, retry: u32) -> Duration {
        self.retry_backoff.saturating_mul(retry)
    }
}
