//! Media payload formats and RTP packetization.
//!
//! This module provides the [`Packetizer`] trait and the payload formats the
//! runtime ships with. A [`StreamRuntime`](crate::StreamRuntime) owns one
//! packetizer per session and feeds it every admitted frame on its worker
//! thread.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded frame becomes one or more RTP packets. Every packet carries
//! a 12-byte fixed header ([`rtp::RtpHeader`]) with:
//!
//! - **Sequence number** (16-bit, wrapping): reordering and loss detection.
//! - **Timestamp** (32-bit): media clock; all packets of a frame share it.
//! - **SSRC** (32-bit): random per session.
//! - **Marker bit**: codec-specific frame boundary flag.
//!
//! ## Payload formats
//!
//! | Kind  | Module    | RFC                                                  |
//! |-------|-----------|------------------------------------------------------|
//! | Video | [`h264`]  | [RFC 6184](https://tools.ietf.org/html/rfc6184)      |
//! | Audio | [`audio`] | one frame per packet, [RFC 3551](https://tools.ietf.org/html/rfc3551) |

pub mod audio;
pub mod h264;
pub mod rtp;

use crate::StreamKind;
use crate::config::StreamConfig;
use crate::params::ParameterSet;

/// Payload-format-specific RTP packetizer.
///
/// The generic header is handled by [`rtp::RtpHeader`]; implementations
/// compose it rather than reimplementing header serialization.
pub trait Packetizer: Send {
    /// Turn one encoded frame into complete RTP packets, then advance the
    /// RTP timestamp by `timestamp_increment`.
    ///
    /// An empty result means the frame carried nothing sendable.
    fn packetize(&mut self, frame: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>>;

    /// Encoding name for `a=rtpmap` (e.g. `"H264"`).
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number (RFC 3551).
    fn payload_type(&self) -> u8;

    /// SSRC stamped on every packet of this session.
    fn ssrc(&self) -> u32;

    /// SDP media-level attributes for the external negotiation layer.
    ///
    /// `a=rtpmap` always comes first; clients parse sequentially and
    /// `a=fmtp` refers back to it.
    fn media_attributes(&self) -> Vec<String>;

    /// Out-of-band codec configuration. Formats without one ignore it.
    fn set_parameter_sets(&mut self, _params: &ParameterSet) {}
}

/// Fresh packetizer for a new session of `kind`, with a random SSRC.
pub fn packetizer_for(kind: StreamKind, config: &StreamConfig) -> Box<dyn Packetizer> {
    match kind {
        StreamKind::Video => Box::new(
            h264::H264Packetizer::randomized(config.payload_type)
                .with_mtu(config.mtu)
                .with_bitstream(config.bitstream),
        ),
        StreamKind::Audio => Box::new(audio::AudioPacketizer::randomized(config.payload_type)),
    }
}
