use super::Packetizer;
use super::rtp::RtpHeader;

/// Frame-per-packet audio packetizer for Opus-style codecs (RFC 7587).
///
/// Every submitted frame becomes exactly one RTP packet. The marker bit is
/// set on the first packet of the session only, flagging the start of a
/// talkspurt (RFC 3551 §4.1).
#[derive(Debug)]
pub struct AudioPacketizer {
    header: RtpHeader,
    clock_rate: u32,
    channels: u8,
    started: bool,
}

impl AudioPacketizer {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self::with_header(RtpHeader::new(pt, ssrc))
    }

    pub fn randomized(pt: u8) -> Self {
        Self::with_header(RtpHeader::randomized(pt))
    }

    fn with_header(header: RtpHeader) -> Self {
        Self {
            header,
            clock_rate: 48_000,
            channels: 2,
            started: false,
        }
    }
}

impl Packetizer for AudioPacketizer {
    fn packetize(&mut self, frame: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>> {
        if frame.is_empty() {
            return Vec::new();
        }

        let marker = !self.started;
        self.started = true;
        let packet = self.header.packet(marker, &[frame]);

        tracing::trace!(
            frame_bytes = frame.len(),
            marker,
            seq = self.header.sequence(),
            ts = self.header.timestamp(),
            "audio frame packetized"
        );

        self.header.advance_timestamp(timestamp_increment);
        vec![packet]
    }

    fn codec_name(&self) -> &'static str {
        "opus"
    }

    fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    fn media_attributes(&self) -> Vec<String> {
        vec![format!(
            "a=rtpmap:{} {}/{}/{}",
            self.payload_type(),
            self.codec_name(),
            self.clock_rate,
            self.channels
        )]
    }
}
