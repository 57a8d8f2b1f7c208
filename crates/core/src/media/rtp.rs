/// Size of the RTP fixed header with no CSRCs or extension.
pub const RTP_HEADER_LEN: usize = 12;

/// Sender-side RTP fixed header state (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// One instance per outbound session, owned by that session's packetizer.
/// Sequence number and timestamp both wrap. Version is always 2; padding,
/// extension and CSRC count are always 0.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl RtpHeader {
    /// Deterministic state: sequence and timestamp start at zero.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self::with_initial(pt, ssrc, 0, 0)
    }

    pub fn with_initial(pt: u8, ssrc: u32, sequence: u16, timestamp: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            sequence,
            timestamp,
            "RTP header state created"
        );
        Self {
            pt: pt & 0x7f,
            ssrc,
            sequence,
            timestamp,
        }
    }

    /// Random SSRC, sequence and timestamp origin (RFC 3550 §5.1, §8.1).
    pub fn randomized(pt: u8) -> Self {
        Self::with_initial(
            pt,
            rand::random::<u32>(),
            rand::random::<u16>(),
            rand::random::<u32>(),
        )
    }

    /// Sequence number the next [`write`](Self::write) will use.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Timestamp stamped on packets of the current frame.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Serialize a fixed header and advance the sequence number.
    ///
    /// `marker` flags the last packet of a video access unit (RFC 6184 §5.1)
    /// or the first packet of an audio talkspurt (RFC 3551 §4.1).
    pub fn write(&mut self, marker: bool) -> [u8; RTP_HEADER_LEN] {
        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = 2 << 6;
        header[1] = ((marker as u8) << 7) | self.pt;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    /// Build a whole packet: header followed by `parts` in order.
    pub fn packet(&mut self, marker: bool, parts: &[&[u8]]) -> Vec<u8> {
        let payload_len: usize = parts.iter().map(|p| p.len()).sum();
        let mut packet = Vec::with_capacity(RTP_HEADER_LEN + payload_len);
        packet.extend_from_slice(&self.write(marker));
        for part in parts {
            packet.extend_from_slice(part);
        }
        packet
    }

    /// Move the media clock forward by one frame duration.
    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment);
    }
}

/// Fields read back from a serialized RTP fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacketHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpPacketHeader {
    /// Parse the fixed header of `packet`. `None` if shorter than 12 bytes.
    pub fn parse(packet: &[u8]) -> Option<Self> {
        if packet.len() < RTP_HEADER_LEN {
            return None;
        }
        Some(Self {
            version: packet[0] >> 6,
            padding: packet[0] & 0x20 != 0,
            extension: packet[0] & 0x10 != 0,
            csrc_count: packet[0] & 0x0f,
            marker: packet[1] & 0x80 != 0,
            payload_type: packet[1] & 0x7f,
            sequence: u16::from_be_bytes([packet[2], packet[3]]),
            timestamp: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            ssrc: u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header() -> RtpHeader {
        RtpHeader::new(96, 0xAABBCCDD)
    }

    #[test]
    fn fixed_fields() {
        let mut h = make_header();
        let parsed = RtpPacketHeader::parse(&h.write(false)).unwrap();
        assert_eq!(parsed.version, 2);
        assert!(!parsed.padding);
        assert!(!parsed.extension);
        assert_eq!(parsed.csrc_count, 0);
        assert_eq!(parsed.payload_type, 96);
        assert_eq!(parsed.ssrc, 0xAABBCCDD);
    }

    #[test]
    fn marker_bit() {
        let mut h = make_header();
        assert_eq!(h.write(false)[1] & 0x80, 0);
        assert_eq!(h.write(true)[1] & 0x80, 0x80);
    }

    #[test]
    fn sequence_increments_and_wraps() {
        let mut h = RtpHeader::with_initial(96, 1, u16::MAX, 0);
        let first = RtpPacketHeader::parse(&h.write(false)).unwrap();
        let second = RtpPacketHeader::parse(&h.write(false)).unwrap();
        assert_eq!(first.sequence, u16::MAX);
        assert_eq!(second.sequence, 0);
        assert_eq!(h.sequence(), 1);
    }

    #[test]
    fn timestamp_advances_and_wraps() {
        let mut h = RtpHeader::with_initial(96, 1, 0, u32::MAX - 1000);
        h.advance_timestamp(3000);
        assert_eq!(h.timestamp(), 1999);
        let parsed = RtpPacketHeader::parse(&h.write(true)).unwrap();
        assert_eq!(parsed.timestamp, 1999);
    }

    #[test]
    fn payload_type_masked_to_seven_bits() {
        let mut h = RtpHeader::new(0xff, 1);
        let parsed = RtpPacketHeader::parse(&h.write(true)).unwrap();
        assert_eq!(parsed.payload_type, 0x7f);
        assert!(parsed.marker);
    }

    #[test]
    fn packet_concatenates_parts() {
        let mut h = make_header();
        let packet = h.packet(true, &[&[0x7c, 0x85], &[1, 2, 3]]);
        assert_eq!(packet.len(), RTP_HEADER_LEN + 5);
        assert_eq!(&packet[RTP_HEADER_LEN..], &[0x7c, 0x85, 1, 2, 3]);
    }

    #[test]
    fn parse_short_packet() {
        assert!(RtpPacketHeader::parse(&[0x80; 11]).is_none());
    }

    #[test]
    fn randomized_ssrc_differs() {
        let h1 = RtpHeader::randomized(96);
        let h2 = RtpHeader::randomized(96);
        assert_ne!(h1.ssrc, h2.ssrc);
    }
}
