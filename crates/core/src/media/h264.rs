use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::Packetizer;
use super::rtp::RtpHeader;
use crate::params::ParameterSet;

const DEFAULT_MTU: usize = 1400;

const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_FU_A: u8 = 28;

/// How NAL units are delimited inside a submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Bitstream {
    /// `00 00 01` / `00 00 00 01` start codes (ITU-T H.264 Annex B).
    AnnexB,
    /// 4-byte big-endian length prefixes, as emitted by VideoToolbox and
    /// MP4 muxers (ISO/IEC 14496-15).
    Avcc,
}

/// H.264 RTP packetizer (RFC 6184, packetization-mode 1).
///
/// - **Single NAL Unit** (§5.6): NALs up to the MTU travel as-is after the
///   12-byte RTP header.
/// - **FU-A** (§5.8): larger NALs are split. Each fragment carries a
///   2-byte FU indicator + FU header:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]
///   FU header:     [S|E|R|NAL_Type]
///   ```
///
/// The marker bit is set on the very last packet of the access unit.
///
/// ## Parameter sets
///
/// SPS/PPS are learned two ways: captured from in-band NALs, or handed
/// over out-of-band via [`Packetizer::set_parameter_sets`]. Once known, an
/// IDR access unit that arrives without its own SPS is sent with the stored
/// SPS and PPS in front of it, so a receiver joining mid-stream can decode
/// from the next keyframe. They also feed `profile-level-id` and
/// `sprop-parameter-sets` in the SDP `a=fmtp` line (RFC 6184 §8.1).
#[derive(Debug)]
pub struct H264Packetizer {
    header: RtpHeader,
    mtu: usize,
    bitstream: H264Bitstream,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H264Packetizer {
    /// Deterministic header state, Annex B input.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self::with_header(RtpHeader::new(pt, ssrc))
    }

    /// Random SSRC, sequence and timestamp origin.
    pub fn randomized(pt: u8) -> Self {
        Self::with_header(RtpHeader::randomized(pt))
    }

    fn with_header(header: RtpHeader) -> Self {
        Self {
            header,
            mtu: DEFAULT_MTU,
            bitstream: H264Bitstream::AnnexB,
            sps: None,
            pps: None,
        }
    }

    /// Payload bytes per packet before FU-A kicks in. Clamped to at least 3.
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu.max(3);
        self
    }

    pub fn with_bitstream(mut self, bitstream: H264Bitstream) -> Self {
        self.bitstream = bitstream;
        self
    }

    pub fn sps(&self) -> Option<&[u8]> {
        self.sps.as_deref()
    }

    pub fn pps(&self) -> Option<&[u8]> {
        self.pps.as_deref()
    }

    /// profile_idc, constraint flags and level_idc: SPS bytes 1..4.
    fn profile_level_id(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        (sps.len() >= 4).then(|| format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
    }

    fn sprop_parameter_sets(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        let pps = self.pps.as_deref()?;
        Some(format!(
            "{},{}",
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        ))
    }

    /// Packetize a single NAL unit into one or more RTP packets.
    fn packetize_nal(&mut self, nal_unit: &[u8], is_last_nal: bool) -> Vec<Vec<u8>> {
        if nal_unit.is_empty() {
            return Vec::new();
        }

        if nal_unit.len() <= self.mtu {
            return vec![self.header.packet(is_last_nal, &[nal_unit])];
        }

        let nal_header = nal_unit[0];
        let nal_type = nal_header & 0x1f;
        let fu_indicator = (nal_header & 0x60) | NAL_TYPE_FU_A;
        let payload = &nal_unit[1..];

        let chunks: Vec<&[u8]> = payload.chunks(self.mtu - 2).collect();
        let count = chunks.len();
        let mut packets = Vec::with_capacity(count);

        for (i, chunk) in chunks.into_iter().enumerate() {
            let first = i == 0;
            let last = i + 1 == count;
            let fu_header = ((first as u8) << 7) | ((last as u8) << 6) | nal_type;
            packets.push(
                self.header
                    .packet(is_last_nal && last, &[&[fu_indicator, fu_header], chunk]),
            );
        }

        tracing::trace!(
            nal_type,
            nal_size = nal_unit.len(),
            fragments = packets.len(),
            "FU-A fragmented NAL unit"
        );

        packets
    }

    /// Remember in-band SPS/PPS so later keyframes and SDP can use them.
    fn capture_parameter_sets(&mut self, nal_units: &[&[u8]]) {
        for nal in nal_units {
            match nal_type(nal) {
                Some(NAL_TYPE_SPS) if self.sps.as_deref() != Some(*nal) => {
                    tracing::debug!(len = nal.len(), "H.264 SPS captured from bitstream");
                    self.sps = Some(nal.to_vec());
                }
                Some(NAL_TYPE_PPS) if self.pps.as_deref() != Some(*nal) => {
                    tracing::debug!(len = nal.len(), "H.264 PPS captured from bitstream");
                    self.pps = Some(nal.to_vec());
                }
                _ => {}
            }
        }
    }

    /// Split a frame into NAL units according to the configured bitstream.
    pub fn split_nal_units<'a>(&self, data: &'a [u8]) -> Vec<&'a [u8]> {
        match self.bitstream {
            H264Bitstream::AnnexB => Self::extract_nal_units(data),
            H264Bitstream::Avcc => Self::extract_avcc_nal_units(data),
        }
    }

    /// Extract NAL units from an Annex B bitstream.
    ///
    /// Handles both 4-byte `00 00 00 01` and 3-byte `00 00 01` start codes,
    /// mixed within one buffer. Bytes before the first start code are ignored.
    pub fn extract_nal_units(data: &[u8]) -> Vec<&[u8]> {
        let mut nal_units = Vec::new();
        let mut i = 0usize;

        // (nal_data_start_index, start_code_length)
        let mut start_entries: Vec<(usize, usize)> = Vec::new();

        while i < data.len() {
            if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
                start_entries.push((i + 4, 4));
                i += 4;
            } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
                start_entries.push((i + 3, 3));
                i += 3;
            } else {
                i += 1;
            }
        }

        for (idx, &(start, _)) in start_entries.iter().enumerate() {
            let end = match start_entries.get(idx + 1) {
                Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
                None => data.len(),
            };

            if start < end {
                nal_units.push(&data[start..end]);
            }
        }

        nal_units
    }

    /// Extract NAL units from a 4-byte length-prefixed (AVCC) buffer.
    ///
    /// Parsing stops at the first prefix that overruns the buffer; the NALs
    /// before it are still returned.
    pub fn extract_avcc_nal_units(data: &[u8]) -> Vec<&[u8]> {
        let mut nal_units = Vec::new();
        let mut rest = data;

        while rest.len() >= 4 {
            let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            let body = &rest[4..];
            if len > body.len() {
                tracing::warn!(
                    declared = len,
                    available = body.len(),
                    "truncated AVCC NAL unit"
                );
                break;
            }
            if len > 0 {
                nal_units.push(&body[..len]);
            }
            rest = &body[len..];
        }

        nal_units
    }
}

fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1f)
}

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, frame: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>> {
        let nal_units = self.split_nal_units(frame);
        self.capture_parameter_sets(&nal_units);

        let has_idr = nal_units.iter().any(|n| nal_type(n) == Some(NAL_TYPE_IDR));
        let has_sps = nal_units.iter().any(|n| nal_type(n) == Some(NAL_TYPE_SPS));
        let prefix = match (&self.sps, &self.pps) {
            (Some(sps), Some(pps)) if has_idr && !has_sps => vec![sps.clone(), pps.clone()],
            _ => Vec::new(),
        };

        let units: Vec<&[u8]> = prefix
            .iter()
            .map(Vec::as_slice)
            .chain(nal_units.iter().copied())
            .collect();

        let mut packets = Vec::new();
        for (i, nal) in units.iter().enumerate() {
            let is_last = i + 1 == units.len();
            packets.append(&mut self.packetize_nal(nal, is_last));
        }

        tracing::trace!(
            nal_count = units.len(),
            injected_parameter_sets = !prefix.is_empty(),
            rtp_packets = packets.len(),
            frame_bytes = frame.len(),
            seq = self.header.sequence(),
            ts = self.header.timestamp(),
            "frame packetized"
        );

        self.header.advance_timestamp(timestamp_increment);
        packets
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }

    /// 90 kHz clock rate per RFC 6184 §8.1.
    fn clock_rate(&self) -> u32 {
        90_000
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    /// - `a=rtpmap:<pt> H264/90000`
    /// - `a=fmtp:<pt> packetization-mode=1[;profile-level-id=...][;sprop-parameter-sets=...]`
    fn media_attributes(&self) -> Vec<String> {
        let mut fmtp = format!("a=fmtp:{} packetization-mode=1", self.header.pt);
        if let Some(pl) = self.profile_level_id() {
            fmtp.push_str(&format!(";profile-level-id={pl}"));
        }
        if let Some(sprop) = self.sprop_parameter_sets() {
            fmtp.push_str(&format!(";sprop-parameter-sets={sprop}"));
        }

        vec![
            format!(
                "a=rtpmap:{} {}/{}",
                self.payload_type(),
                self.codec_name(),
                self.clock_rate()
            ),
            fmtp,
        ]
    }

    fn set_parameter_sets(&mut self, params: &ParameterSet) {
        tracing::debug!(
            sps_len = params.sps().len(),
            pps_len = params.pps().len(),
            "H.264 parameter sets set out-of-band"
        );
        self.sps = Some(params.sps().to_vec());
        self.pps = Some(params.pps().to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::{RTP_HEADER_LEN, RtpPacketHeader};

    const SPS: [u8; 4] = [0x67, 0x42, 0x00, 0x1e];
    const PPS: [u8; 4] = [0x68, 0xce, 0x38, 0x80];

    fn make_packetizer() -> H264Packetizer {
        H264Packetizer::new(96, 0xAABBCCDD)
    }

    fn annexb(nals: &[&[u8]]) -> Vec<u8> {
        nals.iter()
            .flat_map(|nal| [&[0u8, 0, 0, 1][..], *nal].concat())
            .collect()
    }

    fn payload_types(packets: &[Vec<u8>]) -> Vec<u8> {
        packets.iter().map(|p| p[RTP_HEADER_LEN] & 0x1f).collect()
    }

    // --- NAL extraction ---

    #[test]
    fn extract_single_nal_4byte_sc() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0xBB];
        let nals = H264Packetizer::extract_nal_units(&data);
        assert_eq!(nals, vec![&[0x65u8, 0xAA, 0xBB][..]]);
    }

    #[test]
    fn extract_single_nal_3byte_sc() {
        let data = [0, 0, 1, 0x67, 0x42, 0x00];
        let nals = H264Packetizer::extract_nal_units(&data);
        assert_eq!(nals, vec![&[0x67u8, 0x42, 0x00][..]]);
    }

    #[test]
    fn extract_mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        let nals = H264Packetizer::extract_nal_units(&data);
        assert_eq!(nals, vec![&[0x67u8, 0x42][..], &[0x68u8, 0xCE][..]]);
    }

    #[test]
    fn extract_no_start_code() {
        assert!(H264Packetizer::extract_nal_units(&[]).is_empty());
        assert!(H264Packetizer::extract_nal_units(&[0xFF, 0xFE]).is_empty());
    }

    #[test]
    fn extract_avcc() {
        let data = [0, 0, 0, 2, 0x67, 0x42, 0, 0, 0, 3, 0x65, 0x88, 0x00];
        let nals = H264Packetizer::extract_avcc_nal_units(&data);
        assert_eq!(nals, vec![&[0x67u8, 0x42][..], &[0x65u8, 0x88, 0x00][..]]);
    }

    #[test]
    fn extract_avcc_truncated_keeps_prefix() {
        let data = [0, 0, 0, 1, 0x09, 0, 0, 0, 9, 0x65];
        let nals = H264Packetizer::extract_avcc_nal_units(&data);
        assert_eq!(nals, vec![&[0x09u8][..]]);
    }

    // --- Packetization ---

    #[test]
    fn small_nal_single_packet() {
        let mut p = make_packetizer();
        let packets = p.packetize_nal(&[0x65, 0xAA, 0xBB, 0xCC], true);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), RTP_HEADER_LEN + 4);
        assert_eq!(packets[0][1] & 0x80, 0x80);
    }

    #[test]
    fn large_nal_fragmented() {
        let mut p = make_packetizer();
        let mut nal = vec![0x65];
        nal.extend(vec![0xAA; DEFAULT_MTU + 500]);
        let packets = p.packetize_nal(&nal, true);
        assert_eq!(packets.len(), 2);

        assert_eq!(packets[0][12] & 0x1f, NAL_TYPE_FU_A);
        assert_eq!(packets[0][12] & 0x60, 0x60, "NRI carried over");
        assert_eq!(packets[0][13], 0x80 | 5, "start bit + original type");
        assert_eq!(packets[0][1] & 0x80, 0, "no marker mid-NAL");

        let last = packets.last().unwrap();
        assert_eq!(last[13], 0x40 | 5, "end bit + original type");
        assert_eq!(last[1] & 0x80, 0x80);

        let carried: usize = packets.iter().map(|p| p.len() - RTP_HEADER_LEN - 2).sum();
        assert_eq!(carried, nal.len() - 1);
    }

    #[test]
    fn fragments_respect_mtu() {
        let mut p = make_packetizer().with_mtu(100);
        let mut nal = vec![0x41];
        nal.extend(vec![0x11; 1000]);
        for packet in p.packetize_nal(&nal, false) {
            assert!(packet.len() - RTP_HEADER_LEN <= 100);
            assert_eq!(packet[1] & 0x80, 0);
        }
    }

    #[test]
    fn empty_nal_no_packets() {
        let mut p = make_packetizer();
        assert!(p.packetize_nal(&[], true).is_empty());
    }

    #[test]
    fn frame_shares_timestamp_and_marks_last_packet() {
        let mut p = make_packetizer();
        let frame = annexb(&[&[0x06, 0x05], &[0x41, 0x9a, 0x00]]);
        let packets = p.packetize(&frame, 3000);
        assert_eq!(packets.len(), 2);

        let first = RtpPacketHeader::parse(&packets[0]).unwrap();
        let second = RtpPacketHeader::parse(&packets[1]).unwrap();
        assert_eq!(first.timestamp, second.timestamp);
        assert!(!first.marker);
        assert!(second.marker);
        assert_eq!(second.sequence, first.sequence.wrapping_add(1));

        let next = p.packetize(&frame, 3000);
        let third = RtpPacketHeader::parse(&next[0]).unwrap();
        assert_eq!(third.timestamp, first.timestamp.wrapping_add(3000));
    }

    #[test]
    fn frame_without_nal_units_yields_nothing() {
        let mut p = make_packetizer();
        assert!(p.packetize(&[0xde, 0xad], 3000).is_empty());
    }

    #[test]
    fn avcc_frame_packetized() {
        let mut p = make_packetizer().with_bitstream(H264Bitstream::Avcc);
        let frame = [0, 0, 0, 3, 0x41, 0x9a, 0x01];
        let packets = p.packetize(&frame, 3000);
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][RTP_HEADER_LEN..], &[0x41, 0x9a, 0x01]);
    }

    #[test]
    fn out_of_band_parameter_sets_prefix_idr() {
        let mut p = make_packetizer();
        p.set_parameter_sets(&ParameterSet::new(&SPS, &PPS).unwrap());

        let idr = annexb(&[&[0x65, 0x88, 0x00]]);
        let packets = p.packetize(&idr, 3000);
        assert_eq!(payload_types(&packets), vec![7, 8, 5]);
        assert_eq!(packets.iter().filter(|p| p[1] & 0x80 != 0).count(), 1);

        let non_idr = annexb(&[&[0x41, 0x9a]]);
        assert_eq!(payload_types(&p.packetize(&non_idr, 3000)), vec![1]);
    }

    #[test]
    fn in_band_sps_not_duplicated() {
        let mut p = make_packetizer();
        p.set_parameter_sets(&ParameterSet::new(&SPS, &PPS).unwrap());

        let frame = annexb(&[&SPS, &PPS, &[0x65, 0x88]]);
        assert_eq!(payload_types(&p.packetize(&frame, 3000)), vec![7, 8, 5]);
    }

    #[test]
    fn in_band_capture_feeds_later_idr() {
        let mut p = make_packetizer();
        p.packetize(&annexb(&[&SPS, &PPS, &[0x65, 0x88]]), 3000);
        assert_eq!(p.sps(), Some(&SPS[..]));
        assert_eq!(p.pps(), Some(&PPS[..]));

        let idr_only = annexb(&[&[0x65, 0x99]]);
        assert_eq!(payload_types(&p.packetize(&idr_only, 3000)), vec![7, 8, 5]);
    }

    #[test]
    fn media_attributes_before_and_after_parameter_sets() {
        let mut p = make_packetizer();
        let attrs = p.media_attributes();
        assert_eq!(attrs[0], "a=rtpmap:96 H264/90000");
        assert_eq!(attrs[1], "a=fmtp:96 packetization-mode=1");

        p.set_parameter_sets(&ParameterSet::new(&SPS, &PPS).unwrap());
        let fmtp = &p.media_attributes()[1];
        assert!(fmtp.contains("profile-level-id=42001e"));
        assert!(fmtp.contains(&format!(
            "sprop-parameter-sets={},{}",
            BASE64_STANDARD.encode(SPS),
            BASE64_STANDARD.encode(PPS)
        )));
    }

    #[test]
    fn codec_metadata() {
        let p = make_packetizer();
        assert_eq!(p.codec_name(), "H264");
        assert_eq!(p.clock_rate(), 90_000);
        assert_eq!(p.payload_type(), 96);
        assert_eq!(p.ssrc(), 0xAABBCCDD);
    }
}
