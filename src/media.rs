//! Media Packet Framer
//!
//! Builds and parses the header in front of every packet on a media
//! transport channel. It is the RTP fixed header (RFC 3550 §5.1) followed by
//! an optional codec specific header, for SBC one octet of fragmentation
//! flags and frame count.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      CSRC list (CC entries)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The framer keeps no state: sequence numbers and timestamps are supplied
//! by the caller. The configured codec decides whether a codec header
//! follows the RTP header, see [`frame`] and [`parse_frame`].

use crate::codec::CodecType;
use crate::constants::MAX_CSRC_NUM;
use heapless::Vec;

/// RTP version carried by every media packet
pub const RTP_VERSION: u8 = 2;

/// Size of the RTP fixed header without contributing sources
pub const RTP_FIXED_HEADER_SIZE: usize = 12;

/// Size of the SBC media payload header
pub const SBC_MEDIA_HEADER_SIZE: usize = 1;

/// Most packets one SBC frame can be split across, bounded by the 4-bit count
pub const MAX_SBC_FRAGMENTS: usize = 15;

/// Media packet parsing and building errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MediaError {
    /// Packet ends inside the header
    Truncated,
    /// Version field is not 2
    BadVersion(u8),
    /// Padding count larger than the payload
    BadPadding,
    /// More contributing sources than the header can carry
    TooManySources,
    /// Output buffer too small
    BufferTooSmall,
    /// Codec header given for a codec without one, or missing for SBC
    CodecHeaderMismatch,
    /// Frame needs more fragments than the SBC header can count
    TooManyFragments,
}

impl core::fmt::Display for MediaError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Truncated => write!(f, "Media packet truncated"),
            Self::BadVersion(version) => write!(f, "Unsupported RTP version {version}"),
            Self::BadPadding => write!(f, "Bad media packet padding"),
            Self::TooManySources => write!(f, "Too many contributing sources"),
            Self::BufferTooSmall => write!(f, "Media packet buffer too small"),
            Self::CodecHeaderMismatch => write!(f, "Codec header does not match the codec"),
            Self::TooManyFragments => write!(f, "Too many SBC fragments"),
        }
    }
}

/// RTP-style media packet header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacketHeader {
    /// RTP version, always 2 on packets this crate builds
    pub version: u8,
    /// Packet carries padding octets at its end
    pub padding: bool,
    /// A header extension follows the CSRC list
    pub extension: bool,
    /// Marker bit, profile defined
    pub marker: bool,
    /// 7-bit payload type
    pub payload_type: u8,
    /// Sequence number, wraps at 16 bits
    pub sequence_number: u16,
    /// Media timestamp
    pub timestamp: u32,
    /// Synchronization source
    pub ssrc: u32,
    /// Contributing sources
    pub csrc: Vec<u32, MAX_CSRC_NUM>,
}

impl MediaPacketHeader {
    /// Header with no padding, extension, marker or contributing sources
    #[must_use]
    pub const fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type: payload_type & 0x7F,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
        }
    }

    /// Encoded size in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        RTP_FIXED_HEADER_SIZE + 4 * self.csrc.len()
    }

    /// Append the encoded header to `out`
    ///
    /// # Errors
    /// Returns [`MediaError::BufferTooSmall`] if `out` has no room left
    pub fn encode<const N: usize>(&self, out: &mut Vec<u8, N>) -> Result<(), MediaError> {
        let first = (self.version << 6)
            | (u8::from(self.padding) << 5)
            | (u8::from(self.extension) << 4)
            | (self.csrc.len() as u8 & 0x0F);
        let second = (u8::from(self.marker) << 7) | (self.payload_type & 0x7F);

        let too_small = |()| MediaError::BufferTooSmall;
        out.extend_from_slice(&[first, second]).map_err(too_small)?;
        out.extend_from_slice(&self.sequence_number.to_be_bytes())
            .map_err(too_small)?;
        out.extend_from_slice(&self.timestamp.to_be_bytes())
            .map_err(too_small)?;
        out.extend_from_slice(&self.ssrc.to_be_bytes())
            .map_err(too_small)?;
        for csrc in &self.csrc {
            out.extend_from_slice(&csrc.to_be_bytes()).map_err(too_small)?;
        }
        Ok(())
    }

    /// Parse a media packet into its header and payload
    ///
    /// A header extension is skipped and padding octets are stripped from
    /// the returned payload; payload bytes are not interpreted.
    ///
    /// # Errors
    /// Returns a [`MediaError`] for truncated packets, versions other than 2
    /// and inconsistent padding
    pub fn parse(packet: &[u8]) -> Result<(Self, &[u8]), MediaError> {
        if packet.len() < RTP_FIXED_HEADER_SIZE {
            return Err(MediaError::Truncated);
        }
        let version = packet[0] >> 6;
        if version != RTP_VERSION {
            return Err(MediaError::BadVersion(version));
        }
        let padding = packet[0] & 0x20 != 0;
        let extension = packet[0] & 0x10 != 0;
        let csrc_count = usize::from(packet[0] & 0x0F);

        let mut offset = RTP_FIXED_HEADER_SIZE;
        let csrc_end = offset + 4 * csrc_count;
        if packet.len() < csrc_end {
            return Err(MediaError::Truncated);
        }
        let mut csrc = Vec::new();
        for chunk in packet[offset..csrc_end].chunks_exact(4) {
            csrc.push(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .map_err(|_| MediaError::TooManySources)?;
        }
        offset = csrc_end;

        if extension {
            // 16-bit profile field, 16-bit length in 32-bit words
            let words = packet
                .get(offset + 2..offset + 4)
                .map(|len| usize::from(u16::from_be_bytes([len[0], len[1]])))
                .ok_or(MediaError::Truncated)?;
            offset += 4 + 4 * words;
            if packet.len() < offset {
                return Err(MediaError::Truncated);
            }
        }

        let mut end = packet.len();
        if padding {
            let count = usize::from(packet[end - 1]);
            if count == 0 || count > end - offset {
                return Err(MediaError::BadPadding);
            }
            end -= count;
        }

        let header = Self {
            version,
            padding,
            extension,
            marker: packet[1] & 0x80 != 0,
            payload_type: packet[1] & 0x7F,
            sequence_number: u16::from_be_bytes([packet[2], packet[3]]),
            timestamp: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            ssrc: u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]),
            csrc,
        };
        Ok((header, &packet[offset..end]))
    }
}

/// SBC media payload header, one octet in front of the SBC frames
///
/// ```text
///  7   6   5   4   3   2   1   0
/// +---+---+---+---+---------------+
/// | F | S | L |RFA| frame count   |
/// +---+---+---+---+---------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcMediaHeader {
    /// Packet carries a fragment of one SBC frame
    pub fragmented: bool,
    /// First fragment of the frame
    pub starting: bool,
    /// Last fragment of the frame
    pub last: bool,
    /// Whole frames in the packet, or fragments left including this one
    pub frame_count: u8,
}

impl SbcMediaHeader {
    /// Header for a packet of whole, unfragmented frames
    #[must_use]
    pub const fn frames(frame_count: u8) -> Self {
        Self {
            fragmented: false,
            starting: false,
            last: false,
            frame_count: frame_count & 0x0F,
        }
    }

    /// Header for fragment `index` of a frame split across `count` packets
    #[must_use]
    pub const fn fragment(index: u8, count: u8) -> Self {
        Self {
            fragmented: true,
            starting: index == 0,
            last: index.saturating_add(1) == count,
            frame_count: count.saturating_sub(index) & 0x0F,
        }
    }

    /// Encode the header octet
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        ((self.fragmented as u8) << 7)
            | ((self.starting as u8) << 6)
            | ((self.last as u8) << 5)
            | (self.frame_count & 0x0F)
    }

    /// Decode the header octet
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self {
            fragmented: byte & 0x80 != 0,
            starting: byte & 0x40 != 0,
            last: byte & 0x20 != 0,
            frame_count: byte & 0x0F,
        }
    }
}

/// Number of codec header octets between the RTP header and the payload
#[must_use]
pub const fn codec_header_size(codec: CodecType) -> usize {
    match codec {
        CodecType::Sbc => SBC_MEDIA_HEADER_SIZE,
        _ => 0,
    }
}

/// Parsed media packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame<'a> {
    /// RTP header
    pub header: MediaPacketHeader,
    /// SBC media payload header, present when the stream uses SBC
    pub sbc: Option<SbcMediaHeader>,
    /// Codec payload, padding removed
    pub payload: &'a [u8],
}

/// Append a complete media packet for `codec` to `out`
///
/// SBC packets carry `sbc` between the RTP header and the payload; other
/// codecs have no codec header and take `None`.
///
/// # Errors
/// Returns [`MediaError::CodecHeaderMismatch`] if `sbc` does not fit `codec`
/// and [`MediaError::BufferTooSmall`] if `out` has no room left
pub fn frame<const N: usize>(
    header: &MediaPacketHeader,
    codec: CodecType,
    sbc: Option<SbcMediaHeader>,
    payload: &[u8],
    out: &mut Vec<u8, N>,
) -> Result<(), MediaError> {
    let codec_header = match (codec, sbc) {
        (CodecType::Sbc, Some(sbc)) => Some(sbc.to_byte()),
        (CodecType::Sbc, None) | (_, Some(_)) => return Err(MediaError::CodecHeaderMismatch),
        (_, None) => None,
    };
    header.encode(out)?;
    if let Some(byte) = codec_header {
        out.push(byte).map_err(|_| MediaError::BufferTooSmall)?;
    }
    out.extend_from_slice(payload)
        .map_err(|()| MediaError::BufferTooSmall)
}

/// Parse a media packet of a stream using `codec`
///
/// # Errors
/// See [`MediaPacketHeader::parse`]; an SBC packet without its payload
/// header is [`MediaError::Truncated`]
pub fn parse_frame(packet: &[u8], codec: CodecType) -> Result<MediaFrame<'_>, MediaError> {
    let (header, payload) = MediaPacketHeader::parse(packet)?;
    if codec != CodecType::Sbc {
        return Ok(MediaFrame {
            header,
            sbc: None,
            payload,
        });
    }
    let (&first, frames) = payload.split_first().ok_or(MediaError::Truncated)?;
    Ok(MediaFrame {
        header,
        sbc: Some(SbcMediaHeader::from_byte(first)),
        payload: frames,
    })
}

/// Splits one SBC frame into packet payloads of at most `max_payload` bytes
///
/// A frame that fits is yielded once with an unfragmented header counting
/// one frame.
#[derive(Debug, Clone)]
pub struct SbcFragments<'a> {
    frame: &'a [u8],
    max_payload: usize,
    count: u8,
    index: u8,
}

impl<'a> SbcFragments<'a> {
    /// Plan the fragments of `frame`
    ///
    /// # Errors
    /// Returns [`MediaError::BufferTooSmall`] if `max_payload` is zero,
    /// [`MediaError::Truncated`] for an empty frame and
    /// [`MediaError::TooManyFragments`] past [`MAX_SBC_FRAGMENTS`]
    pub fn new(frame: &'a [u8], max_payload: usize) -> Result<Self, MediaError> {
        if max_payload == 0 {
            return Err(MediaError::BufferTooSmall);
        }
        if frame.is_empty() {
            return Err(MediaError::Truncated);
        }
        let count = frame.len().div_ceil(max_payload);
        if count > MAX_SBC_FRAGMENTS {
            return Err(MediaError::TooManyFragments);
        }
        Ok(Self {
            frame,
            max_payload,
            count: count as u8,
            index: 0,
        })
    }

    /// Number of packets the frame takes
    #[must_use]
    pub const fn count(&self) -> u8 {
        self.count
    }
}

impl<'a> Iterator for SbcFragments<'a> {
    type Item = (SbcMediaHeader, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        let start = usize::from(self.index) * self.max_payload;
        let end = (start + self.max_payload).min(self.frame.len());
        let header = if self.count == 1 {
            SbcMediaHeader::frames(1)
        } else {
            SbcMediaHeader::fragment(self.index, self.count)
        };
        self.index += 1;
        Some((header, &self.frame[start..end]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut header = MediaPacketHeader::new(96, 0x1234, 0xDEAD_BEEF, 0xAABB_CCDD);
        header.marker = true;
        let mut bytes = Vec::<u8, 64>::new();
        header.encode(&mut bytes).unwrap();

        assert_eq!(bytes.len(), RTP_FIXED_HEADER_SIZE);
        assert_eq!(bytes[0], 0x80);
        assert_eq!(bytes[1], 0x80 | 96);
        assert_eq!(&bytes[2..4], &[0x12, 0x34]);
        assert_eq!(&bytes[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);

        let (parsed, payload) = MediaPacketHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_contributing_sources() {
        let mut header = MediaPacketHeader::new(96, 1, 2, 3);
        header.csrc.push(0x0102_0304).unwrap();
        header.csrc.push(0x0506_0708).unwrap();
        let mut bytes = Vec::<u8, 64>::new();
        header.encode(&mut bytes).unwrap();
        bytes.extend_from_slice(&[0xAB, 0xCD]).unwrap();

        assert_eq!(bytes[0] & 0x0F, 2);
        let (parsed, payload) = MediaPacketHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.csrc.as_slice(), &[0x0102_0304, 0x0506_0708]);
        assert_eq!(payload, &[0xAB, 0xCD]);
    }

    #[test]
    fn test_sequence_number_wraps_without_error() {
        let header = MediaPacketHeader::new(96, u16::MAX, 0, 1);
        let next = MediaPacketHeader::new(96, header.sequence_number.wrapping_add(1), 0, 1);

        for h in [&header, &next] {
            let mut bytes = Vec::<u8, 16>::new();
            h.encode(&mut bytes).unwrap();
            assert_eq!(MediaPacketHeader::parse(&bytes).unwrap().0, *h);
        }
        assert_eq!(next.sequence_number, 0);
    }

    #[test]
    fn test_parse_rejects_malformed_packets() {
        assert_eq!(
            MediaPacketHeader::parse(&[0x80; 8]),
            Err(MediaError::Truncated)
        );
        assert_eq!(
            MediaPacketHeader::parse(&[0x40; 12]),
            Err(MediaError::BadVersion(1))
        );
        // Two CSRCs announced, none present
        let mut short = [0u8; 12];
        short[0] = 0x82;
        assert_eq!(MediaPacketHeader::parse(&short), Err(MediaError::Truncated));
    }

    #[test]
    fn test_padding_and_extension_are_stripped() {
        let mut packet = [0u8; 24];
        packet[0] = 0x80 | 0x20 | 0x10;
        // Extension: profile 0xBEDE, one word
        packet[12..16].copy_from_slice(&[0xBE, 0xDE, 0x00, 0x01]);
        packet[20] = 0x11;
        packet[21] = 0x22;
        packet[23] = 2;

        let (header, payload) = MediaPacketHeader::parse(&packet).unwrap();
        assert!(header.padding);
        assert!(header.extension);
        assert_eq!(payload, &[0x11, 0x22]);

        packet[23] = 9;
        assert_eq!(MediaPacketHeader::parse(&packet), Err(MediaError::BadPadding));
    }

    #[test]
    fn test_sbc_fragment_flags() {
        let count = 3;
        let headers: [SbcMediaHeader; 3] = [
            SbcMediaHeader::fragment(0, count),
            SbcMediaHeader::fragment(1, count),
            SbcMediaHeader::fragment(2, count),
        ];

        assert!(headers.iter().all(|h| h.fragmented));
        assert!(headers[0].starting && !headers[0].last);
        assert!(!headers[1].starting && !headers[1].last);
        assert!(!headers[2].starting && headers[2].last);
        assert_eq!(
            headers.map(|h| h.frame_count),
            [3, 2, 1]
        );
        assert_eq!(headers[0].to_byte(), 0xC3);
        assert_eq!(headers[2].to_byte(), 0xA1);
        assert_eq!(SbcMediaHeader::from_byte(0xC3), headers[0]);
    }

    #[test]
    fn test_sbc_unfragmented_header() {
        let header = SbcMediaHeader::frames(5);
        assert_eq!(header.to_byte(), 0x05);
        assert!(!SbcMediaHeader::from_byte(0x05).fragmented);
    }

    #[test]
    fn test_sbc_frame_carries_payload_header() {
        let header = MediaPacketHeader::new(96, 7, 640, 1);
        let mut bytes = Vec::<u8, 64>::new();
        frame(
            &header,
            CodecType::Sbc,
            Some(SbcMediaHeader::frames(2)),
            &[0x9C, 0x11],
            &mut bytes,
        )
        .unwrap();
        assert_eq!(bytes.len(), RTP_FIXED_HEADER_SIZE + 3);
        assert_eq!(bytes[RTP_FIXED_HEADER_SIZE], 0x02);

        let parsed = parse_frame(&bytes, CodecType::Sbc).unwrap();
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.sbc, Some(SbcMediaHeader::frames(2)));
        assert_eq!(parsed.payload, &[0x9C, 0x11]);

        // Without SBC the octet is payload
        let raw = parse_frame(&bytes, CodecType::Mpeg24Aac).unwrap();
        assert_eq!(raw.sbc, None);
        assert_eq!(raw.payload.len(), 3);
    }

    #[test]
    fn test_codec_header_must_match_codec() {
        let header = MediaPacketHeader::new(96, 0, 0, 1);
        let mut bytes = Vec::<u8, 64>::new();
        assert_eq!(
            frame(&header, CodecType::Sbc, None, &[0x01], &mut bytes),
            Err(MediaError::CodecHeaderMismatch)
        );
        assert_eq!(
            frame(
                &header,
                CodecType::Mpeg12Audio,
                Some(SbcMediaHeader::frames(1)),
                &[0x01],
                &mut bytes
            ),
            Err(MediaError::CodecHeaderMismatch)
        );
        assert!(bytes.is_empty());
        assert_eq!(
            parse_frame(&[0x80, 96, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1], CodecType::Sbc),
            Err(MediaError::Truncated)
        );
    }

    #[test]
    fn test_sbc_frame_split_into_fragments() {
        let frame = [0xAB; 18];
        let fragments = SbcFragments::new(&frame, 7).unwrap();
        assert_eq!(SbcFragments::count(&fragments), 3);

        let parts: [(SbcMediaHeader, usize); 3] = {
            let mut iter = fragments.map(|(h, chunk)| (h, chunk.len()));
            [
                iter.next().unwrap(),
                iter.next().unwrap(),
                iter.next().unwrap(),
            ]
        };
        assert_eq!(parts[0], (SbcMediaHeader::fragment(0, 3), 7));
        assert_eq!(parts[1], (SbcMediaHeader::fragment(1, 3), 7));
        assert_eq!(parts[2], (SbcMediaHeader::fragment(2, 3), 4));

        let mut whole = SbcFragments::new(&frame, 18).unwrap();
        assert_eq!(whole.next(), Some((SbcMediaHeader::frames(1), &frame[..])));
        assert_eq!(whole.next(), None);

        assert_eq!(
            SbcFragments::new(&[0u8; 16], 1).map(|f| f.count()),
            Err(MediaError::TooManyFragments)
        );
        assert_eq!(
            SbcFragments::new(&frame, 0).map(|f| f.count()),
            Err(MediaError::BufferTooSmall)
        );
    }
}
