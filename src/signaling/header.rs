//! Signaling packet header

use super::{MessageType, PacketType, PduError};
use heapless::Vec;

/// AVDTP Signaling Packet Header
///
/// The header size depends on the packet type: SINGLE packets carry the
/// signal identifier (2 bytes), START packets additionally carry the number
/// of signal packets (3 bytes), CONTINUE and END packets carry only the first
/// octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SignalingHeader {
    /// 4-bit transaction label
    pub transaction_label: u8,
    /// Packet type (fragmentation)
    pub packet_type: PacketType,
    /// Message type
    pub message_type: MessageType,
    /// Number of signal packets, START packets only
    pub packet_count: u8,
    /// Raw signal identifier, zero on CONTINUE and END packets
    pub signal: u8,
}

impl SignalingHeader {
    /// Create a SINGLE packet header
    #[must_use]
    pub const fn single(transaction_label: u8, message_type: MessageType, signal: u8) -> Self {
        Self {
            transaction_label: transaction_label & 0x0F,
            packet_type: PacketType::Single,
            message_type,
            packet_count: 0,
            signal,
        }
    }

    /// Create a START packet header
    #[must_use]
    pub const fn start(
        transaction_label: u8,
        message_type: MessageType,
        signal: u8,
        packet_count: u8,
    ) -> Self {
        Self {
            transaction_label: transaction_label & 0x0F,
            packet_type: PacketType::Start,
            message_type,
            packet_count,
            signal,
        }
    }

    /// Create a CONTINUE or END packet header
    #[must_use]
    pub const fn fragment(
        transaction_label: u8,
        message_type: MessageType,
        last: bool,
    ) -> Self {
        Self {
            transaction_label: transaction_label & 0x0F,
            packet_type: if last {
                PacketType::End
            } else {
                PacketType::Continue
            },
            message_type,
            packet_count: 0,
            signal: 0,
        }
    }

    /// Size of a header of the given packet type in bytes
    #[must_use]
    pub const fn size_of(packet_type: PacketType) -> usize {
        match packet_type {
            PacketType::Single => 2,
            PacketType::Start => 3,
            PacketType::Continue | PacketType::End => 1,
        }
    }

    /// Size of this header in bytes
    #[must_use]
    pub const fn size(&self) -> usize {
        Self::size_of(self.packet_type)
    }

    /// First header octet: label, packet type and message type
    #[must_use]
    pub const fn first_octet(&self) -> u8 {
        (self.transaction_label << 4) | ((self.packet_type as u8) << 2) | self.message_type as u8
    }

    /// Parse a signaling header from the start of a packet
    ///
    /// # Errors
    /// Returns `PduError::TruncatedHeader` if the packet is shorter than the
    /// header its packet type requires
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PduError> {
        let first = *bytes.first().ok_or(PduError::TruncatedHeader)?;
        let packet_type = PacketType::from_bits(first >> 2);
        if bytes.len() < Self::size_of(packet_type) {
            return Err(PduError::TruncatedHeader);
        }

        let (packet_count, signal) = match packet_type {
            PacketType::Single => (0, bytes[1]),
            PacketType::Start => (bytes[1], bytes[2]),
            PacketType::Continue | PacketType::End => (0, 0),
        };

        Ok(Self {
            transaction_label: first >> 4,
            packet_type,
            message_type: MessageType::from_bits(first),
            packet_count,
            signal,
        })
    }

    /// Append the encoded header to `out`
    ///
    /// # Errors
    /// Returns `PduError::MessageTooLarge` if `out` has no room left
    pub fn encode<const N: usize>(&self, out: &mut Vec<u8, N>) -> Result<(), PduError> {
        out.push(self.first_octet())
            .map_err(|_| PduError::MessageTooLarge)?;
        match self.packet_type {
            PacketType::Single => out.push(self.signal),
            PacketType::Start => out
                .push(self.packet_count)
                .and_then(|()| out.push(self.signal)),
            PacketType::Continue | PacketType::End => Ok(()),
        }
        .map_err(|_| PduError::MessageTooLarge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_header_layout() {
        let header = SignalingHeader::single(0x0A, MessageType::ResponseAccept, 0x03);
        let mut bytes = Vec::<u8, 4>::new();
        header.encode(&mut bytes).unwrap();

        // label 0xA | single 00 | accept 10
        assert_eq!(bytes.as_slice(), &[0xA2, 0x03]);
        assert_eq!(SignalingHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_start_header_layout() {
        let header = SignalingHeader::start(0x03, MessageType::Command, 0x02, 5);
        let mut bytes = Vec::<u8, 4>::new();
        header.encode(&mut bytes).unwrap();

        assert_eq!(bytes.as_slice(), &[0x34, 0x05, 0x02]);
        let parsed = SignalingHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.packet_type, PacketType::Start);
        assert_eq!(parsed.packet_count, 5);
        assert_eq!(parsed.signal, 0x02);
    }

    #[test]
    fn test_continue_and_end_headers() {
        let cont = SignalingHeader::fragment(0x03, MessageType::Command, false);
        let end = SignalingHeader::fragment(0x03, MessageType::Command, true);
        assert_eq!(cont.first_octet(), 0x38);
        assert_eq!(end.first_octet(), 0x3C);
        assert_eq!(cont.size(), 1);

        let parsed = SignalingHeader::from_bytes(&[0x3C]).unwrap();
        assert_eq!(parsed.packet_type, PacketType::End);
        assert_eq!(parsed.transaction_label, 3);
    }

    #[test]
    fn test_truncated_headers_rejected() {
        assert_eq!(
            SignalingHeader::from_bytes(&[]),
            Err(PduError::TruncatedHeader)
        );
        // SINGLE needs two bytes
        assert_eq!(
            SignalingHeader::from_bytes(&[0x10]),
            Err(PduError::TruncatedHeader)
        );
        // START needs three bytes
        assert_eq!(
            SignalingHeader::from_bytes(&[0x14, 0x02]),
            Err(PduError::TruncatedHeader)
        );
    }
}
