//! Signaling message fragmentation and reassembly
//!
//! A message whose SINGLE encoding does not fit into the channel MTU is sent
//! as one START packet (header, packet count, signal identifier, first chunk),
//! zero or more CONTINUE packets and one END packet, each CONTINUE/END packet
//! carrying only the first header octet in front of its chunk.

use super::{MessageType, PacketType, PduError, SignalingHeader, SignalingMessage};
use crate::constants::{MAX_SIGNALING_MESSAGE_SIZE, MAX_SIGNALING_PACKET_SIZE, MIN_SIGNALING_MTU};
use heapless::Vec;

/// One encoded signaling packet
pub type SignalingPacket = Vec<u8, MAX_SIGNALING_PACKET_SIZE>;

/// Iterator over the packets of one outgoing signaling message
#[derive(Debug)]
pub struct Fragments<'a> {
    message: &'a SignalingMessage,
    mtu: usize,
    offset: usize,
    index: u8,
    packet_count: u8,
}

impl<'a> Fragments<'a> {
    /// Split `message` into packets no larger than `mtu`
    ///
    /// # Errors
    /// Returns `PduError::MessageTooLarge` if the message needs more than 255
    /// packets at this MTU
    pub fn new(message: &'a SignalingMessage, mtu: u16) -> Result<Self, PduError> {
        let mtu = usize::from(mtu.max(MIN_SIGNALING_MTU));
        let packet_count = Self::packet_count(message.payload.len(), mtu)?;
        Ok(Self {
            message,
            mtu,
            offset: 0,
            index: 0,
            packet_count,
        })
    }

    /// Number of packets needed for a payload of `len` bytes
    fn packet_count(len: usize, mtu: usize) -> Result<u8, PduError> {
        let single = SignalingHeader::size_of(PacketType::Single);
        if len + single <= mtu {
            return Ok(1);
        }
        let first = mtu - SignalingHeader::size_of(PacketType::Start);
        let rest = mtu - SignalingHeader::size_of(PacketType::Continue);
        let count = 1 + (len - first).div_ceil(rest);
        u8::try_from(count).map_err(|_| PduError::MessageTooLarge)
    }

    /// Total number of packets this message is split into
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.packet_count)
    }

    /// Whether the message fits into a single packet
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.packet_count == 1
    }

    fn build(&self, header: SignalingHeader, chunk: &[u8]) -> Result<SignalingPacket, PduError> {
        let mut packet = SignalingPacket::new();
        header.encode(&mut packet)?;
        packet
            .extend_from_slice(chunk)
            .map_err(|()| PduError::MessageTooLarge)?;
        Ok(packet)
    }
}

impl Iterator for Fragments<'_> {
    type Item = Result<SignalingPacket, PduError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.packet_count {
            return None;
        }

        let payload = self.message.payload.as_slice();
        let label = self.message.transaction_label;
        let message_type = self.message.message_type;
        let header = if self.packet_count == 1 {
            SignalingHeader::single(label, message_type, self.message.signal)
        } else if self.index == 0 {
            SignalingHeader::start(label, message_type, self.message.signal, self.packet_count)
        } else {
            SignalingHeader::fragment(label, message_type, self.index + 1 == self.packet_count)
        };

        let room = self.mtu - header.size();
        let end = payload.len().min(self.offset + room);
        let packet = self.build(header, &payload[self.offset..end]);
        self.offset = end;
        self.index += 1;
        Some(packet)
    }
}

#[derive(Debug)]
struct PartialMessage {
    transaction_label: u8,
    message_type: MessageType,
    signal: u8,
    packet_count: u8,
    received: u8,
    payload: Vec<u8, MAX_SIGNALING_MESSAGE_SIZE>,
}

/// Reassembly buffer for one signaling channel
///
/// Each signaling connection owns its own reassembler, so a broken fragment
/// sequence from one peer never touches another peer's partial message.
#[derive(Debug, Default)]
pub struct Reassembler {
    partial: Option<PartialMessage>,
}

impl Reassembler {
    /// Create an empty reassembler
    #[must_use]
    pub const fn new() -> Self {
        Self { partial: None }
    }

    /// Whether a fragmented message is being collected
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.partial.is_some()
    }

    /// Drop any partially received message
    pub fn reset(&mut self) {
        self.partial = None;
    }

    /// Feed one received packet
    ///
    /// Returns the complete message once a SINGLE or END packet completes it,
    /// `None` while fragments are still outstanding.
    ///
    /// # Errors
    /// Returns a `PduError` for truncated headers, out-of-sequence packet
    /// types, mismatched fragments and oversized messages. Any partial
    /// message is discarded on error.
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<SignalingMessage>, PduError> {
        let header = match SignalingHeader::from_bytes(packet) {
            Ok(header) => header,
            Err(e) => {
                self.partial = None;
                return Err(e);
            }
        };
        let chunk = &packet[header.size()..];

        match header.packet_type {
            PacketType::Single => {
                if self.partial.take().is_some() {
                    warn!("[SIGNALING] SINGLE packet interrupted fragmented message");
                }
                SignalingMessage::new(
                    header.transaction_label,
                    header.message_type,
                    header.signal,
                    chunk,
                )
                .map(Some)
            }
            PacketType::Start => {
                if self.partial.take().is_some() {
                    warn!("[SIGNALING] START packet interrupted fragmented message");
                }
                if header.packet_count < 2 {
                    return Err(PduError::PacketCountMismatch);
                }
                let mut payload = Vec::new();
                payload
                    .extend_from_slice(chunk)
                    .map_err(|()| PduError::MessageTooLarge)?;
                self.partial = Some(PartialMessage {
                    transaction_label: header.transaction_label,
                    message_type: header.message_type,
                    signal: header.signal,
                    packet_count: header.packet_count,
                    received: 1,
                    payload,
                });
                Ok(None)
            }
            PacketType::Continue | PacketType::End => {
                let mut partial = self
                    .partial
                    .take()
                    .ok_or(PduError::UnexpectedPacket(header.packet_type))?;

                if partial.transaction_label != header.transaction_label {
                    return Err(PduError::LabelMismatch);
                }
                partial.received += 1;
                let last = partial.received == partial.packet_count;
                if last != (header.packet_type == PacketType::End) {
                    return Err(PduError::PacketCountMismatch);
                }
                partial
                    .payload
                    .extend_from_slice(chunk)
                    .map_err(|()| PduError::MessageTooLarge)?;

                if last {
                    Ok(Some(SignalingMessage {
                        transaction_label: partial.transaction_label,
                        message_type: partial.message_type,
                        signal: partial.signal,
                        payload: partial.payload,
                    }))
                } else {
                    self.partial = Some(partial);
                    Ok(None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::SignalId;

    fn message_with_payload(len: usize) -> SignalingMessage {
        let mut payload = [0u8; 200];
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        SignalingMessage::new(
            0x07,
            MessageType::ResponseAccept,
            SignalId::GetAllCapabilities as u8,
            &payload[..len],
        )
        .unwrap()
    }

    #[test]
    fn test_small_message_is_single_packet() {
        let message = message_with_payload(4);
        let mut fragments = Fragments::new(&message, 48).unwrap();
        assert!(fragments.is_single());

        let packet = fragments.next().unwrap().unwrap();
        assert_eq!(packet.len(), 6);
        assert_eq!(packet[0], 0x72);
        assert!(fragments.next().is_none());
    }

    #[test]
    fn test_fragmentation_round_trip() {
        let message = message_with_payload(100);
        let fragments = Fragments::new(&message, 16).unwrap();
        // START carries 13 bytes, each CONTINUE/END 15: 1 + ceil(87 / 15) = 7
        assert_eq!(fragments.len(), 7);

        let mut reassembler = Reassembler::new();
        let mut complete = None;
        for (i, packet) in fragments.enumerate() {
            let packet = packet.unwrap();
            assert!(packet.len() <= 16);
            let expected_type = match i {
                0 => PacketType::Start,
                6 => PacketType::End,
                _ => PacketType::Continue,
            };
            assert_eq!(PacketType::from_bits(packet[0] >> 2), expected_type);
            if let Some(message) = reassembler.push(&packet).unwrap() {
                complete = Some(message);
            }
        }

        assert_eq!(complete.unwrap(), message);
        assert!(!reassembler.in_progress());
    }

    #[test]
    fn test_continue_without_start_rejected() {
        let mut reassembler = Reassembler::new();
        assert_eq!(
            reassembler.push(&[0x18, 0xAA, 0xBB]),
            Err(PduError::UnexpectedPacket(PacketType::Continue))
        );
        assert_eq!(
            reassembler.push(&[0x1C, 0xAA]),
            Err(PduError::UnexpectedPacket(PacketType::End))
        );
    }

    #[test]
    fn test_broken_sequence_does_not_touch_other_buffers() {
        let message = message_with_payload(40);
        let packets: Vec<SignalingPacket, 8> = Fragments::new(&message, 16)
            .unwrap()
            .map(Result::unwrap)
            .collect();

        let mut first_peer = Reassembler::new();
        let mut second_peer = Reassembler::new();

        assert_eq!(first_peer.push(&packets[0]).unwrap(), None);
        // Stray CONTINUE on the other peer's channel
        assert!(second_peer.push(&packets[1]).is_err());

        for packet in &packets[1..packets.len() - 1] {
            assert_eq!(first_peer.push(packet).unwrap(), None);
        }
        let complete = first_peer.push(&packets[packets.len() - 1]).unwrap();
        assert_eq!(complete, Some(message));
    }

    #[test]
    fn test_end_before_all_fragments_rejected() {
        let message = message_with_payload(60);
        let packets: Vec<SignalingPacket, 8> = Fragments::new(&message, 16)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert!(packets.len() > 2);

        let mut reassembler = Reassembler::new();
        reassembler.push(&packets[0]).unwrap();
        assert_eq!(
            reassembler.push(&packets[packets.len() - 1]),
            Err(PduError::PacketCountMismatch)
        );
        assert!(!reassembler.in_progress());
    }

    #[test]
    fn test_label_mismatch_rejected() {
        let mut reassembler = Reassembler::new();
        // START, label 1, two packets, GET_CONFIGURATION
        reassembler.push(&[0x14, 0x02, 0x04, 0x01]).unwrap();
        // END with label 2
        assert_eq!(
            reassembler.push(&[0x2C, 0x02]),
            Err(PduError::LabelMismatch)
        );
    }

    #[test]
    fn test_reassembly_overflow_rejected() {
        let mut reassembler = Reassembler::new();
        let mut start = [0xEEu8; 300];
        start[0] = 0x14;
        start[1] = 0x03;
        start[2] = 0x02;
        reassembler.push(&start).unwrap();

        let mut cont = [0xEEu8; 300];
        cont[0] = 0x18;
        assert_eq!(reassembler.push(&cont), Err(PduError::MessageTooLarge));
        assert!(!reassembler.in_progress());
    }
}
