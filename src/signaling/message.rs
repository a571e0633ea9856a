//! Signaling messages and signal-specific payload fields

use super::{MessageType, PduError, SignalId};
use crate::constants::{MAX_REMOTE_SEPS, MAX_SIGNALING_MESSAGE_SIZE};
use crate::endpoint::capability::Capabilities;
use crate::endpoint::{MediaType, SepType, StreamEndpointId};
use crate::error::ErrorCode;
use heapless::Vec;

/// Signaling message payload buffer
pub type Payload = Vec<u8, MAX_SIGNALING_MESSAGE_SIZE>;

/// A complete (reassembled) signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingMessage {
    /// 4-bit transaction label
    pub transaction_label: u8,
    /// Message type
    pub message_type: MessageType,
    /// Raw signal identifier, unknown values are kept for GENERAL_REJECT
    pub signal: u8,
    /// Signal specific payload
    pub payload: Payload,
}

/// Encode a SEID into its 6-bit field in the upper bits of an octet
#[must_use]
pub const fn seid_to_byte(seid: StreamEndpointId) -> u8 {
    seid << 2
}

/// Decode a SEID from the upper 6 bits of an octet
#[must_use]
pub const fn seid_from_byte(byte: u8) -> StreamEndpointId {
    byte >> 2
}

impl SignalingMessage {
    /// Create a message with a copy of `payload`
    ///
    /// # Errors
    /// Returns [`PduError::MessageTooLarge`] if the payload does not fit
    pub fn new(
        transaction_label: u8,
        message_type: MessageType,
        signal: u8,
        payload: &[u8],
    ) -> Result<Self, PduError> {
        Ok(Self {
            transaction_label: transaction_label & 0x0F,
            message_type,
            signal,
            payload: Vec::from_slice(payload).map_err(|()| PduError::MessageTooLarge)?,
        })
    }

    /// Create a command
    ///
    /// # Errors
    /// Returns [`PduError::MessageTooLarge`] if the payload does not fit
    pub fn command(label: u8, signal: SignalId, payload: &[u8]) -> Result<Self, PduError> {
        Self::new(label, MessageType::Command, signal as u8, payload)
    }

    /// Create a RESPONSE_ACCEPT
    ///
    /// # Errors
    /// Returns [`PduError::MessageTooLarge`] if the payload does not fit
    pub fn accept(label: u8, signal: SignalId, payload: &[u8]) -> Result<Self, PduError> {
        Self::new(label, MessageType::ResponseAccept, signal as u8, payload)
    }

    /// Create a RESPONSE_REJECT with the payload shape the signal requires
    ///
    /// SET_CONFIGURATION and RECONFIGURE carry the offending category,
    /// START and SUSPEND carry the first SEID that failed, every other
    /// signal carries the error code alone.
    #[must_use]
    pub fn reject(label: u8, signal: SignalId, detail: u8, code: ErrorCode) -> Self {
        let code = u8::from(code);
        let mut payload = Payload::new();
        // Two bytes always fit
        let _ = match signal {
            SignalId::SetConfiguration | SignalId::Reconfigure => {
                payload.extend_from_slice(&[detail, code])
            }
            SignalId::Start | SignalId::Suspend => {
                payload.extend_from_slice(&[seid_to_byte(detail), code])
            }
            _ => payload.push(code).map_err(|_| ()),
        };
        Self {
            transaction_label: label & 0x0F,
            message_type: MessageType::ResponseReject,
            signal: signal as u8,
            payload,
        }
    }

    /// Create a GENERAL_REJECT echoing an unknown signal identifier
    #[must_use]
    pub fn general_reject(label: u8, signal: u8) -> Self {
        Self {
            transaction_label: label & 0x0F,
            message_type: MessageType::GeneralReject,
            signal,
            payload: Payload::new(),
        }
    }

    /// Known signal identifier, if any
    #[must_use]
    pub fn signal_id(&self) -> Option<SignalId> {
        SignalId::from_u8(self.signal)
    }

    /// SEID in the first payload octet (ACP SEID of most commands)
    ///
    /// # Errors
    /// Returns [`PduError::BadLength`] if the payload is empty
    pub fn first_seid(&self) -> Result<StreamEndpointId, PduError> {
        self.payload
            .first()
            .map(|byte| seid_from_byte(*byte))
            .ok_or(PduError::BadLength)
    }

    /// Error code and detail octet of a RESPONSE_REJECT
    ///
    /// The detail is the category or SEID for signals that carry one.
    #[must_use]
    pub fn reject_reason(&self) -> (Option<u8>, ErrorCode) {
        let with_detail = matches!(
            self.signal_id(),
            Some(
                SignalId::SetConfiguration
                    | SignalId::Reconfigure
                    | SignalId::Start
                    | SignalId::Suspend
            )
        );
        match (with_detail, self.payload.as_slice()) {
            (true, [detail, code, ..]) => (Some(*detail), ErrorCode::from(*code)),
            (false, [code, ..]) | (true, [code]) => (None, ErrorCode::from(*code)),
            (_, []) => (None, ErrorCode::BadLength),
        }
    }
}

/// Payload of a SEID plus capability list command
/// (SET_CONFIGURATION, RECONFIGURE)
///
/// # Errors
/// Returns [`PduError::MessageTooLarge`] if the capabilities do not fit
pub fn configuration_payload(
    acp_seid: StreamEndpointId,
    int_seid: Option<StreamEndpointId>,
    capabilities: &Capabilities,
) -> Result<Payload, PduError> {
    let mut payload = Payload::new();
    payload
        .push(seid_to_byte(acp_seid))
        .map_err(|_| PduError::MessageTooLarge)?;
    if let Some(int_seid) = int_seid {
        payload
            .push(seid_to_byte(int_seid))
            .map_err(|_| PduError::MessageTooLarge)?;
    }
    capabilities.encode(&mut payload)?;
    Ok(payload)
}

/// One entry of a DISCOVER response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SepInfo {
    /// Stream endpoint identifier
    pub seid: StreamEndpointId,
    /// Whether the endpoint is configured
    pub in_use: bool,
    /// Media type
    pub media_type: MediaType,
    /// Source or sink
    pub sep_type: SepType,
}

impl SepInfo {
    /// Encoded size of one entry
    pub const SIZE: usize = 2;

    /// Encode the 2-byte entry
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; Self::SIZE] {
        [
            seid_to_byte(self.seid) | ((self.in_use as u8) << 1),
            ((self.media_type as u8) << 4) | ((self.sep_type as u8) << 3),
        ]
    }

    /// Decode one 2-byte entry
    ///
    /// # Errors
    /// Returns [`PduError::BadLength`] for a short entry and
    /// [`PduError::BadPayload`] for an undefined media type
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PduError> {
        let &[first, second, ..] = bytes else {
            return Err(PduError::BadLength);
        };
        Ok(Self {
            seid: seid_from_byte(first),
            in_use: first & 0x02 != 0,
            media_type: MediaType::from_u8(second >> 4).ok_or(PduError::BadPayload)?,
            sep_type: SepType::from_bit(second >> 3),
        })
    }

    /// Decode the entry list of a DISCOVER response
    ///
    /// Entries beyond the remote endpoint capacity are dropped.
    ///
    /// # Errors
    /// Returns [`PduError::BadLength`] for an empty or odd-sized list
    pub fn parse_list(payload: &[u8]) -> Result<Vec<Self, MAX_REMOTE_SEPS>, PduError> {
        if payload.is_empty() || payload.len() % Self::SIZE != 0 {
            return Err(PduError::BadLength);
        }
        let mut entries = Vec::new();
        for chunk in payload.chunks_exact(Self::SIZE) {
            let entry = Self::from_bytes(chunk)?;
            if entries.push(entry).is_err() {
                warn!("[SIGNALING] discovery list truncated at {} entries", MAX_REMOTE_SEPS);
                break;
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::capability::Capability;

    #[test]
    fn test_seid_field_position() {
        assert_eq!(seid_to_byte(1), 0x04);
        assert_eq!(seid_to_byte(0x3E), 0xF8);
        assert_eq!(seid_from_byte(0x07), 1);
    }

    #[test]
    fn test_sep_info_layout() {
        let info = SepInfo {
            seid: 1,
            in_use: true,
            media_type: MediaType::Audio,
            sep_type: SepType::Sink,
        };
        assert_eq!(info.to_bytes(), [0x06, 0x08]);
        assert_eq!(SepInfo::from_bytes(&info.to_bytes()).unwrap(), info);
    }

    #[test]
    fn test_discover_list_parsing() {
        let list = SepInfo::parse_list(&[0x04, 0x00, 0x0A, 0x18]).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].seid, 1);
        assert_eq!(list[0].sep_type, SepType::Source);
        assert_eq!(list[1].seid, 2);
        assert!(list[1].in_use);
        assert_eq!(list[1].media_type, MediaType::Video);
        assert_eq!(list[1].sep_type, SepType::Sink);

        assert_eq!(SepInfo::parse_list(&[0x04]), Err(PduError::BadLength));
        assert_eq!(SepInfo::parse_list(&[]), Err(PduError::BadLength));
    }

    #[test]
    fn test_discover_list_truncated_to_capacity() {
        let mut payload = [0u8; 2 * (MAX_REMOTE_SEPS + 2)];
        for (i, chunk) in payload.chunks_exact_mut(2).enumerate() {
            chunk[0] = seid_to_byte(i as u8 + 1);
        }
        let list = SepInfo::parse_list(&payload).unwrap();
        assert_eq!(list.len(), MAX_REMOTE_SEPS);
    }

    #[test]
    fn test_reject_payload_shapes() {
        let set_config = SignalingMessage::reject(
            1,
            SignalId::SetConfiguration,
            0x07,
            ErrorCode::UnsupportedConfiguration,
        );
        assert_eq!(set_config.payload.as_slice(), &[0x07, 0x29]);
        assert_eq!(
            set_config.reject_reason(),
            (Some(0x07), ErrorCode::UnsupportedConfiguration)
        );

        let start = SignalingMessage::reject(2, SignalId::Start, 1, ErrorCode::BadState);
        assert_eq!(start.payload.as_slice(), &[0x04, 0x31]);

        let open = SignalingMessage::reject(3, SignalId::Open, 1, ErrorCode::BadState);
        assert_eq!(open.payload.as_slice(), &[0x31]);
        assert_eq!(open.reject_reason(), (None, ErrorCode::BadState));
    }

    #[test]
    fn test_general_reject_echoes_signal() {
        let reject = SignalingMessage::general_reject(0x15, 0x7F);
        assert_eq!(reject.transaction_label, 0x05);
        assert_eq!(reject.message_type, MessageType::GeneralReject);
        assert_eq!(reject.signal, 0x7F);
        assert!(reject.payload.is_empty());
        assert_eq!(reject.signal_id(), None);
    }

    #[test]
    fn test_configuration_payload() {
        let mut caps = Capabilities::new();
        caps.insert(Capability::MediaTransport).unwrap();
        let payload = configuration_payload(1, Some(2), &caps).unwrap();
        assert_eq!(payload.as_slice(), &[0x04, 0x08, 0x01, 0x00]);

        let message = SignalingMessage::command(4, SignalId::SetConfiguration, &payload).unwrap();
        assert_eq!(message.first_seid(), Ok(1));
    }
}
