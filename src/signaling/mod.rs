//! AVDTP Signaling Codec
//!
//! This module implements the AVDTP signaling PDU format: the 1-3 byte
//! signaling header, fragmentation of messages larger than the channel MTU
//! into START/CONTINUE/END packets, reassembly on the receiving side, and the
//! signal-specific payload fields.
//!
//! ```text
//!  7   6   5   4   3   2   1   0
//! +---------------+-------+-------+
//! | Trans. label  | Pkt T | Msg T |   octet 0
//! +---------------+-------+-------+
//! | RFA   |   Signal Identifier   |   octet 1 (SINGLE)
//! +-------+-----------------------+
//! ```

pub mod fragment;
pub mod header;
pub mod message;

pub use fragment::{Fragments, Reassembler};
pub use header::SignalingHeader;
pub use message::{SepInfo, SignalingMessage};

/// AVDTP Message Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageType {
    /// Command message
    Command = 0x00,
    /// General Reject, sent for unknown signal identifiers
    GeneralReject = 0x01,
    /// Response Accept
    ResponseAccept = 0x02,
    /// Response Reject
    ResponseReject = 0x03,
}

impl MessageType {
    /// Convert from the 2-bit wire value
    #[must_use]
    pub const fn from_bits(value: u8) -> Self {
        match value & 0x03 {
            0x00 => Self::Command,
            0x01 => Self::GeneralReject,
            0x02 => Self::ResponseAccept,
            _ => Self::ResponseReject,
        }
    }

    /// Whether this message answers a command
    #[must_use]
    pub const fn is_response(self) -> bool {
        !matches!(self, Self::Command)
    }
}

/// AVDTP Packet Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketType {
    /// Complete message in one packet
    Single = 0x00,
    /// First packet of a fragmented message
    Start = 0x01,
    /// Middle packet of a fragmented message
    Continue = 0x02,
    /// Last packet of a fragmented message
    End = 0x03,
}

impl PacketType {
    /// Convert from the 2-bit wire value
    #[must_use]
    pub const fn from_bits(value: u8) -> Self {
        match value & 0x03 {
            0x00 => Self::Single,
            0x01 => Self::Start,
            0x02 => Self::Continue,
            _ => Self::End,
        }
    }
}

/// AVDTP Signal Identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SignalId {
    /// Discover available stream endpoints
    Discover = 0x01,
    /// Get capabilities of a stream endpoint
    GetCapabilities = 0x02,
    /// Set configuration for a stream endpoint
    SetConfiguration = 0x03,
    /// Get current configuration
    GetConfiguration = 0x04,
    /// Reconfigure stream endpoint
    Reconfigure = 0x05,
    /// Open stream
    Open = 0x06,
    /// Start streaming
    Start = 0x07,
    /// Close stream
    Close = 0x08,
    /// Suspend stream
    Suspend = 0x09,
    /// Abort stream
    Abort = 0x0A,
    /// Content protection security control
    SecurityControl = 0x0B,
    /// Get all capabilities, including those added after AVDTP 1.0
    GetAllCapabilities = 0x0C,
    /// Report sink delay
    DelayReport = 0x0D,
}

impl SignalId {
    /// Convert from raw byte value
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Discover),
            0x02 => Some(Self::GetCapabilities),
            0x03 => Some(Self::SetConfiguration),
            0x04 => Some(Self::GetConfiguration),
            0x05 => Some(Self::Reconfigure),
            0x06 => Some(Self::Open),
            0x07 => Some(Self::Start),
            0x08 => Some(Self::Close),
            0x09 => Some(Self::Suspend),
            0x0A => Some(Self::Abort),
            0x0B => Some(Self::SecurityControl),
            0x0C => Some(Self::GetAllCapabilities),
            0x0D => Some(Self::DelayReport),
            _ => None,
        }
    }
}

/// Signaling PDU parsing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PduError {
    /// Packet is shorter than its header
    TruncatedHeader,
    /// CONTINUE or END packet without a preceding START
    UnexpectedPacket(PacketType),
    /// Fragment carries a different transaction label than its START packet
    LabelMismatch,
    /// Number of fragments does not match the START packet's count
    PacketCountMismatch,
    /// Reassembled message exceeds the maximum signaling message size
    MessageTooLarge,
    /// Payload length does not match what the signal requires
    BadLength,
    /// Payload field holds a value the signal does not allow
    BadPayload,
}

impl core::fmt::Display for PduError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TruncatedHeader => write!(f, "Signaling packet shorter than its header"),
            Self::UnexpectedPacket(packet_type) => {
                write!(f, "Unexpected {packet_type:?} packet")
            }
            Self::LabelMismatch => write!(f, "Fragment transaction label mismatch"),
            Self::PacketCountMismatch => write!(f, "Fragment count mismatch"),
            Self::MessageTooLarge => write!(f, "Signaling message too large"),
            Self::BadLength => write!(f, "Bad signaling payload length"),
            Self::BadPayload => write!(f, "Bad signaling payload format"),
        }
    }
}
