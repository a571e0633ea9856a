//! `BondyBird` AVDTP Constants
//!
//! Capacity limits, protocol identifiers and default values used throughout
//! the engine. Every fixed-capacity table in the crate is sized by one of
//! these constants; running out of room is reported as an error at request
//! time instead of growing the table.

use crate::transport::ProtocolServiceMultiplexer;

/// Audio/Video Distribution Transport Protocol PSM (signaling and transport channels)
pub const PSM_AVDTP: ProtocolServiceMultiplexer = 0x0019;

/// Default L2CAP MTU, assumed until the transport reports the negotiated one
pub const DEFAULT_SIGNALING_MTU: u16 = 672;

/// Smallest MTU that still fits a START packet header plus one payload byte
pub const MIN_SIGNALING_MTU: u16 = 4;

/// Maximum number of local stream endpoints
pub const MAX_STREAM_ENDPOINTS: usize = 4;

/// Maximum number of remote stream endpoints remembered per discovery
pub const MAX_REMOTE_SEPS: usize = 10;

/// Maximum number of simultaneous signaling connections
pub const MAX_CONNECTIONS: usize = 2;

/// Maximum number of transport channels (media, reporting, recovery) per endpoint
pub const MAX_TRANSPORT_CHANNELS: usize = 3;

/// Maximum number of contributing sources in a media packet header
pub const MAX_CSRC_NUM: usize = 15;

/// Maximum length of the codec specific information element
pub const MAX_MEDIA_CODEC_INFO_LEN: usize = 32;

/// Maximum length of the content protection type specific value
pub const MAX_CONTENT_PROTECTION_VALUE_LEN: usize = 16;

/// Maximum payload size of one reassembled signaling message (header excluded)
pub const MAX_SIGNALING_MESSAGE_SIZE: usize = 512;

/// Maximum size of one signaling packet: a START header followed by a full payload
pub const MAX_SIGNALING_PACKET_SIZE: usize = MAX_SIGNALING_MESSAGE_SIZE + 3;

/// Maximum size of one media packet handled by the framer
pub const MAX_MEDIA_PACKET_SIZE: usize = 1024;

/// Maximum number of outbound signaling messages queued per connection while
/// the channel is busy
pub const MAX_QUEUED_SIGNALING_MESSAGES: usize = 4;

/// Maximum number of application events waiting to be polled
pub const MAX_PENDING_EVENTS: usize = 16;

/// Depth of the API request and response channels
pub const MAX_QUEUED_REQUESTS: usize = 4;

/// Depth of the transport notification channel
pub const MAX_QUEUED_NOTIFICATIONS: usize = 8;

/// Smallest valid stream endpoint identifier
pub const MIN_SEID: u8 = 0x01;

/// Largest valid stream endpoint identifier (6-bit field, 0x3F is reserved)
pub const MAX_SEID: u8 = 0x3E;

/// Valid range for recovery window size and media packet count
pub const RECOVERY_RANGE: core::ops::RangeInclusive<u8> = 0x01..=0x18;

/// Valid range for multiplexing transport session and channel identifiers
pub const MULTIPLEXING_ID_RANGE: core::ops::RangeInclusive<u8> = 0x01..=0x1E;

/// Recovery type RFC 2733, the only one defined
pub const RECOVERY_TYPE_RFC2733: u8 = 0x01;

/// Media payload type used for outbound media packets (dynamic range)
pub const DEFAULT_MEDIA_PAYLOAD_TYPE: u8 = 96;
