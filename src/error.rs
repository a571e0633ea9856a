//! AVDTP Error Types
//!
//! [`ErrorCode`] is the error code carried on the wire in RESPONSE_REJECT
//! messages. [`AvdtpError`] is what the local API returns.

use crate::endpoint::capability::ServiceCategory;
use crate::signaling::SignalId;

/// AVDTP error codes sent by an acceptor when rejecting a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCode {
    /// The request packet header format is invalid
    BadHeaderFormat,
    /// The request packet length does not match the assumed length
    BadLength,
    /// The requested command indicates an invalid ACP SEID
    BadAcpSeid,
    /// The SEP is in use
    SepInUse,
    /// The SEP is not in use
    SepNotInUse,
    /// The value of the service category in the request is not defined
    BadServCategory,
    /// The requested command has an incorrect payload format
    BadPayloadFormat,
    /// The requested command is not supported by the device
    NotSupportedCommand,
    /// The reconfigure command is an attempt to reconfigure a non-reconfigurable service
    InvalidCapabilities,
    /// The requested recovery type is not defined
    BadRecoveryType,
    /// The format of the media transport capability is not correct
    BadMediaTransportFormat,
    /// The format of the recovery service capability is not correct
    BadRecoveryFormat,
    /// The format of the header compression service capability is not correct
    BadRohcFormat,
    /// The format of the content protection service capability is not correct
    BadCpFormat,
    /// The format of the multiplexing service capability is not correct
    BadMultiplexingFormat,
    /// The configuration requested is not supported
    UnsupportedConfiguration,
    /// The command is not valid in the current state of the endpoint
    BadState,
    /// Reserved or profile specific code received from a peer
    Other(u8),
}

impl From<u8> for ErrorCode {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::BadHeaderFormat,
            0x11 => Self::BadLength,
            0x12 => Self::BadAcpSeid,
            0x13 => Self::SepInUse,
            0x14 => Self::SepNotInUse,
            0x17 => Self::BadServCategory,
            0x18 => Self::BadPayloadFormat,
            0x19 => Self::NotSupportedCommand,
            0x1A => Self::InvalidCapabilities,
            0x22 => Self::BadRecoveryType,
            0x23 => Self::BadMediaTransportFormat,
            0x25 => Self::BadRecoveryFormat,
            0x26 => Self::BadRohcFormat,
            0x27 => Self::BadCpFormat,
            0x28 => Self::BadMultiplexingFormat,
            0x29 => Self::UnsupportedConfiguration,
            0x31 => Self::BadState,
            other => Self::Other(other),
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::BadHeaderFormat => 0x01,
            ErrorCode::BadLength => 0x11,
            ErrorCode::BadAcpSeid => 0x12,
            ErrorCode::SepInUse => 0x13,
            ErrorCode::SepNotInUse => 0x14,
            ErrorCode::BadServCategory => 0x17,
            ErrorCode::BadPayloadFormat => 0x18,
            ErrorCode::NotSupportedCommand => 0x19,
            ErrorCode::InvalidCapabilities => 0x1A,
            ErrorCode::BadRecoveryType => 0x22,
            ErrorCode::BadMediaTransportFormat => 0x23,
            ErrorCode::BadRecoveryFormat => 0x25,
            ErrorCode::BadRohcFormat => 0x26,
            ErrorCode::BadCpFormat => 0x27,
            ErrorCode::BadMultiplexingFormat => 0x28,
            ErrorCode::UnsupportedConfiguration => 0x29,
            ErrorCode::BadState => 0x31,
            ErrorCode::Other(other) => other,
        }
    }
}

/// Errors returned by the local AVDTP API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AvdtpError {
    /// No local stream endpoint with this SEID
    EndpointNotFound,
    /// No signaling connection with this handle
    ConnectionNotFound,
    /// Malformed Bluetooth device address
    InvalidAddress,
    /// Endpoint or connection table is full
    CapacityExceeded,
    /// Service category is already registered on the endpoint
    CategoryAlreadyRegistered(ServiceCategory),
    /// A registration parameter is outside its valid range
    InvalidParameter(ServiceCategory),
    /// Codec or content protection information exceeds its fixed budget
    InformationTooLarge(ServiceCategory),
    /// An initiator transaction is already outstanding on the endpoint
    TransactionPending,
    /// Operation is not valid in the endpoint's current state
    BadState,
    /// Endpoint is not attached to a signaling connection
    NotConnected,
    /// No suitable remote stream endpoint was found
    NoRemoteEndpoint,
    /// Local and remote capabilities have no configuration in common
    NoCommonConfiguration,
    /// Outgoing message exceeds the maximum signaling message size
    MessageTooLarge,
    /// The channel transport refused the operation
    TransportFailure,
    /// The media channel cannot take a packet right now
    ChannelBusy,
    /// The remote answer could not be parsed
    BadResponse,
    /// The remote acceptor rejected the signal
    Rejected(SignalId, ErrorCode),
    /// The remote acceptor answered with a general reject
    GeneralReject(u8),
    /// The global engine has not been initialized
    NotInitialized,
    /// The global engine was already initialized
    AlreadyInitialized,
}

impl core::fmt::Display for AvdtpError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::EndpointNotFound => write!(f, "Stream endpoint not found"),
            Self::ConnectionNotFound => write!(f, "Signaling connection not found"),
            Self::InvalidAddress => write!(f, "Invalid Bluetooth address"),
            Self::CapacityExceeded => write!(f, "Fixed capacity exceeded"),
            Self::CategoryAlreadyRegistered(category) => {
                write!(f, "Service category {category:?} already registered")
            }
            Self::InvalidParameter(category) => {
                write!(f, "Invalid parameter for service category {category:?}")
            }
            Self::InformationTooLarge(category) => {
                write!(f, "Information element too large for {category:?}")
            }
            Self::TransactionPending => write!(f, "Initiator transaction already pending"),
            Self::BadState => write!(f, "Operation not valid in current endpoint state"),
            Self::NotConnected => write!(f, "Endpoint has no signaling connection"),
            Self::NoRemoteEndpoint => write!(f, "No suitable remote stream endpoint"),
            Self::NoCommonConfiguration => write!(f, "No common stream configuration"),
            Self::MessageTooLarge => write!(f, "Signaling message too large"),
            Self::TransportFailure => write!(f, "Channel transport failure"),
            Self::ChannelBusy => write!(f, "Media channel busy"),
            Self::BadResponse => write!(f, "Malformed response from remote"),
            Self::Rejected(signal, code) => {
                write!(f, "{signal:?} rejected by remote: {code:?}")
            }
            Self::GeneralReject(signal) => write!(f, "General reject for signal {signal:#04x}"),
            Self::NotInitialized => write!(f, "AVDTP engine not initialized"),
            Self::AlreadyInitialized => write!(f, "AVDTP engine already initialized"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(ErrorCode::from(0x31), ErrorCode::BadState);
        assert_eq!(ErrorCode::from(0x13), ErrorCode::SepInUse);
        assert_eq!(u8::from(ErrorCode::BadRecoveryFormat), 0x25);
        assert_eq!(u8::from(ErrorCode::UnsupportedConfiguration), 0x29);
    }

    #[test]
    fn test_reserved_error_code_passes_through() {
        let code = ErrorCode::from(0xC0);
        assert_eq!(code, ErrorCode::Other(0xC0));
        assert_eq!(u8::from(code), 0xC0);
    }
}
