//! Service Capabilities
//!
//! Every negotiable aspect of a stream is a service category. A capability
//! list on the wire is a sequence of `{category, length, value}` elements;
//! locally it is a [`Capabilities`] set holding at most one [`Capability`]
//! per category, kept in ascending category order.

use super::MediaType;
use crate::codec::CodecType;
use crate::constants::{
    MAX_CONTENT_PROTECTION_VALUE_LEN, MAX_MEDIA_CODEC_INFO_LEN, MAX_TRANSPORT_CHANNELS,
    MULTIPLEXING_ID_RANGE, RECOVERY_RANGE, RECOVERY_TYPE_RFC2733,
};
use crate::error::{AvdtpError, ErrorCode};
use crate::signaling::PduError;
use heapless::Vec;

/// Number of defined service categories
pub const SERVICE_CATEGORY_COUNT: usize = 8;

/// AVDTP Service Categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ServiceCategory {
    /// Media transport
    MediaTransport = 0x01,
    /// Reporting
    Reporting = 0x02,
    /// Recovery
    Recovery = 0x03,
    /// Content protection
    ContentProtection = 0x04,
    /// Header compression
    HeaderCompression = 0x05,
    /// Multiplexing
    Multiplexing = 0x06,
    /// Media codec
    MediaCodec = 0x07,
    /// Delay reporting
    DelayReporting = 0x08,
}

impl ServiceCategory {
    /// Convert from raw byte value
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::MediaTransport),
            0x02 => Some(Self::Reporting),
            0x03 => Some(Self::Recovery),
            0x04 => Some(Self::ContentProtection),
            0x05 => Some(Self::HeaderCompression),
            0x06 => Some(Self::Multiplexing),
            0x07 => Some(Self::MediaCodec),
            0x08 => Some(Self::DelayReporting),
            _ => None,
        }
    }

    /// Bit of this category in a registered-category bitmask
    #[must_use]
    pub const fn bit(self) -> u16 {
        1 << (self as u8)
    }

    /// Error code a peer expects when this category's element is malformed
    #[must_use]
    pub const fn format_error(self) -> ErrorCode {
        match self {
            Self::MediaTransport => ErrorCode::BadMediaTransportFormat,
            Self::Recovery => ErrorCode::BadRecoveryFormat,
            Self::ContentProtection => ErrorCode::BadCpFormat,
            Self::HeaderCompression => ErrorCode::BadRohcFormat,
            Self::Multiplexing => ErrorCode::BadMultiplexingFormat,
            Self::Reporting | Self::MediaCodec | Self::DelayReporting => {
                ErrorCode::BadPayloadFormat
            }
        }
    }
}

/// Transport session and channel identifier pair of the multiplexing category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransportIdentifier {
    /// Transport session identifier (TSID)
    pub session: u8,
    /// Transport channel identifier (TCID)
    pub channel: u8,
}

/// One service capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// Basic media transport, no parameters
    MediaTransport,
    /// Reporting channel, no parameters
    Reporting,
    /// Recovery channel
    Recovery {
        /// Recovery type, 0x01 (RFC 2733) is the only defined one
        recovery_type: u8,
        /// Maximum recovery window size (1-24)
        window_size: u8,
        /// Maximum number of media packets in parity code (1-24)
        packet_count: u8,
    },
    /// Content protection
    ContentProtection {
        /// Content protection type (little endian on the wire)
        cp_type: u16,
        /// Type specific value
        value: Vec<u8, MAX_CONTENT_PROTECTION_VALUE_LEN>,
    },
    /// Robust header compression
    HeaderCompression {
        /// Compression available on the back channel
        back_channel: bool,
        /// Compression available on media packets
        media: bool,
        /// Compression available on recovery packets
        recovery: bool,
    },
    /// Multiplexing of transport sessions onto channels
    Multiplexing {
        /// Adaptation layer fragmentation allowed
        fragmentation: bool,
        /// Identifier pairs for the media, reporting and recovery sessions
        identifiers: Vec<TransportIdentifier, MAX_TRANSPORT_CHANNELS>,
    },
    /// Media codec
    MediaCodec {
        /// Media type the codec handles
        media_type: MediaType,
        /// Codec type
        codec_type: CodecType,
        /// Codec specific information element
        info: Vec<u8, MAX_MEDIA_CODEC_INFO_LEN>,
    },
    /// Delay reporting, no parameters
    DelayReporting,
}

/// A capability list element that failed to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CapabilityError {
    /// Raw category of the offending element
    pub category: u8,
    /// Error code to report to the peer
    pub code: ErrorCode,
}

impl CapabilityError {
    const fn new(category: ServiceCategory, code: ErrorCode) -> Self {
        Self {
            category: category as u8,
            code,
        }
    }
}

impl Capability {
    /// Service category of this capability
    #[must_use]
    pub const fn category(&self) -> ServiceCategory {
        match self {
            Self::MediaTransport => ServiceCategory::MediaTransport,
            Self::Reporting => ServiceCategory::Reporting,
            Self::Recovery { .. } => ServiceCategory::Recovery,
            Self::ContentProtection { .. } => ServiceCategory::ContentProtection,
            Self::HeaderCompression { .. } => ServiceCategory::HeaderCompression,
            Self::Multiplexing { .. } => ServiceCategory::Multiplexing,
            Self::MediaCodec { .. } => ServiceCategory::MediaCodec,
            Self::DelayReporting => ServiceCategory::DelayReporting,
        }
    }

    /// Build a media codec capability, checking the information size budget
    ///
    /// # Errors
    /// Returns [`AvdtpError::InformationTooLarge`] if `info` exceeds the budget
    pub fn media_codec(
        media_type: MediaType,
        codec_type: CodecType,
        info: &[u8],
    ) -> Result<Self, AvdtpError> {
        Ok(Self::MediaCodec {
            media_type,
            codec_type,
            info: Vec::from_slice(info)
                .map_err(|()| AvdtpError::InformationTooLarge(ServiceCategory::MediaCodec))?,
        })
    }

    /// Build a content protection capability, checking the value size budget
    ///
    /// # Errors
    /// Returns [`AvdtpError::InformationTooLarge`] if `value` exceeds the budget
    pub fn content_protection(cp_type: u16, value: &[u8]) -> Result<Self, AvdtpError> {
        Ok(Self::ContentProtection {
            cp_type,
            value: Vec::from_slice(value).map_err(|()| {
                AvdtpError::InformationTooLarge(ServiceCategory::ContentProtection)
            })?,
        })
    }

    /// Check the structural constraints of this capability
    ///
    /// # Errors
    /// Returns [`AvdtpError::InvalidParameter`] for out-of-range parameters
    pub fn validate(&self) -> Result<(), AvdtpError> {
        match self {
            Self::Recovery {
                recovery_type,
                window_size,
                packet_count,
            } => {
                if *recovery_type != RECOVERY_TYPE_RFC2733
                    || !RECOVERY_RANGE.contains(window_size)
                    || !RECOVERY_RANGE.contains(packet_count)
                {
                    return Err(AvdtpError::InvalidParameter(ServiceCategory::Recovery));
                }
            }
            Self::Multiplexing { identifiers, .. } => {
                let in_range = identifiers.iter().all(|id| {
                    MULTIPLEXING_ID_RANGE.contains(&id.session)
                        && MULTIPLEXING_ID_RANGE.contains(&id.channel)
                });
                if !in_range {
                    return Err(AvdtpError::InvalidParameter(ServiceCategory::Multiplexing));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Length of the value part of the encoded element
    #[must_use]
    pub fn value_len(&self) -> usize {
        match self {
            Self::MediaTransport | Self::Reporting | Self::DelayReporting => 0,
            Self::Recovery { .. } => 3,
            Self::ContentProtection { value, .. } => 2 + value.len(),
            Self::HeaderCompression { .. } => 1,
            Self::Multiplexing { identifiers, .. } => 1 + 2 * identifiers.len(),
            Self::MediaCodec { info, .. } => 2 + info.len(),
        }
    }

    /// Append the `{category, length, value}` element to `out`
    ///
    /// # Errors
    /// Returns [`PduError::MessageTooLarge`] if `out` has no room left
    pub fn encode<const N: usize>(&self, out: &mut Vec<u8, N>) -> Result<(), PduError> {
        let value_len = u8::try_from(self.value_len()).map_err(|_| PduError::MessageTooLarge)?;
        let mut element: Vec<u8, { 2 + 2 + MAX_MEDIA_CODEC_INFO_LEN }> = Vec::new();
        let overflow = |()| PduError::MessageTooLarge;
        element
            .extend_from_slice(&[self.category() as u8, value_len])
            .map_err(overflow)?;

        match self {
            Self::MediaTransport | Self::Reporting | Self::DelayReporting => {}
            Self::Recovery {
                recovery_type,
                window_size,
                packet_count,
            } => element
                .extend_from_slice(&[*recovery_type, *window_size, *packet_count])
                .map_err(overflow)?,
            Self::ContentProtection { cp_type, value } => {
                element
                    .extend_from_slice(&cp_type.to_le_bytes())
                    .map_err(overflow)?;
                element.extend_from_slice(value).map_err(overflow)?;
            }
            Self::HeaderCompression {
                back_channel,
                media,
                recovery,
            } => {
                let flags = (u8::from(*back_channel) << 7)
                    | (u8::from(*media) << 6)
                    | (u8::from(*recovery) << 5);
                element.push(flags).map_err(|_| PduError::MessageTooLarge)?;
            }
            Self::Multiplexing {
                fragmentation,
                identifiers,
            } => {
                element
                    .push(u8::from(*fragmentation) << 7)
                    .map_err(|_| PduError::MessageTooLarge)?;
                for id in identifiers {
                    element
                        .extend_from_slice(&[id.session << 3, id.channel << 3])
                        .map_err(overflow)?;
                }
            }
            Self::MediaCodec {
                media_type,
                codec_type,
                info,
            } => {
                element
                    .extend_from_slice(&[(*media_type as u8) << 4, u8::from(*codec_type)])
                    .map_err(overflow)?;
                element.extend_from_slice(info).map_err(overflow)?;
            }
        }

        out.extend_from_slice(&element).map_err(overflow)
    }

    /// Decode the value part of an element of a known category
    ///
    /// # Errors
    /// Returns the category and the error code to report if the value is
    /// malformed
    pub fn decode(category: ServiceCategory, value: &[u8]) -> Result<Self, CapabilityError> {
        let format_error = CapabilityError::new(category, category.format_error());

        match category {
            ServiceCategory::MediaTransport => {
                if !value.is_empty() {
                    return Err(format_error);
                }
                Ok(Self::MediaTransport)
            }
            ServiceCategory::Reporting => {
                if !value.is_empty() {
                    return Err(format_error);
                }
                Ok(Self::Reporting)
            }
            ServiceCategory::DelayReporting => {
                if !value.is_empty() {
                    return Err(format_error);
                }
                Ok(Self::DelayReporting)
            }
            ServiceCategory::Recovery => {
                let &[recovery_type, window_size, packet_count] = value else {
                    return Err(format_error);
                };
                if recovery_type != RECOVERY_TYPE_RFC2733 {
                    return Err(CapabilityError::new(category, ErrorCode::BadRecoveryType));
                }
                if !RECOVERY_RANGE.contains(&window_size) || !RECOVERY_RANGE.contains(&packet_count)
                {
                    return Err(format_error);
                }
                Ok(Self::Recovery {
                    recovery_type,
                    window_size,
                    packet_count,
                })
            }
            ServiceCategory::ContentProtection => {
                if value.len() < 2 {
                    return Err(format_error);
                }
                Ok(Self::ContentProtection {
                    cp_type: u16::from_le_bytes([value[0], value[1]]),
                    value: Vec::from_slice(&value[2..]).map_err(|()| format_error)?,
                })
            }
            ServiceCategory::HeaderCompression => {
                let &[flags] = value else {
                    return Err(format_error);
                };
                Ok(Self::HeaderCompression {
                    back_channel: flags & 0x80 != 0,
                    media: flags & 0x40 != 0,
                    recovery: flags & 0x20 != 0,
                })
            }
            ServiceCategory::Multiplexing => {
                let Some((&flags, pairs)) = value.split_first() else {
                    return Err(format_error);
                };
                if pairs.len() % 2 != 0 {
                    return Err(format_error);
                }
                let mut identifiers = Vec::new();
                for pair in pairs.chunks_exact(2) {
                    let id = TransportIdentifier {
                        session: pair[0] >> 3,
                        channel: pair[1] >> 3,
                    };
                    if !MULTIPLEXING_ID_RANGE.contains(&id.session)
                        || !MULTIPLEXING_ID_RANGE.contains(&id.channel)
                    {
                        return Err(format_error);
                    }
                    identifiers.push(id).map_err(|_| format_error)?;
                }
                Ok(Self::Multiplexing {
                    fragmentation: flags & 0x80 != 0,
                    identifiers,
                })
            }
            ServiceCategory::MediaCodec => {
                if value.len() < 2 {
                    return Err(format_error);
                }
                let media_type = MediaType::from_u8(value[0] >> 4).ok_or(format_error)?;
                Ok(Self::MediaCodec {
                    media_type,
                    codec_type: CodecType::from(value[1]),
                    info: Vec::from_slice(&value[2..]).map_err(|()| format_error)?,
                })
            }
        }
    }
}

/// Set of capabilities, at most one per service category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    items: Vec<Capability, SERVICE_CATEGORY_COUNT>,
}

impl Capabilities {
    /// Create an empty capability set
    #[must_use]
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Add a capability whose category is not yet present
    ///
    /// # Errors
    /// Returns [`AvdtpError::CategoryAlreadyRegistered`] if the category is
    /// already in the set
    pub fn insert(&mut self, capability: Capability) -> Result<(), AvdtpError> {
        let category = capability.category();
        let position = match self
            .items
            .binary_search_by_key(&category, Capability::category)
        {
            Ok(_) => return Err(AvdtpError::CategoryAlreadyRegistered(category)),
            Err(position) => position,
        };
        self.items
            .insert(position, capability)
            .map_err(|_| AvdtpError::CapacityExceeded)
    }

    /// Add a capability, replacing the one of the same category if present
    pub fn replace(&mut self, capability: Capability) {
        let category = capability.category();
        match self
            .items
            .binary_search_by_key(&category, Capability::category)
        {
            Ok(position) => self.items[position] = capability,
            // One slot per category, so the set can never be full here
            Err(position) => {
                let _ = self.items.insert(position, capability);
            }
        }
    }

    /// Capability of the given category
    #[must_use]
    pub fn get(&self, category: ServiceCategory) -> Option<&Capability> {
        self.items.iter().find(|c| c.category() == category)
    }

    /// Whether the set holds the given category
    #[must_use]
    pub fn contains(&self, category: ServiceCategory) -> bool {
        self.get(category).is_some()
    }

    /// Bitmask of the present categories, see [`ServiceCategory::bit`]
    #[must_use]
    pub fn bitmask(&self) -> u16 {
        self.items.iter().fold(0, |mask, c| mask | c.category().bit())
    }

    /// Iterate in ascending category order
    pub fn iter(&self) -> core::slice::Iter<'_, Capability> {
        self.items.iter()
    }

    /// Number of categories present
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove every capability
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Codec type of the media codec capability, if any
    #[must_use]
    pub fn codec_type(&self) -> Option<CodecType> {
        match self.get(ServiceCategory::MediaCodec) {
            Some(Capability::MediaCodec { codec_type, .. }) => Some(*codec_type),
            _ => None,
        }
    }

    /// Codec information element of the media codec capability, if any
    #[must_use]
    pub fn codec_info(&self) -> Option<&[u8]> {
        match self.get(ServiceCategory::MediaCodec) {
            Some(Capability::MediaCodec { info, .. }) => Some(info.as_slice()),
            _ => None,
        }
    }

    /// Encode every capability in ascending category order
    ///
    /// # Errors
    /// Returns [`PduError::MessageTooLarge`] if `out` has no room left
    pub fn encode<const N: usize>(&self, out: &mut Vec<u8, N>) -> Result<(), PduError> {
        self.encode_filtered(out, |_| true)
    }

    /// Encode the capabilities whose category passes `include`
    ///
    /// # Errors
    /// Returns [`PduError::MessageTooLarge`] if `out` has no room left
    pub fn encode_filtered<const N: usize>(
        &self,
        out: &mut Vec<u8, N>,
        include: impl Fn(ServiceCategory) -> bool,
    ) -> Result<(), PduError> {
        self.items
            .iter()
            .filter(|c| include(c.category()))
            .try_for_each(|c| c.encode(out))
    }

    /// Decode a capability list
    ///
    /// Elements of unknown categories are skipped, see
    /// [`Capabilities::first_unknown_category`].
    ///
    /// # Errors
    /// Fails the whole list if a declared length runs past the end of the
    /// buffer, a known element is malformed, or a category repeats
    pub fn decode(bytes: &[u8]) -> Result<Self, CapabilityError> {
        let mut capabilities = Self::new();
        for element in Elements::new(bytes) {
            let (raw_category, value) = element?;
            let Some(category) = ServiceCategory::from_u8(raw_category) else {
                debug!("[SIGNALING] skipping unknown service category {}", raw_category);
                continue;
            };
            let capability = Capability::decode(category, value)?;
            capabilities
                .insert(capability)
                .map_err(|_| CapabilityError::new(category, ErrorCode::BadPayloadFormat))?;
        }
        Ok(capabilities)
    }

    /// First element in a capability list whose category is not defined
    #[must_use]
    pub fn first_unknown_category(bytes: &[u8]) -> Option<u8> {
        Elements::new(bytes)
            .map_while(Result::ok)
            .map(|(category, _)| category)
            .find(|category| ServiceCategory::from_u8(*category).is_none())
    }
}

/// Iterator over the raw `{category, length, value}` elements of a list
struct Elements<'a> {
    bytes: &'a [u8],
}

impl<'a> Elements<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl<'a> Iterator for Elements<'a> {
    type Item = Result<(u8, &'a [u8]), CapabilityError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.bytes.is_empty() {
            return None;
        }
        let category = self.bytes[0];
        let truncated = CapabilityError {
            category,
            code: ErrorCode::BadLength,
        };
        let Some(&len) = self.bytes.get(1) else {
            self.bytes = &[];
            return Some(Err(truncated));
        };
        let end = 2 + usize::from(len);
        if end > self.bytes.len() {
            self.bytes = &[];
            return Some(Err(truncated));
        }
        let value = &self.bytes[2..end];
        self.bytes = &self.bytes[end..];
        Some(Ok((category, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sbc_codec() -> Capability {
        Capability::media_codec(MediaType::Audio, CodecType::Sbc, &[0xFF, 0xFF, 2, 53]).unwrap()
    }

    #[test]
    fn test_encode_in_ascending_category_order() {
        let mut caps = Capabilities::new();
        caps.insert(sbc_codec()).unwrap();
        caps.insert(Capability::DelayReporting).unwrap();
        caps.insert(Capability::MediaTransport).unwrap();

        let mut bytes = Vec::<u8, 32>::new();
        caps.encode(&mut bytes).unwrap();
        assert_eq!(
            bytes.as_slice(),
            &[0x01, 0x00, 0x07, 0x06, 0x00, 0x00, 0xFF, 0xFF, 0x02, 0x35, 0x08, 0x00]
        );
        assert_eq!(Capabilities::decode(&bytes).unwrap(), caps);
    }

    #[test]
    fn test_duplicate_category_rejected() {
        let mut caps = Capabilities::new();
        caps.insert(Capability::MediaTransport).unwrap();
        assert_eq!(
            caps.insert(Capability::MediaTransport),
            Err(AvdtpError::CategoryAlreadyRegistered(
                ServiceCategory::MediaTransport
            ))
        );
        assert_eq!(caps.len(), 1);
    }

    #[test]
    fn test_bitmask() {
        let mut caps = Capabilities::new();
        caps.insert(Capability::MediaTransport).unwrap();
        caps.insert(sbc_codec()).unwrap();
        assert_eq!(caps.bitmask(), (1 << 1) | (1 << 7));
        assert!(caps.contains(ServiceCategory::MediaCodec));
        assert!(!caps.contains(ServiceCategory::Recovery));
    }

    #[test]
    fn test_unknown_category_skipped() {
        let bytes = [0x01, 0x00, 0x42, 0x02, 0xAA, 0xBB, 0x08, 0x00];
        let caps = Capabilities::decode(&bytes).unwrap();
        assert_eq!(caps.len(), 2);
        assert!(caps.contains(ServiceCategory::DelayReporting));
        assert_eq!(Capabilities::first_unknown_category(&bytes), Some(0x42));
    }

    #[test]
    fn test_declared_length_past_buffer_fails() {
        let bytes = [0x01, 0x00, 0x07, 0x06, 0x00, 0x00];
        assert_eq!(
            Capabilities::decode(&bytes),
            Err(CapabilityError {
                category: 0x07,
                code: ErrorCode::BadLength
            })
        );
        // Unknown category with an overrunning length fails too
        assert!(Capabilities::decode(&[0x55, 0x04, 0x00]).is_err());
    }

    #[test]
    fn test_recovery_element_checks() {
        let ok = Capabilities::decode(&[0x03, 0x03, 0x01, 0x18, 0x01]).unwrap();
        assert_eq!(
            ok.get(ServiceCategory::Recovery),
            Some(&Capability::Recovery {
                recovery_type: 1,
                window_size: 24,
                packet_count: 1
            })
        );

        let bad_type = Capabilities::decode(&[0x03, 0x03, 0x02, 0x05, 0x05]);
        assert_eq!(bad_type.unwrap_err().code, ErrorCode::BadRecoveryType);

        let bad_window = Capabilities::decode(&[0x03, 0x03, 0x01, 0x19, 0x05]);
        assert_eq!(bad_window.unwrap_err().code, ErrorCode::BadRecoveryFormat);
    }

    #[test]
    fn test_recovery_validation_range() {
        let recovery = |window_size| Capability::Recovery {
            recovery_type: RECOVERY_TYPE_RFC2733,
            window_size,
            packet_count: 4,
        };
        assert!(recovery(1).validate().is_ok());
        assert!(recovery(24).validate().is_ok());
        assert_eq!(
            recovery(0).validate(),
            Err(AvdtpError::InvalidParameter(ServiceCategory::Recovery))
        );
        assert_eq!(
            recovery(25).validate(),
            Err(AvdtpError::InvalidParameter(ServiceCategory::Recovery))
        );
    }

    #[test]
    fn test_header_compression_and_multiplexing_layout() {
        let mut caps = Capabilities::new();
        caps.insert(Capability::HeaderCompression {
            back_channel: true,
            media: false,
            recovery: true,
        })
        .unwrap();
        let mut identifiers = Vec::new();
        identifiers
            .push(TransportIdentifier {
                session: 1,
                channel: 2,
            })
            .unwrap();
        caps.insert(Capability::Multiplexing {
            fragmentation: true,
            identifiers,
        })
        .unwrap();

        let mut bytes = Vec::<u8, 16>::new();
        caps.encode(&mut bytes).unwrap();
        assert_eq!(
            bytes.as_slice(),
            &[0x05, 0x01, 0xA0, 0x06, 0x03, 0x80, 0x08, 0x10]
        );
        assert_eq!(Capabilities::decode(&bytes).unwrap(), caps);
    }

    #[test]
    fn test_content_protection_is_little_endian() {
        let cp = Capability::content_protection(0x0002, &[0x01]).unwrap();
        let mut bytes = Vec::<u8, 8>::new();
        cp.encode(&mut bytes).unwrap();
        assert_eq!(bytes.as_slice(), &[0x04, 0x03, 0x02, 0x00, 0x01]);

        let too_large = [0u8; MAX_CONTENT_PROTECTION_VALUE_LEN + 1];
        assert_eq!(
            Capability::content_protection(0x0002, &too_large),
            Err(AvdtpError::InformationTooLarge(
                ServiceCategory::ContentProtection
            ))
        );
    }

    #[test]
    fn test_filtered_encoding_drops_category() {
        let mut caps = Capabilities::new();
        caps.insert(Capability::MediaTransport).unwrap();
        caps.insert(Capability::DelayReporting).unwrap();

        let mut bytes = Vec::<u8, 8>::new();
        caps.encode_filtered(&mut bytes, |c| c != ServiceCategory::DelayReporting)
            .unwrap();
        assert_eq!(bytes.as_slice(), &[0x01, 0x00]);
    }
}
