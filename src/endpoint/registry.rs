//! Capability Registry
//!
//! Owns the local stream endpoints and their registered capabilities. Each
//! category can be registered once per endpoint; parameters are checked at
//! registration time so a peer never sees an element we could not defend.

use super::capability::{Capabilities, Capability, ServiceCategory, TransportIdentifier};
use super::{MediaType, SepType, StreamEndpoint, StreamEndpointId};
use crate::codec::CodecType;
use crate::constants::{MAX_SEID, MAX_STREAM_ENDPOINTS, MIN_SEID, RECOVERY_TYPE_RFC2733};
use crate::error::AvdtpError;
use heapless::Vec;

/// Local stream endpoint table
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: Vec<StreamEndpoint, MAX_STREAM_ENDPOINTS>,
}

impl EndpointRegistry {
    /// Create an empty registry
    #[must_use]
    pub const fn new() -> Self {
        Self {
            endpoints: Vec::new(),
        }
    }

    /// Register a new stream endpoint, returning its identifier
    ///
    /// Identifiers are assigned from 1 upwards, reusing none.
    ///
    /// # Errors
    /// Returns [`AvdtpError::CapacityExceeded`] if the table is full
    pub fn register(
        &mut self,
        sep_type: SepType,
        media_type: MediaType,
    ) -> Result<StreamEndpointId, AvdtpError> {
        let seid = (MIN_SEID..=MAX_SEID)
            .find(|seid| self.find(*seid).is_none())
            .ok_or(AvdtpError::CapacityExceeded)?;
        self.endpoints
            .push(StreamEndpoint::new(seid, sep_type, media_type))
            .map_err(|_| AvdtpError::CapacityExceeded)?;
        info!("[AVDTP] registered SEP {} ({}, {})", seid, sep_type, media_type);
        Ok(seid)
    }

    /// Endpoint by identifier
    #[must_use]
    pub fn find(&self, seid: StreamEndpointId) -> Option<&StreamEndpoint> {
        self.endpoints.iter().find(|ep| ep.seid == seid)
    }

    /// Mutable endpoint by identifier
    pub fn find_mut(&mut self, seid: StreamEndpointId) -> Option<&mut StreamEndpoint> {
        self.endpoints.iter_mut().find(|ep| ep.seid == seid)
    }

    /// Endpoint by identifier
    ///
    /// # Errors
    /// Returns [`AvdtpError::EndpointNotFound`] for an unknown identifier
    pub fn get(&self, seid: StreamEndpointId) -> Result<&StreamEndpoint, AvdtpError> {
        self.find(seid).ok_or(AvdtpError::EndpointNotFound)
    }

    /// Mutable endpoint by identifier
    ///
    /// # Errors
    /// Returns [`AvdtpError::EndpointNotFound`] for an unknown identifier
    pub fn get_mut(&mut self, seid: StreamEndpointId) -> Result<&mut StreamEndpoint, AvdtpError> {
        self.find_mut(seid).ok_or(AvdtpError::EndpointNotFound)
    }

    /// All endpoints in registration order
    pub fn iter(&self) -> core::slice::Iter<'_, StreamEndpoint> {
        self.endpoints.iter()
    }

    /// All endpoints in registration order, mutably
    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, StreamEndpoint> {
        self.endpoints.iter_mut()
    }

    /// First endpoint free to start a new stream
    #[must_use]
    pub fn first_available(&self) -> Option<StreamEndpointId> {
        self.endpoints
            .iter()
            .find(|ep| ep.is_available())
            .map(|ep| ep.seid)
    }

    /// Registered capabilities and category bitmask of an endpoint
    ///
    /// # Errors
    /// Returns [`AvdtpError::EndpointNotFound`] for an unknown identifier
    pub fn query(&self, seid: StreamEndpointId) -> Result<(&Capabilities, u16), AvdtpError> {
        let endpoint = self.get(seid)?;
        Ok((&endpoint.capabilities, endpoint.registered_categories()))
    }

    /// Register one capability on an endpoint
    ///
    /// # Errors
    /// Returns [`AvdtpError::CategoryAlreadyRegistered`] for a repeated
    /// category and [`AvdtpError::InvalidParameter`] for out-of-range
    /// parameters; the endpoint is left unchanged
    pub fn register_capability(
        &mut self,
        seid: StreamEndpointId,
        capability: Capability,
    ) -> Result<(), AvdtpError> {
        capability.validate()?;
        let endpoint = self.get_mut(seid)?;
        let category = capability.category();
        endpoint.capabilities.insert(capability)?;
        debug!("[AVDTP] SEP {}: registered {}", seid, category);
        Ok(())
    }

    /// Register the media transport category
    ///
    /// # Errors
    /// See [`EndpointRegistry::register_capability`]
    pub fn register_media_transport(&mut self, seid: StreamEndpointId) -> Result<(), AvdtpError> {
        self.register_capability(seid, Capability::MediaTransport)
    }

    /// Register the reporting category
    ///
    /// # Errors
    /// See [`EndpointRegistry::register_capability`]
    pub fn register_reporting(&mut self, seid: StreamEndpointId) -> Result<(), AvdtpError> {
        self.register_capability(seid, Capability::Reporting)
    }

    /// Register the delay reporting category
    ///
    /// # Errors
    /// See [`EndpointRegistry::register_capability`]
    pub fn register_delay_reporting(&mut self, seid: StreamEndpointId) -> Result<(), AvdtpError> {
        self.register_capability(seid, Capability::DelayReporting)
    }

    /// Register RFC 2733 recovery with window size and packet count bounds (1-24)
    ///
    /// # Errors
    /// See [`EndpointRegistry::register_capability`]
    pub fn register_recovery(
        &mut self,
        seid: StreamEndpointId,
        window_size: u8,
        packet_count: u8,
    ) -> Result<(), AvdtpError> {
        self.register_capability(
            seid,
            Capability::Recovery {
                recovery_type: RECOVERY_TYPE_RFC2733,
                window_size,
                packet_count,
            },
        )
    }

    /// Register content protection with its type specific value
    ///
    /// # Errors
    /// Returns [`AvdtpError::InformationTooLarge`] if `value` exceeds the
    /// budget, see also [`EndpointRegistry::register_capability`]
    pub fn register_content_protection(
        &mut self,
        seid: StreamEndpointId,
        cp_type: u16,
        value: &[u8],
    ) -> Result<(), AvdtpError> {
        let capability = Capability::content_protection(cp_type, value)?;
        self.register_capability(seid, capability)
    }

    /// Register header compression
    ///
    /// # Errors
    /// See [`EndpointRegistry::register_capability`]
    pub fn register_header_compression(
        &mut self,
        seid: StreamEndpointId,
        back_channel: bool,
        media: bool,
        recovery: bool,
    ) -> Result<(), AvdtpError> {
        self.register_capability(
            seid,
            Capability::HeaderCompression {
                back_channel,
                media,
                recovery,
            },
        )
    }

    /// Register multiplexing, optionally with transport identifiers
    ///
    /// # Errors
    /// Returns [`AvdtpError::InvalidParameter`] for identifiers outside
    /// 1-30, see also [`EndpointRegistry::register_capability`]
    pub fn register_multiplexing(
        &mut self,
        seid: StreamEndpointId,
        fragmentation: bool,
        identifiers: &[TransportIdentifier],
    ) -> Result<(), AvdtpError> {
        let identifiers = Vec::from_slice(identifiers)
            .map_err(|()| AvdtpError::InvalidParameter(ServiceCategory::Multiplexing))?;
        self.register_capability(
            seid,
            Capability::Multiplexing {
                fragmentation,
                identifiers,
            },
        )
    }

    /// Register the media codec with its opaque information element
    ///
    /// # Errors
    /// Returns [`AvdtpError::InformationTooLarge`] if `info` exceeds the
    /// budget, see also [`EndpointRegistry::register_capability`]
    pub fn register_media_codec(
        &mut self,
        seid: StreamEndpointId,
        codec_type: CodecType,
        info: &[u8],
    ) -> Result<(), AvdtpError> {
        let media_type = self.get(seid)?.media_type;
        let capability = Capability::media_codec(media_type, codec_type, info)?;
        self.register_capability(seid, capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SbcCapabilities;
    use crate::constants::MAX_MEDIA_CODEC_INFO_LEN;

    fn registry_with_source() -> (EndpointRegistry, StreamEndpointId) {
        let mut registry = EndpointRegistry::new();
        let seid = registry.register(SepType::Source, MediaType::Audio).unwrap();
        (registry, seid)
    }

    #[test]
    fn test_identifiers_are_unique() {
        let mut registry = EndpointRegistry::new();
        let first = registry.register(SepType::Source, MediaType::Audio).unwrap();
        let second = registry.register(SepType::Sink, MediaType::Audio).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert!(registry.get(3).is_err());
    }

    #[test]
    fn test_table_capacity() {
        let mut registry = EndpointRegistry::new();
        for _ in 0..MAX_STREAM_ENDPOINTS {
            registry.register(SepType::Sink, MediaType::Audio).unwrap();
        }
        assert_eq!(
            registry.register(SepType::Sink, MediaType::Audio),
            Err(AvdtpError::CapacityExceeded)
        );
    }

    #[test]
    fn test_same_category_twice_fails() {
        let (mut registry, seid) = registry_with_source();
        registry.register_media_transport(seid).unwrap();
        assert_eq!(
            registry.register_media_transport(seid),
            Err(AvdtpError::CategoryAlreadyRegistered(
                ServiceCategory::MediaTransport
            ))
        );
    }

    #[test]
    fn test_recovery_window_bounds() {
        let (mut registry, seid) = registry_with_source();
        assert_eq!(
            registry.register_recovery(seid, 0, 4),
            Err(AvdtpError::InvalidParameter(ServiceCategory::Recovery))
        );
        assert_eq!(
            registry.register_recovery(seid, 25, 4),
            Err(AvdtpError::InvalidParameter(ServiceCategory::Recovery))
        );
        // Failed registrations leave the category free
        registry.register_recovery(seid, 24, 1).unwrap();
        let (_, mask) = registry.query(seid).unwrap();
        assert_eq!(mask, ServiceCategory::Recovery.bit());
    }

    #[test]
    fn test_codec_information_budget() {
        let (mut registry, seid) = registry_with_source();
        let too_large = [0u8; MAX_MEDIA_CODEC_INFO_LEN + 1];
        assert_eq!(
            registry.register_media_codec(seid, CodecType::VendorSpecific, &too_large),
            Err(AvdtpError::InformationTooLarge(ServiceCategory::MediaCodec))
        );

        let sbc = SbcCapabilities::default().encode();
        registry.register_media_codec(seid, CodecType::Sbc, &sbc).unwrap();
        let (caps, _) = registry.query(seid).unwrap();
        assert_eq!(caps.codec_type(), Some(CodecType::Sbc));
        assert_eq!(caps.codec_info(), Some(&sbc[..]));
    }

    #[test]
    fn test_multiplexing_identifier_range() {
        let (mut registry, seid) = registry_with_source();
        let bad = [TransportIdentifier {
            session: 0,
            channel: 1,
        }];
        assert_eq!(
            registry.register_multiplexing(seid, true, &bad),
            Err(AvdtpError::InvalidParameter(ServiceCategory::Multiplexing))
        );
        registry.register_multiplexing(seid, true, &[]).unwrap();
    }

    #[test]
    fn test_unknown_endpoint() {
        let mut registry = EndpointRegistry::new();
        assert_eq!(
            registry.register_delay_reporting(9),
            Err(AvdtpError::EndpointNotFound)
        );
        assert!(registry.query(9).is_err());
    }

    #[test]
    fn test_first_available_skips_endpoints_in_use() {
        let mut registry = EndpointRegistry::new();
        let first = registry.register(SepType::Source, MediaType::Audio).unwrap();
        let second = registry.register(SepType::Source, MediaType::Audio).unwrap();
        registry.get_mut(first).unwrap().connection = Some(1);
        assert_eq!(registry.first_available(), Some(first));

        registry.get_mut(first).unwrap().in_use = true;
        assert_eq!(registry.first_available(), Some(second));
    }
}
