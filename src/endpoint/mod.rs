//! Stream Endpoints
//!
//! A stream endpoint (SEP) is a long-lived local audio/video source or sink.
//! It is registered once, reused across connections, and carries three
//! cooperating state machines:
//!
//! - the top-level lifecycle, [`StreamEndpointState`]
//! - the initiator role, [`InitiatorState`], derived from the outstanding
//!   command it sent
//! - the acceptor role, [`AcceptorState`], derived from the outstanding
//!   command it received
//!
//! Valid combinations: the initiator is `Idle` whenever the lifecycle is
//! `Idle`, except while a discovery or capability sequence runs in
//! `Configuration`. The acceptor is only `Answering` between receiving a
//! command and its answer leaving the transport. During `Aborting` the
//! initiator may still hold the ABORT command, whose answer is ignored.

pub mod capability;
pub mod registry;
pub mod transaction;

pub use capability::{Capabilities, Capability, ServiceCategory};
pub use registry::EndpointRegistry;
pub use transaction::{LabelAllocator, TransactionSlots};

use crate::constants::{MAX_MEDIA_PACKET_SIZE, MAX_REMOTE_SEPS, MAX_TRANSPORT_CHANNELS};
use crate::engine::ConnectionHandle;
use crate::signaling::{SepInfo, SignalId};
use crate::transport::ChannelId;
use heapless::Vec;

/// Stream Endpoint Identifier (SEID) type, 6 bits on the wire
pub type StreamEndpointId = u8;

/// Media types supported by AVDTP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MediaType {
    /// Audio media
    Audio = 0x00,
    /// Video media
    Video = 0x01,
    /// Multimedia media
    Multimedia = 0x02,
}

impl MediaType {
    /// Convert from the 4-bit wire value
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Audio),
            0x01 => Some(Self::Video),
            0x02 => Some(Self::Multimedia),
            _ => None,
        }
    }
}

/// Stream endpoint type (TSEP)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SepType {
    /// Sends media
    Source = 0x00,
    /// Receives media
    Sink = 0x01,
}

impl SepType {
    /// Convert from the 1-bit wire value
    #[must_use]
    pub const fn from_bit(value: u8) -> Self {
        if value & 0x01 == 0 {
            Self::Source
        } else {
            Self::Sink
        }
    }

    /// The type a peer endpoint must have to stream with this one
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Source => Self::Sink,
            Self::Sink => Self::Source,
        }
    }
}

/// Top-level stream endpoint lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamEndpointState {
    /// Not configured, initial and terminal state
    Idle,
    /// Discovery, capability and configuration exchange in progress
    Configuration,
    /// Configuration accepted by both sides
    Configured,
    /// OPEN sent or received, answer outstanding
    AwaitingOpenAnswer,
    /// OPEN accepted, waiting for the transport channels
    AwaitingMediaChannel,
    /// All transport channels connected
    Open,
    /// START sent, answer outstanding
    AwaitingStartAnswer,
    /// START received, answer not sent yet
    AwaitingStreamingChannel,
    /// Media flowing
    Streaming,
    /// CLOSE sent or received
    Closing,
    /// ABORT sent or received
    Aborting,
    /// Waiting for the transport channels to close
    AwaitingMediaChannelClose,
}

impl StreamEndpointState {
    /// Whether the endpoint holds an accepted configuration
    #[must_use]
    pub const fn is_configured(self) -> bool {
        !matches!(self, Self::Idle | Self::Configuration)
    }
}

/// Initiator role state, W2 = waiting to send, W4 = waiting for the answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitiatorState {
    /// No command outstanding
    Idle,
    /// Command queued behind a busy channel
    Sending(SignalId),
    /// Command sent, waiting for the matching answer
    AwaitingResponse(SignalId),
}

/// Acceptor role state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AcceptorState {
    /// No command outstanding
    Idle,
    /// Answer to a received command not sent yet
    Answering(SignalId),
}

/// Remote stream endpoint learned through discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStreamEndpoint {
    /// Discovery information
    pub info: SepInfo,
    /// Capabilities, once fetched
    pub capabilities: Option<Capabilities>,
}

impl RemoteStreamEndpoint {
    /// Create a record without capabilities
    #[must_use]
    pub const fn new(info: SepInfo) -> Self {
        Self {
            info,
            capabilities: None,
        }
    }

    /// Whether a local endpoint of `sep_type` and `media_type` can stream with it
    #[must_use]
    pub fn matches(&self, sep_type: SepType, media_type: MediaType) -> bool {
        !self.info.in_use && self.info.sep_type == sep_type.peer() && self.info.media_type == media_type
    }
}

/// Local stream endpoint
#[derive(Debug, Clone)]
pub struct StreamEndpoint {
    /// Stream endpoint identifier
    pub seid: StreamEndpointId,
    /// Source or sink
    pub sep_type: SepType,
    /// Media type
    pub media_type: MediaType,
    /// Whether a configuration is active
    pub in_use: bool,
    /// Registered capabilities
    pub capabilities: Capabilities,
    /// Accepted configuration
    pub configuration: Capabilities,
    state: StreamEndpointState,
    /// Outstanding transactions
    pub transactions: TransactionSlots,
    /// Connected transport channels in media, reporting, recovery order
    pub channels: Vec<ChannelId, MAX_TRANSPORT_CHANNELS>,
    /// Transport channel requested but not reported open yet
    pub pending_channel: Option<ChannelId>,
    /// Outgoing MTU of the media channel
    pub media_mtu: Option<u16>,
    /// Remote endpoint of the active configuration
    pub remote_seid: Option<StreamEndpointId>,
    /// Signaling connection the endpoint is attached to
    pub connection: Option<ConnectionHandle>,
    /// Disconnect requested, close everything when the channels are down
    pub pending_disconnect: bool,
    /// Remote endpoints from the last discovery
    pub remote_endpoints: Vec<RemoteStreamEndpoint, MAX_REMOTE_SEPS>,
    /// Whether the running discovery continues to SET_CONFIGURATION by itself
    pub auto_configure: bool,
    /// Configuration proposed by an outstanding RECONFIGURE
    pub pending_reconfiguration: Option<Capabilities>,
    /// Configuration last read back with GET_CONFIGURATION
    pub reported_configuration: Option<Capabilities>,
    /// Last delay reported by the sink, in 1/10 milliseconds
    pub delay_report: Option<u16>,
    /// Next media packet sequence number
    pub sequence_number: u16,
    /// Synchronization source of outbound media packets
    pub ssrc: u32,
}

impl StreamEndpoint {
    /// Create an idle endpoint without capabilities
    #[must_use]
    pub fn new(seid: StreamEndpointId, sep_type: SepType, media_type: MediaType) -> Self {
        Self {
            seid,
            sep_type,
            media_type,
            in_use: false,
            capabilities: Capabilities::new(),
            configuration: Capabilities::new(),
            state: StreamEndpointState::Idle,
            transactions: TransactionSlots::new(),
            channels: Vec::new(),
            pending_channel: None,
            media_mtu: None,
            remote_seid: None,
            connection: None,
            pending_disconnect: false,
            remote_endpoints: Vec::new(),
            auto_configure: false,
            pending_reconfiguration: None,
            reported_configuration: None,
            delay_report: None,
            sequence_number: 0,
            ssrc: u32::from(seid),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> StreamEndpointState {
        self.state
    }

    /// Move to `state`, returning whether it changed
    pub fn set_state(&mut self, state: StreamEndpointState) -> bool {
        if self.state == state {
            return false;
        }
        debug!("[AVDTP] SEP {}: {} -> {}", self.seid, self.state, state);
        self.state = state;
        true
    }

    /// Initiator role state
    #[must_use]
    pub fn initiator_state(&self) -> InitiatorState {
        match self.transactions.initiator() {
            None => InitiatorState::Idle,
            Some(t) if t.sent => InitiatorState::AwaitingResponse(t.signal),
            Some(t) => InitiatorState::Sending(t.signal),
        }
    }

    /// Acceptor role state
    #[must_use]
    pub fn acceptor_state(&self) -> AcceptorState {
        self.transactions
            .acceptor()
            .map_or(AcceptorState::Idle, |t| AcceptorState::Answering(t.signal))
    }

    /// Registered-category bitmask
    #[must_use]
    pub fn registered_categories(&self) -> u16 {
        self.capabilities.bitmask()
    }

    /// Discovery record describing this endpoint
    #[must_use]
    pub const fn sep_info(&self) -> SepInfo {
        SepInfo {
            seid: self.seid,
            in_use: self.in_use,
            media_type: self.media_type,
            sep_type: self.sep_type,
        }
    }

    /// Number of transport channels the configuration needs
    #[must_use]
    pub fn required_channels(&self) -> usize {
        1 + usize::from(self.configuration.contains(ServiceCategory::Reporting))
            + usize::from(self.configuration.contains(ServiceCategory::Recovery))
    }

    /// Media transport channel, once connected
    #[must_use]
    pub fn media_channel(&self) -> Option<ChannelId> {
        self.channels.first().copied()
    }

    /// Largest media packet the media channel takes
    #[must_use]
    pub fn max_media_packet(&self) -> usize {
        self.media_mtu
            .map_or(MAX_MEDIA_PACKET_SIZE, |mtu| usize::from(mtu).min(MAX_MEDIA_PACKET_SIZE))
    }

    /// Whether `cid` is one of this endpoint's transport channels
    #[must_use]
    pub fn owns_channel(&self, cid: ChannelId) -> bool {
        self.channels.contains(&cid) || self.pending_channel == Some(cid)
    }

    /// Whether the endpoint can start a new stream
    ///
    /// An idle endpoint stays available while attached to a signaling
    /// connection, unless that connection is being torn down.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.in_use
            && self.state == StreamEndpointState::Idle
            && !self.pending_disconnect
            && self.transactions.initiator().is_none()
    }

    /// Remote endpoint record by identifier
    #[must_use]
    pub fn remote_endpoint(&self, seid: StreamEndpointId) -> Option<&RemoteStreamEndpoint> {
        self.remote_endpoints.iter().find(|r| r.info.seid == seid)
    }

    /// Mutable remote endpoint record by identifier
    pub fn remote_endpoint_mut(
        &mut self,
        seid: StreamEndpointId,
    ) -> Option<&mut RemoteStreamEndpoint> {
        self.remote_endpoints.iter_mut().find(|r| r.info.seid == seid)
    }

    /// Take the next media sequence number, wrapping at 16 bits
    pub fn next_sequence_number(&mut self) -> u16 {
        let sequence_number = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        sequence_number
    }

    /// Drop the stream configuration and return to `Idle`
    ///
    /// The signaling connection and the discovery results survive.
    pub fn reset_stream(&mut self) {
        self.in_use = false;
        self.configuration.clear();
        self.transactions.clear();
        self.channels.clear();
        self.pending_channel = None;
        self.media_mtu = None;
        self.remote_seid = None;
        self.auto_configure = false;
        self.pending_reconfiguration = None;
        self.reported_configuration = None;
        self.delay_report = None;
        self.set_state(StreamEndpointState::Idle);
    }

    /// Reset the stream and forget the signaling connection
    pub fn detach(&mut self) {
        self.reset_stream();
        self.connection = None;
        self.pending_disconnect = false;
        self.remote_endpoints.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SbcCapabilities;

    #[test]
    fn test_stream_endpoint_creation() {
        let endpoint = StreamEndpoint::new(1, SepType::Source, MediaType::Audio);
        assert_eq!(endpoint.seid, 1);
        assert_eq!(endpoint.sep_type, SepType::Source);
        assert_eq!(endpoint.state(), StreamEndpointState::Idle);
        assert_eq!(endpoint.initiator_state(), InitiatorState::Idle);
        assert_eq!(endpoint.acceptor_state(), AcceptorState::Idle);
        assert!(endpoint.is_available());
    }

    #[test]
    fn test_idle_endpoint_stays_available_on_its_connection() {
        let mut endpoint = StreamEndpoint::new(1, SepType::Sink, MediaType::Audio);
        endpoint.connection = Some(3);
        endpoint.in_use = true;
        endpoint.set_state(StreamEndpointState::Configured);
        assert!(!endpoint.is_available());

        endpoint.reset_stream();
        assert_eq!(endpoint.connection, Some(3));
        assert!(endpoint.is_available());

        endpoint.pending_disconnect = true;
        assert!(!endpoint.is_available());
        endpoint.detach();
        assert!(endpoint.is_available());
    }

    #[test]
    fn test_required_channels_follow_configuration() {
        let mut endpoint = StreamEndpoint::new(1, SepType::Sink, MediaType::Audio);
        endpoint
            .configuration
            .insert(Capability::MediaTransport)
            .unwrap();
        assert_eq!(endpoint.required_channels(), 1);

        endpoint.configuration.insert(Capability::Reporting).unwrap();
        endpoint
            .configuration
            .insert(Capability::Recovery {
                recovery_type: 1,
                window_size: 4,
                packet_count: 4,
            })
            .unwrap();
        assert_eq!(endpoint.required_channels(), 3);
    }

    #[test]
    fn test_reset_stream_keeps_connection() {
        let mut endpoint = StreamEndpoint::new(2, SepType::Source, MediaType::Audio);
        endpoint
            .configuration
            .insert(SbcCapabilities::default().to_capability().unwrap())
            .unwrap();
        endpoint.in_use = true;
        endpoint.connection = Some(1);
        endpoint.channels.push(0x41).unwrap();
        endpoint.set_state(StreamEndpointState::Streaming);

        endpoint.reset_stream();
        assert_eq!(endpoint.state(), StreamEndpointState::Idle);
        assert!(!endpoint.in_use);
        assert!(endpoint.configuration.is_empty());
        assert!(endpoint.channels.is_empty());
        assert_eq!(endpoint.connection, Some(1));

        endpoint.detach();
        assert_eq!(endpoint.connection, None);
    }

    #[test]
    fn test_sequence_number_wraps() {
        let mut endpoint = StreamEndpoint::new(1, SepType::Source, MediaType::Audio);
        endpoint.sequence_number = u16::MAX;
        assert_eq!(endpoint.next_sequence_number(), u16::MAX);
        assert_eq!(endpoint.next_sequence_number(), 0);
    }

    #[test]
    fn test_remote_endpoint_matching() {
        let remote = RemoteStreamEndpoint::new(SepInfo {
            seid: 3,
            in_use: false,
            media_type: MediaType::Audio,
            sep_type: SepType::Sink,
        });
        assert!(remote.matches(SepType::Source, MediaType::Audio));
        assert!(!remote.matches(SepType::Sink, MediaType::Audio));
        assert!(!remote.matches(SepType::Source, MediaType::Video));
    }
}
