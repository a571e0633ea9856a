//! AVDTP Engine
//!
//! The engine owns the stream endpoint registry and the signaling
//! connections, and turns channel transport notifications and application
//! requests into signaling traffic and endpoint state changes.
//!
//! It is a plain synchronous state machine: every entry point takes the
//! channel transport by `&mut` and returns once all resulting packets were
//! handed to it. Channel events that happen as a consequence of an action
//! (a channel opening, a packet arriving) are reported back later through the
//! `handle_*` methods, never from inside the action.
//!
//! ```text
//!   application ──► connect / open_stream / ... ──┐
//!                                                 ▼
//!   transport ──► handle_channel_opened ──►  AvdtpEngine ──► ChannelTransport::send
//!             ──► handle_data                     │
//!             ──► handle_channel_closed           ▼
//!                                           poll_event ──► application
//! ```

mod acceptor;
pub mod event;
mod initiator;

pub use event::AvdtpEvent;

use crate::constants::{
    DEFAULT_MEDIA_PAYLOAD_TYPE, MAX_CONNECTIONS, MAX_MEDIA_PACKET_SIZE, MAX_PENDING_EVENTS,
    MAX_QUEUED_SIGNALING_MESSAGES, MAX_STREAM_ENDPOINTS, MAX_TRANSPORT_CHANNELS,
    MIN_SIGNALING_MTU,
};
use crate::endpoint::{
    EndpointRegistry, LabelAllocator, MediaType, SepType, StreamEndpoint, StreamEndpointId,
    StreamEndpointState,
};
use crate::codec::CodecType;
use crate::error::AvdtpError;
use crate::endpoint::capability::ServiceCategory;
use crate::media::{self, MediaError, MediaFrame, MediaPacketHeader, SbcFragments, SbcMediaHeader};
use crate::signaling::{Fragments, MessageType, Reassembler, SignalingMessage};
use crate::transport::{ChannelId, ChannelTransport, TransportError};
use crate::{AvdtpOptions, BluetoothAddress};
use heapless::{Deque, Vec};

/// Handle of a signaling connection, unique while the connection exists
pub type ConnectionHandle = u16;

/// Receives inbound media packets of streaming endpoints
pub type MediaHandler = fn(StreamEndpointId, &MediaFrame<'_>);

/// Endpoints affected by one signaling message
pub(crate) type EndpointList = Vec<StreamEndpointId, MAX_STREAM_ENDPOINTS>;

pub(crate) fn single_endpoint(seid: StreamEndpointId) -> EndpointList {
    let mut endpoints = EndpointList::new();
    // Capacity is at least one
    let _ = endpoints.push(seid);
    endpoints
}

/// Signaling connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    /// Signaling channel requested, not open yet
    Opening,
    /// Signaling channel open
    Connected,
    /// Disconnect requested, waiting for the channels to close
    Disconnecting,
}

/// Signaling message waiting for the channel to accept data again
#[derive(Debug, Clone)]
struct Outgoing {
    message: SignalingMessage,
    endpoints: EndpointList,
}

/// One signaling channel to a remote device
#[derive(Debug)]
pub struct Connection {
    /// Connection handle
    pub handle: ConnectionHandle,
    /// Remote device
    pub address: BluetoothAddress,
    /// Signaling channel
    pub signaling_cid: ChannelId,
    /// Connection state
    pub state: ConnectionState,
    /// Outgoing MTU of the signaling channel
    pub mtu: u16,
    reassembler: Reassembler,
    labels: LabelAllocator,
    outbox: Deque<Outgoing, MAX_QUEUED_SIGNALING_MESSAGES>,
}

impl Connection {
    fn new(
        handle: ConnectionHandle,
        address: BluetoothAddress,
        signaling_cid: ChannelId,
        state: ConnectionState,
        mtu: u16,
    ) -> Self {
        Self {
            handle,
            address,
            signaling_cid,
            state,
            mtu: mtu.max(MIN_SIGNALING_MTU),
            reassembler: Reassembler::new(),
            labels: LabelAllocator::new(),
            outbox: Deque::new(),
        }
    }

    /// Number of signaling messages waiting for the channel
    #[must_use]
    pub fn queued_messages(&self) -> usize {
        self.outbox.len()
    }
}

enum Transmit {
    /// Nothing left the transport, retry later
    Busy,
    /// The message is lost
    Failed,
}

/// The AVDTP signaling and stream engine
#[derive(Debug)]
pub struct AvdtpEngine {
    options: AvdtpOptions,
    endpoints: EndpointRegistry,
    connections: Vec<Connection, MAX_CONNECTIONS>,
    next_handle: ConnectionHandle,
    events: Deque<AvdtpEvent, MAX_PENDING_EVENTS>,
    media_handler: Option<MediaHandler>,
}

impl Default for AvdtpEngine {
    fn default() -> Self {
        Self::new(AvdtpOptions::default())
    }
}

impl AvdtpEngine {
    /// Create an engine without endpoints or connections
    #[must_use]
    pub const fn new(options: AvdtpOptions) -> Self {
        Self {
            options,
            endpoints: EndpointRegistry::new(),
            connections: Vec::new(),
            next_handle: 0,
            events: Deque::new(),
            media_handler: None,
        }
    }

    /// Engine options
    #[must_use]
    pub const fn options(&self) -> &AvdtpOptions {
        &self.options
    }

    /// Local stream endpoints
    #[must_use]
    pub const fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    /// Local stream endpoints, for capability registration
    pub fn endpoints_mut(&mut self) -> &mut EndpointRegistry {
        &mut self.endpoints
    }

    /// Register a new local stream endpoint
    ///
    /// # Errors
    /// Returns [`AvdtpError::CapacityExceeded`] if the endpoint table is full
    pub fn register_stream_endpoint(
        &mut self,
        sep_type: SepType,
        media_type: MediaType,
    ) -> Result<StreamEndpointId, AvdtpError> {
        self.endpoints.register(sep_type, media_type)
    }

    /// Local stream endpoint by identifier
    ///
    /// # Errors
    /// Returns [`AvdtpError::EndpointNotFound`] for an unknown identifier
    pub fn endpoint(&self, seid: StreamEndpointId) -> Result<&StreamEndpoint, AvdtpError> {
        self.endpoints.get(seid)
    }

    /// Signaling connection by handle
    #[must_use]
    pub fn connection(&self, handle: ConnectionHandle) -> Option<&Connection> {
        self.connections.iter().find(|c| c.handle == handle)
    }

    /// Signaling connection to a remote device
    #[must_use]
    pub fn connection_by_address(&self, address: BluetoothAddress) -> Option<&Connection> {
        self.connections.iter().find(|c| c.address == address)
    }

    /// Install or remove the receiver of inbound media packets
    pub fn set_media_handler(&mut self, handler: Option<MediaHandler>) {
        self.media_handler = handler;
    }

    /// Whether a media handler is installed
    #[must_use]
    pub const fn has_media_handler(&self) -> bool {
        self.media_handler.is_some()
    }

    /// Take the oldest pending application event
    pub fn poll_event(&mut self) -> Option<AvdtpEvent> {
        self.events.pop_front()
    }

    pub(crate) fn push_event(&mut self, event: AvdtpEvent) {
        if self.events.is_full() {
            warn!("[AVDTP] event queue full, dropping oldest event");
            let _ = self.events.pop_front();
        }
        let _ = self.events.push_back(event);
    }

    /// Move an endpoint and report the change
    pub(crate) fn set_state(&mut self, seid: StreamEndpointId, state: StreamEndpointState) {
        let changed = self
            .endpoints
            .find_mut(seid)
            .is_some_and(|endpoint| endpoint.set_state(state));
        if changed {
            self.push_event(AvdtpEvent::StateChanged { seid, state });
        }
    }

    /// Drop an endpoint's stream and report it back in `Idle`
    pub(crate) fn reset_endpoint(&mut self, seid: StreamEndpointId) {
        let Some(endpoint) = self.endpoints.find_mut(seid) else {
            return;
        };
        let was_idle = endpoint.state() == StreamEndpointState::Idle;
        endpoint.reset_stream();
        if !was_idle {
            self.push_event(AvdtpEvent::StateChanged {
                seid,
                state: StreamEndpointState::Idle,
            });
        }
    }

    fn detach_endpoint(&mut self, seid: StreamEndpointId) {
        self.reset_endpoint(seid);
        if let Some(endpoint) = self.endpoints.find_mut(seid) {
            endpoint.detach();
        }
    }

    /// Give up a discovery or configuration sequence
    pub(crate) fn configuration_failed(&mut self, seid: StreamEndpointId, error: AvdtpError) {
        warn!("[AVDTP] SEP {}: configuration failed: {}", seid, error);
        self.push_event(AvdtpEvent::ConfigurationFailed { seid, error });
        self.reset_endpoint(seid);
    }

    fn connection_mut(&mut self, handle: ConnectionHandle) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.handle == handle)
    }

    fn attached_endpoints(&self, handle: ConnectionHandle) -> EndpointList {
        self.endpoints
            .iter()
            .filter(|endpoint| endpoint.connection == Some(handle))
            .map(|endpoint| endpoint.seid)
            .collect()
    }

    fn allocate_handle(&mut self) -> ConnectionHandle {
        loop {
            self.next_handle = self.next_handle.wrapping_add(1).max(1);
            if self.connection(self.next_handle).is_none() {
                return self.next_handle;
            }
        }
    }

    /// Connect to `address` with the first available local endpoint
    ///
    /// Discovery starts as soon as the signaling channel is open; with
    /// `auto_configure` the engine continues to SET_CONFIGURATION by itself.
    ///
    /// # Errors
    /// Returns [`AvdtpError::EndpointNotFound`] if no endpoint is available
    pub fn connect(
        &mut self,
        transport: &mut impl ChannelTransport,
        address: BluetoothAddress,
    ) -> Result<ConnectionHandle, AvdtpError> {
        let seid = self
            .endpoints
            .first_available()
            .ok_or(AvdtpError::EndpointNotFound)?;
        self.connect_with_endpoint(transport, address, seid)
    }

    /// Connect to `address` and configure a stream for local endpoint `seid`
    ///
    /// An existing signaling connection to the same device is reused,
    /// preferably the one the endpoint is still attached to from an earlier
    /// stream. Discovery starts right away when that connection is open.
    ///
    /// # Errors
    /// Returns [`AvdtpError::BadState`] if the endpoint is busy,
    /// [`AvdtpError::CapacityExceeded`] if no connection slot is free and
    /// [`AvdtpError::TransportFailure`] if the channel cannot be requested
    pub fn connect_with_endpoint(
        &mut self,
        transport: &mut impl ChannelTransport,
        address: BluetoothAddress,
        seid: StreamEndpointId,
    ) -> Result<ConnectionHandle, AvdtpError> {
        let endpoint = self.endpoints.get(seid)?;
        if !endpoint.is_available() {
            return Err(AvdtpError::BadState);
        }

        let reusable = |c: &Connection| {
            c.address == address && c.state != ConnectionState::Disconnecting
        };
        let attached = endpoint
            .connection
            .and_then(|handle| self.connection(handle))
            .filter(|c| reusable(*c))
            .map(|c| c.handle);
        let existing = attached.or_else(|| {
            self.connections
                .iter()
                .find(|c| reusable(*c))
                .map(|c| c.handle)
        });
        let handle = if let Some(handle) = existing {
            handle
        } else {
            if self.connections.is_full() {
                return Err(AvdtpError::CapacityExceeded);
            }
            let cid = transport.open(address, self.options.psm).map_err(|error| {
                warn!("[AVDTP] signaling channel request failed: {}", error);
                AvdtpError::TransportFailure
            })?;
            let handle = self.allocate_handle();
            let connection = Connection::new(
                handle,
                address,
                cid,
                ConnectionState::Opening,
                self.options.signaling_mtu,
            );
            self.connections
                .push(connection)
                .map_err(|_| AvdtpError::CapacityExceeded)?;
            info!("[AVDTP] opening signaling channel {} to {}", cid, address);
            handle
        };

        let auto_configure = self.options.auto_configure;
        let endpoint = self.endpoints.get_mut(seid)?;
        endpoint.connection = Some(handle);
        endpoint.auto_configure = auto_configure;
        self.set_state(seid, StreamEndpointState::Configuration);

        let connected = self
            .connection(handle)
            .is_some_and(|c| c.state == ConnectionState::Connected);
        if connected && let Err(error) = self.discover(transport, seid) {
            self.configuration_failed(seid, error);
            return Err(error);
        }
        Ok(handle)
    }

    /// Close every stream of a connection, then its signaling channel
    ///
    /// # Errors
    /// Returns [`AvdtpError::ConnectionNotFound`] for an unknown handle
    pub fn disconnect(
        &mut self,
        transport: &mut impl ChannelTransport,
        handle: ConnectionHandle,
    ) -> Result<(), AvdtpError> {
        let connection = self
            .connection_mut(handle)
            .ok_or(AvdtpError::ConnectionNotFound)?;
        connection.state = ConnectionState::Disconnecting;
        info!("[AVDTP] disconnecting {}", connection.address);

        for seid in self.attached_endpoints(handle) {
            if let Some(endpoint) = self.endpoints.find_mut(seid) {
                endpoint.pending_disconnect = true;
            }
            self.close_transport_channels(transport, seid);
        }
        self.close_signaling_if_idle(transport, handle);
        Ok(())
    }

    /// Frame `payload` as a media packet and send it on the endpoint's media channel
    ///
    /// `sbc` is the SBC media payload header and must be given exactly when
    /// the stream is configured for SBC. Returns the sequence number used.
    ///
    /// # Errors
    /// Returns [`AvdtpError::BadState`] unless the endpoint is streaming,
    /// [`AvdtpError::InvalidParameter`] if `sbc` does not match the codec,
    /// [`AvdtpError::ChannelBusy`] if the channel cannot take the packet now
    /// (the sequence number is not consumed) and
    /// [`AvdtpError::MessageTooLarge`] if the packet exceeds the media MTU
    pub fn send_media_packet(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
        timestamp: u32,
        marker: bool,
        sbc: Option<SbcMediaHeader>,
        payload: &[u8],
    ) -> Result<u16, AvdtpError> {
        let endpoint = self.endpoints.get_mut(seid)?;
        if endpoint.state() != StreamEndpointState::Streaming {
            return Err(AvdtpError::BadState);
        }
        let cid = endpoint.media_channel().ok_or(AvdtpError::BadState)?;
        let codec = endpoint
            .configuration
            .codec_type()
            .ok_or(AvdtpError::BadState)?;

        let sequence_number = endpoint.sequence_number;
        let mut header = MediaPacketHeader::new(
            DEFAULT_MEDIA_PAYLOAD_TYPE,
            sequence_number,
            timestamp,
            endpoint.ssrc,
        );
        header.marker = marker;

        let mut packet: Vec<u8, MAX_MEDIA_PACKET_SIZE> = Vec::new();
        media::frame(&header, codec, sbc, payload, &mut packet).map_err(|error| match error {
            MediaError::CodecHeaderMismatch => {
                AvdtpError::InvalidParameter(ServiceCategory::MediaCodec)
            }
            _ => AvdtpError::MessageTooLarge,
        })?;
        if packet.len() > endpoint.max_media_packet() {
            return Err(AvdtpError::MessageTooLarge);
        }

        match transport.send(cid, &packet) {
            Ok(()) => {
                endpoint.next_sequence_number();
                trace!("[AVDTP] SEP {}: media packet {}", seid, sequence_number);
                Ok(sequence_number)
            }
            Err(TransportError::Busy) => Err(AvdtpError::ChannelBusy),
            Err(error) => {
                warn!("[AVDTP] SEP {}: media send failed: {}", seid, error);
                Err(AvdtpError::TransportFailure)
            }
        }
    }

    /// Send one SBC frame, split across as many media packets as the media
    /// MTU requires
    ///
    /// Every packet carries the same timestamp. Returns the sequence number
    /// of the last packet. If sending stops part way, the fragments already
    /// handed to the transport stay sent.
    ///
    /// # Errors
    /// Returns [`AvdtpError::InvalidParameter`] unless the stream uses SBC,
    /// [`AvdtpError::MessageTooLarge`] if the frame needs more fragments than
    /// the SBC header can count, and the errors of
    /// [`AvdtpEngine::send_media_packet`]
    pub fn send_sbc_frame(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
        timestamp: u32,
        frame: &[u8],
    ) -> Result<u16, AvdtpError> {
        let endpoint = self.endpoints.get(seid)?;
        if endpoint.state() != StreamEndpointState::Streaming {
            return Err(AvdtpError::BadState);
        }
        if endpoint.configuration.codec_type() != Some(CodecType::Sbc) {
            return Err(AvdtpError::InvalidParameter(ServiceCategory::MediaCodec));
        }
        let room = endpoint
            .max_media_packet()
            .saturating_sub(media::RTP_FIXED_HEADER_SIZE + media::SBC_MEDIA_HEADER_SIZE);
        let fragments =
            SbcFragments::new(frame, room).map_err(|_| AvdtpError::MessageTooLarge)?;

        let mut last = 0;
        for (sbc, chunk) in fragments {
            last = self.send_media_packet(transport, seid, timestamp, false, Some(sbc), chunk)?;
        }
        Ok(last)
    }

    /// A channel requested by either side is open
    ///
    /// `remote` and `mtu` describe the peer and the channel's outgoing MTU.
    /// Channels this engine did not request are attributed by address: to
    /// the signaling connection of an unknown device, or to an endpoint of a
    /// known device that waits for its transport channels.
    pub fn handle_channel_opened(
        &mut self,
        transport: &mut impl ChannelTransport,
        cid: ChannelId,
        remote: BluetoothAddress,
        mtu: u16,
    ) {
        if let Some(connection) = self.connections.iter_mut().find(|c| c.signaling_cid == cid) {
            if connection.state != ConnectionState::Opening {
                debug!("[AVDTP] signaling channel {} already open", cid);
                return;
            }
            connection.state = ConnectionState::Connected;
            connection.mtu = mtu.max(MIN_SIGNALING_MTU);
            let handle = connection.handle;
            let address = connection.address;
            info!("[AVDTP] signaling channel {} to {} open", cid, address);
            self.push_event(AvdtpEvent::SignalingConnected { handle, address });
            self.start_pending_discoveries(transport, handle);
            return;
        }

        if let Some(seid) = self
            .endpoints
            .iter()
            .find(|endpoint| endpoint.pending_channel == Some(cid))
            .map(|endpoint| endpoint.seid)
        {
            self.transport_channel_connected(transport, seid, cid, mtu, true);
            return;
        }

        if let Some(connection) = self.connections.iter().find(|c| c.address == remote) {
            let handle = connection.handle;
            let waiting = if connection.state == ConnectionState::Connected {
                self.endpoints
                    .iter()
                    .find(|endpoint| {
                        endpoint.connection == Some(handle)
                            && endpoint.state() == StreamEndpointState::AwaitingMediaChannel
                            && endpoint.pending_channel.is_none()
                            && endpoint.channels.len() < endpoint.required_channels()
                    })
                    .map(|endpoint| endpoint.seid)
            } else {
                None
            };
            match waiting {
                Some(seid) => {
                    self.transport_channel_connected(transport, seid, cid, mtu, false);
                }
                None => {
                    warn!("[AVDTP] unexpected channel {} from {}, closing", cid, remote);
                    let _ = transport.close(cid);
                }
            }
            return;
        }

        let handle = self.allocate_handle();
        let connection = Connection::new(handle, remote, cid, ConnectionState::Connected, mtu);
        if self.connections.push(connection).is_err() {
            warn!("[AVDTP] no room for signaling channel {} from {}", cid, remote);
            let _ = transport.close(cid);
            return;
        }
        info!("[AVDTP] incoming signaling channel {} from {}", cid, remote);
        self.push_event(AvdtpEvent::SignalingConnected {
            handle,
            address: remote,
        });
    }

    /// A channel this engine requested could not be opened
    pub fn handle_channel_open_failed(
        &mut self,
        transport: &mut impl ChannelTransport,
        cid: ChannelId,
    ) {
        if let Some(index) = self
            .connections
            .iter()
            .position(|c| c.signaling_cid == cid && c.state == ConnectionState::Opening)
        {
            let connection = self.connections.remove(index);
            warn!("[AVDTP] signaling channel to {} failed", connection.address);
            for seid in self.attached_endpoints(connection.handle) {
                self.configuration_failed(seid, AvdtpError::TransportFailure);
                self.detach_endpoint(seid);
            }
            self.push_event(AvdtpEvent::SignalingConnectionFailed {
                address: connection.address,
            });
            return;
        }

        let Some(seid) = self
            .endpoints
            .iter()
            .find(|endpoint| endpoint.pending_channel == Some(cid))
            .map(|endpoint| endpoint.seid)
        else {
            debug!("[AVDTP] open failure for unknown channel {}", cid);
            return;
        };
        warn!("[AVDTP] SEP {}: transport channel {} failed", seid, cid);
        let released = self.release_channel(seid, cid);
        let awaiting = self
            .endpoints
            .find(seid)
            .is_some_and(|endpoint| endpoint.state() == StreamEndpointState::AwaitingMediaChannel);
        if awaiting {
            self.teardown_stream(transport, seid);
        } else if released {
            self.channels_released(transport, seid);
        }
    }

    /// A signaling or transport channel closed, on request or not
    pub fn handle_channel_closed(&mut self, transport: &mut impl ChannelTransport, cid: ChannelId) {
        if let Some(index) = self.connections.iter().position(|c| c.signaling_cid == cid) {
            self.signaling_closed(transport, index);
            return;
        }

        let Some(endpoint) = self.endpoints.iter().find(|endpoint| endpoint.owns_channel(cid))
        else {
            debug!("[AVDTP] close of unknown channel {}", cid);
            return;
        };
        let seid = endpoint.seid;
        let expected = matches!(
            endpoint.state(),
            StreamEndpointState::Closing
                | StreamEndpointState::Aborting
                | StreamEndpointState::AwaitingMediaChannelClose
        );

        debug!("[AVDTP] SEP {}: transport channel {} closed", seid, cid);
        if self.release_channel(seid, cid) {
            self.channels_released(transport, seid);
        } else if !expected {
            warn!("[AVDTP] SEP {}: lost transport channel {}", seid, cid);
            self.teardown_stream(transport, seid);
        }
    }

    /// Data arrived on a channel
    ///
    /// Signaling packets are reassembled and dispatched; media packets are
    /// handed to the media handler while the owning endpoint streams.
    pub fn handle_data(
        &mut self,
        transport: &mut impl ChannelTransport,
        cid: ChannelId,
        data: &[u8],
    ) {
        if let Some(connection) = self.connections.iter_mut().find(|c| c.signaling_cid == cid) {
            let handle = connection.handle;
            match connection.reassembler.push(data) {
                Ok(Some(message)) => self.dispatch(transport, handle, message),
                Ok(None) => trace!("[SIGNALING] fragment buffered on {}", cid),
                Err(error) => warn!("[SIGNALING] dropping packet on {}: {}", cid, error),
            }
            return;
        }

        let Some(endpoint) = self
            .endpoints
            .iter()
            .find(|endpoint| endpoint.media_channel() == Some(cid))
        else {
            debug!("[AVDTP] data on unknown channel {}", cid);
            return;
        };
        if endpoint.state() != StreamEndpointState::Streaming {
            debug!("[AVDTP] SEP {}: media while {}, dropped", endpoint.seid, endpoint.state());
            return;
        }
        let codec = endpoint
            .configuration
            .codec_type()
            .unwrap_or(CodecType::VendorSpecific);
        match media::parse_frame(data, codec) {
            Ok(frame) => {
                if let Some(handler) = self.media_handler {
                    handler(endpoint.seid, &frame);
                }
            }
            Err(error) => warn!("[AVDTP] SEP {}: bad media packet: {}", endpoint.seid, error),
        }
    }

    /// The channel can take data again after reporting busy
    pub fn handle_can_send_now(&mut self, transport: &mut impl ChannelTransport, cid: ChannelId) {
        if let Some(handle) = self
            .connections
            .iter()
            .find(|c| c.signaling_cid == cid)
            .map(|c| c.handle)
        {
            self.flush(transport, handle);
        }
    }

    fn dispatch(
        &mut self,
        transport: &mut impl ChannelTransport,
        handle: ConnectionHandle,
        message: SignalingMessage,
    ) {
        if message.message_type == MessageType::Command {
            self.handle_command(transport, handle, message);
        } else {
            self.handle_response(transport, handle, message);
        }
    }

    fn start_pending_discoveries(
        &mut self,
        transport: &mut impl ChannelTransport,
        handle: ConnectionHandle,
    ) {
        let waiting: EndpointList = self
            .endpoints
            .iter()
            .filter(|endpoint| {
                endpoint.connection == Some(handle)
                    && endpoint.state() == StreamEndpointState::Configuration
                    && endpoint.transactions.initiator().is_none()
            })
            .map(|endpoint| endpoint.seid)
            .collect();
        for seid in waiting {
            if let Err(error) = self.discover(transport, seid) {
                self.configuration_failed(seid, error);
            }
        }
    }

    /// Queue or send a signaling message
    ///
    /// `endpoints` are the local endpoints whose transactions the message
    /// belongs to.
    fn send_signal(
        &mut self,
        transport: &mut impl ChannelTransport,
        handle: ConnectionHandle,
        message: SignalingMessage,
        endpoints: EndpointList,
    ) -> Result<(), AvdtpError> {
        let connection = self
            .connection_mut(handle)
            .ok_or(AvdtpError::NotConnected)?;
        if connection.state == ConnectionState::Opening {
            return Err(AvdtpError::NotConnected);
        }
        if !connection.outbox.is_empty() {
            return connection
                .outbox
                .push_back(Outgoing { message, endpoints })
                .map_err(|_| AvdtpError::CapacityExceeded);
        }

        match Self::transmit(transport, connection.signaling_cid, connection.mtu, &message) {
            Ok(()) => {
                self.message_sent(&message, &endpoints);
                Ok(())
            }
            Err(Transmit::Busy) => {
                debug!("[AVDTP] signaling channel busy, queueing message");
                connection
                    .outbox
                    .push_back(Outgoing { message, endpoints })
                    .map_err(|_| AvdtpError::CapacityExceeded)
            }
            Err(Transmit::Failed) => Err(AvdtpError::TransportFailure),
        }
    }

    fn transmit(
        transport: &mut impl ChannelTransport,
        cid: ChannelId,
        mtu: u16,
        message: &SignalingMessage,
    ) -> Result<(), Transmit> {
        let fragments = Fragments::new(message, mtu).map_err(|error| {
            warn!("[SIGNALING] cannot fragment message: {}", error);
            Transmit::Failed
        })?;
        for (index, packet) in fragments.enumerate() {
            let packet = packet.map_err(|_| Transmit::Failed)?;
            match transport.send(cid, &packet) {
                Ok(()) => {}
                Err(TransportError::Busy) if index == 0 => return Err(Transmit::Busy),
                Err(error) => {
                    warn!(
                        "[SIGNALING] send on {} failed after {} packets: {}",
                        cid, index, error
                    );
                    return Err(Transmit::Failed);
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self, transport: &mut impl ChannelTransport, handle: ConnectionHandle) {
        loop {
            let Some(connection) = self.connection_mut(handle) else {
                return;
            };
            let (cid, mtu) = (connection.signaling_cid, connection.mtu);
            let Some(outgoing) = connection.outbox.pop_front() else {
                return;
            };
            match Self::transmit(transport, cid, mtu, &outgoing.message) {
                Ok(()) => self.message_sent(&outgoing.message, &outgoing.endpoints),
                Err(Transmit::Busy) => {
                    if let Some(connection) = self.connection_mut(handle) {
                        // The slot just freed by pop_front
                        let _ = connection.outbox.push_front(outgoing);
                    }
                    return;
                }
                Err(Transmit::Failed) => {
                    self.message_dropped(&outgoing.message, &outgoing.endpoints);
                }
            }
        }
    }

    /// Advance the transactions a message belongs to once it left the transport
    fn message_sent(&mut self, message: &SignalingMessage, endpoints: &[StreamEndpointId]) {
        let label = message.transaction_label;
        for &seid in endpoints {
            let Some(endpoint) = self.endpoints.find_mut(seid) else {
                continue;
            };
            match message.message_type {
                MessageType::Command => endpoint.transactions.mark_sent(label),
                MessageType::ResponseAccept => {
                    let answered = endpoint.transactions.complete_acceptor(label).is_some();
                    if answered && let Some(signal) = message.signal_id() {
                        self.answer_sent(seid, signal);
                    }
                }
                MessageType::ResponseReject | MessageType::GeneralReject => {
                    endpoint.transactions.complete_acceptor(label);
                }
            }
        }
    }

    /// Drop the transactions of a message that could not be sent
    fn message_dropped(&mut self, message: &SignalingMessage, endpoints: &[StreamEndpointId]) {
        let label = message.transaction_label;
        warn!("[SIGNALING] dropped message label {}", label);
        for &seid in endpoints {
            let Some(endpoint) = self.endpoints.find_mut(seid) else {
                continue;
            };
            if message.message_type == MessageType::Command {
                let pending = endpoint
                    .transactions
                    .initiator()
                    .is_some_and(|t| t.label == label);
                if pending && let Some(transaction) = endpoint.transactions.clear_initiator() {
                    self.command_failed(seid, transaction, AvdtpError::TransportFailure);
                }
            } else {
                endpoint.transactions.complete_acceptor(label);
            }
        }
    }

    /// Request the next transport channel of an endpoint
    fn open_transport_channel(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
    ) -> Result<(), AvdtpError> {
        let handle = self
            .endpoints
            .get(seid)?
            .connection
            .ok_or(AvdtpError::NotConnected)?;
        let address = self
            .connection(handle)
            .ok_or(AvdtpError::NotConnected)?
            .address;
        let cid = transport.open(address, self.options.psm).map_err(|error| {
            warn!("[AVDTP] SEP {}: transport channel request failed: {}", seid, error);
            AvdtpError::TransportFailure
        })?;
        self.endpoints.get_mut(seid)?.pending_channel = Some(cid);
        Ok(())
    }

    fn transport_channel_connected(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
        cid: ChannelId,
        mtu: u16,
        outbound: bool,
    ) {
        let Some(endpoint) = self.endpoints.find_mut(seid) else {
            return;
        };
        if endpoint.pending_channel == Some(cid) {
            endpoint.pending_channel = None;
        }
        if endpoint.channels.push(cid).is_err() {
            warn!("[AVDTP] SEP {}: no room for channel {}", seid, cid);
            let _ = transport.close(cid);
            return;
        }
        if endpoint.channels.len() == 1 {
            endpoint.media_mtu = Some(mtu);
        }
        if endpoint.state() != StreamEndpointState::AwaitingMediaChannel {
            debug!("[AVDTP] SEP {}: channel {} no longer needed", seid, cid);
            let _ = transport.close(cid);
            return;
        }

        let connected = endpoint.channels.len();
        let required = endpoint.required_channels();
        debug!(
            "[AVDTP] SEP {}: transport channel {} connected ({}/{})",
            seid, cid, connected, required
        );
        if connected >= required {
            self.set_state(seid, StreamEndpointState::Open);
        } else if outbound && self.open_transport_channel(transport, seid).is_err() {
            self.teardown_stream(transport, seid);
        }
    }

    /// Forget a transport channel, returning whether none are left
    fn release_channel(&mut self, seid: StreamEndpointId, cid: ChannelId) -> bool {
        let Some(endpoint) = self.endpoints.find_mut(seid) else {
            return false;
        };
        if endpoint.pending_channel == Some(cid) {
            endpoint.pending_channel = None;
        }
        endpoint.channels.retain(|c| *c != cid);
        endpoint.channels.is_empty() && endpoint.pending_channel.is_none()
    }

    /// Request every transport channel of an endpoint to close
    fn close_transport_channels(&mut self, transport: &mut impl ChannelTransport, seid: StreamEndpointId) {
        let Some(endpoint) = self.endpoints.find(seid) else {
            return;
        };
        let cids: Vec<ChannelId, { MAX_TRANSPORT_CHANNELS + 1 }> = endpoint
            .channels
            .iter()
            .copied()
            .chain(endpoint.pending_channel)
            .collect();
        for cid in cids {
            if let Err(error) = transport.close(cid) {
                debug!("[AVDTP] channel {} close failed: {}", cid, error);
                if self.release_channel(seid, cid) {
                    self.channels_released(transport, seid);
                }
            }
        }
    }

    /// Stop a stream after a transport failure
    fn teardown_stream(&mut self, transport: &mut impl ChannelTransport, seid: StreamEndpointId) {
        let Some(endpoint) = self.endpoints.find_mut(seid) else {
            return;
        };
        endpoint.transactions.clear();
        if endpoint.channels.is_empty() && endpoint.pending_channel.is_none() {
            self.reset_endpoint(seid);
            return;
        }
        self.set_state(seid, StreamEndpointState::AwaitingMediaChannelClose);
        self.close_transport_channels(transport, seid);
    }

    /// Every transport channel of an endpoint is gone
    fn channels_released(&mut self, transport: &mut impl ChannelTransport, seid: StreamEndpointId) {
        let Some(endpoint) = self.endpoints.find(seid) else {
            return;
        };
        let connection = endpoint.connection;
        let pending_disconnect = endpoint.pending_disconnect;
        match endpoint.state() {
            StreamEndpointState::Idle
            | StreamEndpointState::Configuration
            | StreamEndpointState::Configured => {}
            StreamEndpointState::Closing
            | StreamEndpointState::Aborting
            | StreamEndpointState::AwaitingMediaChannelClose => self.reset_endpoint(seid),
            state => {
                warn!("[AVDTP] SEP {}: transport lost while {}", seid, state);
                self.reset_endpoint(seid);
            }
        }
        if pending_disconnect && let Some(handle) = connection {
            self.close_signaling_if_idle(transport, handle);
        }
    }

    fn close_signaling_if_idle(&mut self, transport: &mut impl ChannelTransport, handle: ConnectionHandle) {
        let busy = self.endpoints.iter().any(|endpoint| {
            endpoint.connection == Some(handle)
                && (!endpoint.channels.is_empty() || endpoint.pending_channel.is_some())
        });
        let Some(connection) = self.connection(handle) else {
            return;
        };
        if busy || connection.state != ConnectionState::Disconnecting {
            return;
        }
        let cid = connection.signaling_cid;
        if let Err(error) = transport.close(cid) {
            debug!("[AVDTP] signaling close failed: {}", error);
            if let Some(index) = self.connections.iter().position(|c| c.handle == handle) {
                self.signaling_closed(transport, index);
            }
        }
    }

    fn signaling_closed(&mut self, transport: &mut impl ChannelTransport, index: usize) {
        let connection = self.connections.remove(index);
        info!("[AVDTP] signaling channel to {} closed", connection.address);
        for seid in self.attached_endpoints(connection.handle) {
            if let Some(endpoint) = self.endpoints.find(seid) {
                for &cid in &endpoint.channels {
                    let _ = transport.close(cid);
                }
            }
            self.detach_endpoint(seid);
        }
        self.push_event(AvdtpEvent::SignalingDisconnected {
            handle: connection.handle,
            address: connection.address,
        });
    }
}
