//! Initiator role
//!
//! Commands the local side sends, and what happens when their answers come
//! back. Every command opens the endpoint's single initiator transaction;
//! only ABORT may replace one that is still outstanding.

use super::{AvdtpEngine, AvdtpEvent, ConnectionHandle, ConnectionState, single_endpoint};
use crate::codec::select_configuration;
use crate::endpoint::capability::{Capabilities, ServiceCategory};
use crate::endpoint::transaction::InitiatorTransaction;
use crate::endpoint::{RemoteStreamEndpoint, SepType, StreamEndpointId, StreamEndpointState};
use crate::error::AvdtpError;
use crate::signaling::message::{configuration_payload, seid_to_byte};
use crate::signaling::{MessageType, SepInfo, SignalId, SignalingMessage};
use crate::transport::ChannelTransport;

impl AvdtpEngine {
    /// Open an initiator transaction and send its command
    ///
    /// `next_state` is entered once the command is handed to the transport
    /// or queued; on failure the endpoint stays where it was.
    fn issue_command(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
        signal: SignalId,
        payload: &[u8],
        remote_seid: Option<StreamEndpointId>,
        next_state: Option<StreamEndpointState>,
    ) -> Result<(), AvdtpError> {
        let endpoint = self.endpoints.get(seid)?;
        let handle = endpoint.connection.ok_or(AvdtpError::NotConnected)?;
        let revert_state = endpoint.state();
        if signal != SignalId::Abort && endpoint.transactions.initiator().is_some() {
            return Err(AvdtpError::TransactionPending);
        }

        let connection = self
            .connection_mut(handle)
            .ok_or(AvdtpError::NotConnected)?;
        if connection.state != ConnectionState::Connected {
            return Err(AvdtpError::NotConnected);
        }
        let label = connection.labels.allocate();
        let message = SignalingMessage::command(label, signal, payload)
            .map_err(|_| AvdtpError::MessageTooLarge)?;

        let transaction = InitiatorTransaction {
            label,
            signal,
            remote_seid,
            revert_state,
            sent: false,
        };
        let endpoint = self.endpoints.get_mut(seid)?;
        if signal == SignalId::Abort {
            endpoint.transactions.preempt_initiator(transaction);
        } else {
            endpoint.transactions.begin_initiator(transaction)?;
        }
        debug!("[AVDTP] SEP {}: sending {} label {}", seid, signal, label);

        if let Some(state) = next_state {
            self.set_state(seid, state);
        }
        if let Err(error) = self.send_signal(transport, handle, message, single_endpoint(seid)) {
            if let Some(endpoint) = self.endpoints.find_mut(seid) {
                endpoint.transactions.clear_initiator();
            }
            self.set_state(seid, revert_state);
            return Err(error);
        }
        Ok(())
    }

    fn remote_seid_of(&self, seid: StreamEndpointId) -> Result<StreamEndpointId, AvdtpError> {
        self.endpoints
            .get(seid)?
            .remote_seid
            .ok_or(AvdtpError::NoRemoteEndpoint)
    }

    fn require_state(
        &self,
        seid: StreamEndpointId,
        allowed: &[StreamEndpointState],
    ) -> Result<(), AvdtpError> {
        let state = self.endpoints.get(seid)?.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            debug!("[AVDTP] SEP {}: request not allowed while {}", seid, state);
            Err(AvdtpError::BadState)
        }
    }

    /// List the remote device's stream endpoints (DISCOVER)
    ///
    /// # Errors
    /// Returns [`AvdtpError::BadState`] while a stream is configured and
    /// [`AvdtpError::NotConnected`] without a signaling connection
    pub fn discover(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
    ) -> Result<(), AvdtpError> {
        self.require_state(
            seid,
            &[StreamEndpointState::Idle, StreamEndpointState::Configuration],
        )?;
        self.issue_command(
            transport,
            seid,
            SignalId::Discover,
            &[],
            None,
            Some(StreamEndpointState::Configuration),
        )
    }

    /// Ask a remote endpoint for its capabilities
    ///
    /// Uses GET_ALL_CAPABILITIES or GET_CAPABILITIES depending on the
    /// engine options.
    ///
    /// # Errors
    /// See [`AvdtpEngine::discover`]
    pub fn get_capabilities(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
        remote_seid: StreamEndpointId,
    ) -> Result<(), AvdtpError> {
        self.require_state(
            seid,
            &[StreamEndpointState::Idle, StreamEndpointState::Configuration],
        )?;
        let signal = if self.options.use_get_all_capabilities {
            SignalId::GetAllCapabilities
        } else {
            SignalId::GetCapabilities
        };
        self.issue_command(
            transport,
            seid,
            signal,
            &[seid_to_byte(remote_seid)],
            Some(remote_seid),
            Some(StreamEndpointState::Configuration),
        )
    }

    /// Propose `configuration` to a remote endpoint (SET_CONFIGURATION)
    ///
    /// # Errors
    /// Returns [`AvdtpError::InvalidParameter`] if the configuration lacks a
    /// codec or uses a category the local endpoint did not register
    pub fn set_configuration(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
        remote_seid: StreamEndpointId,
        configuration: Capabilities,
    ) -> Result<(), AvdtpError> {
        self.require_state(
            seid,
            &[StreamEndpointState::Idle, StreamEndpointState::Configuration],
        )?;
        let endpoint = self.endpoints.get(seid)?;
        if endpoint.in_use {
            return Err(AvdtpError::BadState);
        }
        if !configuration.contains(ServiceCategory::MediaCodec) {
            return Err(AvdtpError::InvalidParameter(ServiceCategory::MediaCodec));
        }
        if let Some(capability) = configuration
            .iter()
            .find(|c| !endpoint.capabilities.contains(c.category()))
        {
            return Err(AvdtpError::InvalidParameter(capability.category()));
        }
        let payload = configuration_payload(remote_seid, Some(seid), &configuration)
            .map_err(|_| AvdtpError::MessageTooLarge)?;

        let endpoint = self.endpoints.get_mut(seid)?;
        endpoint.configuration = configuration;
        endpoint.remote_seid = Some(remote_seid);
        let result = self.issue_command(
            transport,
            seid,
            SignalId::SetConfiguration,
            &payload,
            Some(remote_seid),
            Some(StreamEndpointState::Configuration),
        );
        if result.is_err()
            && let Some(endpoint) = self.endpoints.find_mut(seid)
        {
            endpoint.configuration.clear();
            endpoint.remote_seid = None;
        }
        result
    }

    /// Read back the configuration the remote endpoint holds (GET_CONFIGURATION)
    ///
    /// # Errors
    /// Returns [`AvdtpError::BadState`] unless a stream is configured
    pub fn get_configuration(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
    ) -> Result<(), AvdtpError> {
        if !self.endpoints.get(seid)?.state().is_configured() {
            return Err(AvdtpError::BadState);
        }
        let remote_seid = self.remote_seid_of(seid)?;
        self.issue_command(
            transport,
            seid,
            SignalId::GetConfiguration,
            &[seid_to_byte(remote_seid)],
            Some(remote_seid),
            None,
        )
    }

    /// Change codec or content protection parameters of an open stream (RECONFIGURE)
    ///
    /// # Errors
    /// Returns [`AvdtpError::InvalidParameter`] for categories other than
    /// media codec and content protection, or ones not registered locally
    pub fn reconfigure(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
        configuration: Capabilities,
    ) -> Result<(), AvdtpError> {
        self.require_state(seid, &[StreamEndpointState::Open])?;
        let remote_seid = self.remote_seid_of(seid)?;
        let endpoint = self.endpoints.get(seid)?;
        if let Some(capability) = configuration.iter().find(|c| {
            !matches!(
                c.category(),
                ServiceCategory::MediaCodec | ServiceCategory::ContentProtection
            ) || !endpoint.capabilities.contains(c.category())
        }) {
            return Err(AvdtpError::InvalidParameter(capability.category()));
        }
        let payload = configuration_payload(remote_seid, None, &configuration)
            .map_err(|_| AvdtpError::MessageTooLarge)?;
        self.issue_command(
            transport,
            seid,
            SignalId::Reconfigure,
            &payload,
            Some(remote_seid),
            None,
        )?;
        self.endpoints.get_mut(seid)?.pending_reconfiguration = Some(configuration);
        Ok(())
    }

    /// Ask the remote endpoint to open the configured stream (OPEN)
    ///
    /// The transport channels are requested once the remote accepts.
    ///
    /// # Errors
    /// Returns [`AvdtpError::BadState`] unless the endpoint is `Configured`
    pub fn open_stream(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
    ) -> Result<(), AvdtpError> {
        self.require_state(seid, &[StreamEndpointState::Configured])?;
        let remote_seid = self.remote_seid_of(seid)?;
        self.issue_command(
            transport,
            seid,
            SignalId::Open,
            &[seid_to_byte(remote_seid)],
            Some(remote_seid),
            Some(StreamEndpointState::AwaitingOpenAnswer),
        )
    }

    /// Start media on an open stream (START)
    ///
    /// # Errors
    /// Returns [`AvdtpError::BadState`] unless the endpoint is `Open`
    pub fn start_stream(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
    ) -> Result<(), AvdtpError> {
        self.require_state(seid, &[StreamEndpointState::Open])?;
        let remote_seid = self.remote_seid_of(seid)?;
        self.issue_command(
            transport,
            seid,
            SignalId::Start,
            &[seid_to_byte(remote_seid)],
            Some(remote_seid),
            Some(StreamEndpointState::AwaitingStartAnswer),
        )
    }

    /// Pause media, back to `Open` once accepted (SUSPEND)
    ///
    /// # Errors
    /// Returns [`AvdtpError::BadState`] unless the endpoint is `Streaming`
    pub fn suspend_stream(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
    ) -> Result<(), AvdtpError> {
        self.require_state(seid, &[StreamEndpointState::Streaming])?;
        let remote_seid = self.remote_seid_of(seid)?;
        self.issue_command(
            transport,
            seid,
            SignalId::Suspend,
            &[seid_to_byte(remote_seid)],
            Some(remote_seid),
            None,
        )
    }

    /// Release the stream gracefully (CLOSE)
    ///
    /// # Errors
    /// Returns [`AvdtpError::BadState`] unless the endpoint is `Open` or
    /// `Streaming`
    pub fn close_stream(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
    ) -> Result<(), AvdtpError> {
        self.require_state(
            seid,
            &[StreamEndpointState::Open, StreamEndpointState::Streaming],
        )?;
        let remote_seid = self.remote_seid_of(seid)?;
        self.issue_command(
            transport,
            seid,
            SignalId::Close,
            &[seid_to_byte(remote_seid)],
            Some(remote_seid),
            Some(StreamEndpointState::Closing),
        )
    }

    /// Tear the stream down from any state (ABORT)
    ///
    /// Any outstanding command is dropped. The transport channels are closed
    /// locally and the endpoint returns to `Idle` once they are down, whether
    /// or not the remote ever answers.
    ///
    /// # Errors
    /// Returns [`AvdtpError::BadState`] if the endpoint is already `Idle`
    pub fn abort_stream(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
    ) -> Result<(), AvdtpError> {
        let endpoint = self.endpoints.get(seid)?;
        match endpoint.state() {
            StreamEndpointState::Idle => return Err(AvdtpError::BadState),
            StreamEndpointState::Aborting | StreamEndpointState::AwaitingMediaChannelClose => {
                return Ok(());
            }
            _ => {}
        }

        if let Some(remote_seid) = endpoint.remote_seid
            && let Err(error) = self.issue_command(
                transport,
                seid,
                SignalId::Abort,
                &[seid_to_byte(remote_seid)],
                Some(remote_seid),
                Some(StreamEndpointState::Aborting),
            )
        {
            warn!("[AVDTP] SEP {}: ABORT not sent: {}", seid, error);
        }

        self.set_state(seid, StreamEndpointState::Aborting);
        let endpoint = self.endpoints.get(seid)?;
        if endpoint.channels.is_empty() && endpoint.pending_channel.is_none() {
            self.reset_endpoint(seid);
        } else {
            self.close_transport_channels(transport, seid);
        }
        Ok(())
    }

    /// Report the sink's playback delay to the source (DELAY_REPORT)
    ///
    /// `delay` is in 1/10 milliseconds.
    ///
    /// # Errors
    /// Returns [`AvdtpError::BadState`] for source endpoints or outside
    /// `Configured`, `Open` and `Streaming`, and
    /// [`AvdtpError::InvalidParameter`] if delay reporting was not configured
    pub fn delay_report(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
        delay: u16,
    ) -> Result<(), AvdtpError> {
        self.require_state(
            seid,
            &[
                StreamEndpointState::Configured,
                StreamEndpointState::Open,
                StreamEndpointState::Streaming,
            ],
        )?;
        let endpoint = self.endpoints.get(seid)?;
        if endpoint.sep_type != SepType::Sink {
            return Err(AvdtpError::BadState);
        }
        if !endpoint
            .configuration
            .contains(ServiceCategory::DelayReporting)
        {
            return Err(AvdtpError::InvalidParameter(
                ServiceCategory::DelayReporting,
            ));
        }
        let remote_seid = self.remote_seid_of(seid)?;
        let [high, low] = delay.to_be_bytes();
        self.issue_command(
            transport,
            seid,
            SignalId::DelayReport,
            &[seid_to_byte(remote_seid), high, low],
            Some(remote_seid),
            None,
        )
    }

    /// Match an answer to the initiator transaction it closes
    pub(super) fn handle_response(
        &mut self,
        transport: &mut impl ChannelTransport,
        handle: ConnectionHandle,
        message: SignalingMessage,
    ) {
        let label = message.transaction_label;
        let Some(seid) = self
            .endpoints
            .iter()
            .find(|endpoint| {
                endpoint.connection == Some(handle)
                    && endpoint
                        .transactions
                        .initiator()
                        .is_some_and(|t| t.label == label && t.signal as u8 == message.signal)
            })
            .map(|endpoint| endpoint.seid)
        else {
            debug!(
                "[AVDTP] ignoring unmatched {} label {} signal {}",
                message.message_type, label, message.signal
            );
            return;
        };
        let Some(transaction) = self
            .endpoints
            .find_mut(seid)
            .and_then(|endpoint| endpoint.transactions.complete_initiator(label, message.signal))
        else {
            return;
        };

        match message.message_type {
            MessageType::ResponseAccept => {
                self.command_accepted(transport, seid, transaction, &message);
            }
            MessageType::ResponseReject => {
                let (_, code) = message.reject_reason();
                warn!("[AVDTP] SEP {}: {} rejected: {}", seid, transaction.signal, code);
                self.command_failed(
                    seid,
                    transaction,
                    AvdtpError::Rejected(transaction.signal, code),
                );
            }
            MessageType::GeneralReject => {
                warn!("[AVDTP] SEP {}: {} not understood by remote", seid, transaction.signal);
                self.command_failed(seid, transaction, AvdtpError::GeneralReject(message.signal));
            }
            MessageType::Command => {}
        }
    }

    /// An initiator command was rejected or lost
    pub(super) fn command_failed(
        &mut self,
        seid: StreamEndpointId,
        transaction: InitiatorTransaction,
        error: AvdtpError,
    ) {
        let signal = transaction.signal;
        if signal == SignalId::Abort {
            return;
        }
        self.push_event(AvdtpEvent::CommandFailed { seid, signal, error });
        match signal {
            SignalId::Discover
            | SignalId::GetCapabilities
            | SignalId::GetAllCapabilities
            | SignalId::SetConfiguration => self.configuration_failed(seid, error),
            SignalId::Open | SignalId::Start | SignalId::Close => {
                self.set_state(seid, transaction.revert_state);
            }
            SignalId::Reconfigure => {
                if let Some(endpoint) = self.endpoints.find_mut(seid) {
                    endpoint.pending_reconfiguration = None;
                }
            }
            _ => {}
        }
    }

    fn command_accepted(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
        transaction: InitiatorTransaction,
        message: &SignalingMessage,
    ) {
        let signal = transaction.signal;
        debug!("[AVDTP] SEP {}: {} accepted", seid, signal);
        self.push_event(AvdtpEvent::CommandAccepted { seid, signal });

        match signal {
            SignalId::Discover => self.discovery_answered(transport, seid, &message.payload),
            SignalId::GetCapabilities | SignalId::GetAllCapabilities => {
                if let Some(remote_seid) = transaction.remote_seid {
                    self.capabilities_answered(transport, seid, remote_seid, &message.payload);
                }
            }
            SignalId::SetConfiguration => {
                let Some(endpoint) = self.endpoints.find_mut(seid) else {
                    return;
                };
                endpoint.in_use = true;
                endpoint.auto_configure = false;
                let remote_seid = endpoint.remote_seid.unwrap_or_default();
                info!("[AVDTP] SEP {}: configured with remote SEP {}", seid, remote_seid);
                self.set_state(seid, StreamEndpointState::Configured);
                self.push_event(AvdtpEvent::StreamConfigured {
                    seid,
                    remote_seid,
                    initiator: true,
                });
            }
            SignalId::GetConfiguration => match Capabilities::decode(&message.payload) {
                Ok(configuration) => {
                    if let Some(endpoint) = self.endpoints.find_mut(seid) {
                        endpoint.reported_configuration = Some(configuration);
                    }
                    self.push_event(AvdtpEvent::Configuration { seid });
                }
                Err(error) => {
                    warn!("[AVDTP] SEP {}: bad configuration answer: {}", seid, error.code);
                    self.push_event(AvdtpEvent::CommandFailed {
                        seid,
                        signal,
                        error: AvdtpError::BadResponse,
                    });
                }
            },
            SignalId::Reconfigure => {
                if let Some(endpoint) = self.endpoints.find_mut(seid)
                    && let Some(pending) = endpoint.pending_reconfiguration.take()
                {
                    for capability in pending.iter() {
                        endpoint.configuration.replace(capability.clone());
                    }
                }
                self.push_event(AvdtpEvent::Reconfigured { seid });
            }
            SignalId::Open => {
                self.set_state(seid, StreamEndpointState::AwaitingMediaChannel);
                if self.open_transport_channel(transport, seid).is_err() {
                    self.teardown_stream(transport, seid);
                }
            }
            SignalId::Start => self.set_state(seid, StreamEndpointState::Streaming),
            SignalId::Suspend => self.set_state(seid, StreamEndpointState::Open),
            SignalId::Close => {
                self.set_state(seid, StreamEndpointState::AwaitingMediaChannelClose);
                let idle = self
                    .endpoints
                    .find(seid)
                    .is_some_and(|e| e.channels.is_empty() && e.pending_channel.is_none());
                if idle {
                    self.reset_endpoint(seid);
                } else {
                    self.close_transport_channels(transport, seid);
                }
            }
            SignalId::Abort | SignalId::DelayReport | SignalId::SecurityControl => {}
        }
    }

    fn discovery_answered(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
        payload: &[u8],
    ) {
        let list = match SepInfo::parse_list(payload) {
            Ok(list) => list,
            Err(error) => {
                warn!("[AVDTP] SEP {}: bad discovery answer: {}", seid, error);
                self.configuration_failed(seid, AvdtpError::BadResponse);
                return;
            }
        };
        let Some(endpoint) = self.endpoints.find_mut(seid) else {
            return;
        };
        endpoint.remote_endpoints.clear();
        for info in list {
            // Same capacity as the parsed list
            let _ = endpoint.remote_endpoints.push(RemoteStreamEndpoint::new(info));
        }
        let count = u8::try_from(endpoint.remote_endpoints.len()).unwrap_or(u8::MAX);
        let auto_configure = endpoint.auto_configure;
        info!("[AVDTP] SEP {}: discovered {} remote endpoints", seid, count);
        self.push_event(AvdtpEvent::DiscoveryComplete { seid, count });

        if auto_configure {
            self.request_next_capabilities(transport, seid, None);
        }
    }

    /// Ask for the capabilities of the next compatible remote endpoint after `after`
    fn request_next_capabilities(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
        after: Option<StreamEndpointId>,
    ) {
        let Some(endpoint) = self.endpoints.find(seid) else {
            return;
        };
        let start = after
            .and_then(|a| {
                endpoint
                    .remote_endpoints
                    .iter()
                    .position(|r| r.info.seid == a)
            })
            .map_or(0, |position| position + 1);
        let candidate = endpoint
            .remote_endpoints
            .iter()
            .skip(start)
            .find(|r| r.matches(endpoint.sep_type, endpoint.media_type))
            .map(|r| r.info.seid);

        let Some(remote_seid) = candidate else {
            let error = if after.is_some() {
                AvdtpError::NoCommonConfiguration
            } else {
                AvdtpError::NoRemoteEndpoint
            };
            self.configuration_failed(seid, error);
            return;
        };
        if let Err(error) = self.get_capabilities(transport, seid, remote_seid) {
            self.configuration_failed(seid, error);
        }
    }

    fn capabilities_answered(
        &mut self,
        transport: &mut impl ChannelTransport,
        seid: StreamEndpointId,
        remote_seid: StreamEndpointId,
        payload: &[u8],
    ) {
        let capabilities = match Capabilities::decode(payload) {
            Ok(capabilities) => capabilities,
            Err(error) => {
                warn!("[AVDTP] SEP {}: bad capabilities answer: {}", seid, error.code);
                self.configuration_failed(seid, AvdtpError::BadResponse);
                return;
            }
        };
        let Some(endpoint) = self.endpoints.find_mut(seid) else {
            return;
        };
        if let Some(remote) = endpoint.remote_endpoint_mut(remote_seid) {
            remote.capabilities = Some(capabilities.clone());
        }
        let auto_configure = endpoint.auto_configure;
        self.push_event(AvdtpEvent::CapabilitiesReceived { seid, remote_seid });
        if !auto_configure {
            return;
        }

        let Some(endpoint) = self.endpoints.find(seid) else {
            return;
        };
        match select_configuration(&endpoint.capabilities, &capabilities) {
            Ok(configuration) => {
                if let Err(error) =
                    self.set_configuration(transport, seid, remote_seid, configuration)
                {
                    self.configuration_failed(seid, error);
                }
            }
            Err(_) => {
                debug!("[AVDTP] SEP {}: remote SEP {} not compatible", seid, remote_seid);
                self.request_next_capabilities(transport, seid, Some(remote_seid));
            }
        }
    }
}
