//! Acceptor role
//!
//! Commands received from the remote initiator. Each command is checked
//! against the addressed endpoint and answered with an accept or a reject in
//! the shape its signal requires; unknown signals get a GENERAL_REJECT.
//! State changes the remote can rely on only take effect once the accept has
//! left the transport, see [`AvdtpEngine::answer_sent`].

use super::{AvdtpEngine, AvdtpEvent, ConnectionHandle, EndpointList, single_endpoint};
use crate::codec::configuration_supported;
use crate::endpoint::capability::{Capabilities, ServiceCategory};
use crate::endpoint::transaction::AcceptorTransaction;
use crate::endpoint::{StreamEndpoint, StreamEndpointId, StreamEndpointState};
use crate::error::ErrorCode;
use crate::signaling::message::{Payload, seid_from_byte};
use crate::signaling::{MessageType, SignalId, SignalingMessage};
use crate::transport::ChannelTransport;

/// Why a command is refused: the detail octet (category or SEID) and the code
#[derive(Debug, Clone, Copy)]
struct Rejection {
    detail: u8,
    code: ErrorCode,
}

impl Rejection {
    const fn new(detail: u8, code: ErrorCode) -> Self {
        Self { detail, code }
    }
}

enum Answer {
    Accept {
        payload: Payload,
        endpoints: EndpointList,
    },
    Reject(Rejection),
    /// The command gets no answer
    Silent,
}

impl Answer {
    fn accept(endpoints: EndpointList) -> Self {
        Self::Accept {
            payload: Payload::new(),
            endpoints,
        }
    }
}

impl AvdtpEngine {
    pub(super) fn handle_command(
        &mut self,
        transport: &mut impl ChannelTransport,
        handle: ConnectionHandle,
        message: SignalingMessage,
    ) {
        let label = message.transaction_label;
        let Some(signal) = message.signal_id() else {
            warn!("[AVDTP] unknown signal {}, sending general reject", message.signal);
            let reply = SignalingMessage::general_reject(label, message.signal);
            self.answer(transport, handle, reply, EndpointList::new());
            return;
        };
        debug!("[AVDTP] received {} label {}", signal, label);

        let answer = match signal {
            SignalId::Discover => Ok(self.on_discover()),
            SignalId::GetCapabilities => self.on_get_capabilities(&message, false),
            SignalId::GetAllCapabilities => self.on_get_capabilities(&message, true),
            SignalId::SetConfiguration => self.on_set_configuration(handle, &message),
            SignalId::GetConfiguration => self.on_get_configuration(handle, &message),
            SignalId::Reconfigure => self.on_reconfigure(handle, &message),
            SignalId::Open => self.on_open(handle, &message),
            SignalId::Start => self.on_start_or_suspend(handle, &message, SignalId::Start),
            SignalId::Close => self.on_close(handle, &message),
            SignalId::Suspend => self.on_start_or_suspend(handle, &message, SignalId::Suspend),
            SignalId::Abort => Ok(self.on_abort(handle, &message)),
            SignalId::SecurityControl => Err(Rejection::new(0, ErrorCode::NotSupportedCommand)),
            SignalId::DelayReport => self.on_delay_report(handle, &message),
        }
        .unwrap_or_else(Answer::Reject);

        match answer {
            Answer::Accept { payload, endpoints } => {
                let reply = SignalingMessage {
                    transaction_label: label,
                    message_type: MessageType::ResponseAccept,
                    signal: signal as u8,
                    payload,
                };
                self.answer(transport, handle, reply, endpoints);
            }
            Answer::Reject(rejection) => {
                debug!("[AVDTP] rejecting {}: {}", signal, rejection.code);
                let reply = SignalingMessage::reject(label, signal, rejection.detail, rejection.code);
                self.answer(transport, handle, reply, EndpointList::new());
            }
            Answer::Silent => debug!("[AVDTP] {} label {} left unanswered", signal, label),
        }
    }

    fn answer(
        &mut self,
        transport: &mut impl ChannelTransport,
        handle: ConnectionHandle,
        reply: SignalingMessage,
        endpoints: EndpointList,
    ) {
        let label = reply.transaction_label;
        if let Err(error) = self.send_signal(transport, handle, reply, endpoints.clone()) {
            warn!("[AVDTP] answer label {} not sent: {}", label, error);
            for seid in endpoints {
                if let Some(endpoint) = self.endpoints.find_mut(seid) {
                    endpoint.transactions.complete_acceptor(label);
                }
            }
        }
    }

    /// Apply the state change an accept promised once it left the transport
    pub(super) fn answer_sent(&mut self, seid: StreamEndpointId, signal: SignalId) {
        match signal {
            SignalId::SetConfiguration => {
                let remote_seid = self
                    .endpoints
                    .find(seid)
                    .and_then(|endpoint| endpoint.remote_seid)
                    .unwrap_or_default();
                info!("[AVDTP] SEP {}: configured by remote SEP {}", seid, remote_seid);
                self.set_state(seid, StreamEndpointState::Configured);
                self.push_event(AvdtpEvent::StreamConfigured {
                    seid,
                    remote_seid,
                    initiator: false,
                });
            }
            SignalId::Reconfigure => self.push_event(AvdtpEvent::Reconfigured { seid }),
            SignalId::Open => self.set_state(seid, StreamEndpointState::AwaitingMediaChannel),
            SignalId::Start => self.set_state(seid, StreamEndpointState::Streaming),
            SignalId::Suspend => self.set_state(seid, StreamEndpointState::Open),
            SignalId::Close | SignalId::Abort => {
                let idle = self
                    .endpoints
                    .find(seid)
                    .is_some_and(|e| e.channels.is_empty() && e.pending_channel.is_none());
                if idle {
                    self.reset_endpoint(seid);
                } else {
                    self.set_state(seid, StreamEndpointState::AwaitingMediaChannelClose);
                }
            }
            _ => {}
        }
    }

    /// Endpoint addressed by the first payload octet, owned by this connection
    fn addressed_endpoint(
        &self,
        handle: ConnectionHandle,
        message: &SignalingMessage,
    ) -> Result<&StreamEndpoint, Rejection> {
        let seid = message
            .first_seid()
            .map_err(|_| Rejection::new(0, ErrorCode::BadLength))?;
        self.endpoints
            .find(seid)
            .filter(|endpoint| endpoint.connection.is_none_or(|c| c == handle))
            .ok_or(Rejection::new(seid, ErrorCode::BadAcpSeid))
    }

    /// Open the endpoint's acceptor transaction and enter `state`
    fn begin_answer(
        &mut self,
        seid: StreamEndpointId,
        label: u8,
        signal: SignalId,
        state: Option<StreamEndpointState>,
    ) -> Result<(), Rejection> {
        let endpoint = self
            .endpoints
            .find_mut(seid)
            .ok_or(Rejection::new(seid, ErrorCode::BadAcpSeid))?;
        endpoint
            .transactions
            .begin_acceptor(AcceptorTransaction { label, signal })
            .map_err(|_| Rejection::new(seid, ErrorCode::BadState))?;
        if let Some(state) = state {
            self.set_state(seid, state);
        }
        Ok(())
    }

    fn on_discover(&self) -> Answer {
        let mut payload = Payload::new();
        for endpoint in self.endpoints.iter() {
            if payload.extend_from_slice(&endpoint.sep_info().to_bytes()).is_err() {
                break;
            }
        }
        if payload.is_empty() {
            return Answer::Reject(Rejection::new(0, ErrorCode::BadAcpSeid));
        }
        Answer::Accept {
            payload,
            endpoints: EndpointList::new(),
        }
    }

    fn on_get_capabilities(
        &self,
        message: &SignalingMessage,
        all: bool,
    ) -> Result<Answer, Rejection> {
        let seid = message
            .first_seid()
            .map_err(|_| Rejection::new(0, ErrorCode::BadLength))?;
        let endpoint = self
            .endpoints
            .find(seid)
            .ok_or(Rejection::new(seid, ErrorCode::BadAcpSeid))?;
        let mut payload = Payload::new();
        endpoint
            .capabilities
            .encode_filtered(&mut payload, |category| {
                all || category != ServiceCategory::DelayReporting
            })
            .map_err(|_| Rejection::new(seid, ErrorCode::BadLength))?;
        Ok(Answer::Accept {
            payload,
            endpoints: EndpointList::new(),
        })
    }

    /// Check a proposed capability list against what an endpoint registered
    ///
    /// Categories failing `allowed` are refused as invalid before anything
    /// else is looked at.
    fn check_configuration(
        endpoint: &StreamEndpoint,
        elements: &[u8],
        allowed: impl Fn(ServiceCategory) -> bool,
    ) -> Result<Capabilities, Rejection> {
        let configuration = Capabilities::decode(elements)
            .map_err(|error| Rejection::new(error.category, error.code))?;
        if let Some(category) = Capabilities::first_unknown_category(elements) {
            return Err(Rejection::new(category, ErrorCode::BadServCategory));
        }
        if let Some(capability) = configuration.iter().find(|c| !allowed(c.category())) {
            return Err(Rejection::new(
                capability.category() as u8,
                ErrorCode::InvalidCapabilities,
            ));
        }
        if let Some(capability) = configuration
            .iter()
            .find(|c| !endpoint.capabilities.contains(c.category()))
        {
            return Err(Rejection::new(
                capability.category() as u8,
                ErrorCode::UnsupportedConfiguration,
            ));
        }
        if configuration.contains(ServiceCategory::MediaCodec)
            && !configuration_supported(&endpoint.capabilities, &configuration)
        {
            return Err(Rejection::new(
                ServiceCategory::MediaCodec as u8,
                ErrorCode::UnsupportedConfiguration,
            ));
        }
        Ok(configuration)
    }

    fn on_set_configuration(
        &mut self,
        handle: ConnectionHandle,
        message: &SignalingMessage,
    ) -> Result<Answer, Rejection> {
        let [acp, int, elements @ ..] = message.payload.as_slice() else {
            return Err(Rejection::new(0, ErrorCode::BadLength));
        };
        let seid = seid_from_byte(*acp);
        let int_seid = seid_from_byte(*int);
        let endpoint = self
            .endpoints
            .find(seid)
            .ok_or(Rejection::new(0, ErrorCode::BadAcpSeid))?;
        if endpoint.in_use || endpoint.connection.is_some_and(|c| c != handle) {
            return Err(Rejection::new(0, ErrorCode::SepInUse));
        }
        if endpoint.state() != StreamEndpointState::Idle {
            return Err(Rejection::new(0, ErrorCode::BadState));
        }
        let configuration = Self::check_configuration(endpoint, elements, |_| true)?;
        if !configuration.contains(ServiceCategory::MediaCodec) {
            return Err(Rejection::new(
                ServiceCategory::MediaCodec as u8,
                ErrorCode::InvalidCapabilities,
            ));
        }

        self.begin_answer(
            seid,
            message.transaction_label,
            SignalId::SetConfiguration,
            Some(StreamEndpointState::Configuration),
        )
        .map_err(|rejection| Rejection::new(0, rejection.code))?;
        if let Some(endpoint) = self.endpoints.find_mut(seid) {
            endpoint.connection = Some(handle);
            endpoint.configuration = configuration;
            endpoint.remote_seid = Some(int_seid);
            endpoint.in_use = true;
        }
        Ok(Answer::accept(single_endpoint(seid)))
    }

    fn on_get_configuration(
        &self,
        handle: ConnectionHandle,
        message: &SignalingMessage,
    ) -> Result<Answer, Rejection> {
        let endpoint = self.addressed_endpoint(handle, message)?;
        if !endpoint.state().is_configured() {
            return Err(Rejection::new(endpoint.seid, ErrorCode::BadState));
        }
        let mut payload = Payload::new();
        endpoint
            .configuration
            .encode(&mut payload)
            .map_err(|_| Rejection::new(endpoint.seid, ErrorCode::BadLength))?;
        Ok(Answer::Accept {
            payload,
            endpoints: EndpointList::new(),
        })
    }

    fn on_reconfigure(
        &mut self,
        handle: ConnectionHandle,
        message: &SignalingMessage,
    ) -> Result<Answer, Rejection> {
        let [_, elements @ ..] = message.payload.as_slice() else {
            return Err(Rejection::new(0, ErrorCode::BadLength));
        };
        let endpoint = self
            .addressed_endpoint(handle, message)
            .map_err(|rejection| Rejection::new(0, rejection.code))?;
        let seid = endpoint.seid;
        if !endpoint.in_use {
            return Err(Rejection::new(0, ErrorCode::SepNotInUse));
        }
        if endpoint.state() != StreamEndpointState::Open {
            return Err(Rejection::new(0, ErrorCode::BadState));
        }
        let configuration = Self::check_configuration(endpoint, elements, |category| {
            matches!(
                category,
                ServiceCategory::MediaCodec | ServiceCategory::ContentProtection
            )
        })?;

        self.begin_answer(seid, message.transaction_label, SignalId::Reconfigure, None)
            .map_err(|rejection| Rejection::new(0, rejection.code))?;
        if let Some(endpoint) = self.endpoints.find_mut(seid) {
            for capability in configuration.iter() {
                endpoint.configuration.replace(capability.clone());
            }
        }
        Ok(Answer::accept(single_endpoint(seid)))
    }

    fn on_open(
        &mut self,
        handle: ConnectionHandle,
        message: &SignalingMessage,
    ) -> Result<Answer, Rejection> {
        let endpoint = self.addressed_endpoint(handle, message)?;
        let seid = endpoint.seid;
        if endpoint.state() != StreamEndpointState::Configured {
            return Err(Rejection::new(seid, ErrorCode::BadState));
        }
        self.begin_answer(
            seid,
            message.transaction_label,
            SignalId::Open,
            Some(StreamEndpointState::AwaitingOpenAnswer),
        )?;
        Ok(Answer::accept(single_endpoint(seid)))
    }

    /// START and SUSPEND address a list of endpoints; all of them must qualify
    fn on_start_or_suspend(
        &mut self,
        handle: ConnectionHandle,
        message: &SignalingMessage,
        signal: SignalId,
    ) -> Result<Answer, Rejection> {
        let (required, intermediate) = if signal == SignalId::Start {
            (
                StreamEndpointState::Open,
                Some(StreamEndpointState::AwaitingStreamingChannel),
            )
        } else {
            (StreamEndpointState::Streaming, None)
        };
        if message.payload.is_empty() {
            return Err(Rejection::new(0, ErrorCode::BadLength));
        }

        let mut endpoints = EndpointList::new();
        for &byte in &message.payload {
            let seid = seid_from_byte(byte);
            let endpoint = self
                .endpoints
                .find(seid)
                .filter(|endpoint| endpoint.connection == Some(handle))
                .ok_or(Rejection::new(seid, ErrorCode::BadAcpSeid))?;
            if endpoint.state() != required || endpoint.transactions.acceptor().is_some() {
                return Err(Rejection::new(seid, ErrorCode::BadState));
            }
            if !endpoints.contains(&seid) {
                endpoints
                    .push(seid)
                    .map_err(|_| Rejection::new(seid, ErrorCode::BadLength))?;
            }
        }
        for &seid in &endpoints {
            self.begin_answer(seid, message.transaction_label, signal, intermediate)?;
        }
        Ok(Answer::accept(endpoints))
    }

    fn on_close(
        &mut self,
        handle: ConnectionHandle,
        message: &SignalingMessage,
    ) -> Result<Answer, Rejection> {
        let endpoint = self.addressed_endpoint(handle, message)?;
        let seid = endpoint.seid;
        if !matches!(
            endpoint.state(),
            StreamEndpointState::Open | StreamEndpointState::Streaming
        ) {
            return Err(Rejection::new(seid, ErrorCode::BadState));
        }
        self.begin_answer(
            seid,
            message.transaction_label,
            SignalId::Close,
            Some(StreamEndpointState::Closing),
        )?;
        Ok(Answer::accept(single_endpoint(seid)))
    }

    /// ABORT is never rejected; a command for an endpoint we do not know
    /// stays unanswered
    fn on_abort(&mut self, handle: ConnectionHandle, message: &SignalingMessage) -> Answer {
        let Ok(endpoint) = self.addressed_endpoint(handle, message) else {
            return Answer::Silent;
        };
        let seid = endpoint.seid;
        if endpoint.state() == StreamEndpointState::Idle {
            return Answer::accept(EndpointList::new());
        }

        if let Some(endpoint) = self.endpoints.find_mut(seid) {
            endpoint.transactions.clear();
            let _ = endpoint.transactions.begin_acceptor(AcceptorTransaction {
                label: message.transaction_label,
                signal: SignalId::Abort,
            });
        }
        self.set_state(seid, StreamEndpointState::Aborting);
        Answer::accept(single_endpoint(seid))
    }

    fn on_delay_report(
        &mut self,
        handle: ConnectionHandle,
        message: &SignalingMessage,
    ) -> Result<Answer, Rejection> {
        let &[_, high, low] = message.payload.as_slice() else {
            return Err(Rejection::new(0, ErrorCode::BadLength));
        };
        let endpoint = self.addressed_endpoint(handle, message)?;
        let seid = endpoint.seid;
        if !endpoint
            .capabilities
            .contains(ServiceCategory::DelayReporting)
        {
            return Err(Rejection::new(seid, ErrorCode::NotSupportedCommand));
        }
        if !matches!(
            endpoint.state(),
            StreamEndpointState::Configured
                | StreamEndpointState::Open
                | StreamEndpointState::Streaming
        ) {
            return Err(Rejection::new(seid, ErrorCode::BadState));
        }

        let delay = u16::from_be_bytes([high, low]);
        debug!("[AVDTP] SEP {}: remote delay {}", seid, delay);
        if let Some(endpoint) = self.endpoints.find_mut(seid) {
            endpoint.delay_report = Some(delay);
        }
        self.push_event(AvdtpEvent::DelayReport { seid, delay });
        Ok(Answer::accept(EndpointList::new()))
    }
}
