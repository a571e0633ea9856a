//! Processor - transport notification and API request processing
//!
//! The processor owns the channel transport and is the only place the global
//! [`crate::AvdtpEngine`] is driven from. Transport notifications posted by
//! the transport driver and API requests posted by the application are both
//! applied under the single engine lock, one at a time; anything an engine
//! call triggers that needs the engine again travels back through a channel.
//!
//! # Usage
//!
//! ```rust,no_run
//! use bondybird_avdtp::{init_avdtp_engine, processor, AvdtpOptions};
//!
//! # async fn example(transport: impl bondybird_avdtp::ChannelTransport) {
//! init_avdtp_engine(AvdtpOptions::default()).await.ok();
//! processor::run(transport).await;
//! # }
//! ```
//!
//! # Architecture
//!
//! * **Notification processor**: applies channel events to the engine
//! * **API request processor**: runs application requests and sends a response
//! * After each step the engine's pending events are forwarded to the event
//!   channel read by [`crate::api::next_event`]

use crate::engine::AvdtpEngine;
use crate::transport::ChannelTransport;
use crate::{
    EVENT_CHANNEL, NOTIFICATION_CHANNEL, REQUEST_CHANNEL, RESPONSE_CHANNEL, Request, Response,
    TransportNotification, with_avdtp_engine,
};
use embassy_futures::select::{Either, select};

fn process_notification(
    engine: &mut AvdtpEngine,
    transport: &mut impl ChannelTransport,
    notification: &TransportNotification,
) {
    match notification {
        TransportNotification::ChannelOpened { cid, remote, mtu } => {
            engine.handle_channel_opened(transport, *cid, *remote, *mtu);
        }
        TransportNotification::ChannelOpenFailed { cid } => {
            engine.handle_channel_open_failed(transport, *cid);
        }
        TransportNotification::ChannelClosed { cid } => {
            engine.handle_channel_closed(transport, *cid);
        }
        TransportNotification::Data { cid, data } => engine.handle_data(transport, *cid, data),
        TransportNotification::CanSendNow { cid } => engine.handle_can_send_now(transport, *cid),
    }
}

fn process_request(
    engine: &mut AvdtpEngine,
    transport: &mut impl ChannelTransport,
    request: Request,
) -> Response {
    let result = match request {
        Request::RegisterStreamEndpoint(sep_type, media_type) => {
            return engine
                .register_stream_endpoint(sep_type, media_type)
                .map_or_else(Response::Error, Response::Registered);
        }
        Request::RegisterCapability(seid, capability) => engine
            .endpoints_mut()
            .register_capability(seid, capability),
        Request::RegisterMediaCodec {
            seid,
            codec_type,
            info,
        } => engine
            .endpoints_mut()
            .register_media_codec(seid, codec_type, &info),
        Request::Connect(address) => {
            return engine
                .connect(transport, address)
                .map_or_else(Response::Error, Response::Connection);
        }
        Request::ConnectWithEndpoint(seid, address) => {
            return engine
                .connect_with_endpoint(transport, address, seid)
                .map_or_else(Response::Error, Response::Connection);
        }
        Request::Disconnect(handle) => engine.disconnect(transport, handle),
        Request::Discover(seid) => engine.discover(transport, seid),
        Request::GetCapabilities(seid, remote_seid) => {
            engine.get_capabilities(transport, seid, remote_seid)
        }
        Request::SetConfiguration(seid, remote_seid, configuration) => {
            engine.set_configuration(transport, seid, remote_seid, configuration)
        }
        Request::GetConfiguration(seid) => engine.get_configuration(transport, seid),
        Request::Reconfigure(seid, configuration) => {
            engine.reconfigure(transport, seid, configuration)
        }
        Request::OpenStream(seid) => engine.open_stream(transport, seid),
        Request::StartStream(seid) => engine.start_stream(transport, seid),
        Request::SuspendStream(seid) => engine.suspend_stream(transport, seid),
        Request::CloseStream(seid) => engine.close_stream(transport, seid),
        Request::AbortStream(seid) => engine.abort_stream(transport, seid),
        Request::DelayReport(seid, delay) => engine.delay_report(transport, seid, delay),
        Request::SendMedia {
            seid,
            timestamp,
            marker,
            sbc,
            payload,
        } => {
            return engine
                .send_media_packet(transport, seid, timestamp, marker, sbc, &payload)
                .map_or_else(Response::Error, Response::SequenceNumber);
        }
        Request::SendSbcFrame {
            seid,
            timestamp,
            frame,
        } => {
            return engine
                .send_sbc_frame(transport, seid, timestamp, &frame)
                .map_or_else(Response::Error, Response::SequenceNumber);
        }
        Request::SetMediaHandler(handler) => {
            engine.set_media_handler(handler);
            Ok(())
        }
    };
    result.map_or_else(Response::Error, |()| Response::Done)
}

/// Move pending engine events to the event channel, as many as fit
fn forward_events(engine: &mut AvdtpEngine) {
    let sender = EVENT_CHANNEL.sender();
    while !EVENT_CHANNEL.is_full() {
        let Some(event) = engine.poll_event() else {
            break;
        };
        if sender.try_send(event).is_err() {
            break;
        }
    }
}

/// Run the AVDTP processor
///
/// Never returns. [`crate::init_avdtp_engine`] must have been called first,
/// requests received before that are answered with
/// [`crate::AvdtpError::NotInitialized`] and notifications are dropped.
pub async fn run<T: ChannelTransport>(mut transport: T) -> ! {
    let notifications = NOTIFICATION_CHANNEL.receiver();
    let requests = REQUEST_CHANNEL.receiver();
    let responses = RESPONSE_CHANNEL.sender();

    loop {
        match select(notifications.receive(), requests.receive()).await {
            Either::First(notification) => {
                debug!("[PROCESSOR] notification: {}", crate::fmt::Debug2Format(&notification));
                let applied = with_avdtp_engine(|engine| {
                    process_notification(engine, &mut transport, &notification);
                    forward_events(engine);
                })
                .await;
                if let Err(error) = applied {
                    error!("[PROCESSOR] notification dropped: {}", error);
                }
            }
            Either::Second(request) => {
                debug!("[PROCESSOR] API request: {}", crate::fmt::Debug2Format(&request));
                let response = with_avdtp_engine(|engine| {
                    let response = process_request(engine, &mut transport, request);
                    forward_events(engine);
                    response
                })
                .await
                .unwrap_or_else(Response::Error);
                debug!("[PROCESSOR] API response: {}", crate::fmt::Debug2Format(&response));
                responses.send(response).await;
            }
        }
    }
}
