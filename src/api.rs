//! `BondyBird` AVDTP API Functions
//!
//! This module provides the public API functions for interacting with the
//! AVDTP processor. Requests travel over static channels to
//! [`crate::processor::run`], which applies them to the global engine and
//! sends back a response. The transport driver uses the `notify_*`
//! functions to report channel events.
//!
//! # Usage
//!
//! ```rust,no_run
//! use bondybird_avdtp::api::{connect, next_event, register_stream_endpoint};
//! use bondybird_avdtp::endpoint::{MediaType, SepType};
//! use bondybird_avdtp::BluetoothAddress;
//!
//! # async fn example() -> Result<(), bondybird_avdtp::AvdtpError> {
//! let seid = register_stream_endpoint(SepType::Sink, MediaType::Audio).await?;
//! let address = BluetoothAddress::from_hex("00:1B:DC:00:00:0A")?;
//! connect(address).await?;
//! let event = next_event().await;
//! # Ok(())
//! # }
//! ```

use crate::constants::MAX_MEDIA_PACKET_SIZE;
use crate::endpoint::{Capabilities, Capability, MediaType, SepType, StreamEndpointId};
use crate::engine::MediaHandler;
use crate::media::SbcMediaHeader;
use crate::transport::ChannelId;
use crate::{
    AvdtpError, AvdtpEvent, BluetoothAddress, CodecType, ConnectionHandle, EVENT_CHANNEL,
    NOTIFICATION_CHANNEL, REQUEST_CHANNEL, RESPONSE_CHANNEL, Request, Response,
    TransportNotification,
};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use heapless::Vec;

/// Held for one request/response round trip so answers cannot cross callers
static REQUEST_LOCK: Mutex<CriticalSectionRawMutex, ()> = Mutex::new(());

async fn request(request: Request) -> Response {
    let _guard = REQUEST_LOCK.lock().await;
    REQUEST_CHANNEL.sender().send(request).await;
    RESPONSE_CHANNEL.receiver().receive().await
}

async fn request_done(request: Request) -> Result<(), AvdtpError> {
    match self::request(request).await {
        Response::Done => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(AvdtpError::BadResponse),
    }
}

async fn request_sequence_number(request: Request) -> Result<u16, AvdtpError> {
    match self::request(request).await {
        Response::SequenceNumber(sequence_number) => Ok(sequence_number),
        Response::Error(e) => Err(e),
        _ => Err(AvdtpError::BadResponse),
    }
}

/// Register a new local stream endpoint and return its SEID.
///
/// # Errors
///
/// Returns an error if the endpoint table is full.
pub async fn register_stream_endpoint(
    sep_type: SepType,
    media_type: MediaType,
) -> Result<StreamEndpointId, AvdtpError> {
    match request(Request::RegisterStreamEndpoint(sep_type, media_type)).await {
        Response::Registered(seid) => Ok(seid),
        Response::Error(e) => Err(e),
        _ => Err(AvdtpError::BadResponse),
    }
}

/// Register a service capability on a local stream endpoint.
///
/// # Errors
///
/// Returns an error if the endpoint is unknown, the category is already
/// registered or the capability parameters are out of range.
pub async fn register_capability(
    seid: StreamEndpointId,
    capability: Capability,
) -> Result<(), AvdtpError> {
    request_done(Request::RegisterCapability(seid, capability)).await
}

/// Register basic media transport on a local stream endpoint.
///
/// # Errors
///
/// See [`register_capability`].
pub async fn register_media_transport(seid: StreamEndpointId) -> Result<(), AvdtpError> {
    register_capability(seid, Capability::MediaTransport).await
}

/// Register delay reporting on a local stream endpoint.
///
/// # Errors
///
/// See [`register_capability`].
pub async fn register_delay_reporting(seid: StreamEndpointId) -> Result<(), AvdtpError> {
    register_capability(seid, Capability::DelayReporting).await
}

/// Register a media codec on a local stream endpoint.
///
/// The media type is taken from the endpoint.
///
/// # Errors
///
/// Returns an error if `info` is too large or the endpoint is unknown.
pub async fn register_media_codec(
    seid: StreamEndpointId,
    codec_type: CodecType,
    info: &[u8],
) -> Result<(), AvdtpError> {
    let info = Vec::from_slice(info)
        .map_err(|()| AvdtpError::InformationTooLarge(crate::endpoint::ServiceCategory::MediaCodec))?;
    request_done(Request::RegisterMediaCodec {
        seid,
        codec_type,
        info,
    })
    .await
}

/// Connect to a remote device with the first available stream endpoint.
///
/// Returns once the signaling channel was requested; progress is reported
/// through [`next_event`].
///
/// # Errors
///
/// Returns an error if no endpoint is available or the channel cannot be requested.
pub async fn connect(address: BluetoothAddress) -> Result<ConnectionHandle, AvdtpError> {
    match request(Request::Connect(address)).await {
        Response::Connection(handle) => Ok(handle),
        Response::Error(e) => Err(e),
        _ => Err(AvdtpError::BadResponse),
    }
}

/// Connect to a remote device with a specific stream endpoint.
///
/// # Errors
///
/// Returns an error if the endpoint is busy or the channel cannot be requested.
pub async fn connect_with_endpoint(
    seid: StreamEndpointId,
    address: BluetoothAddress,
) -> Result<ConnectionHandle, AvdtpError> {
    match request(Request::ConnectWithEndpoint(seid, address)).await {
        Response::Connection(handle) => Ok(handle),
        Response::Error(e) => Err(e),
        _ => Err(AvdtpError::BadResponse),
    }
}

/// Close every channel of a signaling connection.
///
/// # Errors
///
/// Returns an error if the connection is unknown.
pub async fn disconnect(handle: ConnectionHandle) -> Result<(), AvdtpError> {
    request_done(Request::Disconnect(handle)).await
}

/// Send DISCOVER on behalf of a local stream endpoint.
///
/// # Errors
///
/// Returns an error if the endpoint cannot start a discovery now.
pub async fn discover(seid: StreamEndpointId) -> Result<(), AvdtpError> {
    request_done(Request::Discover(seid)).await
}

/// Ask a remote stream endpoint for its capabilities.
///
/// # Errors
///
/// Returns an error if the endpoint cannot send the command now.
pub async fn get_capabilities(
    seid: StreamEndpointId,
    remote_seid: StreamEndpointId,
) -> Result<(), AvdtpError> {
    request_done(Request::GetCapabilities(seid, remote_seid)).await
}

/// Propose a configuration to a remote stream endpoint.
///
/// # Errors
///
/// Returns an error if the configuration does not fit the local endpoint.
pub async fn set_configuration(
    seid: StreamEndpointId,
    remote_seid: StreamEndpointId,
    configuration: Capabilities,
) -> Result<(), AvdtpError> {
    request_done(Request::SetConfiguration(seid, remote_seid, configuration)).await
}

/// Read back the configuration of the remote stream endpoint.
///
/// # Errors
///
/// Returns an error if the endpoint is not configured.
pub async fn get_configuration(seid: StreamEndpointId) -> Result<(), AvdtpError> {
    request_done(Request::GetConfiguration(seid)).await
}

/// Change the codec or content protection of an open stream.
///
/// # Errors
///
/// Returns an error if the stream is not open or a category may not be reconfigured.
pub async fn reconfigure(
    seid: StreamEndpointId,
    configuration: Capabilities,
) -> Result<(), AvdtpError> {
    request_done(Request::Reconfigure(seid, configuration)).await
}

/// Open a configured stream.
///
/// # Errors
///
/// Returns an error if the endpoint is not configured or busy.
pub async fn open_stream(seid: StreamEndpointId) -> Result<(), AvdtpError> {
    request_done(Request::OpenStream(seid)).await
}

/// Start an open stream.
///
/// # Errors
///
/// Returns an error if the stream is not open or busy.
pub async fn start_stream(seid: StreamEndpointId) -> Result<(), AvdtpError> {
    request_done(Request::StartStream(seid)).await
}

/// Suspend a streaming stream.
///
/// # Errors
///
/// Returns an error if the stream is not streaming or busy.
pub async fn suspend_stream(seid: StreamEndpointId) -> Result<(), AvdtpError> {
    request_done(Request::SuspendStream(seid)).await
}

/// Close an open or streaming stream.
///
/// # Errors
///
/// Returns an error if the stream is neither open nor streaming.
pub async fn close_stream(seid: StreamEndpointId) -> Result<(), AvdtpError> {
    request_done(Request::CloseStream(seid)).await
}

/// Abort a stream in any state.
///
/// # Errors
///
/// Returns an error if the endpoint is unknown or idle.
pub async fn abort_stream(seid: StreamEndpointId) -> Result<(), AvdtpError> {
    request_done(Request::AbortStream(seid)).await
}

/// Report the playback delay of a sink, in 1/10 milliseconds.
///
/// # Errors
///
/// Returns an error if delay reporting is not configured on the stream.
pub async fn delay_report(seid: StreamEndpointId, delay: u16) -> Result<(), AvdtpError> {
    request_done(Request::DelayReport(seid, delay)).await
}

/// Send one media payload on a streaming endpoint and return its sequence number.
///
/// `sbc` is the SBC media payload header, required exactly when the stream
/// uses SBC.
///
/// # Errors
///
/// Returns an error if the stream is not streaming, the codec header does not
/// match the codec, the channel is busy or the payload does not fit a media
/// packet.
pub async fn send_media_packet(
    seid: StreamEndpointId,
    timestamp: u32,
    marker: bool,
    sbc: Option<SbcMediaHeader>,
    payload: &[u8],
) -> Result<u16, AvdtpError> {
    let payload = Vec::from_slice(payload).map_err(|()| AvdtpError::MessageTooLarge)?;
    request_sequence_number(Request::SendMedia {
        seid,
        timestamp,
        marker,
        sbc,
        payload,
    })
    .await
}

/// Send one SBC frame, fragmented to the media MTU, and return the sequence
/// number of its last packet.
///
/// # Errors
///
/// Returns an error if the stream is not streaming SBC, the channel is busy
/// or the frame needs too many fragments.
pub async fn send_sbc_frame(
    seid: StreamEndpointId,
    timestamp: u32,
    frame: &[u8],
) -> Result<u16, AvdtpError> {
    let frame = Vec::from_slice(frame).map_err(|()| AvdtpError::MessageTooLarge)?;
    request_sequence_number(Request::SendSbcFrame {
        seid,
        timestamp,
        frame,
    })
    .await
}

/// Install or remove the receiver of inbound media packets.
///
/// # Errors
///
/// Returns an error if the engine is not initialized.
pub async fn set_media_handler(handler: Option<MediaHandler>) -> Result<(), AvdtpError> {
    request_done(Request::SetMediaHandler(handler)).await
}

/// Wait for the next application event.
pub async fn next_event() -> AvdtpEvent {
    EVENT_CHANNEL.receiver().receive().await
}

/// Report that a channel is open.
pub async fn notify_channel_opened(cid: ChannelId, remote: BluetoothAddress, mtu: u16) {
    NOTIFICATION_CHANNEL
        .sender()
        .send(TransportNotification::ChannelOpened { cid, remote, mtu })
        .await;
}

/// Report that a requested channel could not be opened.
pub async fn notify_channel_open_failed(cid: ChannelId) {
    NOTIFICATION_CHANNEL
        .sender()
        .send(TransportNotification::ChannelOpenFailed { cid })
        .await;
}

/// Report that a channel closed.
pub async fn notify_channel_closed(cid: ChannelId) {
    NOTIFICATION_CHANNEL
        .sender()
        .send(TransportNotification::ChannelClosed { cid })
        .await;
}

/// Report a received packet.
///
/// # Errors
///
/// Returns [`AvdtpError::MessageTooLarge`] if the packet exceeds the largest
/// media packet the engine accepts.
pub async fn notify_data(cid: ChannelId, data: &[u8]) -> Result<(), AvdtpError> {
    let data: Vec<u8, MAX_MEDIA_PACKET_SIZE> =
        Vec::from_slice(data).map_err(|()| AvdtpError::MessageTooLarge)?;
    NOTIFICATION_CHANNEL
        .sender()
        .send(TransportNotification::Data { cid, data })
        .await;
    Ok(())
}

/// Report that a channel which refused a packet can send again.
pub async fn notify_can_send_now(cid: ChannelId) {
    NOTIFICATION_CHANNEL
        .sender()
        .send(TransportNotification::CanSendNow { cid })
        .await;
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::codec::SbcCapabilities;
    use crate::transport::{ProtocolServiceMultiplexer, TransportError};
    use crate::{AvdtpOptions, ChannelTransport, init_avdtp_engine, processor};
    use embassy_futures::block_on;
    use embassy_futures::select::{Either, select};
    use std::vec::Vec as StdVec;

    #[derive(Default)]
    struct RecordingTransport {
        opened: StdVec<BluetoothAddress>,
        sent: StdVec<(ChannelId, StdVec<u8>)>,
    }

    impl ChannelTransport for RecordingTransport {
        fn open(
            &mut self,
            remote: BluetoothAddress,
            _psm: ProtocolServiceMultiplexer,
        ) -> Result<ChannelId, TransportError> {
            self.opened.push(remote);
            Ok(0x40 + u16::try_from(self.opened.len() - 1).unwrap_or(0))
        }

        fn send(&mut self, cid: ChannelId, data: &[u8]) -> Result<(), TransportError> {
            self.sent.push((cid, data.to_vec()));
            Ok(())
        }

        fn close(&mut self, _cid: ChannelId) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn ignore_media(_seid: StreamEndpointId, _frame: &crate::media::MediaFrame<'_>) {}

    // The engine and channels are process-wide, so a single test drives them
    #[test]
    fn test_api_round_trip_through_processor() {
        let remote = BluetoothAddress::new([0x00, 0x1B, 0xDC, 0x00, 0x00, 0x0A]);

        let scenario = async {
            assert_eq!(
                register_stream_endpoint(SepType::Sink, MediaType::Audio).await,
                Err(AvdtpError::NotInitialized)
            );
            assert_eq!(set_media_handler(None).await, Err(AvdtpError::NotInitialized));
            init_avdtp_engine(AvdtpOptions::default()).await.unwrap();
            assert_eq!(
                init_avdtp_engine(AvdtpOptions::default()).await,
                Err(AvdtpError::AlreadyInitialized)
            );

            let seid = register_stream_endpoint(SepType::Sink, MediaType::Audio)
                .await
                .unwrap();
            register_media_transport(seid).await.unwrap();
            assert_eq!(
                register_media_transport(seid).await,
                Err(AvdtpError::CategoryAlreadyRegistered(
                    crate::endpoint::ServiceCategory::MediaTransport
                ))
            );
            register_media_codec(seid, CodecType::Sbc, &SbcCapabilities::default().encode())
                .await
                .unwrap();
            set_media_handler(Some(ignore_media)).await.unwrap();
            assert_eq!(
                crate::with_avdtp_engine(|engine| engine.has_media_handler()).await,
                Ok(true)
            );

            let handle = connect(remote).await.unwrap();
            assert_eq!(open_stream(seid).await, Err(AvdtpError::BadState));

            notify_channel_opened(0x40, remote, 672).await;
            assert_eq!(
                next_event().await,
                AvdtpEvent::StateChanged {
                    seid,
                    state: crate::endpoint::StreamEndpointState::Configuration,
                }
            );
            assert_eq!(
                next_event().await,
                AvdtpEvent::SignalingConnected {
                    handle,
                    address: remote,
                }
            );

            // DISCOVER went out with label 0; reject it
            notify_data(0x40, &[0x03, 0x01, 0x31]).await.unwrap();
            let mut failed = false;
            for _ in 0..4 {
                if let AvdtpEvent::ConfigurationFailed { seid: failed_seid, error } =
                    next_event().await
                {
                    assert_eq!(failed_seid, seid);
                    assert_eq!(
                        error,
                        AvdtpError::Rejected(crate::signaling::SignalId::Discover, crate::ErrorCode::BadState)
                    );
                    failed = true;
                    break;
                }
            }
            assert!(failed);

            // The endpoint is idle again and reuses the open connection
            assert_eq!(connect(remote).await, Ok(handle));
            assert_eq!(
                send_sbc_frame(seid, 0, &[0x9C; 4]).await,
                Err(AvdtpError::BadState)
            );
        };

        match block_on(select(
            processor::run(RecordingTransport::default()),
            scenario,
        )) {
            Either::First(_) => unreachable!(),
            Either::Second(()) => {}
        }
    }
}
