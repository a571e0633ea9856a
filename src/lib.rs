#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines)]

#[macro_use]
mod fmt;

mod address;
pub mod api;
pub mod codec;
pub mod constants;
pub mod endpoint;
pub mod engine;
mod error;
pub mod media;
pub mod processor;
pub mod signaling;
pub mod transport;

use crate::constants::{
    DEFAULT_SIGNALING_MTU, MAX_MEDIA_CODEC_INFO_LEN, MAX_MEDIA_PACKET_SIZE, MAX_PENDING_EVENTS,
    MAX_QUEUED_NOTIFICATIONS, MAX_QUEUED_REQUESTS, PSM_AVDTP,
};
use crate::endpoint::{Capabilities, Capability, MediaType, SepType, StreamEndpointId};
use crate::engine::MediaHandler;
use crate::media::SbcMediaHeader;
use crate::transport::{ChannelId, ProtocolServiceMultiplexer};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use heapless::Vec;

pub use address::BluetoothAddress;
pub use codec::CodecType;
pub use engine::{AvdtpEngine, AvdtpEvent, ConnectionHandle};
pub use error::{AvdtpError, ErrorCode};
pub use signaling::PduError;
pub use transport::{ChannelTransport, TransportError};

pub(crate) static REQUEST_CHANNEL: Channel<CriticalSectionRawMutex, Request, MAX_QUEUED_REQUESTS> =
    Channel::new();

pub(crate) static RESPONSE_CHANNEL: Channel<
    CriticalSectionRawMutex,
    Response,
    MAX_QUEUED_REQUESTS,
> = Channel::new();

pub(crate) static NOTIFICATION_CHANNEL: Channel<
    CriticalSectionRawMutex,
    TransportNotification,
    MAX_QUEUED_NOTIFICATIONS,
> = Channel::new();

pub(crate) static EVENT_CHANNEL: Channel<CriticalSectionRawMutex, AvdtpEvent, MAX_PENDING_EVENTS> =
    Channel::new();

/// Global `AvdtpEngine`, initialized by client at runtime
pub(crate) static AVDTP_ENGINE: Mutex<CriticalSectionRawMutex, Option<AvdtpEngine>> =
    Mutex::new(None);

/// Initialize the global `AvdtpEngine` with the given options.
///
/// This function must be called before using any API functions or running
/// the processor.
///
/// # Errors
///
/// Returns [`AvdtpError::AlreadyInitialized`] if the engine already exists.
///
/// # Example
///
/// ```rust,no_run
/// use bondybird_avdtp::{init_avdtp_engine, AvdtpOptions};
///
/// # async fn example() -> Result<(), bondybird_avdtp::AvdtpError> {
/// init_avdtp_engine(AvdtpOptions::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn init_avdtp_engine(options: AvdtpOptions) -> Result<(), AvdtpError> {
    let mut guard = AVDTP_ENGINE.lock().await;
    if guard.is_some() {
        return Err(AvdtpError::AlreadyInitialized);
    }
    *guard = Some(AvdtpEngine::new(options));
    Ok(())
}

/// Run `f` against the global `AvdtpEngine` while holding its lock.
///
/// This is primarily intended for the processor. Applications should go
/// through the functions in the [`api`] module so that every mutation is
/// serialized with transport notifications.
///
/// # Errors
///
/// Returns [`AvdtpError::NotInitialized`] if [`init_avdtp_engine`] was not called.
pub async fn with_avdtp_engine<R>(f: impl FnOnce(&mut AvdtpEngine) -> R) -> Result<R, AvdtpError> {
    let mut guard = AVDTP_ENGINE.lock().await;
    let engine = guard.as_mut().ok_or(AvdtpError::NotInitialized)?;
    Ok(f(engine))
}

/// Options for configuring an `AvdtpEngine` instance
///
/// # Examples
///
/// ```rust
/// use bondybird_avdtp::AvdtpOptions;
///
/// // Let the application drive every step after discovery
/// let manual = AvdtpOptions {
///     auto_configure: false,
///     ..AvdtpOptions::default()
/// };
/// assert_eq!(manual.psm, 0x0019);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AvdtpOptions {
    /// PSM requested for signaling and transport channels
    pub psm: ProtocolServiceMultiplexer,
    /// MTU assumed for a signaling channel until the transport reports one
    pub signaling_mtu: u16,
    /// Ask for capabilities with GET_ALL_CAPABILITIES instead of GET_CAPABILITIES
    ///
    /// Only the former reports delay reporting support.
    pub use_get_all_capabilities: bool,
    /// Continue from discovery to capabilities and SET_CONFIGURATION on its own
    ///
    /// When disabled the engine stops after each step and raises an event;
    /// the application picks the remote endpoint and configuration.
    pub auto_configure: bool,
}

impl Default for AvdtpOptions {
    fn default() -> Self {
        Self {
            psm: PSM_AVDTP,
            signaling_mtu: DEFAULT_SIGNALING_MTU,
            use_get_all_capabilities: true,
            auto_configure: true,
        }
    }
}

/// Channel event reported by the transport driver
///
/// Posted with the `notify_*` functions in [`api`] and applied to the
/// engine by the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportNotification {
    /// A channel is open
    ChannelOpened {
        /// Channel identifier
        cid: ChannelId,
        /// Remote device
        remote: BluetoothAddress,
        /// Outgoing MTU of the channel
        mtu: u16,
    },
    /// A requested channel could not be opened
    ChannelOpenFailed {
        /// Channel identifier returned by `ChannelTransport::open`
        cid: ChannelId,
    },
    /// A channel closed
    ChannelClosed {
        /// Channel identifier
        cid: ChannelId,
    },
    /// A packet arrived
    Data {
        /// Channel identifier
        cid: ChannelId,
        /// Packet contents
        data: Vec<u8, MAX_MEDIA_PACKET_SIZE>,
    },
    /// A channel that reported busy can take data again
    CanSendNow {
        /// Channel identifier
        cid: ChannelId,
    },
}

/// API requests sent to the processor
#[derive(Debug, Clone)]
pub(crate) enum Request {
    RegisterStreamEndpoint(SepType, MediaType),
    RegisterCapability(StreamEndpointId, Capability),
    RegisterMediaCodec {
        seid: StreamEndpointId,
        codec_type: CodecType,
        info: Vec<u8, MAX_MEDIA_CODEC_INFO_LEN>,
    },
    Connect(BluetoothAddress),
    ConnectWithEndpoint(StreamEndpointId, BluetoothAddress),
    Disconnect(ConnectionHandle),
    Discover(StreamEndpointId),
    GetCapabilities(StreamEndpointId, StreamEndpointId),
    SetConfiguration(StreamEndpointId, StreamEndpointId, Capabilities),
    GetConfiguration(StreamEndpointId),
    Reconfigure(StreamEndpointId, Capabilities),
    OpenStream(StreamEndpointId),
    StartStream(StreamEndpointId),
    SuspendStream(StreamEndpointId),
    CloseStream(StreamEndpointId),
    AbortStream(StreamEndpointId),
    DelayReport(StreamEndpointId, u16),
    SendMedia {
        seid: StreamEndpointId,
        timestamp: u32,
        marker: bool,
        sbc: Option<SbcMediaHeader>,
        payload: Vec<u8, MAX_MEDIA_PACKET_SIZE>,
    },
    SendSbcFrame {
        seid: StreamEndpointId,
        timestamp: u32,
        frame: Vec<u8, MAX_MEDIA_PACKET_SIZE>,
    },
    SetMediaHandler(Option<MediaHandler>),
}

/// API responses sent back from the processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Response {
    Done,
    Registered(StreamEndpointId),
    Connection(ConnectionHandle),
    SequenceNumber(u16),
    Error(AvdtpError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = AvdtpOptions::default();
        assert_eq!(options.psm, 0x0019);
        assert_eq!(options.signaling_mtu, 672);
        assert!(options.use_get_all_capabilities);
        assert!(options.auto_configure);
    }

    #[test]
    fn test_engine_keeps_options() {
        let options = AvdtpOptions {
            use_get_all_capabilities: false,
            auto_configure: false,
            ..AvdtpOptions::default()
        };
        let engine = AvdtpEngine::new(options);
        assert_eq!(*engine.options(), options);
    }
}
