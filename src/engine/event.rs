//! Application events raised by the engine

use super::ConnectionHandle;
use crate::BluetoothAddress;
use crate::endpoint::{StreamEndpointId, StreamEndpointState};
use crate::error::AvdtpError;
use crate::signaling::SignalId;

/// Something the application may want to react to
///
/// Events queue up inside the engine and are drained with
/// [`super::AvdtpEngine::poll_event`]. When the queue is full the oldest
/// event is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AvdtpEvent {
    /// Signaling channel to a remote device is up
    SignalingConnected {
        /// Connection handle
        handle: ConnectionHandle,
        /// Remote device
        address: BluetoothAddress,
    },
    /// Signaling channel could not be opened
    SignalingConnectionFailed {
        /// Remote device
        address: BluetoothAddress,
    },
    /// Signaling channel closed, every attached endpoint is back in `Idle`
    SignalingDisconnected {
        /// Connection handle
        handle: ConnectionHandle,
        /// Remote device
        address: BluetoothAddress,
    },
    /// Remote endpoints listed
    DiscoveryComplete {
        /// Local endpoint running the discovery
        seid: StreamEndpointId,
        /// Number of remote endpoints stored
        count: u8,
    },
    /// Capabilities of a remote endpoint received
    CapabilitiesReceived {
        /// Local endpoint
        seid: StreamEndpointId,
        /// Remote endpoint the capabilities belong to
        remote_seid: StreamEndpointId,
    },
    /// Configuration accepted by both sides
    StreamConfigured {
        /// Local endpoint
        seid: StreamEndpointId,
        /// Remote endpoint
        remote_seid: StreamEndpointId,
        /// Whether this side sent SET_CONFIGURATION
        initiator: bool,
    },
    /// Discovery or configuration sequence gave up
    ConfigurationFailed {
        /// Local endpoint
        seid: StreamEndpointId,
        /// Reason
        error: AvdtpError,
    },
    /// GET_CONFIGURATION answer stored in the endpoint's reported configuration
    Configuration {
        /// Local endpoint
        seid: StreamEndpointId,
    },
    /// RECONFIGURE applied
    Reconfigured {
        /// Local endpoint
        seid: StreamEndpointId,
    },
    /// Stream endpoint lifecycle moved
    StateChanged {
        /// Local endpoint
        seid: StreamEndpointId,
        /// New state
        state: StreamEndpointState,
    },
    /// A command sent by this side was accepted
    CommandAccepted {
        /// Local endpoint
        seid: StreamEndpointId,
        /// Signal of the command
        signal: SignalId,
    },
    /// A command sent by this side was rejected or could not be sent
    CommandFailed {
        /// Local endpoint
        seid: StreamEndpointId,
        /// Signal of the command
        signal: SignalId,
        /// Reject reason or transport failure
        error: AvdtpError,
    },
    /// Sink reported its playback delay
    DelayReport {
        /// Local endpoint
        seid: StreamEndpointId,
        /// Delay in 1/10 milliseconds
        delay: u16,
    },
}
