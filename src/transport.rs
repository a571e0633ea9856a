//! Channel Transport Boundary
//!
//! AVDTP runs on top of a reliable, connection-oriented channel service
//! (L2CAP in practice). The engine never owns that service; it drives it
//! through [`ChannelTransport`] and is told about channel events through the
//! `handle_*` methods on [`crate::engine::AvdtpEngine`].

use crate::BluetoothAddress;

/// Channel identifier assigned by the channel transport
///
/// Dynamically allocated identifiers start at 0x0040, lower values are
/// reserved by L2CAP.
pub type ChannelId = u16;

/// Protocol Service Multiplexer
///
/// Identifies the upper layer protocol a channel is opened for. AVDTP uses
/// 0x0019 for both its signaling and its transport channels.
pub type ProtocolServiceMultiplexer = u16;

/// Errors reported by the channel transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// The channel cannot accept data right now, retry on "can send now"
    Busy,
    /// The channel does not exist or is already closed
    ChannelClosed,
    /// No resources to open another channel
    NoResources,
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Busy => write!(f, "Channel busy"),
            Self::ChannelClosed => write!(f, "Channel closed"),
            Self::NoResources => write!(f, "No channel resources"),
        }
    }
}

/// Connection-oriented channel service consumed by the engine
///
/// `open` only requests a channel; the engine considers it usable once the
/// transport reports it through `AvdtpEngine::handle_channel_opened`.
pub trait ChannelTransport {
    /// Request a new channel to `remote` on `psm`
    ///
    /// # Errors
    /// Returns an error if the request cannot be issued
    fn open(
        &mut self,
        remote: BluetoothAddress,
        psm: ProtocolServiceMultiplexer,
    ) -> Result<ChannelId, TransportError>;

    /// Send one complete packet on `cid`
    ///
    /// # Errors
    /// Returns [`TransportError::Busy`] if the packet should be retried later
    fn send(&mut self, cid: ChannelId, data: &[u8]) -> Result<(), TransportError>;

    /// Request the channel to be closed
    ///
    /// # Errors
    /// Returns an error if the channel is unknown to the transport
    fn close(&mut self, cid: ChannelId) -> Result<(), TransportError>;
}
