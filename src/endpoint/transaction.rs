//! Transaction Tracking
//!
//! A transaction label is a 4-bit number chosen by the initiator of a command
//! and echoed by the acceptor in the response. A stream endpoint holds at
//! most one outstanding transaction per role: one command it sent and is
//! waiting on, and one command it received and has not answered yet.

use super::{StreamEndpointId, StreamEndpointState};
use crate::error::AvdtpError;
use crate::signaling::SignalId;

/// Hands out initiator transaction labels, wrapping after 15
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelAllocator {
    next: u8,
}

impl LabelAllocator {
    /// Create an allocator starting at label 0
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Take the next label
    pub fn allocate(&mut self) -> u8 {
        let label = self.next;
        self.next = (self.next + 1) & 0x0F;
        label
    }
}

/// A command this endpoint sent and has not received an answer for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InitiatorTransaction {
    /// Transaction label of the command
    pub label: u8,
    /// Signal of the command
    pub signal: SignalId,
    /// Remote endpoint the command addresses, if any
    pub remote_seid: Option<StreamEndpointId>,
    /// State to return to if the command is rejected
    pub revert_state: StreamEndpointState,
    /// Whether the command left the transport yet
    pub sent: bool,
}

/// A command this endpoint received and has not answered yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcceptorTransaction {
    /// Transaction label chosen by the remote initiator
    pub label: u8,
    /// Signal of the command
    pub signal: SignalId,
}

/// Outstanding transactions of one stream endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionSlots {
    initiator: Option<InitiatorTransaction>,
    acceptor: Option<AcceptorTransaction>,
}

impl TransactionSlots {
    /// Create empty slots
    #[must_use]
    pub const fn new() -> Self {
        Self {
            initiator: None,
            acceptor: None,
        }
    }

    /// Outstanding initiator transaction
    #[must_use]
    pub const fn initiator(&self) -> Option<&InitiatorTransaction> {
        self.initiator.as_ref()
    }

    /// Outstanding acceptor transaction
    #[must_use]
    pub const fn acceptor(&self) -> Option<&AcceptorTransaction> {
        self.acceptor.as_ref()
    }

    /// Record a new initiator command
    ///
    /// # Errors
    /// Returns [`AvdtpError::TransactionPending`] if a command is already
    /// outstanding
    pub fn begin_initiator(&mut self, transaction: InitiatorTransaction) -> Result<(), AvdtpError> {
        if self.initiator.is_some() {
            return Err(AvdtpError::TransactionPending);
        }
        self.initiator = Some(transaction);
        Ok(())
    }

    /// Record a new initiator command, dropping any outstanding one
    ///
    /// Only ABORT may preempt an outstanding command.
    pub fn preempt_initiator(&mut self, transaction: InitiatorTransaction) {
        if let Some(previous) = self.initiator.replace(transaction) {
            debug!(
                "[AVDTP] dropping {} transaction label {}",
                previous.signal, previous.label
            );
        }
    }

    /// Mark the outstanding initiator command as sent
    pub fn mark_sent(&mut self, label: u8) {
        if let Some(transaction) = self.initiator.as_mut()
            && transaction.label == label
        {
            transaction.sent = true;
        }
    }

    /// Take the outstanding initiator transaction if `label` and `signal` answer it
    pub fn complete_initiator(&mut self, label: u8, signal: u8) -> Option<InitiatorTransaction> {
        match self.initiator {
            Some(transaction) if transaction.label == label && transaction.signal as u8 == signal => {
                self.initiator.take()
            }
            _ => None,
        }
    }

    /// Drop the outstanding initiator transaction
    pub fn clear_initiator(&mut self) -> Option<InitiatorTransaction> {
        self.initiator.take()
    }

    /// Record a received command awaiting its answer
    ///
    /// # Errors
    /// Returns [`AvdtpError::TransactionPending`] if an answer is already
    /// outstanding
    pub fn begin_acceptor(&mut self, transaction: AcceptorTransaction) -> Result<(), AvdtpError> {
        if self.acceptor.is_some() {
            return Err(AvdtpError::TransactionPending);
        }
        self.acceptor = Some(transaction);
        Ok(())
    }

    /// Take the outstanding acceptor transaction once its answer is out
    pub fn complete_acceptor(&mut self, label: u8) -> Option<AcceptorTransaction> {
        match self.acceptor {
            Some(transaction) if transaction.label == label => self.acceptor.take(),
            _ => None,
        }
    }

    /// Drop both transactions
    pub fn clear(&mut self) {
        self.initiator = None;
        self.acceptor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_command(label: u8) -> InitiatorTransaction {
        InitiatorTransaction {
            label,
            signal: SignalId::Open,
            remote_seid: Some(1),
            revert_state: StreamEndpointState::Configured,
            sent: false,
        }
    }

    #[test]
    fn test_labels_wrap_at_four_bits() {
        let mut labels = LabelAllocator::new();
        for expected in 0..16 {
            assert_eq!(labels.allocate(), expected);
        }
        assert_eq!(labels.allocate(), 0);
    }

    #[test]
    fn test_second_initiator_command_rejected() {
        let mut slots = TransactionSlots::new();
        slots.begin_initiator(open_command(3)).unwrap();
        assert_eq!(
            slots.begin_initiator(open_command(4)),
            Err(AvdtpError::TransactionPending)
        );
        assert_eq!(slots.initiator().map(|t| t.label), Some(3));
    }

    #[test]
    fn test_response_must_match_label_and_signal() {
        let mut slots = TransactionSlots::new();
        slots.begin_initiator(open_command(3)).unwrap();

        assert_eq!(slots.complete_initiator(4, SignalId::Open as u8), None);
        assert_eq!(slots.complete_initiator(3, SignalId::Start as u8), None);
        assert!(slots.complete_initiator(3, SignalId::Open as u8).is_some());
        assert!(slots.initiator().is_none());
    }

    #[test]
    fn test_roles_are_independent() {
        let mut slots = TransactionSlots::new();
        slots.begin_initiator(open_command(3)).unwrap();
        slots
            .begin_acceptor(AcceptorTransaction {
                label: 3,
                signal: SignalId::GetConfiguration,
            })
            .unwrap();

        assert!(
            slots
                .begin_acceptor(AcceptorTransaction {
                    label: 5,
                    signal: SignalId::Open,
                })
                .is_err()
        );
        assert!(slots.complete_acceptor(3).is_some());
        assert!(slots.initiator().is_some());
    }

    #[test]
    fn test_abort_preempts_pending_command() {
        let mut slots = TransactionSlots::new();
        slots.begin_initiator(open_command(3)).unwrap();
        slots.preempt_initiator(InitiatorTransaction {
            signal: SignalId::Abort,
            ..open_command(4)
        });
        assert_eq!(slots.initiator().map(|t| t.signal), Some(SignalId::Abort));
    }
}
