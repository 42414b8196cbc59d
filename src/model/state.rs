//! Broker lifecycle state and negotiation role.

use crate::error::BrokerError;

/// Lifecycle of a [`ConnectionBroker`](crate::broker::ConnectionBroker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    /// Constructed, never connected
    Idle,
    /// Signaling and ICE in progress
    Connecting,
    /// DTLS is up, media can flow
    Connected,
    /// Ended by either side
    Closed,
    /// Ended by an error reported to the delegate
    Failed,
}

impl BrokerState {
    /// `Connecting` and `Connected` own a socket and a peer connection.
    pub fn is_active(&self) -> bool {
        matches!(self, BrokerState::Connecting | BrokerState::Connected)
    }
}

/// Result of one [`drive`](crate::broker::ConnectionBroker::drive) iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveStatus {
    /// Nothing to drive yet
    Idle,
    /// The connection is still in progress or up
    Active,
    /// The connection is over, the broker can be dropped or reconnected
    Finished,
}

/// Which side creates the SDP offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

impl Role {
    /// Both peers derive opposite roles from the same pair of ids, so no
    /// glare resolution is needed. The lower id offers.
    pub fn between(self_id: &str, peer_id: &str) -> Result<Role, BrokerError> {
        match self_id.cmp(peer_id) {
            std::cmp::Ordering::Less => Ok(Role::Offerer),
            std::cmp::Ordering::Greater => Ok(Role::Answerer),
            std::cmp::Ordering::Equal => Err(BrokerError::InvalidIdentity("peer id")),
        }
    }
}
