//! Error types surfaced by the broker, the signaling bus and the STUN client.

use std::{error::Error, io, time::Duration};

use str0m::RtcError;

/// Errors delivered through [`BrokerDelegate::broker_did_fail`].
///
/// [`BrokerDelegate::broker_did_fail`]: crate::broker::BrokerDelegate::broker_did_fail
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The media configuration asks for nothing to negotiate
    #[error("invalid media configuration: {0}")]
    InvalidConfiguration(String),

    /// The bus delegate returned an unusable identifier
    #[error("bus delegate returned an invalid {0}")]
    InvalidIdentity(&'static str),

    /// Binding or using the UDP socket failed
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),

    /// No host address could be selected for the UDP socket
    #[error("no usable network interface")]
    NoHostAddress,

    /// Not a single local ICE candidate could be created
    #[error("no local ICE candidates")]
    NoCandidates,

    /// The WebRTC stack rejected an operation
    #[error("webrtc error: {0}")]
    Rtc(#[from] RtcError),

    /// SDP could not be produced or applied
    #[error("sdp negotiation failed: {0}")]
    Sdp(String),

    /// A signaling event carried a payload we cannot use
    #[error("malformed `{event}` payload: {reason}")]
    MalformedSignal { event: String, reason: String },

    /// Sending through the bus delegate failed
    #[error("signaling bus error: {0}")]
    Bus(#[from] BusError),

    /// ICE connectivity was lost
    #[error("ICE connection disconnected")]
    IceDisconnected,

    /// The peer connection did not come up in time
    #[error("connection not established within {0:?}")]
    Timeout(Duration),
}

/// Errors a [`BusDelegate`](crate::bus::BusDelegate) reports when it cannot deliver.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The transport refused the message
    #[error("rejected: {0}")]
    Rejected(String),

    /// The transport itself failed
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn Error + Send + Sync>),
}

impl From<reqwest::Error> for BusError {
    fn from(e: reqwest::Error) -> Self {
        BusError::Transport(Box::new(e))
    }
}

/// Errors from a single STUN binding transaction.
#[derive(Debug, thiserror::Error)]
pub enum StunError {
    #[error("invalid STUN url `{0}`")]
    InvalidUrl(String),

    #[error("cannot resolve STUN server `{0}`")]
    Unresolvable(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("no response before timeout")]
    Timeout,

    #[error("message truncated")]
    Truncated,

    #[error("not a binding response (type {0:#06x})")]
    UnexpectedType(u16),

    #[error("server returned a binding error response")]
    ErrorResponse,

    #[error("bad magic cookie")]
    BadCookie,

    #[error("transaction id mismatch")]
    TransactionMismatch,

    #[error("unsupported address family {0}")]
    UnsupportedFamily(u8),

    #[error("response carries no mapped address")]
    NoMappedAddress,
}
