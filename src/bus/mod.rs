//! Signaling bus contract
//!
//! The broker never talks to a signaling transport directly. It asks a
//! [`BusDelegate`] for ICE servers and identities, sends named events through
//! it, and registers an [`EventHandler`] the bus calls for every event it
//! receives. The handler only queues; the broker processes the queue when it
//! is driven.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BusError;

pub mod http;

/// Called by the bus for every received event. May be called from any thread.
pub type EventHandler = Box<dyn Fn(BusEvent) + Send>;

/// The signaling transport plus the session identities.
pub trait BusDelegate {
    /// ICE servers to gather candidates from.
    fn ice_servers(&self) -> Vec<IceServer>;

    /// Identifier shared by both peers for this connection.
    fn connection_id(&self) -> String;

    fn self_id(&self) -> String;

    fn peer_id(&self) -> String;

    /// Delivers a named event with a JSON payload to `peer_id`.
    fn send_to_peer(&self, peer_id: &str, event: &str, data: Value) -> Result<(), BusError>;

    /// Registers the receiver of incoming events, replacing any earlier one.
    fn on_event(&self, handler: EventHandler);
}

/// An event received from the bus for a broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    /// Sender of the event
    pub peer_id: String,
    pub event: String,
    pub data: Value,
    pub connection_id: String,
}

impl BusEvent {
    pub fn new(
        peer_id: impl Into<String>,
        event: impl Into<String>,
        data: Value,
        connection_id: impl Into<String>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            event: event.into(),
            data,
            connection_id: connection_id.into(),
        }
    }
}

/// A STUN or TURN server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Event names exchanged between two brokers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// The answerer is listening, the offerer may (re)send its offer
    Ready,
    Offer,
    Answer,
    /// A trickled remote ICE candidate
    Candidate,
    /// The remote side hung up
    Bye,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Ready => "ready",
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
            SignalKind::Bye => "bye",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(SignalKind::Ready),
            "offer" => Ok(SignalKind::Offer),
            "answer" => Ok(SignalKind::Answer),
            "candidate" => Ok(SignalKind::Candidate),
            "bye" => Ok(SignalKind::Bye),
            other => Err(format!("unknown signal `{other}`")),
        }
    }
}
