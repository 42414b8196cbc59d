//! Peer-to-peer media connections over WebRTC.
//!
//! A [`ConnectionBroker`] negotiates one `str0m` peer connection with a
//! remote broker. Signaling goes through a [`BusDelegate`], lifecycle
//! notifications go to a [`BrokerDelegate`]. The [`relay`] module and
//! [`bus::http::HttpBus`] give the two a minimal HTTP transport.

pub mod broker;
pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod relay;
pub mod stun;
pub mod util;

pub use broker::{BrokerDelegate, ConnectionBroker};
pub use bus::{BusDelegate, BusEvent, EventHandler, IceServer, SignalKind};
pub use config::BrokerConfig;
pub use error::{BrokerError, BusError, StunError};
pub use model::{BrokerState, DriveStatus, MediaConfiguration, MediaStream, Role};
