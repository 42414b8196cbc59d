//! Data models for peer connections
//!
//! This module contains the media streams a broker exposes to its delegate,
//! the media configuration a connection is started with, and the lifecycle
//! state of a broker.

pub mod media;
pub mod state;
pub mod stream;

pub use media::MediaConfiguration;
pub use state::{BrokerState, DriveStatus, Role};
pub use stream::{MediaStream, MediaTrack, StreamOrigin};
