use std::{net::IpAddr, time::Duration};

/// Runtime knobs for a [`ConnectionBroker`](crate::broker::ConnectionBroker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Address to bind the media socket to. `None` picks the first routable
    /// host address.
    pub bind_addr: Option<IpAddr>,
    /// How long to wait for each STUN server to answer a binding request.
    pub stun_timeout: Duration,
    /// How long the broker may stay in `Connecting` before it fails.
    pub connect_timeout: Duration,
    /// Minimum spacing between keyframe requests for one remote video track.
    pub keyframe_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: None,
            stun_timeout: Duration::from_millis(1500),
            connect_timeout: Duration::from_secs(30),
            keyframe_interval: Duration::from_secs(1),
        }
    }
}

impl BrokerConfig {
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
