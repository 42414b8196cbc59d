//! [`BusDelegate`] over the mailbox [relay](crate::relay).

use parking_lot::Mutex;
use reqwest::blocking::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    bus::{BusDelegate, BusEvent, EventHandler, IceServer},
    error::BusError,
    relay::{Envelope, Posted},
};

/// Identities and ICE servers one peer uses on the relay.
#[derive(Debug, Clone)]
pub struct HttpBusConfig {
    /// Base url of the relay, e.g. `http://127.0.0.1:3000`
    pub relay: String,
    pub connection_id: String,
    pub self_id: String,
    pub peer_id: String,
    pub ice_servers: Vec<IceServer>,
}

pub struct HttpBus {
    client: Client,
    config: HttpBusConfig,
    handler: Mutex<Option<EventHandler>>,
}

impl HttpBus {
    pub fn new(config: HttpBusConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            handler: Mutex::new(None),
        }
    }

    fn mailbox_url(&self, peer_id: &str) -> String {
        format!(
            "{}/peers/{}/events",
            self.config.relay.trim_end_matches('/'),
            peer_id
        )
    }

    /// Drains our mailbox on the relay and hands every event to the
    /// registered handler. Returns the number of events received.
    pub fn poll(&self) -> Result<usize, BusError> {
        let envelopes: Vec<Envelope> = self
            .client
            .get(self.mailbox_url(&self.config.self_id))
            .send()?
            .error_for_status()?
            .json()?;

        let count = envelopes.len();
        self.dispatch(
            envelopes
                .into_iter()
                .map(|e| BusEvent::new(e.from, e.event, e.data, e.connection_id)),
        );
        Ok(count)
    }

    fn dispatch(&self, events: impl IntoIterator<Item = BusEvent>) {
        let handler = self.handler.lock();
        for event in events {
            debug!("📥 Bus: `{}` from {}", event.event, event.peer_id);
            match handler.as_ref() {
                Some(handler) => handler(event),
                None => warn!("No handler registered, dropping `{}`", event.event),
            }
        }
    }
}

impl BusDelegate for HttpBus {
    fn ice_servers(&self) -> Vec<IceServer> {
        self.config.ice_servers.clone()
    }

    fn connection_id(&self) -> String {
        self.config.connection_id.clone()
    }

    fn self_id(&self) -> String {
        self.config.self_id.clone()
    }

    fn peer_id(&self) -> String {
        self.config.peer_id.clone()
    }

    fn send_to_peer(&self, peer_id: &str, event: &str, data: Value) -> Result<(), BusError> {
        debug!("📤 Bus: `{}` to {}", event, peer_id);

        let body = Posted {
            from: self.config.self_id.clone(),
            event: event.to_string(),
            data,
            connection_id: self.config.connection_id.clone(),
        };

        let response = self.client.post(self.mailbox_url(peer_id)).json(&body).send()?;
        if !response.status().is_success() {
            return Err(BusError::Rejected(format!(
                "relay answered {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn on_event(&self, handler: EventHandler) {
        *self.handler.lock() = Some(handler);
    }
}
