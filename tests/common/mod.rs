#![allow(dead_code)]

use parking_lot::Mutex;
use perch_rtc::{
    BrokerConfig, BrokerDelegate, BrokerError, BusDelegate, BusError, BusEvent, EventHandler,
    IceServer, MediaStream,
};
use serde_json::Value;

pub const ROOM: &str = "room-1";

/// Every delegate callback, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Finish,
    LocalStream(String),
    RemoteStream(String),
    RemovedStream(String),
    Fail(String),
}

#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<Recorded>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    pub fn failures(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Fail(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }
}

impl BrokerDelegate for Recorder {
    fn broker_did_finish(&self) {
        self.events.lock().push(Recorded::Finish);
    }

    fn broker_did_add_local_stream(&self, stream: &MediaStream) {
        self.events
            .lock()
            .push(Recorded::LocalStream(stream.id().to_string()));
    }

    fn broker_did_add_remote_stream(&self, stream: &MediaStream) {
        self.events
            .lock()
            .push(Recorded::RemoteStream(stream.id().to_string()));
    }

    fn broker_did_remove_remote_stream(&self, stream: &MediaStream) {
        self.events
            .lock()
            .push(Recorded::RemovedStream(stream.id().to_string()));
    }

    fn broker_did_fail(&self, error: &BrokerError) {
        self.events.lock().push(Recorded::Fail(error.to_string()));
    }
}

/// A bus that queues outgoing events for the test to deliver by hand.
pub struct MemoryBus {
    pub self_id: String,
    pub peer_id: String,
    pub connection_id: String,
    pub outbox: Mutex<Vec<(String, String, Value)>>,
    pub refuse: bool,
    handler: Mutex<Option<EventHandler>>,
}

impl MemoryBus {
    pub fn new(self_id: &str, peer_id: &str) -> Self {
        Self {
            self_id: self_id.to_string(),
            peer_id: peer_id.to_string(),
            connection_id: ROOM.to_string(),
            outbox: Mutex::new(vec![]),
            refuse: false,
            handler: Mutex::new(None),
        }
    }

    /// Hands `event` to the registered handler, as if it arrived on the bus.
    /// Returns `false` if nobody has registered yet.
    pub fn deliver(&self, event: BusEvent) -> bool {
        match self.handler.lock().as_ref() {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }

    /// Names of the events sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.outbox.lock().iter().map(|(_, e, _)| e.clone()).collect()
    }

    /// Drains the outbox as events the peer would receive.
    pub fn take(&self) -> Vec<BusEvent> {
        std::mem::take(&mut *self.outbox.lock())
            .into_iter()
            .map(|(_, event, data)| BusEvent::new(&self.self_id, event, data, &self.connection_id))
            .collect()
    }

    /// An event as if sent by our peer.
    pub fn from_peer(&self, event: &str, data: Value) -> BusEvent {
        BusEvent::new(&self.peer_id, event, data, &self.connection_id)
    }
}

impl BusDelegate for MemoryBus {
    fn ice_servers(&self) -> Vec<IceServer> {
        vec![]
    }

    fn connection_id(&self) -> String {
        self.connection_id.clone()
    }

    fn self_id(&self) -> String {
        self.self_id.clone()
    }

    fn peer_id(&self) -> String {
        self.peer_id.clone()
    }

    fn send_to_peer(&self, peer_id: &str, event: &str, data: Value) -> Result<(), BusError> {
        if self.refuse {
            return Err(BusError::Rejected("bus closed".to_string()));
        }
        self.outbox
            .lock()
            .push((peer_id.to_string(), event.to_string(), data));
        Ok(())
    }

    fn on_event(&self, handler: EventHandler) {
        *self.handler.lock() = Some(handler);
    }
}

pub fn loopback_config() -> BrokerConfig {
    BrokerConfig::default().with_bind_addr("127.0.0.1".parse().unwrap())
}
