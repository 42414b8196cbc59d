//! Mailbox signaling relay
//!
//! A minimal HTTP bus for brokers that have no signaling service of their
//! own. Every peer id owns a mailbox. Peers post events into each other's
//! mailbox and poll their own:
//!
//! * `POST /peers/{peer_id}/events` with a [`Posted`] body queues an event.
//! * `GET /peers/{peer_id}/events` drains the mailbox as a JSON array of
//!   [`Envelope`]s.
//!
//! Envelopes older than the relay TTL are dropped when a mailbox is drained.
//! Mailboxes nobody polls are swept once their newest envelope expires, and a
//! mailbox holds at most [`MAX_QUEUED`] envelopes.

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::Arc,
};

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use rouille::{router, Request, Response, Server};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Envelopes kept per mailbox, the oldest are dropped first.
pub const MAX_QUEUED: usize = 256;

/// Converts a TTL in seconds for [`Mailboxes::new`]. Zero is rejected.
pub fn ttl_from_secs(secs: u32) -> anyhow::Result<TimeDelta> {
    if secs == 0 {
        anyhow::bail!("relay ttl must be at least one second");
    }
    TimeDelta::try_seconds(secs.into()).context("relay ttl out of range")
}

/// Body of a `POST /peers/{peer_id}/events` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posted {
    pub from: String,
    pub event: String,
    #[serde(default)]
    pub data: Value,
    pub connection_id: String,
}

/// A queued event as handed back to the polling peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: String,
    pub event: String,
    pub data: Value,
    pub connection_id: String,
    pub sent_at: DateTime<Utc>,
}

/// Per-peer queues of pending envelopes.
#[derive(Debug)]
pub struct Mailboxes {
    boxes: HashMap<String, VecDeque<Envelope>>,
    ttl: TimeDelta,
}

impl Mailboxes {
    pub fn new(ttl: TimeDelta) -> Self {
        Self {
            boxes: HashMap::new(),
            ttl,
        }
    }

    pub fn push(&mut self, to: &str, posted: Posted, now: DateTime<Utc>) {
        self.sweep(now);

        debug!("Queue `{}` from {} to {}", posted.event, posted.from, to);
        let queue = self.boxes.entry(to.to_string()).or_default();
        if queue.len() >= MAX_QUEUED {
            warn!("Mailbox of {} is full, dropping its oldest envelope", to);
            queue.pop_front();
        }
        queue.push_back(Envelope {
            from: posted.from,
            event: posted.event,
            data: posted.data,
            connection_id: posted.connection_id,
            sent_at: now,
        });
    }

    /// Removes mailboxes whose newest envelope has expired.
    fn sweep(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        let before = self.boxes.len();
        self.boxes
            .retain(|_, queue| queue.back().is_some_and(|e| now - e.sent_at <= ttl));

        let swept = before - self.boxes.len();
        if swept > 0 {
            debug!("Swept {} abandoned mailboxes", swept);
        }
    }

    /// Takes every live envelope addressed to `peer_id`, oldest first.
    pub fn drain(&mut self, peer_id: &str, now: DateTime<Utc>) -> Vec<Envelope> {
        let Some(queue) = self.boxes.remove(peer_id) else {
            return vec![];
        };

        let (live, expired): (Vec<_>, Vec<_>) = queue
            .into_iter()
            .partition(|e| now - e.sent_at <= self.ttl);

        if !expired.is_empty() {
            debug!("Dropped {} expired envelopes for {}", expired.len(), peer_id);
        }

        live
    }

    pub fn pending(&self, peer_id: &str) -> usize {
        self.boxes.get(peer_id).map(VecDeque::len).unwrap_or(0)
    }

    /// Number of peers with queued envelopes.
    pub fn mailbox_count(&self) -> usize {
        self.boxes.len()
    }
}

/// Runs the relay on `listen` until the process exits.
pub fn main(listen: SocketAddr, ttl: TimeDelta) -> anyhow::Result<()> {
    let mailboxes = Arc::new(Mutex::new(Mailboxes::new(ttl)));

    let server = Server::new(listen, move |request| web_request(request, &mailboxes))
        .map_err(|e| anyhow::anyhow!("starting the relay server: {e}"))?;

    info!("Relay listening on http://{}", server.server_addr());

    server.run();
    Ok(())
}

fn web_request(request: &Request, mailboxes: &Mutex<Mailboxes>) -> Response {
    router!(request,
        (GET) (/peers/{peer_id: String}/events) => {
            let envelopes = mailboxes.lock().drain(&peer_id, Utc::now());
            Response::json(&envelopes)
        },
        (POST) (/peers/{peer_id: String}/events) => {
            let posted: Posted = match rouille::input::json_input(request) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Rejected event for {}: {}", peer_id, e);
                    return Response::text(e.to_string()).with_status_code(400);
                }
            };
            mailboxes.lock().push(&peer_id, posted, Utc::now());
            Response::empty_204()
        },
        _ => Response::empty_404()
    )
}
