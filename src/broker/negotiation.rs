//! Signaling: turning bus events into SDP and candidate changes.

use std::sync::mpsc::TryRecvError;

use serde_json::Value;
use str0m::{
    change::{SdpAnswer, SdpOffer},
    media::{Direction, MediaKind, Mid},
    Candidate,
};
use tracing::{debug, info, warn};

use super::ConnectionBroker;
use crate::{
    bus::{BusEvent, SignalKind},
    error::BrokerError,
    model::{MediaStream, Role},
};

fn malformed(kind: SignalKind, reason: impl ToString) -> BrokerError {
    BrokerError::MalformedSignal {
        event: kind.to_string(),
        reason: reason.to_string(),
    }
}

impl ConnectionBroker<'_> {
    /// Handles every bus event queued since the last call and returns how
    /// many there were. [`drive`](Self::drive) calls this first.
    pub fn process_bus_events(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let Some(inbox) = &self.inbox else {
                break;
            };
            match inbox.try_recv() {
                Ok(event) => {
                    self.handle_bus_event(&event);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("Bus dropped our event handler");
                    self.inbox = None;
                    break;
                }
            }
        }
        handled
    }

    /// Dispatches one event received from the bus.
    ///
    /// Events for another connection or from another peer are ignored, as is
    /// anything arriving while the broker is not active.
    fn handle_bus_event(&mut self, event: &BusEvent) {
        if !self.state.is_active() {
            debug!("Ignoring `{}` while {:?}", event.event, self.state);
            return;
        }

        let Some(session) = &self.session else {
            return;
        };

        if event.connection_id != session.connection_id {
            debug!(
                "Ignoring `{}` for connection {} (ours is {})",
                event.event, event.connection_id, session.connection_id
            );
            return;
        }

        if event.peer_id != session.peer_id {
            debug!("Ignoring `{}` from unexpected peer {}", event.event, event.peer_id);
            return;
        }

        let kind: SignalKind = match event.event.parse() {
            Ok(k) => k,
            Err(e) => {
                warn!("Ignoring bus event: {}", e);
                return;
            }
        };

        info!("📥 Signal `{}` from {}", kind, event.peer_id);

        let result = match kind {
            SignalKind::Ready => self.handle_ready(),
            SignalKind::Offer => self.handle_offer(&event.data),
            SignalKind::Answer => self.handle_answer(&event.data),
            SignalKind::Candidate => self.handle_candidate(&event.data),
            SignalKind::Bye => {
                self.finish_remote();
                Ok(())
            }
        };

        if let Err(e) = result {
            self.fail(e);
        }
    }

    pub(super) fn signal(&self, kind: SignalKind, data: Value) -> Result<(), BrokerError> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        self.bus
            .send_to_peer(&session.peer_id, kind.as_str(), data)?;
        Ok(())
    }

    /// Adds one send-receive m-line per local track and sends the offer.
    pub(super) fn send_offer(&mut self) -> Result<(), BrokerError> {
        let (Some(link), Some(local)) = (self.link.as_mut(), self.local_stream.as_mut()) else {
            return Ok(());
        };

        let stream_id = local.id().to_string();
        let mut change = link.rtc.sdp_api();

        for track in local.tracks_mut() {
            if track.mid.is_none() {
                let mid = change.add_media(
                    track.kind,
                    Direction::SendRecv,
                    Some(stream_id.clone()),
                    None,
                    None,
                );
                track.mid = Some(mid);
            }
        }

        let (offer, pending) = change
            .apply()
            .ok_or_else(|| BrokerError::Sdp("no media to offer".to_string()))?;

        let data = serde_json::to_value(&offer).map_err(|e| BrokerError::Sdp(e.to_string()))?;
        info!("📝 Offer SDP:\n{}", offer);

        self.pending = Some((data.clone(), pending));
        self.signal(SignalKind::Offer, data)
    }

    fn handle_ready(&mut self) -> Result<(), BrokerError> {
        if self.role() != Some(Role::Offerer) {
            debug!("Answerer ignores ready");
            return Ok(());
        }

        let Some((offer, _)) = &self.pending else {
            debug!("Offer already answered, ignoring ready");
            return Ok(());
        };

        info!("Peer is ready, resending offer");
        self.signal(SignalKind::Offer, offer.clone())
    }

    fn handle_offer(&mut self, data: &Value) -> Result<(), BrokerError> {
        if self.role() == Some(Role::Offerer) {
            warn!("Both sides offered, keeping our own offer");
            return Ok(());
        }

        let offer: SdpOffer =
            serde_json::from_value(data.clone()).map_err(|e| malformed(SignalKind::Offer, e))?;

        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };

        let answer = link.rtc.sdp_api().accept_offer(offer)?;
        info!("📝 Answer SDP:\n{}", answer);

        let data = serde_json::to_value(&answer).map_err(|e| BrokerError::Sdp(e.to_string()))?;
        self.signal(SignalKind::Answer, data)
    }

    fn handle_answer(&mut self, data: &Value) -> Result<(), BrokerError> {
        let answer: SdpAnswer =
            serde_json::from_value(data.clone()).map_err(|e| malformed(SignalKind::Answer, e))?;

        let Some((_, pending)) = self.pending.take() else {
            warn!("Answer without a pending offer, ignoring");
            return Ok(());
        };

        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };

        link.rtc.sdp_api().accept_answer(pending, answer)?;
        info!("✅ Answer accepted, waiting for ICE");

        // Every send-receive m-line we offered now carries remote media too.
        let negotiated: Vec<(MediaKind, Mid)> = self
            .local_stream
            .iter()
            .flat_map(|s| s.tracks())
            .filter_map(|t| t.mid().map(|m| (t.kind(), m)))
            .collect();

        for (kind, mid) in negotiated {
            self.add_remote_track(kind, mid);
        }

        Ok(())
    }

    fn handle_candidate(&mut self, data: &Value) -> Result<(), BrokerError> {
        let line = data
            .get("candidate")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(SignalKind::Candidate, "missing `candidate`"))?;

        let candidate = Candidate::from_sdp_string(line)
            .map_err(|e| malformed(SignalKind::Candidate, format!("{e:?}")))?;

        if let Some(link) = self.link.as_mut() {
            debug!("Remote candidate: {}", line);
            link.rtc.add_remote_candidate(candidate);
        }
        Ok(())
    }

    /// Records a negotiated remote track. The first one creates the remote
    /// stream and announces it.
    pub(super) fn add_remote_track(&mut self, kind: MediaKind, mid: Mid) {
        let Some(session) = &self.session else {
            return;
        };

        if self.remote_streams.is_empty() {
            let mut stream = MediaStream::remote(format!("{}-remote", session.peer_id));
            stream.add_track(kind, mid);
            info!("🎉 Remote stream {} added with {:?} track {:?}", stream.id(), kind, mid);
            self.delegate.broker_did_add_remote_stream(&stream);
            self.remote_streams.push(stream);
            return;
        }

        if self.remote_streams[0].add_track(kind, mid) {
            info!("Remote {:?} track {:?} added", kind, mid);
        }
    }

    /// Binds a negotiated m-line to a declared local track. The answerer
    /// learns its mids this way.
    pub(super) fn bind_local_track(&mut self, kind: MediaKind, mid: Mid) {
        if let Some(local) = self.local_stream.as_mut() {
            if local.bind_track(kind, mid) {
                debug!("Local {:?} track bound to {:?}", kind, mid);
            }
        }
    }
}
