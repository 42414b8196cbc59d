//! Connection broker
//!
//! A [`ConnectionBroker`] establishes one peer connection with one remote
//! broker. It owns the `str0m` [`Rtc`] instance and the UDP socket, exchanges
//! SDP through a [`BusDelegate`], and reports streams and failures to a
//! [`BrokerDelegate`].
//!
//! The broker is sans-IO on the signaling side and drives its own socket:
//!
//! 1. [`connect`](ConnectionBroker::connect) binds the socket, gathers
//!    candidates and either sends an offer or announces readiness
//! 2. the bus calls the handler registered through
//!    [`BusDelegate::on_event`], which queues the event for the broker
//! 3. the owner calls [`drive`](ConnectionBroker::drive) in a loop, which
//!    handles queued bus events and moves datagrams and timers through the
//!    WebRTC state machine
//! 4. [`disconnect`](ConnectionBroker::disconnect) or a remote `bye` ends it

use std::{
    net::{SocketAddr, UdpSocket},
    sync::mpsc::{self, Receiver},
    time::Instant,
};

use str0m::{change::SdpPendingOffer, Rtc};
use tracing::{debug, error, info, warn};

use crate::{
    bus::{BusDelegate, BusEvent, SignalKind},
    config::BrokerConfig,
    error::BrokerError,
    model::{BrokerState, DriveStatus, MediaConfiguration, MediaStream, Role},
};

mod io;
mod negotiation;

/// Lifecycle callbacks. They run synchronously on the thread that called
/// into the broker.
pub trait BrokerDelegate {
    /// The connection ended without error, locally or remotely.
    fn broker_did_finish(&self);

    fn broker_did_add_local_stream(&self, stream: &MediaStream);

    /// The first remote track arrived.
    fn broker_did_add_remote_stream(&self, stream: &MediaStream);

    fn broker_did_remove_remote_stream(&self, stream: &MediaStream);

    /// The connection failed. No `broker_did_finish` follows.
    fn broker_did_fail(&self, error: &BrokerError);
}

/// Identities resolved from the bus at connect time.
#[derive(Debug, Clone)]
struct Session {
    connection_id: String,
    self_id: String,
    peer_id: String,
    role: Role,
}

impl Session {
    fn resolve(bus: &dyn BusDelegate) -> Result<Session, BrokerError> {
        let connection_id = bus.connection_id();
        let self_id = bus.self_id();
        let peer_id = bus.peer_id();

        if connection_id.is_empty() {
            return Err(BrokerError::InvalidIdentity("connection id"));
        }
        if self_id.is_empty() {
            return Err(BrokerError::InvalidIdentity("self id"));
        }
        if peer_id.is_empty() {
            return Err(BrokerError::InvalidIdentity("peer id"));
        }

        let role = Role::between(&self_id, &peer_id)?;

        Ok(Session {
            connection_id,
            self_id,
            peer_id,
            role,
        })
    }
}

/// The transport half of an active connection.
struct Link {
    rtc: Rtc,
    socket: UdpSocket,
    buf: Vec<u8>,
}

/// Establishes and maintains a media connection with one peer.
///
/// Both delegates are borrowed, the broker never outlives them.
pub struct ConnectionBroker<'d> {
    delegate: &'d dyn BrokerDelegate,
    bus: &'d dyn BusDelegate,
    config: BrokerConfig,
    state: BrokerState,
    session: Option<Session>,
    link: Option<Link>,
    /// Events queued by the handler registered on the bus
    inbox: Option<Receiver<BusEvent>>,
    /// Offer sent but not answered yet, kept for resending on `ready`
    pending: Option<(serde_json::Value, SdpPendingOffer)>,
    local_stream: Option<MediaStream>,
    remote_streams: Vec<MediaStream>,
    started_at: Option<Instant>,
}

impl<'d> ConnectionBroker<'d> {
    pub fn new(delegate: &'d dyn BrokerDelegate, bus: &'d dyn BusDelegate) -> Self {
        Self::with_config(delegate, bus, BrokerConfig::default())
    }

    pub fn with_config(
        delegate: &'d dyn BrokerDelegate,
        bus: &'d dyn BusDelegate,
        config: BrokerConfig,
    ) -> Self {
        Self {
            delegate,
            bus,
            config,
            state: BrokerState::Idle,
            session: None,
            link: None,
            inbox: None,
            pending: None,
            local_stream: None,
            remote_streams: vec![],
            started_at: None,
        }
    }

    pub fn state(&self) -> BrokerState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.session.as_ref().map(|s| s.role)
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.local_stream.as_ref()
    }

    pub fn remote_streams(&self) -> &[MediaStream] {
        &self.remote_streams
    }

    /// Address of the media socket while a connection is active.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.link.as_ref().and_then(|l| l.socket.local_addr().ok())
    }

    /// Starts connecting with `media`.
    ///
    /// Returns `false` if the broker is already active or setup failed. Setup
    /// failures are also reported through
    /// [`BrokerDelegate::broker_did_fail`].
    pub fn connect(&mut self, media: &MediaConfiguration) -> bool {
        if self.state.is_active() {
            warn!("Broker already {:?}, ignoring connect", self.state);
            return false;
        }

        match self.try_connect(media) {
            Ok(()) => true,
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    fn try_connect(&mut self, media: &MediaConfiguration) -> Result<(), BrokerError> {
        media.validate()?;
        let session = Session::resolve(self.bus)?;

        let socket = crate::util::bind_socket(self.config.bind_addr)?;
        let mut candidates = crate::util::host_candidates(&socket)?;
        candidates.extend(crate::stun::reflexive_candidates(
            &socket,
            &self.bus.ice_servers(),
            self.config.stun_timeout,
        ));
        if candidates.is_empty() {
            return Err(BrokerError::NoCandidates);
        }

        let mut rtc = Rtc::builder().build();
        for candidate in candidates {
            info!("Local candidate: {:?}", candidate);
            let _ = rtc.add_local_candidate(candidate);
        }

        let stream_id = format!("{}-{}", session.self_id, uuid::Uuid::new_v4());
        let local = MediaStream::local(stream_id, &media.kinds());

        info!(
            "Connecting {} to {} on {} as {:?}",
            session.self_id, session.peer_id, session.connection_id, session.role
        );

        // Register before signaling so the peer's reply cannot be missed.
        let (tx, rx) = mpsc::channel();
        self.bus.on_event(Box::new(move |event| {
            if tx.send(event).is_err() {
                debug!("Broker gone, dropping bus event");
            }
        }));

        let role = session.role;
        self.inbox = Some(rx);
        self.session = Some(session);
        self.link = Some(Link {
            rtc,
            socket,
            buf: vec![0; 2000],
        });
        self.pending = None;
        self.remote_streams.clear();
        self.local_stream = Some(local);
        self.started_at = Some(Instant::now());
        self.state = BrokerState::Connecting;

        if let Some(local) = &self.local_stream {
            self.delegate.broker_did_add_local_stream(local);
        }

        match role {
            Role::Offerer => self.send_offer(),
            Role::Answerer => self.signal(SignalKind::Ready, serde_json::json!({})),
        }
    }

    /// Ends an active connection and tells the peer. A no-op otherwise.
    pub fn disconnect(&mut self) {
        if !self.state.is_active() {
            return;
        }

        if let Err(e) = self.signal(SignalKind::Bye, serde_json::json!({})) {
            warn!("Could not send bye: {}", e);
        }

        info!("Disconnecting");
        self.teardown();
        self.state = BrokerState::Closed;
        self.delegate.broker_did_finish();
    }

    /// The peer hung up.
    fn finish_remote(&mut self) {
        info!("Peer hung up");
        self.teardown();
        self.state = BrokerState::Closed;
        self.delegate.broker_did_finish();
    }

    fn fail(&mut self, e: BrokerError) {
        error!("Broker failed: {}", e);
        self.teardown();
        self.state = BrokerState::Failed;
        self.delegate.broker_did_fail(&e);
    }

    /// Releases the connection and announces every remote stream as removed.
    fn teardown(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.rtc.disconnect();
        }
        self.session = None;
        self.inbox = None;
        self.pending = None;
        self.local_stream = None;
        self.started_at = None;

        for stream in std::mem::take(&mut self.remote_streams) {
            self.delegate.broker_did_remove_remote_stream(&stream);
        }
    }

    fn status(&self) -> DriveStatus {
        match self.state {
            BrokerState::Idle => DriveStatus::Idle,
            BrokerState::Connecting | BrokerState::Connected => DriveStatus::Active,
            BrokerState::Closed | BrokerState::Failed => DriveStatus::Finished,
        }
    }
}

impl Drop for ConnectionBroker<'_> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
