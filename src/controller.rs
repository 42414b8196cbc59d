//! Connect controller
//!
//! The front end of a call. It asks for media permission, starts a
//! [`ConnectionBroker`] with itself as lifecycle delegate, and keeps a
//! snapshot of what a UI would render.

use std::io::{self, BufRead, Write};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::{
    broker::{BrokerDelegate, ConnectionBroker},
    bus::BusDelegate,
    config::BrokerConfig,
    error::BrokerError,
    model::{MediaConfiguration, MediaStream},
};

/// Outcome of a media permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Grants or denies access to the devices a configuration needs.
pub trait MediaPermission {
    fn request(&self, media: &MediaConfiguration) -> Permission;
}

/// A gate with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedPermission(pub Permission);

impl MediaPermission for FixedPermission {
    fn request(&self, _media: &MediaConfiguration) -> Permission {
        self.0
    }
}

/// Asks on the terminal.
#[derive(Debug, Default)]
pub struct PromptPermission;

impl MediaPermission for PromptPermission {
    fn request(&self, media: &MediaConfiguration) -> Permission {
        let devices = match (media.audio, media.video) {
            (true, true) => "microphone and camera",
            (true, false) => "microphone",
            (false, true) => "camera",
            (false, false) => return Permission::Granted,
        };

        print!("Allow access to {devices}? [y/N] ");
        if io::stdout().flush().is_err() {
            return Permission::Denied;
        }

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) if matches!(answer.trim(), "y" | "Y" | "yes") => Permission::Granted,
            _ => Permission::Denied,
        }
    }
}

/// What the controller currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Idle,
    PermissionDenied,
    Connecting,
    Finished,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub status: CallStatus,
    pub local_stream: Option<String>,
    pub remote_streams: Vec<String>,
    pub last_error: Option<String>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            status: CallStatus::Idle,
            local_stream: None,
            remote_streams: vec![],
            last_error: None,
        }
    }
}

pub struct ConnectController<'b> {
    bus: &'b dyn BusDelegate,
    permission: Box<dyn MediaPermission>,
    config: BrokerConfig,
    view: Mutex<ViewState>,
}

impl<'b> ConnectController<'b> {
    pub fn new(
        bus: &'b dyn BusDelegate,
        permission: Box<dyn MediaPermission>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            bus,
            permission,
            config,
            view: Mutex::new(ViewState::default()),
        }
    }

    pub fn view(&self) -> ViewState {
        self.view.lock().clone()
    }

    /// Starts a call once media permission is granted.
    ///
    /// Returns the connecting broker, or `None` when permission was denied or
    /// the broker could not start (the failure is in [`view`](Self::view)).
    pub fn connect_with_permission(
        &self,
        media: &MediaConfiguration,
    ) -> Option<ConnectionBroker<'_>> {
        if self.permission.request(media) == Permission::Denied {
            warn!("Media permission denied");
            self.view.lock().status = CallStatus::PermissionDenied;
            return None;
        }

        {
            let mut view = self.view.lock();
            view.status = CallStatus::Connecting;
            view.last_error = None;
        }

        let mut broker = ConnectionBroker::with_config(self, self.bus, self.config.clone());
        if broker.connect(media) {
            Some(broker)
        } else {
            None
        }
    }
}

impl BrokerDelegate for ConnectController<'_> {
    fn broker_did_finish(&self) {
        info!("Call finished");
        let mut view = self.view.lock();
        view.status = CallStatus::Finished;
        view.local_stream = None;
    }

    fn broker_did_add_local_stream(&self, stream: &MediaStream) {
        info!(
            "Local stream {} ({} audio, {} video)",
            stream.id(),
            stream.audio_tracks().count(),
            stream.video_tracks().count()
        );
        self.view.lock().local_stream = Some(stream.id().to_string());
    }

    fn broker_did_add_remote_stream(&self, stream: &MediaStream) {
        info!("Remote stream {} added", stream.id());
        self.view.lock().remote_streams.push(stream.id().to_string());
    }

    fn broker_did_remove_remote_stream(&self, stream: &MediaStream) {
        info!("Remote stream {} removed", stream.id());
        self.view.lock().remote_streams.retain(|id| id != stream.id());
    }

    fn broker_did_fail(&self, error: &BrokerError) {
        error!("Call failed: {}", error);
        let mut view = self.view.lock();
        view.status = CallStatus::Failed;
        view.local_stream = None;
        view.last_error = Some(error.to_string());
    }
}
