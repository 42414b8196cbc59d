//! Media stream management
//!
//! This module provides the local and remote media streams a broker hands to
//! its delegate. A stream groups the audio and video tracks negotiated for one
//! side of the peer connection.

use std::time::{Duration, Instant};

use str0m::media::{MediaKind, Mid};

/// Which side of the connection produces a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    Local,
    Remote,
}

/// One audio or video track inside a [`MediaStream`].
#[derive(Debug, Clone)]
pub struct MediaTrack {
    /// The kind of media (audio or video)
    pub(crate) kind: MediaKind,
    /// The media ID (Mid) once SDP negotiation assigned one
    pub(crate) mid: Option<Mid>,
    /// Number of media frames received on this track
    pub(crate) frames: u64,
    /// When the last frame arrived
    pub(crate) last_frame_at: Option<Instant>,
    /// Timestamp of the last keyframe request sent for this track
    pub(crate) last_keyframe_request: Option<Instant>,
}

impl MediaTrack {
    fn new(kind: MediaKind, mid: Option<Mid>) -> Self {
        Self {
            kind,
            mid,
            frames: 0,
            last_frame_at: None,
            last_keyframe_request: None,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Gets the media ID (Mid) for this track, if negotiated.
    pub fn mid(&self) -> Option<Mid> {
        self.mid
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn last_frame_at(&self) -> Option<Instant> {
        self.last_frame_at
    }

    pub(crate) fn record_frame(&mut self, now: Instant) {
        self.frames += 1;
        self.last_frame_at = Some(now);
    }

    /// Marks a keyframe request as sent unless one went out less than
    /// `interval` ago. Returns whether the caller should send it.
    pub(crate) fn try_keyframe_request(&mut self, now: Instant, interval: Duration) -> bool {
        if self
            .last_keyframe_request
            .map(|t| now.saturating_duration_since(t) < interval)
            .unwrap_or(false)
        {
            return false;
        }
        self.last_keyframe_request = Some(now);
        true
    }
}

/// A set of tracks produced by one side of the connection.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    origin: StreamOrigin,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// A local stream declaring one unbound track per requested kind.
    pub fn local(id: impl Into<String>, kinds: &[MediaKind]) -> Self {
        Self {
            id: id.into(),
            origin: StreamOrigin::Local,
            tracks: kinds.iter().map(|k| MediaTrack::new(*k, None)).collect(),
        }
    }

    /// An empty remote stream, tracks arrive as negotiation reports them.
    pub fn remote(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            origin: StreamOrigin::Remote,
            tracks: vec![],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn origin(&self) -> StreamOrigin {
        self.origin
    }

    pub fn is_local(&self) -> bool {
        self.origin == StreamOrigin::Local
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind == MediaKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind == MediaKind::Video)
    }

    pub fn has_mid(&self, mid: Mid) -> bool {
        self.tracks.iter().any(|t| t.mid == Some(mid))
    }

    /// Adds a negotiated track. Returns `false` if `mid` is already present.
    pub(crate) fn add_track(&mut self, kind: MediaKind, mid: Mid) -> bool {
        if self.has_mid(mid) {
            return false;
        }
        self.tracks.push(MediaTrack::new(kind, Some(mid)));
        true
    }

    /// Binds `mid` to the first unbound track of `kind`. Returns `false` if
    /// the mid is already bound or no declared track is waiting for one.
    pub(crate) fn bind_track(&mut self, kind: MediaKind, mid: Mid) -> bool {
        if self.has_mid(mid) {
            return false;
        }
        match self
            .tracks
            .iter_mut()
            .find(|t| t.kind == kind && t.mid.is_none())
        {
            Some(track) => {
                track.mid = Some(mid);
                true
            }
            None => false,
        }
    }

    pub(crate) fn tracks_mut(&mut self) -> impl Iterator<Item = &mut MediaTrack> {
        self.tracks.iter_mut()
    }

    pub(crate) fn track_mut(&mut self, mid: Mid) -> Option<&mut MediaTrack> {
        self.tracks.iter_mut().find(|t| t.mid == Some(mid))
    }
}
