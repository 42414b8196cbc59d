//! The drive loop: moving datagrams, timers and events through `str0m`.

use std::{
    io::ErrorKind,
    net::UdpSocket,
    time::{Duration, Instant},
};

use str0m::{
    media::{Direction, KeyframeRequestKind, MediaData, MediaKind, Mid},
    net::{Protocol, Receive},
    Event, IceConnectionState, Input, Output,
};
use tracing::{debug, info};

use super::ConnectionBroker;
use crate::{
    error::BrokerError,
    model::{BrokerState, DriveStatus},
};

impl ConnectionBroker<'_> {
    /// Runs one iteration of the connection loop: handles queued bus events,
    /// then blocks for at most `max_wait` on the socket.
    ///
    /// Errors are reported to the delegate and show up here as
    /// [`DriveStatus::Finished`].
    pub fn drive(&mut self, max_wait: Duration) -> DriveStatus {
        if self.state.is_active() {
            self.process_bus_events();
        }
        if self.state.is_active() {
            if let Err(e) = self.drive_once(max_wait) {
                self.fail(e);
            }
        }
        self.status()
    }

    fn drive_once(&mut self, max_wait: Duration) -> Result<(), BrokerError> {
        self.check_connect_deadline()?;

        let timeout = self.poll_until_timeout()?;

        // Handling an event may have ended the connection.
        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };

        // The read timeout is not allowed to be 0. In case it is 0, we set 1 millisecond.
        let wait = timeout
            .saturating_duration_since(Instant::now())
            .min(max_wait)
            .max(Duration::from_millis(1));

        link.socket.set_read_timeout(Some(wait))?;

        if let Some(input) = read_socket_input(&link.socket, &mut link.buf)? {
            if link.rtc.accepts(&input) {
                link.rtc.handle_input(input)?;
            } else {
                debug!("Connection does not accept UDP input");
            }
        }

        // Drive time forward.
        link.rtc.handle_input(Input::Timeout(Instant::now()))?;
        Ok(())
    }

    fn check_connect_deadline(&self) -> Result<(), BrokerError> {
        if self.state != BrokerState::Connecting {
            return Ok(());
        }
        match self.started_at {
            Some(t) if t.elapsed() > self.config.connect_timeout => {
                Err(BrokerError::Timeout(self.config.connect_timeout))
            }
            _ => Ok(()),
        }
    }

    /// Poll all output until `str0m` asks to be woken at a later instant.
    /// Datagrams go out on the socket, events are handled in place.
    fn poll_until_timeout(&mut self) -> Result<Instant, BrokerError> {
        loop {
            let Some(link) = self.link.as_mut() else {
                return Ok(Instant::now());
            };

            if !link.rtc.is_alive() {
                return Err(BrokerError::IceDisconnected);
            }

            match link.rtc.poll_output()? {
                Output::Timeout(t) => return Ok(t),
                Output::Transmit(transmit) => {
                    link.socket
                        .send_to(&transmit.contents, transmit.destination)?;
                }
                Output::Event(event) => self.handle_event(event)?,
            }
        }
    }

    pub(super) fn handle_event(&mut self, event: Event) -> Result<(), BrokerError> {
        match event {
            Event::Connected => {
                info!("✅ Peer connection established");
                self.state = BrokerState::Connected;
            }
            Event::IceConnectionStateChange(state) => {
                info!("🔌 ICE Connection State: {:?}", state);
                if state == IceConnectionState::Disconnected {
                    return Err(BrokerError::IceDisconnected);
                }
            }
            Event::MediaAdded(added) => {
                if matches!(added.direction, Direction::SendOnly | Direction::SendRecv) {
                    self.bind_local_track(added.kind, added.mid);
                }
                if matches!(added.direction, Direction::RecvOnly | Direction::SendRecv) {
                    self.add_remote_track(added.kind, added.mid);
                }
            }
            Event::MediaData(data) => self.handle_media_data_in(data),
            other => debug!("Event (other): {:?}", other),
        }
        Ok(())
    }

    fn handle_media_data_in(&mut self, data: MediaData) {
        if self.note_remote_frame(data.mid, data.contiguous, Instant::now()) {
            self.request_keyframe(data.mid, data.rid);
        }
    }

    /// Counts a frame received on `mid`. Returns whether a keyframe should be
    /// requested: video after a gap, at most once per keyframe interval.
    pub(super) fn note_remote_frame(&mut self, mid: Mid, contiguous: bool, now: Instant) -> bool {
        let interval = self.config.keyframe_interval;

        let Some(track) = self
            .remote_streams
            .iter_mut()
            .find_map(|s| s.track_mut(mid))
        else {
            debug!("Media data for unknown mid {:?}", mid);
            return false;
        };

        track.record_frame(now);

        if contiguous || track.kind() != MediaKind::Video {
            return false;
        }

        track.try_keyframe_request(now, interval)
    }

    fn request_keyframe(&mut self, mid: Mid, rid: Option<str0m::media::Rid>) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let Some(mut writer) = link.rtc.writer(mid) else {
            return;
        };
        if let Err(e) = writer.request_keyframe(rid, KeyframeRequestKind::Fir) {
            // This can fail if the rid doesn't match any media.
            info!("request_keyframe failed: {:?}", e);
        }
    }
}

/// Reads one datagram if it arrives before the socket's read timeout.
fn read_socket_input<'a>(
    socket: &UdpSocket,
    buf: &'a mut Vec<u8>,
) -> Result<Option<Input<'a>>, BrokerError> {
    // Scale up buffer to receive an entire UDP packet.
    buf.resize(2000, 0);

    match socket.recv_from(buf) {
        Ok((n, source)) => {
            buf.truncate(n);

            // Parse data to a DatagramRecv, which help preparse network data to
            // figure out the multiplexing of all protocols on one UDP port.
            let Ok(contents) = buf.as_slice().try_into() else {
                return Ok(None);
            };

            Ok(Some(Input::Receive(
                Instant::now(),
                Receive {
                    proto: Protocol::Udp,
                    source,
                    destination: socket.local_addr()?,
                    contents,
                },
            )))
        }

        Err(e) => match e.kind() {
            // Expected error for set_read_timeout(). One for windows, one for the rest.
            ErrorKind::WouldBlock | ErrorKind::TimedOut => Ok(None),
            _ => Err(e.into()),
        },
    }
}
