//! Open-ended responder scripts: playback stream, frame-difference stream,
//! recording and trigger capture.
//!
//! Each operation runs until its span runs out or the session token trips.
//! The token is tripped by a [`StopWatcher`] that consumes the controller's
//! single `"Stop"` frame, or the close of the command stream.

use std::net::{Shutdown, TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{Flow, Responder, Session, SessionEnd, TRIGGER_MODE_BOUNDS, trigger_filename};
use crate::cancel::{StopWatcher, WatchOutcome};
use crate::error::{AppError, Result};
use crate::hardware::TriggerMode;
use crate::negotiation::{FileKind, ParameterKind, REJECTED_PREFIX, offer_filename, offer_integer};
use crate::protocol::{Span, TRIGGER_QUIT_TOKEN, TRIGGER_TOKEN, write_frame};

/// How long the controller has to open the data transport.
const DATA_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

impl Responder {
    fn offer_duration(&self, session: &mut Session, confirmation: &str) -> Result<Option<Span>> {
        let descriptor = self.settings.limits.duration_descriptor();
        let secs = offer_integer(session.channel()?, &descriptor, ParameterKind::Duration, |_| {
            Ok(confirmation.to_string())
        })?;
        Ok(secs.map(Span::from_secs))
    }

    /// `N`: raw H.264 on the command stream, then the connection is torn down.
    pub(super) fn network_stream(&mut self, session: &mut Session) -> Result<Flow> {
        let Some(span) = self.offer_duration(session, "Streaming started")? else {
            return Ok(Flow::Continue);
        };

        let cancel = session.begin_operation();
        let watcher = StopWatcher::spawn(session.stream()?, cancel.clone())?;
        let mut writer = session.stream()?.try_clone()?;

        info!(?span, "Network stream started");
        let result = self.camera.stream_video(&mut writer, span, &cancel);

        session.connection.close();
        let outcome = watcher.join();
        info!(?outcome, "Network stream finished");

        match result {
            // The controller going away mid-stream only ends the stream
            Err(AppError::Io(e)) => debug!("Stream write ended: {e}"),
            Err(e) => return Err(e),
            Ok(()) => {}
        }
        Ok(Flow::End(SessionEnd::StreamClosed))
    }

    /// `O`: luma frames on a second transport until stopped.
    pub(super) fn diff_stream(&mut self, session: &mut Session) -> Result<Flow> {
        let stream_addr = &self.settings.stream_addr;
        let mut listener = None;
        let secs = offer_integer(
            session.channel()?,
            &self.settings.limits.duration_descriptor(),
            ParameterKind::Duration,
            |_| {
                // Listening before the confirmation lets the controller connect at once
                match TcpListener::bind(stream_addr) {
                    Ok(bound) => {
                        listener = Some(bound);
                        Ok("Processing started".to_string())
                    }
                    Err(e) => {
                        error!("Cannot bind data transport {stream_addr}: {e}");
                        Ok(format!("{REJECTED_PREFIX}Cannot open data transport {stream_addr}: {e}"))
                    }
                }
            },
        )?;
        let (Some(secs), Some(listener)) = (secs, listener) else {
            return Ok(Flow::Continue);
        };
        let span = Span::from_secs(secs);

        let cancel = session.begin_operation();
        let watcher = StopWatcher::spawn(session.stream()?, cancel.clone())?;

        let streamed = match accept_within(listener, DATA_ACCEPT_TIMEOUT) {
            Ok(mut data) => {
                let resolution = self.camera.stats().resolution;
                info!(%resolution, ?span, "Frame stream started");
                let result = write_frame(&mut data, resolution.to_string().as_bytes()).and_then(|()| {
                    self.camera
                        .stream_frames(&mut |plane| write_frame(&mut data, plane), span, &cancel)
                });
                let _ = data.shutdown(Shutdown::Both);
                result
            }
            Err(e) => Err(e),
        };

        match streamed {
            Ok(()) => {}
            Err(AppError::Io(e)) => debug!("Frame stream ended: {e}"),
            Err(AppError::ConnectionFailed(e)) => warn!("No data connection: {e}"),
            Err(e) => return Err(e),
        }

        // Wait for the controller's Stop so the next frame is a command again
        if watcher.join() == WatchOutcome::Closed {
            return Ok(Flow::End(SessionEnd::Disconnected));
        }
        session.channel()?.send_text("Processing finished")?;
        info!("Frame stream finished");
        Ok(Flow::Continue)
    }

    /// `V`: record until the span runs out or the controller stops it.
    pub(super) fn record_video(&mut self, session: &mut Session) -> Result<Flow> {
        let Some(span) = self.offer_duration(session, "Duration set")? else {
            return Ok(Flow::Continue);
        };

        let media_dir = self.media_dir()?;
        let Some(name) = offer_filename(session.channel()?, &self.settings.video_filename, FileKind::Video, |_| {
            Ok("Recording started".to_string())
        })?
        else {
            return Ok(Flow::Continue);
        };
        let path = media_dir.join(&name);

        let cancel = session.begin_operation();
        let watcher = StopWatcher::spawn(session.stream()?, cancel.clone())?;

        info!(?span, "Recording {}", path.display());
        self.camera.record_video(&path, span, &cancel)?;

        if watcher.join() == WatchOutcome::Closed {
            return Ok(Flow::End(SessionEnd::Disconnected));
        }

        let channel = session.channel()?;
        channel.send_text("Recording finished")?;
        self.write_stats(channel)?;
        self.send_file(&path);
        Ok(Flow::Continue)
    }

    /// `T`: pipelined captures driven by `"T"` tokens, drained on `"Q"`.
    pub(super) fn trigger_capture(&mut self, session: &mut Session) -> Result<Flow> {
        let camera = &mut self.camera;
        let mode = offer_integer(
            session.channel()?,
            &TRIGGER_MODE_BOUNDS.descriptor(TriggerMode::Still.value()),
            ParameterKind::Integer,
            |value| {
                camera.start_trigger(TriggerMode::from_value(value)?)?;
                Ok(format!("Trigger mode {value}"))
            },
        )?;
        if mode.is_none() {
            return Ok(Flow::Continue);
        }

        let result = self.run_trigger_session(session);
        self.camera.stop_trigger();
        result
    }

    fn run_trigger_session(&mut self, session: &mut Session) -> Result<Flow> {
        let Some(base) = offer_filename(session.channel()?, &self.settings.trigger_filename, FileKind::Image, |_| {
            Ok("Trigger capture ready".to_string())
        })?
        else {
            return Ok(Flow::Continue);
        };

        self.pipeline.clear();
        let mut index = 0;
        loop {
            let Some(token) = session.channel()?.recv_text()? else {
                info!("Controller closed the connection during trigger capture");
                return Ok(Flow::End(SessionEnd::Disconnected));
            };

            match token.as_str() {
                TRIGGER_TOKEN => {
                    index += 1;
                    let image = self.camera.capture_queued()?;
                    match self.pipeline.push(trigger_filename(&base, index), image) {
                        Some((name, image)) => self.deliver(session, &name, &image)?,
                        None => {
                            debug!("Trigger {index}: pipeline filling");
                            session.channel()?.send_text("")?;
                        }
                    }
                }
                TRIGGER_QUIT_TOKEN => {
                    debug!("Flushing {} queued names", self.pipeline.pending());
                    let camera = &mut self.camera;
                    let remaining = self.pipeline.flush(|| camera.capture_queued())?;
                    session.channel()?.send_text(&remaining.len().to_string())?;
                    for (name, image) in &remaining {
                        self.deliver(session, name, image)?;
                    }
                    session.channel()?.send_text("Trigger capture finished")?;
                    info!("Trigger capture finished after {index} triggers");
                    return Ok(Flow::Continue);
                }
                other => warn!("Ignoring {other:?} during trigger capture"),
            }
        }
    }

    /// Save a trigger image, name it to the controller and transfer it.
    fn deliver(&self, session: &mut Session, name: &str, image: &[u8]) -> Result<()> {
        let path = self.media_dir()?.join(name);
        std::fs::write(&path, image)?;
        session.channel()?.send_text(name)?;
        self.send_file(&path);
        Ok(())
    }
}

/// Accept one connection or give up after `timeout`.
fn accept_within(listener: TcpListener, timeout: Duration) -> Result<TcpStream> {
    listener.set_nonblocking(true)?;
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    let (stream, peer) = rt.block_on(async move {
        let listener = tokio::net::TcpListener::from_std(listener)?;
        tokio::time::timeout(timeout, listener.accept())
            .await
            .map_err(|_| AppError::ConnectionFailed("Controller never opened the data transport".to_string()))?
            .map_err(AppError::from)
    })?;

    debug!(%peer, "Data transport connected");
    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
