//! Controller side of the open-ended commands.
//!
//! Each one arms the front end's cancel token for its duration. `O` and `V`
//! always finish with exactly one `"Stop"` frame; `N` sends one only when
//! the user stops it early, since the responder ends the stream itself and
//! tears the connection down.

use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{
    CommandOutcome, Controller, DURATION_LABEL, InputOutputChannel, fetch, open, receive_stats, report,
};
use crate::error::{AppError, Result};
use crate::link::connect;
use crate::negotiation::{FileKind, ParameterKind, negotiate_filename, negotiate_integer};
use crate::protocol::{Resolution, STOP_TOKEN, STREAM_CHUNK, Span, TriggerEvent, read_frame};
use crate::transfer::PlayerSink;

const POLL: Duration = Duration::from_millis(20);

/// What the data transport reader hands back during `O`.
enum FrameEvent {
    Resolution(Resolution),
    Difference { index: u64, mean: f64 },
}

impl Controller {
    /// `N`: pipe the raw stream into the player, then reconnect.
    pub(super) fn network_stream(&mut self, io: &mut dyn InputOutputChannel) -> Result<CommandOutcome> {
        let connection = open(&mut self.connection)?;
        let outcome = negotiate_integer(connection.channel()?, io, DURATION_LABEL, ParameterKind::Duration)?;
        if report(io, outcome).is_none() {
            return Ok(CommandOutcome::Completed);
        }

        let reader = connection
            .stream()
            .ok_or_else(|| AppError::ConnectionFailed("Connection is closed".to_string()))?
            .try_clone()?;
        let sink = match self.player.open() {
            Ok(sink) => sink,
            Err(e) => {
                // Raw video is already flowing; the stream is no longer framed
                connection.close();
                return Err(e);
            }
        };

        let cancel = io.cancel_token();
        let _armed = cancel.arm();
        let pump = thread::spawn(move || pump_stream(reader, sink));

        let mut stopped = false;
        while !pump.is_finished() {
            if !stopped && cancel.is_cancelled() {
                // The responder may have closed the stream already
                if let Err(e) = connection.channel()?.send_text(STOP_TOKEN) {
                    debug!("Stop not delivered: {e}");
                }
                stopped = true;
            }
            thread::sleep(POLL);
        }
        let received = pump.join().unwrap_or(0);
        io.report_status(&format!("Stream ended after {received} bytes"));

        self.disconnect();
        self.connect()?;
        io.report_status("Reconnected");
        Ok(CommandOutcome::Reconnected)
    }

    /// `O`: read luma frames on the data transport and report how much
    /// consecutive frames differ.
    pub(super) fn diff_stream(&mut self, io: &mut dyn InputOutputChannel) -> Result<CommandOutcome> {
        let connection = open(&mut self.connection)?;
        let peer = connection
            .peer_ip()
            .ok_or_else(|| AppError::ConnectionFailed("Peer address unknown".to_string()))?;
        let channel = connection.channel()?;

        let outcome = negotiate_integer(channel, io, DURATION_LABEL, ParameterKind::Duration)?;
        let Some(secs) = report(io, outcome) else {
            return Ok(CommandOutcome::Completed);
        };
        let span = Span::from_secs(secs);

        let cancel = io.cancel_token();
        let _armed = cancel.arm();

        let data_addr = SocketAddr::new(peer, self.settings.stream_port).to_string();
        let (events, received) = mpsc::channel();
        let reader = match connect(&data_addr, self.settings.connect_timeout) {
            Ok(data) => Some(thread::spawn(move || read_frames(data, events))),
            Err(e) => {
                io.report_error(&e.to_string());
                None
            }
        };

        let started = Instant::now();
        if reader.is_some() {
            while !cancel.is_cancelled() && !span.expired(started) {
                match received.recv_timeout(POLL) {
                    Ok(FrameEvent::Resolution(resolution)) => {
                        io.report_status(&format!("Receiving {resolution} frames"));
                    }
                    Ok(FrameEvent::Difference { index, mean }) => {
                        io.report_status(&format!("Frame {index}: mean difference {mean:.2}"));
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        channel.send_text(STOP_TOKEN)?;
        if let Some(reader) = reader {
            let frames = reader.join().unwrap_or(0);
            info!("Frame stream delivered {frames} frames");
        }

        let finished = channel.confirmation("processing")?.into_result()?;
        io.report_status(&finished);
        Ok(CommandOutcome::Completed)
    }

    /// `V`: record on the responder, then fetch the file.
    pub(super) fn record_video(&mut self, io: &mut dyn InputOutputChannel) -> Result<CommandOutcome> {
        let connection = open(&mut self.connection)?;
        let peer = connection.peer_ip();
        let responder = connection
            .stream()
            .ok_or_else(|| AppError::ConnectionFailed("Connection is closed".to_string()))?
            .try_clone()?;
        let channel = connection.channel()?;

        let outcome = negotiate_integer(channel, io, DURATION_LABEL, ParameterKind::Duration)?;
        let Some(secs) = report(io, outcome) else {
            return Ok(CommandOutcome::Completed);
        };
        let outcome = negotiate_filename(channel, io, "Video filename", FileKind::Video)?;
        let Some(name) = report(io, outcome) else {
            return Ok(CommandOutcome::Completed);
        };

        let span = Span::from_secs(secs);
        let cancel = io.cancel_token();
        // The responder stays silent until Stop unless the recording fails
        let watcher = thread::spawn(move || wait_for_close(&responder));
        {
            let _armed = cancel.arm();
            let started = Instant::now();
            while !cancel.is_cancelled() && !span.expired(started) && !watcher.is_finished() {
                thread::sleep(POLL);
            }
        }
        if watcher.is_finished() && watcher.join().unwrap_or(true) {
            return Err(AppError::end_of_stream("recording"));
        }
        channel.send_text(STOP_TOKEN)?;

        let finished = channel.confirmation("recording")?.into_result()?;
        io.report_status(&finished);
        let stats = receive_stats(channel)?;
        io.report_stats(&stats);

        fetch(self.transfer.as_ref(), &self.settings.download_dir, peer, &name, io);
        Ok(CommandOutcome::Completed)
    }

    /// `T`: forward triggers until the user quits, fetching every image.
    pub(super) fn trigger_capture(&mut self, io: &mut dyn InputOutputChannel) -> Result<CommandOutcome> {
        let connection = open(&mut self.connection)?;
        let peer = connection.peer_ip();
        let channel = connection.channel()?;

        let outcome = negotiate_integer(channel, io, "Trigger mode (1 still, 2 video)", ParameterKind::Integer)?;
        if report(io, outcome).is_none() {
            return Ok(CommandOutcome::Completed);
        }
        let outcome = negotiate_filename(channel, io, "Base filename", FileKind::Image)?;
        if report(io, outcome).is_none() {
            return Ok(CommandOutcome::Completed);
        }

        let cancel = io.cancel_token();
        let _armed = cancel.arm();
        let mut triggers = 0;
        loop {
            let event = if cancel.is_cancelled() {
                TriggerEvent::Quit
            } else {
                io.next_trigger()?
            };
            channel.send_text(event.token())?;

            match event {
                TriggerEvent::Trigger => {
                    triggers += 1;
                    let name = channel.expect_text("trigger image name")?;
                    if name.is_empty() {
                        io.report_status(&format!("Trigger {triggers}: capture queued"));
                    } else {
                        io.report_status(&format!("Trigger {triggers}: {name}"));
                        fetch(self.transfer.as_ref(), &self.settings.download_dir, peer, &name, io);
                    }
                }
                TriggerEvent::Quit => {
                    let count = channel.expect_text("remaining image count")?;
                    let count: usize = count
                        .parse()
                        .map_err(|_| AppError::protocol(format!("Bad image count {count:?}")))?;
                    for _ in 0..count {
                        let name = channel.expect_text("trigger image name")?;
                        io.report_status(&format!("Flushed {name}"));
                        fetch(self.transfer.as_ref(), &self.settings.download_dir, peer, &name, io);
                    }
                    let finished = channel.confirmation("trigger capture")?.into_result()?;
                    io.report_status(&finished);
                    return Ok(CommandOutcome::Completed);
                }
            }
        }
    }
}

/// Copy the command stream into the player until the responder closes it.
fn pump_stream(mut reader: TcpStream, mut sink: Box<dyn PlayerSink>) -> usize {
    let mut buf = [0u8; STREAM_CHUNK];
    let mut total = 0;
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = sink.write_chunk(&buf[..n]) {
                    warn!("Player stopped accepting data: {e}");
                    break;
                }
                total += n;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                debug!("Stream read ended: {e}");
                break;
            }
        }
    }
    sink.finish();
    total
}

/// Block until the responder sends data or drops the stream; true on drop.
fn wait_for_close(stream: &TcpStream) -> bool {
    let mut byte = [0u8; 1];
    loop {
        match stream.peek(&mut byte) {
            Ok(0) => return true,
            Ok(_) => return false,
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                debug!("Command stream failed: {e}");
                return true;
            }
        }
    }
}

/// Read the resolution frame, then luma planes, until the transport closes.
fn read_frames(mut data: TcpStream, events: Sender<FrameEvent>) -> u64 {
    let resolution = match read_frame(&mut data) {
        Ok(Some(frame)) => match Resolution::parse(&String::from_utf8_lossy(&frame)) {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!("Bad resolution frame: {e}");
                return 0;
            }
        },
        Ok(None) => return 0,
        Err(e) => {
            debug!("Data transport ended: {e}");
            return 0;
        }
    };
    let _ = events.send(FrameEvent::Resolution(resolution));

    let mut previous: Option<Vec<u8>> = None;
    let mut index = 0;
    loop {
        let plane = match read_frame(&mut data) {
            Ok(Some(plane)) => plane,
            Ok(None) => break,
            Err(e) => {
                debug!("Data transport ended: {e}");
                break;
            }
        };
        index += 1;
        if plane.len() != resolution.pixels() {
            warn!("Frame {index} has {} bytes, expected {}", plane.len(), resolution.pixels());
            continue;
        }
        if let Some(previous) = &previous {
            let mean = mean_abs_difference(previous, &plane);
            if events.send(FrameEvent::Difference { index, mean }).is_err() {
                break;
            }
        }
        previous = Some(plane);
    }
    index
}

/// Mean absolute per-pixel difference of two equally sized planes.
pub fn mean_abs_difference(a: &[u8], b: &[u8]) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let total: u64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| u64::from(x.abs_diff(y)))
        .sum();
    total as f64 / len as f64
}
