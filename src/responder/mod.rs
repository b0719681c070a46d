//! Pi-side command dispatch.
//!
//! A [`Responder`] owns the peripherals and serves one session at a time:
//! it waits for a command frame, runs that command's script against the
//! camera or the ADC/DAC board, and goes back to waiting.

mod longrun;
mod server;
mod trigger;

use std::fs;
use std::net::TcpStream;
use std::path::PathBuf;

use tracing::{debug, error, info, warn};

pub use server::ResponderServer;
pub use trigger::{TriggerPipeline, trigger_filename};

use crate::cancel::CancelToken;
use crate::config::{AppConfig, Bounds, LimitsConfig};
use crate::error::{AppError, Result};
use crate::hardware::{AdcDac, Camera, SettingChange};
use crate::link::Connection;
use crate::negotiation::{FileKind, ParameterKind, offer_filename, offer_integer};
use crate::protocol::{CommandCode, FrameChannel, Resolution};
use crate::transfer::FileTransfer;

/// ADC and DAC channel numbers.
pub const CHANNEL_BOUNDS: Bounds = Bounds::new(1, 2);

/// Trigger modes: 1 still port, 2 video port.
pub const TRIGGER_MODE_BOUNDS: Bounds = Bounds::new(1, 2);

/// Responder settings taken from the config file.
#[derive(Debug, Clone)]
pub struct ResponderSettings {
    pub limits: LimitsConfig,
    pub media_dir: PathBuf,
    pub image_filename: String,
    pub video_filename: String,
    pub trigger_filename: String,
    pub pipeline_depth: usize,
    /// Listen address for the frame-difference data transport.
    pub stream_addr: String,
}

impl ResponderSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            limits: config.limits.clone(),
            media_dir: config.responder.media_dir.clone(),
            image_filename: config.responder.image_filename.clone(),
            video_filename: config.responder.video_filename.clone(),
            trigger_filename: config.responder.trigger_filename.clone(),
            pipeline_depth: config.responder.pipeline_depth,
            stream_addr: format!("{}:{}", config.responder.bind_address, config.network.stream_port),
        }
    }
}

/// Where the session is in its command cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    AwaitingCommand,
    Dispatching(CommandCode),
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Controller sent `Q`.
    Quit,
    /// Controller closed the stream.
    Disconnected,
    /// Network playback ended; the command always closes the stream.
    StreamClosed,
}

/// One adjustable camera property.
struct PropertyOffer {
    bounds: Bounds,
    current: i64,
    change: fn(i64) -> SettingChange,
    confirmation: &'static str,
}

impl PropertyOffer {
    fn new(bounds: Bounds, current: i64, change: fn(i64) -> SettingChange, confirmation: &'static str) -> Self {
        Self {
            bounds,
            current,
            change,
            confirmation,
        }
    }
}

/// Whether the command loop goes on after a script.
enum Flow {
    Continue,
    End(SessionEnd),
}

/// State of one accepted connection.
pub(crate) struct Session {
    connection: Connection,
    state: DispatchState,
    /// Token for the long-running operation in progress, if any.
    cancel: CancelToken,
}

impl Session {
    fn new(stream: TcpStream) -> Self {
        Self {
            connection: Connection::new(stream),
            state: DispatchState::Idle,
            cancel: CancelToken::new(),
        }
    }

    fn transition(&mut self, next: DispatchState) {
        debug!(from = ?self.state, to = ?next, "Dispatch state");
        self.state = next;
    }

    fn channel(&mut self) -> Result<&mut FrameChannel<TcpStream>> {
        self.connection.channel()
    }

    fn stream(&self) -> Result<&TcpStream> {
        self.connection
            .stream()
            .ok_or_else(|| AppError::ConnectionFailed("Connection is closed".to_string()))
    }

    /// Fresh token for the next long-running operation.
    fn begin_operation(&mut self) -> CancelToken {
        self.cancel = CancelToken::new();
        self.cancel.clone()
    }
}

pub struct Responder {
    camera: Box<dyn Camera>,
    board: Box<dyn AdcDac>,
    transfer: Box<dyn FileTransfer>,
    settings: ResponderSettings,
    pipeline: TriggerPipeline,
}

impl Responder {
    pub fn new(
        camera: Box<dyn Camera>,
        board: Box<dyn AdcDac>,
        transfer: Box<dyn FileTransfer>,
        settings: ResponderSettings,
    ) -> Self {
        let pipeline = TriggerPipeline::new(settings.pipeline_depth);
        Self {
            camera,
            board,
            transfer,
            settings,
            pipeline,
        }
    }

    /// Serve commands on `stream` until the session ends.
    pub fn serve(&mut self, stream: TcpStream) -> Result<SessionEnd> {
        let mut session = Session::new(stream);

        loop {
            session.transition(DispatchState::AwaitingCommand);
            let Some(frame) = session.channel()?.recv()? else {
                info!("Controller closed the connection");
                return Ok(SessionEnd::Disconnected);
            };

            let text = String::from_utf8_lossy(&frame);
            let code = match CommandCode::from_frame(&text) {
                Some(code) if !code.is_local() => code,
                _ => {
                    warn!("Ignoring unknown command {text:?}");
                    continue;
                }
            };

            session.transition(DispatchState::Dispatching(code));
            let flow = self.dispatch(&mut session, code)?;
            session.transition(DispatchState::Idle);

            if let Flow::End(end) = flow {
                return Ok(end);
            }
        }
    }

    /// Return the peripherals to a known state after a failed session.
    pub fn reset_devices(&mut self) {
        if let Err(e) = self.camera.reset() {
            error!("Camera reset failed: {e}");
        }
        if let Err(e) = self.board.reset() {
            error!("ADC/DAC reset failed: {e}");
        }
        self.pipeline.clear();
    }

    fn dispatch(&mut self, session: &mut Session, code: CommandCode) -> Result<Flow> {
        info!("Command {code}: {}", code.description());
        match code {
            CommandCode::Brightness
            | CommandCode::Contrast
            | CommandCode::Framerate
            | CommandCode::Gain
            | CommandCode::Sharpness
            | CommandCode::Saturation
            | CommandCode::Exposure => self.set_property(session, code),
            CommandCode::Resolution => self.set_resolution(session),
            CommandCode::Settings => self.send_stats(session),
            CommandCode::Image => self.capture_image(session),
            CommandCode::AdcRead => self.read_adc(session),
            CommandCode::DacWrite => self.write_dac(session),
            CommandCode::NetworkStream => self.network_stream(session),
            CommandCode::DiffStream => self.diff_stream(session),
            CommandCode::Video => self.record_video(session),
            CommandCode::Trigger => self.trigger_capture(session),
            CommandCode::Quit => {
                info!("Controller quit");
                Ok(Flow::End(SessionEnd::Quit))
            }
            CommandCode::Help => Ok(Flow::Continue),
        }
    }

    /// Range, live value, change and confirmation for a single property.
    fn property(&self, code: CommandCode) -> Result<PropertyOffer> {
        let limits = &self.settings.limits;
        let stats = self.camera.stats();
        let offer = PropertyOffer::new;

        Ok(match code {
            CommandCode::Brightness => offer(limits.brightness, stats.brightness, SettingChange::Brightness, "Brightness changed"),
            CommandCode::Contrast => offer(limits.contrast, stats.contrast, SettingChange::Contrast, "Contrast changed"),
            CommandCode::Framerate => offer(
                limits.framerate,
                stats.framerate.to_f64().round() as i64,
                SettingChange::Framerate,
                "Framerate changed",
            ),
            CommandCode::Gain => offer(limits.gain, stats.iso, SettingChange::Gain, "Gain changed"),
            CommandCode::Sharpness => offer(limits.sharpness, stats.sharpness, SettingChange::Sharpness, "Sharpness changed"),
            CommandCode::Saturation => offer(limits.saturation, stats.saturation, SettingChange::Saturation, "Saturation changed"),
            CommandCode::Exposure => offer(limits.exposure, stats.exposure_time, SettingChange::Exposure, "Exposure time changed"),
            other => return Err(AppError::protocol(format!("{other} is not a camera property"))),
        })
    }

    fn set_property(&mut self, session: &mut Session, code: CommandCode) -> Result<Flow> {
        let offer = self.property(code)?;
        let camera = &mut self.camera;

        offer_integer(session.channel()?, &offer.bounds.descriptor(offer.current), ParameterKind::Integer, |value| {
            camera.apply((offer.change)(value))?;
            Ok(offer.confirmation.to_string())
        })?;
        Ok(Flow::Continue)
    }

    fn set_resolution(&mut self, session: &mut Session) -> Result<Flow> {
        let current = self.camera.stats().resolution;
        let limits = &self.settings.limits;
        let channel = session.channel()?;

        let Some(width) = offer_integer(channel, &limits.width.descriptor(current.width as i64), ParameterKind::Integer, |_| {
            Ok("Width set".to_string())
        })?
        else {
            return Ok(Flow::Continue);
        };

        let camera = &mut self.camera;
        offer_integer(channel, &limits.height.descriptor(current.height as i64), ParameterKind::Integer, |height| {
            camera.apply(SettingChange::Resolution(Resolution::new(width as u32, height as u32)))?;
            Ok("Resolution changed".to_string())
        })?;
        Ok(Flow::Continue)
    }

    fn send_stats(&mut self, session: &mut Session) -> Result<Flow> {
        self.write_stats(session.channel()?)?;
        Ok(Flow::Continue)
    }

    fn write_stats(&self, channel: &mut FrameChannel<TcpStream>) -> Result<()> {
        for frame in self.camera.stats().to_frames() {
            channel.send_text(&frame)?;
        }
        Ok(())
    }

    fn capture_image(&mut self, session: &mut Session) -> Result<Flow> {
        let media_dir = self.media_dir()?;
        let camera = &mut self.camera;
        let channel = session.channel()?;

        let captured = offer_filename(channel, &self.settings.image_filename, FileKind::Image, |name| {
            camera.capture_image(&media_dir.join(name))?;
            Ok("Image captured".to_string())
        })?;
        let Some(name) = captured else {
            return Ok(Flow::Continue);
        };

        self.write_stats(channel)?;
        self.send_file(&media_dir.join(name));
        Ok(Flow::Continue)
    }

    fn read_adc(&mut self, session: &mut Session) -> Result<Flow> {
        let channel = session.channel()?;
        let Some(number) = offer_integer(channel, &CHANNEL_BOUNDS.descriptor(1), ParameterKind::Integer, |n| {
            Ok(format!("Channel {n} selected"))
        })?
        else {
            return Ok(Flow::Continue);
        };

        let volts = self.board.read_voltage(number as u8)?;
        debug!("ADC channel {number}: {volts} V");
        channel.send_text(&format!("{volts:.4}"))?;
        Ok(Flow::Continue)
    }

    fn write_dac(&mut self, session: &mut Session) -> Result<Flow> {
        let limits = &self.settings.limits;
        let channel = session.channel()?;
        let Some(number) = offer_integer(channel, &CHANNEL_BOUNDS.descriptor(1), ParameterKind::Integer, |n| {
            Ok(format!("Channel {n} selected"))
        })?
        else {
            return Ok(Flow::Continue);
        };

        let board = &mut self.board;
        let descriptor = limits.dac_millivolts.descriptor(limits.dac_millivolts.min);
        offer_integer(channel, &descriptor, ParameterKind::Integer, |millivolts| {
            board.write_voltage(number as u8, millivolts as u32)?;
            Ok("DAC voltage changed".to_string())
        })?;
        Ok(Flow::Continue)
    }

    /// Media directory, created on first use.
    fn media_dir(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.settings.media_dir)?;
        Ok(self.settings.media_dir.clone())
    }

    /// Hand a finished file to the copy tool. Failures stay on this side.
    fn send_file(&self, path: &std::path::Path) {
        if let Err(e) = self.transfer.send(path) {
            error!("Transfer of {} failed: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests;
