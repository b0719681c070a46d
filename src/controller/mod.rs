//! Host-side command runner.
//!
//! The [`Controller`] keeps at most one command connection open, sends a
//! command code and walks that command's script, asking the user for
//! parameters through an [`InputOutputChannel`].

mod io;
mod longrun;

#[cfg(test)]
mod tests;

use std::fs;
use std::net::{IpAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

#[cfg(test)]
pub(crate) use io::ScriptedChannel;
pub use io::{InputOutputChannel, Palette, TerminalChannel, install_interrupt_handler};
pub use longrun::mean_abs_difference;

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::link::{Connection, Link};
use crate::negotiation::{FileKind, Negotiated, ParameterKind, negotiate_filename, negotiate_integer};
use crate::protocol::{CommandCode, FrameChannel, LOAD_HINT, STATS_FRAMES, StatsReport};
use crate::transfer::{DisabledTransfer, ExternalPlayer, FileTransfer, NetcatTransfer, VideoPlayer};

const DURATION_LABEL: &str = "Duration in seconds";

/// Controller settings taken from the config file.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub download_dir: PathBuf,
    /// Port of the frame-difference data transport.
    pub stream_port: u16,
    pub connect_timeout: Option<Duration>,
}

impl ControllerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            download_dir: config.controller.download_path(),
            stream_port: config.network.stream_port,
            connect_timeout: config.network.connect_timeout(),
        }
    }
}

/// How a command ended, as seen by the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed,
    /// The command tore the connection down and a new one is open.
    Reconnected,
    Quit,
    Failed(String),
}

pub struct Controller {
    link: Link,
    connection: Option<Connection>,
    transfer: Box<dyn FileTransfer>,
    player: Box<dyn VideoPlayer>,
    settings: ControllerSettings,
}

impl Controller {
    pub fn new(
        link: Link,
        transfer: Box<dyn FileTransfer>,
        player: Box<dyn VideoPlayer>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            link,
            connection: None,
            transfer,
            player,
            settings,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let link = Link::new(config.controller_endpoint())
            .with_connect_timeout(config.network.connect_timeout())
            .with_read_timeout(config.network.read_timeout());
        let transfer: Box<dyn FileTransfer> = if config.transfer.enabled {
            Box::new(NetcatTransfer::new(
                config.transfer.program.clone(),
                config.network.transfer_port,
                config.controller.transfer_start_delay(),
            ))
        } else {
            Box::new(DisabledTransfer)
        };
        let player = Box::new(ExternalPlayer::new(config.controller.player_command.clone()));

        Self::new(link, transfer, player, ControllerSettings::from_config(config))
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_open)
    }

    /// Open the command connection unless one is already up.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let stream = self.link.establish()?;
        self.connection = Some(Connection::new(stream));
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
    }

    /// Run one command and report its failure, if any, to the user.
    ///
    /// A failure that leaves the stream out of step closes the connection;
    /// the next command opens a fresh one.
    pub fn run(&mut self, code: CommandCode, io: &mut dyn InputOutputChannel) -> CommandOutcome {
        match self.execute(code, io) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Command {code} failed: {e}");
                io.report_error(&e.to_string());
                if e.breaks_connection() && !matches!(e, AppError::ConnectionFailed(_)) {
                    io.report_error(LOAD_HINT);
                }
                if e.breaks_connection() || matches!(e, AppError::Cancelled) {
                    self.disconnect();
                }
                CommandOutcome::Failed(e.to_string())
            }
        }
    }

    /// Run one command script.
    pub fn execute(&mut self, code: CommandCode, io: &mut dyn InputOutputChannel) -> Result<CommandOutcome> {
        if code == CommandCode::Help {
            for line in help_lines() {
                io.report_status(&line);
            }
            return Ok(CommandOutcome::Completed);
        }

        self.connect()?;
        open_channel(&mut self.connection)?.send_text(&code.as_frame())?;
        info!("Command {code}: {}", code.description());

        match code {
            CommandCode::Brightness
            | CommandCode::Contrast
            | CommandCode::Framerate
            | CommandCode::Gain
            | CommandCode::Sharpness
            | CommandCode::Saturation
            | CommandCode::Exposure => self.set_property(code, io),
            CommandCode::Resolution => self.set_resolution(io),
            CommandCode::Settings => self.show_stats(io),
            CommandCode::Image => self.capture_image(io),
            CommandCode::AdcRead => self.read_adc(io),
            CommandCode::DacWrite => self.write_dac(io),
            CommandCode::NetworkStream => self.network_stream(io),
            CommandCode::DiffStream => self.diff_stream(io),
            CommandCode::Video => self.record_video(io),
            CommandCode::Trigger => self.trigger_capture(io),
            CommandCode::Quit => {
                self.disconnect();
                Ok(CommandOutcome::Quit)
            }
            CommandCode::Help => Ok(CommandOutcome::Completed),
        }
    }

    /// Read command characters from the terminal until `Q` or end of input.
    pub fn run_terminal(&mut self, io: &mut TerminalChannel) -> Result<()> {
        for line in help_lines() {
            io.report_status(&line);
        }

        loop {
            let line = match io.read_command() {
                Ok(line) => line,
                Err(AppError::Cancelled) => break,
                Err(e) => return Err(e),
            };
            let Some(code) = CommandCode::parse(&line) else {
                if !line.trim().is_empty() {
                    io.report_error(&format!("Unknown command {:?}, H for help", line.trim()));
                }
                continue;
            };

            if self.run(code, io) == CommandOutcome::Quit {
                break;
            }
        }
        self.disconnect();
        Ok(())
    }

    fn set_property(&mut self, code: CommandCode, io: &mut dyn InputOutputChannel) -> Result<CommandOutcome> {
        let channel = open_channel(&mut self.connection)?;
        let outcome = negotiate_integer(channel, io, property_label(code), ParameterKind::Integer)?;
        report(io, outcome);
        Ok(CommandOutcome::Completed)
    }

    fn set_resolution(&mut self, io: &mut dyn InputOutputChannel) -> Result<CommandOutcome> {
        let channel = open_channel(&mut self.connection)?;
        let width = negotiate_integer(channel, io, "Width", ParameterKind::Integer)?;
        if report(io, width).is_none() {
            return Ok(CommandOutcome::Completed);
        }
        let height = negotiate_integer(channel, io, "Height", ParameterKind::Integer)?;
        report(io, height);
        Ok(CommandOutcome::Completed)
    }

    fn show_stats(&mut self, io: &mut dyn InputOutputChannel) -> Result<CommandOutcome> {
        let stats = receive_stats(open_channel(&mut self.connection)?)?;
        io.report_stats(&stats);
        Ok(CommandOutcome::Completed)
    }

    fn capture_image(&mut self, io: &mut dyn InputOutputChannel) -> Result<CommandOutcome> {
        let connection = open(&mut self.connection)?;
        let peer = connection.peer_ip();
        let channel = connection.channel()?;

        let outcome = negotiate_filename(channel, io, "Image filename", FileKind::Image)?;
        let Some(name) = report(io, outcome) else {
            return Ok(CommandOutcome::Completed);
        };
        let stats = receive_stats(channel)?;
        io.report_stats(&stats);

        fetch(self.transfer.as_ref(), &self.settings.download_dir, peer, &name, io);
        Ok(CommandOutcome::Completed)
    }

    fn read_adc(&mut self, io: &mut dyn InputOutputChannel) -> Result<CommandOutcome> {
        let channel = open_channel(&mut self.connection)?;
        let outcome = negotiate_integer(channel, io, "ADC channel", ParameterKind::Integer)?;
        let Some(number) = report(io, outcome) else {
            return Ok(CommandOutcome::Completed);
        };

        let volts = channel.expect_text("ADC voltage")?;
        io.report_status(&format!("ADC channel {number}: {volts} V"));
        Ok(CommandOutcome::Completed)
    }

    fn write_dac(&mut self, io: &mut dyn InputOutputChannel) -> Result<CommandOutcome> {
        let channel = open_channel(&mut self.connection)?;
        let outcome = negotiate_integer(channel, io, "DAC channel", ParameterKind::Integer)?;
        if report(io, outcome).is_none() {
            return Ok(CommandOutcome::Completed);
        }
        let outcome = negotiate_integer(channel, io, "DAC voltage in mV", ParameterKind::Integer)?;
        report(io, outcome);
        Ok(CommandOutcome::Completed)
    }
}

/// One line per command, for `H`.
pub fn help_lines() -> Vec<String> {
    let mut lines = vec!["Commands:".to_string()];
    lines.extend(
        CommandCode::ALL
            .iter()
            .map(|code| format!("  {code}  {}", code.description())),
    );
    lines
}

fn property_label(code: CommandCode) -> &'static str {
    match code {
        CommandCode::Brightness => "Brightness",
        CommandCode::Contrast => "Contrast",
        CommandCode::Framerate => "Framerate",
        CommandCode::Gain => "Gain (ISO)",
        CommandCode::Sharpness => "Sharpness",
        CommandCode::Saturation => "Saturation",
        CommandCode::Exposure => "Exposure time in us",
        _ => "Value",
    }
}

fn open(connection: &mut Option<Connection>) -> Result<&mut Connection> {
    connection
        .as_mut()
        .ok_or_else(|| AppError::ConnectionFailed("Not connected".to_string()))
}

fn open_channel(connection: &mut Option<Connection>) -> Result<&mut FrameChannel<TcpStream>> {
    open(connection)?.channel()
}

/// Show the responder's verdict; the accepted value, if any.
fn report<T>(io: &mut dyn InputOutputChannel, outcome: Negotiated<T>) -> Option<T> {
    match outcome {
        Negotiated::Accepted { value, confirmation } => {
            io.report_status(&confirmation);
            Some(value)
        }
        Negotiated::Rejected(reason) => {
            io.report_error(&format!("Rejected by responder: {reason}"));
            None
        }
    }
}

fn receive_stats(channel: &mut FrameChannel<TcpStream>) -> Result<StatsReport> {
    let frames = (0..STATS_FRAMES)
        .map(|_| channel.expect_text("camera stats"))
        .collect::<Result<Vec<_>>>()?;
    StatsReport::from_frames(&frames)
}

/// Pull a finished file into the download directory.
///
/// A failed copy is reported but leaves the command stream usable.
fn fetch(
    transfer: &dyn FileTransfer,
    download_dir: &Path,
    peer: Option<IpAddr>,
    name: &str,
    io: &mut dyn InputOutputChannel,
) {
    if !transfer.is_enabled() {
        return;
    }
    let Some(peer) = peer else {
        warn!("Peer address unknown, cannot fetch {name}");
        return;
    };

    let destination = download_dir.join(name);
    let result = fs::create_dir_all(download_dir)
        .map_err(AppError::from)
        .and_then(|()| transfer.receive(peer, &destination));
    match result {
        Ok(()) => io.report_status(&format!("Saved {}", destination.display())),
        Err(e) => io.report_error(&format!("Transfer of {name} failed: {e}")),
    }
}
