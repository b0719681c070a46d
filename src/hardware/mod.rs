//! Peripheral drivers behind narrow traits.
//!
//! The responder only talks to the camera and the ADC/DAC board through
//! [`Camera`] and [`AdcDac`], so the bench simulator and the Pi's
//! command-line tools are interchangeable.

mod raspicam;
mod simulated;

use std::io::Write;
use std::path::Path;

pub use raspicam::RaspiCamera;
pub use simulated::{SimulatedBoard, SimulatedCamera};

use crate::cancel::CancelToken;
use crate::error::{AppError, Result};
use crate::protocol::{CameraStats, Resolution, Span};

/// A validated change to one camera property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingChange {
    Brightness(i64),
    Contrast(i64),
    Framerate(i64),
    /// ISO; 0 lets the camera choose.
    Gain(i64),
    Sharpness(i64),
    Saturation(i64),
    /// Shutter speed in microseconds; 0 is automatic.
    Exposure(i64),
    Resolution(Resolution),
}

impl SettingChange {
    /// Write the change into a settings snapshot.
    pub fn apply_to(self, stats: &mut CameraStats) {
        match self {
            SettingChange::Brightness(v) => stats.brightness = v,
            SettingChange::Contrast(v) => stats.contrast = v,
            SettingChange::Framerate(v) => stats.framerate = crate::protocol::Rational::whole(v),
            SettingChange::Gain(v) => stats.iso = v,
            SettingChange::Sharpness(v) => stats.sharpness = v,
            SettingChange::Saturation(v) => stats.saturation = v,
            SettingChange::Exposure(v) => stats.exposure_time = v,
            SettingChange::Resolution(r) => stats.resolution = r,
        }
    }
}

/// Which camera port serves trigger captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Still port: full quality, slower.
    Still,
    /// Video port: rapid, lower quality.
    Video,
}

impl TriggerMode {
    pub fn from_value(value: i64) -> Result<Self> {
        match value {
            1 => Ok(TriggerMode::Still),
            2 => Ok(TriggerMode::Video),
            other => Err(AppError::hardware(format!("Unknown trigger mode {other}"))),
        }
    }

    pub fn value(self) -> i64 {
        match self {
            TriggerMode::Still => 1,
            TriggerMode::Video => 2,
        }
    }
}

/// Luma frame consumer used by frame streaming.
pub type FrameSink<'a> = dyn FnMut(&[u8]) -> Result<()> + 'a;

/// Camera module driver.
pub trait Camera: Send {
    /// Current property snapshot.
    fn stats(&self) -> CameraStats;

    fn apply(&mut self, change: SettingChange) -> Result<()>;

    /// Capture one still; the encoding follows the file extension.
    fn capture_image(&mut self, path: &Path) -> Result<()>;

    /// Record H.264 to `path` until the span runs out or `cancel` trips.
    fn record_video(&mut self, path: &Path, span: Span, cancel: &CancelToken) -> Result<()>;

    /// Write raw H.264 to `out` until the span runs out or `cancel` trips.
    fn stream_video(&mut self, out: &mut dyn Write, span: Span, cancel: &CancelToken) -> Result<()>;

    /// Hand each luma plane (`width * height` bytes) to `sink`.
    fn stream_frames(&mut self, sink: &mut FrameSink<'_>, span: Span, cancel: &CancelToken) -> Result<()>;

    /// Prepare the capture queue for a trigger session.
    fn start_trigger(&mut self, mode: TriggerMode) -> Result<()>;

    /// Take the next image out of the capture queue.
    fn capture_queued(&mut self) -> Result<Vec<u8>>;

    fn stop_trigger(&mut self);

    /// Abort anything in flight and restore default settings.
    fn reset(&mut self) -> Result<()>;
}

/// ADC/DAC board driver. Channels are 1 and 2.
pub trait AdcDac: Send {
    /// Single-ended voltage on an ADC channel, in volts.
    fn read_voltage(&mut self, channel: u8) -> Result<f64>;

    /// Set a DAC channel output, in millivolts.
    fn write_voltage(&mut self, channel: u8, millivolts: u32) -> Result<()>;

    fn reset(&mut self) -> Result<()>;
}

fn check_channel(channel: u8) -> Result<usize> {
    match channel {
        1 | 2 => Ok(channel as usize - 1),
        other => Err(AppError::hardware(format!("No channel {other}"))),
    }
}
