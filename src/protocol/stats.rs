//! Camera settings snapshot and the nine-frame stats block.

use super::types::STATS_FRAMES;
use super::value::{Rational, parse_decimal};
use crate::error::{AppError, Result};

/// Sensor resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Parse `"WIDTHxHEIGHT"`.
    pub fn parse(text: &str) -> Result<Self> {
        let (w, h) = text
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| AppError::protocol(format!("Bad resolution {text:?}")))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| AppError::protocol(format!("Bad width in {text:?}")))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| AppError::protocol(format!("Bad height in {text:?}")))?;
        Ok(Self { width, height })
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Live camera properties, owned by the camera collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraStats {
    pub resolution: Resolution,
    pub framerate: Rational,
    pub brightness: i64,
    pub contrast: i64,
    /// ISO requested through the gain command
    pub iso: i64,
    pub analog_gain: Rational,
    pub digital_gain: Rational,
    pub sharpness: i64,
    pub saturation: i64,
    /// Shutter speed in microseconds, 0 = automatic
    pub exposure_time: i64,
}

impl Default for CameraStats {
    fn default() -> Self {
        Self {
            resolution: Resolution::new(1920, 1080),
            framerate: Rational::whole(30),
            brightness: 50,
            contrast: 0,
            iso: 0,
            analog_gain: Rational::whole(1),
            digital_gain: Rational::whole(1),
            sharpness: 0,
            saturation: 0,
            exposure_time: 0,
        }
    }
}

impl CameraStats {
    /// Encode as the nine stats frames, in wire order.
    pub fn to_frames(&self) -> [String; STATS_FRAMES] {
        [
            self.resolution.to_string(),
            self.framerate.to_string(),
            self.brightness.to_string(),
            self.contrast.to_string(),
            self.analog_gain.to_string(),
            self.digital_gain.to_string(),
            self.sharpness.to_string(),
            self.saturation.to_string(),
            self.exposure_time.to_string(),
        ]
    }
}

/// Controller-side view of a received stats block.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    pub resolution: Resolution,
    pub framerate: f64,
    pub brightness: f64,
    pub contrast: f64,
    pub analog_gain: f64,
    pub digital_gain: f64,
    pub sharpness: f64,
    pub saturation: f64,
    pub exposure_time: f64,
}

impl StatsReport {
    /// Decode the nine frames; rationals are divided out.
    pub fn from_frames(frames: &[String]) -> Result<Self> {
        if frames.len() != STATS_FRAMES {
            return Err(AppError::protocol(format!(
                "Stats block has {} frames, expected {STATS_FRAMES}",
                frames.len()
            )));
        }
        Ok(Self {
            resolution: Resolution::parse(&frames[0])?,
            framerate: parse_decimal(&frames[1])?,
            brightness: parse_decimal(&frames[2])?,
            contrast: parse_decimal(&frames[3])?,
            analog_gain: parse_decimal(&frames[4])?,
            digital_gain: parse_decimal(&frames[5])?,
            sharpness: parse_decimal(&frames[6])?,
            saturation: parse_decimal(&frames[7])?,
            exposure_time: parse_decimal(&frames[8])?,
        })
    }

    /// Rescale a [-100, 100] device value to a [0, 100] display percentage.
    pub fn percent(value: f64) -> f64 {
        (value + 100.0) / 2.0
    }

    /// Label/value rows for display.
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Resolution", self.resolution.to_string()),
            ("Framerate", format!("{:.2} fps", self.framerate)),
            ("Brightness", format!("{:.0}%", self.brightness)),
            ("Contrast", format!("{:.0}%", Self::percent(self.contrast))),
            ("Analog gain", format!("{:.3}", self.analog_gain)),
            ("Digital gain", format!("{:.3}", self.digital_gain)),
            ("Sharpness", format!("{:.0}%", Self::percent(self.sharpness))),
            ("Saturation", format!("{:.0}%", Self::percent(self.saturation))),
            ("Exposure time", format!("{:.0} us", self.exposure_time)),
        ]
    }
}
