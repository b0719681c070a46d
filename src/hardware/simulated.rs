//! Deterministic stand-ins for the camera and the ADC/DAC board.
//!
//! Output is synthetic but shaped like the real thing: stills are small PGM
//! images, video is a byte stream starting with H.264 start codes, and luma
//! frames are a moving gradient so consecutive frames differ.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{AdcDac, Camera, FrameSink, SettingChange, TriggerMode, check_channel};
use crate::cancel::CancelToken;
use crate::error::{AppError, Result};
use crate::protocol::{CameraStats, STREAM_CHUNK, Span};

/// Stills are downscaled by this factor to keep files small.
const THUMBNAIL_SCALE: u32 = 16;

/// Gradient shift between consecutive luma frames.
const FRAME_STEP: u8 = 3;

/// Full-scale DAC output with gain 1.
pub const DAC_MAX_MILLIVOLTS: u32 = 2048;

/// ADC reference voltage.
const ADC_REFERENCE_VOLTS: f64 = 3.3;

pub struct SimulatedCamera {
    stats: CameraStats,
    frame_interval: Option<Duration>,
    sequence: u64,
    trigger_mode: Option<TriggerMode>,
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCamera {
    pub fn new() -> Self {
        Self {
            stats: CameraStats::default(),
            frame_interval: None,
            sequence: 0,
            trigger_mode: None,
        }
    }

    /// Start from a specific settings snapshot.
    pub fn with_stats(mut self, stats: CameraStats) -> Self {
        self.stats = stats;
        self
    }

    /// Fixed pause between frames instead of one derived from the framerate.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    fn interval(&self) -> Duration {
        self.frame_interval.unwrap_or_else(|| {
            let fps = self.stats.framerate.to_f64();
            if fps > 0.0 { Duration::from_secs_f64(1.0 / fps) } else { Duration::from_millis(33) }
        })
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// PGM still tagged with its sequence number.
    fn still(&self, sequence: u64) -> Vec<u8> {
        let width = (self.stats.resolution.width / THUMBNAIL_SCALE).max(1);
        let height = (self.stats.resolution.height / THUMBNAIL_SCALE).max(1);
        let level = (self.stats.brightness.clamp(0, 100) * 255 / 100) as u8;

        let mut image = format!("P5\n# frame {sequence}\n{width} {height}\n255\n").into_bytes();
        image.resize(image.len() + (width * height) as usize, level);
        image
    }

    fn video_chunk(sequence: u64) -> Vec<u8> {
        let mut chunk = vec![0u8; STREAM_CHUNK];
        chunk[..5].copy_from_slice(&[0, 0, 0, 1, 0x65]);
        for (i, byte) in chunk.iter_mut().enumerate().skip(5) {
            *byte = (sequence as usize).wrapping_add(i) as u8;
        }
        chunk
    }

    fn luma_plane(&self, sequence: u64) -> Vec<u8> {
        let width = self.stats.resolution.width as usize;
        let shift = (sequence as u8).wrapping_mul(FRAME_STEP);
        (0..self.stats.resolution.pixels())
            .map(|i| ((i % width + i / width) as u8).wrapping_add(shift))
            .collect()
    }

    /// Repeat `step` once per frame interval until done.
    fn run_frames<F>(&mut self, span: Span, cancel: &CancelToken, mut step: F) -> Result<u64>
    where
        F: FnMut(&mut Self, u64) -> Result<()>,
    {
        let started = Instant::now();
        let interval = self.interval();
        let mut frames = 0;
        while !cancel.is_cancelled() && !span.expired(started) {
            let sequence = self.next_sequence();
            step(self, sequence)?;
            frames += 1;
            thread::sleep(interval);
        }
        Ok(frames)
    }
}

impl Camera for SimulatedCamera {
    fn stats(&self) -> CameraStats {
        self.stats.clone()
    }

    fn apply(&mut self, change: SettingChange) -> Result<()> {
        debug!(?change, "Simulated camera setting");
        change.apply_to(&mut self.stats);
        Ok(())
    }

    fn capture_image(&mut self, path: &Path) -> Result<()> {
        let sequence = self.next_sequence();
        std::fs::write(path, self.still(sequence))?;
        Ok(())
    }

    fn record_video(&mut self, path: &Path, span: Span, cancel: &CancelToken) -> Result<()> {
        let mut file = File::create(path)?;
        let frames = self.run_frames(span, cancel, |_, sequence| {
            file.write_all(&Self::video_chunk(sequence))?;
            Ok(())
        })?;
        file.flush()?;
        debug!("Recorded {frames} simulated frames to {}", path.display());
        Ok(())
    }

    fn stream_video(&mut self, out: &mut dyn Write, span: Span, cancel: &CancelToken) -> Result<()> {
        self.run_frames(span, cancel, |_, sequence| {
            out.write_all(&Self::video_chunk(sequence))?;
            Ok(())
        })?;
        out.flush()?;
        Ok(())
    }

    fn stream_frames(&mut self, sink: &mut FrameSink<'_>, span: Span, cancel: &CancelToken) -> Result<()> {
        self.run_frames(span, cancel, |camera, sequence| sink(&camera.luma_plane(sequence)))?;
        Ok(())
    }

    fn start_trigger(&mut self, mode: TriggerMode) -> Result<()> {
        self.trigger_mode = Some(mode);
        Ok(())
    }

    fn capture_queued(&mut self) -> Result<Vec<u8>> {
        if self.trigger_mode.is_none() {
            return Err(AppError::hardware("Trigger capture not started"));
        }
        let sequence = self.next_sequence();
        Ok(self.still(sequence))
    }

    fn stop_trigger(&mut self) {
        self.trigger_mode = None;
    }

    fn reset(&mut self) -> Result<()> {
        self.stats = CameraStats::default();
        self.trigger_mode = None;
        Ok(())
    }
}

/// ADC/DAC board with each DAC output wired back to the ADC input of the
/// same channel.
#[derive(Debug, Default)]
pub struct SimulatedBoard {
    dac_millivolts: [u32; 2],
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AdcDac for SimulatedBoard {
    fn read_voltage(&mut self, channel: u8) -> Result<f64> {
        let index = check_channel(channel)?;
        let volts = self.dac_millivolts[index] as f64 / 1000.0;
        Ok(volts.min(ADC_REFERENCE_VOLTS))
    }

    fn write_voltage(&mut self, channel: u8, millivolts: u32) -> Result<()> {
        let index = check_channel(channel)?;
        if millivolts > DAC_MAX_MILLIVOLTS {
            return Err(AppError::hardware(format!(
                "{millivolts} mV exceeds the DAC range of {DAC_MAX_MILLIVOLTS} mV"
            )));
        }
        self.dac_millivolts[index] = millivolts;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.dac_millivolts = [0; 2];
        Ok(())
    }
}
