//! Camera driver built on the Raspberry Pi command-line tools.
//!
//! Settings are kept locally and passed as arguments on every invocation of
//! `raspistill`, `raspiyuv`, `raspivid` or `raspividyuv`.

use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{Camera, FrameSink, SettingChange, TriggerMode};
use crate::cancel::CancelToken;
use crate::error::{AppError, Result};
use crate::protocol::{CameraStats, STREAM_CHUNK, Span};

/// Poll period while waiting on a recording process.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// `raspividyuv` pads frames to these multiples.
const ROW_ALIGN: usize = 32;
const COLUMN_ALIGN: usize = 16;

/// Kills the child when dropped, so a disconnect never leaves the camera busy.
struct ChildGuard {
    child: Child,
    name: &'static str,
}

impl ChildGuard {
    fn spawn(name: &'static str, command: &mut Command) -> Result<Self> {
        debug!("Running {name} {:?}", command.get_args().collect::<Vec<_>>());
        let child = command
            .spawn()
            .map_err(|e| AppError::hardware(format!("Cannot start {name}: {e}")))?;
        Ok(Self { child, name })
    }

    fn stdout(&mut self) -> Result<ChildStdout> {
        self.child
            .stdout
            .take()
            .ok_or_else(|| AppError::hardware(format!("{} has no stdout", self.name)))
    }

    /// Wait for a normal exit, failing on a non-zero status.
    fn finish(mut self) -> Result<()> {
        let status = self.child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(AppError::hardware(format!("{} exited with {status}", self.name)))
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                warn!("Failed to stop {}: {e}", self.name);
            }
            let _ = self.child.wait();
        }
    }
}

pub struct RaspiCamera {
    stats: CameraStats,
    trigger_mode: Option<TriggerMode>,
}

impl Default for RaspiCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl RaspiCamera {
    pub fn new() -> Self {
        Self {
            stats: CameraStats::default(),
            trigger_mode: None,
        }
    }

    /// Arguments shared by every tool.
    fn common_args(&self) -> Vec<String> {
        let s = &self.stats;
        let mut args = vec![
            "-n".to_string(),
            "-w".to_string(),
            s.resolution.width.to_string(),
            "-h".to_string(),
            s.resolution.height.to_string(),
            "-br".to_string(),
            s.brightness.to_string(),
            "-co".to_string(),
            s.contrast.to_string(),
            "-sh".to_string(),
            s.sharpness.to_string(),
            "-sa".to_string(),
            s.saturation.to_string(),
        ];
        if s.iso > 0 {
            args.extend(["-ISO".to_string(), s.iso.to_string()]);
        }
        if s.exposure_time > 0 {
            args.extend(["-ss".to_string(), s.exposure_time.to_string()]);
        }
        args
    }

    fn video_args(&self, span: Span) -> Vec<String> {
        let mut args = self.common_args();
        let millis = match span {
            Span::Finite(limit) => limit.as_millis().max(1).to_string(),
            Span::Indefinite => "0".to_string(),
        };
        args.extend([
            "-fps".to_string(),
            self.stats.framerate.to_f64().round().to_string(),
            "-t".to_string(),
            millis,
        ]);
        args
    }

    /// Still command for a file extension.
    fn still_command(&self, extension: &str) -> (&'static str, Vec<String>) {
        let mut args = self.common_args();
        args.extend(["-t".to_string(), "1".to_string()]);
        match extension {
            "yuv" => ("raspiyuv", args),
            "rgb" | "rgba" | "bgr" | "bgra" => {
                args.push("-rgb".to_string());
                ("raspiyuv", args)
            }
            "jpeg" => {
                args.extend(["-e".to_string(), "jpg".to_string()]);
                ("raspistill", args)
            }
            other => {
                args.extend(["-e".to_string(), other.to_string()]);
                ("raspistill", args)
            }
        }
    }
}

impl Camera for RaspiCamera {
    fn stats(&self) -> CameraStats {
        self.stats.clone()
    }

    fn apply(&mut self, change: SettingChange) -> Result<()> {
        change.apply_to(&mut self.stats);
        Ok(())
    }

    fn capture_image(&mut self, path: &Path) -> Result<()> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "jpg".to_string());
        let (tool, args) = self.still_command(&extension);

        let child = ChildGuard::spawn(tool, Command::new(tool).args(&args).arg("-o").arg(path))?;
        child.finish()
    }

    fn record_video(&mut self, path: &Path, span: Span, cancel: &CancelToken) -> Result<()> {
        let mut child = ChildGuard::spawn(
            "raspivid",
            Command::new("raspivid").args(self.video_args(span)).arg("-o").arg(path),
        )?;

        loop {
            if let Some(status) = child.child.try_wait()? {
                if !status.success() {
                    return Err(AppError::hardware(format!("raspivid exited with {status}")));
                }
                return Ok(());
            }
            if cancel.is_cancelled() {
                info!("Recording stopped");
                // Dropping the guard ends the process
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn stream_video(&mut self, out: &mut dyn Write, span: Span, cancel: &CancelToken) -> Result<()> {
        let mut child = ChildGuard::spawn(
            "raspivid",
            Command::new("raspivid")
                .args(self.video_args(span))
                .args(["-o", "-"])
                .stdout(Stdio::piped()),
        )?;
        let mut stdout = child.stdout()?;

        let mut chunk = [0u8; STREAM_CHUNK];
        while !cancel.is_cancelled() {
            let n = match stdout.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            out.write_all(&chunk[..n])?;
        }
        out.flush()?;
        Ok(())
    }

    fn stream_frames(&mut self, sink: &mut FrameSink<'_>, span: Span, cancel: &CancelToken) -> Result<()> {
        let width = self.stats.resolution.width as usize;
        let height = self.stats.resolution.height as usize;
        let stride = width.next_multiple_of(ROW_ALIGN);
        let rows = height.next_multiple_of(COLUMN_ALIGN);
        // I420: full luma plane plus two quarter-size chroma planes
        let frame_len = stride * rows * 3 / 2;

        let mut child = ChildGuard::spawn(
            "raspividyuv",
            Command::new("raspividyuv")
                .args(self.video_args(span))
                .args(["-o", "-"])
                .stdout(Stdio::piped()),
        )?;
        let mut stdout = child.stdout()?;

        let started = Instant::now();
        let mut frame = vec![0u8; frame_len];
        let mut luma = vec![0u8; width * height];
        while !cancel.is_cancelled() && !span.expired(started) {
            match stdout.read_exact(&mut frame) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            for (row, line) in luma.chunks_exact_mut(width).enumerate() {
                line.copy_from_slice(&frame[row * stride..row * stride + width]);
            }
            sink(&luma)?;
        }
        Ok(())
    }

    fn start_trigger(&mut self, mode: TriggerMode) -> Result<()> {
        self.trigger_mode = Some(mode);
        Ok(())
    }

    fn capture_queued(&mut self) -> Result<Vec<u8>> {
        let mode = self
            .trigger_mode
            .ok_or_else(|| AppError::hardware("Trigger capture not started"))?;

        let (tool, mut args) = self.still_command("jpg");
        if mode == TriggerMode::Video {
            args.push("-bm".to_string());
        }
        let mut child = ChildGuard::spawn(tool, Command::new(tool).args(&args).args(["-o", "-"]).stdout(Stdio::piped()))?;

        let mut image = Vec::new();
        child.stdout()?.read_to_end(&mut image)?;
        child.finish()?;
        Ok(image)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Resolution;

    #[test]
    fn test_common_args_skip_automatic_values() {
        let camera = RaspiCamera::new();
        let args = camera.common_args();
        assert!(args.contains(&"-br".to_string()));
        assert!(!args.contains(&"-ISO".to_string()));
        assert!(!args.contains(&"-ss".to_string()));
    }

    #[test]
    fn test_still_command_by_extension() {
        let mut camera = RaspiCamera::new();
        camera.apply(SettingChange::Resolution(Resolution::new(640, 480))).unwrap();

        let (tool, args) = camera.still_command("png");
        assert_eq!(tool, "raspistill");
        assert!(args.windows(2).any(|w| w == ["-e", "png"]));
        assert!(args.windows(2).any(|w| w == ["-w", "640"]));

        let (tool, args) = camera.still_command("bgr");
        assert_eq!(tool, "raspiyuv");
        assert!(args.contains(&"-rgb".to_string()));
    }

    #[test]
    fn test_indefinite_video_has_zero_timeout() {
        let camera = RaspiCamera::new();
        let args = camera.video_args(Span::Indefinite);
        assert!(args.windows(2).any(|w| w == ["-t", "0"]));

        let args = camera.video_args(Span::Finite(Duration::from_secs(5)));
        assert!(args.windows(2).any(|w| w == ["-t", "5000"]));
    }
}
