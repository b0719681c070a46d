//! External helpers: the file copy tool and the video player.

use std::fs::File;
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

/// Moves a finished file from the responder to the controller.
pub trait FileTransfer: Send {
    /// Responder side: serve `path` to the controller.
    fn send(&self, path: &Path) -> Result<()>;

    /// Controller side: fetch from `peer` into `destination`.
    fn receive(&self, peer: IpAddr, destination: &Path) -> Result<()>;

    /// Whether files actually move.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Copies with `nc` on a fixed port.
#[derive(Debug, Clone)]
pub struct NetcatTransfer {
    program: String,
    port: u16,
    start_delay: Duration,
}

impl NetcatTransfer {
    pub fn new(program: impl Into<String>, port: u16, start_delay: Duration) -> Self {
        Self {
            program: program.into(),
            port,
            start_delay,
        }
    }

    fn run(&self, command: &mut Command, what: &str) -> Result<()> {
        let status = command
            .status()
            .map_err(|e| AppError::transfer(format!("Cannot start {}: {e}", self.program)))?;
        if status.success() {
            Ok(())
        } else {
            Err(AppError::transfer(format!("{} {what} exited with {status}", self.program)))
        }
    }
}

impl FileTransfer for NetcatTransfer {
    fn send(&self, path: &Path) -> Result<()> {
        let file = File::open(path)?;
        info!("Serving {} on port {}", path.display(), self.port);
        self.run(
            Command::new(&self.program)
                .arg("-l")
                .arg("-p")
                .arg(self.port.to_string())
                .stdin(file)
                .stdout(Stdio::null()),
            "send",
        )
    }

    fn receive(&self, peer: IpAddr, destination: &Path) -> Result<()> {
        // Give the responder time to start listening
        thread::sleep(self.start_delay);

        let file = File::create(destination)?;
        info!("Receiving {} from {peer}:{}", destination.display(), self.port);
        self.run(
            Command::new(&self.program)
                .arg(peer.to_string())
                .arg(self.port.to_string())
                .stdin(Stdio::null())
                .stdout(file),
            "receive",
        )
    }
}

/// Leaves files on the responder.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTransfer;

impl FileTransfer for DisabledTransfer {
    fn send(&self, path: &Path) -> Result<()> {
        debug!("Transfer disabled, keeping {}", path.display());
        Ok(())
    }

    fn receive(&self, _peer: IpAddr, destination: &Path) -> Result<()> {
        debug!("Transfer disabled, not fetching {}", destination.display());
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Sink for a raw H.264 network stream.
pub trait VideoPlayer: Send {
    fn open(&self) -> Result<Box<dyn PlayerSink>>;
}

/// An open playback session.
pub trait PlayerSink: Send {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    /// End playback. Terminates the player if it is still running.
    fn finish(self: Box<Self>);
}

/// Pipes the stream into an external player's stdin.
#[derive(Debug, Clone)]
pub struct ExternalPlayer {
    command: Vec<String>,
}

impl ExternalPlayer {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl VideoPlayer for ExternalPlayer {
    fn open(&self) -> Result<Box<dyn PlayerSink>> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| AppError::config("Player command is empty"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AppError::hardware(format!("Cannot start player {program}: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::hardware("Player has no stdin"))?;
        info!("Started player {program}");

        Ok(Box::new(ChildPlayer {
            child,
            stdin: Some(stdin),
        }))
    }
}

struct ChildPlayer {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl PlayerSink for ChildPlayer {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => Ok(stdin.write_all(chunk)?),
            None => Err(AppError::hardware("Player input closed")),
        }
    }

    fn finish(mut self: Box<Self>) {
        drop(self.stdin.take());
        match self.child.try_wait() {
            Ok(Some(status)) => debug!("Player exited with {status}"),
            Ok(None) => {
                if let Err(e) = self.child.kill() {
                    warn!("Failed to stop player: {e}");
                }
                let _ = self.child.wait();
            }
            Err(e) => warn!("Failed to query player: {e}"),
        }
    }
}

/// Discards the stream, counting bytes. Used headless and in tests.
#[derive(Debug, Clone, Default)]
pub struct NullPlayer {
    received: Arc<AtomicUsize>,
}

impl NullPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received across all sessions.
    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }
}

impl VideoPlayer for NullPlayer {
    fn open(&self) -> Result<Box<dyn PlayerSink>> {
        Ok(Box::new(self.clone()))
    }
}

impl PlayerSink for NullPlayer {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.received.fetch_add(chunk.len(), Ordering::SeqCst);
        Ok(())
    }

    fn finish(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_transfer_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.jpg");
        let transfer = DisabledTransfer;

        transfer.send(&path).unwrap();
        transfer.receive("127.0.0.1".parse().unwrap(), &path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_program_is_transfer_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.jpg");
        std::fs::write(&path, b"data").unwrap();

        let transfer = NetcatTransfer::new("picam-link-no-such-tool", 5001, Duration::ZERO);
        assert!(matches!(transfer.send(&path), Err(AppError::Transfer(_))));
    }

    #[test]
    fn test_empty_player_command_rejected() {
        let player = ExternalPlayer::new(Vec::new());
        assert!(player.open().is_err());
    }

    #[test]
    fn test_null_player_counts_bytes() {
        let player = NullPlayer::new();
        let mut sink = player.open().unwrap();
        sink.write_chunk(&[0u8; 10]).unwrap();
        sink.write_chunk(&[0u8; 5]).unwrap();
        sink.finish();
        assert_eq!(player.received(), 15);
    }
}
