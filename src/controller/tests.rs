use std::io::{Read, Write};
use std::path::Path;
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::cancel::CancelToken;
use crate::config::LimitsConfig;
use crate::hardware::{Camera, FrameSink, SettingChange, SimulatedBoard, SimulatedCamera, TriggerMode};
use crate::link::Endpoint;
use crate::protocol::{CameraStats, Resolution, Span, TriggerEvent};
use crate::responder::{Responder, ResponderServer, ResponderSettings};
use crate::transfer::{NullPlayer, PlayerSink, VideoPlayer};

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

/// A controller wired to a simulated responder on loopback.
struct Rig {
    controller: Controller,
    player: NullPlayer,
    media: TempDir,
}

fn simulated_camera() -> SimulatedCamera {
    SimulatedCamera::new()
        .with_stats(CameraStats {
            resolution: Resolution::new(64, 48),
            ..CameraStats::default()
        })
        .with_frame_interval(Duration::from_millis(2))
}

fn rig() -> Rig {
    rig_with(Box::new(simulated_camera()))
}

fn rig_with(camera: Box<dyn Camera>) -> Rig {
    let media = tempfile::tempdir().unwrap();
    let stream_port = free_port();

    let settings = ResponderSettings {
        limits: LimitsConfig::default(),
        media_dir: media.path().to_path_buf(),
        image_filename: "image.jpg".to_string(),
        video_filename: "video.h264".to_string(),
        trigger_filename: "shot.jpg".to_string(),
        pipeline_depth: 2,
        stream_addr: format!("127.0.0.1:{stream_port}"),
    };
    let responder = Responder::new(
        camera,
        Box::new(SimulatedBoard::new()),
        Box::new(DisabledTransfer),
        settings,
    );
    let mut server = ResponderServer::new(
        Link::new(Endpoint::Listen("127.0.0.1:0".to_string())),
        responder,
        Duration::from_millis(10),
    );
    let addr = server.bind().unwrap().unwrap();
    thread::spawn(move || server.run());

    let player = NullPlayer::new();
    let controller = Controller::new(
        Link::new(Endpoint::Connect(addr.to_string())).with_read_timeout(Some(Duration::from_secs(10))),
        Box::new(DisabledTransfer),
        Box::new(player.clone()),
        ControllerSettings {
            download_dir: media.path().join("downloads"),
            stream_port,
            connect_timeout: Some(Duration::from_secs(2)),
        },
    );
    Rig {
        controller,
        player,
        media,
    }
}

/// Where a [`FaultyCamera`] gives out.
#[derive(Clone, Copy)]
enum Fault {
    Recording,
    /// After this many luma planes.
    FrameStream(usize),
}

/// Simulated camera that fails partway through a long operation.
struct FaultyCamera {
    inner: SimulatedCamera,
    fault: Fault,
}

impl FaultyCamera {
    fn new(fault: Fault) -> Self {
        Self {
            inner: simulated_camera(),
            fault,
        }
    }
}

impl Camera for FaultyCamera {
    fn stats(&self) -> CameraStats {
        self.inner.stats()
    }

    fn apply(&mut self, change: SettingChange) -> Result<()> {
        self.inner.apply(change)
    }

    fn capture_image(&mut self, path: &Path) -> Result<()> {
        self.inner.capture_image(path)
    }

    fn record_video(&mut self, path: &Path, span: Span, cancel: &CancelToken) -> Result<()> {
        match self.fault {
            Fault::Recording => Err(AppError::hardware("Camera busy")),
            Fault::FrameStream(_) => self.inner.record_video(path, span, cancel),
        }
    }

    fn stream_video(&mut self, out: &mut dyn Write, span: Span, cancel: &CancelToken) -> Result<()> {
        self.inner.stream_video(out, span, cancel)
    }

    fn stream_frames(&mut self, sink: &mut FrameSink<'_>, span: Span, cancel: &CancelToken) -> Result<()> {
        let Fault::FrameStream(limit) = self.fault else {
            return self.inner.stream_frames(sink, span, cancel);
        };
        let mut sent = 0;
        let mut failing = |plane: &[u8]| {
            if sent == limit {
                return Err(AppError::hardware("Sensor lost"));
            }
            sent += 1;
            sink(plane)
        };
        self.inner.stream_frames(&mut failing, span, cancel)
    }

    fn start_trigger(&mut self, mode: TriggerMode) -> Result<()> {
        self.inner.start_trigger(mode)
    }

    fn capture_queued(&mut self) -> Result<Vec<u8>> {
        self.inner.capture_queued()
    }

    fn stop_trigger(&mut self) {
        self.inner.stop_trigger();
    }

    fn reset(&mut self) -> Result<()> {
        self.inner.reset()
    }
}

/// Player whose program is not installed.
struct MissingPlayer;

impl VideoPlayer for MissingPlayer {
    fn open(&self) -> Result<Box<dyn PlayerSink>> {
        Err(AppError::hardware("Cannot start player vlc: not found"))
    }
}

/// Trip `token` shortly after an operation arms it.
fn cancel_when_armed(token: CancelToken, after: Duration) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !token.is_armed() {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(after);
        token.cancel();
    })
}

#[test]
fn test_brightness_default_is_accepted() {
    let mut rig = rig();
    let mut io = ScriptedChannel::new([""]);

    let outcome = rig.controller.run(CommandCode::Brightness, &mut io);

    assert_eq!(outcome, CommandOutcome::Completed);
    assert_eq!(io.prompts[0].to_string(), "Brightness (Default: 50, Min: 0, Max: 100)");
    assert_eq!(io.statuses, ["Brightness changed"]);
    assert!(io.errors.is_empty());
}

#[test]
fn test_resolution_out_of_range_height_is_asked_again() {
    let mut rig = rig();
    let mut io = ScriptedChannel::new(["1920", "5000", "1080"]);

    let outcome = rig.controller.run(CommandCode::Resolution, &mut io);

    assert_eq!(outcome, CommandOutcome::Completed);
    assert_eq!(io.errors, ["Value is greater than maximum"]);
    assert_eq!(io.statuses, ["Width set", "Resolution changed"]);
    assert_eq!(io.prompts.len(), 3);

    let mut io = ScriptedChannel::new(Vec::<String>::new());
    rig.controller.run(CommandCode::Settings, &mut io);
    assert_eq!(io.statuses[0], "Resolution: 1920x1080");
}

#[test]
fn test_network_stream_stops_and_reconnects() {
    let mut rig = rig();
    let cancel = CancelToken::new();
    let mut io = ScriptedChannel::new(["inf", ""]).with_cancel(cancel.clone());
    let stopper = cancel_when_armed(cancel, Duration::from_millis(100));

    let outcome = rig.controller.run(CommandCode::NetworkStream, &mut io);
    stopper.join().unwrap();

    assert_eq!(outcome, CommandOutcome::Reconnected);
    assert!(rig.player.received() > 0);
    assert!(rig.controller.is_connected());
    assert_eq!(io.statuses[0], "Streaming started");

    // The fresh connection serves the next command
    assert_eq!(rig.controller.run(CommandCode::Brightness, &mut io), CommandOutcome::Completed);
    assert_eq!(io.statuses.last().unwrap(), "Brightness changed");
}

#[test]
fn test_truncated_frame_fails_the_command() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut command = [0u8; 5];
        stream.read_exact(&mut command).unwrap();
        // Announces 10 bytes, delivers 4
        stream.write_all(&[0, 0, 0, 10, b'6', b'4', b'x', b'4']).unwrap();
    });

    let mut controller = Controller::new(
        Link::new(Endpoint::Connect(addr.to_string())),
        Box::new(DisabledTransfer),
        Box::new(NullPlayer::new()),
        ControllerSettings {
            download_dir: std::env::temp_dir(),
            stream_port: free_port(),
            connect_timeout: None,
        },
    );
    let mut io = ScriptedChannel::new(Vec::<String>::new());

    let outcome = controller.run(CommandCode::Settings, &mut io);
    peer.join().unwrap();

    assert!(matches!(outcome, CommandOutcome::Failed(_)));
    assert_eq!(io.errors.last().unwrap(), LOAD_HINT);
    assert!(!controller.is_connected());
}

#[test]
fn test_help_needs_no_connection() {
    let mut controller = Controller::new(
        Link::new(Endpoint::Connect(format!("127.0.0.1:{}", free_port()))),
        Box::new(DisabledTransfer),
        Box::new(NullPlayer::new()),
        ControllerSettings {
            download_dir: std::env::temp_dir(),
            stream_port: free_port(),
            connect_timeout: None,
        },
    );
    let mut io = ScriptedChannel::new(Vec::<String>::new());

    assert_eq!(controller.run(CommandCode::Help, &mut io), CommandOutcome::Completed);
    assert_eq!(io.statuses.len(), CommandCode::ALL.len() + 1);
    assert!(!controller.is_connected());
}

#[test]
fn test_abandoned_prompt_resets_the_session() {
    let mut rig = rig();
    let mut io = ScriptedChannel::new(Vec::<String>::new());

    let outcome = rig.controller.run(CommandCode::Contrast, &mut io);
    assert_eq!(outcome, CommandOutcome::Failed("Operation cancelled".to_string()));
    assert!(!rig.controller.is_connected());

    let mut io = ScriptedChannel::new(["-20"]);
    assert_eq!(rig.controller.run(CommandCode::Contrast, &mut io), CommandOutcome::Completed);
    assert_eq!(io.statuses, ["Contrast changed"]);
}

#[test]
fn test_image_capture_reports_stats() {
    let mut rig = rig();
    let mut io = ScriptedChannel::new(["snap.png"]);

    assert_eq!(rig.controller.run(CommandCode::Image, &mut io), CommandOutcome::Completed);
    assert_eq!(io.statuses[0], "Image captured");
    assert!(io.statuses.contains(&"Resolution: 64x48".to_string()));
    assert!(rig.media.path().join("snap.png").is_file());
}

#[test]
fn test_dac_value_reads_back_on_adc() {
    let mut rig = rig();
    let mut io = ScriptedChannel::new(["1", "1000", "1"]);

    rig.controller.run(CommandCode::DacWrite, &mut io);
    rig.controller.run(CommandCode::AdcRead, &mut io);

    assert!(io.errors.is_empty());
    assert_eq!(io.statuses.last().unwrap(), "ADC channel 1: 1.0000 V");
}

#[test]
fn test_video_recording_for_one_second() {
    let mut rig = rig();
    let mut io = ScriptedChannel::new(["1", ""]);

    assert_eq!(rig.controller.run(CommandCode::Video, &mut io), CommandOutcome::Completed);
    assert_eq!(io.statuses[..3], ["Duration set", "Recording started", "Recording finished"]);
    assert!(rig.media.path().join("video.h264").is_file());

    // Exactly one Stop was consumed: the stream is still in step
    let mut io = ScriptedChannel::new([""]);
    assert_eq!(rig.controller.run(CommandCode::Brightness, &mut io), CommandOutcome::Completed);
}

#[test]
fn test_diff_stream_reports_differences() {
    let mut rig = rig();
    let cancel = CancelToken::new();
    let mut io = ScriptedChannel::new(["inf"]).with_cancel(cancel.clone());
    let stopper = cancel_when_armed(cancel, Duration::from_millis(200));

    let outcome = rig.controller.run(CommandCode::DiffStream, &mut io);
    stopper.join().unwrap();

    assert_eq!(outcome, CommandOutcome::Completed);
    assert_eq!(io.statuses[0], "Processing started");
    assert!(io.statuses.iter().any(|s| s.contains("mean difference")));
    assert_eq!(io.statuses.last().unwrap(), "Processing finished");
    assert!(rig.controller.is_connected());
}

#[test]
fn test_trigger_capture_fetches_every_image() {
    let mut rig = rig();
    let mut io = ScriptedChannel::new(["2", ""]).with_triggers([
        TriggerEvent::Trigger,
        TriggerEvent::Trigger,
        TriggerEvent::Trigger,
        TriggerEvent::Quit,
    ]);

    assert_eq!(rig.controller.run(CommandCode::Trigger, &mut io), CommandOutcome::Completed);
    assert_eq!(
        io.statuses,
        [
            "Trigger mode 2",
            "Trigger capture ready",
            "Trigger 1: capture queued",
            "Trigger 2: capture queued",
            "Trigger 3: shot_0001.jpg",
            "Flushed shot_0002.jpg",
            "Flushed shot_0003.jpg",
            "Trigger capture finished",
        ]
    );
    assert!(rig.media.path().join("shot_0003.jpg").is_file());
}

#[test]
fn test_quit_closes_connection() {
    let mut rig = rig();
    let mut io = ScriptedChannel::new([""]);
    rig.controller.run(CommandCode::Brightness, &mut io);

    assert_eq!(rig.controller.run(CommandCode::Quit, &mut io), CommandOutcome::Quit);
    assert!(!rig.controller.is_connected());
}

#[test]
fn test_network_stream_without_player_drops_the_connection() {
    let mut rig = rig();
    rig.controller.player = Box::new(MissingPlayer);
    let mut io = ScriptedChannel::new(["inf"]);

    let outcome = rig.controller.run(CommandCode::NetworkStream, &mut io);

    assert!(matches!(outcome, CommandOutcome::Failed(ref e) if e.contains("Cannot start player")));
    assert!(!rig.controller.is_connected());

    // Raw video never reaches the next command
    let mut io = ScriptedChannel::new([""]);
    assert_eq!(rig.controller.run(CommandCode::Brightness, &mut io), CommandOutcome::Completed);
    assert_eq!(io.statuses, ["Brightness changed"]);
}

#[test]
fn test_failed_recording_ends_the_wait() {
    let mut rig = rig_with(Box::new(FaultyCamera::new(Fault::Recording)));
    let mut io = ScriptedChannel::new(["inf", ""]);

    let outcome = rig.controller.run(CommandCode::Video, &mut io);

    assert_eq!(
        outcome,
        CommandOutcome::Failed("Connection closed while waiting for recording".to_string())
    );
    assert_eq!(io.statuses, ["Duration set", "Recording started"]);
    assert_eq!(io.errors.last().unwrap(), LOAD_HINT);
    assert!(!rig.controller.is_connected());

    let mut io = ScriptedChannel::new([""]);
    assert_eq!(rig.controller.run(CommandCode::Brightness, &mut io), CommandOutcome::Completed);
}

#[test]
fn test_diff_stream_failure_mid_stream_reconnects() {
    let mut rig = rig_with(Box::new(FaultyCamera::new(Fault::FrameStream(3))));
    let mut io = ScriptedChannel::new(["inf"]);

    let outcome = rig.controller.run(CommandCode::DiffStream, &mut io);

    assert!(matches!(outcome, CommandOutcome::Failed(_)));
    assert_eq!(io.statuses[0], "Processing started");
    assert_eq!(io.errors.last().unwrap(), LOAD_HINT);
    assert!(!rig.controller.is_connected());

    let mut io = ScriptedChannel::new([""]);
    assert_eq!(rig.controller.run(CommandCode::Brightness, &mut io), CommandOutcome::Completed);
}
