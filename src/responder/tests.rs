use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::*;
use crate::hardware::{SimulatedBoard, SimulatedCamera};
use crate::protocol::{
    CameraStats, STATS_FRAMES, STOP_TOKEN, TRIGGER_QUIT_TOKEN, TRIGGER_TOKEN, read_frame, write_frame,
};
use crate::transfer::DisabledTransfer;

type Served = JoinHandle<(Responder, Result<SessionEnd>)>;

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn settings(media_dir: &Path) -> ResponderSettings {
    ResponderSettings {
        limits: LimitsConfig::default(),
        media_dir: media_dir.to_path_buf(),
        image_filename: "image.jpg".to_string(),
        video_filename: "video.h264".to_string(),
        trigger_filename: "shot.jpg".to_string(),
        pipeline_depth: 2,
        stream_addr: format!("127.0.0.1:{}", free_port()),
    }
}

fn responder(media_dir: &Path) -> Responder {
    let stats = CameraStats {
        resolution: Resolution::new(64, 48),
        ..CameraStats::default()
    };
    let camera = SimulatedCamera::new()
        .with_stats(stats)
        .with_frame_interval(Duration::from_millis(2));
    Responder::new(
        Box::new(camera),
        Box::new(SimulatedBoard::new()),
        Box::new(DisabledTransfer),
        settings(media_dir),
    )
}

/// Serve one session in the background; the returned channel plays the
/// controller.
fn start(mut responder: Responder) -> (FrameChannel<TcpStream>, Served) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let end = responder.serve(stream);
        (responder, end)
    });
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    (FrameChannel::new(stream), handle)
}

fn recv(channel: &mut FrameChannel<TcpStream>) -> String {
    channel.expect_text("test frame").unwrap()
}

fn recv_n(channel: &mut FrameChannel<TcpStream>, n: usize) -> Vec<String> {
    (0..n).map(|_| recv(channel)).collect()
}

fn finish(channel: FrameChannel<TcpStream>, handle: Served) -> (Responder, SessionEnd) {
    channel.close();
    let (responder, end) = handle.join().unwrap();
    (responder, end.unwrap())
}

#[test]
fn test_property_negotiation_applies_value() {
    let dir = tempfile::tempdir().unwrap();
    let (mut peer, handle) = start(responder(dir.path()));

    peer.send_text("B").unwrap();
    assert_eq!(recv_n(&mut peer, 3), ["50", "0", "100"]);
    peer.send_text("70").unwrap();
    assert_eq!(recv(&mut peer), "Brightness changed");

    peer.send_text("P").unwrap();
    let stats = recv_n(&mut peer, STATS_FRAMES);
    assert_eq!(stats[0], "64x48");
    assert_eq!(stats[2], "70");

    let (responder, end) = finish(peer, handle);
    assert_eq!(end, SessionEnd::Disconnected);
    assert_eq!(responder.camera.stats().brightness, 70);
}

#[test]
fn test_out_of_range_value_is_rejected_and_not_applied() {
    let dir = tempfile::tempdir().unwrap();
    let (mut peer, handle) = start(responder(dir.path()));

    peer.send_text("B").unwrap();
    recv_n(&mut peer, 3);
    peer.send_text("500").unwrap();
    assert_eq!(recv(&mut peer), "Rejected: Value is greater than maximum");

    // Still in step: the next command works normally
    peer.send_text("C").unwrap();
    assert_eq!(recv_n(&mut peer, 3), ["0", "-100", "100"]);
    peer.send_text("").unwrap();
    assert_eq!(recv(&mut peer), "Contrast changed");

    let (responder, _) = finish(peer, handle);
    assert_eq!(responder.camera.stats().brightness, 50);
}

#[test]
fn test_unknown_command_is_ignored_and_quit_ends_session() {
    let dir = tempfile::tempdir().unwrap();
    let (mut peer, handle) = start(responder(dir.path()));

    peer.send_text("Z").unwrap();
    peer.send_text("H").unwrap();
    peer.send_text("Q").unwrap();

    let (_, end) = handle.join().unwrap();
    assert_eq!(end.unwrap(), SessionEnd::Quit);
}

#[test]
fn test_lowercase_command_frame_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let (mut peer, handle) = start(responder(dir.path()));

    // Were "b" accepted, "Q" would be taken as the brightness value
    peer.send_text("b").unwrap();
    peer.send_text("Q").unwrap();

    let (_, end) = handle.join().unwrap();
    assert_eq!(end.unwrap(), SessionEnd::Quit);
}

#[test]
fn test_resolution_takes_both_values() {
    let dir = tempfile::tempdir().unwrap();
    let (mut peer, handle) = start(responder(dir.path()));

    peer.send_text("R").unwrap();
    assert_eq!(recv_n(&mut peer, 3), ["64", "64", "3280"]);
    peer.send_text("320").unwrap();
    assert_eq!(recv(&mut peer), "Width set");
    assert_eq!(recv_n(&mut peer, 3), ["48", "64", "2464"]);
    peer.send_text("240").unwrap();
    assert_eq!(recv(&mut peer), "Resolution changed");

    let (responder, _) = finish(peer, handle);
    assert_eq!(responder.camera.stats().resolution, Resolution::new(320, 240));
}

#[test]
fn test_image_capture_saves_file_and_sends_stats() {
    let dir = tempfile::tempdir().unwrap();
    let (mut peer, handle) = start(responder(dir.path()));

    peer.send_text("I").unwrap();
    assert_eq!(recv(&mut peer), "image.jpg");
    peer.send_text("snap.png").unwrap();
    assert_eq!(recv(&mut peer), "Image captured");
    assert_eq!(recv_n(&mut peer, STATS_FRAMES).len(), STATS_FRAMES);

    finish(peer, handle);
    assert!(dir.path().join("snap.png").is_file());
}

#[test]
fn test_dac_write_then_adc_read() {
    let dir = tempfile::tempdir().unwrap();
    let (mut peer, handle) = start(responder(dir.path()));

    peer.send_text("D").unwrap();
    assert_eq!(recv_n(&mut peer, 3), ["1", "1", "2"]);
    peer.send_text("2").unwrap();
    assert_eq!(recv(&mut peer), "Channel 2 selected");
    assert_eq!(recv_n(&mut peer, 3), ["0", "0", "2048"]);
    peer.send_text("1500").unwrap();
    assert_eq!(recv(&mut peer), "DAC voltage changed");

    peer.send_text("A").unwrap();
    recv_n(&mut peer, 3);
    peer.send_text("2").unwrap();
    assert_eq!(recv(&mut peer), "Channel 2 selected");
    assert_eq!(recv(&mut peer), "1.5000");

    finish(peer, handle);
}

#[test]
fn test_trigger_session_delivers_every_image() {
    let dir = tempfile::tempdir().unwrap();
    let (mut peer, handle) = start(responder(dir.path()));

    peer.send_text("T").unwrap();
    assert_eq!(recv_n(&mut peer, 3), ["1", "1", "2"]);
    peer.send_text("1").unwrap();
    assert_eq!(recv(&mut peer), "Trigger mode 1");
    assert_eq!(recv(&mut peer), "shot.jpg");
    peer.send_text("burst.jpg").unwrap();
    assert_eq!(recv(&mut peer), "Trigger capture ready");

    let mut names = Vec::new();
    for _ in 0..3 {
        peer.send_text(TRIGGER_TOKEN).unwrap();
        names.push(recv(&mut peer));
    }
    assert_eq!(names, ["", "", "burst_0001.jpg"]);

    peer.send_text(TRIGGER_QUIT_TOKEN).unwrap();
    assert_eq!(recv(&mut peer), "2");
    assert_eq!(recv_n(&mut peer, 2), ["burst_0002.jpg", "burst_0003.jpg"]);
    assert_eq!(recv(&mut peer), "Trigger capture finished");

    let (mut responder, _) = finish(peer, handle);
    for index in 1..=3 {
        assert!(dir.path().join(format!("burst_{index:04}.jpg")).is_file());
    }
    // Trigger mode is stopped once the command ends
    assert!(responder.camera.capture_queued().is_err());
}

#[test]
fn test_video_recording_waits_for_stop() {
    let dir = tempfile::tempdir().unwrap();
    let (mut peer, handle) = start(responder(dir.path()));

    peer.send_text("V").unwrap();
    assert_eq!(recv_n(&mut peer, 3), ["10", "0", "inf"]);
    peer.send_text("1").unwrap();
    assert_eq!(recv(&mut peer), "Duration set");
    assert_eq!(recv(&mut peer), "video.h264");
    peer.send_text("clip.h264").unwrap();
    assert_eq!(recv(&mut peer), "Recording started");

    thread::sleep(Duration::from_millis(50));
    peer.send_text(STOP_TOKEN).unwrap();
    assert_eq!(recv(&mut peer), "Recording finished");
    assert_eq!(recv_n(&mut peer, STATS_FRAMES).len(), STATS_FRAMES);

    finish(peer, handle);
    let recorded = std::fs::read(dir.path().join("clip.h264")).unwrap();
    assert!(recorded.starts_with(&[0, 0, 0, 1]));
}

#[test]
fn test_network_stream_closes_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (mut peer, handle) = start(responder(dir.path()));

    peer.send_text("N").unwrap();
    recv_n(&mut peer, 3);
    peer.send_text(&i64::MAX.to_string()).unwrap();
    assert_eq!(recv(&mut peer), "Streaming started");

    let mut raw = peer.get_ref();
    let mut head = [0u8; 5];
    raw.read_exact(&mut head).unwrap();
    assert_eq!(head, [0, 0, 0, 1, 0x65]);

    write_frame(&mut raw, STOP_TOKEN.as_bytes()).unwrap();
    let mut rest = Vec::new();
    let _ = raw.read_to_end(&mut rest);

    let (_, end) = handle.join().unwrap();
    assert_eq!(end.unwrap(), SessionEnd::StreamClosed);
}

#[test]
fn test_diff_stream_sends_resolution_then_planes() {
    let dir = tempfile::tempdir().unwrap();
    let responder = responder(dir.path());
    let data_addr = responder.settings.stream_addr.clone();
    let (mut peer, handle) = start(responder);

    peer.send_text("O").unwrap();
    recv_n(&mut peer, 3);
    peer.send_text(&i64::MAX.to_string()).unwrap();
    assert_eq!(recv(&mut peer), "Processing started");

    let mut data = TcpStream::connect(&data_addr).unwrap();
    data.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    assert_eq!(read_frame(&mut data).unwrap().unwrap(), b"64x48");
    assert_eq!(read_frame(&mut data).unwrap().unwrap().len(), 64 * 48);
    let drain = thread::spawn(move || {
        while let Ok(Some(_)) = read_frame(&mut data) {}
    });

    peer.send_text(STOP_TOKEN).unwrap();
    assert_eq!(recv(&mut peer), "Processing finished");
    drain.join().unwrap();

    // Back at the command prompt
    peer.send_text("B").unwrap();
    assert_eq!(recv_n(&mut peer, 3).len(), 3);
    finish(peer, handle);
}

#[test]
fn test_diff_stream_rejects_when_data_port_is_taken() {
    let dir = tempfile::tempdir().unwrap();
    let responder = responder(dir.path());
    let _taken = TcpListener::bind(&responder.settings.stream_addr).unwrap();
    let (mut peer, handle) = start(responder);

    peer.send_text("O").unwrap();
    assert_eq!(recv_n(&mut peer, 3)[2], "inf");
    peer.send_text("5").unwrap();
    assert!(recv(&mut peer).starts_with("Rejected: Cannot open data transport"));

    // Still in step
    peer.send_text("B").unwrap();
    assert_eq!(recv_n(&mut peer, 3).len(), 3);
    let (_, end) = finish(peer, handle);
    assert_eq!(end, SessionEnd::Disconnected);
}
