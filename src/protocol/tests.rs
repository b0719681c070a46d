//! Unit tests for the frame codec and protocol types.

use std::io::Cursor;

use proptest::prelude::*;

use super::codec::{Confirmation, FrameChannel, encode_frame, read_frame, write_frame};
use super::stats::{CameraStats, Resolution, StatsReport};
use super::types::{CommandCode, HEADER_SIZE, Span};
use super::value::Rational;

/// In-memory duplex stream: reads from `input`, writes into `output`.
struct Duplex {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl Duplex {
    fn new(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            output: Vec::new(),
        }
    }
}

impl std::io::Read for Duplex {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

impl std::io::Write for Duplex {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_encode_frame_structure() {
    let frame = encode_frame(b"B").unwrap();

    // Big-endian length prefix
    assert_eq!(&frame[..HEADER_SIZE], &[0, 0, 0, 1]);
    assert_eq!(&frame[HEADER_SIZE..], b"B");
}

#[test]
fn test_empty_payload_is_a_frame() {
    let frame = encode_frame(b"").unwrap();
    assert_eq!(frame, vec![0, 0, 0, 0]);

    let mut cursor = Cursor::new(frame);
    assert_eq!(read_frame(&mut cursor).unwrap(), Some(Vec::new()));
}

#[test]
fn test_read_consecutive_frames() {
    let mut bytes = Vec::new();
    write_frame(&mut bytes, b"50").unwrap();
    write_frame(&mut bytes, b"0").unwrap();
    write_frame(&mut bytes, b"100").unwrap();

    let mut cursor = Cursor::new(bytes);
    assert_eq!(read_frame(&mut cursor).unwrap().unwrap(), b"50");
    assert_eq!(read_frame(&mut cursor).unwrap().unwrap(), b"0");
    assert_eq!(read_frame(&mut cursor).unwrap().unwrap(), b"100");
    assert_eq!(read_frame(&mut cursor).unwrap(), None);
}

#[test]
fn test_closed_before_header_is_end_of_stream() {
    let mut empty = Cursor::new(Vec::new());
    assert_eq!(read_frame(&mut empty).unwrap(), None);

    // Only two of four header bytes
    let mut partial = Cursor::new(vec![0u8, 0]);
    assert_eq!(read_frame(&mut partial).unwrap(), None);
}

#[test]
fn test_closed_mid_body_is_end_of_stream() {
    // Header declares 10 bytes, only 4 arrive before close
    let mut bytes = 10u32.to_be_bytes().to_vec();
    bytes.extend_from_slice(b"abcd");

    let mut cursor = Cursor::new(bytes);
    assert_eq!(read_frame(&mut cursor).unwrap(), None);
}

#[test]
fn test_huge_declared_length_does_not_allocate_upfront() {
    let mut bytes = u32::MAX.to_be_bytes().to_vec();
    bytes.extend_from_slice(b"tiny");

    let mut cursor = Cursor::new(bytes);
    assert_eq!(read_frame(&mut cursor).unwrap(), None);
}

#[test]
fn test_channel_confirmation_missing() {
    let mut channel = FrameChannel::new(Duplex::new(Vec::new()));
    let confirmation = channel.confirmation("brightness").unwrap();
    assert_eq!(confirmation, Confirmation::Failed("no confirmation for brightness".to_string()));
    assert!(confirmation.into_result().is_err());
}

#[test]
fn test_channel_confirmation_present() {
    let mut input = Vec::new();
    write_frame(&mut input, b"Brightness changed").unwrap();

    let mut channel = FrameChannel::new(Duplex::new(input));
    assert_eq!(
        channel.confirmation("brightness").unwrap(),
        Confirmation::Confirmed("Brightness changed".to_string())
    );
}

#[test]
fn test_channel_send_text_frames_output() {
    let mut channel = FrameChannel::new(Duplex::new(Vec::new()));
    channel.send_text("Stop").unwrap();

    let written = channel.into_inner().output;
    assert_eq!(written, encode_frame(b"Stop").unwrap());
}

#[test]
fn test_expect_text_rejects_invalid_utf8() {
    let mut input = Vec::new();
    write_frame(&mut input, &[0xff, 0xfe]).unwrap();

    let mut channel = FrameChannel::new(Duplex::new(input));
    assert!(channel.expect_text("filename").is_err());
}

#[test]
fn test_command_code_parse() {
    assert_eq!(CommandCode::parse("b"), Some(CommandCode::Brightness));
    assert_eq!(CommandCode::parse(" R "), Some(CommandCode::Resolution));
    assert_eq!(CommandCode::parse("U"), Some(CommandCode::Saturation));
    assert_eq!(CommandCode::parse("BR"), None);
    assert_eq!(CommandCode::parse(""), None);
    assert_eq!(CommandCode::parse("Z"), None);
}

#[test]
fn test_command_frame_must_be_exact() {
    assert_eq!(CommandCode::from_frame("B"), Some(CommandCode::Brightness));
    assert_eq!(CommandCode::from_frame("b"), None);
    assert_eq!(CommandCode::from_frame(" B"), None);
    assert_eq!(CommandCode::from_frame(""), None);
}

#[test]
fn test_command_codes_are_unique() {
    let mut codes: Vec<char> = CommandCode::ALL.iter().map(|c| c.code()).collect();
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), CommandCode::ALL.len());
}

#[test]
fn test_span_from_secs() {
    assert_eq!(Span::from_secs(i64::MAX), Span::Indefinite);
    assert_eq!(Span::from_secs(5), Span::Finite(std::time::Duration::from_secs(5)));
    assert_eq!(Span::from_secs(-3), Span::Finite(std::time::Duration::ZERO));
}

#[test]
fn test_stats_block_decodes_rationals_and_percentages() {
    let stats = CameraStats {
        resolution: Resolution::new(1296, 972),
        framerate: Rational::new(30, 1),
        brightness: 55,
        contrast: -20,
        iso: 400,
        analog_gain: Rational::new(8, 5),
        digital_gain: Rational::new(1, 1),
        sharpness: 100,
        saturation: -100,
        exposure_time: 20000,
    };

    let frames = stats.to_frames();
    assert_eq!(frames[0], "1296x972");
    assert_eq!(frames[4], "8/5");

    let report = StatsReport::from_frames(&frames).unwrap();
    assert_eq!(report.resolution, Resolution::new(1296, 972));
    assert_eq!(report.analog_gain, 1.6);
    assert_eq!(StatsReport::percent(report.contrast), 40.0);
    assert_eq!(StatsReport::percent(report.sharpness), 100.0);
    assert_eq!(StatsReport::percent(report.saturation), 0.0);
}

#[test]
fn test_stats_block_wrong_length() {
    let frames = vec!["1920x1080".to_string()];
    assert!(StatsReport::from_frames(&frames).is_err());
}

proptest! {
    #[test]
    fn prop_frame_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let frame = encode_frame(&payload).unwrap();
        let mut cursor = Cursor::new(frame);
        prop_assert_eq!(read_frame(&mut cursor).unwrap(), Some(payload));
    }

    #[test]
    fn prop_truncated_frame_never_yields_payload(
        payload in proptest::collection::vec(any::<u8>(), 1..512),
        cut in 0usize..512,
    ) {
        let frame = encode_frame(&payload).unwrap();
        let cut = cut % frame.len();
        let mut cursor = Cursor::new(frame[..cut].to_vec());
        prop_assert_eq!(read_frame(&mut cursor).unwrap(), None);
    }
}
