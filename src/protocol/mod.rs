//! Framed command protocol shared by controller and responder.
//!
//! A single TCP stream carries `[u32 BE length][payload]` frames. Commands are
//! single characters; parameters, confirmations and stats are short text
//! frames.

mod codec;
mod stats;
mod types;
mod value;

#[cfg(test)]
mod tests;

pub use codec::{Confirmation, FrameChannel, encode_frame, read_frame, write_frame};
pub(crate) use codec::is_disconnect;
pub use stats::{CameraStats, Resolution, StatsReport};
pub use types::{
    CommandCode, HEADER_SIZE, LOAD_HINT, STATS_FRAMES, STOP_TOKEN, STREAM_CHUNK, Span, TRIGGER_QUIT_TOKEN,
    TRIGGER_TOKEN, TriggerEvent,
};
pub use value::{Rational, format_number, parse_decimal};
