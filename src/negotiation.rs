//! Parameter negotiation shared by both endpoints.
//!
//! Integer parameters: the responder offers `default`, `minimum`, `maximum`;
//! the controller validates user input locally (re-prompting on failure),
//! sends the value, and waits for one confirmation. Filenames are the same
//! with a single default frame.

use std::io::{Read, Write};

use thiserror::Error;
use tracing::{debug, warn};

use crate::controller::InputOutputChannel;
use crate::error::Result;
use crate::protocol::{FrameChannel, format_number, parse_decimal};

/// Extensions the camera can encode stills to.
pub const IMAGE_EXTENSIONS: [&str; 10] = ["jpg", "jpeg", "png", "gif", "bmp", "yuv", "rgb", "rgba", "bgr", "bgra"];

/// Prefix of the responder's reply when its own re-check rejects a value.
pub const REJECTED_PREFIX: &str = "Rejected: ";

/// Locally rejected input. Never sent over the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Not a number")]
    NotANumber,

    #[error("Value is less than minimum")]
    BelowMinimum,

    #[error("Value is greater than maximum")]
    AboveMaximum,

    #[error("Filename is empty")]
    EmptyFilename,

    #[error("Filename must not contain a path")]
    PathInFilename,

    #[error("Filename has no extension")]
    MissingExtension,

    #[error("Unsupported image type .{0}")]
    UnsupportedExtension(String),
}

/// How an integer parameter is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Integer,
    /// Seconds; `inf` means no limit and maps to `i64::MAX`.
    Duration,
}

/// Offer for an integer parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterDescriptor {
    pub default: f64,
    pub minimum: f64,
    pub maximum: f64,
}

impl ParameterDescriptor {
    pub fn new(default: f64, minimum: f64, maximum: f64) -> Self {
        Self { default, minimum, maximum }
    }

    /// Wire form: default, minimum, maximum.
    pub fn to_frames(&self) -> [String; 3] {
        [
            format_number(self.default),
            format_number(self.minimum),
            format_number(self.maximum),
        ]
    }

    pub fn from_frames(default: &str, minimum: &str, maximum: &str) -> Result<Self> {
        Ok(Self {
            default: parse_decimal(default)?,
            minimum: parse_decimal(minimum)?,
            maximum: parse_decimal(maximum)?,
        })
    }

    /// Default rounded to the integer that is sent for empty input.
    pub fn default_value(&self) -> i64 {
        if self.default.is_infinite() && self.default > 0.0 {
            i64::MAX
        } else {
            self.default.round() as i64
        }
    }

    /// Check user input. Empty input selects the default.
    pub fn validate(&self, input: &str, kind: ParameterKind) -> std::result::Result<i64, ValidationError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(self.default_value());
        }
        if kind == ParameterKind::Duration && input.eq_ignore_ascii_case("inf") {
            return Ok(i64::MAX);
        }

        let value: i64 = input.parse().map_err(|_| ValidationError::NotANumber)?;
        if kind == ParameterKind::Duration && value == i64::MAX {
            return Ok(value);
        }
        if (value as f64) < self.minimum {
            Err(ValidationError::BelowMinimum)
        } else if (value as f64) > self.maximum {
            Err(ValidationError::AboveMaximum)
        } else {
            Ok(value)
        }
    }

    /// Prompt shown for this descriptor.
    pub fn prompt(&self, label: &str) -> Prompt {
        let [default, minimum, maximum] = self.to_frames();
        Prompt {
            label: label.to_string(),
            default,
            range: Some((minimum, maximum)),
        }
    }
}

/// What a filename parameter names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Video,
}

/// Check a filename offered by the user. Empty input selects `default`.
pub fn validate_filename(input: &str, default: &str, kind: FileKind) -> std::result::Result<String, ValidationError> {
    let name = input.trim();
    if name.is_empty() {
        if default.is_empty() {
            return Err(ValidationError::EmptyFilename);
        }
        return Ok(default.to_string());
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(ValidationError::PathInFilename);
    }

    let extension = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_ascii_lowercase(),
        _ if kind == FileKind::Video => return Ok(name.to_string()),
        _ => return Err(ValidationError::MissingExtension),
    };
    if kind == FileKind::Image && !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ValidationError::UnsupportedExtension(extension));
    }
    Ok(name.to_string())
}

/// A question put to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub label: String,
    pub default: String,
    /// Minimum and maximum, for integer parameters.
    pub range: Option<(String, String)>,
}

impl Prompt {
    pub fn text(label: &str, default: &str) -> Self {
        Self {
            label: label.to_string(),
            default: default.to_string(),
            range: None,
        }
    }
}

impl std::fmt::Display for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.range {
            Some((min, max)) => write!(f, "{} (Default: {}, Min: {min}, Max: {max})", self.label, self.default),
            None => write!(f, "{} (Default: {})", self.label, self.default),
        }
    }
}

/// Result of a completed negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiated<T> {
    /// Value applied; carries the responder's confirmation text.
    Accepted { value: T, confirmation: String },
    /// Responder's re-check refused the value; nothing was applied.
    Rejected(String),
}

impl<T> Negotiated<T> {
    fn from_reply(value: T, reply: String) -> Self {
        match reply.strip_prefix(REJECTED_PREFIX) {
            Some(reason) => Negotiated::Rejected(reason.to_string()),
            None => Negotiated::Accepted {
                value,
                confirmation: reply,
            },
        }
    }
}

// Controller side

/// Run an integer negotiation from the controller.
pub fn negotiate_integer<S: Read + Write>(
    channel: &mut FrameChannel<S>,
    io: &mut dyn InputOutputChannel,
    label: &str,
    kind: ParameterKind,
) -> Result<Negotiated<i64>> {
    let default = channel.expect_text("parameter default")?;
    let minimum = channel.expect_text("parameter minimum")?;
    let maximum = channel.expect_text("parameter maximum")?;
    let descriptor = ParameterDescriptor::from_frames(&default, &minimum, &maximum)?;
    debug!(label, ?descriptor, "Negotiating integer");

    let prompt = descriptor.prompt(label);
    let value = loop {
        let input = io.ask_parameter(&prompt)?;
        match descriptor.validate(&input, kind) {
            Ok(value) => break value,
            Err(e) => io.report_error(&e.to_string()),
        }
    };

    channel.send_text(&value.to_string())?;
    let reply = channel.confirmation(label)?.into_result()?;
    Ok(Negotiated::from_reply(value, reply))
}

/// Run a filename negotiation from the controller.
pub fn negotiate_filename<S: Read + Write>(
    channel: &mut FrameChannel<S>,
    io: &mut dyn InputOutputChannel,
    label: &str,
    kind: FileKind,
) -> Result<Negotiated<String>> {
    let default = channel.expect_text("filename default")?;
    let prompt = Prompt::text(label, &default);

    let name = loop {
        let input = io.ask_parameter(&prompt)?;
        match validate_filename(&input, &default, kind) {
            Ok(name) => break name,
            Err(e) => io.report_error(&e.to_string()),
        }
    };

    channel.send_text(&name)?;
    let reply = channel.confirmation(label)?.into_result()?;
    Ok(Negotiated::from_reply(name, reply))
}

// Responder side

/// Offer an integer parameter and apply the value the controller picks.
///
/// `apply` runs only for values that pass the re-check and returns the
/// confirmation text. Returns `None` when the value was rejected.
pub fn offer_integer<S, F>(
    channel: &mut FrameChannel<S>,
    descriptor: &ParameterDescriptor,
    kind: ParameterKind,
    apply: F,
) -> Result<Option<i64>>
where
    S: Read + Write,
    F: FnOnce(i64) -> Result<String>,
{
    for frame in descriptor.to_frames() {
        channel.send_text(&frame)?;
    }

    let input = channel.expect_text("parameter value")?;
    match descriptor.validate(&input, kind) {
        Ok(value) => {
            let confirmation = apply(value)?;
            channel.send_text(&confirmation)?;
            Ok(Some(value))
        }
        Err(e) => {
            warn!("Rejecting parameter value {input:?}: {e}");
            channel.send_text(&format!("{REJECTED_PREFIX}{e}"))?;
            Ok(None)
        }
    }
}

/// Offer a filename parameter. See [`offer_integer`].
pub fn offer_filename<S, F>(channel: &mut FrameChannel<S>, default: &str, kind: FileKind, apply: F) -> Result<Option<String>>
where
    S: Read + Write,
    F: FnOnce(&str) -> Result<String>,
{
    channel.send_text(default)?;

    let input = channel.expect_text("filename")?;
    match validate_filename(&input, default, kind) {
        Ok(name) => {
            let confirmation = apply(&name)?;
            channel.send_text(&confirmation)?;
            Ok(Some(name))
        }
        Err(e) => {
            warn!("Rejecting filename {input:?}: {e}");
            channel.send_text(&format!("{REJECTED_PREFIX}{e}"))?;
            Ok(None)
        }
    }
}
