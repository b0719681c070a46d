//! Command vocabulary and protocol constants.

/// Length prefix size (u32, big-endian).
pub const HEADER_SIZE: usize = 4;

/// Chunk size for raw video relayed on the command stream.
pub const STREAM_CHUNK: usize = 1024;

/// Sentinel sent by the controller to end an open-ended operation.
pub const STOP_TOKEN: &str = "Stop";

/// Trigger-session tokens.
pub const TRIGGER_TOKEN: &str = "T";
pub const TRIGGER_QUIT_TOKEN: &str = "Q";

/// Number of frames in a stats block.
pub const STATS_FRAMES: usize = 9;

/// Hint shown whenever a command goes unconfirmed.
pub const LOAD_HINT: &str = "Command failed, consider lowering the resolution or framerate";

/// Single-character command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    AdcRead,
    Brightness,
    Contrast,
    DacWrite,
    Framerate,
    Gain,
    Help,
    Image,
    NetworkStream,
    DiffStream,
    Settings,
    Quit,
    Resolution,
    Sharpness,
    Trigger,
    Saturation,
    Video,
    Exposure,
}

impl CommandCode {
    /// Every command, in help-listing order.
    pub const ALL: [CommandCode; 18] = [
        CommandCode::AdcRead,
        CommandCode::Brightness,
        CommandCode::Contrast,
        CommandCode::DacWrite,
        CommandCode::Framerate,
        CommandCode::Gain,
        CommandCode::Help,
        CommandCode::Image,
        CommandCode::NetworkStream,
        CommandCode::DiffStream,
        CommandCode::Settings,
        CommandCode::Quit,
        CommandCode::Resolution,
        CommandCode::Sharpness,
        CommandCode::Trigger,
        CommandCode::Saturation,
        CommandCode::Video,
        CommandCode::Exposure,
    ];

    /// Wire character.
    pub fn code(self) -> char {
        match self {
            CommandCode::AdcRead => 'A',
            CommandCode::Brightness => 'B',
            CommandCode::Contrast => 'C',
            CommandCode::DacWrite => 'D',
            CommandCode::Framerate => 'F',
            CommandCode::Gain => 'G',
            CommandCode::Help => 'H',
            CommandCode::Image => 'I',
            CommandCode::NetworkStream => 'N',
            CommandCode::DiffStream => 'O',
            CommandCode::Settings => 'P',
            CommandCode::Quit => 'Q',
            CommandCode::Resolution => 'R',
            CommandCode::Sharpness => 'S',
            CommandCode::Trigger => 'T',
            CommandCode::Saturation => 'U',
            CommandCode::Video => 'V',
            CommandCode::Exposure => 'X',
        }
    }

    /// Look up a code character. Codes are upper case.
    pub fn from_char(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.code() == c)
    }

    /// Decode a command frame. Only the exact code character matches.
    pub fn from_frame(payload: &str) -> Option<Self> {
        let mut chars = payload.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => None,
        }
    }

    /// Parse a typed command; surrounding blanks and case are ignored.
    pub fn parse(input: &str) -> Option<Self> {
        Self::from_frame(&input.trim().to_ascii_uppercase())
    }

    /// Wire payload for this command.
    pub fn as_frame(self) -> String {
        self.code().to_string()
    }

    /// Help text.
    pub fn description(self) -> &'static str {
        match self {
            CommandCode::AdcRead => "Read ADC voltage",
            CommandCode::Brightness => "Set brightness",
            CommandCode::Contrast => "Set contrast",
            CommandCode::DacWrite => "Set DAC voltage",
            CommandCode::Framerate => "Set framerate",
            CommandCode::Gain => "Set gain",
            CommandCode::Help => "Help",
            CommandCode::Image => "Capture an image",
            CommandCode::NetworkStream => "Stream to network player",
            CommandCode::DiffStream => "Stream with frame-difference processing",
            CommandCode::Settings => "Print current settings",
            CommandCode::Quit => "Quit program",
            CommandCode::Resolution => "Set resolution",
            CommandCode::Sharpness => "Set sharpness",
            CommandCode::Trigger => "Capture via trigger",
            CommandCode::Saturation => "Set saturation",
            CommandCode::Video => "Capture a video",
            CommandCode::Exposure => "Set exposure time",
        }
    }

    /// Commands handled entirely on the controller.
    pub fn is_local(self) -> bool {
        matches!(self, CommandCode::Help)
    }

    /// Commands whose duration is open-ended.
    pub fn is_long_running(self) -> bool {
        matches!(
            self,
            CommandCode::NetworkStream | CommandCode::DiffStream | CommandCode::Video | CommandCode::Trigger
        )
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Requested length of an open-ended operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    Finite(std::time::Duration),
    Indefinite,
}

impl Span {
    /// Interpret a negotiated duration in seconds; `i64::MAX` means no limit.
    pub fn from_secs(secs: i64) -> Self {
        if secs == i64::MAX {
            Span::Indefinite
        } else {
            Span::Finite(std::time::Duration::from_secs(secs.max(0) as u64))
        }
    }

    /// Whether the span has run out since `started`.
    pub fn expired(&self, started: std::time::Instant) -> bool {
        match self {
            Span::Finite(limit) => started.elapsed() >= *limit,
            Span::Indefinite => false,
        }
    }
}

/// Controller-side trigger input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    Trigger,
    Quit,
}

impl TriggerEvent {
    pub fn token(self) -> &'static str {
        match self {
            TriggerEvent::Trigger => TRIGGER_TOKEN,
            TriggerEvent::Quit => TRIGGER_QUIT_TOKEN,
        }
    }
}
