//! Configuration management module.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::link::Endpoint;
use crate::negotiation::{FileKind, ParameterDescriptor, validate_filename};

/// Configuration load result.
#[derive(Debug)]
pub enum ConfigLoadResult {
    /// Config loaded successfully.
    Loaded(AppConfig),
    /// Config file missing (first run).
    Missing,
    /// Config file exists but invalid.
    Invalid(ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub responder: ResponderConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Whether an endpoint accepts or opens the command connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Listen,
    Connect,
}

/// Ports and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address of the peer for the connecting side.
    pub host: String,
    #[serde(default = "default_command_port")]
    pub command_port: u16,
    /// Secondary transport for frame-difference streaming.
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,
    /// Port used by the file copy tool.
    #[serde(default = "default_transfer_port")]
    pub transfer_port: u16,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    /// Controller-side read timeout (off by default).
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_command_port() -> u16 {
    8000
}

fn default_stream_port() -> u16 {
    8001
}

fn default_transfer_port() -> u16 {
    8002
}

fn default_retry_delay_ms() -> u64 {
    2000
}

/// Host-side settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_controller_role")]
    pub role: Role,
    /// Where transferred files land. Empty uses the user's download folder.
    #[serde(default)]
    pub download_dir: PathBuf,
    #[serde(default = "default_player_command")]
    pub player_command: Vec<String>,
    /// Pause before the receiving copy tool starts.
    #[serde(default = "default_transfer_start_delay_ms")]
    pub transfer_start_delay_ms: u64,
    /// ANSI colors in terminal mode.
    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_controller_role() -> Role {
    Role::Connect
}

fn default_player_command() -> Vec<String> {
    ["vlc", "--demux", "h264", "-"].map(String::from).to_vec()
}

fn default_transfer_start_delay_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

/// Camera driver selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    Simulated,
    Raspicam,
}

/// Pi-side settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponderConfig {
    #[serde(default = "default_responder_role")]
    pub role: Role,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Where captures are written before transfer.
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
    #[serde(default = "default_camera_backend")]
    pub camera: CameraBackend,
    /// Captures in flight before a trigger image is delivered.
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: usize,
    #[serde(default = "default_image_filename")]
    pub image_filename: String,
    #[serde(default = "default_video_filename")]
    pub video_filename: String,
    #[serde(default = "default_trigger_filename")]
    pub trigger_filename: String,
}

fn default_responder_role() -> Role {
    Role::Listen
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("media")
}

fn default_camera_backend() -> CameraBackend {
    CameraBackend::Simulated
}

fn default_pipeline_depth() -> usize {
    2
}

fn default_image_filename() -> String {
    "image.jpg".to_string()
}

fn default_video_filename() -> String {
    "video.h264".to_string()
}

fn default_trigger_filename() -> String {
    "shot.jpg".to_string()
}

/// External copy tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub enabled: bool,
    #[serde(default = "default_transfer_program")]
    pub program: String,
}

fn default_transfer_program() -> String {
    "nc".to_string()
}

/// Inclusive integer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: i64,
    pub max: i64,
}

impl Bounds {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Offer with the given live value as default.
    pub fn descriptor(&self, default: i64) -> ParameterDescriptor {
        ParameterDescriptor::new(default as f64, self.min as f64, self.max as f64)
    }
}

/// Parameter ranges offered to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub duration_default_secs: u64,
    pub duration_min_secs: u64,
    /// Absent means unbounded (offered as `inf`).
    pub duration_max_secs: Option<u64>,
    pub brightness: Bounds,
    pub contrast: Bounds,
    pub sharpness: Bounds,
    pub saturation: Bounds,
    /// ISO
    pub gain: Bounds,
    pub width: Bounds,
    pub height: Bounds,
    pub framerate: Bounds,
    /// Microseconds
    pub exposure: Bounds,
    pub dac_millivolts: Bounds,
}

fn default_duration_secs() -> u64 {
    10
}

impl LimitsConfig {
    /// Offer for a duration parameter.
    pub fn duration_descriptor(&self) -> ParameterDescriptor {
        ParameterDescriptor::new(
            self.duration_default_secs as f64,
            self.duration_min_secs as f64,
            self.duration_max_secs.map_or(f64::INFINITY, |max| max as f64),
        )
    }

    fn ranges(&self) -> [(&'static str, Bounds); 10] {
        [
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("sharpness", self.sharpness),
            ("saturation", self.saturation),
            ("gain", self.gain),
            ("width", self.width),
            ("height", self.height),
            ("framerate", self.framerate),
            ("exposure", self.exposure),
            ("dac_millivolts", self.dac_millivolts),
        ]
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Daily rolling log files go here when set.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
}

fn default_log_prefix() -> String {
    "picam-link.log".to_string()
}

impl AppConfig {
    /// Get config file path (same directory as executable).
    pub fn default_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Attempt to load config with detailed result.
    pub fn try_load(path: &Path) -> ConfigLoadResult {
        if !path.exists() {
            return ConfigLoadResult::Missing;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AppConfig>(&content) {
                Ok(config) => match config.validate() {
                    Ok(()) => ConfigLoadResult::Loaded(config),
                    Err(e) => ConfigLoadResult::Invalid(e),
                },
                Err(e) => ConfigLoadResult::Invalid(ConfigError::Parse(e)),
            },
            Err(e) => ConfigLoadResult::Invalid(ConfigError::Read(e)),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let net = &self.network;
        if net.host.trim().is_empty() {
            return Err(ConfigError::Validation("Host cannot be empty".to_string()));
        }
        let ports = [net.command_port, net.stream_port, net.transfer_port];
        if ports.contains(&0) {
            return Err(ConfigError::Validation("Ports must be greater than 0".to_string()));
        }
        if ports[0] == ports[1] || ports[0] == ports[2] || ports[1] == ports[2] {
            return Err(ConfigError::Validation("Command, stream and transfer ports must differ".to_string()));
        }
        if net.connect_timeout_secs == Some(0) || net.read_timeout_secs == Some(0) {
            return Err(ConfigError::Validation("Timeouts must be at least 1 second".to_string()));
        }

        for (name, bounds) in self.limits.ranges() {
            if bounds.min > bounds.max {
                return Err(ConfigError::Validation(format!(
                    "Limit {name}: min {} exceeds max {}",
                    bounds.min, bounds.max
                )));
            }
        }
        if self.limits.width.min < 1 || self.limits.height.min < 1 || self.limits.framerate.min < 1 {
            return Err(ConfigError::Validation(
                "Resolution and framerate limits must be positive".to_string(),
            ));
        }
        if self.limits.dac_millivolts.min < 0 {
            return Err(ConfigError::Validation("DAC voltage cannot be negative".to_string()));
        }
        if self
            .limits
            .duration_max_secs
            .is_some_and(|max| max < self.limits.duration_min_secs)
        {
            return Err(ConfigError::Validation(
                "Maximum duration is below the minimum".to_string(),
            ));
        }
        let duration = self.limits.duration_descriptor();
        if (duration.default < duration.minimum) || (duration.default > duration.maximum) {
            return Err(ConfigError::Validation(
                "Default duration is outside the duration limits".to_string(),
            ));
        }

        if self.responder.pipeline_depth < 1 || self.responder.pipeline_depth > 16 {
            return Err(ConfigError::Validation("Pipeline depth must be between 1 and 16".to_string()));
        }
        if self.responder.bind_address.trim().is_empty() {
            return Err(ConfigError::Validation("Bind address cannot be empty".to_string()));
        }
        for (name, kind) in [
            (&self.responder.image_filename, FileKind::Image),
            (&self.responder.trigger_filename, FileKind::Image),
            (&self.responder.video_filename, FileKind::Video),
        ] {
            validate_filename(name, "", kind)
                .map_err(|e| ConfigError::Validation(format!("Default filename {name:?}: {e}")))?;
        }

        if self.controller.player_command.is_empty() {
            return Err(ConfigError::Validation("Player command cannot be empty".to_string()));
        }
        if self.transfer.enabled && self.transfer.program.trim().is_empty() {
            return Err(ConfigError::Validation("Transfer program cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Command endpoint as seen from the controller.
    pub fn controller_endpoint(&self) -> Endpoint {
        match self.controller.role {
            Role::Connect => Endpoint::Connect(format!("{}:{}", self.network.host, self.network.command_port)),
            Role::Listen => Endpoint::Listen(format!("0.0.0.0:{}", self.network.command_port)),
        }
    }

    /// Command endpoint as seen from the responder.
    pub fn responder_endpoint(&self) -> Endpoint {
        match self.responder.role {
            Role::Listen => Endpoint::Listen(format!("{}:{}", self.responder.bind_address, self.network.command_port)),
            Role::Connect => Endpoint::Connect(format!("{}:{}", self.network.host, self.network.command_port)),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl ControllerConfig {
    /// Resolved download directory.
    pub fn download_path(&self) -> PathBuf {
        if !self.download_dir.as_os_str().is_empty() {
            return self.download_dir.clone();
        }
        directories::UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(|dir| dir.join("picam-link")))
            .unwrap_or_else(|| PathBuf::from("downloads"))
    }

    pub fn transfer_start_delay(&self) -> Duration {
        Duration::from_millis(self.transfer_start_delay_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.1".to_string(),
            command_port: default_command_port(),
            stream_port: default_stream_port(),
            transfer_port: default_transfer_port(),
            connect_timeout_secs: Some(10),
            read_timeout_secs: None,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            role: default_controller_role(),
            download_dir: PathBuf::new(),
            player_command: default_player_command(),
            transfer_start_delay_ms: default_transfer_start_delay_ms(),
            color: true,
        }
    }
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            role: default_responder_role(),
            bind_address: default_bind_address(),
            media_dir: default_media_dir(),
            camera: default_camera_backend(),
            pipeline_depth: default_pipeline_depth(),
            image_filename: default_image_filename(),
            video_filename: default_video_filename(),
            trigger_filename: default_trigger_filename(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: default_transfer_program(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: default_log_prefix(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            brightness: Bounds::new(0, 100),
            contrast: Bounds::new(-100, 100),
            sharpness: Bounds::new(-100, 100),
            saturation: Bounds::new(-100, 100),
            gain: Bounds::new(0, 1600),
            width: Bounds::new(64, 3280),
            height: Bounds::new(64, 2464),
            framerate: Bounds::new(1, 90),
            exposure: Bounds::new(0, 6_000_000),
            duration_default_secs: default_duration_secs(),
            duration_min_secs: 0,
            duration_max_secs: None,
            dac_millivolts: Bounds::new(0, 2048),
        }
    }
}
