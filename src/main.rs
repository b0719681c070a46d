//! PiCam Link - remote control of a Raspberry Pi camera and ADC/DAC board.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use eframe::egui;
use picam_link as app;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use app::cancel::CancelToken;
use app::config::{AppConfig, ConfigLoadResult, LoggingConfig};
use app::controller::{Controller, Palette, TerminalChannel, install_interrupt_handler};
use app::responder::ResponderServer;
use app::ui::ControlApp;

/// Remote control of a Raspberry Pi camera and ADC/DAC board.
#[derive(Parser)]
#[command(name = "picam-link", version)]
struct Cli {
    /// Use config.toml from current directory (dev mode)
    #[arg(long)]
    dev: bool,

    /// Config file to use instead of the default location
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Responder host, overriding the config file
    #[arg(long)]
    host: Option<String>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Clone, Copy)]
enum Mode {
    /// Serve commands on the Pi
    Respond,
    /// Interactive terminal controller (default)
    Control {
        /// Disable ANSI colors
        #[arg(long)]
        no_color: bool,
    },
    /// Graphical controller
    Gui,
    /// Write a default config file and exit
    InitConfig,
}

impl Mode {
    /// Log level unless `RUST_LOG` says otherwise.
    fn default_level(self) -> tracing::Level {
        match self {
            // Keep the terminal prompt readable
            Mode::Control { .. } => tracing::Level::WARN,
            _ => tracing::Level::INFO,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mode = cli.mode.unwrap_or(Mode::Control { no_color: false });

    let config_path = match (&cli.config, cli.dev) {
        (Some(path), _) => path.clone(),
        (None, true) => PathBuf::from("config.toml"),
        (None, false) => AppConfig::default_path(),
    };

    if let Mode::InitConfig = mode {
        return init_config(&config_path);
    }

    let (mut config, load_note) = match AppConfig::try_load(&config_path) {
        ConfigLoadResult::Loaded(config) => (config, "Config loaded successfully"),
        ConfigLoadResult::Missing => (AppConfig::default(), "Config missing, using defaults"),
        ConfigLoadResult::Invalid(e) => bail!("Config {} is invalid: {e}", config_path.display()),
    };
    if let Some(host) = cli.host {
        config.network.host = host;
    }

    let _log_guard = init_logging(&config.logging, mode.default_level())?;
    tracing::info!("PiCam Link {} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("Config path: {:?} ({load_note})", config_path);

    match mode {
        Mode::Respond => run_responder(&config),
        Mode::Control { no_color } => run_terminal(&config, no_color),
        Mode::Gui => run_gui(config),
        Mode::InitConfig => Ok(()),
    }
}

/// Console logging, or a daily rolling file when a log directory is set.
fn init_logging(config: &LoggingConfig, level: tracing::Level) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)
                .with_context(|| format!("Cannot create log directory {}", directory.display()))?;
            let appender = tracing_appender::rolling::daily(directory, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn init_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    AppConfig::default().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn run_responder(config: &AppConfig) -> anyhow::Result<()> {
    let mut server = ResponderServer::from_config(config);
    server.run().context("Responder stopped")
}

fn run_terminal(config: &AppConfig, no_color: bool) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let cancel = CancelToken::new();
    install_interrupt_handler(rt.handle(), cancel.clone());

    let palette = Palette::new(config.controller.color && !no_color);
    let mut io = TerminalChannel::new(palette, cancel);
    let mut controller = Controller::from_config(config);
    controller.run_terminal(&mut io)?;
    Ok(())
}

fn run_gui(config: AppConfig) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("PiCam Link")
            .with_inner_size([1000.0, 760.0])
            .with_min_inner_size([800.0, 600.0]),
        ..Default::default()
    };

    eframe::run_native(
        "PiCam Link",
        options,
        Box::new(|cc| {
            let mut fonts = egui::FontDefinitions::default();
            egui_phosphor::add_to_fonts(&mut fonts, egui_phosphor::Variant::Regular);
            cc.egui_ctx.set_fonts(fonts);
            Ok(Box::new(ControlApp::new(config, rt)))
        }),
    )
    .map_err(|e| anyhow::anyhow!("GUI failed: {e}"))
}
