//! GUI controller state.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local};
use eframe::egui;
use tokio::sync::mpsc;
use tracing::info;

use crate::cancel::CancelToken;
use crate::config::AppConfig;
use crate::controller::{CommandOutcome, Controller};
use crate::negotiation::Prompt;
use crate::protocol::{CommandCode, StatsReport, TriggerEvent};

use super::channel::{GuiChannel, Reply, UiMessage};
use super::control_panel;

/// Keep only this many log lines.
const LOG_LIMIT: usize = 200;

/// Log level for UI messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Log entry for display in the UI.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
    pub level: LogLevel,
}

/// What the worker is waiting on the user for.
#[derive(Debug, Clone, Default)]
pub enum Pending {
    #[default]
    Nothing,
    Parameter { prompt: Prompt, input: String },
    Trigger { fired: usize },
}

/// Main application state.
pub struct ControlApp {
    pub rt: tokio::runtime::Runtime,
    pub config: AppConfig,
    controller: Arc<Mutex<Controller>>,

    // Worker messages
    tx: mpsc::UnboundedSender<UiMessage>,
    rx: mpsc::UnboundedReceiver<UiMessage>,
    replies: Option<std_mpsc::Sender<Reply>>,

    pub cancel: CancelToken,
    pub running: Option<CommandCode>,
    pub pending: Pending,
    pub last_stats: Option<(DateTime<Local>, StatsReport)>,
    pub log_messages: Vec<LogEntry>,
}

impl ControlApp {
    pub fn new(config: AppConfig, rt: tokio::runtime::Runtime) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Arc::new(Mutex::new(Controller::from_config(&config)));

        let mut app = Self {
            rt,
            config,
            controller,
            tx,
            rx,
            replies: None,
            cancel: CancelToken::new(),
            running: None,
            pending: Pending::Nothing,
            last_stats: None,
            log_messages: Vec::new(),
        };
        let endpoint = app.config.controller_endpoint();
        app.log_info(format!("Ready, will {endpoint}"));
        app
    }

    /// Log a message to the UI log.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.log_messages.push(LogEntry {
            timestamp: Local::now(),
            message: message.into(),
            level,
        });
        if self.log_messages.len() > LOG_LIMIT {
            self.log_messages.remove(0);
        }
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn clear_log(&mut self) {
        self.log_messages.clear();
    }

    pub fn is_busy(&self) -> bool {
        self.running.is_some()
    }

    /// Start `code` on the blocking worker pool.
    pub fn run_command(&mut self, code: CommandCode, ctx: &egui::Context) {
        if self.is_busy() {
            return;
        }
        let (reply_tx, reply_rx) = std_mpsc::channel();
        let mut channel = GuiChannel::new(self.tx.clone(), reply_rx, self.cancel.clone(), ctx.clone());
        let controller = Arc::clone(&self.controller);
        let tx = self.tx.clone();

        self.replies = Some(reply_tx);
        self.running = Some(code);
        self.log_info(format!("{code}: {}", code.description()));

        self.rt.spawn_blocking(move || {
            let mut controller = controller.lock().unwrap_or_else(PoisonError::into_inner);
            let outcome = controller.run(code, &mut channel);
            let _ = tx.send(UiMessage::Finished(code, outcome));
        });
    }

    /// Answer the open parameter prompt.
    pub fn submit_parameter(&mut self) {
        if let Pending::Parameter { input, .. } = std::mem::take(&mut self.pending) {
            self.reply(Reply::Value(input));
        }
    }

    pub fn abandon_prompt(&mut self) {
        self.pending = Pending::Nothing;
        self.reply(Reply::Abandon);
    }

    pub fn trigger(&mut self, event: TriggerEvent) {
        if let Pending::Trigger { fired } = &mut self.pending {
            if event == TriggerEvent::Trigger {
                *fired += 1;
            }
            self.reply(Reply::Trigger(event));
        }
    }

    /// Ask the running long operation to stop.
    pub fn stop(&mut self) {
        if self.cancel.is_armed() {
            self.cancel.cancel();
            self.log(LogLevel::Warning, "Stop requested");
        }
    }

    fn reply(&mut self, reply: Reply) {
        if let Some(replies) = &self.replies {
            let _ = replies.send(reply);
        }
    }

    /// Drain worker messages.
    pub fn process_messages(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            match message {
                UiMessage::Status(text) => self.log_info(text),
                UiMessage::Error(text) => self.log_error(text),
                UiMessage::Stats(stats) => self.last_stats = Some((Local::now(), stats)),
                UiMessage::Prompt(prompt) => {
                    self.pending = Pending::Parameter {
                        prompt,
                        input: String::new(),
                    };
                }
                UiMessage::AwaitTrigger => {
                    let fired = match self.pending {
                        Pending::Trigger { fired } => fired,
                        _ => 0,
                    };
                    self.pending = Pending::Trigger { fired };
                }
                UiMessage::Finished(code, outcome) => self.finish(code, outcome),
            }
        }
    }

    fn finish(&mut self, code: CommandCode, outcome: CommandOutcome) {
        info!(%code, ?outcome, "Command finished");
        self.running = None;
        self.pending = Pending::Nothing;
        self.replies = None;
        match outcome {
            CommandOutcome::Completed => self.log(LogLevel::Success, format!("{code} done")),
            CommandOutcome::Reconnected => self.log(LogLevel::Success, format!("{code} done, connection reopened")),
            CommandOutcome::Quit => self.log(LogLevel::Warning, "Session closed"),
            CommandOutcome::Failed(_) => self.log(LogLevel::Warning, format!("{code} failed")),
        }
    }
}

impl eframe::App for ControlApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_messages();

        // Long operations report progress without user input
        if self.is_busy() {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }

        egui::CentralPanel::default().show(ctx, |ui| control_panel::show(self, ui));
    }
}

impl Drop for ControlApp {
    /// Release a worker blocked on the user so the runtime can shut down.
    fn drop(&mut self) {
        self.cancel.cancel();
        self.reply(Reply::Abandon);
    }
}
