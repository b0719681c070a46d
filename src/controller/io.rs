//! How the controller talks to its user.
//!
//! Command scripts never print or read directly; they go through an
//! [`InputOutputChannel`], implemented by the terminal front end, the GUI
//! and the scripted channel used in tests.

use std::io::{BufRead, Write};

use tracing::warn;

use crate::cancel::CancelToken;
use crate::error::{AppError, Result};
use crate::negotiation::Prompt;
use crate::protocol::{StatsReport, TriggerEvent};

pub trait InputOutputChannel: Send {
    /// Ask for one parameter value. Empty input selects the default.
    fn ask_parameter(&mut self, prompt: &Prompt) -> Result<String>;

    fn report_status(&mut self, message: &str);

    fn report_error(&mut self, message: &str);

    fn report_stats(&mut self, stats: &StatsReport) {
        for (label, value) in stats.rows() {
            self.report_status(&format!("{label}: {value}"));
        }
    }

    /// Wait for the user to fire a trigger or end the session.
    fn next_trigger(&mut self) -> Result<TriggerEvent>;

    /// Token that stops the long-running operation in progress.
    fn cancel_token(&self) -> CancelToken;
}

/// ANSI colors for terminal output, or none.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    enabled: bool,
}

impl Palette {
    const RED: &'static str = "\x1b[31m";
    const GREEN: &'static str = "\x1b[32m";
    const YELLOW: &'static str = "\x1b[33m";
    const CYAN: &'static str = "\x1b[36m";
    const RESET: &'static str = "\x1b[0m";

    pub fn ansi() -> Self {
        Self { enabled: true }
    }

    pub fn plain() -> Self {
        Self { enabled: false }
    }

    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.enabled {
            format!("{color}{text}{}", Self::RESET)
        } else {
            text.to_string()
        }
    }

    pub fn error(&self, text: &str) -> String {
        self.paint(Self::RED, text)
    }

    pub fn success(&self, text: &str) -> String {
        self.paint(Self::GREEN, text)
    }

    pub fn warning(&self, text: &str) -> String {
        self.paint(Self::YELLOW, text)
    }

    pub fn prompt(&self, text: &str) -> String {
        self.paint(Self::CYAN, text)
    }
}

/// Line-based terminal front end over stdin/stdout.
pub struct TerminalChannel {
    palette: Palette,
    cancel: CancelToken,
}

impl TerminalChannel {
    pub fn new(palette: Palette, cancel: CancelToken) -> Self {
        Self { palette, cancel }
    }

    /// Read one line. End of input counts as cancellation.
    fn read_line(&self, prompt: &str) -> Result<String> {
        print!("{}", self.palette.prompt(prompt));
        std::io::stdout().flush()?;

        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(AppError::Cancelled);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Ask for the next command character.
    pub fn read_command(&self) -> Result<String> {
        self.read_line("Input camera command: ")
    }
}

impl InputOutputChannel for TerminalChannel {
    fn ask_parameter(&mut self, prompt: &Prompt) -> Result<String> {
        self.read_line(&format!("{prompt}: "))
    }

    fn report_status(&mut self, message: &str) {
        println!("{message}");
    }

    fn report_error(&mut self, message: &str) {
        println!("{}", self.palette.error(message));
    }

    fn next_trigger(&mut self) -> Result<TriggerEvent> {
        if self.cancel.is_cancelled() {
            return Ok(TriggerEvent::Quit);
        }
        let line = self.read_line("Enter to trigger, Q to finish: ")?;
        if self.cancel.is_cancelled() || line.trim().eq_ignore_ascii_case("q") {
            Ok(TriggerEvent::Quit)
        } else {
            Ok(TriggerEvent::Trigger)
        }
    }

    fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

/// Ctrl+C stops an armed long-running operation, otherwise exits.
pub fn install_interrupt_handler(runtime: &tokio::runtime::Handle, token: CancelToken) {
    runtime.spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl+C: {e}");
                return;
            }
            if token.is_armed() {
                token.cancel();
                println!();
            } else {
                std::process::exit(130);
            }
        }
    });
}

/// Replays canned answers and records everything reported.
#[cfg(test)]
pub(crate) struct ScriptedChannel {
    answers: std::collections::VecDeque<String>,
    triggers: std::collections::VecDeque<TriggerEvent>,
    pub prompts: Vec<Prompt>,
    pub statuses: Vec<String>,
    pub errors: Vec<String>,
    cancel: CancelToken,
}

#[cfg(test)]
impl ScriptedChannel {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            triggers: Default::default(),
            prompts: Vec::new(),
            statuses: Vec::new(),
            errors: Vec::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_triggers(mut self, triggers: impl IntoIterator<Item = TriggerEvent>) -> Self {
        self.triggers = triggers.into_iter().collect();
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[cfg(test)]
impl InputOutputChannel for ScriptedChannel {
    fn ask_parameter(&mut self, prompt: &Prompt) -> Result<String> {
        self.prompts.push(prompt.clone());
        self.answers.pop_front().ok_or(AppError::Cancelled)
    }

    fn report_status(&mut self, message: &str) {
        self.statuses.push(message.to_string());
    }

    fn report_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    fn next_trigger(&mut self) -> Result<TriggerEvent> {
        Ok(self.triggers.pop_front().unwrap_or(TriggerEvent::Quit))
    }

    fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}
