//! Bridge between the blocking command worker and the egui thread.
//!
//! The worker reports through a tokio channel the UI drains every frame,
//! and blocks on a std channel for the user's answers.

use std::sync::mpsc as std_mpsc;

use eframe::egui;
use tokio::sync::mpsc;

use crate::cancel::CancelToken;
use crate::controller::{CommandOutcome, InputOutputChannel};
use crate::error::{AppError, Result};
use crate::negotiation::Prompt;
use crate::protocol::{CommandCode, StatsReport, TriggerEvent};

/// Messages from the command worker to the UI.
#[derive(Debug)]
pub enum UiMessage {
    Status(String),
    Error(String),
    Stats(StatsReport),
    Prompt(Prompt),
    AwaitTrigger,
    Finished(CommandCode, CommandOutcome),
}

/// Answers from the UI to a waiting worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Value(String),
    Trigger(TriggerEvent),
    /// Window closed or the user backed out of the prompt.
    Abandon,
}

pub struct GuiChannel {
    tx: mpsc::UnboundedSender<UiMessage>,
    replies: std_mpsc::Receiver<Reply>,
    cancel: CancelToken,
    ctx: egui::Context,
}

impl GuiChannel {
    pub fn new(
        tx: mpsc::UnboundedSender<UiMessage>,
        replies: std_mpsc::Receiver<Reply>,
        cancel: CancelToken,
        ctx: egui::Context,
    ) -> Self {
        Self {
            tx,
            replies,
            cancel,
            ctx,
        }
    }

    fn post(&self, message: UiMessage) {
        let _ = self.tx.send(message);
        self.ctx.request_repaint();
    }
}

impl InputOutputChannel for GuiChannel {
    fn ask_parameter(&mut self, prompt: &Prompt) -> Result<String> {
        self.post(UiMessage::Prompt(prompt.clone()));
        match self.replies.recv() {
            Ok(Reply::Value(value)) => Ok(value),
            Ok(_) | Err(_) => Err(AppError::Cancelled),
        }
    }

    fn report_status(&mut self, message: &str) {
        self.post(UiMessage::Status(message.to_string()));
    }

    fn report_error(&mut self, message: &str) {
        self.post(UiMessage::Error(message.to_string()));
    }

    fn report_stats(&mut self, stats: &StatsReport) {
        self.post(UiMessage::Stats(stats.clone()));
    }

    fn next_trigger(&mut self) -> Result<TriggerEvent> {
        self.post(UiMessage::AwaitTrigger);
        match self.replies.recv() {
            Ok(Reply::Trigger(event)) => Ok(event),
            // Finishing still drains the pipeline on the responder
            Ok(_) | Err(_) => Ok(TriggerEvent::Quit),
        }
    }

    fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}
