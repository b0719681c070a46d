//! The single control panel: command buttons, the open prompt, stats and log.

use eframe::egui::{self, Color32, Key, RichText, ScrollArea, TextEdit, Ui};
use egui_phosphor::regular::{
    APERTURE, BROADCAST, CAMERA, CIRCLE_HALF, CROSSHAIR, DROP, GAUGE, LIGHTNING, LIST_BULLETS, PAPER_PLANE_TILT,
    PLUGS, QUESTION, SLIDERS, STOP, SUN, TIMER, TRASH, VIDEO_CAMERA, WAVEFORM, X,
};

use super::app::{ControlApp, LogLevel, Pending};
use super::components::{button_with_icon, colors, panel_header, primary_button_with_icon, section};
use crate::protocol::{CommandCode, StatsReport, TriggerEvent};

/// Button groups in display order.
const GROUPS: [(&str, &[(CommandCode, &str, &str)]); 4] = [
    (
        "Camera settings",
        &[
            (CommandCode::Brightness, SUN, "Brightness"),
            (CommandCode::Contrast, CIRCLE_HALF, "Contrast"),
            (CommandCode::Framerate, GAUGE, "Framerate"),
            (CommandCode::Gain, APERTURE, "Gain"),
            (CommandCode::Sharpness, CROSSHAIR, "Sharpness"),
            (CommandCode::Saturation, DROP, "Saturation"),
            (CommandCode::Exposure, TIMER, "Exposure"),
            (CommandCode::Resolution, SLIDERS, "Resolution"),
        ],
    ),
    (
        "Capture",
        &[
            (CommandCode::Image, CAMERA, "Image"),
            (CommandCode::Video, VIDEO_CAMERA, "Video"),
            (CommandCode::Trigger, LIGHTNING, "Trigger capture"),
            (CommandCode::Settings, LIST_BULLETS, "Camera stats"),
        ],
    ),
    (
        "Streams",
        &[
            (CommandCode::NetworkStream, BROADCAST, "Network stream"),
            (CommandCode::DiffStream, WAVEFORM, "Frame difference"),
        ],
    ),
    (
        "ADC / DAC",
        &[
            (CommandCode::AdcRead, PLUGS, "Read ADC"),
            (CommandCode::DacWrite, PLUGS, "Write DAC"),
        ],
    ),
];

/// Show the control panel.
pub fn show(app: &mut ControlApp, ui: &mut Ui) {
    panel_header(ui, "PiCam Link");

    ui.columns(2, |columns| {
        show_commands(app, &mut columns[0]);
        show_activity(app, &mut columns[1]);
    });

    ui.add_space(12.0);
    show_log_viewer(app, ui);
}

fn show_commands(app: &mut ControlApp, ui: &mut Ui) {
    let idle = !app.is_busy();

    for (title, commands) in GROUPS {
        section(ui, title, |ui| {
            ui.horizontal_wrapped(|ui| {
                for &(code, icon, label) in commands {
                    if button_with_icon(ui, icon, label, idle)
                        .on_hover_text(format!("{code}: {}", code.description()))
                        .clicked()
                    {
                        app.run_command(code, ui.ctx());
                    }
                }
            });
        });
        ui.add_space(8.0);
    }

    ui.horizontal(|ui| {
        if button_with_icon(ui, QUESTION, "Help", idle).clicked() {
            app.run_command(CommandCode::Help, ui.ctx());
        }
        if button_with_icon(ui, X, "Quit session", idle).clicked() {
            app.run_command(CommandCode::Quit, ui.ctx());
        }
    });
}

fn show_activity(app: &mut ControlApp, ui: &mut Ui) {
    section(ui, "Current command", |ui| {
        match app.running {
            Some(code) => {
                ui.horizontal(|ui| {
                    ui.spinner();
                    ui.label(code.description());
                });
                if code.is_long_running()
                    && app.cancel.is_armed()
                    && primary_button_with_icon(ui, STOP, "Stop", true).clicked()
                {
                    app.stop();
                }
            }
            None => {
                ui.label(RichText::new("Idle").color(colors::NEUTRAL));
            }
        }

        ui.add_space(8.0);
        show_pending(app, ui);
    });

    ui.add_space(8.0);
    section(ui, "Camera stats", |ui| match &app.last_stats {
        Some((received, stats)) => {
            ui.label(RichText::new(format!("As of {}", received.format("%H:%M:%S"))).weak());
            stats_grid(ui, stats);
        }
        None => {
            ui.label(RichText::new("No stats yet").weak());
        }
    });
}

fn show_pending(app: &mut ControlApp, ui: &mut Ui) {
    let mut submit = false;
    let mut abandon = false;
    let mut event = None;

    match &mut app.pending {
        Pending::Nothing => {}
        Pending::Parameter { prompt, input } => {
            ui.label(prompt.to_string());
            ui.horizontal(|ui| {
                let response = ui.add(TextEdit::singleline(input).hint_text(prompt.default.as_str()));
                response.request_focus();
                if response.lost_focus() && ui.input(|i| i.key_pressed(Key::Enter)) {
                    submit = true;
                }
                if primary_button_with_icon(ui, PAPER_PLANE_TILT, "Send", true).clicked() {
                    submit = true;
                }
                if button_with_icon(ui, X, "Cancel", true).clicked() {
                    abandon = true;
                }
            });
        }
        Pending::Trigger { fired } => {
            ui.label(format!("{fired} triggers fired"));
            ui.horizontal(|ui| {
                if primary_button_with_icon(ui, LIGHTNING, "Trigger", true).clicked() {
                    event = Some(TriggerEvent::Trigger);
                }
                if button_with_icon(ui, STOP, "Finish", true).clicked() {
                    event = Some(TriggerEvent::Quit);
                }
            });
        }
    }

    if submit {
        app.submit_parameter();
    } else if abandon {
        app.abandon_prompt();
    } else if let Some(event) = event {
        app.trigger(event);
    }
}

fn stats_grid(ui: &mut Ui, stats: &StatsReport) {
    egui::Grid::new("stats_grid")
        .num_columns(2)
        .spacing([20.0, 4.0])
        .show(ui, |ui| {
            for (label, value) in stats.rows() {
                ui.label(label);
                ui.label(value);
                ui.end_row();
            }
        });
}

fn show_log_viewer(app: &mut ControlApp, ui: &mut Ui) {
    section(ui, "Log", |ui| {
        ui.horizontal(|ui| {
            ui.label(RichText::new(format!("{} entries", app.log_messages.len())).weak());
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if button_with_icon(ui, TRASH, "Clear", true).clicked() {
                    app.clear_log();
                }
            });
        });

        ScrollArea::vertical()
            .max_height(240.0)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                ui.set_width(ui.available_width());

                if app.log_messages.is_empty() {
                    ui.label(RichText::new("No log entries").weak());
                }
                for entry in &app.log_messages {
                    let color = match entry.level {
                        LogLevel::Info => Color32::GRAY,
                        LogLevel::Success => colors::SUCCESS,
                        LogLevel::Warning => colors::WARNING,
                        LogLevel::Error => colors::ERROR,
                    };
                    let formatted = format!("[{}] {}", entry.timestamp.format("%H:%M:%S"), entry.message);
                    ui.add(egui::Label::new(RichText::new(formatted).color(color)).wrap());
                }
            });
    });
}
