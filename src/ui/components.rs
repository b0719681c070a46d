//! Shared UI components.

use eframe::egui::{self, Button, Color32, Response, RichText, Ui};

/// Status indicator colors.
pub mod colors {
    use super::Color32;

    pub const SUCCESS: Color32 = Color32::from_rgb(100, 200, 100);
    pub const ERROR: Color32 = Color32::from_rgb(255, 100, 100);
    pub const WARNING: Color32 = Color32::from_rgb(255, 200, 100);
    pub const NEUTRAL: Color32 = Color32::from_rgb(150, 150, 150);
}

/// Render a panel header with title.
pub fn panel_header(ui: &mut Ui, title: &str) {
    ui.heading(RichText::new(title).size(24.0));
    ui.add_space(10.0);
    ui.separator();
    ui.add_space(10.0);
}

/// Rounded frame with a bold caption.
pub fn section<R>(ui: &mut Ui, title: &str, add_contents: impl FnOnce(&mut Ui) -> R) -> R {
    egui::Frame::new()
        .fill(ui.style().visuals.extreme_bg_color)
        .inner_margin(egui::Margin::same(12))
        .corner_radius(egui::CornerRadius::same(8))
        .show(ui, |ui| {
            ui.label(RichText::new(title).strong());
            ui.add_space(8.0);
            add_contents(ui)
        })
        .inner
}

/// Button with a phosphor icon in front of the text.
pub fn button_with_icon(ui: &mut Ui, icon: &str, text: &str, enabled: bool) -> Response {
    ui.add_enabled(enabled, Button::new(format!("{icon}  {text}")).min_size(egui::vec2(150.0, 28.0)))
}

/// Filled button for the main action of a group.
pub fn primary_button_with_icon(ui: &mut Ui, icon: &str, text: &str, enabled: bool) -> Response {
    let button = Button::new(RichText::new(format!("{icon}  {text}")).color(Color32::WHITE))
        .fill(Color32::from_rgb(40, 110, 190))
        .min_size(egui::vec2(120.0, 28.0));
    ui.add_enabled(enabled, button)
}
