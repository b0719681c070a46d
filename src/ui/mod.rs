//! GUI front end for the controller.

pub mod app;
mod channel;
pub mod components;
mod control_panel;

pub use app::ControlApp;
pub use channel::{GuiChannel, Reply, UiMessage};
