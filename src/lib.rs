pub mod cancel;
pub mod config;
pub mod controller;
pub mod error;
pub mod hardware;
pub mod link;
pub mod negotiation;
pub mod protocol;
pub mod responder;
pub mod transfer;
pub mod ui;

pub use error::{AppError, Result};
