#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod comments;
pub mod config;
pub mod data;
pub mod library;
pub mod logging;
pub mod media;
pub mod overlay;
pub mod path;
pub mod playback;
pub mod session;
pub mod storage;
pub mod ui;
pub mod video;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
