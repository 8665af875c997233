//! # botlink-server
//!
//! HTTP front-end for the robot relay. Serves the relayed MJPEG feed to
//! browsers and exposes the command channel as a small JSON API.

pub mod app;
pub mod config;
pub mod http;
pub mod signal;

pub use app::AppState;
pub use config::RelayConfig;
