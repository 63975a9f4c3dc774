//! Warden server library
//!
//! The binary is a thin wrapper; the router, settings and app state are
//! exposed here so integration tests can drive the HTTP surface.

pub mod api;
pub mod app_state;
pub mod http;
pub mod init_telemetry;
pub mod settings;
pub mod stop_flag;

pub use app_state::AppState;
