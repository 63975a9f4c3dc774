pub mod api_server;
pub mod config;
pub mod store;
