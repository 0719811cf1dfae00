//! HTTP transport for Atlas: configuration, wiring, and the axum routes
//! that stream orchestrator runs to chat clients.

pub mod config;
pub mod http;

pub use config::{AtlasConfig, Cli, load_env};
pub use http::{AppState, router, serve};
