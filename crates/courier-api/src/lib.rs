//! Courier HTTP API.
//!
//! Management endpoints for webhooks, the event trigger, and health probes,
//! plus the service configuration shared with the binary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use error::ApiError;
pub use server::{create_router, shutdown_signal, start_server, AppState};
