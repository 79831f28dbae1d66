//! embed-health - best-effort connection health for an embedded web application
//!
//! The embedded application's socket is invisible to the host, so its health
//! is inferred from what the application logs and the messages it posts. See
//! [`inference`] for the heuristic and its limits, and [`monitor`] for running
//! it against live signal sources from the `signal_tap` crate.

pub mod config;
pub mod inference;
pub mod monitor;

pub use inference::{ConnectionState, EngineConfig, HealthEngine, HealthSnapshot, HealthWarning};
pub use monitor::{HealthMonitor, MonitorError};
