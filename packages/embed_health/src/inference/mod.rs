//! Connection Health Inference
//!
//! Infers whether an embedded application's socket connection is healthy
//! without being able to see the socket. The only evidence is indirect:
//!
//! - Log lines: the embedded application logs a connection-lost diagnostic
//!   with a close code when its socket drops
//! - Messages: it posts a structured "ready" command to the host after it
//!   (re)initializes
//! - Silence: the application never announces recovery after a transient
//!   drop, so a quiet period after the last error counts as recovery
//!
//! And maintains a state machine:
//! - `Connected` - optimistic default for a new session
//! - `Reconnecting` - repeated connection-lost diagnostics seen
//! - `Disconnected` - no session, or the embedding surface failed to load
//!
//! **This is a heuristic.** State is inferred from diagnostic text, not from
//! a health-check API, so false positives and false negatives are expected
//! whenever the embedded application changes its log format or logs
//! something that merely looks like the error signature. The threshold,
//! recovery window and signature are all configurable for that reason.

mod engine;
mod state;

pub use engine::{
    DEFAULT_CLOSE_CODE, DEFAULT_ERROR_FRAGMENT, DEFAULT_READY_COMMAND, EngineConfig, HealthEngine,
};
pub use state::{ConnectionState, ErrorTally, HealthSignal, HealthSnapshot, HealthWarning};
