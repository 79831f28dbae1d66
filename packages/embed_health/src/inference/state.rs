//! Connection Health Types

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use signal_tap::TapEvent;
use tokio::time::Instant;
use uuid::Uuid;

/// Inferred state of the embedded application's connection
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session, or the embedding surface failed to load
    #[default]
    Disconnected,

    /// No evidence of trouble
    Connected,

    /// Repeated connection-lost diagnostics; the application is retrying
    Reconnecting,
}

impl ConnectionState {
    /// Human-readable label for status indicators
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error bookkeeping for the current session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ErrorTally {
    pub consecutive_errors: u32,
    pub last_error_at: Option<Instant>,
}

impl ErrorTally {
    /// Count one more error seen at `now`; returns the new count
    pub fn record(&mut self, now: Instant) -> u32 {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.last_error_at = Some(now);
        self.consecutive_errors
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Input signals to the engine
#[derive(Clone, Debug, PartialEq)]
pub enum HealthSignal {
    /// A line from the logging channel
    Log { text: String },

    /// A message posted by the embedded application
    Message { payload: Value },

    /// Periodic recovery check
    RecoveryCheck,
}

impl From<TapEvent> for HealthSignal {
    fn from(event: TapEvent) -> Self {
        match event {
            TapEvent::LogObserved(line) => HealthSignal::Log { text: line.text },
            TapEvent::MessageReceived(payload) => HealthSignal::Message { payload },
        }
    }
}

/// Read-only view handed to the presentation layer
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub state: ConnectionState,
    /// The embedding surface itself failed to load
    pub load_error: bool,
    pub endpoint: Option<String>,
    pub consecutive_errors: u32,
    pub session_id: Option<Uuid>,
}

impl HealthSnapshot {
    /// Banners the presentation layer should show, most severe first
    pub fn warnings(&self) -> Vec<HealthWarning> {
        let mut warnings = Vec::new();
        if self.load_error {
            warnings.push(HealthWarning::LoadFailure);
        }
        if self.state == ConnectionState::Reconnecting {
            warnings.push(HealthWarning::Degraded);
        }
        warnings
    }

    /// One-line rendering, e.g. `Reconnecting (http://localhost:8081) errors=2`
    pub fn status_line(&self) -> String {
        let mut line = self.state.label().to_string();
        if let Some(endpoint) = &self.endpoint {
            line.push_str(&format!(" ({})", endpoint));
        }
        if self.consecutive_errors > 0 {
            line.push_str(&format!(" errors={}", self.consecutive_errors));
        }
        if self.load_error {
            line.push_str(" load-error");
        }
        line
    }
}

/// A condition worth surfacing to the user
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthWarning {
    LoadFailure,
    Degraded,
}

impl fmt::Display for HealthWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthWarning::LoadFailure => f.write_str(
                "Connection issue: unable to load the embedded interface. \
                 Make sure the application and its proxy are running.",
            ),
            HealthWarning::Degraded => f.write_str(
                "Connection issues: the embedded application is losing its live connection \
                 and attempting to reconnect. Functionality may be limited until it recovers.",
            ),
        }
    }
}
