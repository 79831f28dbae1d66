//! Health Inference Engine
//!
//! Pure state machine: every input is applied synchronously and time is passed
//! in by the caller, so the same sequence of signals always yields the same
//! states.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::state::{ConnectionState, ErrorTally, HealthSignal, HealthSnapshot};

/// Diagnostic logged by the embedded application's socket client on disconnect
pub const DEFAULT_ERROR_FRAGMENT: &str = "[WebSocketClient] Connection lost";

/// Close code that accompanies the fragment (policy violation)
pub const DEFAULT_CLOSE_CODE: u16 = 1008;

/// `command` value of the message the application posts once it is ready
pub const DEFAULT_READY_COMMAND: &str = "n8nReady";

/// Tunables for the heuristic. None of these have a derivation beyond
/// "works in practice"; treat them as knobs, not guarantees.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Text that must appear in a log line for it to count as an error
    pub error_fragment: String,
    /// Close code that must appear as `code=<n>` in the same line
    pub close_code: u16,
    /// `command` field of the ready message
    pub ready_command: String,
    /// Errors needed before reporting `Reconnecting`
    pub error_threshold: u32,
    /// Silence after the last error that counts as recovery
    pub recovery_window: Duration,
    /// How often the recovery check runs
    pub recovery_check_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            error_fragment: DEFAULT_ERROR_FRAGMENT.to_string(),
            close_code: DEFAULT_CLOSE_CODE,
            ready_command: DEFAULT_READY_COMMAND.to_string(),
            error_threshold: 2,
            recovery_window: Duration::from_secs(10),
            recovery_check_interval: Duration::from_secs(5),
        }
    }
}

struct Session {
    id: Uuid,
    endpoint: String,
}

/// Connection-health state machine for one embedded application
pub struct HealthEngine {
    config: EngineConfig,
    state: ConnectionState,
    tally: ErrorTally,
    load_error: bool,
    session: Option<Session>,
}

impl Default for HealthEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl HealthEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            tally: ErrorTally::default(),
            load_error: false,
            session: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn tally(&self) -> &ErrorTally {
        &self.tally
    }

    pub fn load_error(&self) -> bool {
        self.load_error
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.endpoint.as_str())
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            state: self.state,
            load_error: self.load_error,
            endpoint: self.session.as_ref().map(|s| s.endpoint.clone()),
            consecutive_errors: self.tally.consecutive_errors,
            session_id: self.session.as_ref().map(|s| s.id),
        }
    }

    /// Begin a session. Starts optimistic: nothing has failed yet.
    ///
    /// Replaces any session already in progress.
    pub fn start_session(&mut self, endpoint: impl Into<String>) -> Uuid {
        let session = Session {
            id: Uuid::new_v4(),
            endpoint: endpoint.into(),
        };
        let id = session.id;
        info!(session = %id, endpoint = %session.endpoint, "Connecting to embedded application");

        self.session = Some(session);
        self.tally.reset();
        self.load_error = false;
        self.state = ConnectionState::Connected;
        id
    }

    /// Discard the session and everything learned during it.
    /// Returns false if there was no session.
    pub fn end_session(&mut self) -> bool {
        let ended = self.session.take();
        if let Some(session) = &ended {
            info!(session = %session.id, "Disconnecting from embedded application");
        }
        self.tally.reset();
        self.load_error = false;
        self.state = ConnectionState::Disconnected;
        ended.is_some()
    }

    /// The embedding surface failed to load. Independent of the error tally.
    pub fn report_load_failure(&mut self) -> Option<ConnectionState> {
        warn!("Embedded interface failed to load");
        self.load_error = true;
        self.transition(ConnectionState::Disconnected)
    }

    /// The embedding surface loaded. Returns true if a load error was cleared.
    pub fn report_load_success(&mut self) -> bool {
        debug!("Embedded interface loaded");
        std::mem::replace(&mut self.load_error, false)
    }

    /// Apply a signal and return the new state if it changed.
    ///
    /// Never fails: anything unrecognized is noise and is ignored, as is
    /// every signal that arrives without an active session.
    pub fn process(&mut self, signal: HealthSignal, now: Instant) -> Option<ConnectionState> {
        if self.session.is_none() {
            return None;
        }

        match signal {
            HealthSignal::Log { text } => self.on_log(&text, now),
            HealthSignal::Message { payload } => self.on_message(&payload),
            HealthSignal::RecoveryCheck => self.on_recovery_check(now),
        }
    }

    /// True if `text` carries the connection-lost fragment and the close code
    pub fn is_connection_lost(&self, text: &str) -> bool {
        text.contains(self.config.error_fragment.as_str())
            && has_close_code(text, self.config.close_code)
    }

    /// True if `payload` is an object whose `command` is the ready command
    pub fn is_ready_message(&self, payload: &Value) -> bool {
        payload
            .as_object()
            .and_then(|obj| obj.get("command"))
            .and_then(Value::as_str)
            == Some(self.config.ready_command.as_str())
    }

    fn on_log(&mut self, text: &str, now: Instant) -> Option<ConnectionState> {
        if !self.is_connection_lost(text) {
            return None;
        }

        let count = self.tally.record(now);
        debug!(count, "Connection-lost signature observed");

        // A single error is tolerated as noise
        if count >= self.config.error_threshold.max(1) {
            self.transition(ConnectionState::Reconnecting)
        } else {
            None
        }
    }

    fn on_message(&mut self, payload: &Value) -> Option<ConnectionState> {
        if !self.is_ready_message(payload) {
            return None;
        }

        debug!("Embedded application reported ready");
        self.tally.reset();
        self.transition(ConnectionState::Connected)
    }

    fn on_recovery_check(&mut self, now: Instant) -> Option<ConnectionState> {
        if self.state != ConnectionState::Reconnecting {
            return None;
        }

        let quiet = match self.tally.last_error_at {
            Some(last) => now.saturating_duration_since(last) > self.config.recovery_window,
            None => true,
        };
        if !quiet {
            return None;
        }

        info!("No recent connection errors, assuming recovery");
        self.tally.reset();
        self.transition(ConnectionState::Connected)
    }

    fn transition(&mut self, next: ConnectionState) -> Option<ConnectionState> {
        if self.state == next {
            return None;
        }
        match next {
            ConnectionState::Reconnecting => warn!(
                errors = self.tally.consecutive_errors,
                "Embedded application is reconnecting"
            ),
            _ => debug!("State changed: {:?} -> {:?}", self.state, next),
        }
        self.state = next;
        Some(next)
    }
}

/// Looks for `code=<digits>` with exactly `code` as the number, so that
/// `code=10080` does not count as `code=1008`.
fn has_close_code(text: &str, code: u16) -> bool {
    text.match_indices("code=").any(|(idx, marker)| {
        let rest = &text[idx + marker.len()..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        rest[..end].parse::<u16>().is_ok_and(|parsed| parsed == code)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ERROR_LINE: &str = "[WebSocketClient] Connection lost code=1008";

    fn active_engine() -> HealthEngine {
        let mut engine = HealthEngine::default();
        engine.start_session("http://localhost:8081");
        engine
    }

    fn log(text: &str) -> HealthSignal {
        HealthSignal::Log {
            text: text.to_string(),
        }
    }

    fn ready() -> HealthSignal {
        HealthSignal::Message {
            payload: json!({ "command": "n8nReady" }),
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    /// Drive the engine into Reconnecting with errors at `t0` and `t0 + 1s`
    fn reconnecting_engine(t0: Instant) -> HealthEngine {
        let mut engine = active_engine();
        engine.process(log(ERROR_LINE), t0);
        engine.process(log(ERROR_LINE), t0 + secs(1));
        assert_eq!(engine.state(), ConnectionState::Reconnecting);
        engine
    }

    // ── Sessions ───────────────────────────────────────────────────

    #[test]
    fn test_new_engine_is_disconnected() {
        let engine = HealthEngine::default();
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        assert!(!engine.is_active());
        assert_eq!(engine.snapshot(), HealthSnapshot::default());
    }

    #[test]
    fn test_start_session_is_optimistic() {
        let mut engine = HealthEngine::default();
        let id = engine.start_session("http://localhost:8081");

        assert_eq!(engine.state(), ConnectionState::Connected);
        assert_eq!(engine.tally().consecutive_errors, 0);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.endpoint.as_deref(), Some("http://localhost:8081"));
        assert_eq!(snapshot.session_id, Some(id));
    }

    #[test]
    fn test_start_session_resets_previous_session() {
        let t0 = Instant::now();
        let mut engine = reconnecting_engine(t0);
        engine.report_load_failure();

        engine.start_session("http://other:5678");
        assert_eq!(engine.state(), ConnectionState::Connected);
        assert_eq!(engine.tally(), &ErrorTally::default());
        assert!(!engine.load_error());
        assert_eq!(engine.endpoint(), Some("http://other:5678"));
    }

    #[test]
    fn test_end_session_from_any_state() {
        let t0 = Instant::now();
        let engines = vec![
            active_engine(),
            reconnecting_engine(t0),
            {
                let mut e = active_engine();
                e.report_load_failure();
                e
            },
        ];

        for mut engine in engines {
            assert!(engine.end_session());
            assert_eq!(engine.state(), ConnectionState::Disconnected);
            assert_eq!(engine.tally().consecutive_errors, 0);
            assert!(!engine.load_error());
            assert!(engine.endpoint().is_none());
        }
    }

    #[test]
    fn test_end_session_without_session() {
        let mut engine = HealthEngine::default();
        assert!(!engine.end_session());
        assert_eq!(engine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_signals_ignored_without_session() {
        let now = Instant::now();
        let mut engine = HealthEngine::default();
        assert_eq!(engine.process(log(ERROR_LINE), now), None);
        assert_eq!(engine.process(log(ERROR_LINE), now), None);
        assert_eq!(engine.process(ready(), now), None);
        assert_eq!(engine.tally().consecutive_errors, 0);
        assert_eq!(engine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_signals_ignored_after_session_ends() {
        let t0 = Instant::now();
        let mut engine = reconnecting_engine(t0);
        engine.end_session();

        assert_eq!(engine.process(HealthSignal::RecoveryCheck, t0 + secs(60)), None);
        assert_eq!(engine.process(log(ERROR_LINE), t0 + secs(61)), None);
        assert_eq!(engine.state(), ConnectionState::Disconnected);
    }

    // ── Hysteresis ─────────────────────────────────────────────────

    #[test]
    fn test_single_error_does_not_transition() {
        let mut engine = active_engine();
        let result = engine.process(log(ERROR_LINE), Instant::now());
        assert_eq!(result, None);
        assert_eq!(engine.state(), ConnectionState::Connected);
        assert_eq!(engine.tally().consecutive_errors, 1);
    }

    #[test]
    fn test_two_errors_transition_to_reconnecting() {
        let now = Instant::now();
        let mut engine = active_engine();
        engine.process(log(ERROR_LINE), now);
        let result = engine.process(log(ERROR_LINE), now);

        assert_eq!(result, Some(ConnectionState::Reconnecting));
        assert_eq!(engine.tally().consecutive_errors, 2);
        assert_eq!(engine.tally().last_error_at, Some(now));
    }

    #[test]
    fn test_further_errors_while_reconnecting_are_no_op() {
        let t0 = Instant::now();
        let mut engine = reconnecting_engine(t0);
        let result = engine.process(log(ERROR_LINE), t0 + secs(2));

        assert_eq!(result, None);
        assert_eq!(engine.state(), ConnectionState::Reconnecting);
        assert_eq!(engine.tally().consecutive_errors, 3);
        assert_eq!(engine.tally().last_error_at, Some(t0 + secs(2)));
    }

    #[test]
    fn test_configurable_threshold() {
        let now = Instant::now();
        let mut engine = HealthEngine::new(EngineConfig {
            error_threshold: 3,
            ..Default::default()
        });
        engine.start_session("http://x");

        engine.process(log(ERROR_LINE), now);
        engine.process(log(ERROR_LINE), now);
        assert_eq!(engine.state(), ConnectionState::Connected);
        engine.process(log(ERROR_LINE), now);
        assert_eq!(engine.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn test_zero_threshold_behaves_like_one() {
        let mut engine = HealthEngine::new(EngineConfig {
            error_threshold: 0,
            ..Default::default()
        });
        engine.start_session("http://x");
        assert_eq!(engine.process(HealthSignal::RecoveryCheck, Instant::now()), None);

        let result = engine.process(log(ERROR_LINE), Instant::now());
        assert_eq!(result, Some(ConnectionState::Reconnecting));
    }

    // ── Error signature ────────────────────────────────────────────

    /// (log line, expected match)
    const SIGNATURE_SAMPLES: &[(&str, bool)] = &[
        ("[WebSocketClient] Connection lost code=1008", true),
        (
            "[WebSocketClient] Connection lost code=1008 reason=policy violation",
            true,
        ),
        (
            "2024-05-01T10:00:00Z warn [WebSocketClient] Connection lost, code=1008",
            true,
        ),
        ("code=1008 [WebSocketClient] Connection lost", true),
        // Wrong or missing close code
        ("[WebSocketClient] Connection lost code=1006", false),
        ("[WebSocketClient] Connection lost code=10080", false),
        ("[WebSocketClient] Connection lost", false),
        ("[WebSocketClient] Connection lost code=", false),
        // Close code without the fragment
        ("Something else code=1008", false),
        ("[WebSocketClient] Connected code=1008", false),
        // Case sensitive, like the diagnostic itself
        ("[websocketclient] connection lost code=1008", false),
        // Noise
        ("", false),
        ("Connecting to http://localhost:8081", false),
        ("🔌 Connection lost", false),
    ];

    #[test]
    fn test_signature_samples() {
        let engine = HealthEngine::default();
        for (line, expected) in SIGNATURE_SAMPLES {
            assert_eq!(
                engine.is_connection_lost(line),
                *expected,
                "Signature mismatch for line: {:?}",
                line
            );
        }
    }

    #[test]
    fn test_second_code_occurrence_matches() {
        assert!(has_close_code("code=1006 then code=1008", 1008));
        assert!(!has_close_code("code=99999999", 1008));
    }

    #[test]
    fn test_configurable_signature() {
        let engine = HealthEngine::new(EngineConfig {
            error_fragment: "socket dropped".to_string(),
            close_code: 1006,
            ..Default::default()
        });
        assert!(engine.is_connection_lost("socket dropped code=1006"));
        assert!(!engine.is_connection_lost(ERROR_LINE));
    }

    #[test]
    fn test_unrelated_lines_change_nothing() {
        let now = Instant::now();
        let mut engine = active_engine();
        let before = engine.snapshot();

        for line in ["hello", "[WebSocketClient] Connected", "code=1008", "n8nReady"] {
            assert_eq!(engine.process(log(line), now), None);
        }

        assert_eq!(engine.snapshot(), before);
        assert!(engine.tally().last_error_at.is_none());
    }

    // ── Ready message ──────────────────────────────────────────────

    #[test]
    fn test_ready_message_from_any_state() {
        let t0 = Instant::now();
        let starting_points = vec![
            active_engine(),
            reconnecting_engine(t0),
            {
                let mut e = active_engine();
                e.process(log(ERROR_LINE), t0);
                e.report_load_failure();
                e
            },
        ];

        for mut engine in starting_points {
            engine.process(ready(), t0 + secs(2));
            assert_eq!(engine.state(), ConnectionState::Connected);
            assert_eq!(engine.tally().consecutive_errors, 0);
        }
    }

    #[test]
    fn test_ready_message_resets_hysteresis() {
        let now = Instant::now();
        let mut engine = active_engine();
        engine.process(log(ERROR_LINE), now);
        engine.process(ready(), now);
        engine.process(log(ERROR_LINE), now);

        assert_eq!(engine.state(), ConnectionState::Connected);
        assert_eq!(engine.tally().consecutive_errors, 1);
    }

    #[test]
    fn test_malformed_messages_ignored() {
        let now = Instant::now();
        let mut engine = reconnecting_engine(now);
        let payloads = [
            json!("n8nReady"),
            json!(["n8nReady"]),
            json!({ "command": "somethingElse" }),
            json!({ "command": 1 }),
            json!({ "cmd": "n8nReady" }),
            json!({ "data": { "command": "n8nReady" } }),
            json!(null),
        ];

        for payload in payloads {
            assert_eq!(engine.process(HealthSignal::Message { payload }, now), None);
        }
        assert_eq!(engine.state(), ConnectionState::Reconnecting);
        assert_eq!(engine.tally().consecutive_errors, 2);
    }

    #[test]
    fn test_ready_message_with_extra_fields() {
        let engine = HealthEngine::default();
        assert!(engine.is_ready_message(&json!({ "command": "n8nReady", "version": "1.0" })));
    }

    // ── Recovery check ─────────────────────────────────────────────

    #[test]
    fn test_recovery_after_silence() {
        // Errors at t=0 and t=1; checks every 5 units
        let t0 = Instant::now();
        let mut engine = reconnecting_engine(t0);

        assert_eq!(engine.process(HealthSignal::RecoveryCheck, t0 + secs(5)), None);
        assert_eq!(engine.process(HealthSignal::RecoveryCheck, t0 + secs(10)), None);
        assert_eq!(
            engine.process(HealthSignal::RecoveryCheck, t0 + secs(15)),
            Some(ConnectionState::Connected)
        );
        assert_eq!(engine.tally(), &ErrorTally::default());
    }

    #[test]
    fn test_recovery_window_is_exclusive() {
        let t0 = Instant::now();
        let mut engine = reconnecting_engine(t0);

        // Exactly 10s after the last error is not "more than" the window
        assert_eq!(engine.process(HealthSignal::RecoveryCheck, t0 + secs(11)), None);
        assert_eq!(
            engine.process(
                HealthSignal::RecoveryCheck,
                t0 + secs(11) + Duration::from_millis(1)
            ),
            Some(ConnectionState::Connected)
        );
    }

    #[test]
    fn test_new_error_restarts_recovery_window() {
        let t0 = Instant::now();
        let mut engine = reconnecting_engine(t0);
        engine.process(log(ERROR_LINE), t0 + secs(9));

        assert_eq!(engine.process(HealthSignal::RecoveryCheck, t0 + secs(15)), None);
        assert_eq!(
            engine.process(HealthSignal::RecoveryCheck, t0 + secs(20)),
            Some(ConnectionState::Connected)
        );
    }

    #[test]
    fn test_recovery_check_only_acts_while_reconnecting() {
        let t0 = Instant::now();
        let mut engine = active_engine();
        engine.process(log(ERROR_LINE), t0);

        assert_eq!(engine.process(HealthSignal::RecoveryCheck, t0 + secs(60)), None);
        assert_eq!(engine.tally().consecutive_errors, 1);

        engine.report_load_failure();
        assert_eq!(engine.process(HealthSignal::RecoveryCheck, t0 + secs(60)), None);
        assert_eq!(engine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_configurable_recovery_window() {
        let t0 = Instant::now();
        let mut engine = HealthEngine::new(EngineConfig {
            recovery_window: secs(30),
            ..Default::default()
        });
        engine.start_session("http://x");
        engine.process(log(ERROR_LINE), t0);
        engine.process(log(ERROR_LINE), t0);

        assert_eq!(engine.process(HealthSignal::RecoveryCheck, t0 + secs(20)), None);
        assert_eq!(
            engine.process(HealthSignal::RecoveryCheck, t0 + secs(31)),
            Some(ConnectionState::Connected)
        );
    }

    // ── Load failure ───────────────────────────────────────────────

    #[test]
    fn test_load_failure_keeps_tally() {
        let now = Instant::now();
        let mut engine = active_engine();
        engine.process(log(ERROR_LINE), now);

        let result = engine.report_load_failure();
        assert_eq!(result, Some(ConnectionState::Disconnected));
        assert!(engine.load_error());
        assert_eq!(engine.tally().consecutive_errors, 1);
        assert_eq!(engine.tally().last_error_at, Some(now));
    }

    #[test]
    fn test_load_success_clears_flag_only() {
        let mut engine = active_engine();
        engine.report_load_failure();

        assert!(engine.report_load_success());
        assert!(!engine.load_error());
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        assert!(!engine.report_load_success());
    }

    #[test]
    fn test_noise_does_not_touch_load_flag() {
        let now = Instant::now();
        let mut engine = active_engine();
        engine.report_load_failure();
        engine.process(log("unrelated"), now);
        engine.process(HealthSignal::Message { payload: json!({}) }, now);
        assert!(engine.load_error());
    }

    #[test]
    fn test_errors_after_load_failure_still_count() {
        let now = Instant::now();
        let mut engine = active_engine();
        engine.report_load_failure();
        engine.process(log(ERROR_LINE), now);
        engine.process(log(ERROR_LINE), now);
        assert_eq!(engine.state(), ConnectionState::Reconnecting);
        assert!(engine.load_error());
    }
}
