//! Health Monitor
//!
//! Runs a [`HealthEngine`] for one embedded application. A single actor task
//! owns the engine, the [`SignalTap`] and the recovery timer, and handles
//! commands, tap events and timer ticks one at a time, so the engine needs no
//! locking. Snapshots are published on a `watch` channel after every change.
//!
//! The tap subscriptions and the recovery timer exist only while a session is
//! active. Both are owned by the actor, so they are also released if the
//! actor stops for any other reason.

use std::time::Duration;

use signal_tap::{LogBus, LogBusLayer, MessageChannel, SignalTap, TapEvent};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::inference::{EngineConfig, HealthEngine, HealthSignal, HealthSnapshot};

/// Lower bound for the recovery check period (a zero period would spin)
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("endpoint must not be empty")]
    EmptyEndpoint,

    #[error("health monitor is gone")]
    Closed,
}

/// Commands sent from the presentation layer to the monitor actor
#[derive(Debug)]
enum MonitorCommand {
    StartSession {
        endpoint: String,
        respond_to: oneshot::Sender<Uuid>,
    },
    EndSession {
        respond_to: oneshot::Sender<()>,
    },
    LoadFailed {
        respond_to: oneshot::Sender<()>,
    },
    LoadSucceeded {
        respond_to: oneshot::Sender<()>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle to a running health monitor
pub struct HealthMonitor {
    sender: mpsc::Sender<MonitorCommand>,
    snapshot: watch::Receiver<HealthSnapshot>,
    task: JoinHandle<()>,
}

impl HealthMonitor {
    /// Spawn the monitor actor. No session is active until [`start_session`].
    ///
    /// Install the bus's layer with [`HealthMonitor::tap_layer`] so the
    /// monitor's own diagnostics stay off the bus.
    ///
    /// [`start_session`]: HealthMonitor::start_session
    pub fn spawn(config: EngineConfig, bus: LogBus, messages: MessageChannel) -> Self {
        let engine = HealthEngine::new(config);
        let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());
        let (sender, receiver) = mpsc::channel(32);

        let actor = MonitorActor {
            engine,
            tap: SignalTap::new(bus, messages),
            recovery: None,
            receiver,
            snapshot: snapshot_tx,
        };
        let task = tokio::spawn(actor.run());

        Self {
            sender,
            snapshot: snapshot_rx,
            task,
        }
    }

    /// The bus layer with this crate's log targets ignored
    pub fn tap_layer(bus: &LogBus) -> LogBusLayer {
        bus.layer().ignore_target(env!("CARGO_CRATE_NAME"))
    }

    /// Start monitoring `endpoint`. The tap is attached by the time this returns.
    pub async fn start_session(&self, endpoint: &str) -> Result<Uuid, MonitorError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(MonitorError::EmptyEndpoint);
        }
        let endpoint = endpoint.to_string();
        self.request(|respond_to| MonitorCommand::StartSession {
            endpoint,
            respond_to,
        })
        .await
    }

    /// Stop monitoring. The tap is detached by the time this returns.
    pub async fn end_session(&self) -> Result<(), MonitorError> {
        self.request(|respond_to| MonitorCommand::EndSession { respond_to })
            .await
    }

    /// The embedding surface failed to load
    pub async fn report_load_failure(&self) -> Result<(), MonitorError> {
        self.request(|respond_to| MonitorCommand::LoadFailed { respond_to })
            .await
    }

    /// The embedding surface loaded
    pub async fn report_load_success(&self) -> Result<(), MonitorError> {
        self.request(|respond_to| MonitorCommand::LoadSucceeded { respond_to })
            .await
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that is notified on every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<HealthSnapshot> {
        self.snapshot.clone()
    }

    /// End any session and stop the actor
    pub async fn shutdown(self) -> Result<(), MonitorError> {
        let result = self
            .request(|respond_to| MonitorCommand::Shutdown { respond_to })
            .await;
        match self.task.await {
            Ok(()) => result,
            Err(e) => {
                warn!("Health monitor task failed: {}", e);
                Err(MonitorError::Closed)
            }
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> MonitorCommand,
    ) -> Result<T, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| MonitorError::Closed)?;
        rx.await.map_err(|_| MonitorError::Closed)
    }
}

struct MonitorActor {
    engine: HealthEngine,
    tap: SignalTap,
    /// Session-scoped; `None` whenever no session is active
    recovery: Option<Interval>,
    receiver: mpsc::Receiver<MonitorCommand>,
    snapshot: watch::Sender<HealthSnapshot>,
}

impl MonitorActor {
    async fn run(mut self) {
        debug!("Health monitor started");

        loop {
            // Signals that were already delivered are applied before a
            // command that arrived after them
            tokio::select! {
                biased;

                event = self.tap.recv() => {
                    // Payloads are not echoed: they may quote the error signature
                    if let TapEvent::MessageReceived(_) = &event {
                        debug!("Message from embedded application");
                    }
                    self.engine.process(HealthSignal::from(event), Instant::now());
                }
                _ = next_recovery_check(&mut self.recovery) => {
                    self.engine.process(HealthSignal::RecoveryCheck, Instant::now());
                }
                command = self.receiver.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => break,
                },
            }
            self.publish();
        }

        self.stop_session();
        self.publish();
        debug!("Health monitor stopped");
    }

    /// Returns false when the actor should stop
    fn handle_command(&mut self, command: MonitorCommand) -> bool {
        match command {
            MonitorCommand::StartSession {
                endpoint,
                respond_to,
            } => {
                let id = self.engine.start_session(endpoint);
                // A new session must not see signals queued for the previous one
                self.tap.detach();
                self.tap.attach();

                let period = self
                    .engine
                    .config()
                    .recovery_check_interval
                    .max(MIN_CHECK_INTERVAL);
                let mut interval = time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                self.recovery = Some(interval);

                self.publish();
                let _ = respond_to.send(id);
            }

            MonitorCommand::EndSession { respond_to } => {
                self.stop_session();
                self.publish();
                let _ = respond_to.send(());
            }

            MonitorCommand::LoadFailed { respond_to } => {
                self.engine.report_load_failure();
                self.publish();
                let _ = respond_to.send(());
            }

            MonitorCommand::LoadSucceeded { respond_to } => {
                self.engine.report_load_success();
                self.publish();
                let _ = respond_to.send(());
            }

            MonitorCommand::Shutdown { respond_to } => {
                self.stop_session();
                self.publish();
                let _ = respond_to.send(());
                return false;
            }
        }
        true
    }

    fn stop_session(&mut self) {
        self.tap.detach();
        self.recovery = None;
        self.engine.end_session();
    }

    fn publish(&self) {
        let next = self.engine.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn next_recovery_check(recovery: &mut Option<Interval>) {
    match recovery {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
