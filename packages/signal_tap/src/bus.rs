use tokio::sync::broadcast;
use tracing::Level;

use crate::layer::LogBusLayer;
use crate::sequence::Sequenced;

const DEFAULT_CAPACITY: usize = 1024;

/// One line observed on the logging channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    /// Where the line was logged from (a tracing target, e.g. `embedded`)
    pub target: String,
    pub text: String,
}

impl LogLine {
    pub fn new(level: Level, target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            level,
            target: target.into(),
            text: text.into(),
        }
    }
}

/// Publish/subscribe facility for log lines.
///
/// Publishing never blocks and never fails: with no subscribers a line is
/// simply dropped, and a slow subscriber lags rather than holding up the
/// logger.
#[derive(Clone, Debug)]
pub struct LogBus {
    tx: broadcast::Sender<Sequenced<LogLine>>,
}

impl Default for LogBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fan a line out to every current subscriber. Returns how many received it.
    pub fn publish(&self, line: LogLine) -> usize {
        self.tx.send(Sequenced::stamp(line)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Sequenced<LogLine>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// A `tracing` layer that publishes every event onto this bus
    pub fn layer(&self) -> LogBusLayer {
        LogBusLayer::new(self.clone())
    }
}
