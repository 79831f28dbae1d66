//! `tracing` layer that mirrors every event onto a [`LogBus`].
//!
//! The layer only observes. Other layers in the subscriber stack (the fmt
//! layer, file writers) see every event exactly as before, so installing it
//! does not change what the process logs.

use std::cell::Cell;
use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::bus::{LogBus, LogLine};

thread_local! {
    /// Set while this thread is publishing, so nested events are dropped.
    static PUBLISHING: Cell<bool> = const { Cell::new(false) };
}

pub struct LogBusLayer {
    bus: LogBus,
    ignored_targets: Vec<String>,
}

impl LogBusLayer {
    pub(crate) fn new(bus: LogBus) -> Self {
        Self {
            bus,
            // The tap's own diagnostics must never feed back into it
            ignored_targets: vec![env!("CARGO_CRATE_NAME").to_string()],
        }
    }

    /// Skip events whose target is `prefix` or lives under `prefix::`.
    pub fn ignore_target(mut self, prefix: impl Into<String>) -> Self {
        self.ignored_targets.push(prefix.into());
        self
    }

    fn is_ignored(&self, target: &str) -> bool {
        self.ignored_targets.iter().any(|prefix| {
            target
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
        })
    }
}

impl<S: Subscriber> Layer<S> for LogBusLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if self.is_ignored(metadata.target()) {
            return;
        }
        if PUBLISHING.with(|flag| flag.replace(true)) {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        self.bus.publish(LogLine::new(
            *metadata.level(),
            metadata.target(),
            visitor.finish(),
        ));

        PUBLISHING.with(|flag| flag.set(false));
    }
}

/// Renders an event as `message key=value key=value`.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self) -> String {
        if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            self.message + &self.fields
        }
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
