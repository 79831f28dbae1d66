use serde_json::Value;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::{debug, warn};

use crate::bus::{LogBus, LogLine};
use crate::messages::MessageChannel;
use crate::sequence::Sequenced;

/// An observation from one of the tapped sources, forwarded verbatim
#[derive(Clone, Debug, PartialEq)]
pub enum TapEvent {
    /// A line captured from the logging channel
    LogObserved(LogLine),
    /// A message posted by the embedded application
    MessageReceived(Value),
}

/// Live subscriptions; dropping this releases both.
///
/// Each source keeps at most one item read ahead, so the two heads can be
/// compared and handed out in publish order.
struct Attachment {
    logs: broadcast::Receiver<Sequenced<LogLine>>,
    messages: broadcast::Receiver<Sequenced<Value>>,
    next_log: Option<Sequenced<LogLine>>,
    next_message: Option<Sequenced<Value>>,
}

impl Attachment {
    /// Pull whatever is already queued into the empty read-ahead slots
    fn fill(&mut self) {
        fill_slot(&mut self.next_log, &mut self.logs, "log bus");
        fill_slot(&mut self.next_message, &mut self.messages, "message channel");
    }

    /// The read-ahead item that was published first
    fn take_earliest(&mut self) -> Option<TapEvent> {
        let log_first = match (&self.next_log, &self.next_message) {
            (Some(log), Some(message)) => log.seq < message.seq,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return None,
        };
        if log_first {
            self.next_log
                .take()
                .map(|line| TapEvent::LogObserved(line.item))
        } else {
            self.next_message
                .take()
                .map(|payload| TapEvent::MessageReceived(payload.item))
        }
    }
}

fn fill_slot<T: Clone>(
    slot: &mut Option<Sequenced<T>>,
    rx: &mut broadcast::Receiver<Sequenced<T>>,
    source: &'static str,
) {
    while slot.is_none() {
        match rx.try_recv() {
            Ok(item) => *slot = Some(item),
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, source, "signal tap fell behind");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

/// Subscribes to the log bus and the message channel while attached.
///
/// Dropping the tap detaches it.
pub struct SignalTap {
    bus: LogBus,
    channel: MessageChannel,
    attachment: Option<Attachment>,
}

impl SignalTap {
    pub fn new(bus: LogBus, channel: MessageChannel) -> Self {
        Self {
            bus,
            channel,
            attachment: None,
        }
    }

    /// Subscribe to both sources. Returns false if already attached.
    pub fn attach(&mut self) -> bool {
        if self.attachment.is_some() {
            debug!("signal tap already attached");
            return false;
        }
        self.attachment = Some(Attachment {
            logs: self.bus.subscribe(),
            messages: self.channel.subscribe(),
            next_log: None,
            next_message: None,
        });
        debug!("signal tap attached");
        true
    }

    /// Drop both subscriptions. Returns false if nothing was attached.
    pub fn detach(&mut self) -> bool {
        let detached = self.attachment.take().is_some();
        if detached {
            debug!("signal tap detached");
        }
        detached
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    /// Wait for the next event from either source.
    ///
    /// Events come out in the order they were published, across both
    /// sources. Pends forever while detached. Cancel-safe, so it can sit in
    /// a `tokio::select!` next to other work.
    pub async fn recv(&mut self) -> TapEvent {
        let Some(attachment) = self.attachment.as_mut() else {
            return std::future::pending().await;
        };

        loop {
            attachment.fill();
            if let Some(event) = attachment.take_earliest() {
                return event;
            }

            // Both sources are empty. Whatever arrives is parked in its slot
            // and goes through the ordering above on the next pass.
            tokio::select! {
                result = attachment.logs.recv() => match result {
                    Ok(line) => attachment.next_log = Some(line),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, source = "log bus", "signal tap fell behind");
                    }
                    Err(RecvError::Closed) => return std::future::pending().await,
                },
                result = attachment.messages.recv() => match result {
                    Ok(payload) => attachment.next_message = Some(payload),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, source = "message channel", "signal tap fell behind");
                    }
                    Err(RecvError::Closed) => return std::future::pending().await,
                },
            }
        }
    }
}
