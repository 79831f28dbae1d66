use serde_json::Value;
use tokio::sync::broadcast;

use crate::sequence::Sequenced;

const DEFAULT_CAPACITY: usize = 256;

/// Host-owned inbound queue for messages posted by the embedded application.
///
/// Payloads are arbitrary JSON; nothing here validates their shape.
#[derive(Clone, Debug)]
pub struct MessageChannel {
    tx: broadcast::Sender<Sequenced<Value>>,
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx }
    }

    /// Deliver a payload to every current subscriber. Returns how many received it.
    pub fn post(&self, payload: Value) -> usize {
        self.tx.send(Sequenced::stamp(payload)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Sequenced<Value>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_post_without_subscribers() {
        let channel = MessageChannel::new();
        assert_eq!(channel.post(json!({ "command": "ready" })), 0);
    }

    #[test]
    fn test_post_delivers_any_shape() {
        let channel = MessageChannel::new();
        let mut rx = channel.subscribe();

        channel.post(json!("plain string"));
        channel.post(json!([1, 2, 3]));
        channel.post(Value::Null);

        assert_eq!(rx.try_recv().unwrap().item, json!("plain string"));
        assert_eq!(rx.try_recv().unwrap().item, json!([1, 2, 3]));
        assert_eq!(rx.try_recv().unwrap().item, Value::Null);
    }
}
