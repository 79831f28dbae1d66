//! Signal Tap - observe an embedded application's diagnostic output
//!
//! This crate turns two uncontrolled sources into one normalized event stream:
//!
//! - the process-wide logging channel, observed through [`LogBusLayer`], a
//!   `tracing` layer that publishes every event onto a [`LogBus`]
//! - the cross-context message channel, modelled as a host-owned
//!   [`MessageChannel`] carrying arbitrary JSON payloads
//!
//! A [`SignalTap`] subscribes to both while attached and yields
//! [`TapEvent`]s. It does no filtering or classification; deciding what a
//! line or a payload means is the consumer's job.
//!
//! # Example
//!
//! ```no_run
//! use signal_tap::{LogBus, MessageChannel, SignalTap, TapEvent};
//! use tracing_subscriber::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = LogBus::new();
//!     tracing_subscriber::registry()
//!         .with(tracing_subscriber::fmt::layer())
//!         .with(bus.layer())
//!         .init();
//!
//!     let messages = MessageChannel::new();
//!     let mut tap = SignalTap::new(bus, messages.clone());
//!     tap.attach();
//!
//!     tracing::warn!(target: "embedded", "connection dropped");
//!     messages.post(serde_json::json!({ "command": "ready" }));
//!
//!     while let TapEvent::LogObserved(line) = tap.recv().await {
//!         println!("{}: {}", line.level, line.text);
//!     }
//! }
//! ```

mod bus;
mod layer;
mod messages;
mod sequence;
mod tap;

pub use bus::{LogBus, LogLine};
pub use layer::LogBusLayer;
pub use messages::MessageChannel;
pub use sequence::Sequenced;
pub use tap::{SignalTap, TapEvent};
