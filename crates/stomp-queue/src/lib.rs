//! # STOMP Queue
//!
//! Reliable queue adapter over STOMP durable subscriptions.
//!
//! Job runners that expect a claim/acknowledge/release queue can consume any
//! STOMP broker destination through this crate. Messages are enqueued with a
//! SEND, claimed by reading from a client-acknowledged durable subscription,
//! and removed from the broker only once acknowledged. Anything claimed but
//! not acknowledged is redelivered after the connection is re-established.
//!
//! ## Module Organization
//!
//! - [`adapter`] - The [`ReliableQueue`] contract and [`StompQueue`]
//! - [`subscription`] - Durable subscription handle with lazy activation
//! - [`transport`] - Transport capability trait and acknowledgement modes
//! - [`transports`] - STOMP TCP client and in-memory broker
//! - [`frame`] - STOMP 1.2 frame model and codec
//! - [`message`] - Destinations, outbound messages and claimed items
//! - [`hook`] - Outbound hooks run before every send
//! - [`config`] - Queue settings loaded from files and the environment
//! - [`registry`] - Named queues built from configuration
//! - [`error`] - Error types

pub mod adapter;
pub mod config;
pub mod error;
pub mod frame;
pub mod hook;
pub mod message;
pub mod registry;
pub mod subscription;
pub mod transport;
pub mod transports;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at crate root for convenience
pub use adapter::{ReliableQueue, StompQueue};
pub use config::{BrokerAddress, QueueSettings, QueuesConfig};
pub use error::{ConfigurationError, FrameError, MisuseError, TransportError, ValidationError};
pub use frame::{Frame, StompItem};
pub use hook::{HookChain, NoopHook, OutboundEvent, OutboundHook};
pub use message::{ClaimedItem, DestinationName, MessageId, OutboundMessage, Payload};
pub use registry::QueueRegistry;
pub use subscription::DurableSubscription;
pub use transport::{AckMode, Transport};
pub use transports::{InMemoryBroker, InMemoryTransport, StompClient};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
