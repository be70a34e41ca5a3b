//! Transport implementations.
//!
//! This module contains concrete implementations of the [`Transport`](crate::transport::Transport)
//! trait: a STOMP 1.2 client over TCP and an in-process broker for tests and development.

pub mod memory;
pub mod stomp;

pub use memory::{InMemoryBroker, InMemoryTransport};
pub use stomp::{negotiate_heartbeat, StompClient};
