//! Common test utilities for stomp-queue integration tests
//!
//! This module provides:
//! - An in-memory broker with a short idle interval
//! - Helpers building queues and destinations

use stomp_queue::{DestinationName, InMemoryBroker, InMemoryTransport, StompQueue};
use std::time::Duration;

/// Broker whose idle reads return quickly
pub fn broker() -> InMemoryBroker {
    InMemoryBroker::new().with_idle_interval(Duration::from_millis(2))
}

pub fn destination(name: &str) -> DestinationName {
    DestinationName::new(name).expect("test destination should be valid")
}

/// Queue on `/queue/jobs` connected as `client_id`
pub fn jobs_queue(broker: &InMemoryBroker, client_id: &str) -> StompQueue<InMemoryTransport> {
    StompQueue::new(broker.client(client_id), destination("/queue/jobs"))
}

pub fn lease() -> chrono::Duration {
    chrono::Duration::seconds(30)
}
