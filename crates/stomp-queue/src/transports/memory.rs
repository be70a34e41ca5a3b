//! In-memory STOMP broker for testing and development.
//!
//! [`InMemoryBroker`] keeps destinations, subscriptions and unacknowledged
//! deliveries in process memory and hands out [`InMemoryTransport`] clients
//! that behave like connections to a real broker:
//!
//! - destinations are created on first send or subscribe
//! - messages are delivered in FIFO order to one subscriber each
//! - deliveries on `client` and `client-individual` subscriptions stay in
//!   flight until acknowledged
//! - closing or losing a connection puts its in-flight messages back at the
//!   front of their destination so they are redelivered
//! - reads with nothing to deliver wait for the idle interval and then
//!   return nothing, as a heart-beat would

use crate::error::TransportError;
use crate::frame::{command, header, Frame};
use crate::message::{DestinationName, OutboundMessage};
use crate::transport::{AckMode, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, trace};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(20);

/// Header set on messages delivered more than once
pub const REDELIVERED_HEADER: &str = "redelivered";

// ============================================================================
// Internal Broker State
// ============================================================================

/// A message waiting in a destination
#[derive(Clone)]
struct StoredMessage {
    message_id: String,
    body: Bytes,
    headers: Vec<(String, String)>,
    redelivered: bool,
}

struct Subscription {
    id: String,
    destination: String,
    ack_mode: AckMode,
}

/// A delivered message awaiting acknowledgement
struct InFlight {
    destination: String,
    subscription_id: String,
    ack_mode: AckMode,
    message: StoredMessage,
}

struct Connection {
    client_id: String,
    subscriptions: Vec<Subscription>,
    in_flight: Vec<InFlight>,
    next_subscription: usize,
    severed: bool,
}

impl Connection {
    fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            subscriptions: Vec::new(),
            in_flight: Vec::new(),
            next_subscription: 0,
            severed: false,
        }
    }
}

#[derive(Default)]
struct BrokerState {
    destinations: HashMap<String, VecDeque<StoredMessage>>,
    connections: HashMap<u64, Connection>,
    next_connection_id: u64,
    next_message_id: u64,
}

impl BrokerState {
    fn destination(&mut self, name: &str) -> &mut VecDeque<StoredMessage> {
        self.destinations.entry(name.to_string()).or_default()
    }

    fn store(&mut self, destination: &str, message: &OutboundMessage) -> String {
        self.next_message_id += 1;
        let message_id = format!("ID:memory-{}", self.next_message_id);
        let stored = StoredMessage {
            message_id: message_id.clone(),
            body: message.body.clone(),
            headers: message.headers.clone(),
            redelivered: false,
        };
        self.destination(destination).push_back(stored);
        message_id
    }

    /// Return in-flight messages to the front of their destinations, oldest first
    fn requeue(&mut self, in_flight: Vec<InFlight>) {
        for entry in in_flight.into_iter().rev() {
            let mut message = entry.message;
            message.redelivered = true;
            self.destination(&entry.destination).push_front(message);
        }
    }

    fn close(&mut self, connection_id: u64) {
        if let Some(connection) = self.connections.remove(&connection_id) {
            debug!(
                client_id = %connection.client_id,
                unacknowledged = connection.in_flight.len(),
                "Closing in-memory connection"
            );
            self.requeue(connection.in_flight);
        }
    }

    /// Pop the next message for `connection_id`, rotating through its subscriptions
    fn deliver(&mut self, connection_id: u64) -> Option<Frame> {
        let connection = self.connections.get(&connection_id)?;
        let count = connection.subscriptions.len();
        let start = connection.next_subscription;

        for offset in 0..count {
            let index = (start + offset) % count;
            let (destination, subscription_id, ack_mode) = {
                let subscription = &self.connections.get(&connection_id)?.subscriptions[index];
                (
                    subscription.destination.clone(),
                    subscription.id.clone(),
                    subscription.ack_mode,
                )
            };

            let Some(message) = self.destination(&destination).pop_front() else {
                continue;
            };

            let frame = message_frame(&destination, &subscription_id, ack_mode, &message);
            let connection = self.connections.get_mut(&connection_id)?;
            connection.next_subscription = (index + 1) % count;
            if ack_mode != AckMode::Auto {
                connection.in_flight.push(InFlight {
                    destination,
                    subscription_id,
                    ack_mode,
                    message,
                });
            }
            return Some(frame);
        }

        None
    }
}

fn message_frame(
    destination: &str,
    subscription_id: &str,
    ack_mode: AckMode,
    message: &StoredMessage,
) -> Frame {
    let mut frame = Frame::new(command::MESSAGE)
        .header(header::DESTINATION, destination)
        .header(header::MESSAGE_ID, message.message_id.as_str())
        .header(header::SUBSCRIPTION, subscription_id);
    if ack_mode != AckMode::Auto {
        frame = frame.header(header::ACK, message.message_id.as_str());
    }
    if message.redelivered {
        frame = frame.header(REDELIVERED_HEADER, "true");
    }
    for (name, value) in &message.headers {
        frame = frame.header(name.as_str(), value.as_str());
    }
    frame.with_body(message.body.clone())
}

fn poisoned() -> TransportError {
    TransportError::ConnectionFailed {
        message: "in-memory broker state is poisoned".to_string(),
    }
}

// ============================================================================
// InMemoryBroker
// ============================================================================

/// Process-local STOMP broker.
///
/// Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<RwLock<BrokerState>>,
    idle_interval: Duration,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(BrokerState::default())),
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }

    /// How long a read waits before reporting that nothing arrived
    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    pub fn idle_interval(&self) -> Duration {
        self.idle_interval
    }

    /// Create a client; its connection opens on first use
    pub fn client(&self, client_id: impl Into<String>) -> InMemoryTransport {
        InMemoryTransport {
            broker: self.clone(),
            client_id: client_id.into(),
            connection_id: None,
        }
    }

    /// Put a message on `destination` without going through a client
    pub fn publish(
        &self,
        destination: &DestinationName,
        message: &OutboundMessage,
    ) -> Result<String, TransportError> {
        self.with_state(|state| Ok(state.store(destination.as_str(), message)))
    }

    /// Number of messages waiting for delivery on `destination`
    pub fn pending(&self, destination: &DestinationName) -> usize {
        self.state
            .read()
            .map(|state| {
                state
                    .destinations
                    .get(destination.as_str())
                    .map_or(0, VecDeque::len)
            })
            .unwrap_or(0)
    }

    /// Number of delivered but unacknowledged messages on `destination`
    pub fn in_flight(&self, destination: &DestinationName) -> usize {
        self.state
            .read()
            .map(|state| {
                state
                    .connections
                    .values()
                    .flat_map(|c| c.in_flight.iter())
                    .filter(|entry| entry.destination == destination.as_str())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.state
            .read()
            .map(|state| state.connections.values().filter(|c| !c.severed).count())
            .unwrap_or(0)
    }

    /// Drop every open connection as if the network failed.
    ///
    /// In-flight messages return to their destinations immediately and each
    /// client's next operation fails with a lost connection.
    pub fn sever_connections(&self) -> Result<(), TransportError> {
        self.with_state(|state| {
            let mut in_flight = Vec::new();
            for connection in state.connections.values_mut() {
                connection.severed = true;
                connection.subscriptions.clear();
                in_flight.append(&mut connection.in_flight);
            }
            state.requeue(in_flight);
            Ok(())
        })
    }

    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut BrokerState) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        f(&mut state)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// Client connection to an [`InMemoryBroker`]
pub struct InMemoryTransport {
    broker: InMemoryBroker,
    client_id: String,
    connection_id: Option<u64>,
}

impl InMemoryTransport {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.connection_id.is_some()
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Run `f` on this client's connection, opening one if needed
    fn with_connection<R>(
        &mut self,
        f: impl FnOnce(&mut BrokerState, u64) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let client_id = &self.client_id;
        let connection_id = &mut self.connection_id;

        self.broker.with_state(|state| {
            let id = match *connection_id {
                Some(id) => {
                    let severed = state.connections.get(&id).map_or(true, |c| c.severed);
                    if severed {
                        state.close(id);
                        *connection_id = None;
                        return Err(TransportError::ConnectionLost {
                            message: format!("connection of '{}' was closed by the broker", client_id),
                        });
                    }
                    id
                }
                None => {
                    state.next_connection_id += 1;
                    let id = state.next_connection_id;
                    state.connections.insert(id, Connection::new(client_id));
                    debug!(client_id = %client_id, connection = id, "Opened in-memory connection");
                    *connection_id = Some(id);
                    id
                }
            };
            f(state, id)
        })
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(
        &mut self,
        destination: &DestinationName,
        message: &OutboundMessage,
    ) -> Result<bool, TransportError> {
        let message_id = self.with_connection(|state, _| Ok(state.store(destination.as_str(), message)))?;
        trace!(destination = %destination, message_id = %message_id, "Stored message");
        Ok(true)
    }

    async fn read(&mut self) -> Result<Option<Frame>, TransportError> {
        let delivered = self.with_connection(|state, id| Ok(state.deliver(id)))?;
        if delivered.is_none() {
            tokio::time::sleep(self.broker.idle_interval).await;
        }
        Ok(delivered)
    }

    async fn ack(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let ack_id = frame
            .ack_id()
            .ok_or_else(|| TransportError::AckFailed {
                ack_id: String::new(),
                message: "frame carries no ack or message-id header".to_string(),
            })?
            .to_string();

        self.with_connection(|state, id| {
            let unknown = || TransportError::AckFailed {
                ack_id: ack_id.clone(),
                message: "no unacknowledged message with this id on the connection".to_string(),
            };
            let connection = state.connections.get_mut(&id).ok_or_else(unknown)?;
            let position = connection
                .in_flight
                .iter()
                .position(|entry| entry.message.message_id == ack_id)
                .ok_or_else(unknown)?;

            let acked = &connection.in_flight[position];
            match acked.ack_mode {
                // Cumulative: everything delivered earlier on the subscription
                AckMode::Client => {
                    let subscription_id = acked.subscription_id.clone();
                    let mut index = 0;
                    connection.in_flight.retain(|entry| {
                        let keep = index > position || entry.subscription_id != subscription_id;
                        index += 1;
                        keep
                    });
                }
                AckMode::ClientIndividual | AckMode::Auto => {
                    connection.in_flight.remove(position);
                }
            }
            Ok(())
        })
    }

    async fn subscribe(
        &mut self,
        destination: &DestinationName,
        ack_mode: AckMode,
        subscription_id: &str,
    ) -> Result<(), TransportError> {
        self.with_connection(|state, id| {
            state.destination(destination.as_str());
            let connection = state.connections.get_mut(&id).ok_or_else(|| {
                TransportError::SubscribeFailed {
                    destination: destination.to_string(),
                    message: "connection not found".to_string(),
                }
            })?;

            let subscription = Subscription {
                id: subscription_id.to_string(),
                destination: destination.as_str().to_string(),
                ack_mode,
            };
            match connection
                .subscriptions
                .iter_mut()
                .find(|s| s.id == subscription_id)
            {
                Some(existing) => *existing = subscription,
                None => connection.subscriptions.push(subscription),
            }
            Ok(())
        })
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(id) = self.connection_id.take() {
            self.broker.with_state(|state| {
                state.close(id);
                Ok(())
            })?;
        }
        Ok(())
    }
}

impl Drop for InMemoryTransport {
    fn drop(&mut self) {
        if let Some(id) = self.connection_id.take() {
            if let Ok(mut state) = self.broker.state.write() {
                state.close(id);
            }
        }
    }
}
