//! Reliable queue contract and its STOMP-backed implementation.
//!
//! [`ReliableQueue`] is the broker-agnostic claim/ack/release interface job
//! runners program against. [`StompQueue`] maps it onto a durable,
//! client-acknowledged subscription:
//!
//! - `enqueue` sends to the destination through the outbound hooks
//! - `claim` blocks until the next message is read
//! - `acknowledge` acks the frame the item was read from
//! - `release` does nothing; a message that is never acknowledged is
//!   redelivered by the broker once the connection is re-established
//!
//! Transport failures never escape. They are logged and reported as
//! `false`, `None` or a silent no-op, which is the contract job runners
//! expect from every queue backend.

use crate::config::QueueSettings;
use crate::error::{ConfigurationError, TransportError};
use crate::frame::Frame;
use crate::hook::{dispatch, NoopHook, OutboundHook};
use crate::message::{ClaimedItem, DestinationName, MessageId, Payload};
use crate::subscription::DurableSubscription;
use crate::transport::Transport;
use crate::transports::StompClient;
use async_trait::async_trait;
use chrono::Duration;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;

/// Generic reliable queue interface shared by all queue backends
#[async_trait]
pub trait ReliableQueue: Send {
    /// Name of the underlying queue, used in logs
    fn name(&self) -> &str;

    /// Add data to the queue; `false` if it could not be sent
    async fn enqueue(&mut self, data: Value) -> bool;

    /// Take the next item, waiting as long as it takes for one to arrive.
    ///
    /// `lease_hint` is advisory. Returns `None` only when the backend failed.
    async fn claim(&mut self, lease_hint: Duration) -> Option<ClaimedItem>;

    /// Mark a claimed item as done so it is never delivered again
    async fn acknowledge(&mut self, item: ClaimedItem);

    /// Give up a claimed item so it can be delivered again
    async fn release(&mut self, item: ClaimedItem) -> bool;

    /// Number of items waiting in the queue
    async fn count(&mut self) -> u64;

    async fn create_queue(&mut self) -> bool;

    async fn delete_queue(&mut self) -> bool;

    /// Release the backend connection.
    ///
    /// Pending writes are flushed and anything claimed but not acknowledged
    /// becomes available again. The next operation reconnects.
    async fn close(&mut self);
}

/// Reliable queue over a durable STOMP subscription.
///
/// Owns one connection and is not meant to be shared: run one instance per
/// worker to consume in parallel.
pub struct StompQueue<T> {
    subscription: DurableSubscription<T>,
    hook: Arc<dyn OutboundHook>,
}

impl<T: Transport> StompQueue<T> {
    /// Create queue for `destination` on top of `transport`
    pub fn new(transport: T, destination: DestinationName) -> Self {
        Self {
            subscription: DurableSubscription::new(transport, destination),
            hook: Arc::new(NoopHook),
        }
    }

    /// Replace the outbound hook
    pub fn with_hook(mut self, hook: Arc<dyn OutboundHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn destination(&self) -> &DestinationName {
        self.subscription.destination()
    }

    pub fn subscription(&self) -> &DurableSubscription<T> {
        &self.subscription
    }

    pub fn subscription_mut(&mut self) -> &mut DurableSubscription<T> {
        &mut self.subscription
    }

    async fn try_enqueue(&mut self, data: Value) -> Result<bool, TransportError> {
        let event = dispatch(self.hook.as_ref(), data);
        let Some(message) = event.message else {
            warn!(queue = %self.destination(), "Outbound hook vetoed message; nothing sent");
            return Ok(false);
        };

        self.subscription.send(&message).await
    }

    async fn try_claim(&mut self) -> Result<ClaimedItem, TransportError> {
        let mut reads: u64 = 0;
        loop {
            reads += 1;
            match self.subscription.read().await? {
                Some(frame) => {
                    trace!(queue = %self.destination(), reads, frame = %frame, "Read frame");
                    return Ok(claimed_item(frame));
                }
                // Heart-beats and other empty reads: keep waiting, but let
                // other tasks run in case the transport returned immediately.
                None => tokio::task::yield_now().await,
            }
        }
    }
}

impl StompQueue<StompClient> {
    /// Create a queue backed by a STOMP connection to the configured brokers.
    ///
    /// No connection is opened until the first operation.
    pub fn from_settings(settings: &QueueSettings) -> Result<Self, ConfigurationError> {
        let destination = settings
            .destination_name()
            .map_err(|e| ConfigurationError::Invalid {
                message: e.to_string(),
            })?;
        let client = StompClient::new(settings)?;
        Ok(Self::new(client, destination))
    }
}

fn claimed_item(frame: Frame) -> ClaimedItem {
    let item_id = frame
        .message_id()
        .and_then(|id| id.parse::<MessageId>().ok())
        .unwrap_or_else(MessageId::generate);
    let data = Payload::decode(&frame);
    ClaimedItem::new(item_id, frame, data)
}

#[async_trait]
impl<T: Transport> ReliableQueue for StompQueue<T> {
    fn name(&self) -> &str {
        self.destination().as_str()
    }

    async fn enqueue(&mut self, data: Value) -> bool {
        match self.try_enqueue(data).await {
            Ok(sent) => sent,
            Err(e) => {
                error!(queue = %self.destination(), error = %e, "Failed to enqueue message");
                false
            }
        }
    }

    async fn claim(&mut self, lease_hint: Duration) -> Option<ClaimedItem> {
        debug!(
            queue = %self.destination(),
            lease_seconds = lease_hint.num_seconds(),
            "Claiming next message"
        );

        match self.try_claim().await {
            Ok(item) => Some(item),
            Err(e) => {
                error!(queue = %self.destination(), error = %e, "Failed to claim message");
                None
            }
        }
    }

    async fn acknowledge(&mut self, item: ClaimedItem) {
        let frame = match item.acknowledgeable_frame() {
            Ok(frame) => frame,
            Err(misuse) => {
                debug!(queue = %self.destination(), reason = %misuse, "Ignoring acknowledgement");
                return;
            }
        };

        if let Err(e) = self.subscription.ack(frame).await {
            error!(
                queue = %self.destination(),
                item = %item.item_id,
                error = %e,
                "Failed to acknowledge message"
            );
        }
    }

    async fn release(&mut self, item: ClaimedItem) -> bool {
        trace!(
            queue = %self.destination(),
            item = %item.item_id,
            "Released message; broker redelivers unacknowledged messages"
        );
        true
    }

    async fn count(&mut self) -> u64 {
        // STOMP has no way to ask how many messages are pending.
        0
    }

    async fn create_queue(&mut self) -> bool {
        // Destinations are created by the broker on first send or subscribe.
        true
    }

    async fn delete_queue(&mut self) -> bool {
        true
    }

    async fn close(&mut self) {
        if let Err(e) = self.subscription.deactivate().await {
            warn!(queue = %self.destination(), error = %e, "Failed to close connection");
        }
    }
}
