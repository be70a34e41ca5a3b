//! Durable subscription handle wrapping a transport client.
//!
//! The handle pairs the transport with a stable subscription identity (the
//! destination name) and the `client` acknowledgement mode. Every send, read
//! and ack goes through [`DurableSubscription::activate`] first, so a
//! subscription lost with its connection is re-established on next use
//! without the caller tracking connection state.

use crate::error::TransportError;
use crate::frame::Frame;
use crate::message::{DestinationName, OutboundMessage};
use crate::transport::{AckMode, Transport};
use tracing::{debug, warn};

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;

/// A transport client bound to one durable subscription
pub struct DurableSubscription<T> {
    transport: T,
    destination: DestinationName,
    ack_mode: AckMode,
    subscription_id: String,
    active: bool,
}

impl<T: Transport> DurableSubscription<T> {
    /// Bind `transport` to a client-acknowledged subscription on `destination`
    pub fn new(transport: T, destination: DestinationName) -> Self {
        let subscription_id = destination.as_str().to_string();
        Self {
            transport,
            destination,
            ack_mode: AckMode::Client,
            subscription_id,
            active: false,
        }
    }

    pub fn destination(&self) -> &DestinationName {
        &self.destination
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Subscribe unless already subscribed.
    ///
    /// Calling this while active performs no handshake and leaves the
    /// broker's acknowledgement state alone.
    pub async fn activate(&mut self) -> Result<(), TransportError> {
        if self.active {
            return Ok(());
        }

        debug!(
            destination = %self.destination,
            subscription = %self.subscription_id,
            ack = self.ack_mode.as_header(),
            "Activating durable subscription"
        );

        let result = self
            .transport
            .subscribe(&self.destination, self.ack_mode, &self.subscription_id)
            .await;
        self.observe(result)?;
        self.active = true;
        Ok(())
    }

    /// Send a message to the subscribed destination
    pub async fn send(&mut self, message: &OutboundMessage) -> Result<bool, TransportError> {
        self.activate().await?;
        let result = self.transport.send(&self.destination, message).await;
        self.observe(result)
    }

    /// Read the next frame, `None` for reads that yield nothing
    pub async fn read(&mut self) -> Result<Option<Frame>, TransportError> {
        self.activate().await?;
        let result = self.transport.read().await;
        self.observe(result)
    }

    /// Acknowledge a frame received on this subscription
    pub async fn ack(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.activate().await?;
        let result = self.transport.ack(frame).await;
        self.observe(result)
    }

    /// Close the connection; the next operation subscribes again
    pub async fn deactivate(&mut self) -> Result<(), TransportError> {
        self.active = false;
        self.transport.disconnect().await
    }

    fn observe<R>(&mut self, result: Result<R, TransportError>) -> Result<R, TransportError> {
        if let Err(e) = &result {
            if e.requires_reconnect() && self.active {
                warn!(
                    destination = %self.destination,
                    error = %e,
                    "Subscription lost with its connection"
                );
                self.active = false;
            }
        }
        result
    }
}
