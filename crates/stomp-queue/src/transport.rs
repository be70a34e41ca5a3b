//! Capability interface consumed from a message-transport client.

use crate::error::TransportError;
use crate::frame::Frame;
use crate::message::{DestinationName, OutboundMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Acknowledgement mode requested when subscribing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckMode {
    /// Broker considers a message consumed as soon as it is delivered
    Auto,
    /// Acknowledging a message also acknowledges everything delivered before it
    Client,
    /// Each message is acknowledged on its own
    ClientIndividual,
}

impl AckMode {
    /// Value of the SUBSCRIBE `ack` header
    pub fn as_header(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Client => "client",
            Self::ClientIndividual => "client-individual",
        }
    }
}

/// Client side of a publish/subscribe broker connection.
///
/// Implementations own their connection and establish it lazily; an
/// operation failing with [`TransportError::requires_reconnect`] leaves the
/// client ready to reconnect on the next call.
#[async_trait]
pub trait Transport: Send {
    /// Send a message to a destination
    async fn send(
        &mut self,
        destination: &DestinationName,
        message: &OutboundMessage,
    ) -> Result<bool, TransportError>;

    /// Read the next frame.
    ///
    /// `Ok(None)` means the read produced nothing, such as a heart-beat.
    async fn read(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Acknowledge a frame previously returned by [`Transport::read`]
    async fn ack(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Perform the subscribe handshake
    async fn subscribe(
        &mut self,
        destination: &DestinationName,
        ack_mode: AckMode,
        subscription_id: &str,
    ) -> Result<(), TransportError>;

    /// Close the connection
    async fn disconnect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(
        &mut self,
        destination: &DestinationName,
        message: &OutboundMessage,
    ) -> Result<bool, TransportError> {
        (**self).send(destination, message).await
    }

    async fn read(&mut self) -> Result<Option<Frame>, TransportError> {
        (**self).read().await
    }

    async fn ack(&mut self, frame: &Frame) -> Result<(), TransportError> {
        (**self).ack(frame).await
    }

    async fn subscribe(
        &mut self,
        destination: &DestinationName,
        ack_mode: AckMode,
        subscription_id: &str,
    ) -> Result<(), TransportError> {
        (**self).subscribe(destination, ack_mode, subscription_id).await
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        (**self).disconnect().await
    }
}
