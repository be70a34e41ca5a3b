//! Scripted transport shared by unit tests.

use crate::error::TransportError;
use crate::frame::{command, header, Frame};
use crate::message::{DestinationName, OutboundMessage};
use crate::transport::{AckMode, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;

/// Transport that replays queued results and records every call.
///
/// Empty scripts succeed, except reads which fail with a lost connection so
/// that claim loops always terminate.
#[derive(Default)]
pub struct ScriptedTransport {
    pub reads: VecDeque<Result<Option<Frame>, TransportError>>,
    pub send_results: VecDeque<Result<bool, TransportError>>,
    pub ack_results: VecDeque<Result<(), TransportError>>,
    pub subscribe_results: VecDeque<Result<(), TransportError>>,

    pub subscribes: Vec<(String, AckMode, String)>,
    pub sent: Vec<(String, OutboundMessage)>,
    pub acked: Vec<Frame>,
    pub read_calls: usize,
    pub disconnects: usize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reads(
        mut self,
        reads: impl IntoIterator<Item = Result<Option<Frame>, TransportError>>,
    ) -> Self {
        self.reads.extend(reads);
        self
    }

    /// Number of calls of any kind that reached the transport
    pub fn total_calls(&self) -> usize {
        self.subscribes.len() + self.sent.len() + self.acked.len() + self.read_calls + self.disconnects
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &mut self,
        destination: &DestinationName,
        message: &OutboundMessage,
    ) -> Result<bool, TransportError> {
        self.sent
            .push((destination.as_str().to_string(), message.clone()));
        self.send_results.pop_front().unwrap_or(Ok(true))
    }

    async fn read(&mut self) -> Result<Option<Frame>, TransportError> {
        self.read_calls += 1;
        self.reads.pop_front().unwrap_or_else(|| {
            Err(TransportError::ConnectionLost {
                message: "script exhausted".to_string(),
            })
        })
    }

    async fn ack(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.acked.push(frame.clone());
        self.ack_results.pop_front().unwrap_or(Ok(()))
    }

    async fn subscribe(
        &mut self,
        destination: &DestinationName,
        ack_mode: AckMode,
        subscription_id: &str,
    ) -> Result<(), TransportError> {
        self.subscribes.push((
            destination.as_str().to_string(),
            ack_mode,
            subscription_id.to_string(),
        ));
        self.subscribe_results.pop_front().unwrap_or(Ok(()))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.disconnects += 1;
        Ok(())
    }
}

/// MESSAGE frame as a broker would deliver it
pub fn message_frame(id: &str, body: &str) -> Frame {
    Frame::new(command::MESSAGE)
        .header(header::DESTINATION, "/queue/jobs")
        .header(header::MESSAGE_ID, id)
        .header(header::SUBSCRIPTION, "/queue/jobs")
        .header(header::ACK, id)
        .with_body(body.to_string())
}

pub fn connection_lost() -> TransportError {
    TransportError::ConnectionLost {
        message: "connection reset by peer".to_string(),
    }
}

pub fn jobs() -> DestinationName {
    DestinationName::new("/queue/jobs").unwrap()
}
