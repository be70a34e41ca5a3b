//! STOMP 1.2 client over TCP.
//!
//! The client connects lazily on its first operation, trying each configured
//! broker in order until one accepts the CONNECT handshake and answers with
//! a STOMP 1.2 session. Any error that
//! leaves the connection in an unknown state drops it, so the next operation
//! starts over with a fresh handshake.
//!
//! When a heart-beat interval is configured the client asks the broker to
//! send heart-beats (`heart-beat:0,<ms>`) and treats twice the negotiated
//! interval without any incoming bytes as a lost connection.

use crate::config::{BrokerAddress, QueueSettings};
use crate::error::{ConfigurationError, TransportError};
use crate::frame::{self, command, header, Frame, StompItem, DEFAULT_MAX_FRAME_SIZE};
use crate::message::{DestinationName, OutboundMessage};
use crate::transport::{AckMode, Transport};
use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

#[cfg(test)]
#[path = "stomp_tests.rs"]
mod tests;

const STOMP_VERSION: &str = "1.2";
const INITIAL_BUFFER_SIZE: usize = 8 * 1024;

/// Interval at which the broker should send heart-beats.
///
/// `requested` is the interval this client asked for; `server_header` is the
/// `heart-beat` header of the CONNECTED frame. Returns `None` when either side
/// declines heart-beating.
pub fn negotiate_heartbeat(requested: Option<Duration>, server_header: Option<&str>) -> Option<Duration> {
    let requested = requested?.as_millis() as u64;
    let (server_send, _) = server_header?.split_once(',')?;
    let server_send: u64 = server_send.trim().parse().ok()?;

    if requested == 0 || server_send == 0 {
        return None;
    }
    Some(Duration::from_millis(requested.max(server_send)))
}

// ============================================================================
// Connection
// ============================================================================

/// An established, handshaken connection to one broker
struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    broker: BrokerAddress,
    read_timeout: Option<Duration>,
    max_frame_size: usize,
}

impl Connection {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        trace!(broker = %self.broker, command = frame.command(), "Writing frame");
        self.stream.write_all(&frame.encode()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next frame or heart-beat
    async fn next_item(&mut self) -> Result<StompItem, TransportError> {
        loop {
            if let Some(item) = frame::decode(&mut self.read_buf, self.max_frame_size)? {
                return Ok(item);
            }

            let read = self.stream.read_buf(&mut self.read_buf);
            let n = match self.read_timeout {
                Some(timeout) => tokio::time::timeout(timeout, read).await.map_err(|_| {
                    TransportError::ConnectionLost {
                        message: format!("no data from {} within {:?}", self.broker, timeout),
                    }
                })??,
                None => read.await?,
            };

            if n == 0 {
                return Err(TransportError::ConnectionLost {
                    message: format!("{} closed the connection", self.broker),
                });
            }
        }
    }
}

// ============================================================================
// StompClient
// ============================================================================

/// STOMP transport connecting to the brokers of one queue's settings
pub struct StompClient {
    client_id: String,
    brokers: Vec<BrokerAddress>,
    login: Option<String>,
    passcode: Option<String>,
    heartbeat: Option<Duration>,
    connect_timeout: Duration,
    max_frame_size: usize,
    connection: Option<Connection>,
}

impl StompClient {
    /// Create a client; no connection is opened until first use
    pub fn new(settings: &QueueSettings) -> Result<Self, ConfigurationError> {
        let brokers = settings
            .broker_addresses()
            .map_err(|e| ConfigurationError::Invalid {
                message: e.to_string(),
            })?;
        if brokers.is_empty() {
            return Err(ConfigurationError::Invalid {
                message: "at least one broker address is required".to_string(),
            });
        }

        Ok(Self {
            client_id: settings.client_id().to_string(),
            brokers,
            login: settings.login().map(str::to_string),
            passcode: settings.passcode().map(str::to_string),
            heartbeat: settings.heartbeat(),
            connect_timeout: settings.connect_timeout(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connection: None,
        })
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn brokers(&self) -> &[BrokerAddress] {
        &self.brokers
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Broker of the current connection, if any
    pub fn connected_broker(&self) -> Option<&BrokerAddress> {
        self.connection.as_ref().map(|c| &c.broker)
    }

    async fn connection(&mut self) -> Result<&mut Connection, TransportError> {
        if self.connection.is_none() {
            self.connection = Some(self.connect().await?);
        }
        self.connection
            .as_mut()
            .ok_or_else(|| TransportError::ConnectionLost {
                message: "not connected".to_string(),
            })
    }

    /// Try each broker in order and return the first established connection
    async fn connect(&self) -> Result<Connection, TransportError> {
        let mut last_error = None;

        for broker in &self.brokers {
            match self.connect_to(broker).await {
                Ok(connection) => {
                    info!(
                        client_id = %self.client_id,
                        broker = %broker,
                        heartbeat_ms = connection.read_timeout.map(|t| t.as_millis() as u64 / 2),
                        "Connected to broker"
                    );
                    return Ok(connection);
                }
                Err(e) => {
                    warn!(client_id = %self.client_id, broker = %broker, error = %e, "Failed to connect to broker");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TransportError::ConnectionFailed {
            message: "no brokers configured".to_string(),
        }))
    }

    async fn connect_to(&self, broker: &BrokerAddress) -> Result<Connection, TransportError> {
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((broker.host(), broker.port())),
        )
        .await
        .map_err(|_| TransportError::ConnectionFailed {
            message: format!("timed out connecting to {}", broker),
        })?
        .map_err(|e| TransportError::ConnectionFailed {
            message: format!("{}: {}", broker, e),
        })?;
        stream.set_nodelay(true)?;

        let mut connection = Connection {
            stream,
            read_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            broker: broker.clone(),
            read_timeout: None,
            max_frame_size: self.max_frame_size,
        };

        connection.write_frame(&self.connect_frame(broker)).await?;

        let reply = tokio::time::timeout(self.connect_timeout, async {
            loop {
                if let StompItem::Frame(frame) = connection.next_item().await? {
                    return Ok::<_, TransportError>(frame);
                }
            }
        })
        .await
        .map_err(|_| TransportError::ConnectionFailed {
            message: format!("{} did not answer CONNECT", broker),
        })??;

        match reply.command() {
            command::CONNECTED => {
                // ACK frames use the 1.2 `id` header; older sessions cannot be acked.
                let version = reply.get_header(header::VERSION).unwrap_or("1.0");
                if version != STOMP_VERSION {
                    return Err(TransportError::ConnectionFailed {
                        message: format!(
                            "{} negotiated STOMP {}, {} is required",
                            broker, version, STOMP_VERSION
                        ),
                    });
                }

                let interval = negotiate_heartbeat(self.heartbeat, reply.get_header(header::HEART_BEAT));
                connection.read_timeout = interval.map(|i| i * 2);
                debug!(broker = %broker, version, "STOMP session established");
                Ok(connection)
            }
            command::ERROR => Err(rejection(&reply)),
            other => Err(TransportError::ConnectionFailed {
                message: format!("{} answered CONNECT with {}", broker, other),
            }),
        }
    }

    fn connect_frame(&self, broker: &BrokerAddress) -> Frame {
        let mut frame = Frame::new(command::CONNECT)
            .header(header::ACCEPT_VERSION, STOMP_VERSION)
            .header(header::HOST, broker.host())
            .header(header::CLIENT_ID, self.client_id.as_str());
        if let Some(login) = &self.login {
            frame = frame.header(header::LOGIN, login.as_str());
        }
        if let Some(passcode) = &self.passcode {
            frame = frame.header(header::PASSCODE, passcode.as_str());
        }
        if let Some(interval) = self.heartbeat {
            frame = frame.header(header::HEART_BEAT, format!("0,{}", interval.as_millis()));
        }
        frame
    }

    async fn write(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let result = match self.connection().await {
            Ok(connection) => connection.write_frame(frame).await,
            Err(e) => Err(e),
        };
        self.observe(result)
    }

    /// Drop the connection when `result` leaves it unusable
    fn observe<R>(&mut self, result: Result<R, TransportError>) -> Result<R, TransportError> {
        if let Err(e) = &result {
            if e.requires_reconnect() {
                if let Some(connection) = self.connection.take() {
                    warn!(
                        client_id = %self.client_id,
                        broker = %connection.broker,
                        error = %e,
                        "Dropping broker connection"
                    );
                }
            }
        }
        result
    }
}

fn rejection(frame: &Frame) -> TransportError {
    let message = frame
        .get_header(header::MESSAGE)
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(frame.body()).trim().to_string());
    TransportError::Rejected { message }
}

#[async_trait]
impl Transport for StompClient {
    async fn send(
        &mut self,
        destination: &DestinationName,
        message: &OutboundMessage,
    ) -> Result<bool, TransportError> {
        let mut frame = Frame::new(command::SEND).header(header::DESTINATION, destination.as_str());
        for (name, value) in &message.headers {
            if name != header::CONTENT_LENGTH && name != header::DESTINATION {
                frame = frame.header(name.as_str(), value.as_str());
            }
        }
        let frame = frame.with_body(message.body.clone());

        self.write(&frame).await?;
        Ok(true)
    }

    async fn read(&mut self) -> Result<Option<Frame>, TransportError> {
        let result = match self.connection().await {
            Ok(connection) => connection.next_item().await,
            Err(e) => Err(e),
        };

        let item = match self.observe(result)? {
            StompItem::Heartbeat => return Ok(None),
            StompItem::Frame(frame) => frame,
        };

        if item.command() == command::ERROR {
            return self.observe(Err(rejection(&item)));
        }
        Ok(Some(item))
    }

    async fn ack(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let ack_id = frame.ack_id().ok_or_else(|| TransportError::AckFailed {
            ack_id: String::new(),
            message: "frame carries no ack or message-id header".to_string(),
        })?;

        let ack = Frame::new(command::ACK).header(header::ID, ack_id);
        self.write(&ack).await
    }

    async fn subscribe(
        &mut self,
        destination: &DestinationName,
        ack_mode: AckMode,
        subscription_id: &str,
    ) -> Result<(), TransportError> {
        let frame = Frame::new(command::SUBSCRIBE)
            .header(header::ID, subscription_id)
            .header(header::DESTINATION, destination.as_str())
            .header(header::ACK, ack_mode.as_header())
            .header(header::SUBSCRIPTION_NAME, subscription_id);
        self.write(&frame).await
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };

        debug!(client_id = %self.client_id, broker = %connection.broker, "Disconnecting from broker");
        connection
            .write_frame(&Frame::new(command::DISCONNECT))
            .await?;
        connection.stream.shutdown().await?;
        Ok(())
    }
}
