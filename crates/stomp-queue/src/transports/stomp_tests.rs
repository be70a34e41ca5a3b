//! Tests for the STOMP TCP client against a scripted broker socket.

use super::*;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

fn jobs() -> DestinationName {
    DestinationName::new("/queue/jobs").unwrap()
}

fn settings_for(ports: &[u16]) -> QueueSettings {
    QueueSettings::new(
        "worker-1",
        ports.iter().map(|p| format!("127.0.0.1:{}", p)).collect(),
        "/queue/jobs",
    )
}

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Port with nothing listening on it
async fn closed_port() -> u16 {
    let (listener, port) = listener().await;
    drop(listener);
    port
}

/// Broker side of one accepted connection
struct BrokerSide {
    stream: TcpStream,
    buf: BytesMut,
}

impl BrokerSide {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Accept a connection and complete the handshake, returning the CONNECT frame
    async fn handshake(listener: &TcpListener, heart_beat: &str) -> (Self, Frame) {
        let mut side = Self::accept(listener).await;
        let connect = side.next_frame().await;
        side.send(
            &Frame::new(command::CONNECTED)
                .header(header::VERSION, "1.2")
                .header(header::HEART_BEAT, heart_beat),
        )
        .await;
        (side, connect)
    }

    async fn next_frame(&mut self) -> Frame {
        loop {
            match frame::decode(&mut self.buf, DEFAULT_MAX_FRAME_SIZE).unwrap() {
                Some(StompItem::Frame(frame)) => return frame,
                Some(StompItem::Heartbeat) => continue,
                None => {
                    let n = self.stream.read_buf(&mut self.buf).await.unwrap();
                    assert!(n > 0, "client closed the connection");
                }
            }
        }
    }

    async fn send(&mut self, frame: &Frame) {
        self.stream.write_all(&frame.encode()).await.unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }
}

fn spawn_broker<F, Fut>(listener: TcpListener, script: F) -> JoinHandle<Vec<Frame>>
where
    F: FnOnce(TcpListener) -> Fut,
    Fut: std::future::Future<Output = Vec<Frame>> + Send + 'static,
{
    tokio::spawn(script(listener))
}

// ============================================================================
// Heart-beat negotiation tests
// ============================================================================

mod heartbeat_tests {
    use super::*;

    /// Verify that the slower of the two intervals wins.
    #[test]
    fn test_negotiates_larger_interval() {
        let requested = Some(Duration::from_millis(1000));

        assert_eq!(
            negotiate_heartbeat(requested, Some("4000,0")),
            Some(Duration::from_millis(4000))
        );
        assert_eq!(
            negotiate_heartbeat(requested, Some("500,0")),
            Some(Duration::from_millis(1000))
        );
    }

    /// Verify that heart-beating is off when either side declines.
    #[test]
    fn test_disabled_when_declined() {
        assert_eq!(negotiate_heartbeat(None, Some("1000,1000")), None);
        assert_eq!(negotiate_heartbeat(Some(Duration::from_secs(1)), Some("0,1000")), None);
        assert_eq!(negotiate_heartbeat(Some(Duration::from_secs(1)), None), None);
        assert_eq!(negotiate_heartbeat(Some(Duration::from_secs(1)), Some("garbage")), None);
    }
}

// ============================================================================
// Construction tests
// ============================================================================

mod construction_tests {
    use super::*;

    /// Verify that the client is built from settings without connecting.
    #[test]
    fn test_new_is_lazy() {
        let client = StompClient::new(&settings_for(&[61613, 61614])).unwrap();

        assert!(!client.is_connected());
        assert_eq!(client.client_id(), "worker-1");
        assert_eq!(client.brokers().len(), 2);
    }

    /// Verify that unusable broker lists are rejected.
    #[test]
    fn test_new_rejects_bad_brokers() {
        let none = QueueSettings::new("worker-1", vec![], "/queue/jobs");
        assert!(StompClient::new(&none).is_err());

        let bad = QueueSettings::new("worker-1", vec!["no-port".to_string()], "/queue/jobs");
        assert!(StompClient::new(&bad).is_err());
    }
}

// ============================================================================
// Protocol tests
// ============================================================================

mod protocol_tests {
    use super::*;

    /// Verify the CONNECT headers and the SEND frame written for a message.
    #[tokio::test]
    async fn test_connect_and_send() {
        let (listener, port) = listener().await;
        let broker = spawn_broker(listener, |listener| async move {
            let (mut side, connect) = BrokerSide::handshake(&listener, "0,0").await;
            let send = side.next_frame().await;
            vec![connect, send]
        });

        let settings = settings_for(&[port])
            .with_credentials("app", "secret")
            .with_heartbeat(Duration::from_secs(5));
        let mut client = StompClient::new(&settings).unwrap();
        let message = OutboundMessage::text("hello").with_header("priority", "4");

        assert!(client.send(&jobs(), &message).await.unwrap());

        let frames = broker.await.unwrap();
        let connect = &frames[0];
        assert_eq!(connect.command(), command::CONNECT);
        assert_eq!(connect.get_header(header::ACCEPT_VERSION), Some("1.2"));
        assert_eq!(connect.get_header(header::HOST), Some("127.0.0.1"));
        assert_eq!(connect.get_header(header::CLIENT_ID), Some("worker-1"));
        assert_eq!(connect.get_header(header::LOGIN), Some("app"));
        assert_eq!(connect.get_header(header::PASSCODE), Some("secret"));
        assert_eq!(connect.get_header(header::HEART_BEAT), Some("0,5000"));

        let send = &frames[1];
        assert_eq!(send.command(), command::SEND);
        assert_eq!(send.get_header(header::DESTINATION), Some("/queue/jobs"));
        assert_eq!(send.get_header("priority"), Some("4"));
        assert_eq!(send.body().as_ref(), b"hello");
        assert!(client.is_connected());
    }

    /// Verify subscribe, message delivery, heart-beats and acknowledgement.
    #[tokio::test]
    async fn test_subscribe_read_and_ack() {
        let (listener, port) = listener().await;
        let broker = spawn_broker(listener, |listener| async move {
            let (mut side, _) = BrokerSide::handshake(&listener, "0,0").await;
            let subscribe = side.next_frame().await;
            side.send_raw(b"\n").await;
            side.send(
                &Frame::new(command::MESSAGE)
                    .header(header::DESTINATION, "/queue/jobs")
                    .header(header::MESSAGE_ID, "ID:42")
                    .header(header::SUBSCRIPTION, "/queue/jobs")
                    .header(header::ACK, "ack-42")
                    .with_body("work"),
            )
            .await;
            let ack = side.next_frame().await;
            vec![subscribe, ack]
        });

        let mut client = StompClient::new(&settings_for(&[port])).unwrap();
        client
            .subscribe(&jobs(), AckMode::Client, "/queue/jobs")
            .await
            .unwrap();

        let mut received = None;
        while received.is_none() {
            received = client.read().await.unwrap();
        }
        let message = received.unwrap();
        assert_eq!(message.message_id(), Some("ID:42"));
        assert_eq!(message.body().as_ref(), b"work");
        client.ack(&message).await.unwrap();

        let frames = broker.await.unwrap();
        let subscribe = &frames[0];
        assert_eq!(subscribe.command(), command::SUBSCRIBE);
        assert_eq!(subscribe.get_header(header::ID), Some("/queue/jobs"));
        assert_eq!(subscribe.get_header(header::DESTINATION), Some("/queue/jobs"));
        assert_eq!(subscribe.get_header(header::ACK), Some("client"));
        assert_eq!(
            subscribe.get_header(header::SUBSCRIPTION_NAME),
            Some("/queue/jobs")
        );

        let ack = &frames[1];
        assert_eq!(ack.command(), command::ACK);
        assert_eq!(ack.get_header(header::ID), Some("ack-42"));
    }

    /// Verify that a heart-beat read yields nothing.
    #[tokio::test]
    async fn test_heartbeat_read_is_none() {
        let (listener, port) = listener().await;
        let broker = spawn_broker(listener, |listener| async move {
            let (mut side, _) = BrokerSide::handshake(&listener, "0,0").await;
            side.send_raw(b"\r\n").await;
            // Keep the socket open until the client is done
            let _ = side.next_frame().await;
            Vec::new()
        });

        let mut client = StompClient::new(&settings_for(&[port])).unwrap();

        assert!(client.read().await.unwrap().is_none());
        client.disconnect().await.unwrap();
        broker.await.unwrap();
    }

    /// Verify that an ERROR frame while reading is a rejection that drops the connection.
    #[tokio::test]
    async fn test_error_frame_while_reading() {
        let (listener, port) = listener().await;
        let _broker = spawn_broker(listener, |listener| async move {
            let (mut side, _) = BrokerSide::handshake(&listener, "0,0").await;
            side.send(
                &Frame::new(command::ERROR)
                    .header(header::MESSAGE, "subscription refused"),
            )
            .await;
            Vec::new()
        });

        let mut client = StompClient::new(&settings_for(&[port])).unwrap();

        let err = client.read().await.unwrap_err();
        assert!(
            matches!(&err, TransportError::Rejected { message } if message == "subscription refused"),
            "got: {:?}",
            err
        );
        assert!(!client.is_connected());
    }

    /// Verify that acknowledging a frame without identifiers fails locally.
    #[tokio::test]
    async fn test_ack_without_id_fails_without_connecting() {
        let mut client = StompClient::new(&settings_for(&[closed_port().await])).unwrap();

        let err = client.ack(&Frame::new(command::MESSAGE)).await.unwrap_err();

        assert!(matches!(err, TransportError::AckFailed { .. }));
        assert!(!client.is_connected());
    }
}

// ============================================================================
// Connection management tests
// ============================================================================

mod connection_tests {
    use super::*;

    /// Verify that a broker ERROR during the handshake is a rejection.
    #[tokio::test]
    async fn test_connect_rejected() {
        let (listener, port) = listener().await;
        let _broker = spawn_broker(listener, |listener| async move {
            let mut side = BrokerSide::accept(&listener).await;
            let connect = side.next_frame().await;
            side.send(&Frame::new(command::ERROR).header(header::MESSAGE, "bad credentials"))
                .await;
            vec![connect]
        });

        let mut client = StompClient::new(&settings_for(&[port])).unwrap();

        let err = client.send(&jobs(), &OutboundMessage::text("x")).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected { .. }), "got: {:?}", err);
        assert!(err.requires_reconnect());
        assert!(!client.is_connected());
    }

    /// Verify that a broker answering with an older protocol version is refused.
    #[tokio::test]
    async fn test_connect_requires_stomp_1_2() {
        let (listener, port) = listener().await;
        let _broker = spawn_broker(listener, |listener| async move {
            let mut side = BrokerSide::accept(&listener).await;
            let connect = side.next_frame().await;
            side.send(&Frame::new(command::CONNECTED).header(header::VERSION, "1.1"))
                .await;
            vec![connect]
        });

        let mut client = StompClient::new(&settings_for(&[port])).unwrap();

        let err = client.read().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed { .. }), "got: {:?}", err);
        assert!(err.to_string().contains("1.1"));
        assert!(!client.is_connected());
    }

    /// Verify that a CONNECTED reply without a version is treated as STOMP 1.0 and refused.
    #[tokio::test]
    async fn test_connect_without_version_refused() {
        let (listener, port) = listener().await;
        let _broker = spawn_broker(listener, |listener| async move {
            let mut side = BrokerSide::accept(&listener).await;
            let connect = side.next_frame().await;
            side.send(&Frame::new(command::CONNECTED)).await;
            vec![connect]
        });

        let mut client = StompClient::new(&settings_for(&[port])).unwrap();

        let err = client.send(&jobs(), &OutboundMessage::text("x")).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed { .. }), "got: {:?}", err);
        assert!(!client.is_connected());
    }

    /// Verify that the client fails over to the next broker.
    #[tokio::test]
    async fn test_failover_to_next_broker() {
        let dead = closed_port().await;
        let (listener, port) = listener().await;
        let broker = spawn_broker(listener, |listener| async move {
            let (mut side, connect) = BrokerSide::handshake(&listener, "0,0").await;
            let send = side.next_frame().await;
            vec![connect, send]
        });

        let mut client = StompClient::new(&settings_for(&[dead, port])).unwrap();

        assert!(client.send(&jobs(), &OutboundMessage::text("x")).await.unwrap());
        assert_eq!(client.connected_broker().map(|b| b.port()), Some(port));
        assert_eq!(broker.await.unwrap().len(), 2);
    }

    /// Verify that an unreachable broker list is a connection failure.
    #[tokio::test]
    async fn test_all_brokers_unreachable() {
        let mut client = StompClient::new(&settings_for(&[closed_port().await])).unwrap();

        let err = client.read().await.unwrap_err();

        assert!(matches!(err, TransportError::ConnectionFailed { .. }));
        assert!(!client.is_connected());
    }

    /// Verify that silence beyond twice the heart-beat interval is a lost connection.
    #[tokio::test]
    async fn test_heartbeat_timeout() {
        let (listener, port) = listener().await;
        let _broker = spawn_broker(listener, |listener| async move {
            let (side, _) = BrokerSide::handshake(&listener, "50,0").await;
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(side);
            Vec::new()
        });

        let settings = settings_for(&[port]).with_heartbeat(Duration::from_millis(50));
        let mut client = StompClient::new(&settings).unwrap();

        let err = client.read().await.unwrap_err();

        assert!(matches!(err, TransportError::ConnectionLost { .. }), "got: {:?}", err);
        assert!(!client.is_connected());
    }

    /// Verify that a closed socket is detected and the next operation reconnects.
    #[tokio::test]
    async fn test_reconnects_after_close() {
        let (listener, port) = listener().await;
        let broker = spawn_broker(listener, |listener| async move {
            let (first, _) = BrokerSide::handshake(&listener, "0,0").await;
            drop(first);
            let (mut second, connect) = BrokerSide::handshake(&listener, "0,0").await;
            let send = second.next_frame().await;
            vec![connect, send]
        });

        let mut client = StompClient::new(&settings_for(&[port])).unwrap();

        let err = client.read().await.unwrap_err();
        assert!(err.requires_reconnect());
        assert!(!client.is_connected());

        assert!(client.send(&jobs(), &OutboundMessage::text("again")).await.unwrap());
        let frames = broker.await.unwrap();
        assert_eq!(frames[0].command(), command::CONNECT);
        assert_eq!(frames[1].body().as_ref(), b"again");
    }

    /// Verify that disconnect sends DISCONNECT and closes the connection.
    #[tokio::test]
    async fn test_disconnect_sends_frame() {
        let (listener, port) = listener().await;
        let broker = spawn_broker(listener, |listener| async move {
            let (mut side, _) = BrokerSide::handshake(&listener, "0,0").await;
            let send = side.next_frame().await;
            let disconnect = side.next_frame().await;
            vec![send, disconnect]
        });

        let mut client = StompClient::new(&settings_for(&[port])).unwrap();
        client.send(&jobs(), &OutboundMessage::text("x")).await.unwrap();
        client.disconnect().await.unwrap();

        assert!(!client.is_connected());
        let frames = broker.await.unwrap();
        assert_eq!(frames[1].command(), command::DISCONNECT);

        // Disconnecting again is a no-op
        client.disconnect().await.unwrap();
    }
}
