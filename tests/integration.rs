//! Integration tests for privbridge.
//!
//! These drive a real [`Connection`] against a scripted fake peer.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use common::{attached, get, init_tracing, FakePeer};
use privbridge::error::{BridgeError, OperationError};
use privbridge::operation::{CallbackError, Event, OperationCallback};
use privbridge::protocol::{Headers, Message, MessageKind, Payload, NORMAL_CLOSURE};
use privbridge::session::{HttpRequest, WebSocketEvent};
use privbridge::{Connection, ConnectionState, HttpClient, WebSocketClient};

/// The canonical round trip: GET, headers, one chunk, complete.
#[tokio::test]
async fn test_http_request_round_trip() {
    init_tracing();
    let (connection, mut peer) = attached();

    let mut replies = connection.open_stream(get("r1", "https://x")).unwrap();

    let request = peer.recv().await;
    assert_eq!(request, get("r1", "https://x"));

    peer.headers("r1", 200).await;
    peer.chunk("r1", b"hello").await;
    peer.complete("r1").await;

    assert!(matches!(
        replies.next().await,
        Some(Ok(Event::Head { status: 200, .. }))
    ));
    assert_eq!(
        replies.next().await,
        Some(Ok(Event::Body(Bytes::from_static(b"hello"))))
    );
    assert_eq!(replies.next().await, None);
    assert!(connection.registry().is_empty());
}

#[tokio::test]
async fn test_http_client_buffered_and_streamed() {
    let (connection, mut peer) = attached();
    let client = HttpClient::new(connection.clone());

    let pending = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .request(HttpRequest::post("https://x/upload").body("payload"))
                .await
        }
    });

    let request = peer.recv().await;
    match &request.payload {
        Payload::HttpRequest { method, body, .. } => {
            assert_eq!(method, "POST");
            assert_eq!(&body[..], b"payload");
        }
        other => panic!("unexpected {:?}", other),
    }
    let mut headers = Headers::new();
    headers.insert("Content-Type".into(), "text/plain".into());
    peer.send(&request.origin, Payload::Headers { status: 201, headers })
        .await;
    peer.chunk(&request.origin, b"one ").await;
    peer.chunk(&request.origin, b"two").await;
    peer.complete(&request.origin).await;

    let response = pending.await.unwrap().unwrap();
    assert_eq!(response.status(), 201);
    assert!(response.is_success());
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert_eq!(response.text().await.unwrap(), "one two");

    // Streamed body, chunk by chunk
    let pending = tokio::spawn(async move { client.get("https://x/big").await });
    let request = peer.recv().await;
    peer.headers(&request.origin, 200).await;
    peer.chunk(&request.origin, b"a").await;
    peer.chunk(&request.origin, b"b").await;
    peer.complete(&request.origin).await;

    let mut body = pending.await.unwrap().unwrap().into_body();
    assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"a"));
    assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"b"));
    assert!(body.next().await.is_none());
    assert!(connection.registry().is_empty());
}

#[tokio::test]
async fn test_http_error_without_headers() {
    let (connection, mut peer) = attached();
    let client = HttpClient::new(connection);

    let pending = tokio::spawn(async move { client.get("https://unreachable").await });
    let request = peer.recv().await;
    peer.send(
        &request.origin,
        Payload::Error {
            message: "unknown host".into(),
            code: 500,
        },
    )
    .await;

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Operation(OperationError::Peer { code: 500, .. })
    ));
}

#[tokio::test]
async fn test_body_outlives_client_and_connection_handle() {
    let (connection, mut peer) = attached();

    // The client and the only Connection handle are dropped with this task
    let pending = tokio::spawn(async move { HttpClient::new(connection).get("https://x/late").await });
    let request = peer.recv().await;
    peer.headers(&request.origin, 200).await;
    let response = pending.await.unwrap().unwrap();

    peer.chunk(&request.origin, b"still ").await;
    peer.chunk(&request.origin, b"here").await;
    peer.complete(&request.origin).await;

    assert_eq!(response.text().await.unwrap(), "still here");
}

#[tokio::test]
async fn test_unknown_origin_is_dropped() {
    let (connection, mut peer) = attached();
    let mut replies = connection.open_stream(get("r1", "https://x")).unwrap();
    peer.recv().await;

    peer.headers("ghost", 200).await;
    peer.complete("ghost").await;
    peer.headers("r1", 204).await;
    peer.complete("r1").await;

    assert!(matches!(
        replies.next().await,
        Some(Ok(Event::Head { status: 204, .. }))
    ));
    assert_eq!(replies.next().await, None);
    assert!(connection.is_connected());
}

/// Callback whose receiver died before the headers arrived.
struct DeadReceiver {
    terminals: mpsc::UnboundedSender<Result<(), OperationError>>,
}

impl OperationCallback for DeadReceiver {
    fn on_event(&mut self, _: Event) -> Result<(), CallbackError> {
        Err(CallbackError::ReceiverGone)
    }

    fn on_terminal(&mut self, outcome: Result<(), OperationError>) {
        let _ = self.terminals.send(outcome);
    }
}

#[tokio::test]
async fn test_callback_failure_retires_operation_once() {
    init_tracing();
    let (connection, mut peer) = attached();
    let (tx, mut terminals) = mpsc::unbounded_channel();

    connection
        .start_operation(get("r1", "https://x"), DeadReceiver { terminals: tx })
        .unwrap();
    peer.recv().await;

    peer.headers("r1", 200).await;
    peer.chunk("r1", b"ignored").await;
    peer.complete("r1").await;

    // A full round trip afterwards proves the reader moved past r1's frames
    let mut follow_up = connection.open_stream(get("r2", "https://x")).unwrap();
    peer.recv().await;
    peer.headers("r2", 200).await;
    peer.complete("r2").await;
    assert!(follow_up.next().await.unwrap().is_ok());
    assert!(follow_up.next().await.is_none());

    assert!(matches!(
        terminals.recv().await,
        Some(Err(OperationError::CallbackDeliveryFailed(_)))
    ));
    assert!(terminals.try_recv().is_err());
    assert!(connection.is_connected());
    assert!(connection.registry().is_empty());
}

#[tokio::test]
async fn test_peer_loss_fails_every_pending_operation() {
    let (connection, mut peer) = attached();
    let mut streams = Vec::new();
    for i in 0..16 {
        streams.push(connection.open_stream(get(&format!("r{}", i), "https://x")).unwrap());
    }
    for _ in 0..16 {
        peer.recv().await;
    }

    drop(peer);
    connection.closed().await;

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(connection.registry().is_empty());
    for stream in &mut streams {
        assert_eq!(stream.next().await, Some(Err(OperationError::Disconnected)));
        assert_eq!(stream.next().await, None);
    }
}

#[tokio::test]
async fn test_duplicate_origin_then_reuse() {
    let (connection, mut peer) = attached();
    let mut first = connection.open_stream(get("dup", "https://x")).unwrap();

    assert!(matches!(
        connection.open_stream(get("dup", "https://y")),
        Err(BridgeError::DuplicateId(ref id)) if id == "dup"
    ));

    peer.recv().await;
    peer.headers("dup", 200).await;
    peer.complete("dup").await;
    assert!(first.next().await.unwrap().is_ok());
    assert!(first.next().await.is_none());

    let _again = connection.open_stream(get("dup", "https://z")).unwrap();
    let request = peer.recv().await;
    assert_eq!(request, get("dup", "https://z"));
}

#[tokio::test]
async fn test_stale_stream_drop_spares_reused_origin() {
    let (connection, mut peer) = attached();
    let first = connection.open_stream(get("r1", "https://x")).unwrap();
    peer.recv().await;
    peer.headers("r1", 200).await;
    peer.complete("r1").await;

    // The reader retires r1 while `first` still sits unpolled
    while connection.registry().contains("r1") {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let mut second = connection.open_stream(get("r1", "https://y")).unwrap();
    drop(first);
    assert!(connection.registry().contains("r1"));

    assert_eq!(peer.recv().await, get("r1", "https://y"));
    peer.headers("r1", 202).await;
    peer.chunk("r1", b"fresh").await;
    peer.complete("r1").await;

    assert!(matches!(
        second.next().await,
        Some(Ok(Event::Head { status: 202, .. }))
    ));
    assert_eq!(
        second.next().await,
        Some(Ok(Event::Body(Bytes::from_static(b"fresh"))))
    );
    assert_eq!(second.next().await, None);
    assert!(connection.registry().is_empty());
}

#[tokio::test]
async fn test_concurrent_senders_never_interleave() {
    const TASKS: usize = 8;
    const PER_TASK: usize = 50;

    let (connection, mut peer) = attached();

    let mut handles = Vec::new();
    for task in 0..TASKS {
        let connection = connection.clone();
        handles.push(tokio::spawn(async move {
            for seq in 0..PER_TASK {
                let message = Message::new(
                    format!("t{}-{}", task, seq),
                    Payload::HttpRequest {
                        url: "https://x".into(),
                        method: "POST".into(),
                        headers: Headers::new(),
                        body: Bytes::from(vec![task as u8; 1024 + seq]),
                    },
                );
                connection.send(message).unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }

    let mut next_seq: HashMap<usize, usize> = HashMap::new();
    for _ in 0..TASKS * PER_TASK {
        let message = peer.recv().await;
        let (task, seq) = message.origin[1..].split_once('-').unwrap();
        let (task, seq): (usize, usize) = (task.parse().unwrap(), seq.parse().unwrap());

        match message.payload {
            Payload::HttpRequest { body, .. } => {
                assert_eq!(body.len(), 1024 + seq);
                assert!(body.iter().all(|b| *b == task as u8));
            }
            other => panic!("unexpected {:?}", other),
        }

        let expected = next_seq.entry(task).or_insert(0);
        assert_eq!(seq, *expected, "task {} out of order", task);
        *expected += 1;
    }

    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_truncated_frame_tears_down() {
    let (connection, mut peer) = attached();
    let mut replies = connection.open_stream(get("r1", "https://x")).unwrap();
    peer.recv().await;

    let mut partial = 100u32.to_le_bytes().to_vec();
    partial.extend_from_slice(&[0u8; 10]);
    peer.send_raw(&partial).await;
    drop(peer);

    connection.closed().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(replies.next().await, Some(Err(OperationError::Disconnected)));
}

#[tokio::test]
async fn test_malformed_payload_tears_down() {
    let (connection, mut peer) = attached();
    let mut replies = connection.open_stream(get("r1", "https://x")).unwrap();
    peer.recv().await;

    let garbage = [0xc1u8, 0xc1, 0xc1];
    let mut frame = (garbage.len() as u32).to_le_bytes().to_vec();
    frame.extend_from_slice(&garbage);
    peer.send_raw(&frame).await;

    connection.closed().await;
    assert_eq!(replies.next().await, Some(Err(OperationError::Disconnected)));
    assert!(matches!(
        connection.send(get("r2", "https://x")),
        Err(BridgeError::NotConnected)
    ));
}

#[tokio::test]
async fn test_websocket_session() {
    let (connection, mut peer) = attached();
    let client = WebSocketClient::new(connection.clone());

    let pending = tokio::spawn(async move { client.connect("wss://x/feed", Headers::new()).await });
    let open = peer.recv().await;
    let origin = open.origin.clone();
    assert!(matches!(open.payload, Payload::WebSocketOpen { .. }));
    peer.send(&origin, Payload::WebSocketOpened { headers: Headers::new() })
        .await;
    let mut socket = pending.await.unwrap().unwrap();

    let sender = socket.sender();
    tokio::spawn(async move { sender.send_binary(vec![1u8, 2, 3]) })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        peer.recv().await.payload,
        Payload::WebSocketSend {
            kind: MessageKind::Binary,
            data: Bytes::from_static(&[1, 2, 3]),
        }
    );

    peer.send(
        &origin,
        Payload::WebSocketMessage {
            kind: MessageKind::Text,
            data: Bytes::from_static(b"tick"),
        },
    )
    .await;
    assert_eq!(
        socket.next().await.unwrap().unwrap(),
        WebSocketEvent::Text("tick".into())
    );

    socket.close(NORMAL_CLOSURE, "done").unwrap();
    assert_eq!(
        peer.recv().await.payload,
        Payload::WebSocketClose {
            code: NORMAL_CLOSURE,
            reason: "done".into(),
        }
    );

    // Late frames for the closed socket are dropped
    peer.send(
        &origin,
        Payload::WebSocketClosed {
            code: NORMAL_CLOSURE,
            reason: "done".into(),
        },
    )
    .await;
    assert!(connection.registry().is_empty());
    assert!(connection.is_connected());
}

#[tokio::test]
async fn test_tcp_loopback() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut peer = FakePeer::new(socket);
        let request = peer.recv().await;
        peer.headers(&request.origin, 200).await;
        peer.chunk(&request.origin, b"over tcp").await;
        peer.complete(&request.origin).await;
        peer
    });

    let connection = Connection::builder()
        .max_frame_size(1024 * 1024)
        .connect(addr)
        .await
        .unwrap();
    assert_eq!(connection.peer_addr(), Some(addr));

    let client = HttpClient::new(connection.clone());
    let body = client.get("https://x").await.unwrap().bytes().await.unwrap();
    assert_eq!(&body[..], b"over tcp");

    let peer = server.await.unwrap();
    drop(peer);
    tokio::time::timeout(Duration::from_secs(5), connection.closed())
        .await
        .unwrap();
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = Connection::connect(addr).await.unwrap_err();
    assert!(matches!(err, BridgeError::Io(_)));
}
