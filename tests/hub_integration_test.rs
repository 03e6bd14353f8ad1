//! End-to-end tests: a real hub on a TCP listener driven by the crate's client.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use wsrpc::client::{self, Incoming, RpcReader};
use wsrpc::{
    CallContext, Code, Decoder, Hub, HubConfig, MethodDesc, Reply, ServiceDescriptor, Status,
};

trait Words: Send + Sync {
    fn answer(&self, text: String) -> String;
}

struct Responder;

impl Words for Responder {
    fn answer(&self, text: String) -> String {
        if text == "hello" {
            "world".to_string()
        } else {
            text
        }
    }
}

fn answer(svc: &dyn Words, _ctx: &CallContext, dec: &Decoder<'_>) -> Result<Reply, Status> {
    Ok(Reply::new(svc.answer(dec.decode()?)))
}

fn words_descriptor() -> ServiceDescriptor<dyn Words> {
    ServiceDescriptor {
        name: "test.Words".to_string(),
        methods: vec![MethodDesc::unary("Answer", answer)],
        metadata: None,
    }
}

async fn start_hub(config: HubConfig) -> (Hub, String) {
    let hub = Hub::new(config).unwrap();
    hub.register_service(words_descriptor(), Arc::new(Responder))
        .unwrap();
    hub.start().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = hub.clone();
    tokio::spawn(async move { server.serve(listener).await });

    (hub, format!("ws://{addr}/"))
}

async fn recv(reader: &mut RpcReader) -> anyhow::Result<Incoming> {
    tokio::time::timeout(Duration::from_secs(3), reader.recv())
        .await
        .expect("timed out waiting for hub")
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_hello_world_round_trip() {
    let (_hub, url) = start_hub(HubConfig::default()).await;
    let (mut writer, mut reader) = client::connect(&url, &[]).await.unwrap();

    writer.call("test.Words", "Answer", "hello").await.unwrap();

    let reply = recv(&mut reader).await.unwrap();
    assert_eq!(reply, Incoming::Reply(Bytes::from_static(b"\"world\"")));
}

#[tokio::test]
async fn test_pipelined_replies_keep_request_order() {
    let (_hub, url) = start_hub(HubConfig::default()).await;
    let (mut writer, mut reader) = client::connect(&url, &[]).await.unwrap();

    for word in ["one", "two", "three"] {
        writer.call("test.Words", "Answer", word).await.unwrap();
    }
    for word in ["one", "two", "three"] {
        let reply: String = recv(&mut reader).await.unwrap().decode().unwrap();
        assert_eq!(reply, word);
    }
}

#[tokio::test]
async fn test_unknown_method_gets_not_found_status() {
    let (hub, url) = start_hub(HubConfig::default()).await;
    let (mut writer, mut reader) = client::connect(&url, &[]).await.unwrap();

    writer.call("test.Words", "Missing", "x").await.unwrap();
    match recv(&mut reader).await.unwrap() {
        Incoming::Status(status) => assert_eq!(status.code, Code::NotFound),
        other => panic!("expected status, got {other:?}"),
    }

    // Still usable afterwards.
    writer.call("test.Words", "Answer", "again").await.unwrap();
    let reply: String = recv(&mut reader).await.unwrap().decode().unwrap();
    assert_eq!(reply, "again");
    assert_eq!(hub.stats().live, 1);
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let config = HubConfig {
        max_frame_size: 64,
        ..HubConfig::default()
    };
    let (hub, url) = start_hub(config).await;
    let (mut writer, mut reader) = client::connect(&url, &[]).await.unwrap();

    writer.send_raw(vec![0x01; 256]).await.unwrap();

    let outcome = recv(&mut reader).await;
    assert!(
        matches!(outcome, Ok(Incoming::Closed) | Err(_)),
        "unexpected {outcome:?}"
    );
    eventually(|| hub.stats().live == 0).await;
    assert_eq!(hub.stats().protocol_violations, 1);
}

#[tokio::test]
async fn test_malformed_envelope_closes_connection() {
    let (hub, url) = start_hub(HubConfig::default()).await;
    let (mut writer, mut reader) = client::connect(&url, &[]).await.unwrap();

    writer.send_raw(b"\x09not an envelope".to_vec()).await.unwrap();

    assert_eq!(recv(&mut reader).await.unwrap(), Incoming::Closed);
    assert_eq!(hub.stats().protocol_violations, 1);
}

#[tokio::test]
async fn test_unresponsive_peer_dropped_responsive_peer_kept() {
    let config = HubConfig {
        pong_wait_ms: 300,
        ping_period_ms: Some(100),
        ..HubConfig::default()
    };
    let (hub, url) = start_hub(config).await;

    // Responsive: keeps reading, so pings get answered.
    let (mut live_writer, mut live_reader) = client::connect(&url, &[]).await.unwrap();
    let (replies_tx, mut replies_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok(item) = live_reader.recv().await {
            if replies_tx.send(item.clone()).is_err() || item == Incoming::Closed {
                break;
            }
        }
    });

    // Unresponsive: never reads.
    let (_silent_writer, _silent_reader) = client::connect(&url, &[]).await.unwrap();

    eventually(|| hub.stats().live == 2).await;
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(hub.stats().live, 1);

    live_writer.call("test.Words", "Answer", "ping").await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(3), replies_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.decode::<String>().unwrap(), "ping");
}

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let (hub, url) = start_hub(HubConfig::default()).await;
    let (_w1, mut r1) = client::connect(&url, &[]).await.unwrap();
    let (_w2, mut r2) = client::connect(&url, &[]).await.unwrap();
    eventually(|| hub.stats().live == 2).await;

    hub.broadcast(Bytes::from_static(b"announcement")).await.unwrap();

    let expected = Incoming::Reply(Bytes::from_static(b"announcement"));
    assert_eq!(recv(&mut r1).await.unwrap(), expected);
    assert_eq!(recv(&mut r2).await.unwrap(), expected);
}

#[tokio::test]
async fn test_origin_must_match_host_without_loopback_bypass() {
    let config = HubConfig {
        allow_loopback: false,
        ..HubConfig::default()
    };
    let (hub, url) = start_hub(config).await;
    let host = url.trim_start_matches("ws://").trim_end_matches('/');

    let refused = client::connect(&url, &[("Origin", "http://evil.example")]).await;
    assert!(refused.is_err());

    let same_origin = format!("http://{host}");
    let (mut writer, mut reader) = client::connect(&url, &[("Origin", same_origin.as_str())])
        .await
        .unwrap();
    writer.call("test.Words", "Answer", "hello").await.unwrap();
    let reply: String = recv(&mut reader).await.unwrap().decode().unwrap();
    assert_eq!(reply, "world");
    assert_eq!(hub.stats().live, 1);
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let (hub, url) = start_hub(HubConfig::default()).await;
    let (_writer, mut reader) = client::connect(&url, &[]).await.unwrap();
    eventually(|| hub.stats().live == 1).await;

    hub.shutdown();

    assert_eq!(recv(&mut reader).await.unwrap(), Incoming::Closed);
    assert!(client::connect(&url, &[]).await.is_err());
}

#[tokio::test]
async fn test_idle_socket_dropped_after_handshake_timeout() {
    let config = HubConfig {
        handshake_timeout_ms: 200,
        ..HubConfig::default()
    };
    let (hub, url) = start_hub(config).await;
    let addr = url.trim_start_matches("ws://").trim_end_matches('/');

    let mut idle = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(3), idle.read(&mut buf))
        .await
        .expect("hub kept an idle pre-handshake socket open");
    assert!(matches!(read, Ok(0) | Err(_)), "unexpected {read:?}");
    assert_eq!(hub.stats().live, 0);
}
