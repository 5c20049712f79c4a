//! Server tests over a real listener with a WebSocket client.

#![cfg(unix)]

use futures::{SinkExt, Stream, StreamExt};
use netprobe::config::Config;
use netprobe::server;
use serde_json::{json, Value};
use std::io::Write;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh\n{}", body).unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
    _tools: TempDir,
}

impl TestServer {
    async fn start(mut config: Config) -> Self {
        let tools = TempDir::new().unwrap();
        config.tools.ping_path = Some(script(&tools, "ping", "echo \"PING $3\"\necho \"64 bytes from $3\""));
        config.tools.dig_path = Some(script(&tools, "dig", "echo \"$*\""));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server::serve_with_listener(listener, config, shutdown.clone()));

        Self {
            addr,
            shutdown,
            task,
            _tools: tools,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Read text frames until a terminal response arrives
async fn read_until_terminal<S>(stream: &mut S) -> Vec<Value>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut responses = Vec::new();
    loop {
        let message = tokio::time::timeout(WAIT, stream.next())
            .await
            .expect("timed out waiting for response")
            .expect("connection ended")
            .unwrap();
        if let Message::Text(text) = message {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            let terminal = value.get("done").is_some() || value.get("error").is_some();
            responses.push(value);
            if terminal {
                return responses;
            }
        }
    }
}

#[tokio::test]
async fn test_ping_over_websocket() {
    let server = TestServer::start(Config::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();

    let request = json!({"type": "ping", "parameters": {"target": "127.0.0.1", "count": 1}, "id": "1"});
    ws.send(Message::text(request.to_string())).await.unwrap();

    let responses = read_until_terminal(&mut ws).await;
    let last = responses.last().unwrap();
    assert_eq!(last, &json!({"id": "1", "done": "ping"}));

    let output: String = responses
        .iter()
        .filter_map(|r| r["output"].as_str())
        .collect();
    assert!(output.contains("64 bytes from 127.0.0.1"));

    ws.close(None).await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_validation_error_over_websocket() {
    let server = TestServer::start(Config::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();

    let request = json!({"type": "dig", "parameters": {"domain": "bad_domain!", "recordType": "A"}});
    ws.send(Message::text(request.to_string())).await.unwrap();

    let responses = read_until_terminal(&mut ws).await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["field"], "domain");

    server.stop().await;
}

#[tokio::test]
async fn test_second_connection_within_refill_period_is_throttled() {
    let server = TestServer::start(Config::default()).await;

    let (_first, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();

    match tokio_tungstenite::connect_async(server.url()).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 429);
            assert!(response.headers().contains_key("retry-after"));
        }
        other => panic!("expected HTTP 429, got {:?}", other.map(|(_, r)| r.status())),
    }

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_open_sessions() {
    let server = TestServer::start(Config::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();

    server.shutdown.cancel();

    // The client sees a close frame or the end of the stream
    let ended = tokio::time::timeout(WAIT, async {
        while let Some(message) = ws.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok());

    server.stop().await;
}

#[tokio::test]
async fn test_health_endpoint_not_throttled() {
    let server = TestServer::start(Config::default()).await;

    for _ in 0..3 {
        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
    }

    server.stop().await;
}
