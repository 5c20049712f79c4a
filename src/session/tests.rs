//! End-to-end session tests over the in-memory transport.
//!
//! Probe binaries are replaced by shell scripts so the tests do not depend on
//! network access or on ping/dig being installed.

#![cfg(unix)]

use super::*;
use crate::probe::ExecutorConfig;
use crate::transport::{memory_pair, MemoryClient, OutboundFrame};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(10);

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh\n{}", body).unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

struct Harness {
    dir: TempDir,
    client: MemoryClient,
    handle: SessionHandle,
    task: JoinHandle<SessionSummary>,
    shutdown: CancellationToken,
}

impl Harness {
    fn start(config: SessionConfig, ping: &str, dig: &str) -> Self {
        Self::start_with_capacity(config, ping, dig, 64)
    }

    fn start_with_capacity(config: SessionConfig, ping: &str, dig: &str, capacity: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let executor = ExecutorConfig::with_timeout(config.command_timeout())
            .ping_path(script(dir.path(), "ping", ping))
            .dig_path(script(dir.path(), "dig", dig));
        let shutdown = CancellationToken::new();
        let session = Session::new(config, Arc::new(ProbeExecutor::new(executor)), &shutdown);
        let handle = session.handle();
        let (transport, client) = memory_pair(capacity);
        let task = tokio::spawn(session.run(transport));

        Self {
            dir,
            client,
            handle,
            task,
            shutdown,
        }
    }

    async fn send(&self, request: Value) {
        self.client.send_text(request.to_string()).await.unwrap();
    }

    async fn next(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.client.recv_text())
            .await
            .expect("timed out waiting for a response")
            .expect("session hung up");
        serde_json::from_str(&text).expect("response is not valid JSON")
    }

    /// Collect responses until every id in `ids` has seen a terminal response
    async fn until_terminal(&mut self, ids: &[&str]) -> Vec<Value> {
        let mut open: Vec<&str> = ids.to_vec();
        let mut seen = Vec::new();
        while !open.is_empty() {
            let response = self.next().await;
            if response.get("done").is_some() || response.get("error").is_some() {
                let id = response["id"].as_str().unwrap_or("");
                open.retain(|candidate| *candidate != id);
            }
            seen.push(response);
        }
        seen
    }

    async fn finish(self) -> SessionSummary {
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("session did not terminate")
            .unwrap()
    }
}

fn ping_request(count: u64) -> Value {
    json!({"type": "ping", "parameters": {"target": "127.0.0.1", "count": count}})
}

#[tokio::test]
async fn test_ping_streams_output_then_done() {
    let mut h = Harness::start(
        SessionConfig::default(),
        "echo \"PING $3\"\necho \"64 bytes from $3: icmp_seq=1\"",
        "true",
    );

    h.send(ping_request(1)).await;

    let mut output = String::new();
    loop {
        let response = h.next().await;
        assert!(response.get("error").is_none(), "unexpected error: {}", response);
        if response.get("done").is_some() {
            assert_eq!(response["done"], "ping");
            break;
        }
        output.push_str(response["output"].as_str().unwrap());
    }
    assert!(output.contains("64 bytes from 127.0.0.1"));

    // The session stays open for further commands
    assert_eq!(h.handle.state(), SessionState::Open);
    h.send(ping_request(2)).await;
    let response = h.next().await;
    assert!(response.get("output").is_some());
}

#[tokio::test]
async fn test_invalid_count_yields_one_error_and_no_process() {
    let mut h = Harness::start(SessionConfig::default(), "touch \"$(dirname \"$0\")/spawned\"", "true");
    let marker = h.dir.path().join("spawned");

    h.send(ping_request(31)).await;

    let response = h.next().await;
    assert_eq!(response["field"], "count");
    assert!(response["error"].as_str().unwrap().contains("count"));

    // Nothing further arrives for that request
    let extra = tokio::time::timeout(Duration::from_millis(300), h.client.recv_text()).await;
    assert!(extra.is_err());
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_malformed_frame_does_not_end_session() {
    let mut h = Harness::start(SessionConfig::default(), "echo pong", "true");

    h.client.send_text("{not json").await.unwrap();
    let response = h.next().await;
    assert!(response["error"].as_str().unwrap().starts_with("protocol error"));

    h.send(json!({"type": "ping", "parameters": {"target": "127.0.0.1", "count": 1}, "id": "after"}))
        .await;
    let responses = h.until_terminal(&["after"]).await;
    assert_eq!(responses.last().unwrap()["done"], "ping");
}

#[tokio::test]
async fn test_binary_frame_is_decoded_like_text() {
    let mut h = Harness::start(SessionConfig::default(), "true", "echo ok");

    let request = json!({"type": "dig", "parameters": {"domain": "example.com", "recordType": "A"}, "id": "b"});
    h.client
        .send(InboundFrame::Binary(request.to_string().into_bytes()))
        .await
        .unwrap();

    let responses = h.until_terminal(&["b"]).await;
    assert_eq!(responses.last().unwrap()["done"], "dig");
}

#[tokio::test]
async fn test_concurrent_commands_keep_frames_whole() {
    let mut h = Harness::start(
        SessionConfig::default(),
        "i=0\nwhile [ $i -lt 50 ]; do echo \"ping line $i\"; i=$((i+1)); done",
        "i=0\nwhile [ $i -lt 50 ]; do echo \"dig line $i\"; i=$((i+1)); done",
    );

    let mut first = ping_request(3);
    first["id"] = json!("p");
    h.send(first).await;
    h.send(json!({"type": "dig", "parameters": {"domain": "example.com", "recordType": "MX"}, "id": "d"}))
        .await;

    let responses = h.until_terminal(&["p", "d"]).await;

    let mut output: HashMap<String, String> = HashMap::new();
    for response in &responses {
        let object = response.as_object().unwrap();
        let id = object["id"].as_str().unwrap().to_string();
        if let Some(chunk) = object.get("output") {
            output.entry(id).or_default().push_str(chunk.as_str().unwrap());
        } else {
            assert!(object.contains_key("done"), "unexpected response: {}", response);
        }
    }

    let expected = |prefix: &str| {
        (0..50)
            .map(|i| format!("{} line {}\n", prefix, i))
            .collect::<String>()
    };
    assert_eq!(output["p"], expected("ping"));
    assert_eq!(output["d"], expected("dig"));
}

#[tokio::test]
async fn test_busy_when_concurrency_limit_reached() {
    let config = SessionConfig {
        max_concurrent_commands: 1,
        ..Default::default()
    };
    let mut h = Harness::start(config, "exec sleep 30", "true");

    let mut slow = ping_request(1);
    slow["id"] = json!("slow");
    h.send(slow).await;
    let mut rejected = ping_request(1);
    rejected["id"] = json!("second");
    h.send(rejected).await;

    let response = h.next().await;
    assert_eq!(response["id"], "second");
    assert_eq!(response["error"], "too many concurrent commands (limit 1)");

    h.handle.shutdown();
    let summary = h.finish().await;
    assert_eq!(summary.commands_launched, 1);
}

#[tokio::test]
async fn test_client_close_kills_running_process() {
    let mut h = Harness::start(
        SessionConfig::default(),
        "echo $$ > \"$(dirname \"$0\")/pid\"\necho started\nexec sleep 30",
        "true",
    );

    h.send(ping_request(1)).await;
    let response = h.next().await;
    assert_eq!(response["output"], "started\n");
    let pid = std::fs::read_to_string(h.dir.path().join("pid")).unwrap();

    h.client.send(InboundFrame::Close).await.unwrap();
    let mut states = h.handle.subscribe();
    let handle = h.handle.clone();
    let summary = h.finish().await;

    assert_eq!(summary.reason, CloseReason::PeerClosed);
    assert_eq!(handle.state(), SessionState::Closed);
    assert_eq!(*states.borrow_and_update(), SessionState::Closed);

    let alive = std::process::Command::new("kill")
        .args(["-0", pid.trim()])
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap()
        .success();
    assert!(!alive, "probe process survived session close");
}

#[tokio::test]
async fn test_external_shutdown_closes_session() {
    let h = Harness::start(SessionConfig::default(), "exec sleep 30", "true");
    h.send(ping_request(1)).await;

    h.shutdown.cancel();
    let handle = h.handle.clone();
    let summary = h.finish().await;

    assert_eq!(summary.reason, CloseReason::Shutdown);
    assert_eq!(handle.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_keepalive_pings_idle_client() {
    let config = SessionConfig {
        keepalive_interval_secs: 1,
        ..Default::default()
    };
    let mut h = Harness::start(config, "true", "true");

    let frame = tokio::time::timeout(Duration::from_secs(5), h.client.recv())
        .await
        .unwrap();
    assert_eq!(frame, Some(OutboundFrame::Ping));
}

#[tokio::test]
async fn test_failed_keepalive_write_closes_session() {
    let config = SessionConfig {
        keepalive_interval_secs: 1,
        ..Default::default()
    };
    let mut h = Harness::start(config, "true", "true");

    h.client.close_reader();
    let summary = h.finish().await;
    assert!(matches!(summary.reason, CloseReason::WriteFailed(_)));
}

#[tokio::test]
async fn test_stalled_client_closes_session_for_backpressure() {
    let config = SessionConfig {
        outbound_queue_capacity: 1,
        send_grace_ms: 200,
        ..Default::default()
    };
    // Tiny transport buffer and a client that never reads
    let h = Harness::start_with_capacity(
        config,
        "i=0\nwhile [ $i -lt 2000 ]; do echo \"line $i\"; i=$((i+1)); done",
        "true",
        1,
    );

    h.send(ping_request(1)).await;
    let summary = h.finish().await;
    assert_eq!(summary.reason, CloseReason::Backpressure);
}
