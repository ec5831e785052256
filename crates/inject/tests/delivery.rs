//! Socket delivery end-to-end: framing, teardown, single-session rule.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;

use wb_domain::config::InjectConfig;
use wb_inject::{SecretInjector, SecretPayload};

fn injector(dir: &std::path::Path, timeout_secs: u64) -> SecretInjector {
    SecretInjector::new(&InjectConfig {
        socket_dir: dir.join("secrets").display().to_string(),
        accept_timeout_secs: timeout_secs,
        ..Default::default()
    })
    .unwrap()
}

fn payload() -> SecretPayload {
    let mut variables = HashMap::new();
    variables.insert("api_key".to_string(), "sk-test-e2e".to_string());
    SecretPayload {
        request_id: "req-e2e".into(),
        skill_id: "llm".into(),
        variables,
        expires_at: chrono::Utc::now() + chrono::Duration::minutes(5),
    }
}

#[tokio::test]
async fn delivery_frames_payload_and_removes_socket() {
    let dir = tempfile::tempdir().unwrap();
    let injector = Arc::new(injector(dir.path(), 5));
    let path = injector.socket_path("c1");

    let deliver = {
        let injector = injector.clone();
        tokio::spawn(async move { injector.deliver("c1", &payload()).await })
    };

    // Wait for the socket to appear, then connect as the agent would.
    let mut tries = 0;
    while !path.exists() && tries < 100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        tries += 1;
    }
    let mut stream = UnixStream::connect(&path).await.unwrap();

    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let len = u32::from_be_bytes(len_buf) as usize;

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.unwrap();
    let received: SecretPayload = serde_json::from_slice(&body).unwrap();
    assert_eq!(received.request_id, "req-e2e");
    assert_eq!(received.variables["api_key"], "sk-test-e2e");

    // Nothing follows the framed payload.
    let mut extra = Vec::new();
    stream.read_to_end(&mut extra).await.unwrap();
    assert!(extra.is_empty());

    deliver.await.unwrap().unwrap();
    assert!(!path.exists(), "socket file must be gone after delivery");
}

#[tokio::test]
async fn delivery_times_out_and_cleans_up_when_nobody_connects() {
    let dir = tempfile::tempdir().unwrap();
    let injector = injector(dir.path(), 1);
    let path = injector.socket_path("lonely");

    let result = injector.deliver("lonely", &payload()).await;
    assert!(matches!(result, Err(wb_domain::Error::Timeout(_))));
    assert!(!path.exists(), "socket file must be gone after timeout");
}

#[tokio::test]
async fn second_delivery_for_same_container_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let injector = Arc::new(injector(dir.path(), 2));

    let first = {
        let injector = injector.clone();
        tokio::spawn(async move { injector.deliver("dup", &payload()).await })
    };
    // Let the first delivery claim the container name.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = injector.deliver("dup", &payload()).await;
    assert!(matches!(second, Err(wb_domain::Error::Conflict(_))));

    // First delivery eventually times out (nobody connects) and releases.
    let _ = first.await.unwrap();
    let third = injector.deliver("dup", &payload()).await;
    assert!(matches!(third, Err(wb_domain::Error::Timeout(_))));
}
