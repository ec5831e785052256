//! End-to-end scenarios over the dispatcher and the control socket.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use wb_broker::dispatch::{handle_request, ConnCtx};
use wb_broker::rpc::{RpcRequest, RpcResponse, METHOD_NOT_FOUND, POLICY_DENIED};
use wb_broker::state::BrokerState;
use wb_containers::MockRuntime;
use wb_domain::config::Config;
use wb_domain::types::Provider;
use wb_keystore::{Keystore, MachineIdentity};
use wb_scrubber::{Detection, QuarantineNotifier, QUARANTINE_NOTICE};
use wb_zerotrust::VerificationMethod;

const DIGEST: &str = "sha256:6c4c2d6a6f8f0d5d6c4c2d6a6f8f0d5d6c4c2d6a6f8f0d5d6c4c2d6a6f8f0d5d";

struct RecordingNotifier {
    calls: Mutex<Vec<(String, String, String)>>,
}

impl QuarantineNotifier for RecordingNotifier {
    fn notify(&self, user_id: &str, room_id: &str, phi_type: &str, _detections: &[Detection]) {
        self.calls
            .lock()
            .push((user_id.into(), room_id.into(), phi_type.into()));
    }
}

fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.server.socket_path = dir.join("control.sock").display().to_string();
    config.server.configs_dir = dir.join("configs").display().to_string();
    config.keystore.path = dir.join("keystore.json").display().to_string();
    config.keystore.salt_path = dir.join("master.salt").display().to_string();
    config.keystore.kdf_memory_kib = 8 * 1024;
    config.keystore.kdf_time_cost = 1;
    config.audit.path = dir.join("audit.jsonl").display().to_string();
    config.audit.fsync_critical = false;
    config.inject.socket_dir = dir.join("secrets").display().to_string();
    config.inject.accept_timeout_secs = 1;
    config.containers.allowed_digests = vec![DIGEST.to_string()];
    // Devices in tests are only "new" for an instant.
    config.zerotrust.new_device_window_minutes = 0;
    config
}

fn build_state(config: Config) -> Arc<BrokerState> {
    let keystore = Arc::new(
        Keystore::open_with_identity(
            &config.keystore,
            &MachineIdentity::fixed("test-machine", "", ""),
        )
        .unwrap(),
    );
    Arc::new(
        BrokerState::build(
            Arc::new(config),
            Arc::new(MockRuntime::new()),
            keystore,
            None,
        )
        .unwrap(),
    )
}

async fn call(state: &Arc<BrokerState>, ctx: &ConnCtx, method: &str, params: Value) -> RpcResponse {
    handle_request(
        state,
        ctx,
        RpcRequest {
            jsonrpc: "2.0".into(),
            id: json!(1),
            method: method.into(),
            params,
        },
    )
    .await
}

/// Identify as `user` and return the (session, device) ids.
async fn identify(state: &Arc<BrokerState>, ctx: &ConnCtx, user: &str) -> (String, String) {
    let response = call(
        state,
        ctx,
        "session_identify",
        json!({
            "user_id": user,
            "fingerprint": { "user_agent": format!("test-agent/{user}") },
        }),
    )
    .await;
    let result = response.result.expect("identify succeeds");
    (
        result["session_id"].as_str().unwrap().to_string(),
        result["device_id"].as_str().unwrap().to_string(),
    )
}

/// Verify a device through the manager (test fixture for flows whose
/// admin path is itself policy-gated).
fn verify_device(state: &Arc<BrokerState>, device_id: &str, times: usize) {
    for _ in 0..times {
        let request = state
            .zerotrust
            .request_verification(device_id, VerificationMethod::Automatic)
            .unwrap();
        state
            .zerotrust
            .approve_verification(&request.id, "test-admin", None)
            .unwrap();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: happy start/stop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_container_start_then_stop() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(test_config(dir.path()));
    state
        .keystore
        .store_credential(
            "openai-key-1",
            Provider::Openai,
            "OpenAI",
            vec![],
            None,
            "sk-live-xyz",
        )
        .unwrap();

    let ctx = ConnCtx::new();
    let (_session, device) = identify(&state, &ctx, "alice").await;
    verify_device(&state, &device, 1);

    // start
    let response = call(
        &state,
        &ctx,
        "container_start",
        json!({ "key_id": "openai-key-1", "image": format!("agent@{DIGEST}") }),
    )
    .await;
    let result = response.result.expect("start succeeds");
    let container_id = result["container_id"].as_str().unwrap().to_string();
    assert!(!container_id.is_empty());

    // status: one container
    let response = call(&state, &ctx, "container_status", json!({})).await;
    let result = response.result.unwrap();
    assert_eq!(result["stats"]["total"], 1);

    // stop
    let response = call(
        &state,
        &ctx,
        "container_stop",
        json!({ "container_id": container_id }),
    )
    .await;
    assert_eq!(response.result.unwrap()["status"], "stopped");

    // status: zero containers
    let response = call(&state, &ctx, "container_status", json!({})).await;
    assert_eq!(response.result.unwrap()["stats"]["total"], 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: one-time token replay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn one_time_token_replay_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(test_config(dir.path()));
    let ctx = ConnCtx::new();
    identify(&state, &ctx, "alice").await;

    let token = state
        .tokens
        .generate("api_key", Provider::Anthropic, "sess", vec![]);

    let response = call(
        &state,
        &ctx,
        "token_submit",
        json!({ "token": token.id, "value": "sk-ant-secret" }),
    )
    .await;
    assert!(response.result.is_some(), "first submit succeeds");

    let response = call(
        &state,
        &ctx,
        "token_submit",
        json!({ "token": token.id, "value": "sk-ant-secret" }),
    )
    .await;
    let error = response.error.expect("replay fails");
    assert!(error.message.contains("already used"), "{}", error.message);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: policy denial with required actions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn unverified_device_denial_names_device_verification() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(test_config(dir.path()));
    let ctx = ConnCtx::new();
    identify(&state, &ctx, "alice").await;

    // audit_read requires a verified device; this one is not.
    let response = call(&state, &ctx, "audit_verify", json!({})).await;
    let error = response.error.expect("denied");
    assert_eq!(error.code, POLICY_DENIED);
    assert!(error.message.contains("verified device"), "{}", error.message);
    let data = error.data.unwrap();
    assert!(data["required_actions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a == "device_verification"));

    // Exactly one audit entry for the denial.
    let denials = state.audit.query(10, |e| e.action == "policy_denied");
    assert_eq!(denials.len(), 1);
}

#[tokio::test]
async fn repeated_denials_lock_out_and_name_the_unlock_time() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(test_config(dir.path()));
    let ctx = ConnCtx::new();
    identify(&state, &ctx, "alice").await;

    let mut locked = false;
    for _ in 0..5 {
        let response = call(&state, &ctx, "credential_get", json!({ "id": "x" })).await;
        let error = response.error.expect("denied");
        if let Some(data) = &error.data {
            if !data["locked_until"].is_null() {
                locked = true;
                break;
            }
        }
    }
    assert!(locked, "session must lock after max attempts");

    // Anything further is denied with the lockout reason.
    let response = call(&state, &ctx, "bridge_capabilities", json!({})).await;
    let error = response.error.expect("locked");
    assert!(error.message.contains("locked out"), "{}", error.message);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: quarantine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn quarantine_notice_audit_and_single_notification() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.scrubber.quarantine_enabled = true;
    config.scrubber.notify_on_quarantine = true;

    let notifier = Arc::new(RecordingNotifier {
        calls: Mutex::new(Vec::new()),
    });
    let keystore = Arc::new(
        Keystore::open_with_identity(
            &config.keystore,
            &MachineIdentity::fixed("test-machine", "", ""),
        )
        .unwrap(),
    );
    let state = Arc::new(
        BrokerState::build(
            Arc::new(config),
            Arc::new(MockRuntime::new()),
            keystore,
            Some(notifier.clone()),
        )
        .unwrap(),
    );

    let outcome = state
        .scrubber
        .scrub_message("patient MRN: 44556677 admitted", "alice", "!room:example.org")
        .unwrap();
    assert_eq!(outcome.text, QUARANTINE_NOTICE);
    assert!(outcome.quarantined);

    let entries = state.audit.query(10, |e| e.action == "quarantine");
    assert_eq!(entries.len(), 1);

    let calls = notifier.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "alice");
    assert_eq!(calls[0].1, "!room:example.org");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: audit chain break surfaces over RPC
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn truncated_audit_file_reports_break_at_last_entry() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(test_config(dir.path()));
    let ctx = ConnCtx::new();
    let (_, device) = identify(&state, &ctx, "alice").await;
    verify_device(&state, &device, 1);

    // At least the identify entry exists; count what is there.
    let entries_before = state.audit.len() as u64;
    assert!(entries_before >= 1);

    // Chop the last byte off the log file.
    let path = dir.path().join("audit.jsonl");
    let len = std::fs::metadata(&path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 1).unwrap();

    let response = call(&state, &ctx, "audit_verify", json!({})).await;
    let result = response.result.expect("verify itself succeeds");
    assert_eq!(result["intact"], false);
    assert_eq!(result["broken_at"], entries_before - 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Protocol-level behavior
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn unknown_method_is_32601() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(test_config(dir.path()));
    let ctx = ConnCtx::new();
    let response = call(&state, &ctx, "no_such_method", json!({})).await;
    assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
}

#[tokio::test]
async fn unidentified_connection_is_denied_with_identify_action() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(test_config(dir.path()));
    let ctx = ConnCtx::new();

    let response = call(&state, &ctx, "container_status", json!({})).await;
    let error = response.error.expect("denied");
    assert_eq!(error.code, POLICY_DENIED);
    assert!(error.data.unwrap()["required_actions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a == "session_identify"));
}

#[tokio::test]
async fn config_attach_rejects_traversal_and_caps_size() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(test_config(dir.path()));
    let ctx = ConnCtx::new();
    let (session, device) = identify(&state, &ctx, "alice").await;
    verify_device(&state, &device, 3);
    state.zerotrust.record_mfa(&session).unwrap();

    let response = call(
        &state,
        &ctx,
        "config_attach",
        json!({ "name": "../evil.toml", "content": "x" }),
    )
    .await;
    assert!(response.error.is_some());

    let response = call(
        &state,
        &ctx,
        "config_attach",
        json!({ "name": "agents.toml", "content": "[agents]\n" }),
    )
    .await;
    assert_eq!(response.result.unwrap()["name"], "agents.toml");
    assert!(dir.path().join("configs").join("agents.toml").exists());

    let big = "x".repeat(1024 * 1024 + 1);
    let response = call(
        &state,
        &ctx,
        "config_attach",
        json!({ "name": "big.toml", "content": big }),
    )
    .await;
    assert!(response.error.is_some());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Control socket round trip
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn socket_server_serves_newline_framed_jsonrpc() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let socket_path = config.server.socket_path.clone();
    let state = build_state(config);

    let cancel = tokio_util::sync::CancellationToken::new();
    let server = {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { wb_broker::server::run(state, cancel).await })
    };

    // Wait for the socket to exist.
    let mut tries = 0;
    while !std::path::Path::new(&socket_path).exists() && tries < 100 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tries += 1;
    }

    let stream = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // Identify, then ask for capabilities on the same connection.
    let identify = serde_json::to_string(&json!({
        "jsonrpc": "2.0", "id": 1, "method": "session_identify",
        "params": { "user_id": "alice", "fingerprint": { "user_agent": "cli" } },
    }))
    .unwrap();
    write_half
        .write_all(format!("{identify}\n").as_bytes())
        .await
        .unwrap();

    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let response: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["id"], 1);
    assert!(response["result"]["session_id"].is_string());

    let caps = serde_json::to_string(&json!({
        "jsonrpc": "2.0", "id": 2, "method": "bridge_capabilities", "params": {},
    }))
    .unwrap();
    write_half
        .write_all(format!("{caps}\n").as_bytes())
        .await
        .unwrap();

    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let response: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["id"], 2);
    assert_eq!(response["result"]["matrix"], false);

    // Unparseable input gets a parse error, connection stays usable.
    write_half.write_all(b"this is not json\n").await.unwrap();
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let response: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["error"]["code"], -32700);

    cancel.cancel();
    let _ = server.await;
}
