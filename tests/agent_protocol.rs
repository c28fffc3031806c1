//! Seed scenarios 5-6 from §8: idle lock and version-mismatch restart.
//!
//! These drive the real `Agent` request loop (not a mock), but in-process
//! on a background thread rather than via `AgentClient::connect`'s
//! spawn-a-fresh-process fallback - under `cargo test` there is no
//! `agile-vault` binary at `current_exe()` to spawn, so the protocol is
//! exercised directly over the same Unix socket the binary would use.

use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use agile_vault::agent::server::{self, Agent};
use agile_vault::agent::{read_frame, socket_path, token_path, write_frame, Request};
use agile_vault::vault_store;
use tempfile::TempDir;

fn new_vault_dir() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.agilekeychain");
    (dir, path)
}

fn dial_with_retry(path: &Path) -> UnixStream {
    for _ in 0..200 {
        if let Ok(stream) = UnixStream::connect(socket_path(path)) {
            return stream;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("agent never came up");
}

fn call(stream: &mut UnixStream, id: u64, op: &str, args: serde_json::Value) -> serde_json::Value {
    call_with_token(stream, id, op, args, "")
}

fn call_with_token(
    stream: &mut UnixStream,
    id: u64,
    op: &str,
    args: serde_json::Value,
    token: &str,
) -> serde_json::Value {
    let request = Request {
        id,
        op: op.to_string(),
        args,
        token: token.to_string(),
    };
    write_frame(stream, &serde_json::to_vec(&request).unwrap()).unwrap();
    let payload = read_frame(stream).unwrap();
    serde_json::from_slice(&payload).unwrap()
}

#[test]
fn scenario_5_idle_lock() {
    let (_dir, path) = new_vault_dir();
    vault_store::create_vault(&path, "hunter2").unwrap();
    server::cleanup_transport(&path);

    let agent_path = path.clone();
    std::thread::spawn(move || {
        let agent = Agent::open(agent_path, Duration::from_millis(50));
        let _ = agent.run();
    });

    let mut stream = dial_with_retry(&path);

    let unlock_reply = call(
        &mut stream,
        1,
        "unlock",
        serde_json::json!({ "password": "hunter2" }),
    );
    assert_eq!(unlock_reply["ok"], serde_json::json!(true));

    std::thread::sleep(Duration::from_millis(120));

    let decrypt_reply = call(
        &mut stream,
        2,
        "decrypt",
        serde_json::json!({ "level": "SL5", "blob": "irrelevant" }),
    );
    assert_eq!(decrypt_reply["ok"], serde_json::json!(false));
    assert_eq!(decrypt_reply["error"]["kind"], serde_json::json!("Locked"));

    server::cleanup_transport(&path);
}

#[test]
fn unlock_then_decrypt_round_trips_a_payload() {
    let (_dir, path) = new_vault_dir();
    let store = vault_store::create_vault(&path, "hunter2").unwrap();
    server::cleanup_transport(&path);

    // Encrypt a payload locally first, using the same SL5 level key the
    // agent will unwrap, so we have ciphertext to hand the agent.
    use agile_vault::keystore::CryptoProvider;
    let local = agile_vault::keystore::LocalKeyStore::unlock(&store.encryption_keys, "hunter2")
        .unwrap();
    let blob = local
        .encrypt(agile_vault::keystore::SecurityLevelId::Sl5, b"hello agent")
        .unwrap();
    drop(local);

    let agent_path = path.clone();
    std::thread::spawn(move || {
        let agent = Agent::open(agent_path, Duration::from_secs(600));
        let _ = agent.run();
    });

    let mut stream = dial_with_retry(&path);
    let unlock_reply = call(
        &mut stream,
        1,
        "unlock",
        serde_json::json!({ "password": "hunter2" }),
    );
    assert_eq!(unlock_reply["ok"], serde_json::json!(true));
    let token = std::fs::read_to_string(token_path(&path)).unwrap();

    let decrypt_reply = call_with_token(
        &mut stream,
        2,
        "decrypt",
        serde_json::json!({ "level": "SL5", "blob": blob }),
        &token,
    );
    assert_eq!(decrypt_reply["ok"], serde_json::json!(true));
    let plaintext_b64 = decrypt_reply["value"]["plaintext"].as_str().unwrap();
    let plaintext = agile_vault::codec::base64_decode(plaintext_b64).unwrap();
    assert_eq!(plaintext, b"hello agent");

    server::cleanup_transport(&path);
}

#[test]
fn info_reports_this_process_pid_and_version() {
    let (_dir, path) = new_vault_dir();
    vault_store::create_vault(&path, "hunter2").unwrap();
    server::cleanup_transport(&path);

    let agent_path = path.clone();
    std::thread::spawn(move || {
        let agent = Agent::open(agent_path, Duration::from_secs(600));
        let _ = agent.run();
    });

    let mut stream = dial_with_retry(&path);
    let reply = call(&mut stream, 1, "info", serde_json::Value::Null);
    assert_eq!(reply["ok"], serde_json::json!(true));
    assert_eq!(
        reply["value"]["binaryVersion"],
        serde_json::json!(env!("CARGO_PKG_VERSION"))
    );
    assert!(reply["value"]["pid"].as_u64().unwrap() > 0);

    server::cleanup_transport(&path);
}
