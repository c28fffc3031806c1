//! C6 — AgentClient: the stub a CLI-style caller uses to talk to the agent
//! daemon, including the dial/spawn-if-stale lifecycle from §4.6.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{pid_path, socket_path, token_path, Reply, Request, BINARY_VERSION, REQUEST_IO_TIMEOUT};
use crate::error::{VaultError, VaultResult};
use crate::keystore::{CryptoProvider, SecurityLevelId};

const SPAWN_POLL_INTERVAL: Duration = Duration::from_millis(10);
const SPAWN_POLL_ATTEMPTS: u32 = 100; // 100 * 10ms = 1s, per §4.6.

/// A connected handle to an agent serving `vault_path`.
pub struct AgentClient {
    vault_path: PathBuf,
    stream: Mutex<UnixStream>,
    next_id: AtomicU64,
    token: Mutex<String>,
}

impl AgentClient {
    /// Dials the agent for `vault_path`, spawning (and, on a version
    /// mismatch, replacing) it first if necessary.
    pub fn connect(vault_path: &Path) -> VaultResult<Self> {
        let mut stream = match Self::dial(vault_path) {
            Ok(stream) => stream,
            Err(_) => Self::spawn_and_wait(vault_path)?,
        };

        if let Ok(reply) = Self::request_on(&mut stream, 0, "info", serde_json::Value::Null, "") {
            let reported_version = reply
                .value
                .as_ref()
                .and_then(|v| v.get("binaryVersion"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if reported_version != BINARY_VERSION {
                tracing::info!(
                    reported = reported_version,
                    expected = BINARY_VERSION,
                    "agent version mismatch, restarting"
                );
                Self::kill_stale(vault_path);
                stream = Self::spawn_and_wait(vault_path)?;
            }
        }

        let token = std::fs::read_to_string(token_path(vault_path)).unwrap_or_default();
        Ok(AgentClient {
            vault_path: vault_path.to_path_buf(),
            stream: Mutex::new(stream),
            next_id: AtomicU64::new(1),
            token: Mutex::new(token),
        })
    }

    fn dial(vault_path: &Path) -> std::io::Result<UnixStream> {
        let stream = UnixStream::connect(socket_path(vault_path))?;
        stream.set_read_timeout(Some(REQUEST_IO_TIMEOUT))?;
        stream.set_write_timeout(Some(REQUEST_IO_TIMEOUT))?;
        Ok(stream)
    }

    fn kill_stale(vault_path: &Path) {
        if let Ok(pid_str) = std::fs::read_to_string(pid_path(vault_path)) {
            if let Ok(pid) = pid_str.trim().parse::<u32>() {
                let _ = Command::new("kill")
                    .args(["-s", "INT", &pid.to_string()])
                    .status();
            }
        }
        super::server::cleanup_transport(vault_path);
    }

    fn spawn_and_wait(vault_path: &Path) -> VaultResult<UnixStream> {
        let exe = std::env::current_exe().map_err(VaultError::from)?;
        Command::new(exe)
            .arg("--agent")
            .arg("--vault")
            .arg(vault_path)
            .spawn()
            .map_err(VaultError::from)?;

        for _ in 0..SPAWN_POLL_ATTEMPTS {
            if let Ok(stream) = Self::dial(vault_path) {
                return Ok(stream);
            }
            std::thread::sleep(SPAWN_POLL_INTERVAL);
        }
        Err(VaultError::IoError(
            "agent did not come up within 1s of spawning".into(),
        ))
    }

    fn request_on(
        stream: &mut UnixStream,
        id: u64,
        op: &str,
        args: serde_json::Value,
        token: &str,
    ) -> VaultResult<Reply> {
        let request = Request {
            id,
            op: op.to_string(),
            args,
            token: token.to_string(),
        };
        let payload = serde_json::to_vec(&request)?;
        super::write_frame(stream, &payload).map_err(VaultError::from)?;
        let response = super::read_frame(stream).map_err(VaultError::from)?;
        if response.is_empty() {
            return Err(VaultError::IoError("agent closed the connection".into()));
        }
        let reply: Reply = serde_json::from_slice(&response)?;
        Ok(reply)
    }

    fn call(&self, op: &str, args: serde_json::Value) -> VaultResult<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.token.lock().expect("agent client token mutex poisoned").clone();
        let mut stream = self
            .stream
            .lock()
            .expect("agent client stream mutex poisoned");
        Self::request_on(&mut stream, id, op, args, &token)
    }

    fn call_ok(&self, op: &str, args: serde_json::Value) -> VaultResult<serde_json::Value> {
        let reply = self.call(op, args)?;
        if reply.ok {
            Ok(reply.value.unwrap_or(serde_json::Value::Null))
        } else {
            let err = reply.error.unwrap_or(super::ErrorPayload {
                kind: "IoError".into(),
                msg: "agent returned ok=false without an error payload".into(),
            });
            Err(reply_error_to_vault_error(err))
        }
    }

    pub fn info(&self) -> VaultResult<(String, u32)> {
        let value = self.call_ok("info", serde_json::Value::Null)?;
        let version = value
            .get("binaryVersion")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let pid = value.get("pid").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        Ok((version, pid))
    }

    pub fn unlock(&self, password: &str) -> VaultResult<()> {
        self.call_ok("unlock", serde_json::json!({ "password": password }))?;
        let token = std::fs::read_to_string(token_path(&self.vault_path)).unwrap_or_default();
        *self.token.lock().expect("agent client token mutex poisoned") = token;
        Ok(())
    }

    pub fn is_locked(&self) -> VaultResult<bool> {
        let value = self.call_ok("isLocked", serde_json::Value::Null)?;
        Ok(value.as_bool().unwrap_or(true))
    }

    pub fn lock(&self) -> VaultResult<()> {
        self.call_ok("lock", serde_json::Value::Null)?;
        Ok(())
    }

    pub fn refresh_access(&self) -> VaultResult<()> {
        self.call_ok("refreshAccess", serde_json::Value::Null)?;
        Ok(())
    }
}

impl CryptoProvider for AgentClient {
    fn encrypt(&self, level: SecurityLevelId, plaintext: &[u8]) -> VaultResult<String> {
        let value = self.call_ok(
            "encrypt",
            serde_json::json!({
                "level": level.as_str(),
                "plaintext": crate::codec::base64_encode(plaintext),
            }),
        )?;
        value
            .get("blob")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| VaultError::IoError("agent encrypt reply missing blob".into()))
    }

    fn decrypt(&self, level: SecurityLevelId, blob: &str) -> VaultResult<Vec<u8>> {
        let value = self.call_ok(
            "decrypt",
            serde_json::json!({
                "level": level.as_str(),
                "blob": blob,
            }),
        )?;
        let plaintext_b64 = value
            .get("plaintext")
            .and_then(|v| v.as_str())
            .ok_or_else(|| VaultError::IoError("agent decrypt reply missing plaintext".into()))?;
        crate::codec::base64_decode(plaintext_b64)
    }
}

fn reply_error_to_vault_error(err: super::ErrorPayload) -> VaultError {
    match err.kind.as_str() {
        "NotFound" => VaultError::NotFound(err.msg),
        "Locked" => VaultError::Locked,
        "DecryptError" => VaultError::DecryptError(err.msg),
        "Ambiguous" => VaultError::Ambiguous(err.msg.parse().unwrap_or(0)),
        "Conflict" => VaultError::Conflict,
        "Tombstoned" => VaultError::Tombstoned,
        "IoError" => VaultError::IoError(err.msg),
        _ => VaultError::CorruptVault(err.msg),
    }
}
