//! C6 — the agent daemon itself: a single-threaded request loop holding
//! unwrapped keys for one vault in memory, per §4.6/§5.

use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::RngCore;
use zeroize::Zeroizing;

use super::{pid_path, socket_path, token_path, Reply, Request, BINARY_VERSION, REQUEST_IO_TIMEOUT};
use crate::error::VaultError;
use crate::keystore::{CryptoProvider, EncryptionKeys, LocalKeyStore, SecurityLevelId};

/// The agent's state machine, per §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// No vault has been successfully opened yet.
    Empty,
    /// A vault is open but its keys are not unwrapped.
    Locked,
    /// Keys are unwrapped and available for `encrypt`/`decrypt`.
    Unlocked,
}

pub struct Agent {
    vault_path: PathBuf,
    idle_lock_after: Duration,
    state: AgentState,
    encryption_keys: Option<EncryptionKeys>,
    keystore: Option<LocalKeyStore>,
    token: Option<String>,
    last_access: Instant,
}

impl Agent {
    /// Opens the vault at `vault_path` (reads `encryptionKeys.js` only — the
    /// agent never touches item files or the index, those are the client's
    /// `VaultStore`/`VaultApi` concern) and starts in `Locked`, or `Empty` if
    /// the vault could not be read.
    pub fn open(vault_path: PathBuf, idle_lock_after: Duration) -> Self {
        let state_and_keys = crate::vault_store::check_vault(&vault_path)
            .and_then(|_| {
                let raw = std::fs::read_to_string(
                    vault_path.join("data/default/encryptionKeys.js"),
                )?;
                Ok(serde_json::from_str::<EncryptionKeys>(&raw)?)
            });

        match state_and_keys {
            Ok(keys) => Agent {
                vault_path,
                idle_lock_after,
                state: AgentState::Locked,
                encryption_keys: Some(keys),
                keystore: None,
                token: None,
                last_access: Instant::now(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "agent could not open vault at startup");
                Agent {
                    vault_path,
                    idle_lock_after,
                    state: AgentState::Empty,
                    encryption_keys: None,
                    keystore: None,
                    token: None,
                    last_access: Instant::now(),
                }
            }
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Binds the per-vault socket (0600) and serves requests until the
    /// process is signaled. Also writes a 0600 pid file so a future client
    /// can identify and signal this process on a version mismatch.
    pub fn run(mut self) -> std::io::Result<()> {
        let sock_path = socket_path(&self.vault_path);
        let _ = std::fs::remove_file(&sock_path);
        let listener = UnixListener::bind(&sock_path)?;
        std::fs::set_permissions(&sock_path, std::fs::Permissions::from_mode(0o600))?;

        let pid_file = pid_path(&self.vault_path);
        std::fs::write(&pid_file, std::process::id().to_string())?;
        std::fs::set_permissions(&pid_file, std::fs::Permissions::from_mode(0o600))?;

        tracing::info!(socket = %sock_path.display(), pid = std::process::id(), "agent listening");

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    if let Err(e) = self.serve_connection(stream) {
                        tracing::warn!(error = %e, "connection ended with an io error");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to accept connection"),
            }
        }
        Ok(())
    }

    fn serve_connection(&mut self, mut stream: UnixStream) -> std::io::Result<()> {
        stream.set_read_timeout(Some(REQUEST_IO_TIMEOUT))?;
        stream.set_write_timeout(Some(REQUEST_IO_TIMEOUT))?;

        loop {
            let payload = match super::read_frame(&mut stream) {
                Ok(p) => p,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            };

            let request: Request = match serde_json::from_slice(&payload) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed request frame");
                    let reply = Reply::err(0, "CorruptVault", format!("malformed request: {e}"));
                    self.send(&mut stream, &reply)?;
                    continue;
                }
            };

            self.enforce_idle_lock();
            let reply = self.dispatch(&request);
            self.send(&mut stream, &reply)?;
        }
    }

    fn send(&self, stream: &mut UnixStream, reply: &Reply) -> std::io::Result<()> {
        let bytes = serde_json::to_vec(reply)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        super::write_frame(stream, &bytes)
    }

    fn enforce_idle_lock(&mut self) {
        if self.state == AgentState::Unlocked
            && self.last_access.elapsed() > self.idle_lock_after
        {
            tracing::info!("idle timeout reached, locking");
            self.lock();
        }
    }

    fn lock(&mut self) {
        self.keystore = None;
        self.token = None;
        if self.state == AgentState::Unlocked {
            self.state = AgentState::Locked;
        }
    }

    fn dispatch(&mut self, req: &Request) -> Reply {
        match self.dispatch_inner(req) {
            Ok(value) => Reply::ok(req.id, value),
            Err(e) => {
                let payload = super::ErrorPayload::from(&e);
                Reply::err(req.id, &payload.kind, payload.msg)
            }
        }
    }

    fn dispatch_inner(&mut self, req: &Request) -> Result<serde_json::Value, VaultError> {
        match req.op.as_str() {
            "info" => Ok(serde_json::json!({
                "binaryVersion": BINARY_VERSION,
                "pid": std::process::id(),
            })),
            "unlock" => self.op_unlock(req),
            "isLocked" => Ok(serde_json::json!(self.state != AgentState::Unlocked)),
            "lock" => {
                self.lock();
                Ok(serde_json::Value::Null)
            }
            "refreshAccess" => {
                self.require_unlocked()?;
                self.last_access = Instant::now();
                Ok(serde_json::Value::Null)
            }
            "decrypt" => self.op_decrypt(req),
            "encrypt" => self.op_encrypt(req),
            other => Err(VaultError::NotFound(format!("unknown operation {other}"))),
        }
    }

    fn require_token(&self, req: &Request) -> Result<(), VaultError> {
        match &self.token {
            Some(expected) if expected == &req.token => Ok(()),
            Some(_) => Err(VaultError::Locked),
            None => Ok(()),
        }
    }

    fn require_unlocked(&self) -> Result<(), VaultError> {
        if self.state == AgentState::Unlocked {
            Ok(())
        } else {
            Err(VaultError::Locked)
        }
    }

    fn op_unlock(&mut self, req: &Request) -> Result<serde_json::Value, VaultError> {
        let keys = self
            .encryption_keys
            .as_ref()
            .ok_or_else(|| VaultError::NotFound("vault not open".into()))?;
        let password = Zeroizing::new(
            req.args
                .get("password")
                .and_then(|v| v.as_str())
                .ok_or_else(|| VaultError::CorruptVault("unlock requires a password argument".into()))?
                .to_string(),
        );

        let local = LocalKeyStore::unlock(keys, &password)?;
        self.keystore = Some(local);
        self.state = AgentState::Unlocked;
        self.last_access = Instant::now();

        // First unlock of a session establishes the token; a repeat unlock
        // with the (now re-verified) same password is a no-op with respect
        // to it, so it doesn't invalidate a token a client already holds.
        if self.token.is_none() {
            let mut token_bytes = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut token_bytes);
            let token = hex::encode(token_bytes);
            std::fs::write(token_path(&self.vault_path), &token).map_err(VaultError::from)?;
            std::fs::set_permissions(
                token_path(&self.vault_path),
                std::fs::Permissions::from_mode(0o600),
            )
            .map_err(VaultError::from)?;
            self.token = Some(token);
        }

        tracing::info!("vault unlocked");
        Ok(serde_json::Value::Null)
    }

    fn op_decrypt(&mut self, req: &Request) -> Result<serde_json::Value, VaultError> {
        self.require_token(req)?;
        self.require_unlocked()?;
        let level = parse_level(&req.args)?;
        let blob = req
            .args
            .get("blob")
            .and_then(|v| v.as_str())
            .ok_or_else(|| VaultError::CorruptVault("decrypt requires a blob argument".into()))?;

        let keystore = self.keystore.as_ref().ok_or(VaultError::Locked)?;
        let plaintext = Zeroizing::new(keystore.decrypt(level, blob)?);
        self.last_access = Instant::now();
        Ok(serde_json::json!({ "plaintext": crate::codec::base64_encode(&plaintext) }))
    }

    fn op_encrypt(&mut self, req: &Request) -> Result<serde_json::Value, VaultError> {
        self.require_token(req)?;
        self.require_unlocked()?;
        let level = parse_level(&req.args)?;
        let plaintext_b64 = req
            .args
            .get("plaintext")
            .and_then(|v| v.as_str())
            .ok_or_else(|| VaultError::CorruptVault("encrypt requires a plaintext argument".into()))?;
        let plaintext = Zeroizing::new(crate::codec::base64_decode(plaintext_b64)?);

        let keystore = self.keystore.as_ref().ok_or(VaultError::Locked)?;
        let blob = keystore.encrypt(level, &plaintext)?;
        self.last_access = Instant::now();
        Ok(serde_json::json!({ "blob": blob }))
    }
}

fn parse_level(args: &serde_json::Value) -> Result<SecurityLevelId, VaultError> {
    match args.get("level").and_then(|v| v.as_str()) {
        Some("SL3") => Ok(SecurityLevelId::Sl3),
        Some("SL5") => Ok(SecurityLevelId::Sl5),
        _ => Err(VaultError::CorruptVault(
            "expected a level argument of SL3 or SL5".into(),
        )),
    }
}

/// Removes the socket/token/pid files for `vault_path`, if present. Used by
/// `lock`'s process-exit path and by tests.
pub fn cleanup_transport(vault_path: &Path) {
    let _ = std::fs::remove_file(socket_path(vault_path));
    let _ = std::fs::remove_file(token_path(vault_path));
    let _ = std::fs::remove_file(pid_path(vault_path));
}
