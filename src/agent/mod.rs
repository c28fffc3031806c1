//! C6 — Agent: wire protocol shared by the daemon (`server`) and the stub
//! (`client`), plus the predictable per-vault transport paths.

pub mod client;
pub mod server;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default idle-lock timeout: 10 minutes, per §3 ("Agent session").
pub const DEFAULT_IDLE_LOCK_AFTER: Duration = Duration::from_secs(600);

/// Soft per-request I/O timeout, per §5.
pub const REQUEST_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// The agent's protocol version. A client refuses to talk to an agent
/// reporting a different value and restarts it instead — this is simpler
/// and more conservative than trying to version the wire format itself, and
/// in practice the binary is always replaced as a unit.
pub const BINARY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A length-prefixed JSON request frame: `{id, op, args}`, plus an
/// out-of-band session token established at first unlock (empty before
/// then). Not part of `args` because the token is a transport-level
/// concern, not an operation argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub op: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub token: String,
}

/// A length-prefixed JSON reply frame: `{id, ok, value|error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Reply {
    pub fn ok(id: u64, value: serde_json::Value) -> Self {
        Reply {
            id,
            ok: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn err(id: u64, kind: &str, msg: String) -> Self {
        Reply {
            id,
            ok: false,
            value: None,
            error: Some(ErrorPayload {
                kind: kind.to_string(),
                msg,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub msg: String,
}

impl From<&crate::error::VaultError> for ErrorPayload {
    fn from(e: &crate::error::VaultError) -> Self {
        use crate::error::VaultError::*;
        let kind = match e {
            CorruptVault(_) => "CorruptVault",
            NotFound(_) => "NotFound",
            Locked => "Locked",
            DecryptError(_) => "DecryptError",
            Ambiguous(_) => "Ambiguous",
            IoError(_) => "IoError",
            Conflict => "Conflict",
            Tombstoned => "Tombstoned",
        };
        // `Ambiguous` carries its count as the message body (not the
        // human-readable sentence) so a client can parse it back exactly.
        let msg = match e {
            Ambiguous(n) => n.to_string(),
            other => other.to_string(),
        };
        ErrorPayload {
            kind: kind.to_string(),
            msg,
        }
    }
}

/// Derives the per-vault socket path: a predictable, user-writable location
/// under the system temp directory, named by a hash of the absolute vault
/// path so distinct vaults never collide.
pub fn socket_path(vault_path: &Path) -> PathBuf {
    std::env::temp_dir().join(format!("agile-vault-{}.sock", vault_hash(vault_path)))
}

/// Path to the 0600 file holding the current session token, alongside the
/// socket.
pub fn token_path(vault_path: &Path) -> PathBuf {
    std::env::temp_dir().join(format!("agile-vault-{}.token", vault_hash(vault_path)))
}

/// Path to the 0600 file holding the agent's pid, so a client can signal a
/// stale agent on a version mismatch.
pub fn pid_path(vault_path: &Path) -> PathBuf {
    std::env::temp_dir().join(format!("agile-vault-{}.pid", vault_hash(vault_path)))
}

fn vault_hash(vault_path: &Path) -> String {
    let mut hasher = Sha1::new();
    hasher.update(vault_path.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Reads one length-prefixed JSON frame: a 4-byte big-endian length prefix
/// followed by that many bytes of JSON.
pub fn read_frame<R: std::io::Read>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Writes one length-prefixed JSON frame.
pub fn write_frame<W: std::io::Write>(writer: &mut W, payload: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_is_stable_and_distinct() {
        let a = socket_path(Path::new("/tmp/a.agilekeychain"));
        let a2 = socket_path(Path::new("/tmp/a.agilekeychain"));
        let b = socket_path(Path::new("/tmp/b.agilekeychain"));
        assert_eq!(a, a2);
        assert_ne!(a, b);
    }

    #[test]
    fn frame_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"{\"hello\":true}").unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let payload = read_frame(&mut cursor).unwrap();
        assert_eq!(payload, b"{\"hello\":true}");
    }
}
