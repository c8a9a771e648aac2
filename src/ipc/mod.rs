//! Control socket (Unix domain, length-prefixed JSON)
//!
//! A running daemon owns the config file. CLI subcommands that change it go
//! through this socket so the daemon applies them to its in-memory state
//! instead of having them overwritten by its next save.

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::constants::ipc;
use crate::event_handler::AppEvent;

mod messages;
pub use messages::{ControlRequest, ControlResponse};

/// Socket path under `$XDG_RUNTIME_DIR`, falling back to the cache dir
pub fn default_socket_path() -> Result<PathBuf> {
    let base = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime_dir) => PathBuf::from(runtime_dir),
        None => dirs::cache_dir()
            .context("Failed to determine cache directory (no XDG_RUNTIME_DIR or HOME)")?,
    };
    Ok(base.join(ipc::SOCKET_DIR).join(ipc::SOCKET_FILENAME))
}

/// Whether a daemon is accepting connections on `path`
pub fn daemon_listening(path: &Path) -> bool {
    UnixStream::connect(path).is_ok()
}

/// CLI side of the control socket
pub struct ControlClient {
    stream: UnixStream,
}

impl ControlClient {
    pub fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).with_context(|| {
            format!("Failed to connect to keyclick daemon at {}", path.display())
        })?;
        stream
            .set_read_timeout(Some(ipc::REPLY_TIMEOUT * 2))
            .context("Failed to set socket read timeout")?;
        Ok(Self { stream })
    }

    /// Send one request and wait for its response
    pub fn request(&mut self, request: &ControlRequest) -> Result<ControlResponse> {
        write_message(&mut self.stream, request)?;
        read_message(&mut self.stream)
    }
}

/// Daemon side of the control socket. The socket file is removed on drop.
pub struct ControlServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl ControlServer {
    pub fn bind_to(socket_path: PathBuf) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create socket directory: {}", parent.display())
            })?;
        }

        if socket_path.exists() {
            if daemon_listening(&socket_path) {
                bail!("Another keyclick daemon is listening on {}", socket_path.display());
            }
            std::fs::remove_file(&socket_path).with_context(|| {
                format!("Failed to remove stale socket: {}", socket_path.display())
            })?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind socket at {}", socket_path.display()))?;

        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set socket permissions")?;
        }

        info!(path = %socket_path.display(), "Control socket listening");
        Ok(Self {
            listener,
            socket_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections on a background thread, one request each,
    /// forwarding them to the dispatcher as [`AppEvent::Remote`]
    pub fn spawn(&self, events: Sender<AppEvent>) -> Result<JoinHandle<()>> {
        let listener = self
            .listener
            .try_clone()
            .context("Failed to clone control socket listener")?;

        Ok(thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept control connection");
                        continue;
                    }
                };
                if let Err(e) = serve_connection(stream, &events) {
                    debug!(error = ?e, "Control connection ended without a request");
                }
            }
        }))
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

fn serve_connection(mut stream: UnixStream, events: &Sender<AppEvent>) -> Result<()> {
    stream
        .set_read_timeout(Some(ipc::REPLY_TIMEOUT))
        .context("Failed to set socket read timeout")?;
    let request: ControlRequest = read_message(&mut stream)?;
    debug!(request = ?request, "Control request");
    let response = forward(request, events);
    write_message(&mut stream, &response)
}

/// Hand a request to the dispatcher and wait for its status line
fn forward(request: ControlRequest, events: &Sender<AppEvent>) -> ControlResponse {
    let (reply_tx, reply_rx) = mpsc::channel();
    let event = AppEvent::Remote {
        intent: request.into(),
        reply: reply_tx,
    };
    if events.send(event).is_err() {
        return ControlResponse::Failed("keyclick is shutting down".to_string());
    }
    match reply_rx.recv_timeout(ipc::REPLY_TIMEOUT) {
        Ok(status) => ControlResponse::Done(status),
        Err(_) => ControlResponse::Failed("No reply from keyclick daemon".to_string()),
    }
}

/// Write a message with a u32 little-endian length prefix
fn write_message<T: Serialize>(stream: &mut impl Write, msg: &T) -> Result<()> {
    let json = serde_json::to_vec(msg).context("Failed to serialize message to JSON")?;
    let len = u32::try_from(json.len()).context("Message too large to send")?;

    stream
        .write_all(&len.to_le_bytes())
        .context("Failed to write message length")?;
    stream
        .write_all(&json)
        .context("Failed to write message payload")?;
    stream.flush().context("Failed to flush stream")?;
    Ok(())
}

fn read_message<T: DeserializeOwned>(stream: &mut impl Read) -> Result<T> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .context("Failed to read message length")?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > ipc::MAX_MESSAGE_SIZE {
        return Err(anyhow!(
            "Message too large: {} bytes (max: {})",
            len,
            ipc::MAX_MESSAGE_SIZE
        ));
    }

    let mut json_buf = vec![0u8; len];
    stream
        .read_exact(&mut json_buf)
        .context("Failed to read message payload")?;
    serde_json::from_slice(&json_buf).context("Failed to deserialize message from JSON")
}
