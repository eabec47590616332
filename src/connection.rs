//! A single accepted TCP client connection: socket, state, and a
//! per-connection read buffer. Owned by exactly one worker slot.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use crate::domain::ConnectionState;

/// One slot-table entry. The
/// stream is wrapped in `Arc` so the worker's readiness poll can hold a cheap handle to
/// it without retaining the slot-table lock for the duration of the wait.
pub struct Connection {
    pub stream: Arc<TcpStream>,
    pub state: ConnectionState,
    pub read_buffer: Vec<u8>,
    pub last_active: Instant,
    /// Set while `state == Processing`; the Compute stage resolves it with the
    /// rendered plan text.
    pub pending: Option<oneshot::Receiver<String>>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Connection {
            stream: Arc::new(stream),
            state: ConnectionState::Connected,
            read_buffer: Vec::new(),
            last_active: Instant::now(),
            pending: None,
        }
    }

    /// Extracts and removes the first complete newline-terminated line from the read
    /// buffer, if any.
    pub fn take_line(&mut self) -> Option<String> {
        let newline_pos = self.read_buffer.iter().position(|&b| b == b'\n')?;
        let line_bytes: Vec<u8> = self.read_buffer.drain(..=newline_pos).collect();
        Some(String::from_utf8_lossy(&line_bytes).into_owned())
    }

    pub async fn write_all(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut stream = &*self.stream;
        stream.write_all(bytes).await
    }

    pub fn is_idle(&self, idle_timeout: std::time::Duration) -> bool {
        self.last_active.elapsed() >= idle_timeout
    }
}
