//! Per-connection bookkeeping
//!
//! A Connection exists from accept to teardown, independent of whether it
//! ever authenticates. The mode tag decides how inbound bytes are consumed:
//! newline-delimited commands, or raw bytes owned by an upload in progress.

use crate::session::ConnId;
use crate::transfer::PendingTransfer;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// How inbound bytes on a connection are interpreted.
#[derive(Debug)]
pub enum ConnMode {
    /// Newline-terminated command lines.
    Line,
    /// Raw bytes feeding an upload; line parsing is suspended.
    RawUpload(PendingTransfer),
}

#[derive(Debug)]
pub struct Connection {
    pub id: ConnId,
    pub stream: TcpStream,
    pub addr: SocketAddr,
    pub buf: BytesMut,
    /// Outbound bytes the socket has not accepted yet.
    pub out: BytesMut,
    /// Last time the outbound buffer shrank (or was empty).
    pub last_out_progress: Instant,
    pub mode: ConnMode,
    pub connected_at: Instant,
    pub last_active: Instant,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl Connection {
    pub fn new(id: ConnId, stream: TcpStream, addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id,
            stream,
            addr,
            buf: BytesMut::with_capacity(4096),
            out: BytesMut::with_capacity(4096),
            last_out_progress: now,
            mode: ConnMode::Line,
            connected_at: now,
            last_active: now,
            messages_received: 0,
            messages_sent: 0,
            bytes_received: 0,
            bytes_sent: 0,
        }
    }

    /// Record traffic on the connection.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    /// Pop one complete line from the inbound buffer, if present.
    pub fn pop_line(&mut self) -> Option<String> {
        pop_line(&mut self.buf)
    }
}

/// Extract the first newline-terminated line from `buf`, stripping the
/// terminator and any trailing carriage return.
pub fn pop_line(buf: &mut BytesMut) -> Option<String> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let line = buf.split_to(pos + 1);
    Some(
        String::from_utf8_lossy(&line[..pos])
            .trim_end_matches('\r')
            .to_string(),
    )
}
