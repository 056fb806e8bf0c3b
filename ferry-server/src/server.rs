//! Connection multiplexer and event loop
//!
//! One task owns the listener, every live socket, and the session table.
//! Readiness is driven by `tokio::select!` over pending accepts and a
//! bounded poll tick; client sockets are read with `try_read` and written
//! with `try_write`, so nothing inside the loop ever blocks. Replies and
//! download payloads are queued on a per-connection outbound buffer and
//! drained each tick; a peer that stops reading stalls only its own
//! connection, never the loop. Because only this task touches the tables,
//! no locking is needed anywhere — the single-writer discipline is the
//! safety property the rest of the crate relies on.

use anyhow::Result;
use ferry_core::config::ServerConfig;
use ferry_core::connection::{ConnMode, Connection};
use ferry_core::error::{ProtocolError, TransferError};
use ferry_core::files::FileStore;
use ferry_core::router::{Action, CommandRouter};
use ferry_core::session::{ConnId, SessionStore};
use ferry_core::transfer::PendingTransfer;
use ferry_core::AuthPolicy;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const SHUTDOWN_NOTICE: &str = "Server is shutting down. Goodbye!";

/// Longest accepted command line. A buffer that grows past this without a
/// newline is a protocol violation and costs the connection.
const MAX_LINE_LEN: usize = 64 * 1024;

/// Ferry TCP server.
pub struct Server {
    listener: TcpListener,
    state: LoopState,
}

/// Everything the loop task owns besides the listener.
struct LoopState {
    config: ServerConfig,
    conns: HashMap<ConnId, Connection>,
    next_id: ConnId,
    sessions: SessionStore,
    router: CommandRouter,
    shutting_down: bool,
}

impl Server {
    /// Bind the listener and set up the file store and auth policy.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let files = FileStore::new(&config.storage.files_dir)?;
        let auth = AuthPolicy::new(
            config.auth.admin_password.clone(),
            config.auth.log_failed_auth,
        );

        Ok(Self {
            listener,
            state: LoopState {
                config,
                conns: HashMap::new(),
                next_id: 1,
                sessions: SessionStore::new(),
                router: CommandRouter::new(auth, files),
                shutting_down: false,
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the event loop until a shutdown command or Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let Server { listener, mut state } = self;

        let mut poll =
            tokio::time::interval(Duration::from_millis(state.config.server.poll_interval_ms));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let session_sweep_every =
            Duration::from_secs(state.config.auth.session_sweep_interval_secs);
        let status_every = Duration::from_secs(state.config.server.status_interval_secs);
        let mut last_session_sweep = Instant::now();
        let mut last_status = Instant::now();

        info!("server entering main loop");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => state.accept(stream, addr),
                    // Accept failures are a no-op tick, never fatal.
                    Err(e) => error!(error = %e, "failed to accept connection"),
                },

                _ = poll.tick() => {
                    state.poll_connections();
                    state.sweep_idle_connections();

                    if last_session_sweep.elapsed() >= session_sweep_every {
                        let removed = state
                            .sessions
                            .cleanup_inactive(state.config.auth.session_timeout_secs);
                        if removed > 0 {
                            info!(removed, "cleaned up inactive sessions");
                        }
                        last_session_sweep = Instant::now();
                    }

                    if last_status.elapsed() >= status_every {
                        let counts = state.sessions.counts();
                        info!(
                            active_clients = state.conns.len(),
                            authenticated_users = counts.total,
                            "server status"
                        );
                        last_status = Instant::now();
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal");
                    state.shutting_down = true;
                },
            }

            if state.shutting_down {
                break;
            }
        }

        state.shutdown_all();
        info!("server shutdown complete");
        Ok(())
    }
}

impl LoopState {
    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.conns.len() >= self.config.server.max_clients {
            warn!(%addr, "connection refused: server full");
            // Best effort: a fresh socket buffer takes one line.
            let _ = stream.try_write(b"ERROR: Server full, try again later\n");
            return;
        }

        let id = self.next_id;
        self.next_id += 1;

        let mut conn = Connection::new(id, stream, addr);
        info!(conn_id = id, %addr, "client connected");

        let banner = format!(
            "WELCOME ClientID: {id}\n\
             You are not authenticated\n\
             Use /auth <username> [password] to authenticate\n\
             Use /help for available commands\n\
             Type any message to echo, or 'quit' to disconnect"
        );
        queue_line(&mut conn, &banner);
        if flush_outbound(&mut conn).is_err() {
            info!(conn_id = id, "client disconnected before welcome");
            return;
        }

        self.conns.insert(id, conn);
    }

    /// One bounded pass over every connection: drain queued writes, then
    /// read. In line mode at most one command line is consumed per
    /// connection per pass, which keeps command handling strictly ordered
    /// and non-reentrant within a connection; in raw mode everything
    /// available is taken, since upload bytes have no ordering concern.
    fn poll_connections(&mut self) {
        let write_stall = Duration::from_secs(self.config.server.write_stall_timeout_secs);

        let mut ids: Vec<ConnId> = self.conns.keys().copied().collect();
        ids.sort_unstable();

        for id in ids {
            if self.shutting_down {
                break;
            }

            let mut write_failed = false;
            let mut write_stalled = false;
            let mut eof = false;
            let mut oversized = false;
            let mut in_raw_mode = false;
            let mut line = None;

            let Some(conn) = self.conns.get_mut(&id) else {
                continue;
            };

            if flush_outbound(conn).is_err() {
                write_failed = true;
            } else if !conn.out.is_empty() && conn.last_out_progress.elapsed() > write_stall {
                write_stalled = true;
            }

            if !write_failed && !write_stalled {
                let raw = matches!(conn.mode, ConnMode::RawUpload(_));
                let mut chunk = [0u8; 8192];
                loop {
                    match conn.stream.try_read(&mut chunk) {
                        Ok(0) => {
                            eof = true;
                            break;
                        }
                        Ok(n) => {
                            conn.bytes_received += n as u64;
                            conn.buf.extend_from_slice(&chunk[..n]);
                            conn.touch();
                            if !raw {
                                break;
                            }
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        // A non-EOF read error is "no data yet", not a
                        // disconnect; the bounded tick prevents a busy loop.
                        Err(e) => {
                            debug!(conn_id = id, error = %e, "transient read error");
                            break;
                        }
                    }
                }

                if !eof {
                    match &mut conn.mode {
                        ConnMode::RawUpload(transfer) => {
                            if !conn.buf.is_empty() {
                                let data = conn.buf.split();
                                let surplus = transfer.feed(&data);
                                conn.buf.extend_from_slice(&surplus);
                            }
                            in_raw_mode = true;
                        }
                        ConnMode::Line => {
                            line = conn.pop_line();
                            if line.is_none() && conn.buf.len() > MAX_LINE_LEN {
                                oversized = true;
                            }
                        }
                    }
                }
            }

            if write_failed {
                self.teardown(id, "write failed");
                continue;
            }
            if write_stalled {
                self.teardown(id, "outbound write stalled");
                continue;
            }
            if eof {
                self.teardown(id, "disconnected (EOF)");
                continue;
            }
            if oversized {
                self.close_notify(
                    id,
                    &ProtocolError::LineTooLong(MAX_LINE_LEN).to_string(),
                    "oversized line",
                );
                continue;
            }
            if in_raw_mode {
                self.drive_upload(id);
                continue;
            }
            if let Some(line) = line {
                self.process_line(id, line);
            }
        }
    }

    fn process_line(&mut self, id: ConnId, line: String) {
        if let Some(conn) = self.conns.get_mut(&id) {
            conn.messages_received += 1;
        }
        debug!(conn_id = id, line = %line, "client line");

        let active = self.conns.len();
        let action = self.router.handle_line(&mut self.sessions, id, &line, active);
        self.apply_action(id, action);
    }

    fn apply_action(&mut self, id: ConnId, action: Action) {
        match action {
            Action::Ignore => {}

            Action::Reply(msg) => {
                self.reply(id, &msg);
            }

            Action::ReplyAndClose(msg) => {
                self.close_notify(id, &msg, "requested disconnect");
            }

            Action::BeginUpload { filename, size } => {
                self.begin_upload(id, filename, size);
            }

            Action::SendFile { filename, data } => {
                let failed = match self.conns.get_mut(&id) {
                    Some(conn) => {
                        queue_file(conn, &filename, &data);
                        flush_outbound(conn).is_err()
                    }
                    None => false,
                };
                if failed {
                    self.teardown(id, "write failed");
                } else {
                    info!(conn_id = id, file = %filename, bytes = data.len(), "file downloaded");
                }
            }

            Action::Kick { target } => {
                let reply = if target == id {
                    "ERROR: Cannot kick your own connection".to_string()
                } else if self.conns.contains_key(&target) {
                    self.close_notify(
                        target,
                        "You have been disconnected by an administrator",
                        "kicked by admin",
                    );
                    format!("KICK OK - client #{target} disconnected")
                } else {
                    format!("ERROR: No such client: #{target}")
                };
                self.reply(id, &reply);
            }

            Action::Shutdown => {
                info!(conn_id = id, "shutdown requested by admin");
                self.reply(id, "SHUTDOWN OK - stopping server");
                self.shutting_down = true;
            }
        }
    }

    /// Queue one reply line; a failed write tears the connection down.
    fn reply(&mut self, id: ConnId, msg: &str) {
        let failed = match self.conns.get_mut(&id) {
            Some(conn) => {
                queue_line(conn, msg);
                flush_outbound(conn).is_err()
            }
            None => false,
        };
        if failed {
            self.teardown(id, "write failed");
        }
    }

    /// Queue a final message, push what the socket will take, and close.
    /// Anything the peer has not made room for is dropped with the socket.
    fn close_notify(&mut self, id: ConnId, msg: &str, reason: &str) {
        if let Some(conn) = self.conns.get_mut(&id) {
            queue_line(conn, msg);
            let _ = flush_outbound(conn);
        }
        self.teardown(id, reason);
    }

    /// Acknowledge an upload and put the connection into raw-byte mode.
    /// Bytes the client pipelined behind the command line are fed to the
    /// transfer immediately, so a tiny upload can finish within this call.
    fn begin_upload(&mut self, id: ConnId, filename: String, size: u64) {
        let idle_timeout = Duration::from_secs(self.config.storage.transfer_timeout_secs);

        let Some(conn) = self.conns.get_mut(&id) else {
            return;
        };
        queue_line(conn, "UPLOAD_READY");
        if flush_outbound(conn).is_err() {
            self.teardown(id, "write failed");
            return;
        }

        info!(conn_id = id, file = %filename, bytes = size, "upload started");
        let mut transfer = PendingTransfer::new(filename, size, idle_timeout);
        if !conn.buf.is_empty() {
            let data = conn.buf.split();
            let surplus = transfer.feed(&data);
            conn.buf.extend_from_slice(&surplus);
        }
        conn.mode = ConnMode::RawUpload(transfer);

        self.drive_upload(id);
    }

    /// Check a raw-mode connection for completion or expiry. Either way the
    /// connection reverts to line mode before any reply is sent; the loop
    /// must never be left in raw-byte mode permanently.
    fn drive_upload(&mut self, id: ConnId) {
        enum Outcome {
            Complete(PendingTransfer),
            Expired(PendingTransfer),
        }

        let outcome = {
            let Some(conn) = self.conns.get_mut(&id) else {
                return;
            };
            let (complete, expired) = match &conn.mode {
                ConnMode::RawUpload(t) => (t.is_complete(), t.is_expired()),
                ConnMode::Line => return,
            };
            if !complete && !expired {
                return;
            }
            match std::mem::replace(&mut conn.mode, ConnMode::Line) {
                ConnMode::RawUpload(t) if complete => Outcome::Complete(t),
                ConnMode::RawUpload(t) => Outcome::Expired(t),
                ConnMode::Line => return,
            }
        };

        match outcome {
            Outcome::Complete(transfer) => {
                let name = transfer.filename().to_string();
                let size = transfer.received();
                let msg = match self.router.files().write(&name, &transfer.into_bytes()) {
                    Ok(()) => {
                        info!(conn_id = id, file = %name, bytes = size, "upload complete");
                        format!("UPLOAD_OK {name} ({size} bytes)")
                    }
                    Err(e) => {
                        warn!(conn_id = id, file = %name, error = %e, "upload write failed");
                        e.to_string()
                    }
                };
                self.reply(id, &msg);
            }
            Outcome::Expired(transfer) => {
                // Partial data is dropped with the transfer; nothing is
                // written, so there is no maybe-uploaded state.
                warn!(
                    conn_id = id,
                    file = %transfer.filename(),
                    received = transfer.received(),
                    expected = transfer.expected(),
                    "upload timed out"
                );
                self.reply(id, &TransferError::Timeout.to_string());
            }
        }
    }

    /// Evict connections with no traffic inside the inactivity window.
    fn sweep_idle_connections(&mut self) {
        let timeout = Duration::from_secs(self.config.server.inactivity_timeout_secs);
        let stale: Vec<ConnId> = self
            .conns
            .iter()
            .filter(|(_, c)| c.idle_for() > timeout)
            .map(|(id, _)| *id)
            .collect();

        let removed = stale.len();
        for id in stale {
            self.close_notify(
                id,
                "TIMEOUT - Closing connection due to inactivity",
                "timed out due to inactivity",
            );
        }
        if removed > 0 {
            info!(removed, "evicted idle connections");
        }
    }

    /// Release a connection: drop the socket, remove any session.
    fn teardown(&mut self, id: ConnId, reason: &str) {
        if let Some(conn) = self.conns.remove(&id) {
            self.sessions.remove(id);
            info!(
                conn_id = id,
                addr = %conn.addr,
                reason,
                messages = conn.messages_received,
                bytes_in = conn.bytes_received,
                bytes_out = conn.bytes_sent,
                "client disconnected"
            );
        }
    }

    /// Notify and close every connection on process shutdown.
    fn shutdown_all(&mut self) {
        let ids: Vec<ConnId> = self.conns.keys().copied().collect();
        for id in ids {
            self.close_notify(id, SHUTDOWN_NOTICE, "server shutdown");
        }
    }
}

/// Queue one newline-terminated message on the outbound buffer.
fn queue_line(conn: &mut Connection, text: &str) {
    conn.out.extend_from_slice(text.as_bytes());
    if !text.ends_with('\n') {
        conn.out.extend_from_slice(b"\n");
    }
    conn.messages_sent += 1;
}

/// Queue a download: the announce line, exactly `data.len()` raw bytes,
/// then the end marker.
fn queue_file(conn: &mut Connection, filename: &str, data: &[u8]) {
    let header = format!("DOWNLOAD_BEGIN {} {}\n", filename, data.len());
    conn.out.extend_from_slice(header.as_bytes());
    conn.out.extend_from_slice(data);
    conn.out.extend_from_slice(b"DOWNLOAD_END\n");
    conn.messages_sent += 2;
}

/// Drain as much of the outbound buffer as the socket accepts without
/// blocking. WouldBlock leaves the rest queued for the next tick; only a
/// real socket fault is an error.
fn flush_outbound(conn: &mut Connection) -> io::Result<()> {
    while !conn.out.is_empty() {
        match conn.stream.try_write(&conn.out) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                let _ = conn.out.split_to(n);
                conn.bytes_sent += n as u64;
                conn.last_out_progress = Instant::now();
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    if conn.out.is_empty() {
        conn.last_out_progress = Instant::now();
    }
    Ok(())
}
