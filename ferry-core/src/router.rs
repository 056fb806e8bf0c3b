//! Command parsing and dispatch
//!
//! One decoded line in, one Action out. The router owns the auth policy and
//! the file store; the session table is borrowed per call so the event loop
//! stays the single writer. Handlers never touch sockets: the returned
//! Action tells the loop what to send and whether the connection changes
//! mode or goes away.

use crate::auth::AuthPolicy;
use crate::files::FileStore;
use crate::session::{ConnId, Role, SessionStore};
use chrono::Utc;
use tracing::info;

const UNKNOWN_COMMAND: &str =
    "ERROR: Unknown command or insufficient permissions. Use /help for available commands.";

/// What the event loop should do after a line has been handled.
#[derive(Debug, PartialEq)]
pub enum Action {
    /// Nothing to do (blank input).
    Ignore,
    /// Send the text as one or more lines.
    Reply(String),
    /// Send the text, then close the connection.
    ReplyAndClose(String),
    /// Send UPLOAD_READY and switch the connection into raw-byte mode.
    BeginUpload { filename: String, size: u64 },
    /// Stream DOWNLOAD_BEGIN, the payload, then DOWNLOAD_END.
    SendFile { filename: String, data: Vec<u8> },
    /// Disconnect another client.
    Kick { target: ConnId },
    /// Notify every client and stop the server.
    Shutdown,
}

/// Parses one line into a command and dispatches it.
pub struct CommandRouter {
    auth: AuthPolicy,
    files: FileStore,
}

impl CommandRouter {
    pub fn new(auth: AuthPolicy, files: FileStore) -> Self {
        Self { auth, files }
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    /// Handle one decoded line from a connection.
    ///
    /// Session activity is updated before the permission check so idle
    /// timeout measures time since the last accepted traffic.
    pub fn handle_line(
        &self,
        sessions: &mut SessionStore,
        conn_id: ConnId,
        line: &str,
        active_connections: usize,
    ) -> Action {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Action::Ignore;
        }

        sessions.touch(conn_id);

        let Some((name, rest)) = parse_command(trimmed) else {
            // Plain text: echoed back when the session holds the echo
            // permission, otherwise rejected.
            return if self.auth.has_permission(sessions, conn_id, "echo") {
                Action::Reply(format!("Server Echo: {trimmed}"))
            } else {
                Action::Reply(UNKNOWN_COMMAND.to_string())
            };
        };

        if let Err(denial) = self.auth.validate_command(sessions, conn_id, &name) {
            return Action::Reply(denial);
        }

        match name.as_str() {
            "auth" => self.cmd_auth(sessions, conn_id, &rest),
            "logout" => self.cmd_logout(sessions, conn_id),
            "whoami" => self.cmd_whoami(sessions, conn_id),
            "users" => self.cmd_users(sessions),
            "stats" => self.cmd_stats(sessions, active_connections),
            "help" => Action::Reply(help_text()),
            "quit" | "exit" => Action::ReplyAndClose("Goodbye!".to_string()),
            "list" => self.cmd_list(),
            "read" => self.cmd_read(&rest),
            "delete" => self.cmd_delete(&rest),
            "search" => self.cmd_search(&rest),
            "info" => self.cmd_info(&rest),
            "download" => self.cmd_download(&rest),
            "upload" => self.cmd_upload(&rest),
            "kick" => cmd_kick(&rest),
            "shutdown" => Action::Shutdown,
            _ => Action::Reply(UNKNOWN_COMMAND.to_string()),
        }
    }

    fn cmd_auth(&self, sessions: &mut SessionStore, conn_id: ConnId, rest: &str) -> Action {
        let mut parts = rest.split_whitespace();
        let Some(username) = parts.next() else {
            return Action::Reply("ERROR: Usage: /auth <username> [password]".to_string());
        };
        let password = parts.next();

        match self.auth.authenticate(sessions, conn_id, username, password) {
            Ok(session) => {
                let grant = match session.role {
                    Role::Admin => "You have ADMIN privileges.",
                    Role::Read => "You have READ-ONLY access.",
                };
                let reply = format!("AUTH OK - Welcome {}! {}", session.username, grant);
                sessions.insert(conn_id, session);
                Action::Reply(reply)
            }
            Err(e) => Action::Reply(e.to_string()),
        }
    }

    fn cmd_logout(&self, sessions: &mut SessionStore, conn_id: ConnId) -> Action {
        match sessions.remove(conn_id) {
            Some(session) => {
                info!(conn_id, user = %session.username, "user logged out");
                Action::Reply("Logged out successfully.".to_string())
            }
            None => Action::Reply("ERROR: Not currently authenticated.".to_string()),
        }
    }

    fn cmd_whoami(&self, sessions: &SessionStore, conn_id: ConnId) -> Action {
        let Some(session) = sessions.get(conn_id) else {
            return Action::Reply(
                "Not authenticated. Use /auth <username> [password] to login.".to_string(),
            );
        };
        Action::Reply(format!(
            "USER INFO:\nUsername: {}\nRole: {}\nAuthenticated: {}\nSession duration: {}",
            session.username,
            session.role.as_str(),
            session.authenticated_at.format("%Y-%m-%d %H:%M:%S"),
            format_duration(session.duration_secs()),
        ))
    }

    fn cmd_users(&self, sessions: &SessionStore) -> Action {
        let counts = sessions.counts();
        let mut out = format!(
            "USER SUMMARY:\nTotal authenticated users: {}\nAdmins: {}\nRead-only users: {}",
            counts.total, counts.admins, counts.read_only
        );

        let mut entries: Vec<_> = sessions.iter().collect();
        entries.sort_by_key(|(id, _)| *id);
        if !entries.is_empty() {
            out.push_str("\n\nActive Users:");
            for (id, session) in entries {
                out.push_str(&format!(
                    "\n  Client #{} - {} ({}) - Session: {}",
                    id,
                    session.username,
                    session.role.as_str(),
                    format_duration(session.duration_secs()),
                ));
            }
        }
        Action::Reply(out)
    }

    fn cmd_stats(&self, sessions: &SessionStore, active_connections: usize) -> Action {
        let counts = sessions.counts();
        Action::Reply(format!(
            "SERVER STATISTICS:\nActive connections: {}\nAuthenticated users: {} ({} admin, {} read-only)\nServer time: {}",
            active_connections,
            counts.total,
            counts.admins,
            counts.read_only,
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
        ))
    }

    fn cmd_list(&self) -> Action {
        match self.files.list() {
            Ok(names) if names.is_empty() => Action::Reply("No files stored.".to_string()),
            Ok(names) => {
                let mut out = format!("FILES ({}):", names.len());
                for name in names {
                    out.push_str(&format!("\n  {name}"));
                }
                Action::Reply(out)
            }
            Err(e) => Action::Reply(e.to_string()),
        }
    }

    fn cmd_read(&self, rest: &str) -> Action {
        let name = rest.trim();
        if name.is_empty() {
            return Action::Reply("ERROR: Usage: /read <filename>".to_string());
        }
        match self.files.read(name) {
            Ok(data) => Action::Reply(format!(
                "FILE {} ({} bytes):\n{}",
                name,
                data.len(),
                String::from_utf8_lossy(&data),
            )),
            Err(e) => Action::Reply(e.to_string()),
        }
    }

    fn cmd_delete(&self, rest: &str) -> Action {
        let name = rest.trim();
        if name.is_empty() {
            return Action::Reply("ERROR: Usage: /delete <filename>".to_string());
        }
        match self.files.delete(name) {
            Ok(true) => {
                info!(file = name, "file deleted");
                Action::Reply(format!("DELETE OK {name}"))
            }
            Ok(false) => Action::Reply(format!("ERROR: File not found: {name}")),
            Err(e) => Action::Reply(e.to_string()),
        }
    }

    fn cmd_search(&self, rest: &str) -> Action {
        let keyword = rest.trim();
        if keyword.is_empty() {
            return Action::Reply("ERROR: Usage: /search <keyword>".to_string());
        }
        match self.files.search(keyword) {
            Ok(matches) if matches.is_empty() => {
                Action::Reply(format!("No files matching '{keyword}'"))
            }
            Ok(matches) => {
                let mut out = format!("MATCHES ({}):", matches.len());
                for name in matches {
                    out.push_str(&format!("\n  {name}"));
                }
                Action::Reply(out)
            }
            Err(e) => Action::Reply(e.to_string()),
        }
    }

    fn cmd_info(&self, rest: &str) -> Action {
        let name = rest.trim();
        if name.is_empty() {
            return Action::Reply("ERROR: Usage: /info <filename>".to_string());
        }
        match self.files.stat(name) {
            Ok(info) => {
                let fmt = |t: Option<chrono::DateTime<Utc>>| {
                    t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                };
                Action::Reply(format!(
                    "FILE INFO:\nName: {}\nSize: {} bytes\nCreated: {}\nModified: {}\nRead-only: {}",
                    info.name,
                    info.size,
                    fmt(info.created),
                    fmt(info.modified),
                    info.readonly,
                ))
            }
            Err(e) => Action::Reply(e.to_string()),
        }
    }

    fn cmd_download(&self, rest: &str) -> Action {
        let name = rest.trim();
        if name.is_empty() {
            return Action::Reply("ERROR: Usage: /download <filename>".to_string());
        }
        match self.files.read(name) {
            Ok(data) => Action::SendFile {
                filename: name.to_string(),
                data,
            },
            Err(e) => Action::Reply(e.to_string()),
        }
    }

    fn cmd_upload(&self, rest: &str) -> Action {
        let mut parts = rest.split_whitespace();
        let (Some(name), Some(size_token)) = (parts.next(), parts.next()) else {
            return Action::Reply("ERROR: Usage: /upload <filename> <size>".to_string());
        };
        let Ok(size) = size_token.parse::<u64>() else {
            return Action::Reply(format!("ERROR: Invalid size: {size_token}"));
        };
        if let Err(e) = self.files.resolve(name) {
            return Action::Reply(e.to_string());
        }
        Action::BeginUpload {
            filename: name.to_string(),
            size,
        }
    }
}

fn cmd_kick(rest: &str) -> Action {
    let token = rest.trim().trim_start_matches('#');
    match token.parse::<ConnId>() {
        Ok(target) => Action::Kick { target },
        Err(_) => Action::Reply("ERROR: Usage: /kick <client_id>".to_string()),
    }
}

/// Split a trimmed line into a lowercase command name and its argument text.
/// Returns None for plain text that is not a command.
fn parse_command(trimmed: &str) -> Option<(String, String)> {
    if let Some(stripped) = trimmed.strip_prefix('/') {
        let mut parts = stripped.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default().to_ascii_lowercase();
        if name.is_empty() {
            return None;
        }
        let rest = parts.next().unwrap_or_default().trim().to_string();
        Some((name, rest))
    } else {
        // Bare-word equivalents recognized without the slash.
        match trimmed.to_ascii_lowercase().as_str() {
            "help" | "quit" | "exit" | "stats" => {
                Some((trimmed.to_ascii_lowercase(), String::new()))
            }
            _ => None,
        }
    }
}

pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds < 60 {
        format!("{seconds} seconds")
    } else if seconds < 3600 {
        format!("{} minutes", seconds / 60)
    } else {
        format!("{} hours, {} minutes", seconds / 3600, (seconds % 3600) / 60)
    }
}

fn help_text() -> String {
    [
        "AUTHENTICATION HELP:",
        "/auth <username>              - Authenticate as read-only user",
        "/auth <username> <password>   - Authenticate as admin user",
        "/logout                       - Log out from current session",
        "/whoami                       - Show current user information",
        "/users                        - List all authenticated users (admin only)",
        "",
        "FILE COMMANDS (admin only):",
        "/list                         - List stored files",
        "/read <name>                  - Print a stored file",
        "/info <name>                  - Show file metadata",
        "/search <keyword>             - Find files by name",
        "/delete <name>                - Delete a stored file",
        "/upload <name> <size>         - Upload <size> raw bytes",
        "/download <name>              - Download a file",
        "",
        "READ-ONLY users can: echo messages, view stats, use help",
        "ADMIN users can: manage files, view all users, use all commands",
    ]
    .join("\n")
}
