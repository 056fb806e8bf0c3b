//! Authentication policy and role-based command gating
//!
//! A connection is either unauthenticated, authenticated with the read role,
//! or authenticated with the admin role. Supplying the configured admin
//! secret with /auth grants admin; omitting it grants read. The secret is
//! compared in plaintext with no lockout, a deliberately retained weakness
//! of the protocol (see DESIGN.md).

use crate::error::AuthError;
use crate::session::{ConnId, Role, Session, SessionStore};
use tracing::{info, warn};

pub const MAX_USERNAME_LEN: usize = 50;

/// Commands usable without a session.
const PRE_AUTH_COMMANDS: &[&str] = &["auth", "help", "quit", "exit"];

/// Commands requiring the admin role.
const ADMIN_COMMANDS: &[&str] = &[
    "list", "read", "delete", "search", "info", "download", "upload", "shutdown", "kick", "users",
];

/// Permissions granted to read-role sessions.
const READ_PERMISSIONS: &[&str] = &["auth", "stats", "echo", "help", "whoami", "logout"];

/// Validates credentials and gates commands by role.
pub struct AuthPolicy {
    admin_password: String,
    log_failed_auth: bool,
}

impl AuthPolicy {
    pub fn new(admin_password: impl Into<String>, log_failed_auth: bool) -> Self {
        Self {
            admin_password: admin_password.into(),
            log_failed_auth,
        }
    }

    /// Validate a username/optional-password pair for a connection and
    /// produce the session to bind. The caller inserts it into the store.
    ///
    /// Order matters: username validation first, then the one-session rule,
    /// then credentials, so a second /auth on an authenticated connection is
    /// rejected no matter what credentials it carries.
    pub fn authenticate(
        &self,
        sessions: &SessionStore,
        conn_id: ConnId,
        username: &str,
        password: Option<&str>,
    ) -> Result<Session, AuthError> {
        let username = username.trim();

        if username.is_empty() {
            return Err(AuthError::EmptyUsername);
        }
        if username.len() > MAX_USERNAME_LEN {
            return Err(AuthError::UsernameTooLong);
        }
        if !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(AuthError::InvalidUsernameChars);
        }

        if sessions.contains(conn_id) {
            return Err(AuthError::AlreadyAuthenticated);
        }

        let role = match password {
            Some(p) if p == self.admin_password => Role::Admin,
            Some(_) => {
                if self.log_failed_auth {
                    warn!(conn_id, user = username, "failed admin authentication");
                }
                return Err(AuthError::InvalidCredentials);
            }
            None => Role::Read,
        };

        info!(
            conn_id,
            user = username,
            role = role.as_str(),
            "client authenticated"
        );

        Ok(Session::new(username.to_string(), role))
    }

    /// Check whether a command may run on this connection right now.
    /// Err carries the exact denial line to send to the client.
    pub fn validate_command(
        &self,
        sessions: &SessionStore,
        conn_id: ConnId,
        command: &str,
    ) -> Result<(), String> {
        let command = command.trim_start_matches('/').to_ascii_lowercase();

        if PRE_AUTH_COMMANDS.contains(&command.as_str()) {
            return Ok(());
        }

        let Some(session) = sessions.get(conn_id) else {
            return Err("ERROR: Authentication required. Use /auth <username> [password]".into());
        };

        match session.role {
            Role::Admin => Ok(()),
            Role::Read => {
                if ADMIN_COMMANDS.contains(&command.as_str()) {
                    Err(format!(
                        "ERROR: ADMIN privileges required for /{command} command"
                    ))
                } else if READ_PERMISSIONS.contains(&command.as_str()) {
                    Ok(())
                } else {
                    Err(
                        "ERROR: Unknown command or insufficient permissions. Use /help for available commands."
                            .into(),
                    )
                }
            }
        }
    }

    /// Permission check for non-command behaviors (currently only `echo`).
    pub fn has_permission(
        &self,
        sessions: &SessionStore,
        conn_id: ConnId,
        permission: &str,
    ) -> bool {
        match sessions.get(conn_id) {
            Some(session) => match session.role {
                Role::Admin => true,
                Role::Read => READ_PERMISSIONS.contains(&permission),
            },
            None => false,
        }
    }
}
