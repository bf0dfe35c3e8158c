//! Error types
//!
//! Every failure the crate can produce is returned as an [`Error`]; nothing in the
//! library terminates the host process. Callers that want fail-fast behavior match on
//! [`Error::kind`] and decide for themselves.

use crate::protocol::CommandError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Server error code: user not found
pub(crate) const USER_NOT_FOUND: i32 = 11;

/// Server error code: caller lacks the privilege for the command
pub(crate) const UNAUTHORIZED: i32 = 13;

/// Server error code: authentication failed
pub(crate) const AUTHENTICATION_FAILED: i32 = 18;

/// Server error code: duplicate key (user already exists on servers before 4.2)
pub(crate) const DUPLICATE_KEY: i32 = 11000;

/// Server error code: user already exists
pub(crate) const USER_ALREADY_EXISTS: i32 = 51003;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// The administrative connection string could not be parsed
    #[error("invalid connection string: {0}")]
    ConnectionString(String),

    /// No usable server could be reached (TCP connect, TLS handshake, topology)
    #[error("connect error: {0}")]
    Connect(String),

    /// The server rejected the administrative credentials
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// `createUser` for a username that already exists on the database
    #[error("user '{username}' already exists on database '{database}'")]
    UserAlreadyExists {
        /// Username that was submitted
        username: String,
        /// Target database
        database: String,
    },

    /// `dropUser` for a username that does not exist on the database
    #[error("user '{username}' not found on database '{database}'")]
    UserNotFound {
        /// Username that was submitted
        username: String,
        /// Target database
        database: String,
    },

    /// The administrative user lacks the privilege for the command
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Any other command failure reported by the server
    #[error("command failed: {0}")]
    Command(CommandError),

    /// Wire protocol violation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid connection state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Connection closed by the server mid-exchange
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Connect attempt exceeded the configured timeout
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error on an established connection
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification of an [`Error`], stable for callers to match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed administrative connection string
    ConnectionParse,
    /// Dial, TLS handshake or server selection failure
    Connect,
    /// Credentials rejected
    Authentication,
    /// User already exists
    UserAlreadyExists,
    /// User does not exist
    UserNotFound,
    /// Missing privilege
    PermissionDenied,
    /// Other server-side command failure
    Command,
    /// Unclassified transport failure on an established connection
    Transport,
}

impl ErrorKind {
    /// Stable, lowercase label (used for logs and metrics)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionParse => "connection_parse",
            Self::Connect => "connect",
            Self::Authentication => "authentication",
            Self::UserAlreadyExists => "user_already_exists",
            Self::UserNotFound => "user_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::Command => "command",
            Self::Transport => "transport",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConnectionString(_) => ErrorKind::ConnectionParse,
            Error::Connect(_) | Error::Timeout(_) => ErrorKind::Connect,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::UserAlreadyExists { .. } => ErrorKind::UserAlreadyExists,
            Error::UserNotFound { .. } => ErrorKind::UserNotFound,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::Command(_) => ErrorKind::Command,
            Error::Protocol(_)
            | Error::InvalidState { .. }
            | Error::ConnectionClosed
            | Error::Io(_) => ErrorKind::Transport,
        }
    }

    /// Whether opening a fresh session could plausibly succeed after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connect(_) | Error::Timeout(_) | Error::ConnectionClosed | Error::Io(_)
        )
    }

    /// Map a server command failure to a typed error.
    ///
    /// `username` and `database` give context for the user-management codes; other
    /// codes carry the server's own message.
    pub(crate) fn from_command(err: CommandError, username: &str, database: &str) -> Self {
        match err.code {
            USER_NOT_FOUND => Error::UserNotFound {
                username: username.to_string(),
                database: database.to_string(),
            },
            USER_ALREADY_EXISTS | DUPLICATE_KEY => Error::UserAlreadyExists {
                username: username.to_string(),
                database: database.to_string(),
            },
            _ => Error::from(err),
        }
    }
}

impl From<CommandError> for Error {
    fn from(err: CommandError) -> Self {
        match err.code {
            AUTHENTICATION_FAILED => Error::Authentication(err.to_string()),
            UNAUTHORIZED => Error::PermissionDenied(err.to_string()),
            _ => Error::Command(err),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
