//! Connection management
//!
//! This module handles:
//! * Transport abstraction (plain TCP vs TLS)
//! * TLS trust configuration built from a local PEM bundle
//! * Per-connection dial hooks
//! * Connection lifecycle (handshake, auth, command execution)
//! * State machine enforcement

mod conn;
mod dial;
mod state;
mod tls;
mod transport;

pub use conn::{AuthCredentials, Connection, HelloReply};
pub use dial::{Dialer, MakeDialer, TlsDialer, TlsDialerFactory};
pub use state::ConnectionState;
pub use tls::{parse_server_name, BundleIssue, TrustConfig, TrustConfigBuilder};
pub use transport::Transport;
