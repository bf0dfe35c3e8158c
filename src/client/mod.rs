//! User administration client
//!
//! * Connection string resolution
//! * Administrative sessions (primary selection, authentication)
//! * Credential lifecycle operations (create, update, delete)

mod config;
mod connection_string;
mod models;
mod session;
mod user_client;

pub use config::{ClientConfig, ClientConfigBuilder};
pub use connection_string::{
    resolve, strip_ssl_suffix, ConnectionInfo, DialTarget, ServerAddress, SSL_SUFFIX,
};
pub use models::{Credential, TargetDeployment};
pub use session::Session;
pub use user_client::Client;
