//! Per-connection dial hooks
//!
//! A [`Dialer`] turns a server address into a ready transport. The session layer
//! calls it once per candidate host, so every connection the driver opens goes
//! through the same TLS trust decisions.

use crate::client::{ClientConfig, ServerAddress};
use crate::connection::{Transport, TrustConfig};
use crate::{Error, Result};
use std::future::Future;

/// Opens transports to individual servers
pub trait Dialer: Send + Sync {
    /// Connect to `addr` and return a transport ready for wire traffic.
    ///
    /// Failures should surface as [`Error::Connect`] (or [`Error::Timeout`]).
    fn dial(&self, addr: &ServerAddress) -> impl Future<Output = Result<Transport>> + Send;
}

/// Dialer that opens a TCP connection and immediately wraps it in TLS.
///
/// The server certificate must chain to a root in the configured [`TrustConfig`]
/// and match the host name being dialed.
#[derive(Debug, Clone)]
pub struct TlsDialer {
    trust: TrustConfig,
}

impl TlsDialer {
    /// Create a dialer that verifies servers against `trust`
    pub fn new(trust: TrustConfig) -> Self {
        Self { trust }
    }

    /// Trust configuration used for verification
    pub fn trust(&self) -> &TrustConfig {
        &self.trust
    }
}

impl Dialer for TlsDialer {
    async fn dial(&self, addr: &ServerAddress) -> Result<Transport> {
        tracing::debug!(address = %addr, roots = self.trust.root_count(), "dialing");

        Transport::connect_tcp_tls(&addr.host, addr.port, &self.trust)
            .await
            .map_err(|e| match e {
                Error::Io(io) => Error::Connect(format!("{}: {}", addr, io)),
                Error::Connect(msg) => Error::Connect(format!("{}: {}", addr, msg)),
                other => other,
            })
    }
}

/// Builds a fresh [`Dialer`] for each lifecycle operation
pub trait MakeDialer: Send + Sync {
    /// Dialer type produced
    type Dialer: Dialer;

    /// Build a dialer for one operation under `config`
    fn make_dialer(&self, config: &ClientConfig) -> Self::Dialer;
}

/// Default factory: TLS dialers whose trust set is re-read from the configured
/// bundle on every call, so a rotated CA file takes effect on the next operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsDialerFactory;

impl MakeDialer for TlsDialerFactory {
    type Dialer = TlsDialer;

    fn make_dialer(&self, config: &ClientConfig) -> TlsDialer {
        let trust = TrustConfig::builder()
            .bundle_path(config.trust_bundle_path())
            .system_roots(config.system_roots())
            .build();
        TlsDialer::new(trust)
    }
}
