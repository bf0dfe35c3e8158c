//! TLS trust configuration for administrative connections.
//!
//! Every connection this crate opens is TLS-wrapped. The trust set is built from a
//! local PEM bundle of certificate authorities (typically the deployment's own CA).
//! Loading the bundle never fails the caller: a missing, unreadable or malformed file
//! leaves the trust set empty or reduced, which surfaces later as a handshake failure
//! rather than as a silently weaker connection.

use crate::{Error, Result};
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls_pemfile::Item;
use rustls_pki_types::ServerName;
use std::fs;
use std::io::BufReader;
use std::sync::Arc;

/// Why a trust bundle contributed fewer roots than expected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleIssue {
    /// No path was configured
    NoPath,
    /// The file could not be read
    Unreadable(String),
    /// PEM parsing stopped early
    Malformed(String),
    /// The file held no usable certificates
    NoCertificates,
}

impl std::fmt::Display for BundleIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPath => write!(f, "no trust bundle path configured"),
            Self::Unreadable(e) => write!(f, "trust bundle unreadable: {}", e),
            Self::Malformed(e) => write!(f, "trust bundle malformed: {}", e),
            Self::NoCertificates => write!(f, "trust bundle contains no usable certificates"),
        }
    }
}

/// Trust configuration for outbound TLS connections.
///
/// Cheap to clone; the compiled rustls config is shared.
///
/// # Examples
///
/// ```no_run
/// use mongo_user_admin::connection::TrustConfig;
///
/// let trust = TrustConfig::builder()
///     .bundle_path("/etc/compose/ca.pem")
///     .build();
/// assert!(trust.root_count() <= 1);
/// ```
#[derive(Clone)]
pub struct TrustConfig {
    /// Path the roots were loaded from (empty = none)
    bundle_path: String,
    /// Number of trusted roots in the store
    root_count: usize,
    /// Problem encountered while loading the bundle, if any
    issue: Option<BundleIssue>,
    /// Compiled rustls ClientConfig
    client_config: Arc<ClientConfig>,
}

impl TrustConfig {
    /// Create a new trust configuration builder.
    pub fn builder() -> TrustConfigBuilder {
        TrustConfigBuilder::default()
    }

    /// Build a trust configuration from a single PEM bundle path.
    pub fn from_bundle(path: impl Into<String>) -> Self {
        Self::builder().bundle_path(path).build()
    }

    /// Get the rustls ClientConfig for this trust configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Number of trusted root certificates.
    pub fn root_count(&self) -> usize {
        self.root_count
    }

    /// Path of the PEM bundle this configuration was built from.
    pub fn bundle_path(&self) -> &str {
        &self.bundle_path
    }

    /// Problem encountered while loading the bundle, if any.
    pub fn issue(&self) -> Option<&BundleIssue> {
        self.issue.as_ref()
    }
}

impl std::fmt::Debug for TrustConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustConfig")
            .field("bundle_path", &self.bundle_path)
            .field("root_count", &self.root_count)
            .field("issue", &self.issue)
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

/// Builder for trust configuration.
#[derive(Debug, Default)]
pub struct TrustConfigBuilder {
    bundle_path: Option<String>,
    system_roots: bool,
}

impl TrustConfigBuilder {
    /// Set the path to a PEM bundle of additional trusted CAs.
    ///
    /// An empty path is treated as "no bundle".
    pub fn bundle_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.bundle_path = (!path.is_empty()).then_some(path);
        self
    }

    /// Also trust the platform's root certificates (default: disabled).
    ///
    /// Native roots are loaded via `rustls-native-certs`; when none can be loaded the
    /// bundled Mozilla roots from `webpki-roots` are used instead.
    pub fn system_roots(mut self, enabled: bool) -> Self {
        self.system_roots = enabled;
        self
    }

    /// Build the trust configuration.
    ///
    /// Never fails. Bundle problems are logged at `warn` and recorded in
    /// [`TrustConfig::issue`]; the resulting trust set is simply smaller.
    pub fn build(self) -> TrustConfig {
        let mut root_store = RootCertStore::empty();

        let issue = match &self.bundle_path {
            Some(path) => load_bundle(path, &mut root_store).err(),
            None => Some(BundleIssue::NoPath),
        };

        if let Some(issue) = &issue {
            if self.bundle_path.is_some() {
                crate::metrics::counters::trust_bundle_failed();
            }
            tracing::warn!(
                bundle = self.bundle_path.as_deref().unwrap_or(""),
                roots = root_store.len(),
                "{}; continuing with reduced trust set",
                issue
            );
        }

        if self.system_roots {
            add_system_roots(&mut root_store);
        }

        let root_count = root_store.len();
        let client_config = Arc::new(
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );

        TrustConfig {
            bundle_path: self.bundle_path.unwrap_or_default(),
            root_count,
            issue,
            client_config,
        }
    }
}

/// Append every parsable certificate in a PEM file to `store`.
///
/// Certificates before a parse error are kept.
fn load_bundle(path: &str, store: &mut RootCertStore) -> std::result::Result<(), BundleIssue> {
    let data = fs::read(path).map_err(|e| BundleIssue::Unreadable(e.to_string()))?;
    let mut reader = BufReader::new(data.as_slice());
    let mut found_certs = 0;

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(cert))) => {
                let (added, _ignored) = store.add_parsable_certificates(std::iter::once(cert));
                found_certs += added;
            }
            Ok(Some(_)) => {
                // Skip non-certificate items (private keys, CRLs, etc.)
            }
            Ok(None) => break,
            Err(e) => return Err(BundleIssue::Malformed(e.to_string())),
        }
    }

    if found_certs == 0 {
        return Err(BundleIssue::NoCertificates);
    }

    tracing::debug!(bundle = path, roots = found_certs, "loaded trust bundle");
    Ok(())
}

fn add_system_roots(store: &mut RootCertStore) {
    let result = rustls_native_certs::load_native_certs();
    let (added, _) = store.add_parsable_certificates(result.certs);

    if added == 0 {
        tracing::debug!(
            errors = result.errors.len(),
            "no native root certificates, using bundled webpki roots"
        );
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
}

/// Parse server name from a host for TLS SNI (Server Name Indication).
///
/// Accepts DNS names (a trailing dot is dropped) and IP literals, including bracketed
/// IPv6 as it appears in connection strings.
///
/// # Errors
///
/// Returns [`Error::Connect`] if the host is not a valid DNS name or IP address.
pub fn parse_server_name(host: &str) -> Result<ServerName<'static>> {
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
        .trim_end_matches('.');

    if host.is_empty() || host.len() > 253 {
        return Err(Error::Connect(format!("invalid hostname for TLS: '{}'", host)));
    }

    ServerName::try_from(host.to_string())
        .map_err(|_| Error::Connect(format!("invalid hostname for TLS: '{}'", host)))
}
