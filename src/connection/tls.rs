//! TLS configuration for `rediss://` connections.
//!
//! Managed cache services usually only accept TLS; this module builds the
//! rustls client configuration used by [`Transport::connect_tcp_tls`].
//!
//! [`Transport::connect_tcp_tls`]: crate::connection::Transport::connect_tcp_tls

use crate::{Error, Result};
use rustls::ClientConfig;
use rustls::RootCertStore;
use std::fs;
use std::sync::Arc;

/// TLS configuration for secure cache connections.
///
/// By default, server certificates are validated against the system root
/// certificates, falling back to the bundled Mozilla roots when the system
/// store is empty.
///
/// # Examples
///
/// ```ignore
/// use recipiece_cache::connection::TlsConfig;
///
/// // With system root certificates (production)
/// let tls = TlsConfig::builder().build()?;
///
/// // With custom CA certificate
/// let tls = TlsConfig::builder()
///     .ca_cert_path("/path/to/ca.pem")
///     .build()?;
/// ```
#[derive(Clone)]
pub struct TlsConfig {
    /// Path to CA certificate file (None = use system roots)
    ca_cert_path: Option<String>,
    /// Compiled rustls ClientConfig
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Create a new TLS configuration builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Get the rustls ClientConfig for this TLS configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Custom CA bundle, if one was configured.
    pub fn ca_cert_path(&self) -> Option<&str> {
        self.ca_cert_path.as_deref()
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("ca_cert_path", &self.ca_cert_path)
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

/// Builder for TLS configuration.
#[derive(Debug, Default)]
pub struct TlsConfigBuilder {
    ca_cert_path: Option<String>,
}

impl TlsConfigBuilder {
    /// Set the path to a custom CA certificate file (PEM format).
    ///
    /// If not set, system root certificates will be used.
    pub fn ca_cert_path(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Build the TLS configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the CA certificate file cannot be read or
    /// contains no certificates.
    pub fn build(self) -> Result<TlsConfig> {
        let root_store = match &self.ca_cert_path {
            Some(ca_path) => load_custom_ca(ca_path)?,
            None => load_system_roots(),
        };

        let client_config = Arc::new(
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );

        Ok(TlsConfig {
            ca_cert_path: self.ca_cert_path,
            client_config,
        })
    }
}

fn load_system_roots() -> RootCertStore {
    let native = rustls_native_certs::load_native_certs();
    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(native.certs);

    if store.is_empty() {
        tracing::warn!(
            errors = native.errors.len(),
            ignored,
            "no usable system root certificates, using bundled Mozilla roots"
        );
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    } else {
        tracing::debug!(added, ignored, "loaded system root certificates");
    }

    store
}

fn load_custom_ca(ca_path: &str) -> Result<RootCertStore> {
    let pem = fs::read(ca_path)
        .map_err(|e| Error::Config(format!("cannot read CA bundle '{}': {}", ca_path, e)))?;

    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("invalid PEM in CA bundle '{}': {}", ca_path, e)))?;

    let mut store = RootCertStore::empty();
    let (added, _) = store.add_parsable_certificates(certs);
    if added == 0 {
        return Err(Error::Config(format!(
            "CA bundle '{}' contains no usable certificates",
            ca_path
        )));
    }

    Ok(store)
}

/// Validate a host for use as the TLS server name (SNI)
///
/// A trailing dot is dropped. IPv6 literals are accepted without brackets.
///
/// # Errors
///
/// `Error::Config` if the host is empty, longer than a DNS name may be, or
/// contains characters outside DNS names and IP literals.
pub fn parse_server_name(hostname: &str) -> Result<String> {
    let hostname = hostname.trim_end_matches('.');

    let valid_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ':');
    if hostname.is_empty() || hostname.len() > 253 || !hostname.chars().all(valid_char) {
        return Err(Error::Config(format!(
            "invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    Ok(hostname.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_config_builder_defaults() {
        let builder = TlsConfigBuilder::default();
        assert!(builder.ca_cert_path.is_none());
    }

    #[test]
    fn test_tls_config_builds_with_system_roots() {
        let tls = TlsConfig::builder()
            .build()
            .expect("Failed to build TLS config");
        assert!(tls.ca_cert_path().is_none());
    }

    #[test]
    fn test_tls_config_missing_ca_file() {
        let result = TlsConfig::builder()
            .ca_cert_path("/nonexistent/ca.pem")
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_tls_config_ca_file_without_certs() {
        let path = std::env::temp_dir().join(format!("recipiece-cache-empty-{}.pem", std::process::id()));
        fs::write(&path, "not a certificate\n").unwrap();

        let result = TlsConfig::builder()
            .ca_cert_path(path.to_string_lossy())
            .build();
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_server_name_valid() {
        assert!(parse_server_name("localhost").is_ok());
        assert!(parse_server_name("cache.internal.example.com").is_ok());
        assert!(parse_server_name("10.0.0.5").is_ok());
    }

    #[test]
    fn test_parse_server_name_trailing_dot() {
        assert_eq!(parse_server_name("example.com.").unwrap(), "example.com");
    }

    #[test]
    fn test_parse_server_name_invalid() {
        assert!(parse_server_name("").is_err());
        assert!(parse_server_name("bad host").is_err());
        assert!(parse_server_name(&"a".repeat(300)).is_err());
    }

    #[test]
    fn test_tls_config_debug() {
        let tls = TlsConfig::builder()
            .build()
            .expect("Failed to build TLS config");

        let debug_str = format!("{:?}", tls);
        assert!(debug_str.contains("TlsConfig"));
        assert!(debug_str.contains("ca_cert_path"));
    }
}
