//! Configuration structures for directory connections.
//!
//! [`DirectoryConfig`] describes everything needed to open a connection in one
//! step: the endpoint, optional bind credentials, options applied after connect,
//! and the transport settings used by the protocol engine.

use crate::option::{DirectoryOption, OptionSetting, OptionValue};
use crate::{Error, Result};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Default LDAP port.
pub const DEFAULT_PORT: u16 = 389;
/// Default connection timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;
/// Default operation timeout (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

const SUPPORTED_SCHEMES: &[&str] = &["ldap", "ldaps", "ldapi"];

/// Transport-level settings consumed by the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct TransportConfig {
    /// Whether to verify TLS certificates
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,

    /// Optional path to a PEM CA certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_cert: Option<PathBuf>,

    /// Connection timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Per-operation timeout in seconds
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

const fn default_tls_verify() -> bool {
    true
}

const fn default_connection_timeout_secs() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

const fn default_operation_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

impl TransportConfig {
    /// Creates transport settings with defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tls_verify: default_tls_verify(),
            tls_ca_cert: None,
            connection_timeout_secs: default_connection_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }

    /// Enables or disables TLS certificate verification.
    #[must_use]
    pub const fn with_tls_verification(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Sets the custom CA certificate path for TLS verification.
    #[must_use]
    pub fn with_tls_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Overrides the connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    /// Overrides the operation timeout in seconds.
    #[must_use]
    pub const fn with_operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Returns the operation timeout duration.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for opening a directory connection in one step.
#[derive(Debug, Deserialize, Validate)]
pub struct DirectoryConfig {
    /// Host name or `ldap://`, `ldaps://`, `ldapi://` URL
    #[validate(length(min = 1))]
    host: String,

    /// Port used when `host` does not name one
    #[serde(default = "default_port")]
    port: u16,

    /// DN to bind as after connecting (no bind when absent)
    #[serde(default)]
    bind_dn: Option<String>,

    /// Password for `bind_dn`
    #[serde(default, deserialize_with = "deserialize_secret")]
    bind_password: Option<SecretString>,

    /// Options applied, in order, right after connecting
    #[serde(default)]
    options: Vec<OptionSetting>,

    /// Transport settings
    #[validate(nested)]
    #[serde(default)]
    transport: TransportConfig,
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

impl DirectoryConfig {
    /// Creates a configuration for the given host and port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the host is empty or does not form a valid
    /// directory URL.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let config = Self {
            host: host.into(),
            port,
            bind_dn: None,
            bind_password: None,
            options: Vec::new(),
            transport: TransportConfig::default(),
        };
        config.validated()?;
        Ok(config)
    }

    /// Validates the configuration, including the endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] describing the first problem found.
    pub fn validated(&self) -> Result<&Self> {
        self.validate()?;
        endpoint_url(&self.host, self.port)?;
        Ok(self)
    }

    /// Sets the credentials used to bind after connecting.
    #[must_use]
    pub fn with_bind(mut self, dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.bind_dn = Some(dn.into());
        self.bind_password = Some(SecretString::from(password.into()));
        self
    }

    /// Appends an option applied after connecting.
    #[must_use]
    pub fn with_option(mut self, option: DirectoryOption, value: impl Into<OptionValue>) -> Self {
        self.options.push(OptionSetting {
            option,
            value: value.into(),
        });
        self
    }

    /// Replaces the transport settings.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Returns the configured host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the configured port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the bind DN, if any.
    #[must_use]
    pub fn bind_dn(&self) -> Option<&str> {
        self.bind_dn.as_deref()
    }

    /// Returns the bind password, if any.
    #[must_use]
    pub const fn bind_password(&self) -> Option<&SecretString> {
        self.bind_password.as_ref()
    }

    /// Returns the options applied after connecting.
    #[must_use]
    pub fn options(&self) -> &[OptionSetting] {
        &self.options
    }

    /// Returns the transport settings.
    #[must_use]
    pub const fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    /// Builds the endpoint URL for this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the host does not form a valid URL.
    pub fn url(&self) -> Result<Url> {
        endpoint_url(&self.host, self.port)
    }
}

/// Builds a directory endpoint URL from a host (or URL) and a port.
///
/// A bare host becomes `ldap://host:port`; an IPv6 literal, with or without
/// brackets, becomes `ldap://[addr]:port`. A bare host may not carry its own port.
/// A host that already carries a scheme is
/// kept as-is; the port is only added when the URL has none and `port` differs
/// from [`DEFAULT_PORT`], so `ldaps://` keeps its own default.
///
/// # Errors
///
/// Returns [`Error::ConfigError`] for unparsable URLs and unsupported schemes.
pub fn endpoint_url(host: &str, port: u16) -> Result<Url> {
    let host = host.trim();
    if host.is_empty() {
        return Err(Error::ConfigError("directory host cannot be empty".to_string()));
    }

    if !host.contains("://") {
        if host.parse::<Ipv6Addr>().is_ok() {
            return Ok(Url::parse(&format!("ldap://[{host}]:{port}"))?);
        }
        if host.contains(':') && !host.starts_with('[') {
            return Err(Error::ConfigError(format!(
                "directory host `{host}` must not include a port; use the port setting or an ldap:// URL"
            )));
        }
        return Ok(Url::parse(&format!("ldap://{host}:{port}"))?);
    }

    let mut url = Url::parse(host)?;
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(Error::ConfigError(format!(
            "unsupported directory URL scheme `{}`",
            url.scheme()
        )));
    }

    if url.scheme() != "ldapi" && url.port().is_none() && port != DEFAULT_PORT {
        url.set_port(Some(port))
            .map_err(|()| Error::ConfigError(format!("cannot set port on `{host}`")))?;
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn builder_overrides() {
        let transport = TransportConfig::new()
            .with_tls_verification(false)
            .with_connection_timeout_secs(20)
            .with_operation_timeout_secs(45);
        let config = DirectoryConfig::new("ldap.example.com", 1389)
            .unwrap()
            .with_bind("cn=admin,dc=example,dc=com", "secret")
            .with_option(DirectoryOption::ProtocolVersion, 3_i64)
            .with_transport(transport);

        assert_eq!(config.bind_dn(), Some("cn=admin,dc=example,dc=com"));
        assert_eq!(
            config.bind_password().map(|p| p.expose_secret().to_string()),
            Some("secret".to_string())
        );
        assert_eq!(config.options().len(), 1);
        assert!(!config.transport().tls_verify);
        assert_eq!(config.transport().connection_timeout(), Duration::from_secs(20));
        assert_eq!(config.transport().operation_timeout(), Duration::from_secs(45));
        assert_eq!(config.url().unwrap().as_str(), "ldap://ldap.example.com:1389");
    }

    #[test]
    fn empty_host_is_rejected() {
        let err = DirectoryConfig::new("", DEFAULT_PORT).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn url_hosts_keep_their_scheme() {
        let url = endpoint_url("ldaps://ldap.example.com", DEFAULT_PORT).unwrap();
        assert_eq!(url.scheme(), "ldaps");
        assert_eq!(url.port(), None);

        let url = endpoint_url("ldap://ldap.example.com", 1389).unwrap();
        assert_eq!(url.port(), Some(1389));

        let url = endpoint_url("ldap://ldap.example.com:636", 1389).unwrap();
        assert_eq!(url.port(), Some(636));
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let url = endpoint_url("::1", DEFAULT_PORT).unwrap();
        assert_eq!(url.as_str(), "ldap://[::1]:389");

        let url = endpoint_url("[2001:db8::10]", 1389).unwrap();
        assert_eq!(url.port(), Some(1389));
        assert_eq!(url.host_str(), Some("[2001:db8::10]"));

        assert!(DirectoryConfig::new("fe80::1", 636).is_ok());
    }

    #[test]
    fn host_with_port_is_rejected() {
        let err = endpoint_url("ldap.example.com:1389", DEFAULT_PORT).unwrap_err();
        assert!(matches!(err, Error::ConfigError(ref message) if message.contains("port")));
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let err = endpoint_url("https://ldap.example.com", DEFAULT_PORT).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn deserialize_with_defaults() {
        let config: DirectoryConfig = serde_json::from_str(
            r#"{
                "host": "ldap.example.com",
                "bind_dn": "cn=reader,dc=example,dc=com",
                "bind_password": "hunter2",
                "options": [{"option": "protocol_version", "value": 3}]
            }"#,
        )
        .unwrap();

        assert_eq!(config.port(), DEFAULT_PORT);
        assert_eq!(config.options()[0].option, DirectoryOption::ProtocolVersion);
        assert!(config.transport().tls_verify);
        assert_eq!(
            config.transport().operation_timeout_secs,
            DEFAULT_OPERATION_TIMEOUT_SECS
        );
        assert!(config.validated().is_ok());
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn out_of_range_timeout_fails_validation() {
        let config: DirectoryConfig = serde_json::from_str(
            r#"{"host": "ldap.example.com", "transport": {"connection_timeout_secs": 0}}"#,
        )
        .unwrap();
        let err = config.validated().unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }
}
