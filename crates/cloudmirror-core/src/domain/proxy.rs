//! Proxy settings
//!
//! The user picks one of three modes. `Auto` defers to whatever proxy the
//! engine detected from the system; the engine reports it as a
//! `scheme://host:port` (or bare `host:port`) description which is parsed
//! here into the same [`ProxyEndpoint`] shape as a custom proxy.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Wire protocol spoken to the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyProtocol {
    #[default]
    Http,
    /// SOCKS5 with remote DNS resolution
    Socks5h,
}

impl ProxyProtocol {
    /// URL scheme for this protocol
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Socks5h => "socks5h",
        }
    }
}

/// Username and password for an authenticating proxy
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A concrete proxy server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyEndpoint {
    pub fn new(protocol: ProxyProtocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
            credentials: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(ProxyCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Returns the proxy as `scheme://host:port`, without credentials
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.host, self.port)
    }

    /// Parses an auto-detected proxy description
    ///
    /// Any scheme starting with `socks` selects SOCKS5H; everything else,
    /// including a missing scheme, is treated as HTTP.
    pub fn parse_auto(description: &str) -> Result<Self, DomainError> {
        let (protocol, authority) = match description.split_once("://") {
            Some((scheme, rest)) if scheme.starts_with("socks") => (ProxyProtocol::Socks5h, rest),
            Some((_, rest)) => (ProxyProtocol::Http, rest),
            None => (ProxyProtocol::Http, description),
        };
        let authority = authority.trim_end_matches('/');

        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| DomainError::InvalidProxy(description.to_string()))?;
        if host.is_empty() {
            return Err(DomainError::InvalidProxy(description.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| DomainError::InvalidProxy(description.to_string()))?;

        Ok(Self::new(protocol, host, port))
    }
}

/// Proxy mode selected in the preferences
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ProxySettings {
    /// Direct connection
    #[default]
    None,
    /// Use the proxy the engine detected from the system
    Auto,
    /// Use an explicitly configured proxy
    Custom(ProxyEndpoint),
}

impl ProxySettings {
    /// Resolves the settings to a concrete endpoint
    ///
    /// `auto_description` is the engine's detected proxy, consulted only in
    /// `Auto` mode. An `Auto` mode with no detected proxy resolves to a
    /// direct connection.
    pub fn resolve(
        &self,
        auto_description: Option<&str>,
    ) -> Result<Option<ProxyEndpoint>, DomainError> {
        match self {
            ProxySettings::None => Ok(None),
            ProxySettings::Custom(endpoint) => Ok(Some(endpoint.clone())),
            ProxySettings::Auto => auto_description
                .map(ProxyEndpoint::parse_auto)
                .transpose(),
        }
    }
}
