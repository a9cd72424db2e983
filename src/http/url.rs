//! Request target parsing
//!
//! Decomposes `scheme://[user:pass@]host[:port][/path]` into the pieces the
//! request builder and the transport need.

use super::{Error, Result, HTTPS_PORT, HTTP_PORT};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;
use std::str::FromStr;

/// Parsed representation of an HTTP URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    hostname: String,
    port: u16,
    is_secure: bool,
    uri: String,
    authorization: Option<String>,
}

impl RequestTarget {
    /// Parse an `http` or `https` URL
    ///
    /// The scheme is matched case-sensitively. Without an explicit port the
    /// scheme's default applies; a missing path becomes `/`. Credentials in
    /// front of `@` are kept base64 encoded for Basic authentication.
    pub fn parse(url: &str) -> Result<Self> {
        let colon = url
            .find(':')
            .ok_or_else(|| Error::InvalidUrl(format!("missing protocol in \"{}\"", url)))?;

        let (port, is_secure) = match &url[..colon] {
            "http" => (HTTP_PORT, false),
            "https" => (HTTPS_PORT, true),
            other => return Err(Error::InvalidProtocol(other.to_string())),
        };

        let rest = url[colon + 1..]
            .strip_prefix("//")
            .ok_or_else(|| Error::InvalidUrl(format!("missing \"://\" in \"{}\"", url)))?;

        let (authority, uri) = match rest.find('/') {
            Some(slash) => (&rest[..slash], rest[slash..].to_string()),
            None => (rest, "/".to_string()),
        };

        let (authorization, host) = match authority.find('@') {
            Some(at) => {
                let encoded = STANDARD.encode(&authority[..at]);
                (Some(encoded.trim_end_matches('\n').to_string()), &authority[at + 1..])
            }
            None => (None, authority),
        };

        let (hostname, port) = match host.find(':') {
            Some(idx) => {
                let port_str = &host[idx + 1..];
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidPort(port_str.to_string()))?;
                (&host[..idx], port)
            }
            None => (host, port),
        };

        if hostname.is_empty() {
            return Err(Error::InvalidUrl(format!("missing host in \"{}\"", url)));
        }

        Ok(RequestTarget {
            hostname: hostname.to_string(),
            port,
            is_secure,
            uri,
            authorization,
        })
    }

    /// Server hostname
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Server port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connect over TLS?
    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    /// Request URI (absolute path, never empty)
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Base64 encoded `user:password`, if the URL carried credentials
    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    /// Port implied by the scheme
    pub fn default_port(&self) -> u16 {
        if self.is_secure {
            HTTPS_PORT
        } else {
            HTTP_PORT
        }
    }

    /// Value of the `Host` header; the port is only added when it differs
    /// from the scheme's default
    pub fn host_header(&self) -> String {
        if self.port == self.default_port() {
            self.hostname.clone()
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }
}

impl FromStr for RequestTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RequestTarget::parse(s)
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.hostname, self.port, self.uri)
    }
}
